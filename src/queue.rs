//! Shared state between the [`Mailer`](crate::Mailer) handle and the session
//! draining its queue

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use tokio::sync::{broadcast, watch};

use crate::{
    message::Message,
    transport::smtp::{response::Code, Error},
};

const EVENT_CAPACITY: usize = 64;

/// Progress notifications of a sending cycle
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Event {
    /// A message left the session, delivered or not
    Progress {
        /// Messages processed since the cycle started
        processed: usize,
    },
    /// The cycle is over, always the last event of a cycle
    Finished {
        /// Whether every queued message was processed
        queue_empty: bool,
    },
    /// The cycle stopped because of a connection level failure
    Error {
        /// Reply code, when the server refused something
        code: Option<Code>,
        text: String,
    },
}

/// How a message failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Failure {
    /// 4xx, or the connection broke while the message was in flight
    Temporary,
    /// 5xx, or the message could not be serialized
    Permanent,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Counters {
    processed: usize,
    temporary_errors: usize,
    permanent_errors: usize,
}

/// FIFO of pending messages with the counters and flags of the running cycle
#[derive(Debug)]
pub(crate) struct QueueManager {
    queue: Mutex<VecDeque<Message>>,
    counters: Mutex<Counters>,
    cancel: AtomicBool,
    busy: watch::Sender<bool>,
    events: broadcast::Sender<Event>,
}

impl QueueManager {
    pub(crate) fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        QueueManager {
            queue: Mutex::new(VecDeque::new()),
            counters: Mutex::new(Counters::default()),
            cancel: AtomicBool::new(false),
            busy: watch::Sender::new(false),
            events,
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Message>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks a cycle as running
    ///
    /// Returns `false`, touching nothing, when one already runs.
    pub(crate) fn begin_cycle(&self) -> bool {
        let started = self.busy.send_if_modified(|busy| {
            if *busy {
                false
            } else {
                *busy = true;
                true
            }
        });
        if started {
            *self.counters() = Counters::default();
            self.cancel.store(false, Ordering::SeqCst);
        }
        started
    }

    /// Ends the running cycle
    pub(crate) fn finish(&self) {
        let queue_empty = self.is_empty();
        #[cfg(feature = "tracing")]
        {
            let counters = *self.counters();
            tracing::debug!(
                "cycle finished: {} processed, {} temporary and {} permanent errors",
                counters.processed,
                counters.temporary_errors,
                counters.permanent_errors
            );
        }
        self.emit(Event::Finished { queue_empty });
        self.busy.send_replace(false);
    }

    pub(crate) fn is_busy(&self) -> bool {
        *self.busy.borrow()
    }

    /// Resolves once no cycle is running
    pub(crate) async fn wait_idle(&self) {
        let mut busy = self.busy.subscribe();
        // the sender lives in `self`, the channel cannot close here
        let _ = busy.wait_for(|busy| !*busy).await;
    }

    pub(crate) fn enqueue(&self, message: Message) {
        self.queue().push_back(message);
    }

    pub(crate) fn dequeue(&self) -> Option<Message> {
        self.queue().pop_front()
    }

    /// Puts back a message that was taken but never transmitted
    pub(crate) fn requeue(&self, message: Message) {
        self.queue().push_front(message);
    }

    pub(crate) fn len(&self) -> usize {
        self.queue().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }

    pub(crate) fn record_success(&self) {
        let processed = {
            let mut counters = self.counters();
            counters.processed += 1;
            counters.processed
        };
        self.emit(Event::Progress { processed });
    }

    pub(crate) fn record_failure(&self, failure: Failure) {
        let processed = {
            let mut counters = self.counters();
            match failure {
                Failure::Temporary => counters.temporary_errors += 1,
                Failure::Permanent => counters.permanent_errors += 1,
            }
            counters.processed += 1;
            counters.processed
        };
        self.emit(Event::Progress { processed });
    }

    /// Reports a failure ending the cycle
    pub(crate) fn report_error(&self, err: &Error) {
        #[cfg(feature = "tracing")]
        tracing::warn!("sending cycle failed: {}", err);
        self.emit(Event::Error {
            code: err.status(),
            text: err.to_string(),
        });
    }

    /// `(temporary, permanent)` error counts of the last cycle
    pub(crate) fn last_errors(&self) -> (usize, usize) {
        let counters = self.counters();
        (counters.temporary_errors, counters.permanent_errors)
    }

    pub(crate) fn processed(&self) -> usize {
        self.counters().processed
    }

    pub(crate) fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    fn emit(&self, event: Event) {
        // no subscriber is fine
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{Event, Failure, QueueManager};
    use crate::message::Message;

    fn message(to: &str) -> Message {
        Message::new(to, "s@x.com", "Hi", "Hello")
    }

    #[test]
    fn fifo_with_requeue() {
        let queue = QueueManager::new();
        queue.enqueue(message("a@x.com"));
        queue.enqueue(message("b@x.com"));
        assert_eq!(queue.len(), 2);

        let first = queue.dequeue().unwrap();
        assert_eq!(first.to(), ["a@x.com"]);
        queue.requeue(first);

        assert_eq!(queue.dequeue().unwrap().to(), ["a@x.com"]);
        assert_eq!(queue.dequeue().unwrap().to(), ["b@x.com"]);
        assert!(queue.dequeue().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn only_one_cycle_at_a_time() {
        let queue = QueueManager::new();
        assert!(queue.begin_cycle());
        queue.record_failure(Failure::Permanent);

        assert!(!queue.begin_cycle());
        assert_eq!(queue.last_errors(), (0, 1));
        assert!(queue.is_busy());

        queue.finish();
        assert!(!queue.is_busy());
        assert!(queue.begin_cycle());
        assert_eq!(queue.last_errors(), (0, 0));
        assert_eq!(queue.processed(), 0);
    }

    #[test]
    fn cancel_flag_resets_with_the_cycle() {
        let queue = QueueManager::new();
        assert!(queue.begin_cycle());
        queue.request_cancel();
        assert!(queue.cancel_requested());
        queue.finish();

        assert!(queue.begin_cycle());
        assert!(!queue.cancel_requested());
    }

    #[tokio::test]
    async fn events_in_order() {
        let queue = QueueManager::new();
        let mut events = queue.subscribe();
        queue.enqueue(message("a@x.com"));

        assert!(queue.begin_cycle());
        queue.record_success();
        queue.record_failure(Failure::Temporary);
        queue.finish();

        assert_eq!(events.recv().await.unwrap(), Event::Progress { processed: 1 });
        assert_eq!(events.recv().await.unwrap(), Event::Progress { processed: 2 });
        assert_eq!(
            events.recv().await.unwrap(),
            Event::Finished { queue_empty: false }
        );
        assert_eq!(queue.last_errors(), (1, 0));
    }

    #[tokio::test]
    async fn wait_idle_returns_when_finished() {
        let queue = std::sync::Arc::new(QueueManager::new());
        queue.wait_idle().await;

        assert!(queue.begin_cycle());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.wait_idle().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        queue.finish();
        waiter.await.unwrap();
    }
}
