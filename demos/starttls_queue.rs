use smtp_queue::{transport::smtp::authentication::Credentials, Event, Mailer, Message};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let creds = Credentials::new("smtp_username".to_owned(), "smtp_password".to_owned());

    // Open a remote connection to gmail using STARTTLS
    let mailer = Mailer::starttls_relay("smtp.gmail.com")
        .unwrap()
        .credentials(creds)
        .build();

    for to in ["hei@domain.tld", "yuin@domain.tld"] {
        mailer.enqueue(Message::new(
            to,
            "nobody@domain.tld",
            "Happy new async year",
            "Be happy with async!",
        ));
    }

    let mut events = mailer.subscribe();
    if !mailer.send_all().await {
        panic!("Could not start sending");
    }

    while let Ok(event) = events.recv().await {
        match event {
            Event::Progress { processed } => println!("{processed} message(s) processed"),
            Event::Error { text, .. } => eprintln!("Sending stopped: {text}"),
            Event::Finished { queue_empty } => {
                let (temporary, permanent) = mailer.last_errors();
                println!(
                    "Done, queue empty: {queue_empty}, {temporary} temporary and {permanent} permanent failure(s)"
                );
                break;
            }
        }
    }
}
