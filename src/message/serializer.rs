//! Wire format of a [`Message`]
//!
//! [`formatted`] produces the exact bytes written after the server accepted
//! `DATA`: headers with folded recipient lists, an optional
//! `multipart/mixed` envelope around base64 attachments, transparency and
//! the end-of-data line.

use std::{fs, mem, path::Path};

use base64::{engine::general_purpose::STANDARD, Engine};

use super::{codec::TransparencyCodec, mimetype::MimeLookup, Message};
use crate::transport::smtp::error::{self, Error};

/// Lines are folded before they reach this many bytes
pub const MAX_LINE_LENGTH: usize = 76;

/// Separates the parts of messages with attachments
pub const BOUNDARY: &str = "smtp-queue-boundary-6c1f0e9d2b";

/// What to do when an attachment cannot be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AttachmentPolicy {
    /// Send the part with an empty content and log a warning
    #[default]
    Lenient,
    /// Refuse to serialize the message
    Strict,
}

/// Serializes a message into the payload following `DATA`
///
/// The result is dot-stuffed and ends with `\r\n.\r\n`. Messages failing
/// [`Message::validate`] are refused.
pub fn formatted(
    message: &Message,
    lookup: &dyn MimeLookup,
    policy: AttachmentPolicy,
) -> Result<Vec<u8>, Error> {
    message.validate()?;
    let mut out = String::new();

    for (label, addresses) in [
        ("To: ", message.to()),
        ("Cc: ", message.cc()),
        ("Bcc: ", message.bcc()),
    ] {
        if !addresses.is_empty() {
            out.push_str(&recipient_header(label, addresses));
        }
    }
    out.push_str("From: ");
    out.push_str(message.sender());
    out.push_str("\r\n");
    out.push_str("Subject: ");
    out.push_str(message.subject());
    out.push_str("\r\n");

    let attachments = message.attachments();
    if !attachments.is_empty() {
        out.push_str("MIME-Version: 1.0\r\n");
        out.push_str(&format!(
            "Content-type: multipart/mixed; boundary=\"{BOUNDARY}\"\r\n\r\n"
        ));
        out.push_str(&format!("--{BOUNDARY}\r\n"));
    }

    let mut body = message.body().to_owned();
    in_place_crlf_line_endings(&mut body);
    out.push_str("\r\n");
    out.push_str(&body);
    out.push_str("\r\n");

    if !attachments.is_empty() {
        out.push_str(&format!("--{BOUNDARY}\r\n"));
        for (i, path) in attachments.iter().enumerate() {
            out.push_str(&attachment_part(path, lookup, policy)?);
            out.push_str(&format!("\r\n--{BOUNDARY}"));
            if i + 1 == attachments.len() {
                out.push_str("--");
            }
            out.push_str("\r\n");
        }
    }

    let mut buf = Vec::with_capacity(out.len() + 8);
    let mut codec = TransparencyCodec::new();
    codec.encode(out.as_bytes(), &mut buf);
    codec.finish(&mut buf);
    Ok(buf)
}

/// Builds one recipient header, folding between addresses
///
/// A line is broken before an address when the address and its trailing
/// comma would make it reach [`MAX_LINE_LENGTH`]. Continuation lines start
/// with one space.
fn recipient_header(label: &str, addresses: &[String]) -> String {
    let mut header = label.to_owned();
    let mut line_length = label.len();
    let mut continuation = false;

    for (i, address) in addresses.iter().enumerate() {
        let last = i + 1 == addresses.len();
        let separator = usize::from(!last);

        // an address never gets folded away from a fresh continuation line
        let fresh_line = continuation && line_length == 1;
        if !fresh_line && line_length + address.len() + separator >= MAX_LINE_LENGTH {
            header.push_str("\r\n ");
            line_length = 1;
            continuation = true;
        }

        header.push_str(address);
        line_length += address.len();
        if !last {
            header.push(',');
            line_length += 1;
        }
    }

    header.push_str("\r\n");
    header
}

fn attachment_part(
    path: &Path,
    lookup: &dyn MimeLookup,
    policy: AttachmentPolicy,
) -> Result<String, Error> {
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let content_type = lookup
        .mime_type(path)
        .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string());

    let content = match fs::read(path) {
        Ok(content) => content,
        Err(err) => match policy {
            AttachmentPolicy::Strict => {
                return Err(error::client(format!(
                    "Could not read attachment {}: {err}",
                    path.display()
                )))
            }
            AttachmentPolicy::Lenient => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "attachment {} could not be read, sending it empty: {}",
                    path.display(),
                    err
                );
                Vec::new()
            }
        },
    };

    let mut part = format!(
        "Content-type: {content_type}; name={filename}\r\n\
         Content-Transfer-Encoding: base64\r\n\
         Content-Disposition: attachment; filename={filename}\r\n\r\n"
    );
    part.push_str(&wrapped_base64(&content));
    Ok(part)
}

/// Base64 with a CRLF after every [`MAX_LINE_LENGTH`] encoded characters
fn wrapped_base64(content: &[u8]) -> String {
    let encoded = STANDARD.encode(content);
    let mut wrapped = String::with_capacity(encoded.len() + encoded.len() / 38);
    // base64 output is ASCII, byte chunks are char boundaries
    for (i, chunk) in encoded.as_bytes().chunks(MAX_LINE_LENGTH).enumerate() {
        if i > 0 {
            wrapped.push_str("\r\n");
        }
        wrapped.push_str(&String::from_utf8_lossy(chunk));
    }
    wrapped
}

/// Turns every bare `\n` into `\r\n`
fn in_place_crlf_line_endings(string: &mut String) {
    let indices = find_all_lf_char_indices(string);

    for i in indices {
        // this relies on `indices` being in reverse order
        string.insert(i, '\r');
    }
}

/// Find indices to all places where `\r` should be inserted
/// in order to make `s` have CRLF line endings
///
/// The list is reversed, which is more efficient.
fn find_all_lf_char_indices(s: &str) -> Vec<usize> {
    let mut indices = Vec::new();

    let mut found_lf = false;
    for (i, c) in s.char_indices().rev() {
        if mem::take(&mut found_lf) && c != '\r' {
            indices.push(i + c.len_utf8());
        }

        found_lf = c == '\n';
    }

    if found_lf {
        indices.push(0);
    }

    indices
}

#[cfg(test)]
mod test {
    use std::{io::Write, path::Path};

    use base64::{engine::general_purpose::STANDARD, Engine};
    use pretty_assertions::assert_eq;

    use super::*;

    fn no_lookup(_: &Path) -> Option<String> {
        None
    }

    fn serialize(message: &Message) -> String {
        String::from_utf8(formatted(message, &no_lookup, AttachmentPolicy::Lenient).unwrap())
            .unwrap()
    }

    #[test]
    fn plain_message() {
        let message = Message::builder()
            .to("a@x.com")
            .to("b@x.com")
            .sender("s@x.com")
            .subject("Hi")
            .body("Hello")
            .build();

        assert_eq!(
            serialize(&message),
            concat!(
                "To: a@x.com,b@x.com\r\n",
                "From: s@x.com\r\n",
                "Subject: Hi\r\n",
                "\r\n",
                "Hello\r\n",
                ".\r\n"
            )
        );
    }

    #[test]
    fn categories_in_order() {
        let message = Message::builder()
            .bcc("c@x.com")
            .cc("b@x.com")
            .to("a@x.com")
            .sender("s@x.com")
            .subject("Hi")
            .body("Hello")
            .build();

        assert!(serialize(&message)
            .starts_with("To: a@x.com\r\nCc: b@x.com\r\nBcc: c@x.com\r\nFrom: s@x.com\r\n"));
    }

    #[test]
    fn folds_between_addresses() {
        let address = format!("{}@example.com", "a".repeat(20));
        assert_eq!(address.len(), 32);

        let header = recipient_header("To: ", &[address.clone(), address.clone(), address.clone()]);
        assert_eq!(header, format!("To: {address},{address},\r\n {address}\r\n"));
    }

    #[test]
    fn folding_keeps_lines_short() {
        let addresses = (0..40)
            .map(|i| format!("user{i}@{}.example.org", "d".repeat(i % 13)))
            .collect::<Vec<_>>();
        let header = recipient_header("Cc: ", &addresses);

        for line in header.split("\r\n") {
            assert!(line.len() < MAX_LINE_LENGTH, "{line:?} is too long");
        }
        let unfolded = header.replace("\r\n ", "");
        assert_eq!(unfolded, format!("Cc: {}\r\n", addresses.join(",")));
    }

    #[test]
    fn long_address_sits_alone() {
        let long = format!("{}@example.com", "x".repeat(90));
        let header = recipient_header(
            "To: ",
            &["a@x.com".to_owned(), long.clone(), "b@x.com".to_owned()],
        );
        assert_eq!(header, format!("To: a@x.com,\r\n {long},\r\n b@x.com\r\n"));
    }

    #[test]
    fn folding_counts_bytes() {
        // 15 chars, 26 bytes
        let address = "éééééééééé@ü.de".to_owned();
        assert_eq!(address.len(), 26);
        let addresses = vec![address.clone(); 3];
        let header = recipient_header("To: ", &addresses);
        assert_eq!(header, format!("To: {address},{address},\r\n {address}\r\n"));
    }

    #[test]
    fn header_injection_is_refused() {
        let message = Message::new("a@x.com", "s@x.com", "Hi\r\nBcc: hidden@y.com", "Hello");
        let err = formatted(&message, &no_lookup, AttachmentPolicy::Lenient).unwrap_err();
        assert!(err.is_client());
    }

    #[test]
    fn dot_stuffing() {
        let message = Message::builder()
            .to("a@x.com")
            .sender("s@x.com")
            .subject("dots")
            .body(".\n..two\nmiddle.\n.")
            .build();

        assert!(serialize(&message).ends_with("\r\n..\r\n...two\r\nmiddle.\r\n..\r\n.\r\n"));
    }

    #[test]
    fn bare_line_feeds() {
        let mut body = String::from("\nfirst\nsecond\r\nthird\n");
        in_place_crlf_line_endings(&mut body);
        assert_eq!(body, "\r\nfirst\r\nsecond\r\nthird\r\n");
    }

    #[test]
    fn attachment() {
        let content = (0..=255u8).cycle().take(1000).collect::<Vec<_>>();
        let mut file = tempfile::Builder::new()
            .suffix(".pdf")
            .tempfile()
            .unwrap();
        file.write_all(&content).unwrap();
        let filename = file.path().file_name().unwrap().to_str().unwrap().to_owned();

        let message = Message::builder()
            .to("a@x.com")
            .sender("s@x.com")
            .subject("report")
            .body("see attached")
            .attachment(file.path())
            .build();
        let lookup = |_: &Path| Some("application/pdf".to_owned());
        let payload = String::from_utf8(
            formatted(&message, &lookup, AttachmentPolicy::Strict).unwrap(),
        )
        .unwrap();

        let head = format!(
            concat!(
                "To: a@x.com\r\n",
                "From: s@x.com\r\n",
                "Subject: report\r\n",
                "MIME-Version: 1.0\r\n",
                "Content-type: multipart/mixed; boundary=\"{b}\"\r\n",
                "\r\n",
                "--{b}\r\n",
                "\r\n",
                "see attached\r\n",
                "--{b}\r\n",
                "Content-type: application/pdf; name={f}\r\n",
                "Content-Transfer-Encoding: base64\r\n",
                "Content-Disposition: attachment; filename={f}\r\n",
                "\r\n",
            ),
            b = BOUNDARY,
            f = filename
        );
        assert!(payload.starts_with(&head), "{payload}");
        let tail = format!("\r\n--{BOUNDARY}--\r\n.\r\n");
        assert!(payload.ends_with(&tail));
        assert_eq!(payload.matches(&format!("--{BOUNDARY}")).count(), 3);

        let encoded = &payload[head.len()..payload.len() - tail.len()];
        for line in encoded.split("\r\n") {
            assert!(line.len() <= MAX_LINE_LENGTH);
        }
        assert_eq!(
            STANDARD.decode(encoded.replace("\r\n", "")).unwrap(),
            content
        );
    }

    #[test]
    fn missing_attachment() {
        let message = Message::builder()
            .to("a@x.com")
            .sender("s@x.com")
            .subject("report")
            .body("see attached")
            .attachment("/nonexistent/report.pdf")
            .build();

        let payload = serialize(&message);
        assert!(payload.contains(concat!(
            "Content-type: application/octet-stream; name=report.pdf\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "Content-Disposition: attachment; filename=report.pdf\r\n",
            "\r\n",
            "\r\n--"
        )));

        let err = formatted(&message, &no_lookup, AttachmentPolicy::Strict).unwrap_err();
        assert!(err.is_client());
    }

    #[test]
    fn two_attachments_share_delimiters() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("one.txt");
        let second = dir.path().join("two.txt");
        std::fs::write(&first, b"one").unwrap();
        std::fs::write(&second, b"two").unwrap();

        let message = Message::builder()
            .to("a@x.com")
            .sender("s@x.com")
            .subject("files")
            .body("two files")
            .attachment(&first)
            .attachment(&second)
            .build();
        let payload = serialize(&message);

        assert_eq!(payload.matches(&format!("--{BOUNDARY}\r\n")).count(), 3);
        assert_eq!(payload.matches(&format!("--{BOUNDARY}--\r\n")).count(), 1);
        assert!(payload.contains(&format!("b25l\r\n--{BOUNDARY}\r\nContent-type")));
        assert!(payload.ends_with(&format!("dHdv\r\n--{BOUNDARY}--\r\n.\r\n")));
    }
}
