//! MIME decoding shared by the IMAP and POP3 backends.

use encoding_rs::{Encoding, UTF_8};
use mailparse::{DispositionType, MailAddr, MailHeaderMap, ParsedMail};

use veriflow_core::VerifyError;

/// The parts of a raw RFC 5322 message the backends care about.
#[derive(Debug, Clone)]
pub struct DecodedMail {
    /// Raw `From` header value.
    pub from: String,
    /// Lowercased addresses from the `To` header.
    pub to: Vec<String>,
    pub subject: String,
    /// First non-attachment `text/plain` part, empty when there is none.
    pub body: String,
}

impl DecodedMail {
    pub fn is_addressed_to(&self, recipient: &str) -> bool {
        self.to.iter().any(|addr| addr.eq_ignore_ascii_case(recipient.trim()))
    }
}

pub fn decode_message(raw: &[u8]) -> Result<DecodedMail, VerifyError> {
    let parsed =
        mailparse::parse_mail(raw).map_err(|e| VerifyError::MalformedMessage(e.to_string()))?;

    let from = parsed.headers.get_first_value("From").unwrap_or_default();
    let subject = parsed.headers.get_first_value("Subject").unwrap_or_default();
    let to = parsed
        .headers
        .get_first_value("To")
        .map(|value| addresses(&value))
        .unwrap_or_default();

    let body = match first_plain_part(&parsed) {
        Some(part) => decode_body(part)?,
        None => String::new(),
    };

    Ok(DecodedMail {
        from,
        to,
        subject,
        body,
    })
}

/// Depth-first search in document order, the container itself included.
fn first_plain_part<'a>(mail: &'a ParsedMail<'a>) -> Option<&'a ParsedMail<'a>> {
    if mail.subparts.is_empty() {
        let is_attachment =
            mail.get_content_disposition().disposition == DispositionType::Attachment;
        if mail.ctype.mimetype.eq_ignore_ascii_case("text/plain") && !is_attachment {
            return Some(mail);
        }
        return None;
    }

    mail.subparts.iter().find_map(|part| first_plain_part(part))
}

fn decode_body(part: &ParsedMail<'_>) -> Result<String, VerifyError> {
    let raw = part
        .get_body_raw()
        .map_err(|e| VerifyError::MalformedMessage(e.to_string()))?;

    // mailparse reports a missing charset as us-ascii; UTF-8 is a superset.
    let charset = part.ctype.charset.trim();
    let encoding = if charset.eq_ignore_ascii_case("us-ascii") {
        UTF_8
    } else {
        Encoding::for_label(charset.as_bytes()).unwrap_or(UTF_8)
    };

    let (text, _, had_errors) = encoding.decode(&raw);
    if had_errors {
        tracing::debug!(charset, "body contained undecodable bytes, replaced");
    }
    Ok(text.into_owned())
}

/// Pull bare addresses out of an address-list header.
pub fn addresses(header_value: &str) -> Vec<String> {
    match mailparse::addrparse(header_value) {
        Ok(list) => list
            .iter()
            .flat_map(|addr| match addr {
                MailAddr::Single(info) => vec![info.addr.to_lowercase()],
                MailAddr::Group(group) => {
                    group.addrs.iter().map(|info| info.addr.to_lowercase()).collect()
                }
            })
            .collect(),
        Err(_) => vec![header_value.trim().to_lowercase()],
    }
}
