// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Parsing of inbound request e-mails.

use mailparse::{MailAddr, MailHeaderMap, ParsedMail};
use thiserror::Error;

/// Errors from reading an inbound e-mail.
#[derive(Debug, Error)]
pub enum EmailError {
    /// The message is not valid RFC 822.
    #[error("Malformed e-mail: {0}")]
    Malformed(String),

    /// The message has no usable From header.
    #[error("E-mail has no sender address")]
    MissingSender,
}

/// The parts of an e-mail the intake cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEmail {
    /// Bare sender address.
    pub from: String,
    /// Subject, empty if absent.
    pub subject: String,
    /// First `text/plain` body, empty if none.
    pub body: String,
}

/// Parse a raw message.
pub fn parse_email(raw: &[u8]) -> Result<ParsedEmail, EmailError> {
    let mail = mailparse::parse_mail(raw).map_err(|e| EmailError::Malformed(e.to_string()))?;

    let from = mail
        .headers
        .get_first_value("From")
        .and_then(|value| extract_address(&value))
        .ok_or(EmailError::MissingSender)?;
    let subject = mail.headers.get_first_value("Subject").unwrap_or_default();
    let body = plain_text_body(&mail)
        .map_err(|e| EmailError::Malformed(e.to_string()))?
        .unwrap_or_default();

    Ok(ParsedEmail {
        from,
        subject,
        body,
    })
}

/// Bare address from a From header value.
///
/// `Jane Doe <jane@example.org>` yields `jane@example.org`; a bare address is
/// returned trimmed.
pub fn extract_address(value: &str) -> Option<String> {
    if let Ok(list) = mailparse::addrparse(value) {
        let first = list.iter().find_map(|addr| match addr {
            MailAddr::Single(info) => Some(info.addr.clone()),
            MailAddr::Group(group) => group.addrs.first().map(|info| info.addr.clone()),
        });
        if let Some(addr) = first.filter(|a| !a.trim().is_empty()) {
            return Some(addr.trim().to_string());
        }
    }

    let addr = match (value.find('<'), value.rfind('>')) {
        (Some(start), Some(end)) if start < end => &value[start + 1..end],
        _ => value,
    };
    let addr = addr.trim();
    (!addr.is_empty()).then(|| addr.to_string())
}

fn plain_text_body(mail: &ParsedMail<'_>) -> Result<Option<String>, mailparse::MailParseError> {
    if mail.subparts.is_empty() {
        let mimetype = mail.ctype.mimetype.to_ascii_lowercase();
        if mimetype == "text/plain" || mimetype.is_empty() {
            return mail.get_body().map(Some);
        }
        return Ok(None);
    }
    for part in &mail.subparts {
        if let Some(body) = plain_text_body(part)? {
            return Ok(Some(body));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_address() {
        assert_eq!(
            extract_address("Jane Doe <jane@example.org>").as_deref(),
            Some("jane@example.org")
        );
        assert_eq!(
            extract_address("  jane@example.org ").as_deref(),
            Some("jane@example.org")
        );
        assert_eq!(extract_address("   "), None);
    }

    #[test]
    fn test_parse_simple_message() {
        let raw = b"From: Jane Doe <jane@example.org>\r\n\
                    Subject: latitude=54.1;longitude=13.2\r\n\
                    \r\n\
                    radius=500\r\nduration=6\r\n";
        let parsed = parse_email(raw).unwrap();
        assert_eq!(parsed.from, "jane@example.org");
        assert_eq!(parsed.subject, "latitude=54.1;longitude=13.2");
        assert!(parsed.body.contains("radius=500"));
        assert!(parsed.body.contains("duration=6"));
    }

    #[test]
    fn test_parse_multipart_prefers_plain_text() {
        let raw = b"From: jane@example.org\r\n\
                    Subject: drift\r\n\
                    MIME-Version: 1.0\r\n\
                    Content-Type: multipart/alternative; boundary=\"XX\"\r\n\
                    \r\n\
                    --XX\r\n\
                    Content-Type: text/html\r\n\
                    \r\n\
                    <p>latitude=1</p>\r\n\
                    --XX\r\n\
                    Content-Type: text/plain; charset=utf-8\r\n\
                    \r\n\
                    latitude=54.1\r\n\
                    --XX--\r\n";
        let parsed = parse_email(raw).unwrap();
        assert_eq!(parsed.body.trim(), "latitude=54.1");
    }

    #[test]
    fn test_missing_sender() {
        let raw = b"Subject: hello\r\n\r\nbody\r\n";
        assert!(matches!(parse_email(raw), Err(EmailError::MissingSender)));
    }
}
