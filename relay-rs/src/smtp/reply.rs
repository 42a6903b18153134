//! Parsing of server replies on the client side of a dialogue
//!
//! A reply is one or more lines sharing a status code. Every line but the
//! last uses `-` after the code (`250-STARTTLS`), the last uses a space.

use crate::error::DeliveryError;
use std::fmt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    /// 2xx
    pub fn is_positive(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Whether an EHLO keyword appears at the start of any line.
    /// Keywords are compared after uppercasing.
    pub fn advertises(&self, keyword: &str) -> bool {
        self.lines.iter().any(|line| {
            line.split_whitespace()
                .next()
                .map(|word| word.to_uppercase() == keyword)
                .unwrap_or(false)
        })
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.lines.join(" / "))
    }
}

/// One parsed reply line: code, whether more lines follow, text
fn parse_line(line: &str) -> Option<(u16, bool, &str)> {
    let code = line.get(..3)?;
    if !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let code = code.parse().ok()?;

    match line.as_bytes().get(3) {
        None => Some((code, false, "")),
        Some(b'-') => Some((code, true, &line[4..])),
        Some(b' ') => Some((code, false, &line[4..])),
        Some(_) => None,
    }
}

/// Read one complete (possibly multi-line) reply.
pub async fn read_reply<R>(reader: &mut R, stage: &'static str) -> Result<Reply, DeliveryError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = Vec::new();
    let mut code = None;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Err(DeliveryError::Protocol {
                stage,
                reply: "connection closed".to_string(),
            });
        }

        let raw = String::from_utf8_lossy(&buf);
        let line = raw.trim_end_matches(['\r', '\n']);
        debug!("< {}", line);

        let (line_code, more, text) = parse_line(line).ok_or_else(|| DeliveryError::Protocol {
            stage,
            reply: line.to_string(),
        })?;

        if *code.get_or_insert(line_code) != line_code {
            return Err(DeliveryError::Protocol {
                stage,
                reply: format!("mixed reply codes: {}", line),
            });
        }

        lines.push(text.to_string());

        if !more {
            return Ok(Reply {
                code: line_code,
                lines,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_single_line_reply() {
        let mut reader = BufReader::new(&b"220 mx.example ESMTP ready\r\n"[..]);
        let reply = read_reply(&mut reader, "greeting").await.unwrap();

        assert_eq!(reply.code, 220);
        assert_eq!(reply.lines, vec!["mx.example ESMTP ready"]);
        assert!(reply.is_positive());
    }

    #[tokio::test]
    async fn test_multi_line_reply_detects_starttls() {
        let mut reader =
            BufReader::new(&b"250-mx.example\r\n250-SIZE 1000\r\n250-starttls\r\n250 HELP\r\n"[..]);
        let reply = read_reply(&mut reader, "EHLO").await.unwrap();

        assert_eq!(reply.code, 250);
        assert_eq!(reply.lines.len(), 4);
        assert!(reply.advertises("STARTTLS"));
        assert!(!reply.advertises("AUTH"));
    }

    #[tokio::test]
    async fn test_starttls_on_final_line() {
        let mut reader = BufReader::new(&b"250-mx.example\r\n250 STARTTLS\r\n"[..]);
        let reply = read_reply(&mut reader, "EHLO").await.unwrap();
        assert!(reply.advertises("STARTTLS"));
    }

    #[tokio::test]
    async fn test_bare_code_reply() {
        let mut reader = BufReader::new(&b"354\r\n"[..]);
        let reply = read_reply(&mut reader, "DATA").await.unwrap();
        assert_eq!(reply.code, 354);
        assert!(!reply.is_positive());
    }

    #[tokio::test]
    async fn test_reads_only_one_reply() {
        let mut reader = BufReader::new(&b"250 OK\r\n221 Bye\r\n"[..]);
        assert_eq!(read_reply(&mut reader, "MAIL FROM").await.unwrap().code, 250);
        assert_eq!(read_reply(&mut reader, "QUIT").await.unwrap().code, 221);
    }

    #[tokio::test]
    async fn test_malformed_reply_is_protocol_error() {
        let mut reader = BufReader::new(&b"hello there\r\n"[..]);
        let err = read_reply(&mut reader, "greeting").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Protocol { stage: "greeting", .. }));
    }

    #[tokio::test]
    async fn test_eof_is_protocol_error() {
        let mut reader = BufReader::new(&b"250-partial\r\n"[..]);
        let err = read_reply(&mut reader, "EHLO").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Protocol { stage: "EHLO", .. }));
    }
}
