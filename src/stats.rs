//! Per-session summary and the `-s` statistics report.

use std::io::{self, Write};
use std::time::Instant;

use crate::error::Error;
use crate::registry::Timings;

/// What one request looked like when the session ended.
#[derive(Debug, Clone)]
pub struct RequestStats {
    pub uri: String,
    pub status: Option<String>,
    pub level: u32,
    pub timings: Timings,
}

/// Outcome of one per-origin session.
#[derive(Debug)]
pub struct Summary {
    /// When the transport (and TLS, if any) finished connecting.
    pub handshake_at: Instant,
    pub requests: Vec<RequestStats>,
    /// Requests whose stream closed, including failed ones.
    pub completed: usize,
    /// The session-level failure, when the loop did not end cleanly.
    pub error: Option<Error>,
}

impl Summary {
    pub fn total(&self) -> usize {
        self.requests.len()
    }

    pub fn all_done(&self) -> bool {
        self.completed == self.requests.len()
    }

    /// Whether this session counts toward the process failure total.
    pub fn failed(&self) -> bool {
        self.error.is_some() || !self.all_done()
    }
}

fn delta_ms(from: Option<Instant>, to: Instant) -> Option<u128> {
    from.map(|from| to.duration_since(from).as_millis())
}

/// Prints the statistics block for a finished session.
///
/// Times are milliseconds since the handshake completed, with the delta
/// from that request's own HEADERS in parentheses.
pub fn print<W: Write>(summary: &Summary, out: &mut W) -> io::Result<()> {
    writeln!(out, "***** Statistics *****")?;
    for (i, request) in summary.requests.iter().enumerate() {
        writeln!(out, "#{}: {}", i + 1, request.uri)?;
        writeln!(
            out,
            "    Status: {}",
            request.status.as_deref().unwrap_or("-")
        )?;
        writeln!(out, "    Delta (ms) from handshake(HEADERS):")?;
        let timings = &request.timings;
        if let Some(received) = timings.headers_received {
            writeln!(
                out,
                "        HEADERS: {}({})",
                delta_ms(Some(summary.handshake_at), received).unwrap_or(0),
                delta_ms(timings.headers_sent, received).unwrap_or(0),
            )?;
        }
        if let Some(closed) = timings.closed {
            writeln!(
                out,
                "        Completed: {}({})",
                delta_ms(Some(summary.handshake_at), closed).unwrap_or(0),
                delta_ms(timings.headers_sent, closed).unwrap_or(0),
            )?;
        }
        writeln!(out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn report_layout() {
        let handshake_at = Instant::now();
        let sent = handshake_at + Duration::from_millis(1);
        let received = handshake_at + Duration::from_millis(12);
        let closed = handshake_at + Duration::from_millis(30);

        let summary = Summary {
            handshake_at,
            completed: 1,
            error: None,
            requests: vec![RequestStats {
                uri: "https://example.test/".to_owned(),
                status: Some("200".to_owned()),
                level: 0,
                timings: Timings {
                    headers_sent: Some(sent),
                    headers_received: Some(received),
                    closed: Some(closed),
                },
            }],
        };

        let mut out = Vec::new();
        print(&summary, &mut out).unwrap();
        let report = String::from_utf8(out).unwrap();
        assert!(report.starts_with("***** Statistics *****\n"));
        assert!(report.contains("#1: https://example.test/"));
        assert!(report.contains("    Status: 200"));
        assert!(report.contains("        HEADERS: 12(11)"));
        assert!(report.contains("        Completed: 30(29)"));
    }

    #[test]
    fn unanswered_request_prints_no_deltas() {
        let summary = Summary {
            handshake_at: Instant::now(),
            completed: 0,
            error: None,
            requests: vec![RequestStats {
                uri: "https://example.test/gone".to_owned(),
                status: None,
                level: 0,
                timings: Timings::default(),
            }],
        };

        let mut out = Vec::new();
        print(&summary, &mut out).unwrap();
        let report = String::from_utf8(out).unwrap();
        assert!(report.contains("    Status: -"));
        assert!(!report.contains("HEADERS:"));
        assert!(!report.contains("Completed:"));
    }
}
