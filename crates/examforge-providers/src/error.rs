//! Provider error helpers.
//!
//! The error type itself lives in `examforge-core` so the engine can
//! downcast it; this module maps transport failures onto it.

pub use examforge_core::error::ProviderError;

/// Classify a `reqwest` send/read failure.
pub(crate) fn transport_error(err: reqwest::Error, base_url: &str, timeout_secs: u64) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(timeout_secs)
    } else if err.is_connect() {
        ProviderError::BackendUnavailable(format!("not reachable at {base_url}: {err}"))
    } else if err.is_body() || err.is_decode() {
        ProviderError::StreamInterrupted(err.to_string())
    } else {
        ProviderError::BackendUnavailable(err.to_string())
    }
}

/// Seconds from a `retry-after` header, as milliseconds.
pub(crate) fn retry_after_ms(response: &reqwest::Response, default_secs: u64) -> u64 {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default_secs)
        * 1000
}

/// Splits a byte stream into complete lines.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Add bytes and return every line completed by them.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end_matches(['\n', '\r']);
            if !text.is_empty() {
                lines.push(text.to_string());
            }
        }
        lines
    }

    /// Whatever is left after the stream ends.
    pub(crate) fn finish(self) -> Option<String> {
        let text = String::from_utf8_lossy(&self.pending).trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_split_across_chunks() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"{\"a\":").is_empty());
        assert_eq!(buffer.push(b"1}\n{\"b\"\r\n\n"), vec!["{\"a\":1}", "{\"b\""]);
        assert!(buffer.push(b"tail").is_empty());
        assert_eq!(buffer.finish().as_deref(), Some("tail"));
    }
}
