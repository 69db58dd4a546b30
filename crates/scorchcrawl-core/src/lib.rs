pub mod config;
pub mod format;
pub mod identity;
pub mod json;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("engine request failed: {0}")]
    Engine(String),
    #[error("agent session failed: {0}")]
    Agent(String),
    #[error("job not found: {0}")]
    JobNotFound(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("not supported: {0}")]
    NotSupported(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Epoch milliseconds from the wall clock. Never panics; a clock before
/// the epoch reads as zero.
pub fn now_epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_else(|_| std::time::Duration::from_secs(0))
        .as_millis() as u64
}

/// Truncate `s` to at most `max_chars` characters (not bytes).
///
/// Returns (text, char_count, truncated).
pub fn truncate_to_chars(s: &str, max_chars: usize) -> (String, usize, bool) {
    let mut out = String::new();
    let mut n = 0usize;
    for ch in s.chars() {
        if n >= max_chars {
            return (out, n, true);
        }
        out.push(ch);
        n += 1;
    }
    (out, n, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_counts_chars_not_bytes() {
        let (t, n, clipped) = truncate_to_chars("héllo", 3);
        assert_eq!(t, "hél");
        assert_eq!(n, 3);
        assert!(clipped);

        let (t, n, clipped) = truncate_to_chars("ok", 10);
        assert_eq!(t, "ok");
        assert_eq!(n, 2);
        assert!(!clipped);
    }
}
