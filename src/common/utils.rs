//! Utility functions for chunkmesh

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::time::{SystemTime, UNIX_EPOCH};

/// Percent-encoding set for stored file names (includes /, %, and control chars)
const NAME_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b'/')
    .add(b'\\')
    .add(b'%')
    .add(b' ')
    .add(b'?')
    .add(b'#')
    .add(b'&');

/// Encode an original file name so it is safe as a single path component
pub fn encode_name(name: &str) -> String {
    let encoded = utf8_percent_encode(name, NAME_ENCODE_SET).to_string();
    match encoded.as_str() {
        "" => "unnamed".to_string(),
        "." | ".." => encoded.replace('.', "%2E"),
        _ => encoded,
    }
}

/// Reject names that would escape their storage directory
pub fn validate_name(name: &str) -> crate::Result<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(crate::Error::InvalidRequest(format!(
            "invalid file name: {:?}",
            name
        )));
    }
    if name.contains('/') || name.contains('\\') || name.chars().any(|c| c.is_control()) {
        return Err(crate::Error::InvalidRequest(format!(
            "file name contains invalid characters: {:?}",
            name
        )));
    }
    Ok(())
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

/// Get current Unix timestamp (milliseconds)
pub fn timestamp_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Unique transient name for an incoming upload: `<millis>__<encoded-name>`
pub fn unique_name(original: &str) -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let counter = COUNTER.fetch_add(1, Ordering::SeqCst);
    format!(
        "{}{:04}__{}",
        timestamp_now_millis(),
        counter % 10_000,
        encode_name(original)
    )
}

/// Retry with exponential backoff
pub async fn retry_with_backoff<F, Fut, T>(
    mut f: F,
    max_retries: usize,
    initial_delay: std::time::Duration,
) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = crate::Result<T>>,
{
    let mut delay = initial_delay;

    for attempt in 0..max_retries {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt < max_retries - 1 => {
                tracing::warn!(
                    "Retry attempt {} failed: {}, retrying in {:?}",
                    attempt + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }

    Err(crate::Error::Internal("Max retries exceeded".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_encode_name() {
        assert_eq!(encode_name("report.pdf"), "report.pdf");
        assert!(!encode_name("../etc/passwd").contains('/'));
        assert_eq!(encode_name(""), "unnamed");
        assert!(validate_name(&encode_name("..")).is_ok());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("123__a.txt.part1").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
    }

    #[test]
    fn test_unique_name() {
        let a = unique_name("photo.jpg");
        let b = unique_name("photo.jpg");
        assert_ne!(a, b);
        assert!(a.ends_with("__photo.jpg"));
    }

    #[tokio::test]
    async fn test_retry_stops_on_fatal_error() {
        let attempts = AtomicUsize::new(0);
        let res: crate::Result<()> = retry_with_backoff(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(crate::Error::InvalidNodeId("x".into())) }
            },
            3,
            std::time::Duration::from_millis(1),
        )
        .await;
        assert!(res.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_recovers() {
        let attempts = AtomicUsize::new(0);
        let res = retry_with_backoff(
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(crate::Error::NoCoordinator("file".into()))
                    } else {
                        Ok(n)
                    }
                }
            },
            5,
            std::time::Duration::from_millis(1),
        )
        .await;
        assert_eq!(res.unwrap(), 2);
    }
}
