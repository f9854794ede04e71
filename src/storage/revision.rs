use xxhash_rust::xxh3::xxh3_128;

use crate::error::{AppError, AppResult};

/// Split `N-hash` into its generation and hash.
pub fn parse_rev(rev: &str) -> AppResult<(u64, &str)> {
    let (pos, hash) = rev.split_once('-').ok_or_else(|| AppError::bad_request(format!("invalid rev format: {}", rev)))?;
    let pos = pos.parse::<u64>().map_err(|_| AppError::bad_request(format!("invalid rev format: {}", rev)))?;
    if hash.is_empty() { return Err(AppError::bad_request(format!("invalid rev format: {}", rev))); }
    Ok((pos, hash))
}

/// Next revision id; deterministic in the previous rev and the new content.
pub fn next_rev(prev: Option<&str>, content: &[u8]) -> String {
    let pos = prev.and_then(|r| parse_rev(r).ok()).map(|(p, _)| p).unwrap_or(0) + 1;
    let mut buf = Vec::with_capacity(content.len() + 40);
    buf.extend_from_slice(prev.unwrap_or("").as_bytes());
    buf.push(0);
    buf.extend_from_slice(content);
    format!("{}-{:032x}", pos, xxh3_128(&buf))
}

pub fn digest(data: &[u8]) -> String { format!("xxh3-{:032x}", xxh3_128(data)) }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generations_increase() {
        let r1 = next_rev(None, b"{}");
        assert!(r1.starts_with("1-"));
        let r2 = next_rev(Some(&r1), b"{}");
        assert!(r2.starts_with("2-"));
        assert_ne!(r1[2..], r2[2..]);
        assert_eq!(parse_rev(&r2).unwrap().0, 2);
    }

    #[test]
    fn malformed_revs_are_bad_requests() {
        assert!(parse_rev("abc").is_err());
        assert!(parse_rev("x-abc").is_err());
        assert!(parse_rev("3-").is_err());
    }
}
