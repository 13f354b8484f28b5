//! Utility functions for the proxy pool.

use std::collections::HashSet;

/// Parse a proxy list separated by commas or newlines.
///
/// Entries are trimmed; blanks and `#` comments are skipped; duplicates keep
/// their first position.
pub(crate) fn parse_proxy_list(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    content
        .split([',', '\n'])
        .map(str::trim)
        .filter(|entry| !entry.is_empty() && !entry.starts_with('#'))
        .filter(|entry| seen.insert(*entry))
        .map(str::to_string)
        .collect()
}

/// Drop repeated identifiers, keeping the first occurrence.
pub(crate) fn dedup_in_order(proxies: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    proxies
        .into_iter()
        .filter(|proxy| seen.insert(proxy.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_trims_and_dedups() {
        let parsed =
            parse_proxy_list(" http://a:1 , socks5://b:2,,http://a:1\n# disabled\nhttp://c:3\r\n");
        assert_eq!(parsed, vec!["http://a:1", "socks5://b:2", "http://c:3"]);
    }

    #[test]
    fn empty_input_is_empty_list() {
        assert!(parse_proxy_list("").is_empty());
        assert!(parse_proxy_list(" , ,").is_empty());
    }

    #[test]
    fn dedup_keeps_first_position() {
        let proxies = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        assert_eq!(dedup_in_order(proxies), vec!["b", "a"]);
    }
}
