//! Utility functions for the proxy pool.

use std::path::Path;

/// Read a static proxy list from a file.
pub(crate) fn load_proxy_list(path: impl AsRef<Path>) -> std::io::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_proxy_list(&content))
}

/// Parse the text content to extract "host:port" endpoints.
///
/// Blank lines and `#` comments are skipped, a leading `scheme://` is stripped
/// since the pool applies its own protocol.
pub fn parse_proxy_list(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let endpoint = match line.split_once("://") {
                Some((_, rest)) => rest,
                None => line,
            };
            if endpoint.contains(':') {
                Some(endpoint.to_string())
            } else {
                None
            }
        })
        .collect()
}
