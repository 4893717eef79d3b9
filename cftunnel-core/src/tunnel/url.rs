//! Public URL extraction and log reading

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

static QUICK_TUNNEL_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://[A-Za-z0-9-]+\.trycloudflare\.com").expect("static regex is valid")
});

/// Last quick-tunnel URL announced in `log_path`.
///
/// cloudflared prints the URL inside a box like
/// `INF |  https://random-words.trycloudflare.com  |`. The whole file is
/// scanned on every call and a missing file reads as "no URL yet".
pub fn extract_latest(log_path: &Path) -> Option<String> {
    extract_since(log_path, 0)
}

/// Like [`extract_latest`], ignoring the first `offset` bytes of the file.
///
/// An offset past the end means the log was truncated, so the whole file
/// is scanned instead.
pub fn extract_since(log_path: &Path, offset: u64) -> Option<String> {
    let bytes = std::fs::read(log_path).ok()?;
    let start = usize::try_from(offset)
        .ok()
        .filter(|start| *start <= bytes.len())
        .unwrap_or(0);
    let content = String::from_utf8_lossy(&bytes[start..]);
    find_last_url(&content)
}

/// Last quick-tunnel URL in a chunk of text
pub fn find_last_url(text: &str) -> Option<String> {
    QUICK_TUNNEL_URL
        .find_iter(text)
        .last()
        .map(|m| m.as_str().to_string())
}

/// Last `lines` lines of a log, joined with newlines
pub fn tail_lines(log_path: &Path, lines: usize) -> std::io::Result<String> {
    let bytes = std::fs::read(log_path)?;
    let content = String::from_utf8_lossy(&bytes);
    let all: Vec<&str> = content.lines().collect();
    let start = all.len().saturating_sub(lines);
    Ok(all[start..].join("\n"))
}
