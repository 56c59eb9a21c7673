//! Path and tracker name helpers.

use url::{Host, Url};

const NO_TRACKER_HOST: &str = "DHT";

/// Normalize a user supplied relative path before handing it to the engine.
///
/// Backslashes become `/`, segments are trimmed, and empty or dot-only
/// segments are dropped. Folders get a trailing `/`.
pub(crate) fn sanitize_filepath(path: &str, folder: bool) -> String {
    let cleaned = path
        .replace('\\', "/")
        .split('/')
        .map(clean_segment)
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    if folder { cleaned + "/" } else { cleaned }
}

fn clean_segment(segment: &str) -> &str {
    let trimmed = segment.trim();
    if trimmed.chars().all(|character| character == '.') {
        ""
    } else {
        trimmed
    }
}

/// Short display host for a tracker URL.
pub(crate) fn tracker_host(tracker: &str) -> String {
    let normalized = tracker
        .strip_prefix("udp://")
        .map_or_else(|| tracker.to_string(), |rest| format!("http://{rest}"));
    let Ok(url) = Url::parse(&normalized) else {
        return NO_TRACKER_HOST.to_string();
    };
    match url.host() {
        None => NO_TRACKER_HOST.to_string(),
        Some(Host::Ipv4(address)) => address.to_string(),
        Some(Host::Ipv6(address)) => address.to_string(),
        Some(Host::Domain(domain)) => registrable_domain(domain),
    }
}

fn registrable_domain(domain: &str) -> String {
    let parts: Vec<&str> = domain.split('.').collect();
    let count = parts.len();
    if count <= 2 {
        return domain.to_string();
    }
    let second_level = matches!(parts[count - 2], "co" | "com" | "net" | "org");
    let keep = if second_level || parts[count - 1] == "uk" {
        3
    } else {
        2
    };
    parts[count - keep..].join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_padding_and_dot_segments() {
        assert_eq!(sanitize_filepath(" a \\ b /c.txt", false), "a/b/c.txt");
        assert_eq!(sanitize_filepath("a//../b/./c", false), "a/b/c");
        assert_eq!(sanitize_filepath("  file.mkv ", false), "file.mkv");
        assert_eq!(sanitize_filepath("...", false), "");
        assert_eq!(sanitize_filepath("new\\folder", true), "new/folder/");
    }

    #[test]
    fn tracker_host_keeps_registrable_domain() {
        assert_eq!(
            tracker_host("udp://tracker.openbittorrent.com:80/announce"),
            "openbittorrent.com"
        );
        assert_eq!(tracker_host("http://a.b.example.org/ann"), "b.example.org");
        assert_eq!(tracker_host("http://tracker.site.co.uk/ann"), "site.co.uk");
        assert_eq!(tracker_host("https://x.y.bt.net/announce"), "y.bt.net");
        assert_eq!(tracker_host("http://t.example.de/announce"), "example.de");
        assert_eq!(tracker_host("http://example.de/announce"), "example.de");
    }

    #[test]
    fn tracker_host_returns_ip_literals_and_dht_fallback() {
        assert_eq!(tracker_host("udp://10.0.0.7:6969/announce"), "10.0.0.7");
        assert_eq!(tracker_host("not a url"), NO_TRACKER_HOST);
    }
}
