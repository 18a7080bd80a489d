//! Traffic-quality checks applied before billable work.

/// User-agent fragments that mark automated traffic.
const BOT_PATTERNS: &[&str] = &[
    "bot",
    "crawler",
    "spider",
    "headless",
    "lighthouse",
    "curl/",
    "python-requests",
];

pub fn is_bot_user_agent(user_agent: Option<&str>) -> bool {
    let Some(user_agent) = user_agent else {
        return false;
    };
    let lowered = user_agent.to_ascii_lowercase();
    BOT_PATTERNS.iter().any(|pattern| lowered.contains(pattern))
}

/// Host part of a referrer URL, lowercased.
fn referrer_host(referrer: &str) -> Option<String> {
    let rest = referrer
        .split_once("://")
        .map_or(referrer, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next()?;
    let host_port = authority.rsplit('@').next()?;
    let host = host_port.split(':').next()?.trim();
    (!host.is_empty()).then(|| host.to_ascii_lowercase())
}

/// Whether `referrer` is a blocked host or a subdomain of one.
pub fn is_blocked_referrer(referrer: Option<&str>, blocklist: &[String]) -> bool {
    let Some(host) = referrer.and_then(referrer_host) else {
        return false;
    };
    blocklist.iter().any(|blocked| {
        let blocked = blocked.trim().to_ascii_lowercase();
        !blocked.is_empty()
            && (host == blocked
                || host
                    .strip_suffix(blocked.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.')))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bot_user_agents() {
        assert!(is_bot_user_agent(Some("Googlebot/2.1")));
        assert!(is_bot_user_agent(Some("Mozilla/5.0 HeadlessChrome/120")));
        assert!(is_bot_user_agent(Some("curl/8.4.0")));
        assert!(!is_bot_user_agent(Some(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0) Mobile/15E148"
        )));
        assert!(!is_bot_user_agent(None));
    }

    #[test]
    fn test_blocked_referrer_matches_host_and_subdomains() {
        let blocklist = vec!["spam.example".to_string()];
        assert!(is_blocked_referrer(Some("https://spam.example/landing"), &blocklist));
        assert!(is_blocked_referrer(Some("http://www.spam.example:8080/"), &blocklist));
        assert!(!is_blocked_referrer(Some("https://notspam.example/"), &blocklist));
        assert!(!is_blocked_referrer(Some("https://clinic.example/"), &blocklist));
        assert!(!is_blocked_referrer(None, &blocklist));
    }
}
