use std::sync::OnceLock;

use regex::Regex;

const TOKEN_USER: &str = "x-access-token";

/// Embeds `token` into an HTTPS remote URL. Other URL forms are returned unchanged.
pub fn authenticated_url(url: &str, token: Option<&str>) -> String {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return url.to_string();
    };

    for scheme in ["https://", "http://"] {
        if let Some(rest) = url.strip_prefix(scheme) {
            // Drop credentials already present in the URL.
            let host_and_path = match rest.split_once('@') {
                Some((userinfo, tail)) if !userinfo.contains('/') => tail,
                _ => rest,
            };
            return format!("{}{}:{}@{}", scheme, TOKEN_USER, token, host_and_path);
        }
    }

    url.to_string()
}

fn credentials_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(https?://)[^/@\s]+@").expect("Invalid credentials regex pattern")
    })
}

/// Masks URL credentials in text that may be logged or shown to callers.
pub fn redact(text: &str) -> String {
    credentials_pattern()
        .replace_all(text, "${1}***@")
        .into_owned()
}
