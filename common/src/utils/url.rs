//! Endpoint URL normalization.

use std::fmt;
use std::str::FromStr;

/// URL scheme used when the caller did not give one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn prefix(&self) -> &'static str {
        match self {
            Scheme::Http => "http://",
            Scheme::Https => "https://",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Http => f.write_str("http"),
            Scheme::Https => f.write_str("https"),
        }
    }
}

impl FromStr for Scheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(format!("unsupported scheme {other:?}")),
        }
    }
}

/// Normalizes a user supplied endpoint.
///
/// Strips a leading `http://` or `https://` (case-insensitive), remembering
/// which one, falls back to `default_scheme` otherwise, removes trailing
/// slashes and puts the scheme back in front.
pub fn normalize_endpoint(raw: &str, default_scheme: Scheme) -> String {
    let trimmed = raw.trim();
    let (scheme, rest) = split_scheme(trimmed).unwrap_or((default_scheme, trimmed));
    format!("{}{}", scheme.prefix(), rest.trim_end_matches('/'))
}

fn split_scheme(url: &str) -> Option<(Scheme, &str)> {
    for scheme in [Scheme::Https, Scheme::Http] {
        let prefix = scheme.prefix();
        if let Some(head) = url.get(..prefix.len()) {
            if head.eq_ignore_ascii_case(prefix) {
                return Some((scheme, &url[prefix.len()..]));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_explicit_scheme() {
        assert_eq!(
            normalize_endpoint("http://grafana.local:3000/", Scheme::Https),
            "http://grafana.local:3000"
        );
        assert_eq!(
            normalize_endpoint("HTTPS://grafana.example.com", Scheme::Http),
            "https://grafana.example.com"
        );
    }

    #[test]
    fn test_applies_default_scheme() {
        assert_eq!(
            normalize_endpoint("grafana.example.com/", Scheme::Https),
            "https://grafana.example.com"
        );
        assert_eq!(
            normalize_endpoint("  grafana.example.com/sub//  ", Scheme::Http),
            "http://grafana.example.com/sub"
        );
    }

    #[test]
    fn test_scheme_parsing() {
        assert_eq!("HTTP".parse::<Scheme>().unwrap(), Scheme::Http);
        assert!("ftp".parse::<Scheme>().is_err());
    }
}
