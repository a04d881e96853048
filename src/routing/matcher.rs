//! Route matching logic.
//!
//! # Responsibilities
//! - Match host header (exact match, case-insensitive, port ignored)
//! - Match path prefix on segment boundaries (ASCII case-insensitive)
//! - Normalize configured path patterns into plain prefixes
//! - Canonicalize request paths before anything matches on them
//!
//! # Design Decisions
//! - `/api/catalog` matches `/api/catalog` and `/api/catalog/items`, never `/api/catalogue`
//! - No regex to guarantee O(n) matching

/// Strip the port (and IPv6 brackets' trailing port) and lowercase a host.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let without_port = if let Some(rest) = host.strip_prefix('[') {
        match rest.find(']') {
            Some(end) => &host[..end + 2],
            None => host,
        }
    } else {
        host.split(':').next().unwrap_or(host)
    };
    without_port.to_ascii_lowercase()
}

/// Turn a configured path pattern into a prefix.
///
/// Accepts `/api/catalog/{**catch-all}`, `/api/catalog/*`, `/api/catalog/`
/// and `/api/catalog`, all of which normalize to `/api/catalog`.
pub fn normalize_path_pattern(pattern: &str) -> Result<String, String> {
    let pattern = pattern.trim();
    if !pattern.starts_with('/') {
        return Err(format!("path pattern '{}' must start with '/'", pattern));
    }

    let mut prefix = pattern;
    if let Some(idx) = prefix.rfind('/') {
        let last = &prefix[idx + 1..];
        if last == "*" || (last.starts_with("{**") && last.ends_with('}')) {
            prefix = &prefix[..idx];
        }
    }
    let prefix = prefix.trim_end_matches('/');

    if prefix.contains(&['*', '{', '}', '?', '#'][..]) {
        return Err(format!(
            "path pattern '{}' may only end with a catch-all segment",
            pattern
        ));
    }

    if prefix.is_empty() {
        Ok("/".to_string())
    } else {
        Ok(prefix.to_string())
    }
}

/// Canonical form of a request path.
///
/// Percent-encoded unreserved characters are decoded, empty and `.`
/// segments are dropped and `..` removes the previous segment. A `..`
/// with nothing left to remove is an error. Other escapes (`%2F` among
/// them) are kept as sent.
pub fn canonicalize_path(raw: &str) -> Result<String, String> {
    let decoded = decode_unreserved(raw);
    let mut segments: Vec<&str> = Vec::new();
    let mut trailing_slash = false;

    for segment in decoded.split('/') {
        trailing_slash = false;
        match segment {
            "" | "." => trailing_slash = true,
            ".." => {
                if segments.pop().is_none() {
                    return Err(format!("path '{}' escapes the root", raw));
                }
                trailing_slash = true;
            }
            s => segments.push(s),
        }
    }

    let mut path = String::with_capacity(decoded.len());
    for segment in &segments {
        path.push('/');
        path.push_str(segment);
    }
    if path.is_empty() || trailing_slash {
        path.push('/');
    }
    Ok(path)
}

fn decode_unreserved(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = String::with_capacity(raw.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Some(byte) = hex_pair(bytes[i + 1], bytes[i + 2]) {
                if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
                    out.push(char::from(byte));
                    i += 3;
                    continue;
                }
            }
        }
        // Only ASCII bytes are examined, so `i` stays on a char boundary.
        let ch = raw[i..].chars().next().unwrap_or_default();
        out.push(ch);
        i += ch.len_utf8().max(1);
    }
    out
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hi = char::from(hi).to_digit(16)?;
    let lo = char::from(lo).to_digit(16)?;
    u8::try_from(hi * 16 + lo).ok()
}

/// Matches the Host header.
#[derive(Debug, Clone)]
pub struct HostMatcher {
    expected_host: String,
}

impl HostMatcher {
    /// The host is normalized to lowercase without port.
    pub fn new(host: &str) -> Self {
        Self {
            expected_host: normalize_host(host),
        }
    }

    /// `host` is expected to already be normalized.
    pub fn matches(&self, host: Option<&str>) -> bool {
        host.map(|h| h == self.expected_host).unwrap_or(false)
    }

    pub fn host(&self) -> &str {
        &self.expected_host
    }
}

/// Matches the request path prefix on segment boundaries.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    /// `prefix` must come from [`normalize_path_pattern`].
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        if self.prefix == "/" {
            return true;
        }
        let len = self.prefix.len();
        if path.len() < len || !path.is_char_boundary(len) {
            return false;
        }
        if !path[..len].eq_ignore_ascii_case(&self.prefix) {
            return false;
        }
        path.len() == len || path.as_bytes()[len] == b'/'
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Specificity used to rank competing rules.
    pub fn len(&self) -> usize {
        if self.prefix == "/" {
            0
        } else {
            self.prefix.len()
        }
    }
}
