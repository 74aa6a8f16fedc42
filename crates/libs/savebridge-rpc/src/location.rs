use crate::error::RpcError;
use serde::{Deserialize, Serialize};

/// `scheme://host[:port]` of a context.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Origin(String);

impl Origin {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An absolute URL naming where a context is loaded from.
///
/// Scheme and host are lowercased, default ports are dropped, dot segments
/// are removed and an empty path becomes `/`, so two spellings of the same
/// document compare equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Location {
    href: String,
    authority_end: usize,
    origin: Origin,
}

impl Location {
    pub fn parse(raw: &str) -> Result<Self, RpcError> {
        let raw = raw.trim();
        let Some((scheme, rest)) = raw.split_once("://") else {
            return Err(RpcError::Validation(format!("not an absolute url: {raw}")));
        };
        let valid_scheme = scheme.chars().all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c));
        if scheme.is_empty() || !valid_scheme {
            return Err(RpcError::Validation(format!("invalid url scheme: {raw}")));
        }
        let scheme = scheme.to_ascii_lowercase();
        let authority_len = rest.find(['/', '?', '#']).unwrap_or(rest.len());
        let (authority, tail) = rest.split_at(authority_len);
        let (userinfo, host_port) = match authority.rsplit_once('@') {
            Some((userinfo, host_port)) => (Some(userinfo), host_port),
            None => (None, authority),
        };
        let host_port = canonical_host_port(&scheme, host_port)
            .ok_or_else(|| RpcError::Validation(format!("url has no valid host: {raw}")))?;

        let origin = Origin(format!("{scheme}://{host_port}"));
        let mut href = format!("{scheme}://");
        if let Some(userinfo) = userinfo {
            href.push_str(userinfo);
            href.push('@');
        }
        href.push_str(&host_port);
        let authority_end = href.len();

        let (path, suffix) = tail.split_at(tail.find(['?', '#']).unwrap_or(tail.len()));
        href.push_str(&remove_dot_segments(path));
        href.push_str(suffix);
        Ok(Self { href, authority_end, origin })
    }

    pub fn as_str(&self) -> &str {
        &self.href
    }

    /// Scheme, host and port; userinfo is never part of the origin.
    pub fn origin(&self) -> Origin {
        self.origin.clone()
    }

    /// The location with its fragment and query removed.
    pub fn stripped(&self) -> Location {
        let end = self.href.find(['?', '#']).unwrap_or(self.href.len());
        Self {
            href: self.href[..end].to_string(),
            authority_end: self.authority_end,
            origin: self.origin.clone(),
        }
    }

    /// Resolves `reference` the way a document resolves a relative link.
    pub fn resolve(&self, reference: &str) -> Result<Location, RpcError> {
        if reference.contains("://") {
            return Self::parse(reference);
        }
        let base = self.stripped();
        if reference.starts_with('/') {
            return Self::parse(&format!("{}{reference}", &base.href[..base.authority_end]));
        }
        let directory_end = base.href[base.authority_end..]
            .rfind('/')
            .map_or(base.href.len(), |slash| base.authority_end + slash + 1);
        Self::parse(&format!("{}{reference}", &base.href[..directory_end]))
    }

    /// First value of `name` in the query string, percent-decoded.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let end = self.href.find('#').unwrap_or(self.href.len());
        let start = self.href[..end].find('?')? + 1;
        self.href[start..end].split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_uri_component(key) == name).then(|| decode_uri_component(value))
        })
    }
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" | "ws" => Some(80),
        "https" | "wss" => Some(443),
        "ftp" => Some(21),
        _ => None,
    }
}

/// Lowercased `host[:port]` with the scheme's default port elided.
fn canonical_host_port(scheme: &str, raw: &str) -> Option<String> {
    let raw = raw.to_ascii_lowercase();
    let (host, port) = match raw.rsplit_once(':') {
        Some((host, port)) if port.bytes().all(|b| b.is_ascii_digit()) => (host, port),
        _ => (raw.as_str(), ""),
    };
    if host.is_empty() {
        return None;
    }
    if port.is_empty() {
        return Some(host.to_string());
    }
    let port: u16 = port.parse().ok()?;
    if default_port(scheme) == Some(port) {
        Some(host.to_string())
    } else {
        Some(format!("{host}:{port}"))
    }
}

/// Removes `.` and `..` segments from an absolute path.
fn remove_dot_segments(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').skip(1).collect();
    let last = segments.len().saturating_sub(1);
    let mut output: Vec<&str> = Vec::with_capacity(segments.len());
    for (index, segment) in segments.into_iter().enumerate() {
        match segment {
            "." => {}
            ".." => {
                output.pop();
            }
            other => {
                output.push(other);
                continue;
            }
        }
        if index == last {
            output.push("");
        }
    }
    format!("/{}", output.join("/"))
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.href)
    }
}

impl TryFrom<String> for Location {
    type Error = RpcError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<Location> for String {
    fn from(location: Location) -> Self {
        location.href
    }
}

/// Percent-encodes everything outside `A-Z a-z 0-9 - _ . ! ~ * ' ( )`.
pub fn encode_uri_component(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || b"-_.!~*'()".contains(&byte) {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

/// Inverse of [`encode_uri_component`]; malformed escapes are kept verbatim.
pub fn decode_uri_component(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%' && index + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[index + 1..index + 3]).ok();
            if let Some(value) = hex.and_then(|hex| u8::from_str_radix(hex, 16).ok()) {
                decoded.push(value);
                index += 3;
                continue;
            }
        }
        decoded.push(bytes[index]);
        index += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}
