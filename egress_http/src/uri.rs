// Copyright (c) 2025 Huawei Device Co., Ltd.
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! [`URI`] implementation, reduced to the absolute `http`/`https` form the
//! engine dispatches on: scheme, host, port and path-with-query.
//!
//! [`URI`]: https://httpwg.org/specs/rfc9110.html#uri

use std::fmt::{Display, Formatter};

/// The scheme component of a URI.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Scheme {
    /// `http` scheme, default port 80.
    Http,
    /// `https` scheme, default port 443.
    Https,
}

impl Scheme {
    /// Returns the scheme as a `&str`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    /// Returns the default port of the scheme.
    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

/// A parsed absolute URI.
///
/// The path always starts with `/` and carries the query when present. The
/// port is always concrete, defaulting from the scheme.
///
/// # Examples
///
/// ```
/// use egress_http::uri::{Scheme, Uri};
///
/// let uri = Uri::parse("https://example.com/a?b=1").unwrap();
/// assert_eq!(uri.scheme(), Scheme::Https);
/// assert_eq!(uri.host(), "example.com");
/// assert_eq!(uri.port(), 443);
/// assert_eq!(uri.path_and_query(), "/a?b=1");
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Uri {
    scheme: Scheme,
    host: String,
    port: u16,
    path_and_query: String,
}

/// Errors produced while parsing a URI.
#[derive(Debug, Eq, PartialEq)]
pub enum InvalidUri {
    /// The scheme is missing or not `http`/`https`.
    UnsupportedScheme,
    /// The host component is missing or malformed.
    InvalidHost,
    /// The port component is not a valid decimal port.
    InvalidPort,
    /// The path or query contains forbidden characters.
    InvalidPath,
}

impl Display for InvalidUri {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            InvalidUri::UnsupportedScheme => "unsupported or missing scheme",
            InvalidUri::InvalidHost => "invalid host",
            InvalidUri::InvalidPort => "invalid port",
            InvalidUri::InvalidPath => "invalid path",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for InvalidUri {}

impl Uri {
    /// Parses an absolute URI string.
    ///
    /// The host is lowercased, the port defaults from the scheme, the path
    /// defaults to `/`. A fragment, if present, is dropped.
    pub fn parse(s: &str) -> Result<Self, InvalidUri> {
        let rest = if let Some(rest) = s.strip_prefix("https://") {
            (Scheme::Https, rest)
        } else if let Some(rest) = s.strip_prefix("http://") {
            (Scheme::Http, rest)
        } else {
            return Err(InvalidUri::UnsupportedScheme);
        };
        let (scheme, rest) = rest;

        let (authority, path) = match rest.find(['/', '?', '#']) {
            Some(idx) if rest.as_bytes()[idx] == b'/' => rest.split_at(idx),
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };

        let (host, port) = Self::split_authority(authority, scheme)?;

        let path_and_query = match path {
            "" => "/".to_string(),
            p if p.starts_with('?') => format!("/{}", strip_fragment(p)),
            p => strip_fragment(p).to_string(),
        };
        validate_path(&path_and_query)?;

        Ok(Uri {
            scheme,
            host,
            port,
            path_and_query,
        })
    }

    fn split_authority(authority: &str, scheme: Scheme) -> Result<(String, u16), InvalidUri> {
        if authority.is_empty() || authority.contains('@') {
            return Err(InvalidUri::InvalidHost);
        }
        // IPv6 literals keep their brackets as part of the host.
        if let Some(rest) = authority.strip_prefix('[') {
            let end = rest.find(']').ok_or(InvalidUri::InvalidHost)?;
            let host = format!("[{}]", &rest[..end].to_ascii_lowercase());
            let after = &rest[end + 1..];
            let port = match after.strip_prefix(':') {
                Some(p) => p.parse::<u16>().map_err(|_| InvalidUri::InvalidPort)?,
                None if after.is_empty() => scheme.default_port(),
                None => return Err(InvalidUri::InvalidHost),
            };
            return Ok((host, port));
        }
        match authority.rsplit_once(':') {
            Some((host, port)) => {
                if host.is_empty() {
                    return Err(InvalidUri::InvalidHost);
                }
                let port = port.parse::<u16>().map_err(|_| InvalidUri::InvalidPort)?;
                Ok((host.to_ascii_lowercase(), port))
            }
            None => Ok((authority.to_ascii_lowercase(), scheme.default_port())),
        }
    }

    /// Resolves a `Location` header target against this URI.
    ///
    /// Accepts absolute URIs, scheme-relative (`//host/..`), absolute paths
    /// and relative paths.
    pub fn resolve(&self, location: &str) -> Result<Uri, InvalidUri> {
        if location.starts_with("http://") || location.starts_with("https://") {
            return Uri::parse(location);
        }
        if let Some(rest) = location.strip_prefix("//") {
            return Uri::parse(&format!("{}://{}", self.scheme.as_str(), rest));
        }
        let path = if location.starts_with('/') {
            strip_fragment(location).to_string()
        } else {
            // Relative reference: merge with the base path up to the last '/'.
            let base = self.path();
            let dir = match base.rfind('/') {
                Some(idx) => &base[..=idx],
                None => "/",
            };
            format!("{}{}", dir, strip_fragment(location))
        };
        validate_path(&path)?;
        Ok(Uri {
            scheme: self.scheme,
            host: self.host.clone(),
            port: self.port,
            path_and_query: path,
        })
    }

    /// Returns the scheme.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Returns the lowercased host. IPv6 literals keep their brackets.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the concrete port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the path with the query, starting with `/`.
    pub fn path_and_query(&self) -> &str {
        &self.path_and_query
    }

    /// Returns the path without the query.
    pub fn path(&self) -> &str {
        match self.path_and_query.find('?') {
            Some(idx) => &self.path_and_query[..idx],
            None => &self.path_and_query,
        }
    }

    /// Returns `host` or `host:port` when the port is not the scheme default.
    pub fn authority(&self) -> String {
        if self.port == self.scheme.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Whether `other` shares this URI's origin (scheme, host and port).
    pub fn same_origin(&self, other: &Uri) -> bool {
        self.scheme == other.scheme && self.host == other.host && self.port == other.port
    }
}

impl Display for Uri {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}://{}{}",
            self.scheme.as_str(),
            self.authority(),
            self.path_and_query
        )
    }
}

fn strip_fragment(s: &str) -> &str {
    match s.find('#') {
        Some(idx) => &s[..idx],
        None => s,
    }
}

fn validate_path(path: &str) -> Result<(), InvalidUri> {
    if path
        .bytes()
        .any(|b| b == b' ' || b == b'\r' || b == b'\n' || b == 0)
    {
        return Err(InvalidUri::InvalidPath);
    }
    Ok(())
}

#[cfg(test)]
mod ut_uri {
    use super::*;

    /// UT test cases for `Uri::parse`.
    ///
    /// # Brief
    /// 1. Parses URIs with and without explicit ports, paths and queries.
    /// 2. Checks scheme, host, port and path-with-query components.
    /// 3. Checks that unsupported schemes and malformed authorities fail.
    #[test]
    fn ut_uri_parse() {
        let uri = Uri::parse("https://Example.COM").unwrap();
        assert_eq!(uri.host(), "example.com");
        assert_eq!(uri.port(), 443);
        assert_eq!(uri.path_and_query(), "/");

        let uri = Uri::parse("http://a.b:8080/x/y?q=1#frag").unwrap();
        assert_eq!(uri.scheme(), Scheme::Http);
        assert_eq!(uri.port(), 8080);
        assert_eq!(uri.path_and_query(), "/x/y?q=1");
        assert_eq!(uri.path(), "/x/y");
        assert_eq!(uri.authority(), "a.b:8080");

        let uri = Uri::parse("https://[2001:DB8::1]:444/p").unwrap();
        assert_eq!(uri.host(), "[2001:db8::1]");
        assert_eq!(uri.port(), 444);

        assert_eq!(Uri::parse("ftp://x"), Err(InvalidUri::UnsupportedScheme));
        assert_eq!(Uri::parse("https://"), Err(InvalidUri::InvalidHost));
        assert_eq!(Uri::parse("https://h:x"), Err(InvalidUri::InvalidPort));
        assert_eq!(Uri::parse("https://u@h"), Err(InvalidUri::InvalidHost));
    }

    /// UT test cases for parse-serialize idempotence.
    ///
    /// # Brief
    /// 1. Parses a URI, serializes it, parses the result again.
    /// 2. Checks both parses are equal.
    #[test]
    fn ut_uri_roundtrip() {
        for s in [
            "https://example.com/a?b=1",
            "http://example.com:8080/",
            "https://h/",
            "https://[::1]:8443/path",
        ] {
            let once = Uri::parse(s).unwrap();
            let twice = Uri::parse(&once.to_string()).unwrap();
            assert_eq!(once, twice);
        }
    }

    /// UT test cases for `Uri::resolve`.
    ///
    /// # Brief
    /// 1. Resolves absolute, scheme-relative, absolute-path and relative-path
    ///    redirect targets against a base URI.
    /// 2. Checks each resolution result.
    #[test]
    fn ut_uri_resolve() {
        let base = Uri::parse("https://a.example/x/y?q=1").unwrap();

        let abs = base.resolve("https://b.example/z").unwrap();
        assert_eq!(abs.host(), "b.example");

        let scheme_rel = base.resolve("//c.example/w").unwrap();
        assert_eq!(scheme_rel.scheme(), Scheme::Https);
        assert_eq!(scheme_rel.host(), "c.example");

        let abs_path = base.resolve("/next").unwrap();
        assert_eq!(abs_path.host(), "a.example");
        assert_eq!(abs_path.path_and_query(), "/next");

        let rel = base.resolve("sibling?n=2").unwrap();
        assert_eq!(rel.path_and_query(), "/x/sibling?n=2");
    }

    /// UT test cases for `Uri::same_origin`.
    ///
    /// # Brief
    /// 1. Compares URIs that differ in scheme, host, port or nothing.
    #[test]
    fn ut_uri_same_origin() {
        let a = Uri::parse("https://h/p1").unwrap();
        assert!(a.same_origin(&Uri::parse("https://h/p2").unwrap()));
        assert!(!a.same_origin(&Uri::parse("http://h/p1").unwrap()));
        assert!(!a.same_origin(&Uri::parse("https://h2/p1").unwrap()));
        assert!(!a.same_origin(&Uri::parse("https://h:444/p1").unwrap()));
    }
}
