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

//! [Pseudo-Header Fields] implementation of the HTTP/2 protocol.
//!
//! [Pseudo-Header Fields]: https://httpwg.org/specs/rfc9113.html#PseudoHeaderFields
//!
//! Pseudo-header fields carry the target and result of a message in HTTP/2.
//! They appear before regular fields in a header block and never appear in
//! the application-visible header map.

/// The pseudo-header fields of a request or response header block.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PseudoHeaders {
    authority: Option<String>,
    method: Option<String>,
    path: Option<String>,
    scheme: Option<String>,
    status: Option<String>,
}

impl PseudoHeaders {
    /// Creates an empty `PseudoHeaders`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the `:authority` field.
    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    /// Sets the `:authority` field.
    pub fn set_authority(&mut self, authority: Option<String>) {
        self.authority = authority;
    }

    /// Returns the `:method` field.
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// Sets the `:method` field.
    pub fn set_method(&mut self, method: Option<String>) {
        self.method = method;
    }

    /// Returns the `:path` field.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Sets the `:path` field.
    pub fn set_path(&mut self, path: Option<String>) {
        self.path = path;
    }

    /// Returns the `:scheme` field.
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    /// Sets the `:scheme` field.
    pub fn set_scheme(&mut self, scheme: Option<String>) {
        self.scheme = scheme;
    }

    /// Returns the `:status` field.
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// Sets the `:status` field.
    pub fn set_status(&mut self, status: Option<String>) {
        self.status = status;
    }

    /// Sets a pseudo-header by its wire name. Returns `false` for an unknown
    /// or response-invalid name, which callers treat as a protocol error.
    pub fn set_by_name(&mut self, name: &str, value: String) -> bool {
        match name {
            ":authority" => self.authority = Some(value),
            ":method" => self.method = Some(value),
            ":path" => self.path = Some(value),
            ":scheme" => self.scheme = Some(value),
            ":status" => self.status = Some(value),
            _ => return false,
        }
        true
    }

    /// Iterates over the present fields in the canonical request order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            (":method", self.method.as_deref()),
            (":scheme", self.scheme.as_deref()),
            (":authority", self.authority.as_deref()),
            (":path", self.path.as_deref()),
            (":status", self.status.as_deref()),
        ]
        .into_iter()
        .filter_map(|(n, v)| v.map(|v| (n, v)))
    }
}

#[cfg(test)]
mod ut_pseudo {
    use super::*;

    /// UT test cases for `PseudoHeaders` accessors.
    ///
    /// # Brief
    /// 1. Sets each pseudo-header through its setter and by wire name.
    /// 2. Checks the getters and the canonical iteration order.
    #[test]
    fn ut_pseudo_headers() {
        let mut pseudo = PseudoHeaders::new();
        pseudo.set_method(Some("GET".to_string()));
        pseudo.set_scheme(Some("https".to_string()));
        assert!(pseudo.set_by_name(":authority", "example.com".to_string()));
        assert!(pseudo.set_by_name(":path", "/".to_string()));
        assert!(!pseudo.set_by_name(":unknown", "x".to_string()));

        let fields: Vec<_> = pseudo.iter().collect();
        assert_eq!(
            fields,
            vec![
                (":method", "GET"),
                (":scheme", "https"),
                (":authority", "example.com"),
                (":path", "/"),
            ]
        );
        assert_eq!(pseudo.status(), None);
    }
}
