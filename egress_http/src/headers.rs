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

//! HTTP [`Fields`] implementation.
//!
//! [`Fields`]: https://httpwg.org/specs/rfc9110.html#fields
//!
//! [`Headers`] is an insertion-ordered, lowercase header map. Every entry is
//! kept as it was inserted, duplicates included, so the raw wire order can be
//! reproduced. Merged lookups join duplicates with `, `, except `set-cookie`
//! whose values are joined with `\n` because cookie values may themselves
//! contain commas.

use crate::error::{invalid_input, HttpError};
use crate::method::is_token_byte;

/// An insertion-ordered multimap of lowercase header names to values.
///
/// # Examples
///
/// ```
/// use egress_http::headers::Headers;
///
/// let mut headers = Headers::new();
/// headers.append("Accept", "text/html").unwrap();
/// headers.append("accept", "application/json").unwrap();
/// assert_eq!(headers.get("accept"), Some("text/html, application/json".to_string()));
/// ```
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty `Headers`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header, preserving existing entries with the same name.
    ///
    /// The name is validated against the RFC 7230 `token` grammar and
    /// lowercased; the value is rejected if it contains CR, LF or NUL.
    pub fn append(&mut self, name: &str, value: &str) -> Result<(), HttpError> {
        let name = normalize_name(name)?;
        validate_value(value)?;
        self.entries.push((name, value.trim().to_string()));
        Ok(())
    }

    /// Sets a header, removing every existing entry with the same name first.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), HttpError> {
        let name = normalize_name(name)?;
        validate_value(value)?;
        self.entries.retain(|(n, _)| *n != name);
        self.entries.push((name, value.trim().to_string()));
        Ok(())
    }

    /// Appends a header that has already been validated and lowercased, e.g.
    /// one produced by the HPACK decoder.
    pub(crate) fn append_unchecked(&mut self, name: String, value: String) {
        self.entries.push((name, value));
    }

    /// Removes every entry with the given name. Returns `true` if any entry
    /// was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        let before = self.entries.len();
        self.entries.retain(|(n, _)| *n != name);
        self.entries.len() != before
    }

    /// Returns the merged value for a name: duplicates joined with `, `,
    /// except `set-cookie` which is joined with `\n`.
    pub fn get(&self, name: &str) -> Option<String> {
        let name = name.to_ascii_lowercase();
        let sep = if name == "set-cookie" { "\n" } else { ", " };
        let mut out: Option<String> = None;
        for (n, v) in &self.entries {
            if *n == name {
                match &mut out {
                    Some(s) => {
                        s.push_str(sep);
                        s.push_str(v);
                    }
                    None => out = Some(v.clone()),
                }
            }
        }
        out
    }

    /// Returns every value recorded for a name, in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        let name = name.to_ascii_lowercase();
        self.entries
            .iter()
            .filter(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Whether any entry carries the given name.
    pub fn contains(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.entries.iter().any(|(n, _)| *n == name)
    }

    /// Iterates over the raw entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Returns the number of raw entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn normalize_name(name: &str) -> Result<String, HttpError> {
    if name.is_empty() || !name.bytes().all(is_token_byte) {
        return Err(invalid_input("invalid header name"));
    }
    Ok(name.to_ascii_lowercase())
}

fn validate_value(value: &str) -> Result<(), HttpError> {
    if value
        .bytes()
        .any(|b| b == b'\r' || b == b'\n' || b == 0 || (b < 0x20 && b != b'\t'))
    {
        return Err(invalid_input("invalid header value"));
    }
    Ok(())
}

/// Validates a header name against the RFC 7230 `token` grammar.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(is_token_byte)
}

/// Validates a header value: no CR, LF, NUL or control bytes other than tab.
pub fn is_valid_value(value: &str) -> bool {
    validate_value(value).is_ok()
}

#[cfg(test)]
mod ut_headers {
    use super::*;

    /// UT test cases for `Headers::append` and `Headers::get`.
    ///
    /// # Brief
    /// 1. Appends duplicate headers under differently-cased names.
    /// 2. Checks the merged lookup joins duplicates with `, `.
    /// 3. Checks `set-cookie` values merge with `\n` instead.
    #[test]
    fn ut_headers_append_get() {
        let mut headers = Headers::new();
        headers.append("Accept", "a").unwrap();
        headers.append("ACCEPT", "b").unwrap();
        assert_eq!(headers.get("accept"), Some("a, b".to_string()));

        headers.append("Set-Cookie", "x=1; Path=/").unwrap();
        headers.append("set-cookie", "y=2").unwrap();
        assert_eq!(
            headers.get("set-cookie"),
            Some("x=1; Path=/\ny=2".to_string())
        );
        assert_eq!(headers.get_all("set-cookie"), vec!["x=1; Path=/", "y=2"]);
        assert_eq!(headers.get("missing"), None);
    }

    /// UT test cases for `Headers::set` and `Headers::remove`.
    ///
    /// # Brief
    /// 1. Sets a header twice and checks only the last value remains.
    /// 2. Removes a header and checks the removal is reported.
    #[test]
    fn ut_headers_set_remove() {
        let mut headers = Headers::new();
        headers.append("a", "1").unwrap();
        headers.append("a", "2").unwrap();
        headers.set("A", "3").unwrap();
        assert_eq!(headers.get("a"), Some("3".to_string()));
        assert_eq!(headers.len(), 1);

        assert!(headers.remove("a"));
        assert!(!headers.remove("a"));
        assert!(headers.is_empty());
    }

    /// UT test cases for header validation.
    ///
    /// # Brief
    /// 1. Rejects names outside the token grammar.
    /// 2. Rejects values carrying CR, LF or NUL.
    #[test]
    fn ut_headers_validation() {
        let mut headers = Headers::new();
        assert!(headers.append("", "v").is_err());
        assert!(headers.append("na me", "v").is_err());
        assert!(headers.append("name:", "v").is_err());
        assert!(headers.append("ok", "bad\r\nvalue").is_err());
        assert!(headers.append("ok", "bad\0value").is_err());
        assert!(headers.append("ok", "fine value\twith tab").is_ok());
    }

    /// UT test cases for insertion-order iteration.
    ///
    /// # Brief
    /// 1. Appends headers in a known order with duplicates.
    /// 2. Checks iteration preserves order and duplicates.
    #[test]
    fn ut_headers_iter_order() {
        let mut headers = Headers::new();
        headers.append("b", "1").unwrap();
        headers.append("a", "2").unwrap();
        headers.append("b", "3").unwrap();
        let entries: Vec<_> = headers.iter().collect();
        assert_eq!(entries, vec![("b", "1"), ("a", "2"), ("b", "3")]);
    }
}
