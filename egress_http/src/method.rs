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

//! HTTP [`Method`] implementation.
//!
//! [`Method`]: https://httpwg.org/specs/rfc9110.html#methods
//!
//! The request method token is the primary source of request semantics.
//! Method names are case-sensitive and must match the RFC 7230 `token`
//! grammar.

use std::borrow::Cow;
use std::fmt::{Display, Formatter};

use crate::error::{invalid_input, HttpError};

/// An HTTP request method.
///
/// # Examples
///
/// ```
/// use egress_http::method::Method;
///
/// let method = Method::try_from("GET").unwrap();
/// assert_eq!(method, Method::GET);
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Method(Cow<'static, str>);

impl Method {
    /// The `GET` method.
    pub const GET: Method = Method(Cow::Borrowed("GET"));

    /// The `HEAD` method.
    pub const HEAD: Method = Method(Cow::Borrowed("HEAD"));

    /// The `POST` method.
    pub const POST: Method = Method(Cow::Borrowed("POST"));

    /// The `PUT` method.
    pub const PUT: Method = Method(Cow::Borrowed("PUT"));

    /// The `DELETE` method.
    pub const DELETE: Method = Method(Cow::Borrowed("DELETE"));

    /// The `OPTIONS` method.
    pub const OPTIONS: Method = Method(Cow::Borrowed("OPTIONS"));

    /// The `PATCH` method.
    pub const PATCH: Method = Method(Cow::Borrowed("PATCH"));

    /// Returns the method as a `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the method is defined as idempotent by RFC 9110. Idempotent
    /// requests may be retried or hedged without changing server state
    /// beyond the first application.
    pub fn is_idempotent(&self) -> bool {
        matches!(
            self.0.as_ref(),
            "GET" | "HEAD" | "OPTIONS" | "PUT" | "DELETE" | "TRACE"
        )
    }

    /// Whether a request with this method is allowed to carry a body on the
    /// wire without surprising intermediaries.
    pub fn is_safe(&self) -> bool {
        matches!(self.0.as_ref(), "GET" | "HEAD" | "OPTIONS" | "TRACE")
    }
}

impl TryFrom<&str> for Method {
    type Error = HttpError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if value.is_empty() || !value.bytes().all(is_token_byte) {
            return Err(invalid_input("invalid method"));
        }
        Ok(match value {
            "GET" => Method::GET,
            "HEAD" => Method::HEAD,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "DELETE" => Method::DELETE,
            "OPTIONS" => Method::OPTIONS,
            "PATCH" => Method::PATCH,
            other => Method(Cow::Owned(other.to_string())),
        })
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checks a byte against the RFC 7230 `tchar` set.
pub fn is_token_byte(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' |
        b'^' | b'_' | b'`' | b'|' | b'~' |
        b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z'
    )
}

#[cfg(test)]
mod ut_method {
    use super::*;

    /// UT test cases for `Method::try_from`.
    ///
    /// # Brief
    /// 1. Converts well-known and custom token strings into `Method`s.
    /// 2. Checks that non-token inputs are rejected.
    #[test]
    fn ut_method_try_from() {
        assert_eq!(Method::try_from("GET").unwrap(), Method::GET);
        assert_eq!(Method::try_from("PURGE").unwrap().as_str(), "PURGE");
        assert!(Method::try_from("").is_err());
        assert!(Method::try_from("GE T").is_err());
        assert!(Method::try_from("GET\r\n").is_err());
    }

    /// UT test cases for `Method::is_idempotent`.
    ///
    /// # Brief
    /// 1. Checks the idempotent set against RFC 9110.
    #[test]
    fn ut_method_is_idempotent() {
        assert!(Method::GET.is_idempotent());
        assert!(Method::PUT.is_idempotent());
        assert!(Method::DELETE.is_idempotent());
        assert!(!Method::POST.is_idempotent());
        assert!(!Method::PATCH.is_idempotent());
    }
}
