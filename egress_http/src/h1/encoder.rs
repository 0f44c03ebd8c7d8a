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

//! HTTP/1.1 [request] serializer.
//!
//! [request]: https://httpwg.org/specs/rfc9112.html#request.line
//!
//! The serializer validates the request line, fills in the headers a
//! well-formed request needs (`host`, `user-agent`, `connection: close`),
//! and resolves body framing: a streamed body becomes chunked transfer
//! coding, a finite body carries its exact `content-length`. When both
//! `transfer-encoding` and `content-length` end up present,
//! `content-length` is dropped.

use crate::error::{invalid_input, HttpError};
use crate::headers::{is_valid_name, is_valid_value, Headers};
use crate::method::Method;

/// The default `user-agent` value.
pub const DEFAULT_USER_AGENT: &str = concat!("egress-http/", env!("CARGO_PKG_VERSION"));

/// How the request body will be framed on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyLength {
    /// No body at all.
    Empty,
    /// A finite body of a known byte length.
    Fixed(u64),
    /// A streamed body of unknown length, sent with chunked coding.
    Stream,
}

/// Serializes a request head and returns the wire bytes together with the
/// effective headers that were sent.
pub fn encode_request_head(
    method: &Method,
    path_and_query: &str,
    authority: &str,
    headers: &Headers,
    body: BodyLength,
) -> Result<(Vec<u8>, Headers), HttpError> {
    validate_path(path_and_query)?;

    let mut effective = headers.clone();
    if !effective.contains("host") {
        effective.set("host", authority)?;
    }
    if !effective.contains("user-agent") {
        effective.set("user-agent", DEFAULT_USER_AGENT)?;
    }
    if !effective.contains("connection") {
        effective.set("connection", "close")?;
    }
    match body {
        BodyLength::Empty => {}
        BodyLength::Fixed(len) => {
            effective.set("content-length", &len.to_string())?;
        }
        BodyLength::Stream => {
            effective.set("transfer-encoding", "chunked")?;
            effective.remove("content-length");
        }
    }
    if effective.contains("transfer-encoding") && effective.contains("content-length") {
        effective.remove("content-length");
    }

    let mut dst = Vec::with_capacity(256);
    dst.extend_from_slice(method.as_str().as_bytes());
    dst.push(b' ');
    dst.extend_from_slice(path_and_query.as_bytes());
    dst.extend_from_slice(b" HTTP/1.1\r\n");
    for (name, value) in effective.iter() {
        if !is_valid_name(name) || !is_valid_value(value) {
            return Err(invalid_input("invalid header"));
        }
        dst.extend_from_slice(name.as_bytes());
        dst.extend_from_slice(b": ");
        dst.extend_from_slice(value.as_bytes());
        dst.extend_from_slice(b"\r\n");
    }
    dst.extend_from_slice(b"\r\n");
    Ok((dst, effective))
}

fn validate_path(path: &str) -> Result<(), HttpError> {
    if path.is_empty()
        || path
            .bytes()
            .any(|b| b == b' ' || b == b'\t' || b == b'\r' || b == b'\n' || b == 0)
    {
        return Err(invalid_input("invalid path"));
    }
    Ok(())
}

#[cfg(test)]
mod ut_h1_encoder {
    use super::*;

    /// UT test cases for default header fill-in.
    ///
    /// # Brief
    /// 1. Serializes a bare GET request.
    /// 2. Checks the request line and the defaulted `host`, `user-agent` and
    ///    `connection: close` headers.
    #[test]
    fn ut_encode_request_defaults() {
        let (wire, effective) = encode_request_head(
            &Method::GET,
            "/a?b=1",
            "example.com",
            &Headers::new(),
            BodyLength::Empty,
        )
        .unwrap();
        let text = String::from_utf8(wire).unwrap();
        assert!(text.starts_with("GET /a?b=1 HTTP/1.1\r\n"));
        assert!(text.contains("host: example.com\r\n"));
        assert!(text.contains("connection: close\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
        assert_eq!(effective.get("user-agent"), Some(DEFAULT_USER_AGENT.to_string()));
        assert!(!effective.contains("content-length"));
    }

    /// UT test cases for body framing headers.
    ///
    /// # Brief
    /// 1. Serializes requests with a fixed body and a streamed body.
    /// 2. Checks the fixed body carries its exact `content-length` and the
    ///    streamed body carries `transfer-encoding: chunked` with any
    ///    user-supplied `content-length` dropped.
    #[test]
    fn ut_encode_request_body_framing() {
        let (_, effective) = encode_request_head(
            &Method::POST,
            "/",
            "h",
            &Headers::new(),
            BodyLength::Fixed(7),
        )
        .unwrap();
        assert_eq!(effective.get("content-length"), Some("7".to_string()));

        let mut headers = Headers::new();
        headers.set("content-length", "999").unwrap();
        let (_, effective) =
            encode_request_head(&Method::POST, "/", "h", &headers, BodyLength::Stream).unwrap();
        assert_eq!(
            effective.get("transfer-encoding"),
            Some("chunked".to_string())
        );
        assert!(!effective.contains("content-length"));
    }

    /// UT test cases for path validation.
    ///
    /// # Brief
    /// 1. Serializes requests with whitespace and control bytes in the path.
    /// 2. Checks each is rejected before any bytes are produced.
    #[test]
    fn ut_encode_request_bad_path() {
        for path in ["/a b", "/a\rb", "/a\nb", ""] {
            assert!(encode_request_head(
                &Method::GET,
                path,
                "h",
                &Headers::new(),
                BodyLength::Empty,
            )
            .is_err());
        }
    }

    /// UT test cases for caller headers surviving serialization.
    ///
    /// # Brief
    /// 1. Provides explicit `host` and `user-agent` headers.
    /// 2. Checks the defaults do not overwrite them.
    #[test]
    fn ut_encode_request_keeps_caller_headers() {
        let mut headers = Headers::new();
        headers.set("host", "override.example").unwrap();
        headers.set("user-agent", "custom/1.0").unwrap();
        let (_, effective) =
            encode_request_head(&Method::GET, "/", "h", &headers, BodyLength::Empty).unwrap();
        assert_eq!(effective.get("host"), Some("override.example".to_string()));
        assert_eq!(effective.get("user-agent"), Some("custom/1.0".to_string()));
    }
}
