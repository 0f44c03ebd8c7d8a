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

//! Outbound header normalization.
//!
//! Caller headers pass through one normalization before any connection is
//! opened: names are already lowercased and validated by [`Headers`], and
//! every header the engine must own, or that would reveal the sandbox
//! identity to the origin, is stripped. The engine then re-adds its own
//! values where needed.

use egress_http::headers::Headers;

/// Headers dropped by exact name: hop-by-hop headers the engine owns plus
/// identity-revealing ones the sandbox injects.
const STRIPPED_NAMES: [&str; 8] = [
    "x-real-ip",
    "true-client-ip",
    "cdn-loop",
    "host",
    "connection",
    "transfer-encoding",
    "keep-alive",
    "upgrade",
];

/// Headers the engine always sets itself.
const ENGINE_OWNED: [&str; 2] = ["accept-encoding", "content-length"];

/// Prefixes dropped wholesale.
const STRIPPED_PREFIXES: [&str; 2] = ["cf-", "x-forwarded-"];

/// Strips forbidden names and applies engine defaults.
///
/// `text_body` defaults `content-type` for string bodies; `decompress`
/// advertises `accept-encoding: gzip, deflate`.
pub(crate) fn normalize_headers(input: &Headers, text_body: bool, decompress: bool) -> Headers {
    let mut out = Headers::new();
    for (name, value) in input.iter() {
        if STRIPPED_NAMES.contains(&name) || ENGINE_OWNED.contains(&name) {
            continue;
        }
        if STRIPPED_PREFIXES.iter().any(|p| name.starts_with(p)) {
            continue;
        }
        // Already validated at insertion; names are lowercase.
        let _ = out.append(name, value);
    }
    if text_body && !out.contains("content-type") {
        let _ = out.set("content-type", "text/plain;charset=UTF-8");
    }
    if decompress {
        let _ = out.set("accept-encoding", "gzip, deflate");
    }
    out
}

#[cfg(test)]
mod ut_normalizer {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        let mut h = Headers::new();
        for (n, v) in pairs {
            h.append(n, v).unwrap();
        }
        h
    }

    /// UT test cases for identity-header stripping.
    ///
    /// # Brief
    /// 1. Normalizes a map carrying `cf-*`, `x-forwarded-*` and the exact
    ///    forbidden names.
    /// 2. Checks every forbidden entry is gone and ordinary entries stay.
    #[test]
    fn ut_normalize_strips_identity_headers() {
        let input = headers(&[
            ("cf-connecting-ip", "1.2.3.4"),
            ("cf-ray", "abc"),
            ("x-forwarded-for", "1.2.3.4"),
            ("x-real-ip", "1.2.3.4"),
            ("true-client-ip", "1.2.3.4"),
            ("cdn-loop", "cloudflare"),
            ("host", "spoof.example"),
            ("connection", "keep-alive"),
            ("transfer-encoding", "chunked"),
            ("keep-alive", "timeout=5"),
            ("upgrade", "websocket"),
            ("accept-encoding", "br"),
            ("content-length", "999"),
            ("x-api-key", "k"),
            ("authorization", "Bearer t"),
        ]);
        let out = normalize_headers(&input, false, false);
        assert_eq!(out.len(), 2);
        assert_eq!(out.get("x-api-key"), Some("k".to_string()));
        assert_eq!(out.get("authorization"), Some("Bearer t".to_string()));
    }

    /// UT test cases for engine defaults.
    ///
    /// # Brief
    /// 1. Normalizes with a text body and with decompression enabled.
    /// 2. Checks the defaulted `content-type` and `accept-encoding`.
    /// 3. Checks a caller `content-type` is not overwritten.
    #[test]
    fn ut_normalize_defaults() {
        let out = normalize_headers(&Headers::new(), true, true);
        assert_eq!(
            out.get("content-type"),
            Some("text/plain;charset=UTF-8".to_string())
        );
        assert_eq!(out.get("accept-encoding"), Some("gzip, deflate".to_string()));

        let input = headers(&[("content-type", "application/json")]);
        let out = normalize_headers(&input, true, false);
        assert_eq!(
            out.get("content-type"),
            Some("application/json".to_string())
        );
        assert!(!out.contains("accept-encoding"));
    }

    /// UT test cases for normalization idempotence.
    ///
    /// # Brief
    /// 1. Normalizes a map twice with the same flags.
    /// 2. Checks the second pass changes nothing.
    #[test]
    fn ut_normalize_idempotent() {
        let input = headers(&[
            ("accept", "text/html"),
            ("x-custom", "1"),
            ("cf-worker", "w"),
        ]);
        let once = normalize_headers(&input, true, true);
        let twice = normalize_headers(&once, true, true);
        assert_eq!(once, twice);
    }
}
