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

//! Redirect-following policy.
//!
//! 3xx responses are followed up to the hop limit with a visited set for
//! loop detection. 301/302/303 rewrite the method to GET and drop the body;
//! 307/308 preserve both, refusing when the body is a one-shot stream.
//! Crossing origins strips credential headers, and an HTTPS → HTTP
//! downgrade is never followed.

use std::collections::HashSet;

use egress_http::headers::Headers;
use egress_http::uri::{Scheme, Uri};

use crate::error::HttpClientError;

/// Headers describing the dropped body when a redirect rewrites the method
/// to GET.
pub(crate) const BODY_HEADERS: [&str; 3] = ["content-type", "content-length", "content-encoding"];

/// Credential headers stripped when a redirect leaves the origin.
pub(crate) const SENSITIVE_HEADERS: [&str; 3] = ["authorization", "cookie", "proxy-authorization"];

/// Whether the status is a redirect the engine may follow.
pub(crate) fn is_redirect(status: u16) -> bool {
    (300..400).contains(&status)
}

/// Whether the status rewrites the method to GET and drops the body.
pub(crate) fn rewrites_to_get(status: u16) -> bool {
    matches!(status, 301 | 302 | 303)
}

/// Tracks hops and visited URLs across one redirect chain.
pub(crate) struct RedirectGuard {
    visited: HashSet<String>,
    remaining: usize,
}

impl RedirectGuard {
    pub(crate) fn new(max_redirects: usize, origin: &Uri) -> Self {
        let mut visited = HashSet::new();
        visited.insert(origin.to_string());
        Self {
            visited,
            remaining: max_redirects,
        }
    }

    /// Admits the next hop or reports why the chain must stop.
    pub(crate) fn admit(&mut self, next: &Uri) -> Result<(), HttpClientError> {
        if self.remaining == 0 {
            return err_from_msg!(Redirect, "max redirects exceeded");
        }
        self.remaining -= 1;
        if !self.visited.insert(next.to_string()) {
            return err_from_msg!(Redirect, "redirect loop detected");
        }
        Ok(())
    }
}

/// Resolves the `Location` header of a redirect response against the
/// current URI, enforcing the HTTPS downgrade ban.
pub(crate) fn resolve_location(
    current: &Uri,
    headers: &Headers,
) -> Result<Uri, HttpClientError> {
    let location = match headers.get("location") {
        Some(location) => location,
        None => return err_from_msg!(Redirect, "redirect response without location header"),
    };
    let next = current
        .resolve(&location)
        .map_err(|e| HttpClientError::from_message(crate::ErrorKind::Redirect, format!("invalid location header: {e}")))?;
    if current.scheme() == Scheme::Https && next.scheme() == Scheme::Http {
        return err_from_msg!(Redirect, "refusing redirect downgrade from https to http");
    }
    Ok(next)
}

/// Applies the cross-origin and method-rewrite header edits in place, and
/// points `host` at the new authority.
pub(crate) fn rewrite_headers_for_hop(
    headers: &mut Headers,
    status: u16,
    current: &Uri,
    next: &Uri,
) {
    if rewrites_to_get(status) {
        for name in BODY_HEADERS {
            headers.remove(name);
        }
    }
    if !current.same_origin(next) {
        for name in SENSITIVE_HEADERS {
            headers.remove(name);
        }
    }
    let _ = headers.set("host", &next.authority());
}
