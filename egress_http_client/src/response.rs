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

//! The response surface handed back to callers.
//!
//! Headers are readable both merged (duplicates comma-joined, `set-cookie`
//! newline-joined) and raw, in wire order with every duplicate preserved.
//! The body is a pull stream; the convenience consumers drain it and mark
//! it consumed, so a second consumption is rejected rather than returning
//! an empty result.

use egress_http::headers::Headers;
use serde::de::DeserializeOwned;

use crate::body::ResponseBody;
use crate::error::{ErrorKind, HttpClientError};

/// A response: status, headers and a lazily-drained body.
#[derive(Debug)]
pub struct Response {
    status: u16,
    status_text: String,
    headers: Headers,
    protocol: &'static str,
    body: ResponseBody,
    consumed: bool,
}

impl Response {
    pub(crate) fn new(
        status: u16,
        status_text: String,
        headers: Headers,
        protocol: &'static str,
        body: ResponseBody,
    ) -> Self {
        Self {
            status,
            status_text,
            headers,
            protocol,
            body,
            consumed: false,
        }
    }

    /// The status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// The reason phrase. Empty for HTTP/2 responses, which have none.
    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// The negotiated protocol, `"h2"` or `"http1"`.
    pub fn protocol(&self) -> &'static str {
        self.protocol
    }

    /// The header map.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The merged value of one header.
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers.get(name)
    }

    /// Every header as `(name, value)` pairs in wire order, duplicates
    /// preserved.
    pub fn raw_headers(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect()
    }

    /// Each original `set-cookie` value as its own string.
    pub fn get_set_cookie(&self) -> Vec<String> {
        self.headers
            .get_all("set-cookie")
            .into_iter()
            .map(|v| v.to_string())
            .collect()
    }

    /// Pulls the next body chunk. `None` is the clean end of the body.
    pub async fn chunk(&mut self) -> Option<Result<Vec<u8>, HttpClientError>> {
        if self.consumed {
            return None;
        }
        self.body.next_chunk().await
    }

    /// Reads the whole body.
    pub async fn bytes(&mut self) -> Result<Vec<u8>, HttpClientError> {
        if self.consumed {
            return err_from_msg!(Request, "response body already consumed");
        }
        self.consumed = true;
        let mut out = Vec::new();
        while let Some(chunk) = self.body.next_chunk().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    /// Reads the whole body as UTF-8 text.
    pub async fn text(&mut self) -> Result<String, HttpClientError> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes)
            .map_err(|e| HttpClientError::from_error(ErrorKind::BodyDecode, e))
    }

    /// Reads and deserializes the whole body as JSON.
    pub async fn json<T: DeserializeOwned>(&mut self) -> Result<T, HttpClientError> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| HttpClientError::from_error(ErrorKind::BodyDecode, e))
    }

    /// Cancels the body and releases the connection.
    pub fn cancel(&mut self) {
        self.consumed = true;
        self.body.cancel_body();
    }

    /// Drains and discards the rest of the body, releasing the connection.
    pub(crate) async fn drain_body(&mut self) -> Result<(), HttpClientError> {
        self.consumed = true;
        self.body.drain().await
    }
}
