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

//! The request surface: method, URL, headers, body and the per-request
//! knobs of the engine.

use std::time::Duration;

use egress_http::headers::Headers;
use egress_http::method::Method;
use egress_http::uri::Uri;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorKind, HttpClientError};
use crate::retry::RetryConfig;

/// A request body.
///
/// Buffered bodies (empty, bytes, text) are replayable: retries, redirects
/// and hedged NAT64 attempts may send them again. A streamed body can be
/// consumed exactly once, which disables all of those.
pub enum Body {
    /// No body.
    Empty,
    /// A finite byte buffer.
    Bytes(Vec<u8>),
    /// A UTF-8 string; defaults `content-type: text/plain;charset=UTF-8`.
    Text(String),
    /// A one-shot byte stream of unknown length.
    Stream(Box<dyn AsyncRead + Send + Unpin + 'static>),
}

impl Body {
    /// An empty body.
    pub fn empty() -> Self {
        Body::Empty
    }

    /// A finite buffered body.
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Body::Bytes(data.into())
    }

    /// A text body.
    pub fn text(data: impl Into<String>) -> Self {
        Body::Text(data.into())
    }

    /// A streamed body read from `reader` until EOF.
    pub fn stream(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Body::Stream(Box::new(reader))
    }

    /// Whether this body can be sent more than once.
    pub fn is_replayable(&self) -> bool {
        !matches!(self, Body::Stream(_))
    }

    pub(crate) fn is_text(&self) -> bool {
        matches!(self, Body::Text(_))
    }

    pub(crate) fn is_empty_body(&self) -> bool {
        match self {
            Body::Empty => true,
            Body::Bytes(data) => data.is_empty(),
            Body::Text(text) => text.is_empty(),
            Body::Stream(_) => false,
        }
    }
}

/// Which protocol family the dispatcher may negotiate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    /// Let ALPN and the protocol memo decide.
    Auto,
    /// HTTP/2 only.
    H2,
    /// HTTP/1.1 only.
    Http1,
}

/// Connection strategy of the dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// The default: negotiate, memoize, fall back through NAT64.
    Compat,
    /// HTTP/1.1 only, preferring the host's plain TLS path; NAT64 with
    /// owned TLS for CDN-classified hosts.
    FastH1,
}

/// What to do with 3xx responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RedirectPolicy {
    /// Follow up to `max_redirects` hops.
    Follow,
    /// Return the 3xx response to the caller.
    Manual,
}

/// Retry configuration.
#[derive(Clone, Debug)]
pub enum RetryPolicy {
    /// No retries.
    Off,
    /// Up to N retries with the default gating and backoff.
    Limit(u32),
    /// Full control.
    Custom {
        /// Maximum retry attempts after the first.
        retries: u32,
        /// Base backoff delay, doubled per attempt.
        base_delay: Duration,
        /// Ceiling for any computed delay.
        max_delay: Duration,
        /// Methods allowed to retry.
        methods: Vec<String>,
        /// Statuses that trigger a retry.
        statuses: Vec<u16>,
    },
}

impl RetryPolicy {
    pub(crate) fn to_config(&self) -> RetryConfig {
        match self {
            RetryPolicy::Off => RetryConfig::disabled(),
            RetryPolicy::Limit(retries) => RetryConfig::with_retries(*retries),
            RetryPolicy::Custom {
                retries,
                base_delay,
                max_delay,
                methods,
                statuses,
            } => RetryConfig {
                max_retries: *retries,
                base_delay: *base_delay,
                max_delay: *max_delay,
                methods: methods.clone(),
                statuses: statuses.clone(),
            },
        }
    }
}

/// One outbound request.
pub struct Request {
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) headers: Headers,
    pub(crate) body: Body,
    pub(crate) timeout: Option<Duration>,
    pub(crate) headers_timeout: Option<Duration>,
    pub(crate) body_timeout: Option<Duration>,
    pub(crate) signal: Option<CancellationToken>,
    pub(crate) redirect: RedirectPolicy,
    pub(crate) max_redirects: usize,
    pub(crate) retry: RetryPolicy,
    pub(crate) decompress: bool,
    pub(crate) compress_body: bool,
    pub(crate) protocol: Protocol,
    pub(crate) strategy: Strategy,
}

impl Request {
    /// Starts building a request.
    ///
    /// # Examples
    ///
    /// ```
    /// use egress_http_client::{Body, Request};
    ///
    /// let request = Request::builder()
    ///     .url("https://example.com/api")
    ///     .method("POST")
    ///     .header("x-key", "1")
    ///     .body(Body::text("{}"))
    ///     .unwrap();
    /// ```
    pub fn builder() -> RequestBuilder {
        RequestBuilder::new()
    }

    /// Convenience GET request with default options.
    pub fn get(url: &str) -> Result<Request, HttpClientError> {
        Request::builder().url(url).body(Body::empty())
    }
}

/// Builder for [`Request`].
pub struct RequestBuilder {
    method: Method,
    uri: Option<Uri>,
    headers: Headers,
    timeout: Option<Duration>,
    headers_timeout: Option<Duration>,
    body_timeout: Option<Duration>,
    signal: Option<CancellationToken>,
    redirect: RedirectPolicy,
    max_redirects: usize,
    retry: RetryPolicy,
    decompress: bool,
    compress_body: bool,
    protocol: Protocol,
    strategy: Strategy,
    error: Option<HttpClientError>,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestBuilder {
    /// Creates a builder with the documented defaults.
    pub fn new() -> Self {
        Self {
            method: Method::GET,
            uri: None,
            headers: Headers::new(),
            timeout: None,
            headers_timeout: None,
            body_timeout: None,
            signal: None,
            redirect: RedirectPolicy::Follow,
            max_redirects: 5,
            retry: RetryPolicy::Off,
            decompress: true,
            compress_body: false,
            protocol: Protocol::Auto,
            strategy: Strategy::Compat,
            error: None,
        }
    }

    /// Sets the target URL.
    pub fn url(mut self, url: &str) -> Self {
        match Uri::parse(url) {
            Ok(uri) => self.uri = Some(uri),
            Err(e) => {
                self.error.get_or_insert_with(|| {
                    HttpClientError::from_message(ErrorKind::Build, format!("invalid url: {e}"))
                });
            }
        }
        self
    }

    /// Sets the request method.
    pub fn method(mut self, method: &str) -> Self {
        match Method::try_from(method) {
            Ok(method) => self.method = method,
            Err(_) => {
                self.error.get_or_insert_with(|| {
                    HttpClientError::from_str(ErrorKind::Build, "invalid method")
                });
            }
        }
        self
    }

    /// Appends a header.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let Err(e) = self.headers.append(name, value) {
            self.error
                .get_or_insert_with(|| HttpClientError::from_error(ErrorKind::Build, e));
        }
        self
    }

    /// Overall timeout, from call entry to response headers, covering every
    /// retry and redirect.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Per-attempt guard on receiving the response head.
    pub fn headers_timeout(mut self, timeout: Duration) -> Self {
        self.headers_timeout = Some(timeout);
        self
    }

    /// Idle guard between body chunks.
    pub fn body_timeout(mut self, timeout: Duration) -> Self {
        self.body_timeout = Some(timeout);
        self
    }

    /// Caller cancellation token.
    pub fn signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Redirect policy; `Follow` is the default.
    pub fn redirect(mut self, redirect: RedirectPolicy) -> Self {
        self.redirect = redirect;
        self
    }

    /// Redirect hop limit; 5 by default.
    pub fn max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// Retry policy; off by default.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Whether to advertise and decode gzip/deflate; on by default.
    pub fn decompress(mut self, decompress: bool) -> Self {
        self.decompress = decompress;
        self
    }

    /// Whether to gzip-compress buffered request bodies over 1 KiB.
    pub fn compress_body(mut self, compress_body: bool) -> Self {
        self.compress_body = compress_body;
        self
    }

    /// Protocol selection; `Auto` by default.
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Connection strategy; `Compat` by default.
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Finishes the request with its body.
    pub fn body(self, body: Body) -> Result<Request, HttpClientError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let uri = self
            .uri
            .ok_or_else(|| HttpClientError::from_str(ErrorKind::Build, "request url is not set"))?;
        Ok(Request {
            method: self.method,
            uri,
            headers: self.headers,
            body,
            timeout: self.timeout,
            headers_timeout: self.headers_timeout,
            body_timeout: self.body_timeout,
            signal: self.signal,
            redirect: self.redirect,
            max_redirects: self.max_redirects,
            retry: self.retry,
            decompress: self.decompress,
            compress_body: self.compress_body,
            protocol: self.protocol,
            strategy: self.strategy,
        })
    }
}
