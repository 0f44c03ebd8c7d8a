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

//! The request dispatcher.
//!
//! [`Client`] is the engine context: it owns the connection pool, the DNS
//! and protocol caches and the NAT64 health tracker, so tests can build
//! isolated engines and every cache has an explicit clear operation.
//!
//! `request` wraps the inner dispatch in a retry loop, the redirect chain
//! inside each retry arm, and picks a connection strategy per attempt:
//! direct TLS with negotiated or memoized ALPN for ordinary hosts, and
//! NAT64-translated literals for CDN-classified hosts the sandbox refuses
//! to dial, hedging a second prefix after a short head start when the
//! request is safe to race.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use egress_http::h1::decoder::{body_framing, BodyFraming, ResponseHead};
use egress_http::h1::chunked::ChunkedDecoder;
use egress_http::headers::Headers;
use egress_http::method::Method;
use egress_http::uri::{Scheme, Uri};
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::alpn_memo::{AlpnProtocol, ProtocolMemo};
use crate::body::{H1Framing, Release, ResponseBody};
use crate::compress::{gzip_compress, ContentDecoder, COMPRESS_THRESHOLD};
use crate::conn::http1::{exchange, H1SendBody};
use crate::dns::{DnsCache, DohResolver};
use crate::error::{ErrorKind, HttpClientError};
use crate::h2_conn::{spawn_connection, H2Client, H2RequestHead, H2SendBody};
use crate::nat64::{synthesize_nat64, PrefixHealth, DEFAULT_NAT64_PREFIXES, NAT64_CANDIDATES};
use crate::normalizer::normalize_headers;
use crate::pool::{ConnPool, PoolKey};
use crate::redirect::{
    is_redirect, resolve_location, rewrite_headers_for_hop, rewrites_to_get, RedirectGuard,
};
use crate::request::{Body, Protocol, RedirectPolicy, Request, Strategy};
use crate::response::Response;
use crate::timeout::{cancellable_sleep, guarded, Deadline};
use crate::tls::TlsSession;
use crate::transport::{connect_tcp, ByteStream};

/// Host network errors that mean the sandbox refused the connect. Matched
/// by substring against the rendered cause, exactly as the host surfaces
/// them.
const SANDBOX_BLOCKED_ERRORS: [&str; 3] = [
    "cannot connect to the specified address",
    "A network issue was detected",
    "TCP Loop detected",
];

/// Errors that let the fast-h1 strategy fall back from the plain TLS path
/// to the owned TLS path.
const FAST_H1_FALLBACK_ERRORS: [&str; 3] = [
    "Stream was cancelled",
    "connection refused",
    "network connection lost",
];

/// Guard on the ALPN-negotiating handshake before falling back to plain
/// HTTP/1.1.
const NEGOTIATE_HANDSHAKE_GUARD: Duration = Duration::from_secs(2);

/// Per-prefix guard on NAT64 connection establishment.
const NAT64_CONNECT_GUARD: Duration = Duration::from_secs(1);

/// Head start the first NAT64 candidate gets before the hedge launches.
const HEDGE_DELAY: Duration = Duration::from_millis(200);

/// Builder for [`Client`].
pub struct ClientBuilder {
    resolver: DohResolver,
    nat64_prefixes: Vec<String>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    /// Creates a builder with the default resolver and NAT64 prefixes.
    pub fn new() -> Self {
        Self {
            resolver: DohResolver::default(),
            nat64_prefixes: DEFAULT_NAT64_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }

    /// Replaces the DoH resolver.
    pub fn dns_resolver(mut self, resolver: DohResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Replaces the NAT64 prefix list.
    pub fn nat64_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.nat64_prefixes = prefixes;
        self
    }

    /// Builds the client.
    pub fn build(self) -> Client {
        Client {
            inner: Arc::new(EngineContext {
                dns: DnsCache::new(self.resolver),
                pool: Arc::new(ConnPool::new()),
                memo: ProtocolMemo::new(),
                nat64: PrefixHealth::new(),
                nat64_prefixes: self.nat64_prefixes,
            }),
        }
    }
}

struct EngineContext {
    dns: DnsCache,
    pool: Arc<ConnPool>,
    memo: ProtocolMemo,
    nat64: PrefixHealth,
    nat64_prefixes: Vec<String>,
}

/// The HTTPS engine.
///
/// # Examples
///
/// ```no_run
/// use egress_http_client::{Client, Request};
///
/// # async fn run() -> Result<(), egress_http_client::HttpClientError> {
/// let client = Client::new();
/// let mut response = client.request(Request::get("https://example.com/")?).await?;
/// let text = response.text().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<EngineContext>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Creates a client with default configuration.
    pub fn new() -> Self {
        ClientBuilder::new().build()
    }

    /// Starts building a customized client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Closes and forgets every pooled connection.
    pub fn clear_pool(&self) {
        self.inner.pool.clear();
    }

    /// Drops every cached DNS entry.
    pub fn clear_dns_cache(&self) {
        self.inner.dns.clear();
    }

    /// Forgets all NAT64 prefix health data.
    pub fn clear_nat64_prefix_stats(&self) {
        self.inner.nat64.clear();
    }

    /// Drops every memoized ALPN outcome.
    pub fn clear_protocol_memo(&self) {
        self.inner.memo.clear();
    }

    /// How many DoH failures have been swallowed as "try direct".
    pub fn doh_failure_count(&self) -> u64 {
        self.inner.dns.doh_failure_count()
    }

    /// The recorded health of one NAT64 prefix, if any attempt has run.
    pub fn nat64_prefix_stats(&self, prefix: &str) -> Option<crate::nat64::Nat64PrefixStats> {
        self.inner.nat64.stats(prefix)
    }

    /// Resolves a URL and establishes a pooled connection ahead of the
    /// first request.
    pub async fn prewarm(&self, url: &str) -> Result<(), HttpClientError> {
        let uri = Uri::parse(url)
            .map_err(|e| HttpClientError::from_message(ErrorKind::Build, format!("invalid url: {e}")))?;
        if uri.scheme() != Scheme::Https {
            return Ok(());
        }
        let entry = self.inner.dns.lookup(uri.host()).await;
        if entry.is_cdn {
            // The connect itself would go through NAT64; resolving and
            // classifying is the useful part.
            return Ok(());
        }
        let cancel = CancellationToken::new();
        let key = PoolKey::new(uri.host(), uri.port(), None);
        if self.inner.pool.get(&key).is_some() {
            return Ok(());
        }
        let stream = connect_tcp(uri.host(), uri.port(), Deadline::none(), &cancel).await?;
        let tls = TlsSession::handshake(
            stream,
            uri.host(),
            &[b"h2", b"http/1.1"],
            Deadline::none(),
            &cancel,
        )
        .await?;
        let alpn = tls.alpn().unwrap_or_else(|| "http/1.1".to_string());
        self.inner
            .memo
            .put(uri.host(), uri.port(), AlpnProtocol::from_token(&alpn));
        if alpn == "h2" {
            let client = spawn_connection(ByteStream::Tls(Box::new(tls)));
            ConnPool::insert(&self.inner.pool, key, client);
        }
        Ok(())
    }

    /// Issues one request: the entry point of the engine.
    pub async fn request(&self, request: Request) -> Result<Response, HttpClientError> {
        // Pre-flight: a tripped token never reaches the network.
        if let Some(signal) = &request.signal {
            if signal.is_cancelled() {
                return Err(HttpClientError::user_aborted());
            }
        }
        let cancel = request.signal.clone().unwrap_or_default();
        let overall = Deadline::after(request.timeout);

        let headers = normalize_headers(
            &request.headers,
            request.body.is_text(),
            request.decompress,
        );

        // Body preparation: strings become UTF-8 bytes, large buffers may
        // gzip, streams stay one-shot.
        let mut attempt_body = match request.body {
            Body::Empty => AttemptBody::Empty,
            Body::Bytes(data) => AttemptBody::Buffer(data),
            Body::Text(text) => AttemptBody::Buffer(text.into_bytes()),
            Body::Stream(reader) => AttemptBody::Stream(Some(reader)),
        };
        let mut headers = headers;
        if request.compress_body {
            if let AttemptBody::Buffer(data) = &attempt_body {
                if data.len() > COMPRESS_THRESHOLD && !headers.contains("content-encoding") {
                    let compressed = gzip_compress(data)?;
                    let _ = headers.set("content-encoding", "gzip");
                    attempt_body = AttemptBody::Buffer(compressed);
                }
            }
        }

        let retry = request.retry.to_config();
        let plan = DispatchPlan {
            method: request.method.clone(),
            uri: request.uri.clone(),
            headers,
            redirect: request.redirect,
            max_redirects: request.max_redirects,
            headers_timeout: request.headers_timeout,
            body_timeout: request.body_timeout,
            decompress: request.decompress,
            protocol: request.protocol,
            strategy: request.strategy,
        };

        let mut attempt = 0u32;
        loop {
            let result = self
                .dispatch_with_redirects(&plan, &mut attempt_body, overall, &cancel)
                .await;

            let may_retry = attempt < retry.max_retries
                && retry.method_allowed(&plan.method)
                && attempt_body.is_replayable();
            match result {
                Ok(mut response) => {
                    if may_retry && retry.status_triggers(response.status()) {
                        let retry_after = response.header("retry-after");
                        // The connection is only reusable once the previous
                        // body is out of the way.
                        let _ = response.drain_body().await;
                        let delay = retry.delay(attempt, retry_after.as_deref());
                        debug!(status = response.status(), attempt, ?delay, "retrying on status");
                        cancellable_sleep(delay, overall, &cancel).await?;
                        attempt += 1;
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) => {
                    // The caller's cancel and the overall deadline are
                    // terminal; per-attempt guards may retry.
                    let terminal = e.is_user_aborted()
                        || (e.is_timeout() && e.cause_string().contains("overall timeout"));
                    if may_retry && !terminal {
                        let delay = retry.delay(attempt, None);
                        debug!(error = %e, attempt, ?delay, "retrying on error");
                        cancellable_sleep(delay, overall, &cancel).await?;
                        attempt += 1;
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// One retry arm: the redirect chain.
    async fn dispatch_with_redirects(
        &self,
        plan: &DispatchPlan,
        body: &mut AttemptBody,
        overall: Deadline,
        cancel: &CancellationToken,
    ) -> Result<Response, HttpClientError> {
        let mut uri = plan.uri.clone();
        let mut method = plan.method.clone();
        let mut headers = plan.headers.clone();
        let mut body_dropped = false;
        let mut guard = RedirectGuard::new(plan.max_redirects, &uri);

        loop {
            let mut response = self
                .dispatch_once(plan, &uri, &method, &headers, body, body_dropped, overall, cancel)
                .await?;

            // A 3xx without a Location (304 chiefly) is a final response,
            // not a hop.
            if plan.redirect == RedirectPolicy::Manual
                || !is_redirect(response.status())
                || !response.headers().contains("location")
            {
                return Ok(response);
            }
            let status = response.status();
            let next = resolve_location(&uri, response.headers())?;
            guard.admit(&next)?;
            if !rewrites_to_get(status) && !body_dropped && !body.is_replayable() {
                return err_from_msg!(
                    Redirect,
                    "request body is a one-shot stream (ReadableStream) and is not replayable on 307/308 redirect"
                );
            }
            // The previous hop's body is fully drained before the next
            // request is issued.
            response.drain_body().await?;

            if rewrites_to_get(status) {
                if method != Method::GET && method != Method::HEAD {
                    method = Method::GET;
                }
                body_dropped = true;
            }
            rewrite_headers_for_hop(&mut headers, status, &uri, &next);
            debug!(from = %uri, to = %next, status, "following redirect");
            uri = next;
        }
    }

    /// One attempt against one origin: strategy selection.
    #[allow(clippy::too_many_arguments)]
    async fn dispatch_once(
        &self,
        plan: &DispatchPlan,
        uri: &Uri,
        method: &Method,
        headers: &Headers,
        body: &mut AttemptBody,
        body_dropped: bool,
        overall: Deadline,
        cancel: &CancellationToken,
    ) -> Result<Response, HttpClientError> {
        let headers_deadline = overall.earliest(Deadline::after(plan.headers_timeout));

        // Plain HTTP short-circuits to direct H1.
        if uri.scheme() == Scheme::Http {
            let stream = connect_tcp(uri.host(), uri.port(), headers_deadline, cancel).await?;
            return self
                .h1_attempt(
                    ByteStream::Tcp(stream),
                    plan,
                    uri,
                    method,
                    headers,
                    body,
                    body_dropped,
                    headers_deadline,
                    cancel,
                )
                .await;
        }

        let entry = guarded(headers_deadline, cancel, "overall timeout", async {
            Ok(self.inner.dns.lookup(uri.host()).await)
        })
        .await?;

        match plan.strategy {
            Strategy::FastH1 => {
                self.dispatch_fast_h1(
                    plan, uri, method, headers, body, body_dropped, &entry.ipv4, entry.is_cdn,
                    headers_deadline, overall, cancel,
                )
                .await
            }
            Strategy::Compat => {
                self.dispatch_compat(
                    plan, uri, method, headers, body, body_dropped, &entry.ipv4, entry.is_cdn,
                    headers_deadline, overall, cancel,
                )
                .await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_compat(
        &self,
        plan: &DispatchPlan,
        uri: &Uri,
        method: &Method,
        headers: &Headers,
        body: &mut AttemptBody,
        body_dropped: bool,
        ipv4: &Option<Ipv4Addr>,
        is_cdn: bool,
        headers_deadline: Deadline,
        overall: Deadline,
        cancel: &CancellationToken,
    ) -> Result<Response, HttpClientError> {
        let alpn_for_protocol: &[&[u8]] = match plan.protocol {
            Protocol::H2 => &[b"h2"],
            Protocol::Http1 => &[b"http/1.1"],
            Protocol::Auto => &[b"h2", b"http/1.1"],
        };

        // A CDN-classified target means the sandbox will refuse a direct
        // dial; go straight through NAT64.
        if is_cdn {
            return self
                .nat64_dispatch(
                    plan, uri, method, headers, body, body_dropped, ipv4, alpn_for_protocol,
                    headers_deadline, overall, cancel,
                )
                .await;
        }

        // Forced protocols bypass the memo.
        let memoized = match plan.protocol {
            Protocol::H2 => Some(AlpnProtocol::H2),
            Protocol::Http1 => Some(AlpnProtocol::Http1),
            Protocol::Auto => self.inner.memo.get(uri.host(), uri.port()),
        };

        let direct = match memoized {
            Some(AlpnProtocol::H2) => {
                self.h2_via_pool_or_connect(
                    plan, uri, method, headers, body, body_dropped, None, &[b"h2"],
                    headers_deadline, cancel,
                )
                .await
            }
            Some(AlpnProtocol::Http1) => {
                self.tls_attempt(
                    plan, uri, method, headers, body, body_dropped, None, &[b"http/1.1"],
                    headers_deadline, headers_deadline, cancel,
                )
                .await
            }
            None => {
                // No memo: negotiate, bounded so a hung handshake cannot
                // stall the attempt.
                let negotiate_guard =
                    headers_deadline.earliest(Deadline::after(Some(NEGOTIATE_HANDSHAKE_GUARD)));
                let negotiated = self
                    .tls_attempt(
                        plan, uri, method, headers, body, body_dropped, None,
                        &[b"h2", b"http/1.1"], negotiate_guard, headers_deadline, cancel,
                    )
                    .await;
                match negotiated {
                    Ok(response) => Ok(response),
                    Err(e)
                        if !is_sandbox_blocked(&e)
                            && !e.is_user_aborted()
                            && (body.is_replayable() || body_dropped) =>
                    {
                        // Hung or failed negotiation: plain HTTP/1.1.
                        debug!(error = %e, "alpn negotiation failed; retrying as http/1.1");
                        self.tls_attempt(
                            plan, uri, method, headers, body, body_dropped, None,
                            &[b"http/1.1"], headers_deadline, headers_deadline, cancel,
                        )
                        .await
                    }
                    Err(e) => Err(e),
                }
            }
        };

        match direct {
            Ok(response) => Ok(response),
            Err(e)
                if is_sandbox_blocked(&e) && (body.is_replayable() || body_dropped) =>
            {
                warn!(host = uri.host(), error = %e, "direct connect blocked; trying NAT64");
                self.nat64_dispatch(
                    plan, uri, method, headers, body, body_dropped, ipv4, alpn_for_protocol,
                    headers_deadline, overall, cancel,
                )
                .await
            }
            Err(e) => Err(e),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_fast_h1(
        &self,
        plan: &DispatchPlan,
        uri: &Uri,
        method: &Method,
        headers: &Headers,
        body: &mut AttemptBody,
        body_dropped: bool,
        ipv4: &Option<Ipv4Addr>,
        is_cdn: bool,
        headers_deadline: Deadline,
        overall: Deadline,
        cancel: &CancellationToken,
    ) -> Result<Response, HttpClientError> {
        if is_cdn {
            // CDN hosts go through NAT64 with the owned TLS stack,
            // HTTP/1.1 only.
            return self
                .nat64_dispatch(
                    plan, uri, method, headers, body, body_dropped, ipv4, &[b"http/1.1"],
                    headers_deadline, overall, cancel,
                )
                .await;
        }
        // The platform path: TLS without any ALPN control.
        let platform = self
            .tls_attempt(
                plan, uri, method, headers, body, body_dropped, None, &[],
                headers_deadline, headers_deadline, cancel,
            )
            .await;
        match platform {
            Ok(response) => Ok(response),
            Err(e)
                if is_fast_h1_recoverable(&e)
                    && (body.is_replayable() || body_dropped)
                    && !cancel.is_cancelled() =>
            {
                debug!(error = %e, "platform tls failed; falling back to owned tls");
                if is_sandbox_blocked(&e) {
                    return self
                        .nat64_dispatch(
                            plan, uri, method, headers, body, body_dropped, ipv4,
                            &[b"http/1.1"], headers_deadline, overall, cancel,
                        )
                        .await;
                }
                self.tls_attempt(
                    plan, uri, method, headers, body, body_dropped, None, &[b"http/1.1"],
                    headers_deadline, headers_deadline, cancel,
                )
                .await
            }
            Err(e) => Err(e),
        }
    }

    /// A pooled HTTP/2 client if one is usable, else a fresh connection. A
    /// failure racing a GOAWAY between lookup and use counts as a pool
    /// miss and gets one fresh retry.
    #[allow(clippy::too_many_arguments)]
    async fn h2_via_pool_or_connect(
        &self,
        plan: &DispatchPlan,
        uri: &Uri,
        method: &Method,
        headers: &Headers,
        body: &mut AttemptBody,
        body_dropped: bool,
        connect_host: Option<&str>,
        alpn: &[&[u8]],
        headers_deadline: Deadline,
        cancel: &CancellationToken,
    ) -> Result<Response, HttpClientError> {
        let key = PoolKey::new(uri.host(), uri.port(), connect_host);
        if let Some(client) = self.inner.pool.get(&key) {
            let result = self
                .h2_request(
                    plan, &client, &key, uri, method, headers, body, body_dropped,
                    headers_deadline, cancel,
                )
                .await;
            match result {
                Ok(response) => return Ok(response),
                Err(e) if is_draining_race(&e) && (body.is_replayable() || body_dropped) => {
                    debug!(error = %e, "pooled connection raced shutdown; dialing fresh");
                }
                Err(e) => return Err(e),
            }
        }
        self.tls_attempt(
            plan, uri, method, headers, body, body_dropped, connect_host, alpn,
            headers_deadline, headers_deadline, cancel,
        )
        .await
    }

    /// Connects with TLS and dispatches on whatever ALPN settled.
    #[allow(clippy::too_many_arguments)]
    async fn tls_attempt(
        &self,
        plan: &DispatchPlan,
        uri: &Uri,
        method: &Method,
        headers: &Headers,
        body: &mut AttemptBody,
        body_dropped: bool,
        connect_host: Option<&str>,
        alpn: &[&[u8]],
        handshake_deadline: Deadline,
        headers_deadline: Deadline,
        cancel: &CancellationToken,
    ) -> Result<Response, HttpClientError> {
        let dial_host = connect_host.unwrap_or_else(|| uri.host());
        let stream = connect_tcp(dial_host, uri.port(), handshake_deadline, cancel).await?;
        let tls =
            TlsSession::handshake(stream, uri.host(), alpn, handshake_deadline, cancel).await?;

        let negotiated = tls.alpn().unwrap_or_else(|| "http/1.1".to_string());
        if alpn.len() == 1 && alpn[0] == b"h2" && negotiated != "h2" {
            return err_from_msg!(Connect, "the peer does not support http/2");
        }
        if !alpn.is_empty() {
            self.inner.memo.put(
                uri.host(),
                uri.port(),
                AlpnProtocol::from_token(&negotiated),
            );
        }
        if negotiated == "h2" {
            let key = PoolKey::new(uri.host(), uri.port(), connect_host);
            let client = spawn_connection(ByteStream::Tls(Box::new(tls)));
            ConnPool::insert(&self.inner.pool, key.clone(), client.clone());
            return self
                .h2_request(
                    plan, &client, &key, uri, method, headers, body, body_dropped,
                    headers_deadline, cancel,
                )
                .await;
        }
        self.h1_attempt(
            ByteStream::Tls(Box::new(tls)),
            plan,
            uri,
            method,
            headers,
            body,
            body_dropped,
            headers_deadline,
            cancel,
        )
        .await
    }

    /// One exchange on an HTTP/2 client.
    #[allow(clippy::too_many_arguments)]
    async fn h2_request(
        &self,
        plan: &DispatchPlan,
        client: &H2Client,
        key: &PoolKey,
        uri: &Uri,
        method: &Method,
        headers: &Headers,
        body: &mut AttemptBody,
        body_dropped: bool,
        headers_deadline: Deadline,
        cancel: &CancellationToken,
    ) -> Result<Response, HttpClientError> {
        // `:authority` carries the target in HTTP/2; a `host` header set by
        // an earlier redirect hop must not ride along.
        let mut h2_headers = headers.clone();
        h2_headers.remove("host");
        let head = H2RequestHead {
            method: method.as_str().to_string(),
            scheme: "https".to_string(),
            authority: uri.authority(),
            path: uri.path_and_query().to_string(),
            headers: h2_headers,
        };
        let send_body = if body_dropped {
            H2SendBody::Empty
        } else {
            body.h2_body()?
        };
        let parts = client
            .send_request(head, send_body, headers_deadline, cancel)
            .await?;

        let decoder = response_decoder(plan.decompress, parts.headers.get("content-encoding"));
        let release = Release::Repool {
            pool: self.inner.pool.clone(),
            key: key.clone(),
            client: client.clone(),
        };
        let response_body = ResponseBody::h2(
            parts.body,
            release,
            decoder,
            plan.body_timeout,
            cancel.clone(),
        );
        Ok(Response::new(
            parts.status,
            String::new(),
            parts.headers,
            "h2",
            response_body,
        ))
    }

    /// One exchange over an established H1 byte stream.
    #[allow(clippy::too_many_arguments)]
    async fn h1_attempt(
        &self,
        stream: ByteStream,
        plan: &DispatchPlan,
        uri: &Uri,
        method: &Method,
        headers: &Headers,
        body: &mut AttemptBody,
        body_dropped: bool,
        headers_deadline: Deadline,
        cancel: &CancellationToken,
    ) -> Result<Response, HttpClientError> {
        let send_body = if body_dropped {
            H1SendBody::Empty
        } else {
            body.h1_body()?
        };
        let exchange = exchange(
            stream,
            method,
            uri.path_and_query(),
            &uri.authority(),
            headers,
            send_body,
            headers_deadline,
            cancel,
        )
        .await?;

        Ok(build_h1_response(
            exchange.head,
            exchange.leftover,
            exchange.stream,
            method,
            plan.decompress,
            plan.body_timeout,
            cancel.clone(),
        ))
    }

    /// The NAT64 fallback: rank prefixes, synthesize candidates, run them
    /// serially or hedged.
    #[allow(clippy::too_many_arguments)]
    async fn nat64_dispatch(
        &self,
        plan: &DispatchPlan,
        uri: &Uri,
        method: &Method,
        headers: &Headers,
        body: &mut AttemptBody,
        body_dropped: bool,
        ipv4: &Option<Ipv4Addr>,
        alpn: &[&[u8]],
        headers_deadline: Deadline,
        _overall: Deadline,
        cancel: &CancellationToken,
    ) -> Result<Response, HttpClientError> {
        let Some(ipv4) = ipv4 else {
            return err_from_msg!(
                Nat64Exhausted,
                "no IPv4 address available for NAT64 synthesis"
            );
        };
        let prefixes: Vec<&str> = self
            .inner
            .nat64_prefixes
            .iter()
            .map(|p| p.as_str())
            .collect();
        let ranked = self.inner.nat64.rank(&prefixes);
        let candidates: Vec<String> = ranked
            .iter()
            .take(NAT64_CANDIDATES)
            .map(|prefix| synthesize_nat64(*ipv4, prefix))
            .collect();
        let chosen: Vec<(String, String)> = ranked
            .iter()
            .take(NAT64_CANDIDATES)
            .cloned()
            .zip(candidates)
            .collect();
        if chosen.is_empty() {
            return err_from_msg!(Nat64Exhausted, "no NAT64 prefixes configured");
        }

        let replayable = (body.is_replayable() || body_dropped) && !matches!(body, AttemptBody::Stream(_));
        let hedge_allowed = method.is_idempotent() && replayable && chosen.len() >= 2;

        if !hedge_allowed {
            // Strict serial: a connection-level failure is the only state
            // in which resending the body is safe.
            let serial = if replayable { chosen.len() } else { 1 };
            let mut last_error = None;
            for (prefix, literal) in chosen.iter().take(serial) {
                match self
                    .nat64_candidate(
                        plan, uri, method, headers, body, body_dropped, prefix, literal, alpn,
                        headers_deadline, cancel,
                    )
                    .await
                {
                    Ok(response) => return Ok(response),
                    Err(e) => last_error = Some(e),
                }
            }
            let last = last_error.unwrap();
            return Err(HttpClientError::from_message(
                ErrorKind::Nat64Exhausted,
                format!("all NAT64 candidates failed; last: {last}"),
            ));
        }

        self.nat64_hedged(
            plan, uri, method, headers, body, body_dropped, &chosen, alpn, headers_deadline,
            cancel,
        )
        .await
    }

    /// One NAT64 candidate attempt, health-recorded.
    #[allow(clippy::too_many_arguments)]
    async fn nat64_candidate(
        &self,
        plan: &DispatchPlan,
        uri: &Uri,
        method: &Method,
        headers: &Headers,
        body: &mut AttemptBody,
        body_dropped: bool,
        prefix: &str,
        literal: &str,
        alpn: &[&[u8]],
        headers_deadline: Deadline,
        cancel: &CancellationToken,
    ) -> Result<Response, HttpClientError> {
        let started = Instant::now();
        let connect_guard = headers_deadline.earliest(Deadline::after(Some(NAT64_CONNECT_GUARD)));
        let result = self
            .h2_via_pool_or_connect_guarded(
                plan, uri, method, headers, body, body_dropped, literal, alpn, connect_guard,
                headers_deadline, cancel,
            )
            .await;
        let elapsed = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => self.inner.nat64.record(prefix, true, elapsed),
            Err(e) if e.is_user_aborted() => {
                // A hedge loser, or the caller's own cancel; neither is
                // the gateway's fault.
            }
            Err(_) => self.inner.nat64.record(prefix, false, elapsed),
        }
        result
    }

    /// NAT64 connect path: pool first (keyed by the literal), then a fresh
    /// TLS dial under the per-prefix connect guard.
    #[allow(clippy::too_many_arguments)]
    async fn h2_via_pool_or_connect_guarded(
        &self,
        plan: &DispatchPlan,
        uri: &Uri,
        method: &Method,
        headers: &Headers,
        body: &mut AttemptBody,
        body_dropped: bool,
        literal: &str,
        alpn: &[&[u8]],
        connect_guard: Deadline,
        headers_deadline: Deadline,
        cancel: &CancellationToken,
    ) -> Result<Response, HttpClientError> {
        let key = PoolKey::new(uri.host(), uri.port(), Some(literal));
        if let Some(client) = self.inner.pool.get(&key) {
            let result = self
                .h2_request(
                    plan, &client, &key, uri, method, headers, body, body_dropped,
                    headers_deadline, cancel,
                )
                .await;
            match result {
                Ok(response) => return Ok(response),
                Err(e) if is_draining_race(&e) && (body.is_replayable() || body_dropped) => {
                    debug!(error = %e, "pooled nat64 connection raced shutdown; dialing fresh");
                }
                Err(e) => return Err(e),
            }
        }
        self.tls_attempt(
            plan, uri, method, headers, body, body_dropped, Some(literal), alpn, connect_guard,
            headers_deadline, cancel,
        )
        .await
    }

    /// Hedged NAT64: candidate 0 gets a head start; candidate 1 launches
    /// in parallel after the hedge delay; the first usable response wins
    /// and the loser is cancelled with a reason health does not count.
    /// Remaining candidates run serially if both racers fail.
    #[allow(clippy::too_many_arguments)]
    async fn nat64_hedged(
        &self,
        plan: &DispatchPlan,
        uri: &Uri,
        method: &Method,
        headers: &Headers,
        body: &mut AttemptBody,
        body_dropped: bool,
        chosen: &[(String, String)],
        alpn: &[&[u8]],
        headers_deadline: Deadline,
        cancel: &CancellationToken,
    ) -> Result<Response, HttpClientError> {
        let buffer = match body {
            AttemptBody::Empty => None,
            AttemptBody::Buffer(data) => Some(data.clone()),
            AttemptBody::Stream(_) => unreachable!("stream bodies never hedge"),
        };
        let alpn_owned: Vec<Vec<u8>> = alpn.iter().map(|p| p.to_vec()).collect();

        let spawn_candidate = |index: usize, hedge_cancel: CancellationToken| {
            let engine = self.clone();
            let plan = plan.clone();
            let uri = uri.clone();
            let method = method.clone();
            let headers = headers.clone();
            let buffer = buffer.clone();
            let (prefix, literal) = chosen[index].clone();
            let alpn = alpn_owned.clone();
            tokio::spawn(async move {
                let mut body = match buffer {
                    Some(data) => AttemptBody::Buffer(data),
                    None => AttemptBody::Empty,
                };
                let alpn_refs: Vec<&[u8]> = alpn.iter().map(|p| p.as_slice()).collect();
                engine
                    .nat64_candidate(
                        &plan, &uri, &method, &headers, &mut body, body_dropped, &prefix,
                        &literal, &alpn_refs, headers_deadline, &hedge_cancel,
                    )
                    .await
            })
        };

        let cancel_first = cancel.child_token();
        let cancel_second = cancel.child_token();
        let mut first = spawn_candidate(0, cancel_first.clone());

        let first_result = tokio::select! {
            joined = &mut first => Some(flatten_join(joined)),
            _ = tokio::time::sleep(HEDGE_DELAY) => None,
        };
        let (winner, loser_cancel) = match first_result {
            Some(Ok(response)) => return Ok(response),
            Some(Err(_first_error)) => {
                // The head start failed before the hedge launched; just
                // run the second candidate in its place.
                let second = spawn_candidate(1, cancel_second.clone());
                (flatten_join(second.await), None)
            }
            None => {
                let mut second = spawn_candidate(1, cancel_second.clone());
                let raced = tokio::select! {
                    joined = &mut first => Either::First(flatten_join(joined)),
                    joined = &mut second => Either::Second(flatten_join(joined)),
                };
                match raced {
                    Either::First(Ok(response)) => {
                        // Loser gets a distinct cancellation so it is not
                        // recorded as a NAT64 failure; if it completes
                        // anyway its body is dropped and cancelled.
                        cancel_second.cancel();
                        drop_loser(second);
                        return Ok(response);
                    }
                    Either::Second(Ok(response)) => {
                        cancel_first.cancel();
                        drop_loser(first);
                        return Ok(response);
                    }
                    Either::First(Err(_)) => (flatten_join(second.await), Some(cancel_first)),
                    Either::Second(Err(_)) => (flatten_join(first.await), Some(cancel_second)),
                }
            }
        };
        drop(loser_cancel);
        match winner {
            Ok(response) => Ok(response),
            Err(mut last) => {
                // Both racers failed; the rest of the list runs serially.
                for (prefix, literal) in chosen.iter().skip(2) {
                    match self
                        .nat64_candidate(
                            plan, uri, method, headers, body, body_dropped, prefix, literal,
                            &alpn_owned.iter().map(|p| p.as_slice()).collect::<Vec<_>>(),
                            headers_deadline, cancel,
                        )
                        .await
                    {
                        Ok(response) => return Ok(response),
                        Err(e) => last = e,
                    }
                }
                Err(HttpClientError::from_message(
                    ErrorKind::Nat64Exhausted,
                    format!("all NAT64 candidates failed; last: {last}"),
                ))
            }
        }
    }
}

/// The per-request options that travel through the dispatch.
#[derive(Clone)]
struct DispatchPlan {
    method: Method,
    uri: Uri,
    headers: Headers,
    redirect: RedirectPolicy,
    max_redirects: usize,
    headers_timeout: Option<Duration>,
    body_timeout: Option<Duration>,
    decompress: bool,
    protocol: Protocol,
    strategy: Strategy,
}

/// The body as the attempt machinery sees it.
enum AttemptBody {
    Empty,
    Buffer(Vec<u8>),
    Stream(Option<Box<dyn AsyncRead + Send + Unpin + 'static>>),
}

impl AttemptBody {
    fn is_replayable(&self) -> bool {
        !matches!(self, AttemptBody::Stream(_))
    }

    fn h1_body(&mut self) -> Result<H1SendBody<'_>, HttpClientError> {
        Ok(match self {
            AttemptBody::Empty => H1SendBody::Empty,
            AttemptBody::Buffer(data) => H1SendBody::Buffer(data),
            AttemptBody::Stream(reader) => {
                let reader = reader.as_mut().ok_or_else(|| {
                    HttpClientError::from_str(
                        ErrorKind::Request,
                        "stream body already consumed by an earlier attempt",
                    )
                })?;
                H1SendBody::Stream(reader)
            }
        })
    }

    fn h2_body(&mut self) -> Result<H2SendBody, HttpClientError> {
        Ok(match self {
            AttemptBody::Empty => H2SendBody::Empty,
            AttemptBody::Buffer(data) => H2SendBody::Buffer(data.clone()),
            AttemptBody::Stream(reader) => {
                let reader = reader.take().ok_or_else(|| {
                    HttpClientError::from_str(
                        ErrorKind::Request,
                        "stream body already consumed by an earlier attempt",
                    )
                })?;
                H2SendBody::Stream(reader)
            }
        })
    }
}

enum Either<A, B> {
    First(A),
    Second(B),
}

fn flatten_join(
    joined: Result<Result<Response, HttpClientError>, tokio::task::JoinError>,
) -> Result<Response, HttpClientError> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(HttpClientError::from_message(
            ErrorKind::Other,
            format!("nat64 attempt task failed: {e}"),
        )),
    }
}

/// Lets a cancelled hedge loser finish in the background so its response,
/// if any, is cancelled rather than leaked.
fn drop_loser(handle: tokio::task::JoinHandle<Result<Response, HttpClientError>>) {
    tokio::spawn(async move {
        if let Ok(Ok(mut response)) = handle.await {
            response.cancel();
        }
    });
}

fn is_sandbox_blocked(error: &HttpClientError) -> bool {
    if error.error_kind() == ErrorKind::SandboxBlocked {
        return true;
    }
    let cause = error.cause_string();
    SANDBOX_BLOCKED_ERRORS.iter().any(|s| cause.contains(s))
}

fn is_fast_h1_recoverable(error: &HttpClientError) -> bool {
    let cause = error.cause_string();
    FAST_H1_FALLBACK_ERRORS.iter().any(|s| cause.contains(s)) || is_sandbox_blocked(error)
}

/// Whether an HTTP/2 failure looks like the pooled-connection GOAWAY race.
fn is_draining_race(error: &HttpClientError) -> bool {
    let cause = error.cause_string();
    cause.contains("draining")
        || cause.contains("connection is closed")
        || cause.contains("connection closed")
        || cause.contains("refused by GOAWAY")
}

fn response_decoder(decompress: bool, encoding: Option<String>) -> Option<ContentDecoder> {
    if !decompress {
        return None;
    }
    encoding.and_then(|token| ContentDecoder::from_encoding(&token))
}

fn build_h1_response(
    head: ResponseHead,
    leftover: Bytes,
    stream: ByteStream,
    method: &Method,
    decompress: bool,
    body_timeout: Option<Duration>,
    cancel: CancellationToken,
) -> Response {
    // HEAD responses and 204/304 carry no body regardless of their
    // framing headers.
    let bodyless = *method == Method::HEAD || head.status == 204 || head.status == 304;
    let framing = if bodyless {
        H1Framing::ContentLength { remaining: 0 }
    } else {
        match body_framing(&head) {
            BodyFraming::Chunked => H1Framing::Chunked(ChunkedDecoder::new()),
            BodyFraming::ContentLength(len) => H1Framing::ContentLength { remaining: len },
            BodyFraming::UntilClose => H1Framing::UntilClose,
        }
    };
    let decoder = response_decoder(decompress, head.headers.get("content-encoding"));
    let body = ResponseBody::h1(stream, framing, leftover, decoder, body_timeout, cancel);
    Response::new(head.status, head.reason, head.headers, "http1", body)
}
