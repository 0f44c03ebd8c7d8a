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

//! DNS-over-HTTPS resolution and CDN classification.
//!
//! One A-record query per uncached hostname, single-flighted so concurrent
//! callers share a result. The resolved address is classified against a
//! static list of CDN IPv4 ranges; a CDN-classified host is one the sandbox
//! will refuse to dial directly, which routes the request through NAT64.
//!
//! A DoH failure is cached for ten seconds as "unknown, try direct" so a
//! broken resolver cannot add a round trip to every request. The swallow is
//! counted and observable.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use egress_http::h1::decoder::{body_framing, BodyFraming, ResponseDecoder};
use egress_http::h1::encoder::{encode_request_head, BodyLength};
use egress_http::headers::Headers;
use egress_http::method::Method;
use egress_http::uri::Uri;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ErrorKind, HttpClientError};
use crate::timeout::Deadline;
use crate::tls::TlsSession;
use crate::transport::connect_tcp;

/// Guard on one DoH round trip, connect and TLS included.
const DOH_GUARD: Duration = Duration::from_secs(3);

/// TTL clamp for positive entries.
const MIN_TTL: Duration = Duration::from_secs(30);
const MAX_TTL: Duration = Duration::from_secs(300);

/// Negative (DoH failure) entries retry after this long.
const NEGATIVE_TTL: Duration = Duration::from_secs(10);

const fn ip(a: u8, b: u8, c: u8, d: u8) -> u32 {
    (a as u32) << 24 | (b as u32) << 16 | (c as u32) << 8 | d as u32
}

/// Known CDN IPv4 ranges as inclusive `[start, end]` pairs.
const KNOWN_CDN_RANGES: [(u32, u32); 15] = [
    (ip(103, 21, 244, 0), ip(103, 21, 247, 255)),
    (ip(103, 22, 200, 0), ip(103, 22, 203, 255)),
    (ip(103, 31, 4, 0), ip(103, 31, 7, 255)),
    (ip(104, 16, 0, 0), ip(104, 23, 255, 255)),
    (ip(104, 24, 0, 0), ip(104, 27, 255, 255)),
    (ip(108, 162, 192, 0), ip(108, 162, 255, 255)),
    (ip(131, 0, 72, 0), ip(131, 0, 75, 255)),
    (ip(141, 101, 64, 0), ip(141, 101, 127, 255)),
    (ip(162, 158, 0, 0), ip(162, 159, 255, 255)),
    (ip(172, 64, 0, 0), ip(172, 71, 255, 255)),
    (ip(173, 245, 48, 0), ip(173, 245, 63, 255)),
    (ip(188, 114, 96, 0), ip(188, 114, 111, 255)),
    (ip(190, 93, 240, 0), ip(190, 93, 255, 255)),
    (ip(197, 234, 240, 0), ip(197, 234, 243, 255)),
    (ip(198, 41, 128, 0), ip(198, 41, 255, 255)),
];

/// Whether an IPv4 address falls in a known CDN range.
pub(crate) fn is_cdn_ipv4(addr: Ipv4Addr) -> bool {
    let value = u32::from(addr);
    KNOWN_CDN_RANGES
        .iter()
        .any(|(start, end)| (*start..=*end).contains(&value))
}

/// The DoH resolver endpoint.
///
/// # Examples
///
/// ```
/// use egress_http_client::DohResolver;
///
/// let resolver = DohResolver::new("https://1.1.1.1/dns-query").unwrap();
/// ```
#[derive(Clone, Debug)]
pub struct DohResolver {
    host: String,
    port: u16,
    path: String,
}

impl DohResolver {
    /// Parses a resolver URL. An IP-literal host avoids recursive lookups.
    pub fn new(url: &str) -> Result<Self, HttpClientError> {
        let uri = Uri::parse(url)
            .map_err(|e| HttpClientError::from_message(ErrorKind::Build, format!("invalid resolver url: {e}")))?;
        Ok(Self {
            host: uri.host().to_string(),
            port: uri.port(),
            path: uri.path().to_string(),
        })
    }
}

impl Default for DohResolver {
    fn default() -> Self {
        Self {
            host: "1.1.1.1".to_string(),
            port: 443,
            path: "/dns-query".to_string(),
        }
    }
}

#[derive(Deserialize)]
struct DohResponse {
    #[serde(rename = "Answer")]
    answer: Option<Vec<DohAnswer>>,
}

#[derive(Deserialize)]
struct DohAnswer {
    #[serde(rename = "type")]
    rtype: u16,
    #[serde(rename = "TTL")]
    ttl: Option<u64>,
    data: String,
}

/// One resolved-and-classified hostname.
#[derive(Clone, Debug)]
pub(crate) struct DnsEntry {
    pub(crate) ipv4: Option<Ipv4Addr>,
    pub(crate) is_cdn: bool,
    /// How long the DoH round trip took, in milliseconds.
    pub(crate) last_doh_ms: u64,
}

struct CachedEntry {
    entry: DnsEntry,
    expires_at: Instant,
}

enum Slot {
    Ready(CachedEntry),
    Pending(broadcast::Sender<DnsEntry>),
}

/// Single-flight cache of DNS lookups and CDN classifications.
pub struct DnsCache {
    resolver: DohResolver,
    slots: Mutex<HashMap<String, Slot>>,
    doh_failures: AtomicU64,
}

impl DnsCache {
    pub(crate) fn new(resolver: DohResolver) -> Self {
        Self {
            resolver,
            slots: Mutex::new(HashMap::new()),
            doh_failures: AtomicU64::new(0),
        }
    }

    /// How many DoH failures have been swallowed as "unknown, try direct".
    pub fn doh_failure_count(&self) -> u64 {
        self.doh_failures.load(Ordering::Relaxed)
    }

    /// Drops every cached entry. In-flight lookups complete unaffected.
    pub fn clear(&self) {
        let mut slots = self.slots.lock().unwrap();
        slots.retain(|_, slot| matches!(slot, Slot::Pending(_)));
    }

    /// Resolves and classifies `hostname`, deduplicating concurrent callers
    /// onto one in-flight DoH query.
    pub(crate) async fn lookup(&self, hostname: &str) -> DnsEntry {
        // An IP literal classifies without resolution and never caches.
        if let Ok(addr) = hostname.parse::<Ipv4Addr>() {
            return DnsEntry {
                ipv4: Some(addr),
                is_cdn: is_cdn_ipv4(addr),
                last_doh_ms: 0,
            };
        }
        let key = hostname.to_ascii_lowercase();
        enum Wait {
            Cached(DnsEntry),
            Join(broadcast::Receiver<DnsEntry>),
            Own,
        }
        loop {
            let wait = {
                let mut slots = self.slots.lock().unwrap();
                let decided = match slots.get(&key) {
                    Some(Slot::Ready(cached)) if cached.expires_at > Instant::now() => {
                        Wait::Cached(cached.entry.clone())
                    }
                    Some(Slot::Pending(tx)) => Wait::Join(tx.subscribe()),
                    _ => Wait::Own,
                };
                if matches!(decided, Wait::Own) {
                    let (tx, _) = broadcast::channel(1);
                    slots.insert(key.clone(), Slot::Pending(tx));
                }
                decided
            };
            match wait {
                Wait::Cached(entry) => return entry,
                Wait::Own => return self.run_flight(&key).await,
                Wait::Join(mut rx) => match rx.recv().await {
                    Ok(entry) => return entry,
                    // The flight owner was dropped; take over.
                    Err(_) => continue,
                },
            }
        }
    }

    async fn run_flight(&self, key: &str) -> DnsEntry {
        // Cleans the pending slot up if this future is dropped mid-flight,
        // so waiters re-run instead of hanging.
        struct FlightGuard<'a> {
            cache: &'a DnsCache,
            key: &'a str,
            done: bool,
        }
        impl Drop for FlightGuard<'_> {
            fn drop(&mut self) {
                if !self.done {
                    let mut slots = self.cache.slots.lock().unwrap();
                    if let Some(Slot::Pending(_)) = slots.get(self.key) {
                        slots.remove(self.key);
                    }
                }
            }
        }
        let mut guard = FlightGuard {
            cache: self,
            key,
            done: false,
        };

        let started = Instant::now();
        let outcome = tokio::time::timeout(DOH_GUARD, self.doh_query(key)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let (entry, ttl) = match outcome {
            Ok(Ok(response)) => {
                let a_record = response
                    .answer
                    .unwrap_or_default()
                    .into_iter()
                    .find(|answer| answer.rtype == 1 && answer.data.parse::<Ipv4Addr>().is_ok());
                match a_record {
                    Some(answer) => {
                        let addr: Ipv4Addr = answer.data.parse().unwrap();
                        let ttl = Duration::from_secs(answer.ttl.unwrap_or(0))
                            .clamp(MIN_TTL, MAX_TTL);
                        let entry = DnsEntry {
                            ipv4: Some(addr),
                            is_cdn: is_cdn_ipv4(addr),
                            last_doh_ms: elapsed_ms,
                        };
                        debug!(host = key, ip = %addr, cdn = entry.is_cdn, elapsed_ms, "doh resolved");
                        (entry, ttl)
                    }
                    None => {
                        // Resolvable but no A record: treat like direct.
                        let entry = DnsEntry {
                            ipv4: None,
                            is_cdn: false,
                            last_doh_ms: elapsed_ms,
                        };
                        (entry, MIN_TTL)
                    }
                }
            }
            _ => {
                self.doh_failures.fetch_add(1, Ordering::Relaxed);
                warn!(host = key, elapsed_ms, "doh query failed; assuming direct for 10s");
                let entry = DnsEntry {
                    ipv4: None,
                    is_cdn: false,
                    last_doh_ms: elapsed_ms,
                };
                (entry, NEGATIVE_TTL)
            }
        };

        let mut slots = self.slots.lock().unwrap();
        let previous = slots.insert(
            key.to_string(),
            Slot::Ready(CachedEntry {
                entry: entry.clone(),
                expires_at: Instant::now() + ttl,
            }),
        );
        guard.done = true;
        drop(slots);
        if let Some(Slot::Pending(tx)) = previous {
            let _ = tx.send(entry.clone());
        }
        entry
    }

    /// One `GET /dns-query?name=<host>&type=A` exchange with the resolver.
    async fn doh_query(&self, hostname: &str) -> Result<DohResponse, HttpClientError> {
        let cancel = CancellationToken::new();
        let stream = connect_tcp(&self.resolver.host, self.resolver.port, Deadline::none(), &cancel).await?;
        let mut tls = TlsSession::handshake(
            stream,
            &self.resolver.host,
            &[b"http/1.1"],
            Deadline::none(),
            &cancel,
        )
        .await?;

        let mut headers = Headers::new();
        let _ = headers.set("accept", "application/dns-json");
        let path = format!("{}?name={}&type=A", self.resolver.path, hostname);
        let authority = if self.resolver.port == 443 {
            self.resolver.host.clone()
        } else {
            format!("{}:{}", self.resolver.host, self.resolver.port)
        };
        let (head, _) = encode_request_head(
            &Method::GET,
            &path,
            &authority,
            &headers,
            BodyLength::Empty,
        )
        .map_err(|e| HttpClientError::from_error(ErrorKind::Request, e))?;
        tls.write_all(&head)
            .await
            .map_err(|e| HttpClientError::from_io_error(ErrorKind::Request, e))?;
        tls.flush()
            .await
            .map_err(|e| HttpClientError::from_io_error(ErrorKind::Request, e))?;

        // `connection: close` is the serializer default, so everything up
        // to EOF is this one response.
        let mut wire = Vec::with_capacity(4096);
        let mut buf = [0u8; 4096];
        loop {
            let n = tls
                .read(&mut buf)
                .await
                .map_err(|e| HttpClientError::from_io_error(ErrorKind::Request, e))?;
            if n == 0 {
                break;
            }
            wire.extend_from_slice(&buf[..n]);
        }

        let mut decoder = ResponseDecoder::new();
        let (head, leftover) = decoder
            .decode(&wire)
            .map_err(|e| HttpClientError::from_error(ErrorKind::Request, e))?
            .ok_or_else(|| {
                HttpClientError::from_str(ErrorKind::Request, "truncated doh response")
            })?;
        if head.status != 200 {
            return err_from_msg!(Request, "doh resolver returned a non-200 status");
        }
        let body = match body_framing(&head) {
            BodyFraming::ContentLength(len) => {
                let len = (len as usize).min(leftover.len());
                leftover[..len].to_vec()
            }
            BodyFraming::Chunked => {
                let mut chunked = egress_http::h1::chunked::ChunkedDecoder::new();
                let mut body = Vec::new();
                chunked
                    .decode(&leftover, &mut body)
                    .map_err(|e| HttpClientError::from_error(ErrorKind::Request, e))?;
                body
            }
            BodyFraming::UntilClose => leftover.to_vec(),
        };
        serde_json::from_slice(&body)
            .map_err(|e| HttpClientError::from_error(ErrorKind::Request, e))
    }
}
