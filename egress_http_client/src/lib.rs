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

//! `egress_http_client` is a client-side HTTPS engine for sandboxed hosts
//! that expose only a raw TCP connect primitive. It runs its own HTTP/1.1
//! and HTTP/2 stacks over sockets it owns, drives TLS through a sans-I/O
//! engine so the ALPN outcome is under its control, and transparently
//! reaches hosts the sandbox refuses to connect to by rewriting the connect
//! hostname through public NAT64 translation gateways.
//!
//! # Supported HTTP Version
//! - HTTP/1.1
//! - HTTP/2

// egress_http crate re-export.
pub use egress_http::headers::Headers;
pub use egress_http::method::Method;
pub use egress_http::uri::{Scheme, Uri};

#[macro_use]
mod error;

mod alpn_memo;
mod body;
mod client;
mod compress;
mod conn;
mod dns;
mod h2_conn;
mod nat64;
mod normalizer;
mod pool;
mod redirect;
mod request;
mod response;
mod retry;
mod timeout;
mod tls;
mod transport;

pub use client::{Client, ClientBuilder};
pub use dns::DohResolver;
pub use error::{ErrorKind, HttpClientError};
pub use nat64::{synthesize_nat64, Nat64PrefixStats};
pub use request::{
    Body, Protocol, RedirectPolicy, Request, RequestBuilder, RetryPolicy, Strategy,
};
pub use response::Response;
