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

//! The byte socket: a duplex byte pipe over the host's TCP primitive.
//!
//! Construction races the connect against a fixed guard and the caller's
//! cancellation; a lost race tears down whatever was partially created
//! (dropping the pending connect future closes its half-open socket).

use std::net::{IpAddr, Ipv6Addr};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ErrorKind, HttpClientError};
use crate::timeout::{guarded, Deadline};

/// Guard on TCP establishment, independent of the caller's own timeouts.
const CONNECT_GUARD: Duration = Duration::from_secs(30);

/// Opens a TCP connection to `host:port` under the connect guard, the
/// caller's deadline and the caller's cancellation.
///
/// `host` may be a hostname, an IPv4 literal or a bracketed IPv6 literal
/// (the shape NAT64 synthesis produces).
pub(crate) async fn connect_tcp(
    host: &str,
    port: u16,
    deadline: Deadline,
    cancel: &CancellationToken,
) -> Result<TcpStream, HttpClientError> {
    let guard = deadline.earliest(Deadline::after(Some(CONNECT_GUARD)));
    let stream = guarded(guard, cancel, "connect timeout", async {
        let stream = match parse_ip_literal(host) {
            Some(addr) => TcpStream::connect((addr, port)).await,
            None => TcpStream::connect((host, port)).await,
        };
        stream.map_err(|e| HttpClientError::from_io_error(ErrorKind::Connect, e))
    })
    .await?;
    // Interactive request/response traffic; never batch small writes.
    let _ = stream.set_nodelay(true);
    debug!(host, port, "tcp connected");
    Ok(stream)
}

/// A duplex byte pipe: plain TCP for `http` origins, a TLS session for
/// `https` origins. H1 responses own one of these until the body settles.
#[derive(Debug)]
pub(crate) enum ByteStream {
    Tcp(TcpStream),
    Tls(Box<crate::tls::TlsSession<TcpStream>>),
}

impl tokio::io::AsyncRead for ByteStream {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            ByteStream::Tcp(stream) => std::pin::Pin::new(stream).poll_read(cx, buf),
            ByteStream::Tls(session) => std::pin::Pin::new(session.as_mut()).poll_read(cx, buf),
        }
    }
}

impl tokio::io::AsyncWrite for ByteStream {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        match self.get_mut() {
            ByteStream::Tcp(stream) => std::pin::Pin::new(stream).poll_write(cx, buf),
            ByteStream::Tls(session) => std::pin::Pin::new(session.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            ByteStream::Tcp(stream) => std::pin::Pin::new(stream).poll_flush(cx),
            ByteStream::Tls(session) => std::pin::Pin::new(session.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            ByteStream::Tcp(stream) => std::pin::Pin::new(stream).poll_shutdown(cx),
            ByteStream::Tls(session) => std::pin::Pin::new(session.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Parses `host` as an IP literal, unwrapping IPv6 brackets.
fn parse_ip_literal(host: &str) -> Option<IpAddr> {
    if let Some(inner) = host.strip_prefix('[') {
        let inner = inner.strip_suffix(']')?;
        return inner.parse::<Ipv6Addr>().ok().map(IpAddr::V6);
    }
    host.parse::<IpAddr>().ok()
}

#[cfg(test)]
mod ut_transport {
    use super::*;

    /// UT test cases for `parse_ip_literal`.
    ///
    /// # Brief
    /// 1. Parses IPv4, bracketed IPv6 and hostname inputs.
    /// 2. Checks literals parse and hostnames fall through.
    #[test]
    fn ut_parse_ip_literal() {
        assert_eq!(
            parse_ip_literal("127.0.0.1"),
            Some(IpAddr::V4([127, 0, 0, 1].into()))
        );
        assert!(matches!(
            parse_ip_literal("[2602:fc59:b0:64::6810:1]"),
            Some(IpAddr::V6(_))
        ));
        assert_eq!(parse_ip_literal("example.com"), None);
        assert_eq!(parse_ip_literal("[not-v6]"), None);
    }

    /// UT test cases for connecting to a live listener.
    ///
    /// # Brief
    /// 1. Binds a listener and connects to it.
    /// 2. Checks the connect succeeds within the guard.
    #[tokio::test]
    async fn ut_connect_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let stream = connect_tcp(
            &addr.ip().to_string(),
            addr.port(),
            Deadline::none(),
            &cancel,
        )
        .await
        .unwrap();
        assert!(stream.peer_addr().is_ok());
    }

    /// UT test cases for pre-cancelled connects.
    ///
    /// # Brief
    /// 1. Cancels the token before connecting.
    /// 2. Checks the connect reports UserAborted without racing the dial.
    #[tokio::test]
    async fn ut_connect_tcp_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = connect_tcp("127.0.0.1", 9, Deadline::none(), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_user_aborted());
    }
}
