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

//! TLS session: a sans-I/O `rustls` engine driven against a byte socket.
//!
//! The driver owns both the engine and the socket, so there is no cyclic
//! ownership: ciphertext moves in one direction at a time, and the state
//! machine advances on each network event.
//!
//! Two phases share one engine. The handshake phase pumps ClientHello and
//! the following flights until `is_handshaking` clears, at which point the
//! negotiated ALPN is fixed. The session phase is the [`AsyncRead`] /
//! [`AsyncWrite`] implementation: reads decrypt into a bounded plaintext
//! buffer (the pump pauses at the high-water mark and resumes below the
//! low-water mark), writes encrypt and forward, shutdown sends close_notify
//! before closing the socket.

use std::io::{self, Read, Write};
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use rustls::client::Resumption;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ErrorKind, HttpClientError};
use crate::timeout::{guarded, Deadline};

/// The session pump stops reading the socket once this much decrypted
/// plaintext is queued.
const PLAINTEXT_HIGH_WATER: usize = 64 * 1024;

/// The pump resumes once the queue drains below this.
const PLAINTEXT_LOW_WATER: usize = 16 * 1024;

/// Ceiling on buffered outgoing ciphertext before writes report Pending.
const MAX_OUTGOING_TLS: usize = 256 * 1024;

fn root_store() -> Arc<RootCertStore> {
    static ROOTS: OnceLock<Arc<RootCertStore>> = OnceLock::new();
    ROOTS
        .get_or_init(|| {
            Arc::new(RootCertStore::from_iter(
                webpki_roots::TLS_SERVER_ROOTS.iter().cloned(),
            ))
        })
        .clone()
}

fn client_config(alpn: &[&[u8]]) -> Arc<ClientConfig> {
    let mut config = ClientConfig::builder()
        .with_root_certificates((*root_store()).clone())
        .with_no_client_auth();
    config.resumption = Resumption::in_memory_sessions(256);
    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
    Arc::new(config)
}

/// A TLS session over a byte socket `S`.
pub(crate) struct TlsSession<S> {
    stream: S,
    conn: ClientConnection,
    /// Decrypted plaintext awaiting the consumer.
    plaintext: Vec<u8>,
    /// Ciphertext produced by the engine awaiting the socket.
    outgoing: Vec<u8>,
    /// A pump failure observed while plaintext was still queued; surfaced
    /// once the queue drains.
    deferred_error: Option<io::Error>,
    peer_closed: bool,
    close_notify_sent: bool,
}

impl<S> TlsSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Runs the TLS handshake over `stream`.
    ///
    /// `server_name` is the logical hostname: it feeds SNI and certificate
    /// validation even when the socket was dialed to a NAT64 literal.
    /// `alpn` is the caller-provided protocol preference list; an empty list
    /// sends no ALPN extension at all.
    pub(crate) async fn handshake(
        mut stream: S,
        server_name: &str,
        alpn: &[&[u8]],
        deadline: Deadline,
        cancel: &CancellationToken,
    ) -> Result<Self, HttpClientError> {
        let host = server_name
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(server_name);
        let name = ServerName::try_from(host.to_string())
            .map_err(|e| HttpClientError::from_message(ErrorKind::Connect, format!("invalid server name: {e}")))?;
        let mut conn = ClientConnection::new(client_config(alpn), name)
            .map_err(|e| HttpClientError::from_message(ErrorKind::Connect, format!("tls setup: {e}")))?;

        guarded(deadline, cancel, "tls handshake timeout", async {
            let mut buf = [0u8; 16 * 1024];
            loop {
                while conn.wants_write() {
                    let mut out = Vec::with_capacity(4096);
                    conn.write_tls(&mut out)
                        .map_err(|e| HttpClientError::from_io_error(ErrorKind::Connect, e))?;
                    stream
                        .write_all(&out)
                        .await
                        .map_err(|e| HttpClientError::from_io_error(ErrorKind::Connect, e))?;
                    stream
                        .flush()
                        .await
                        .map_err(|e| HttpClientError::from_io_error(ErrorKind::Connect, e))?;
                }
                if !conn.is_handshaking() {
                    break;
                }
                let n = stream
                    .read(&mut buf)
                    .await
                    .map_err(|e| HttpClientError::from_io_error(ErrorKind::Connect, e))?;
                if n == 0 {
                    return err_from_msg!(Connect, "peer closed during tls handshake");
                }
                let mut cursor = &buf[..n];
                while !cursor.is_empty() {
                    let read = conn
                        .read_tls(&mut cursor)
                        .map_err(|e| HttpClientError::from_io_error(ErrorKind::Connect, e))?;
                    if read == 0 {
                        break;
                    }
                    conn.process_new_packets().map_err(|e| {
                        HttpClientError::from_message(ErrorKind::Connect, format!("tls error: {e}"))
                    })?;
                }
            }
            Ok(())
        })
        .await?;

        debug!(server_name, alpn = ?conn.alpn_protocol().map(String::from_utf8_lossy), "tls handshake complete");
        let mut session = Self {
            stream,
            conn,
            plaintext: Vec::new(),
            outgoing: Vec::new(),
            deferred_error: None,
            peer_closed: false,
            close_notify_sent: false,
        };
        // Application data may ride the same flight as the server Finished.
        session.drain_engine_plaintext()?;
        Ok(session)
    }

    /// Returns the negotiated ALPN protocol, if any.
    pub(crate) fn alpn(&self) -> Option<String> {
        self.conn
            .alpn_protocol()
            .map(|p| String::from_utf8_lossy(p).to_string())
    }
}

impl<S> TlsSession<S> {
    /// Moves every decrypted byte out of the engine into the plaintext
    /// queue.
    fn drain_engine_plaintext(&mut self) -> Result<(), HttpClientError> {
        let state = self.conn.process_new_packets().map_err(|e| {
            HttpClientError::from_message(ErrorKind::Request, format!("tls error: {e}"))
        })?;
        let pending = state.plaintext_bytes_to_read();
        if pending > 0 {
            let start = self.plaintext.len();
            self.plaintext.resize(start + pending, 0);
            let n = self
                .conn
                .reader()
                .read(&mut self.plaintext[start..])
                .map_err(|e| HttpClientError::from_io_error(ErrorKind::Request, e))?;
            self.plaintext.truncate(start + n);
        }
        if state.peer_has_closed() {
            self.peer_closed = true;
        }
        Ok(())
    }
}

impl<S> TlsSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Feeds one socket read of ciphertext into the engine, appending any
    /// decrypted output to the plaintext queue.
    fn poll_pump_read(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut tmp = [0u8; 16 * 1024];
        let mut rb = ReadBuf::new(&mut tmp);
        match Pin::new(&mut self.stream).poll_read(cx, &mut rb) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Ready(Ok(())) => {}
        }
        let data = rb.filled();
        if data.is_empty() {
            self.peer_closed = true;
            return Poll::Ready(Ok(()));
        }
        let mut cursor = data;
        while !cursor.is_empty() {
            let n = self.conn.read_tls(&mut cursor)?;
            if n == 0 {
                break;
            }
            let state = self.conn.process_new_packets().map_err(invalid_data)?;
            let pending = state.plaintext_bytes_to_read();
            if pending > 0 {
                let start = self.plaintext.len();
                self.plaintext.resize(start + pending, 0);
                let n = self.conn.reader().read(&mut self.plaintext[start..])?;
                self.plaintext.truncate(start + n);
            }
            if state.peer_has_closed() {
                self.peer_closed = true;
            }
        }
        Poll::Ready(Ok(()))
    }

    /// Pushes buffered outgoing ciphertext toward the socket. Ready once the
    /// buffer is empty.
    fn poll_flush_outgoing(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.outgoing.is_empty() {
            match Pin::new(&mut self.stream).poll_write(cx, &self.outgoing) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Ready(Ok(0)) => {
                    return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
                }
                Poll::Ready(Ok(n)) => {
                    self.outgoing.drain(..n);
                }
            }
        }
        Poll::Ready(Ok(()))
    }

    fn move_engine_ciphertext(&mut self) -> io::Result<()> {
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.outgoing)?;
        }
        Ok(())
    }
}

fn invalid_data(e: rustls::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

impl<S> AsyncRead for TlsSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.plaintext.is_empty() {
                let n = buf.remaining().min(this.plaintext.len());
                buf.put_slice(&this.plaintext[..n]);
                this.plaintext.drain(..n);
                // The pump suspends at the high-water mark and resumes once
                // the consumer drains below the low-water mark.
                if this.plaintext.len() < PLAINTEXT_LOW_WATER
                    && !this.peer_closed
                    && this.deferred_error.is_none()
                {
                    while this.plaintext.len() < PLAINTEXT_HIGH_WATER && !this.peer_closed {
                        match this.poll_pump_read(cx) {
                            Poll::Pending => break,
                            Poll::Ready(Ok(())) => {}
                            Poll::Ready(Err(e)) => {
                                this.deferred_error = Some(e);
                                break;
                            }
                        }
                    }
                }
                return Poll::Ready(Ok(()));
            }
            if let Some(e) = this.deferred_error.take() {
                return Poll::Ready(Err(e));
            }
            if this.peer_closed {
                // Clean EOF: every termination mode converges here.
                return Poll::Ready(Ok(()));
            }
            match this.poll_pump_read(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Ready(Ok(())) => {}
            }
        }
    }
}

impl<S> AsyncWrite for TlsSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        // Apply backpressure before encrypting more.
        if this.outgoing.len() >= MAX_OUTGOING_TLS {
            match this.poll_flush_outgoing(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => {
                    if this.outgoing.len() >= MAX_OUTGOING_TLS {
                        return Poll::Pending;
                    }
                }
            }
        }
        let n = this.conn.writer().write(buf)?;
        this.move_engine_ciphertext()?;
        // Opportunistic flush; the caller's poll_flush completes it.
        let _ = this.poll_flush_outgoing(cx)?;
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.move_engine_ciphertext()?;
        match this.poll_flush_outgoing(cx) {
            Poll::Ready(Ok(())) => Pin::new(&mut this.stream).poll_flush(cx),
            other => other,
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.close_notify_sent {
            this.conn.send_close_notify();
            this.close_notify_sent = true;
        }
        this.move_engine_ciphertext()?;
        match this.poll_flush_outgoing(cx) {
            Poll::Ready(Ok(())) => Pin::new(&mut this.stream).poll_shutdown(cx),
            other => other,
        }
    }
}

#[cfg(test)]
mod ut_tls {
    use super::*;

    /// UT test cases for client config construction.
    ///
    /// # Brief
    /// 1. Builds configs with and without an ALPN list.
    /// 2. Checks the ALPN protocols are carried verbatim.
    #[test]
    fn ut_tls_client_config() {
        let config = client_config(&[b"h2", b"http/1.1"]);
        assert_eq!(
            config.alpn_protocols,
            vec![b"h2".to_vec(), b"http/1.1".to_vec()]
        );
        let config = client_config(&[]);
        assert!(config.alpn_protocols.is_empty());
    }

    /// UT test cases for server-name parsing.
    ///
    /// # Brief
    /// 1. Starts a handshake toward an immediately-closed pipe with a DNS
    ///    name and an invalid name.
    /// 2. Checks the invalid name fails before any I/O and the valid name
    ///    fails with the peer-closed error.
    #[tokio::test]
    async fn ut_tls_handshake_setup() {
        let cancel = CancellationToken::new();

        let (client, server) = tokio::io::duplex(4096);
        drop(server);
        let err = TlsSession::handshake(client, "bad name!", &[b"h2"], Deadline::none(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.error_kind(), ErrorKind::Connect);
        assert!(err.cause_string().contains("invalid server name"));

        let (client, server) = tokio::io::duplex(64 * 1024);
        drop(server);
        let err = TlsSession::handshake(
            client,
            "example.com",
            &[b"h2"],
            Deadline::none(),
            &cancel,
        )
        .await
        .unwrap_err();
        assert_eq!(err.error_kind(), ErrorKind::Connect);
    }
}
