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

//! The response body stream and its release guard.
//!
//! A response exclusively owns its connection until the body reaches a
//! terminal event: clean end, consumer cancel or error. Exactly then the
//! release runs: an HTTP/1.1 body drops its socket (`connection: close`
//! semantics), an HTTP/2 body returns its client to the pool while the
//! client still reports capacity and closes it otherwise. The release is
//! wired through `Drop` too, so abandoning a response cannot leak its
//! connection.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use egress_http::h1::chunked::ChunkedDecoder;
use egress_http::h1::H1Error;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::compress::ContentDecoder;
use crate::error::{ErrorKind, HttpClientError};
use crate::h2_conn::{H2Body, H2Client};
use crate::pool::{ConnPool, PoolKey};
use crate::timeout::{guarded, Deadline};
use crate::transport::ByteStream;

/// How the H1 body is delimited on the wire.
#[derive(Debug)]
pub(crate) enum H1Framing {
    ContentLength { remaining: u64 },
    Chunked(ChunkedDecoder),
    UntilClose,
}

#[derive(Debug)]
enum BodyKind {
    H1 {
        stream: ByteStream,
        framing: H1Framing,
        /// Bytes read past the head, not yet consumed by the framing.
        buffered: Vec<u8>,
    },
    H2(H2Body),
    Done,
}

/// What to do with the connection when the body settles.
#[derive(Debug)]
pub(crate) enum Release {
    /// Drop the socket; H1 connections are never reused.
    CloseSocket,
    /// Hand the client back to the pool, or close it without capacity.
    Repool {
        pool: Arc<ConnPool>,
        key: PoolKey,
        client: H2Client,
    },
}

/// The pull-driven response body.
#[derive(Debug)]
pub(crate) struct ResponseBody {
    kind: BodyKind,
    release: Option<Release>,
    decoder: Option<ContentDecoder>,
    body_timeout: Option<Duration>,
    cancel: CancellationToken,
    finished: bool,
}

impl ResponseBody {
    pub(crate) fn h1(
        stream: ByteStream,
        framing: H1Framing,
        leftover: Bytes,
        decoder: Option<ContentDecoder>,
        body_timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> Self {
        let mut body = Self {
            kind: BodyKind::H1 {
                stream,
                framing,
                buffered: leftover.to_vec(),
            },
            release: Some(Release::CloseSocket),
            decoder,
            body_timeout,
            cancel,
            finished: false,
        };
        // A zero-length body may be complete before the first pull.
        if let BodyKind::H1 {
            framing: H1Framing::ContentLength { remaining: 0 },
            ..
        } = &body.kind
        {
            body.settle();
        }
        body
    }

    pub(crate) fn h2(
        body: H2Body,
        release: Release,
        decoder: Option<ContentDecoder>,
        body_timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            kind: BodyKind::H2(body),
            release: Some(release),
            decoder,
            body_timeout,
            cancel,
            finished: false,
        }
    }

    /// An already-complete body (204-style responses).
    pub(crate) fn empty(release: Release) -> Self {
        let mut body = Self {
            kind: BodyKind::Done,
            release: Some(release),
            decoder: None,
            body_timeout: None,
            cancel: CancellationToken::new(),
            finished: false,
        };
        body.settle();
        body
    }

    /// Pulls the next decoded chunk. `None` is the clean end of the body.
    /// The body-idle guard restarts on every chunk.
    pub(crate) async fn next_chunk(&mut self) -> Option<Result<Vec<u8>, HttpClientError>> {
        loop {
            if self.finished {
                return None;
            }
            let raw = match self.pull_raw().await {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    if let Some(decoder) = &self.decoder {
                        if !decoder.finished() {
                            self.fail();
                            return Some(Err(HttpClientError::from_str(
                                ErrorKind::BodyDecode,
                                "compressed body ended before its stream end",
                            )));
                        }
                    }
                    self.settle();
                    return None;
                }
                Err(e) => {
                    self.fail();
                    return Some(Err(e));
                }
            };
            let chunk = match &mut self.decoder {
                Some(decoder) => match decoder.decode(&raw) {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        self.fail();
                        return Some(Err(e));
                    }
                },
                None => raw,
            };
            if !chunk.is_empty() {
                return Some(Ok(chunk));
            }
            // A compressed chunk may decode to nothing; keep pulling.
        }
    }

    /// Drains the rest of the body, discarding it.
    pub(crate) async fn drain(&mut self) -> Result<(), HttpClientError> {
        while let Some(chunk) = self.next_chunk().await {
            chunk?;
        }
        Ok(())
    }

    /// Cancels the body: H1 destroys the socket, H2 resets the stream.
    pub(crate) fn cancel_body(&mut self) {
        if self.finished {
            return;
        }
        if let BodyKind::H2(h2) = &mut self.kind {
            h2.cancel();
        }
        self.settle();
    }

    async fn pull_raw(&mut self) -> Result<Option<Vec<u8>>, HttpClientError> {
        let deadline = Deadline::after(self.body_timeout);
        match &mut self.kind {
            BodyKind::Done => Ok(None),
            BodyKind::H2(h2) => {
                let cancel = self.cancel.clone();
                let pulled = guarded(deadline, &cancel, "body timeout", async {
                    Ok(h2.next_chunk().await)
                })
                .await;
                match pulled {
                    Ok(Some(Ok(chunk))) => Ok(Some(chunk)),
                    Ok(Some(Err(e))) => Err(e),
                    Ok(None) => Ok(None),
                    Err(e) => {
                        // Timed out or cancelled: tell the peer.
                        h2.cancel();
                        Err(e)
                    }
                }
            }
            BodyKind::H1 {
                stream,
                framing,
                buffered,
            } => loop {
                if framing_done(framing) {
                    return Ok(None);
                }
                if !buffered.is_empty() {
                    let input = std::mem::take(buffered);
                    match Self::feed_framing(framing, &input)? {
                        Some(out) if !out.is_empty() => return Ok(Some(out)),
                        Some(_) => continue,
                        None => return Ok(None),
                    }
                }
                let mut buf = vec![0u8; 16 * 1024];
                let cancel = self.cancel.clone();
                let n = guarded(deadline, &cancel, "body timeout", async {
                    stream
                        .read(&mut buf)
                        .await
                        .map_err(|e| HttpClientError::from_io_error(ErrorKind::BodyTransfer, e))
                })
                .await?;
                if n == 0 {
                    return match framing {
                        H1Framing::UntilClose => Ok(None),
                        _ => Err(HttpClientError::from_error(
                            ErrorKind::BodyTransfer,
                            H1Error::UnexpectedEof,
                        )),
                    };
                }
                buf.truncate(n);
                match Self::feed_framing(framing, &buf)? {
                    Some(out) if !out.is_empty() => return Ok(Some(out)),
                    Some(_) => continue,
                    None => return Ok(None),
                }
            },
        }
    }

    /// Runs `input` through the H1 framing. `Ok(None)` means the body is
    /// complete; excess bytes past the body end are discarded.
    fn feed_framing(
        framing: &mut H1Framing,
        input: &[u8],
    ) -> Result<Option<Vec<u8>>, HttpClientError> {
        match framing {
            H1Framing::ContentLength { remaining } => {
                if *remaining == 0 {
                    return Ok(None);
                }
                let take = (*remaining).min(input.len() as u64) as usize;
                *remaining -= take as u64;
                // Anything past the declared length is truncated.
                Ok(Some(input[..take].to_vec()))
            }
            H1Framing::Chunked(decoder) => {
                if decoder.is_done() {
                    return Ok(None);
                }
                let mut out = Vec::new();
                decoder
                    .decode(input, &mut out)
                    .map_err(|e| HttpClientError::from_error(ErrorKind::BodyDecode, e))?;
                if out.is_empty() && decoder.is_done() {
                    return Ok(None);
                }
                Ok(Some(out))
            }
            H1Framing::UntilClose => Ok(Some(input.to_vec())),
        }
    }

    /// Terminal event: run the release exactly once.
    fn settle(&mut self) {
        self.finished = true;
        self.kind = BodyKind::Done;
        if let Some(release) = self.release.take() {
            match release {
                Release::CloseSocket => {}
                Release::Repool { pool, key, client } => {
                    if client.has_capacity() {
                        ConnPool::insert(&pool, key, client);
                    } else {
                        client.close();
                    }
                }
            }
        }
    }

    fn fail(&mut self) {
        if let BodyKind::H2(h2) = &mut self.kind {
            h2.cancel();
        }
        self.settle();
    }
}

/// Whether the framing has delivered the whole body.
fn framing_done(framing: &H1Framing) -> bool {
    match framing {
        H1Framing::ContentLength { remaining } => *remaining == 0,
        H1Framing::Chunked(decoder) => decoder.is_done(),
        H1Framing::UntilClose => false,
    }
}

impl Drop for ResponseBody {
    fn drop(&mut self) {
        // An abandoned body counts as a consumer cancel.
        self.cancel_body();
    }
}
