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

//! The request/response facade over one HTTP/2 connection.
//!
//! [`H2Client`] is a cheap cloneable handle. Requests travel to the
//! connection actor as commands; the response head comes back over a
//! oneshot and the body over a per-stream channel. Streams never touch
//! connection state directly: cancellation and resets are commands too.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use egress_http::headers::Headers;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::error::HttpClientError;
use crate::timeout::{guarded, Deadline};

/// Chunk size the stream-body feeder reads at a time.
const FEEDER_CHUNK: usize = 16 * 1024;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// The request head of one HTTP/2 exchange.
pub(crate) struct H2RequestHead {
    pub(crate) method: String,
    pub(crate) scheme: String,
    pub(crate) authority: String,
    pub(crate) path: String,
    pub(crate) headers: Headers,
}

/// The body accompanying a request.
pub(crate) enum H2SendBody {
    Empty,
    Buffer(Vec<u8>),
    Stream(Box<dyn AsyncRead + Send + Unpin + 'static>),
}

/// The settled response of one exchange.
pub(crate) struct H2ResponseParts {
    pub(crate) status: u16,
    pub(crate) headers: Headers,
    pub(crate) body: H2Body,
}

/// Commands from handles and body readers to the connection actor.
pub(crate) enum Command {
    NewStream {
        token: u64,
        head: H2RequestHead,
        body: Option<Vec<u8>>,
        has_feeder: bool,
        resp_tx: oneshot::Sender<Result<H2ResponseParts, HttpClientError>>,
    },
    BodyData {
        token: u64,
        data: Vec<u8>,
        end_stream: bool,
        ack: oneshot::Sender<Result<(), HttpClientError>>,
    },
    BodyError {
        token: u64,
    },
    Abandon {
        token: u64,
    },
    CancelStream {
        id: u32,
    },
    Close,
}

pub(crate) struct ConnState {
    pub(crate) open_streams: u32,
    pub(crate) max_concurrent: u32,
    pub(crate) goaway: Option<u32>,
    pub(crate) closed: bool,
    pub(crate) id_exhausted: bool,
}

pub(crate) struct ClientShared {
    pub(crate) cmd_tx: mpsc::UnboundedSender<Command>,
    pub(crate) state: Mutex<ConnState>,
    pub(crate) goaway_tx: watch::Sender<bool>,
    goaway_rx: watch::Receiver<bool>,
    next_token: AtomicU64,
    unique_id: u64,
    goaway_listener: AtomicBool,
}

impl ClientShared {
    pub(crate) fn new(cmd_tx: mpsc::UnboundedSender<Command>) -> Self {
        let (goaway_tx, goaway_rx) = watch::channel(false);
        Self {
            cmd_tx,
            state: Mutex::new(ConnState {
                open_streams: 0,
                max_concurrent: 100,
                goaway: None,
                closed: false,
                id_exhausted: false,
            }),
            goaway_tx,
            goaway_rx,
            next_token: AtomicU64::new(1),
            unique_id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            goaway_listener: AtomicBool::new(false),
        }
    }
}

/// Handle to one multiplexed HTTP/2 connection.
#[derive(Clone)]
pub(crate) struct H2Client {
    inner: Arc<ClientShared>,
}

impl H2Client {
    pub(crate) fn from_shared(inner: Arc<ClientShared>) -> Self {
        Self { inner }
    }

    /// A process-unique id, used by the pool to deduplicate its GOAWAY
    /// listener per client.
    pub(crate) fn unique_id(&self) -> u64 {
        self.inner.unique_id
    }

    /// Marks the pool GOAWAY listener registered. Returns `true` the first
    /// time only.
    pub(crate) fn register_goaway_listener(&self) -> bool {
        !self.inner.goaway_listener.swap(true, Ordering::SeqCst)
    }

    /// Resolves once the connection received GOAWAY or closed.
    pub(crate) async fn wait_goaway(&self) {
        let mut rx = self.inner.goaway_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Whether new streams may still be routed to this connection.
    pub(crate) fn has_capacity(&self) -> bool {
        let state = self.inner.state.lock().unwrap();
        !state.closed
            && !state.id_exhausted
            && state.goaway.is_none()
            && state.open_streams < state.max_concurrent
    }

    /// Whether the connection is gone for good.
    pub(crate) fn is_closed(&self) -> bool {
        self.inner.state.lock().unwrap().closed
    }

    /// Starts a graceful shutdown: GOAWAY, fail open streams, close the
    /// socket.
    pub(crate) fn close(&self) {
        let _ = self.inner.cmd_tx.send(Command::Close);
    }

    /// Sends one request and awaits its response head under `deadline` and
    /// `cancel`. The body continues past this call through the returned
    /// reader.
    pub(crate) async fn send_request(
        &self,
        head: H2RequestHead,
        body: H2SendBody,
        deadline: Deadline,
        cancel: &CancellationToken,
    ) -> Result<H2ResponseParts, HttpClientError> {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        let (resp_tx, resp_rx) = oneshot::channel();

        let (buffer, feeder) = match body {
            H2SendBody::Empty => (None, None),
            H2SendBody::Buffer(data) => (Some(data), None),
            H2SendBody::Stream(reader) => (None, Some(reader)),
        };

        // NewStream must enter the command queue before any feeder chunk.
        let sent = self.inner.cmd_tx.send(Command::NewStream {
            token,
            head,
            body: buffer,
            has_feeder: feeder.is_some(),
            resp_tx,
        });
        if sent.is_err() {
            return err_from_msg!(Connect, "http2 connection is closed");
        }
        if let Some(reader) = feeder {
            self.spawn_feeder(token, reader);
        }

        let result = guarded(deadline, cancel, "headers timeout", async {
            resp_rx.await.unwrap_or_else(|_| {
                err_from_msg!(Request, "http2 connection dropped the request")
            })
        })
        .await;
        if result.is_err() {
            let _ = self.inner.cmd_tx.send(Command::Abandon { token });
        }
        result
    }

    fn spawn_feeder(&self, token: u64, mut reader: Box<dyn AsyncRead + Send + Unpin + 'static>) {
        let cmd_tx = self.inner.cmd_tx.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; FEEDER_CHUNK];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => {
                        let (ack, _ack_rx) = oneshot::channel();
                        let _ = cmd_tx.send(Command::BodyData {
                            token,
                            data: Vec::new(),
                            end_stream: true,
                            ack,
                        });
                        break;
                    }
                    Ok(n) => {
                        let (ack, ack_rx) = oneshot::channel();
                        if cmd_tx
                            .send(Command::BodyData {
                                token,
                                data: buf[..n].to_vec(),
                                end_stream: false,
                                ack,
                            })
                            .is_err()
                        {
                            break;
                        }
                        // Window credit: the actor acks once the chunk went
                        // out, bounding buffered body to one chunk.
                        match ack_rx.await {
                            Ok(Ok(())) => {}
                            _ => break,
                        }
                    }
                    Err(_) => {
                        let _ = cmd_tx.send(Command::BodyError { token });
                        break;
                    }
                }
            }
        });
    }
}

/// The pull side of a response body.
pub(crate) struct H2Body {
    rx: mpsc::UnboundedReceiver<Result<Vec<u8>, HttpClientError>>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    stream_id: u32,
    finished: bool,
}

impl H2Body {
    pub(crate) fn new(
        rx: mpsc::UnboundedReceiver<Result<Vec<u8>, HttpClientError>>,
        cmd_tx: mpsc::UnboundedSender<Command>,
        stream_id: u32,
    ) -> Self {
        Self {
            rx,
            cmd_tx,
            stream_id,
            finished: false,
        }
    }

    /// Creates a body that is already at end-of-stream.
    pub(crate) fn empty(cmd_tx: mpsc::UnboundedSender<Command>, stream_id: u32) -> Self {
        let (_tx, rx) = mpsc::unbounded_channel();
        Self {
            rx,
            cmd_tx,
            stream_id,
            finished: true,
        }
    }

    /// Pulls the next chunk. `None` is a clean end of body.
    pub(crate) async fn next_chunk(&mut self) -> Option<Result<Vec<u8>, HttpClientError>> {
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Some(Ok(chunk)) => Some(Ok(chunk)),
            Some(Err(e)) => {
                self.finished = true;
                Some(Err(e))
            }
            None => {
                self.finished = true;
                None
            }
        }
    }

    /// Cancels the stream: RST_STREAM(CANCEL) to the peer.
    pub(crate) fn cancel(&mut self) {
        if !self.finished {
            self.finished = true;
            let _ = self.cmd_tx.send(Command::CancelStream {
                id: self.stream_id,
            });
        }
    }
}

impl Drop for H2Body {
    fn drop(&mut self) {
        self.cancel();
    }
}
