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

//! The HTTP/2 connection actor.
//!
//! One task owns the whole connection: socket read half, frame codec, HPACK
//! state, the stream map and both flow-control directions. Handles talk to
//! it through commands; it never shares mutable state.
//!
//! Writes go through a companion task that drains its queue into a single
//! network write per wakeup, which gives frame coalescing for free: every
//! frame enqueued within one actor iteration lands in one syscall. Frame
//! sequences that must not interleave (HEADERS plus CONTINUATION) are
//! encoded into one buffer before they reach the queue.
//!
//! Startup merges the client preface, the initial SETTINGS and the
//! connection WINDOW_UPDATE into the first write. The connection is ready
//! once the peer's SETTINGS arrived and the peer acknowledged ours;
//! requests submitted earlier wait in the admission queue.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use egress_http::h2::{
    ErrorCode, Frame, FrameDecoder, FrameEncoder, FrameFlags, Goaway, H2Error, Headers as
    H2Headers, Parts, Payload, Ping, RstStream, Setting, SettingsBuilder, StreamId, WindowUpdate,
    CONNECTION_PREFACE, DEFAULT_INITIAL_WINDOW_SIZE,
};
use egress_http::pseudo::PseudoHeaders;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{ErrorKind, HttpClientError};
use crate::h2_conn::client::{
    ClientShared, Command, H2Body, H2Client, H2RequestHead, H2ResponseParts,
};
use crate::h2_conn::stream::{PendingData, Stream};
use crate::h2_conn::window::{RecvWindow, SendWindow, WaitQueue};
use crate::h2_conn::{
    LOCAL_CONNECTION_WINDOW, LOCAL_HEADER_TABLE_SIZE, LOCAL_MAX_FRAME_SIZE, LOCAL_STREAM_WINDOW,
    SETTINGS_EXCHANGE_TIMEOUT,
};

const MAX_STREAM_ID: StreamId = (1 << 31) - 1;

enum WriteCmd {
    Buf(Vec<u8>),
    Shutdown,
}

struct QueuedRequest {
    token: u64,
    head: H2RequestHead,
    pending: Option<PendingData>,
    has_feeder: bool,
    resp_tx: oneshot::Sender<Result<H2ResponseParts, HttpClientError>>,
}

/// Spawns the actor and write tasks for a freshly-handshaken stream and
/// returns the request handle.
pub(crate) fn spawn_connection<S>(stream: S) -> H2Client
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(ClientShared::new(cmd_tx.clone()));

    let (read_half, write_half) = tokio::io::split(stream);
    tokio::spawn(write_loop(write_half, out_rx));
    let actor = Actor::new(read_half, cmd_tx, cmd_rx, out_tx, shared.clone());
    tokio::spawn(actor.run());

    H2Client::from_shared(shared)
}

/// Drains queued buffers into single network writes.
async fn write_loop<S>(mut half: WriteHalf<S>, mut rx: mpsc::UnboundedReceiver<WriteCmd>)
where
    S: AsyncWrite + Send,
{
    while let Some(cmd) = rx.recv().await {
        let mut buf = match cmd {
            WriteCmd::Buf(buf) => buf,
            WriteCmd::Shutdown => break,
        };
        let mut shutdown = false;
        // Coalesce everything already queued into this write.
        loop {
            match rx.try_recv() {
                Ok(WriteCmd::Buf(more)) => buf.extend_from_slice(&more),
                Ok(WriteCmd::Shutdown) => {
                    shutdown = true;
                    break;
                }
                Err(_) => break,
            }
        }
        if half.write_all(&buf).await.is_err() || half.flush().await.is_err() || shutdown {
            break;
        }
    }
    let _ = half.shutdown().await;
}

struct Actor<S> {
    reader: ReadHalf<S>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    out_tx: mpsc::UnboundedSender<WriteCmd>,
    shared: Arc<ClientShared>,

    decoder: FrameDecoder,
    encoder: FrameEncoder,
    write_buf: Vec<u8>,

    streams: HashMap<StreamId, Stream>,
    tokens: HashMap<u64, StreamId>,
    admission_queue: VecDeque<QueuedRequest>,
    send_queue: WaitQueue,

    conn_send_window: SendWindow,
    conn_recv_window: RecvWindow,
    peer_initial_window: u32,
    peer_max_frame_size: u32,
    peer_max_concurrent: u32,

    next_stream_id: StreamId,
    peer_settings_received: bool,
    local_settings_acked: bool,
    goaway_received: Option<StreamId>,
}

impl<S> Actor<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    fn new(
        reader: ReadHalf<S>,
        cmd_tx: mpsc::UnboundedSender<Command>,
        cmd_rx: mpsc::UnboundedReceiver<Command>,
        out_tx: mpsc::UnboundedSender<WriteCmd>,
        shared: Arc<ClientShared>,
    ) -> Self {
        Self {
            reader,
            cmd_tx,
            cmd_rx,
            out_tx,
            shared,
            decoder: FrameDecoder::new(LOCAL_MAX_FRAME_SIZE),
            encoder: FrameEncoder::new(),
            write_buf: Vec::with_capacity(4096),
            streams: HashMap::new(),
            tokens: HashMap::new(),
            admission_queue: VecDeque::new(),
            send_queue: WaitQueue::new(),
            conn_send_window: SendWindow::new(DEFAULT_INITIAL_WINDOW_SIZE),
            conn_recv_window: RecvWindow::new(LOCAL_CONNECTION_WINDOW),
            peer_initial_window: DEFAULT_INITIAL_WINDOW_SIZE,
            peer_max_frame_size: 16_384,
            peer_max_concurrent: 100,
            next_stream_id: 1,
            peer_settings_received: false,
            local_settings_acked: false,
            goaway_received: None,
        }
    }

    fn ready(&self) -> bool {
        self.peer_settings_received && self.local_settings_acked
    }

    async fn run(mut self) {
        // Preface, SETTINGS and the connection window raise go out in one
        // network write.
        self.write_buf.extend_from_slice(CONNECTION_PREFACE);
        let settings = SettingsBuilder::new()
            .enable_push(false)
            .initial_window_size(LOCAL_STREAM_WINDOW)
            .max_frame_size(LOCAL_MAX_FRAME_SIZE)
            .header_table_size(LOCAL_HEADER_TABLE_SIZE)
            .build();
        let frame = Frame::new(0, FrameFlags::empty(), Payload::Settings(settings));
        let mut buf = std::mem::take(&mut self.write_buf);
        self.encoder.encode(&frame, &mut buf);
        let raise = LOCAL_CONNECTION_WINDOW - DEFAULT_INITIAL_WINDOW_SIZE;
        let update = Frame::new(0, FrameFlags::empty(), Payload::WindowUpdate(WindowUpdate::new(raise)));
        self.encoder.encode(&update, &mut buf);
        self.write_buf = buf;
        self.flush_writes();

        let settings_deadline = tokio::time::Instant::now() + SETTINGS_EXCHANGE_TIMEOUT;
        let mut read_buf = vec![0u8; 32 * 1024];

        loop {
            let ready = self.ready();
            tokio::select! {
                biased;
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if self.handle_command(cmd) {
                                return;
                            }
                        }
                        // Every handle is gone; shut the connection down.
                        None => {
                            self.graceful_close();
                            return;
                        }
                    }
                }
                read = self.reader.read(&mut read_buf) => {
                    match read {
                        Ok(0) => {
                            self.fail_all(|| HttpClientError::from_str(
                                ErrorKind::Request,
                                "http2 connection closed by peer",
                            ));
                            self.finish(false);
                            return;
                        }
                        Ok(n) => {
                            let frames = match self.decoder.decode(&read_buf[..n]) {
                                Ok(frames) => frames,
                                Err(error) => {
                                    self.connection_error(error);
                                    return;
                                }
                            };
                            for frame in frames {
                                if let Err(error) = self.handle_frame(frame) {
                                    self.connection_error(error);
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "http2 socket read failed");
                            self.fail_all(|| HttpClientError::from_message(
                                ErrorKind::Request,
                                format!("http2 socket error: {e}"),
                            ));
                            self.finish(false);
                            return;
                        }
                    }
                }
                _ = tokio::time::sleep_until(settings_deadline), if !ready => {
                    self.fail_all(|| HttpClientError::from_str(
                        ErrorKind::Connect,
                        "http2 settings exchange timed out",
                    ));
                    self.send_goaway(ErrorCode::SettingsTimeout);
                    self.finish(true);
                    return;
                }
            }

            self.pump_admissions();
            self.pump_sends();
            self.flush_writes();
        }
    }

    /// Handles one command. Returns `true` when the actor must exit.
    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::NewStream {
                token,
                head,
                body,
                has_feeder,
                resp_tx,
            } => {
                if self.goaway_received.is_some() {
                    let _ = resp_tx.send(err_from_msg!(
                        Request,
                        "connection is draining after GOAWAY"
                    ));
                    return false;
                }
                let pending = body.map(|data| PendingData {
                    data,
                    pos: 0,
                    end_stream: true,
                    ack: None,
                });
                self.admission_queue.push_back(QueuedRequest {
                    token,
                    head,
                    pending,
                    has_feeder,
                    resp_tx,
                });
            }
            Command::BodyData {
                token,
                data,
                end_stream,
                ack,
            } => self.handle_body_data(token, data, end_stream, ack),
            Command::BodyError { token } => {
                if let Some(id) = self.tokens.get(&token).copied() {
                    self.reset_stream(id, ErrorCode::InternalError, || {
                        HttpClientError::from_str(
                            ErrorKind::BodyTransfer,
                            "request body stream failed",
                        )
                    });
                }
            }
            Command::Abandon { token } => {
                if let Some(pos) = self
                    .admission_queue
                    .iter()
                    .position(|queued| queued.token == token)
                {
                    self.admission_queue.remove(pos);
                } else if let Some(id) = self.tokens.get(&token).copied() {
                    self.reset_stream(id, ErrorCode::Cancel, HttpClientError::user_aborted);
                }
            }
            Command::CancelStream { id } => {
                self.reset_stream(id, ErrorCode::Cancel, || {
                    HttpClientError::from_str(ErrorKind::Request, "stream cancelled")
                });
            }
            Command::Close => {
                self.graceful_close();
                return true;
            }
        }
        false
    }

    fn handle_body_data(
        &mut self,
        token: u64,
        data: Vec<u8>,
        end_stream: bool,
        ack: oneshot::Sender<Result<(), HttpClientError>>,
    ) {
        if let Some(queued) = self
            .admission_queue
            .iter_mut()
            .find(|queued| queued.token == token)
        {
            queued.pending = Some(PendingData {
                data,
                pos: 0,
                end_stream,
                ack: Some(ack),
            });
            return;
        }
        let Some(id) = self.tokens.get(&token).copied() else {
            // The stream already failed; release the feeder.
            let _ = ack.send(err_from_msg!(Request, "stream is gone"));
            return;
        };
        let Some(stream) = self.streams.get_mut(&id) else {
            let _ = ack.send(err_from_msg!(Request, "stream is gone"));
            return;
        };
        if end_stream && data.is_empty() && stream.pending.is_none() {
            // Bare end-of-body marker with nothing left to flush.
            self.write_empty_end_stream(id);
            let _ = ack.send(Ok(()));
            return;
        }
        stream.pending = Some(PendingData {
            data,
            pos: 0,
            end_stream,
            ack: Some(ack),
        });
        if stream.send_window.available() > 0 {
            self.send_queue.enqueue(id);
        } else {
            stream.blocked_on_stream_window = true;
        }
    }

    fn write_empty_end_stream(&mut self, id: StreamId) {
        let mut buf = std::mem::take(&mut self.write_buf);
        self.encoder.encode_data(id, &[], true, &mut buf);
        self.write_buf = buf;
        if let Some(stream) = self.streams.get_mut(&id) {
            stream.state = stream.state.on_send_end_stream();
            if stream.state.is_closed() {
                self.remove_stream(id);
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<(), H2Error> {
        let id = frame.stream_id();
        let end_stream = frame.flags().is_end_stream();
        let is_ack = frame.flags().is_ack();
        match frame.into_payload() {
            Payload::Settings(settings) => self.handle_settings(settings, is_ack)?,
            Payload::Headers(headers) => self.handle_headers(id, headers, end_stream)?,
            Payload::Data(data) => {
                let flow_len = data.flow_len() as u32;
                self.handle_data(id, data.into_vec(), flow_len, end_stream)?;
            }
            Payload::RstStream(rst) => self.handle_rst(id, &rst),
            Payload::Ping(ping) => {
                if !is_ack {
                    self.handle_ping(ping);
                }
            }
            Payload::Goaway(goaway) => self.handle_goaway(&goaway),
            Payload::WindowUpdate(update) => self.handle_window_update(id, update.increment())?,
            Payload::Priority(_) => {}
        }
        Ok(())
    }

    fn handle_settings(
        &mut self,
        settings: egress_http::h2::Settings,
        is_ack: bool,
    ) -> Result<(), H2Error> {
        if is_ack {
            self.local_settings_acked = true;
            return Ok(());
        }
        for setting in settings.get_settings() {
            match setting {
                Setting::HeaderTableSize(size) => {
                    self.encoder.set_header_table_size(*size);
                }
                Setting::InitialWindowSize(size) => {
                    let old = self.peer_initial_window;
                    self.peer_initial_window = *size;
                    for (id, stream) in self.streams.iter_mut() {
                        stream.send_window.reset(*size, old)?;
                        if stream.blocked_on_stream_window && stream.send_window.available() > 0 {
                            stream.blocked_on_stream_window = false;
                            self.send_queue.enqueue(*id);
                        }
                    }
                }
                Setting::MaxFrameSize(size) => {
                    self.peer_max_frame_size = *size;
                    self.encoder.set_max_frame_size(*size);
                }
                Setting::MaxConcurrentStreams(num) => {
                    self.peer_max_concurrent = *num;
                    self.shared.state.lock().unwrap().max_concurrent = *num;
                }
                Setting::EnablePush(_) | Setting::MaxHeaderListSize(_) => {}
            }
        }
        self.peer_settings_received = true;
        let mut buf = std::mem::take(&mut self.write_buf);
        self.encoder
            .encode(&egress_http::h2::Settings::ack(), &mut buf);
        self.write_buf = buf;
        Ok(())
    }

    fn handle_headers(
        &mut self,
        id: StreamId,
        headers: H2Headers,
        end_stream: bool,
    ) -> Result<(), H2Error> {
        if id >= self.next_stream_id || id % 2 == 0 {
            return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
        }
        let Some(stream) = self.streams.get_mut(&id) else {
            // A frame for a stream this side already tore down.
            return Ok(());
        };
        if !stream.state.accepts_peer_frames() {
            return Ok(());
        }

        if stream.resp_tx.is_none() {
            // Trailers. Their content is not surfaced; END_STREAM still
            // closes the body.
            if end_stream {
                stream.finish_body();
                stream.state = stream.state.on_recv_end_stream();
                if stream.state.is_closed() {
                    self.remove_stream(id);
                }
            }
            return Ok(());
        }

        let (pseudo, fields) = headers.parts();
        let status = match pseudo.status().and_then(|s| s.parse::<u16>().ok()) {
            Some(status) if (100..=599).contains(&status) => status,
            _ => {
                self.reset_stream(id, ErrorCode::ProtocolError, || {
                    HttpClientError::from_str(ErrorKind::Request, "invalid :status in response")
                });
                return Ok(());
            }
        };
        if (100..200).contains(&status) {
            // Interim response; the final head is still to come.
            return Ok(());
        }

        let fields = fields.clone();
        let stream = self.streams.get_mut(&id).unwrap();
        let resp_tx = stream.resp_tx.take().unwrap();
        let body = if end_stream {
            stream.finish_body();
            H2Body::empty(self.cmd_tx.clone(), id)
        } else {
            H2Body::new(stream.body_rx.take().unwrap(), self.cmd_tx.clone(), id)
        };
        let _ = resp_tx.send(Ok(H2ResponseParts {
            status,
            headers: fields,
            body,
        }));
        if end_stream {
            let stream = self.streams.get_mut(&id).unwrap();
            stream.state = stream.state.on_recv_end_stream();
            if stream.state.is_closed() {
                self.remove_stream(id);
            }
        }
        Ok(())
    }

    fn handle_data(
        &mut self,
        id: StreamId,
        data: Vec<u8>,
        flow_len: u32,
        end_stream: bool,
    ) -> Result<(), H2Error> {
        if id >= self.next_stream_id {
            return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
        }
        // Connection-level accounting happens even for dead streams; the
        // peer spent connection window to send this.
        if let Some(increment) = self.conn_recv_window.recv_data(flow_len) {
            self.write_window_update(0, increment);
        }
        let stream_increment = match self.streams.get_mut(&id) {
            None => return Ok(()),
            Some(stream) => {
                if !stream.state.accepts_peer_frames() {
                    return Ok(());
                }
                // The stream-level update is skipped when END_STREAM rode
                // along: the stream is over, the credit would be wasted.
                if end_stream {
                    None
                } else {
                    stream.recv_window.recv_data(flow_len)
                }
            }
        };
        if let Some(increment) = stream_increment {
            self.write_window_update(id, increment);
        }
        let stream = self.streams.get_mut(&id).unwrap();
        if let Some(tx) = &stream.body_tx {
            if !data.is_empty() {
                let _ = tx.send(Ok(data));
            }
        }
        if end_stream {
            stream.finish_body();
            stream.state = stream.state.on_recv_end_stream();
            if stream.state.is_closed() {
                self.remove_stream(id);
            }
        }
        Ok(())
    }

    fn handle_rst(&mut self, id: StreamId, rst: &RstStream) {
        if self.streams.contains_key(&id) {
            let code = rst.error_code();
            let make_error = move || {
                HttpClientError::from_message(
                    ErrorKind::Request,
                    format!("stream reset by peer (code {code})"),
                )
            };
            if let Some(stream) = self.streams.get_mut(&id) {
                stream.fail(make_error);
            }
            self.remove_stream(id);
        }
    }

    fn handle_ping(&mut self, ping: Ping) {
        // ACK flag travels through the frame flags; the decoder preserved
        // them, and our own PINGs are never outstanding, so any non-ACK
        // PING gets its ACK here.
        let mut buf = std::mem::take(&mut self.write_buf);
        self.encoder.encode(&Ping::ack(ping), &mut buf);
        self.write_buf = buf;
    }

    fn handle_goaway(&mut self, goaway: &Goaway) {
        let last = goaway.last_stream_id();
        debug!(last_stream_id = last, code = goaway.error_code(), "received GOAWAY");
        self.goaway_received = Some(last);
        {
            let mut state = self.shared.state.lock().unwrap();
            state.goaway = Some(last);
        }
        let _ = self.shared.goaway_tx.send(true);

        // Streams above the peer's cut are refused and safe to replay.
        let refused: Vec<StreamId> = self
            .streams
            .keys()
            .copied()
            .filter(|id| *id > last)
            .collect();
        for id in refused {
            if let Some(stream) = self.streams.get_mut(&id) {
                stream.fail(|| {
                    HttpClientError::from_str(
                        ErrorKind::Request,
                        "stream refused by GOAWAY",
                    )
                });
            }
            self.remove_stream(id);
        }
        // Queued requests never reached the wire; refuse them the same way.
        while let Some(queued) = self.admission_queue.pop_front() {
            let _ = queued.resp_tx.send(err_from_msg!(
                Request,
                "connection is draining after GOAWAY"
            ));
        }
    }

    fn handle_window_update(&mut self, id: StreamId, increment: u32) -> Result<(), H2Error> {
        if id == 0 {
            self.conn_send_window.update(increment)?;
            return Ok(());
        }
        if increment == 0 {
            // Zero increment on a stream resets just that stream.
            self.reset_stream(id, ErrorCode::ProtocolError, || {
                HttpClientError::from_str(ErrorKind::Request, "zero window update from peer")
            });
            return Ok(());
        }
        if let Some(stream) = self.streams.get_mut(&id) {
            match stream.send_window.update(increment) {
                Ok(()) => {
                    if stream.blocked_on_stream_window && stream.send_window.available() > 0 {
                        stream.blocked_on_stream_window = false;
                        if stream.pending.is_some() {
                            self.send_queue.enqueue(id);
                        }
                    }
                }
                Err(_) => {
                    self.reset_stream(id, ErrorCode::FlowControlError, || {
                        HttpClientError::from_str(
                            ErrorKind::Request,
                            "stream flow-control window overflow",
                        )
                    });
                }
            }
        }
        Ok(())
    }

    /// Admits queued requests while the connection is ready and below the
    /// peer's concurrency cap.
    fn pump_admissions(&mut self) {
        while self.ready()
            && self.goaway_received.is_none()
            && (self.streams.len() as u32) < self.peer_max_concurrent
        {
            let Some(queued) = self.admission_queue.pop_front() else {
                break;
            };
            let QueuedRequest {
                token,
                head,
                pending,
                has_feeder,
                resp_tx,
            } = queued;
            if self.next_stream_id > MAX_STREAM_ID {
                // The id space is spent; this connection is done.
                self.shared.state.lock().unwrap().id_exhausted = true;
                let _ = resp_tx.send(err_from_msg!(
                    Connect,
                    "http2 stream id space exhausted"
                ));
                let _ = self.shared.goaway_tx.send(true);
                continue;
            }
            let id = self.next_stream_id;
            self.next_stream_id += 2;

            let end_stream = pending.is_none() && !has_feeder;
            let mut parts = Parts::new();
            let mut pseudo = PseudoHeaders::new();
            pseudo.set_method(Some(head.method));
            pseudo.set_scheme(Some(head.scheme));
            pseudo.set_authority(Some(head.authority));
            pseudo.set_path(Some(head.path));
            *parts.pseudo_mut() = pseudo;
            *parts.headers_mut() = head.headers;

            let mut buf = std::mem::take(&mut self.write_buf);
            self.encoder
                .encode_header_block(id, &parts, end_stream, &mut buf);
            self.write_buf = buf;

            let mut stream = Stream::new(self.peer_initial_window, LOCAL_STREAM_WINDOW, resp_tx);
            if end_stream {
                stream.state = stream.state.on_send_end_stream();
            }
            let has_pending = pending.is_some();
            stream.pending = pending;
            self.streams.insert(id, stream);
            self.tokens.insert(token, id);
            self.shared.state.lock().unwrap().open_streams = self.streams.len() as u32;
            if has_pending {
                self.send_queue.enqueue(id);
            }
        }
    }

    /// Emits DATA within both windows, FIFO over the connection window.
    fn pump_sends(&mut self) {
        loop {
            if self.conn_send_window.available() <= 0 {
                break;
            }
            let Some(id) = self.send_queue.head() else {
                break;
            };
            let Some(stream) = self.streams.get_mut(&id) else {
                self.send_queue.pop();
                continue;
            };
            let Some(pending) = &mut stream.pending else {
                self.send_queue.pop();
                continue;
            };

            if stream.send_window.available() <= 0 {
                // Blocked on its own window; it leaves the connection
                // queue so later streams are not starved by it.
                stream.blocked_on_stream_window = true;
                self.send_queue.pop();
                continue;
            }

            let allowance = (self.conn_send_window.available() as usize)
                .min(stream.send_window.available() as usize)
                .min(self.peer_max_frame_size as usize)
                .min(pending.remaining());
            let end = pending.pos + allowance;
            let last = end == pending.data.len();
            let end_stream = last && pending.end_stream;

            let mut buf = std::mem::take(&mut self.write_buf);
            self.encoder
                .encode_data(id, &pending.data[pending.pos..end], end_stream, &mut buf);
            self.write_buf = buf;
            pending.pos = end;
            self.conn_send_window.consume(allowance as u32);
            stream.send_window.consume(allowance as u32);

            if last {
                let pending = stream.pending.take().unwrap();
                if let Some(ack) = pending.ack {
                    let _ = ack.send(Ok(()));
                }
                self.send_queue.pop();
                if pending.end_stream {
                    stream.state = stream.state.on_send_end_stream();
                    if stream.state.is_closed() {
                        self.remove_stream(id);
                    }
                }
            }
        }
    }

    fn write_window_update(&mut self, id: StreamId, increment: u32) {
        let frame = Frame::new(
            id,
            FrameFlags::empty(),
            Payload::WindowUpdate(WindowUpdate::new(increment)),
        );
        let mut buf = std::mem::take(&mut self.write_buf);
        self.encoder.encode(&frame, &mut buf);
        self.write_buf = buf;
    }

    /// Sends RST_STREAM and fails the local stream surfaces.
    fn reset_stream(
        &mut self,
        id: StreamId,
        code: ErrorCode,
        make_error: impl Fn() -> HttpClientError,
    ) {
        if let Some(stream) = self.streams.get_mut(&id) {
            let frame = Frame::new(
                id,
                FrameFlags::empty(),
                Payload::RstStream(RstStream::new(code.into_code())),
            );
            let mut buf = std::mem::take(&mut self.write_buf);
            self.encoder.encode(&frame, &mut buf);
            self.write_buf = buf;
            stream.fail(make_error);
            self.remove_stream(id);
        }
    }

    fn remove_stream(&mut self, id: StreamId) {
        self.streams.remove(&id);
        self.send_queue.remove(id);
        self.tokens.retain(|_, mapped| *mapped != id);
        self.shared.state.lock().unwrap().open_streams = self.streams.len() as u32;
    }

    fn fail_all(&mut self, make_error: impl Fn() -> HttpClientError) {
        let ids: Vec<StreamId> = self.streams.keys().copied().collect();
        for id in ids {
            if let Some(stream) = self.streams.get_mut(&id) {
                stream.fail(&make_error);
            }
        }
        self.streams.clear();
        self.send_queue = WaitQueue::new();
        self.tokens.clear();
        while let Some(queued) = self.admission_queue.pop_front() {
            let _ = queued.resp_tx.send(Err(make_error()));
        }
    }

    fn send_goaway(&mut self, code: ErrorCode) {
        let last = self.next_stream_id.saturating_sub(2);
        let frame = Frame::new(
            0,
            FrameFlags::empty(),
            Payload::Goaway(Goaway::new(code.into_code(), last, Vec::new())),
        );
        let mut buf = std::mem::take(&mut self.write_buf);
        self.encoder.encode(&frame, &mut buf);
        self.write_buf = buf;
    }

    /// Fatal peer misbehavior: GOAWAY with the matching code, fail every
    /// stream, close.
    fn connection_error(&mut self, error: H2Error) {
        let code = error.code();
        warn!(?error, "http2 connection error");
        self.fail_all(|| {
            HttpClientError::from_message(
                ErrorKind::Request,
                format!("http2 protocol error: {error:?}"),
            )
        });
        self.send_goaway(code);
        self.finish(true);
    }

    fn graceful_close(&mut self) {
        self.fail_all(|| HttpClientError::from_str(ErrorKind::Request, "connection closed"));
        self.send_goaway(ErrorCode::NoError);
        self.finish(true);
    }

    /// Marks the connection closed and releases the write side.
    fn finish(&mut self, flush: bool) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.closed = true;
        }
        let _ = self.shared.goaway_tx.send(true);
        if flush {
            self.flush_writes();
        }
        let _ = self.out_tx.send(WriteCmd::Shutdown);
    }

    fn flush_writes(&mut self) {
        if !self.write_buf.is_empty() {
            let buf = std::mem::take(&mut self.write_buf);
            let _ = self.out_tx.send(WriteCmd::Buf(buf));
        }
    }
}

#[cfg(test)]
mod ut_h2_connection {
    use std::collections::VecDeque;

    use egress_http::headers::Headers;
    use egress_http::h2::{
        Data, Frame, FrameFlags, FrameType, Goaway, Headers as H2Headers, Parts, Payload, Ping,
        Settings, WindowUpdate,
    };
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::h2_conn::H2SendBody;
    use crate::timeout::Deadline;

    /// The server end of a duplex pipe, speaking raw HTTP/2 frames.
    struct ServerPeer {
        io: DuplexStream,
        decoder: FrameDecoder,
        encoder: FrameEncoder,
        queue: VecDeque<Frame>,
    }

    impl ServerPeer {
        async fn start(mut io: DuplexStream) -> Self {
            let mut preface = [0u8; 24];
            io.read_exact(&mut preface).await.unwrap();
            assert_eq!(&preface, CONNECTION_PREFACE);
            let mut peer = Self {
                io,
                decoder: FrameDecoder::new(LOCAL_MAX_FRAME_SIZE),
                encoder: FrameEncoder::new(),
                queue: VecDeque::new(),
            };
            // Settle the settings exchange: our SETTINGS, then ACK theirs.
            peer.write_frame(&Frame::new(
                0,
                FrameFlags::empty(),
                Payload::Settings(Settings::new(vec![])),
            ))
            .await;
            loop {
                let frame = peer.next_frame().await;
                if frame.payload().frame_type() == FrameType::Settings && !frame.flags().is_ack() {
                    peer.write_frame(&Settings::ack()).await;
                    break;
                }
            }
            peer
        }

        async fn next_frame(&mut self) -> Frame {
            loop {
                if let Some(frame) = self.queue.pop_front() {
                    return frame;
                }
                let mut buf = [0u8; 16 * 1024];
                let n = self.io.read(&mut buf).await.unwrap();
                assert_ne!(n, 0, "client closed unexpectedly");
                self.queue.extend(self.decoder.decode(&buf[..n]).unwrap());
            }
        }

        /// Reads frames until one matches; panics on surprise frame types
        /// only when they carry semantics a test cares about.
        async fn next_frame_of(&mut self, frame_type: FrameType) -> Frame {
            loop {
                let frame = self.next_frame().await;
                if frame.payload().frame_type() == frame_type {
                    return frame;
                }
            }
        }

        async fn write_frame(&mut self, frame: &Frame) {
            let mut buf = Vec::new();
            self.encoder.encode(frame, &mut buf);
            self.io.write_all(&buf).await.unwrap();
        }

        async fn write_raw(&mut self, bytes: &[u8]) {
            self.io.write_all(bytes).await.unwrap();
        }

        fn response_headers(&self, status: &str, end_stream: bool) -> Frame {
            let mut parts = Parts::new();
            parts.pseudo_mut().set_status(Some(status.to_string()));
            parts
                .headers_mut()
                .append("content-type", "text/plain")
                .unwrap();
            let mut flags = FrameFlags::empty();
            flags.set_end_headers(true);
            flags.set_end_stream(end_stream);
            Frame::new(1, flags, Payload::Headers(H2Headers::new(parts)))
        }
    }

    fn request_head() -> H2RequestHead {
        H2RequestHead {
            method: "GET".to_string(),
            scheme: "https".to_string(),
            authority: "example.com".to_string(),
            path: "/".to_string(),
            headers: Headers::new(),
        }
    }

    /// UT test cases for a complete request/response exchange.
    ///
    /// # Brief
    /// 1. Runs the settings exchange over a duplex pipe.
    /// 2. Serves a 200 with a two-byte body to the client's first request.
    /// 3. Checks stream id, pseudo-headers, status and body content.
    #[tokio::test]
    async fn ut_h2_conn_roundtrip() {
        let (client_io, server_io) = tokio::io::duplex(256 * 1024);
        let client = spawn_connection(client_io);
        let cancel = CancellationToken::new();

        let server = tokio::spawn(async move {
            let mut peer = ServerPeer::start(server_io).await;
            let headers = peer.next_frame_of(FrameType::Headers).await;
            assert_eq!(headers.stream_id(), 1);
            assert!(headers.flags().is_end_stream());
            if let Payload::Headers(block) = headers.payload() {
                let (pseudo, _) = block.parts();
                assert_eq!(pseudo.method(), Some("GET"));
                assert_eq!(pseudo.scheme(), Some("https"));
                assert_eq!(pseudo.authority(), Some("example.com"));
                assert_eq!(pseudo.path(), Some("/"));
            } else {
                panic!("expected headers payload");
            }
            let response = peer.response_headers("200", false);
            peer.write_frame(&response).await;
            let mut flags = FrameFlags::empty();
            flags.set_end_stream(true);
            peer.write_frame(&Frame::new(
                1,
                flags,
                Payload::Data(Data::new(b"OK".to_vec())),
            ))
            .await;
            peer
        });

        let parts = client
            .send_request(request_head(), H2SendBody::Empty, Deadline::none(), &cancel)
            .await
            .unwrap();
        assert_eq!(parts.status, 200);
        assert_eq!(
            parts.headers.get("content-type"),
            Some("text/plain".to_string())
        );
        let mut body = parts.body;
        let mut collected = Vec::new();
        while let Some(chunk) = body.next_chunk().await {
            collected.extend(chunk.unwrap());
        }
        assert_eq!(collected, b"OK");
        server.await.unwrap();
    }

    /// UT test cases for request-body flow control.
    ///
    /// # Brief
    /// 1. Sends a body larger than the default 65535-byte windows.
    /// 2. Checks the client stalls at the window and resumes after
    ///    WINDOW_UPDATE on both levels.
    /// 3. Checks the server receives every byte with END_STREAM last.
    #[tokio::test]
    async fn ut_h2_conn_flow_control() {
        let (client_io, server_io) = tokio::io::duplex(1024 * 1024);
        let client = spawn_connection(client_io);
        let cancel = CancellationToken::new();
        let body_len = 100_000usize;

        let server = tokio::spawn(async move {
            let mut peer = ServerPeer::start(server_io).await;
            let _headers = peer.next_frame_of(FrameType::Headers).await;
            let mut received = 0usize;
            let mut updated = false;
            loop {
                let frame = peer.next_frame_of(FrameType::Data).await;
                let (len, end) = match frame.payload() {
                    Payload::Data(data) => (data.size(), frame.flags().is_end_stream()),
                    _ => unreachable!(),
                };
                received += len;
                if end {
                    break;
                }
                if !updated && received >= 65_535 {
                    // The client exhausted both windows; refill them.
                    updated = true;
                    peer.write_frame(&Frame::new(
                        0,
                        FrameFlags::empty(),
                        Payload::WindowUpdate(WindowUpdate::new(200_000)),
                    ))
                    .await;
                    peer.write_frame(&Frame::new(
                        1,
                        FrameFlags::empty(),
                        Payload::WindowUpdate(WindowUpdate::new(200_000)),
                    ))
                    .await;
                }
            }
            assert!(updated, "window refill never became necessary");
            received
        });

        let parts = client.send_request(
            request_head(),
            H2SendBody::Buffer(vec![7u8; body_len]),
            Deadline::none(),
            &cancel,
        );
        // The response arrives only after the server has drained the body.
        let respond = async {
            let received = server.await.unwrap();
            assert_eq!(received, body_len);
        };
        let (sent, ()) = tokio::join!(parts, respond);
        // The server task above never responds with HEADERS, so the
        // request itself ends in connection teardown once the server side
        // of the pipe drops.
        assert!(sent.is_err());
    }

    /// UT test cases for GOAWAY refusal.
    ///
    /// # Brief
    /// 1. Sends GOAWAY with last-stream-id 0 after the first HEADERS.
    /// 2. Checks the in-flight request fails as refused.
    /// 3. Checks the connection stops accepting new streams.
    #[tokio::test]
    async fn ut_h2_conn_goaway_refuses_streams() {
        let (client_io, server_io) = tokio::io::duplex(256 * 1024);
        let client = spawn_connection(client_io);
        let cancel = CancellationToken::new();

        let server = tokio::spawn(async move {
            let mut peer = ServerPeer::start(server_io).await;
            let _headers = peer.next_frame_of(FrameType::Headers).await;
            peer.write_frame(&Frame::new(
                0,
                FrameFlags::empty(),
                Payload::Goaway(Goaway::new(0, 0, Vec::new())),
            ))
            .await;
            peer
        });

        let err = client
            .send_request(request_head(), H2SendBody::Empty, Deadline::none(), &cancel)
            .await
            .unwrap_err();
        assert!(err.cause_string().contains("refused by GOAWAY"));
        let _peer = server.await.unwrap();

        assert!(!client.has_capacity());
        let err = client
            .send_request(request_head(), H2SendBody::Empty, Deadline::none(), &cancel)
            .await
            .unwrap_err();
        assert!(err.cause_string().contains("draining"));
    }

    /// UT test cases for PING acknowledgement.
    ///
    /// # Brief
    /// 1. Sends a PING with opaque data.
    /// 2. Checks the PING ACK echoes the data with the ACK flag.
    #[tokio::test]
    async fn ut_h2_conn_ping_ack() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let _client = spawn_connection(client_io);

        let mut peer = ServerPeer::start(server_io).await;
        peer.write_frame(&Frame::new(
            0,
            FrameFlags::empty(),
            Payload::Ping(Ping::new([3; 8])),
        ))
        .await;
        let ack = peer.next_frame_of(FrameType::Ping).await;
        assert!(ack.flags().is_ack());
        match ack.payload() {
            Payload::Ping(ping) => assert_eq!(ping.data(), [3; 8]),
            _ => unreachable!(),
        }
    }

    /// UT test cases for HPACK desync handling.
    ///
    /// # Brief
    /// 1. Sends a header block with a table-size update after a field.
    /// 2. Checks the client answers GOAWAY(COMPRESSION_ERROR) and fails the
    ///    in-flight request.
    #[tokio::test]
    async fn ut_h2_conn_compression_error_goaway() {
        let (client_io, server_io) = tokio::io::duplex(256 * 1024);
        let client = spawn_connection(client_io);
        let cancel = CancellationToken::new();

        let server = tokio::spawn(async move {
            let mut peer = ServerPeer::start(server_io).await;
            let _headers = peer.next_frame_of(FrameType::Headers).await;
            // Indexed :status 200 (0x88) then a size update (0x20): the
            // update is only legal at the block start.
            let mut raw = vec![0x00, 0x00, 0x02, 0x01, 0x04, 0x00, 0x00, 0x00, 0x01];
            raw.extend_from_slice(&[0x88, 0x20]);
            peer.write_raw(&raw).await;
            let goaway = peer.next_frame_of(FrameType::Goaway).await;
            match goaway.payload() {
                Payload::Goaway(goaway) => assert_eq!(goaway.error_code(), 0x09),
                _ => unreachable!(),
            }
        });

        let err = client
            .send_request(request_head(), H2SendBody::Empty, Deadline::none(), &cancel)
            .await
            .unwrap_err();
        assert!(err.cause_string().contains("protocol error"));
        server.await.unwrap();
    }

    /// UT test cases for the settings-exchange timeout.
    ///
    /// # Brief
    /// 1. Lets the peer stay silent past the settings window.
    /// 2. Checks the pending request fails with the settings timeout.
    #[tokio::test(start_paused = true)]
    async fn ut_h2_conn_settings_timeout() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let client = spawn_connection(client_io);
        let cancel = CancellationToken::new();

        let err = client
            .send_request(request_head(), H2SendBody::Empty, Deadline::none(), &cancel)
            .await
            .unwrap_err();
        assert!(err.cause_string().contains("settings exchange timed out"));
        drop(server_io);
    }
}
