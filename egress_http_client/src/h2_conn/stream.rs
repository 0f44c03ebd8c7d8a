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

//! Per-stream state.
//!
//! Client-initiated streams are odd and monotonically increasing. An entry
//! is created when HEADERS is sent (idle → open), and its life follows the
//! RFC 9113 state machine:
//!
//! ```text
//!            open
//!      send ES /  \ recv ES
//! half-closed(l)  half-closed(r)
//!      recv ES \  / send ES
//!           closed
//! ```
//!
//! RST_STREAM, in either direction, and connection teardown jump straight
//! to closed.

use tokio::sync::{mpsc, oneshot};

use crate::error::HttpClientError;
use crate::h2_conn::client::H2ResponseParts;
use crate::h2_conn::window::{RecvWindow, SendWindow};

/// The lifecycle states of a created stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StreamState {
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    /// Transition on sending END_STREAM.
    pub(crate) fn on_send_end_stream(self) -> Self {
        match self {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        }
    }

    /// Transition on receiving END_STREAM.
    pub(crate) fn on_recv_end_stream(self) -> Self {
        match self {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => StreamState::Closed,
            other => other,
        }
    }

    pub(crate) fn is_closed(self) -> bool {
        self == StreamState::Closed
    }

    /// Whether DATA or HEADERS from the peer are still legal.
    pub(crate) fn accepts_peer_frames(self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }
}

/// An outbound body chunk awaiting window credit, with the ack that
/// releases the feeder to read the next chunk.
pub(crate) struct PendingData {
    pub(crate) data: Vec<u8>,
    pub(crate) pos: usize,
    pub(crate) end_stream: bool,
    pub(crate) ack: Option<oneshot::Sender<Result<(), HttpClientError>>>,
}

impl PendingData {
    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

/// One client-initiated stream tracked by the connection actor.
pub(crate) struct Stream {
    pub(crate) state: StreamState,
    /// Settled exactly once with the response head (or its failure).
    pub(crate) resp_tx: Option<oneshot::Sender<Result<H2ResponseParts, HttpClientError>>>,
    /// Producer side of the response body channel.
    pub(crate) body_tx: Option<mpsc::UnboundedSender<Result<Vec<u8>, HttpClientError>>>,
    /// Consumer side, handed out with the response head.
    pub(crate) body_rx: Option<mpsc::UnboundedReceiver<Result<Vec<u8>, HttpClientError>>>,
    pub(crate) send_window: SendWindow,
    pub(crate) recv_window: RecvWindow,
    pub(crate) pending: Option<PendingData>,
    /// Set while the stream sits out of the connection wait queue because
    /// its own window is empty.
    pub(crate) blocked_on_stream_window: bool,
}

impl Stream {
    pub(crate) fn new(
        send_initial: u32,
        recv_initial: u32,
        resp_tx: oneshot::Sender<Result<H2ResponseParts, HttpClientError>>,
    ) -> Self {
        let (body_tx, body_rx) = mpsc::unbounded_channel();
        Self {
            state: StreamState::Open,
            resp_tx: Some(resp_tx),
            body_tx: Some(body_tx),
            body_rx: Some(body_rx),
            send_window: SendWindow::new(send_initial),
            recv_window: RecvWindow::new(recv_initial),
            pending: None,
            blocked_on_stream_window: false,
        }
    }

    /// Fails whichever consumer surfaces are still waiting and closes the
    /// stream. Used for RST_STREAM (both directions), GOAWAY refusal and
    /// connection teardown.
    pub(crate) fn fail(&mut self, make_error: impl Fn() -> HttpClientError) {
        if let Some(tx) = self.resp_tx.take() {
            let _ = tx.send(Err(make_error()));
        }
        if let Some(tx) = self.body_tx.take() {
            let _ = tx.send(Err(make_error()));
        }
        if let Some(pending) = self.pending.take() {
            if let Some(ack) = pending.ack {
                let _ = ack.send(Err(make_error()));
            }
        }
        self.body_rx = None;
        self.state = StreamState::Closed;
    }

    /// Closes the body stream cleanly (peer END_STREAM).
    pub(crate) fn finish_body(&mut self) {
        self.body_tx = None;
    }
}

#[cfg(test)]
mod ut_stream {
    use super::*;

    /// UT test cases for the stream state transitions.
    ///
    /// # Brief
    /// 1. Walks both half-closed paths to closed.
    /// 2. Checks closed is absorbing.
    #[test]
    fn ut_stream_state_transitions() {
        let state = StreamState::Open.on_send_end_stream();
        assert_eq!(state, StreamState::HalfClosedLocal);
        assert_eq!(state.on_recv_end_stream(), StreamState::Closed);

        let state = StreamState::Open.on_recv_end_stream();
        assert_eq!(state, StreamState::HalfClosedRemote);
        assert_eq!(state.on_send_end_stream(), StreamState::Closed);

        assert_eq!(
            StreamState::Closed.on_send_end_stream(),
            StreamState::Closed
        );
        assert_eq!(
            StreamState::Closed.on_recv_end_stream(),
            StreamState::Closed
        );
    }

    /// UT test cases for peer-frame acceptance.
    ///
    /// # Brief
    /// 1. Checks which states still accept HEADERS/DATA from the peer.
    #[test]
    fn ut_stream_accepts_peer_frames() {
        assert!(StreamState::Open.accepts_peer_frames());
        assert!(StreamState::HalfClosedLocal.accepts_peer_frames());
        assert!(!StreamState::HalfClosedRemote.accepts_peer_frames());
        assert!(!StreamState::Closed.accepts_peer_frames());
    }
}
