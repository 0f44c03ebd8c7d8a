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

//! Flow-control windows.
//!
//! [`SendWindow`] is the peer-granted budget this side spends by sending
//! DATA; it can go negative when the peer shrinks SETTINGS_INITIAL_WINDOW_SIZE
//! mid-flight. [`RecvWindow`] tracks how much the peer has sent against the
//! locally-advertised window and decides when a WINDOW_UPDATE is worth
//! emitting. [`WaitQueue`] holds the streams blocked on the connection
//! window, strictly FIFO: a later stream with a smaller claim never
//! overtakes an earlier one.

use std::collections::VecDeque;

use egress_http::h2::{ErrorCode, H2Error, StreamId, MAX_FLOW_CONTROL_WINDOW};

/// The sender-side window of one stream or of the connection.
#[derive(Debug)]
pub(crate) struct SendWindow {
    available: i64,
}

impl SendWindow {
    pub(crate) fn new(initial: u32) -> Self {
        Self {
            available: initial as i64,
        }
    }

    /// Bytes that may be sent right now.
    pub(crate) fn available(&self) -> i64 {
        self.available
    }

    /// Debits sent DATA bytes.
    pub(crate) fn consume(&mut self, n: u32) {
        self.available -= n as i64;
    }

    /// Credits a WINDOW_UPDATE. Exceeding 2^31 - 1 is a fatal flow-control
    /// violation.
    pub(crate) fn update(&mut self, increment: u32) -> Result<(), H2Error> {
        let next = self.available + increment as i64;
        if next > MAX_FLOW_CONTROL_WINDOW as i64 {
            return Err(H2Error::ConnectionError(ErrorCode::FlowControlError));
        }
        self.available = next;
        Ok(())
    }

    /// Applies a SETTINGS_INITIAL_WINDOW_SIZE change: the window shifts by
    /// the delta between the new and old initial sizes.
    pub(crate) fn reset(&mut self, new_initial: u32, old_initial: u32) -> Result<(), H2Error> {
        let delta = new_initial as i64 - old_initial as i64;
        let next = self.available + delta;
        if next > MAX_FLOW_CONTROL_WINDOW as i64 {
            return Err(H2Error::ConnectionError(ErrorCode::FlowControlError));
        }
        self.available = next;
        Ok(())
    }
}

/// The receiver-side window bookkeeping of one stream or of the connection.
#[derive(Debug)]
pub(crate) struct RecvWindow {
    window: u32,
    consumed: u32,
}

impl RecvWindow {
    pub(crate) fn new(window: u32) -> Self {
        Self {
            window,
            consumed: 0,
        }
    }

    /// Records received DATA bytes. Returns the WINDOW_UPDATE increment to
    /// emit once the consumed amount reaches half the window, else `None`.
    pub(crate) fn recv_data(&mut self, n: u32) -> Option<u32> {
        self.consumed = self.consumed.saturating_add(n);
        if u64::from(self.consumed) * 2 >= u64::from(self.window) {
            let increment = self.consumed;
            self.consumed = 0;
            Some(increment)
        } else {
            None
        }
    }
}

/// FIFO queue of streams waiting for connection-window credit.
#[derive(Debug, Default)]
pub(crate) struct WaitQueue {
    order: VecDeque<StreamId>,
}

impl WaitQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends a stream unless it is already queued.
    pub(crate) fn enqueue(&mut self, id: StreamId) {
        if !self.order.contains(&id) {
            self.order.push_back(id);
        }
    }

    /// The stream at the head of the queue. Draining never skips it: if the
    /// head cannot proceed, nothing behind it may.
    pub(crate) fn head(&self) -> Option<StreamId> {
        self.order.front().copied()
    }

    pub(crate) fn pop(&mut self) -> Option<StreamId> {
        self.order.pop_front()
    }

    pub(crate) fn remove(&mut self, id: StreamId) {
        self.order.retain(|queued| *queued != id);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod ut_window {
    use super::*;

    /// UT test cases for the send-window balance invariant.
    ///
    /// # Brief
    /// 1. Interleaves consumes and updates on a window.
    /// 2. Checks the final balance equals `initial - Σconsume + Σupdate`.
    #[test]
    fn ut_send_window_balance() {
        let mut window = SendWindow::new(65_535);
        let consumes = [100u32, 5_000, 60_000, 1];
        let updates = [20_000u32, 45_000, 101];
        window.consume(consumes[0]);
        window.update(updates[0]).unwrap();
        window.consume(consumes[1]);
        window.consume(consumes[2]);
        window.update(updates[1]).unwrap();
        window.consume(consumes[3]);
        window.update(updates[2]).unwrap();
        let expected = 65_535i64 - consumes.iter().map(|c| *c as i64).sum::<i64>()
            + updates.iter().map(|u| *u as i64).sum::<i64>();
        assert_eq!(window.available(), expected);
    }

    /// UT test cases for send-window overflow.
    ///
    /// # Brief
    /// 1. Credits a window beyond 2^31 - 1.
    /// 2. Checks the fatal flow-control error.
    #[test]
    fn ut_send_window_overflow() {
        let mut window = SendWindow::new(MAX_FLOW_CONTROL_WINDOW);
        assert_eq!(
            window.update(1),
            Err(H2Error::ConnectionError(ErrorCode::FlowControlError))
        );
    }

    /// UT test cases for initial-window resets.
    ///
    /// # Brief
    /// 1. Shrinks and grows the initial window size mid-flight.
    /// 2. Checks the available balance shifts by the delta, including into
    ///    negative territory.
    #[test]
    fn ut_send_window_reset() {
        let mut window = SendWindow::new(65_535);
        window.consume(65_000);
        window.reset(1_000, 65_535).unwrap();
        assert_eq!(window.available(), 535 - 64_535);
        window.reset(65_535, 1_000).unwrap();
        assert_eq!(window.available(), 535);
    }

    /// UT test cases for the receive-window update threshold.
    ///
    /// # Brief
    /// 1. Feeds DATA below half the window, then across the half boundary.
    /// 2. Checks the emitted increment equals the consumed total and the
    ///    counter resets.
    #[test]
    fn ut_recv_window_threshold() {
        let mut window = RecvWindow::new(1_000);
        assert_eq!(window.recv_data(300), None);
        assert_eq!(window.recv_data(199), None);
        assert_eq!(window.recv_data(1), Some(500));
        assert_eq!(window.recv_data(499), None);
        assert_eq!(window.recv_data(300), Some(799));
    }

    /// UT test cases for FIFO wait-queue ordering.
    ///
    /// # Brief
    /// 1. Enqueues streams, with one duplicate.
    /// 2. Checks head/pop order matches arrival and the duplicate is
    ///    dropped.
    #[test]
    fn ut_wait_queue_fifo() {
        let mut queue = WaitQueue::new();
        queue.enqueue(5);
        queue.enqueue(1);
        queue.enqueue(5);
        queue.enqueue(9);
        assert_eq!(queue.head(), Some(5));
        assert_eq!(queue.pop(), Some(5));
        assert_eq!(queue.pop(), Some(1));
        queue.remove(9);
        assert!(queue.is_empty());
    }
}
