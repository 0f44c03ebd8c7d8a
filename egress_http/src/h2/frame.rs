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

//! HTTP/2 [`frame`] model.
//!
//! [`frame`]: https://httpwg.org/specs/rfc9113.html#FramingLayer

use crate::h2::{ErrorCode, H2Error, Parts};

/// Streams are identified by an unsigned 31-bit integer.
pub type StreamId = u32;

pub(crate) const END_STREAM_MASK: u8 = 0x01;
pub(crate) const END_HEADERS_MASK: u8 = 0x04;
pub(crate) const PADDED_MASK: u8 = 0x08;
pub(crate) const PRIORITY_MASK: u8 = 0x20;
pub(crate) const ACK_MASK: u8 = 0x01;

/// One HTTP/2 frame: stream id, flags and a typed payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    id: StreamId,
    flags: FrameFlags,
    payload: Payload,
}

/// The numeric frame types of RFC 9113 section 6.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum FrameType {
    Data = 0x0,
    Headers = 0x1,
    Priority = 0x2,
    RstStream = 0x3,
    Settings = 0x4,
    PushPromise = 0x5,
    Ping = 0x6,
    Goaway = 0x7,
    WindowUpdate = 0x8,
    Continuation = 0x9,
}

/// The typed payload of a frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// HEADERS frame payload, with its CONTINUATION chain already merged.
    Headers(Headers),
    /// DATA frame payload with padding removed.
    Data(Data),
    /// PRIORITY frame payload.
    Priority(Priority),
    /// RST_STREAM frame payload.
    RstStream(RstStream),
    /// SETTINGS frame payload.
    Settings(Settings),
    /// PING frame payload.
    Ping(Ping),
    /// GOAWAY frame payload.
    Goaway(Goaway),
    /// WINDOW_UPDATE frame payload.
    WindowUpdate(WindowUpdate),
}

/// The flags octet of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameFlags(u8);

/// HEADERS payload: decoded pseudo-headers plus regular headers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Headers {
    parts: Parts,
}

/// DATA payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Data {
    data: Vec<u8>,
    /// The wire payload length, padding included. Flow control is charged
    /// for this, not for the unpadded data.
    flow: usize,
}

/// PRIORITY payload. The engine never acts on priorities; the frame is
/// parsed so its shape can be validated and then ignored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Priority {
    exclusive: bool,
    stream_dependency: StreamId,
    weight: u8,
}

/// RST_STREAM payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RstStream {
    error_code: u32,
}

/// SETTINGS payload.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Settings {
    settings: Vec<Setting>,
}

/// A single SETTINGS parameter.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Setting {
    /// SETTINGS_HEADER_TABLE_SIZE.
    HeaderTableSize(u32),
    /// SETTINGS_ENABLE_PUSH.
    EnablePush(bool),
    /// SETTINGS_MAX_CONCURRENT_STREAMS.
    MaxConcurrentStreams(u32),
    /// SETTINGS_INITIAL_WINDOW_SIZE.
    InitialWindowSize(u32),
    /// SETTINGS_MAX_FRAME_SIZE.
    MaxFrameSize(u32),
    /// SETTINGS_MAX_HEADER_LIST_SIZE.
    MaxHeaderListSize(u32),
}

/// PING payload: 8 opaque bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ping {
    data: [u8; 8],
}

/// GOAWAY payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Goaway {
    last_stream_id: StreamId,
    error_code: u32,
    debug_data: Vec<u8>,
}

/// WINDOW_UPDATE payload: a 31-bit increment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowUpdate {
    increment: u32,
}

/// A builder of SETTINGS payloads.
#[derive(Default)]
pub struct SettingsBuilder {
    settings: Vec<Setting>,
}

impl Frame {
    /// Constructs a frame from its components.
    pub fn new(id: StreamId, flags: FrameFlags, payload: Payload) -> Self {
        Frame { id, flags, payload }
    }

    /// Returns the stream id.
    pub fn stream_id(&self) -> StreamId {
        self.id
    }

    /// Returns the flags.
    pub fn flags(&self) -> FrameFlags {
        self.flags
    }

    /// Returns the payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Consumes the frame and returns the payload.
    pub fn into_payload(self) -> Payload {
        self.payload
    }
}

impl FrameFlags {
    /// Creates flags from the raw octet.
    pub fn new(flags: u8) -> Self {
        FrameFlags(flags)
    }

    /// Creates an empty flags octet.
    pub fn empty() -> Self {
        FrameFlags(0)
    }

    /// Returns the raw octet.
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Whether END_STREAM is set.
    pub fn is_end_stream(&self) -> bool {
        self.0 & END_STREAM_MASK != 0
    }

    /// Whether END_HEADERS is set.
    pub fn is_end_headers(&self) -> bool {
        self.0 & END_HEADERS_MASK != 0
    }

    /// Whether PADDED is set.
    pub fn is_padded(&self) -> bool {
        self.0 & PADDED_MASK != 0
    }

    /// Whether ACK is set (SETTINGS and PING frames).
    pub fn is_ack(&self) -> bool {
        self.0 & ACK_MASK != 0
    }

    /// Sets or clears END_STREAM.
    pub fn set_end_stream(&mut self, end_stream: bool) {
        if end_stream {
            self.0 |= END_STREAM_MASK;
        } else {
            self.0 &= !END_STREAM_MASK;
        }
    }

    /// Sets or clears END_HEADERS.
    pub fn set_end_headers(&mut self, end_headers: bool) {
        if end_headers {
            self.0 |= END_HEADERS_MASK;
        } else {
            self.0 &= !END_HEADERS_MASK;
        }
    }
}

impl Payload {
    /// Returns the frame type this payload belongs to.
    pub fn frame_type(&self) -> FrameType {
        match self {
            Payload::Headers(_) => FrameType::Headers,
            Payload::Data(_) => FrameType::Data,
            Payload::Priority(_) => FrameType::Priority,
            Payload::RstStream(_) => FrameType::RstStream,
            Payload::Settings(_) => FrameType::Settings,
            Payload::Ping(_) => FrameType::Ping,
            Payload::Goaway(_) => FrameType::Goaway,
            Payload::WindowUpdate(_) => FrameType::WindowUpdate,
        }
    }
}

impl Headers {
    /// Creates a HEADERS payload from decoded parts.
    pub fn new(parts: Parts) -> Self {
        Headers { parts }
    }

    /// Returns the pseudo-headers and regular headers.
    pub fn parts(&self) -> (&crate::pseudo::PseudoHeaders, &crate::headers::Headers) {
        self.parts.parts()
    }

    /// Consumes the payload, returning the parts.
    pub fn into_parts(self) -> Parts {
        self.parts
    }
}

impl Data {
    /// Creates a DATA payload.
    pub fn new(data: Vec<u8>) -> Self {
        let flow = data.len();
        Data { data, flow }
    }

    /// Returns the wire length this payload charges against flow control.
    pub fn flow_len(&self) -> usize {
        self.flow
    }

    pub(crate) fn set_flow_len(&mut self, flow: usize) {
        self.flow = flow;
    }

    /// Returns the payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the payload size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Consumes the payload, returning the bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl Priority {
    /// Creates a PRIORITY payload.
    pub fn new(exclusive: bool, stream_dependency: StreamId, weight: u8) -> Self {
        Priority {
            exclusive,
            stream_dependency,
            weight,
        }
    }

    /// Returns the exclusive flag.
    pub fn exclusive(&self) -> bool {
        self.exclusive
    }

    /// Returns the stream this one depends on.
    pub fn stream_dependency(&self) -> StreamId {
        self.stream_dependency
    }

    /// Returns the weight.
    pub fn weight(&self) -> u8 {
        self.weight
    }
}

impl RstStream {
    /// Creates a RST_STREAM payload.
    pub fn new(error_code: u32) -> Self {
        RstStream { error_code }
    }

    /// Returns the raw error code.
    pub fn error_code(&self) -> u32 {
        self.error_code
    }

    /// Whether the code is NO_ERROR.
    pub fn is_no_error(&self) -> bool {
        self.error_code == 0
    }

    /// Interprets the payload as the stream error it conveys.
    pub fn error(&self, id: StreamId) -> Result<H2Error, H2Error> {
        Ok(H2Error::StreamError(id, ErrorCode::try_from(self.error_code)?))
    }
}

impl Settings {
    /// Creates a SETTINGS payload.
    pub fn new(settings: Vec<Setting>) -> Self {
        Settings { settings }
    }

    /// Returns the contained settings.
    pub fn get_settings(&self) -> &[Setting] {
        &self.settings
    }

    /// Returns an ACK SETTINGS frame, which always has an empty payload.
    pub fn ack() -> Frame {
        Frame::new(
            0,
            FrameFlags::new(ACK_MASK),
            Payload::Settings(Settings::new(vec![])),
        )
    }
}

impl Setting {
    /// Returns the 16-bit identifier of the setting.
    pub fn identifier(&self) -> u16 {
        match self {
            Setting::HeaderTableSize(_) => 0x01,
            Setting::EnablePush(_) => 0x02,
            Setting::MaxConcurrentStreams(_) => 0x03,
            Setting::InitialWindowSize(_) => 0x04,
            Setting::MaxFrameSize(_) => 0x05,
            Setting::MaxHeaderListSize(_) => 0x06,
        }
    }

    /// Returns the 32-bit value of the setting.
    pub fn value(&self) -> u32 {
        match self {
            Setting::HeaderTableSize(v) => *v,
            Setting::EnablePush(v) => *v as u32,
            Setting::MaxConcurrentStreams(v) => *v,
            Setting::InitialWindowSize(v) => *v,
            Setting::MaxFrameSize(v) => *v,
            Setting::MaxHeaderListSize(v) => *v,
        }
    }
}

impl Ping {
    /// Creates a PING payload.
    pub fn new(data: [u8; 8]) -> Self {
        Ping { data }
    }

    /// Returns the opaque bytes.
    pub fn data(&self) -> [u8; 8] {
        self.data
    }

    /// Returns the PING-ACK frame answering `ping`.
    pub fn ack(ping: Ping) -> Frame {
        Frame::new(0, FrameFlags::new(ACK_MASK), Payload::Ping(ping))
    }
}

impl Goaway {
    /// Creates a GOAWAY payload.
    pub fn new(error_code: u32, last_stream_id: StreamId, debug_data: Vec<u8>) -> Self {
        Goaway {
            last_stream_id,
            error_code,
            debug_data,
        }
    }

    /// Returns the id of the last stream the sender may act on.
    pub fn last_stream_id(&self) -> StreamId {
        self.last_stream_id
    }

    /// Returns the raw error code.
    pub fn error_code(&self) -> u32 {
        self.error_code
    }

    /// Returns the debug data.
    pub fn debug_data(&self) -> &[u8] {
        &self.debug_data
    }
}

impl WindowUpdate {
    /// Creates a WINDOW_UPDATE payload.
    pub fn new(increment: u32) -> Self {
        WindowUpdate { increment }
    }

    /// Returns the 31-bit increment.
    pub fn increment(&self) -> u32 {
        self.increment
    }
}

impl SettingsBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// SETTINGS_HEADER_TABLE_SIZE (0x01).
    pub fn header_table_size(mut self, size: u32) -> Self {
        self.settings.push(Setting::HeaderTableSize(size));
        self
    }

    /// SETTINGS_ENABLE_PUSH (0x02).
    pub fn enable_push(mut self, enable: bool) -> Self {
        self.settings.push(Setting::EnablePush(enable));
        self
    }

    /// SETTINGS_MAX_CONCURRENT_STREAMS (0x03).
    pub fn max_concurrent_streams(mut self, num: u32) -> Self {
        self.settings.push(Setting::MaxConcurrentStreams(num));
        self
    }

    /// SETTINGS_INITIAL_WINDOW_SIZE (0x04).
    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.settings.push(Setting::InitialWindowSize(size));
        self
    }

    /// SETTINGS_MAX_FRAME_SIZE (0x05).
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.settings.push(Setting::MaxFrameSize(size));
        self
    }

    /// Consumes the builder and constructs the SETTINGS payload.
    pub fn build(self) -> Settings {
        Settings::new(self.settings)
    }
}

#[cfg(test)]
mod ut_frame {
    use super::*;

    /// UT test cases for `SettingsBuilder`.
    ///
    /// # Brief
    /// 1. Builds a SETTINGS payload with several parameters.
    /// 2. Checks the parameters appear in order with the right identifiers.
    #[test]
    fn ut_settings_builder() {
        let settings = SettingsBuilder::new()
            .enable_push(false)
            .initial_window_size(2 << 20)
            .max_frame_size(64 * 1024)
            .header_table_size(4096)
            .build();
        let ids: Vec<u16> = settings
            .get_settings()
            .iter()
            .map(Setting::identifier)
            .collect();
        assert_eq!(ids, vec![0x02, 0x04, 0x05, 0x01]);
    }

    /// UT test cases for `FrameFlags`.
    ///
    /// # Brief
    /// 1. Sets and clears individual flags.
    /// 2. Checks the accessor bits.
    #[test]
    fn ut_frame_flags() {
        let mut flags = FrameFlags::empty();
        assert!(!flags.is_end_stream());
        flags.set_end_stream(true);
        flags.set_end_headers(true);
        assert!(flags.is_end_stream());
        assert!(flags.is_end_headers());
        assert_eq!(flags.bits(), END_STREAM_MASK | END_HEADERS_MASK);
        flags.set_end_stream(false);
        assert!(!flags.is_end_stream());
    }

    /// UT test cases for ACK constructors.
    ///
    /// # Brief
    /// 1. Builds SETTINGS and PING ACK frames.
    /// 2. Checks the ACK flag and stream id zero.
    #[test]
    fn ut_frame_acks() {
        let ack = Settings::ack();
        assert_eq!(ack.stream_id(), 0);
        assert!(ack.flags().is_ack());

        let ping = Ping::ack(Ping::new([7; 8]));
        assert!(ping.flags().is_ack());
        assert_eq!(ping.stream_id(), 0);
    }

    /// UT test cases for `RstStream::error`.
    ///
    /// # Brief
    /// 1. Interprets known and unknown error codes.
    #[test]
    fn ut_rst_stream_error() {
        let rst = RstStream::new(0x08);
        assert_eq!(
            rst.error(5),
            Ok(H2Error::StreamError(5, ErrorCode::Cancel))
        );
        assert!(RstStream::new(0xffff).error(5).is_err());
        assert!(RstStream::new(0).is_no_error());
    }
}
