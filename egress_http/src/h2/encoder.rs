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

//! HTTP/2 [frame] serializer.
//!
//! [frame]: https://httpwg.org/specs/rfc9113.html#FramingLayer
//!
//! A header block larger than the peer's SETTINGS_MAX_FRAME_SIZE is split
//! into a HEADERS frame followed by CONTINUATION frames. The whole chain is
//! produced into one buffer so the caller can write it atomically, keeping
//! frames of other streams from interleaving with it.

use crate::h2::frame::{
    Frame, Payload, ACK_MASK, END_HEADERS_MASK, END_STREAM_MASK,
};
use crate::h2::hpack::HpackEncoder;
use crate::h2::{FrameType, Parts, StreamId, DEFAULT_HEADER_TABLE_SIZE, DEFAULT_MAX_FRAME_SIZE};

/// Serializes frames, holding the connection's HPACK send state.
pub struct FrameEncoder {
    hpack: HpackEncoder,
    max_frame_size: usize,
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameEncoder {
    /// Creates an encoder with the protocol-default table and frame sizes.
    pub fn new() -> Self {
        Self {
            hpack: HpackEncoder::new(DEFAULT_HEADER_TABLE_SIZE),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE as usize,
        }
    }

    /// Applies the peer's SETTINGS_MAX_FRAME_SIZE.
    pub fn set_max_frame_size(&mut self, size: u32) {
        self.max_frame_size = size as usize;
    }

    /// Applies the peer's SETTINGS_HEADER_TABLE_SIZE to the send-side HPACK
    /// table.
    pub fn set_header_table_size(&mut self, size: u32) {
        self.hpack.update_max_table_size(size as usize);
    }

    /// Serializes a frame into `dst`. HEADERS payloads are HPACK-encoded and
    /// may expand into a CONTINUATION chain.
    pub fn encode(&mut self, frame: &Frame, dst: &mut Vec<u8>) {
        let id = frame.stream_id();
        match frame.payload() {
            Payload::Headers(headers) => {
                let (pseudo, fields) = headers.parts();
                let parts = Parts::from_parts(pseudo.clone(), fields.clone());
                self.encode_header_block(id, &parts, frame.flags().is_end_stream(), dst);
            }
            Payload::Data(data) => {
                self.encode_data(id, data.data(), frame.flags().is_end_stream(), dst);
            }
            Payload::Priority(priority) => {
                write_frame_header(dst, 5, FrameType::Priority, 0, id);
                let mut dep = priority.stream_dependency() & 0x7fff_ffff;
                if priority.exclusive() {
                    dep |= 0x8000_0000;
                }
                dst.extend_from_slice(&dep.to_be_bytes());
                dst.push(priority.weight());
            }
            Payload::RstStream(rst) => {
                write_frame_header(dst, 4, FrameType::RstStream, 0, id);
                dst.extend_from_slice(&rst.error_code().to_be_bytes());
            }
            Payload::Settings(settings) => {
                let flags = frame.flags().bits() & ACK_MASK;
                let entries = settings.get_settings();
                write_frame_header(dst, entries.len() * 6, FrameType::Settings, flags, 0);
                for setting in entries {
                    dst.extend_from_slice(&setting.identifier().to_be_bytes());
                    dst.extend_from_slice(&setting.value().to_be_bytes());
                }
            }
            Payload::Ping(ping) => {
                let flags = frame.flags().bits() & ACK_MASK;
                write_frame_header(dst, 8, FrameType::Ping, flags, 0);
                dst.extend_from_slice(&ping.data());
            }
            Payload::Goaway(goaway) => {
                let len = 8 + goaway.debug_data().len();
                write_frame_header(dst, len, FrameType::Goaway, 0, 0);
                dst.extend_from_slice(&(goaway.last_stream_id() & 0x7fff_ffff).to_be_bytes());
                dst.extend_from_slice(&goaway.error_code().to_be_bytes());
                dst.extend_from_slice(goaway.debug_data());
            }
            Payload::WindowUpdate(update) => {
                write_frame_header(dst, 4, FrameType::WindowUpdate, 0, id);
                dst.extend_from_slice(&(update.increment() & 0x7fff_ffff).to_be_bytes());
            }
        }
    }

    /// Serializes a HEADERS frame (plus CONTINUATION frames as needed) for
    /// an already-assembled header block.
    pub fn encode_header_block(
        &mut self,
        id: StreamId,
        parts: &Parts,
        end_stream: bool,
        dst: &mut Vec<u8>,
    ) {
        let mut block = Vec::new();
        self.hpack.encode(parts, &mut block);

        let mut chunks = block.chunks(self.max_frame_size.max(1)).peekable();
        let mut first = true;
        // An empty block still needs one HEADERS frame.
        if chunks.peek().is_none() {
            let flags = headers_flags(true, end_stream);
            write_frame_header(dst, 0, FrameType::Headers, flags, id);
            return;
        }
        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none();
            if first {
                let flags = headers_flags(last, end_stream);
                write_frame_header(dst, chunk.len(), FrameType::Headers, flags, id);
                first = false;
            } else {
                let flags = if last { END_HEADERS_MASK } else { 0 };
                write_frame_header(dst, chunk.len(), FrameType::Continuation, flags, id);
            }
            dst.extend_from_slice(chunk);
        }
    }

    /// Serializes one DATA frame. The caller keeps `data` within both flow
    /// control and the peer's max frame size; oversized input is split.
    pub fn encode_data(&mut self, id: StreamId, data: &[u8], end_stream: bool, dst: &mut Vec<u8>) {
        if data.is_empty() {
            let flags = if end_stream { END_STREAM_MASK } else { 0 };
            write_frame_header(dst, 0, FrameType::Data, flags, id);
            return;
        }
        let mut chunks = data.chunks(self.max_frame_size.max(1)).peekable();
        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none();
            let flags = if last && end_stream { END_STREAM_MASK } else { 0 };
            write_frame_header(dst, chunk.len(), FrameType::Data, flags, id);
            dst.extend_from_slice(chunk);
        }
    }
}

fn headers_flags(end_headers: bool, end_stream: bool) -> u8 {
    let mut flags = 0;
    if end_headers {
        flags |= END_HEADERS_MASK;
    }
    if end_stream {
        flags |= END_STREAM_MASK;
    }
    flags
}

/// Writes the fixed 9-byte frame header: 24-bit length, 8-bit type, 8-bit
/// flags and the 31-bit stream id with the reserved bit masked to zero.
pub(crate) fn write_frame_header(
    dst: &mut Vec<u8>,
    len: usize,
    frame_type: FrameType,
    flags: u8,
    id: StreamId,
) {
    debug_assert!(len < 1 << 24);
    dst.extend_from_slice(&[
        (len >> 16) as u8,
        (len >> 8) as u8,
        len as u8,
        frame_type as u8,
        flags,
    ]);
    dst.extend_from_slice(&(id & 0x7fff_ffff).to_be_bytes());
}

#[cfg(test)]
mod ut_frame_encoder {
    use super::*;
    use crate::h2::{Data, FrameFlags, Goaway, Ping, RstStream, Setting, Settings, WindowUpdate};

    /// UT test cases for the 9-byte frame header.
    ///
    /// # Brief
    /// 1. Encodes a WINDOW_UPDATE with a large stream id.
    /// 2. Checks length, type, flags and the masked stream id.
    #[test]
    fn ut_encode_frame_header() {
        let mut encoder = FrameEncoder::new();
        let mut dst = Vec::new();
        let frame = Frame::new(
            0x8000_0001,
            FrameFlags::empty(),
            Payload::WindowUpdate(WindowUpdate::new(0x1234)),
        );
        encoder.encode(&frame, &mut dst);
        assert_eq!(
            dst,
            [0, 0, 4, 0x8, 0, 0, 0, 0, 1, 0, 0, 0x12, 0x34]
        );
    }

    /// UT test cases for SETTINGS and ACK encoding.
    ///
    /// # Brief
    /// 1. Encodes a SETTINGS frame with one entry and an ACK.
    /// 2. Checks the 6-byte entry layout and the zero-length ACK payload.
    #[test]
    fn ut_encode_settings() {
        let mut encoder = FrameEncoder::new();
        let mut dst = Vec::new();
        let frame = Frame::new(
            0,
            FrameFlags::empty(),
            Payload::Settings(Settings::new(vec![Setting::EnablePush(false)])),
        );
        encoder.encode(&frame, &mut dst);
        assert_eq!(dst, [0, 0, 6, 0x4, 0, 0, 0, 0, 0, 0, 0x02, 0, 0, 0, 0]);

        let mut dst = Vec::new();
        encoder.encode(&Settings::ack(), &mut dst);
        assert_eq!(dst, [0, 0, 0, 0x4, 0x1, 0, 0, 0, 0]);
    }

    /// UT test cases for DATA, RST_STREAM, PING and GOAWAY encoding.
    ///
    /// # Brief
    /// 1. Encodes one of each frame type.
    /// 2. Checks payload layout and flag placement.
    #[test]
    fn ut_encode_misc_frames() {
        let mut encoder = FrameEncoder::new();

        let mut dst = Vec::new();
        let mut flags = FrameFlags::empty();
        flags.set_end_stream(true);
        let frame = Frame::new(3, flags, Payload::Data(Data::new(b"hi".to_vec())));
        encoder.encode(&frame, &mut dst);
        assert_eq!(dst, [0, 0, 2, 0x0, 0x1, 0, 0, 0, 3, b'h', b'i']);

        let mut dst = Vec::new();
        let frame = Frame::new(5, FrameFlags::empty(), Payload::RstStream(RstStream::new(8)));
        encoder.encode(&frame, &mut dst);
        assert_eq!(dst, [0, 0, 4, 0x3, 0, 0, 0, 0, 5, 0, 0, 0, 8]);

        let mut dst = Vec::new();
        encoder.encode(&Ping::ack(Ping::new([1; 8])), &mut dst);
        assert_eq!(&dst[..9], &[0, 0, 8, 0x6, 0x1, 0, 0, 0, 0]);

        let mut dst = Vec::new();
        let frame = Frame::new(
            0,
            FrameFlags::empty(),
            Payload::Goaway(Goaway::new(0, 7, b"bye".to_vec())),
        );
        encoder.encode(&frame, &mut dst);
        assert_eq!(&dst[..9], &[0, 0, 11, 0x7, 0, 0, 0, 0, 0]);
        assert_eq!(&dst[9..13], &[0, 0, 0, 7]);
        assert_eq!(&dst[17..], b"bye");
    }

    /// UT test cases for CONTINUATION splitting.
    ///
    /// # Brief
    /// 1. Shrinks the frame-size limit and encodes a large header block.
    /// 2. Checks the chain is HEADERS followed by CONTINUATION frames and
    ///    only the last frame carries END_HEADERS.
    #[test]
    fn ut_encode_continuation_chain() {
        let mut encoder = FrameEncoder::new();
        encoder.set_max_frame_size(16);
        let mut parts = Parts::new();
        parts
            .headers_mut()
            .append("x-large", &"v".repeat(128))
            .unwrap();
        let mut dst = Vec::new();
        encoder.encode_header_block(9, &parts, false, &mut dst);

        let mut pos = 0;
        let mut types = Vec::new();
        let mut last_flags = 0;
        while pos < dst.len() {
            let len = ((dst[pos] as usize) << 16) | ((dst[pos + 1] as usize) << 8) | dst[pos + 2] as usize;
            types.push(dst[pos + 3]);
            last_flags = dst[pos + 4];
            assert!(len <= 16);
            pos += 9 + len;
        }
        assert!(types.len() > 1);
        assert_eq!(types[0], 0x1);
        assert!(types[1..].iter().all(|t| *t == 0x9));
        assert_eq!(last_flags & 0x4, 0x4);
    }
}
