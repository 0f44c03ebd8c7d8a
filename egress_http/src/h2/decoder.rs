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

//! HTTP/2 [frame] parser.
//!
//! [frame]: https://httpwg.org/specs/rfc9113.html#FramingLayer
//!
//! A two-state machine: read the 9-byte frame header, then the payload. The
//! length field is checked against the locally-advertised
//! SETTINGS_MAX_FRAME_SIZE as soon as the header is complete, so an
//! over-sized payload fails before any of it is buffered.
//!
//! A HEADERS frame without END_HEADERS opens a header block; every following
//! frame must be a CONTINUATION for the same stream until the block ends.
//! The assembled block is bounded to keep a peer from streaming an
//! unbounded header section one small frame at a time.

use crate::h2::frame::{Data, Frame, FrameFlags, Goaway, Payload, Ping, Priority, RstStream, WindowUpdate};
use crate::h2::hpack::HpackDecoder;
use crate::h2::{
    ErrorCode, H2Error, Setting, Settings, StreamId, DEFAULT_HEADER_TABLE_SIZE,
    FRAME_HEADER_LENGTH, MAX_FLOW_CONTROL_WINDOW, MAX_HEADER_BLOCK_SIZE,
};

const DATA_TYPE: u8 = 0x0;
const HEADERS_TYPE: u8 = 0x1;
const PRIORITY_TYPE: u8 = 0x2;
const RST_STREAM_TYPE: u8 = 0x3;
const SETTINGS_TYPE: u8 = 0x4;
const PUSH_PROMISE_TYPE: u8 = 0x5;
const PING_TYPE: u8 = 0x6;
const GOAWAY_TYPE: u8 = 0x7;
const WINDOW_UPDATE_TYPE: u8 = 0x8;
const CONTINUATION_TYPE: u8 = 0x9;

/// An in-progress header block: HEADERS received, END_HEADERS not yet.
struct HeaderBlock {
    id: StreamId,
    end_stream: bool,
    fragment: Vec<u8>,
}

/// Parses wire bytes into [`Frame`]s, holding the connection's HPACK
/// receive state.
pub struct FrameDecoder {
    buffer: Vec<u8>,
    hpack: HpackDecoder,
    max_frame_size: u32,
    header_block: Option<HeaderBlock>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(crate::h2::DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameDecoder {
    /// Creates a decoder enforcing the locally-advertised maximum frame
    /// size.
    pub fn new(max_frame_size: u32) -> Self {
        Self {
            buffer: Vec::new(),
            hpack: HpackDecoder::new(DEFAULT_HEADER_TABLE_SIZE),
            max_frame_size,
            header_block: None,
        }
    }

    /// Feeds wire bytes and returns every frame completed by them.
    ///
    /// An `Err` is a connection error: parsing state is poisoned and the
    /// caller must tear the connection down with the matching GOAWAY code.
    pub fn decode(&mut self, input: &[u8]) -> Result<Vec<Frame>, H2Error> {
        self.buffer.extend_from_slice(input);
        let mut frames = Vec::new();
        let mut pos = 0usize;

        loop {
            let remaining = &self.buffer[pos..];
            if remaining.len() < FRAME_HEADER_LENGTH {
                break;
            }
            let len = ((remaining[0] as usize) << 16)
                | ((remaining[1] as usize) << 8)
                | remaining[2] as usize;
            if len > self.max_frame_size as usize {
                return Err(H2Error::ConnectionError(ErrorCode::FrameSizeError));
            }
            if remaining.len() < FRAME_HEADER_LENGTH + len {
                break;
            }
            let frame_type = remaining[3];
            let flags = remaining[4];
            let id = u32::from_be_bytes([remaining[5], remaining[6], remaining[7], remaining[8]])
                & 0x7fff_ffff;
            let payload = &self.buffer[pos + FRAME_HEADER_LENGTH..pos + FRAME_HEADER_LENGTH + len];
            // Borrow juggling: parse against a copied payload slice so the
            // HPACK state can be mutated.
            let payload = payload.to_vec();
            pos += FRAME_HEADER_LENGTH + len;
            if let Some(frame) = self.parse_frame(frame_type, flags, id, &payload)? {
                frames.push(frame);
            }
        }

        self.buffer.drain(..pos);
        Ok(frames)
    }

    fn parse_frame(
        &mut self,
        frame_type: u8,
        flags: u8,
        id: StreamId,
        payload: &[u8],
    ) -> Result<Option<Frame>, H2Error> {
        if let Some(block) = &mut self.header_block {
            // Only CONTINUATION for the same stream may appear inside an
            // open header block.
            if frame_type != CONTINUATION_TYPE || id != block.id {
                return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
            }
            if block.fragment.len() + payload.len() > MAX_HEADER_BLOCK_SIZE {
                return Err(H2Error::ConnectionError(ErrorCode::EnhanceYourCalm));
            }
            block.fragment.extend_from_slice(payload);
            if flags & 0x4 != 0 {
                let block = self.header_block.take().unwrap();
                return self.finish_header_block(block).map(Some);
            }
            return Ok(None);
        }

        match frame_type {
            DATA_TYPE => self.parse_data(flags, id, payload).map(Some),
            HEADERS_TYPE => self.parse_headers(flags, id, payload),
            PRIORITY_TYPE => {
                if payload.len() != 5 {
                    return Err(H2Error::ConnectionError(ErrorCode::FrameSizeError));
                }
                if id == 0 {
                    return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
                }
                let word = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
                let priority = Priority::new(word & 0x8000_0000 != 0, word & 0x7fff_ffff, payload[4]);
                Ok(Some(Frame::new(
                    id,
                    FrameFlags::new(flags),
                    Payload::Priority(priority),
                )))
            }
            RST_STREAM_TYPE => {
                if id == 0 {
                    return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
                }
                if payload.len() != 4 {
                    return Err(H2Error::ConnectionError(ErrorCode::FrameSizeError));
                }
                let code = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
                Ok(Some(Frame::new(
                    id,
                    FrameFlags::new(flags),
                    Payload::RstStream(RstStream::new(code)),
                )))
            }
            SETTINGS_TYPE => self.parse_settings(flags, id, payload).map(Some),
            PUSH_PROMISE_TYPE => {
                // Push is disabled by our SETTINGS, so any PUSH_PROMISE is a
                // protocol violation.
                Err(H2Error::ConnectionError(ErrorCode::ProtocolError))
            }
            PING_TYPE => {
                if id != 0 {
                    return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
                }
                if payload.len() != 8 {
                    return Err(H2Error::ConnectionError(ErrorCode::FrameSizeError));
                }
                let mut data = [0u8; 8];
                data.copy_from_slice(payload);
                Ok(Some(Frame::new(
                    0,
                    FrameFlags::new(flags),
                    Payload::Ping(Ping::new(data)),
                )))
            }
            GOAWAY_TYPE => {
                if id != 0 {
                    return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
                }
                if payload.len() < 8 {
                    return Err(H2Error::ConnectionError(ErrorCode::FrameSizeError));
                }
                let last = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]])
                    & 0x7fff_ffff;
                let code = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
                Ok(Some(Frame::new(
                    0,
                    FrameFlags::new(flags),
                    Payload::Goaway(Goaway::new(code, last, payload[8..].to_vec())),
                )))
            }
            WINDOW_UPDATE_TYPE => {
                if payload.len() != 4 {
                    return Err(H2Error::ConnectionError(ErrorCode::FrameSizeError));
                }
                let increment =
                    u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]])
                        & 0x7fff_ffff;
                if increment == 0 && id == 0 {
                    return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
                }
                // A zero increment on a stream is the stream's problem; the
                // connection resets just that stream.
                Ok(Some(Frame::new(
                    id,
                    FrameFlags::new(flags),
                    Payload::WindowUpdate(WindowUpdate::new(increment)),
                )))
            }
            CONTINUATION_TYPE => Err(H2Error::ConnectionError(ErrorCode::ProtocolError)),
            // Unknown frame types must be ignored.
            _ => Ok(None),
        }
    }

    fn parse_data(&mut self, flags: u8, id: StreamId, payload: &[u8]) -> Result<Frame, H2Error> {
        if id == 0 {
            return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
        }
        let flags = FrameFlags::new(flags);
        let data = if flags.is_padded() {
            let pad = *payload.first().ok_or(H2Error::ConnectionError(
                ErrorCode::ProtocolError,
            ))? as usize;
            if pad + 1 > payload.len() {
                return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
            }
            payload[1..payload.len() - pad].to_vec()
        } else {
            payload.to_vec()
        };
        // Flow control accounts for the full wire payload, padding included.
        let frame = Frame::new(
            id,
            flags,
            Payload::Data(Data::with_flow_len(data, payload.len())),
        );
        Ok(frame)
    }

    fn parse_headers(
        &mut self,
        flags: u8,
        id: StreamId,
        payload: &[u8],
    ) -> Result<Option<Frame>, H2Error> {
        if id == 0 {
            return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
        }
        let frame_flags = FrameFlags::new(flags);
        let mut fragment = payload;
        let mut pad = 0usize;
        if frame_flags.is_padded() {
            pad = *fragment.first().ok_or(H2Error::ConnectionError(
                ErrorCode::ProtocolError,
            ))? as usize;
            fragment = &fragment[1..];
        }
        if flags & 0x20 != 0 {
            // Priority preamble: 4-byte dependency plus 1-byte weight.
            if fragment.len() < 5 {
                return Err(H2Error::ConnectionError(ErrorCode::FrameSizeError));
            }
            fragment = &fragment[5..];
        }
        if pad > fragment.len() {
            return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
        }
        let fragment = &fragment[..fragment.len() - pad];
        if fragment.len() > MAX_HEADER_BLOCK_SIZE {
            return Err(H2Error::ConnectionError(ErrorCode::EnhanceYourCalm));
        }

        let block = HeaderBlock {
            id,
            end_stream: frame_flags.is_end_stream(),
            fragment: fragment.to_vec(),
        };
        if frame_flags.is_end_headers() {
            self.finish_header_block(block).map(Some)
        } else {
            self.header_block = Some(block);
            Ok(None)
        }
    }

    fn finish_header_block(&mut self, block: HeaderBlock) -> Result<Frame, H2Error> {
        let parts = self.hpack.decode(&block.fragment)?;
        let mut flags = FrameFlags::empty();
        flags.set_end_headers(true);
        flags.set_end_stream(block.end_stream);
        Ok(Frame::new(
            block.id,
            flags,
            Payload::Headers(crate::h2::Headers::new(parts)),
        ))
    }

    fn parse_settings(
        &mut self,
        flags: u8,
        id: StreamId,
        payload: &[u8],
    ) -> Result<Frame, H2Error> {
        if id != 0 {
            return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
        }
        let frame_flags = FrameFlags::new(flags);
        if frame_flags.is_ack() {
            if !payload.is_empty() {
                return Err(H2Error::ConnectionError(ErrorCode::FrameSizeError));
            }
            return Ok(Frame::new(0, frame_flags, Payload::Settings(Settings::default())));
        }
        if payload.len() % 6 != 0 {
            return Err(H2Error::ConnectionError(ErrorCode::FrameSizeError));
        }
        let mut settings = Vec::new();
        for entry in payload.chunks(6) {
            let identifier = u16::from_be_bytes([entry[0], entry[1]]);
            let value = u32::from_be_bytes([entry[2], entry[3], entry[4], entry[5]]);
            let setting = match identifier {
                0x01 => Setting::HeaderTableSize(value),
                0x02 => match value {
                    0 => Setting::EnablePush(false),
                    1 => Setting::EnablePush(true),
                    _ => return Err(H2Error::ConnectionError(ErrorCode::ProtocolError)),
                },
                0x03 => Setting::MaxConcurrentStreams(value),
                0x04 => {
                    if value > MAX_FLOW_CONTROL_WINDOW {
                        return Err(H2Error::ConnectionError(ErrorCode::FlowControlError));
                    }
                    Setting::InitialWindowSize(value)
                }
                0x05 => {
                    if !(16_384..=16_777_215).contains(&value) {
                        return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
                    }
                    Setting::MaxFrameSize(value)
                }
                0x06 => Setting::MaxHeaderListSize(value),
                // Unknown settings must be ignored.
                _ => continue,
            };
            settings.push(setting);
        }
        Ok(Frame::new(
            0,
            frame_flags,
            Payload::Settings(Settings::new(settings)),
        ))
    }
}

impl Data {
    pub(crate) fn with_flow_len(data: Vec<u8>, flow: usize) -> Self {
        let mut this = Data::new(data);
        this.set_flow_len(flow);
        this
    }
}

#[cfg(test)]
mod ut_frame_decoder {
    use super::*;
    use crate::h2::{FrameEncoder, Parts};

    fn encode(frame: &Frame) -> Vec<u8> {
        let mut encoder = FrameEncoder::new();
        let mut dst = Vec::new();
        encoder.encode(frame, &mut dst);
        dst
    }

    /// UT test cases for control-frame round trips.
    ///
    /// # Brief
    /// 1. Encodes SETTINGS, PING, RST_STREAM, GOAWAY and WINDOW_UPDATE.
    /// 2. Feeds the concatenated bytes to the decoder in one call.
    /// 3. Checks every frame is returned intact and in order.
    #[test]
    fn ut_decode_roundtrip_stream() {
        let frames = vec![
            Frame::new(
                0,
                FrameFlags::empty(),
                Payload::Settings(Settings::new(vec![
                    Setting::EnablePush(false),
                    Setting::InitialWindowSize(1 << 21),
                ])),
            ),
            Frame::new(0, FrameFlags::new(0x1), Payload::Ping(Ping::new([9; 8]))),
            Frame::new(7, FrameFlags::empty(), Payload::RstStream(RstStream::new(8))),
            Frame::new(
                0,
                FrameFlags::empty(),
                Payload::Goaway(Goaway::new(2, 5, b"dbg".to_vec())),
            ),
            Frame::new(
                3,
                FrameFlags::empty(),
                Payload::WindowUpdate(WindowUpdate::new(65_535)),
            ),
        ];
        let mut wire = Vec::new();
        for frame in &frames {
            wire.extend_from_slice(&encode(frame));
        }
        let mut decoder = FrameDecoder::new(16_384);
        let decoded = decoder.decode(&wire).unwrap();
        assert_eq!(decoded, frames);
    }

    /// UT test cases for byte-at-a-time feeding.
    ///
    /// # Brief
    /// 1. Feeds an encoded DATA frame to the decoder one byte at a time.
    /// 2. Checks exactly one frame appears, after the final byte.
    #[test]
    fn ut_decode_byte_at_a_time() {
        let frame = Frame::new(
            1,
            FrameFlags::new(0x1),
            Payload::Data(Data::new(b"abc".to_vec())),
        );
        let wire = encode(&frame);
        let mut decoder = FrameDecoder::new(16_384);
        let mut seen = Vec::new();
        for byte in &wire {
            seen.extend(decoder.decode(&[*byte]).unwrap());
        }
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].stream_id(), 1);
        assert!(seen[0].flags().is_end_stream());
        match seen[0].payload() {
            Payload::Data(data) => assert_eq!(data.data(), b"abc"),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    /// UT test cases for the frame-size limit.
    ///
    /// # Brief
    /// 1. Sends a frame header announcing a payload beyond the advertised
    ///    limit.
    /// 2. Checks the decoder fails immediately upon the header alone.
    #[test]
    fn ut_decode_frame_size_exceeded() {
        let mut decoder = FrameDecoder::new(16_384);
        // 32768-byte DATA frame header, no payload yet.
        let header = [0x00, 0x80, 0x00, 0x0, 0x0, 0, 0, 0, 1];
        assert_eq!(
            decoder.decode(&header),
            Err(H2Error::ConnectionError(ErrorCode::FrameSizeError))
        );
    }

    /// UT test cases for SETTINGS validation.
    ///
    /// # Brief
    /// 1. Sends a SETTINGS ACK with a payload, SETTINGS with a bad length
    ///    and SETTINGS on a non-zero stream.
    /// 2. Checks each produces the matching connection error.
    #[test]
    fn ut_decode_settings_validation() {
        let mut decoder = FrameDecoder::new(16_384);
        let ack_with_payload = [0, 0, 6, 0x4, 0x1, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0];
        assert_eq!(
            decoder.decode(&ack_with_payload),
            Err(H2Error::ConnectionError(ErrorCode::FrameSizeError))
        );

        let mut decoder = FrameDecoder::new(16_384);
        let bad_len = [0, 0, 5, 0x4, 0x0, 0, 0, 0, 0, 0, 1, 0, 0, 0];
        assert_eq!(
            decoder.decode(&bad_len),
            Err(H2Error::ConnectionError(ErrorCode::FrameSizeError))
        );

        let mut decoder = FrameDecoder::new(16_384);
        let on_stream = [0, 0, 0, 0x4, 0x0, 0, 0, 0, 1];
        assert_eq!(
            decoder.decode(&on_stream),
            Err(H2Error::ConnectionError(ErrorCode::ProtocolError))
        );
    }

    /// UT test cases for PUSH_PROMISE rejection.
    ///
    /// # Brief
    /// 1. Sends a PUSH_PROMISE frame although push is disabled.
    /// 2. Checks the decoder reports a protocol error.
    #[test]
    fn ut_decode_push_promise() {
        let mut decoder = FrameDecoder::new(16_384);
        let push = [0, 0, 4, 0x5, 0x4, 0, 0, 0, 1, 0, 0, 0, 2];
        assert_eq!(
            decoder.decode(&push),
            Err(H2Error::ConnectionError(ErrorCode::ProtocolError))
        );
    }

    /// UT test cases for zero WINDOW_UPDATE increments.
    ///
    /// # Brief
    /// 1. Sends a zero increment on stream 0 and on stream 1.
    /// 2. Checks stream 0 is a connection error while stream 1 passes
    ///    through for a stream-level reset.
    #[test]
    fn ut_decode_window_update_zero() {
        let mut decoder = FrameDecoder::new(16_384);
        let on_conn = [0, 0, 4, 0x8, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            decoder.decode(&on_conn),
            Err(H2Error::ConnectionError(ErrorCode::ProtocolError))
        );

        let mut decoder = FrameDecoder::new(16_384);
        let on_stream = [0, 0, 4, 0x8, 0, 0, 0, 0, 1, 0, 0, 0, 0];
        let frames = decoder.decode(&on_stream).unwrap();
        assert_eq!(frames.len(), 1);
        match frames[0].payload() {
            Payload::WindowUpdate(update) => assert_eq!(update.increment(), 0),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    /// UT test cases for CONTINUATION assembly.
    ///
    /// # Brief
    /// 1. Encodes a header block split into HEADERS plus CONTINUATION.
    /// 2. Checks the decoder emits one complete HEADERS frame.
    /// 3. Checks a non-CONTINUATION frame inside an open block fails.
    #[test]
    fn ut_decode_continuation() {
        let mut encoder = FrameEncoder::new();
        encoder.set_max_frame_size(16);
        let mut parts = Parts::new();
        parts.pseudo_mut().set_status(Some("200".to_string()));
        parts
            .headers_mut()
            .append("x-long", &"a".repeat(100))
            .unwrap();
        let mut wire = Vec::new();
        encoder.encode_header_block(5, &parts, true, &mut wire);

        let mut decoder = FrameDecoder::new(16_384);
        let frames = decoder.decode(&wire).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].stream_id(), 5);
        assert!(frames[0].flags().is_end_stream());
        match frames[0].payload() {
            Payload::Headers(headers) => {
                let (pseudo, fields) = headers.parts();
                assert_eq!(pseudo.status(), Some("200"));
                assert_eq!(fields.get("x-long"), Some("a".repeat(100)));
            }
            other => panic!("unexpected payload {other:?}"),
        }

        // Open a block, then interleave a PING: protocol error.
        let mut encoder = FrameEncoder::new();
        encoder.set_max_frame_size(16);
        let mut wire = Vec::new();
        encoder.encode_header_block(7, &parts, false, &mut wire);
        // Keep only the first frame of the chain (HEADERS without
        // END_HEADERS).
        let first_len =
            ((wire[0] as usize) << 16 | (wire[1] as usize) << 8 | wire[2] as usize) + 9;
        let mut decoder = FrameDecoder::new(16_384);
        assert!(decoder.decode(&wire[..first_len]).unwrap().is_empty());
        let ping = [0u8, 0, 8, 0x6, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            decoder.decode(&ping),
            Err(H2Error::ConnectionError(ErrorCode::ProtocolError))
        );
    }
}
