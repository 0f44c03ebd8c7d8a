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

//! [`HTTP/2`] wire components: frame model, frame codec and HPACK.
//!
//! [`HTTP/2`]: https://httpwg.org/specs/rfc9113.html

mod decoder;
mod encoder;
mod error;
mod frame;
mod parts;

pub(crate) mod hpack;

pub use decoder::FrameDecoder;
pub use encoder::FrameEncoder;
pub use error::{ErrorCode, H2Error};
pub use frame::{
    Data, Frame, FrameFlags, FrameType, Goaway, Headers, Payload, Ping, Priority, RstStream,
    Setting, Settings, SettingsBuilder, StreamId, WindowUpdate,
};
pub use parts::Parts;

/// The fixed client connection preface that opens every HTTP/2 connection.
pub const CONNECTION_PREFACE: &[u8; 24] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Every frame starts with a 9-byte header: 24-bit length, 8-bit type,
/// 8-bit flags and a 31-bit stream id with the reserved high bit.
pub const FRAME_HEADER_LENGTH: usize = 9;

/// The largest legal flow-control window, 2^31 - 1.
pub const MAX_FLOW_CONTROL_WINDOW: u32 = (1 << 31) - 1;

/// SETTINGS_MAX_FRAME_SIZE initial value.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// SETTINGS_INITIAL_WINDOW_SIZE initial value.
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;

/// SETTINGS_HEADER_TABLE_SIZE initial value.
pub const DEFAULT_HEADER_TABLE_SIZE: usize = 4096;

/// Upper bound on an assembled header block (HEADERS plus its CONTINUATION
/// chain). Exceeding it is treated as abusive and ends the connection.
pub const MAX_HEADER_BLOCK_SIZE: usize = 80 * 1024;
