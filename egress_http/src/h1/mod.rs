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

//! [`HTTP/1.1`] wire codec: request serializer, response head parser and the
//! chunked transfer codec.
//!
//! [`HTTP/1.1`]: https://httpwg.org/specs/rfc9112.html

pub mod chunked;
pub mod decoder;
pub mod encoder;

use std::fmt::{Display, Formatter};

/// Upper bound on a response header section. A peer streaming a larger head
/// aborts the response.
pub const MAX_HEADER_SECTION_SIZE: usize = 80 * 1024;

/// Upper bound on a single chunk in chunked transfer coding.
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Errors produced by the HTTP/1.1 codec.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum H1Error {
    /// The status line is malformed.
    InvalidStatusLine,
    /// A header line is malformed.
    InvalidHeader,
    /// The header section exceeds [`MAX_HEADER_SECTION_SIZE`].
    HeaderSectionTooLarge,
    /// A chunk-size line is malformed.
    InvalidChunkSize,
    /// A chunk exceeds [`MAX_CHUNK_SIZE`].
    ChunkTooLarge,
    /// Chunk data is not followed by CRLF.
    InvalidChunkEnd,
    /// The connection ended before the body was complete.
    UnexpectedEof,
}

impl Display for H1Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            H1Error::InvalidStatusLine => "invalid status line",
            H1Error::InvalidHeader => "invalid header line",
            H1Error::HeaderSectionTooLarge => "header section too large",
            H1Error::InvalidChunkSize => "invalid chunk size line",
            H1Error::ChunkTooLarge => "chunk too large",
            H1Error::InvalidChunkEnd => "chunk data not terminated by CRLF",
            H1Error::UnexpectedEof => "connection closed before body completed",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for H1Error {}
