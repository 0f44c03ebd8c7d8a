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

//! [Chunked Transfer Coding] codec.
//!
//! [Chunked Transfer Coding]: https://httpwg.org/specs/rfc9112.html#chunked.encoding
//!
//! The decoder is a byte-fed state machine: read a chunk-size line (chunk
//! extensions after `;` are ignored, hex digits are case-insensitive), read
//! that many data octets, require the trailing CRLF, repeat. A zero-size
//! chunk terminates the body.

use crate::error::HttpError;
use crate::h1::{H1Error, MAX_CHUNK_SIZE};

/// Longest accepted chunk-size line, extensions included.
const MAX_SIZE_LINE: usize = 1024;

#[derive(Debug, PartialEq, Eq)]
enum State {
    /// Accumulating the chunk-size line up to its LF.
    ReadSize,
    /// Consuming `usize` remaining data octets.
    ReadData(usize),
    /// Expecting the CRLF that closes a data chunk.
    ReadCrlf(u8),
    /// Expecting the CRLF that closes the terminal zero-size chunk.
    ReadEndCrlf(u8),
    /// Terminal state.
    Done,
}

/// Pull-through decoder for chunked bodies.
pub struct ChunkedDecoder {
    state: State,
    line: Vec<u8>,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedDecoder {
    /// Creates a decoder positioned before the first chunk-size line.
    pub fn new() -> Self {
        Self {
            state: State::ReadSize,
            line: Vec::new(),
        }
    }

    /// Whether the terminal chunk has been consumed.
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Feeds input, appending decoded data octets to `out`.
    ///
    /// Returns the number of input bytes consumed. Once the decoder is done
    /// it consumes nothing further; remaining input belongs to the caller.
    pub fn decode(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<usize, HttpError> {
        let mut pos = 0usize;
        while pos < input.len() {
            match self.state {
                State::ReadSize => {
                    let byte = input[pos];
                    pos += 1;
                    if byte == b'\n' {
                        let size = self.parse_size_line()?;
                        self.line.clear();
                        self.state = if size == 0 {
                            State::ReadEndCrlf(0)
                        } else {
                            State::ReadData(size)
                        };
                    } else {
                        if self.line.len() >= MAX_SIZE_LINE {
                            return Err(H1Error::InvalidChunkSize.into());
                        }
                        self.line.push(byte);
                    }
                }
                State::ReadData(remaining) => {
                    let take = remaining.min(input.len() - pos);
                    out.extend_from_slice(&input[pos..pos + take]);
                    pos += take;
                    if take == remaining {
                        self.state = State::ReadCrlf(0);
                    } else {
                        self.state = State::ReadData(remaining - take);
                    }
                }
                State::ReadCrlf(seen) => {
                    let byte = input[pos];
                    pos += 1;
                    match (seen, byte) {
                        (0, b'\r') => self.state = State::ReadCrlf(1),
                        (1, b'\n') => self.state = State::ReadSize,
                        _ => return Err(H1Error::InvalidChunkEnd.into()),
                    }
                }
                State::ReadEndCrlf(seen) => {
                    let byte = input[pos];
                    pos += 1;
                    match (seen, byte) {
                        (0, b'\r') => self.state = State::ReadEndCrlf(1),
                        (1, b'\n') => self.state = State::Done,
                        _ => return Err(H1Error::InvalidChunkEnd.into()),
                    }
                }
                State::Done => break,
            }
        }
        Ok(pos)
    }

    fn parse_size_line(&self) -> Result<usize, HttpError> {
        let line = match self.line.last() {
            Some(b'\r') => &self.line[..self.line.len() - 1],
            _ => return Err(H1Error::InvalidChunkSize.into()),
        };
        // Extensions after ';' are ignored.
        let digits = match line.iter().position(|b| *b == b';') {
            Some(idx) => &line[..idx],
            None => line,
        };
        if digits.is_empty() {
            return Err(H1Error::InvalidChunkSize.into());
        }
        let mut size = 0usize;
        for byte in digits {
            let digit = match byte {
                b'0'..=b'9' => byte - b'0',
                b'a'..=b'f' => byte - b'a' + 10,
                b'A'..=b'F' => byte - b'A' + 10,
                _ => return Err(H1Error::InvalidChunkSize.into()),
            };
            size = size
                .checked_mul(16)
                .and_then(|s| s.checked_add(digit as usize))
                .ok_or(HttpError::from(H1Error::ChunkTooLarge))?;
            if size > MAX_CHUNK_SIZE {
                return Err(H1Error::ChunkTooLarge.into());
            }
        }
        Ok(size)
    }
}

/// Serializes one chunk of a chunked request body.
pub fn encode_chunk(data: &[u8], dst: &mut Vec<u8>) {
    dst.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
    dst.extend_from_slice(data);
    dst.extend_from_slice(b"\r\n");
}

/// Serializes the terminal zero-size chunk.
pub fn encode_last_chunk(dst: &mut Vec<u8>) {
    dst.extend_from_slice(b"0\r\n\r\n");
}
