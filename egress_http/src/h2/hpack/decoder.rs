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

//! HPACK [header field decoder].
//!
//! [header field decoder]: https://httpwg.org/specs/rfc7541.html#header.representation
//!
//! Decodes a complete header block (the CONTINUATION chain is assembled by
//! the frame decoder first). A dynamic-table-size update is only legal at
//! the start of a block, and its size may not exceed the limit this side
//! advertised via SETTINGS_HEADER_TABLE_SIZE.

use crate::h2::hpack::integer::decode_integer;
use crate::h2::hpack::table::IndexTable;
use crate::h2::{ErrorCode, H2Error, Parts};
use crate::huffman::huffman_decode;

const COMPRESSION_ERROR: H2Error = H2Error::ConnectionError(ErrorCode::CompressionError);

pub(crate) struct HpackDecoder {
    table: IndexTable,
    /// Hard ceiling for size updates, from our SETTINGS_HEADER_TABLE_SIZE.
    max_allowed_size: usize,
}

impl HpackDecoder {
    /// Creates a decoder whose dynamic table is bounded by `max_size`.
    pub(crate) fn new(max_size: usize) -> Self {
        Self {
            table: IndexTable::new(max_size),
            max_allowed_size: max_size,
        }
    }

    /// Decodes one complete header block into `Parts`.
    pub(crate) fn decode(&mut self, block: &[u8]) -> Result<Parts, H2Error> {
        let mut parts = Parts::new();
        let mut pos = 0usize;
        let mut seen_non_update = false;
        let mut seen_regular = false;

        while pos < block.len() {
            let first = block[pos];
            if first & 0x80 != 0 {
                // Indexed field.
                seen_non_update = true;
                let (index, next) = decode_integer(block, pos, 0x7f)?;
                pos = next;
                if index == 0 {
                    return Err(COMPRESSION_ERROR);
                }
                let (name, value) = self.table.get(index).ok_or(COMPRESSION_ERROR)?;
                Self::push_field(
                    &mut parts,
                    name.to_string(),
                    value.to_string(),
                    &mut seen_regular,
                )?;
            } else if first & 0x40 != 0 {
                // Literal with incremental indexing.
                seen_non_update = true;
                let (name, value, next) = self.decode_literal(block, pos, 0x3f)?;
                pos = next;
                self.table.insert(name.clone(), value.clone());
                Self::push_field(&mut parts, name, value, &mut seen_regular)?;
            } else if first & 0x20 != 0 {
                // Dynamic-table-size update: legal only before any field.
                if seen_non_update {
                    return Err(COMPRESSION_ERROR);
                }
                let (size, next) = decode_integer(block, pos, 0x1f)?;
                pos = next;
                if size > self.max_allowed_size {
                    return Err(COMPRESSION_ERROR);
                }
                self.table.update_size(size);
            } else {
                // Literal without indexing (0x00) or never indexed (0x10).
                seen_non_update = true;
                let (name, value, next) = self.decode_literal(block, pos, 0x0f)?;
                pos = next;
                Self::push_field(&mut parts, name, value, &mut seen_regular)?;
            }
        }
        Ok(parts)
    }

    fn decode_literal(
        &self,
        block: &[u8],
        pos: usize,
        mask: u8,
    ) -> Result<(String, String, usize), H2Error> {
        let (name_index, mut pos) = decode_integer(block, pos, mask)?;
        let name = if name_index == 0 {
            let (name, next) = Self::decode_string(block, pos)?;
            pos = next;
            name
        } else {
            self.table
                .get(name_index)
                .ok_or(COMPRESSION_ERROR)?
                .0
                .to_string()
        };
        let (value, pos) = Self::decode_string(block, pos)?;
        Ok((name, value, pos))
    }

    fn decode_string(block: &[u8], pos: usize) -> Result<(String, usize), H2Error> {
        let huffman = *block.get(pos).ok_or(COMPRESSION_ERROR)? & 0x80 != 0;
        let (len, pos) = decode_integer(block, pos, 0x7f)?;
        let end = pos.checked_add(len).ok_or(COMPRESSION_ERROR)?;
        let raw = block.get(pos..end).ok_or(COMPRESSION_ERROR)?;
        let bytes = if huffman {
            let mut decoded = Vec::with_capacity(len * 2);
            huffman_decode(raw, &mut decoded)?;
            decoded
        } else {
            raw.to_vec()
        };
        let s = String::from_utf8(bytes).map_err(|_| COMPRESSION_ERROR)?;
        Ok((s, end))
    }

    fn push_field(
        parts: &mut Parts,
        name: String,
        value: String,
        seen_regular: &mut bool,
    ) -> Result<(), H2Error> {
        if name.starts_with(':') {
            // A pseudo-header after a regular field is malformed, as is an
            // unknown pseudo-header name.
            if *seen_regular || !parts.pseudo_mut().set_by_name(&name, value) {
                return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
            }
            Ok(())
        } else {
            *seen_regular = true;
            if !crate::headers::is_valid_name(&name) || !crate::headers::is_valid_value(&value) {
                return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
            }
            parts.headers_mut().append_unchecked(name, value);
            Ok(())
        }
    }
}
