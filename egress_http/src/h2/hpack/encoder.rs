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

//! HPACK [header field encoder].
//!
//! [header field encoder]: https://httpwg.org/specs/rfc7541.html#header.representation
//!
//! Encoding policy:
//! - A field found in the tables is emitted as an indexed representation.
//! - High-cardinality names are not worth a dynamic-table slot and are
//!   emitted without indexing.
//! - Credential-bearing fields use the never-indexed form, which forbids
//!   intermediaries from indexing them anywhere downstream.
//! - Everything else is emitted with incremental indexing.
//! - String literals are always Huffman coded.

use crate::h2::hpack::integer::encode_integer;
use crate::h2::hpack::table::{IndexTable, TableIndex};
use crate::h2::Parts;
use crate::huffman::{huffman_encode, huffman_encoded_len};

/// Names that are never inserted into the dynamic table: their values churn
/// on every message or identify a single resource.
const NO_INDEX_NAMES: [&str; 15] = [
    ":path",
    "content-length",
    "content-range",
    "date",
    "last-modified",
    "etag",
    "age",
    "expires",
    "set-cookie",
    "cookie",
    "authorization",
    "proxy-authorization",
    "location",
    "if-modified-since",
    "if-none-match",
];

/// The subset of `NO_INDEX_NAMES` that carries credentials and must use the
/// never-indexed literal form on the wire.
const SENSITIVE_NAMES: [&str; 4] = [
    "authorization",
    "proxy-authorization",
    "cookie",
    "set-cookie",
];

pub(crate) struct HpackEncoder {
    table: IndexTable,
    pending_size_update: Option<usize>,
}

impl HpackEncoder {
    /// Creates an encoder whose dynamic table holds at most `max_size`
    /// octets.
    pub(crate) fn new(max_size: usize) -> Self {
        Self {
            table: IndexTable::new(max_size),
            pending_size_update: None,
        }
    }

    /// Applies a table size the peer advertised via SETTINGS. The change is
    /// signalled at the start of the next header block.
    pub(crate) fn update_max_table_size(&mut self, max_size: usize) {
        if max_size != self.table.max_size() {
            self.table.update_size(max_size);
            self.pending_size_update = Some(max_size);
        }
    }

    /// Encodes one header block: pseudo-header fields first, regular fields
    /// after, in insertion order.
    pub(crate) fn encode(&mut self, parts: &Parts, dst: &mut Vec<u8>) {
        if let Some(size) = self.pending_size_update.take() {
            encode_integer(size, 0x1f, 0x20, dst);
        }
        let (pseudo, headers) = parts.parts();
        for (name, value) in pseudo.iter() {
            self.encode_field(name, value, dst);
        }
        for (name, value) in headers.iter() {
            self.encode_field(name, value, dst);
        }
    }

    fn encode_field(&mut self, name: &str, value: &str, dst: &mut Vec<u8>) {
        let found = self.table.search(name, value);
        if let TableIndex::Field(index) = found {
            encode_integer(index, 0x7f, 0x80, dst);
            return;
        }

        let name_index = match found {
            TableIndex::FieldName(index) => Some(index),
            _ => None,
        };

        if SENSITIVE_NAMES.contains(&name) {
            Self::encode_literal(name_index, name, value, 0x0f, 0x10, dst);
        } else if NO_INDEX_NAMES.contains(&name) {
            Self::encode_literal(name_index, name, value, 0x0f, 0x00, dst);
        } else {
            Self::encode_literal(name_index, name, value, 0x3f, 0x40, dst);
            self.table.insert(name.to_string(), value.to_string());
        }
    }

    fn encode_literal(
        name_index: Option<usize>,
        name: &str,
        value: &str,
        mask: u8,
        pre: u8,
        dst: &mut Vec<u8>,
    ) {
        match name_index {
            Some(index) => encode_integer(index, mask, pre, dst),
            None => {
                dst.push(pre);
                Self::encode_string(name.as_bytes(), dst);
            }
        }
        Self::encode_string(value.as_bytes(), dst);
    }

    fn encode_string(s: &[u8], dst: &mut Vec<u8>) {
        encode_integer(huffman_encoded_len(s), 0x7f, 0x80, dst);
        huffman_encode(s, dst);
    }
}
