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

//! HPACK [indexing tables].
//!
//! [indexing tables]: https://httpwg.org/specs/rfc7541.html#indexing.tables
//!
//! Indices 1..=61 address the static table of RFC 7541 Appendix A; indices
//! from 62 address the dynamic table, newest entry first. A dynamic entry
//! accounts for its name length plus its value length plus 32 octets of
//! overhead.

use std::collections::VecDeque;

/// Per-entry size overhead defined by RFC 7541 section 4.1.
const ENTRY_OVERHEAD: usize = 32;

/// The static table of RFC 7541 Appendix A.
static STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// The result of looking a field up for encoding.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TableIndex {
    /// Index of an entry matching name and value.
    Field(usize),
    /// Index of an entry matching the name only.
    FieldName(usize),
    /// No match.
    None,
}

/// One side's view of the indexing tables: the shared static table plus its
/// own dynamic table.
pub(crate) struct IndexTable {
    dynamic: VecDeque<(String, String)>,
    used: usize,
    max_size: usize,
}

impl IndexTable {
    pub(crate) fn new(max_size: usize) -> Self {
        Self {
            dynamic: VecDeque::new(),
            used: 0,
            max_size,
        }
    }

    /// Returns the entry at a wire index.
    pub(crate) fn get(&self, index: usize) -> Option<(&str, &str)> {
        if index == 0 {
            return None;
        }
        if index <= STATIC_TABLE.len() {
            let (name, value) = STATIC_TABLE[index - 1];
            return Some((name, value));
        }
        self.dynamic
            .get(index - STATIC_TABLE.len() - 1)
            .map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Searches for a field, preferring a full match over a name match and
    /// the static table over the dynamic table.
    pub(crate) fn search(&self, name: &str, value: &str) -> TableIndex {
        let mut name_only = TableIndex::None;
        for (i, (n, v)) in STATIC_TABLE.iter().enumerate() {
            if *n == name {
                if *v == value {
                    return TableIndex::Field(i + 1);
                }
                if name_only == TableIndex::None {
                    name_only = TableIndex::FieldName(i + 1);
                }
            }
        }
        for (i, (n, v)) in self.dynamic.iter().enumerate() {
            if n == name {
                if v == value {
                    return TableIndex::Field(STATIC_TABLE.len() + i + 1);
                }
                if name_only == TableIndex::None {
                    name_only = TableIndex::FieldName(STATIC_TABLE.len() + i + 1);
                }
            }
        }
        name_only
    }

    /// Inserts a field at the head of the dynamic table, evicting from the
    /// tail until the table fits. An entry larger than the table empties it.
    pub(crate) fn insert(&mut self, name: String, value: String) {
        let size = name.len() + value.len() + ENTRY_OVERHEAD;
        while self.used + size > self.max_size {
            match self.dynamic.pop_back() {
                Some((n, v)) => self.used -= n.len() + v.len() + ENTRY_OVERHEAD,
                None => return,
            }
        }
        self.used += size;
        self.dynamic.push_front((name, value));
    }

    /// Applies a new maximum table size, evicting as needed.
    pub(crate) fn update_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        while self.used > self.max_size {
            if let Some((n, v)) = self.dynamic.pop_back() {
                self.used -= n.len() + v.len() + ENTRY_OVERHEAD;
            }
        }
    }

    /// Returns the current maximum table size.
    pub(crate) fn max_size(&self) -> usize {
        self.max_size
    }

    /// Returns the used size of the dynamic table.
    pub(crate) fn used(&self) -> usize {
        self.used
    }
}

#[cfg(test)]
mod ut_table {
    use super::*;

    /// UT test cases for static table lookups.
    ///
    /// # Brief
    /// 1. Reads entries at both ends of the static index range.
    /// 2. Checks index 0 and out-of-range indices return nothing.
    #[test]
    fn ut_table_static_get() {
        let table = IndexTable::new(4096);
        assert_eq!(table.get(1), Some((":authority", "")));
        assert_eq!(table.get(2), Some((":method", "GET")));
        assert_eq!(table.get(61), Some(("www-authenticate", "")));
        assert_eq!(table.get(0), None);
        assert_eq!(table.get(62), None);
    }

    /// UT test cases for dynamic insertion and indexing.
    ///
    /// # Brief
    /// 1. Inserts two entries and checks the newest sits at index 62.
    /// 2. Checks search prefers full matches and reports name matches.
    #[test]
    fn ut_table_dynamic_insert_search() {
        let mut table = IndexTable::new(4096);
        table.insert("x-first".to_string(), "1".to_string());
        table.insert("x-second".to_string(), "2".to_string());
        assert_eq!(table.get(62), Some(("x-second", "2")));
        assert_eq!(table.get(63), Some(("x-first", "1")));

        assert_eq!(table.search("x-first", "1"), TableIndex::Field(63));
        assert_eq!(table.search("x-first", "9"), TableIndex::FieldName(63));
        assert_eq!(table.search(":method", "GET"), TableIndex::Field(2));
        assert_eq!(table.search("nope", "v"), TableIndex::None);
    }

    /// UT test cases for size accounting and eviction.
    ///
    /// # Brief
    /// 1. Inserts entries into a small table and checks old entries evict.
    /// 2. Shrinks the table size and checks remaining entries evict.
    /// 3. Checks an entry larger than the table empties it.
    #[test]
    fn ut_table_eviction() {
        // Each entry here costs 1 + 1 + 32 = 34 octets.
        let mut table = IndexTable::new(68);
        table.insert("a".to_string(), "1".to_string());
        table.insert("b".to_string(), "2".to_string());
        assert_eq!(table.used(), 68);
        table.insert("c".to_string(), "3".to_string());
        assert_eq!(table.used(), 68);
        assert_eq!(table.get(62), Some(("c", "3")));
        assert_eq!(table.get(63), Some(("b", "2")));
        assert_eq!(table.get(64), None);

        table.update_size(34);
        assert_eq!(table.used(), 34);
        assert_eq!(table.get(62), Some(("c", "3")));

        table.insert("too-large-for-the-table".to_string(), "v".repeat(64));
        assert_eq!(table.used(), 0);
        assert_eq!(table.get(62), None);
    }
}
