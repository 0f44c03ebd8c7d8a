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

//! The protocol memo: which ALPN protocol a host:port settled on last time.
//!
//! Skipping the negotiating handshake on repeat visits saves a round of
//! ALPN guesswork. Entries age out after five minutes and the memo is a
//! small LRU, so a burst of one-off hosts cannot evict the ones that
//! matter.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// The protocol a TLS handshake settled on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AlpnProtocol {
    H2,
    Http1,
}

impl AlpnProtocol {
    /// Maps a negotiated ALPN token; unknown tokens map to HTTP/1.1.
    pub(crate) fn from_token(token: &str) -> Self {
        if token == "h2" {
            AlpnProtocol::H2
        } else {
            AlpnProtocol::Http1
        }
    }
}

const MEMO_TTL: Duration = Duration::from_secs(300);
const MEMO_CAPACITY: usize = 200;

struct MemoEntry {
    protocol: AlpnProtocol,
    stored_at: Instant,
    touched_at: Instant,
}

/// TTL-bounded LRU of `(hostname, port) → negotiated protocol`.
#[derive(Default)]
pub(crate) struct ProtocolMemo {
    entries: Mutex<HashMap<(String, u16), MemoEntry>>,
}

impl ProtocolMemo {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Looks up a fresh entry, refreshing its LRU position.
    pub(crate) fn get(&self, hostname: &str, port: u16) -> Option<AlpnProtocol> {
        let key = (hostname.to_ascii_lowercase(), port);
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        match entries.get_mut(&key) {
            Some(entry) if now.duration_since(entry.stored_at) < MEMO_TTL => {
                entry.touched_at = now;
                Some(entry.protocol)
            }
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Records a negotiated protocol, evicting the least-recently-used
    /// entry when full.
    pub(crate) fn put(&self, hostname: &str, port: u16, protocol: AlpnProtocol) {
        let key = (hostname.to_ascii_lowercase(), port);
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        if !entries.contains_key(&key) && entries.len() >= MEMO_CAPACITY {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.touched_at)
                .map(|(key, _)| key.clone())
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(
            key,
            MemoEntry {
                protocol,
                stored_at: now,
                touched_at: now,
            },
        );
    }

    /// Drops every memoized entry.
    pub(crate) fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod ut_alpn_memo {
    use super::*;

    /// UT test cases for memo hits and case folding.
    ///
    /// # Brief
    /// 1. Stores a protocol and reads it back under a different case.
    /// 2. Checks a different port misses.
    #[test]
    fn ut_memo_get_put() {
        let memo = ProtocolMemo::new();
        memo.put("Example.com", 443, AlpnProtocol::H2);
        assert_eq!(memo.get("example.COM", 443), Some(AlpnProtocol::H2));
        assert_eq!(memo.get("example.com", 8443), None);

        memo.clear();
        assert_eq!(memo.get("example.com", 443), None);
    }

    /// UT test cases for LRU eviction at capacity.
    ///
    /// # Brief
    /// 1. Fills the memo to capacity and touches the first entry.
    /// 2. Inserts one more and checks an untouched entry was evicted while
    ///    the touched one survived.
    #[test]
    fn ut_memo_lru_eviction() {
        let memo = ProtocolMemo::new();
        for i in 0..MEMO_CAPACITY {
            memo.put(&format!("host{i}"), 443, AlpnProtocol::Http1);
        }
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(memo.get("host0", 443), Some(AlpnProtocol::Http1));
        memo.put("overflow", 443, AlpnProtocol::H2);

        let entries = memo.entries.lock().unwrap();
        assert_eq!(entries.len(), MEMO_CAPACITY);
        assert!(entries.contains_key(&("host0".to_string(), 443)));
        assert!(entries.contains_key(&("overflow".to_string(), 443)));
    }

    /// UT test cases for `AlpnProtocol::from_token`.
    ///
    /// # Brief
    /// 1. Maps `h2`, `http/1.1` and unknown tokens.
    #[test]
    fn ut_alpn_from_token() {
        assert_eq!(AlpnProtocol::from_token("h2"), AlpnProtocol::H2);
        assert_eq!(AlpnProtocol::from_token("http/1.1"), AlpnProtocol::Http1);
        assert_eq!(AlpnProtocol::from_token("weird"), AlpnProtocol::Http1);
    }
}
