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

//! The HTTP/2 connection pool.
//!
//! Keyed by `(hostname, port, connect-hostname)` so a NAT64 connection is
//! never handed to a request that wants a direct one. Entries age out after
//! a minute of disuse and the pool is a small LRU. A client is only ever
//! returned while it reports spare capacity; that check is advisory, since
//! a GOAWAY may land between lookup and first use, and the dispatcher
//! treats that failure as a pool miss.
//!
//! Each client gets exactly one GOAWAY listener, registered on first
//! insertion and kept across re-insertions, which removes the client from
//! the pool the moment the connection starts draining.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::h2_conn::H2Client;

const POOL_TTL: Duration = Duration::from_secs(60);
const POOL_CAPACITY: usize = 20;

/// The identity of a pooled connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct PoolKey {
    pub(crate) hostname: String,
    pub(crate) port: u16,
    pub(crate) connect_hostname: Option<String>,
}

impl PoolKey {
    pub(crate) fn new(hostname: &str, port: u16, connect_hostname: Option<&str>) -> Self {
        Self {
            hostname: hostname.to_ascii_lowercase(),
            port,
            connect_hostname: connect_hostname.map(|h| h.to_ascii_lowercase()),
        }
    }
}

struct PoolEntry {
    client: H2Client,
    last_used: Instant,
}

/// LRU pool of reusable HTTP/2 clients.
#[derive(Default)]
pub(crate) struct ConnPool {
    entries: Mutex<HashMap<PoolKey, PoolEntry>>,
}

impl ConnPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns a usable pooled client: fresh within TTL, not draining and
    /// with spare stream capacity. Anything else is evicted on sight.
    pub(crate) fn get(&self, key: &PoolKey) -> Option<H2Client> {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        match entries.get_mut(key) {
            Some(entry) => {
                if now.duration_since(entry.last_used) >= POOL_TTL
                    || entry.client.is_closed()
                    || !entry.client.has_capacity()
                {
                    let entry = entries.remove(key).unwrap();
                    if !entry.client.is_closed() {
                        entry.client.close();
                    }
                    return None;
                }
                entry.last_used = now;
                Some(entry.client.clone())
            }
            None => None,
        }
    }

    /// Inserts (or refreshes) a client, registering its GOAWAY listener the
    /// first time this client is ever pooled.
    pub(crate) fn insert(pool: &Arc<ConnPool>, key: PoolKey, client: H2Client) {
        let this = pool.as_ref();
        if client.is_closed() || !client.has_capacity() {
            client.close();
            return;
        }
        if client.register_goaway_listener() {
            let pool = Arc::downgrade(pool);
            let listener_client = client.clone();
            let listener_key = key.clone();
            tokio::spawn(async move {
                listener_client.wait_goaway().await;
                if let Some(pool) = pool.upgrade() {
                    debug!(?listener_key, "dropping pooled client after GOAWAY");
                    pool.remove_client(&listener_key, listener_client.unique_id());
                }
            });
        }
        let mut entries = this.entries.lock().unwrap();
        if !entries.contains_key(&key) && entries.len() >= POOL_CAPACITY {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone())
            {
                if let Some(evicted) = entries.remove(&oldest) {
                    evicted.client.close();
                }
            }
        }
        entries.insert(
            key,
            PoolEntry {
                client,
                last_used: Instant::now(),
            },
        );
    }

    /// Removes a specific client instance; a newer connection under the
    /// same key is left alone.
    pub(crate) fn remove_client(&self, key: &PoolKey, unique_id: u64) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get(key) {
            if entry.client.unique_id() == unique_id {
                entries.remove(key);
            }
        }
    }

    /// Closes and forgets every pooled connection.
    pub(crate) fn clear(&self) {
        let mut entries = self.entries.lock().unwrap();
        for (_, entry) in entries.drain() {
            entry.client.close();
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}
