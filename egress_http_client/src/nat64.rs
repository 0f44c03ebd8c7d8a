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

//! NAT64 synthesis and prefix health.
//!
//! A NAT64 gateway embeds an IPv4 address in the low 32 bits of a /96 IPv6
//! prefix. Synthesis turns `a.b.c.d` under prefix `P` into the bracketed
//! literal `[P<ab-hex>:<cd-hex>]`, which the byte socket dials while SNI and
//! `Host` keep the logical hostname.
//!
//! Prefix health is an EWMA of observed round-trip times plus a flat
//! penalty scaled by the failure ratio; candidates are ranked ascending, so
//! a gateway that keeps failing drifts to the back of the line.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Mutex;

use tracing::debug;

/// Public NAT64 gateways tried in order when no health data says otherwise.
pub(crate) const DEFAULT_NAT64_PREFIXES: [&str; 7] = [
    "2602:fc59:b0:64::",
    "2602:fc59:11:64::",
    "2a00:1098:2b::",
    "2a00:1098:2c:1::",
    "2a01:4f8:c2c:123f::",
    "2a01:4f9:c010:3f02::",
    "2001:67c:2960:6464::",
];

/// How many ranked candidates one NAT64 fallback attempt works through.
pub(crate) const NAT64_CANDIDATES: usize = 3;

/// Smoothing factor of the round-trip EWMA.
const EWMA_ALPHA: f64 = 0.3;

/// Flat penalty in milliseconds applied at a 100% failure ratio.
const FAILURE_PENALTY_MS: f64 = 250.0;

/// Synthesizes the bracketed IPv6 literal embedding `ipv4` in `prefix`.
///
/// The prefix must end in `::` (short form) or `:` (full form); the octets
/// are appended as two zero-padded hex quads.
///
/// # Examples
///
/// ```
/// use std::net::Ipv4Addr;
/// use egress_http_client::synthesize_nat64;
///
/// let literal = synthesize_nat64(Ipv4Addr::new(104, 16, 0, 1), "2602:fc59:b0:64::");
/// assert_eq!(literal, "[2602:fc59:b0:64::6810:1]");
/// ```
pub fn synthesize_nat64(ipv4: Ipv4Addr, prefix: &str) -> String {
    let [a, b, c, d] = ipv4.octets();
    let high = ((a as u16) << 8) | b as u16;
    let low = ((c as u16) << 8) | d as u16;
    format!("[{prefix}{high:x}:{low:x}]")
}

/// Health counters of one prefix.
#[derive(Clone, Copy, Debug, Default)]
pub struct Nat64PrefixStats {
    /// EWMA of round-trip times in milliseconds.
    pub ewma_ms: f64,
    /// Attempts recorded.
    pub attempts: u64,
    /// Failed attempts recorded.
    pub failures: u64,
}

impl Nat64PrefixStats {
    /// The ranking score: lower is better.
    pub fn score(&self) -> f64 {
        if self.attempts == 0 {
            return 0.0;
        }
        let failure_ratio = self.failures as f64 / self.attempts as f64;
        self.ewma_ms + FAILURE_PENALTY_MS * failure_ratio
    }
}

/// Process-wide health tracking for NAT64 prefixes.
#[derive(Default)]
pub(crate) struct PrefixHealth {
    stats: Mutex<HashMap<String, Nat64PrefixStats>>,
}

impl PrefixHealth {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records one attempt outcome with its elapsed milliseconds.
    pub(crate) fn record(&self, prefix: &str, ok: bool, elapsed_ms: u64) {
        let mut stats = self.stats.lock().unwrap();
        let entry = stats.entry(prefix.to_string()).or_default();
        entry.ewma_ms = if entry.attempts == 0 {
            elapsed_ms as f64
        } else {
            EWMA_ALPHA * elapsed_ms as f64 + (1.0 - EWMA_ALPHA) * entry.ewma_ms
        };
        entry.attempts += 1;
        if !ok {
            entry.failures += 1;
        }
        debug!(prefix, ok, elapsed_ms, score = entry.score(), "nat64 attempt recorded");
    }

    /// Returns the stats of one prefix, if any attempt has been recorded.
    pub(crate) fn stats(&self, prefix: &str) -> Option<Nat64PrefixStats> {
        self.stats.lock().unwrap().get(prefix).copied()
    }

    /// Ranks prefixes by ascending score; the sort is stable, so untried
    /// prefixes keep their configured order.
    pub(crate) fn rank(&self, prefixes: &[&str]) -> Vec<String> {
        let stats = self.stats.lock().unwrap();
        let mut ranked: Vec<String> = prefixes.iter().map(|p| p.to_string()).collect();
        ranked.sort_by(|a, b| {
            let sa = stats.get(a).map(Nat64PrefixStats::score).unwrap_or(0.0);
            let sb = stats.get(b).map(Nat64PrefixStats::score).unwrap_or(0.0);
            sa.partial_cmp(&sb).unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked
    }

    /// Forgets every recorded outcome.
    pub(crate) fn clear(&self) {
        self.stats.lock().unwrap().clear();
    }
}
