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

//! Retry policy: which attempts may be retried and how long to wait.
//!
//! A `retry-after` header wins over backoff when it parses as positive
//! integer seconds or as an HTTP date in the future; otherwise the delay is
//! exponential from the base, and everything is capped at the maximum.

use std::time::{Duration, SystemTime};

use egress_http::method::Method;

/// Methods retried by default. POST and PATCH are excluded: replaying them
/// can duplicate server-side effects.
pub(crate) const DEFAULT_RETRY_METHODS: [&str; 5] = ["GET", "HEAD", "OPTIONS", "PUT", "DELETE"];

/// Statuses that trigger a retry by default.
pub(crate) const DEFAULT_RETRY_STATUSES: [u16; 7] = [408, 413, 429, 500, 502, 503, 504];

const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(300);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Concrete retry configuration resolved from the request options.
#[derive(Clone, Debug)]
pub(crate) struct RetryConfig {
    pub(crate) max_retries: u32,
    pub(crate) base_delay: Duration,
    pub(crate) max_delay: Duration,
    pub(crate) methods: Vec<String>,
    pub(crate) statuses: Vec<u16>,
}

impl RetryConfig {
    pub(crate) fn disabled() -> Self {
        Self::with_retries(0)
    }

    pub(crate) fn with_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            methods: DEFAULT_RETRY_METHODS.iter().map(|m| m.to_string()).collect(),
            statuses: DEFAULT_RETRY_STATUSES.to_vec(),
        }
    }

    /// Whether the method belongs to the retryable set.
    pub(crate) fn method_allowed(&self, method: &Method) -> bool {
        self.methods.iter().any(|m| m == method.as_str())
    }

    /// Whether the status belongs to the retry-trigger set.
    pub(crate) fn status_triggers(&self, status: u16) -> bool {
        self.statuses.contains(&status)
    }

    /// Computes the pre-retry delay for a zero-based attempt index.
    pub(crate) fn delay(&self, attempt: u32, retry_after: Option<&str>) -> Duration {
        if let Some(value) = retry_after.and_then(parse_retry_after) {
            return value.min(self.max_delay);
        }
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Parses a `retry-after` value: integer seconds, or an HTTP date in the
/// future. Zero, negative and unparseable values yield nothing.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<i64>() {
        if seconds > 0 {
            return Some(Duration::from_secs(seconds as u64));
        }
        return None;
    }
    let date = httpdate::parse_http_date(value).ok()?;
    date.duration_since(SystemTime::now()).ok()
}
