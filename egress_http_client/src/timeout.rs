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

//! Deadline and cancellation composition.
//!
//! The overall timeout becomes a [`Deadline`] at request entry; per-attempt
//! guards (headers, body idle, connect) are further deadlines merged with
//! [`Deadline::earliest`]. Every suspension point runs under [`guarded`],
//! which races the pending operation against the merged deadline and the
//! caller's cancellation token, so both propagate as their distinct error
//! kinds.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::HttpClientError;

/// A point in time an operation must not outlive. `None` means unbounded.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// An unbounded deadline.
    pub(crate) fn none() -> Self {
        Self { at: None }
    }

    /// A deadline `timeout` from now, or unbounded when `timeout` is
    /// `None`.
    pub(crate) fn after(timeout: Option<Duration>) -> Self {
        Self {
            at: timeout.map(|t| Instant::now() + t),
        }
    }

    /// The earlier of two deadlines.
    pub(crate) fn earliest(self, other: Deadline) -> Deadline {
        let at = match (self.at, other.at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Deadline { at }
    }

    /// Whether the deadline has already passed.
    pub(crate) fn expired(&self) -> bool {
        matches!(self.at, Some(at) if at <= Instant::now())
    }

    /// Resolves when the deadline passes; never resolves when unbounded.
    pub(crate) async fn wait(self) {
        match self.at {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    }
}

/// Races `future` against the deadline and the cancellation token.
///
/// Cancellation wins ties: a caller that aborted must never observe a
/// result produced at the same instant.
pub(crate) async fn guarded<T, F>(
    deadline: Deadline,
    cancel: &CancellationToken,
    phase: &'static str,
    future: F,
) -> Result<T, HttpClientError>
where
    F: Future<Output = Result<T, HttpClientError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(HttpClientError::user_aborted()),
        _ = deadline.wait() => Err(HttpClientError::timeout(phase)),
        result = future => result,
    }
}

/// A sleep that both the deadline and the cancellation token can cut short.
pub(crate) async fn cancellable_sleep(
    duration: Duration,
    deadline: Deadline,
    cancel: &CancellationToken,
) -> Result<(), HttpClientError> {
    guarded(deadline, cancel, "overall timeout", async {
        tokio::time::sleep(duration).await;
        Ok(())
    })
    .await
}

#[cfg(test)]
mod ut_timeout {
    use super::*;

    /// UT test cases for `Deadline::earliest`.
    ///
    /// # Brief
    /// 1. Merges bounded and unbounded deadlines.
    /// 2. Checks the earlier bound wins and unbounded merges correctly.
    #[test]
    fn ut_deadline_earliest() {
        let unbounded = Deadline::none();
        let short = Deadline::after(Some(Duration::from_millis(10)));
        let long = Deadline::after(Some(Duration::from_secs(60)));

        assert!(unbounded.earliest(unbounded).at.is_none());
        assert_eq!(unbounded.earliest(short).at, short.at);
        assert_eq!(short.earliest(long).at, short.at);
        assert_eq!(long.earliest(short).at, short.at);
    }

    /// UT test cases for `guarded` outcomes.
    ///
    /// # Brief
    /// 1. Runs a ready future, a future past its deadline and a future under
    ///    a pre-cancelled token.
    /// 2. Checks success, Timeout and UserAborted results respectively.
    #[tokio::test]
    async fn ut_guarded() {
        let cancel = CancellationToken::new();

        let ok = guarded(Deadline::none(), &cancel, "phase", async { Ok(1) }).await;
        assert_eq!(ok.unwrap(), 1);

        let timed_out: Result<(), _> = guarded(
            Deadline::after(Some(Duration::from_millis(5))),
            &cancel,
            "headers timeout",
            std::future::pending(),
        )
        .await;
        assert!(timed_out.unwrap_err().is_timeout());

        cancel.cancel();
        let aborted: Result<(), _> = guarded(
            Deadline::none(),
            &cancel,
            "phase",
            std::future::pending(),
        )
        .await;
        assert!(aborted.unwrap_err().is_user_aborted());
    }
}
