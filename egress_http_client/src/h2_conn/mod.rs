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

//! The HTTP/2 connection engine: flow-control windows, per-stream state,
//! the connection actor and the request facade handed to the dispatcher.

mod client;
mod connection;
mod stream;
mod window;

pub(crate) use client::{H2Body, H2Client, H2RequestHead, H2ResponseParts, H2SendBody};
pub(crate) use connection::spawn_connection;

use std::time::Duration;

/// Stream-level receive window advertised via SETTINGS_INITIAL_WINDOW_SIZE.
pub(crate) const LOCAL_STREAM_WINDOW: u32 = 2 * 1024 * 1024;

/// Connection-level receive window target.
pub(crate) const LOCAL_CONNECTION_WINDOW: u32 = 4 * 1024 * 1024;

/// Largest frame payload this side is willing to receive.
pub(crate) const LOCAL_MAX_FRAME_SIZE: u32 = 64 * 1024;

/// Advertised HPACK dynamic table size.
pub(crate) const LOCAL_HEADER_TABLE_SIZE: u32 = 4096;

/// The peer must complete the settings exchange within this window.
pub(crate) const SETTINGS_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(5);
