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

//! [HPACK] implementation for the HTTP/2 protocol.
//!
//! [HPACK]: https://httpwg.org/specs/rfc7541.html
//!
//! The encoder and the decoder each own a dynamic table. The two tables of
//! one connection evolve independently per direction; a decoding failure
//! desynchronizes the shared compression state and is therefore fatal for
//! the connection.

mod decoder;
mod encoder;
mod integer;
mod table;

pub(crate) use decoder::HpackDecoder;
pub(crate) use encoder::HpackEncoder;
