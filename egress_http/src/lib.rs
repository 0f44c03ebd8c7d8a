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

//! `egress_http` provides the protocol components used by the egress HTTPS
//! engine: an insertion-ordered header map, URI parsing, the HTTP/1.1 wire
//! codec and the HTTP/2 framing and HPACK layers.
//!
//! # Supported HTTP Version
//! - HTTP/1.1
//! - HTTP/2

pub mod error;
pub mod h1;
pub mod h2;
pub mod headers;
pub mod method;
pub mod pseudo;
pub mod uri;

mod huffman;
