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

use crate::headers::Headers;
use crate::pseudo::PseudoHeaders;

/// The contents of an HTTP/2 header block: the pseudo-header fields followed
/// by the regular header fields.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Parts {
    pseudo: PseudoHeaders,
    headers: Headers,
}

impl Parts {
    /// Creates an empty `Parts`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `Parts` from pseudo-headers and regular headers.
    pub fn from_parts(pseudo: PseudoHeaders, headers: Headers) -> Self {
        Self { pseudo, headers }
    }

    /// Returns the pseudo-headers and the regular headers.
    pub fn parts(&self) -> (&PseudoHeaders, &Headers) {
        (&self.pseudo, &self.headers)
    }

    /// Returns a mutable reference to the pseudo-headers.
    pub fn pseudo_mut(&mut self) -> &mut PseudoHeaders {
        &mut self.pseudo
    }

    /// Returns a mutable reference to the regular headers.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Consumes the `Parts`, returning its components.
    pub fn into_parts(self) -> (PseudoHeaders, Headers) {
        (self.pseudo, self.headers)
    }
}
