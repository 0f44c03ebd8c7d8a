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

//! Errors that may occur in this crate.
//!
//! [`HttpError`] is the unified error surface of the protocol layer. It
//! covers input validation, HTTP/1.1 wire errors and HTTP/2 errors.

use core::fmt::{Debug, Display, Formatter};
use std::error::Error;

use crate::h1::H1Error;
use crate::h2::H2Error;
use crate::uri::InvalidUri;

/// Errors that may occur when using this crate.
#[derive(Debug, Eq, PartialEq)]
pub struct HttpError {
    kind: ErrorKind,
}

impl HttpError {
    /// Returns `true` if the error came from the HTTP/2 layer.
    pub fn is_h2(&self) -> bool {
        matches!(self.kind, ErrorKind::H2(_))
    }

    /// Returns the HTTP/2 error if the error came from the HTTP/2 layer.
    pub fn h2_error(&self) -> Option<H2Error> {
        match self.kind {
            ErrorKind::H2(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ErrorKind> for HttpError {
    fn from(kind: ErrorKind) -> Self {
        HttpError { kind }
    }
}

impl From<InvalidUri> for HttpError {
    fn from(err: InvalidUri) -> Self {
        ErrorKind::Uri(err).into()
    }
}

impl From<H1Error> for HttpError {
    fn from(err: H1Error) -> Self {
        ErrorKind::H1(err).into()
    }
}

impl From<H2Error> for HttpError {
    fn from(err: H2Error) -> Self {
        ErrorKind::H2(err).into()
    }
}

impl Display for HttpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match &self.kind {
            ErrorKind::InvalidInput(msg) => write!(f, "Invalid input: {msg}"),
            ErrorKind::Uri(e) => Display::fmt(e, f),
            ErrorKind::H1(e) => Display::fmt(e, f),
            ErrorKind::H2(e) => Debug::fmt(e, f),
        }
    }
}

impl Error for HttpError {}

#[derive(Debug, Eq, PartialEq)]
pub(crate) enum ErrorKind {
    /// An invalid input parameter was passed to a method of this crate.
    InvalidInput(&'static str),

    /// Errors related to URIs.
    Uri(InvalidUri),

    /// Errors related to `HTTP/1.1`.
    H1(H1Error),

    /// Errors related to `HTTP/2`.
    H2(H2Error),
}

pub(crate) fn invalid_input(msg: &'static str) -> HttpError {
    ErrorKind::InvalidInput(msg).into()
}
