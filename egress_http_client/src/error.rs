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

//! Definition of [`HttpClientError`], the error surface of the engine.
//!
//! Every error carries an [`ErrorKind`] whose `as_str` value is a stable
//! message prefix, so callers can discriminate kinds programmatically from
//! the rendered message as well as from the kind itself.

use core::fmt::{Debug, Display, Formatter};
use std::{error, io};

/// The error type returned by every fallible operation of the engine.
pub struct HttpClientError {
    kind: ErrorKind,
    cause: Cause,
}

impl HttpClientError {
    /// Creates a `UserAborted` error: the caller's cancellation fired.
    pub fn user_aborted() -> Self {
        Self {
            kind: ErrorKind::UserAborted,
            cause: Cause::NoReason,
        }
    }

    /// Creates a `Timeout` error for the given phase description.
    pub fn timeout(msg: &'static str) -> Self {
        Self {
            kind: ErrorKind::Timeout,
            cause: Cause::Msg(msg),
        }
    }

    /// Creates an `Other` error.
    pub fn other<T>(cause: T) -> Self
    where
        T: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::Other,
            cause: Cause::Other(cause.into()),
        }
    }

    /// Gets the `ErrorKind` of this error.
    pub fn error_kind(&self) -> ErrorKind {
        self.kind
    }

    /// Gets the underlying `io::Error`, if any.
    pub fn io_error(&self) -> Option<&io::Error> {
        match self.cause {
            Cause::Io(ref io) => Some(io),
            _ => None,
        }
    }

    /// Whether this error means the caller's cancellation token fired.
    pub fn is_user_aborted(&self) -> bool {
        self.kind == ErrorKind::UserAborted
    }

    /// Whether this error is one of the timeout kinds.
    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }
}

impl HttpClientError {
    pub(crate) fn from_error<T>(kind: ErrorKind, err: T) -> Self
    where
        T: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Self {
            kind,
            cause: Cause::Other(err.into()),
        }
    }

    pub(crate) fn from_str(kind: ErrorKind, msg: &'static str) -> Self {
        Self {
            kind,
            cause: Cause::Msg(msg),
        }
    }

    pub(crate) fn from_message(kind: ErrorKind, msg: String) -> Self {
        Self {
            kind,
            cause: Cause::Message(msg),
        }
    }

    pub(crate) fn from_io_error(kind: ErrorKind, err: io::Error) -> Self {
        Self {
            kind,
            cause: Cause::Io(err),
        }
    }

    /// The rendered cause without the kind prefix, used for substring
    /// matching against host error surfaces.
    pub(crate) fn cause_string(&self) -> String {
        format!("{}", self.cause)
    }
}

impl Debug for HttpClientError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let mut builder = f.debug_struct("HttpClientError");
        builder.field("ErrorKind", &self.kind);
        builder.field("Cause", &self.cause);
        builder.finish()
    }
}

impl Display for HttpClientError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.kind.as_str())?;
        write!(f, ": {}", self.cause)
    }
}

impl error::Error for HttpClientError {}

/// Error kinds which indicate the type of an [`HttpClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Errors for decoding a response body.
    BodyDecode,

    /// Errors for transferring a request or response body.
    BodyTransfer,

    /// Errors for invalid builder or request input.
    Build,

    /// Errors for connecting to a server.
    Connect,

    /// Exhaustion of every NAT64 candidate prefix.
    Nat64Exhausted,

    /// Errors for following redirects.
    Redirect,

    /// Errors for sending a request or reading its response.
    Request,

    /// The sandboxed host refused the connection.
    SandboxBlocked,

    /// Errors for reaching a timeout.
    Timeout,

    /// User raised errors.
    UserAborted,

    /// Other error kinds.
    Other,
}

impl ErrorKind {
    /// Gets the stable string prefix of this `ErrorKind`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use egress_http_client::ErrorKind;
    ///
    /// assert_eq!(ErrorKind::UserAborted.as_str(), "User Aborted Error");
    /// ```
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BodyDecode => "Body Decode Error",
            Self::BodyTransfer => "Body Transfer Error",
            Self::Build => "Build Error",
            Self::Connect => "Connect Error",
            Self::Nat64Exhausted => "NAT64 Exhausted Error",
            Self::Redirect => "Redirect Error",
            Self::Request => "Request Error",
            Self::SandboxBlocked => "Sandbox Blocked Error",
            Self::Timeout => "Timeout Error",
            Self::UserAborted => "User Aborted Error",
            Self::Other => "Other Error",
        }
    }
}

pub(crate) enum Cause {
    NoReason,
    Io(io::Error),
    Msg(&'static str),
    Message(String),
    Other(Box<dyn error::Error + Send + Sync>),
}

impl Debug for Cause {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoReason => write!(f, "No reason"),
            Self::Io(err) => Debug::fmt(err, f),
            Self::Msg(msg) => write!(f, "{msg}"),
            Self::Message(msg) => write!(f, "{msg}"),
            Self::Other(err) => Debug::fmt(err, f),
        }
    }
}

impl Display for Cause {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoReason => write!(f, "No reason"),
            Self::Io(err) => Display::fmt(err, f),
            Self::Msg(msg) => write!(f, "{msg}"),
            Self::Message(msg) => write!(f, "{msg}"),
            Self::Other(err) => Display::fmt(err, f),
        }
    }
}

macro_rules! err_from_msg {
    ($kind: ident, $msg: literal) => {{
        use crate::error::{ErrorKind, HttpClientError};

        Err(HttpClientError::from_str(ErrorKind::$kind, $msg))
    }};
}

#[cfg(test)]
mod ut_client_error {
    use std::io;

    use crate::{ErrorKind, HttpClientError};

    /// UT test cases for `ErrorKind::as_str`.
    ///
    /// # Brief
    /// 1. Converts each ErrorKind to its stable prefix.
    /// 2. Checks the results are correct.
    #[test]
    fn ut_err_as_str() {
        assert_eq!(ErrorKind::BodyDecode.as_str(), "Body Decode Error");
        assert_eq!(ErrorKind::BodyTransfer.as_str(), "Body Transfer Error");
        assert_eq!(ErrorKind::Build.as_str(), "Build Error");
        assert_eq!(ErrorKind::Connect.as_str(), "Connect Error");
        assert_eq!(ErrorKind::Nat64Exhausted.as_str(), "NAT64 Exhausted Error");
        assert_eq!(ErrorKind::Redirect.as_str(), "Redirect Error");
        assert_eq!(ErrorKind::Request.as_str(), "Request Error");
        assert_eq!(ErrorKind::SandboxBlocked.as_str(), "Sandbox Blocked Error");
        assert_eq!(ErrorKind::Timeout.as_str(), "Timeout Error");
        assert_eq!(ErrorKind::UserAborted.as_str(), "User Aborted Error");
        assert_eq!(ErrorKind::Other.as_str(), "Other Error");
    }

    /// UT test cases for the error constructors.
    ///
    /// # Brief
    /// 1. Builds errors through each public constructor.
    /// 2. Checks kind, io accessor and Display rendering.
    #[test]
    fn ut_err_constructors() {
        let aborted = HttpClientError::user_aborted();
        assert!(aborted.is_user_aborted());
        assert_eq!(format!("{aborted}"), "User Aborted Error: No reason");

        let timeout = HttpClientError::timeout("overall timeout");
        assert!(timeout.is_timeout());
        assert_eq!(format!("{timeout}"), "Timeout Error: overall timeout");

        let other = HttpClientError::other(io::Error::from(io::ErrorKind::BrokenPipe));
        assert_eq!(other.error_kind(), ErrorKind::Other);

        let io_err = HttpClientError::from_io_error(
            ErrorKind::Request,
            io::Error::from(io::ErrorKind::BrokenPipe),
        );
        assert!(io_err.io_error().is_some());
        assert_eq!(format!("{io_err}"), "Request Error: broken pipe");
    }

    /// UT test cases for `Debug` of `HttpClientError`.
    ///
    /// # Brief
    /// 1. Formats an error with `{:?}`.
    /// 2. Checks the structure of the output.
    #[test]
    fn ut_err_debug_fmt() {
        let error = HttpClientError::from_str(ErrorKind::Timeout, "headers timeout");
        assert_eq!(
            format!("{error:?}"),
            "HttpClientError { ErrorKind: Timeout, Cause: headers timeout }"
        );
    }
}
