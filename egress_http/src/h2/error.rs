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

//! [`Error Codes`] of the HTTP/2 protocol.
//!
//! [`Error Codes`]: https://httpwg.org/specs/rfc9113.html#ErrorCodes
//!
//! Error codes are 32-bit fields carried by `RST_STREAM` and `GOAWAY` frames.
//! They share one code space; whether a code applies to a stream or to the
//! whole connection depends on where it is used.

use super::frame::StreamId;

/// An HTTP/2 error, scoped either to one stream or to the connection.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum H2Error {
    /// A [`Stream Error`]: only the affected stream is reset.
    ///
    /// [`Stream Error`]: https://www.rfc-editor.org/rfc/rfc9113.html#name-stream-error-handling
    StreamError(StreamId, ErrorCode),

    /// A [`Connection Error`]: the whole connection must shut down.
    ///
    /// [`Connection Error`]: https://www.rfc-editor.org/rfc/rfc9113.html#name-connection-error-handling
    ConnectionError(ErrorCode),
}

impl H2Error {
    /// Returns the error code regardless of the error scope.
    pub fn code(&self) -> ErrorCode {
        match self {
            H2Error::StreamError(_, code) => *code,
            H2Error::ConnectionError(code) => *code,
        }
    }
}

/// The error codes defined by RFC 9113 section 7.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum ErrorCode {
    /// Graceful shutdown or no error condition.
    NoError = 0x00,

    /// Unspecific protocol violation.
    ProtocolError = 0x01,

    /// Unexpected internal error.
    InternalError = 0x02,

    /// The peer violated the flow-control protocol.
    FlowControlError = 0x03,

    /// A SETTINGS frame was not acknowledged in a timely manner.
    SettingsTimeout = 0x04,

    /// A frame was received after a stream was half-closed.
    StreamClosed = 0x05,

    /// A frame had an invalid size.
    FrameSizeError = 0x06,

    /// The stream was refused before any application processing.
    RefusedStream = 0x07,

    /// The stream is no longer needed.
    Cancel = 0x08,

    /// The field-section compression context cannot be maintained.
    CompressionError = 0x09,

    /// A CONNECT tunnel was reset or abnormally closed.
    ConnectError = 0x0a,

    /// The peer is generating excessive load.
    EnhanceYourCalm = 0x0b,

    /// The transport does not meet minimum security requirements.
    InadequateSecurity = 0x0c,

    /// HTTP/1.1 is required instead of HTTP/2.
    Http1_1Required = 0x0d,
}

impl ErrorCode {
    /// Returns the numeric wire value of the code.
    pub fn into_code(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for ErrorCode {
    type Error = H2Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        let code = match value {
            0x00 => ErrorCode::NoError,
            0x01 => ErrorCode::ProtocolError,
            0x02 => ErrorCode::InternalError,
            0x03 => ErrorCode::FlowControlError,
            0x04 => ErrorCode::SettingsTimeout,
            0x05 => ErrorCode::StreamClosed,
            0x06 => ErrorCode::FrameSizeError,
            0x07 => ErrorCode::RefusedStream,
            0x08 => ErrorCode::Cancel,
            0x09 => ErrorCode::CompressionError,
            0x0a => ErrorCode::ConnectError,
            0x0b => ErrorCode::EnhanceYourCalm,
            0x0c => ErrorCode::InadequateSecurity,
            0x0d => ErrorCode::Http1_1Required,
            _ => return Err(H2Error::ConnectionError(ErrorCode::ProtocolError)),
        };
        Ok(code)
    }
}

#[cfg(test)]
mod ut_h2_error {
    use super::*;

    /// UT test cases for `ErrorCode::try_from`.
    ///
    /// # Brief
    /// 1. Converts every defined wire value into an `ErrorCode`.
    /// 2. Checks an undefined value is rejected as a protocol error.
    #[test]
    fn ut_error_code_try_from() {
        for value in 0x00u32..=0x0d {
            let code = ErrorCode::try_from(value).unwrap();
            assert_eq!(code.into_code(), value);
        }
        assert_eq!(
            ErrorCode::try_from(0x0e),
            Err(H2Error::ConnectionError(ErrorCode::ProtocolError))
        );
    }

    /// UT test cases for `H2Error::code`.
    ///
    /// # Brief
    /// 1. Extracts the code from stream-scoped and connection-scoped errors.
    #[test]
    fn ut_h2_error_code() {
        assert_eq!(
            H2Error::StreamError(3, ErrorCode::Cancel).code(),
            ErrorCode::Cancel
        );
        assert_eq!(
            H2Error::ConnectionError(ErrorCode::CompressionError).code(),
            ErrorCode::CompressionError
        );
    }
}
