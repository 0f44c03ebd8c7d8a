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

//! HTTP/1.1 [response] head parser.
//!
//! [response]: https://httpwg.org/specs/rfc9112.html#status.line
//!
//! Bytes accumulate until the double CRLF that ends the header section.
//! Interim 1xx heads (most commonly `100 Continue`) are stripped and
//! parsing resumes on the buffered remainder. The header section is
//! bounded; an over-budget head aborts the response.

use bytes::Bytes;

use crate::error::HttpError;
use crate::h1::{H1Error, MAX_HEADER_SECTION_SIZE};
use crate::headers::Headers;

/// A parsed response head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    /// The 3-digit status code.
    pub status: u16,
    /// The reason phrase, possibly empty.
    pub reason: String,
    /// The parsed headers, names lowercased, duplicates preserved.
    pub headers: Headers,
}

/// How the response body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// `transfer-encoding` names `chunked`.
    Chunked,
    /// A valid `content-length` delimits the body.
    ContentLength(u64),
    /// The body runs until the peer closes the connection.
    UntilClose,
}

/// Resolves the body framing of a parsed head, in the precedence order
/// `transfer-encoding`, then `content-length`, then close-delimited.
pub fn body_framing(head: &ResponseHead) -> BodyFraming {
    if let Some(te) = head.headers.get("transfer-encoding") {
        if te
            .split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("chunked"))
        {
            return BodyFraming::Chunked;
        }
    }
    if let Some(cl) = head.headers.get("content-length") {
        if let Ok(len) = cl.trim().parse::<u64>() {
            return BodyFraming::ContentLength(len);
        }
    }
    BodyFraming::UntilClose
}

/// Accumulating parser for response heads.
#[derive(Default)]
pub struct ResponseDecoder {
    buffer: Vec<u8>,
}

impl ResponseDecoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds bytes. Returns the parsed head and any leftover body bytes once
    /// the header section is complete, `None` while more input is needed.
    pub fn decode(&mut self, input: &[u8]) -> Result<Option<(ResponseHead, Bytes)>, HttpError> {
        self.buffer.extend_from_slice(input);
        loop {
            let end = match find_head_end(&self.buffer) {
                Some(end) => end,
                None => {
                    if self.buffer.len() > MAX_HEADER_SECTION_SIZE {
                        return Err(H1Error::HeaderSectionTooLarge.into());
                    }
                    return Ok(None);
                }
            };
            if end > MAX_HEADER_SECTION_SIZE {
                return Err(H1Error::HeaderSectionTooLarge.into());
            }
            let head = parse_head(&self.buffer[..end])?;
            let rest = self.buffer.split_off(end);
            self.buffer = rest;
            // Interim heads are dropped; the final head follows in the
            // buffered remainder.
            if (100..200).contains(&head.status) {
                continue;
            }
            let leftover = Bytes::from(std::mem::take(&mut self.buffer));
            return Ok(Some((head, leftover)));
        }
    }
}

/// Finds the index one past the `\r\n\r\n` terminator.
fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|idx| idx + 4)
}

fn parse_head(raw: &[u8]) -> Result<ResponseHead, HttpError> {
    let mut lines = raw.split(|b| *b == b'\n');
    let status_line = lines.next().ok_or(H1Error::InvalidStatusLine)?;
    let status_line = strip_cr(status_line);
    let (status, reason) = parse_status_line(status_line)?;

    let mut headers = Headers::new();
    for line in lines {
        let line = strip_cr(line);
        if line.is_empty() {
            continue;
        }
        // Obsolete line folding is rejected rather than unfolded.
        if line[0] == b' ' || line[0] == b'\t' {
            return Err(H1Error::InvalidHeader.into());
        }
        let colon = line
            .iter()
            .position(|b| *b == b':')
            .ok_or(H1Error::InvalidHeader)?;
        let name = std::str::from_utf8(&line[..colon]).map_err(|_| H1Error::InvalidHeader)?;
        let value =
            std::str::from_utf8(&line[colon + 1..]).map_err(|_| H1Error::InvalidHeader)?;
        headers
            .append(name, value.trim())
            .map_err(|_| HttpError::from(H1Error::InvalidHeader))?;
    }

    Ok(ResponseHead {
        status,
        reason,
        headers,
    })
}

fn parse_status_line(line: &[u8]) -> Result<(u16, String), HttpError> {
    // "HTTP/1.1 200 OK" or "HTTP/1.0 200".
    let rest = line
        .strip_prefix(b"HTTP/1.")
        .ok_or(H1Error::InvalidStatusLine)?;
    let rest = match rest.first() {
        Some(b'0' | b'1') => &rest[1..],
        _ => return Err(H1Error::InvalidStatusLine.into()),
    };
    let rest = rest
        .strip_prefix(b" ")
        .ok_or(H1Error::InvalidStatusLine)?;
    if rest.len() < 3 || !rest[..3].iter().all(u8::is_ascii_digit) {
        return Err(H1Error::InvalidStatusLine.into());
    }
    let status: u16 = std::str::from_utf8(&rest[..3])
        .unwrap()
        .parse()
        .map_err(|_| H1Error::InvalidStatusLine)?;
    if status < 100 {
        return Err(H1Error::InvalidStatusLine.into());
    }
    let reason = match rest.get(3) {
        None => String::new(),
        Some(b' ') => String::from_utf8_lossy(&rest[4..]).into_owned(),
        Some(_) => return Err(H1Error::InvalidStatusLine.into()),
    };
    Ok((status, reason))
}

fn strip_cr(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

#[cfg(test)]
mod ut_h1_decoder {
    use super::*;

    /// UT test cases for a complete response head.
    ///
    /// # Brief
    /// 1. Feeds a head split across two reads with body bytes trailing.
    /// 2. Checks status, reason, lowercased headers and the leftover bytes.
    #[test]
    fn ut_decode_response_head() {
        let mut decoder = ResponseDecoder::new();
        assert!(decoder
            .decode(b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Le")
            .unwrap()
            .is_none());
        let (head, leftover) = decoder
            .decode(b"ngth: 2\r\n\r\nOK")
            .unwrap()
            .expect("head should be complete");
        assert_eq!(head.status, 200);
        assert_eq!(head.reason, "OK");
        assert_eq!(head.headers.get("content-type"), Some("text/plain".to_string()));
        assert_eq!(body_framing(&head), BodyFraming::ContentLength(2));
        assert_eq!(&leftover[..], b"OK");
    }

    /// UT test cases for interim 100 Continue heads.
    ///
    /// # Brief
    /// 1. Feeds a `100 Continue` head followed by the final head in one
    ///    buffer.
    /// 2. Checks the interim head is stripped and the final head returned.
    #[test]
    fn ut_decode_100_continue() {
        let mut decoder = ResponseDecoder::new();
        let wire = b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 204 No Content\r\n\r\n";
        let (head, leftover) = decoder.decode(wire).unwrap().unwrap();
        assert_eq!(head.status, 204);
        assert!(leftover.is_empty());
    }

    /// UT test cases for duplicate header merging.
    ///
    /// # Brief
    /// 1. Parses duplicate `vary` and `set-cookie` headers.
    /// 2. Checks comma joining for `vary` and newline joining plus raw
    ///    preservation for `set-cookie`.
    #[test]
    fn ut_decode_duplicate_headers() {
        let mut decoder = ResponseDecoder::new();
        let wire = b"HTTP/1.1 200 OK\r\nVary: accept\r\nVary: origin\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\n\r\n";
        let (head, _) = decoder.decode(wire).unwrap().unwrap();
        assert_eq!(head.headers.get("vary"), Some("accept, origin".to_string()));
        assert_eq!(head.headers.get("set-cookie"), Some("a=1\nb=2".to_string()));
        assert_eq!(head.headers.get_all("set-cookie"), vec!["a=1", "b=2"]);
    }

    /// UT test cases for body framing precedence.
    ///
    /// # Brief
    /// 1. Builds heads carrying chunked coding, both codings, a bad
    ///    `content-length` and neither.
    /// 2. Checks the precedence order chunked, content-length, close.
    #[test]
    fn ut_decode_body_framing() {
        let parse = |raw: &[u8]| {
            let mut decoder = ResponseDecoder::new();
            decoder.decode(raw).unwrap().unwrap().0
        };
        let head = parse(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: gzip, chunked\r\n\r\n");
        assert_eq!(body_framing(&head), BodyFraming::Chunked);

        let head =
            parse(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nContent-Length: 5\r\n\r\n");
        assert_eq!(body_framing(&head), BodyFraming::Chunked);

        let head = parse(b"HTTP/1.1 200 OK\r\nContent-Length: borked\r\n\r\n");
        assert_eq!(body_framing(&head), BodyFraming::UntilClose);

        let head = parse(b"HTTP/1.1 200 OK\r\n\r\n");
        assert_eq!(body_framing(&head), BodyFraming::UntilClose);
    }

    /// UT test cases for malformed heads.
    ///
    /// # Brief
    /// 1. Feeds a bad status line, a missing colon and a folded header.
    /// 2. Checks each is rejected.
    #[test]
    fn ut_decode_malformed() {
        let mut decoder = ResponseDecoder::new();
        assert!(decoder.decode(b"HTTP/2 200 OK\r\n\r\n").is_err());

        let mut decoder = ResponseDecoder::new();
        assert!(decoder.decode(b"HTTP/1.1 200 OK\r\nbroken\r\n\r\n").is_err());

        let mut decoder = ResponseDecoder::new();
        assert!(decoder
            .decode(b"HTTP/1.1 200 OK\r\na: b\r\n folded\r\n\r\n")
            .is_err());
    }

    /// UT test cases for the header-section ceiling.
    ///
    /// # Brief
    /// 1. Streams more than the header budget without a terminator.
    /// 2. Checks the decoder aborts the response.
    #[test]
    fn ut_decode_head_too_large() {
        let mut decoder = ResponseDecoder::new();
        decoder.decode(b"HTTP/1.1 200 OK\r\n").unwrap();
        let filler = vec![b'a'; MAX_HEADER_SECTION_SIZE + 1];
        assert_eq!(
            decoder.decode(&filler),
            Err(HttpError::from(H1Error::HeaderSectionTooLarge))
        );
    }
}
