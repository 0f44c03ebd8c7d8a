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

//! Body compression: gzip for outbound request bodies, streaming gzip and
//! deflate decoding for inbound response bodies.

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};

use crate::error::{ErrorKind, HttpClientError};

/// Request bodies below this size are not worth compressing.
pub(crate) const COMPRESS_THRESHOLD: usize = 1024;

/// Gzip-compresses a finite request body.
pub(crate) fn gzip_compress(data: &[u8]) -> Result<Vec<u8>, HttpClientError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| HttpClientError::from_io_error(ErrorKind::BodyTransfer, e))
}

/// Incremental decoder for `content-encoding: gzip` / `deflate` bodies.
#[derive(Debug)]
pub(crate) struct ContentDecoder {
    inner: Decompress,
    finished: bool,
}

impl ContentDecoder {
    /// Creates a decoder for the given `content-encoding` token, or `None`
    /// for encodings the engine does not decode.
    pub(crate) fn from_encoding(encoding: &str) -> Option<Self> {
        let inner = match encoding.trim().to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => Decompress::new_gzip(15),
            "deflate" => Decompress::new(true),
            _ => return None,
        };
        Some(Self {
            inner,
            finished: false,
        })
    }

    /// Decodes one body chunk, returning the decompressed bytes.
    pub(crate) fn decode(&mut self, chunk: &[u8]) -> Result<Vec<u8>, HttpClientError> {
        let mut out = Vec::with_capacity(chunk.len().saturating_mul(3).max(256));
        let mut buf = [0u8; 16 * 1024];
        let mut pos = 0usize;
        while pos < chunk.len() && !self.finished {
            let in_before = self.inner.total_in();
            let out_before = self.inner.total_out();
            let status = self
                .inner
                .decompress(&chunk[pos..], &mut buf, FlushDecompress::None)
                .map_err(|e| {
                    HttpClientError::from_message(
                        ErrorKind::BodyDecode,
                        format!("decompress error: {e}"),
                    )
                })?;
            let consumed = (self.inner.total_in() - in_before) as usize;
            let produced = (self.inner.total_out() - out_before) as usize;
            pos += consumed;
            out.extend_from_slice(&buf[..produced]);
            match status {
                Status::StreamEnd => self.finished = true,
                Status::Ok | Status::BufError => {
                    if consumed == 0 && produced == 0 {
                        // No forward progress: the stream needs more input.
                        break;
                    }
                }
            }
        }
        Ok(out)
    }

    /// Whether the compressed stream reached its end marker.
    pub(crate) fn finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod ut_compress {
    use super::*;

    /// UT test cases for the gzip round-trip law.
    ///
    /// # Brief
    /// 1. Compresses byte buffers of several shapes and sizes.
    /// 2. Decompresses through the streaming decoder, one byte at a time.
    /// 3. Checks the output equals the input.
    #[test]
    fn ut_gzip_roundtrip() {
        let inputs: Vec<Vec<u8>> = vec![
            b"".to_vec(),
            b"hello".to_vec(),
            b"a".repeat(100_000),
            (0u8..=255).cycle().take(10_000).collect(),
        ];
        for input in inputs {
            let compressed = gzip_compress(&input).unwrap();
            let mut decoder = ContentDecoder::from_encoding("gzip").unwrap();
            let mut out = Vec::new();
            for byte in &compressed {
                out.extend(decoder.decode(&[*byte]).unwrap());
            }
            assert_eq!(out, input);
            assert!(decoder.finished());
        }
    }

    /// UT test cases for encoding selection.
    ///
    /// # Brief
    /// 1. Requests decoders for gzip, deflate, identity and unknown tokens.
    /// 2. Checks only gzip and deflate are handled.
    #[test]
    fn ut_content_decoder_selection() {
        assert!(ContentDecoder::from_encoding("gzip").is_some());
        assert!(ContentDecoder::from_encoding(" GZIP ").is_some());
        assert!(ContentDecoder::from_encoding("deflate").is_some());
        assert!(ContentDecoder::from_encoding("identity").is_none());
        assert!(ContentDecoder::from_encoding("br").is_none());
    }

    /// UT test cases for corrupt input.
    ///
    /// # Brief
    /// 1. Feeds non-gzip bytes to a gzip decoder.
    /// 2. Checks a body-decode error surfaces.
    #[test]
    fn ut_content_decoder_corrupt() {
        let mut decoder = ContentDecoder::from_encoding("gzip").unwrap();
        let err = decoder.decode(b"definitely not gzip data").unwrap_err();
        assert_eq!(err.error_kind(), crate::ErrorKind::BodyDecode);
    }
}
