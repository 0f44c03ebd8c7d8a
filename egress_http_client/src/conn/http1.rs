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

//! One HTTP/1.1 exchange over an established byte stream.
//!
//! The request head (and a buffered body) go out in as few writes as
//! possible; a streamed body is pumped through chunked coding. The response
//! head is then read under the per-attempt headers guard. Body bytes that
//! arrive with the head are returned as leftover for the body stream.

use bytes::Bytes;
use egress_http::h1::chunked::{encode_chunk, encode_last_chunk};
use egress_http::h1::decoder::{ResponseDecoder, ResponseHead};
use egress_http::h1::encoder::{encode_request_head, BodyLength};
use egress_http::headers::Headers;
use egress_http::method::Method;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorKind, HttpClientError};
use crate::timeout::{guarded, Deadline};
use crate::transport::ByteStream;

/// The body of one outbound H1 attempt.
pub(crate) enum H1SendBody<'a> {
    Empty,
    Buffer(&'a [u8]),
    Stream(&'a mut (dyn AsyncRead + Send + Unpin)),
}

/// A parsed response head plus the stream it arrived on.
pub(crate) struct H1Exchange {
    pub(crate) head: ResponseHead,
    pub(crate) leftover: Bytes,
    pub(crate) stream: ByteStream,
}

/// Sends one request and reads the response head.
///
/// On success the stream is handed back inside the exchange; the body
/// layer owns it from here. On failure the stream is dropped, closing the
/// socket.
pub(crate) async fn exchange(
    mut stream: ByteStream,
    method: &Method,
    path_and_query: &str,
    authority: &str,
    headers: &Headers,
    body: H1SendBody<'_>,
    headers_deadline: Deadline,
    cancel: &CancellationToken,
) -> Result<H1Exchange, HttpClientError> {
    let body_length = match &body {
        H1SendBody::Empty => BodyLength::Empty,
        H1SendBody::Buffer(data) => BodyLength::Fixed(data.len() as u64),
        H1SendBody::Stream(_) => BodyLength::Stream,
    };
    let (head_bytes, _) =
        encode_request_head(method, path_and_query, authority, headers, body_length)
            .map_err(|e| HttpClientError::from_error(ErrorKind::Request, e))?;

    guarded(headers_deadline, cancel, "headers timeout", async {
        match body {
            H1SendBody::Empty => {
                write_all(&mut stream, &head_bytes).await?;
            }
            H1SendBody::Buffer(data) => {
                // Head and body in one buffered write.
                let mut wire = head_bytes;
                wire.extend_from_slice(data);
                write_all(&mut stream, &wire).await?;
            }
            H1SendBody::Stream(reader) => {
                write_all(&mut stream, &head_bytes).await?;
                let mut buf = vec![0u8; 16 * 1024];
                loop {
                    let n = reader.read(&mut buf).await.map_err(|e| {
                        HttpClientError::from_io_error(ErrorKind::BodyTransfer, e)
                    })?;
                    let mut wire = Vec::with_capacity(n + 16);
                    if n == 0 {
                        encode_last_chunk(&mut wire);
                        write_all(&mut stream, &wire).await?;
                        break;
                    }
                    encode_chunk(&buf[..n], &mut wire);
                    write_all(&mut stream, &wire).await?;
                }
            }
        }
        stream
            .flush()
            .await
            .map_err(|e| HttpClientError::from_io_error(ErrorKind::Request, e))?;

        let mut decoder = ResponseDecoder::new();
        let mut buf = vec![0u8; 16 * 1024];
        loop {
            let n = stream
                .read(&mut buf)
                .await
                .map_err(|e| HttpClientError::from_io_error(ErrorKind::Request, e))?;
            if n == 0 {
                return err_from_msg!(Request, "connection closed before response head");
            }
            if let Some((head, leftover)) = decoder
                .decode(&buf[..n])
                .map_err(|e| HttpClientError::from_error(ErrorKind::Request, e))?
            {
                return Ok(H1Exchange {
                    head,
                    leftover,
                    stream,
                });
            }
        }
    })
    .await
}

async fn write_all(stream: &mut ByteStream, data: &[u8]) -> Result<(), HttpClientError> {
    stream
        .write_all(data)
        .await
        .map_err(|e| HttpClientError::from_io_error(ErrorKind::Request, e))
}
