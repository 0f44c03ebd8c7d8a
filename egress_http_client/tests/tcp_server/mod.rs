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

//! A scripted HTTP/1.1 test server: each accepted connection receives the
//! next canned response, and every request head (plus content-length body)
//! is recorded for assertions.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub struct TestServer {
    pub addr: SocketAddr,
    pub requests: Arc<Mutex<Vec<String>>>,
    pub hits: Arc<AtomicUsize>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn request(&self, index: usize) -> String {
        self.requests.lock().unwrap()[index].clone()
    }
}

/// Starts a server that answers one connection per canned response, in
/// order, then stops accepting.
pub async fn start(responses: Vec<Vec<u8>>) -> TestServer {
    serve(responses, false).await
}

/// Like [`start`], but keeps each socket open after responding, for tests
/// that need a stalled-but-alive connection.
#[allow(dead_code)]
pub async fn start_hold(responses: Vec<Vec<u8>>) -> TestServer {
    serve(responses, true).await
}

async fn serve(responses: Vec<Vec<u8>>, hold: bool) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let hits = Arc::new(AtomicUsize::new(0));

    let task_requests = requests.clone();
    let task_hits = hits.clone();
    tokio::spawn(async move {
        let mut held = Vec::new();
        for response in responses {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            task_hits.fetch_add(1, Ordering::SeqCst);
            let request = read_request(&mut socket).await;
            task_requests.lock().unwrap().push(request);
            let _ = socket.write_all(&response).await;
            let _ = socket.flush().await;
            if hold {
                held.push(socket);
            }
        }
        if hold {
            tokio::time::sleep(std::time::Duration::from_secs(600)).await;
            drop(held);
        }
    });

    TestServer {
        addr,
        requests,
        hits,
    }
}

/// Starts a server that accepts one connection and never answers it.
pub async fn start_silent() -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let hits = Arc::new(AtomicUsize::new(0));
    let task_hits = hits.clone();
    tokio::spawn(async move {
        if let Ok((socket, _)) = listener.accept().await {
            task_hits.fetch_add(1, Ordering::SeqCst);
            // Hold the socket open without responding.
            tokio::time::sleep(std::time::Duration::from_secs(600)).await;
            drop(socket);
        }
    });
    TestServer {
        addr,
        requests,
        hits,
    }
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    let head_end = loop {
        let n = socket.read(&mut buf).await.unwrap_or(0);
        if n == 0 {
            return String::from_utf8_lossy(&raw).into_owned();
        }
        raw.extend_from_slice(&buf[..n]);
        if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&raw[..head_end]).into_owned();
    // Read a content-length body so the next write does not race it.
    let content_length = head
        .lines()
        .find_map(|line| {
            let lower = line.to_ascii_lowercase();
            lower
                .strip_prefix("content-length:")
                .map(|v| v.trim().to_string())
        })
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    let chunked = head.to_ascii_lowercase().contains("transfer-encoding: chunked");
    let mut body = raw[head_end..].to_vec();
    if chunked {
        // Read through the terminal zero-size chunk.
        while !body.windows(5).any(|w| w == b"0\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            body.extend_from_slice(&buf[..n]);
        }
    } else {
        while body.len() < content_length {
            let n = socket.read(&mut buf).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            body.extend_from_slice(&buf[..n]);
        }
    }
    format!("{head}{}", String::from_utf8_lossy(&body))
}
