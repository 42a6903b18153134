//! Shared helpers for the integration tests

#![allow(dead_code)]

use relay_rs::queue::QueueStore;
use relay_rs::security::TlsConfig;
use relay_rs::smtp::SmtpServer;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

pub const HOSTNAME: &str = "mx.test";

/// Bind an in-process server on an ephemeral port and run it in the background
pub async fn start_server(store: Arc<dyn QueueStore>) -> SocketAddr {
    let tls = Arc::new(TlsConfig::self_signed(HOSTNAME).unwrap());
    let server = SmtpServer::bind("127.0.0.1:0", HOSTNAME.to_string(), store, tls)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();

    tokio::spawn(server.run());
    addr
}

/// Raw line-oriented SMTP client
pub struct LineClient<S> {
    reader: BufReader<S>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> LineClient<S> {
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::new(stream),
        }
    }

    pub fn into_inner(self) -> S {
        self.reader.into_inner()
    }

    pub async fn send(&mut self, line: &str) {
        self.send_bytes(format!("{}\r\n", line).as_bytes()).await;
    }

    /// Write `data` as-is; the caller supplies any terminators
    pub async fn send_bytes(&mut self, data: &[u8]) {
        let stream = self.reader.get_mut();
        stream.write_all(data).await.unwrap();
        stream.flush().await.unwrap();
    }

    /// Every line of the next reply, terminators stripped
    pub async fn reply(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).await.unwrap();
            assert!(n > 0, "server closed the connection");

            let line = line.trim_end_matches(['\r', '\n']).to_string();
            let last = line.as_bytes().get(3) != Some(&b'-');
            lines.push(line);
            if last {
                return lines;
            }
        }
    }

    /// Send a command and return the final reply line
    pub async fn command(&mut self, line: &str) -> String {
        self.send(line).await;
        self.reply().await.pop().unwrap()
    }
}
