use std::{
    io,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use serde_json::{Value, json};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt as _, AsyncWriteExt as _, BufReader},
    net::TcpStream,
    time::timeout,
};
use tracing::debug;

#[derive(Debug, Error)]
pub enum StratumError {
    #[error("connecting to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("{method}: {source}")]
    Io {
        method: String,
        #[source]
        source: io::Error,
    },
    #[error("{method}: malformed reply: {source}")]
    Json {
        method: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{method} failed: {error}")]
    Remote { method: String, error: Value },
    #[error("{method}: connection closed before a reply")]
    Closed { method: String },
    #[error("{method}: no reply within {timeout:?}")]
    Timeout { method: String, timeout: Duration },
}

/// Line-delimited JSON-RPC client for the index server.
///
/// Every call opens its own connection, sends one request and waits for the
/// reply carrying the same id; notifications in between are skipped.
#[derive(Debug)]
pub struct StratumClient {
    addr: String,
    timeout: Duration,
    next_id: AtomicU64,
}

impl StratumClient {
    #[must_use]
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self::with_endpoint(format!("{host}:{port}"), timeout)
    }

    /// `endpoint` is `host:port`.
    #[must_use]
    pub const fn with_endpoint(endpoint: String, timeout: Duration) -> Self {
        Self {
            addr: endpoint,
            timeout,
            next_id: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn call(&self, method: &str, params: &[Value]) -> Result<Value, StratumError> {
        let limit = self.timeout;
        timeout(limit, self.round_trip(method, params))
            .await
            .map_err(|_| StratumError::Timeout {
                method: method.to_owned(),
                timeout: limit,
            })?
    }

    async fn round_trip(&self, method: &str, params: &[Value]) -> Result<Value, StratumError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let io_error = |source| StratumError::Io {
            method: method.to_owned(),
            source,
        };

        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|source| StratumError::Connect {
                addr: self.addr.clone(),
                source,
            })?;
        let (read, mut write) = stream.into_split();

        let mut request = json!({"id": id, "method": method, "params": params}).to_string();
        request.push('\n');
        debug!(method, id, "stratum request");
        write
            .write_all(request.as_bytes())
            .await
            .map_err(io_error)?;

        let mut lines = BufReader::new(read).lines();
        while let Some(line) = lines.next_line().await.map_err(io_error)? {
            if line.trim().is_empty() {
                continue;
            }
            let reply: Value = serde_json::from_str(&line).map_err(|source| StratumError::Json {
                method: method.to_owned(),
                source,
            })?;
            if reply.get("id").and_then(Value::as_u64) != Some(id) {
                continue;
            }
            return match reply.get("error") {
                Some(error) if !error.is_null() => Err(StratumError::Remote {
                    method: method.to_owned(),
                    error: error.clone(),
                }),
                _ => Ok(reply.get("result").cloned().unwrap_or(Value::Null)),
            };
        }
        Err(StratumError::Closed {
            method: method.to_owned(),
        })
    }
}
