//! Per-node protocol connection seam.
//!
//! The wire protocol lives behind the [`NodeConnection`] and [`Connector`]
//! traits; routing and key encoding never touch protocol framing. The
//! bundled [`TcpConnector`] speaks the memcached ASCII protocol over tokio,
//! enough for store/fetch/delete against a stock server. Tests substitute an
//! in-memory connector.

use crate::error::ConnectionError;
use crate::types::Endpoint;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// One live connection to one memcached server.
///
/// Implementations serialize their own request/response framing; callers
/// bound concurrency and apply timeouts.
#[async_trait]
pub trait NodeConnection: Send + Sync {
    /// Fetch many keys in one round trip. Absent keys are simply missing
    /// from the result map.
    async fn get_many(
        &self,
        keys: &[Vec<u8>],
    ) -> Result<HashMap<Vec<u8>, Bytes>, ConnectionError>;

    /// Store a value unconditionally. `expiry_epoch` is absolute epoch
    /// seconds; 0 means "never expire". Returns whether the server stored it.
    async fn set(
        &self,
        key: &[u8],
        value: &Bytes,
        expiry_epoch: u32,
    ) -> Result<bool, ConnectionError>;

    /// Store a value only if the key is absent. Returns whether it was
    /// stored.
    async fn add(
        &self,
        key: &[u8],
        value: &Bytes,
        expiry_epoch: u32,
    ) -> Result<bool, ConnectionError>;

    /// Delete a key. Returns whether the key existed.
    async fn delete(&self, key: &[u8]) -> Result<bool, ConnectionError>;

    /// Close the connection. Further operations fail with
    /// [`ConnectionError::Closed`].
    async fn close(&self);
}

/// Opens [`NodeConnection`]s for endpoints.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to one endpoint.
    async fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Arc<dyn NodeConnection>, ConnectionError>;
}

/// Connects [`AsciiConnection`]s over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    /// Create a connector with the given per-connection dial timeout.
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Arc<dyn NodeConnection>, ConnectionError> {
        let dial = TcpStream::connect((endpoint.host.as_str(), endpoint.port));
        let stream = tokio::time::timeout(self.connect_timeout, dial)
            .await
            .map_err(|_| ConnectionError::ConnectFailed {
                addr: endpoint.to_string(),
                reason: "connect timed out".to_string(),
            })?
            .map_err(|e| ConnectionError::ConnectFailed {
                addr: endpoint.to_string(),
                reason: e.to_string(),
            })?;
        let _ = stream.set_nodelay(true);
        Ok(Arc::new(AsciiConnection::new(stream)))
    }
}

/// Memcached ASCII protocol over a buffered TCP stream.
///
/// One in-flight request per connection; the stream mutex doubles as the
/// request pipeline. Any protocol or I/O fault poisons the connection, since
/// a half-read stream cannot be resynchronized.
pub struct AsciiConnection {
    stream: Mutex<Option<BufStream<TcpStream>>>,
}

impl AsciiConnection {
    /// Wrap an established stream.
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Mutex::new(Some(BufStream::new(stream))),
        }
    }

    async fn read_line(stream: &mut BufStream<TcpStream>) -> Result<String, ConnectionError> {
        let mut line = String::new();
        let n = stream.read_line(&mut line).await?;
        if n == 0 {
            return Err(ConnectionError::Closed);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }

    async fn do_get_many(
        stream: &mut BufStream<TcpStream>,
        keys: &[Vec<u8>],
    ) -> Result<HashMap<Vec<u8>, Bytes>, ConnectionError> {
        let mut command = Vec::with_capacity(keys.iter().map(|k| k.len() + 1).sum::<usize>() + 8);
        command.extend_from_slice(b"get");
        for key in keys {
            command.push(b' ');
            command.extend_from_slice(key);
        }
        command.extend_from_slice(b"\r\n");
        stream.write_all(&command).await?;
        stream.flush().await?;

        let mut results = HashMap::new();
        loop {
            let line = Self::read_line(stream).await?;
            if line == "END" {
                return Ok(results);
            }
            let mut parts = line.split_whitespace();
            if parts.next() != Some("VALUE") {
                return Err(ConnectionError::Protocol(line.clone()));
            }
            let key = parts
                .next()
                .ok_or_else(|| ConnectionError::Protocol(line.clone()))?
                .as_bytes()
                .to_vec();
            let _flags = parts.next();
            let len: usize = parts
                .next()
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| ConnectionError::Protocol(line.clone()))?;

            let mut data = vec![0u8; len + 2];
            stream.read_exact(&mut data).await?;
            data.truncate(len);
            results.insert(key, Bytes::from(data));
        }
    }

    async fn do_store(
        stream: &mut BufStream<TcpStream>,
        verb: &str,
        key: &[u8],
        value: &Bytes,
        expiry_epoch: u32,
    ) -> Result<bool, ConnectionError> {
        let mut command = Vec::with_capacity(key.len() + value.len() + 32);
        command.extend_from_slice(verb.as_bytes());
        command.push(b' ');
        command.extend_from_slice(key);
        command.extend_from_slice(format!(" 0 {} {}\r\n", expiry_epoch, value.len()).as_bytes());
        command.extend_from_slice(value);
        command.extend_from_slice(b"\r\n");
        stream.write_all(&command).await?;
        stream.flush().await?;

        match Self::read_line(stream).await?.as_str() {
            "STORED" => Ok(true),
            "NOT_STORED" | "EXISTS" => Ok(false),
            other => Err(ConnectionError::Protocol(other.to_string())),
        }
    }

    async fn do_delete(
        stream: &mut BufStream<TcpStream>,
        key: &[u8],
    ) -> Result<bool, ConnectionError> {
        let mut command = Vec::with_capacity(key.len() + 16);
        command.extend_from_slice(b"delete ");
        command.extend_from_slice(key);
        command.extend_from_slice(b"\r\n");
        stream.write_all(&command).await?;
        stream.flush().await?;

        match Self::read_line(stream).await?.as_str() {
            "DELETED" => Ok(true),
            "NOT_FOUND" => Ok(false),
            other => Err(ConnectionError::Protocol(other.to_string())),
        }
    }
}

macro_rules! with_poisoning {
    ($self:expr, $stream:ident, $body:expr) => {{
        let mut guard = $self.stream.lock().await;
        let $stream = guard.as_mut().ok_or(ConnectionError::Closed)?;
        match $body.await {
            Ok(value) => Ok(value),
            Err(err) => {
                // Desynchronized stream; nothing further can be parsed.
                *guard = None;
                Err(err)
            }
        }
    }};
}

#[async_trait]
impl NodeConnection for AsciiConnection {
    async fn get_many(
        &self,
        keys: &[Vec<u8>],
    ) -> Result<HashMap<Vec<u8>, Bytes>, ConnectionError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        with_poisoning!(self, stream, Self::do_get_many(stream, keys))
    }

    async fn set(
        &self,
        key: &[u8],
        value: &Bytes,
        expiry_epoch: u32,
    ) -> Result<bool, ConnectionError> {
        with_poisoning!(self, stream, Self::do_store(stream, "set", key, value, expiry_epoch))
    }

    async fn add(
        &self,
        key: &[u8],
        value: &Bytes,
        expiry_epoch: u32,
    ) -> Result<bool, ConnectionError> {
        with_poisoning!(self, stream, Self::do_store(stream, "add", key, value, expiry_epoch))
    }

    async fn delete(&self, key: &[u8]) -> Result<bool, ConnectionError> {
        with_poisoning!(self, stream, Self::do_delete(stream, key))
    }

    async fn close(&self) {
        let mut guard = self.stream.lock().await;
        if let Some(mut stream) = guard.take() {
            let _ = stream.shutdown().await;
        }
    }
}

impl std::fmt::Debug for AsciiConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsciiConnection").finish_non_exhaustive()
    }
}
