//! The pooled socket (`spec.md` §4.2): a buffered TCP connection with
//! liveness tracking. Concrete I/O is supplied by a [`Connection`]
//! implementation (e.g. `distcache-tokio::TokioConnection`); everything
//! else -- timeouts, framing-agnostic buffered reads, the broken flag -- is
//! runtime-agnostic and lives here.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::time::timeout;

use crate::{
    endpoint::Endpoint,
    error::Error,
    protocol::ProtocolError,
};

/// Concrete transport used by a [`PooledSocket`]. Implement this once per
/// async runtime; everything above it (codec, pool, node, locator) is
/// written against the trait.
#[async_trait]
pub trait Connection: Send + Sync + Sized + 'static {
    /// Open a TCP connection to `endpoint`, resolving it (IP literal or DNS)
    /// as part of the connect call.
    async fn connect(endpoint: &Endpoint) -> Result<Self, Error>;
    /// Read whatever is immediately available into `buf`, returning the
    /// number of bytes read (`0` means the peer closed the connection).
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error>;
    /// Write the entire buffer.
    async fn write_all(&mut self, buf: &[u8]) -> Result<(), Error>;
}

/// A buffered, timeout-aware wrapper around one [`Connection`]. Once
/// `broken` is set the socket must not be returned to its pool; the pool
/// closes it on release instead (`spec.md` §4.2, §4.3).
pub struct PooledSocket<C: Connection> {
    conn: C,
    endpoint: Endpoint,
    receive_timeout: Duration,
    read_buf: Vec<u8>,
    created_at: Instant,
    broken: bool,
}

impl<C: Connection> PooledSocket<C> {
    pub async fn connect(
        endpoint: Endpoint,
        connection_timeout: Duration,
        receive_timeout: Duration,
    ) -> Result<Self, Error> {
        let conn = timeout(connection_timeout, C::connect(&endpoint))
            .await
            .map_err(|_| timeout_error("connect"))??;
        log::debug!("connected to {}", endpoint);
        Ok(Self {
            conn,
            endpoint,
            receive_timeout,
            read_buf: Vec::new(),
            created_at: Instant::now(),
            broken: false,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Build a socket around an already-established connection, bypassing
    /// the dial step. Used by other modules' unit tests to wire up a
    /// [`test_support::MockConnection`] without going through `connect()`.
    #[cfg(test)]
    pub(crate) fn from_parts(conn: C, endpoint: Endpoint, receive_timeout: Duration) -> Self {
        Self {
            conn,
            endpoint,
            receive_timeout,
            read_buf: Vec::new(),
            created_at: Instant::now(),
            broken: false,
        }
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), Error> {
        let result = timeout(self.receive_timeout, self.conn.write_all(buf)).await;
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                self.broken = true;
                log::warn!("socket to {} broke on write: {}", self.endpoint, err);
                Err(err)
            }
            Err(_) => {
                self.broken = true;
                Err(timeout_error("write"))
            }
        }
    }

    /// Read exactly `n` bytes, consuming any buffered bytes first.
    pub async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, Error> {
        while self.read_buf.len() < n {
            self.fill_buf().await?;
        }
        Ok(self.read_buf.drain(..n).collect())
    }

    /// Read one CRLF-terminated line, sans the trailing CRLF, for the text
    /// dialect (`spec.md` §4.1).
    pub async fn read_line(&mut self) -> Result<String, Error> {
        loop {
            if let Some(pos) = find_crlf(&self.read_buf) {
                let line: Vec<u8> = self.read_buf.drain(..pos + 2).collect();
                return String::from_utf8(line[..line.len() - 2].to_vec())
                    .map_err(|_| Error::Protocol(ProtocolError::MalformedLine("non-utf8 line".into())));
            }
            self.fill_buf().await?;
        }
    }

    async fn fill_buf(&mut self) -> Result<(), Error> {
        let mut chunk = [0_u8; 4096];
        let read = match timeout(self.receive_timeout, self.conn.read(&mut chunk)).await {
            Ok(Ok(n)) => n,
            Ok(Err(err)) => {
                self.broken = true;
                log::warn!("socket to {} broke on read: {}", self.endpoint, err);
                return Err(err);
            }
            Err(_) => {
                self.broken = true;
                return Err(timeout_error("read"));
            }
        };
        if read == 0 {
            self.broken = true;
            return Err(Error::Protocol(ProtocolError::UnexpectedEof));
        }
        self.read_buf.extend_from_slice(&chunk[..read]);
        Ok(())
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn timeout_error(op: &str) -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        format!("{} timed out", op),
    ))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::VecDeque;
    use tokio::sync::Mutex as AsyncMutex;

    /// An in-memory `Connection` fed from a queue of canned read chunks, in
    /// the spirit of `rmsc-core::ring::tests::TestConn`. Writes are
    /// recorded for assertions.
    pub struct MockConnection {
        pub reads: AsyncMutex<VecDeque<Vec<u8>>>,
        pub writes: AsyncMutex<Vec<Vec<u8>>>,
    }

    impl MockConnection {
        pub fn new(reads: Vec<Vec<u8>>) -> Self {
            Self {
                reads: AsyncMutex::new(reads.into()),
                writes: AsyncMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Connection for MockConnection {
        async fn connect(_endpoint: &Endpoint) -> Result<Self, Error> {
            Ok(Self::new(vec![]))
        }

        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
            let mut reads = self.reads.lock().await;
            match reads.pop_front() {
                Some(chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    Ok(n)
                }
                None => Ok(0),
            }
        }

        async fn write_all(&mut self, buf: &[u8]) -> Result<(), Error> {
            self.writes.lock().await.push(buf.to_vec());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::MockConnection;
    use super::*;

    #[tokio::test]
    async fn test_read_exact_across_chunks() {
        let conn = MockConnection::new(vec![b"ab".to_vec(), b"cde".to_vec()]);
        let mut socket = PooledSocket {
            conn,
            endpoint: Endpoint::new("localhost", 11211),
            receive_timeout: Duration::from_secs(1),
            read_buf: Vec::new(),
            created_at: Instant::now(),
            broken: false,
        };
        let got = socket.read_exact(4).await.unwrap();
        assert_eq!(b"abcd".to_vec(), got);
        assert_eq!(vec![b'e'], socket.read_buf);
    }

    #[tokio::test]
    async fn test_read_line() {
        let conn = MockConnection::new(vec![b"STORED\r\nEXTRA".to_vec()]);
        let mut socket = PooledSocket {
            conn,
            endpoint: Endpoint::new("localhost", 11211),
            receive_timeout: Duration::from_secs(1),
            read_buf: Vec::new(),
            created_at: Instant::now(),
            broken: false,
        };
        let line = socket.read_line().await.unwrap();
        assert_eq!("STORED", line);
        assert_eq!(b"EXTRA".to_vec(), socket.read_buf);
    }

    #[tokio::test]
    async fn test_eof_marks_broken() {
        let conn = MockConnection::new(vec![]);
        let mut socket = PooledSocket {
            conn,
            endpoint: Endpoint::new("localhost", 11211),
            receive_timeout: Duration::from_secs(1),
            read_buf: Vec::new(),
            created_at: Instant::now(),
            broken: false,
        };
        let result = socket.read_exact(1).await;
        assert!(result.is_err());
        assert!(socket.is_broken());
    }
}
