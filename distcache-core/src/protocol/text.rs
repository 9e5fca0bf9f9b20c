//! The ASCII dialect (`spec.md` §4.1): line-oriented commands terminated by
//! CRLF, with `gets`/`cas` carrying the CAS value memcached calls a "unique
//! ID". SASL is binary-only, so [`TextCodec`] never sees `Operation::Sasl*`.

use crate::{
    error::Error,
    protocol::{ConcatMode, MutationMode, Operation, OperationResult, ProtocolError, StoreMode},
    socket::{Connection, PooledSocket},
};

fn store_command(mode: StoreMode) -> &'static str {
    match mode {
        StoreMode::Set => "set",
        StoreMode::Add => "add",
        StoreMode::Replace => "replace",
    }
}

fn concat_command(mode: ConcatMode) -> &'static str {
    match mode {
        ConcatMode::Append => "append",
        ConcatMode::Prepend => "prepend",
    }
}

fn mutate_command(mode: MutationMode) -> &'static str {
    match mode {
        MutationMode::Increment => "incr",
        MutationMode::Decrement => "decr",
    }
}

fn malformed(line: &str) -> Error {
    Error::Protocol(ProtocolError::MalformedLine(line.to_string()))
}

/// Stateless codec driving the line-oriented dialect. Unlike the binary
/// dialect there is no pipelining: a multi-get is one `gets k1 k2 ...`
/// request followed by zero or more `VALUE` lines and a terminating `END`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl TextCodec {
    pub async fn execute<C: Connection>(
        &self,
        socket: &mut PooledSocket<C>,
        op: &Operation,
    ) -> Result<OperationResult, Error> {
        match op {
            Operation::Get { key } => {
                let key = String::from_utf8_lossy(key).into_owned();
                socket
                    .write_all(format!("gets {}\r\n", key).as_bytes())
                    .await?;
                let mut hits = self.read_values(socket).await?;
                Ok(hits.remove(key.as_bytes()).unwrap_or_else(|| OperationResult::failure(crate::protocol::Status::KeyNotFound)))
            }
            Operation::Store {
                mode,
                key,
                flags,
                expiration,
                value,
                cas,
            } => {
                let key = String::from_utf8_lossy(key).into_owned();
                let request = if *cas != 0 {
                    format!(
                        "cas {} {} {} {} {}\r\n",
                        key,
                        flags,
                        expiration,
                        value.len(),
                        cas
                    )
                } else {
                    format!(
                        "{} {} {} {} {}\r\n",
                        store_command(*mode),
                        key,
                        flags,
                        expiration,
                        value.len()
                    )
                };
                socket.write_all(request.as_bytes()).await?;
                socket.write_all(value).await?;
                socket.write_all(b"\r\n").await?;
                self.read_store_reply(socket).await
            }
            Operation::Concat { mode, key, value, cas } => {
                let key = String::from_utf8_lossy(key).into_owned();
                let request = format!("{} {} 0 0 {}\r\n", concat_command(*mode), key, value.len());
                let _ = cas; // the ascii protocol has no conditional append/prepend
                socket.write_all(request.as_bytes()).await?;
                socket.write_all(value).await?;
                socket.write_all(b"\r\n").await?;
                self.read_store_reply(socket).await
            }
            Operation::Mutate {
                mode,
                key,
                delta,
                initial: _,
                expiration: _,
                cas: _,
            } => {
                let key = String::from_utf8_lossy(key).into_owned();
                socket
                    .write_all(format!("{} {} {}\r\n", mutate_command(*mode), key, delta).as_bytes())
                    .await?;
                let line = socket.read_line().await?;
                if line == "NOT_FOUND" {
                    return Ok(OperationResult::failure(crate::protocol::Status::KeyNotFound));
                }
                let numeric: u64 = line.parse().map_err(|_| malformed(&line))?;
                let mut result = OperationResult::ok(0);
                result.numeric = Some(numeric);
                Ok(result)
            }
            Operation::Delete { key, cas: _ } => {
                let key = String::from_utf8_lossy(key).into_owned();
                socket.write_all(format!("delete {}\r\n", key).as_bytes()).await?;
                let line = socket.read_line().await?;
                match line.as_str() {
                    "DELETED" => Ok(OperationResult::ok(0)),
                    "NOT_FOUND" => Ok(OperationResult::failure(crate::protocol::Status::KeyNotFound)),
                    other => Err(malformed(other)),
                }
            }
            Operation::Flush { delay } => {
                socket.write_all(format!("flush_all {}\r\n", delay).as_bytes()).await?;
                let line = socket.read_line().await?;
                if line == "OK" {
                    Ok(OperationResult::ok(0))
                } else {
                    Err(malformed(&line))
                }
            }
            Operation::Stats { class } => {
                let request = match class {
                    Some(class) => format!("stats {}\r\n", class),
                    None => "stats\r\n".to_string(),
                };
                socket.write_all(request.as_bytes()).await?;
                let mut result = OperationResult::ok(0);
                loop {
                    let line = socket.read_line().await?;
                    if line == "END" {
                        break;
                    }
                    let mut parts = line.splitn(3, ' ');
                    match (parts.next(), parts.next(), parts.next()) {
                        (Some("STAT"), Some(name), Some(value)) => {
                            result.pairs.push((name.to_string(), value.to_string()));
                        }
                        _ => return Err(malformed(&line)),
                    }
                }
                Ok(result)
            }
            Operation::Noop => {
                socket.write_all(b"version\r\n").await?;
                socket.read_line().await?;
                Ok(OperationResult::ok(0))
            }
            Operation::MultiGet { .. } => unreachable!("multi-get goes through execute_multi_get"),
            Operation::SaslList | Operation::SaslAuth { .. } | Operation::SaslStep { .. } => {
                Err(Error::Auth("SASL is only available over the binary protocol".into()))
            }
        }
    }

    pub async fn execute_multi_get<C: Connection>(
        &self,
        socket: &mut PooledSocket<C>,
        keys: &[Vec<u8>],
    ) -> Result<std::collections::HashMap<Vec<u8>, OperationResult>, Error> {
        let joined = keys
            .iter()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .collect::<Vec<_>>()
            .join(" ");
        socket.write_all(format!("gets {}\r\n", joined).as_bytes()).await?;
        self.read_values(socket).await
    }

    async fn read_store_reply<C: Connection>(
        &self,
        socket: &mut PooledSocket<C>,
    ) -> Result<OperationResult, Error> {
        let line = socket.read_line().await?;
        match line.as_str() {
            "STORED" => Ok(OperationResult::ok(0)),
            "NOT_STORED" => Ok(OperationResult::failure(crate::protocol::Status::ItemNotStored)),
            "EXISTS" => Ok(OperationResult::failure(crate::protocol::Status::KeyExists)),
            "NOT_FOUND" => Ok(OperationResult::failure(crate::protocol::Status::KeyNotFound)),
            other => Err(malformed(other)),
        }
    }

    /// Parse the `VALUE key flags cas_unique len\r\n<data>\r\n` rows a `gets`
    /// emits until the terminating `END\r\n`.
    async fn read_values<C: Connection>(
        &self,
        socket: &mut PooledSocket<C>,
    ) -> Result<std::collections::HashMap<Vec<u8>, OperationResult>, Error> {
        let mut hits = std::collections::HashMap::new();
        loop {
            let line = socket.read_line().await?;
            if line == "END" {
                break;
            }
            let mut parts = line.split(' ');
            let header = parts.next();
            if header != Some("VALUE") {
                return Err(malformed(&line));
            }
            let key = parts.next().ok_or_else(|| malformed(&line))?;
            let flags: u32 = parts
                .next()
                .ok_or_else(|| malformed(&line))?
                .parse()
                .map_err(|_| malformed(&line))?;
            let len: usize = parts
                .next()
                .ok_or_else(|| malformed(&line))?
                .parse()
                .map_err(|_| malformed(&line))?;
            let cas: u64 = match parts.next() {
                Some(raw) => raw.parse().map_err(|_| malformed(&line))?,
                None => 0,
            };
            let data = socket.read_exact(len).await?;
            let trailer = socket.read_exact(2).await?;
            if trailer != b"\r\n" {
                return Err(malformed("missing CRLF after value"));
            }
            let mut result = OperationResult::ok(cas);
            result.flags = flags;
            result.value = Some(data);
            hits.insert(key.as_bytes().to_vec(), result);
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use crate::socket::test_support::MockConnection;
    use std::time::Duration;

    fn test_socket(reads: Vec<Vec<u8>>) -> PooledSocket<MockConnection> {
        PooledSocket::from_parts(
            MockConnection::new(reads),
            Endpoint::new("localhost", 11211),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_get_hit() {
        let mut socket = test_socket(vec![b"VALUE hello 0 5\r\nworld\r\nEND\r\n".to_vec()]);
        let codec = TextCodec;
        let result = codec
            .execute(&mut socket, &Operation::Get { key: b"hello".to_vec() })
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(Some(b"world".to_vec()), result.value);
    }

    #[tokio::test]
    async fn test_get_miss() {
        let mut socket = test_socket(vec![b"END\r\n".to_vec()]);
        let codec = TextCodec;
        let result = codec
            .execute(&mut socket, &Operation::Get { key: b"missing".to_vec() })
            .await
            .unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_store_stored() {
        let mut socket = test_socket(vec![b"STORED\r\n".to_vec()]);
        let codec = TextCodec;
        let result = codec
            .execute(
                &mut socket,
                &Operation::Store {
                    mode: StoreMode::Set,
                    key: b"hello".to_vec(),
                    flags: 0,
                    expiration: 0,
                    value: b"world".to_vec(),
                    cas: 0,
                },
            )
            .await
            .unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_incr_not_found() {
        let mut socket = test_socket(vec![b"NOT_FOUND\r\n".to_vec()]);
        let codec = TextCodec;
        let result = codec
            .execute(
                &mut socket,
                &Operation::Mutate {
                    mode: MutationMode::Increment,
                    key: b"counter".to_vec(),
                    delta: 1,
                    initial: 0,
                    expiration: 0,
                    cas: 0,
                },
            )
            .await
            .unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_multi_get_partial_hits() {
        let mut socket = test_socket(vec![b"VALUE k1 0 2\r\nv1\r\nEND\r\n".to_vec()]);
        let codec = TextCodec;
        let hits = codec
            .execute_multi_get(&mut socket, &[b"k1".to_vec(), b"k2".to_vec()])
            .await
            .unwrap();
        assert_eq!(1, hits.len());
        assert_eq!(Some(b"v1".to_vec()), hits.get(&b"k1".to_vec()).unwrap().value);
    }

    #[tokio::test]
    async fn test_stats() {
        let mut socket = test_socket(vec![b"STAT pid 123\r\nEND\r\n".to_vec()]);
        let codec = TextCodec;
        let result = codec
            .execute(&mut socket, &Operation::Stats { class: None })
            .await
            .unwrap();
        assert_eq!(vec![("pid".to_string(), "123".to_string())], result.pairs);
    }
}
