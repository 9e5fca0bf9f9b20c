//! The binary dialect (`spec.md` §4.1): a fixed 24-byte header followed by
//! `extras || key || value`. `GetKQ` + a terminating `NoOp` pipelines a
//! multi-get so the server only replies for hits.

use std::collections::HashMap;
use std::convert::TryInto;

use crate::{
    auth::AuthProvider,
    error::Error,
    protocol::{
        ConcatMode, MutationMode, Operation, OperationResult, ProtocolError, Status, StoreMode,
        MAGIC_REQUEST, MAGIC_RESPONSE, OPCODE_ADD, OPCODE_APPEND, OPCODE_DECREMENT, OPCODE_DELETE,
        OPCODE_FLUSH, OPCODE_GETKQ, OPCODE_GET, OPCODE_INCREMENT, OPCODE_NOOP, OPCODE_PREPEND,
        OPCODE_REPLACE, OPCODE_SASL_AUTH, OPCODE_SASL_LIST, OPCODE_SASL_STEP, OPCODE_SET,
        OPCODE_STAT,
    },
    socket::{Connection, PooledSocket},
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Header {
    magic: u8,
    opcode: u8,
    key_length: u16,
    extras_length: u8,
    data_type: u8,
    status_or_vbucket: u16,
    body_len: u32,
    opaque: u32,
    cas: u64,
}

impl Header {
    fn to_bytes(self) -> [u8; 24] {
        let mut buf = [0_u8; 24];
        buf[0] = self.magic;
        buf[1] = self.opcode;
        buf[2..4].copy_from_slice(&self.key_length.to_be_bytes());
        buf[4] = self.extras_length;
        buf[5] = self.data_type;
        buf[6..8].copy_from_slice(&self.status_or_vbucket.to_be_bytes());
        buf[8..12].copy_from_slice(&self.body_len.to_be_bytes());
        buf[12..16].copy_from_slice(&self.opaque.to_be_bytes());
        buf[16..24].copy_from_slice(&self.cas.to_be_bytes());
        buf
    }

    fn from_bytes(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < 24 {
            return Err(ProtocolError::PacketTooSmall);
        }
        let magic = buf[0];
        if magic != MAGIC_RESPONSE {
            return Err(ProtocolError::InvalidMagic(magic));
        }
        Ok(Header {
            magic,
            opcode: buf[1],
            key_length: u16::from_be_bytes(buf[2..4].try_into().unwrap()),
            extras_length: buf[4],
            data_type: buf[5],
            status_or_vbucket: u16::from_be_bytes(buf[6..8].try_into().unwrap()),
            body_len: u32::from_be_bytes(buf[8..12].try_into().unwrap()),
            opaque: u32::from_be_bytes(buf[12..16].try_into().unwrap()),
            cas: u64::from_be_bytes(buf[16..24].try_into().unwrap()),
        })
    }
}

fn build_request(opcode: u8, extras: &[u8], key: &[u8], value: &[u8], cas: u64) -> Vec<u8> {
    let header = Header {
        magic: MAGIC_REQUEST,
        opcode,
        key_length: key.len() as u16,
        extras_length: extras.len() as u8,
        data_type: 0,
        status_or_vbucket: 0,
        body_len: (extras.len() + key.len() + value.len()) as u32,
        opaque: 0,
        cas,
    };
    let mut buf = Vec::with_capacity(24 + extras.len() + key.len() + value.len());
    buf.extend_from_slice(&header.to_bytes());
    buf.extend_from_slice(extras);
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
    buf
}

async fn read_frame<C: Connection>(
    socket: &mut PooledSocket<C>,
) -> Result<(Header, Vec<u8>, Vec<u8>, Vec<u8>), Error> {
    let header_bytes = socket.read_exact(24).await?;
    let header = Header::from_bytes(&header_bytes).map_err(|err| {
        socket.mark_broken();
        err
    })?;
    let body = socket.read_exact(header.body_len as usize).await?;
    if header.extras_length as usize + header.key_length as usize > body.len() {
        socket.mark_broken();
        return Err(ProtocolError::BodySizeMismatch.into());
    }
    let (extras, rest) = body.split_at(header.extras_length as usize);
    let (key, value) = rest.split_at(header.key_length as usize);
    Ok((header, extras.to_vec(), key.to_vec(), value.to_vec()))
}

fn status_result(header: Header) -> OperationResult {
    let status = Status::from(header.status_or_vbucket);
    if status.is_ok() {
        OperationResult::ok(header.cas)
    } else {
        let mut result = OperationResult::failure(status);
        result.cas = header.cas;
        result
    }
}

fn get_result(header: Header, extras: Vec<u8>, value: Vec<u8>) -> OperationResult {
    let mut result = status_result(header);
    if result.success {
        result.flags = extras
            .get(0..4)
            .map(|b| u32::from_be_bytes(b.try_into().unwrap()))
            .unwrap_or(0);
        result.value = Some(value);
    }
    result
}

fn mutate_result(header: Header, value: Vec<u8>) -> OperationResult {
    let mut result = status_result(header);
    if result.success {
        result.numeric = value
            .get(0..8)
            .map(|b| u64::from_be_bytes(b.try_into().unwrap()));
    }
    result
}

/// Stateless codec implementing every `Operation` variant against a
/// [`PooledSocket`]. Dispatch is by tag, per `spec.md` §9's polymorphism note.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl BinaryCodec {
    pub async fn execute<C: Connection>(
        &self,
        socket: &mut PooledSocket<C>,
        op: &Operation,
    ) -> Result<OperationResult, Error> {
        match op {
            Operation::Get { key } => {
                socket.write_all(&build_request(OPCODE_GET, &[], key, &[], 0)).await?;
                let (header, extras, _key, value) = read_frame(socket).await?;
                Ok(get_result(header, extras, value))
            }
            Operation::Store {
                mode,
                key,
                flags,
                expiration,
                value,
                cas,
            } => {
                let opcode = match mode {
                    StoreMode::Set => OPCODE_SET,
                    StoreMode::Add => OPCODE_ADD,
                    StoreMode::Replace => OPCODE_REPLACE,
                };
                let mut extras = Vec::with_capacity(8);
                extras.extend_from_slice(&flags.to_be_bytes());
                extras.extend_from_slice(&expiration.to_be_bytes());
                socket
                    .write_all(&build_request(opcode, &extras, key, value, *cas))
                    .await?;
                let (header, _, _, _) = read_frame(socket).await?;
                Ok(status_result(header))
            }
            Operation::Concat { mode, key, value, cas } => {
                let opcode = match mode {
                    ConcatMode::Append => OPCODE_APPEND,
                    ConcatMode::Prepend => OPCODE_PREPEND,
                };
                socket
                    .write_all(&build_request(opcode, &[], key, value, *cas))
                    .await?;
                let (header, _, _, _) = read_frame(socket).await?;
                Ok(status_result(header))
            }
            Operation::Mutate {
                mode,
                key,
                delta,
                initial,
                expiration,
                cas,
            } => {
                let opcode = match mode {
                    MutationMode::Increment => OPCODE_INCREMENT,
                    MutationMode::Decrement => OPCODE_DECREMENT,
                };
                let mut extras = Vec::with_capacity(20);
                extras.extend_from_slice(&delta.to_be_bytes());
                extras.extend_from_slice(&initial.to_be_bytes());
                extras.extend_from_slice(&expiration.to_be_bytes());
                socket
                    .write_all(&build_request(opcode, &extras, key, &[], *cas))
                    .await?;
                let (header, _, _, value) = read_frame(socket).await?;
                Ok(mutate_result(header, value))
            }
            Operation::Delete { key, cas } => {
                socket
                    .write_all(&build_request(OPCODE_DELETE, &[], key, &[], *cas))
                    .await?;
                let (header, _, _, _) = read_frame(socket).await?;
                Ok(status_result(header))
            }
            Operation::Flush { delay } => {
                socket
                    .write_all(&build_request(OPCODE_FLUSH, &delay.to_be_bytes(), &[], &[], 0))
                    .await?;
                let (header, _, _, _) = read_frame(socket).await?;
                Ok(status_result(header))
            }
            Operation::Stats { class } => {
                let key = class.as_deref().unwrap_or("").as_bytes().to_vec();
                socket
                    .write_all(&build_request(OPCODE_STAT, &[], &key, &[], 0))
                    .await?;
                let mut result = OperationResult::ok(0);
                loop {
                    let (header, _extras, rkey, rvalue) = read_frame(socket).await?;
                    let status = Status::from(header.status_or_vbucket);
                    if !status.is_ok() {
                        return Ok(status_result(header));
                    }
                    if rkey.is_empty() {
                        break;
                    }
                    result.pairs.push((
                        String::from_utf8_lossy(&rkey).into_owned(),
                        String::from_utf8_lossy(&rvalue).into_owned(),
                    ));
                }
                Ok(result)
            }
            Operation::Noop => {
                socket
                    .write_all(&build_request(OPCODE_NOOP, &[], &[], &[], 0))
                    .await?;
                let (header, _, _, _) = read_frame(socket).await?;
                Ok(status_result(header))
            }
            Operation::SaslList => {
                socket
                    .write_all(&build_request(OPCODE_SASL_LIST, &[], &[], &[], 0))
                    .await?;
                let (header, _, _, value) = read_frame(socket).await?;
                let mut result = status_result(header);
                if result.success {
                    let list = String::from_utf8_lossy(&value).into_owned();
                    result.pairs = list.split(' ').map(|m| (m.to_string(), String::new())).collect();
                }
                Ok(result)
            }
            Operation::SaslAuth { mechanism, initial } => {
                socket
                    .write_all(&build_request(OPCODE_SASL_AUTH, &[], mechanism.as_bytes(), initial, 0))
                    .await?;
                let (header, _, _, value) = read_frame(socket).await?;
                let mut result = status_result(header);
                result.value = Some(value);
                Ok(result)
            }
            Operation::SaslStep { response } => {
                socket
                    .write_all(&build_request(OPCODE_SASL_STEP, &[], &[], response, 0))
                    .await?;
                let (header, _, _, value) = read_frame(socket).await?;
                let mut result = status_result(header);
                result.value = Some(value);
                Ok(result)
            }
            Operation::MultiGet { .. } => unreachable!("multi-get goes through execute_multi_get"),
        }
    }

    /// Pipeline one `GetKQ` per key followed by a terminating `NoOp`
    /// (`spec.md` §4.1). The server replies only for hits; absent keys are
    /// silently missing from the returned map.
    pub async fn execute_multi_get<C: Connection>(
        &self,
        socket: &mut PooledSocket<C>,
        keys: &[Vec<u8>],
    ) -> Result<HashMap<Vec<u8>, OperationResult>, Error> {
        let mut request = Vec::new();
        for key in keys {
            request.extend(build_request(OPCODE_GETKQ, &[], key, &[], 0));
        }
        request.extend(build_request(OPCODE_NOOP, &[], &[], &[], 0));
        socket.write_all(&request).await?;

        let mut hits = HashMap::with_capacity(keys.len());
        loop {
            let (header, extras, key, value) = read_frame(socket).await?;
            if header.opcode == OPCODE_NOOP {
                break;
            }
            hits.insert(key, get_result(header, extras, value));
        }
        Ok(hits)
    }

    /// Drive the SASL handshake: `SaslList` (to learn the mechanisms the
    /// server supports), then `SaslAuth(mechanism, initial)`, then a loop of
    /// `SaslStep(response)` until the status stops being `AuthContinue`
    /// (`spec.md` §4.2).
    pub async fn authenticate<C: Connection>(
        &self,
        socket: &mut PooledSocket<C>,
        provider: &mut dyn AuthProvider,
    ) -> Result<(), Error> {
        let mechanism = provider.mechanism().to_string();

        socket
            .write_all(&build_request(OPCODE_SASL_LIST, &[], &[], &[], 0))
            .await?;
        let (list_header, _, _, list_value) = read_frame(socket).await?;
        if !status_result(list_header).success {
            socket.mark_broken();
            return Err(Error::Auth(format!(
                "SASL handshake failed: {}",
                Status::from(list_header.status_or_vbucket)
            )));
        }
        let supported = String::from_utf8_lossy(&list_value);
        if !supported.split(' ').any(|m| m == mechanism) {
            socket.mark_broken();
            return Err(Error::Auth(format!("server does not support SASL mechanism {}", mechanism)));
        }

        let initial = provider.initial_response();
        socket
            .write_all(&build_request(OPCODE_SASL_AUTH, &[], mechanism.as_bytes(), &initial, 0))
            .await?;
        let (mut header, _, _, mut value) = read_frame(socket).await?;
        loop {
            match Status::from(header.status_or_vbucket) {
                Status::NoError => return Ok(()),
                Status::AuthContinue => {
                    let response = provider.step(&value);
                    socket
                        .write_all(&build_request(OPCODE_SASL_STEP, &[], mechanism.as_bytes(), &response, 0))
                        .await?;
                    let (next_header, _, _, next_value) = read_frame(socket).await?;
                    header = next_header;
                    value = next_value;
                }
                other => {
                    socket.mark_broken();
                    return Err(Error::Auth(format!("SASL handshake failed: {}", other)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::test_support::MockConnection;
    use std::time::Duration;

    fn frame(status: u16, cas: u64, extras: &[u8], key: &[u8], value: &[u8]) -> Vec<u8> {
        let header = Header {
            magic: MAGIC_RESPONSE,
            opcode: 0,
            key_length: key.len() as u16,
            extras_length: extras.len() as u8,
            data_type: 0,
            status_or_vbucket: status,
            body_len: (extras.len() + key.len() + value.len()) as u32,
            opaque: 0,
            cas,
        };
        let mut buf = header.to_bytes().to_vec();
        buf.extend_from_slice(extras);
        buf.extend_from_slice(key);
        buf.extend_from_slice(value);
        buf
    }

    #[test]
    fn test_set_request_matches_known_good_bytes() {
        // Ground truth taken from the memcached binary protocol spec's own
        // worked example for an Add request.
        let mut extras = Vec::new();
        extras.extend_from_slice(&0xdeadbeef_u32.to_be_bytes());
        extras.extend_from_slice(&0x1c20_u32.to_be_bytes());
        let bytes = build_request(OPCODE_ADD, &extras, b"Hello", b"World", 0);
        let expect = vec![
            0x80, 0x02, 0x00, 0x05, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x12, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xde, 0xad, 0xbe, 0xef,
            0x00, 0x00, 0x1c, 0x20, 0x48, 0x65, 0x6c, 0x6c, 0x6f, 0x57, 0x6f, 0x72, 0x6c, 0x64,
        ];
        assert_eq!(expect, bytes);
    }

    #[test]
    fn test_header_round_trip() {
        let header = Header {
            magic: MAGIC_RESPONSE,
            opcode: OPCODE_GET,
            key_length: 3,
            extras_length: 4,
            data_type: 0,
            status_or_vbucket: 0,
            body_len: 10,
            opaque: 0,
            cas: 42,
        };
        let bytes = header.to_bytes();
        let decoded = Header::from_bytes(&bytes).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn test_invalid_magic_rejected() {
        let mut bytes = [0_u8; 24];
        bytes[0] = 0x99;
        assert_eq!(Err(ProtocolError::InvalidMagic(0x99)), Header::from_bytes(&bytes));
    }

    #[tokio::test]
    async fn test_execute_get_hit() {
        let conn = MockConnection::new(vec![frame(0, 7, &1u32.to_be_bytes(), b"", b"world")]);
        let mut socket = test_socket(conn);
        let codec = BinaryCodec;
        let result = codec
            .execute(&mut socket, &Operation::Get { key: b"hello".to_vec() })
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(7, result.cas);
        assert_eq!(Some(b"world".to_vec()), result.value);
        assert_eq!(1, result.flags);
    }

    #[tokio::test]
    async fn test_execute_get_miss() {
        let conn = MockConnection::new(vec![frame(0x01, 0, &[], b"", b"")]);
        let mut socket = test_socket(conn);
        let codec = BinaryCodec;
        let result = codec
            .execute(&mut socket, &Operation::Get { key: b"missing".to_vec() })
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(Status::KeyNotFound, result.status);
    }

    #[tokio::test]
    async fn test_execute_multi_get_stops_at_noop() {
        let mut hit_frame = frame(0, 1, &0u32.to_be_bytes(), b"k1", b"v1");
        let mut noop_header = Header {
            magic: MAGIC_RESPONSE,
            opcode: OPCODE_NOOP,
            key_length: 0,
            extras_length: 0,
            data_type: 0,
            status_or_vbucket: 0,
            body_len: 0,
            opaque: 0,
            cas: 0,
        };
        let mut stream = Vec::new();
        stream.append(&mut hit_frame);
        stream.extend_from_slice(&noop_header.to_bytes());
        noop_header.opcode = OPCODE_NOOP;

        let conn = MockConnection::new(vec![stream]);
        let mut socket = test_socket(conn);
        let codec = BinaryCodec;
        let hits = codec
            .execute_multi_get(&mut socket, &[b"k1".to_vec(), b"k2".to_vec()])
            .await
            .unwrap();
        assert_eq!(1, hits.len());
        assert_eq!(Some(b"v1".to_vec()), hits.get(&b"k1".to_vec()).unwrap().value);
    }

    fn test_socket(conn: MockConnection) -> PooledSocket<MockConnection> {
        PooledSocket::from_parts(conn, crate::endpoint::Endpoint::new("localhost", 11211), Duration::from_secs(1))
    }
}
