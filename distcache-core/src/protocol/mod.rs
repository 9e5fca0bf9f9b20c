//! The two wire dialects (binary and text) share a single `Operation` /
//! `OperationResult` vocabulary. A [`crate::socket::PooledSocket`] is handed
//! to whichever dialect's codec is configured for the pool, which encodes
//! the operation, writes it, reads the response frame(s), and decodes them
//! back into an `OperationResult`.

pub mod binary;
pub mod text;

use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
};

pub(crate) const MAGIC_REQUEST: u8 = 0x80;
pub(crate) const MAGIC_RESPONSE: u8 = 0x81;

pub(crate) const OPCODE_GET: u8 = 0x00;
pub(crate) const OPCODE_SET: u8 = 0x01;
pub(crate) const OPCODE_ADD: u8 = 0x02;
pub(crate) const OPCODE_REPLACE: u8 = 0x03;
pub(crate) const OPCODE_DELETE: u8 = 0x04;
pub(crate) const OPCODE_INCREMENT: u8 = 0x05;
pub(crate) const OPCODE_DECREMENT: u8 = 0x06;
pub(crate) const OPCODE_FLUSH: u8 = 0x08;
pub(crate) const OPCODE_GETQ: u8 = 0x09;
pub(crate) const OPCODE_NOOP: u8 = 0x0a;
pub(crate) const OPCODE_VERSION: u8 = 0x0b;
pub(crate) const OPCODE_GETK: u8 = 0x0c;
pub(crate) const OPCODE_GETKQ: u8 = 0x0d;
pub(crate) const OPCODE_APPEND: u8 = 0x0e;
pub(crate) const OPCODE_PREPEND: u8 = 0x0f;
pub(crate) const OPCODE_STAT: u8 = 0x10;
pub(crate) const OPCODE_SASL_LIST: u8 = 0x20;
pub(crate) const OPCODE_SASL_AUTH: u8 = 0x21;
pub(crate) const OPCODE_SASL_STEP: u8 = 0x22;

/// Response status values, shared by both wire dialects (the text protocol's
/// response lines are mapped onto the same enum at parse time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    NoError,
    KeyNotFound,
    KeyExists,
    ValueTooLarge,
    InvalidArguments,
    ItemNotStored,
    NonNumeric,
    AuthError,
    AuthContinue,
    UnknownCommand,
    OutOfMemory,
    Other(u16),
}

impl From<u16> for Status {
    fn from(val: u16) -> Self {
        match val {
            0x00 => Status::NoError,
            0x01 => Status::KeyNotFound,
            0x02 => Status::KeyExists,
            0x03 => Status::ValueTooLarge,
            0x04 => Status::InvalidArguments,
            0x05 => Status::ItemNotStored,
            0x06 => Status::NonNumeric,
            0x20 => Status::AuthError,
            0x21 => Status::AuthContinue,
            0x81 => Status::UnknownCommand,
            0x82 => Status::OutOfMemory,
            other => Status::Other(other),
        }
    }
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::NoError => 0x00,
            Status::KeyNotFound => 0x01,
            Status::KeyExists => 0x02,
            Status::ValueTooLarge => 0x03,
            Status::InvalidArguments => 0x04,
            Status::ItemNotStored => 0x05,
            Status::NonNumeric => 0x06,
            Status::AuthError => 0x20,
            Status::AuthContinue => 0x21,
            Status::UnknownCommand => 0x81,
            Status::OutOfMemory => 0x82,
            Status::Other(v) => v,
        }
    }

    pub fn is_ok(self) -> bool {
        matches!(self, Status::NoError)
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Status::NoError => write!(f, "no error"),
            Status::KeyNotFound => write!(f, "key not found"),
            Status::KeyExists => write!(f, "key exists"),
            Status::ValueTooLarge => write!(f, "value too large"),
            Status::InvalidArguments => write!(f, "invalid arguments"),
            Status::ItemNotStored => write!(f, "item not stored"),
            Status::NonNumeric => write!(f, "incr/decr on non-numeric value"),
            Status::AuthError => write!(f, "authentication error"),
            Status::AuthContinue => write!(f, "authentication continue"),
            Status::UnknownCommand => write!(f, "unknown command"),
            Status::OutOfMemory => write!(f, "out of memory"),
            Status::Other(v) => write!(f, "status 0x{:02x}", v),
        }
    }
}

impl StdError for Status {}

/// Framing-level failures: magic-byte mismatch, short reads, malformed
/// lines. These always mark the socket that produced them broken.
#[derive(Debug, PartialEq, Eq)]
pub enum ProtocolError {
    InvalidMagic(u8),
    PacketTooSmall,
    BodySizeMismatch,
    UnexpectedEof,
    MalformedLine(String),
    OpcodeMismatch,
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ProtocolError::InvalidMagic(b) => write!(f, "invalid magic byte: {:#x}", b),
            ProtocolError::PacketTooSmall => write!(f, "packet shorter than the fixed header"),
            ProtocolError::BodySizeMismatch => write!(f, "body length did not match the header"),
            ProtocolError::UnexpectedEof => write!(f, "connection closed mid-frame"),
            ProtocolError::MalformedLine(line) => write!(f, "malformed response line: {:?}", line),
            ProtocolError::OpcodeMismatch => write!(f, "response opcode did not match the request"),
        }
    }
}

impl StdError for ProtocolError {}

/// `StoreMode` selects which conditional semantics a store request uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Store unconditionally.
    Set,
    /// Store only if the key is currently absent.
    Add,
    /// Store only if the key currently exists.
    Replace,
}

/// `ConcatMode` selects which end of the existing value a concat request
/// attaches to. Both require the key to already exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcatMode {
    Append,
    Prepend,
}

/// `MutationMode` selects increment or decrement for a numeric mutate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationMode {
    Increment,
    Decrement,
}

/// An abstract request, closed over the opcodes in `spec.md` §4.1. The codec
/// dispatches on this tag; it never needs to know about the facade above it.
#[derive(Debug, Clone)]
pub enum Operation {
    Get {
        key: Vec<u8>,
    },
    MultiGet {
        keys: Vec<Vec<u8>>,
    },
    Store {
        mode: StoreMode,
        key: Vec<u8>,
        flags: u32,
        expiration: u32,
        value: Vec<u8>,
        cas: u64,
    },
    Concat {
        mode: ConcatMode,
        key: Vec<u8>,
        value: Vec<u8>,
        cas: u64,
    },
    Mutate {
        mode: MutationMode,
        key: Vec<u8>,
        delta: u64,
        initial: u64,
        expiration: u32,
        cas: u64,
    },
    Delete {
        key: Vec<u8>,
        cas: u64,
    },
    Flush {
        delay: u32,
    },
    Stats {
        class: Option<String>,
    },
    Noop,
    SaslList,
    SaslAuth {
        mechanism: String,
        initial: Vec<u8>,
    },
    SaslStep {
        response: Vec<u8>,
    },
}

/// The outcome of executing one [`Operation`]. `value` carries the payload
/// for `Get`/`Mutate` results; `pairs` carries `Stats` key/value rows.
#[derive(Debug, Clone, Default)]
pub struct OperationResult {
    pub success: bool,
    pub status: Status,
    pub cas: u64,
    pub message: String,
    pub value: Option<Vec<u8>>,
    pub flags: u32,
    pub numeric: Option<u64>,
    pub pairs: Vec<(String, String)>,
}

impl OperationResult {
    pub fn ok(cas: u64) -> Self {
        Self {
            success: true,
            status: Status::NoError,
            cas,
            ..Default::default()
        }
    }

    pub fn failure(status: Status) -> Self {
        Self {
            success: false,
            message: status.to_string(),
            status,
            ..Default::default()
        }
    }
}
