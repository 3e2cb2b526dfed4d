use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::{
    BitStream, NetworkId,
    error::{Error, ErrorKind, Result},
};

/// Longest identifier accepted on the wire, in bytes.
pub const MAX_IDENTIFIER_LEN: usize = 511;

/// First byte of every frame this layer produces or inspects.
pub struct MessageId;

impl MessageId {
    /// Prefix carrying the sender's 64-bit timestamp.
    pub const TIMESTAMP: u8 = 27;
    /// A call or signal.
    pub const RPC: u8 = 83;
    /// A validation failure reported back to the caller.
    pub const REMOTE_ERROR: u8 = 84;
}

const TIMESTAMP_PREFIX_LEN: usize = 1 + std::mem::size_of::<u64>();

/// A raw inbound frame split into its optional timestamp, message id and body.
///
/// ```text
/// | 1 byte    | 8 bytes   | 1 byte     | rest |
/// | TIMESTAMP | timestamp | message id | body |   (timestamped)
/// | message id | body |                         (plain)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Sender timestamp, 0 when the frame carried none.
    pub timestamp: u64,
    pub message_id: u8,
    pub body: Bytes,
}

impl Envelope {
    /// # Errors
    ///
    /// Returns `DeserializeFailed` for an empty frame or a timestamp prefix
    /// without a message id after it.
    pub fn parse(data: &Bytes) -> Result<Self> {
        match data.first() {
            None => Err(Error::new(ErrorKind::DeserializeFailed, "empty frame".into())),
            Some(&MessageId::TIMESTAMP) => {
                if data.len() <= TIMESTAMP_PREFIX_LEN {
                    return Err(Error::new(
                        ErrorKind::DeserializeFailed,
                        format!("truncated timestamp frame: {} bytes", data.len()),
                    ));
                }
                let mut ts = [0u8; 8];
                ts.copy_from_slice(&data[1..TIMESTAMP_PREFIX_LEN]);
                Ok(Self {
                    timestamp: u64::from_be_bytes(ts),
                    message_id: data[TIMESTAMP_PREFIX_LEN],
                    body: data.slice(TIMESTAMP_PREFIX_LEN + 1..),
                })
            }
            Some(&message_id) => Ok(Self {
                timestamp: 0,
                message_id,
                body: data.slice(1..),
            }),
        }
    }
}

/// An outgoing call or signal.
///
/// # Wire Format
///
/// ```text
/// [TIMESTAMP u64]                 only when timestamp != 0
/// RPC                             u8
/// parameter count                 u8
/// has object                      1 bit
/// [object id]                     u64, only when has object
/// is call                         1 bit
/// <align>
/// identifier                      compressed u32 length + bytes
/// parameter bits                  compressed u64
/// <align>
/// parameters                      ceil(bits / 8) bytes
/// ```
#[derive(Debug)]
pub struct CallFrame<'a> {
    pub timestamp: u64,
    pub parameter_count: u8,
    pub object: Option<NetworkId>,
    pub is_call: bool,
    pub identifier: &'a str,
    pub parameters: &'a BitStream,
}

impl CallFrame<'_> {
    /// # Errors
    ///
    /// Returns `IdentifierTooLong` if the identifier does not fit on the wire
    /// and `InvalidArgument` if it contains a NUL byte, which error replies
    /// use as the terminator.
    pub fn encode(&self) -> Result<Bytes> {
        if self.identifier.len() > MAX_IDENTIFIER_LEN {
            return Err(Error::new(
                ErrorKind::IdentifierTooLong,
                format!("{} bytes", self.identifier.len()),
            ));
        }
        if self.identifier.contains('\0') {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("identifier {:?} contains a NUL byte", self.identifier),
            ));
        }
        let mut s = BitStream::with_capacity(
            16 + self.identifier.len() + self.parameters.bytes_used(),
        );
        if self.timestamp != 0 {
            s.write_u8(MessageId::TIMESTAMP);
            s.write_u64(self.timestamp);
        }
        s.write_u8(MessageId::RPC);
        s.write_u8(self.parameter_count);
        s.write_bit(self.object.is_some());
        if let Some(object) = self.object {
            s.write_u64(object.0);
        }
        s.write_bit(self.is_call);
        s.align_write();
        s.write_str(self.identifier);
        s.write_compressed_u64(self.parameters.bits_used() as u64);
        s.write_aligned_bytes(self.parameters.data());
        Ok(s.into_bytes())
    }
}

/// The part of a call body that precedes the identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preamble {
    pub parameter_count: u8,
    pub object: Option<NetworkId>,
}

impl Preamble {
    /// # Errors
    pub fn read(s: &mut BitStream) -> Result<Self> {
        let parameter_count = s.read_u8()?;
        let object = if s.read_bit()? {
            Some(NetworkId(s.read_u64()?))
        } else {
            None
        };
        Ok(Self {
            parameter_count,
            object,
        })
    }
}

/// The rest of a call body, read once the target object has been resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallBody {
    pub is_call: bool,
    pub identifier: String,
    pub parameters: BitStream,
}

impl CallBody {
    /// # Errors
    pub fn read(s: &mut BitStream) -> Result<Self> {
        let is_call = s.read_bit()?;
        s.align_read();
        let identifier = s.read_string(MAX_IDENTIFIER_LEN)?;
        let bits = usize::try_from(s.read_compressed_u64()?)?;
        s.align_read();
        let parameters = s.read_stream(bits)?;
        Ok(Self {
            is_call,
            identifier,
            parameters,
        })
    }
}

/// Fully decoded call frame, for tooling.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub timestamp: u64,
    pub parameter_count: u8,
    pub object: Option<NetworkId>,
    pub is_call: bool,
    pub identifier: String,
    pub parameter_bits: usize,
    pub parameters: Vec<u8>,
}

impl Frame {
    /// # Errors
    ///
    /// Fails if `data` is not a well-formed call or signal frame.
    pub fn parse(data: &Bytes) -> Result<Self> {
        let envelope = Envelope::parse(data)?;
        if envelope.message_id != MessageId::RPC {
            return Err(Error::new(
                ErrorKind::DeserializeFailed,
                format!("not an rpc frame: message id {}", envelope.message_id),
            ));
        }
        let mut s = BitStream::from_bytes(&envelope.body);
        let preamble = Preamble::read(&mut s)?;
        let body = CallBody::read(&mut s)?;
        Ok(Self {
            timestamp: envelope.timestamp,
            parameter_count: preamble.parameter_count,
            object: preamble.object,
            is_call: body.is_call,
            identifier: body.identifier,
            parameter_bits: body.parameters.bits_used(),
            parameters: body.parameters.data().to_vec(),
        })
    }
}

/// Validation failures reported to a caller, in wire order.
#[repr(u8)]
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub enum RemoteErrorCode {
    NetworkIdManagerUnavailable = 0,
    ObjectDoesNotExist = 1,
    FunctionIndexOutOfRange = 2,
    FunctionNotRegistered = 3,
    FunctionNoLongerRegistered = 4,
    CallingCppAsC = 5,
    CallingCAsCpp = 6,
    IncorrectNumberOfParameters = 7,
}

impl TryFrom<u8> for RemoteErrorCode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::NetworkIdManagerUnavailable,
            1 => Self::ObjectDoesNotExist,
            2 => Self::FunctionIndexOutOfRange,
            3 => Self::FunctionNotRegistered,
            4 => Self::FunctionNoLongerRegistered,
            5 => Self::CallingCppAsC,
            6 => Self::CallingCAsCpp,
            7 => Self::IncorrectNumberOfParameters,
            _ => {
                return Err(Error::new(
                    ErrorKind::DeserializeFailed,
                    format!("unknown remote error code {value}"),
                ));
            }
        })
    }
}

/// A remote error frame.
///
/// ```text
/// | 1 byte       | 1 byte | N bytes    | 1 byte |
/// | REMOTE_ERROR | code   | identifier | 0      |
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub code: RemoteErrorCode,
    /// Identifier of the failed call; empty when the failure happened
    /// before the identifier was read.
    pub identifier: String,
}

impl RemoteError {
    #[must_use]
    pub fn new(code: RemoteErrorCode, identifier: impl Into<String>) -> Self {
        Self {
            code,
            identifier: identifier.into(),
        }
    }

    /// The identifier is NUL-terminated, so a foreign identifier with an
    /// interior NUL reads back cut at that byte.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.identifier.len() + 3);
        buf.put_u8(MessageId::REMOTE_ERROR);
        buf.put_u8(self.code as u8);
        buf.put_slice(self.identifier.as_bytes());
        buf.put_u8(0);
        buf.freeze()
    }

    /// Parses a remote error, with or without a timestamp prefix.
    ///
    /// # Errors
    pub fn parse(data: &Bytes) -> Result<Self> {
        let envelope = Envelope::parse(data)?;
        if envelope.message_id != MessageId::REMOTE_ERROR {
            return Err(Error::new(
                ErrorKind::DeserializeFailed,
                format!("not a remote error: message id {}", envelope.message_id),
            ));
        }
        let (&code, rest) = envelope.body.split_first().ok_or_else(|| {
            Error::new(ErrorKind::DeserializeFailed, "missing error code".into())
        })?;
        let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        Ok(Self {
            code: RemoteErrorCode::try_from(code)?,
            identifier: String::from_utf8(rest[..end].to_vec())?,
        })
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} for {:?}", self.code, self.identifier)
    }
}
