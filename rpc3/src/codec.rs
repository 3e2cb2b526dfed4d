use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    rc::Rc,
};

use serde::{Serialize, de::DeserializeOwned};

use crate::{
    BitStream, NetworkId, Rpc, SystemAddress,
    directory::ObjectDirectory,
    error::{Error, ErrorKind, Result},
    tags::{RefTags, ReferenceTag, Tagged},
};

/// How a parameter type travels on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// The dispatching instance itself; nothing is written.
    SkipSelf,
    /// A nested bit buffer, prefixed with its bit length.
    EmbeddedBuffer,
    /// A directory object sent by id, optionally with its contents.
    DirectoryReference,
    /// A nullable pointer to one or more values.
    RawPointer,
    /// Plain value encoding.
    Value,
}

/// A type that can be passed as an RPC argument.
///
/// Implement it by hand, derive it with `#[derive(Parameter)]`, or wrap any
/// serde type in [`Packed`].
pub trait Parameter: Sized {
    const POLICY: Policy = Policy::Value;

    /// Fewest bits any value of the type takes on the wire. Used to reject
    /// element counts the remaining input cannot hold.
    const MIN_BITS: usize = 0;

    /// # Errors
    fn encode(&self, w: &mut ParamWriter<'_>) -> Result<()>;

    /// # Errors
    fn decode(r: &mut ParamReader<'_>) -> Result<Self>;

    /// Overwrites `self` with a decoded value. Types with identity that must
    /// survive a remote update can keep fields that are not on the wire.
    ///
    /// # Errors
    fn decode_in_place(&mut self, r: &mut ParamReader<'_>) -> Result<()> {
        *self = Self::decode(r)?;
        Ok(())
    }
}

/// Most elements accepted for a type that may take no bits on the wire.
const MAX_EMPTY_ELEMENTS: usize = 1 << 16;

/// Fails when `count` values of `T` cannot come from what is left to read.
pub(crate) fn check_count<T: Parameter>(r: &mut ParamReader<'_>, count: usize) -> Result<()> {
    let remaining = r.stream().remaining_bits();
    let fits = match T::MIN_BITS {
        0 => count <= MAX_EMPTY_ELEMENTS,
        bits => count.saturating_mul(bits) <= remaining,
    };
    if fits {
        Ok(())
    } else {
        Err(Error::new(
            ErrorKind::DeserializeFailed,
            format!("{count} elements cannot come from {remaining} bits"),
        ))
    }
}

/// Encoding state for the arguments of one outgoing call.
pub struct ParamWriter<'a> {
    stream: &'a mut BitStream,
    tags: &'a mut RefTags,
}

impl<'a> ParamWriter<'a> {
    pub fn new(stream: &'a mut BitStream, tags: &'a mut RefTags) -> Self {
        Self { stream, tags }
    }

    pub fn stream(&mut self) -> &mut BitStream {
        self.stream
    }

    /// Consumes the tag for `value`; null pointers get the default tag.
    pub fn take_tag(&mut self, value: &impl Tagged) -> ReferenceTag {
        match value.identity() {
            Some(identity) => self.tags.take(identity),
            None => ReferenceTag::default(),
        }
    }

    /// A writer over `stream` sharing this call's tags.
    pub fn nested<'b>(&'b mut self, stream: &'b mut BitStream) -> ParamWriter<'b> {
        ParamWriter {
            stream,
            tags: &mut *self.tags,
        }
    }

    /// # Errors
    pub fn write<T: Parameter>(&mut self, value: &T) -> Result<()> {
        value.encode(self)
    }
}

/// Decoding state for the arguments of one incoming call.
pub struct ParamReader<'a> {
    stream: &'a mut BitStream,
    directory: Option<Rc<dyn ObjectDirectory>>,
    caller: Option<Rpc>,
}

impl<'a> ParamReader<'a> {
    pub fn new(stream: &'a mut BitStream) -> Self {
        Self {
            stream,
            directory: None,
            caller: None,
        }
    }

    #[must_use]
    pub fn with_directory(mut self, directory: Option<Rc<dyn ObjectDirectory>>) -> Self {
        self.directory = directory;
        self
    }

    #[must_use]
    pub fn with_caller(mut self, caller: Rpc) -> Self {
        self.caller = Some(caller);
        self
    }

    /// A reader over `stream` with the same directory and caller.
    pub fn nested<'b>(&self, stream: &'b mut BitStream) -> ParamReader<'b> {
        ParamReader {
            stream,
            directory: self.directory.clone(),
            caller: self.caller.clone(),
        }
    }

    pub fn stream(&mut self) -> &mut BitStream {
        self.stream
    }

    #[must_use]
    pub fn directory(&self) -> Option<&Rc<dyn ObjectDirectory>> {
        self.directory.as_ref()
    }

    #[must_use]
    pub fn caller(&self) -> Option<&Rpc> {
        self.caller.as_ref()
    }

    /// # Errors
    pub fn read<T: Parameter>(&mut self) -> Result<T> {
        T::decode(self)
    }
}

impl Parameter for bool {
    const MIN_BITS: usize = 1;

    fn encode(&self, w: &mut ParamWriter<'_>) -> Result<()> {
        w.stream().write_bit(*self);
        Ok(())
    }

    fn decode(r: &mut ParamReader<'_>) -> Result<Self> {
        r.stream().read_bit()
    }
}

macro_rules! impl_fixed_width {
    ($($ty:ty),*) => {$(
        impl Parameter for $ty {
            const MIN_BITS: usize = std::mem::size_of::<$ty>() * 8;

            fn encode(&self, w: &mut ParamWriter<'_>) -> Result<()> {
                w.stream().write_bits(&self.to_be_bytes(), std::mem::size_of::<$ty>() * 8);
                Ok(())
            }

            fn decode(r: &mut ParamReader<'_>) -> Result<Self> {
                Ok(<$ty>::from_be_bytes(r.stream().read_array()?))
            }
        }
    )*};
}

impl_fixed_width!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

impl Parameter for String {
    const MIN_BITS: usize = 8;

    fn encode(&self, w: &mut ParamWriter<'_>) -> Result<()> {
        w.stream().write_str(self);
        Ok(())
    }

    fn decode(r: &mut ParamReader<'_>) -> Result<Self> {
        let max = r.stream().remaining_bits() / 8;
        r.stream().read_string(max)
    }
}

impl<T: Parameter> Parameter for Vec<T> {
    const MIN_BITS: usize = 8;

    fn encode(&self, w: &mut ParamWriter<'_>) -> Result<()> {
        w.stream().write_compressed_u32(u32::try_from(self.len())?);
        self.iter().try_for_each(|item| item.encode(w))
    }

    fn decode(r: &mut ParamReader<'_>) -> Result<Self> {
        let count = r.stream().read_compressed_u32()? as usize;
        check_count::<T>(r, count)?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(T::decode(r)?);
        }
        Ok(out)
    }
}

impl<T: Parameter> Parameter for Option<T> {
    const MIN_BITS: usize = 1;

    fn encode(&self, w: &mut ParamWriter<'_>) -> Result<()> {
        w.stream().write_bit(self.is_some());
        match self {
            Some(value) => value.encode(w),
            None => Ok(()),
        }
    }

    fn decode(r: &mut ParamReader<'_>) -> Result<Self> {
        if r.stream().read_bit()? {
            Ok(Some(T::decode(r)?))
        } else {
            Ok(None)
        }
    }
}

impl Parameter for NetworkId {
    const MIN_BITS: usize = 64;

    fn encode(&self, w: &mut ParamWriter<'_>) -> Result<()> {
        w.stream().write_u64(self.0);
        Ok(())
    }

    fn decode(r: &mut ParamReader<'_>) -> Result<Self> {
        Ok(NetworkId(r.stream().read_u64()?))
    }
}

impl Parameter for SystemAddress {
    const MIN_BITS: usize = 1;

    fn encode(&self, w: &mut ParamWriter<'_>) -> Result<()> {
        let s = w.stream();
        s.write_bit(self.0.is_some());
        if let Some(addr) = self.0 {
            match addr.ip() {
                IpAddr::V4(ip) => {
                    s.write_bit(false);
                    s.write_bits(&ip.octets(), 32);
                }
                IpAddr::V6(ip) => {
                    s.write_bit(true);
                    s.write_bits(&ip.octets(), 128);
                }
            }
            s.write_u16(addr.port());
        }
        Ok(())
    }

    fn decode(r: &mut ParamReader<'_>) -> Result<Self> {
        let s = r.stream();
        if !s.read_bit()? {
            return Ok(SystemAddress::UNASSIGNED);
        }
        let ip = if s.read_bit()? {
            IpAddr::V6(Ipv6Addr::from(s.read_array::<16>()?))
        } else {
            IpAddr::V4(Ipv4Addr::from(s.read_array::<4>()?))
        };
        let port = s.read_u16()?;
        Ok(SystemAddress::from(SocketAddr::new(ip, port)))
    }
}

impl Parameter for BitStream {
    const POLICY: Policy = Policy::EmbeddedBuffer;
    const MIN_BITS: usize = 8;

    fn encode(&self, w: &mut ParamWriter<'_>) -> Result<()> {
        let s = w.stream();
        s.write_compressed_u32(u32::try_from(self.bits_used())?);
        s.write_stream(self);
        Ok(())
    }

    fn decode(r: &mut ParamReader<'_>) -> Result<Self> {
        let bits = r.stream().read_compressed_u32()? as usize;
        r.stream().read_stream(bits)
    }
}

impl Parameter for Rpc {
    const POLICY: Policy = Policy::SkipSelf;

    fn encode(&self, _: &mut ParamWriter<'_>) -> Result<()> {
        Ok(())
    }

    fn decode(r: &mut ParamReader<'_>) -> Result<Self> {
        r.caller()
            .cloned()
            .ok_or_else(|| Error::kind(ErrorKind::MissingCaller))
    }
}

/// Nullable pointer to one or more values.
///
/// Without an array tag only the first element is sent. Tag it with
/// [`RefTags::array`] to send a prefix of the elements.
#[derive(Debug, Clone, PartialEq)]
pub struct Ptr<T>(Option<Vec<T>>);

impl<T> Ptr<T> {
    #[must_use]
    pub fn null() -> Self {
        Self(None)
    }

    #[must_use]
    pub fn new(value: T) -> Self {
        Self(Some(vec![value]))
    }

    #[must_use]
    pub fn from_vec(values: Vec<T>) -> Self {
        Self(Some(values))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    #[must_use]
    pub fn get(&self) -> Option<&T> {
        self.0.as_ref()?.first()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        self.0.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn into_vec(self) -> Option<Vec<T>> {
        self.0
    }
}

impl<T> Default for Ptr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> Tagged for Ptr<T> {
    fn identity(&self) -> Option<usize> {
        self.0.as_ref().map(|v| v.as_ptr().addr())
    }
}

impl<T: Parameter> Parameter for Ptr<T> {
    const POLICY: Policy = Policy::RawPointer;
    const MIN_BITS: usize = 1;

    fn encode(&self, w: &mut ParamWriter<'_>) -> Result<()> {
        let Some(values) = &self.0 else {
            w.stream().write_bit(true);
            return Ok(());
        };
        w.stream().write_bit(false);
        let tag = w.take_tag(self);
        w.stream().write_bit(tag.is_array());
        let count = if tag.is_array() { tag.count } else { 1 };
        if count > values.len() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("array tag of {count} elements on {} values", values.len()),
            ));
        }
        if tag.is_array() {
            w.stream().write_compressed_u32(u32::try_from(count)?);
        }
        values[..count].iter().try_for_each(|v| v.encode(w))
    }

    fn decode(r: &mut ParamReader<'_>) -> Result<Self> {
        if r.stream().read_bit()? {
            return Ok(Self::null());
        }
        let count = if r.stream().read_bit()? {
            r.stream().read_compressed_u32()? as usize
        } else {
            1
        };
        check_count::<T>(r, count)?;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(T::decode(r)?);
        }
        Ok(Self::from_vec(values))
    }
}

/// Any serde type, carried as a length-prefixed MessagePack blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packed<T>(pub T);

impl<T: Serialize + DeserializeOwned> Parameter for Packed<T> {
    const MIN_BITS: usize = 8;

    fn encode(&self, w: &mut ParamWriter<'_>) -> Result<()> {
        let bytes = rmp_serde::to_vec_named(&self.0)?;
        let s = w.stream();
        s.write_compressed_u32(u32::try_from(bytes.len())?);
        s.write_bits(&bytes, bytes.len() * 8);
        Ok(())
    }

    fn decode(r: &mut ParamReader<'_>) -> Result<Self> {
        let s = r.stream();
        let len = s.read_compressed_u32()? as usize;
        let bytes = s.read_bits(len.saturating_mul(8))?;
        Ok(Packed(rmp_serde::from_slice(&bytes)?))
    }
}
