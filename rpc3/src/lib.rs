#![forbid(unsafe_code)]

extern crate self as rpc3;

pub use rpc3_macro::Parameter;

mod error;
pub use error::{Error, ErrorKind, Result};

mod bitstream;
pub use bitstream::BitStream;

mod tags;
pub use tags::{RefTags, ReferenceTag, TagFlags, Tagged};

mod directory;
pub use directory::{NetworkId, NetworkIdManager, NetworkObject, ObjectDirectory, ObjectHandle};

mod codec;
pub use codec::{Packed, ParamReader, ParamWriter, Parameter, Policy, Ptr};

mod netref;
pub use netref::{NetRef, RefEntry};

mod handler;
pub use handler::{Arguments, Function, IntoSlotFlow, Invoker, Method, SlotFlow};

mod registry;
pub use registry::{FunctionEntry, SlotEntry, SlotGroup};

mod transport;
pub use transport::{
    Packet, PacketPriority, PacketReliability, ReceiveResult, SendParams, SystemAddress, Transport,
};

pub mod loopback;

pub mod msg;
pub use msg::{RemoteError, RemoteErrorCode};

mod context;
pub use context::{IncomingContext, OutgoingConfig};

mod rpc;
pub use rpc::Rpc;

mod dispatch;
mod sender;
