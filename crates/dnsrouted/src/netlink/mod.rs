//! Kernel routing interface: rtnetlink wire format and sockets

pub mod codec;
pub mod socket;

pub use codec::{
    CodecError, KernelEvent, RouteKind, RouteMessageBuilder, RouteOp, RouteSpec, encode_route,
    parse_datagram,
};
pub use socket::RouteSocket;
