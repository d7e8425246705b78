//! The messaging layer of the SCADA network: frame codec, per-protocol
//! packets, session bookkeeping and the datagram radio endpoint.

pub mod frame;
pub mod packet;
pub mod radio;
pub mod session;
pub mod support;
