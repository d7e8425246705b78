use std::io;

/// Errors raised while decoding or moving SCADA traffic.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Error {
    /// Not enough bytes on the wire for the advertised frame shape.
    Truncated,
    /// Bytes left over after the advertised payload.
    TrailingBytes,
    /// Protocol byte outside the known tag range.
    UnknownProtocol(u8),
    /// Sub-type word outside the protocol's range.
    UnknownSubType(u32),
    /// Packet parsed against a frame carrying a different protocol.
    WrongProtocol,
    /// Frame payload below the protocol's minimum length.
    TooShort,
    Io(io::ErrorKind),
}

impl From<io::Error> for Error {
    fn from(io_error: io::Error) -> Self {
        Error::Io(io_error.kind())
    }
}

pub type Result<T> = ::std::result::Result<T, Error>;

/// Envelope a datagram arrives in: the raw message plus the transport
/// metadata the radio channel supplies alongside it.
#[derive(Debug, Clone)]
pub struct WireMessage {
    pub local_port: u16,
    pub source_port: u16,
    pub reply_port: u16,
    pub bytes: Vec<u8>,
    /// Radial distance reported by the radio. Zero when the transport
    /// does not measure one.
    pub distance: u32,
}
