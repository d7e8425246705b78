use crate::net::support::{Error, Result, WireMessage};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;

/// Size of the frame header: sequence number, protocol byte, word count.
pub const HEADER_SIZE: usize = 7;

/// Payload protocols multiplexed over the shared SCADA framing.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ProtocolTag {
    ModbusTcp = 0,
    Rplc = 1,
    ScadaMgmt = 2,
    CoordData = 3,
    CoordApi = 4,
}

impl ProtocolTag {
    #[inline]
    pub fn from_u8(raw: u8) -> Result<ProtocolTag> {
        match raw {
            0 => Ok(ProtocolTag::ModbusTcp),
            1 => Ok(ProtocolTag::Rplc),
            2 => Ok(ProtocolTag::ScadaMgmt),
            3 => Ok(ProtocolTag::CoordData),
            4 => Ok(ProtocolTag::CoordApi),
            _ => Err(Error::UnknownProtocol(raw)),
        }
    }
}

impl From<ProtocolTag> for u8 {
    #[inline]
    fn from(tag: ProtocolTag) -> Self {
        tag as u8
    }
}

impl fmt::Display for ProtocolTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ProtocolTag::ModbusTcp => "MODBUS_TCP",
            ProtocolTag::Rplc => "RPLC",
            ProtocolTag::ScadaMgmt => "SCADA_MGMT",
            ProtocolTag::CoordData => "COORD_DATA",
            ProtocolTag::CoordApi => "COORD_API",
        };
        f.write_str(name)
    }
}

/// A SCADA frame: the unit of transmission on every edge of the network.
/// The payload is an ordered sequence of 32 bit words whose meaning is
/// owned entirely by the tagged protocol; the codec never interprets it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame {
    seq_num: u32,
    protocol: ProtocolTag,
    data: Vec<u32>,
}

impl Frame {
    /// Builds an outbound frame.
    #[inline]
    pub fn make(seq_num: u32, protocol: ProtocolTag, data: Vec<u32>) -> Frame {
        Frame {
            seq_num,
            protocol,
            data,
        }
    }

    #[inline]
    pub fn seq_num(&self) -> u32 {
        self.seq_num
    }

    #[inline]
    pub fn protocol(&self) -> ProtocolTag {
        self.protocol
    }

    /// Number of payload words.
    #[inline]
    pub fn length(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn data(&self) -> &[u32] {
        &self.data
    }

    /// Serializes the frame for transmission. Layout, big-endian:
    /// `u32 seq_num | u8 protocol | u16 word_count | words`.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + self.data.len() * 4);

        bytes
            .write_u32::<BigEndian>(self.seq_num)
            .expect("Error writing sequence number");
        bytes
            .write_u8(self.protocol.into())
            .expect("Error writing protocol tag");
        bytes
            .write_u16::<BigEndian>(self.data.len() as u16)
            .expect("Error writing word count");

        for &word in &self.data {
            bytes
                .write_u32::<BigEndian>(word)
                .expect("Error writing payload word");
        }

        bytes
    }

    /// Parses a received wire message into a frame. Valid iff the buffer
    /// holds exactly the advertised shape and the protocol tag is known.
    #[inline]
    pub fn receive(wire: &WireMessage) -> Result<Frame> {
        Self::decode(&wire.bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Frame> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::Truncated);
        }

        let mut stream = bytes;
        let seq_num = stream.read_u32::<BigEndian>()?;
        let protocol = ProtocolTag::from_u8(stream.read_u8()?)?;
        let word_count = stream.read_u16::<BigEndian>()? as usize;

        if stream.len() < word_count * 4 {
            return Err(Error::Truncated);
        }
        if stream.len() > word_count * 4 {
            return Err(Error::TrailingBytes);
        }

        let mut data = Vec::with_capacity(word_count);
        for _ in 0..word_count {
            data.push(stream.read_u32::<BigEndian>()?);
        }

        Ok(Frame {
            seq_num,
            protocol,
            data,
        })
    }
}
