use crate::net::frame::{Frame, ProtocolTag};
use crate::net::support::{Error, Result};
use graphite::time::{join_millis, split_millis};
use graphite::PlcId;

/// Sub-types of the reactor PLC protocol.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RplcType {
    LinkReq = 0,
    Status = 1,
    MekStruct = 2,
    MekBurnRate = 3,
    RpsEnable = 4,
    RpsScram = 5,
    RpsStatus = 6,
    RpsAlarm = 7,
    RpsReset = 8,
    KeepAlive = 9,
}

impl RplcType {
    #[inline]
    pub fn from_u32(raw: u32) -> Result<RplcType> {
        match raw {
            0 => Ok(RplcType::LinkReq),
            1 => Ok(RplcType::Status),
            2 => Ok(RplcType::MekStruct),
            3 => Ok(RplcType::MekBurnRate),
            4 => Ok(RplcType::RpsEnable),
            5 => Ok(RplcType::RpsScram),
            6 => Ok(RplcType::RpsStatus),
            7 => Ok(RplcType::RpsAlarm),
            8 => Ok(RplcType::RpsReset),
            9 => Ok(RplcType::KeepAlive),
            _ => Err(Error::UnknownSubType(raw)),
        }
    }
}

impl From<RplcType> for u32 {
    #[inline]
    fn from(kind: RplcType) -> Self {
        kind as u32
    }
}

/// Sub-types of the SCADA management protocol. KEEP_ALIVE is the
/// canonical name of sub-type 0.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MgmtType {
    KeepAlive = 0,
    Close = 1,
    RtuAdvert = 2,
    RemoteLinked = 3,
}

impl MgmtType {
    #[inline]
    pub fn from_u32(raw: u32) -> Result<MgmtType> {
        match raw {
            0 => Ok(MgmtType::KeepAlive),
            1 => Ok(MgmtType::Close),
            2 => Ok(MgmtType::RtuAdvert),
            3 => Ok(MgmtType::RemoteLinked),
            _ => Err(Error::UnknownSubType(raw)),
        }
    }
}

impl From<MgmtType> for u32 {
    #[inline]
    fn from(kind: MgmtType) -> Self {
        kind as u32
    }
}

/// Supervisor verdict on a link request.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LinkResult {
    Allow = 0,
    Deny = 1,
    Collision = 2,
}

impl LinkResult {
    #[inline]
    pub fn from_u32(raw: u32) -> Result<LinkResult> {
        match raw {
            0 => Ok(LinkResult::Allow),
            1 => Ok(LinkResult::Deny),
            2 => Ok(LinkResult::Collision),
            _ => Err(Error::UnknownSubType(raw)),
        }
    }
}

/// Capability tags carried by an RTU advertisement, in gateway order.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RtuAdvertType {
    Redstone = 0,
    Boiler = 1,
    BoilerValve = 2,
    Turbine = 3,
    TurbineValve = 4,
    EMachine = 5,
    IMatrix = 6,
}

impl RtuAdvertType {
    #[inline]
    pub fn from_u32(raw: u32) -> Result<RtuAdvertType> {
        match raw {
            0 => Ok(RtuAdvertType::Redstone),
            1 => Ok(RtuAdvertType::Boiler),
            2 => Ok(RtuAdvertType::BoilerValve),
            3 => Ok(RtuAdvertType::Turbine),
            4 => Ok(RtuAdvertType::TurbineValve),
            5 => Ok(RtuAdvertType::EMachine),
            6 => Ok(RtuAdvertType::IMatrix),
            _ => Err(Error::UnknownSubType(raw)),
        }
    }
}

#[inline]
fn check_protocol(frame: &Frame, expected: ProtocolTag) -> Result<()> {
    if frame.protocol() != expected {
        return Err(Error::WrongProtocol);
    }
    Ok(())
}

/// Shared decode contract: every protocol packet parses from a borrowed
/// frame, validating length and sub-type range, and reports failure as
/// a value.
pub trait DecodePacket: Sized {
    fn decode(frame: &Frame) -> Result<Self>;
}

/// MODBUS-TCP style packet relayed to RTU gateways.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ModbusPacket {
    pub txn_id: u32,
    pub unit_id: u32,
    pub func_code: u32,
    pub data: Vec<u32>,
}

impl ModbusPacket {
    #[inline]
    pub fn make(txn_id: u32, unit_id: u32, func_code: u32, data: Vec<u32>) -> ModbusPacket {
        ModbusPacket {
            txn_id,
            unit_id,
            func_code,
            data,
        }
    }

    pub fn to_payload(&self) -> Vec<u32> {
        let mut payload = vec![self.txn_id, self.unit_id, self.func_code];
        payload.extend_from_slice(&self.data);
        payload
    }
}

impl DecodePacket for ModbusPacket {
    fn decode(frame: &Frame) -> Result<ModbusPacket> {
        check_protocol(frame, ProtocolTag::ModbusTcp)?;

        if frame.length() < 3 {
            return Err(Error::TooShort);
        }

        let words = frame.data();

        Ok(ModbusPacket {
            txn_id: words[0],
            unit_id: words[1],
            func_code: words[2],
            data: words[3..].to_vec(),
        })
    }
}

/// Reactor PLC protocol packet: `[plc_id, type, body…]`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RplcPacket {
    pub id: PlcId,
    pub kind: RplcType,
    pub body: Vec<u32>,
}

impl RplcPacket {
    #[inline]
    pub fn make(id: PlcId, kind: RplcType, body: Vec<u32>) -> RplcPacket {
        RplcPacket { id, kind, body }
    }

    #[inline]
    pub fn link_req(id: PlcId) -> RplcPacket {
        Self::make(id, RplcType::LinkReq, vec![])
    }

    #[inline]
    pub fn keep_alive(id: PlcId, ts_millis: u64) -> RplcPacket {
        let (hi, lo) = split_millis(ts_millis);
        Self::make(id, RplcType::KeepAlive, vec![hi, lo])
    }

    pub fn to_payload(&self) -> Vec<u32> {
        let mut payload = vec![self.id, self.kind.into()];
        payload.extend_from_slice(&self.body);
        payload
    }

    /// Echoed keep-alive timestamp, when this packet carries one.
    pub fn keep_alive_ts(&self) -> Option<u64> {
        match (self.kind, self.body.len()) {
            (RplcType::KeepAlive, 2) => Some(join_millis(self.body[0], self.body[1])),
            _ => None,
        }
    }
}

impl DecodePacket for RplcPacket {
    fn decode(frame: &Frame) -> Result<RplcPacket> {
        check_protocol(frame, ProtocolTag::Rplc)?;

        if frame.length() < 2 {
            return Err(Error::TooShort);
        }

        let words = frame.data();
        let kind = RplcType::from_u32(words[1])?;

        Ok(RplcPacket {
            id: words[0],
            kind,
            body: words[2..].to_vec(),
        })
    }
}

/// SCADA management protocol packet: `[type, body…]`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MgmtPacket {
    pub kind: MgmtType,
    pub body: Vec<u32>,
}

impl MgmtPacket {
    #[inline]
    pub fn make(kind: MgmtType, body: Vec<u32>) -> MgmtPacket {
        MgmtPacket { kind, body }
    }

    #[inline]
    pub fn keep_alive(ts_millis: u64) -> MgmtPacket {
        let (hi, lo) = split_millis(ts_millis);
        Self::make(MgmtType::KeepAlive, vec![hi, lo])
    }

    #[inline]
    pub fn close() -> MgmtPacket {
        Self::make(MgmtType::Close, vec![])
    }

    #[inline]
    pub fn remote_linked(result: LinkResult) -> MgmtPacket {
        Self::make(MgmtType::RemoteLinked, vec![result as u32])
    }

    pub fn rtu_advert(caps: &[RtuAdvertType]) -> MgmtPacket {
        Self::make(MgmtType::RtuAdvert, caps.iter().map(|&c| c as u32).collect())
    }

    pub fn to_payload(&self) -> Vec<u32> {
        let mut payload = vec![self.kind.into()];
        payload.extend_from_slice(&self.body);
        payload
    }

    /// Link verdict carried by a REMOTE_LINKED packet. A bare packet
    /// with no body means the link was granted.
    pub fn link_result(&self) -> Result<LinkResult> {
        match (self.kind, self.body.first()) {
            (MgmtType::RemoteLinked, None) => Ok(LinkResult::Allow),
            (MgmtType::RemoteLinked, Some(&word)) => LinkResult::from_u32(word),
            _ => Err(Error::WrongProtocol),
        }
    }

    /// Ordered capability list of an RTU advertisement. Any out-of-range
    /// tag invalidates the whole advertisement.
    pub fn capabilities(&self) -> Result<Vec<RtuAdvertType>> {
        if self.kind != MgmtType::RtuAdvert {
            return Err(Error::WrongProtocol);
        }

        self.body.iter().map(|&word| RtuAdvertType::from_u32(word)).collect()
    }

    /// Echoed keep-alive timestamp, when this packet carries one.
    pub fn keep_alive_ts(&self) -> Option<u64> {
        match (self.kind, self.body.len()) {
            (MgmtType::KeepAlive, 2) => Some(join_millis(self.body[0], self.body[1])),
            _ => None,
        }
    }
}

impl DecodePacket for MgmtPacket {
    fn decode(frame: &Frame) -> Result<MgmtPacket> {
        check_protocol(frame, ProtocolTag::ScadaMgmt)?;

        if frame.length() < 1 {
            return Err(Error::TooShort);
        }

        let words = frame.data();
        let kind = MgmtType::from_u32(words[0])?;

        Ok(MgmtPacket {
            kind,
            body: words[1..].to_vec(),
        })
    }
}

/// Coordinator data protocol. The sub-type table is defined by the
/// coordinator side of the network and is not part of this repository,
/// so every decode is rejected and the protocol stays unreachable.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CoordDataPacket;

impl DecodePacket for CoordDataPacket {
    fn decode(frame: &Frame) -> Result<CoordDataPacket> {
        check_protocol(frame, ProtocolTag::CoordData)?;

        if frame.length() < 1 {
            return Err(Error::TooShort);
        }

        Err(Error::UnknownSubType(frame.data()[0]))
    }
}

/// Coordinator API protocol. Same situation as [`CoordDataPacket`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CoordApiPacket;

impl DecodePacket for CoordApiPacket {
    fn decode(frame: &Frame) -> Result<CoordApiPacket> {
        check_protocol(frame, ProtocolTag::CoordApi)?;

        if frame.length() < 1 {
            return Err(Error::TooShort);
        }

        Err(Error::UnknownSubType(frame.data()[0]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(protocol: ProtocolTag, payload: Vec<u32>) -> Frame {
        Frame::make(1, protocol, payload)
    }

    #[test]
    fn test_rplc_roundtrip() {
        let packet = RplcPacket::make(7, RplcType::Status, vec![1, 0, 0b10, 120]);
        let decoded =
            RplcPacket::decode(&frame(ProtocolTag::Rplc, packet.to_payload())).unwrap();

        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_rplc_min_length_boundary() {
        // [plc_id, type] alone is a complete LINK_REQ.
        let decoded = RplcPacket::decode(&frame(ProtocolTag::Rplc, vec![7, 0])).unwrap();

        assert_eq!(decoded.id, 7);
        assert_eq!(decoded.kind, RplcType::LinkReq);
        assert!(decoded.body.is_empty());

        // One word short is rejected.
        assert_eq!(
            RplcPacket::decode(&frame(ProtocolTag::Rplc, vec![7])).unwrap_err(),
            Error::TooShort
        );
    }

    #[test]
    fn test_rplc_unknown_subtype() {
        assert_eq!(
            RplcPacket::decode(&frame(ProtocolTag::Rplc, vec![7, 10])).unwrap_err(),
            Error::UnknownSubType(10)
        );
    }

    #[test]
    fn test_rplc_wrong_protocol() {
        assert_eq!(
            RplcPacket::decode(&frame(ProtocolTag::ScadaMgmt, vec![7, 0])).unwrap_err(),
            Error::WrongProtocol
        );
    }

    #[test]
    fn test_rplc_keep_alive_timestamp() {
        let packet = RplcPacket::keep_alive(7, 0x0000_0001_0000_0002);

        assert_eq!(packet.body, vec![1, 2]);
        assert_eq!(packet.keep_alive_ts(), Some(0x0000_0001_0000_0002));
        assert_eq!(RplcPacket::link_req(7).keep_alive_ts(), None);
    }

    #[test]
    fn test_mgmt_roundtrip() {
        let packet = MgmtPacket::keep_alive(12345);
        let decoded =
            MgmtPacket::decode(&frame(ProtocolTag::ScadaMgmt, packet.to_payload())).unwrap();

        assert_eq!(decoded, packet);
        assert_eq!(decoded.keep_alive_ts(), Some(12345));
    }

    #[test]
    fn test_mgmt_min_length_boundary() {
        let decoded = MgmtPacket::decode(&frame(ProtocolTag::ScadaMgmt, vec![1])).unwrap();

        assert_eq!(decoded.kind, MgmtType::Close);

        assert_eq!(
            MgmtPacket::decode(&frame(ProtocolTag::ScadaMgmt, vec![])).unwrap_err(),
            Error::TooShort
        );
    }

    #[test]
    fn test_mgmt_unknown_subtype() {
        assert_eq!(
            MgmtPacket::decode(&frame(ProtocolTag::ScadaMgmt, vec![4])).unwrap_err(),
            Error::UnknownSubType(4)
        );
    }

    #[test]
    fn test_remote_linked_bare_payload_allows() {
        let decoded = MgmtPacket::decode(&frame(ProtocolTag::ScadaMgmt, vec![3])).unwrap();

        assert_eq!(decoded.kind, MgmtType::RemoteLinked);
        assert_eq!(decoded.link_result().unwrap(), LinkResult::Allow);
    }

    #[test]
    fn test_remote_linked_carries_verdict() {
        let decoded = MgmtPacket::decode(&frame(ProtocolTag::ScadaMgmt, vec![3, 2])).unwrap();

        assert_eq!(decoded.link_result().unwrap(), LinkResult::Collision);
    }

    #[test]
    fn test_rtu_advert_capabilities() {
        let packet = MgmtPacket::rtu_advert(&[
            RtuAdvertType::Boiler,
            RtuAdvertType::TurbineValve,
            RtuAdvertType::IMatrix,
        ]);
        let decoded =
            MgmtPacket::decode(&frame(ProtocolTag::ScadaMgmt, packet.to_payload())).unwrap();

        assert_eq!(
            decoded.capabilities().unwrap(),
            vec![
                RtuAdvertType::Boiler,
                RtuAdvertType::TurbineValve,
                RtuAdvertType::IMatrix
            ]
        );
    }

    #[test]
    fn test_rtu_advert_out_of_range_capability() {
        let decoded = MgmtPacket::decode(&frame(ProtocolTag::ScadaMgmt, vec![2, 1, 7])).unwrap();

        assert_eq!(decoded.capabilities().unwrap_err(), Error::UnknownSubType(7));
    }

    #[test]
    fn test_modbus_roundtrip() {
        let packet = ModbusPacket::make(100, 2, 3, vec![0xaa, 0xbb]);
        let decoded =
            ModbusPacket::decode(&frame(ProtocolTag::ModbusTcp, packet.to_payload())).unwrap();

        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_modbus_min_length_boundary() {
        assert!(ModbusPacket::decode(&frame(ProtocolTag::ModbusTcp, vec![1, 2, 3])).is_ok());
        assert_eq!(
            ModbusPacket::decode(&frame(ProtocolTag::ModbusTcp, vec![1, 2])).unwrap_err(),
            Error::TooShort
        );
    }

    #[test]
    fn test_coord_protocols_unreachable() {
        assert_eq!(
            CoordDataPacket::decode(&frame(ProtocolTag::CoordData, vec![0])).unwrap_err(),
            Error::UnknownSubType(0)
        );
        assert_eq!(
            CoordApiPacket::decode(&frame(ProtocolTag::CoordApi, vec![1, 2])).unwrap_err(),
            Error::UnknownSubType(1)
        );
        assert_eq!(
            CoordApiPacket::decode(&frame(ProtocolTag::CoordApi, vec![])).unwrap_err(),
            Error::TooShort
        );
    }
}
