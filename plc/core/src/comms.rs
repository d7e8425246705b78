use crate::iss::IssStatus;
use crate::safety::PlcState;
use cadmium::net::frame::{Frame, ProtocolTag};
use cadmium::net::packet::{DecodePacket, LinkResult, MgmtPacket, MgmtType, RplcPacket, RplcType};
use cadmium::net::radio::FrameSink;
use cadmium::net::session::Session;
use cadmium::net::support::WireMessage;
use graphite::choose;
use graphite::logging;
use graphite::time::timestamp_millis;
use graphite::PlcId;
use std::time::{Duration, Instant};

/// Loop ticks between STATUS transmissions while linked (3.33 Hz at the
/// 20 Hz loop rate).
pub const UPDATE_TICKS: u32 = 3;
/// Loop ticks between LINK_REQ transmissions while not linked (0.5 Hz).
pub const LINK_TICKS: u32 = 20;
/// Supervisor connection watchdog.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(3);

// The hub is the only peer a PLC ever links with.
const SUPERVISOR_PEER: u32 = 0;

/// Outcomes of inbound traffic that the scheduler must act on.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RemoteEvent {
    Scram,
    Enable,
    Reset,
    SetBurnRate(u32),
    Linked,
    Closed,
}

/// Binds the safety core to the messaging layer: owns the single
/// supervisor session, the send cadences and the inbound dispatch.
pub struct Comms {
    plc_id: PlcId,
    session: Option<Session>,
    remote_scram: bool,
    status_wait: u32,
    link_wait: u32,
    log: logging::Logger,
}

impl Comms {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(plc_id: PlcId, log: L) -> Comms {
        let comms_log = match log.into() {
            Some(log) => log.new(logging::o!("plc_id" => plc_id)),
            _ => logging::Logger::root(logging::Discard, logging::o!()),
        };

        Comms {
            plc_id,
            session: None,
            remote_scram: false,
            status_wait: 0,
            link_wait: 0,
            log: comms_log,
        }
    }

    #[inline]
    pub fn is_linked(&self) -> bool {
        self.session.as_ref().map_or(false, Session::linked)
    }

    /// True while the last remote packet asked for a SCRAM.
    #[inline]
    pub fn is_scrammed(&self) -> bool {
        self.remote_scram
    }

    #[inline]
    pub fn rtt_ms(&self) -> u32 {
        self.session.as_ref().map_or(0, Session::rtt_ms)
    }

    /// Drops the supervisor session and resumes the link cadence.
    pub fn unlink(&mut self) {
        if self.session.take().is_some() {
            logging::info!(self.log, "unlinked from supervisor");
        }

        self.link_wait = 0;
        self.status_wait = 0;
    }

    /// Observes the session watchdog; true exactly once per expiry.
    pub fn watchdog_expired(&mut self, now: Instant) -> bool {
        self.session
            .as_mut()
            .map_or(false, |session| session.watchdog_mut().expired(now))
    }

    /// Deadline the scheduler must wake up for, while one is armed.
    pub fn watchdog_deadline(&self) -> Option<Instant> {
        self.session.as_ref().and_then(|session| {
            choose!(session.watchdog().has_fired() => None, Some(session.watchdog().deadline()))
        })
    }

    /// Loop-tick cadence: STATUS while linked, LINK_REQ while not.
    pub fn on_tick<S: FrameSink>(
        &mut self,
        state: &PlcState,
        iss_status: IssStatus,
        burn_rate: u32,
        sink: &mut S,
    ) {
        if self.is_linked() {
            self.status_wait += 1;
            if self.status_wait >= UPDATE_TICKS {
                self.status_wait = 0;
                self.send_status(state, iss_status, burn_rate, sink);
            }
        } else {
            self.link_wait += 1;
            if self.link_wait >= LINK_TICKS {
                self.link_wait = 0;
                self.transmit_rplc(RplcPacket::link_req(self.plc_id), sink);
            }
        }
    }

    /// STATUS telemetry: `[scram, degraded, iss_status, burn_rate]`.
    pub fn send_status<S: FrameSink>(
        &self,
        state: &PlcState,
        iss_status: IssStatus,
        burn_rate: u32,
        sink: &mut S,
    ) {
        let body = vec![
            choose!(state.scram => 1, 0),
            choose!(state.degraded => 1, 0),
            iss_status.bits(),
            burn_rate,
        ];

        self.transmit_rplc(RplcPacket::make(self.plc_id, RplcType::Status, body), sink);
    }

    /// Emits the one-per-edge trip alarm.
    pub fn send_iss_alarm<S: FrameSink>(&self, status: IssStatus, sink: &mut S) {
        if !self.is_linked() {
            return;
        }

        self.transmit_rplc(
            RplcPacket::make(self.plc_id, RplcType::RpsAlarm, vec![status.bits()]),
            sink,
        );
    }

    /// Trip-state report, sent in reply to RPS commands.
    pub fn send_rps_status<S: FrameSink>(&self, tripped: bool, status: IssStatus, sink: &mut S) {
        if !self.is_linked() {
            return;
        }

        self.transmit_rplc(
            RplcPacket::make(
                self.plc_id,
                RplcType::RpsStatus,
                vec![choose!(tripped => 1, 0), status.bits()],
            ),
            sink,
        );
    }

    /// Structure telemetry, sent once upon linking.
    pub fn send_struct<S: FrameSink>(&self, words: Vec<u32>, sink: &mut S) {
        if !self.is_linked() {
            return;
        }

        self.transmit_rplc(RplcPacket::make(self.plc_id, RplcType::MekStruct, words), sink);
    }

    /// Handles one inbound wire message end to end. Malformed or
    /// misaddressed traffic is dropped here; everything the safety core
    /// must act on comes back as remote events.
    pub fn handle_frame<S: FrameSink>(
        &mut self,
        wire: &WireMessage,
        sink: &mut S,
        now: Instant,
    ) -> Vec<RemoteEvent> {
        let frame = match Frame::receive(wire) {
            Ok(frame) => frame,
            Err(err) => {
                logging::debug!(self.log, "malformed frame dropped";
                                "error" => ?err,
                                "source_port" => wire.source_port);
                return Vec::new();
            }
        };

        if let Some(session) = self.session.as_mut() {
            if !session.accept_seq(frame.seq_num()) {
                return Vec::new();
            }
        }

        let mut events = Vec::new();

        match frame.protocol() {
            ProtocolTag::Rplc => match RplcPacket::decode(&frame) {
                Ok(packet) => self.handle_rplc(packet, sink, now, &mut events),
                Err(err) => {
                    logging::debug!(self.log, "invalid RPLC packet dropped"; "error" => ?err)
                }
            },
            ProtocolTag::ScadaMgmt => match MgmtPacket::decode(&frame) {
                Ok(packet) => self.handle_mgmt(packet, sink, now, &mut events),
                Err(err) => {
                    logging::debug!(self.log, "invalid management packet dropped"; "error" => ?err)
                }
            },
            other => {
                logging::debug!(self.log, "attempted RPLC parse of incorrect protocol";
                                "protocol" => %other)
            }
        }

        events
    }

    fn handle_rplc<S: FrameSink>(
        &mut self,
        packet: RplcPacket,
        sink: &mut S,
        now: Instant,
        events: &mut Vec<RemoteEvent>,
    ) {
        if packet.id != self.plc_id {
            logging::debug!(self.log, "packet for a different PLC dropped";
                            "packet_id" => packet.id);
            return;
        }

        self.touch(now);

        match packet.kind {
            RplcType::KeepAlive => match packet.keep_alive_ts() {
                Some(ts) => {
                    self.update_rtt(ts);
                    self.transmit_rplc(
                        RplcPacket::make(self.plc_id, RplcType::KeepAlive, packet.body),
                        sink,
                    );
                }
                None => logging::debug!(self.log, "keep-alive without timestamp dropped"),
            },
            RplcType::RpsScram => {
                self.remote_scram = true;
                events.push(RemoteEvent::Scram);
            }
            RplcType::RpsReset => {
                self.remote_scram = false;
                events.push(RemoteEvent::Reset);
            }
            RplcType::RpsEnable => events.push(RemoteEvent::Enable),
            RplcType::MekBurnRate => match packet.body.first() {
                Some(&rate) => events.push(RemoteEvent::SetBurnRate(rate)),
                None => logging::debug!(self.log, "burn rate command without a rate dropped"),
            },
            other => {
                logging::debug!(self.log, "unexpected RPLC sub-type on PLC edge";
                                "kind" => ?other)
            }
        }
    }

    fn handle_mgmt<S: FrameSink>(
        &mut self,
        packet: MgmtPacket,
        sink: &mut S,
        now: Instant,
        events: &mut Vec<RemoteEvent>,
    ) {
        match packet.kind {
            MgmtType::RemoteLinked => match packet.link_result() {
                Ok(LinkResult::Allow) => {
                    self.session = Some(Session::new(
                        SUPERVISOR_PEER,
                        SESSION_TIMEOUT,
                        now,
                        &self.log,
                    ));
                    self.status_wait = 0;
                    self.link_wait = 0;

                    logging::info!(self.log, "linked to supervisor");
                    events.push(RemoteEvent::Linked);
                }
                Ok(verdict) => {
                    logging::warn!(self.log, "link refused"; "verdict" => ?verdict)
                }
                Err(err) => {
                    logging::debug!(self.log, "invalid link verdict dropped"; "error" => ?err)
                }
            },
            MgmtType::Close => {
                if self.session.take().is_some() {
                    logging::info!(self.log, "session closed by supervisor");
                    events.push(RemoteEvent::Closed);
                }
            }
            MgmtType::KeepAlive => {
                self.touch(now);

                match packet.keep_alive_ts() {
                    Some(ts) => {
                        self.update_rtt(ts);
                        self.transmit_mgmt(MgmtPacket::make(MgmtType::KeepAlive, packet.body), sink);
                    }
                    None => logging::debug!(self.log, "keep-alive without timestamp dropped"),
                }
            }
            MgmtType::RtuAdvert => {
                logging::debug!(self.log, "RTU advertisement ignored on PLC edge")
            }
        }
    }

    /// Stamps a valid supervisor packet into the session bookkeeping.
    fn touch(&mut self, now: Instant) {
        if let Some(session) = self.session.as_mut() {
            session.touch(now);
        }
    }

    fn update_rtt(&mut self, echoed_ts: u64) {
        if let Some(session) = self.session.as_mut() {
            let sample = timestamp_millis().saturating_sub(echoed_ts);
            session.update_rtt(sample.min(u64::from(u32::max_value())) as u32);
        }
    }

    fn transmit_rplc<S: FrameSink>(&self, packet: RplcPacket, sink: &mut S) {
        if let Err(err) = sink.transmit(ProtocolTag::Rplc, packet.to_payload()) {
            logging::warn!(self.log, "transmit failed"; "error" => ?err);
        }
    }

    fn transmit_mgmt<S: FrameSink>(&self, packet: MgmtPacket, sink: &mut S) {
        if let Err(err) = sink.transmit(ProtocolTag::ScadaMgmt, packet.to_payload()) {
            logging::warn!(self.log, "transmit failed"; "error" => ?err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadmium::net::support::Result;

    const PLC_ID: PlcId = 7;

    /// Records transmitted frames instead of touching a socket.
    struct RecordingSink {
        next_seq: u32,
        sent: Vec<Frame>,
    }

    impl RecordingSink {
        fn new() -> RecordingSink {
            RecordingSink {
                next_seq: 0,
                sent: Vec::new(),
            }
        }

        fn payloads(&self, kind: RplcType) -> Vec<Vec<u32>> {
            self.sent
                .iter()
                .filter(|frame| {
                    frame.protocol() == ProtocolTag::Rplc
                        && frame.data().len() >= 2
                        && frame.data()[1] == u32::from(kind)
                })
                .map(|frame| frame.data().to_vec())
                .collect()
        }
    }

    impl FrameSink for RecordingSink {
        fn transmit(&mut self, protocol: ProtocolTag, payload: Vec<u32>) -> Result<u32> {
            let seq = self.next_seq;
            self.sent.push(Frame::make(seq, protocol, payload));
            self.next_seq += 1;
            Ok(seq)
        }
    }

    fn wire(seq: u32, protocol: ProtocolTag, payload: Vec<u32>) -> WireMessage {
        WireMessage {
            local_port: 16001,
            source_port: 16000,
            reply_port: 16000,
            bytes: Frame::make(seq, protocol, payload).encode(),
            distance: 0,
        }
    }

    fn linked_comms(sink: &mut RecordingSink) -> Comms {
        let mut comms = Comms::new(PLC_ID, None);
        let events = comms.handle_frame(
            &wire(1, ProtocolTag::ScadaMgmt, vec![3]),
            sink,
            Instant::now(),
        );

        assert_eq!(events, vec![RemoteEvent::Linked]);
        comms
    }

    fn healthy_state() -> PlcState {
        PlcState {
            init_ok: true,
            scram: true,
            degraded: false,
            no_reactor: false,
            no_modem: false,
        }
    }

    #[test]
    fn test_link_req_cadence_while_unlinked() {
        let mut comms = Comms::new(PLC_ID, None);
        let mut sink = RecordingSink::new();
        let state = healthy_state();

        for _ in 0..LINK_TICKS * 2 {
            comms.on_tick(&state, IssStatus::empty(), 0, &mut sink);
        }

        let reqs = sink.payloads(RplcType::LinkReq);

        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs[0], vec![7, 0]);
        assert!(sink.payloads(RplcType::Status).is_empty());
    }

    #[test]
    fn test_status_cadence_while_linked() {
        let mut sink = RecordingSink::new();
        let mut comms = linked_comms(&mut sink);
        let state = healthy_state();

        for _ in 0..UPDATE_TICKS * 3 {
            comms.on_tick(&state, IssStatus::TEMP_CRIT, 120, &mut sink);
        }

        let statuses = sink.payloads(RplcType::Status);

        assert_eq!(statuses.len(), 3);
        assert_eq!(
            statuses[0],
            vec![7, 1, 1, 0, IssStatus::TEMP_CRIT.bits(), 120]
        );
        assert!(sink.payloads(RplcType::LinkReq).is_empty());
    }

    #[test]
    fn test_remote_linked_deny_stays_unlinked() {
        let mut comms = Comms::new(PLC_ID, None);
        let mut sink = RecordingSink::new();

        let events = comms.handle_frame(
            &wire(1, ProtocolTag::ScadaMgmt, vec![3, 1]),
            &mut sink,
            Instant::now(),
        );

        assert!(events.is_empty());
        assert!(!comms.is_linked());
    }

    #[test]
    fn test_close_unlinks() {
        let mut sink = RecordingSink::new();
        let mut comms = linked_comms(&mut sink);

        let events = comms.handle_frame(
            &wire(2, ProtocolTag::ScadaMgmt, vec![1]),
            &mut sink,
            Instant::now(),
        );

        assert_eq!(events, vec![RemoteEvent::Closed]);
        assert!(!comms.is_linked());
    }

    #[test]
    fn test_remote_commands_become_events() {
        let mut sink = RecordingSink::new();
        let mut comms = linked_comms(&mut sink);
        let now = Instant::now();

        assert_eq!(
            comms.handle_frame(&wire(2, ProtocolTag::Rplc, vec![7, 5]), &mut sink, now),
            vec![RemoteEvent::Scram]
        );
        assert!(comms.is_scrammed());

        assert_eq!(
            comms.handle_frame(&wire(3, ProtocolTag::Rplc, vec![7, 3, 150]), &mut sink, now),
            vec![RemoteEvent::SetBurnRate(150)]
        );

        assert_eq!(
            comms.handle_frame(&wire(4, ProtocolTag::Rplc, vec![7, 8]), &mut sink, now),
            vec![RemoteEvent::Reset]
        );
        assert!(!comms.is_scrammed());

        assert_eq!(
            comms.handle_frame(&wire(5, ProtocolTag::Rplc, vec![7, 4]), &mut sink, now),
            vec![RemoteEvent::Enable]
        );
    }

    #[test]
    fn test_mismatched_plc_id_dropped() {
        let mut sink = RecordingSink::new();
        let mut comms = linked_comms(&mut sink);

        let events = comms.handle_frame(
            &wire(2, ProtocolTag::Rplc, vec![8, 5]),
            &mut sink,
            Instant::now(),
        );

        assert!(events.is_empty());
        assert!(!comms.is_scrammed());
    }

    #[test]
    fn test_rerun_sequence_dropped_while_linked() {
        let mut sink = RecordingSink::new();
        let mut comms = linked_comms(&mut sink);
        let now = Instant::now();

        comms.handle_frame(&wire(10, ProtocolTag::Rplc, vec![7, 5]), &mut sink, now);
        assert!(comms.is_scrammed());

        // A rerun of an earlier reset must not clear the remote scram.
        let events = comms.handle_frame(&wire(3, ProtocolTag::Rplc, vec![7, 8]), &mut sink, now);

        assert!(events.is_empty());
        assert!(comms.is_scrammed());
    }

    #[test]
    fn test_keep_alive_echo_and_rtt() {
        let mut sink = RecordingSink::new();
        let mut comms = linked_comms(&mut sink);

        let ts = timestamp_millis().saturating_sub(40);
        let packet = RplcPacket::keep_alive(PLC_ID, ts);
        comms.handle_frame(
            &wire(2, ProtocolTag::Rplc, packet.to_payload()),
            &mut sink,
            Instant::now(),
        );

        let echoes = sink.payloads(RplcType::KeepAlive);
        assert_eq!(echoes.len(), 1);
        assert_eq!(echoes[0], packet.to_payload());

        // The sample is taken against the wall clock; allow slack.
        assert!(comms.rtt_ms() >= 40);
        assert!(comms.rtt_ms() < 5000);
    }

    #[test]
    fn test_watchdog_expires_after_silence() {
        let mut sink = RecordingSink::new();
        let start = Instant::now();
        let mut comms = Comms::new(PLC_ID, None);

        comms.handle_frame(&wire(1, ProtocolTag::ScadaMgmt, vec![3]), &mut sink, start);

        assert!(!comms.watchdog_expired(start + Duration::from_millis(2950)));

        // Traffic one tick before the deadline keeps the session alive.
        comms.handle_frame(
            &wire(2, ProtocolTag::Rplc, vec![7, 4]),
            &mut sink,
            start + Duration::from_millis(2950),
        );

        assert!(!comms.watchdog_expired(start + Duration::from_secs(3)));
        assert!(comms.watchdog_expired(start + Duration::from_millis(2950) + SESSION_TIMEOUT));
    }

    #[test]
    fn test_malformed_frames_do_not_disturb_state() {
        let mut sink = RecordingSink::new();
        let mut comms = linked_comms(&mut sink);

        let garbage = WireMessage {
            local_port: 16001,
            source_port: 16000,
            reply_port: 16000,
            bytes: vec![1, 2, 3],
            distance: 0,
        };

        assert!(comms
            .handle_frame(&garbage, &mut sink, Instant::now())
            .is_empty());
        assert!(comms.is_linked());
        assert!(!comms.is_scrammed());
    }
}
