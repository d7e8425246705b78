use crate::comms::{Comms, RemoteEvent};
use crate::peripheral::{Device, PeripheralKind};
use crate::safety::{PeripheralChange, SafetyCore};
use cadmium::net::radio::{FrameSink, Radio};
use cadmium::net::support::{Result, WireMessage};
use graphite::logging;
use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::{Duration, Instant};

/// Nominal loop period (20 Hz).
pub const TICK: Duration = Duration::from_millis(50);

/// Events multiplexed into the single control thread.
#[derive(Debug)]
pub enum Event {
    LoopTick,
    WatchdogTimer,
    ModemMessage(WireMessage),
    PeripheralAttach(Device),
    PeripheralDetach(PeripheralKind),
    Terminate,
}

/// Source of scheduler events. Production multiplexes the radio socket,
/// the peripheral/terminate channel and the tick deadline; tests script
/// the sequence instead.
pub trait EventSource {
    /// Blocks for the next event, no longer than `timeout`. `None`
    /// means the wait timed out.
    fn next_event(&mut self, timeout: Duration) -> Option<Event>;
}

/// The 20 Hz cooperative loop. Sole owner of the PLC state: every
/// mutation happens inside one `step` between two event waits.
pub struct Scheduler<P: EventSource + FrameSink> {
    core: SafetyCore,
    comms: Comms,
    port: P,
    pending: VecDeque<PeripheralChange>,
    next_tick: Instant,
    log: logging::Logger,
}

impl<P: EventSource + FrameSink> Scheduler<P> {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        core: SafetyCore,
        comms: Comms,
        port: P,
        log: L,
    ) -> Scheduler<P> {
        let sched_log = match log.into() {
            Some(log) => log.new(logging::o!()),
            _ => logging::Logger::root(logging::Discard, logging::o!()),
        };

        Scheduler {
            core,
            comms,
            port,
            pending: VecDeque::new(),
            next_tick: Instant::now() + TICK,
            log: sched_log,
        }
    }

    #[inline]
    pub fn core(&self) -> &SafetyCore {
        &self.core
    }

    #[inline]
    pub fn comms(&self) -> &Comms {
        &self.comms
    }

    /// Runs until the operator terminates the node.
    pub fn run(&mut self) {
        self.next_tick = Instant::now() + TICK;

        loop {
            let now = Instant::now();

            // The watchdog deadline is observed here, at the top of the
            // iteration, never from a background thread.
            let event = if self.comms.watchdog_expired(now) {
                Some(Event::WatchdogTimer)
            } else if now >= self.next_tick {
                Some(Event::LoopTick)
            } else {
                self.port.next_event(self.wait_bound(now))
            };

            let proceed = match event {
                Some(event) => self.step(event, Instant::now()),
                None => true,
            };

            if !proceed {
                break;
            }
        }
    }

    /// Longest the port may sleep: the tick deadline, shortened by an
    /// armed watchdog.
    fn wait_bound(&self, now: Instant) -> Duration {
        let mut deadline = self.next_tick;

        if let Some(wd_deadline) = self.comms.watchdog_deadline() {
            if wd_deadline < deadline {
                deadline = wd_deadline;
            }
        }

        deadline
            .checked_duration_since(now)
            .unwrap_or_else(|| Duration::from_millis(0))
    }

    /// One scheduler iteration. Peripheral plug events are queued and
    /// consumed one per iteration ahead of the safety check; everything
    /// else dispatches after it. Returns false when the node must exit.
    pub fn step(&mut self, event: Event, now: Instant) -> bool {
        let event = match event {
            Event::PeripheralAttach(device) => {
                self.pending.push_back(PeripheralChange::Attach(device));
                None
            }
            Event::PeripheralDetach(kind) => {
                self.pending.push_back(PeripheralChange::Detach(kind));
                None
            }
            other => Some(other),
        };

        // 1. Scram retry under the quiet gate.
        self.core.retry_scram();

        // 2. One peripheral change, so the safety check never sees a
        //    half torn down periphery.
        if let Some(change) = self.pending.pop_front() {
            self.core.apply_change(change);
        }

        // 3. Safety check ahead of any protocol dispatch.
        if let Some(check) = self.core.check_safety() {
            if check.first_trip {
                println!("[alert] safety system trip: {:?}", check.status);
                logging::error!(self.log, "safety system trip";
                                "alert" => true,
                                "status" => ?check.status);
                self.comms.send_iss_alarm(check.status, &mut self.port);
            }
        }

        // 4. Dispatch the current event.
        match event {
            Some(Event::LoopTick) => {
                let state = self.core.state();
                self.comms.on_tick(
                    &state,
                    self.core.iss_status(),
                    self.core.burn_rate(),
                    &mut self.port,
                );
                self.next_tick = now + TICK;
            }
            Some(Event::WatchdogTimer) => {
                println!("[alert] server timeout, reactor disabled");
                logging::error!(self.log, "server timeout, reactor disabled"; "alert" => true);
                self.comms.unlink();
                self.core.timeout_trip();
            }
            Some(Event::ModemMessage(wire)) => {
                if !self.core.state().no_modem {
                    let remote_events = self.comms.handle_frame(&wire, &mut self.port, now);

                    for remote in remote_events {
                        self.apply_remote(remote);
                    }
                }
            }
            Some(Event::Terminate) => {
                self.core.attempt_scram();
                println!("[alert] terminate requested, exiting");
                logging::error!(self.log, "terminate requested, exiting"; "alert" => true);
                return false;
            }
            Some(Event::PeripheralAttach(_)) | Some(Event::PeripheralDetach(_)) | None => {}
        }

        true
    }

    fn apply_remote(&mut self, event: RemoteEvent) {
        match event {
            RemoteEvent::Scram => {
                self.core.command_scram();
                self.comms.send_rps_status(
                    self.core.iss_tripped(),
                    self.core.iss_status(),
                    &mut self.port,
                );
            }
            RemoteEvent::Enable => {
                if let Err(err) = self.core.command_enable() {
                    logging::warn!(self.log, "enable refused"; "error" => ?err);
                }

                self.comms.send_rps_status(
                    self.core.iss_tripped(),
                    self.core.iss_status(),
                    &mut self.port,
                );
            }
            RemoteEvent::Reset => {
                let (cleared, check) = self.core.command_reset();

                if check.first_trip {
                    self.comms.send_iss_alarm(check.status, &mut self.port);
                }
                if !cleared {
                    logging::warn!(self.log, "reset refused"; "status" => ?check.status);
                }

                self.comms
                    .send_rps_status(check.tripped, check.status, &mut self.port);
            }
            RemoteEvent::SetBurnRate(rate) => {
                if let Err(err) = self.core.command_burn_rate(rate) {
                    logging::warn!(self.log, "burn rate change refused";
                                   "rate" => rate,
                                   "error" => ?err);
                }
            }
            RemoteEvent::Linked => {
                if let Some(words) = self.core.structure_words() {
                    self.comms.send_struct(words, &mut self.port);
                }
            }
            RemoteEvent::Closed => {}
        }
    }
}

/// Production port: the radio socket plus the channel carrying
/// peripheral plug events and the operator terminate.
pub struct RadioPort {
    radio: Radio,
    control: Receiver<Event>,
    buffered: VecDeque<WireMessage>,
    log: logging::Logger,
}

impl RadioPort {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        radio: Radio,
        control: Receiver<Event>,
        log: L,
    ) -> RadioPort {
        let port_log = match log.into() {
            Some(log) => log.new(logging::o!()),
            _ => logging::Logger::root(logging::Discard, logging::o!()),
        };

        RadioPort {
            radio,
            control,
            buffered: VecDeque::new(),
            log: port_log,
        }
    }

    fn drain_control(&mut self) -> Option<Event> {
        match self.control.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

impl EventSource for RadioPort {
    fn next_event(&mut self, timeout: Duration) -> Option<Event> {
        // Control events (terminate, plugs) take priority over traffic.
        if let Some(event) = self.drain_control() {
            return Some(event);
        }
        if let Some(wire) = self.buffered.pop_front() {
            return Some(Event::ModemMessage(wire));
        }

        match self.radio.poll_wire(timeout) {
            Ok(wires) => self.buffered.extend(wires),
            Err(err) => logging::warn!(self.log, "radio poll failed"; "error" => ?err),
        }

        if let Some(event) = self.drain_control() {
            return Some(event);
        }

        self.buffered.pop_front().map(Event::ModemMessage)
    }
}

impl FrameSink for RadioPort {
    fn transmit(&mut self, protocol: cadmium::net::frame::ProtocolTag, payload: Vec<u32>) -> Result<u32> {
        self.radio.transmit(protocol, payload)
    }
}
