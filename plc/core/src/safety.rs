use crate::iss::{Iss, IssCheck, IssStatus, SensorReadings};
use crate::peripheral::{Device, PeripheralError, PeripheralKind, PeripheralResult, Peripherals};
use graphite::logging;

/// Snapshot of the node's safety-relevant state, produced fresh by each
/// tick's reaction.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PlcState {
    /// Boot completed with the required periphery present.
    pub init_ok: bool,
    /// Latching emergency stop. Cleared only by an accepted reset.
    pub scram: bool,
    /// A required peripheral is missing.
    pub degraded: bool,
    pub no_reactor: bool,
    pub no_modem: bool,
}

/// One peripheral change to reconcile with the safety obligations.
#[derive(Debug)]
pub enum PeripheralChange {
    Attach(Device),
    Detach(PeripheralKind),
}

/// The PLC safety core: owns the latching SCRAM flag, the safety system
/// and the peripheral registry, and enforces the per-tick reaction
/// order.
pub struct SafetyCore {
    networked: bool,
    state: PlcState,
    iss: Iss,
    peripherals: Peripherals,
    last_readings: SensorReadings,
    burn_rate: u32,
    log: logging::Logger,
}

impl SafetyCore {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        networked: bool,
        peripherals: Peripherals,
        log: L,
    ) -> SafetyCore {
        let core_log = match log.into() {
            Some(log) => log.new(logging::o!()),
            _ => logging::Logger::root(logging::Discard, logging::o!()),
        };

        let no_reactor = !peripherals.has_reactor();
        let no_modem = !peripherals.has_modem();
        let degraded = no_reactor || (networked && no_modem);

        let state = PlcState {
            init_ok: !degraded,
            // The reactor stays commanded off until an operator says
            // otherwise.
            scram: true,
            degraded,
            no_reactor,
            no_modem,
        };

        logging::info!(core_log, "safety core booted";
                       "networked" => networked,
                       "degraded" => degraded);

        SafetyCore {
            networked,
            state,
            iss: Iss::new(&core_log),
            peripherals,
            last_readings: SensorReadings::default(),
            burn_rate: 0,
            log: core_log,
        }
    }

    #[inline]
    pub fn state(&self) -> PlcState {
        self.state
    }

    #[inline]
    pub fn iss_status(&self) -> IssStatus {
        self.iss.status()
    }

    #[inline]
    pub fn iss_tripped(&self) -> bool {
        self.iss.tripped()
    }

    #[inline]
    pub fn burn_rate(&self) -> u32 {
        self.burn_rate
    }

    fn recompute_degraded(&mut self) {
        let was = self.state.degraded;
        self.state.degraded = self.state.no_reactor || (self.networked && self.state.no_modem);

        // Healthy again after a degraded stretch: back to boot defaults.
        if was && !self.state.degraded {
            self.state.init_ok = true;
            self.state.scram = true;
        }
    }

    /// Latches the emergency stop. Survives every event except an
    /// accepted operator reset.
    pub fn latch_scram(&mut self, reason: &'static str) {
        if !self.state.scram {
            logging::error!(self.log, "scram latched";
                            "alert" => true,
                            "reason" => reason);
        }
        self.state.scram = true;
    }

    /// Tick phase 1: while the latch is set and the reactor still
    /// reports running, command it off. Reporting is gated so a
    /// detached handle does not spam at loop rate.
    pub fn retry_scram(&mut self) {
        if !self.state.init_ok {
            return;
        }

        self.peripherals.quiet(true);

        if self.state.scram {
            if let Ok(true) = self.peripherals.with_reactor(|r| r.running()) {
                let _ = self.peripherals.with_reactor(|r| r.scram());
            }
        }

        self.peripherals.quiet(false);
    }

    /// Tick phase 2: reconcile one peripheral change with the safety
    /// obligations.
    pub fn apply_change(&mut self, change: PeripheralChange) {
        match change {
            PeripheralChange::Attach(Device::Reactor(handle)) => {
                self.peripherals.attach_reactor(handle);
                self.state.no_reactor = false;
                // A reattached reactor is an unknown quantity: latch and
                // shut it down before anything else touches it.
                self.latch_scram("reactor reconnected");
                let _ = self.peripherals.with_reactor(|r| r.scram());
                self.recompute_degraded();
            }
            PeripheralChange::Attach(Device::Modem) => {
                self.peripherals.attach_modem();
                self.state.no_modem = false;
                self.recompute_degraded();
            }
            PeripheralChange::Detach(PeripheralKind::Reactor) => {
                self.peripherals.detach(PeripheralKind::Reactor);
                self.state.no_reactor = true;
                self.latch_scram("reactor lost");
                self.recompute_degraded();
            }
            PeripheralChange::Detach(PeripheralKind::Modem) => {
                self.peripherals.detach(PeripheralKind::Modem);
                self.state.no_modem = true;

                if self.networked && self.state.init_ok {
                    self.latch_scram("modem lost");
                    let _ = self.peripherals.with_reactor(|r| r.scram());
                }

                self.recompute_degraded();
            }
        }
    }

    /// Tick phase 3: run the safety check, or attempt a shutdown and
    /// skip the check while degraded.
    pub fn check_safety(&mut self) -> Option<IssCheck> {
        if self.state.degraded {
            if self.state.init_ok {
                self.peripherals.quiet(true);
                let _ = self.peripherals.with_reactor(|r| r.scram());
                self.peripherals.quiet(false);
            }
            return None;
        }

        match self.peripherals.with_reactor(|r| r.sensors()) {
            Ok(readings) => self.last_readings = readings,
            Err(_) => self.iss.trip(IssStatus::FAULT),
        }

        let check = self.iss.check(&self.last_readings);

        if check.tripped {
            self.latch_scram("safety system trip");
        }

        Some(check)
    }

    /// Remote RPS_SCRAM: a manual trip plus an immediate attempt.
    pub fn command_scram(&mut self) {
        self.iss.trip(IssStatus::MANUAL);
        self.latch_scram("remote scram");
        let _ = self.peripherals.with_reactor(|r| r.scram());
    }

    /// Remote RPS_ENABLE: refused while latched or degraded.
    pub fn command_enable(&mut self) -> PeripheralResult<()> {
        if self.state.scram || self.state.degraded {
            return Err(PeripheralError::Faulted);
        }

        self.peripherals.with_reactor(|r| r.activate())
    }

    /// Remote MEK_BURN_RATE: refused while latched or degraded.
    pub fn command_burn_rate(&mut self, rate: u32) -> PeripheralResult<()> {
        if self.state.scram || self.state.degraded {
            return Err(PeripheralError::Faulted);
        }

        self.peripherals.with_reactor(|r| r.set_burn_rate(rate))?;
        self.burn_rate = rate;
        Ok(())
    }

    /// Remote RPS_RESET: the latch clears only when the safety system
    /// reports clean on this same tick. Returns whether it cleared plus
    /// the check that decided it.
    pub fn command_reset(&mut self) -> (bool, IssCheck) {
        if self.state.degraded {
            logging::warn!(self.log, "reset refused while degraded");
            return (
                false,
                IssCheck {
                    tripped: self.iss.tripped(),
                    status: self.iss.status(),
                    first_trip: false,
                },
            );
        }

        self.iss.clear();

        match self.peripherals.with_reactor(|r| r.sensors()) {
            Ok(readings) => self.last_readings = readings,
            Err(_) => self.iss.trip(IssStatus::FAULT),
        }

        let check = self.iss.check(&self.last_readings);

        if check.tripped {
            logging::warn!(self.log, "reset refused, trip conditions persist";
                           "status" => ?check.status);
            (false, check)
        } else {
            self.state.scram = false;
            logging::info!(self.log, "scram latch cleared by operator reset");
            (true, check)
        }
    }

    /// Session timeout: latch and record the cause.
    pub fn timeout_trip(&mut self) {
        self.iss.trip(IssStatus::TIMEOUT);
        self.latch_scram("server timeout");
    }

    /// One explicit shutdown attempt (terminate path).
    pub fn attempt_scram(&mut self) {
        self.latch_scram("terminate");
        let _ = self.peripherals.with_reactor(|r| r.scram());
    }

    /// Structure telemetry words, when the reactor can report them.
    pub fn structure_words(&mut self) -> Option<Vec<u32>> {
        self.peripherals.with_reactor(|r| r.structure()).ok()
    }
}
