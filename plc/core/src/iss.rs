use bitflags::bitflags;
use graphite::logging;

// Trip thresholds applied to the raw sensor snapshot.
const DAMAGE_LIMIT_PCT: u32 = 90;
const TEMP_LIMIT_K: u32 = 1200;
const COOLANT_FLOOR_PCT: u32 = 2;
const WASTE_LIMIT_PCT: u32 = 80;
const HCOOLANT_LIMIT_PCT: u32 = 95;

bitflags! {
    /// Trip causes tracked by the independent safety system. Carried on
    /// the wire as a single status word.
    pub struct IssStatus: u32 {
        const DAMAGE_CRIT = 1 << 0;
        const TEMP_CRIT   = 1 << 1;
        const NO_COOLANT  = 1 << 2;
        const EX_WASTE    = 1 << 3;
        const EX_HCOOLANT = 1 << 4;
        const NO_FUEL     = 1 << 5;
        const FAULT       = 1 << 6;
        const TIMEOUT     = 1 << 7;
        const MANUAL      = 1 << 8;
    }
}

/// Opaque sensor snapshot fed into the safety check each tick. The core
/// never samples the world itself; whatever owns the reactor handle
/// produces these.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SensorReadings {
    pub damage_pct: u32,
    pub temp_k: u32,
    pub coolant_pct: u32,
    pub waste_pct: u32,
    pub heated_coolant_pct: u32,
    pub fuel_pct: u32,
}

impl Default for SensorReadings {
    fn default() -> SensorReadings {
        SensorReadings {
            damage_pct: 0,
            temp_k: 300,
            coolant_pct: 100,
            waste_pct: 0,
            heated_coolant_pct: 0,
            fuel_pct: 100,
        }
    }
}

/// Result of one safety evaluation.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct IssCheck {
    pub tripped: bool,
    pub status: IssStatus,
    /// True only on the rising edge from not-tripped to tripped. Used to
    /// emit exactly one alarm per edge.
    pub first_trip: bool,
}

/// The independent safety system: evaluates trip causes from the sensor
/// snapshot plus any externally forced causes (timeout, manual, fault).
pub struct Iss {
    forced: IssStatus,
    status: IssStatus,
    was_tripped: bool,
    log: logging::Logger,
}

impl Iss {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(log: L) -> Iss {
        let iss_log = match log.into() {
            Some(log) => log.new(logging::o!()),
            _ => logging::Logger::root(logging::Discard, logging::o!()),
        };

        Iss {
            forced: IssStatus::empty(),
            status: IssStatus::empty(),
            was_tripped: false,
            log: iss_log,
        }
    }

    /// Latches an externally forced trip cause. Forced causes persist
    /// until an accepted reset.
    pub fn trip(&mut self, cause: IssStatus) {
        logging::debug!(self.log, "forced trip"; "cause" => ?cause);
        self.forced |= cause;
    }

    /// Evaluates the snapshot against the trip thresholds and reports,
    /// tracking the rising edge.
    pub fn check(&mut self, readings: &SensorReadings) -> IssCheck {
        let mut status = self.forced;

        if readings.damage_pct >= DAMAGE_LIMIT_PCT {
            status |= IssStatus::DAMAGE_CRIT;
        }
        if readings.temp_k >= TEMP_LIMIT_K {
            status |= IssStatus::TEMP_CRIT;
        }
        if readings.coolant_pct <= COOLANT_FLOOR_PCT {
            status |= IssStatus::NO_COOLANT;
        }
        if readings.waste_pct >= WASTE_LIMIT_PCT {
            status |= IssStatus::EX_WASTE;
        }
        if readings.heated_coolant_pct >= HCOOLANT_LIMIT_PCT {
            status |= IssStatus::EX_HCOOLANT;
        }
        if readings.fuel_pct == 0 {
            status |= IssStatus::NO_FUEL;
        }

        let tripped = !status.is_empty();
        let first_trip = tripped && !self.was_tripped;

        self.was_tripped = tripped;
        self.status = status;

        IssCheck {
            tripped,
            status,
            first_trip,
        }
    }

    #[inline]
    pub fn status(&self) -> IssStatus {
        self.status
    }

    #[inline]
    pub fn tripped(&self) -> bool {
        self.was_tripped
    }

    /// Drops every latched cause and the edge tracker. Only valid as
    /// part of an operator reset; persisting conditions re-trip on the
    /// next check.
    pub fn clear(&mut self) {
        self.forced = IssStatus::empty();
        self.status = IssStatus::empty();
        self.was_tripped = false;
    }
}
