use crate::iss::SensorReadings;
use graphite::logging;
use std::fmt;

/// Failure of a call into a peripheral handle. Peripheral loss is a
/// state transition, not an exception; callers retry next tick.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PeripheralError {
    /// Handle is no longer backed by a mounted device.
    Detached,
    /// Device refused or faulted on the operation.
    Faulted,
}

pub type PeripheralResult<T> = Result<T, PeripheralError>;

/// Control surface of the reactor the safety core drives. Every call
/// can fail once the underlying device is detached.
pub trait Reactor: Send {
    /// True while the reactor is burning.
    fn running(&self) -> PeripheralResult<bool>;
    /// Commands an emergency shutdown.
    fn scram(&mut self) -> PeripheralResult<()>;
    /// Starts the reactor at the configured burn rate.
    fn activate(&mut self) -> PeripheralResult<()>;
    fn set_burn_rate(&mut self, rate: u32) -> PeripheralResult<()>;
    /// Latest sensor snapshot for the safety check.
    fn sensors(&self) -> PeripheralResult<SensorReadings>;
    /// Opaque formed-structure words for structure telemetry.
    fn structure(&self) -> PeripheralResult<Vec<u32>>;
}

/// Peripheral kinds the PLC requires to operate.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PeripheralKind {
    Reactor,
    Modem,
}

impl PeripheralKind {
    pub fn from_name(name: &str) -> Option<PeripheralKind> {
        match name {
            "reactor" => Some(PeripheralKind::Reactor),
            "modem" => Some(PeripheralKind::Modem),
            _ => None,
        }
    }
}

/// A freshly mounted device delivered by a peripheral attach event.
pub enum Device {
    Reactor(Box<dyn Reactor>),
    Modem,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Device::Reactor(_) => f.write_str("Reactor(..)"),
            Device::Modem => f.write_str("Modem"),
        }
    }
}

/// Owned registry of the node's peripheral handles. Attach and detach
/// flow in as scheduler events; the safety core reaches devices only
/// through here. The quiet gate silences call-failure reporting while a
/// latched scram hammers a detached handle at loop rate.
pub struct Peripherals {
    reactor: Option<Box<dyn Reactor>>,
    modem_attached: bool,
    quiet: bool,
    log: logging::Logger,
}

impl Peripherals {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(log: L) -> Peripherals {
        let periph_log = match log.into() {
            Some(log) => log.new(logging::o!()),
            _ => logging::Logger::root(logging::Discard, logging::o!()),
        };

        Peripherals {
            reactor: None,
            modem_attached: false,
            quiet: false,
            log: periph_log,
        }
    }

    #[inline]
    pub fn has_reactor(&self) -> bool {
        self.reactor.is_some()
    }

    #[inline]
    pub fn has_modem(&self) -> bool {
        self.modem_attached
    }

    pub fn attach_reactor(&mut self, handle: Box<dyn Reactor>) {
        logging::info!(self.log, "reactor attached");
        self.reactor = Some(handle);
    }

    pub fn attach_modem(&mut self) {
        logging::info!(self.log, "modem attached");
        self.modem_attached = true;
    }

    pub fn detach(&mut self, kind: PeripheralKind) {
        logging::warn!(self.log, "peripheral detached"; "kind" => ?kind);

        match kind {
            PeripheralKind::Reactor => self.reactor = None,
            PeripheralKind::Modem => self.modem_attached = false,
        }
    }

    /// Toggles failure reporting for reactor calls.
    #[inline]
    pub fn quiet(&mut self, on: bool) {
        self.quiet = on;
    }

    /// Runs an operation against the reactor handle. A missing handle
    /// fails as `Detached`; failures are logged unless quieted.
    pub fn with_reactor<T, F>(&mut self, op: F) -> PeripheralResult<T>
    where
        F: FnOnce(&mut dyn Reactor) -> PeripheralResult<T>,
    {
        let result = match self.reactor.as_mut() {
            Some(handle) => op(handle.as_mut()),
            None => Err(PeripheralError::Detached),
        };

        if let Err(err) = &result {
            if !self.quiet {
                logging::warn!(self.log, "reactor call failed"; "error" => ?err);
            }
        }

        result
    }
}
