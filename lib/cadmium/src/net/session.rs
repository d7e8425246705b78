use crate::net::packet::LinkResult;
use graphite::choose;
use graphite::logging;
use hashbrown::HashMap;
use indexmap::IndexSet;
use std::time::{Duration, Instant};

/// Single-shot session timer. The deadline is observed from the tick
/// loop rather than a background thread; once it fires, repeated
/// observations stay quiet until the next feed.
#[derive(Debug, Clone)]
pub struct Watchdog {
    duration: Duration,
    deadline: Instant,
    fired: bool,
}

impl Watchdog {
    #[inline]
    pub fn new(duration: Duration, now: Instant) -> Watchdog {
        Watchdog {
            duration,
            deadline: now + duration,
            fired: false,
        }
    }

    /// Pushes the deadline out by the full duration and re-arms.
    #[inline]
    pub fn feed(&mut self, now: Instant) {
        self.deadline = now + self.duration;
        self.fired = false;
    }

    #[inline]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    #[inline]
    pub fn has_fired(&self) -> bool {
        self.fired
    }

    /// True exactly once, at the first observation past the deadline.
    pub fn expired(&mut self, now: Instant) -> bool {
        if self.fired {
            return false;
        }

        if now >= self.deadline {
            self.fired = true;
            return true;
        }

        false
    }
}

/// Per-peer link state: sequence expectations, RTT estimate and the
/// connection watchdog. Created on a successful link exchange and
/// destroyed on close, timeout or explicit unlink.
pub struct Session {
    peer_id: u32,
    linked: bool,
    last_rx: Instant,
    rtt_ms: u32,
    highest_seq: Option<u32>,
    watchdog: Watchdog,
    log: logging::Logger,
}

impl Session {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        peer_id: u32,
        timeout: Duration,
        now: Instant,
        log: L,
    ) -> Session {
        let session_log = match log.into() {
            Some(log) => log.new(logging::o!("peer" => peer_id)),
            _ => logging::Logger::root(logging::Discard, logging::o!()),
        };

        Session {
            peer_id,
            linked: true,
            last_rx: now,
            rtt_ms: 0,
            highest_seq: None,
            watchdog: Watchdog::new(timeout, now),
            log: session_log,
        }
    }

    #[inline]
    pub fn peer_id(&self) -> u32 {
        self.peer_id
    }

    #[inline]
    pub fn linked(&self) -> bool {
        self.linked
    }

    #[inline]
    pub fn unlink(&mut self) {
        self.linked = false;
    }

    #[inline]
    pub fn rtt_ms(&self) -> u32 {
        self.rtt_ms
    }

    #[inline]
    pub fn last_rx(&self) -> Instant {
        self.last_rx
    }

    /// Stamps a valid inbound packet and feeds the watchdog.
    #[inline]
    pub fn touch(&mut self, now: Instant) {
        self.last_rx = now;
        self.watchdog.feed(now);
    }

    /// Folds a new RTT sample into the smoothed estimate.
    #[inline]
    pub fn update_rtt(&mut self, sample_ms: u32) {
        let smoothed = ((u64::from(self.rtt_ms) * 7 + u64::from(sample_ms)) / 8) as u32;
        self.rtt_ms = choose!(self.rtt_ms == 0 => sample_ms, smoothed);
    }

    /// Accepts or drops an inbound sequence number. The highest number
    /// seen is tracked; strictly lower reruns are silently dropped while
    /// the session is linked.
    pub fn accept_seq(&mut self, seq: u32) -> bool {
        match self.highest_seq {
            Some(highest) if self.linked && seq < highest => {
                logging::debug!(self.log, "dropping rerun frame";
                                "seq" => seq,
                                "highest" => highest);
                false
            }
            Some(highest) => {
                if seq > highest {
                    self.highest_seq = Some(seq);
                }
                true
            }
            None => {
                self.highest_seq = Some(seq);
                true
            }
        }
    }

    #[inline]
    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    #[inline]
    pub fn watchdog_mut(&mut self) -> &mut Watchdog {
        &mut self.watchdog
    }
}

/// Hub-side registry of linked peers with link arbitration and a
/// watchdog sweep.
pub struct SessionRegistry {
    timeout: Duration,
    capacity: usize,
    sessions: HashMap<u32, Session>,
    live: IndexSet<u32>,
    log: logging::Logger,
}

impl SessionRegistry {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        timeout: Duration,
        capacity: usize,
        log: L,
    ) -> SessionRegistry {
        let registry_log = match log.into() {
            Some(log) => log.new(logging::o!()),
            _ => logging::Logger::root(logging::Discard, logging::o!()),
        };

        SessionRegistry {
            timeout,
            capacity,
            sessions: HashMap::new(),
            live: IndexSet::new(),
            log: registry_log,
        }
    }

    /// Arbitrates a link request from `peer_id`.
    pub fn link(&mut self, peer_id: u32, now: Instant) -> LinkResult {
        if self.sessions.contains_key(&peer_id) {
            logging::warn!(self.log, "link collision"; "peer" => peer_id);
            return LinkResult::Collision;
        }

        if self.sessions.len() >= self.capacity {
            logging::warn!(self.log, "registry full, link denied"; "peer" => peer_id);
            return LinkResult::Deny;
        }

        self.sessions
            .insert(peer_id, Session::new(peer_id, self.timeout, now, &self.log));
        self.live.insert(peer_id);

        logging::debug!(self.log, "peer linked"; "peer" => peer_id);

        LinkResult::Allow
    }

    #[inline]
    pub fn get_mut(&mut self, peer_id: u32) -> Option<&mut Session> {
        self.sessions.get_mut(&peer_id)
    }

    /// Destroys the peer's session. Returns false when no session existed.
    pub fn close(&mut self, peer_id: u32) -> bool {
        self.live.remove(&peer_id);

        match self.sessions.remove(&peer_id) {
            Some(_) => {
                logging::debug!(self.log, "peer session closed"; "peer" => peer_id);
                true
            }
            None => false,
        }
    }

    /// Observes every live watchdog, removing and returning the peers
    /// whose sessions timed out.
    pub fn sweep(&mut self, now: Instant) -> Vec<u32> {
        let sessions = &mut self.sessions;
        let mut expired = Vec::new();

        self.live.retain(|&peer_id| {
            let fired = match sessions.get_mut(&peer_id) {
                Some(session) => session.watchdog_mut().expired(now),
                None => false,
            };

            if fired {
                sessions.remove(&peer_id);
                expired.push(peer_id);
            }

            !fired
        });

        expired
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[inline]
    pub fn contains(&self, peer_id: u32) -> bool {
        self.sessions.contains_key(&peer_id)
    }
}
