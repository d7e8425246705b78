use crate::net::frame::{Frame, ProtocolTag};
use crate::net::support::{Result, WireMessage};
use graphite::logging;
use mio::net::UdpSocket;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

const RADIO_TOKEN: mio::Token = mio::Token(0);
const MAX_DATAGRAM: usize = 4096;

/// Seam between the protocol layers and the transmitting endpoint, so
/// the comms logic can be exercised against a recording sink.
pub trait FrameSink {
    /// Stamps the payload with the next sequence number and transmits
    /// it. Returns the sequence number used.
    fn transmit(&mut self, protocol: ProtocolTag, payload: Vec<u32>) -> Result<u32>;
}

/// Datagram radio endpoint. Owns the socket, the poll and the per-node
/// outbound sequence counter.
pub struct Radio {
    socket: UdpSocket,
    poll: mio::Poll,
    events: mio::Events,
    local_port: u16,
    peer: SocketAddr,
    next_seq: u32,
    log: logging::Logger,
}

impl Radio {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        listen_port: u16,
        peer: SocketAddr,
        log: L,
    ) -> Result<Radio> {
        let radio_log = match log.into() {
            Some(log) => log.new(logging::o!()),
            _ => logging::Logger::root(logging::Discard, logging::o!()),
        };

        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), listen_port);
        let socket = UdpSocket::bind(&addr)?;
        let local_port = socket.local_addr()?.port();

        let poll = mio::Poll::new()?;
        poll.register(
            &socket,
            RADIO_TOKEN,
            mio::Ready::readable(),
            mio::PollOpt::edge(),
        )?;

        logging::debug!(radio_log, "radio bound";
                        "local_port" => local_port,
                        "peer" => %peer);

        Ok(Radio {
            socket,
            poll,
            events: mio::Events::with_capacity(64),
            local_port,
            peer,
            next_seq: 0,
            log: radio_log,
        })
    }

    #[inline]
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    #[inline]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Waits up to `timeout` for traffic and drains every queued
    /// datagram into wire messages.
    pub fn poll_wire(&mut self, timeout: Duration) -> Result<Vec<WireMessage>> {
        self.poll.poll(&mut self.events, Some(timeout))?;

        let mut received = Vec::new();
        let mut buf = [0u8; MAX_DATAGRAM];

        for event in &self.events {
            if event.token() != RADIO_TOKEN || !event.readiness().is_readable() {
                continue;
            }

            // Edge triggered: drain the socket dry on every wakeup.
            loop {
                match self.socket.recv_from(&mut buf) {
                    Ok((len, source)) => {
                        logging::trace!(self.log, "datagram received";
                                        "source" => %source,
                                        "len" => len);

                        received.push(WireMessage {
                            local_port: self.local_port,
                            source_port: source.port(),
                            reply_port: source.port(),
                            bytes: buf[..len].to_vec(),
                            distance: 0,
                        });
                    }
                    Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(err) => return Err(err.into()),
                }
            }
        }

        Ok(received)
    }
}

impl FrameSink for Radio {
    fn transmit(&mut self, protocol: ProtocolTag, payload: Vec<u32>) -> Result<u32> {
        let seq = self.next_seq;
        let frame = Frame::make(seq, protocol, payload);

        self.socket.send_to(&frame.encode(), &self.peer)?;
        self.next_seq = self.next_seq.wrapping_add(1);

        logging::trace!(self.log, "frame transmitted";
                        "seq" => seq,
                        "protocol" => %protocol,
                        "peer" => %self.peer);

        Ok(seq)
    }
}
