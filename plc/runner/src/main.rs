use cadmium::net::radio::Radio;
use clap::{App, Arg};
use graphite::logging;
use plccore::comms::Comms;
use plccore::config::PlcConfig;
use plccore::peripheral::Peripherals;
use plccore::safety::SafetyCore;
use plccore::scheduler::{Event, RadioPort, Scheduler};
use std::io::BufRead;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::mpsc;
use std::thread;

mod sim;

pub fn main() {
    let matches = App::new("Reactor PLC")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Runs a reactor PLC node.")
        .arg(
            Arg::with_name("CONFIG_FILE")
                .help("Path to the config file")
                .required(true),
        )
        .get_matches();

    let config_file_path = matches.value_of("CONFIG_FILE").unwrap();
    let config = PlcConfig::load(config_file_path);

    let logger = logging::init(&config.log.level);

    logging::info!(logger, "starting reactor PLC";
                   "reactor_id" => config.plc.reactor_id,
                   "listen_port" => config.plc.listen_port,
                   "server_port" => config.plc.server_port,
                   "networked" => config.plc.networked);

    let (control_tx, control_rx) = mpsc::channel();

    // Operator terminate: EOF or "stop" on stdin.
    thread::spawn(move || {
        let stdin = std::io::stdin();

        for line in stdin.lock().lines() {
            match line {
                Ok(ref cmd) if cmd.trim() == "stop" => break,
                Ok(_) => continue,
                Err(_) => break,
            }
        }

        drop(control_tx.send(Event::Terminate));
    });

    let peer = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), config.plc.server_port);
    let radio = Radio::new(config.plc.listen_port, peer, &logger).expect("Failed binding radio");

    let mut peripherals = Peripherals::new(&logger);
    peripherals.attach_reactor(Box::new(sim::SimReactor::new()));
    peripherals.attach_modem();

    let core = SafetyCore::new(config.plc.networked, peripherals, &logger);
    let comms = Comms::new(config.plc.reactor_id, &logger);
    let port = RadioPort::new(radio, control_rx, &logger);

    let mut scheduler = Scheduler::new(core, comms, port, &logger);
    scheduler.run();

    logging::info!(logger, "reactor PLC stopped");
}
