use serde_derive::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_LISTEN_PORT: u16 = 16001;
pub const DEFAULT_SERVER_PORT: u16 = 16000;

#[derive(Serialize, Deserialize)]
pub struct Plc {
    pub reactor_id: u32,
    pub listen_port: u16,
    pub server_port: u16,
    pub networked: bool,
}

#[derive(Serialize, Deserialize)]
pub struct Log {
    pub level: String,
}

#[derive(Serialize, Deserialize)]
pub struct PlcConfig {
    pub plc: Plc,
    pub log: Log,
}

impl Default for PlcConfig {
    fn default() -> PlcConfig {
        PlcConfig {
            plc: Plc {
                reactor_id: 1,
                listen_port: DEFAULT_LISTEN_PORT,
                server_port: DEFAULT_SERVER_PORT,
                networked: true,
            },
            log: Log {
                level: "debug".to_string(),
            },
        }
    }
}

impl PlcConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> PlcConfig {
        serdeconv::from_toml_file(path).expect("Error loading PLC configuration file")
    }
}
