pub use slog::{crit, debug, error, info, o, trace, warn, Discard, Logger};

/// Builds the root terminal logger. The supplied level is substituted into
/// the embedded config so nodes can honor their configured verbosity.
pub fn init(level: &str) -> Logger {
    use sloggers::{Config, LoggerConfig};

    let config: LoggerConfig = serdeconv::from_toml_str(&format!(
        r#"
type = "terminal"
level = "{}"
destination = "stderr"
"#,
        level
    ))
    .expect("Error parsing logger config");

    config.build_logger().expect("Error building logger")
}
