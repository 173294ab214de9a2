use ansi_term::Colour;
use chrono_tz::Tz;
use env_logger::{Builder, Env};
use log::LevelFilter;
use std::fs::OpenOptions;
use std::io::{self, Write};

use crate::server::config::ServerConfig;

/// Installs the global logger: coloured lines on stderr and a plain copy
/// appended to the configured log file.
pub fn init(config: &ServerConfig) -> io::Result<()> {
    let mut builder = builder(config)?;
    builder
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e))
}

fn builder(config: &ServerConfig) -> io::Result<Builder> {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    if config.close_log {
        builder.filter_level(LevelFilter::Off);
        return Ok(builder);
    }

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_file)?;
    let tz: Tz = config.log_timezone;

    builder.format(move |buf, record| {
        let timestamp = chrono::Utc::now()
            .with_timezone(&tz)
            .format("%Y-%m-%dT%H:%M:%S%:z");

        let level = match record.level() {
            log::Level::Error => Colour::Red.paint(record.level().to_string()),
            log::Level::Warn => Colour::Yellow.paint(record.level().to_string()),
            log::Level::Info => Colour::Green.paint(record.level().to_string()),
            log::Level::Debug => Colour::Blue.paint(record.level().to_string()),
            log::Level::Trace => Colour::Purple.paint(record.level().to_string()),
        };
        let target = record.module_path().unwrap_or_default();

        writeln!(
            &log_file,
            "[{} {} {}] {}",
            timestamp,
            record.level(),
            target,
            record.args()
        )?;
        writeln!(buf, "[{} {} {}] {}", timestamp, level, target, record.args())
    });
    Ok(builder)
}
