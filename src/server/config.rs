use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use super::epoll::TriggerMode;
use crate::threadpool::ActorModel;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct ServerConfig {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Listening port
    #[arg(short, long, default_value_t = 9006)]
    pub port: u16,

    /// Number of worker threads
    #[arg(short, long, default_value_t = 8)]
    pub threads: usize,

    /// Capacity of the request queue
    #[arg(long, default_value_t = 10000)]
    pub max_requests: usize,

    /// Directory files are served from
    #[arg(short, long, default_value = "./root")]
    pub document_root: PathBuf,

    /// Maximum number of simultaneous client connections
    #[arg(long, default_value_t = 65535)]
    pub max_connections: usize,

    /// Who performs socket I/O: the dispatcher (proactor) or the workers (reactor)
    #[arg(short, long, value_enum, default_value_t = ActorModel::Proactor)]
    pub actor_model: ActorModel,

    /// Trigger mode of the listening socket
    #[arg(long, value_enum, default_value_t = TriggerMode::Level)]
    pub listen_trigger: TriggerMode,

    /// Trigger mode of client sockets
    #[arg(long, value_enum, default_value_t = TriggerMode::Level)]
    pub conn_trigger: TriggerMode,

    /// Timer tick period in seconds; idle connections expire after three ticks
    #[arg(long, default_value_t = 5)]
    pub timeslot: u64,

    /// Number of pooled backing-store connections
    #[arg(long, default_value_t = 8)]
    pub store_connections: usize,

    /// File of `name:password` lines loaded into the user table
    #[arg(short, long)]
    pub users: Option<PathBuf>,

    /// Enable SO_LINGER on the listening socket
    #[arg(long)]
    pub linger: bool,

    /// Turn logging off
    #[arg(long)]
    pub close_log: bool,

    /// File every log line is appended to
    #[arg(long, default_value = "server.log")]
    pub log_file: PathBuf,

    /// Time zone of log timestamps, e.g. Europe/Moscow
    #[arg(long, default_value = "UTC")]
    pub log_timezone: chrono_tz::Tz,
}

impl ServerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.timeslot.max(1))
    }

    /// Idle time after which a connection is closed.
    pub fn idle_timeout(&self) -> Duration {
        self.tick_interval() * 3
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9006,
            threads: 8,
            max_requests: 10000,
            document_root: PathBuf::from("./root"),
            max_connections: 65535,
            actor_model: ActorModel::Proactor,
            listen_trigger: TriggerMode::Level,
            conn_trigger: TriggerMode::Level,
            timeslot: 5,
            store_connections: 8,
            users: None,
            linger: false,
            close_log: false,
            log_file: PathBuf::from("server.log"),
            log_timezone: chrono_tz::UTC,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_cli() {
        let parsed = ServerConfig::parse_from(["reactor-httpd"]);
        let default = ServerConfig::default();
        assert_eq!(parsed.port, default.port);
        assert_eq!(parsed.threads, default.threads);
        assert_eq!(parsed.max_requests, default.max_requests);
        assert_eq!(parsed.actor_model, default.actor_model);
        assert_eq!(parsed.conn_trigger, default.conn_trigger);
        assert_eq!(parsed.log_timezone, default.log_timezone);
        assert_eq!(parsed.idle_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn test_parses_modes() {
        let parsed = ServerConfig::parse_from([
            "reactor-httpd",
            "--actor-model",
            "reactor",
            "--conn-trigger",
            "et",
            "--log-timezone",
            "Europe/Moscow",
            "--close-log",
        ]);
        assert_eq!(parsed.actor_model, ActorModel::Reactor);
        assert_eq!(parsed.conn_trigger, TriggerMode::Edge);
        assert_eq!(parsed.log_timezone, chrono_tz::Europe::Moscow);
        assert!(parsed.close_log);
    }
}
