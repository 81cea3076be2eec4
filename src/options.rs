use std::{
    env, fmt,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use log::LevelFilter;

use crate::{Error, Result};

/// Runtime options for the coordination server.
#[derive(Clone, Debug)]
pub struct ServerOptions {
    /// Socket address the HTTP/WS server binds to.
    pub bind: SocketAddr,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Default house-claim lease length in minutes.
    pub claim_minutes: i64,
    /// Roster entries older than this many minutes are pruned.
    pub roster_stale_minutes: i64,
    /// Broadcast channel capacity for realtime events.
    pub event_capacity: usize,
    /// Structured logging level.
    pub log_level: LogLevel,
    /// Logging output format.
    pub log_format: LogFormat,
    /// Include timestamps in log lines.
    pub log_timestamp: bool,
    /// Optional output file path for logs. Empty means stderr.
    pub log_output: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
    Off,
}

impl LogLevel {
    pub fn to_filter(self) -> LevelFilter {
        match self {
            Self::Error => LevelFilter::Error,
            Self::Warn => LevelFilter::Warn,
            Self::Info => LevelFilter::Info,
            Self::Debug => LevelFilter::Debug,
            Self::Trace => LevelFilter::Trace,
            Self::Off => LevelFilter::Off,
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            "off" => Ok(Self::Off),
            _ => Err(Error::invalid_input(format!(
                "Invalid value for --log-level: {value}"
            ))),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
            Self::Off => "off",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogFormat {
    Compact,
    Pretty,
}

impl LogFormat {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            _ => Err(Error::invalid_input(format!(
                "Invalid value for --log-format: {value}"
            ))),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Pretty => "pretty",
        }
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            db_path: PathBuf::from("walk-coord.db"),
            claim_minutes: 30,
            roster_stale_minutes: 10,
            event_capacity: 256,
            log_level: LogLevel::Info,
            log_format: LogFormat::Compact,
            log_timestamp: true,
            log_output: String::new(),
        }
    }
}

impl fmt::Display for ServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bind={} db_path={} claim_minutes={} roster_stale_minutes={} event_capacity={} \
             log_level={} log_format={} log_timestamp={}",
            self.bind,
            self.db_path.display(),
            self.claim_minutes,
            self.roster_stale_minutes,
            self.event_capacity,
            self.log_level.as_str(),
            self.log_format.as_str(),
            self.log_timestamp,
        )
    }
}

impl ServerOptions {
    pub fn from_args() -> Result<Self> {
        Self::parse_from_iter(env::args().skip(1))
    }

    fn parse_from_iter<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = Self::default();
        let mut args = args
            .into_iter()
            .map(|arg| arg.as_ref().to_owned())
            .peekable();

        while let Some(arg) = args.next() {
            if arg == "--help" || arg == "-h" {
                return Err(Error::invalid_input(Self::usage()));
            }

            let Some(raw_name) = arg.strip_prefix("--") else {
                return Err(Error::invalid_input(format!(
                    "Unexpected argument: {arg}\n\n{}",
                    Self::usage()
                )));
            };

            if raw_name.is_empty() {
                return Err(Error::invalid_input(format!(
                    "Invalid option name: {arg}\n\n{}",
                    Self::usage()
                )));
            }

            let (name, value) = split_arg(raw_name, &mut args);

            match name.as_str() {
                "bind" => options.bind = parse_value::<SocketAddr>(&name, value)?,
                "db-path" => {
                    options.db_path = PathBuf::from(require_value(&name, value)?);
                }
                "claim-minutes" => {
                    options.claim_minutes = parse_value::<i64>(&name, value)?;
                    if !(1..=crate::model::MAX_CLAIM_MINUTES).contains(&options.claim_minutes) {
                        return Err(Error::invalid_input(format!(
                            "Value for --claim-minutes must be between 1 and {}",
                            crate::model::MAX_CLAIM_MINUTES
                        )));
                    }
                }
                "roster-stale-minutes" => {
                    options.roster_stale_minutes = parse_value::<i64>(&name, value)?;
                    if options.roster_stale_minutes <= 0 {
                        return Err(Error::invalid_input(
                            "Value for --roster-stale-minutes must be positive",
                        ));
                    }
                }
                "event-capacity" => {
                    options.event_capacity = parse_value::<usize>(&name, value)?;
                    if options.event_capacity == 0 {
                        return Err(Error::invalid_input(
                            "Value for --event-capacity must be positive",
                        ));
                    }
                }
                "log-level" => {
                    options.log_level = LogLevel::parse(&require_value(&name, value)?)?;
                }
                "log-format" => {
                    options.log_format = LogFormat::parse(&require_value(&name, value)?)?;
                }
                "log-timestamp" => {
                    options.log_timestamp = match value {
                        Some(v) => parse_bool(&name, &v)?,
                        None => true,
                    };
                }
                "log-output" => {
                    options.log_output = require_value(&name, value)?;
                }
                _ => {
                    return Err(Error::invalid_input(format!(
                        "Unknown option: --{name}\n\n{}",
                        Self::usage()
                    )));
                }
            }
        }

        Ok(options)
    }

    pub fn log_output_path(&self) -> Option<&Path> {
        if self.log_output.is_empty() {
            None
        } else {
            Some(Path::new(&self.log_output))
        }
    }

    pub fn usage() -> &'static str {
        concat!(
            "Usage:\n",
            "  walk-coord [options]\n\n",
            "Options:\n",
            "  --bind <addr:port>\n",
            "  --db-path <path>\n",
            "  --claim-minutes <i64>\n",
            "  --roster-stale-minutes <i64>\n",
            "  --event-capacity <usize>\n",
            "  --log-level <error|warn|info|debug|trace|off>\n",
            "  --log-format <compact|pretty>\n",
            "  --log-timestamp[=<bool>]\n",
            "  --log-output <path>\n",
            "  --help\n",
            "\n",
            "Examples:\n",
            "  walk-coord --bind 0.0.0.0:8080 --db-path /var/lib/walk-coord.db\n",
            "  walk-coord --claim-minutes=45 --log-level=debug\n",
        )
    }
}

fn require_value(name: &str, value: Option<String>) -> Result<String> {
    value.ok_or_else(|| Error::invalid_input(format!("Missing value for --{name}")))
}

fn parse_value<T>(name: &str, value: Option<String>) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = require_value(name, value)?;
    raw.parse::<T>()
        .map_err(|e| Error::invalid_input(format!("Invalid value for --{name}: {raw} ({e})")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value {
        "1" | "true" | "TRUE" | "True" | "yes" | "YES" | "on" | "ON" => Ok(true),
        "0" | "false" | "FALSE" | "False" | "no" | "NO" | "off" | "OFF" => Ok(false),
        _ => Err(Error::invalid_input(format!(
            "Invalid boolean for --{name}: {value} (expected true/false)"
        ))),
    }
}

fn split_arg(
    raw_name: &str,
    args: &mut std::iter::Peekable<impl Iterator<Item = String>>,
) -> (String, Option<String>) {
    if let Some((k, v)) = raw_name.split_once('=') {
        return (k.to_string(), Some(v.to_string()));
    }

    let value = match args.peek() {
        Some(next) if !next.starts_with("--") => args.next(),
        _ => None,
    };

    (raw_name.to_string(), value)
}
