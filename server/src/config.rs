//! Process-start configuration
//!
//! Everything here is fixed once the server starts; there is no runtime
//! reconfiguration.

use crate::gate::ExclusivityPolicy;
use clap::Parser;
use shared::{MissionId, DEFAULT_MISSION_DURATIONS, DEFAULT_PORT, DEFAULT_RESET_SETTLE_MS};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed mission entry '{0}', expected <id>=<seconds>")]
    MalformedEntry(String),
    #[error("mission {0} has a zero duration")]
    ZeroDuration(MissionId),
    #[error("mission {0} is listed twice")]
    Duplicate(MissionId),
    #[error("mission ids must run 1..N without gaps, expected {expected} but found {found}")]
    NonContiguous { expected: MissionId, found: MissionId },
    #[error("mission table is empty")]
    Empty,
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid mission table: {0}")]
    Json(#[from] serde_json::Error),
}

/// Validated `mission id -> duration` table with ids exactly 1..N
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissionTable {
    durations: BTreeMap<MissionId, Duration>,
}

impl MissionTable {
    pub fn new<I>(entries: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (MissionId, u64)>,
    {
        let mut durations = BTreeMap::new();
        for (id, seconds) in entries {
            if seconds == 0 {
                return Err(ConfigError::ZeroDuration(id));
            }
            if durations.insert(id, Duration::from_secs(seconds)).is_some() {
                return Err(ConfigError::Duplicate(id));
            }
        }

        if durations.is_empty() {
            return Err(ConfigError::Empty);
        }
        for (expected, found) in (1..).zip(durations.keys().copied()) {
            if expected != found {
                return Err(ConfigError::NonContiguous { expected, found });
            }
        }

        Ok(Self { durations })
    }

    /// Parses `{"1": 8, "2": 300}`
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let raw: BTreeMap<MissionId, u64> = serde_json::from_str(text)?;
        Self::new(raw)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn duration(&self, id: MissionId) -> Option<Duration> {
        self.durations.get(&id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MissionId, Duration)> + '_ {
        self.durations.iter().map(|(id, duration)| (*id, *duration))
    }

    pub fn len(&self) -> usize {
        self.durations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.durations.is_empty()
    }
}

impl Default for MissionTable {
    fn default() -> Self {
        Self {
            durations: DEFAULT_MISSION_DURATIONS
                .iter()
                .map(|(id, seconds)| (*id, Duration::from_secs(*seconds)))
                .collect(),
        }
    }
}

/// Parses `1=8,2=300,3=300`
impl FromStr for MissionTable {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut entries = Vec::new();
        for entry in s.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
            let (id, seconds) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::MalformedEntry(entry.to_string()))?;
            let id = id
                .trim()
                .parse::<MissionId>()
                .map_err(|_| ConfigError::MalformedEntry(entry.to_string()))?;
            let seconds = seconds
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::MalformedEntry(entry.to_string()))?;
            entries.push((id, seconds));
        }
        Self::new(entries)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_clients: usize,
    pub settle_delay: Duration,
    pub policy: ExclusivityPolicy,
    pub missions: MissionTable,
    /// Send `action-denied` to the requester when an event is refused
    pub report_denials: bool,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            max_clients: 64,
            settle_delay: Duration::from_millis(DEFAULT_RESET_SETTLE_MS),
            policy: ExclusivityPolicy::Global,
            missions: MissionTable::default(),
            report_denials: true,
        }
    }
}

/// Command line arguments of the server binary
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct ServerArgs {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    pub host: String,

    /// Server port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Mission durations as id=seconds pairs, e.g. "1=8,2=300"
    #[arg(short, long, conflicts_with = "missions_file")]
    pub missions: Option<String>,

    /// JSON file mapping mission id to duration in seconds
    #[arg(long)]
    pub missions_file: Option<PathBuf>,

    /// Delay between a reset signal and its settle, in milliseconds
    #[arg(long, default_value_t = DEFAULT_RESET_SETTLE_MS)]
    pub settle_ms: u64,

    /// Scope of the single-running-mission rule
    #[arg(long, value_enum, default_value_t = ExclusivityPolicy::Global)]
    pub policy: ExclusivityPolicy,

    /// Maximum concurrent connections
    #[arg(long, default_value_t = 64)]
    pub max_clients: usize,

    /// Refuse events without sending action-denied
    #[arg(long)]
    pub silent_denials: bool,
}

impl ServerArgs {
    pub fn into_config(self) -> Result<ServerConfig, ConfigError> {
        let missions = match (&self.missions, &self.missions_file) {
            (Some(table), _) => table.parse()?,
            (None, Some(path)) => MissionTable::from_json_file(path)?,
            (None, None) => MissionTable::default(),
        };

        Ok(ServerConfig {
            host: self.host,
            port: self.port,
            max_clients: self.max_clients,
            settle_delay: Duration::from_millis(self.settle_ms),
            policy: self.policy,
            missions,
            report_denials: !self.silent_denials,
        })
    }
}
