use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a supervised command: the deputy it runs on plus its id there.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommandId {
    pub deputy: String,
    pub command_id: String,
}

impl CommandId {
    pub fn new(deputy: impl Into<String>, command_id: impl Into<String>) -> Self {
        Self {
            deputy: deputy.into(),
            command_id: command_id.into(),
        }
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] [{}]", self.deputy, self.command_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    TryingToStart,
    Running,
    TryingToStop,
    Removing,
    StoppedOk,
    StoppedError,
    Restarting,
    /// Any status this console does not know by name.
    #[serde(other)]
    Unknown,
}

impl CommandStatus {
    pub fn label(self) -> &'static str {
        match self {
            CommandStatus::TryingToStart => "Trying to start",
            CommandStatus::Running => "Running",
            CommandStatus::TryingToStop => "Trying to stop",
            CommandStatus::Removing => "Removing",
            CommandStatus::StoppedOk => "Stopped (OK)",
            CommandStatus::StoppedError => "Stopped (Error)",
            CommandStatus::Restarting => "Restarting",
            CommandStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A command as the Sheriff describes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInfo {
    pub id: CommandId,
    pub exec_str: String,
    pub status: CommandStatus,
}

/// A chunk of console output emitted by a command on a deputy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputMessage {
    pub command: CommandId,
    pub text: String,
}

impl OutputMessage {
    pub fn new(command: CommandId, text: impl Into<String>) -> Self {
        Self {
            command,
            text: text.into(),
        }
    }
}

/// Periodic liveness report from a deputy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeputyHeartbeat {
    pub deputy: String,
    pub cpu_load: f64,
    pub timestamp: DateTime<Utc>,
}

/// Command lifecycle transitions published by the Sheriff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SheriffEvent {
    CommandAdded {
        command: CommandInfo,
    },
    CommandRemoved {
        command: CommandInfo,
    },
    StatusChanged {
        command: CommandId,
        old_status: CommandStatus,
        new_status: CommandStatus,
    },
}

/// Read access to the Sheriff's view of which deputies currently exist.
pub trait FleetView: Send + Sync {
    fn live_deputies(&self) -> Vec<String>;
}
