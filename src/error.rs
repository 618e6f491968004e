//! Error types for the sheriff console.

use thiserror::Error;

use crate::types::CommandId;

/// Errors surfaced by the console. Rate limiting, unknown command
/// identities and malformed escape sequences are handled in-band and never
/// show up here.
#[derive(Error, Debug)]
pub enum ConsoleError {
    /// A command was added while another live command already holds its identity.
    #[error("command {0} is already registered")]
    DuplicateCommand(CommandId),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reading or writing the settings file failed.
    #[error("settings I/O error: {0}")]
    SettingsIo(#[from] std::io::Error),

    /// The settings file is not valid JSON.
    #[error("settings JSON error: {0}")]
    SettingsJson(#[from] serde_json::Error),

    /// The console task is gone; events can no longer be delivered.
    #[error("console mailbox closed")]
    MailboxClosed,

    /// The mailbox is at capacity; the event was not queued.
    #[error("console mailbox full")]
    MailboxFull,
}

impl ConsoleError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether the error comes from the settings file rather than the live console.
    pub fn is_settings_error(&self) -> bool {
        matches!(self, Self::SettingsIo(_) | Self::SettingsJson(_))
    }
}

/// Result type alias for console operations.
pub type Result<T> = std::result::Result<T, ConsoleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_command_message_names_identity() {
        let err = ConsoleError::DuplicateCommand(CommandId::new("alpha", "camera"));
        assert_eq!(err.to_string(), "command [alpha] [camera] is already registered");
        assert!(!err.is_settings_error());
    }

    #[test]
    fn json_errors_are_settings_errors() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: ConsoleError = parse.into();
        assert!(err.is_settings_error());
    }
}
