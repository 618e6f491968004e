pub mod ansi;
pub mod buffer;
pub mod channel;
pub mod config;
pub mod console;
pub mod error;
pub mod events;
pub mod freshness;
pub mod rate_window;
pub mod router;
pub mod settings;
pub mod types;
