//! Error types for the profile engine and its configuration store.
use thiserror::Error;

/// Errors raised by catalog lookups, selection changes and key generation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProfileError {
    /// Note name could not be parsed
    #[error("invalid note name: {0:?}")]
    InvalidNoteName(String),

    /// Layout key is not in the layout catalog
    #[error("unknown key layout: {0}")]
    UnknownLayout(String),

    /// Game type is not in the game catalog
    #[error("unknown game: {0}")]
    UnknownGame(String),

    /// Layout or variant is not allowed by the current game
    #[error("invalid {kind} selection: {key}")]
    InvalidSelection { kind: &'static str, key: String },

    /// No game/layout selected, or the layout is not calibrated yet
    #[error("key position unavailable: {0}")]
    PositionUnavailable(String),

    /// Layout cannot be generated from the active selection
    #[error("key generation failed: {0}")]
    GenerationFailed(String),

    /// Caller-supplied game list violates a catalog invariant
    #[error("invalid game configuration: {0}")]
    InvalidConfig(String),

    /// Requested key index past the generated key list
    #[error("key {index} out of range ({count} keys)")]
    KeyOutOfRange { index: usize, count: usize },
}

/// Errors raised by the configuration store.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no configuration directory available on this platform")]
    NoConfigDir,
}

/// Errors raised while opening a live MIDI input.
#[derive(Error, Debug)]
pub enum MidiError {
    #[error("MIDI init failed: {0}")]
    Init(String),

    #[error("no MIDI input ports available")]
    NoPorts,

    #[error("no MIDI input port matching {0:?}")]
    PortNotFound(String),

    #[error("MIDI connect failed: {0}")]
    Connect(String),
}

/// Result type for profile operations
pub type Result<T> = std::result::Result<T, ProfileError>;
