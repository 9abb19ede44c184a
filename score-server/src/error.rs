//! Error types for the runtime. Edge failures (one queue, one client, one
//! message) are absorbed and logged at their site; these types cover the
//! failures that end a lifecycle or have to reach the sender.

use thiserror::Error;

/// Failures while reading a game's recorded data.
#[derive(Debug, Error)]
pub enum FeederError {
    #[error("game source not found: {0}")]
    NotFound(String),
    #[error("game source is corrupt: {0}")]
    Corrupt(String),
    #[error("game source i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("game store error: {0}")]
    Store(#[from] redis::RedisError),
}

/// Failures inside the pub/sub fabric. The in-process broker never fails;
/// the networked variant surfaces its client errors here.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker backend error: {0}")]
    Backend(#[from] redis::RedisError),
    #[error("broker payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failures while creating a scheduler in the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("scheduler creation failed for {game_id}: {source}")]
    CreationFailed {
        game_id: String,
        #[source]
        source: FeederError,
    },
}

/// Failures inside a scheduler's run loop.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Feeder(#[from] FeederError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// A client message that cannot be dispatched. The text is sent back to the
/// client verbatim on a `game.error` event.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct MessageError(pub String);

/// Failure to deliver an emission to a client room.
#[derive(Debug, Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// Failures while loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration load failed: cannot read '{path}': {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("configuration load failed: '{path}' is not valid: {source}")]
    Invalid {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
