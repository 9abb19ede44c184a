//! Lazy, batched sources of recorded score events.
//!
//! A feeder owns one game's recording: a one-shot metadata header plus an
//! ordered, finite sequence of opaque score records. Records are buffered in
//! batches and handed out one at a time; once the source is exhausted the
//! feeder keeps reporting end-of-stream.

mod file;
mod store;

pub use file::FileGameFeeder;
pub use store::StoreGameFeeder;

use crate::config::{Config, FeederKind};
use crate::error::FeederError;
use serde_json::Value;
use std::collections::VecDeque;

/// How many records one storage read pulls in.
pub const DEFAULT_BATCH_SIZE: usize = 30;

/// In-memory window over the recorded score list.
#[derive(Debug)]
pub(crate) struct ScoreBuffer {
    pub(crate) batch_size: usize,
    pub(crate) items: VecDeque<Value>,
    pub(crate) exhausted: bool,
}

impl ScoreBuffer {
    pub(crate) fn new(batch_size: usize) -> Self {
        ScoreBuffer {
            batch_size,
            items: VecDeque::new(),
            exhausted: false,
        }
    }
}

/// The configured source of a game's recording.
pub enum GameFeeder {
    File(FileGameFeeder),
    Store(StoreGameFeeder),
}

impl GameFeeder {
    /// Builds the feeder named by the configuration for one game.
    pub fn from_config(game_id: &str, config: &Config) -> Result<Self, FeederError> {
        match config.app.game_feeder {
            FeederKind::File => {
                tracing::debug!(game_id, "creating file feeder");
                Ok(GameFeeder::File(FileGameFeeder::new(
                    game_id,
                    &config.app.game_data_dir,
                    &config.app.game_file_ext(),
                )))
            }
            FeederKind::Redis => {
                tracing::debug!(game_id, "creating store feeder");
                Ok(GameFeeder::Store(StoreGameFeeder::new(
                    game_id,
                    &config.app.redis_url,
                    DEFAULT_BATCH_SIZE,
                )?))
            }
        }
    }

    /// The once-cached game header: everything the source knows about the
    /// game except the score list itself.
    pub async fn game_details(&mut self) -> Result<Value, FeederError> {
        match self {
            GameFeeder::File(feeder) => feeder.game_details().await,
            GameFeeder::Store(feeder) => feeder.game_details().await,
        }
    }

    /// The next score record in source order, or `None` once the recording
    /// is exhausted.
    pub async fn next_score(&mut self) -> Result<Option<Value>, FeederError> {
        loop {
            if let Some(score) = self.buffer_mut().items.pop_front() {
                return Ok(Some(score));
            }
            if self.buffer_mut().exhausted {
                return Ok(None);
            }
            match self {
                GameFeeder::File(feeder) => feeder.load_batch().await?,
                GameFeeder::Store(feeder) => feeder.load_batch().await?,
            }
        }
    }

    /// Releases buffers and any holds on the source. Idempotent.
    pub async fn cleanup(&mut self) {
        match self {
            GameFeeder::File(feeder) => feeder.cleanup(),
            GameFeeder::Store(feeder) => feeder.cleanup(),
        }
    }

    fn buffer_mut(&mut self) -> &mut ScoreBuffer {
        match self {
            GameFeeder::File(feeder) => &mut feeder.buffer,
            GameFeeder::Store(feeder) => &mut feeder.buffer,
        }
    }
}
