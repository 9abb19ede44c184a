//! Store-backed feeder. The header lives under `key = <game_id>`, the
//! recording under `key = <game_id>:scores` as an ordered list of serialized
//! records, read through a cursor one batch at a time.

use super::ScoreBuffer;
use crate::error::FeederError;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde_json::Value;

pub struct StoreGameFeeder {
    game_id: String,
    score_key: String,
    client: Client,
    conn: Option<ConnectionManager>,
    cursor: isize,
    pub(crate) buffer: ScoreBuffer,
    details: Option<Value>,
}

impl StoreGameFeeder {
    pub fn new(game_id: &str, url: &str, batch_size: usize) -> Result<Self, FeederError> {
        let client = Client::open(url)?;
        Ok(StoreGameFeeder {
            game_id: game_id.to_string(),
            score_key: format!("{game_id}:scores"),
            client,
            conn: None,
            cursor: 0,
            buffer: ScoreBuffer::new(batch_size),
            details: None,
        })
    }

    async fn connection(&mut self) -> Result<ConnectionManager, FeederError> {
        if let Some(conn) = self.conn.as_ref() {
            return Ok(conn.clone());
        }
        let conn = ConnectionManager::new(self.client.clone()).await?;
        tracing::debug!(game_id = %self.game_id, "store feeder connected");
        self.conn = Some(conn.clone());
        Ok(conn)
    }

    pub async fn game_details(&mut self) -> Result<Value, FeederError> {
        if self.details.is_none() {
            let mut conn = self.connection().await?;
            let raw: Option<String> = conn.get(&self.game_id).await?;
            let raw = raw.ok_or_else(|| FeederError::NotFound(self.game_id.clone()))?;
            let header: Value = serde_json::from_str(&raw).map_err(|error| {
                FeederError::Corrupt(format!("header of {}: {error}", self.game_id))
            })?;
            if !header.is_object() {
                return Err(FeederError::Corrupt(format!(
                    "header of {} is not an object",
                    self.game_id
                )));
            }
            self.details = Some(header);
        }
        Ok(self.details.clone().unwrap_or(Value::Null))
    }

    pub(crate) async fn load_batch(&mut self) -> Result<(), FeederError> {
        let mut conn = self.connection().await?;

        let length: isize = conn.llen(&self.score_key).await?;
        if self.cursor >= length {
            self.buffer.exhausted = true;
            return Ok(());
        }

        let stop = self.cursor + self.buffer.batch_size as isize - 1;
        let batch: Vec<String> = conn.lrange(&self.score_key, self.cursor, stop).await?;
        if batch.is_empty() {
            self.buffer.exhausted = true;
            return Ok(());
        }
        self.cursor += batch.len() as isize;

        for raw in batch {
            let score: Value = serde_json::from_str(&raw).map_err(|error| {
                FeederError::Corrupt(format!("score record of {}: {error}", self.game_id))
            })?;
            self.buffer.items.push_back(score);
        }
        tracing::debug!(
            game_id = %self.game_id,
            cursor = self.cursor,
            buffered = self.buffer.items.len(),
            "score batch loaded"
        );
        Ok(())
    }

    pub(crate) fn cleanup(&mut self) {
        self.buffer.items.clear();
        // Drop the connection so the source is released as well.
        self.conn = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_key_is_game_scoped() {
        let feeder = StoreGameFeeder::new("g7", "redis://localhost", 30).expect("feeder");
        assert_eq!(feeder.score_key, "g7:scores");
    }

    #[test]
    fn bad_url_is_rejected() {
        assert!(StoreGameFeeder::new("g", "not a url", 30).is_err());
    }
}
