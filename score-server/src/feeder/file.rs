//! File-backed feeder. One JSON document per game holds the header fields
//! and a `scores` array; the whole score list is loaded in a single batch.

use super::ScoreBuffer;
use crate::error::FeederError;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

pub struct FileGameFeeder {
    game_id: String,
    path: PathBuf,
    pub(crate) buffer: ScoreBuffer,
    details: Option<Value>,
}

impl FileGameFeeder {
    pub fn new(game_id: &str, data_dir: &Path, extension: &str) -> Self {
        let path = data_dir.join(format!("{game_id}{extension}"));
        FileGameFeeder {
            game_id: game_id.to_string(),
            path,
            // The file is read in one go, so the batch size is nominal.
            buffer: ScoreBuffer::new(super::DEFAULT_BATCH_SIZE),
            details: None,
        }
    }

    async fn read_document(&self) -> Result<Map<String, Value>, FeederError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(FeederError::NotFound(self.path.display().to_string()));
            }
            Err(error) => return Err(error.into()),
        };
        let document: Value = serde_json::from_str(&raw)
            .map_err(|error| FeederError::Corrupt(format!("{}: {error}", self.path.display())))?;
        match document {
            Value::Object(map) => Ok(map),
            _ => Err(FeederError::Corrupt(format!(
                "{}: top-level object expected",
                self.path.display()
            ))),
        }
    }

    pub async fn game_details(&mut self) -> Result<Value, FeederError> {
        if self.details.is_none() {
            let mut document = self.read_document().await?;
            document.remove("scores");
            self.details = Some(Value::Object(document));
        }
        Ok(self.details.clone().unwrap_or(Value::Null))
    }

    pub(crate) async fn load_batch(&mut self) -> Result<(), FeederError> {
        let mut document = self.read_document().await?;
        let scores = document.remove("scores").unwrap_or(Value::Array(Vec::new()));
        let Value::Array(scores) = scores else {
            self.buffer.exhausted = true;
            return Err(FeederError::Corrupt(format!(
                "{}: scores must be an array",
                self.path.display()
            )));
        };
        tracing::debug!(game_id = %self.game_id, count = scores.len(), "loaded score list");
        self.buffer.items.extend(scores);
        // File data is loaded all at once.
        self.buffer.exhausted = true;
        Ok(())
    }

    pub(crate) fn cleanup(&mut self) {
        self.buffer.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeder::GameFeeder;
    use serde_json::json;
    use std::path::Path;

    fn write_game(dir: &Path, game_id: &str, document: &Value) {
        std::fs::write(
            dir.join(format!("{game_id}.json")),
            serde_json::to_string(document).expect("serialize"),
        )
        .expect("write game file");
    }

    fn feeder(dir: &Path, game_id: &str) -> GameFeeder {
        GameFeeder::File(FileGameFeeder::new(game_id, dir, ".json"))
    }

    #[tokio::test]
    async fn details_exclude_the_score_list() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_game(
            dir.path(),
            "g1",
            &json!({"game_id": "g1", "teams": ["A", "B"], "scores": [{"p": 1}]}),
        );

        let mut feeder = feeder(dir.path(), "g1");
        let details = feeder.game_details().await.expect("details");
        assert_eq!(details, json!({"game_id": "g1", "teams": ["A", "B"]}));
        // Cached on the second call.
        assert_eq!(feeder.game_details().await.expect("details"), details);
    }

    #[tokio::test]
    async fn scores_come_out_in_source_order_then_end() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_game(
            dir.path(),
            "g1",
            &json!({"scores": [{"p": 1}, {"p": 2}, {"p": 3}]}),
        );

        let mut feeder = feeder(dir.path(), "g1");
        assert_eq!(feeder.next_score().await.expect("next"), Some(json!({"p": 1})));
        assert_eq!(feeder.next_score().await.expect("next"), Some(json!({"p": 2})));
        assert_eq!(feeder.next_score().await.expect("next"), Some(json!({"p": 3})));
        assert_eq!(feeder.next_score().await.expect("next"), None);
        // Still exhausted on further steps.
        assert_eq!(feeder.next_score().await.expect("next"), None);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut feeder = feeder(dir.path(), "ghost");
        assert!(matches!(
            feeder.game_details().await,
            Err(FeederError::NotFound(_))
        ));
        assert!(matches!(
            feeder.next_score().await,
            Err(FeederError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn malformed_document_is_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("bad.json"), "{ nope").expect("write");

        let mut feeder = feeder(dir.path(), "bad");
        assert!(matches!(
            feeder.game_details().await,
            Err(FeederError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn non_array_scores_are_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_game(dir.path(), "odd", &json!({"scores": "nope"}));

        let mut feeder = feeder(dir.path(), "odd");
        assert!(matches!(
            feeder.next_score().await,
            Err(FeederError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn cleanup_clears_the_buffer_and_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_game(dir.path(), "g1", &json!({"scores": [{"p": 1}, {"p": 2}]}));

        let mut feeder = feeder(dir.path(), "g1");
        assert_eq!(feeder.next_score().await.expect("next"), Some(json!({"p": 1})));
        feeder.cleanup().await;
        feeder.cleanup().await;
        assert_eq!(feeder.next_score().await.expect("next"), None);
    }

    #[tokio::test]
    async fn missing_scores_key_means_an_empty_recording() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_game(dir.path(), "bare", &json!({"game_id": "bare"}));

        let mut feeder = feeder(dir.path(), "bare");
        assert_eq!(feeder.next_score().await.expect("next"), None);
    }
}
