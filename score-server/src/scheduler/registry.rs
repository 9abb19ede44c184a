//! Process-wide ownership of running schedulers.
//!
//! One registry instance exists per process and is handed to every
//! collaborator that needs it. It guarantees at most one scheduler per game
//! and removes entries on its own when their driving task ends.

use super::{GameScheduler, SchedulerState};
use crate::broker::MessageBroker;
use crate::config::Config;
use crate::error::RegistryError;
use crate::feeder::GameFeeder;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// How long a cancelled scheduler task gets to wind down.
pub const CLEANUP_TIMEOUT: Duration = Duration::from_secs(2);

struct Entry {
    scheduler: Arc<GameScheduler>,
    task: JoinHandle<()>,
}

pub struct SchedulerRegistry {
    inner: Mutex<HashMap<String, Entry>>,
    broker: Arc<MessageBroker>,
    config: Config,
}

impl SchedulerRegistry {
    pub fn new(broker: Arc<MessageBroker>, config: Config) -> Arc<Self> {
        tracing::info!("scheduler registry initialized");
        Arc::new(SchedulerRegistry {
            inner: Mutex::new(HashMap::new()),
            broker,
            config,
        })
    }

    /// The scheduler for `game_id`, if one is registered.
    pub async fn get(&self, game_id: &str) -> Option<Arc<GameScheduler>> {
        self.inner
            .lock()
            .await
            .get(game_id)
            .map(|entry| entry.scheduler.clone())
    }

    pub async fn has(&self, game_id: &str) -> bool {
        self.inner.lock().await.contains_key(game_id)
    }

    /// Game ids and states of every registered scheduler.
    pub async fn active_games(&self) -> Vec<(String, SchedulerState)> {
        self.inner
            .lock()
            .await
            .iter()
            .map(|(game_id, entry)| (game_id.clone(), entry.scheduler.state()))
            .collect()
    }

    /// Returns the scheduler for `game_id`, constructing feeder, scheduler
    /// and driving task when none exists yet. The whole check-then-insert
    /// runs under one lock, so concurrent calls for the same game observe
    /// exactly one construction.
    pub async fn create_or_get(
        self: &Arc<Self>,
        game_id: &str,
    ) -> Result<Arc<GameScheduler>, RegistryError> {
        let mut entries = self.inner.lock().await;
        if let Some(entry) = entries.get(game_id) {
            tracing::debug!(game_id, "scheduler already exists; returning existing instance");
            return Ok(entry.scheduler.clone());
        }

        tracing::info!(game_id, "creating new scheduler");
        let creation_failed = |source| RegistryError::CreationFailed {
            game_id: game_id.to_string(),
            source,
        };

        let mut feeder = GameFeeder::from_config(game_id, &self.config).map_err(creation_failed)?;
        // Validate and cache the header up front so a dead game id fails the
        // join instead of the run loop.
        feeder.game_details().await.map_err(|error| {
            tracing::error!(game_id, %error, "failed to create scheduler");
            creation_failed(error)
        })?;

        let scheduler = Arc::new(GameScheduler::new(
            game_id.to_string(),
            self.broker.clone(),
            feeder,
            self.config.app.default_game_speed,
            Duration::from_secs_f64(self.config.app.pause_timeout_secs.max(0.0)),
        ));

        let task = tokio::spawn({
            let scheduler = scheduler.clone();
            let registry = self.clone();
            let game_id = game_id.to_string();
            async move {
                scheduler.run().await;
                // The completion hook only schedules the cleanup; running it
                // inline would have this task await its own handle.
                tokio::spawn(async move {
                    registry.cleanup(&game_id).await;
                });
            }
        });

        entries.insert(
            game_id.to_string(),
            Entry {
                scheduler: scheduler.clone(),
                task,
            },
        );
        tracing::info!(game_id, "scheduler task created and started");
        Ok(scheduler)
    }

    /// Removes the entry for `game_id` and, when its task is still live,
    /// cancels it and waits out a bounded join. Returns whether an entry
    /// existed.
    pub async fn cleanup(&self, game_id: &str) -> bool {
        let entry = self.inner.lock().await.remove(game_id);
        let Some(entry) = entry else {
            tracing::warn!(game_id, "cleanup requested, but no scheduler registered");
            return false;
        };

        if !entry.task.is_finished() {
            tracing::info!(game_id, "cancelling running scheduler task");
            entry.scheduler.cancel();
            match tokio::time::timeout(CLEANUP_TIMEOUT, entry.task).await {
                Ok(Ok(())) => tracing::info!(game_id, "scheduler task ended"),
                Ok(Err(error)) => {
                    tracing::error!(game_id, %error, "scheduler task failed while winding down");
                }
                Err(_) => {
                    tracing::warn!(game_id, "timeout waiting for scheduler task cancellation");
                }
            }
        }
        tracing::info!(game_id, "scheduler cleanup complete");
        true
    }

    /// Cleans up every registered game concurrently. Anything still present
    /// afterwards is logged.
    pub async fn shutdown(&self) {
        tracing::info!("scheduler registry shutting down");
        let game_ids: Vec<String> = self.inner.lock().await.keys().cloned().collect();
        if game_ids.is_empty() {
            tracing::info!("no active schedulers to shut down");
            return;
        }

        tracing::info!(games = ?game_ids, "shutting down active schedulers");
        join_all(game_ids.iter().map(|game_id| self.cleanup(game_id))).await;

        let residue: Vec<String> = self.inner.lock().await.keys().cloned().collect();
        if residue.is_empty() {
            tracing::info!("all schedulers cleaned up");
        } else {
            tracing::warn!(?residue, "schedulers remaining after shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_game(dir: &Path, game_id: &str, scores: serde_json::Value) {
        std::fs::write(
            dir.join(format!("{game_id}.json")),
            serde_json::to_string(&json!({"game_id": game_id, "scores": scores}))
                .expect("serialize"),
        )
        .expect("write game file");
    }

    fn registry_with(dir: &TempDir) -> Arc<SchedulerRegistry> {
        let mut config = Config::default();
        config.app.game_data_dir = dir.path().to_path_buf();
        config.app.default_game_speed = 0.01;
        SchedulerRegistry::new(Arc::new(MessageBroker::in_memory()), config)
    }

    #[tokio::test]
    async fn create_or_get_returns_the_same_scheduler() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_game(dir.path(), "g", json!([{"p": 1}]));
        let registry = registry_with(&dir);

        let first = registry.create_or_get("g").await.expect("create");
        let second = registry.create_or_get("g").await.expect("get");
        assert!(Arc::ptr_eq(&first, &second));
        assert!(registry.has("g").await);

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_create_or_get_constructs_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_game(dir.path(), "g", json!([{"p": 1}]));
        let registry = registry_with(&dir);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.create_or_get("g").await })
            })
            .collect();

        let mut schedulers = Vec::new();
        for task in tasks {
            schedulers.push(task.await.expect("join").expect("create"));
        }
        for scheduler in &schedulers[1..] {
            assert!(Arc::ptr_eq(&schedulers[0], scheduler));
        }

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_game_fails_creation_and_registers_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = registry_with(&dir);

        let result = registry.create_or_get("ghost").await;
        assert!(matches!(result, Err(RegistryError::CreationFailed { .. })));
        assert!(!registry.has("ghost").await);
    }

    #[tokio::test]
    async fn cleanup_cancels_and_removes() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_game(dir.path(), "g", json!([{"p": 1}, {"p": 2}, {"p": 3}]));
        let registry = registry_with(&dir);

        let _scheduler = registry.create_or_get("g").await.expect("create");
        assert!(registry.cleanup("g").await);
        assert!(!registry.has("g").await);
        // Second cleanup finds nothing.
        assert!(!registry.cleanup("g").await);
    }

    #[tokio::test]
    async fn finished_run_removes_its_own_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_game(dir.path(), "g", json!([{"p": 1}]));
        let registry = registry_with(&dir);

        let scheduler = registry.create_or_get("g").await.expect("create");
        scheduler.start();

        // One record at 10ms pacing plus the scheduled cleanup hop.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!registry.has("g").await);
    }

    #[tokio::test]
    async fn shutdown_cleans_every_game() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_game(dir.path(), "g1", json!([{"p": 1}]));
        write_game(dir.path(), "g2", json!([{"p": 1}]));
        let registry = registry_with(&dir);

        registry.create_or_get("g1").await.expect("create");
        registry.create_or_get("g2").await.expect("create");
        assert_eq!(registry.active_games().await.len(), 2);

        registry.shutdown().await;
        assert!(registry.active_games().await.is_empty());
    }
}
