//! Per-game pacing loop.
//!
//! A scheduler drives one feeder into the broker's score channel at a
//! configurable interval while a parallel task consumes operator commands
//! from the control channel. Commands never reach into the emission loop
//! directly; they flip the pause gate, retime the interval, and cancel the
//! in-flight sleep, and the loop re-evaluates at its next suspension point.

pub mod registry;

use crate::broker::MessageBroker;
use crate::error::SchedulerError;
use crate::feeder::GameFeeder;
use protocol::{Channel, GameEvent};
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Where a game session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    NotStarted,
    Ongoing,
    Paused,
    /// The pause deadline expired and the scheduler resumed on its own.
    Autoplay,
}

impl SchedulerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerState::NotStarted => "not_started",
            SchedulerState::Ongoing => "ongoing",
            SchedulerState::Paused => "paused",
            SchedulerState::Autoplay => "autoplay",
        }
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct GameScheduler {
    game_id: String,
    broker: Arc<MessageBroker>,
    feeder: tokio::sync::Mutex<GameFeeder>,
    state: parking_lot::Mutex<SchedulerState>,
    /// Current inter-emission interval.
    interval: parking_lot::Mutex<Duration>,
    /// Open means emit, closed means hold at the gate.
    gate: watch::Sender<bool>,
    /// Wakes the in-flight emission sleep early.
    wake: Notify,
    pause_deadline: parking_lot::Mutex<Option<JoinHandle<()>>>,
    pause_timeout: Duration,
    cancel: CancellationToken,
}

impl GameScheduler {
    pub fn new(
        game_id: String,
        broker: Arc<MessageBroker>,
        feeder: GameFeeder,
        game_speed: f64,
        pause_timeout: Duration,
    ) -> Self {
        let (gate, _) = watch::channel(false);
        GameScheduler {
            game_id,
            broker,
            feeder: tokio::sync::Mutex::new(feeder),
            state: parking_lot::Mutex::new(SchedulerState::NotStarted),
            interval: parking_lot::Mutex::new(Duration::from_secs_f64(game_speed.max(0.0))),
            gate,
            wake: Notify::new(),
            pause_deadline: parking_lot::Mutex::new(None),
            pause_timeout,
            cancel: CancellationToken::new(),
        }
    }

    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock()
    }

    pub fn current_interval(&self) -> Duration {
        *self.interval.lock()
    }

    /// Requests cooperative termination of the run loop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The game header augmented with the current scheduler state.
    pub async fn metadata(&self) -> Result<Value, crate::error::FeederError> {
        let header = self.feeder.lock().await.game_details().await?;
        let mut map = match header {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        map.insert("game_state".to_string(), json!(self.state().as_str()));
        Ok(Value::Object(map))
    }

    /// The cooperative main loop. Runs until the feeder is exhausted, the
    /// scheduler is cancelled or the run loop fails; on every exit path the
    /// control task is stopped and the feeder cleaned up.
    pub async fn run(self: Arc<Self>) {
        let control_task = tokio::spawn({
            let scheduler = self.clone();
            async move { scheduler.consume_controls().await }
        });

        let result = self.emission_loop().await;

        control_task.abort();
        let _ = control_task.await;
        if let Some(deadline) = self.pause_deadline.lock().take() {
            deadline.abort();
        }
        self.feeder.lock().await.cleanup().await;

        match result {
            Ok(published) => {
                tracing::info!(game_id = %self.game_id, published, "scheduler finished");
            }
            Err(error) => {
                tracing::error!(game_id = %self.game_id, %error, "scheduler run loop failed");
            }
        }
    }

    async fn emission_loop(&self) -> Result<u64, SchedulerError> {
        let mut published = 0u64;
        loop {
            // Next record, or done.
            let score = tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = async { self.feeder.lock().await.next_score().await } => {
                    match next? {
                        Some(score) => score,
                        None => break,
                    }
                }
            };

            // Hold here while paused. start(), resume() and the pause
            // deadline open the gate.
            let mut gate = self.gate.subscribe();
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                open = gate.wait_for(|open| *open) => {
                    if open.is_err() {
                        break;
                    }
                }
            }

            let delivered = self
                .broker
                .publish(
                    &self.game_id,
                    Channel::ScoresUpdate,
                    protocol::score_update_envelope(score),
                )
                .await?;
            published += 1;
            tracing::debug!(game_id = %self.game_id, delivered, "score update published");

            // Interruptible pacing sleep. A wake from pause() or
            // adjust_speed() is a normal early return.
            let interval = self.current_interval();
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
                _ = self.wake.notified() => {}
            }
        }
        Ok(published)
    }

    /// Begin emitting: opens the gate and marks the session ongoing.
    pub fn start(&self) {
        tracing::info!(game_id = %self.game_id, "starting scheduler");
        *self.state.lock() = SchedulerState::Ongoing;
        self.gate.send_replace(true);
    }

    /// Hold emission: closes the gate, interrupts the in-flight sleep so the
    /// loop suspends at the gate right away, and arms the pause deadline.
    pub fn pause(self: &Arc<Self>) {
        tracing::info!(game_id = %self.game_id, "pausing scheduler");
        *self.state.lock() = SchedulerState::Paused;
        self.gate.send_replace(false);
        self.wake.notify_waiters();
        self.arm_pause_deadline();
    }

    /// Continue emission: cancels the pause deadline and reopens the gate.
    pub fn resume(&self) {
        tracing::info!(game_id = %self.game_id, "resuming scheduler");
        if let Some(deadline) = self.pause_deadline.lock().take() {
            deadline.abort();
        }
        *self.state.lock() = SchedulerState::Ongoing;
        self.gate.send_replace(true);
    }

    /// Retimes the emission interval. Non-positive speeds are ignored;
    /// otherwise the in-flight sleep is interrupted so the new interval
    /// applies on the next cycle.
    pub fn adjust_speed(&self, new_speed: f64) {
        if new_speed <= 0.0 {
            tracing::warn!(
                game_id = %self.game_id,
                speed = new_speed,
                "ignoring non-positive speed request"
            );
            return;
        }
        tracing::info!(game_id = %self.game_id, speed = new_speed, "adjusting speed");
        *self.interval.lock() = Duration::from_secs_f64(new_speed);
        self.wake.notify_waiters();
    }

    /// A bounded pause: when the deadline fires while still paused, the
    /// scheduler unblocks itself and plays on.
    fn arm_pause_deadline(self: &Arc<Self>) {
        let deadline = tokio::spawn({
            let scheduler = self.clone();
            async move {
                tokio::time::sleep(scheduler.pause_timeout).await;
                {
                    let mut state = scheduler.state.lock();
                    if *state != SchedulerState::Paused {
                        return;
                    }
                    *state = SchedulerState::Autoplay;
                }
                tracing::info!(
                    game_id = %scheduler.game_id,
                    "pause deadline expired; switching to autoplay"
                );
                scheduler.gate.send_replace(true);
                scheduler.wake.notify_waiters();
            }
        });
        if let Some(previous) = self.pause_deadline.lock().replace(deadline) {
            previous.abort();
        }
    }

    /// Consumes operator commands for this game until the subscription ends.
    async fn consume_controls(self: Arc<Self>) {
        tracing::debug!(game_id = %self.game_id, "subscribing to control messages");
        let mut subscription = match self
            .broker
            .subscribe(&self.game_id, &[Channel::Controls])
            .await
        {
            Ok(subscription) => subscription,
            Err(error) => {
                tracing::error!(game_id = %self.game_id, %error, "control subscription failed");
                return;
            }
        };

        while let Some(message) = subscription.next().await {
            let Some(event) = protocol::event_of(&message) else {
                tracing::warn!(game_id = %self.game_id, "control message without known type");
                continue;
            };
            tracing::debug!(game_id = %self.game_id, %event, "control received");
            match event {
                GameEvent::GameControlStart => self.start(),
                GameEvent::GameControlPause => self.pause(),
                GameEvent::GameControlResume => self.resume(),
                GameEvent::GameControlSpeed => {
                    match message.get("speed").and_then(Value::as_f64) {
                        Some(speed) => self.adjust_speed(speed),
                        None => {
                            tracing::warn!(
                                game_id = %self.game_id,
                                "speed control without a numeric speed value"
                            );
                        }
                    }
                }
                other => {
                    tracing::warn!(game_id = %self.game_id, event = %other, "unknown control type");
                }
            }
        }
        tracing::debug!(game_id = %self.game_id, "control subscription ended");
    }

    #[cfg(test)]
    pub(crate) fn gate_open(&self) -> bool {
        *self.gate.borrow()
    }

    #[cfg(test)]
    pub(crate) fn deadline_armed(&self) -> bool {
        self.pause_deadline.lock().is_some()
    }
}
