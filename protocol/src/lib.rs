//! The wire vocabulary shared between the server and its clients.
//! Every event travelling over a socket or through the broker is a JSON
//! object carrying one of the event strings below in its `type` field.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;
use std::str::FromStr;

/// Field carrying the event string on every envelope.
pub const TYPE_FIELD: &str = "type";
/// Field carrying the opaque score record on a score-update envelope.
pub const DATA_FIELD: &str = "data";
/// Field naming the game session a message belongs to.
pub const GAME_ID_FIELD: &str = "game_id";
/// Marker field on the in-band shutdown envelope.
pub const SENTINEL_FIELD: &str = "__sentinel__";

/// All canonical event strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameEvent {
    /// A client joins a game room, and the server's join acknowledgement.
    #[serde(rename = "game.join")]
    GameJoin,
    /// A client leaves a game room.
    #[serde(rename = "game.leave")]
    GameLeave,
    /// The replay session opened.
    #[serde(rename = "game.start")]
    GameStart,
    /// The replay session finished.
    #[serde(rename = "game.end")]
    GameEnd,
    /// Operator command: begin emitting scores.
    #[serde(rename = "game.control.start")]
    GameControlStart,
    /// Operator command: hold emission.
    #[serde(rename = "game.control.pause")]
    GameControlPause,
    /// Operator command: continue emission.
    #[serde(rename = "game.control.resume")]
    GameControlResume,
    /// Operator command: change the emission interval.
    #[serde(rename = "game.control.speed")]
    GameControlSpeed,
    /// One paced score record on its way to the clients.
    #[serde(rename = "game.score.update")]
    GameScoreUpdate,
    /// A client-visible failure report.
    #[serde(rename = "game.error")]
    Error,
}

impl GameEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameEvent::GameJoin => "game.join",
            GameEvent::GameLeave => "game.leave",
            GameEvent::GameStart => "game.start",
            GameEvent::GameEnd => "game.end",
            GameEvent::GameControlStart => "game.control.start",
            GameEvent::GameControlPause => "game.control.pause",
            GameEvent::GameControlResume => "game.control.resume",
            GameEvent::GameControlSpeed => "game.control.speed",
            GameEvent::GameScoreUpdate => "game.score.update",
            GameEvent::Error => "game.error",
        }
    }

    /// True for the four operator control commands.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            GameEvent::GameControlStart
                | GameEvent::GameControlPause
                | GameEvent::GameControlResume
                | GameEvent::GameControlSpeed
        )
    }
}

impl fmt::Display for GameEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is not one of the canonical event strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEvent(pub String);

impl fmt::Display for UnknownEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event type: {}", self.0)
    }
}

impl std::error::Error for UnknownEvent {}

impl FromStr for GameEvent {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "game.join" => Ok(GameEvent::GameJoin),
            "game.leave" => Ok(GameEvent::GameLeave),
            "game.start" => Ok(GameEvent::GameStart),
            "game.end" => Ok(GameEvent::GameEnd),
            "game.control.start" => Ok(GameEvent::GameControlStart),
            "game.control.pause" => Ok(GameEvent::GameControlPause),
            "game.control.resume" => Ok(GameEvent::GameControlResume),
            "game.control.speed" => Ok(GameEvent::GameControlSpeed),
            "game.score.update" => Ok(GameEvent::GameScoreUpdate),
            "game.error" => Ok(GameEvent::Error),
            other => Err(UnknownEvent(other.to_string())),
        }
    }
}

/// The logical streams a game session publishes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Operator commands travelling towards the scheduler.
    #[serde(rename = "controls")]
    Controls,
    /// Paced score updates travelling towards the clients.
    #[serde(rename = "scores_update")]
    ScoresUpdate,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Controls => "controls",
            Channel::ScoresUpdate => "scores_update",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no known channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownChannel(pub String);

impl fmt::Display for UnknownChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown channel: {}", self.0)
    }
}

impl std::error::Error for UnknownChannel {}

impl FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "controls" => Ok(Channel::Controls),
            "scores_update" => Ok(Channel::ScoresUpdate),
            other => Err(UnknownChannel(other.to_string())),
        }
    }
}

/// Wraps one opaque score record into the envelope the scheduler publishes.
pub fn score_update_envelope(score: Value) -> Value {
    json!({
        TYPE_FIELD: GameEvent::GameScoreUpdate,
        DATA_FIELD: score,
    })
}

/// The in-band marker every outstanding subscriber receives on shutdown.
pub fn sentinel_envelope() -> Value {
    json!({ SENTINEL_FIELD: true })
}

/// Recognizes the shutdown marker on the receive path.
pub fn is_sentinel(message: &Value) -> bool {
    message
        .get(SENTINEL_FIELD)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Reads the event string out of an envelope, if it carries a known one.
pub fn event_of(message: &Value) -> Option<GameEvent> {
    message
        .get(TYPE_FIELD)
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse().ok())
}

/// Builds the text frame sent to a connected client.
pub fn client_frame(event: GameEvent, payload: Value) -> Value {
    let mut frame = Map::new();
    frame.insert("event".to_string(), json!(event));
    frame.insert("data".to_string(), payload);
    Value::Object(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_strings_round_trip() {
        let events = [
            GameEvent::GameJoin,
            GameEvent::GameLeave,
            GameEvent::GameStart,
            GameEvent::GameEnd,
            GameEvent::GameControlStart,
            GameEvent::GameControlPause,
            GameEvent::GameControlResume,
            GameEvent::GameControlSpeed,
            GameEvent::GameScoreUpdate,
            GameEvent::Error,
        ];
        for event in events {
            assert_eq!(event.as_str().parse::<GameEvent>(), Ok(event));
            assert_eq!(json!(event), json!(event.as_str()));
        }
    }

    #[test]
    fn unknown_event_is_rejected() {
        assert!("game.unknown".parse::<GameEvent>().is_err());
        assert!("".parse::<GameEvent>().is_err());
    }

    #[test]
    fn controls_are_flagged() {
        assert!(GameEvent::GameControlPause.is_control());
        assert!(!GameEvent::GameScoreUpdate.is_control());
    }

    #[test]
    fn score_envelope_carries_type_and_data() {
        let envelope = score_update_envelope(json!({"p": 1}));
        assert_eq!(event_of(&envelope), Some(GameEvent::GameScoreUpdate));
        assert_eq!(envelope[DATA_FIELD], json!({"p": 1}));
    }

    #[test]
    fn sentinel_is_recognized() {
        assert!(is_sentinel(&sentinel_envelope()));
        assert!(!is_sentinel(&json!({"type": "game.join"})));
        assert!(!is_sentinel(&json!({SENTINEL_FIELD: false})));
    }
}
