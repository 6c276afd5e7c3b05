use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::game_logic::match_state::{MatchEffect, MatchState};
use crate::game_logic::round::{WinReason, WordOutcome};

/// Events pushed to front ends watching a match session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event_type", content = "data")]
pub enum MatchEvent {
    FullStateUpdate(Box<MatchState>),
    MatchCleared,
    RoundStarted {
        team: String,
        round_number: u32,
        started_at: DateTime<Utc>,
    },
    WordChanged {
        word: String,
    },
    TimeRemaining {
        seconds: u64,
    },
    RoundEnded {
        team: String,
        timed_out: bool,
        log: Vec<WordOutcome>,
    },
    RoundForfeited {
        team: String,
    },
    TeamScored {
        team: String,
        delta: i64,
        score: i64,
    },
    TurnChanged {
        team: String,
        round_number: u32,
    },
    GameOver {
        winners: Vec<String>,
        reason: WinReason,
    },
}

impl MatchEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// The announcement for an engine effect, if it has one. Scheduling
    /// effects are handled by the session and never reach front ends.
    pub fn from_effect(effect: &MatchEffect) -> Option<Self> {
        let event = match effect {
            MatchEffect::RoundStarted {
                team,
                round_number,
                started_at,
            } => MatchEvent::RoundStarted {
                team: team.clone(),
                round_number: *round_number,
                started_at: *started_at,
            },
            MatchEffect::WordServed { word } => MatchEvent::WordChanged { word: word.clone() },
            MatchEffect::AwaitingConfirmation {
                team,
                timed_out,
                log,
            } => MatchEvent::RoundEnded {
                team: team.clone(),
                timed_out: *timed_out,
                log: log.clone(),
            },
            MatchEffect::EmptyRound { team } => MatchEvent::RoundForfeited { team: team.clone() },
            MatchEffect::ScoreChanged { team, delta, score } => MatchEvent::TeamScored {
                team: team.clone(),
                delta: *delta,
                score: *score,
            },
            MatchEffect::TurnAdvanced {
                team, round_number, ..
            } => MatchEvent::TurnChanged {
                team: team.clone(),
                round_number: *round_number,
            },
            MatchEffect::GameOver { winners, reason } => MatchEvent::GameOver {
                winners: winners.clone(),
                reason: *reason,
            },
            MatchEffect::ScheduleAutoStart { .. } => return None,
        };
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let event = MatchEvent::TimeRemaining { seconds: 42 };
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "event_type": "TimeRemaining", "data": { "seconds": 42 } })
        );
    }

    #[test]
    fn test_scheduling_effects_stay_internal() {
        let effect = MatchEffect::ScheduleAutoStart {
            team_index: 1,
            round_number: 1,
        };
        assert_eq!(MatchEvent::from_effect(&effect), None);

        let effect = MatchEffect::WordServed {
            word: "kite".to_string(),
        };
        assert_eq!(
            MatchEvent::from_effect(&effect),
            Some(MatchEvent::WordChanged {
                word: "kite".to_string()
            })
        );
    }
}
