use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::game_logic::word_pool;

/// One decision made while a round was running.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WordOutcome {
    pub word: String,
    pub guessed: bool,
}

impl WordOutcome {
    pub fn guessed(word: impl Into<String>) -> Self {
        Self {
            word: word.into(),
            guessed: true,
        }
    }

    pub fn skipped(word: impl Into<String>) -> Self {
        Self {
            word: word.into(),
            guessed: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ActiveRound {
    pub started_at: DateTime<Utc>,
    pub order: Vec<String>,
    pub word_index: usize,
    pub log: Vec<WordOutcome>,
}

impl ActiveRound {
    pub fn begin<R: Rng + ?Sized>(pool: &[String], now: DateTime<Utc>, rng: &mut R) -> Self {
        Self {
            started_at: now,
            order: word_pool::shuffle(pool, rng),
            word_index: 0,
            log: Vec::new(),
        }
    }

    pub fn current_word(&self) -> Option<&str> {
        self.order.get(self.word_index).map(String::as_str)
    }

    /// Logs a decision for the word on screen and moves on. Returns `false`
    /// once the shuffled order has run out.
    pub fn record(&mut self, guessed: bool) -> bool {
        if let Some(word) = self.order.get(self.word_index) {
            self.log.push(WordOutcome {
                word: word.clone(),
                guessed,
            });
            self.word_index += 1;
        }
        self.word_index < self.order.len()
    }

    /// Closes the round. Only decided words make it into the log; the word
    /// being described at the time is dropped.
    pub fn finish(self, now: DateTime<Utc>, timed_out: bool) -> EndedRound {
        EndedRound {
            started_at: self.started_at,
            ended_at: now,
            timed_out,
            log: self.log,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EndedRound {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub timed_out: bool,
    pub log: Vec<WordOutcome>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WinReason {
    Threshold,
    Exhaustion,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GameOver {
    pub winners: Vec<String>,
    pub reason: WinReason,
    pub ended_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum RoundPhase {
    Idle,
    Active(ActiveRound),
    /// Waiting for the outcome log to be confirmed.
    Ended(EndedRound),
    GameOver(GameOver),
}

impl RoundPhase {
    pub fn name(&self) -> &'static str {
        match self {
            RoundPhase::Idle => "idle",
            RoundPhase::Active(_) => "active",
            RoundPhase::Ended(_) => "awaiting confirmation",
            RoundPhase::GameOver(_) => "over",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn pool(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("w{}", i)).collect()
    }

    #[test]
    fn test_record_walks_the_order() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut round = ActiveRound::begin(&pool(3), Utc::now(), &mut rng);
        let first = round.current_word().unwrap().to_string();

        assert!(round.record(true));
        assert!(round.record(false));
        assert!(!round.record(true));
        assert_eq!(round.current_word(), None);
        assert_eq!(round.log.len(), 3);
        assert_eq!(round.log[0], WordOutcome::guessed(first));
        assert!(!round.log[1].guessed);
    }

    #[test]
    fn test_finish_excludes_word_in_progress() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut round = ActiveRound::begin(&pool(10), Utc::now(), &mut rng);
        round.record(true);
        round.record(false);
        let in_progress = round.current_word().unwrap().to_string();

        let ended = round.finish(Utc::now(), true);
        assert!(ended.timed_out);
        assert_eq!(ended.log.len(), 2);
        assert!(ended.log.iter().all(|o| o.word != in_progress));
    }

    #[test]
    fn test_phase_serializes_tagged() {
        let json = serde_json::to_value(RoundPhase::Idle).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "Idle" }));
    }
}
