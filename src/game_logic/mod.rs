pub mod clock;
pub mod events;
pub mod match_state;
pub mod round;
pub mod scoring;
pub mod word_pool;

pub use clock::{Clock, ManualClock, RoundTicker, SystemClock, TickerEvent, remaining_seconds};
pub use events::MatchEvent;
pub use match_state::{MatchEffect, MatchRules, MatchSettings, MatchState};
pub use round::{RoundPhase, WinReason, WordOutcome};
pub use scoring::score_delta;
