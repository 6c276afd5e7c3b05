use crate::game_logic::match_state::MatchState;
use crate::game_logic::round::{RoundPhase, WordOutcome};

/// Points earned by a round: one per guessed word, minus one per skipped
/// word when the skip penalty is on.
pub fn score_delta(log: &[WordOutcome], skip_penalty: bool) -> i64 {
    let guessed = log.iter().filter(|o| o.guessed).count() as i64;
    let skipped = log.len() as i64 - guessed;
    if skip_penalty { guessed - skipped } else { guessed }
}

impl MatchState {
    /// Credits the current team with the round's delta and retires every
    /// word in the log, skipped ones included.
    pub fn confirm(&mut self, log: &[WordOutcome]) -> i64 {
        let delta = score_delta(log, self.settings.skip_penalty());
        let team = self.current_team().to_string();
        *self.scores.entry(team.clone()).or_insert(0) += delta;

        for outcome in log {
            if self.used_words.insert(outcome.word.clone()) {
                if outcome.guessed {
                    self.words_guessed.push(outcome.word.clone());
                } else {
                    self.words_skipped.push(outcome.word.clone());
                }
            }
        }

        tracing::debug!(
            match.id = %self.id,
            team = %team,
            delta,
            score = self.score(&team),
            "Round outcome scored"
        );
        delta
    }

    /// Teams sharing the top score, provided that score reached the target.
    pub fn check_win_by_threshold(&self) -> Vec<String> {
        match self.top_score() {
            Some(top) if top >= i64::from(self.settings.points_required()) => self.teams_with(top),
            _ => Vec::new(),
        }
    }

    /// Teams sharing the top score. Only meaningful once the pool is empty.
    pub fn check_win_by_exhaustion(&self) -> Vec<String> {
        self.top_score().map(|top| self.teams_with(top)).unwrap_or_default()
    }

    /// Passes the turn to the next team, bumping the round number when the
    /// pointer wraps back to the first team.
    pub fn advance_turn(&mut self) {
        let team_count = self.settings.teams().len();
        self.team_index = (self.team_index + 1) % team_count;
        if self.team_index == 0 {
            self.round_number += 1;
        }
        self.phase = RoundPhase::Idle;
    }

    fn top_score(&self) -> Option<i64> {
        self.settings.teams().iter().map(|t| self.score(t)).max()
    }

    fn teams_with(&self, score: i64) -> Vec<String> {
        self.settings
            .teams()
            .iter()
            .filter(|t| self.score(t) == score)
            .cloned()
            .collect()
    }
}
