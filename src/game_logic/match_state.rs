use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::config::RulesConfig;
use crate::content::Theme;
use crate::error::{MatchError, SettingsError, StoreError};
use crate::game_logic::clock;
use crate::game_logic::round::{ActiveRound, GameOver, RoundPhase, WinReason, WordOutcome};
use crate::game_logic::word_pool;
use crate::identity::Principal;

pub const MIN_TEAMS: usize = 2;
pub const MAX_TEAMS: usize = 10;
pub const MIN_POINTS_REQUIRED: u32 = 5;
pub const MAX_POINTS_REQUIRED: u32 = 500;
pub const DEFAULT_POINTS_REQUIRED: u32 = 50;
pub const MIN_ROUND_SECONDS: u64 = 15;
pub const MAX_ROUND_SECONDS: u64 = 600;
pub const DEFAULT_ROUND_SECONDS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRules {
    pub points_required: u32,
    pub round_seconds: u64,
    pub skip_penalty: bool,
}

impl Default for MatchRules {
    fn default() -> Self {
        Self {
            points_required: DEFAULT_POINTS_REQUIRED,
            round_seconds: DEFAULT_ROUND_SECONDS,
            skip_penalty: true,
        }
    }
}

impl From<&RulesConfig> for MatchRules {
    fn from(rules: &RulesConfig) -> Self {
        Self {
            points_required: rules.points_required,
            round_seconds: rules.round_seconds,
            skip_penalty: rules.skip_penalty,
        }
    }
}

/// Rules fixed for the lifetime of a match. Only constructible through
/// [`MatchSettings::new`], which rejects anything unplayable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSettings {
    theme: Theme,
    teams: Vec<String>,
    rules: MatchRules,
}

impl MatchSettings {
    pub fn new(theme: Theme, teams: Vec<String>, rules: MatchRules) -> Result<Self, SettingsError> {
        let settings = Self {
            theme,
            teams,
            rules,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(MIN_TEAMS..=MAX_TEAMS).contains(&self.teams.len()) {
            return Err(SettingsError::TeamCount {
                min: MIN_TEAMS,
                max: MAX_TEAMS,
                got: self.teams.len(),
            });
        }
        let mut seen = HashSet::new();
        for team in &self.teams {
            if !seen.insert(team.as_str()) {
                return Err(SettingsError::DuplicateTeam(team.clone()));
            }
            if !self.theme.has_team(team) {
                return Err(SettingsError::UnknownTeam(team.clone()));
            }
        }
        if !(MIN_POINTS_REQUIRED..=MAX_POINTS_REQUIRED).contains(&self.rules.points_required) {
            return Err(SettingsError::PointsOutOfRange {
                min: MIN_POINTS_REQUIRED,
                max: MAX_POINTS_REQUIRED,
                got: self.rules.points_required,
            });
        }
        if !(MIN_ROUND_SECONDS..=MAX_ROUND_SECONDS).contains(&self.rules.round_seconds) {
            return Err(SettingsError::DurationOutOfRange {
                min: MIN_ROUND_SECONDS,
                max: MAX_ROUND_SECONDS,
                got: self.rules.round_seconds,
            });
        }
        self.theme.validate()?;
        Ok(())
    }

    pub fn theme(&self) -> &Theme {
        &self.theme
    }

    pub fn teams(&self) -> &[String] {
        &self.teams
    }

    pub fn rules(&self) -> MatchRules {
        self.rules
    }

    pub fn points_required(&self) -> u32 {
        self.rules.points_required
    }

    pub fn round_seconds(&self) -> u64 {
        self.rules.round_seconds
    }

    pub fn skip_penalty(&self) -> bool {
        self.rules.skip_penalty
    }
}

/// What a transition asks the surrounding session to do or announce.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchEffect {
    RoundStarted {
        team: String,
        round_number: u32,
        started_at: DateTime<Utc>,
    },
    WordServed {
        word: String,
    },
    /// A round with decisions finished and needs confirming.
    AwaitingConfirmation {
        team: String,
        timed_out: bool,
        log: Vec<WordOutcome>,
    },
    /// A round finished without a single decision; the turn already moved on.
    EmptyRound {
        team: String,
    },
    ScoreChanged {
        team: String,
        delta: i64,
        score: i64,
    },
    TurnAdvanced {
        team: String,
        team_index: usize,
        round_number: u32,
    },
    ScheduleAutoStart {
        team_index: usize,
        round_number: u32,
    },
    GameOver {
        winners: Vec<String>,
        reason: WinReason,
    },
}

/// The whole match: settings, scores, turn pointers, the used-word ledger
/// and the phase of the current round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchState {
    pub(super) id: Uuid,
    pub(super) owner_id: String,
    pub(super) created_at: DateTime<Utc>,
    pub(super) settings: MatchSettings,
    pub(super) team_index: usize,
    pub(super) round_number: u32,
    pub(super) scores: HashMap<String, i64>,
    pub(super) used_words: HashSet<String>,
    pub(super) words_guessed: Vec<String>,
    pub(super) words_skipped: Vec<String>,
    pub(super) phase: RoundPhase,
    /// Set after an empty round hands the turn on, until the next round starts.
    #[serde(default)]
    pub(super) auto_start_pending: bool,
}

impl MatchState {
    pub fn new(settings: MatchSettings, owner: &Principal, now: DateTime<Utc>) -> Self {
        let scores = settings.teams().iter().map(|t| (t.clone(), 0)).collect();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner.id.clone(),
            created_at: now,
            settings,
            team_index: 0,
            round_number: 1,
            scores,
            used_words: HashSet::new(),
            words_guessed: Vec::new(),
            words_skipped: Vec::new(),
            phase: RoundPhase::Idle,
            auto_start_pending: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn settings(&self) -> &MatchSettings {
        &self.settings
    }

    pub fn team_index(&self) -> usize {
        self.team_index
    }

    pub fn current_team(&self) -> &str {
        &self.settings.teams()[self.team_index]
    }

    pub fn round_number(&self) -> u32 {
        self.round_number
    }

    pub fn scores(&self) -> &HashMap<String, i64> {
        &self.scores
    }

    pub fn score(&self, team: &str) -> i64 {
        self.scores.get(team).copied().unwrap_or(0)
    }

    pub fn used_words(&self) -> &HashSet<String> {
        &self.used_words
    }

    pub fn words_guessed(&self) -> &[String] {
        &self.words_guessed
    }

    pub fn words_skipped(&self) -> &[String] {
        &self.words_skipped
    }

    pub fn phase(&self) -> &RoundPhase {
        &self.phase
    }

    /// Whether the current team's round should start without a prompt.
    pub fn auto_start_pending(&self) -> bool {
        self.auto_start_pending && matches!(self.phase, RoundPhase::Idle)
    }

    pub fn is_over(&self) -> bool {
        matches!(self.phase, RoundPhase::GameOver(_))
    }

    pub fn winners(&self) -> Option<&[String]> {
        match &self.phase {
            RoundPhase::GameOver(over) => Some(&over.winners),
            _ => None,
        }
    }

    pub fn current_word(&self) -> Option<&str> {
        match &self.phase {
            RoundPhase::Active(round) => round.current_word(),
            _ => None,
        }
    }

    pub fn available_words(&self) -> Vec<String> {
        word_pool::available(self.settings.theme(), &self.used_words)
    }

    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> Option<u64> {
        match &self.phase {
            RoundPhase::Active(round) => Some(clock::remaining_seconds(
                round.started_at,
                now,
                self.settings.round_seconds(),
            )),
            _ => None,
        }
    }

    /// Starts the current team's round, or ends the match when the theme has
    /// no words left.
    pub fn start_round<R: Rng + ?Sized>(
        &mut self,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<Vec<MatchEffect>, MatchError> {
        self.expect_phase("start a round", matches!(self.phase, RoundPhase::Idle))?;
        self.auto_start_pending = false;

        let pool = self.available_words();
        if pool.is_empty() {
            let winners = self.check_win_by_exhaustion();
            tracing::info!(match.id = %self.id, winners = ?winners, "Word pool exhausted");
            return Ok(vec![self.finish(winners, WinReason::Exhaustion, now)]);
        }

        let round = ActiveRound::begin(&pool, now, rng);
        let mut effects = vec![MatchEffect::RoundStarted {
            team: self.current_team().to_string(),
            round_number: self.round_number,
            started_at: now,
        }];
        if let Some(word) = round.current_word() {
            effects.push(MatchEffect::WordServed {
                word: word.to_string(),
            });
        }
        self.phase = RoundPhase::Active(round);
        Ok(effects)
    }

    /// Records guessed/skipped for the word on screen. A decision that
    /// arrives after the deadline ends the round instead of being logged.
    pub fn decide(
        &mut self,
        guessed: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<MatchEffect>, MatchError> {
        let round_seconds = self.settings.round_seconds();
        let phase_name = self.phase.name();
        let RoundPhase::Active(round) = &mut self.phase else {
            return Err(MatchError::InvalidPhase {
                action: "decide on a word",
                phase: phase_name,
            });
        };

        if clock::remaining_seconds(round.started_at, now, round_seconds) == 0 {
            return Ok(self.end_round(now, true));
        }

        if round.record(guessed) {
            let word = round.current_word().unwrap_or_default().to_string();
            Ok(vec![MatchEffect::WordServed { word }])
        } else {
            Ok(self.end_round(now, false))
        }
    }

    /// Handles the clock reaching zero for the round that started at
    /// `round_started_at`. Signals for any other round are dropped.
    pub fn time_out(
        &mut self,
        round_started_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Vec<MatchEffect> {
        match &self.phase {
            RoundPhase::Active(round) if round.started_at == round_started_at => {
                self.end_round(now, true)
            }
            _ => {
                tracing::debug!(
                    match.id = %self.id,
                    phase = self.phase.name(),
                    round.started_at = %round_started_at,
                    "Ignoring stale timeout"
                );
                Vec::new()
            }
        }
    }

    /// Scores a confirmed outcome log, checks for a threshold win and, if
    /// nobody won, hands the turn to the next team.
    pub fn apply_round_outcome(
        &mut self,
        log: Vec<WordOutcome>,
        now: DateTime<Utc>,
    ) -> Result<Vec<MatchEffect>, MatchError> {
        let RoundPhase::Ended(ended) = &self.phase else {
            return Err(MatchError::InvalidPhase {
                action: "confirm a round",
                phase: self.phase.name(),
            });
        };
        check_confirmed_log(&ended.log, &log)?;

        let team = self.current_team().to_string();
        let delta = self.confirm(&log);
        let mut effects = vec![MatchEffect::ScoreChanged {
            score: self.score(&team),
            team,
            delta,
        }];

        let winners = self.check_win_by_threshold();
        if !winners.is_empty() {
            tracing::info!(match.id = %self.id, winners = ?winners, "Points threshold reached");
            effects.push(self.finish(winners, WinReason::Threshold, now));
            return Ok(effects);
        }

        self.advance_turn();
        effects.push(self.turn_advanced());
        Ok(effects)
    }

    /// Consistency checks for state read back from storage.
    pub fn validate(&self) -> Result<(), StoreError> {
        let inconsistent = |reason: String| Err(StoreError::Inconsistent(reason));
        if let Err(e) = self.settings.validate() {
            return inconsistent(e.to_string());
        }
        if self.team_index >= self.settings.teams().len() {
            return inconsistent(format!("team index {} out of range", self.team_index));
        }
        if self.round_number == 0 {
            return inconsistent("round number must start at 1".to_string());
        }
        if let Some(team) = self.settings.teams().iter().find(|t| !self.scores.contains_key(*t)) {
            return inconsistent(format!("missing score for team '{}'", team));
        }
        if let Some(word) = self
            .used_words
            .iter()
            .find(|w| !self.settings.theme().contains_word(w))
        {
            return inconsistent(format!("used word '{}' is not in the theme", word));
        }
        if let RoundPhase::Active(round) = &self.phase
            && round.word_index > round.order.len()
        {
            return inconsistent("word index past the end of the round".to_string());
        }
        Ok(())
    }

    fn end_round(&mut self, now: DateTime<Utc>, timed_out: bool) -> Vec<MatchEffect> {
        let round = match std::mem::replace(&mut self.phase, RoundPhase::Idle) {
            RoundPhase::Active(round) => round,
            other => {
                self.phase = other;
                return Vec::new();
            }
        };
        let ended = round.finish(now, timed_out);
        let team = self.current_team().to_string();
        tracing::info!(
            match.id = %self.id,
            team = %team,
            timed_out,
            decisions = ended.log.len(),
            "Round ended"
        );

        if ended.log.is_empty() {
            self.advance_turn();
            self.auto_start_pending = true;
            return vec![
                MatchEffect::EmptyRound { team },
                self.turn_advanced(),
                MatchEffect::ScheduleAutoStart {
                    team_index: self.team_index,
                    round_number: self.round_number,
                },
            ];
        }

        let log = ended.log.clone();
        self.phase = RoundPhase::Ended(ended);
        vec![MatchEffect::AwaitingConfirmation {
            team,
            timed_out,
            log,
        }]
    }

    fn finish(&mut self, winners: Vec<String>, reason: WinReason, now: DateTime<Utc>) -> MatchEffect {
        self.phase = RoundPhase::GameOver(GameOver {
            winners: winners.clone(),
            reason,
            ended_at: now,
        });
        MatchEffect::GameOver { winners, reason }
    }

    fn turn_advanced(&self) -> MatchEffect {
        MatchEffect::TurnAdvanced {
            team: self.current_team().to_string(),
            team_index: self.team_index,
            round_number: self.round_number,
        }
    }

    fn expect_phase(&self, action: &'static str, ok: bool) -> Result<(), MatchError> {
        if ok {
            Ok(())
        } else {
            Err(MatchError::InvalidPhase {
                action,
                phase: self.phase.name(),
            })
        }
    }
}

/// The confirmation step may flip `guessed` flags but must name exactly the
/// words that were decided during the round.
fn check_confirmed_log(captured: &[WordOutcome], confirmed: &[WordOutcome]) -> Result<(), MatchError> {
    if captured.len() != confirmed.len() {
        return Err(MatchError::OutcomeRejected(format!(
            "expected {} words, got {}",
            captured.len(),
            confirmed.len()
        )));
    }
    let expected: HashSet<&str> = captured.iter().map(|o| o.word.as_str()).collect();
    let mut seen = HashSet::with_capacity(confirmed.len());
    for outcome in confirmed {
        if !expected.contains(outcome.word.as_str()) {
            return Err(MatchError::OutcomeRejected(format!(
                "'{}' was not played this round",
                outcome.word
            )));
        }
        if !seen.insert(outcome.word.as_str()) {
            return Err(MatchError::OutcomeRejected(format!(
                "'{}' is listed twice",
                outcome.word
            )));
        }
    }
    Ok(())
}
