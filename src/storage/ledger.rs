use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::game_logic::MatchState;

/// Snapshot sent to the remote ledger after every confirmed change.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LedgerUpdate {
    pub team_scores: HashMap<String, i64>,
    pub turn_index: usize,
    pub round_number: u32,
    pub words_guessed: Vec<String>,
    pub words_skipped: Vec<String>,
}

impl From<&MatchState> for LedgerUpdate {
    fn from(state: &MatchState) -> Self {
        Self {
            team_scores: state.scores().clone(),
            turn_index: state.team_index(),
            round_number: state.round_number(),
            words_guessed: state.words_guessed().to_vec(),
            words_skipped: state.words_skipped().to_vec(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MatchRecord {
    pub match_id: Uuid,
    pub owner_id: String,
    pub theme_id: Uuid,
    pub teams: Vec<String>,
    pub points_required: u32,
    pub round_seconds: u64,
    pub skip_penalty: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&MatchState> for MatchRecord {
    fn from(state: &MatchState) -> Self {
        let settings = state.settings();
        Self {
            match_id: state.id(),
            owner_id: state.owner_id().to_string(),
            theme_id: settings.theme().id,
            teams: settings.teams().to_vec(),
            points_required: settings.points_required(),
            round_seconds: settings.round_seconds(),
            skip_penalty: settings.skip_penalty(),
            created_at: state.created_at(),
        }
    }
}

/// Matches kept for syncing at once. Only a dropped close lets this grow.
const MAX_SYNCED_MATCHES: usize = 8;

#[async_trait]
pub trait RemoteLedger: Send + Sync {
    /// Looks up the record already created for a local match, if any.
    async fn find_match_record(&self, match_id: Uuid) -> Result<Option<String>, LedgerError>;
    async fn create_match_record(&self, record: &MatchRecord) -> Result<String, LedgerError>;
    async fn update_match_record(
        &self,
        record_id: &str,
        update: &LedgerUpdate,
    ) -> Result<(), LedgerError>;
    async fn close_match_record(
        &self,
        record_id: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<(), LedgerError>;
}

#[derive(Deserialize)]
struct CreatedRecord {
    id: String,
}

#[derive(Serialize)]
struct CloseRecord {
    ended_at: DateTime<Utc>,
}

/// REST client for a remote match ledger.
#[derive(Debug, Clone)]
pub struct HttpLedger {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLedger {
    pub fn new(base_url: &str, config: &LedgerConfig) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn check(operation: &'static str, response: &reqwest::Response) -> Result<(), LedgerError> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(LedgerError::Status {
                operation,
                status: response.status().as_u16(),
            })
        }
    }
}

#[async_trait]
impl RemoteLedger for HttpLedger {
    async fn find_match_record(&self, match_id: Uuid) -> Result<Option<String>, LedgerError> {
        let response = self
            .client
            .get(format!("{}/matches/by-match/{}", self.base_url, match_id))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::check("find", &response)?;
        let found: CreatedRecord = response.json().await?;
        Ok(Some(found.id))
    }

    async fn create_match_record(&self, record: &MatchRecord) -> Result<String, LedgerError> {
        let response = self
            .client
            .post(format!("{}/matches", self.base_url))
            .json(record)
            .send()
            .await?;
        Self::check("create", &response)?;
        let created: CreatedRecord = response.json().await?;
        Ok(created.id)
    }

    async fn update_match_record(
        &self,
        record_id: &str,
        update: &LedgerUpdate,
    ) -> Result<(), LedgerError> {
        let response = self
            .client
            .put(format!("{}/matches/{}", self.base_url, record_id))
            .json(update)
            .send()
            .await?;
        Self::check("update", &response)
    }

    async fn close_match_record(
        &self,
        record_id: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let response = self
            .client
            .post(format!("{}/matches/{}/close", self.base_url, record_id))
            .json(&CloseRecord { ended_at })
            .send()
            .await?;
        Self::check("close", &response)
    }
}

#[derive(Debug)]
pub enum LedgerMessage {
    Track { record: MatchRecord, resumed: bool },
    Update { match_id: Uuid, update: LedgerUpdate },
    Close { match_id: Uuid, ended_at: DateTime<Utc> },
}

#[derive(Debug)]
struct SyncedMatch {
    record: MatchRecord,
    /// Restored from local storage, so a remote record may already exist.
    resumed: bool,
    remote_id: Option<String>,
    pending_update: Option<LedgerUpdate>,
    pending_close: Option<DateTime<Utc>>,
}

struct LedgerSyncActor {
    receiver: mpsc::Receiver<LedgerMessage>,
    ledger: Arc<dyn RemoteLedger>,
    /// Oldest first, so a replaced match is closed before its successor is created.
    matches: VecDeque<SyncedMatch>,
}

impl LedgerSyncActor {
    fn handle_message(&mut self, msg: LedgerMessage) {
        match msg {
            LedgerMessage::Track { record, resumed } => {
                if self.find_mut(record.match_id).is_some() {
                    return;
                }
                if self.matches.len() == MAX_SYNCED_MATCHES
                    && let Some(dropped) = self.matches.pop_front()
                {
                    tracing::warn!(match.id = %dropped.record.match_id, "Giving up on unsynced ledger record");
                }
                self.matches.push_back(SyncedMatch {
                    record,
                    resumed,
                    remote_id: None,
                    pending_update: None,
                    pending_close: None,
                });
            }
            LedgerMessage::Update { match_id, update } => match self.find_mut(match_id) {
                Some(synced) => synced.pending_update = Some(update),
                None => tracing::debug!(match.id = %match_id, "Ledger update for untracked match"),
            },
            LedgerMessage::Close { match_id, ended_at } => match self.find_mut(match_id) {
                Some(synced) => synced.pending_close = Some(ended_at),
                None => tracing::debug!(match.id = %match_id, "Ledger close for untracked match"),
            },
        }
    }

    fn find_mut(&mut self, match_id: Uuid) -> Option<&mut SyncedMatch> {
        self.matches
            .iter_mut()
            .find(|synced| synced.record.match_id == match_id)
    }

    /// Pushes whatever is outstanding, oldest match first. Stops at the first
    /// failure; the remainder is retried when the next message arrives.
    async fn flush(&mut self) {
        let mut index = 0;
        while index < self.matches.len() {
            let synced = &mut self.matches[index];
            let match_id = synced.record.match_id;
            match sync_match(self.ledger.as_ref(), synced).await {
                Ok(true) => {
                    tracing::info!(match.id = %match_id, "Remote match record closed");
                    self.matches.remove(index);
                }
                Ok(false) => index += 1,
                Err(e) => {
                    tracing::warn!(match.id = %match_id, error = %e, "Remote ledger sync failed, will retry");
                    return;
                }
            }
        }
    }
}

/// Brings one remote record up to date. Returns `true` once it is closed.
async fn sync_match(ledger: &dyn RemoteLedger, synced: &mut SyncedMatch) -> Result<bool, LedgerError> {
    let match_id = synced.record.match_id;
    let remote_id = match synced.remote_id.clone() {
        Some(remote_id) => remote_id,
        None => {
            let existing = if synced.resumed {
                ledger.find_match_record(match_id).await?
            } else {
                None
            };
            let remote_id = match existing {
                Some(remote_id) => {
                    tracing::info!(match.id = %match_id, ledger.id = %remote_id, "Reattached to remote match record");
                    remote_id
                }
                None => {
                    let remote_id = ledger.create_match_record(&synced.record).await?;
                    tracing::info!(match.id = %match_id, ledger.id = %remote_id, "Remote match record created");
                    remote_id
                }
            };
            synced.remote_id = Some(remote_id.clone());
            remote_id
        }
    };

    if let Some(update) = synced.pending_update.as_ref() {
        ledger.update_match_record(&remote_id, update).await?;
        synced.pending_update = None;
    }

    match synced.pending_close {
        Some(ended_at) => {
            ledger.close_match_record(&remote_id, ended_at).await?;
            Ok(true)
        }
        None => Ok(false),
    }
}

async fn run_ledger_sync_actor(mut actor: LedgerSyncActor) {
    tracing::debug!("Ledger sync actor started");
    while let Some(msg) = actor.receiver.recv().await {
        actor.handle_message(msg);
        // Coalesce anything queued behind this message before hitting the network.
        while let Ok(msg) = actor.receiver.try_recv() {
            actor.handle_message(msg);
        }
        actor.flush().await;
    }
    tracing::debug!("Ledger sync actor stopped");
}

/// Fire-and-forget access to the ledger sync task. Nothing here waits on the
/// network.
#[derive(Clone, Debug)]
pub struct LedgerSyncHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerSyncHandle {
    pub fn spawn(ledger: Arc<dyn RemoteLedger>, buffer_size: usize) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let actor = LedgerSyncActor {
            receiver,
            ledger,
            matches: VecDeque::new(),
        };
        tokio::spawn(run_ledger_sync_actor(actor));
        Self { sender }
    }

    /// Starts syncing a newly created match.
    pub fn track(&self, state: &MatchState) {
        self.send(LedgerMessage::Track {
            record: MatchRecord::from(state),
            resumed: false,
        });
    }

    /// Starts syncing a match restored from local storage, reusing its
    /// remote record when one exists.
    pub fn resume(&self, state: &MatchState) {
        self.send(LedgerMessage::Track {
            record: MatchRecord::from(state),
            resumed: true,
        });
    }

    pub fn update(&self, state: &MatchState) {
        self.send(LedgerMessage::Update {
            match_id: state.id(),
            update: LedgerUpdate::from(state),
        });
    }

    pub fn close(&self, match_id: Uuid, ended_at: DateTime<Utc>) {
        self.send(LedgerMessage::Close { match_id, ended_at });
    }

    fn send(&self, msg: LedgerMessage) {
        if let Err(e) = self.sender.try_send(msg) {
            tracing::warn!(error = %e, "Dropping remote ledger message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::theme_fixture;
    use crate::game_logic::{MatchRules, MatchSettings};
    use crate::identity::Principal;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct FakeLedger {
        failing: AtomicBool,
        calls: Mutex<Vec<String>>,
        records: Mutex<HashMap<Uuid, String>>,
    }

    impl FakeLedger {
        async fn knows(&self, record_id: &str) -> bool {
            self.records.lock().await.values().any(|id| id == record_id)
        }
    }

    #[async_trait]
    impl RemoteLedger for FakeLedger {
        async fn find_match_record(&self, match_id: Uuid) -> Result<Option<String>, LedgerError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(LedgerError::MissingRecord);
            }
            self.calls.lock().await.push("find".to_string());
            Ok(self.records.lock().await.get(&match_id).cloned())
        }

        async fn create_match_record(&self, record: &MatchRecord) -> Result<String, LedgerError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(LedgerError::MissingRecord);
            }
            self.calls.lock().await.push("create".to_string());
            let remote_id = format!("remote-{}", Uuid::new_v4());
            self.records
                .lock()
                .await
                .insert(record.match_id, remote_id.clone());
            Ok(remote_id)
        }

        async fn update_match_record(
            &self,
            record_id: &str,
            update: &LedgerUpdate,
        ) -> Result<(), LedgerError> {
            if self.failing.load(Ordering::SeqCst) || !self.knows(record_id).await {
                return Err(LedgerError::MissingRecord);
            }
            self.calls
                .lock()
                .await
                .push(format!("update:{}", update.round_number));
            Ok(())
        }

        async fn close_match_record(
            &self,
            record_id: &str,
            _ended_at: DateTime<Utc>,
        ) -> Result<(), LedgerError> {
            if self.failing.load(Ordering::SeqCst) || !self.knows(record_id).await {
                return Err(LedgerError::MissingRecord);
            }
            self.calls.lock().await.push("close".to_string());
            Ok(())
        }
    }

    fn sample_state() -> MatchState {
        let theme = theme_fixture(100, &["A", "B"]);
        let settings = MatchSettings::new(
            theme,
            vec!["A".to_string(), "B".to_string()],
            MatchRules::default(),
        )
        .unwrap();
        let owner = Principal {
            id: "owner".to_string(),
            email: "owner@example.com".to_string(),
            display_name: "Owner".to_string(),
        };
        MatchState::new(settings, &owner, Utc::now())
    }

    async fn wait_for_calls(ledger: &FakeLedger, expected: &[&str]) {
        for _ in 0..200 {
            if ledger.calls.lock().await.as_slice() == expected {
                return;
            }
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
        panic!(
            "expected ledger calls {:?}, got {:?}",
            expected,
            ledger.calls.lock().await
        );
    }

    #[test]
    fn test_update_mirrors_state() {
        let state = sample_state();
        let update = LedgerUpdate::from(&state);
        assert_eq!(update.turn_index, 0);
        assert_eq!(update.round_number, 1);
        assert_eq!(update.team_scores.len(), 2);
        assert!(update.words_guessed.is_empty());
    }

    #[tokio::test]
    async fn test_sync_happy_path() {
        let ledger = Arc::new(FakeLedger::default());
        let handle = LedgerSyncHandle::spawn(ledger.clone(), 16);
        let state = sample_state();

        handle.track(&state);
        wait_for_calls(&ledger, &["create"]).await;
        handle.update(&state);
        wait_for_calls(&ledger, &["create", "update:1"]).await;
        handle.close(state.id(), Utc::now());
        wait_for_calls(&ledger, &["create", "update:1", "close"]).await;
    }

    #[tokio::test]
    async fn test_sync_retries_after_failure() {
        let ledger = Arc::new(FakeLedger::default());
        ledger.failing.store(true, Ordering::SeqCst);
        let handle = LedgerSyncHandle::spawn(ledger.clone(), 16);
        let state = sample_state();

        handle.track(&state);
        handle.update(&state);
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert!(ledger.calls.lock().await.is_empty());

        ledger.failing.store(false, Ordering::SeqCst);
        handle.close(state.id(), Utc::now());
        wait_for_calls(&ledger, &["create", "update:1", "close"]).await;
    }

    #[tokio::test]
    async fn test_updates_for_other_matches_are_ignored() {
        let ledger = Arc::new(FakeLedger::default());
        let handle = LedgerSyncHandle::spawn(ledger.clone(), 16);
        let tracked = sample_state();
        let other = sample_state();

        handle.track(&tracked);
        handle.update(&other);
        handle.close(tracked.id(), Utc::now());
        wait_for_calls(&ledger, &["create", "close"]).await;
    }

    #[tokio::test]
    async fn test_replaced_match_is_closed_before_next_is_created() {
        let ledger = Arc::new(FakeLedger::default());
        let handle = LedgerSyncHandle::spawn(ledger.clone(), 16);
        let first = sample_state();
        let second = sample_state();

        handle.track(&first);
        wait_for_calls(&ledger, &["create"]).await;
        handle.close(first.id(), Utc::now());
        handle.track(&second);
        wait_for_calls(&ledger, &["create", "close", "create"]).await;

        handle.update(&second);
        wait_for_calls(&ledger, &["create", "close", "create", "update:1"]).await;
    }

    #[tokio::test]
    async fn test_restored_match_reuses_remote_record() {
        let ledger = Arc::new(FakeLedger::default());
        let state = sample_state();

        let before_restart = LedgerSyncHandle::spawn(ledger.clone(), 16);
        before_restart.track(&state);
        wait_for_calls(&ledger, &["create"]).await;
        drop(before_restart);

        let after_restart = LedgerSyncHandle::spawn(ledger.clone(), 16);
        after_restart.resume(&state);
        after_restart.update(&state);
        wait_for_calls(&ledger, &["create", "find", "update:1"]).await;
        after_restart.close(state.id(), Utc::now());
        wait_for_calls(&ledger, &["create", "find", "update:1", "close"]).await;
        assert_eq!(ledger.records.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_restored_match_without_remote_record_is_created() {
        let ledger = Arc::new(FakeLedger::default());
        let handle = LedgerSyncHandle::spawn(ledger.clone(), 16);
        let state = sample_state();

        handle.resume(&state);
        wait_for_calls(&ledger, &["find", "create"]).await;
    }
}
