use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::game_logic::MatchState;

pub mod ledger;

pub use ledger::{HttpLedger, LedgerSyncHandle, LedgerUpdate, RemoteLedger};

/// Local persistence backend for the single in-progress match.
#[async_trait]
pub trait MatchStore: Send + Sync {
    async fn load_match(&self) -> Result<Option<MatchState>, StoreError>;
    async fn save_match(&self, state: &MatchState) -> Result<(), StoreError>;
    async fn clear_match(&self) -> Result<(), StoreError>;
}

/// Loads the persisted match, treating anything unreadable or inconsistent
/// as "no match in progress".
#[tracing::instrument(skip(store))]
pub async fn restore(store: &dyn MatchStore) -> Option<MatchState> {
    match store.load_match().await {
        Ok(Some(state)) => match state.validate() {
            Ok(()) => {
                tracing::info!(
                    match.id = %state.id(),
                    round = state.round_number(),
                    team = %state.current_team(),
                    "Restored match in progress"
                );
                Some(state)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Discarding inconsistent persisted match");
                None
            }
        },
        Ok(None) => {
            tracing::debug!("No persisted match found");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read persisted match, starting fresh");
            None
        }
    }
}

/// Stores the match as a JSON document on disk. Writes go to a sibling temp
/// file first and are renamed into place.
#[derive(Debug, Clone)]
pub struct FileMatchStore {
    path: PathBuf,
}

impl FileMatchStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl MatchStore for FileMatchStore {
    async fn load_match(&self) -> Result<Option<MatchState>, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn save_match(&self, state: &MatchState) -> Result<(), StoreError> {
        let json = serde_json::to_vec(state)?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        Ok(())
    }

    async fn clear_match(&self) -> Result<(), StoreError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

/// Keeps the serialized match in memory. Saves can be made to fail so the
/// session's degrade-and-retry path can be exercised.
#[derive(Debug, Default)]
pub struct MemoryMatchStore {
    document: Mutex<Option<String>>,
    fail_saves: AtomicBool,
}

impl MemoryMatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub async fn raw_document(&self) -> Option<String> {
        self.document.lock().await.clone()
    }

    pub async fn set_raw_document(&self, document: Option<String>) {
        *self.document.lock().await = document;
    }
}

#[async_trait]
impl MatchStore for MemoryMatchStore {
    async fn load_match(&self) -> Result<Option<MatchState>, StoreError> {
        match self.document.lock().await.as_deref() {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    async fn save_match(&self, state: &MatchState) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Io {
                path: "memory".to_string(),
                source: std::io::Error::other("simulated save failure"),
            });
        }
        let json = serde_json::to_string(state)?;
        *self.document.lock().await = Some(json);
        Ok(())
    }

    async fn clear_match(&self) -> Result<(), StoreError> {
        *self.document.lock().await = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::theme_fixture;
    use crate::game_logic::{MatchRules, MatchSettings};
    use crate::identity::Principal;
    use chrono::Utc;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

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
        let mut state = MatchState::new(settings, &owner, Utc::now());
        let mut rng = StdRng::seed_from_u64(1);
        state.start_round(Utc::now(), &mut rng).unwrap();
        state.decide(true, Utc::now()).unwrap();
        state
    }

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("alias-match-test-{}", uuid::Uuid::new_v4()))
            .join("match.json")
    }

    #[tokio::test]
    async fn test_restore_without_saved_match() {
        let store = MemoryMatchStore::new();
        assert_eq!(restore(&store).await, None);
        assert_eq!(restore(&store).await, None);
    }

    #[tokio::test]
    async fn test_restore_is_idempotent() {
        let store = MemoryMatchStore::new();
        let state = sample_state();
        store.save_match(&state).await.unwrap();

        let first = restore(&store).await;
        let second = restore(&store).await;
        assert_eq!(first.as_ref(), Some(&state));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_corrupt_document_means_no_match() {
        let store = MemoryMatchStore::new();
        store.set_raw_document(Some("{ definitely not json".to_string())).await;
        assert_eq!(restore(&store).await, None);
    }

    #[tokio::test]
    async fn test_inconsistent_document_means_no_match() {
        let store = MemoryMatchStore::new();
        let state = sample_state();
        let mut json: serde_json::Value = serde_json::to_value(&state).unwrap();
        json["team_index"] = serde_json::json!(7);
        store.set_raw_document(Some(json.to_string())).await;
        assert_eq!(restore(&store).await, None);
    }

    #[tokio::test]
    async fn test_failed_save_reports_error() {
        let store = MemoryMatchStore::new();
        store.set_fail_saves(true);
        assert!(store.save_match(&sample_state()).await.is_err());
        assert_eq!(store.raw_document().await, None);
    }

    #[tokio::test]
    async fn test_file_store_round_trip_and_clear() {
        let path = temp_path();
        let store = FileMatchStore::new(&path);
        assert_eq!(restore(&store).await, None);

        let state = sample_state();
        store.save_match(&state).await.unwrap();
        assert_eq!(restore(&store).await, Some(state));

        store.clear_match().await.unwrap();
        assert_eq!(restore(&store).await, None);
        store.clear_match().await.unwrap();

        if let Some(dir) = path.parent() {
            let _ = tokio::fs::remove_dir_all(dir).await;
        }
    }

    #[tokio::test]
    async fn test_file_store_garbage_is_ignored() {
        let path = temp_path();
        let store = FileMatchStore::new(&path);
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"\x00\x01garbage").await.unwrap();

        assert_eq!(restore(&store).await, None);

        if let Some(dir) = path.parent() {
            let _ = tokio::fs::remove_dir_all(dir).await;
        }
    }
}
