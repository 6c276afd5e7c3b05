use crate::config::{ThemeSourceType, ThemesConfig};
use crate::error::{ContentError, ThemeError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const MIN_THEME_WORDS: usize = 100;
pub const MAX_WORD_CHARS: usize = 64;
pub const MAX_WORD_TOKENS: usize = 10;
pub const MIN_THEME_TEAMS: usize = 2;
/// Themes created through the strict path carry exactly this many team names.
pub const STRICT_THEME_TEAMS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Theme {
    pub id: Uuid,
    pub language: String,
    pub name: String,
    pub difficulty: Difficulty,
    pub teams: Vec<String>,
    pub words: Vec<String>,
}

impl Theme {
    /// Checks the rules every playable theme must satisfy.
    pub fn validate(&self) -> Result<(), ThemeError> {
        if self.teams.len() < MIN_THEME_TEAMS {
            return Err(ThemeError::TeamCount {
                name: self.name.clone(),
                expected: format!("at least {}", MIN_THEME_TEAMS),
                got: self.teams.len(),
            });
        }
        self.validate_teams_unique()?;
        self.validate_words()
    }

    /// Creation-time validation: everything `validate` checks, plus the
    /// fixed team count.
    pub fn validate_strict(&self) -> Result<(), ThemeError> {
        if self.teams.len() != STRICT_THEME_TEAMS {
            return Err(ThemeError::TeamCount {
                name: self.name.clone(),
                expected: STRICT_THEME_TEAMS.to_string(),
                got: self.teams.len(),
            });
        }
        self.validate()
    }

    pub fn has_team(&self, team: &str) -> bool {
        self.teams.iter().any(|t| t == team)
    }

    pub fn contains_word(&self, word: &str) -> bool {
        self.words.iter().any(|w| w == word)
    }

    fn validate_teams_unique(&self) -> Result<(), ThemeError> {
        let mut seen = HashSet::new();
        for team in &self.teams {
            if !seen.insert(team.as_str()) {
                return Err(ThemeError::DuplicateTeam(team.clone()));
            }
        }
        Ok(())
    }

    fn validate_words(&self) -> Result<(), ThemeError> {
        if self.words.len() < MIN_THEME_WORDS {
            return Err(ThemeError::TooFewWords {
                name: self.name.clone(),
                min: MIN_THEME_WORDS,
                got: self.words.len(),
            });
        }

        let mut seen = HashSet::with_capacity(self.words.len());
        for word in &self.words {
            if word.trim().is_empty() {
                return Err(ThemeError::EmptyWord);
            }
            if word.chars().count() > MAX_WORD_CHARS {
                return Err(ThemeError::WordTooLong {
                    word: word.clone(),
                    max: MAX_WORD_CHARS,
                });
            }
            if word.split(' ').filter(|t| !t.is_empty()).count() > MAX_WORD_TOKENS {
                return Err(ThemeError::TooManyTokens {
                    word: word.clone(),
                    max: MAX_WORD_TOKENS,
                });
            }
            if !seen.insert(word.to_lowercase()) {
                return Err(ThemeError::DuplicateWord(word.clone()));
            }
        }
        Ok(())
    }
}

pub struct ThemeParser;

impl ThemeParser {
    /// Parses a JSON array of themes. Entries that fail validation are
    /// dropped with a warning so one bad theme does not hide the rest.
    #[tracing::instrument(skip(content), fields(content.length = content.len()))]
    pub fn parse_themes(content: &str) -> Result<Vec<Theme>, ContentError> {
        let raw: Vec<Theme> = serde_json::from_str(content)
            .map_err(|e| ContentError::Parse(format!("Failed to parse JSON: {}", e)))?;

        let themes = raw
            .into_iter()
            .map(|mut theme| {
                theme.words = theme
                    .words
                    .into_iter()
                    .map(|w| w.trim().to_string())
                    .filter(|w| !w.is_empty())
                    .collect();
                theme.teams = theme.teams.into_iter().map(|t| t.trim().to_string()).collect();
                theme
            })
            .filter(|theme| match theme.validate() {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(
                        theme.id = %theme.id,
                        theme.name = %theme.name,
                        error = %e,
                        "Skipping invalid theme"
                    );
                    false
                }
            })
            .collect();

        Ok(themes)
    }
}

#[tracing::instrument(skip(config), fields(
    themes.source_type = ?config.source_type,
    themes.file_path = ?config.file_path,
    themes.http_url = ?config.http_url
))]
async fn load_raw_content(config: &ThemesConfig) -> Result<String, ContentError> {
    match config.source_type {
        ThemeSourceType::File => {
            let file_path = config.file_path.as_ref().ok_or_else(|| {
                ContentError::Config("File path required for file source".to_string())
            })?;
            tracing::debug!(file.path = %file_path, "Loading themes from file");
            tokio::fs::read_to_string(file_path)
                .await
                .map_err(|e| ContentError::FileRead {
                    path: file_path.clone(),
                    source: e,
                })
        }
        ThemeSourceType::Http => {
            let url = config.http_url.as_ref().ok_or_else(|| {
                ContentError::Config("HTTP URL required for http source".to_string())
            })?;
            tracing::debug!(http.url = %url, "Fetching themes from URL");
            let response = reqwest::get(url).await.map_err(|e| ContentError::HttpFetch {
                url: url.clone(),
                source: e,
            })?;

            response.text().await.map_err(|e| ContentError::HttpFetch {
                url: url.clone(),
                source: e,
            })
        }
    }
}

/// Read-mostly cache of the themes a player can pick from.
pub struct ThemeLibrary {
    themes: RwLock<Arc<Vec<Theme>>>,
    config: Option<ThemesConfig>,
}

impl ThemeLibrary {
    #[tracing::instrument(skip(config))]
    pub async fn load(config: ThemesConfig) -> Result<Self, ContentError> {
        let raw = load_raw_content(&config).await?;
        let themes = ThemeParser::parse_themes(&raw)?;
        tracing::info!(themes.count = themes.len(), "Theme library loaded");
        Ok(Self {
            themes: RwLock::new(Arc::new(themes)),
            config: Some(config),
        })
    }

    /// A fixed library with no backing source; `refresh` is a no-op.
    pub fn from_themes(themes: Vec<Theme>) -> Self {
        Self {
            themes: RwLock::new(Arc::new(themes)),
            config: None,
        }
    }

    pub async fn themes(&self) -> Arc<Vec<Theme>> {
        self.themes.read().await.clone()
    }

    pub async fn fetch_theme(&self, id: Uuid) -> Result<Theme, ThemeError> {
        self.themes
            .read()
            .await
            .iter()
            .find(|theme| theme.id == id)
            .cloned()
            .ok_or(ThemeError::NotFound(id))
    }

    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self) -> Result<(), ContentError> {
        let Some(config) = self.config.as_ref() else {
            return Ok(());
        };
        let raw = load_raw_content(config).await?;
        let themes = ThemeParser::parse_themes(&raw)?;
        let mut guard = self.themes.write().await;
        *guard = Arc::new(themes);
        tracing::info!(themes.count = guard.len(), "Theme library refreshed");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn theme_fixture(word_count: usize, teams: &[&str]) -> Theme {
    Theme {
        id: Uuid::new_v4(),
        language: "en".to_string(),
        name: "Fixture".to_string(),
        difficulty: Difficulty::Medium,
        teams: teams.iter().map(|t| t.to_string()).collect(),
        words: (0..word_count).map(|i| format!("word {}", i)).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEN_TEAMS: [&str; 10] = [
        "Owls", "Foxes", "Bears", "Wolves", "Hares", "Lynx", "Moose", "Otters", "Crows", "Seals",
    ];

    #[test]
    fn test_validate_accepts_minimal_theme() {
        let theme = theme_fixture(100, &["A", "B"]);
        assert_eq!(theme.validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_too_few_words() {
        let theme = theme_fixture(99, &["A", "B"]);
        assert!(matches!(
            theme.validate(),
            Err(ThemeError::TooFewWords { got: 99, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_case_insensitive_duplicates() {
        let mut theme = theme_fixture(100, &["A", "B"]);
        theme.words.push("WORD 3".to_string());
        assert_eq!(
            theme.validate(),
            Err(ThemeError::DuplicateWord("WORD 3".to_string()))
        );
    }

    #[test]
    fn test_validate_word_length_and_tokens() {
        let mut theme = theme_fixture(100, &["A", "B"]);
        theme.words[0] = "x".repeat(65);
        assert!(matches!(
            theme.validate(),
            Err(ThemeError::WordTooLong { max: 64, .. })
        ));

        let mut theme = theme_fixture(100, &["A", "B"]);
        theme.words[0] = "a b c d e f g h i j k".to_string();
        assert!(matches!(
            theme.validate(),
            Err(ThemeError::TooManyTokens { max: 10, .. })
        ));

        let mut theme = theme_fixture(100, &["A", "B"]);
        theme.words[0] = "a b c d e f g h i j".to_string();
        assert_eq!(theme.validate(), Ok(()));
    }

    #[test]
    fn test_strict_validation_requires_ten_teams() {
        let theme = theme_fixture(100, &["A", "B", "C"]);
        assert!(theme.validate().is_ok());
        assert!(matches!(
            theme.validate_strict(),
            Err(ThemeError::TeamCount { got: 3, .. })
        ));

        let theme = theme_fixture(100, &TEN_TEAMS);
        assert_eq!(theme.validate_strict(), Ok(()));
    }

    #[test]
    fn test_parse_themes_skips_invalid_entries() {
        let good = theme_fixture(100, &["A", "B"]);
        let bad = theme_fixture(10, &["A", "B"]);
        let content = serde_json::to_string(&vec![good.clone(), bad]).unwrap();

        let themes = ThemeParser::parse_themes(&content).unwrap();
        assert_eq!(themes, vec![good]);
    }

    #[test]
    fn test_parse_themes_trims_words() {
        let mut theme = theme_fixture(100, &["A", "B"]);
        theme.words[0] = "  padded  ".to_string();
        theme.words.push("   ".to_string());
        let content = serde_json::to_string(&vec![theme]).unwrap();

        let themes = ThemeParser::parse_themes(&content).unwrap();
        assert_eq!(themes[0].words.len(), 100);
        assert_eq!(themes[0].words[0], "padded");
    }

    #[test]
    fn test_parse_themes_rejects_garbage() {
        assert!(matches!(
            ThemeParser::parse_themes("not json"),
            Err(ContentError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_theme_by_id() {
        let theme = theme_fixture(100, &["A", "B"]);
        let library = ThemeLibrary::from_themes(vec![theme.clone()]);

        assert_eq!(library.fetch_theme(theme.id).await, Ok(theme));
        let missing = Uuid::new_v4();
        assert_eq!(
            library.fetch_theme(missing).await,
            Err(ThemeError::NotFound(missing))
        );
        assert!(library.refresh().await.is_ok());
    }
}
