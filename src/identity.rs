use serde::{Deserialize, Serialize};

use crate::config::PlayerConfig;

/// Authenticated principal supplied by whatever identity provider the front
/// end uses. The engine only records who owns a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub email: String,
    pub display_name: String,
}

impl From<&PlayerConfig> for Principal {
    fn from(player: &PlayerConfig) -> Self {
        Self {
            id: player.id.clone(),
            email: player.email.clone(),
            display_name: player.display_name.clone(),
        }
    }
}
