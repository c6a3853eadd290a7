use serde::{Deserialize, Serialize};

use crate::ids::{EventId, UserId};
use crate::role::GlobalRole;

/// The principal record stored behind an opaque session token.
///
/// Sessions live in the shared hot store with a sliding TTL; every field
/// here is what the gateway needs to authenticate a socket without touching
/// the durable store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub user_id: UserId,
    pub user_name: String,
    #[serde(default = "default_role")]
    pub global_role: GlobalRole,
    #[serde(default)]
    pub current_event_id: Option<EventId>,
}

fn default_role() -> GlobalRole {
    GlobalRole::Viewer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_role_defaults_to_viewer() {
        let record: SessionRecord =
            serde_json::from_str(r#"{"user_id": 7, "user_name": "Ana"}"#).unwrap();
        assert_eq!(record.global_role, GlobalRole::Viewer);
        assert!(record.current_event_id.is_none());
    }
}
