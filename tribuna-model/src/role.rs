use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The capability a socket is bound to for its whole lifetime.
///
/// Computed once at socket open from the session principal and the event's
/// staff assignments; dispatchers pattern-match on it instead of comparing
/// role strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketRole {
    Viewer,
    Moderator,
    Speaker,
    Reports,
}

impl SocketRole {
    pub const ALL: [SocketRole; 4] = [
        SocketRole::Viewer,
        SocketRole::Moderator,
        SocketRole::Speaker,
        SocketRole::Reports,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SocketRole::Viewer => "viewer",
            SocketRole::Moderator => "moderator",
            SocketRole::Speaker => "speaker",
            SocketRole::Reports => "reports",
        }
    }
}

impl fmt::Display for SocketRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SocketRole {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "viewer" => Ok(SocketRole::Viewer),
            "moderator" => Ok(SocketRole::Moderator),
            "speaker" => Ok(SocketRole::Speaker),
            "reports" => Ok(SocketRole::Reports),
            _ => Err(()),
        }
    }
}

/// A user's platform-wide role, stored on the user row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GlobalRole {
    Viewer,
    // Legacy rows spell this in Spanish.
    #[serde(alias = "moderador")]
    Moderator,
    Speaker,
    Admin,
    Superadmin,
}

impl GlobalRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            GlobalRole::Viewer => "viewer",
            GlobalRole::Moderator => "moderator",
            GlobalRole::Speaker => "speaker",
            GlobalRole::Admin => "admin",
            GlobalRole::Superadmin => "superadmin",
        }
    }
}

impl FromStr for GlobalRole {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "viewer" => Ok(GlobalRole::Viewer),
            "moderator" | "moderador" => Ok(GlobalRole::Moderator),
            "speaker" => Ok(GlobalRole::Speaker),
            "admin" => Ok(GlobalRole::Admin),
            "superadmin" => Ok(GlobalRole::Superadmin),
            _ => Err(()),
        }
    }
}

impl fmt::Display for GlobalRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-event staff assignment; the authoritative source of event authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StaffRole {
    Admin,
    Moderator,
    Speaker,
}

impl StaffRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StaffRole::Admin => "admin",
            StaffRole::Moderator => "moderator",
            StaffRole::Speaker => "speaker",
        }
    }
}

impl FromStr for StaffRole {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(StaffRole::Admin),
            "moderator" => Ok(StaffRole::Moderator),
            "speaker" => Ok(StaffRole::Speaker),
            _ => Err(()),
        }
    }
}

impl fmt::Display for StaffRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_role_round_trips_lowercase() {
        for role in SocketRole::ALL {
            assert_eq!(role.as_str().parse::<SocketRole>(), Ok(role));
        }
    }

    #[test]
    fn global_role_accepts_spanish_moderator_alias() {
        assert_eq!("moderador".parse::<GlobalRole>(), Ok(GlobalRole::Moderator));
        let parsed: GlobalRole = serde_json::from_str("\"moderador\"").unwrap();
        assert_eq!(parsed, GlobalRole::Moderator);
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert!("root".parse::<SocketRole>().is_err());
    }
}
