use serde::{Deserialize, Serialize};

/// Identity snapshot returned by the profile endpoint. The login response
/// carries the same core fields, so both decode into this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

/// The client's view of "currently authenticated".
///
/// Created on successful login or on the startup probe, cleared on logout or
/// on unrecoverable renewal failure. Mutated only by the session
/// coordinator; everyone else observes it through a watch channel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Session {
    pub authenticated: bool,
    pub identity: Option<Identity>,
}

impl Session {
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn authenticated(identity: Identity) -> Self {
        Self {
            authenticated: true,
            identity: Some(identity),
        }
    }
}
