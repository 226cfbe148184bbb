//! Parley auth bridge.
//!
//! Turns configured credential material into one of two upstream transports,
//! resolves which team a request targets, and paces every outbound call.
//!
//! - **Credential**: delegated token, or session token plus session cookie
//! - **Transport**: the tagged strategy that attaches the credential
//! - **AuthRouter**: lazy identity handshake, team scope, `WorkspaceApi` impl
//! - **RateGate**: per-tier spacing and retry-after handling

pub mod error;
pub mod methods;
pub mod rate_gate;
pub mod router;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{ParleyError, Result};
pub use methods::ApiMethod;
pub use rate_gate::{EndpointClass, RateGate};
pub use router::{AuthRouter, Identity, TeamScope, WorkspaceApi};
pub use transport::{NetworkSettings, Strategy, Transport};

use serde::Deserialize;
use tracing::{info, warn};

/// Credential material (`[auth]` in parley.toml).
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Pre-authorized OAuth token (`xoxp-…` / `xoxb-…`).
    pub delegated_token: Option<String>,
    /// Browser session token (`xoxc-…`).
    pub session_token: Option<String>,
    /// Value of the browser's `d` cookie (`xoxd-…`).
    pub session_cookie: Option<String>,
    /// Team to pin requests to under a multi-team identity.
    pub team_id: Option<String>,
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("delegated_token", &self.delegated_token.as_ref().map(|_| "<redacted>"))
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("session_cookie", &self.session_cookie.as_ref().map(|_| "<redacted>"))
            .field("team_id", &self.team_id)
            .finish()
    }
}

impl AuthSettings {
    pub fn pinned_team(&self) -> Option<&str> {
        non_empty(self.team_id.as_deref())
    }
}

/// Loaded credential. Immutable for the life of the process.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Delegated { token: String },
    Impersonated { token: String, cookie: String },
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Delegated { .. } => f.write_str("Credential::Delegated(<redacted>)"),
            Credential::Impersonated { .. } => f.write_str("Credential::Impersonated(<redacted>)"),
        }
    }
}

impl Credential {
    /// Pick a credential from settings.
    ///
    /// A delegated token wins unconditionally. Otherwise both the session
    /// token and the session cookie are required.
    pub fn from_settings(settings: &AuthSettings) -> Result<Self> {
        if let Some(token) = non_empty(settings.delegated_token.as_deref()) {
            if !token.starts_with("xoxp-") && !token.starts_with("xoxb-") {
                warn!("delegated token does not look like an OAuth token (expected xoxp- or xoxb-)");
            }
            info!("using delegated credential");
            return Ok(Credential::Delegated {
                token: token.to_string(),
            });
        }

        let token = non_empty(settings.session_token.as_deref());
        let cookie = non_empty(settings.session_cookie.as_deref());
        match (token, cookie) {
            (Some(token), Some(cookie)) => {
                info!("using impersonated session credential");
                Ok(Credential::Impersonated {
                    token: token.to_string(),
                    cookie: normalize_cookie(cookie),
                })
            }
            (Some(_), None) => Err(ParleyError::Configuration(
                "session token is set but the session cookie is missing".to_string(),
            )),
            (None, Some(_)) => Err(ParleyError::Configuration(
                "session cookie is set but the session token is missing".to_string(),
            )),
            (None, None) => Err(ParleyError::Configuration(
                "no credentials configured: set a delegated token, or a session token plus session cookie"
                    .to_string(),
            )),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Credential::Delegated { .. } => "delegated",
            Credential::Impersonated { .. } => "impersonated",
        }
    }
}

/// Accept the cookie either bare or as copied from a header (`d=…;`).
fn normalize_cookie(raw: &str) -> String {
    let value = raw.trim().trim_end_matches(';');
    value.strip_prefix("d=").unwrap_or(value).to_string()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(delegated: Option<&str>, token: Option<&str>, cookie: Option<&str>) -> AuthSettings {
        AuthSettings {
            delegated_token: delegated.map(String::from),
            session_token: token.map(String::from),
            session_cookie: cookie.map(String::from),
            team_id: None,
        }
    }

    #[test]
    fn test_delegated_wins_over_session_pair() {
        let credential =
            Credential::from_settings(&settings(Some("xoxp-1"), Some("xoxc-1"), Some("xoxd-1"))).unwrap();
        assert_eq!(
            credential,
            Credential::Delegated {
                token: "xoxp-1".to_string()
            }
        );
    }

    #[test]
    fn test_session_pair_builds_impersonated() {
        let credential =
            Credential::from_settings(&settings(None, Some("xoxc-1"), Some("d=xoxd-1;"))).unwrap();
        assert_eq!(
            credential,
            Credential::Impersonated {
                token: "xoxc-1".to_string(),
                cookie: "xoxd-1".to_string(),
            }
        );
    }

    #[test]
    fn test_incomplete_session_pair_is_configuration_error() {
        let err = Credential::from_settings(&settings(None, Some("xoxc-1"), None)).unwrap_err();
        assert_eq!(err.kind(), "configuration");
        assert!(err.to_string().contains("cookie is missing"));

        let err = Credential::from_settings(&settings(None, None, Some("xoxd-1"))).unwrap_err();
        assert!(err.to_string().contains("token is missing"));

        let err = Credential::from_settings(&settings(Some("  "), None, None)).unwrap_err();
        assert!(err.to_string().contains("no credentials configured"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let credential = Credential::Impersonated {
            token: "xoxc-secret".to_string(),
            cookie: "xoxd-secret".to_string(),
        };
        assert!(!format!("{:?}", credential).contains("secret"));
        let settings = settings(Some("xoxp-secret"), None, None);
        assert!(!format!("{:?}", settings).contains("secret"));
    }
}
