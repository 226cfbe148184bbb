//! Auth routing: one transport chosen at startup, a memoised identity
//! handshake, and the team-scope rule for multi-team identities.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use url::Url;

use crate::error::{ParleyError, Result};
use crate::methods::ApiMethod;
use crate::transport::{NetworkSettings, Transport};
use crate::{AuthSettings, Credential};

/// Uniform call surface used by the directory and the query engine.
///
/// Callers never branch on the credential shape.
#[async_trait]
pub trait WorkspaceApi: Send + Sync {
    async fn call(
        &self,
        method: &ApiMethod,
        params: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<Value>;
}

/// Who the credential belongs to, as reported by `auth.test`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    #[serde(default)]
    pub user: Option<String>,
    pub team_id: String,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub enterprise_id: Option<String>,
}

/// The team boundary requests are evaluated against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamScope {
    pub team_id: String,
    pub is_multi_team: bool,
    /// Number of teams reachable under the identity, when known.
    pub reachable_teams: Option<usize>,
    pub routing_host: String,
}

struct Handshake {
    identity: Identity,
    scope: TeamScope,
    base: Url,
}

pub struct AuthRouter {
    transport: Transport,
    pinned_team: Option<String>,
    handshake: OnceCell<Handshake>,
}

impl AuthRouter {
    /// Build the router from configuration. Credential problems are fatal here.
    pub fn from_settings(auth: &AuthSettings, network: &NetworkSettings) -> Result<Self> {
        let credential = Credential::from_settings(auth)?;
        Self::new(&credential, auth.pinned_team(), network)
    }

    pub fn new(
        credential: &Credential,
        pinned_team: Option<&str>,
        network: &NetworkSettings,
    ) -> Result<Self> {
        let transport = Transport::for_credential(credential, network)?;
        Ok(Self {
            transport,
            pinned_team: pinned_team.map(String::from),
            handshake: OnceCell::new(),
        })
    }

    /// The transport selected at startup.
    pub fn resolve_transport(&self) -> &Transport {
        &self.transport
    }

    pub async fn identity(&self, cancel: &CancellationToken) -> Result<Identity> {
        Ok(self.handshake(cancel).await?.identity.clone())
    }

    /// Scope for a request. An explicitly requested team wins, then the
    /// pinned team, then the identity's home team.
    pub async fn resolve_scope(
        &self,
        requested_team: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<TeamScope> {
        let handshake = self.handshake(cancel).await?;
        let mut scope = handshake.scope.clone();
        if let Some(team) = requested_team.map(str::trim).filter(|t| !t.is_empty()) {
            scope.team_id = team.to_string();
        }
        Ok(scope)
    }

    async fn handshake(&self, cancel: &CancellationToken) -> Result<&Handshake> {
        self.handshake
            .get_or_try_init(|| self.perform_handshake(cancel))
            .await
    }

    #[instrument(skip_all)]
    async fn perform_handshake(&self, cancel: &CancellationToken) -> Result<Handshake> {
        let body = self.transport.execute(&ApiMethod::AUTH_TEST, &[], cancel).await?;
        let identity: Identity = serde_json::from_value(body)?;

        let reachable_teams = match (&identity.enterprise_id, &self.pinned_team) {
            (Some(enterprise), None) => {
                info!("identity belongs to enterprise {}, counting reachable teams", enterprise);
                let count = self.count_teams(cancel).await?;
                if count == Some(0) {
                    return Err(ParleyError::Configuration(format!(
                        "identity belongs to enterprise {} but no teams are reachable; set team_id to pin a team",
                        enterprise
                    )));
                }
                count
            }
            _ => Some(1),
        };
        let is_multi_team = self.pinned_team.is_none() && reachable_teams != Some(1);

        let base = self.routing_base(&identity);
        let scope = TeamScope {
            team_id: self
                .pinned_team
                .clone()
                .unwrap_or_else(|| identity.team_id.clone()),
            is_multi_team,
            reachable_teams,
            routing_host: base.as_str().to_string(),
        };

        info!(
            "handshake complete: user={} team={} multi_team={} transport={}",
            identity.user_id,
            scope.team_id,
            scope.is_multi_team,
            self.transport.strategy().name()
        );
        Ok(Handshake {
            identity,
            scope,
            base,
        })
    }

    /// Count teams under an enterprise identity. `None` when the listing is
    /// unavailable, which callers treat as "several".
    async fn count_teams(&self, cancel: &CancellationToken) -> Result<Option<usize>> {
        let mut count = 0usize;
        let mut cursor: Option<String> = None;

        loop {
            let mut params = vec![("limit", "100".to_string())];
            if let Some(c) = cursor.as_ref() {
                params.push(("cursor", c.clone()));
            }

            let page = match self
                .transport
                .execute(&ApiMethod::AUTH_TEAMS_LIST, &params, cancel)
                .await
            {
                Ok(page) => page,
                Err(ParleyError::Cancelled) => return Err(ParleyError::Cancelled),
                Err(err) => {
                    warn!("cannot list teams ({}), treating identity as multi-team", err);
                    return Ok(None);
                }
            };

            count += page
                .get("teams")
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0);

            cursor = next_cursor(&page);
            if cursor.is_none() {
                break;
            }
        }

        Ok(Some(count))
    }

    /// Impersonated sessions talk to the workspace's own host; delegated
    /// tokens stay on the configured API base.
    fn routing_base(&self, identity: &Identity) -> Url {
        let api_base = self.transport.api_base().clone();
        if !self.transport.is_impersonated() {
            return api_base;
        }
        match identity.url.as_deref().map(Url::parse) {
            Some(Ok(host)) => host.join("api").unwrap_or(api_base),
            Some(Err(err)) => {
                warn!("workspace url from auth.test is unusable ({}), staying on api base", err);
                api_base
            }
            None => api_base,
        }
    }
}

#[async_trait]
impl WorkspaceApi for AuthRouter {
    async fn call(
        &self,
        method: &ApiMethod,
        params: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let handshake = self.handshake(cancel).await?;

        let mut params = params.to_vec();
        if method.team_scoped {
            match &self.pinned_team {
                Some(team) => params.push(("team_id", team.clone())),
                None if handshake.scope.is_multi_team => {
                    return Err(ParleyError::TeamAmbiguous {
                        method: method.name.to_string(),
                    })
                }
                None => {}
            }
        }

        self.transport
            .execute_at(&handshake.base, method, &params, cancel)
            .await
    }
}

/// Non-empty `response_metadata.next_cursor`, if upstream has more pages.
pub fn next_cursor(page: &Value) -> Option<String> {
    page.get("response_metadata")
        .and_then(|m| m.get("next_cursor"))
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn network(server: &MockServer) -> NetworkSettings {
        NetworkSettings {
            api_base: server.url("/api"),
            pace_requests: false,
            ..NetworkSettings::default()
        }
    }

    fn delegated() -> Credential {
        Credential::Delegated {
            token: "xoxp-test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_single_team_scope_and_memoised_handshake() {
        let server = MockServer::start();
        let auth = server.mock(|when, then| {
            when.method(POST).path("/api/auth.test");
            then.status(200).json_body(json!({
                "ok": true, "user_id": "U1", "team_id": "T1", "url": "https://acme.slack.com/"
            }));
        });
        let info = server.mock(|when, then| {
            when.method(POST).path("/api/team.info").body_excludes("team_id");
            then.status(200).json_body(json!({"ok": true, "team": {"id": "T1"}}));
        });

        let router = AuthRouter::new(&delegated(), None, &network(&server)).unwrap();
        let cancel = CancellationToken::new();

        let scope = router.resolve_scope(None, &cancel).await.unwrap();
        assert_eq!(scope.team_id, "T1");
        assert!(!scope.is_multi_team);
        assert_eq!(scope.reachable_teams, Some(1));

        router.call(&ApiMethod::TEAM_INFO, &[], &cancel).await.unwrap();
        router.call(&ApiMethod::TEAM_INFO, &[], &cancel).await.unwrap();

        auth.assert_calls(1);
        info.assert_calls(2);
    }

    #[tokio::test]
    async fn test_multi_team_requires_disambiguation_for_team_scoped_methods() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/auth.test");
            then.status(200).json_body(json!({
                "ok": true, "user_id": "U1", "team_id": "T1", "enterprise_id": "E1"
            }));
        });
        server.mock(|when, then| {
            when.method(POST).path("/api/auth.teams.list");
            then.status(200).json_body(json!({
                "ok": true, "teams": [{"id": "T1"}, {"id": "T2"}]
            }));
        });
        let info = server.mock(|when, then| {
            when.method(POST).path("/api/team.info");
            then.status(200).json_body(json!({"ok": true}));
        });
        let history = server.mock(|when, then| {
            when.method(POST).path("/api/conversations.history");
            then.status(200).json_body(json!({"ok": true, "messages": []}));
        });

        let router = AuthRouter::new(&delegated(), None, &network(&server)).unwrap();
        let cancel = CancellationToken::new();

        let scope = router.resolve_scope(None, &cancel).await.unwrap();
        assert!(scope.is_multi_team);
        assert_eq!(scope.reachable_teams, Some(2));

        let err = router.call(&ApiMethod::TEAM_INFO, &[], &cancel).await.unwrap_err();
        assert_eq!(err.kind(), "team_ambiguous");
        info.assert_calls(0);

        router
            .call(
                &ApiMethod::CONVERSATIONS_HISTORY,
                &[("channel", "C1".to_string())],
                &cancel,
            )
            .await
            .unwrap();
        history.assert_calls(1);
    }

    #[tokio::test]
    async fn test_pinned_team_is_forwarded_and_skips_team_listing() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/auth.test");
            then.status(200).json_body(json!({
                "ok": true, "user_id": "U1", "team_id": "T1", "enterprise_id": "E1"
            }));
        });
        let teams = server.mock(|when, then| {
            when.method(POST).path("/api/auth.teams.list");
            then.status(200).json_body(json!({"ok": true, "teams": []}));
        });
        let info = server.mock(|when, then| {
            when.method(POST).path("/api/team.info").body_includes("team_id=T2");
            then.status(200).json_body(json!({"ok": true}));
        });

        let router = AuthRouter::new(&delegated(), Some("T2"), &network(&server)).unwrap();
        let cancel = CancellationToken::new();

        let scope = router.resolve_scope(None, &cancel).await.unwrap();
        assert_eq!(scope.team_id, "T2");
        assert!(!scope.is_multi_team);

        router.call(&ApiMethod::TEAM_INFO, &[], &cancel).await.unwrap();
        info.assert_calls(1);
        teams.assert_calls(0);
    }

    #[tokio::test]
    async fn test_failed_team_listing_refuses_to_guess() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/auth.test");
            then.status(200).json_body(json!({
                "ok": true, "user_id": "U1", "team_id": "T1", "enterprise_id": "E1"
            }));
        });
        server.mock(|when, then| {
            when.method(POST).path("/api/auth.teams.list");
            then.status(200).json_body(json!({"ok": false, "error": "not_allowed_token_type"}));
        });

        let router = AuthRouter::new(&delegated(), None, &network(&server)).unwrap();
        let cancel = CancellationToken::new();

        let scope = router.resolve_scope(None, &cancel).await.unwrap();
        assert!(scope.is_multi_team);
        assert_eq!(scope.reachable_teams, None);
        let err = router.call(&ApiMethod::TEAM_INFO, &[], &cancel).await.unwrap_err();
        assert!(matches!(err, ParleyError::TeamAmbiguous { .. }));
    }

    #[tokio::test]
    async fn test_enterprise_without_teams_needs_a_pinned_team() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/auth.test");
            then.status(200).json_body(json!({
                "ok": true, "user_id": "U1", "team_id": "T1", "enterprise_id": "E1"
            }));
        });
        server.mock(|when, then| {
            when.method(POST).path("/api/auth.teams.list");
            then.status(200).json_body(json!({"ok": true, "teams": []}));
        });
        let history = server.mock(|when, then| {
            when.method(POST).path("/api/conversations.history");
            then.status(200).json_body(json!({"ok": true, "messages": []}));
        });

        let router = AuthRouter::new(&delegated(), None, &network(&server)).unwrap();
        let cancel = CancellationToken::new();

        let err = router.resolve_scope(None, &cancel).await.unwrap_err();
        assert_eq!(err.kind(), "configuration");
        assert!(err.to_string().contains("team_id"));

        let err = router
            .call(
                &ApiMethod::CONVERSATIONS_HISTORY,
                &[("channel", "C1".to_string())],
                &cancel,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "configuration");
        history.assert_calls(0);
    }

    #[tokio::test]
    async fn test_impersonated_calls_route_to_workspace_host() {
        let api = MockServer::start();
        let workspace = MockServer::start();
        let workspace_url = workspace.url("/");
        api.mock(|when, then| {
            when.method(POST)
                .path("/api/auth.test")
                .header("cookie", "d=xoxd-1")
                .body_includes("token=xoxc-1");
            then.status(200).json_body(json!({
                "ok": true, "user_id": "U1", "team_id": "T1", "url": workspace_url
            }));
        });
        let history = workspace.mock(|when, then| {
            when.method(POST)
                .path("/api/conversations.history")
                .header("cookie", "d=xoxd-1")
                .body_includes("token=xoxc-1");
            then.status(200).json_body(json!({"ok": true, "messages": []}));
        });

        let credential = Credential::Impersonated {
            token: "xoxc-1".to_string(),
            cookie: "xoxd-1".to_string(),
        };
        let router = AuthRouter::new(&credential, None, &network(&api)).unwrap();
        router
            .call(
                &ApiMethod::CONVERSATIONS_HISTORY,
                &[("channel", "C1".to_string())],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        history.assert_calls(1);
    }

    #[tokio::test]
    async fn test_auth_failure_on_handshake_is_fatal() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/auth.test");
            then.status(200).json_body(json!({"ok": false, "error": "token_revoked"}));
        });

        let router = AuthRouter::new(&delegated(), None, &network(&server)).unwrap();
        let err = router
            .call(&ApiMethod::USERS_LIST, &[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ParleyError::Auth { code, .. } if code == "token_revoked"));
    }

    #[test]
    fn test_next_cursor_ignores_empty() {
        assert_eq!(
            next_cursor(&json!({"response_metadata": {"next_cursor": "abc"}})),
            Some("abc".to_string())
        );
        assert_eq!(next_cursor(&json!({"response_metadata": {"next_cursor": ""}})), None);
        assert_eq!(next_cursor(&json!({})), None);
    }
}
