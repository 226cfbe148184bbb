//! The two upstream transports and the HTTP plumbing they share.
//!
//! Both surfaces take form-encoded POST bodies and answer with a JSON
//! envelope carrying `ok` plus either a payload or an `error` code. They
//! differ only in how the credential travels:
//!
//! - Delegated: `Authorization: Bearer <token>` against the configured API base.
//! - Impersonated: `token` form field plus the `d` session cookie, routed to
//!   the workspace's own host once the handshake has discovered it.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, COOKIE, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};
use url::Url;

use crate::error::{ParleyError, Result};
use crate::methods::ApiMethod;
use crate::rate_gate::RateGate;
use crate::Credential;

pub const DEFAULT_API_BASE: &str = "https://slack.com/api";
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

const AUTH_FAILURE_CODES: &[&str] = &[
    "invalid_auth",
    "not_authed",
    "account_inactive",
    "token_revoked",
    "token_expired",
    "no_permission",
    "missing_scope",
];

const RETRYABLE_CODES: &[&str] = &[
    "internal_error",
    "fatal_error",
    "service_unavailable",
    "request_timeout",
];

/// Outbound HTTP settings (`[network]` in parley.toml).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub api_base: String,
    /// Proxy URL applied to every request (http, https or socks scheme).
    pub proxy: Option<String>,
    pub user_agent: Option<String>,
    /// Extra PEM root certificates, e.g. for an intercepting proxy.
    pub ca_bundle: Option<PathBuf>,
    pub tls_insecure: bool,
    pub request_timeout_secs: u64,
    pub max_rate_limit_retries: u32,
    pub pace_requests: bool,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            proxy: None,
            user_agent: None,
            ca_bundle: None,
            tls_insecure: false,
            request_timeout_secs: 30,
            max_rate_limit_retries: 3,
            pace_requests: true,
        }
    }
}

/// Build the shared reqwest client from network settings.
pub fn build_http_client(settings: &NetworkSettings) -> Result<reqwest::Client> {
    let user_agent = settings
        .user_agent
        .clone()
        .filter(|ua| !ua.trim().is_empty())
        .unwrap_or_else(|| format!("parley/{}", env!("CARGO_PKG_VERSION")));

    let mut builder = reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(Duration::from_secs(settings.request_timeout_secs.max(1)));

    if let Some(proxy) = settings.proxy.as_deref().filter(|p| !p.trim().is_empty()) {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|err| ParleyError::Configuration(format!("invalid proxy `{}`: {}", proxy, err)))?;
        builder = builder.proxy(proxy);
    }

    if let Some(path) = &settings.ca_bundle {
        let pem = std::fs::read(path).map_err(|err| {
            ParleyError::Configuration(format!("cannot read CA bundle {}: {}", path.display(), err))
        })?;
        let certs = reqwest::Certificate::from_pem_bundle(&pem).map_err(|err| {
            ParleyError::Configuration(format!("invalid CA bundle {}: {}", path.display(), err))
        })?;
        for cert in certs {
            builder = builder.add_root_certificate(cert);
        }
    }

    if settings.tls_insecure {
        warn!("TLS certificate verification is disabled");
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder
        .build()
        .map_err(|err| ParleyError::Configuration(format!("failed to build http client: {}", err)))
}

/// How the credential is attached to a request.
#[derive(Clone)]
pub enum Strategy {
    Delegated { token: String },
    Impersonated { token: String, cookie: String },
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Delegated { .. } => "delegated",
            Strategy::Impersonated { .. } => "impersonated",
        }
    }
}

impl std::fmt::Debug for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strategy").field("kind", &self.name()).finish_non_exhaustive()
    }
}

pub struct Transport {
    http: reqwest::Client,
    gate: RateGate,
    api_base: Url,
    max_rate_limit_retries: u32,
    strategy: Strategy,
}

impl Transport {
    /// Select the transport for `credential`. Delegated tokens always win.
    pub fn for_credential(credential: &Credential, settings: &NetworkSettings) -> Result<Self> {
        let strategy = match credential {
            Credential::Delegated { token } => Strategy::Delegated {
                token: token.clone(),
            },
            Credential::Impersonated { token, cookie } => Strategy::Impersonated {
                token: token.clone(),
                cookie: cookie.clone(),
            },
        };
        let api_base = Url::parse(&settings.api_base).map_err(|err| {
            ParleyError::Configuration(format!("invalid api_base `{}`: {}", settings.api_base, err))
        })?;
        let gate = if settings.pace_requests {
            RateGate::new()
        } else {
            RateGate::unpaced()
        };

        Ok(Self {
            http: build_http_client(settings)?,
            gate,
            api_base,
            max_rate_limit_retries: settings.max_rate_limit_retries,
            strategy,
        })
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    pub fn is_impersonated(&self) -> bool {
        matches!(self.strategy, Strategy::Impersonated { .. })
    }

    /// Execute `method` against the configured API base.
    pub async fn execute(
        &self,
        method: &ApiMethod,
        params: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<Value> {
        self.execute_at(&self.api_base, method, params, cancel).await
    }

    /// Execute `method` against `base`, pacing through the rate gate and
    /// retrying rate-limited answers up to the configured budget.
    pub async fn execute_at(
        &self,
        base: &Url,
        method: &ApiMethod,
        params: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let mut retries = 0u32;

        loop {
            self.gate.admit(method.class, cancel).await?;
            trace!(operation = method.name, transport = self.strategy.name(), "upstream call");

            let request = self.build_request(base, method, params);
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ParleyError::Cancelled),
                response = request.send() => response?,
            };

            let status = response.status();
            let retry_after = parse_retry_after(response.headers());

            if status != StatusCode::TOO_MANY_REQUESTS {
                if let Some(err) = status_error(method, status) {
                    return Err(err);
                }
                let body: Value = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ParleyError::Cancelled),
                    body = response.json() => body?,
                };
                match envelope_code(&body) {
                    None => return Ok(body),
                    Some("ratelimited") => {}
                    Some(code) => return Err(envelope_error(method, code)),
                }
            }

            let wait = retry_after.unwrap_or(DEFAULT_RETRY_AFTER);
            if retries >= self.max_rate_limit_retries {
                return Err(ParleyError::RateLimited {
                    method: method.name.to_string(),
                    retry_after: wait,
                });
            }
            warn!("{}: rate limited, waiting {:?}", method.name, wait);
            self.gate.back_off(method.class, wait);
            retries += 1;
        }
    }

    fn build_request(
        &self,
        base: &Url,
        method: &ApiMethod,
        params: &[(&str, String)],
    ) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", base.as_str().trim_end_matches('/'), method.name);
        let mut form: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();

        match &self.strategy {
            Strategy::Delegated { token } => self.http.post(url).bearer_auth(token).form(&form),
            Strategy::Impersonated { token, cookie } => {
                form.push(("token", token.as_str()));
                self.http
                    .post(url)
                    .header(COOKIE, format!("d={}", cookie))
                    .form(&form)
            }
        }
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn status_error(method: &ApiMethod, status: StatusCode) -> Option<ParleyError> {
    if status.is_success() {
        return None;
    }
    let code = format!("http_{}", status.as_u16());
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Some(ParleyError::Auth {
            method: method.name.to_string(),
            code,
        });
    }
    Some(ParleyError::Upstream {
        method: method.name.to_string(),
        code,
        retryable: status.is_server_error(),
    })
}

/// The envelope's error code, or `None` when `ok` is true.
fn envelope_code(body: &Value) -> Option<&str> {
    if body.get("ok").and_then(Value::as_bool).unwrap_or(false) {
        return None;
    }
    Some(body.get("error").and_then(Value::as_str).unwrap_or("unknown_error"))
}

fn envelope_error(method: &ApiMethod, code: &str) -> ParleyError {
    if AUTH_FAILURE_CODES.contains(&code) {
        return ParleyError::Auth {
            method: method.name.to_string(),
            code: code.to_string(),
        };
    }
    ParleyError::Upstream {
        method: method.name.to_string(),
        code: code.to_string(),
        retryable: RETRYABLE_CODES.contains(&code),
    }
}
