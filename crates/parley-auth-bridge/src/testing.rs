//! Scripted `WorkspaceApi` for tests in downstream crates.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{ParleyError, Result};
use crate::methods::ApiMethod;
use crate::router::WorkspaceApi;

type Params = Vec<(String, String)>;

/// Answers calls from per-method scripts and records every call.
///
/// Queued answers (`respond_once`, `fail_once`) are consumed first, then the
/// sticky answer set with `respond`. Unscripted methods fail upstream.
#[derive(Default)]
pub struct ScriptedApi {
    queued: Mutex<HashMap<&'static str, VecDeque<Result<Value>>>>,
    sticky: Mutex<HashMap<&'static str, Value>>,
    calls: Mutex<Vec<(&'static str, Params)>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, method: &ApiMethod, body: Value) -> &Self {
        lock(&self.sticky).insert(method.name, body);
        self
    }

    pub fn respond_once(&self, method: &ApiMethod, body: Value) -> &Self {
        lock(&self.queued)
            .entry(method.name)
            .or_default()
            .push_back(Ok(body));
        self
    }

    pub fn fail_once(&self, method: &ApiMethod, err: ParleyError) -> &Self {
        lock(&self.queued)
            .entry(method.name)
            .or_default()
            .push_back(Err(err));
        self
    }

    /// Total calls across all methods.
    pub fn calls(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn calls_to(&self, method: &ApiMethod) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|(name, _)| *name == method.name)
            .count()
    }

    /// Parameters of the most recent call to `method`.
    pub fn last_params(&self, method: &ApiMethod) -> Option<Params> {
        lock(&self.calls)
            .iter()
            .rev()
            .find(|(name, _)| *name == method.name)
            .map(|(_, params)| params.clone())
    }

    /// Value of `key` in the most recent call to `method`.
    pub fn last_param(&self, method: &ApiMethod, key: &str) -> Option<String> {
        self.last_params(method)?
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

#[async_trait]
impl WorkspaceApi for ScriptedApi {
    async fn call(
        &self,
        method: &ApiMethod,
        params: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<Value> {
        if cancel.is_cancelled() {
            return Err(ParleyError::Cancelled);
        }
        lock(&self.calls).push((
            method.name,
            params
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        ));

        if let Some(answer) = lock(&self.queued)
            .get_mut(method.name)
            .and_then(VecDeque::pop_front)
        {
            return answer;
        }
        lock(&self.sticky)
            .get(method.name)
            .cloned()
            .ok_or_else(|| ParleyError::Upstream {
                method: method.name.to_string(),
                code: "unscripted".to_string(),
                retryable: false,
            })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
