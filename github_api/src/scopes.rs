//! OAuth scope enforcement middleware.
//!
//! Inspects successful responses for the advertised scope headers and, when
//! the wanted scope is missing, invokes a configured callback exactly once
//! per process (per latch). Responses without the app-id header are passed
//! through untouched; the header is only present for certain credential
//! types.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::Error;
use crate::transport::{ClientOption, Request, Response, Transport};

/// Response header naming the OAuth app that issued the credential.
pub const OAUTH_APP_ID_HEADER: &str = "x-oauth-client-id";
/// Response header listing the credential's granted scopes, comma-separated.
pub const OAUTH_SCOPES_HEADER: &str = "x-oauth-scopes";

/// A single-fire latch shared by every scope-enforcement decorator in a
/// process, so the missing-scope callback runs at most once per run.
///
/// Owned by whoever constructs clients and passed into [`check_scopes`];
/// keeping it injectable (rather than a process global) lets tests reset it
/// without restarting the process.
#[derive(Clone, Debug, Default)]
pub struct ScopesLatch {
    fired: Arc<AtomicBool>,
}

impl ScopesLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trips the latch. Returns true for exactly one caller, even under
    /// concurrent calls; every later caller sees false.
    pub fn fire(&self) -> bool {
        self.fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.fired.store(false, Ordering::SeqCst);
    }
}

/// Invoked with the response's app id when the wanted scope is missing.
///
/// The implementation decides between an interactive reauthentication and a
/// warning; it is injected at decorator construction so the middleware never
/// touches a terminal itself. Its error becomes the error of the API call
/// that tripped the check.
#[async_trait]
pub trait ScopesCallback: Send + Sync {
    async fn notify_missing(&self, app_id: &str) -> Result<(), Error>;
}

/// Expands a wanted scope into the set of scopes that satisfy it: the scope
/// itself, plus the `admin:` analog for a `read:`-prefixed scope.
pub(crate) fn scope_candidates(wanted: &str) -> Vec<String> {
    let mut candidates = vec![wanted.to_string()];
    if let Some(rest) = wanted.strip_prefix("read:") {
        candidates.push(format!("admin:{rest}"));
    }
    candidates
}

struct CheckScopesTransport {
    inner: Arc<dyn Transport>,
    candidates: Vec<String>,
    latch: ScopesLatch,
    callback: Arc<dyn ScopesCallback>,
}

#[async_trait]
impl Transport for CheckScopesTransport {
    async fn send(&self, req: Request) -> Result<Response, Error> {
        let resp = self.inner.send(req).await?;

        if resp.status.as_u16() > 299 || self.latch.is_fired() {
            return Ok(resp);
        }

        let Some(app_id) = resp.header_str(OAUTH_APP_ID_HEADER) else {
            return Ok(resp);
        };

        let granted = resp.header_str(OAUTH_SCOPES_HEADER).unwrap_or("");
        let satisfied = granted
            .split(',')
            .any(|s| self.candidates.iter().any(|c| c == s.trim()));

        if !satisfied && self.latch.fire() {
            tracing::debug!(app_id, wanted = %self.candidates[0], "missing OAuth scope");
            let app_id = app_id.to_string();
            self.callback.notify_missing(&app_id).await?;
        }

        Ok(resp)
    }
}

/// Checks every successful response for a wanted OAuth scope.
///
/// Scopes are re-evaluated on each call since they can change between calls
/// (e.g. after reauthentication); only the not-satisfied outcome is sticky,
/// through the latch.
pub fn check_scopes(
    wanted: &str,
    latch: ScopesLatch,
    callback: Arc<dyn ScopesCallback>,
) -> ClientOption {
    let candidates = scope_candidates(wanted);
    Box::new(move |inner| {
        Arc::new(CheckScopesTransport {
            inner,
            candidates,
            latch,
            callback,
        })
    })
}
