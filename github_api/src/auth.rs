//! Reauthentication flow for missing OAuth scopes.
//!
//! The scope-enforcement middleware only knows how to detect a missing
//! scope; what happens next is decided here. An interactive session whose
//! token came from stored configuration gets a blocking reauthentication
//! through an injected [`Reauthenticator`]; everything else gets a one-time
//! warning on stderr telling the operator how to add the scope by hand.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::client::Client;
use crate::errors::Error;
use crate::scopes::ScopesCallback;

/// Shared, mutable holder for the active credential.
///
/// The dynamic authorization header reads through this on every call, so
/// replacing the token here takes effect for all subsequent requests of
/// every client built over it.
#[derive(Clone, Debug)]
pub struct AuthToken {
    inner: Arc<RwLock<String>>,
}

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(token.into())),
        }
    }

    pub fn get(&self) -> String {
        match self.inner.read() {
            Ok(token) => token.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set(&self, token: impl Into<String>) {
        match self.inner.write() {
            Ok(mut guard) => *guard = token.into(),
            Err(poisoned) => *poisoned.into_inner() = token.into(),
        }
    }

    /// The value for a dynamic `Authorization` header sourced from this
    /// holder, suitable for [`crate::add_header_func`].
    pub fn header_value(&self) -> String {
        format!("token {}", self.get())
    }
}

/// Where the active credential came from. Remembered so warnings can name
/// the right place to edit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialSource {
    /// An explicit environment variable; takes precedence when set.
    Environment,
    /// Persisted configuration.
    ConfigFile,
}

/// Obtains a fresh token through an interactive authorization flow.
///
/// Injected rather than hard-wired so the client stays testable without a
/// terminal. Implementations block on user input and browser completion,
/// which turns the API call that tripped the check into a long, user-paced
/// wait.
#[async_trait]
pub trait Reauthenticator: Send + Sync {
    async fn reauthenticate(&self, app_id: &str) -> Result<String, Error>;
}

/// Everything the missing-scope branch needs to know about the session.
#[derive(Clone)]
pub struct AuthSession {
    pub token: AuthToken,
    pub source: CredentialSource,
    /// Whether stdin and stderr are attached to a terminal.
    pub interactive: bool,
    /// The product's own OAuth app id; reauthentication is only offered for
    /// credentials issued by it.
    pub own_app_id: String,
    pub reauthenticator: Option<Arc<dyn Reauthenticator>>,
}

impl AuthSession {
    fn can_reauthenticate(&self, app_id: &str) -> bool {
        self.interactive
            && self.source != CredentialSource::Environment
            && app_id == self.own_app_id
            && self.reauthenticator.is_some()
    }

    async fn reauthenticate(&self, app_id: &str) -> Result<(), Error> {
        let reauthenticator = self
            .reauthenticator
            .as_ref()
            .ok_or_else(|| Error::Reauth("no reauthentication flow configured".to_string()))?;
        let token = reauthenticator.reauthenticate(app_id).await?;
        self.token.set(token);
        Ok(())
    }
}

/// The warning printed when a scope is missing and reauthentication is not
/// possible, tailored to where the credential came from.
fn missing_scope_warning(scopes: &[String], source: CredentialSource) -> String {
    let scopes = scopes.join(", ");
    let mut warning = format!("Warning: this operation requires the `{scopes}` OAuth scope.\n");
    warning.push_str(&format!(
        "Visit https://github.com/settings/tokens and edit your token to enable `{scopes}`\n"
    ));
    match source {
        CredentialSource::Environment => {
            warning.push_str("or generate a new token for the GITHUB_TOKEN environment variable");
        }
        CredentialSource::ConfigFile => {
            warning.push_str("or generate a new token and update your stored configuration");
        }
    }
    warning
}

struct SessionCallback {
    session: AuthSession,
    wanted: Vec<String>,
}

#[async_trait]
impl ScopesCallback for SessionCallback {
    async fn notify_missing(&self, app_id: &str) -> Result<(), Error> {
        if self.session.can_reauthenticate(app_id) {
            self.session.reauthenticate(app_id).await
        } else {
            eprintln!("{}", missing_scope_warning(&self.wanted, self.session.source));
            Ok(())
        }
    }
}

/// Builds the standard callback for [`crate::check_scopes`]: interactive
/// reauthentication when the session allows it, a stderr warning otherwise.
pub fn scopes_callback(session: AuthSession, wanted: &[&str]) -> Arc<dyn ScopesCallback> {
    Arc::new(SessionCallback {
        session,
        wanted: wanted.iter().map(|s| s.to_string()).collect(),
    })
}

/// Proactively verifies that the credential carries the wanted scopes
/// before an operation known to require them.
///
/// On a satisfied check the client is returned unchanged. Otherwise the
/// same interactive-vs-warning branch as the middleware runs: a successful
/// reauthentication yields a client observing the refreshed credential,
/// while the warning path fails with [`Error::Reauth`] since the operation
/// cannot proceed.
pub async fn ensure_scopes(
    client: &Client,
    session: &AuthSession,
    wanted: &[&str],
) -> Result<Client, Error> {
    let (satisfied, app_id) = client.has_scopes(wanted).await?;
    if satisfied {
        return Ok(client.clone());
    }

    if session.can_reauthenticate(&app_id) {
        session.reauthenticate(&app_id).await?;
        Ok(client.clone())
    } else {
        let wanted: Vec<String> = wanted.iter().map(|s| s.to_string()).collect();
        eprintln!("{}", missing_scope_warning(&wanted, session.source));
        Err(Error::Reauth("unable to reauthenticate".to_string()))
    }
}
