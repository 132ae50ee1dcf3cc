//! Loopback HTTP surface for the login round trip.
//!
//! Native applications point the provider's redirect URI at
//! `http://127.0.0.1:<port>{auth_path}/callback` and open `{auth_path}/login`
//! in the system browser.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;

use crate::callback::CallbackPayload;
use crate::error::Error;
use crate::flow::LoginFlow;
use crate::ledger::LedgerClient;
use crate::resolver::AddressResolver;

/// Paths the routes are mounted at and redirect to.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    auth_path: String,
    login_redirect: String,
    logout_redirect: String,
    error_redirect: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            auth_path: "/auth".into(),
            login_redirect: "/".into(),
            logout_redirect: "/".into(),
            error_redirect: "/login".into(),
        }
    }
}

impl ServerSettings {
    #[must_use]
    pub fn with_auth_path(mut self, path: impl Into<String>) -> Self {
        self.auth_path = path.into();
        self
    }

    #[must_use]
    pub fn with_login_redirect(mut self, path: impl Into<String>) -> Self {
        self.login_redirect = path.into();
        self
    }

    #[must_use]
    pub fn with_logout_redirect(mut self, path: impl Into<String>) -> Self {
        self.logout_redirect = path.into();
        self
    }

    #[must_use]
    pub fn with_error_redirect(mut self, path: impl Into<String>) -> Self {
        self.error_redirect = path.into();
        self
    }
}

struct ServerState<L, R> {
    flow: Arc<LoginFlow<L, R>>,
    settings: Arc<ServerSettings>,
}

// Manual Clone: avoid derive adding `L: Clone, R: Clone` bounds.
impl<L, R> Clone for ServerState<L, R> {
    fn clone(&self) -> Self {
        Self {
            flow: self.flow.clone(),
            settings: self.settings.clone(),
        }
    }
}

/// Create the login router: `login`, `callback` and `logout` under `auth_path`.
pub fn auth_routes<L, R>(flow: Arc<LoginFlow<L, R>>, settings: ServerSettings) -> Router
where
    L: LedgerClient,
    R: AddressResolver,
{
    let auth_path = settings.auth_path.clone();
    let state = ServerState {
        flow,
        settings: Arc::new(settings),
    };

    Router::new()
        .route(&format!("{auth_path}/login"), get(login::<L, R>))
        .route(&format!("{auth_path}/callback"), get(callback::<L, R>))
        .route(
            &format!("{auth_path}/logout"),
            get(logout::<L, R>).post(logout::<L, R>),
        )
        .with_state(state)
}

async fn login<L: LedgerClient, R: AddressResolver>(
    State(state): State<ServerState<L, R>>,
) -> Response {
    let request = match state.flow.start().await {
        Ok(request) => request,
        Err(e) => return login_error(&state.settings.error_redirect, &e),
    };
    if let Err(e) = state.flow.redirect_issued() {
        return login_error(&state.settings.error_redirect, &e);
    }
    Redirect::to(request.url.as_str()).into_response()
}

async fn callback<L: LedgerClient, R: AddressResolver>(
    State(state): State<ServerState<L, R>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let pairs: Vec<(String, String)> = params.into_iter().collect();
    let result = match CallbackPayload::from_pairs(&pairs) {
        Ok(payload) => state.flow.handle_callback(payload).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(identity) => {
            tracing::info!(address = %identity.wallet_address, "zkLogin callback completed");
            Redirect::to(&state.settings.login_redirect).into_response()
        }
        Err(e) => login_error(&state.settings.error_redirect, &e),
    }
}

async fn logout<L: LedgerClient, R: AddressResolver>(
    State(state): State<ServerState<L, R>>,
) -> Redirect {
    if let Err(e) = state.flow.sign_out().await {
        tracing::warn!(error = %e, "Session purge failed during logout");
    }
    Redirect::to(&state.settings.logout_redirect)
}

/// Short, URL-safe code for the error page; details stay in the logs.
fn error_code(error: &Error) -> &'static str {
    match error {
        Error::KeyGeneration(_) => "key_generation_failed",
        Error::MissingSessionData(_) => "missing_session",
        Error::TokenExchange { .. } => "token_exchange_failed",
        Error::InvalidToken(_) => "invalid_token",
        Error::Resolution { .. } => "resolution_failed",
        Error::SessionExpired(_) => "session_expired",
        Error::Transfer(_) => "transfer_failed",
        Error::Ledger(_) => "ledger_unavailable",
        Error::Storage(_) => "session_failed",
        Error::Config(_) => "configuration_error",
        Error::InvalidState(_) => "invalid_state",
    }
}

fn login_error(error_redirect: &str, error: &Error) -> Response {
    tracing::error!(error = %error, "zkLogin request failed");
    let encoded = urlencoding::encode(error_code(error));
    Redirect::to(&format!("{error_redirect}?error={encoded}")).into_response()
}
