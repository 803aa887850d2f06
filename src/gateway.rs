//! Authenticated request gateway for the AiMusic backend.
//!
//! Every backend call goes through [`Gateway`]: it attaches the bearer token
//! from the session store, and when the backend answers `401` it runs the
//! refresh protocol and reissues the original call exactly once with the
//! token the refresh wrote.
//!
//! # Single-flight refresh
//!
//! Access tokens expire for all in-flight requests at the same moment, so a
//! burst of `401`s is the common case, and the refresh endpoint rotates the
//! refresh token — a second concurrent refresh would spend an already-stale
//! token and log the user out for no reason. The gateway therefore coalesces
//! refresh demands: the first caller creates the in-flight refresh as a
//! shared future, every concurrent caller clones the same handle, and all of
//! them observe the identical outcome. The handle is cleared once the flight
//! resolves, success or failure, so the next expiry starts a fresh cycle.
//!
//! Any refresh failure clears the stored token pair (once, inside the
//! flight) and surfaces to each caller as an
//! [`Unauthenticated`](crate::error::ErrorKind::Unauthenticated) error, which
//! UI layers should treat as "redirect to login". A request that fails again
//! *after* a successful refresh is an ordinary transport failure and leaves
//! the fresh credentials in place.

use std::sync::{Arc, Mutex};

use futures_util::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use reqwest::{
    header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Method, StatusCode, Url,
};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::{
    config::Config,
    error::{Error, ErrorKind, Result},
    http::Client as HttpClient,
    protocol::{
        auth::{LoginRequest, RefreshRequest, RegisterRequest, TokenResponse, UserPublic},
        generate::{GenerationCreated, GenerationRequest},
    },
    session::SessionStore,
};

/// Failure modes of the refresh protocol.
///
/// Clonable so that one in-flight outcome can be handed to every waiter.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum RefreshError {
    /// No refresh token in the session store.
    #[error("missing refresh token")]
    MissingToken,

    /// The refresh endpoint answered non-2xx.
    #[error("refresh rejected: {0}")]
    Rejected(String),

    /// The refresh call never produced a usable answer.
    #[error("refresh failed: {0}")]
    Transport(String),
}

/// One in-flight refresh, shared by every caller that joined it.
type RefreshFlight = Shared<BoxFuture<'static, std::result::Result<(), RefreshError>>>;

pub struct Gateway {
    base_url: Url,
    http: Arc<HttpClient>,
    session: Arc<SessionStore>,

    /// Guarded lazy handle to the in-flight refresh; `None` while idle.
    refresh_flight: Mutex<Option<RefreshFlight>>,
}

impl Gateway {
    const LOGIN_PATH: &'static str = "/api/auth/login";
    const REGISTER_PATH: &'static str = "/api/auth/register";
    const REFRESH_PATH: &'static str = "/api/auth/refresh";
    const GENERATE_PATH: &'static str = "/api/generate";

    /// The `Content-Type` header value for request bodies.
    const JSON_CONTENT: HeaderValue = HeaderValue::from_static("application/json");

    /// Creates a gateway for the configured service.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the HTTP client cannot be built.
    pub fn new(config: &Config, session: Arc<SessionStore>) -> Result<Self> {
        let http = Arc::new(HttpClient::new(config)?);

        Ok(Self {
            base_url: config.base_url.clone(),
            http,
            session,
            refresh_flight: Mutex::new(None),
        })
    }

    /// The session store this gateway reads and maintains.
    #[must_use]
    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    /// The underlying rate-limited HTTP client.
    ///
    /// Consumers use this to follow URLs the gateway handed them, such as
    /// the generation progress stream.
    #[must_use]
    pub fn http(&self) -> Arc<HttpClient> {
        Arc::clone(&self.http)
    }

    /// The configured service base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Performs an authenticated call and decodes the JSON answer.
    ///
    /// Attaches `Authorization: Bearer <access>` when a token is present and
    /// omits it otherwise. On `401` the refresh protocol runs and the call is
    /// reissued once; see the module docs for the full recovery semantics.
    ///
    /// # Errors
    ///
    /// Will return `Err` carrying the response body text (or `HTTP <status>`
    /// when the body is empty) for non-2xx answers, an `Unauthenticated`
    /// error when refresh was needed and failed, or a decode error when the
    /// answer is not valid JSON for `T`.
    pub async fn request<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = body.map(serde_json::to_string).transpose()?;
        self.call(method, path, body, true).await
    }

    /// Convenience for an authenticated GET.
    pub async fn get<T>(&self, path: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.request::<T, ()>(Method::GET, path, None).await
    }

    /// Convenience for an authenticated POST with a JSON body.
    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::POST, path, Some(body)).await
    }

    /// Exchanges credentials for a token pair and stores it.
    ///
    /// Login does not carry a bearer token and never enters the refresh
    /// path: a `401` here means wrong credentials, not an expired token.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the backend rejects the credentials or the call
    /// fails.
    pub async fn login(&self, email: &str, password: &str) -> Result<()> {
        let request = LoginRequest {
            email: email.to_owned(),
            password: password.to_owned(),
        };

        let tokens: TokenResponse = self
            .call(
                Method::POST,
                Self::LOGIN_PATH,
                Some(serde_json::to_string(&request)?),
                false,
            )
            .await?;
        self.session
            .set_tokens(tokens.access_token, tokens.refresh_token);

        Ok(())
    }

    /// Creates an account, then logs in with the same credentials.
    ///
    /// The backend's register endpoint returns the created profile without
    /// tokens; the follow-up login leaves the session authenticated, so
    /// registration ends with an initial token pair either way.
    ///
    /// # Errors
    ///
    /// Will return `Err` if registration is rejected (e.g. the email is
    /// taken) or the follow-up login fails.
    pub async fn register(&self, email: &str, username: &str, password: &str) -> Result<UserPublic> {
        let request = RegisterRequest {
            email: email.to_owned(),
            username: username.to_owned(),
            password: password.to_owned(),
        };

        let profile: UserPublic = self
            .call(
                Method::POST,
                Self::REGISTER_PATH,
                Some(serde_json::to_string(&request)?),
                false,
            )
            .await?;
        self.login(email, password).await?;

        Ok(profile)
    }

    /// Queues a generation task.
    ///
    /// The returned [`GenerationCreated::events_url`] is relative to the
    /// service base; following the stream is the caller's business.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the user is out of credits (`ResourceExhausted`)
    /// or the request is rejected.
    pub async fn create_generation(&self, request: &GenerationRequest) -> Result<GenerationCreated> {
        self.post(Self::GENERATE_PATH, request).await
    }

    async fn call<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<String>,
        with_auth: bool,
    ) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let url = self.base_url.join(path)?;
        let mut retried = false;

        loop {
            let mut request = self.http.request(
                method.clone(),
                url.clone(),
                body.clone().unwrap_or_default(),
            );

            let headers = request.headers_mut();
            headers.try_insert(CONTENT_TYPE, Self::JSON_CONTENT)?;
            if with_auth {
                if let Some(access) = self.session.access_token() {
                    headers.try_insert(
                        AUTHORIZATION,
                        HeaderValue::from_str(&format!("Bearer {access}"))?,
                    )?;
                }
            }

            let response = self.http.execute(request).await?;
            let status = response.status();

            if status.is_success() {
                return response.json::<T>().await.map_err(Into::into);
            }

            if status == StatusCode::UNAUTHORIZED && with_auth && !retried {
                debug!("access token rejected on {path}, entering refresh");
                self.refresh().await.map_err(Error::unauthenticated)?;

                // Reissue once; the loop re-reads the token the refresh wrote.
                retried = true;
                continue;
            }

            return Err(Self::response_error(response).await);
        }
    }

    /// Joins the in-flight refresh, creating it if the protocol is idle.
    ///
    /// N concurrent demands produce at most one refresh request; every
    /// waiter observes the identical outcome.
    async fn refresh(&self) -> std::result::Result<(), RefreshError> {
        let flight = {
            let mut slot = self.refresh_flight.lock().expect("refresh slot poisoned");
            match slot.as_ref() {
                Some(flight) => flight.clone(),
                None => {
                    let flight = Self::run_refresh(
                        Arc::clone(&self.http),
                        Arc::clone(&self.session),
                        self.base_url.clone(),
                    )
                    .boxed()
                    .shared();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };

        let outcome = flight.clone().await;

        // Clear the handle so the next expiry starts a fresh cycle. Guard on
        // identity: a later cycle may already occupy the slot.
        let mut slot = self.refresh_flight.lock().expect("refresh slot poisoned");
        if slot.as_ref().is_some_and(|current| current.ptr_eq(&flight)) {
            *slot = None;
        }
        drop(slot);

        outcome
    }

    async fn run_refresh(
        http: Arc<HttpClient>,
        session: Arc<SessionStore>,
        base_url: Url,
    ) -> std::result::Result<(), RefreshError> {
        let outcome = Self::exchange_refresh_token(&http, &session, &base_url).await;

        if let Err(ref e) = outcome {
            // Cleared here, once per flight, no matter how many callers
            // share the failure.
            warn!("token refresh failed, clearing session: {e}");
            session.clear_tokens();
        }

        outcome
    }

    async fn exchange_refresh_token(
        http: &HttpClient,
        session: &SessionStore,
        base_url: &Url,
    ) -> std::result::Result<(), RefreshError> {
        let Some(refresh) = session.refresh_token() else {
            return Err(RefreshError::MissingToken);
        };

        let url = base_url
            .join(Self::REFRESH_PATH)
            .map_err(|e| RefreshError::Transport(e.to_string()))?;
        let body = serde_json::to_string(&RefreshRequest {
            refresh_token: refresh,
        })
        .map_err(|e| RefreshError::Transport(e.to_string()))?;

        let mut request = http.post(url, body);
        if let Err(e) = request.headers_mut().try_insert(CONTENT_TYPE, Self::JSON_CONTENT) {
            return Err(RefreshError::Transport(e.to_string()));
        }

        let response = http
            .execute(request)
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = if body.trim().is_empty() {
                format!("HTTP {}", status.as_u16())
            } else {
                body
            };
            return Err(RefreshError::Rejected(message));
        }

        let tokens = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        // Stored (and subscribers notified) before any waiter resumes, so
        // queued retries read the fresh pair.
        session
            .set_tokens(tokens.access_token, tokens.refresh_token);

        Ok(())
    }

    async fn response_error(response: reqwest::Response) -> Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = if body.trim().is_empty() {
            format!("HTTP {}", status.as_u16())
        } else {
            body
        };

        Error::new(Self::status_kind(status), message)
    }

    /// Maps a response status onto the error taxonomy.
    fn status_kind(status: StatusCode) -> ErrorKind {
        match status {
            StatusCode::BAD_REQUEST => ErrorKind::InvalidArgument,
            StatusCode::UNAUTHORIZED => ErrorKind::Unauthenticated,
            // Out of generation credits.
            StatusCode::PAYMENT_REQUIRED | StatusCode::TOO_MANY_REQUESTS => {
                ErrorKind::ResourceExhausted
            }
            StatusCode::FORBIDDEN => ErrorKind::PermissionDenied,
            StatusCode::NOT_FOUND => ErrorKind::NotFound,
            StatusCode::CONFLICT => ErrorKind::AlreadyExists,
            StatusCode::NOT_IMPLEMENTED => ErrorKind::Unimplemented,
            StatusCode::SERVICE_UNAVAILABLE => ErrorKind::Unavailable,
            StatusCode::GATEWAY_TIMEOUT => ErrorKind::DeadlineExceeded,
            status if status.is_client_error() => ErrorKind::FailedPrecondition,
            _ => ErrorKind::Internal,
        }
    }
}
