// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated API client: gate, dispatch, recovery, one retry.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{ClientBuilder, Method};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::backend::{
    AuthBackend, Credentials, HttpAuthBackend, DEFAULT_LOGIN_PATH, DEFAULT_REFRESH_PATH,
};
use crate::config::SessionConfig;
use crate::coordinator::RefreshCoordinator;
use crate::error::ClientError;
use crate::gate::{ApiRequest, RequestGate};
use crate::lifecycle::{NoopObserver, SessionLifecycle, SessionObserver};
use crate::recovery::{PublicRoutes, Recovery, ResponseRecovery};
use crate::store::{MemoryPersistence, TokenPersistence, TokenStore};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_USER_AGENT: &str = concat!("tokenguard/", env!("CARGO_PKG_VERSION"));

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    auth_paths: [String; 2],
    backend: Arc<dyn AuthBackend>,
    coordinator: Arc<RefreshCoordinator>,
    gate: RequestGate,
    recovery: ResponseRecovery,
}

impl ApiClient {
    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::default()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn session(&self) -> &Arc<SessionLifecycle> {
        self.coordinator.lifecycle()
    }

    pub fn store(&self) -> &TokenStore {
        self.coordinator.store()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn dispatch(&self, request: &ApiRequest) -> Result<reqwest::Response, ClientError> {
        let mut builder = self.http.request(request.method.clone(), self.url(&request.path));
        if let Some(ref token) = request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        Ok(builder.send().await?)
    }

    /// Send `request` with a bearer token when one is available. A 401 on a
    /// protected endpoint is answered with one refresh and one re-send; the
    /// returned response is the last one received.
    pub async fn send(&self, request: &mut ApiRequest) -> Result<reqwest::Response, ClientError> {
        if self.auth_paths.iter().any(|p| p == request.route()) {
            request.options.auth_endpoint = true;
        }

        request.bearer = self.gate.authorize(request).await;
        let response = self.dispatch(request).await?;

        let Recovery::Retry { token } =
            self.recovery.on_response(request, response.status()).await
        else {
            return Ok(response);
        };

        debug!(request_id = %request.id, path = %request.path, "re-sending after refresh");
        request.bearer = Some(token);
        let response = self.dispatch(request).await?;
        // Logs the exhausted retry; nothing else to do with the verdict.
        let _ = self.recovery.on_response(request, response.status()).await;
        Ok(response)
    }

    /// Send `request` and return the response body of a success.
    pub async fn text(&self, mut request: ApiRequest) -> Result<String, ClientError> {
        let response = self.send(&mut request).await?;
        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(ClientError::from_status(status, body, request.retried))
        }
    }

    /// Send `request` and deserialize a success body.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        mut request: ApiRequest,
    ) -> Result<T, ClientError> {
        let response = self.send(&mut request).await?;
        let status = response.status();
        if status.is_success() {
            Ok(response.json().await?)
        } else {
            let message = response.text().await.unwrap_or_else(|_| status.to_string());
            Err(ClientError::from_status(status, message, request.retried))
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.execute(ApiRequest::new(Method::GET, path)).await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, ClientError> {
        self.execute(ApiRequest::post(path, body)).await
    }

    /// Exchange credentials for tokens and start an authenticated session.
    pub async fn login(
        &self,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<(), ClientError> {
        let credentials = Credentials { email: email.into(), password: password.into() };
        let pair = self.backend.login(credentials).await?;
        self.session().login(&pair);
        Ok(())
    }

    pub fn logout(&self) {
        self.session().logout();
    }

    /// Pick up a session persisted by an earlier run. Returns whether a
    /// usable session exists.
    pub async fn resume(&self) -> Result<bool, ClientError> {
        if !self.store().has_tokens() {
            return Ok(false);
        }
        match self.coordinator.ensure_valid_token().await? {
            Some(_) => {
                self.session().mark_authenticated();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Builder for [`ApiClient`].
#[derive(Default)]
pub struct ApiClientBuilder {
    base_url: Option<String>,
    refresh_path: Option<String>,
    login_path: Option<String>,
    timeout: Option<Duration>,
    user_agent: Option<String>,
    public_routes: Option<PublicRoutes>,
    persistence: Option<Arc<dyn TokenPersistence>>,
    observer: Option<Arc<dyn SessionObserver>>,
    backend: Option<Arc<dyn AuthBackend>>,
    session: Option<SessionConfig>,
}

impl ApiClientBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = Some(path.into());
        self
    }

    pub fn login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = Some(path.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn public_routes(mut self, routes: PublicRoutes) -> Self {
        self.public_routes = Some(routes);
        self
    }

    pub fn persistence(mut self, persistence: Arc<dyn TokenPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Replace the HTTP auth backend (tests, non-standard auth services).
    pub fn backend(mut self, backend: Arc<dyn AuthBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session = Some(config);
        self
    }

    pub fn build(self) -> Result<ApiClient, ClientError> {
        let base_url = self
            .base_url
            .ok_or_else(|| ClientError::Configuration("base_url is required".into()))?;
        let base_url = base_url.trim_end_matches('/').to_owned();
        let refresh_path = self.refresh_path.unwrap_or_else(|| DEFAULT_REFRESH_PATH.to_owned());
        let login_path = self.login_path.unwrap_or_else(|| DEFAULT_LOGIN_PATH.to_owned());
        for path in [&refresh_path, &login_path] {
            if !path.starts_with('/') {
                return Err(ClientError::Configuration(format!("path {path:?} must start with '/'")));
            }
        }
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);

        crate::ensure_crypto();
        let http = ClientBuilder::new()
            .timeout(timeout)
            .user_agent(self.user_agent.unwrap_or_else(|| DEFAULT_USER_AGENT.to_owned()))
            .build()
            .map_err(|e| ClientError::Configuration(format!("http client: {e}")))?;

        let backend = self.backend.unwrap_or_else(|| {
            Arc::new(
                HttpAuthBackend::new(base_url.clone(), timeout)
                    .with_refresh_path(refresh_path.clone())
                    .with_login_path(login_path.clone()),
            )
        });
        let persistence =
            self.persistence.unwrap_or_else(|| Arc::new(MemoryPersistence::new()));
        let observer = self.observer.unwrap_or_else(|| Arc::new(NoopObserver));

        let lifecycle = SessionLifecycle::new(
            TokenStore::new(persistence),
            observer,
            self.session.unwrap_or_default(),
        );
        let coordinator = RefreshCoordinator::new(Arc::clone(&backend), lifecycle);
        let gate = RequestGate::new(Arc::clone(&coordinator));
        let recovery =
            ResponseRecovery::new(Arc::clone(&coordinator), self.public_routes.unwrap_or_default());

        Ok(ApiClient {
            http,
            base_url,
            auth_paths: [refresh_path, login_path],
            backend,
            coordinator,
            gate,
            recovery,
        })
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
