//! JSON API client that routes every request through a [`Scheduler`].

use std::time::Duration;

use reqwest::{Method, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::HttpConfig;
use crate::error::{PacerError, Result};
use crate::scheduler::{EnqueueOptions, Failure, Scheduler, SchedulerError};

use super::translate::{decode_body, failure_from_response, failure_from_transport};

/// HTTP verb helpers on top of the scheduler.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    login_path: String,
    scheduler: Scheduler,
}

impl ApiClient {
    pub fn new(config: &HttpConfig, scheduler: Scheduler) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| PacerError::Config(format!("Invalid base_url {}: {}", config.base_url, e)))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            http,
            base_url,
            login_path: config.login_path.clone(),
            scheduler,
        })
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Full URL for a path relative to the base URL.
    pub fn url(&self, path: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{}/{}", base, path.trim_start_matches('/'))
    }

    /// Login page URL that brings the user back to `return_to` afterwards.
    pub fn login_redirect(&self, return_to: &str) -> String {
        match self.base_url.join(&self.login_path) {
            Ok(mut url) => {
                url.query_pairs_mut().append_pair("return_to", return_to);
                url.to_string()
            }
            Err(_) => self.login_path.clone(),
        }
    }

    pub async fn get<T>(&self, path: &str) -> std::result::Result<T, SchedulerError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.get_with(path, EnqueueOptions::default()).await
    }

    pub async fn get_with<T>(&self, path: &str, options: EnqueueOptions) -> std::result::Result<T, SchedulerError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.request(Method::GET, path, None, options).await
    }

    pub async fn delete<T>(&self, path: &str) -> std::result::Result<T, SchedulerError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.delete_with(path, EnqueueOptions::default()).await
    }

    pub async fn delete_with<T>(&self, path: &str, options: EnqueueOptions) -> std::result::Result<T, SchedulerError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.request(Method::DELETE, path, None, options).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> std::result::Result<T, SchedulerError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned + Send + 'static,
    {
        self.post_with(path, body, EnqueueOptions::default()).await
    }

    pub async fn post_with<B, T>(&self, path: &str, body: &B, options: EnqueueOptions) -> std::result::Result<T, SchedulerError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned + Send + 'static,
    {
        self.request(Method::POST, path, Some(to_json(body)?), options).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> std::result::Result<T, SchedulerError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned + Send + 'static,
    {
        self.put_with(path, body, EnqueueOptions::default()).await
    }

    pub async fn put_with<B, T>(&self, path: &str, body: &B, options: EnqueueOptions) -> std::result::Result<T, SchedulerError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned + Send + 'static,
    {
        self.request(Method::PUT, path, Some(to_json(body)?), options).await
    }

    pub async fn patch<B, T>(&self, path: &str, body: &B) -> std::result::Result<T, SchedulerError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned + Send + 'static,
    {
        self.patch_with(path, body, EnqueueOptions::default()).await
    }

    pub async fn patch_with<B, T>(&self, path: &str, body: &B, options: EnqueueOptions) -> std::result::Result<T, SchedulerError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned + Send + 'static,
    {
        self.request(Method::PATCH, path, Some(to_json(body)?), options).await
    }

    async fn request<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: EnqueueOptions,
    ) -> std::result::Result<T, SchedulerError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let url = self.url(path);
        debug!(%method, %url, "ApiClient::request: called");

        let http = self.http.clone();
        let result = self
            .scheduler
            .enqueue(
                move || send::<T>(http.clone(), method.clone(), url.clone(), body.clone()),
                options,
            )
            .await;

        if let Err(err) = &result
            && err.requires_reauth()
        {
            warn!(redirect = %self.login_redirect(path), "Session rejected, re-authentication required");
        }
        result
    }
}

async fn send<T: DeserializeOwned>(
    http: reqwest::Client,
    method: Method,
    url: String,
    body: Option<Value>,
) -> std::result::Result<T, Failure> {
    let mut request = http.request(method, &url);
    if let Some(body) = &body {
        request = request.json(body);
    }

    let response = request.send().await.map_err(|e| failure_from_transport(&e))?;
    let status = response.status();

    if !status.is_success() {
        let headers = response.headers();
        let content_type = header_str(headers, reqwest::header::CONTENT_TYPE);
        let retry_after = header_str(headers, reqwest::header::RETRY_AFTER);
        let text = response.text().await.map_err(|e| failure_from_transport(&e))?;
        return Err(failure_from_response(
            status.as_u16(),
            content_type.as_deref(),
            retry_after.as_deref(),
            &text,
        ));
    }

    let bytes = response.bytes().await.map_err(|e| failure_from_transport(&e))?;
    decode_body(status.as_u16(), &bytes)
}

fn header_str(headers: &reqwest::header::HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn to_json<B: Serialize + ?Sized>(body: &B) -> std::result::Result<Value, SchedulerError> {
    serde_json::to_value(body).map_err(|e| SchedulerError::Failed {
        attempts: 0,
        cause: Failure::new(format!("Failed to serialize request body: {}", e)),
    })
}
