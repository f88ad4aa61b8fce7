use anyhow::{Context, Result};
use percent_encoding::percent_decode_str;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::config::Config;
use crate::logging::{log_query, v_str, ProfileScope};
use super::retry::{is_retryable_http_error, is_retryable_network_error, retry_async, RetryConfig};
use super::{QueryClient, QueryError};

/// HTTP client for the analysis service.
pub struct HttpBackend {
    client: Client,
    base: Url,
    retry: RetryConfig,
}

impl HttpBackend {
    pub fn new(cfg: &Config) -> Result<Self> {
        let mut base = Url::parse(&cfg.backend_address)
            .with_context(|| format!("invalid backend address {}", cfg.backend_address))?;
        // Url::join drops the last path segment unless the base ends with '/'
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let mut builder = Client::builder();
        if let Some(secs) = cfg.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            client: builder.build()?,
            base,
            retry: cfg.retry.clone(),
        })
    }

    /// Resolve `resource` under the base address. Dot segments, encoded or
    /// not, are refused so a resource can never climb out of the base path.
    pub fn url_for(&self, resource: &str) -> Result<Url> {
        let path = resource.split(['?', '#']).next().unwrap_or_default();
        let climbs = path.split('/').any(|segment| {
            let decoded = percent_decode_str(segment).decode_utf8_lossy();
            decoded == "." || decoded == ".."
        });
        if climbs {
            return Err(QueryError {
                resource: resource.to_string(),
                status: None,
                msg: "dot segment in resource path".to_string(),
                retryable: false,
            }
            .into());
        }
        self.base
            .join(resource.trim_start_matches('/'))
            .with_context(|| format!("invalid resource path {}", resource))
    }

    async fn fetch_once(&self, url: Url, resource: &str) -> Result<Value> {
        let resp = self.client.get(url).send().await.map_err(|e| QueryError {
            resource: resource.to_string(),
            status: None,
            retryable: is_retryable_network_error(&e),
            msg: e.to_string(),
        })?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(QueryError {
                resource: resource.to_string(),
                status: Some(status.as_u16()),
                retryable: is_retryable_http_error(status.as_u16()),
                msg: if body.is_empty() { status.to_string() } else { body },
            }
            .into());
        }
        let value = resp.json::<Value>().await.map_err(|e| QueryError {
            resource: resource.to_string(),
            status: Some(status.as_u16()),
            retryable: false,
            msg: format!("invalid JSON body: {}", e),
        })?;
        Ok(value)
    }
}

#[async_trait]
impl QueryClient for HttpBackend {
    async fn query(&self, resource: &str) -> Result<Value> {
        let url = self.url_for(resource)?;
        let _scope = ProfileScope::with_context("http_query", &[("resource", v_str(resource))]);
        let mut attempt = 0;
        let result = retry_async(&self.retry, resource, || {
            attempt += 1;
            log_query(resource, attempt, "sent");
            self.fetch_once(url.clone(), resource)
        })
        .await;
        log_query(resource, attempt, if result.is_ok() { "ok" } else { "failed" });
        result
    }
}
