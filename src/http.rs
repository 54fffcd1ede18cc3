use crate::error::{Error, Result};
use reqwest::{Client, Proxy, StatusCode, header};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

pub const USER_AGENT: &str = concat!("core-api/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpClient {
    pub fn builder(user_agent: &str) -> HttpClientBuilder {
        HttpClientBuilder {
            user_agent: user_agent.to_string(),
            timeout: Duration::from_secs(180),
            proxy: None,
            max_retries: 2,
            retry_delay: Duration::from_secs(2),
        }
    }

    /// Single GET without status interpretation or retries.
    pub async fn get_status_text(&self, url: &str) -> Result<(StatusCode, String)> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::http(e.to_string()))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::http(e.to_string()))?;
        Ok((status, body))
    }

    pub async fn post_json_raw(
        &self,
        url: &str,
        body: &str,
        headers: &[(&str, &str)],
    ) -> Result<String> {
        self.request_with_retry(|| {
            let mut req = self
                .client
                .post(url)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.to_string());
            for (k, v) in headers {
                req = req.header(*k, *v);
            }
            req
        })
        .await
    }

    pub async fn post_json_authed(&self, url: &str, body: &str, token: &str) -> Result<String> {
        let bearer = format!("Bearer {token}");
        self.post_json_raw(url, body, &[(header::AUTHORIZATION.as_str(), &bearer)])
            .await
    }

    async fn request_with_retry<F>(&self, build: F) -> Result<String>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut last_error = Error::http("no attempts made");

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                debug!(
                    attempt,
                    delay_ms = self.retry_delay.as_millis() as u64,
                    "retrying request"
                );
                sleep(self.retry_delay).await;
            }

            let result = match build().send().await {
                Ok(resp) => self.handle_response(resp).await,
                Err(e) => Err(Error::http(e.to_string())),
            };

            match result {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transient() => {
                    if let Error::RateLimit {
                        retry_after_secs: Some(secs),
                        ..
                    } = &e
                    {
                        warn!(attempt, retry_after_secs = *secs, "rate limited, will retry");
                    } else {
                        warn!(attempt, error = %e, "transient failure, will retry");
                    }
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }

    async fn handle_response(&self, resp: reqwest::Response) -> Result<String> {
        let status = resp.status();
        let url = resp.url().to_string();

        match status {
            s if s.is_success() => resp.text().await.map_err(|e| Error::http(e.to_string())),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = resp
                    .headers()
                    .get(header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok());
                Err(Error::RateLimit {
                    platform: extract_domain(&url),
                    retry_after_secs: retry_after,
                })
            }
            _ => {
                let body = resp.text().await.unwrap_or_default();
                Err(Error::api_with_status(
                    extract_domain(&url),
                    body,
                    status.as_u16(),
                ))
            }
        }
    }
}

pub struct HttpClientBuilder {
    user_agent: String,
    timeout: Duration,
    proxy: Option<String>,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpClientBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy.filter(|p| !p.is_empty());
        self
    }

    /// `attempts` counts the first try, so 1 disables retries.
    pub fn retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.max_retries = attempts.saturating_sub(1);
        self.retry_delay = delay;
        self
    }

    pub fn build(self) -> Result<HttpClient> {
        let mut builder = Client::builder()
            .timeout(self.timeout)
            .user_agent(&self.user_agent);
        if let Some(proxy) = &self.proxy {
            debug!(proxy = %proxy, "using proxy");
            let proxy = Proxy::all(proxy).map_err(|e| Error::config(format!("proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build().map_err(|e| Error::http(e.to_string()))?;

        Ok(HttpClient {
            client,
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
        })
    }
}

fn extract_domain(url: &str) -> String {
    url.split("//")
        .nth(1)
        .and_then(|s| s.split('/').next())
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_is_extracted_from_url() {
        assert_eq!(
            extract_domain("https://api.mistral.ai/v1/chat/completions"),
            "api.mistral.ai"
        );
        assert_eq!(extract_domain("not a url"), "unknown");
    }

    #[test]
    fn invalid_proxy_is_a_config_error() {
        let err = HttpClient::builder(USER_AGENT)
            .proxy(Some("http://[invalid".into()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn empty_proxy_is_ignored() {
        assert!(
            HttpClient::builder(USER_AGENT)
                .proxy(Some(String::new()))
                .build()
                .is_ok()
        );
    }
}
