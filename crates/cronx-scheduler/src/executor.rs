//! HTTP executor: turns a [`Template`] into requests, classifies the
//! response against the template's expected status codes and retries with
//! exponential backoff.
//!
//! Every failure mode (bad URL, DNS, refused connection, timeout, unexpected
//! status) ends up in the returned [`ExecutionResult`]; `execute` never errors.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use cronx_core::config::SchedulerConfig;
use dashmap::DashMap;
use reqwest::redirect::Policy;
use tracing::{debug, warn};

use crate::types::{ApiKeyLocation, AuthConfig, ExecutionResult, HttpMethod, Template};

/// Redirect and TLS behaviour live on the reqwest client, so one client is
/// kept per combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ClientKey {
    follow_redirects: bool,
    validate_ssl: bool,
}

pub struct HttpExecutor {
    clients: DashMap<ClientKey, reqwest::Client>,
    backoff_base: Duration,
    max_redirects: usize,
    max_body_chars: usize,
    user_agent: String,
}

impl HttpExecutor {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            clients: DashMap::new(),
            backoff_base: Duration::from_millis(config.retry_backoff_base_ms),
            max_redirects: config.max_redirects,
            max_body_chars: config.max_response_body_chars,
            user_agent: config.user_agent.clone(),
        }
    }

    /// Override the backoff base (the delay before the first retry).
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Delay before retry number `attempt + 1`: `base * 2^attempt`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Run the template, retrying up to `max_retries` extra times on failure.
    ///
    /// The returned result is the final attempt's; `duration_ms` spans the
    /// whole execution including backoff sleeps.
    pub async fn execute(&self, template: &Template, max_retries: u32) -> ExecutionResult {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            let mut result = self.send_once(template).await;
            result.attempts = attempt + 1;

            if result.success || attempt >= max_retries {
                result.duration_ms = elapsed_ms(started);
                if attempt > 0 {
                    debug!(
                        template_id = %template.id,
                        attempts = result.attempts,
                        success = result.success,
                        "HTTP execution finished after retries"
                    );
                }
                return result;
            }

            let delay = self.backoff_delay(attempt);
            warn!(
                template_id = %template.id,
                status = ?result.status_code,
                error = ?result.error,
                retry_attempt = attempt + 1,
                max_retries,
                delay_ms = delay.as_millis() as u64,
                "HTTP request failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn send_once(&self, template: &Template) -> ExecutionResult {
        let started = Instant::now();

        let client = match self.client_for(template) {
            Ok(c) => c,
            Err(e) => {
                return ExecutionResult::failure(
                    format!("failed to build HTTP client: {e}"),
                    elapsed_ms(started),
                )
            }
        };

        match build_request(&client, template).send().await {
            Ok(response) => {
                let status = response.status();
                let code = status.as_u16();
                let headers: BTreeMap<String, String> = response
                    .headers()
                    .iter()
                    .filter_map(|(name, value)| {
                        value
                            .to_str()
                            .ok()
                            .map(|v| (name.as_str().to_string(), v.to_string()))
                    })
                    .collect();
                let body = match read_body(response, self.max_body_chars).await {
                    Ok(text) => Some(text),
                    Err(e) => {
                        warn!(template_id = %template.id, error = %e, "failed to read response body");
                        None
                    }
                };
                let success = template.is_expected_status(code);

                ExecutionResult {
                    success,
                    status_code: Some(code),
                    status_text: status.canonical_reason().map(String::from),
                    body,
                    headers: Some(headers),
                    duration_ms: elapsed_ms(started),
                    error: (!success).then(|| format!("unexpected status code {code}")),
                    timed_out: false,
                    attempts: 1,
                }
            }
            Err(e) => {
                let mut result = ExecutionResult::failure(e.to_string(), elapsed_ms(started));
                result.timed_out = e.is_timeout();
                result
            }
        }
    }

    fn client_for(&self, template: &Template) -> Result<reqwest::Client, reqwest::Error> {
        let key = ClientKey {
            follow_redirects: template.follow_redirects,
            validate_ssl: template.validate_ssl,
        };
        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }

        let policy = if key.follow_redirects {
            Policy::limited(self.max_redirects)
        } else {
            Policy::none()
        };
        let client = reqwest::Client::builder()
            .redirect(policy)
            .danger_accept_invalid_certs(!key.validate_ssl)
            .user_agent(self.user_agent.as_str())
            .build()?;
        self.clients.insert(key, client.clone());
        Ok(client)
    }
}

fn build_request(client: &reqwest::Client, template: &Template) -> reqwest::RequestBuilder {
    let timeout = Duration::from_secs(u64::from(template.timeout_seconds.max(1)));
    let mut req = client
        .request(to_reqwest_method(template.method), &template.url)
        .timeout(timeout);

    for (name, value) in &template.headers {
        req = req.header(name.as_str(), value.as_str());
    }
    if template.method.allows_body() {
        if let Some(body) = &template.body {
            req = req.body(body.clone());
        }
    }
    apply_auth(req, &template.auth)
}

fn apply_auth(req: reqwest::RequestBuilder, auth: &AuthConfig) -> reqwest::RequestBuilder {
    match auth {
        AuthConfig::None => req,
        AuthConfig::Bearer { token } => req.bearer_auth(token),
        AuthConfig::Basic { username, password } => req.basic_auth(username, Some(password)),
        AuthConfig::ApiKey {
            location: ApiKeyLocation::Header,
            key,
            value,
        } => req.header(key.as_str(), value.as_str()),
        AuthConfig::ApiKey {
            location: ApiKeyLocation::Query,
            key,
            value,
        } => req.query(&[(key, value)]),
    }
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
        HttpMethod::Head => reqwest::Method::HEAD,
        HttpMethod::Options => reqwest::Method::OPTIONS,
    }
}

/// Keep the head of an oversized body and note how much was dropped.
/// Splits on character boundaries.
pub fn truncate_body(body: &str, max_chars: usize) -> String {
    if body.len() <= max_chars {
        return body.to_owned();
    }
    let total = body.chars().count();
    if total <= max_chars {
        return body.to_owned();
    }
    let head: String = body.chars().take(max_chars).collect();
    format!("{head}... [TRUNCATED: {} chars omitted]", total - max_chars)
}

/// Read the body chunk by chunk, stopping once more bytes have arrived than
/// `max_chars` characters can occupy. The result is truncated like
/// [`truncate_body`].
async fn read_body(
    mut response: reqwest::Response,
    max_chars: usize,
) -> Result<String, reqwest::Error> {
    let byte_budget = max_chars.saturating_mul(4);
    let mut buf: Vec<u8> = Vec::new();
    let mut cut_short = false;

    while let Some(chunk) = response.chunk().await? {
        buf.extend_from_slice(&chunk);
        if buf.len() > byte_budget {
            cut_short = true;
            break;
        }
    }

    let text = String::from_utf8_lossy(&buf);
    if cut_short {
        let head: String = text.chars().take(max_chars).collect();
        Ok(format!("{head}... [TRUNCATED]"))
    } else {
        Ok(truncate_body(&text, max_chars))
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let executor = HttpExecutor::new(&SchedulerConfig::default());
        assert_eq!(executor.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(executor.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(executor.backoff_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn backoff_base_is_configurable() {
        let executor = HttpExecutor::new(&SchedulerConfig::default())
            .with_backoff_base(Duration::from_millis(10));
        assert_eq!(executor.backoff_delay(3), Duration::from_millis(80));
    }

    #[test]
    fn short_body_is_untouched() {
        assert_eq!(truncate_body("ok", 10), "ok");
        assert_eq!(truncate_body(&"x".repeat(10), 10), "x".repeat(10));
    }

    #[test]
    fn long_body_is_truncated_on_char_boundary() {
        let body = "€".repeat(20);
        let out = truncate_body(&body, 5);
        assert!(out.starts_with(&"€".repeat(5)));
        assert!(out.ends_with("[TRUNCATED: 15 chars omitted]"));
    }

    #[tokio::test]
    async fn invalid_url_is_a_failed_result() {
        let executor = HttpExecutor::new(&SchedulerConfig::default());
        let template = Template::new("bad", HttpMethod::Get, "not a url");
        let result = executor.execute(&template, 0).await;
        assert!(!result.success);
        assert!(result.error.is_some());
        assert_eq!(result.attempts, 1);
        assert!(result.status_code.is_none());
    }
}
