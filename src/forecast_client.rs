use crate::error::OracleError;
use crate::policy::{ForecastOracle, ForecastRequest};
use anyhow::{anyhow, Context, Result};
use reqwest::{Certificate, Identity, StatusCode};
use serde::Deserialize;
use std::env;
use std::fs;
use std::thread;
use std::time::{Duration, Instant};

const FORECAST_API_MTLS_CA_CERT_ENV: &str = "FORECAST_API_MTLS_CA_CERT";
const FORECAST_API_MTLS_CLIENT_CERT_ENV: &str = "FORECAST_API_MTLS_CLIENT_CERT";
const FORECAST_API_MTLS_CLIENT_KEY_ENV: &str = "FORECAST_API_MTLS_CLIENT_KEY";
const MAX_ERROR_BODY_CHARS: usize = 512;
const MAX_RETRIES: usize = 2;
const BASE_DELAY_MS: u64 = 500;
const MAX_DELAY_MS: u64 = 4000;

fn env_path(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn load_mtls_ca_certificate() -> Result<Option<Certificate>> {
    let Some(path) = env_path(FORECAST_API_MTLS_CA_CERT_ENV) else {
        return Ok(None);
    };
    let pem = fs::read(&path)
        .with_context(|| format!("failed to read mTLS CA certificate from {}", path))?;
    let certificate = Certificate::from_pem(&pem)
        .with_context(|| format!("failed to parse mTLS CA certificate from {}", path))?;
    Ok(Some(certificate))
}

fn load_mtls_identity() -> Result<Option<Identity>> {
    let cert_path = env_path(FORECAST_API_MTLS_CLIENT_CERT_ENV);
    let key_path = env_path(FORECAST_API_MTLS_CLIENT_KEY_ENV);

    match (cert_path, key_path) {
        (None, None) => Ok(None),
        (Some(_), None) | (None, Some(_)) => Err(anyhow!(
            "{} and {} must both be set when enabling forecast API mTLS",
            FORECAST_API_MTLS_CLIENT_CERT_ENV,
            FORECAST_API_MTLS_CLIENT_KEY_ENV
        )),
        (Some(cert_path), Some(key_path)) => {
            let mut identity_pem = fs::read(&cert_path).with_context(|| {
                format!("failed to read mTLS client certificate from {}", cert_path)
            })?;
            let key_pem = fs::read(&key_path)
                .with_context(|| format!("failed to read mTLS client key from {}", key_path))?;
            if !identity_pem.ends_with(b"\n") {
                identity_pem.push(b'\n');
            }
            identity_pem.extend_from_slice(&key_pem);

            let identity = Identity::from_pem(&identity_pem).with_context(|| {
                format!(
                    "failed to parse mTLS client identity from {} and {}",
                    cert_path, key_path
                )
            })?;
            Ok(Some(identity))
        }
    }
}

pub fn build_blocking_client(timeout: Option<Duration>) -> Result<reqwest::blocking::Client> {
    let mut builder = reqwest::blocking::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    if let Some(certificate) = load_mtls_ca_certificate()? {
        builder = builder.add_root_certificate(certificate);
    }
    if let Some(identity) = load_mtls_identity()? {
        builder = builder.identity(identity);
    }
    builder.build().context("failed to build HTTP client")
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    #[serde(rename = "predictedClose")]
    predicted_close: Option<f64>,
}

/// Forecast oracle behind `GET {base}/forecast`.
pub struct HttpForecastOracle {
    client: reqwest::blocking::Client,
    base_url: String,
    budget: Option<Duration>,
}

impl HttpForecastOracle {
    /// Each attempt may take up to `timeout`; retries are not time boxed.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_blocking_client(Some(timeout))?,
            base_url: normalize_base_url(base_url)?,
            budget: None,
        })
    }

    /// All attempts and backoff sleeps of one prediction finish within
    /// `budget`. Each attempt gets an equal share of it.
    pub fn within_budget(base_url: &str, budget: Duration) -> Result<Self> {
        Ok(Self {
            client: build_blocking_client(Some(attempt_share(budget)))?,
            base_url: normalize_base_url(base_url)?,
            budget: Some(budget),
        })
    }

    pub fn forecast_url(&self) -> String {
        format!("{}/forecast", self.base_url)
    }

    fn fetch(&self, request: &ForecastRequest) -> Result<Option<f64>, OracleError> {
        let url = self.forecast_url();
        let response = self
            .client
            .get(&url)
            .query(&[
                ("ticker", request.ticker.clone()),
                ("start", request.start.to_rfc3339()),
                ("end", request.end.to_rfc3339()),
                ("interval", request.interval.clone()),
            ])
            .send()
            .map_err(|e| OracleError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let message = format!(
                "status={} url={} ticker={} body={}",
                status,
                url,
                request.ticker,
                truncate_for_log(&body, MAX_ERROR_BODY_CHARS)
            );
            if status.is_server_error() {
                return Err(OracleError::Transport(message));
            }
            return Err(OracleError::Unavailable(message));
        }

        let payload: ForecastResponse = response
            .json()
            .map_err(|e| OracleError::Decode(e.to_string()))?;
        Ok(payload.predicted_close)
    }
}

impl ForecastOracle for HttpForecastOracle {
    fn predict_next_close(&self, request: &ForecastRequest) -> Result<Option<f64>, OracleError> {
        // The last retry must start early enough to finish inside the budget.
        let deadline = self
            .budget
            .map(|budget| Instant::now() + budget.saturating_sub(attempt_share(budget)));
        retry_with_backoff(deadline, || self.fetch(request))
    }
}

fn attempt_share(budget: Duration) -> Duration {
    budget / (MAX_RETRIES as u32 + 1)
}

fn normalize_base_url(base_url: &str) -> Result<String> {
    let base_url = base_url.trim().trim_end_matches('/').to_string();
    if base_url.is_empty() {
        return Err(anyhow!("forecast API base URL is empty"));
    }
    Ok(base_url)
}

/// Retry transport failures with exponential backoff and jitter. Other
/// errors are returned at once, and so is a transport failure whose backoff
/// would end past `deadline`.
fn retry_with_backoff<F, T>(deadline: Option<Instant>, mut operation: F) -> Result<T, OracleError>
where
    F: FnMut() -> Result<T, OracleError>,
{
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(result) => return Ok(result),
            Err(OracleError::Transport(message)) if attempt < MAX_RETRIES => {
                let delay_ms = (BASE_DELAY_MS * 2_u64.pow(attempt as u32)).min(MAX_DELAY_MS);
                let jitter_range = (delay_ms as f64 * 0.25) as u64;
                let jitter = fastrand::u64(0..=jitter_range * 2);
                let final_delay = delay_ms.saturating_sub(jitter_range).saturating_add(jitter);
                if let Some(deadline) = deadline {
                    if Instant::now() + Duration::from_millis(final_delay) >= deadline {
                        return Err(OracleError::Transport(message));
                    }
                }
                log::debug!(
                    "Forecast attempt {} failed ({}), retrying in {}ms",
                    attempt + 1,
                    message,
                    final_delay
                );
                thread::sleep(Duration::from_millis(final_delay));
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn truncate_for_log(value: &str, max_chars: usize) -> String {
    let trimmed = value.trim();
    let mut iter = trimmed.chars();
    let mut out = String::new();
    for _ in 0..max_chars {
        let Some(ch) = iter.next() else {
            return trimmed.to_string();
        };
        out.push(ch);
    }
    if iter.next().is_some() {
        out.push_str("...");
    }
    out
}
