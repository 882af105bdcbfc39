//! HTTP client construction and error classification.

use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use anyhow::anyhow;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;

pub(crate) const HEADER_REQUEST_ID: &str = "x-request-id";

/// Separates input mistakes (exit 2) from failed requests (exit 3).
#[derive(Debug)]
pub(crate) enum CliError {
    Validation(String),
    Failure(anyhow::Error),
}

pub(crate) type CliResult<T> = Result<T, CliError>;

impl CliError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn failure(error: impl Into<anyhow::Error>) -> Self {
        Self::Failure(error.into())
    }

    pub(crate) const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::Failure(_) => 3,
        }
    }

    pub(crate) fn display_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Failure(error) => format!("{error:#}"),
        }
    }
}

impl Display for CliError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("cli error")
    }
}

impl std::error::Error for CliError {}

/// Shared state handed to every command handler.
#[derive(Clone)]
pub(crate) struct AppContext {
    pub(crate) client: Client,
    pub(crate) base_url: Url,
}

impl AppContext {
    /// Build a client that tags every request with `request_id`.
    pub(crate) fn new(base_url: Url, timeout: Duration, request_id: &str) -> CliResult<Self> {
        let mut default_headers = HeaderMap::new();
        let request_id = HeaderValue::from_str(request_id).map_err(|_| {
            CliError::failure(anyhow!("request identifier contains invalid characters"))
        })?;
        default_headers.insert(HEADER_REQUEST_ID, request_id);

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(default_headers)
            .build()
            .map_err(|err| CliError::failure(anyhow!("failed to build HTTP client: {err}")))?;
        Ok(Self { client, base_url })
    }

    /// `/config` on the configured server, with `query` appended.
    pub(crate) fn config_url(&self, query: &[(&str, String)]) -> CliResult<Url> {
        let mut url = self
            .base_url
            .join("/config")
            .map_err(|err| CliError::failure(anyhow!("invalid base URL: {err}")))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

#[derive(Deserialize)]
struct FailureBody {
    message: String,
}

/// Turn a non-success response into a [`CliError`].
///
/// Rejections of the input itself (`400`, `409`) count as validation errors;
/// everything else is a failed request.
pub(crate) async fn classify_failure(response: reqwest::Response) -> CliError {
    let status = response.status();
    let bytes = response.bytes().await.unwrap_or_default();
    let message = serde_json::from_slice::<FailureBody>(&bytes).map_or_else(
        |_| String::from_utf8_lossy(&bytes).trim().to_string(),
        |body| body.message,
    );

    if matches!(status, StatusCode::BAD_REQUEST | StatusCode::CONFLICT) {
        CliError::validation(message)
    } else if message.is_empty() {
        CliError::failure(anyhow!("request failed with status {status}"))
    } else {
        CliError::failure(anyhow!("{message} (status {status})"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_split_validation_from_failure() {
        let validation = CliError::validation("service is required");
        assert_eq!(validation.exit_code(), 2);
        assert_eq!(validation.display_message(), "service is required");

        let failure = CliError::failure(anyhow!("connection refused"));
        assert_eq!(failure.exit_code(), 3);
        assert!(failure.display_message().contains("connection refused"));
    }

    #[test]
    fn config_url_encodes_query() -> anyhow::Result<()> {
        let ctx = AppContext::new(
            Url::parse("http://127.0.0.1:8080/ignored")?,
            Duration::from_secs(1),
            "req-1",
        )
        .map_err(|err| anyhow!(err.display_message()))?;
        let url = ctx
            .config_url(&[("service", "a b".into()), ("version", "2".into())])
            .map_err(|err| anyhow!(err.display_message()))?;
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/config?service=a+b&version=2");

        let bare = ctx
            .config_url(&[])
            .map_err(|err| anyhow!(err.display_message()))?;
        assert_eq!(bare.as_str(), "http://127.0.0.1:8080/config");
        Ok(())
    }
}
