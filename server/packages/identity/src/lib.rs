use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use adk_pipe_error::PipeError;
use reqwest::Client;
use tokio::process::Command;
use tracing::warn;

const METADATA_BASE_URL: &str = "http://metadata.google.internal";
const METADATA_IDENTITY_PATH: &str =
    "computeMetadata/v1/instance/service-accounts/default/identity";
const METADATA_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_HELPER_PROGRAM: &str = "gcloud";
const DEFAULT_HELPER_ARGS: [&str; 2] = ["auth", "print-identity-token"];

/// A single way of obtaining an identity token for the remote service.
///
/// Sources report failures as plain strings; the [`TokenChain`] folds them into
/// one `PipeError::Auth` when every source fails. Tokens are fetched fresh per
/// call, never cached.
pub trait TokenSource: Send + Sync {
    /// Short name used in failure reports and logs.
    fn name(&self) -> &'static str;

    /// Fetch a bearer token scoped to `audience` (the remote service URL).
    fn fetch(
        &self,
        audience: &str,
    ) -> Pin<Box<dyn Future<Output = Result<String, String>> + Send + '_>>;
}

/// Native path: the GCE metadata server's identity-token endpoint, available to
/// workloads running on Cloud Run or any other GCE-backed runtime.
pub struct MetadataTokenSource {
    http_client: Client,
    base_url: String,
}

impl MetadataTokenSource {
    pub fn new() -> Self {
        Self::with_base_url(METADATA_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_millis(METADATA_TIMEOUT_MS))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http_client,
            base_url: base_url.into(),
        }
    }
}

impl Default for MetadataTokenSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenSource for MetadataTokenSource {
    fn name(&self) -> &'static str {
        "metadata"
    }

    fn fetch(
        &self,
        audience: &str,
    ) -> Pin<Box<dyn Future<Output = Result<String, String>> + Send + '_>> {
        let url = format!("{}/{}", self.base_url, METADATA_IDENTITY_PATH);
        let audience = audience.to_string();
        Box::pin(async move {
            let response = self
                .http_client
                .get(&url)
                .query(&[("audience", audience.as_str())])
                .header("Metadata-Flavor", "Google")
                .send()
                .await
                .map_err(|err| format!("metadata server unreachable: {err}"))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(format!("metadata server returned {status}: {body}"));
            }

            let token = response
                .text()
                .await
                .map_err(|err| format!("failed reading metadata response: {err}"))?;
            let token = token.trim().to_string();
            if token.is_empty() {
                return Err("metadata server returned an empty token".to_string());
            }
            Ok(token)
        })
    }
}

/// Fallback path: invoke a local credential-helper process and read its stdout
/// as the token. Defaults to `gcloud auth print-identity-token`.
pub struct CliTokenSource {
    program: String,
    args: Vec<String>,
}

impl CliTokenSource {
    pub fn new() -> Self {
        Self::with_command(
            DEFAULT_HELPER_PROGRAM,
            DEFAULT_HELPER_ARGS.iter().map(|arg| arg.to_string()),
        )
    }

    pub fn with_command(
        program: impl Into<String>,
        args: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().collect(),
        }
    }
}

impl Default for CliTokenSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenSource for CliTokenSource {
    fn name(&self) -> &'static str {
        "credential-helper"
    }

    fn fetch(
        &self,
        _audience: &str,
    ) -> Pin<Box<dyn Future<Output = Result<String, String>> + Send + '_>> {
        Box::pin(async move {
            let output = Command::new(&self.program)
                .args(&self.args)
                .output()
                .await
                .map_err(|err| format!("failed to spawn {}: {err}", self.program))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    stderr.trim()
                ));
            }

            let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if token.is_empty() {
                return Err(format!("{} printed no token", self.program));
            }
            Ok(token)
        })
    }
}

/// Ordered list of token sources tried in sequence. The first success wins;
/// when every source fails the chain reports all attempts in one auth error.
pub struct TokenChain {
    sources: Vec<Box<dyn TokenSource>>,
}

impl TokenChain {
    pub fn new(sources: Vec<Box<dyn TokenSource>>) -> Self {
        Self { sources }
    }

    /// Metadata server first, credential helper second.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(MetadataTokenSource::new()),
            Box::new(CliTokenSource::new()),
        ])
    }

    pub async fn fetch(&self, audience: &str) -> Result<String, PipeError> {
        let mut attempts = Vec::new();
        for source in &self.sources {
            match source.fetch(audience).await {
                Ok(token) => return Ok(token),
                Err(err) => {
                    warn!(source = source.name(), error = %err, "token source failed");
                    attempts.push(format!("{}: {err}", source.name()));
                }
            }
        }
        Err(PipeError::Auth {
            attempts: attempts.join("; "),
        })
    }
}
