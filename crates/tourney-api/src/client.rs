//! HTTP client for the tournament backend.
//!
//! Metadata calls go through [`with_retry`]; the multipart transfer steps of
//! the two-step flows run once, since their tokens are single-use.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, RETRY_AFTER};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::backend::{Page, TournamentBackend};
use crate::error::ApiError;
use crate::messages::{eval_info, file_info, unix_now};
use crate::models::{
    Agent, AgentListResponse, ConfigDocument, ConfigKind, EvaluationPhase, EvaluationSubmission,
    EvaluationToken, Tournament, UploadToken, WinnerInfo,
};
use crate::retry::{with_retry, RetryPolicy};
use crate::signer::Signer;
use crate::Result;

const API_PREFIX: &str = "/api/v1";
const UPLOAD_TOKEN_HEADER: &str = "X-Upload-Token";
const API_KEY_HEADER: &str = "X-API-Key";
const EVAL_PHASE_HEADER: &str = "X-Eval-Phase";

/// Connection settings for [`TournamentApi`].
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub retry: RetryPolicy,
    pub metadata_timeout: Duration,
    pub download_timeout: Duration,
    pub upload_timeout: Duration,
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            retry: RetryPolicy::default(),
            metadata_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(300),
            upload_timeout: Duration::from_secs(600),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// reqwest-backed [`TournamentBackend`].
pub struct TournamentApi {
    config: ApiConfig,
    http: reqwest::Client,
    signer: Arc<dyn Signer>,
}

#[derive(Serialize)]
struct InProgressBody<'a> {
    tournament_id: &'a str,
    agent_id: Option<&'a str>,
    validator_hotkey: &'a str,
    public_key: &'a str,
    eval_info: &'a str,
    signature: &'a str,
}

#[derive(Serialize)]
struct SubmitVerifyBody<'a> {
    validator_hotkey: &'a str,
    public_key: &'a str,
    eval_info: &'a str,
    signature: &'a str,
    tournament_id: &'a str,
    agent_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    log_file_size: Option<u64>,
}

#[derive(Serialize)]
struct UploadVerifyBody<'a> {
    miner_hotkey: &'a str,
    public_key: &'a str,
    file_info: &'a str,
    signature: &'a str,
    file_size: u64,
}

impl TournamentApi {
    pub fn new(config: ApiConfig, signer: Arc<dyn Signer>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("tourney/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            config,
            http,
            signer,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}{}/{}",
            self.config.base_url.trim_end_matches('/'),
            API_PREFIX,
            path.trim_start_matches('/')
        )
    }

    fn request(&self, method: Method, path: &str, timeout: Duration) -> RequestBuilder {
        let url = self.url(path);
        debug!(%method, %url, "API request");
        self.http
            .request(method, url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .header(ACCEPT, "application/json")
            .timeout(timeout)
    }

    /// Send a retried metadata request built fresh for every attempt.
    async fn send<F>(&self, label: &str, expect_json: bool, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        with_retry(&self.config.retry, label, || {
            let request = build();
            async move {
                let response = request.send().await?;
                check_response(response, expect_json).await
            }
        })
        .await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, label: &str, path: &str) -> Result<T> {
        let timeout = self.config.metadata_timeout;
        let response = self
            .send(label, true, || self.request(Method::GET, path, timeout))
            .await?;
        Ok(response.json::<T>().await?)
    }

    fn sign(&self, message: &str) -> (String, String) {
        (
            self.signer.public_key_hex(),
            self.signer.sign(message.as_bytes()),
        )
    }

    async fn verify_submission(
        &self,
        tournament_id: &str,
        agent_id: &str,
        log: Option<(&str, u64)>,
    ) -> Result<EvaluationToken> {
        let hotkey = self.signer.hotkey();
        let message = eval_info(
            &hotkey,
            tournament_id,
            Some(agent_id),
            unix_now(),
            log.map(|(hash, _)| hash),
        );
        let (public_key, signature) = self.sign(&message);
        let body = SubmitVerifyBody {
            validator_hotkey: &hotkey,
            public_key: &public_key,
            eval_info: &message,
            signature: &signature,
            tournament_id,
            agent_id,
            log_file_size: log.map(|(_, size)| size),
        };

        let timeout = self.config.metadata_timeout;
        let response = self
            .send("evaluations.submit.verify", true, || {
                self.request(Method::POST, "evaluations/submit/verify", timeout)
                    .json(&body)
            })
            .await?;
        Ok(response.json::<EvaluationToken>().await?)
    }
}

#[async_trait]
impl TournamentBackend for TournamentApi {
    fn hotkey(&self) -> String {
        self.signer.hotkey()
    }

    async fn active_tournament(&self) -> Result<Option<Tournament>> {
        let timeout = self.config.metadata_timeout;
        let result = self
            .send("tournaments.active", true, || {
                self.request(Method::GET, "tournaments/active", timeout)
                    .query(&[("subnet", "true")])
            })
            .await;

        let response = match result {
            Ok(response) => response,
            Err(ApiError::NotFound(_)) => {
                info!("No active tournament (404)");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let text = response.text().await?;
        let value: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)?
        };
        if value.is_null() || value.as_object().is_some_and(|o| o.is_empty()) {
            info!("Backend returned an empty body, no active tournament");
            return Ok(None);
        }

        let tournament: Tournament = serde_json::from_value(value)?;
        info!(
            tournament_id = %tournament.id,
            status = ?tournament.status,
            "Active tournament found"
        );
        Ok(Some(tournament))
    }

    async fn tournament(&self, tournament_id: &str) -> Result<Tournament> {
        self.get_json("tournaments.get", &format!("tournaments/{tournament_id}"))
            .await
    }

    async fn config(&self, tournament_id: &str, kind: ConfigKind) -> Result<ConfigDocument> {
        let path = format!("tournaments/{tournament_id}/config/{}", kind.path_segment());
        let timeout = self.config.metadata_timeout;
        let response = self
            .send(kind.path_segment(), false, || {
                self.request(Method::GET, &path, timeout)
            })
            .await?;

        let phase = match kind {
            ConfigKind::ActiveEval => Some(
                header_str(&response, EVAL_PHASE_HEADER)
                    .and_then(|p| p.parse::<EvaluationPhase>().ok())
                    .unwrap_or(EvaluationPhase::Private),
            ),
            _ => None,
        };
        let content_type = header_str(&response, CONTENT_TYPE.as_str()).unwrap_or_default();
        let text = response.text().await?;
        let content = parse_config_body(&content_type, &text)?;

        Ok(ConfigDocument { phase, content })
    }

    async fn winner(&self, tournament_id: &str) -> Result<WinnerInfo> {
        self.get_json(
            "tournaments.winner",
            &format!("tournaments/{tournament_id}/winner-hotkey"),
        )
        .await
    }

    async fn pending_agents(
        &self,
        tournament_id: &str,
        phase: Option<EvaluationPhase>,
        page: Page,
    ) -> Result<AgentListResponse> {
        let hotkey = self.signer.hotkey();
        let mut query: Vec<(&str, String)> = vec![
            ("tournament_id", tournament_id.to_string()),
            ("validator_hotkey", hotkey),
        ];
        if let Some(limit) = page.limit {
            query.push(("limit", limit.to_string()));
        }
        if let Some(offset) = page.offset {
            query.push(("offset", offset.to_string()));
        }
        if let Some(phase) = phase {
            query.push(("phase", phase.to_string()));
        }

        let timeout = self.config.metadata_timeout;
        let response = self
            .send("agents.unevaluated", true, || {
                self.request(Method::GET, "agents/list/unevaluated", timeout)
                    .query(&query)
            })
            .await?;
        Ok(response.json::<AgentListResponse>().await?)
    }

    async fn download_agent(&self, agent_id: &str, dest: &Path) -> Result<()> {
        let response = self
            .request(
                Method::GET,
                &format!("agents/download/{agent_id}"),
                self.config.download_timeout,
            )
            .send()
            .await?;
        let mut response = check_response(response, false).await?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        info!(agent_id, bytes = written, path = %dest.display(), "Downloaded agent");
        Ok(())
    }

    async fn set_in_progress(&self, tournament_id: &str, agent_id: Option<&str>) -> Result<()> {
        let hotkey = self.signer.hotkey();
        let message = eval_info(&hotkey, tournament_id, agent_id, unix_now(), None);
        let (public_key, signature) = self.sign(&message);
        let body = InProgressBody {
            tournament_id,
            agent_id,
            validator_hotkey: &hotkey,
            public_key: &public_key,
            eval_info: &message,
            signature: &signature,
        };

        let timeout = self.config.metadata_timeout;
        self.send("evaluations.in_progress", true, || {
            self.request(Method::POST, "evaluations/in-progress/cli", timeout)
                .json(&body)
        })
        .await?;

        match agent_id {
            Some(agent_id) => info!(agent_id, "Marked evaluation in progress"),
            None => debug!(validator = %hotkey, "Cleared in-progress marker"),
        }
        Ok(())
    }

    async fn submit_evaluation(
        &self,
        tournament_id: &str,
        agent_id: &str,
        submission: &EvaluationSubmission,
    ) -> Result<EvaluationToken> {
        let log = match &submission.log_archive {
            Some(path) if path.exists() => {
                let bytes = tokio::fs::read(path).await?;
                let hash = hex::encode(Sha256::digest(&bytes));
                Some((bytes, hash))
            }
            _ => None,
        };

        let token = self
            .verify_submission(
                tournament_id,
                agent_id,
                log.as_ref()
                    .map(|(bytes, hash)| (hash.as_str(), bytes.len() as u64)),
            )
            .await?;

        let mut form = Form::new()
            .text("validator_hotkey", self.signer.hotkey())
            .text("score", submission.score.to_string());
        if !is_empty_metadata(&submission.metadata) {
            form = form.text("metadata", submission.metadata.to_string());
        }
        if !submission.summary.is_empty() {
            form = form.text("summary", submission.summary.clone());
        }
        if let Some((bytes, hash)) = log {
            form = form.text("log_hash", hash);
            let part = Part::bytes(bytes)
                .file_name("logs.zip")
                .mime_str("application/zip")?;
            form = form.part("log_file", part);
        }

        let response = self
            .request(
                Method::POST,
                "evaluations/submit",
                self.config.upload_timeout,
            )
            .header(UPLOAD_TOKEN_HEADER, &token.upload_token)
            .multipart(form)
            .send()
            .await?;
        check_response(response, false).await?;

        if submission.summary.starts_with("[FAILED]") {
            warn!(agent_id, summary = %submission.summary, "Submitted failed evaluation");
        } else {
            info!(agent_id, score = submission.score, "Submitted evaluation");
        }
        Ok(token)
    }

    async fn request_upload_token(
        &self,
        content_hash: &str,
        file_size: u64,
    ) -> Result<UploadToken> {
        let hotkey = self.signer.hotkey();
        let message = file_info(&hotkey, content_hash, unix_now());
        let (public_key, signature) = self.sign(&message);
        let body = UploadVerifyBody {
            miner_hotkey: &hotkey,
            public_key: &public_key,
            file_info: &message,
            signature: &signature,
            file_size,
        };

        let timeout = self.config.metadata_timeout;
        let response = self
            .send("agents.upload.verify", true, || {
                self.request(Method::POST, "agents/upload/verify", timeout)
                    .json(&body)
            })
            .await?;
        Ok(response.json::<UploadToken>().await?)
    }

    async fn upload_agent(
        &self,
        token: &UploadToken,
        content_hash: &str,
        archive: &Path,
    ) -> Result<Agent> {
        let bytes = tokio::fs::read(archive).await?;
        let file_name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "agent.zip".to_string());
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/zip")?;
        let form = Form::new()
            .text("miner_hotkey", self.signer.hotkey())
            .text("content_hash", content_hash.to_string())
            .part("file", part);

        let response = self
            .request(
                Method::POST,
                &format!("agents/upload/{}", token.tournament_id),
                self.config.upload_timeout,
            )
            .header(UPLOAD_TOKEN_HEADER, &token.upload_token)
            .multipart(form)
            .send()
            .await?;
        let response = check_response(response, true).await?;
        Ok(response.json::<Agent>().await?)
    }
}

fn header_str(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn is_empty_metadata(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Map error statuses onto [`ApiError`] and reject non-JSON 200 bodies.
async fn check_response(response: Response, expect_json: bool) -> Result<Response> {
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        return Err(error_from_response(response).await);
    }

    if expect_json && status == StatusCode::OK {
        let content_type = header_str(&response, CONTENT_TYPE.as_str()).unwrap_or_default();
        if !content_type.contains("application/json") {
            let url = response.url().to_string();
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(200).collect();
            return Err(ApiError::Transport(format!(
                "expected JSON from {url} but got content-type '{content_type}' \
                 (is the API URL pointing at a web frontend?): {preview}"
            )));
        }
    }

    Ok(response)
}

async fn error_from_response(response: Response) -> ApiError {
    let status = response.status().as_u16();
    let retry_after = header_str(&response, RETRY_AFTER.as_str())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let raw = response.text().await.unwrap_or_default();
    error!(status, body = %raw, "API error response");

    let message = format_error_body(&raw).unwrap_or_else(|| {
        if raw.is_empty() {
            format!("HTTP {status}")
        } else {
            raw.clone()
        }
    });
    ApiError::from_status(status, message, retry_after)
}

/// Flatten a structured error body into one message.
///
/// Handles `detail`/`details` as a string or a list of `{loc, msg}` entries,
/// then `message`. Returns `None` for bodies that are not JSON objects.
pub(crate) fn format_error_body(raw: &str) -> Option<String> {
    let body: Value = serde_json::from_str(raw).ok()?;
    let obj = body.as_object()?;

    let detail = obj
        .get("detail")
        .filter(|v| !v.is_null())
        .or_else(|| obj.get("details").filter(|v| !v.is_null()));

    match detail {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(items)) => {
            let lines: Vec<String> = items
                .iter()
                .map(|item| match item {
                    Value::Object(err) => {
                        let loc = err
                            .get("loc")
                            .and_then(Value::as_array)
                            .map(|parts| {
                                parts
                                    .iter()
                                    .map(|p| match p {
                                        Value::String(s) => s.clone(),
                                        other => other.to_string(),
                                    })
                                    .collect::<Vec<_>>()
                                    .join(" -> ")
                            })
                            .unwrap_or_default();
                        let msg = err.get("msg").and_then(Value::as_str).unwrap_or_default();
                        format!("  {loc}: {msg}")
                    }
                    Value::String(s) => format!("  {s}"),
                    other => format!("  {other}"),
                })
                .collect();
            Some(format!("Validation errors:\n{}", lines.join("\n")))
        }
        Some(other) => Some(other.to_string()),
        None => Some(
            obj.get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| body.to_string()),
        ),
    }
}

/// Parse a config document as YAML or JSON depending on its content type.
pub(crate) fn parse_config_body(content_type: &str, text: &str) -> Result<Value> {
    if content_type.contains("yaml") {
        Ok(serde_yaml::from_str::<Value>(text)?)
    } else {
        Ok(serde_json::from_str::<Value>(text)?)
    }
}
