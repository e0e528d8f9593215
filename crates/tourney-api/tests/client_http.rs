//! REST client behaviour against a mock backend.

use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;
use tourney_api::{
    ApiConfig, ApiError, ConfigKind, EvaluationPhase, EvaluationSubmission, Page, RetryPolicy,
    Signer, Sr25519Signer, TournamentApi, TournamentBackend,
};

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        factor: 2,
    }
}

fn client(server: &MockServer) -> (TournamentApi, String) {
    let signer = Arc::new(Sr25519Signer::from_secret("//Alice").unwrap());
    let hotkey = signer.hotkey();
    let config = ApiConfig::new(server.base_url(), "test-key").with_retry(fast_retry());
    (TournamentApi::new(config, signer).unwrap(), hotkey)
}

// ---------------------------------------------------------------------------
// Active tournament
// ---------------------------------------------------------------------------

#[tokio::test]
async fn active_tournament_parses_and_sends_headers() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v1/tournaments/active")
                .query_param("subnet", "true")
                .header("X-API-Key", "test-key");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "id": "t-1",
                    "status": "active",
                    "contest_end_time": 1000,
                    "configs": {"ignored": true}
                }));
        })
        .await;

    let (api, _) = client(&server);
    let tournament = api.active_tournament().await.unwrap().unwrap();

    assert_eq!(tournament.id, "t-1");
    assert_eq!(tournament.contest_end_time, Some(1000));
    mock.assert_async().await;
}

#[tokio::test]
async fn active_tournament_404_and_null_mean_none() {
    let server = MockServer::start_async().await;
    let (api, _) = client(&server);

    let mut missing = server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v1/tournaments/active");
            then.status(404)
                .json_body(json!({"detail": "No active tournament"}));
        })
        .await;
    assert!(api.active_tournament().await.unwrap().is_none());
    missing.delete_async().await;

    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v1/tournaments/active");
            then.status(200)
                .header("content-type", "application/json")
                .body("null");
        })
        .await;
    assert!(api.active_tournament().await.unwrap().is_none());
}

#[tokio::test]
async fn html_200_is_transport_error_and_retried() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v1/tournaments/active");
            then.status(200)
                .header("content-type", "text/html")
                .body("<!doctype html><html></html>");
        })
        .await;

    let (api, _) = client(&server);
    let err = api.active_tournament().await.unwrap_err();

    assert!(matches!(err, ApiError::Transport(_)));
    assert!(err.to_string().contains("text/html"));
    mock.assert_hits_async(3).await;
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

#[tokio::test]
async fn validation_errors_are_formatted_and_not_retried() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v1/tournaments/t-1/winner-hotkey");
            then.status(422).json_body(json!({
                "detail": [{"loc": ["path", "tournament_id"], "msg": "invalid id"}]
            }));
        })
        .await;

    let (api, _) = client(&server);
    let err = api.winner("t-1").await.unwrap_err();

    match &err {
        ApiError::Validation { status, message } => {
            assert_eq!(*status, 422);
            assert!(message.contains("path -> tournament_id: invalid id"));
        }
        other => panic!("unexpected {other:?}"),
    }
    mock.assert_hits_async(1).await;
}

#[tokio::test]
async fn server_errors_are_not_retried() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v1/tournaments/t-1/winner-hotkey");
            then.status(503).body("upstream down");
        })
        .await;

    let (api, _) = client(&server);
    let err = api.winner("t-1").await.unwrap_err();

    assert!(
        matches!(err, ApiError::Server { status: 503, ref message } if message == "upstream down")
    );
    mock.assert_hits_async(1).await;
}

#[tokio::test]
async fn rate_limit_is_retried_until_exhausted() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v1/tournaments/t-1/winner-hotkey");
            then.status(429)
                .header("Retry-After", "0")
                .json_body(json!({"message": "slow down"}));
        })
        .await;

    let (api, _) = client(&server);
    let err = api.winner("t-1").await.unwrap_err();

    match err {
        ApiError::RateLimited {
            message,
            retry_after,
        } => {
            assert_eq!(message, "slow down");
            assert_eq!(retry_after, Some(Duration::ZERO));
        }
        other => panic!("unexpected {other:?}"),
    }
    mock.assert_hits_async(3).await;
}

// ---------------------------------------------------------------------------
// Configs and pending work
// ---------------------------------------------------------------------------

#[tokio::test]
async fn active_eval_config_reads_phase_header_and_yaml() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v1/tournaments/t-1/config/active_eval_config");
            then.status(200)
                .header("content-type", "application/x-yaml")
                .header("X-Eval-Phase", "public")
                .body("task_name: nav\ntask_module: nav_task\nnum_episodes: 4\n");
        })
        .await;

    let (api, _) = client(&server);
    let doc = api.config("t-1", ConfigKind::ActiveEval).await.unwrap();

    assert_eq!(doc.phase, Some(EvaluationPhase::Public));
    assert_eq!(doc.content["task_module"], "nav_task");
    assert_eq!(doc.content["num_episodes"], 4);
}

#[tokio::test]
async fn pending_agents_sends_validator_and_phase() {
    let server = MockServer::start_async().await;
    let (api, hotkey) = client(&server);
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v1/agents/list/unevaluated")
                .query_param("tournament_id", "t-1")
                .query_param("validator_hotkey", hotkey.as_str())
                .query_param("phase", "private")
                .query_param("limit", "10");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "agents": [{"id": "a-1"}, {"agent_id": "a-2", "status": "pending"}],
                    "total": 2
                }));
        })
        .await;

    let page = Page {
        limit: Some(10),
        offset: None,
    };
    let list = api
        .pending_agents("t-1", Some(EvaluationPhase::Private), page)
        .await
        .unwrap();

    let ids: Vec<_> = list.agents.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["a-1", "a-2"]);
    mock.assert_async().await;
}

#[tokio::test]
async fn download_streams_to_file() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v1/agents/download/a-1");
            then.status(200)
                .header("content-type", "application/zip")
                .body(vec![7u8; 20_000]);
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("nested").join("agent.zip");
    let (api, _) = client(&server);
    api.download_agent("a-1", &dest).await.unwrap();

    let bytes = std::fs::read(&dest).unwrap();
    assert_eq!(bytes.len(), 20_000);
}

// ---------------------------------------------------------------------------
// Signed flows
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clearing_in_progress_sends_null_agent() {
    let server = MockServer::start_async().await;
    let (api, hotkey) = client(&server);
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v1/evaluations/in-progress/cli")
                .json_body_partial(
                    json!({"tournament_id": "t-1", "agent_id": null, "validator_hotkey": hotkey})
                        .to_string(),
                )
                .body_contains(format!("{hotkey}:t-1::"));
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({"ok": true}));
        })
        .await;

    api.set_in_progress("t-1", None).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn submit_evaluation_runs_verify_then_upload_with_token() {
    let server = MockServer::start_async().await;
    let (api, hotkey) = client(&server);
    let verify = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v1/evaluations/submit/verify")
                .json_body_partial(
                    json!({"tournament_id": "t-1", "agent_id": "a-1", "validator_hotkey": hotkey})
                        .to_string(),
                );
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "upload_token": "tok-123",
                    "tournament_id": "t-1",
                    "phase": "public"
                }));
        })
        .await;
    let submit = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v1/evaluations/submit")
                .header("X-Upload-Token", "tok-123")
                .body_contains("0.5")
                .body_contains("[FAILED] install failed");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({"id": "e-1"}));
        })
        .await;

    let mut submission = EvaluationSubmission::failed("install failed");
    submission.score = 0.5;
    let token = api
        .submit_evaluation("t-1", "a-1", &submission)
        .await
        .unwrap();

    assert_eq!(token.phase, Some(EvaluationPhase::Public));
    verify.assert_async().await;
    submit.assert_async().await;
}

#[tokio::test]
async fn quiet_zone_on_verify_skips_upload() {
    let server = MockServer::start_async().await;
    let (api, _) = client(&server);
    let verify = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/evaluations/submit/verify");
            then.status(409)
                .json_body(json!({"detail": "Submissions closed during quiet zone"}));
        })
        .await;
    let submit = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/evaluations/submit");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({}));
        })
        .await;

    let err = api
        .submit_evaluation("t-1", "a-1", &EvaluationSubmission::failed("x"))
        .await
        .unwrap_err();

    assert!(err.is_quiet_zone());
    verify.assert_hits_async(1).await;
    submit.assert_hits_async(0).await;
}

#[tokio::test]
async fn agent_upload_two_step() {
    let server = MockServer::start_async().await;
    let (api, _) = client(&server);
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v1/agents/upload/verify")
                .json_body_partial(json!({"file_size": 3}).to_string());
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "upload_token": "up-1",
                    "tournament_id": "t-9"
                }));
        })
        .await;
    let upload = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v1/agents/upload/t-9")
                .header("X-Upload-Token", "up-1")
                .body_contains("deadbeef");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({"id": "a-77", "status": "pending"}));
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("agent.zip");
    std::fs::write(&archive, b"zip").unwrap();

    let token = api.request_upload_token("deadbeef", 3).await.unwrap();
    let agent = api
        .upload_agent(&token, "deadbeef", &archive)
        .await
        .unwrap();

    assert_eq!(agent.id, "a-77");
    upload.assert_async().await;
}
