//! Every pipeline exit path leaves the workspace clean and the
//! in-progress marker cleared.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tourney_api::Agent;
use tourney_core::fakes::{
    agent_archive, malformed_archive, sample_task, BackendOp, EngineStep, Fault, MemoryBackend,
    ScriptedEngine, ScriptedInstaller,
};
use tourney_core::pipeline::{AgentEvaluationPipeline, REGISTRY_DIR, RESULT_FILE, RUN_CONFIG_FILE};
use tourney_core::TourneyError;

const TOURNAMENT: &str = "t-1";
const AGENT: &str = "agent-1";

struct Harness {
    _tmp: TempDir,
    workspace: PathBuf,
    engine_dir: PathBuf,
    backend: Arc<MemoryBackend>,
    installer: Arc<ScriptedInstaller>,
    engine: Arc<ScriptedEngine>,
    pipeline: AgentEvaluationPipeline,
}

fn harness() -> Harness {
    let tmp = TempDir::new().unwrap();
    let workspace = tmp.path().join("workspace");
    let engine_dir = tmp.path().join("eval_repo");
    std::fs::create_dir_all(&engine_dir).unwrap();

    let backend = Arc::new(MemoryBackend::new("validator-hk"));
    backend.set_archive(AGENT, agent_archive("nav_task"));
    let installer = Arc::new(ScriptedInstaller::new());
    let engine = Arc::new(ScriptedEngine::new(&engine_dir));

    let pipeline = AgentEvaluationPipeline::new(
        backend.clone(),
        installer.clone(),
        engine.clone(),
        &workspace,
        Duration::from_secs(60),
    );
    Harness {
        _tmp: tmp,
        workspace,
        engine_dir,
        backend,
        installer,
        engine,
        pipeline,
    }
}

impl Harness {
    async fn evaluate(&self) -> tourney_core::Result<tourney_api::EvaluationToken> {
        let task = sample_task();
        self.pipeline
            .evaluate(TOURNAMENT, &Agent::new(AGENT), Some(&task))
            .await
    }

    fn assert_clean(&self) {
        assert_eq!(self.backend.in_progress(), None, "claim must be cleared");
        assert_eq!(self.backend.claims().last(), Some(&None));
        assert!(!self.workspace.join(RESULT_FILE).exists());
        assert!(!self.engine_dir.join(RESULT_FILE).exists());
        assert!(!self.workspace.join(RUN_CONFIG_FILE).exists());
        assert!(
            self.installer.installed().is_empty(),
            "agent module left installed: {:?}",
            self.installer.installed()
        );

        let registry = self.workspace.join(REGISTRY_DIR);
        if registry.exists() {
            assert!(
                std::fs::read_dir(&registry).unwrap().next().is_none(),
                "agent registry not emptied"
            );
        }
        let stray: Vec<_> = std::fs::read_dir(&self.workspace)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".zip"))
            .collect();
        assert!(stray.is_empty(), "temporary archives left behind: {stray:?}");
    }
}

fn evaluation_error(err: TourneyError) -> tourney_core::EvaluationError {
    match err {
        TourneyError::Evaluation(e) => e,
        other => panic!("expected evaluation error, got {other:?}"),
    }
}

#[tokio::test]
async fn successful_evaluation_submits_and_cleans_up() {
    let h = harness();

    let token = h.evaluate().await.unwrap();
    assert_eq!(token.agent_id.as_deref(), Some(AGENT));

    let submissions = h.backend.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].score, 0.5);
    assert!(!submissions[0].is_failure_report());
    assert_eq!(submissions[0].log_hash, None);

    assert_eq!(h.backend.claims(), vec![Some(AGENT.to_string()), None]);
    assert_eq!(h.installer.installs().len(), 1);
    assert!(h.installer.installs()[0].ends_with("source/nav_task"));

    let configs = h.engine.configs();
    assert_eq!(configs.len(), 1);
    assert_eq!(configs[0]["task_module"], "nav_task");
    assert!(configs[0]["policy_path"]
        .as_str()
        .unwrap()
        .ends_with("best_policy/best_policy.pt"));

    h.assert_clean();
}

#[tokio::test]
async fn log_directory_is_archived_with_the_result() {
    let h = harness();
    h.engine.push(EngineStep::Score {
        score: 0.9,
        with_logs: true,
    });

    h.evaluate().await.unwrap();

    let submissions = h.backend.submissions();
    assert_eq!(submissions[0].score, 0.9);
    assert!(submissions[0].log_hash.is_some());
    h.assert_clean();
}

#[tokio::test]
async fn download_failure_still_clears_claim() {
    let h = harness();
    h.backend
        .fail_next(BackendOp::Download, Fault::Transport, 1);

    let err = h.evaluate().await.unwrap_err();
    assert!(matches!(err, TourneyError::Api(_)));
    assert_eq!(h.backend.claims(), vec![None]);
    assert!(h.backend.submissions().is_empty());
    h.assert_clean();
}

#[tokio::test]
async fn malformed_archive_is_recoverable() {
    let h = harness();
    h.backend.set_archive(AGENT, malformed_archive());

    let err = evaluation_error(h.evaluate().await.unwrap_err());
    assert!(err.recoverable);
    assert!(err.message.contains("invalid agent archive"), "{}", err.message);
    assert!(err.message.contains("best_policy"));
    assert!(h.installer.installs().is_empty());
    h.assert_clean();
}

#[tokio::test]
async fn install_failure_is_recoverable() {
    let h = harness();
    h.installer.fail_install("No matching distribution found");

    let err = evaluation_error(h.evaluate().await.unwrap_err());
    assert!(err.recoverable);
    assert!(err.message.contains("module installation failed"));
    assert!(err.message.contains("No matching distribution"));
    assert_eq!(h.backend.claims(), vec![Some(AGENT.to_string()), None]);
    h.assert_clean();
}

#[tokio::test]
async fn engine_timeout_is_recoverable() {
    let h = harness();
    h.engine.push(EngineStep::Timeout);

    let err = evaluation_error(h.evaluate().await.unwrap_err());
    assert!(err.recoverable);
    assert_eq!(err.message, "evaluation timed out after 60s");
    h.assert_clean();
}

#[tokio::test]
async fn engine_crash_is_recoverable() {
    let h = harness();
    h.engine.push(EngineStep::Fail {
        exit_code: 2,
        stderr: "CUDA out of memory".into(),
    });

    let err = evaluation_error(h.evaluate().await.unwrap_err());
    assert!(err.recoverable);
    assert!(err.message.starts_with("evaluation script failed (exit=2)"));
    assert!(err.message.contains("CUDA out of memory"));
    h.assert_clean();
}

#[tokio::test]
async fn missing_result_file_is_fatal() {
    let h = harness();
    h.engine.push(EngineStep::NoResult);

    let err = evaluation_error(h.evaluate().await.unwrap_err());
    assert!(!err.recoverable);
    assert!(err.message.contains(RESULT_FILE));
    assert!(h.backend.submissions().is_empty());
    h.assert_clean();
}

#[tokio::test]
async fn missing_entrypoint_is_fatal() {
    let h = harness();
    h.engine.remove_entrypoint();

    let err = evaluation_error(h.evaluate().await.unwrap_err());
    assert!(!err.recoverable);
    assert!(h.engine.configs().is_empty());
    h.assert_clean();
}

#[tokio::test]
async fn submit_failure_still_cleans_up() {
    let h = harness();
    h.backend
        .fail_next(BackendOp::SubmitEvaluation, Fault::Server, 1);

    let err = h.evaluate().await.unwrap_err();
    assert!(matches!(err, TourneyError::Api(_)));
    assert!(!err.is_quiet_zone());
    h.assert_clean();
}

#[tokio::test]
async fn quiet_zone_on_submit_propagates() {
    let h = harness();
    h.engine.push(EngineStep::Score {
        score: 0.7,
        with_logs: true,
    });
    h.backend
        .fail_next(BackendOp::SubmitEvaluation, Fault::QuietZone, 1);

    let err = h.evaluate().await.unwrap_err();
    assert!(err.is_quiet_zone());
    h.assert_clean();
}

#[tokio::test]
async fn missing_task_config_touches_nothing() {
    let h = harness();

    let err = h
        .pipeline
        .evaluate(TOURNAMENT, &Agent::new(AGENT), None)
        .await
        .unwrap_err();
    let err = evaluation_error(err);
    assert!(!err.recoverable);
    assert_eq!(h.backend.calls(BackendOp::Download), 0);
    assert!(h.backend.claims().is_empty());
}

#[tokio::test]
async fn leftovers_from_a_previous_run_are_removed_first() {
    let h = harness();
    h.installer.preinstall("nav_task");
    std::fs::create_dir_all(h.workspace.join(REGISTRY_DIR).join("stale")).unwrap();
    std::fs::write(h.workspace.join(RESULT_FILE), r#"{"score": 99.0}"#).unwrap();

    h.evaluate().await.unwrap();

    // Uninstalled once before the run and once during cleanup.
    assert_eq!(h.installer.uninstalls(), vec!["nav_task", "nav_task"]);
    assert_eq!(h.backend.submissions()[0].score, 0.5);
    h.assert_clean();
}
