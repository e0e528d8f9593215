//! Lifecycle events carry a stable `event` field and the identifiers log
//! pipelines filter on.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tourney_api::EvaluationPhase;
use tourney_core::fakes::{CountdownGuard, MemoryBackend, RecordingWeightPublisher};
use tourney_core::{obs, EvaluationStats, Period, PublishPolicy, RewardSettler};
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Capture {
    type Writer = Capture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn subscriber(capture: &Capture) -> impl tracing::Subscriber + Send + Sync {
    tracing_subscriber::fmt()
        .json()
        .with_max_level(Level::DEBUG)
        .with_writer(capture.clone())
        .finish()
}

fn captured(f: impl FnOnce()) -> String {
    let capture = Capture::default();
    tracing::subscriber::with_default(subscriber(&capture), f);
    capture.contents()
}

#[test]
fn period_observed_event_names_period_and_status() {
    let out = captured(|| obs::emit_period_observed("t-9", Period::SubmitWindow, "active"));
    assert!(out.contains(r#""event":"period.observed""#), "{out}");
    assert!(out.contains("SUBMIT_WINDOW"));
    assert!(out.contains(r#""tournament_id":"t-9""#));
}

#[test]
fn pass_finished_event_reports_totals() {
    let stats = EvaluationStats {
        evaluated: 3,
        failed: 2,
    };
    let out = captured(|| obs::emit_pass_finished(EvaluationPhase::Public, stats));
    assert!(out.contains(r#""event":"evaluation.pass_finished""#));
    assert!(out.contains(r#""total":5"#), "{out}");
}

#[test]
fn publish_failure_is_a_warning() {
    let out = captured(|| obs::emit_weights_publish_failed(4, 2, &"rpc timeout"));
    assert!(out.contains(r#""level":"WARN""#), "{out}");
    assert!(out.contains("rpc timeout"));
}

#[test]
fn agent_events_inside_span_carry_span_fields() {
    let out = captured(|| {
        let _span = obs::agent_span("t-1", "a-7").entered();
        obs::emit_stage("a-7", "install");
    });
    assert!(out.contains(r#""event":"agent.stage""#), "{out}");
    assert!(out.contains("tourney.agent"));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn settlement_emits_target_and_publish_events() {
    let capture = Capture::default();
    let _default = tracing::subscriber::set_default(subscriber(&capture));

    let backend = Arc::new(MemoryBackend::new("validator-hk"));
    let publisher = Arc::new(RecordingWeightPublisher::new(&["burn-hk", "m1"]));
    let settler = RewardSettler::new(
        backend,
        publisher,
        0,
        PublishPolicy::default(),
        Duration::from_secs(60),
    );
    settler
        .settle("t-1", CountdownGuard::new(0).as_ref())
        .await
        .unwrap();

    let out = capture.contents();
    assert!(out.contains(r#""event":"reward.target_resolved""#), "{out}");
    assert!(out.contains("no_winner_approved"));
    assert_eq!(out.matches(r#""event":"weights.published""#).count(), 2);
}
