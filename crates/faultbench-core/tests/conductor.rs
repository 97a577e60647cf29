//! Conductor sessions: grading, persistence and mandatory recovery.

use faultbench_core::oracle::{DetectionOracle, LocalizationOracle, WorkloadOracle};
use faultbench_core::testing::{FakeApplication, FakeCluster, FakeInjector, ScriptedWorkload};
use faultbench_core::{
    Conductor, ConductorConfig, InProcessTransport, Platform, ProblemDefinition, ProblemRegistry,
    Reply, VerdictStore, submit_answer,
};
use faultbench_proto::{
    Error, FaultDescriptor, FaultInjector, FaultKind, FaultStatus, OracleName, Stage,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const SUBMISSION: &str = r#"submit({"detection":"Yes","localization":["frontend"]})"#;

struct Harness {
    conductor: Arc<Conductor>,
    injector: FakeInjector,
    cluster: FakeCluster,
    app: FakeApplication,
    results: TempDir,
}

fn definition(id: &str, flag: &str) -> ProblemDefinition {
    ProblemDefinition {
        id: id.to_string(),
        description: None,
        application: "astronomy-shop".to_string(),
        namespace: None,
        injector: "fake".to_string(),
        fault: FaultDescriptor::new(flag, FaultKind::FeatureFlag).target("frontend"),
        workload: true,
        oracles: [
            (OracleName::Detection, DetectionOracle::new("Yes").into()),
            (OracleName::Localization, LocalizationOracle::new(json!(["frontend"])).into()),
        ]
        .into_iter()
        .collect(),
    }
}

fn harness_with(workload: ScriptedWorkload, extra: Vec<ProblemDefinition>) -> Harness {
    let injector = FakeInjector::new();
    let cluster = FakeCluster::new();
    let app = FakeApplication::new("astronomy-shop", "astronomy-shop");
    let results = TempDir::new().unwrap();

    let mut registry = ProblemRegistry::new();
    registry.register(definition("cart_failure", "cartServiceFailure")).unwrap();
    registry.register(definition("ad_failure", "adServiceFailure")).unwrap();
    for def in extra {
        registry.register(def).unwrap();
    }

    let shared = injector.clone();
    let platform = Platform::new(Arc::new(cluster.clone()))
        .with_application(Arc::new(app.clone()))
        .with_injector("fake", move |_namespace: &str| {
            let injector: Arc<dyn FaultInjector> = Arc::new(shared.clone());
            Ok(injector)
        })
        .with_workload(Arc::new(workload));

    let config = ConductorConfig {
        results_dir: results.path().to_path_buf(),
        ..ConductorConfig::default()
    };
    Harness {
        conductor: Arc::new(Conductor::new(registry, platform, &config)),
        injector,
        cluster,
        app,
        results,
    }
}

fn harness() -> Harness {
    harness_with(ScriptedWorkload::report("Requests/sec: 10\nTransfer/sec: 1KB\n"), Vec::new())
}

fn artifacts(dir: &TempDir) -> Vec<std::path::PathBuf> {
    std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect()
}

#[tokio::test]
async fn test_end_to_end_session() {
    let h = harness();

    h.conductor.start_problem("cart_failure").await.unwrap();
    assert_eq!(h.conductor.active_stage().await, Some(Stage::AwaitingSubmission));
    assert_eq!(h.conductor.fault_status().await.unwrap(), Some(FaultStatus::On));
    assert_eq!(h.app.workloads_started(), 1);

    let reply = h.conductor.handle_input(SUBMISSION).await.unwrap();
    let Reply::Graded(verdict) = reply else {
        panic!("expected a verdict");
    };
    assert!(verdict.success);
    assert!(verdict.get(OracleName::Detection).unwrap().success);
    assert!(verdict.get(OracleName::Localization).unwrap().success);

    assert_eq!(h.injector.current("cartServiceFailure"), FaultStatus::Off);
    assert_eq!(h.app.cleanups(), 1);
    assert_eq!(h.conductor.active_stage().await, None);
    assert_eq!(h.conductor.last_verdict(), Some(verdict.clone()));

    let files = artifacts(&h.results);
    assert_eq!(files.len(), 1);
    assert_eq!(h.conductor.last_artifact(), Some(files[0].clone()));
    assert_eq!(VerdictStore::load(&files[0]).unwrap(), verdict);
}

#[tokio::test]
async fn test_relay_is_pass_through() {
    let h = harness();
    h.conductor.start_problem("cart_failure").await.unwrap();

    let reply = h
        .conductor
        .handle_input("kubectl get pods -n astronomy-shop")
        .await
        .unwrap();
    assert_eq!(reply, Reply::Output("ran: kubectl get pods -n astronomy-shop".to_string()));
    assert_eq!(h.cluster.commands(), vec!["kubectl get pods -n astronomy-shop"]);
    assert_eq!(h.conductor.active_stage().await, Some(Stage::AwaitingSubmission));

    let err = h.conductor.handle_input("false").await.unwrap_err();
    assert_eq!(err.class(), "PlatformError");
    assert_eq!(h.conductor.active_stage().await, Some(Stage::AwaitingSubmission));

    h.conductor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_resubmission_rejected() {
    let h = harness();
    h.conductor.start_problem("cart_failure").await.unwrap();
    let first = h.conductor.submit(SUBMISSION).await.unwrap();

    let err = h
        .conductor
        .submit(r#"submit({"detection":"No"})"#)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvariantViolation(_)));
    assert_eq!(h.conductor.last_verdict(), Some(first));
    assert_eq!(artifacts(&h.results).len(), 1);
}

#[tokio::test]
async fn test_malformed_submission_keeps_stage() {
    let h = harness();
    h.conductor.start_problem("cart_failure").await.unwrap();

    let err = h.conductor.submit("submit(frontend is down)").await.unwrap_err();
    assert_eq!(err.class(), "InvariantViolation");
    assert_eq!(h.conductor.active_stage().await, Some(Stage::AwaitingSubmission));
    assert_eq!(h.injector.current("cartServiceFailure"), FaultStatus::On);

    h.conductor.submit(SUBMISSION).await.unwrap();
    assert_eq!(h.injector.current("cartServiceFailure"), FaultStatus::Off);
}

#[tokio::test]
async fn test_concurrent_submit_rejected() {
    let mut slow = definition("slow_failure", "slowFlag");
    slow.oracles.insert(OracleName::Workload, WorkloadOracle::default().into());
    let h = harness_with(
        ScriptedWorkload::report("Requests/sec: 10\nTransfer/sec: 1KB\n")
            .with_delay(Duration::from_millis(200)),
        vec![slow],
    );
    h.conductor.start_problem("slow_failure").await.unwrap();

    let (first, second) = tokio::join!(
        h.conductor.submit(SUBMISSION),
        h.conductor.submit(SUBMISSION)
    );

    let (verdict, err) = match (first, second) {
        (Ok(verdict), Err(err)) | (Err(err), Ok(verdict)) => (verdict, err),
        other => panic!("expected exactly one graded submission, got {other:?}"),
    };
    assert!(verdict.success);
    assert!(err.to_string().contains("already being graded"));
    assert_eq!(artifacts(&h.results).len(), 1);
}

#[tokio::test]
async fn test_failed_injection_is_recovered_and_cleaned_up() {
    let h = harness();
    h.injector.fail_after_apply();

    let err = h.conductor.start_problem("cart_failure").await.unwrap_err();
    assert_eq!(err.class(), "ConvergenceTimeoutError");
    assert_eq!(h.injector.current("cartServiceFailure"), FaultStatus::Off);
    assert_eq!(h.app.cleanups(), 1);
    assert_eq!(h.conductor.active_stage().await, None);
}

#[tokio::test]
async fn test_recovery_retried_once() {
    let h = harness();
    h.conductor.start_problem("cart_failure").await.unwrap();
    h.injector.fail_next_recovers(1);

    h.conductor.submit(SUBMISSION).await.unwrap();
    assert_eq!(h.injector.recover_calls(), 2);
    assert_eq!(h.injector.current("cartServiceFailure"), FaultStatus::Off);
    assert_eq!(h.app.cleanups(), 1);
}

#[tokio::test]
async fn test_recovery_failing_twice_is_reported() {
    let h = harness();
    h.conductor.start_problem("cart_failure").await.unwrap();
    h.injector.fail_next_recovers(2);

    let err = h.conductor.submit(SUBMISSION).await.unwrap_err();
    assert_eq!(err.class(), "PlatformError");
    assert!(h.conductor.last_verdict().unwrap().success);
    assert_eq!(h.app.cleanups(), 0, "cleanup must wait for recovery");

    // The dropped lease makes a final recovery attempt.
    for _ in 0..50 {
        if h.injector.current("cartServiceFailure") == FaultStatus::Off {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.injector.current("cartServiceFailure"), FaultStatus::Off);
}

#[tokio::test]
async fn test_starting_new_problem_tears_down_previous() {
    let h = harness();
    h.conductor.start_problem("cart_failure").await.unwrap();
    h.conductor.start_problem("ad_failure").await.unwrap();

    assert_eq!(h.injector.current("cartServiceFailure"), FaultStatus::Off);
    assert_eq!(h.injector.current("adServiceFailure"), FaultStatus::On);
    assert_eq!(h.app.cleanups(), 1);
    assert_eq!(h.conductor.active_problem_id().await.as_deref(), Some("ad_failure"));

    h.conductor.shutdown().await.unwrap();
    assert_eq!(h.injector.current("adServiceFailure"), FaultStatus::Off);
}

#[tokio::test]
async fn test_unknown_problem_is_configuration_error() {
    let h = harness();
    let err = h.conductor.start_problem("nope").await.unwrap_err();
    assert_eq!(err.class(), "ConfigurationError");
    assert_eq!(h.app.deploys(), 0);
}

#[tokio::test]
async fn test_session_recovers_on_error() {
    let h = harness();
    let result: Result<(), Error> = h
        .conductor
        .run_session("cart_failure", || async {
            Err(Error::Transport("agent crashed".to_string()))
        })
        .await;

    assert_eq!(result.unwrap_err().class(), "TransportError");
    assert_eq!(h.injector.current("cartServiceFailure"), FaultStatus::Off);
    assert_eq!(h.app.cleanups(), 1);
}

#[tokio::test]
async fn test_session_recovers_on_panic() {
    let h = harness();
    let result: Result<(), Error> = h
        .conductor
        .run_session("cart_failure", || async { panic!("agent loop bug") })
        .await;

    assert!(result.unwrap_err().to_string().contains("panicked"));
    assert_eq!(h.injector.current("cartServiceFailure"), FaultStatus::Off);
}

#[tokio::test]
async fn test_session_recovers_on_cancellation() {
    let h = harness();
    let conductor = Arc::clone(&h.conductor);

    let never = || std::future::pending::<Result<(), Error>>();
    let interrupted = tokio::select! {
        _ = conductor.run_session("cart_failure", never) => false,
        () = tokio::time::sleep(Duration::from_millis(50)) => true,
    };
    assert!(interrupted);
    assert_eq!(h.injector.current("cartServiceFailure"), FaultStatus::On);

    h.conductor.shutdown().await.unwrap();
    assert_eq!(h.injector.current("cartServiceFailure"), FaultStatus::Off);
    assert_eq!(h.app.cleanups(), 1);
}

#[tokio::test]
async fn test_session_returns_verdict() {
    let h = harness();
    let conductor = Arc::clone(&h.conductor);
    let verdict = h
        .conductor
        .run_session("cart_failure", || async move { conductor.submit(SUBMISSION).await })
        .await
        .unwrap();

    assert!(verdict.success);
    assert_eq!(h.injector.current("cartServiceFailure"), FaultStatus::Off);
    assert_eq!(h.app.cleanups(), 1);
}

#[tokio::test]
async fn test_in_process_transport() {
    let h = harness();
    let transport = InProcessTransport::new(Arc::clone(&h.conductor));

    let early = submit_answer(&transport, r#"{"detection":"Yes"}"#).await;
    assert!(!early.accepted);
    assert_eq!(early.status, Some(409));

    h.conductor.start_problem("cart_failure").await.unwrap();
    let answer = r#"{"detection":"Yes","localization":["frontend"]}"#;
    let outcome = submit_answer(&transport, answer).await;
    assert!(outcome.accepted);
    let verdict: serde_json::Value = serde_json::from_str(&outcome.message).unwrap();
    assert_eq!(verdict["success"], true);
}

#[tokio::test]
async fn test_standalone_deployments_listed_and_removed() {
    let h = harness();
    assert!(h.conductor.deployed_apps().await.is_empty());

    h.conductor.deploy_app("astronomy-shop").await.unwrap();
    assert_eq!(h.conductor.deployed_apps().await, vec!["astronomy-shop (astronomy-shop)"]);

    let err = h.conductor.deploy_app("hotel-reservation").await.unwrap_err();
    assert_eq!(err.class(), "ConfigurationError");

    h.conductor.shutdown().await.unwrap();
    assert!(h.conductor.deployed_apps().await.is_empty());
    assert_eq!(h.app.cleanups(), 1);
}
