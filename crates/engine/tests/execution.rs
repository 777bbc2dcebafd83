//! End-to-end execution tests against mock HTTP servers.

use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stepflow_engine::{
    AuthCredentials, ConnectionClient, Engine, EngineConfig, ErrorKind, ExecutionProgress,
    ExecutionRecord, ExecutionStatus, ExecutionStore, HttpConnectionClient, InMemoryWorkflowSource,
    StaticConnectionResolver, StepDefinition, StepStatus, WorkflowDefinition,
};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config() -> EngineConfig {
    EngineConfig {
        retry_base_delay_ms: 5,
        retry_max_delay_ms: 20,
        ..EngineConfig::default()
    }
}

fn engine_for(client: Arc<dyn ConnectionClient>, workflows: Vec<WorkflowDefinition>) -> Engine {
    let source = InMemoryWorkflowSource::new();
    for workflow in workflows {
        source.insert(workflow);
    }
    Engine::in_memory(
        config(),
        Arc::new(source),
        Arc::new(StaticConnectionResolver::with_default(client)),
    )
}

fn client_for(server: &MockServer) -> Arc<dyn ConnectionClient> {
    Arc::new(HttpConnectionClient::new(Some(server.uri()), AuthCredentials::None))
}

fn get(name: &str, route: &str) -> StepDefinition {
    StepDefinition::api_call(name, json!({"method": "GET", "path": route}))
}

/// Completed + failed + skipped must cover every step of a settled execution.
fn assert_accounted(record: &ExecutionRecord) {
    let progress = ExecutionProgress::from_record(record);
    assert_eq!(
        progress.completed_steps + progress.failed_steps + progress.skipped_steps,
        progress.total_steps,
        "unaccounted steps in {record:?}"
    );
    for (position, result) in record.step_results.iter().enumerate() {
        assert_eq!(result.step_index, position);
    }
}

#[tokio::test]
async fn test_single_step_completes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let workflow = WorkflowDefinition::new("ping", "Ping").with_step(get("check", "/health"));
    let engine = engine_for(client_for(&server), vec![workflow]);

    let id = engine.start_execution("ping", "tester").await.unwrap();
    let record = engine.wait_for_completion(id).await.unwrap();

    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.step_results.len(), 1);
    assert_eq!(record.step_results[0].status, StepStatus::Success);
    assert_eq!(record.step_results[0].output.as_ref().unwrap()["data"]["ok"], true);
    assert!(record.completed_at.is_some());
    assert_accounted(&record);
}

#[tokio::test]
async fn test_unreachable_step_fails_after_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/first"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let workflow = WorkflowDefinition::new("three", "Three steps")
        .with_step(get("first", "/first"))
        .with_step(StepDefinition::api_call(
            "second",
            json!({"url": "http://127.0.0.1:1/unreachable"}),
        ))
        .with_step(get("third", "/third"));
    let engine = engine_for(client_for(&server), vec![workflow]);

    let id = engine.start_execution("three", "tester").await.unwrap();
    let record = engine.wait_for_completion(id).await.unwrap();

    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(record.step_results.len(), 2);
    assert_eq!(record.step_results[0].status, StepStatus::Success);
    assert_eq!(record.step_results[1].status, StepStatus::Failed);
    assert_eq!(record.step_results[1].attempts, 3);
    assert_eq!(record.step_results[1].error.as_ref().unwrap().kind, ErrorKind::Network);
    assert_accounted(&record);
}

#[tokio::test]
async fn test_template_passes_prior_output() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/source"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"x": 1})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sink"))
        .and(body_json(json!({"value": 1, "label": "x=1"})))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let workflow = WorkflowDefinition::new("pipe", "Pipe")
        .with_step(get("step1", "/source"))
        .with_step(StepDefinition::api_call(
            "step2",
            json!({
                "method": "POST",
                "path": "/sink",
                "body": {"value": "{{ step1.data.x }}", "label": "x={{ previous_step.data.x }}"}
            }),
        ));
    let engine = engine_for(client_for(&server), vec![workflow]);

    let id = engine.start_execution("pipe", "tester").await.unwrap();
    let record = engine.wait_for_completion(id).await.unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.step_results[1].output.as_ref().unwrap()["status"], 201);
}

#[tokio::test]
async fn test_missing_field_fails_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/source"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"x": 1})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sink"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let workflow = WorkflowDefinition::new("broken", "Broken")
        .with_step(get("step1", "/source"))
        .with_step(StepDefinition::api_call(
            "step2",
            json!({"method": "POST", "path": "/sink", "body": {"value": "{{ step1.data.nope }}"}}),
        ));
    let engine = engine_for(client_for(&server), vec![workflow]);

    let id = engine.start_execution("broken", "tester").await.unwrap();
    let record = engine.wait_for_completion(id).await.unwrap();

    assert_eq!(record.status, ExecutionStatus::Failed);
    let failed = &record.step_results[1];
    assert_eq!(failed.status, StepStatus::Failed);
    assert_eq!(failed.attempts, 1);
    assert_eq!(failed.error.as_ref().unwrap().kind, ErrorKind::TemplateResolution);
    assert_eq!(record.error.as_ref().unwrap().kind, ErrorKind::TemplateResolution);
}

#[tokio::test]
async fn test_false_condition_skips_and_completes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let workflow = WorkflowDefinition::new("branch", "Branch")
        .with_step(get("orders", "/orders"))
        .with_step(StepDefinition::condition("has_orders", "orders.data.items != []"))
        .with_step(StepDefinition::api_call("ship", json!({"method": "POST", "path": "/ship"})))
        .with_step(StepDefinition::api_call("notify", json!({"method": "POST", "path": "/notify"})));
    let engine = engine_for(client_for(&server), vec![workflow]);

    let id = engine.start_execution("branch", "tester").await.unwrap();
    let record = engine.wait_for_completion(id).await.unwrap();

    assert_eq!(record.status, ExecutionStatus::Completed);
    let statuses: Vec<StepStatus> = record.step_results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            StepStatus::Success,
            StepStatus::ConditionFailed,
            StepStatus::Skipped,
            StepStatus::Skipped
        ]
    );
    assert_accounted(&record);
}

#[tokio::test]
async fn test_execution_deadline_beats_slow_step() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let workflow = WorkflowDefinition::new("slow", "Slow")
        .with_timeout_ms(300)
        .with_step(get("slow", "/slow"))
        .with_step(get("after", "/after"));
    let engine = engine_for(client_for(&server), vec![workflow]);

    let started = Instant::now();
    let id = engine.start_execution("slow", "tester").await.unwrap();
    let record = engine.wait_for_completion(id).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(record.error.as_ref().unwrap().kind, ErrorKind::ExecutionTimeout);
    assert!(record.step_results.is_empty());
    assert!(elapsed >= Duration::from_millis(250));
    assert!(elapsed < Duration::from_secs(2), "deadline honored late: {elapsed:?}");
    assert_accounted(&record);
}

#[tokio::test]
async fn test_cancel_while_step_in_flight() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/hang"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let mut workflow = WorkflowDefinition::new("five", "Five steps")
        .with_step(get("one", "/fast"))
        .with_step(get("two", "/hang"));
    for name in ["three", "four", "five"] {
        workflow = workflow.with_step(get(name, "/fast"));
    }
    let engine = engine_for(client_for(&server), vec![workflow]);

    let id = engine.start_execution("five", "tester").await.unwrap();
    let mut updates = engine.subscribe(id).await.unwrap();
    loop {
        let snapshot = updates.borrow_and_update().clone();
        if snapshot.step_results.len() == 1 && snapshot.current_step_index == 1 {
            break;
        }
        updates.changed().await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    engine.cancel_execution(id).await.unwrap();
    let record = engine.wait_for_completion(id).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(record.status, ExecutionStatus::Canceled);
    assert_eq!(record.step_results.len(), 1);
    assert_eq!(record.error.as_ref().unwrap().kind, ErrorKind::Canceled);
    assert_accounted(&record);

    // A second cancel on a settled execution changes nothing.
    engine.cancel_execution(id).await.unwrap();
    let stored = engine.get_execution_details(id).await.unwrap();
    assert_eq!(stored, record);
}

#[tokio::test]
async fn test_cancel_racing_completion_settles_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let workflow = WorkflowDefinition::new("race", "Race").with_step(get("only", "/only"));
    let engine = engine_for(client_for(&server), vec![workflow]);

    for round in 0..20u64 {
        let id = engine.start_execution("race", "tester").await.unwrap();
        let canceller = {
            let engine = engine.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(round % 4)).await;
                engine.cancel_execution(id).await
            })
        };
        let settled = engine.wait_for_completion(id).await.unwrap();
        canceller.await.unwrap().unwrap();

        // Whatever won is what stays persisted.
        tokio::time::sleep(Duration::from_millis(5)).await;
        let stored = engine.store().get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, settled.status);
        match settled.status {
            ExecutionStatus::Completed => assert_eq!(stored.step_results.len(), 1),
            ExecutionStatus::Canceled => assert!(stored.step_results.is_empty()),
            other => panic!("unexpected terminal status {other}"),
        }
        assert_accounted(&stored);

        let mut late = stored.clone();
        late.status = match stored.status {
            ExecutionStatus::Completed => ExecutionStatus::Canceled,
            _ => ExecutionStatus::Completed,
        };
        assert!(engine.store().save(&late).await.is_err());
    }
}

#[tokio::test]
async fn test_step_results_grow_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"n": 1}))
                .set_delay(Duration::from_millis(30)),
        )
        .mount(&server)
        .await;

    let mut workflow = WorkflowDefinition::new("ordered", "Ordered");
    for name in ["a", "b", "c", "d"] {
        workflow = workflow.with_step(get(name, "/n"));
    }
    let engine = engine_for(client_for(&server), vec![workflow]);
    let id = engine.start_execution("ordered", "tester").await.unwrap();

    let mut seen = Vec::new();
    loop {
        let record = engine.get_execution_details(id).await.unwrap();
        seen.push(record.step_results.len());
        for (position, result) in record.step_results.iter().enumerate() {
            assert_eq!(result.step_index, position);
        }
        if record.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "lengths shrank: {seen:?}");
    assert_eq!(seen.last(), Some(&4));
}

#[tokio::test]
async fn test_transient_server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&server)
        .await;

    let workflow = WorkflowDefinition::new("flaky", "Flaky").with_step(get("flaky", "/flaky"));
    let engine = engine_for(client_for(&server), vec![workflow]);

    let id = engine.start_execution("flaky", "tester").await.unwrap();
    let record = engine.wait_for_completion(id).await.unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.step_results[0].attempts, 3);
}

#[tokio::test]
async fn test_credentials_sent_but_never_recorded() {
    let secret = "sk-live-0123456789abcdefghij";
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("authorization", format!("Bearer {secret}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"user": "u1"})))
        .expect(1)
        .mount(&server)
        .await;

    let authed: Arc<dyn ConnectionClient> = Arc::new(HttpConnectionClient::new(
        Some(server.uri()),
        AuthCredentials::Bearer(secret.to_string()),
    ));
    let unreachable: Arc<dyn ConnectionClient> = Arc::new(HttpConnectionClient::new(
        Some("http://127.0.0.1:1".to_string()),
        AuthCredentials::Bearer(secret.to_string()),
    ));
    let resolver =
        StaticConnectionResolver::with_default(authed).with_connection("down", unreachable);

    let source = InMemoryWorkflowSource::new()
        .with(WorkflowDefinition::new("me", "Me").with_step(get("me", "/me")))
        .with(
            WorkflowDefinition::new("down", "Down")
                .with_connection("down")
                .with_step(get("me", "/me")),
        );
    let engine = Engine::in_memory(config(), Arc::new(source), Arc::new(resolver));

    let ok = engine.start_execution("me", "tester").await.unwrap();
    assert_eq!(
        engine.wait_for_completion(ok).await.unwrap().status,
        ExecutionStatus::Completed
    );

    let failed = engine.start_execution("down", "tester").await.unwrap();
    let record = engine.wait_for_completion(failed).await.unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);
    let persisted = serde_json::to_string(&record).unwrap();
    assert!(!persisted.contains(secret));
}

#[tokio::test]
async fn test_history_is_most_recent_first() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let workflow = WorkflowDefinition::new("hist", "History").with_step(get("only", "/"));
    let engine = engine_for(client_for(&server), vec![workflow]);

    let mut ids = Vec::new();
    for _ in 0..3 {
        let id = engine.start_execution("hist", "tester").await.unwrap();
        engine.wait_for_completion(id).await.unwrap();
        ids.push(id);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let history = engine.list_execution_history("hist", None).await.unwrap();
    let got: Vec<_> = history.iter().map(|r| r.id).collect();
    ids.reverse();
    assert_eq!(got, ids);
    assert_eq!(engine.list_execution_history("hist", Some(1)).await.unwrap().len(), 1);
}
