use super::*;
use crate::errors::ErrorCode;
use crate::gateway::MemoryGateway;
use crate::storage::{spawn_write_behind, MemoryStore};
use serde_json::{json, Value};
use tokio::sync::broadcast;

struct Harness {
    coordinator: Coordinator,
    events: mpsc::UnboundedReceiver<CoordinatorEvent>,
    gateway: Arc<MemoryGateway>,
    store: Arc<MemoryStore>,
}

impl Harness {
    fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    fn with_store(store: MemoryStore) -> Self {
        let store = Arc::new(store);
        let (persist, _worker) = spawn_write_behind(store.clone(), Duration::from_millis(50));
        let sessions = SessionRegistry::new(store.clone(), persist);
        let gateway = Arc::new(MemoryGateway::new());
        let (tx, events) = mpsc::unbounded_channel();
        let coordinator = Coordinator::new(
            sessions,
            FlowCatalog::new(),
            gateway.clone(),
            CoordinatorLimits::default(),
            tx,
        );
        Self {
            coordinator,
            events,
            gateway,
            store,
        }
    }

    async fn send(&mut self, message: Value) -> Reply {
        let message: InboundMessage = serde_json::from_value(message).unwrap();
        self.coordinator.handle_message(message).await
    }

    async fn register(&mut self, tab_id: TabId) {
        self.send(json!({
            "type": "REGISTER_EXECUTOR",
            "tabId": tab_id,
            "pageUrl": "https://example.com/a"
        }))
        .await;
    }

    async fn run(&mut self, flow_id: &str, tab_id: TabId, steps: Value) -> Reply {
        self.send(json!({
            "type": "RUN_FLOW",
            "flowId": flow_id,
            "tabId": tab_id,
            "steps": steps
        }))
        .await
    }

    async fn done(&mut self, flow_id: &str, step_id: &str) {
        self.send(json!({ "type": "STEP_DONE", "flowId": flow_id, "stepId": step_id }))
            .await;
    }

    async fn error(&mut self, flow_id: &str, step_id: &str, code: &str) {
        self.send(json!({
            "type": "STEP_ERROR",
            "flowId": flow_id,
            "stepId": step_id,
            "code": code,
            "message": ""
        }))
        .await;
    }

    /// Avança o relógio pausado e processa os timers que dispararam.
    async fn advance(&mut self, by: Duration) {
        tokio::time::sleep(by).await;
        while let Ok(event) = self.events.try_recv() {
            self.coordinator.handle_event(event).await;
        }
    }

    fn session(&self, flow_id: &str) -> FlowSession {
        self.coordinator.session(flow_id).cloned().unwrap()
    }

    fn status(&self, flow_id: &str) -> SessionStatus {
        self.session(flow_id).status
    }

    fn error_code(&self, flow_id: &str) -> Option<ErrorCode> {
        self.session(flow_id).error.map(|e| e.code)
    }

    fn dispatched_ids(&self) -> Vec<String> {
        self.gateway
            .run_steps()
            .into_iter()
            .map(|r| r.step_id)
            .collect()
    }
}

fn statuses(rx: &mut broadcast::Receiver<FlowSession>) -> Vec<SessionStatus> {
    let mut seen = Vec::new();
    while let Ok(snapshot) = rx.try_recv() {
        if seen.last() != Some(&snapshot.status) {
            seen.push(snapshot.status);
        }
    }
    seen
}

// ============================================================================
// CAMINHO FELIZ E NAVEGAÇÃO
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_click_navigate_input_finishes() {
    let mut h = Harness::new();
    let mut updates = h.coordinator.sessions.subscribe();
    h.register(7).await;

    let reply = h
        .run(
            "login",
            7,
            json!([
                { "type": "click", "selector": "#a" },
                { "type": "navigate", "url": "/b", "target": "_self" },
                { "type": "input", "selector": "#c", "value": "hi" }
            ]),
        )
        .await;
    match reply {
        Reply::Session(Some(session)) => {
            assert_eq!(session.status, SessionStatus::Running);
            assert_eq!(session.current_step_id.as_deref(), Some("step-0"));
            assert_eq!(session.page_key.as_deref(), Some("https://example.com/a"));
        }
        other => panic!("resposta inesperada: {:?}", other),
    }

    h.done("login", "step-0").await;
    let waiting = h.session("login");
    assert_eq!(waiting.status, SessionStatus::Waiting);
    assert!(waiting.waiting_for_navigation);
    assert_eq!(waiting.current_index, 2);
    assert!(waiting.current_step_id.is_none());
    assert_eq!(h.dispatched_ids(), vec!["step-0", "step-1"]);

    h.send(json!({ "type": "TAB_UPDATED", "tabId": 7, "status": "loading" }))
        .await;
    assert_eq!(h.status("login"), SessionStatus::Waiting);

    h.send(json!({
        "type": "TAB_UPDATED",
        "tabId": 7,
        "status": "complete",
        "url": "https://example.com/b?x=1"
    }))
    .await;
    let resumed = h.session("login");
    assert_eq!(resumed.status, SessionStatus::Running);
    assert_eq!(resumed.current_step_id.as_deref(), Some("step-2"));
    assert_eq!(resumed.page_key.as_deref(), Some("https://example.com/b"));

    h.done("login", "step-2").await;
    assert_eq!(h.status("login"), SessionStatus::Finished);
    assert_eq!(h.dispatched_ids(), vec!["step-0", "step-1", "step-2"]);

    assert_eq!(
        statuses(&mut updates),
        vec![
            SessionStatus::Running,
            SessionStatus::Waiting,
            SessionStatus::Running,
            SessionStatus::Finished
        ]
    );

    h.coordinator.sessions.flush().await.unwrap();
    assert_eq!(
        h.store.get("login").unwrap().status,
        SessionStatus::Finished
    );
}

#[tokio::test(start_paused = true)]
async fn test_navigation_timeout_when_page_never_loads() {
    let mut h = Harness::new();
    h.register(1).await;
    h.run(
        "f",
        1,
        json!([
            { "type": "navigate", "url": "https://example.com/x" },
            { "type": "click", "selector": "#go" }
        ]),
    )
    .await;
    assert_eq!(h.status("f"), SessionStatus::Waiting);

    h.advance(Duration::from_millis(44_000)).await;
    assert_eq!(h.status("f"), SessionStatus::Waiting);

    h.advance(Duration::from_millis(2_000)).await;
    assert_eq!(h.status("f"), SessionStatus::Error);
    assert_eq!(h.error_code("f"), Some(ErrorCode::NavigationTimeout));
}

#[tokio::test(start_paused = true)]
async fn test_new_tab_navigation_waits_for_step_done() {
    let mut h = Harness::new();
    h.register(1).await;
    h.run(
        "f",
        1,
        json!([
            { "type": "navigate", "url": "https://example.com/x", "target": "_blank" },
            { "type": "click", "selector": "#go" }
        ]),
    )
    .await;

    assert_eq!(h.status("f"), SessionStatus::Running);
    h.done("f", "step-0").await;
    assert_eq!(h.session("f").current_step_id.as_deref(), Some("step-1"));
}

#[tokio::test(start_paused = true)]
async fn test_running_session_resumes_on_different_page_only() {
    let mut h = Harness::new();
    h.register(1).await;
    h.run("f", 1, json!([{ "type": "click", "selector": "#a" }])).await;

    h.send(json!({
        "type": "TAB_UPDATED",
        "tabId": 1,
        "status": "complete",
        "url": "https://example.com/a#top"
    }))
    .await;
    assert_eq!(h.gateway.run_steps().len(), 1);

    h.send(json!({
        "type": "TAB_UPDATED",
        "tabId": 1,
        "status": "complete",
        "url": "https://example.com/other"
    }))
    .await;
    assert_eq!(h.gateway.run_steps().len(), 2);
    assert_eq!(
        h.session("f").page_key.as_deref(),
        Some("https://example.com/other")
    );
}

#[tokio::test]
async fn test_opaque_page_key_does_not_redispatch_on_complete() {
    let mut h = Harness::new();
    h.send(json!({ "type": "REGISTER_EXECUTOR", "tabId": 1, "pageKey": "home" }))
        .await;
    h.send(json!({
        "type": "RUN_FLOW",
        "flowId": "f",
        "tabId": 1,
        "pageKey": "home",
        "targetUrl": "https://example.com/",
        "steps": [{ "type": "click", "selector": "#a" }]
    }))
    .await;

    h.send(json!({
        "type": "TAB_UPDATED",
        "tabId": 1,
        "status": "complete",
        "url": "https://example.com/"
    }))
    .await;

    assert_eq!(h.dispatched_ids(), vec!["step-0"]);
    assert_eq!(h.session("f").page_key.as_deref(), Some("home"));
}

async fn run_click_navigate_input(h: &mut Harness) {
    h.register(7).await;
    h.run(
        "login",
        7,
        json!([
            { "type": "click", "selector": "#a" },
            { "type": "navigate", "url": "/b", "target": "_self" },
            { "type": "input", "selector": "#c", "value": "hi" }
        ]),
    )
    .await;
    h.done("login", "step-0").await;
    assert_eq!(h.status("login"), SessionStatus::Waiting);
}

#[tokio::test]
async fn test_register_then_complete_dispatches_once() {
    let mut h = Harness::new();
    run_click_navigate_input(&mut h).await;

    h.send(json!({ "type": "REGISTER_EXECUTOR", "tabId": 7, "pageKey": "b" }))
        .await;
    assert_eq!(h.status("login"), SessionStatus::Running);

    h.send(json!({
        "type": "TAB_UPDATED",
        "tabId": 7,
        "status": "complete",
        "url": "https://example.com/b"
    }))
    .await;

    assert_eq!(h.dispatched_ids(), vec!["step-0", "step-1", "step-2"]);
    assert_eq!(
        h.session("login").page_location.as_deref(),
        Some("https://example.com/b")
    );

    // A partir daqui a URL conhecida volta a valer para detectar troca de página.
    h.send(json!({
        "type": "TAB_UPDATED",
        "tabId": 7,
        "status": "complete",
        "url": "https://example.com/c"
    }))
    .await;
    assert_eq!(h.dispatched_ids(), vec!["step-0", "step-1", "step-2", "step-2"]);
}

#[tokio::test]
async fn test_complete_then_register_dispatches_once() {
    let mut h = Harness::new();
    run_click_navigate_input(&mut h).await;

    h.send(json!({
        "type": "TAB_UPDATED",
        "tabId": 7,
        "status": "complete",
        "url": "https://example.com/b"
    }))
    .await;
    assert_eq!(h.status("login"), SessionStatus::Running);

    h.send(json!({ "type": "REGISTER_EXECUTOR", "tabId": 7, "pageKey": "b" }))
        .await;

    assert_eq!(h.dispatched_ids(), vec!["step-0", "step-1", "step-2"]);
    h.done("login", "step-2").await;
    assert_eq!(h.status("login"), SessionStatus::Finished);
}

// ============================================================================
// MENSAGENS ATRASADAS E TIMERS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stale_step_done_is_ignored() {
    let mut h = Harness::new();
    h.register(1).await;
    h.run(
        "f",
        1,
        json!([
            { "type": "click", "selector": "#a" },
            { "type": "click", "selector": "#b" },
            { "type": "click", "selector": "#c" }
        ]),
    )
    .await;

    h.done("f", "step-1").await;
    h.done("other", "step-0").await;
    assert_eq!(h.session("f").current_index, 0);

    h.done("f", "step-0").await;
    assert_eq!(h.session("f").current_index, 1);

    // Segundo frame respondendo ao mesmo step.
    h.done("f", "step-0").await;
    assert_eq!(h.session("f").current_index, 1);
    assert_eq!(h.dispatched_ids(), vec!["step-0", "step-1"]);
}

#[tokio::test(start_paused = true)]
async fn test_step_timer_is_rearmed_per_step() {
    let mut h = Harness::new();
    h.register(1).await;
    h.run(
        "f",
        1,
        json!([
            { "type": "click", "selector": "#a", "timeout": 1000 },
            { "type": "click", "selector": "#b", "timeout": 1000 }
        ]),
    )
    .await;

    h.advance(Duration::from_millis(500)).await;
    h.done("f", "step-0").await;

    // O timer do step-0 venceria em 1000ms.
    h.advance(Duration::from_millis(700)).await;
    assert_eq!(h.status("f"), SessionStatus::Running);

    h.advance(Duration::from_millis(400)).await;
    let session = h.session("f");
    assert_eq!(session.status, SessionStatus::Error);
    let error = session.error.unwrap();
    assert_eq!(error.code, ErrorCode::StepTimeout);
    assert_eq!(error.detail, Some(json!({ "stepId": "step-1" })));

    h.advance(Duration::from_secs(5)).await;
    assert_eq!(h.error_code("f"), Some(ErrorCode::StepTimeout));
}

#[tokio::test(start_paused = true)]
async fn test_effective_timeouts_on_the_wire() {
    let mut h = Harness::new();
    h.register(1).await;
    h.run(
        "f",
        1,
        json!([
            { "type": "click", "selector": "#a", "timeout": 999999 },
            { "type": "wait", "ms": 2000 },
            { "type": "log", "message": "fim" }
        ]),
    )
    .await;
    h.done("f", "step-0").await;
    h.done("f", "step-1").await;

    let timeouts: Vec<Option<u64>> = h.gateway.run_steps().iter().map(|r| r.timeout).collect();
    assert_eq!(timeouts, vec![Some(60_000), Some(7_000), None]);
}

#[tokio::test(start_paused = true)]
async fn test_element_not_found_waits_then_times_out() {
    let mut h = Harness::new();
    h.register(1).await;
    h.run("f", 1, json!([{ "type": "click", "selector": "#missing" }]))
        .await;

    h.error("f", "step-0", "ELEMENT_NOT_FOUND").await;
    let session = h.session("f");
    assert_eq!(session.status, SessionStatus::Waiting);
    assert!(session.waiting_for_navigation);
    assert_eq!(session.current_step_id.as_deref(), Some("step-0"));

    h.advance(Duration::from_millis(20_000)).await;
    // Repetido enquanto espera: não re-arma o timer.
    h.error("f", "step-0", "ELEMENT_NOT_FOUND").await;

    h.advance(Duration::from_millis(9_000)).await;
    assert_eq!(h.status("f"), SessionStatus::Waiting);

    h.advance(Duration::from_millis(1_500)).await;
    assert_eq!(h.status("f"), SessionStatus::Error);
    assert_eq!(h.error_code("f"), Some(ErrorCode::NavigationTimeout));
}

#[tokio::test(start_paused = true)]
async fn test_element_found_after_page_change() {
    let mut h = Harness::new();
    h.register(1).await;
    h.run(
        "f",
        1,
        json!([
            { "type": "click", "selector": "#next" },
            { "type": "click", "selector": "#done" }
        ]),
    )
    .await;
    h.error("f", "step-0", "ELEMENT_NOT_FOUND").await;

    h.register(1).await;
    assert_eq!(h.status("f"), SessionStatus::Running);
    assert_eq!(h.dispatched_ids(), vec!["step-0", "step-0"]);

    h.done("f", "step-0").await;
    assert_eq!(h.session("f").current_step_id.as_deref(), Some("step-1"));

    // O timer de espera foi limpo na retomada.
    h.advance(Duration::from_secs(60)).await;
    assert_eq!(h.status("f"), SessionStatus::Running);
}

// ============================================================================
// ERROS E RETRY
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_fatal_error_records_code_and_detail() {
    let mut h = Harness::new();
    h.register(1).await;
    h.run("f", 1, json!([{ "type": "click", "selector": "#a" }])).await;

    h.send(json!({
        "type": "STEP_ERROR",
        "flowId": "f",
        "stepId": "step-0",
        "code": "WEIRD_FAILURE",
        "message": "boom"
    }))
    .await;

    let error = h.session("f").error.unwrap();
    assert_eq!(error.code, ErrorCode::ExecutionFailed);
    assert_eq!(error.message, "boom");
    assert_eq!(error.detail, Some(json!({ "reportedCode": "WEIRD_FAILURE" })));
}

#[tokio::test(start_paused = true)]
async fn test_assertion_retry_budget() {
    let mut h = Harness::new();
    h.register(1).await;
    h.run(
        "f",
        1,
        json!([{ "type": "assert", "selector": "#ok", "retry": 1 }]),
    )
    .await;

    h.error("f", "step-0", "ASSERTION_FAILED").await;
    let session = h.session("f");
    assert_eq!(session.status, SessionStatus::Running);
    assert_eq!(session.attempt, 1);
    assert_eq!(h.dispatched_ids(), vec!["step-0", "step-0"]);

    h.error("f", "step-0", "ASSERTION_FAILED").await;
    assert_eq!(h.error_code("f"), Some(ErrorCode::AssertionFailed));
}

#[tokio::test(start_paused = true)]
async fn test_step_timeout_retry_then_fail() {
    let mut h = Harness::new();
    h.register(1).await;
    h.run(
        "f",
        1,
        json!([{ "type": "click", "selector": "#a", "timeout": 1000, "retry": 1 }]),
    )
    .await;

    h.advance(Duration::from_millis(1_100)).await;
    assert_eq!(h.status("f"), SessionStatus::Running);
    assert_eq!(h.gateway.run_steps().len(), 2);

    h.advance(Duration::from_millis(1_100)).await;
    assert_eq!(h.error_code("f"), Some(ErrorCode::StepTimeout));
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_fails_without_executor() {
    let mut h = Harness::new();
    let reply = h.run("f", 9, json!([{ "type": "click", "selector": "#a" }])).await;

    match reply {
        Reply::Session(Some(session)) => {
            assert_eq!(session.status, SessionStatus::Error);
            assert_eq!(session.error.unwrap().code, ErrorCode::DispatchFailed);
        }
        other => panic!("resposta inesperada: {:?}", other),
    }
    assert!(h.gateway.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_fails_when_gateway_errors() {
    let mut h = Harness::new();
    h.register(1).await;
    h.gateway.set_failing(true);
    h.run("f", 1, json!([{ "type": "click", "selector": "#a" }])).await;

    assert_eq!(h.error_code("f"), Some(ErrorCode::DispatchFailed));
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_respects_executor_capabilities() {
    let mut h = Harness::new();
    h.send(json!({
        "type": "REGISTER_EXECUTOR",
        "tabId": 1,
        "capabilities": { "steps": ["click"] }
    }))
    .await;
    h.run("f", 1, json!([{ "type": "input", "selector": "#a", "value": "x" }]))
        .await;

    assert_eq!(h.error_code("f"), Some(ErrorCode::DispatchFailed));
}

#[tokio::test(start_paused = true)]
async fn test_tab_removed_closes_active_sessions() {
    let mut h = Harness::new();
    h.register(1).await;
    h.run("active", 1, json!([{ "type": "click", "selector": "#a" }])).await;
    h.run("done", 1, json!([{ "type": "log", "message": "x" }])).await;
    h.done("done", "step-0").await;

    h.send(json!({ "type": "TAB_REMOVED", "tabId": 1 })).await;

    assert_eq!(h.error_code("active"), Some(ErrorCode::TabClosed));
    assert_eq!(h.status("done"), SessionStatus::Finished);
    assert!(!h.coordinator.executors.is_registered(1));
}

// ============================================================================
// COMANDOS DA UI
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_pause_and_resume() {
    let mut h = Harness::new();
    h.register(1).await;
    h.run(
        "f",
        1,
        json!([{ "type": "click", "selector": "#a", "timeout": 1000 }]),
    )
    .await;

    h.send(json!({ "type": "PAUSE_FLOW", "flowId": "f" })).await;
    assert_eq!(h.status("f"), SessionStatus::Paused);
    let announced = h.gateway.sent().into_iter().any(|(tab, _, msg)| {
        tab == 1
            && matches!(msg, OutboundMessage::FlowStatus(ref n) if n.status == SessionStatus::Paused)
    });
    assert!(announced);

    // Timers limpos e respostas ignoradas enquanto pausado.
    h.advance(Duration::from_secs(5)).await;
    h.done("f", "step-0").await;
    assert_eq!(h.status("f"), SessionStatus::Paused);

    h.send(json!({ "type": "RESUME_FLOW", "flowId": "f" })).await;
    assert_eq!(h.status("f"), SessionStatus::Running);
    assert_eq!(h.dispatched_ids(), vec!["step-0", "step-0"]);

    h.done("f", "step-0").await;
    assert_eq!(h.status("f"), SessionStatus::Finished);
}

#[tokio::test(start_paused = true)]
async fn test_pause_is_noop_when_not_active() {
    let mut h = Harness::new();
    h.register(1).await;
    h.run("f", 1, json!([{ "type": "log", "message": "x" }])).await;
    h.done("f", "step-0").await;

    h.send(json!({ "type": "PAUSE_FLOW", "flowId": "f" })).await;
    assert_eq!(h.status("f"), SessionStatus::Finished);

    let reply = h.send(json!({ "type": "RESUME_FLOW", "flowId": "missing" })).await;
    assert_eq!(reply, Reply::Session(None));
}

#[tokio::test(start_paused = true)]
async fn test_stop_resets_session() {
    let mut h = Harness::new();
    h.register(1).await;
    h.run(
        "f",
        1,
        json!([
            { "type": "click", "selector": "#a", "timeout": 1000 },
            { "type": "click", "selector": "#b" }
        ]),
    )
    .await;
    h.done("f", "step-0").await;

    let reply = h.send(json!({ "type": "STOP_FLOW", "flowId": "f" })).await;
    let session = match reply {
        Reply::Session(Some(session)) => session,
        other => panic!("resposta inesperada: {:?}", other),
    };
    assert_eq!(session.status, SessionStatus::Idle);
    assert!(session.steps.is_empty());
    assert_eq!(session.current_index, 0);
    assert!(session.result.is_none());
    assert!(session.error.is_none());

    h.advance(Duration::from_secs(5)).await;
    assert_eq!(h.status("f"), SessionStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_rejoin_returns_snapshot_and_announces() {
    let mut h = Harness::new();
    h.register(1).await;
    h.run("f", 1, json!([{ "type": "click", "selector": "#a" }])).await;
    h.gateway.clear();

    let reply = h.send(json!({ "type": "REJOIN_FLOW", "flowId": "f" })).await;
    assert!(matches!(reply, Reply::Session(Some(ref s)) if s.status == SessionStatus::Running));
    assert!(matches!(
        h.gateway.sent().as_slice(),
        [(1, None, OutboundMessage::FlowStatus(_))]
    ));

    let missing = h.send(json!({ "type": "REJOIN_FLOW", "flowId": "nope" })).await;
    assert_eq!(missing, Reply::Session(None));
}

#[tokio::test(start_paused = true)]
async fn test_step_result_is_kept() {
    let mut h = Harness::new();
    h.register(1).await;
    h.run("f", 1, json!([{ "type": "click", "selector": "#a" }])).await;
    h.send(json!({
        "type": "STEP_DONE",
        "flowId": "f",
        "stepId": "step-0",
        "result": { "clicked": 1 }
    }))
    .await;

    assert_eq!(h.session("f").result, Some(json!({ "clicked": 1 })));
}

// ============================================================================
// DEFINIÇÕES E CATÁLOGO
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_run_flow_rejects_invalid_definition() {
    let mut h = Harness::new();
    h.register(1).await;
    let reply = h
        .run(
            "f",
            1,
            json!([{ "type": "click", "selector": "#a" }, { "type": "teleport" }]),
        )
        .await;

    match reply {
        Reply::Rejected(error) => {
            assert_eq!(error.code, "FLOW_UNKNOWN_STEP_TYPE");
            assert_eq!(error.path.as_deref(), Some("flow[1]"));
        }
        other => panic!("resposta inesperada: {:?}", other),
    }
    assert!(h.coordinator.session("f").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_run_flow_without_steps_uses_catalog_then_previous_session() {
    let mut h = Harness::new();
    h.register(1).await;

    let reply = h
        .send(json!({ "type": "RUN_FLOW", "flowId": "f", "tabId": 1 }))
        .await;
    assert!(matches!(reply, Reply::Rejected(ref e) if e.code == "FLOW_NOT_FOUND"));

    let defined = h
        .send(json!({
            "type": "DEFINE_FLOW",
            "flowId": "f",
            "flowSource": "[{\"type\": \"click\", \"selector\": \"#a\"}]"
        }))
        .await;
    assert_eq!(
        defined,
        Reply::Defined {
            flow_id: "f".to_string(),
            step_count: 1
        }
    );

    h.send(json!({ "type": "RUN_FLOW", "flowId": "f", "tabId": 1 }))
        .await;
    assert_eq!(h.status("f"), SessionStatus::Running);

    h.run("g", 1, json!([{ "type": "log", "message": "a" }])).await;
    h.done("g", "step-0").await;
    h.send(json!({ "type": "RUN_FLOW", "flowId": "g", "tabId": 1 }))
        .await;
    assert_eq!(h.status("g"), SessionStatus::Running);
}

#[tokio::test(start_paused = true)]
async fn test_define_flow_rejects_empty() {
    let mut h = Harness::new();
    let reply = h
        .send(json!({ "type": "DEFINE_FLOW", "flowId": "f", "flowSource": "   " }))
        .await;
    assert!(matches!(reply, Reply::Rejected(ref e) if e.code == "FLOW_EMPTY"));
}

// ============================================================================
// RECUPERAÇÃO
// ============================================================================

fn stored_session(status: SessionStatus) -> FlowSession {
    let steps = vec![
        Step::new(StepKind::Click {
            selector: "#a".into(),
            all: false,
        }),
        Step::new(StepKind::Click {
            selector: "#b".into(),
            all: false,
        }),
    ];
    let mut session = FlowSession::new("r", 3, steps);
    session.status = status;
    session.current_index = 1;
    session.current_step_id = Some("step-1".into());
    session
}

#[tokio::test(start_paused = true)]
async fn test_recovered_running_session_waits_for_executor() {
    let mut h = Harness::with_store(MemoryStore::with_sessions([stored_session(
        SessionStatus::Running,
    )]));

    let reply = h.send(json!({ "type": "REJOIN_FLOW", "flowId": "r" })).await;
    match reply {
        Reply::Session(Some(session)) => {
            assert_eq!(session.status, SessionStatus::Waiting);
            assert!(session.recovered);
        }
        other => panic!("resposta inesperada: {:?}", other),
    }

    h.register(3).await;
    let session = h.session("r");
    assert_eq!(session.status, SessionStatus::Running);
    assert!(!session.recovered);
    let run = h.gateway.last_run_step().unwrap();
    assert_eq!((run.step_id.as_str(), run.current_index), ("step-1", 1));
}

#[tokio::test(start_paused = true)]
async fn test_recovered_session_times_out_without_executor() {
    let mut h = Harness::with_store(MemoryStore::with_sessions([stored_session(
        SessionStatus::Waiting,
    )]));

    h.send(json!({ "type": "TAB_UPDATED", "tabId": 99, "status": "loading" }))
        .await;
    assert_eq!(h.status("r"), SessionStatus::Waiting);

    h.advance(Duration::from_millis(45_500)).await;
    assert_eq!(h.error_code("r"), Some(ErrorCode::NavigationTimeout));
}

#[tokio::test(start_paused = true)]
async fn test_recovery_leaves_terminal_sessions_alone() {
    let mut h = Harness::with_store(MemoryStore::with_sessions([stored_session(
        SessionStatus::Finished,
    )]));

    h.register(3).await;
    assert_eq!(h.status("r"), SessionStatus::Finished);
    assert!(h.gateway.run_steps().is_empty());
}

// ============================================================================
// TASK DO COORDENADOR
// ============================================================================

#[tokio::test]
async fn test_spawned_coordinator_serves_requests() {
    let store = Arc::new(MemoryStore::new());
    let (persist, _worker) = spawn_write_behind(store.clone(), Duration::from_millis(50));
    let sessions = SessionRegistry::new(store.clone(), persist);
    let gateway = Arc::new(MemoryGateway::new());
    let (handle, task) = spawn(
        sessions,
        FlowCatalog::new(),
        gateway.clone(),
        CoordinatorLimits::default(),
    );

    let message = |value: Value| serde_json::from_value::<InboundMessage>(value).unwrap();

    let registered = handle
        .request(message(json!({ "type": "REGISTER_EXECUTOR", "tabId": 2, "pageKey": "k" })))
        .await
        .unwrap();
    assert_eq!(
        registered,
        Reply::Registered(ExecutorAck {
            tab_id: 2,
            page_key: Some("k".to_string())
        })
    );

    handle
        .request(message(json!({
            "type": "RUN_FLOW",
            "flowId": "f",
            "tabId": 2,
            "steps": [{ "type": "log", "message": "oi" }]
        })))
        .await
        .unwrap();
    handle
        .notify(message(json!({ "type": "STEP_DONE", "flowId": "f", "stepId": "step-0" })))
        .unwrap();

    handle.shutdown();
    task.await.unwrap();

    assert_eq!(gateway.run_steps().len(), 1);
    assert_eq!(store.get("f").unwrap().status, SessionStatus::Finished);
    assert!(handle.request(message(json!({ "type": "REJOIN_FLOW", "flowId": "f" }))).await.is_err());
}
