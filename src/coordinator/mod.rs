//! # Coordenador de Execução de Fluxos
//!
//! Máquina de estados por fluxo: despacha um step por vez para o executor
//! da aba, controla timeouts, trata navegação na mesma aba como fronteira
//! e expõe pause/resume/stop/rejoin sobre sessões persistidas.
//!
//! ## Para todos entenderem:
//!
//! O executor vive dentro da página. Quando um step navega, a página (e o
//! executor junto) morre antes de responder. Por isso o coordenador não
//! espera `STEP_DONE` de um navigate: ele avança o índice, entra em
//! `waiting` e aguarda a aba terminar de carregar.
//!
//! ```text
//! idle ──RUN_FLOW──► running ──STEP_DONE (último)──► finished
//!                     │  ▲
//!   navigate/_self    │  │ TAB_UPDATED complete / REGISTER_EXECUTOR
//!   ELEMENT_NOT_FOUND ▼  │
//!                    waiting ──timeout──► error
//! ```
//!
//! ## Concorrência
//!
//! Uma única task é dona do `Coordinator` e processa os eventos
//! (`CoordinatorEvent`) um de cada vez. Timers são tasks que só postam um
//! `TimerFired` no mesmo canal, então o mapa de sessões dispensa locks.
//!
//! ## Mensagens atrasadas
//!
//! O `RUN_STEP` vai para todos os frames da aba, e qualquer um pode responder.
//! Só vale a resposta cujo `stepId` bate com o step atual da sessão.

pub mod timers;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context as _};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::errors::{ErrorCode, SessionError};
use crate::executors::ExecutorRegistry;
use crate::flow::catalog::FlowCatalog;
use crate::flow::{Step, StepKind};
use crate::gateway::MessageGateway;
use crate::limits::CoordinatorLimits;
use crate::page;
use crate::protocol::{
    DefineFlowRequest, ExecutorAck, FlowSession, FlowStatusNotice, InboundMessage,
    OutboundMessage, RegisterExecutorRequest, Reply, ReplyError, RunFlowRequest, RunStep,
    SessionStatus, StepDone, StepErrorReport, TabId, TabUpdated,
};
use crate::retry::{self, RecoveryDecision};
use crate::sessions::SessionRegistry;
use crate::validation::FlowError;

use timers::{FlowTimers, TimerKind};

// ============================================================================
// EVENTOS E HANDLE
// ============================================================================

pub enum CoordinatorEvent {
    Message {
        message: InboundMessage,
        reply: Option<oneshot::Sender<Reply>>,
    },
    TimerFired {
        flow_id: String,
        kind: TimerKind,
        generation: u64,
    },
    Shutdown,
}

/// Ponto de entrada para quem está fora da task do coordenador.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<CoordinatorEvent>,
}

impl CoordinatorHandle {
    /// Envia a mensagem e aguarda a resposta.
    pub async fn request(&self, message: InboundMessage) -> anyhow::Result<Reply> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CoordinatorEvent::Message {
                message,
                reply: Some(reply),
            })
            .map_err(|_| anyhow!("coordinator stopped"))?;
        rx.await.context("coordinator dropped the reply")
    }

    /// Envia sem esperar resposta.
    pub fn notify(&self, message: InboundMessage) -> anyhow::Result<()> {
        self.tx
            .send(CoordinatorEvent::Message {
                message,
                reply: None,
            })
            .map_err(|_| anyhow!("coordinator stopped"))
    }

    /// Encerra o loop depois dos eventos já enfileirados.
    pub fn shutdown(&self) {
        let _ = self.tx.send(CoordinatorEvent::Shutdown);
    }
}

/// Inicia a task dona do coordenador.
///
/// Ao encerrar, a task faz um último flush das sessões.
pub fn spawn(
    sessions: SessionRegistry,
    catalog: FlowCatalog,
    gateway: Arc<dyn MessageGateway>,
    limits: CoordinatorLimits,
) -> (CoordinatorHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut coordinator = Coordinator::new(sessions, catalog, gateway, limits, tx.clone());

    let task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if matches!(event, CoordinatorEvent::Shutdown) {
                break;
            }
            coordinator.handle_event(event).await;
        }
        if let Err(e) = coordinator.sessions.flush().await {
            warn!(error = %e, "Flush final de sessões falhou");
        }
        info!("Coordenador encerrado");
    });

    (CoordinatorHandle { tx }, task)
}

// ============================================================================
// COORDENADOR
// ============================================================================

pub struct Coordinator {
    sessions: SessionRegistry,
    executors: ExecutorRegistry,
    catalog: FlowCatalog,
    gateway: Arc<dyn MessageGateway>,
    timers: FlowTimers,
    limits: CoordinatorLimits,
}

impl Coordinator {
    pub fn new(
        sessions: SessionRegistry,
        catalog: FlowCatalog,
        gateway: Arc<dyn MessageGateway>,
        limits: CoordinatorLimits,
        events: mpsc::UnboundedSender<CoordinatorEvent>,
    ) -> Self {
        Self {
            sessions,
            executors: ExecutorRegistry::new(),
            catalog,
            gateway,
            timers: FlowTimers::new(events),
            limits,
        }
    }

    #[cfg(test)]
    pub fn session(&self, flow_id: &str) -> Option<&FlowSession> {
        self.sessions.get(flow_id)
    }

    pub async fn handle_event(&mut self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::Message { message, reply } => {
                let response = self.handle_message(message).await;
                if let Some(reply) = reply {
                    let _ = reply.send(response);
                }
            }
            CoordinatorEvent::TimerFired {
                flow_id,
                kind,
                generation,
            } => self.on_timer(&flow_id, kind, generation).await,
            CoordinatorEvent::Shutdown => {}
        }
    }

    pub async fn handle_message(&mut self, message: InboundMessage) -> Reply {
        self.hydrate().await;

        match message {
            InboundMessage::RunFlow(request) => self.run_flow(request).await,
            InboundMessage::PauseFlow(r) => self.pause_flow(&r.flow_id).await,
            InboundMessage::ResumeFlow(r) => self.resume_flow(&r.flow_id).await,
            InboundMessage::StopFlow(r) => self.stop_flow(&r.flow_id),
            InboundMessage::RejoinFlow(r) => self.rejoin_flow(&r.flow_id).await,
            InboundMessage::RegisterExecutor(request) => self.register_executor(request).await,
            InboundMessage::StepDone(done) => {
                self.step_done(done).await;
                Reply::Accepted
            }
            InboundMessage::StepError(report) => {
                self.step_error(report).await;
                Reply::Accepted
            }
            InboundMessage::TabUpdated(update) => {
                self.tab_updated(update).await;
                Reply::Accepted
            }
            InboundMessage::TabRemoved(removed) => {
                self.tab_removed(removed.tab_id);
                Reply::Accepted
            }
            InboundMessage::DefineFlow(request) => self.define_flow(request),
        }
    }

    // ------------------------------------------------------------------------
    // Recuperação
    // ------------------------------------------------------------------------

    /// Primeira mensagem após um restart: sessões `running` viram `waiting`
    /// (ninguém mais vai confirmar o step em voo) e toda sessão em espera
    /// ganha um timer de navegação novo.
    async fn hydrate(&mut self) {
        let recovered = self.sessions.ensure_hydrated().await;

        for flow_id in recovered {
            let status = match self.sessions.get(&flow_id) {
                Some(session) => session.status,
                None => continue,
            };
            if status == SessionStatus::Running {
                self.sessions.update(&flow_id, |s| {
                    s.status = SessionStatus::Waiting;
                    s.waiting_for_navigation = true;
                });
            }
            if matches!(status, SessionStatus::Running | SessionStatus::Waiting) {
                info!(flow_id = %flow_id, "Sessão recuperada aguardando executor");
                self.timers
                    .arm(&flow_id, TimerKind::Navigation, self.limits.navigation_wait);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Comandos da UI
    // ------------------------------------------------------------------------

    #[instrument(skip(self, request), fields(flow_id = %request.flow_id, tab_id = request.tab_id))]
    async fn run_flow(&mut self, request: RunFlowRequest) -> Reply {
        let steps = match self.resolve_steps(&request) {
            Ok(Some(steps)) => steps,
            Ok(None) => {
                return Reply::Rejected(ReplyError {
                    code: "FLOW_NOT_FOUND".to_string(),
                    message: format!("Nenhum step para o fluxo '{}'", request.flow_id),
                    path: None,
                })
            }
            Err(e) => {
                warn!(error = %e, "Definição de fluxo rejeitada");
                return Reply::Rejected(ReplyError::from(&e));
            }
        };

        let registration = self.executors.get(request.tab_id);
        let page_location = request
            .page_location()
            .map(str::to_string)
            .or_else(|| registration.and_then(|r| r.page_url.clone()));
        let page_key = request
            .page_key
            .clone()
            .or_else(|| page_location.as_deref().map(page::page_key))
            .or_else(|| registration.and_then(|r| r.page_key.clone()));

        self.timers.clear_all(&request.flow_id);

        let mut session = FlowSession::new(request.flow_id.clone(), request.tab_id, steps);
        session.page_key = page_key;
        session.page_location = page_location;
        session.resume_token = request.resume_token.clone();
        session.status = SessionStatus::Running;
        self.sessions.insert(session);

        info!(total = ?self.sessions.get(&request.flow_id).map(FlowSession::total), "Fluxo iniciado");
        self.dispatch_current(&request.flow_id).await;

        Reply::session(self.sessions.get(&request.flow_id).cloned())
    }

    /// Steps inline, depois catálogo, depois os steps da sessão anterior.
    fn resolve_steps(&self, request: &RunFlowRequest) -> Result<Option<Vec<Step>>, FlowError> {
        if let Some(definition) = request.input().resolve()? {
            return Ok(Some(definition.steps));
        }
        if let Some(definition) = self.catalog.get(&request.flow_id) {
            return Ok(Some(definition.steps.clone()));
        }
        Ok(self
            .sessions
            .get(&request.flow_id)
            .filter(|s| !s.steps.is_empty())
            .map(|s| s.steps.clone()))
    }

    async fn pause_flow(&mut self, flow_id: &str) -> Reply {
        let status = self.sessions.get(flow_id).map(|s| s.status);
        if matches!(status, Some(SessionStatus::Running | SessionStatus::Waiting)) {
            self.timers.clear_all(flow_id);
            if let Some(snapshot) = self.sessions.update(flow_id, |s| {
                s.status = SessionStatus::Paused;
                s.waiting_for_navigation = false;
            }) {
                info!(flow_id = %flow_id, index = snapshot.current_index, "Fluxo pausado");
                self.announce(&snapshot).await;
            }
        }
        Reply::session(self.sessions.get(flow_id).cloned())
    }

    async fn resume_flow(&mut self, flow_id: &str) -> Reply {
        if self.sessions.get(flow_id).map(|s| s.status) == Some(SessionStatus::Paused) {
            info!(flow_id = %flow_id, "Fluxo retomado");
            self.dispatch_current(flow_id).await;
        }
        Reply::session(self.sessions.get(flow_id).cloned())
    }

    fn stop_flow(&mut self, flow_id: &str) -> Reply {
        self.timers.clear_all(flow_id);
        let snapshot = self.sessions.update(flow_id, |s| {
            s.status = SessionStatus::Idle;
            s.steps.clear();
            s.current_index = 0;
            s.current_step_id = None;
            s.result = None;
            s.error = None;
            s.waiting_for_navigation = false;
            s.attempt = 0;
        });
        if snapshot.is_some() {
            info!(flow_id = %flow_id, "Fluxo parado");
        }
        Reply::session(snapshot)
    }

    async fn rejoin_flow(&mut self, flow_id: &str) -> Reply {
        let Some(session) = self.sessions.get(flow_id).cloned() else {
            return Reply::session(None);
        };

        self.announce(&session).await;

        if session.recovered
            && session.status == SessionStatus::Waiting
            && self.executors.is_registered(session.tab_id)
        {
            self.resume_waiting(flow_id, None).await;
        }
        Reply::session(self.sessions.get(flow_id).cloned())
    }

    fn define_flow(&mut self, request: DefineFlowRequest) -> Reply {
        match request.input().resolve() {
            Ok(Some(definition)) => {
                let step_count = definition.step_count;
                info!(flow_id = %request.flow_id, step_count, "Fluxo definido");
                self.catalog.insert(request.flow_id.clone(), definition);
                Reply::Defined {
                    flow_id: request.flow_id,
                    step_count,
                }
            }
            Ok(None) => Reply::Rejected(ReplyError::from(&FlowError::EmptyFlow)),
            Err(e) => Reply::Rejected(ReplyError::from(&e)),
        }
    }

    // ------------------------------------------------------------------------
    // Executor e eventos de aba
    // ------------------------------------------------------------------------

    async fn register_executor(&mut self, request: RegisterExecutorRequest) -> Reply {
        let page_key = request
            .page_key
            .clone()
            .or_else(|| request.page_url.as_deref().map(page::page_key));
        let registration =
            self.executors
                .register(
                    request.tab_id,
                    page_key.clone(),
                    request.page_url.clone(),
                    request.capabilities,
                );
        info!(
            tab_id = request.tab_id,
            page_key = ?registration.page_key,
            executors = self.executors.len(),
            "Executor registrado"
        );

        for flow_id in self.sessions.ids_for_tab(request.tab_id) {
            let waiting = self
                .sessions
                .get(&flow_id)
                .map(|s| s.status == SessionStatus::Waiting)
                .unwrap_or(false);
            if waiting {
                self.resume_waiting(&flow_id, Some(PageUpdate {
                    key: page_key.clone(),
                    location: request.page_url.clone(),
                }))
                .await;
            }
        }

        Reply::Registered(ExecutorAck {
            tab_id: request.tab_id,
            page_key,
        })
    }

    async fn tab_updated(&mut self, update: TabUpdated) {
        if !update.is_complete() {
            return;
        }

        for flow_id in self.sessions.ids_for_tab(update.tab_id) {
            let Some(session) = self.sessions.get(&flow_id) else {
                continue;
            };
            // Só URLs entram na comparação; `page_key` pode ser uma chave opaca do chamador.
            let known_location = session.page_location.clone();
            let resume = match session.status {
                SessionStatus::Waiting => true,
                SessionStatus::Running => update
                    .url
                    .as_deref()
                    .map(|url| page::is_different_page(known_location.as_deref(), url))
                    .unwrap_or(false),
                _ => false,
            };
            let running = session.status == SessionStatus::Running;

            if resume {
                debug!(flow_id = %flow_id, url = ?update.url, "Navegação concluída, retomando");
                let page = update.url.as_ref().map(|url| PageUpdate {
                    key: Some(page::page_key(url)),
                    location: Some(url.clone()),
                });
                self.resume_waiting(&flow_id, page).await;
            } else if running && known_location.is_none() {
                // Primeira URL conhecida vira a referência para a próxima comparação.
                if let Some(url) = update.url.clone() {
                    self.sessions.update(&flow_id, |s| s.page_location = Some(url));
                }
            }
        }
    }

    fn tab_removed(&mut self, tab_id: TabId) {
        for flow_id in self.sessions.ids_for_tab(tab_id) {
            let active = self
                .sessions
                .get(&flow_id)
                .map(|s| s.status.is_active())
                .unwrap_or(false);
            if active {
                self.fail(
                    &flow_id,
                    SessionError::new(ErrorCode::TabClosed, format!("Aba {} fechada", tab_id)),
                );
            }
        }
        if self.executors.remove(tab_id).is_some() {
            debug!(tab_id, "Registro de executor removido");
        }
    }

    // ------------------------------------------------------------------------
    // Respostas do executor
    // ------------------------------------------------------------------------

    /// O step reportado é o que a sessão espera agora?
    fn is_current_step(session: &FlowSession, step_id: &str) -> bool {
        match session.status {
            SessionStatus::Running => session.current_step_id.as_deref() == Some(step_id),
            SessionStatus::Waiting => session.pending_step_id().as_deref() == Some(step_id),
            _ => false,
        }
    }

    async fn step_done(&mut self, done: StepDone) {
        let Some(session) = self.sessions.get(&done.flow_id) else {
            debug!(flow_id = %done.flow_id, "STEP_DONE para fluxo desconhecido");
            return;
        };
        if !Self::is_current_step(session, &done.step_id) {
            debug!(flow_id = %done.flow_id, step_id = %done.step_id, "STEP_DONE ignorado (não é o step atual)");
            return;
        }

        let has_next = session.has_next_step();
        self.timers.clear_all(&done.flow_id);
        let result = done.result;

        if has_next {
            self.sessions.update(&done.flow_id, |s| {
                s.current_index += 1;
                s.current_step_id = None;
                s.attempt = 0;
                if result.is_some() {
                    s.result = result;
                }
            });
            self.dispatch_current(&done.flow_id).await;
        } else {
            self.sessions.update(&done.flow_id, |s| {
                s.status = SessionStatus::Finished;
                s.current_step_id = None;
                s.waiting_for_navigation = false;
                s.attempt = 0;
                if result.is_some() {
                    s.result = result;
                }
            });
            info!(flow_id = %done.flow_id, "Fluxo concluído");
        }
    }

    async fn step_error(&mut self, report: StepErrorReport) {
        let Some(session) = self.sessions.get(&report.flow_id) else {
            return;
        };
        if !Self::is_current_step(session, &report.step_id) {
            debug!(flow_id = %report.flow_id, step_id = %report.step_id, "STEP_ERROR ignorado (não é o step atual)");
            return;
        }

        let code = ErrorCode::from_wire(&report.code);
        let status = session.status;
        let attempt = session.attempt;
        let step = session.current_step().cloned();
        let budget = step.as_ref().and_then(|s| s.retry);

        let mut error = SessionError::new(code, report.message);
        match report.detail {
            Some(detail) => error = error.with_detail(detail),
            None if code.as_str() != report.code.trim().to_ascii_uppercase() => {
                error = error.with_detail(json!({ "reportedCode": report.code }));
            }
            None => {}
        }

        match retry::decide(code, attempt, budget, &report.step_id) {
            RecoveryDecision::Wait => {
                if status != SessionStatus::Running {
                    return;
                }
                let wait = step
                    .as_ref()
                    .and_then(|s| s.timeout)
                    .map(|ms| Duration::from_millis(ms).min(self.limits.max_step_timeout))
                    .unwrap_or(self.limits.element_wait);

                self.timers.clear(&report.flow_id, TimerKind::Step);
                self.sessions.update(&report.flow_id, |s| {
                    s.status = SessionStatus::Waiting;
                    s.waiting_for_navigation = true;
                });
                info!(
                    flow_id = %report.flow_id,
                    step_id = %report.step_id,
                    wait_ms = wait.as_millis() as u64,
                    "Elemento não encontrado, aguardando a página"
                );
                self.timers.arm(&report.flow_id, TimerKind::Navigation, wait);
            }
            RecoveryDecision::Retry { attempt } => {
                self.timers.clear_all(&report.flow_id);
                self.sessions.update(&report.flow_id, |s| s.attempt = attempt);
                self.dispatch_current(&report.flow_id).await;
            }
            RecoveryDecision::Fail => self.fail(&report.flow_id, error),
        }
    }

    // ------------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------------

    async fn on_timer(&mut self, flow_id: &str, kind: TimerKind, generation: u64) {
        if !self.timers.take_if_current(flow_id, kind, generation) {
            debug!(flow_id = %flow_id, kind = ?kind, generation, "Disparo de timer obsoleto ignorado");
            return;
        }
        let Some(session) = self.sessions.get(flow_id) else {
            return;
        };

        match kind {
            TimerKind::Step if session.status == SessionStatus::Running => {
                let step_id = session.current_step_id.clone().unwrap_or_default();
                let budget = session.current_step().and_then(|s| s.retry);
                match retry::decide(ErrorCode::StepTimeout, session.attempt, budget, &step_id) {
                    RecoveryDecision::Retry { attempt } => {
                        self.sessions.update(flow_id, |s| s.attempt = attempt);
                        self.dispatch_current(flow_id).await;
                    }
                    _ => self.fail(
                        flow_id,
                        SessionError::new(
                            ErrorCode::StepTimeout,
                            format!("Step '{}' não respondeu a tempo", step_id),
                        )
                        .with_detail(json!({ "stepId": step_id })),
                    ),
                }
            }
            TimerKind::Navigation if session.status == SessionStatus::Waiting => {
                let step_id = session.pending_step_id();
                self.fail(
                    flow_id,
                    SessionError::new(ErrorCode::NavigationTimeout, "")
                        .with_detail(json!({ "stepId": step_id })),
                );
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------------
    // Despacho
    // ------------------------------------------------------------------------

    /// Timeout efetivo do step: o próprio (limitado ao teto) ou, para `wait`
    /// sem timeout, a duração mais a folga.
    fn effective_timeout(&self, step: &Step) -> Option<Duration> {
        match (step.timeout, &step.kind) {
            (Some(ms), _) => Some(Duration::from_millis(ms).min(self.limits.max_step_timeout)),
            (None, StepKind::Wait { ms }) => Some(Duration::from_millis(*ms) + self.limits.wait_grace),
            (None, _) => None,
        }
    }

    async fn dispatch_current(&mut self, flow_id: &str) {
        let Some(session) = self.sessions.get(flow_id) else {
            return;
        };
        let index = session.current_index;
        let total = session.total();
        let tab_id = session.tab_id;

        let Some(step) = session.current_step().cloned() else {
            self.timers.clear_all(flow_id);
            self.sessions.update(flow_id, |s| {
                s.status = SessionStatus::Finished;
                s.current_step_id = None;
                s.waiting_for_navigation = false;
            });
            return;
        };
        let step_id = step.step_id(index);

        match self.executors.get(tab_id) {
            None => {
                return self.fail(
                    flow_id,
                    SessionError::new(
                        ErrorCode::DispatchFailed,
                        format!("Nenhum executor registrado na aba {}", tab_id),
                    ),
                );
            }
            Some(registration) if !registration.can_handle(step.kind_name()) => {
                return self.fail(
                    flow_id,
                    SessionError::new(
                        ErrorCode::DispatchFailed,
                        format!(
                            "Executor da aba {} não suporta steps '{}'",
                            tab_id,
                            step.kind_name()
                        ),
                    ),
                );
            }
            Some(_) => {}
        }

        let timeout = self.effective_timeout(&step);
        self.sessions.update(flow_id, |s| {
            s.status = SessionStatus::Running;
            s.current_step_id = Some(step_id.clone());
            s.waiting_for_navigation = false;
            s.recovered = false;
            s.error = None;
        });

        let message = OutboundMessage::RunStep(RunStep {
            flow_id: flow_id.to_string(),
            step_id: step_id.clone(),
            current_index: index,
            total,
            step_payload: step.clone(),
            timeout: timeout.map(|t| t.as_millis() as u64),
        });

        if let Err(e) = self.gateway.broadcast(tab_id, &message).await {
            return self.fail(
                flow_id,
                SessionError::new(ErrorCode::DispatchFailed, e.to_string())
                    .with_detail(json!({ "stepId": step_id })),
            );
        }
        debug!(flow_id = %flow_id, step_id = %step_id, kind = step.kind_name(), index, "RUN_STEP despachado");

        if step.is_same_tab_navigation() && index + 1 < total {
            self.timers.clear(flow_id, TimerKind::Step);
            self.sessions.update(flow_id, |s| {
                s.current_index += 1;
                s.status = SessionStatus::Waiting;
                s.waiting_for_navigation = true;
                s.page_location = None;
                s.current_step_id = None;
                s.attempt = 0;
            });
            self.timers
                .arm(flow_id, TimerKind::Navigation, self.limits.navigation_wait);
        } else if let Some(timeout) = timeout {
            self.timers.arm(flow_id, TimerKind::Step, timeout);
        } else {
            self.timers.clear(flow_id, TimerKind::Step);
        }
    }

    /// Volta uma sessão em espera para `running` e re-despacha o step atual.
    async fn resume_waiting(&mut self, flow_id: &str, page: Option<PageUpdate>) {
        self.timers.clear_all(flow_id);
        self.sessions.update(flow_id, |s| {
            if let Some(page) = page {
                if page.key.is_some() {
                    s.page_key = page.key;
                }
                if page.location.is_some() {
                    s.page_location = page.location;
                }
            }
            s.status = SessionStatus::Running;
            s.waiting_for_navigation = false;
        });
        self.dispatch_current(flow_id).await;
    }

    fn fail(&mut self, flow_id: &str, error: SessionError) {
        self.timers.clear_all(flow_id);
        warn!(
            flow_id = %flow_id,
            code = %error.code,
            category = %error.code.category(),
            message = %error.message,
            "Fluxo falhou"
        );
        self.sessions.update(flow_id, |s| {
            s.status = SessionStatus::Error;
            s.error = Some(error);
            s.waiting_for_navigation = false;
        });
    }

    /// `FLOW_STATUS` para os frames da aba; falha só é logada.
    async fn announce(&self, session: &FlowSession) {
        let message = OutboundMessage::FlowStatus(FlowStatusNotice::from(session));
        if let Err(e) = self.gateway.broadcast(session.tab_id, &message).await {
            debug!(flow_id = %session.flow_id, error = %e, "FLOW_STATUS não entregue");
        }
    }
}

struct PageUpdate {
    key: Option<String>,
    location: Option<String>,
}

#[cfg(test)]
mod tests;
