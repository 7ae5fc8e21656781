use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::SessionError;
use crate::flow::{FlowDefinition, Step};
use crate::validation::{self, FlowError};

pub type TabId = i64;
pub type FrameId = i64;

// ============================================================================
// SESSÃO
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Running,
    Paused,
    Waiting,
    Finished,
    Error,
}

impl SessionStatus {
    /// Sessão que ainda pode avançar sem um novo RUN_FLOW.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Paused | Self::Waiting)
    }
}

/// Estado vivo (e persistido) da execução de um fluxo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSession {
    pub flow_id: String,
    pub tab_id: TabId,
    pub page_key: Option<String>,
    pub page_location: Option<String>,
    pub status: SessionStatus,
    pub current_index: usize,
    pub current_step_id: Option<String>,
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<SessionError>,
    pub waiting_for_navigation: bool,
    /// Retries já gastos no step atual.
    #[serde(default)]
    pub attempt: u32,
    pub updated_at: DateTime<Utc>,
    /// Hidratada do storage após um restart do coordenador.
    #[serde(skip)]
    pub recovered: bool,
}

impl FlowSession {
    pub fn new(flow_id: impl Into<String>, tab_id: TabId, steps: Vec<Step>) -> Self {
        Self {
            flow_id: flow_id.into(),
            tab_id,
            page_key: None,
            page_location: None,
            status: SessionStatus::Idle,
            current_index: 0,
            current_step_id: None,
            steps,
            resume_token: None,
            result: None,
            error: None,
            waiting_for_navigation: false,
            attempt: 0,
            updated_at: Utc::now(),
            recovered: false,
        }
    }

    pub fn total(&self) -> usize {
        self.steps.len()
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.steps.get(self.current_index)
    }

    /// Id do step em `current_index`, mesmo quando `current_step_id` foi limpo.
    pub fn pending_step_id(&self) -> Option<String> {
        self.current_step()
            .map(|step| step.step_id(self.current_index))
    }

    pub fn has_next_step(&self) -> bool {
        self.current_index + 1 < self.steps.len()
    }
}

// ============================================================================
// MENSAGENS RECEBIDAS
// ============================================================================

/// Tudo que chega ao coordenador: comandos da UI, respostas do executor
/// e eventos de aba repassados pelo host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundMessage {
    RunFlow(RunFlowRequest),
    PauseFlow(FlowRef),
    ResumeFlow(FlowRef),
    StopFlow(FlowRef),
    RejoinFlow(FlowRef),
    RegisterExecutor(RegisterExecutorRequest),
    StepDone(StepDone),
    StepError(StepErrorReport),
    TabUpdated(TabUpdated),
    TabRemoved(TabRemoved),
    DefineFlow(DefineFlowRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFlowRequest {
    pub flow_id: String,
    pub tab_id: TabId,
    #[serde(default)]
    pub steps: Option<Value>,
    #[serde(default)]
    pub flow_source: Option<String>,
    #[serde(default)]
    pub definition: Option<Value>,
    #[serde(default)]
    pub page_key: Option<String>,
    #[serde(default)]
    pub target_url: Option<String>,
    #[serde(default)]
    pub page_url: Option<String>,
    #[serde(default)]
    pub resume_token: Option<Value>,
}

impl RunFlowRequest {
    pub fn input(&self) -> FlowInput<'_> {
        FlowInput {
            steps: self.steps.as_ref(),
            flow_source: self.flow_source.as_deref(),
            definition: self.definition.as_ref(),
        }
    }

    /// URL da página alvo, se o chamador informou.
    pub fn page_location(&self) -> Option<&str> {
        self.target_url.as_deref().or(self.page_url.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefineFlowRequest {
    pub flow_id: String,
    #[serde(default)]
    pub steps: Option<Value>,
    #[serde(default)]
    pub flow_source: Option<String>,
    #[serde(default)]
    pub definition: Option<Value>,
}

impl DefineFlowRequest {
    pub fn input(&self) -> FlowInput<'_> {
        FlowInput {
            steps: self.steps.as_ref(),
            flow_source: self.flow_source.as_deref(),
            definition: self.definition.as_ref(),
        }
    }
}

/// As três formas de mandar um fluxo junto de uma mensagem.
#[derive(Debug, Clone, Copy)]
pub struct FlowInput<'a> {
    pub steps: Option<&'a Value>,
    pub flow_source: Option<&'a str>,
    pub definition: Option<&'a Value>,
}

impl FlowInput<'_> {
    /// Normaliza a primeira forma presente (`definition`, `steps`, `flowSource`).
    ///
    /// `Ok(None)` quando nenhuma veio, ou veio vazia.
    pub fn resolve(&self) -> Result<Option<FlowDefinition>, FlowError> {
        if let Some(definition) = self.definition.filter(|v| !v.is_null()) {
            return validation::normalize_value(definition);
        }
        if let Some(steps) = self.steps.filter(|v| !v.is_null()) {
            return validation::normalize_value(steps);
        }
        match self.flow_source {
            Some(source) => validation::parse(source),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowRef {
    pub flow_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterExecutorRequest {
    pub tab_id: TabId,
    #[serde(default)]
    pub page_key: Option<String>,
    #[serde(default)]
    pub page_url: Option<String>,
    #[serde(default)]
    pub capabilities: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDone {
    pub flow_id: String,
    pub step_id: String,
    #[serde(default)]
    pub result: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepErrorReport {
    pub flow_id: String,
    pub step_id: String,
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub detail: Option<Value>,
}

/// `tabs.onUpdated`; só `status == "complete"` interessa.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabUpdated {
    pub tab_id: TabId,
    pub status: String,
    #[serde(default)]
    pub url: Option<String>,
}

impl TabUpdated {
    pub fn is_complete(&self) -> bool {
        self.status.eq_ignore_ascii_case("complete")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabRemoved {
    pub tab_id: TabId,
}

// ============================================================================
// MENSAGENS ENVIADAS
// ============================================================================

/// Mensagens do coordenador para os frames de uma aba.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundMessage {
    RunStep(RunStep),
    FlowStatus(FlowStatusNotice),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStep {
    pub flow_id: String,
    pub step_id: String,
    pub current_index: usize,
    pub total: usize,
    pub step_payload: Step,
    /// Timeout efetivo em milissegundos.
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowStatusNotice {
    pub flow_id: String,
    pub status: SessionStatus,
    pub current_index: usize,
    pub total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SessionError>,
}

impl From<&FlowSession> for FlowStatusNotice {
    fn from(session: &FlowSession) -> Self {
        Self {
            flow_id: session.flow_id.clone(),
            status: session.status,
            current_index: session.current_index,
            total: session.total(),
            error: session.error.clone(),
        }
    }
}

// ============================================================================
// RESPOSTAS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorAck {
    pub tab_id: TabId,
    pub page_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl From<&FlowError> for ReplyError {
    fn from(err: &FlowError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            path: err.path().map(str::to_string),
        }
    }
}

/// Resposta do coordenador a uma mensagem recebida.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Snapshot da sessão (ou `None` se o fluxo não existe).
    Session(Option<Box<FlowSession>>),
    Registered(ExecutorAck),
    Defined { flow_id: String, step_count: usize },
    /// Mensagem do executor ou evento de aba processado.
    Accepted,
    Rejected(ReplyError),
}

impl Reply {
    pub fn session(session: Option<FlowSession>) -> Self {
        Self::Session(session.map(Box::new))
    }

    pub fn is_ok(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }

    /// Corpo `data` (ou `error`) da resposta no protocolo de linha.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Session(session) => serde_json::to_value(session).unwrap_or(Value::Null),
            Self::Registered(ack) => serde_json::to_value(ack).unwrap_or(Value::Null),
            Self::Defined { flow_id, step_count } => {
                serde_json::json!({ "flowId": flow_id, "stepCount": step_count })
            }
            Self::Accepted => Value::Null,
            Self::Rejected(error) => serde_json::to_value(error).unwrap_or(Value::Null),
        }
    }
}
