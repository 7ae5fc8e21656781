//! # Modelo de Fluxo - Steps e Condições
//!
//! Estruturas canônicas de um fluxo já normalizado. Nada aqui faz parsing
//! de JSON solto: isso é trabalho do módulo `validation`. Aqui só vivem os
//! tipos e as consultas que o coordenador precisa fazer sobre eles.
//!
//! ## Formato serializado:
//!
//! ```json
//! {
//!   "version": 1,
//!   "stepCount": 2,
//!   "steps": [
//!     { "type": "click", "selector": "#login", "all": false },
//!     { "type": "wait", "ms": 500, "timeout": 2000 }
//!   ]
//! }
//! ```
//!
//! Esse formato é aceito de volta pelo normalizador sem perdas.

pub mod catalog;

use serde::{Deserialize, Serialize};

/// Versão do formato canônico de definição.
pub const FLOW_DEFINITION_VERSION: u32 = 1;

/// Alvos de navegação que mantêm a mesma aba.
const SAME_TAB_TARGETS: &[&str] = &["", "_self", "same-tab"];

// ============================================================================
// DEFINIÇÃO
// ============================================================================

/// Fluxo normalizado e validado.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDefinition {
    pub version: u32,
    pub steps: Vec<Step>,
    /// Total de steps executáveis, contando corpos de if/while uma vez por nó.
    pub step_count: usize,
}

// ============================================================================
// STEP
// ============================================================================

/// Uma instrução executável ou um nó de controle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(flatten)]
    pub kind: StepKind,

    /// Timeout declarado pelo step, em milissegundos.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StepKind {
    Click {
        selector: String,
        all: bool,
    },
    Input {
        selector: String,
        value: String,
    },
    Wait {
        ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    Navigate {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        page_key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_url: Option<String>,
    },
    Log {
        message: String,
    },
    Assert {
        condition: Condition,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    If {
        condition: Condition,
        then_steps: Vec<Step>,
        else_steps: Vec<Step>,
    },
    #[serde(rename_all = "camelCase")]
    While {
        condition: Condition,
        body_steps: Vec<Step>,
        max_iterations: u32,
    },
}

impl Step {
    pub fn new(kind: StepKind) -> Self {
        Self {
            id: None,
            kind,
            timeout: None,
            retry: None,
        }
    }

    /// Nome curto do tipo, usado em logs.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            StepKind::Click { .. } => "click",
            StepKind::Input { .. } => "input",
            StepKind::Wait { .. } => "wait",
            StepKind::Navigate { .. } => "navigate",
            StepKind::Log { .. } => "log",
            StepKind::Assert { .. } => "assert",
            StepKind::If { .. } => "if",
            StepKind::While { .. } => "while",
        }
    }

    /// Identificador usado no protocolo: o `id` explícito ou `step-<index>`.
    ///
    /// É a única base para descartar respostas atrasadas do executor.
    pub fn step_id(&self, index: usize) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!("step-{}", index),
        }
    }

    /// Navegação que derruba a página atual (alvo vazio, `_self` ou `same-tab`).
    pub fn is_same_tab_navigation(&self) -> bool {
        match &self.kind {
            StepKind::Navigate { target, .. } => {
                let target = target.as_deref().unwrap_or("").trim().to_ascii_lowercase();
                SAME_TAB_TARGETS.contains(&target.as_str())
            }
            _ => false,
        }
    }

    /// Quantos steps executáveis este nó representa (ele mesmo + filhos).
    pub fn executable_count(&self) -> usize {
        let nested = match &self.kind {
            StepKind::If {
                then_steps,
                else_steps,
                ..
            } => count_steps(then_steps) + count_steps(else_steps),
            StepKind::While { body_steps, .. } => count_steps(body_steps),
            _ => 0,
        };
        1 + nested
    }
}

/// Conta steps executáveis de uma lista, incluindo corpos aninhados.
pub fn count_steps(steps: &[Step]) -> usize {
    steps.iter().map(Step::executable_count).sum()
}

// ============================================================================
// CONDIÇÃO
// ============================================================================

/// Predicado avaliado pelo executor contra a página viva.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Condition {
    Exists {
        selector: String,
    },
    Not {
        operand: Box<Condition>,
    },
    TextContains {
        selector: String,
        value: String,
    },
    AttributeEquals {
        selector: String,
        name: String,
        value: String,
    },
}

impl Condition {
    pub fn exists(selector: impl Into<String>) -> Self {
        Self::Exists {
            selector: selector.into(),
        }
    }
}

#[cfg(test)]
impl Step {
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = Some(retry);
        self
    }
}

#[cfg(test)]
impl Condition {
    pub fn negate(self) -> Self {
        Self::Not {
            operand: Box::new(self),
        }
    }
}
