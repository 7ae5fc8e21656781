//! # Módulo de Códigos de Erro de Sessão
//!
//! Define os códigos que aparecem no campo `error` de uma sessão e que
//! são trocados com o executor remoto no `STEP_ERROR`.
//!
//! ## Para todos entenderem:
//!
//! Quando um fluxo para no meio, a UI precisa saber o porquê. Em vez de
//! comparar mensagens de texto, olhamos um código fixo:
//!
//! ```text
//! [ELEMENT_NOT_FOUND] Nenhum elemento para "#login" (step: step-0)
//! ```
//!
//! ## Categorias
//!
//! | Categoria  | Códigos                                                 | Quem gera      |
//! |------------|---------------------------------------------------------|----------------|
//! | Execução   | ELEMENT_NOT_FOUND, ASSERTION_FAILED, EXECUTION_FAILED   | Executor       |
//! | Despacho   | DISPATCH_FAILED, TAB_CLOSED                             | Coordenador    |
//! | Timeout    | STEP_TIMEOUT, NAVIGATION_TIMEOUT                        | Coordenador    |
//!
//! Erros de definição (JSON inválido, step desconhecido) não aparecem
//! aqui: eles nunca chegam a criar uma sessão (veja `validation`).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ============================================================================
// CÓDIGO DE ERRO
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Seletor não encontrou nada. Recuperável esperando.
    ElementNotFound,
    /// Condição de um `assert` avaliou falso.
    AssertionFailed,
    /// Nenhuma resposta dentro do timeout do step.
    StepTimeout,
    /// Navegação (ou espera por elemento) não terminou a tempo.
    NavigationTimeout,
    /// Qualquer outra falha reportada pelo executor.
    ExecutionFailed,
    /// Não foi possível nem enviar o `RUN_STEP`.
    DispatchFailed,
    /// A aba foi fechada com a sessão em andamento.
    TabClosed,
}

impl ErrorCode {
    /// Converte o código vindo do executor.
    ///
    /// Códigos desconhecidos viram `EXECUTION_FAILED`; o texto original
    /// deve ir para o `detail` do erro.
    pub fn from_wire(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "ELEMENT_NOT_FOUND" => Self::ElementNotFound,
            "ASSERTION_FAILED" => Self::AssertionFailed,
            "STEP_TIMEOUT" => Self::StepTimeout,
            "NAVIGATION_TIMEOUT" => Self::NavigationTimeout,
            "DISPATCH_FAILED" => Self::DispatchFailed,
            "TAB_CLOSED" => Self::TabClosed,
            _ => Self::ExecutionFailed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ElementNotFound => "ELEMENT_NOT_FOUND",
            Self::AssertionFailed => "ASSERTION_FAILED",
            Self::StepTimeout => "STEP_TIMEOUT",
            Self::NavigationTimeout => "NAVIGATION_TIMEOUT",
            Self::ExecutionFailed => "EXECUTION_FAILED",
            Self::DispatchFailed => "DISPATCH_FAILED",
            Self::TabClosed => "TAB_CLOSED",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ElementNotFound | Self::AssertionFailed | Self::ExecutionFailed => {
                ErrorCategory::Execution
            }
            Self::DispatchFailed | Self::TabClosed => ErrorCategory::Dispatch,
            Self::StepTimeout | Self::NavigationTimeout => ErrorCategory::Timeout,
        }
    }

    /// Descrição curta, usada quando o executor não manda mensagem.
    pub fn description(&self) -> &'static str {
        match self {
            Self::ElementNotFound => "Elemento não encontrado",
            Self::AssertionFailed => "Assert falhou",
            Self::StepTimeout => "Step não respondeu a tempo",
            Self::NavigationTimeout => "Navegação não terminou a tempo",
            Self::ExecutionFailed => "Falha na execução do step",
            Self::DispatchFailed => "Falha ao despachar o step",
            Self::TabClosed => "Aba fechada",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// CATEGORIA DE ERRO
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Reportado pelo executor remoto.
    Execution,
    /// O coordenador não conseguiu falar com a aba.
    Dispatch,
    /// Nenhuma resposta chegou a tempo.
    Timeout,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Execution => write!(f, "Execução"),
            Self::Dispatch => write!(f, "Despacho"),
            Self::Timeout => write!(f, "Timeout"),
        }
    }
}

// ============================================================================
// ERRO DE SESSÃO
// ============================================================================

/// Erro terminal gravado na sessão, visível para quem fizer rejoin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl SessionError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            code,
            message: if message.trim().is_empty() {
                code.description().to_string()
            } else {
                message
            },
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Formata o erro para exibição ao usuário.
    pub fn user_message(&self) -> String {
        format!("[{}] {}", self.code, self.message)
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for SessionError {}
