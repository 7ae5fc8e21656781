//! Módulo de Retry por step.
//!
//! Decide o que fazer quando um step falha:
//! - `retry`: re-despacha o mesmo step enquanto houver orçamento (`step.retry`)
//! - `wait`: aguarda a página mudar (elemento ainda não existe)
//! - `fail_fast`: encerra a sessão com erro
//!
//! O orçamento vem do próprio step; o contador de tentativas gastas fica na
//! sessão (`attempt`) e zera quando o índice avança.

use tracing::{info, warn};

use crate::errors::ErrorCode;

/// Estratégias de recuperação suportadas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// Re-despacho imediato, limitado pelo orçamento do step
    Retry,
    /// Espera navegação ou mutação da página
    WaitForPage,
    /// Falha imediatamente
    FailFast,
}

impl RecoveryStrategy {
    pub fn for_code(code: ErrorCode) -> Self {
        match code {
            ErrorCode::ElementNotFound => Self::WaitForPage,
            ErrorCode::ExecutionFailed | ErrorCode::AssertionFailed | ErrorCode::StepTimeout => {
                Self::Retry
            }
            ErrorCode::NavigationTimeout | ErrorCode::DispatchFailed | ErrorCode::TabClosed => {
                Self::FailFast
            }
        }
    }
}

/// Resultado da decisão para uma falha concreta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryDecision {
    /// Re-despachar; `attempt` é o novo valor do contador.
    Retry { attempt: u32 },
    Wait,
    Fail,
}

/// Decide a recuperação de `code` para um step com orçamento `budget`,
/// já tendo gasto `attempt` tentativas.
pub fn decide(code: ErrorCode, attempt: u32, budget: Option<u32>, step_id: &str) -> RecoveryDecision {
    match RecoveryStrategy::for_code(code) {
        RecoveryStrategy::WaitForPage => RecoveryDecision::Wait,
        RecoveryStrategy::FailFast => RecoveryDecision::Fail,
        RecoveryStrategy::Retry => {
            let max_attempts = budget.unwrap_or(0);
            if attempt < max_attempts {
                info!(
                    step_id = %step_id,
                    attempt = attempt + 1,
                    max_attempts = max_attempts,
                    code = %code,
                    "Tentativa falhou, re-despachando step"
                );
                RecoveryDecision::Retry {
                    attempt: attempt + 1,
                }
            } else {
                if max_attempts > 0 {
                    warn!(
                        step_id = %step_id,
                        max_attempts = max_attempts,
                        code = %code,
                        "Todas as tentativas esgotadas"
                    );
                }
                RecoveryDecision::Fail
            }
        }
    }
}
