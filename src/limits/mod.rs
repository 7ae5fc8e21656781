//! # Módulo de Limites de Fluxo
//!
//! Define os limites que protegem o coordenador contra fluxos malformados
//! ou grandes demais, e os tempos de espera usados durante a execução.
//!
//! ## Para todos entenderem:
//!
//! Um fluxo gravado pelo usuário pode ter qualquer tamanho. Antes de
//! executar, precisamos de regras claras:
//! - Máximo 200 steps por fluxo
//! - Máximo 50 voltas em um `while`
//! - Máximo 10 segundos em um único `wait`
//! - Máximo 45 segundos esperando uma navegação terminar
//!
//! ## Dois tipos de limite:
//!
//! | Tipo        | Onde vive                  | Configurável? |
//! |-------------|----------------------------|---------------|
//! | Contrato    | Constantes `MAX_FLOW_*`    | Não           |
//! | Execução    | `CoordinatorLimits`        | Sim (env)     |
//!
//! As constantes de contrato fazem parte do protocolo com o executor remoto
//! e a UI; mudá-las quebraria fluxos já gravados.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// CONSTANTES DE CONTRATO
// ============================================================================

/// Número máximo de steps executáveis (já achatados) em um fluxo.
pub const MAX_FLOW_STEPS: usize = 200;

/// Teto de iterações de um `while`.
pub const MAX_FLOW_ITERATIONS: u32 = 50;

/// Iterações usadas quando o `while` não informa `maxIterations`.
pub const DEFAULT_FLOW_ITERATIONS: u32 = 10;

/// Duração máxima de um `wait` (valores maiores são truncados).
pub const MAX_FLOW_WAIT_MS: u64 = 10_000;

/// Tamanho máximo do texto-fonte de um fluxo, em caracteres.
pub const MAX_FLOW_SOURCE_LENGTH: usize = 8_000;

/// Profundidade máxima de aninhamento (if/while dentro de if/while, not dentro de not).
pub const MAX_FLOW_NESTING_DEPTH: usize = 8;

/// Retries máximos que um step pode pedir.
pub const MAX_STEP_RETRIES: u32 = 5;

/// Quanto tempo esperar por uma navegação de aba terminar.
pub const NAVIGATION_WAIT_MS: u64 = 45_000;

/// Quanto tempo esperar um elemento aparecer após `ELEMENT_NOT_FOUND`.
pub const ELEMENT_WAIT_MS: u64 = 30_000;

/// Timeout máximo por step, salvo override via ambiente.
pub const DEFAULT_MAX_STEP_TIMEOUT_MS: u64 = 60_000;

/// Folga somada ao `wait` quando o step não tem timeout próprio.
pub const DEFAULT_WAIT_GRACE_MS: u64 = 5_000;

/// Janela de coalescência da persistência de sessões.
pub const DEFAULT_PERSIST_DEBOUNCE_MS: u64 = 50;

// ============================================================================
// LIMITES DE EXECUÇÃO
// ============================================================================

/// Tempos de espera do coordenador.
///
/// Todos os campos têm valores padrão seguros; `from_env` permite
/// sobrescrever em ambientes de teste ou máquinas lentas.
///
/// ## Exemplo de uso:
///
/// ```ignore
/// let limits = CoordinatorLimits {
///     element_wait: Duration::from_secs(5),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorLimits {
    /// Espera máxima por uma navegação na mesma aba.
    pub navigation_wait: Duration,

    /// Espera máxima por um elemento depois de `ELEMENT_NOT_FOUND`.
    pub element_wait: Duration,

    /// Teto aplicado ao timeout declarado em cada step.
    pub max_step_timeout: Duration,

    /// Folga somada à duração de um `wait` sem timeout próprio.
    pub wait_grace: Duration,

    /// Janela em que escritas de sessão são agrupadas antes de persistir.
    pub persist_debounce: Duration,
}

impl Default for CoordinatorLimits {
    fn default() -> Self {
        Self {
            navigation_wait: Duration::from_millis(NAVIGATION_WAIT_MS),
            element_wait: Duration::from_millis(ELEMENT_WAIT_MS),
            max_step_timeout: Duration::from_millis(DEFAULT_MAX_STEP_TIMEOUT_MS),
            wait_grace: Duration::from_millis(DEFAULT_WAIT_GRACE_MS),
            persist_debounce: Duration::from_millis(DEFAULT_PERSIST_DEBOUNCE_MS),
        }
    }
}

impl CoordinatorLimits {
    /// Cria limites a partir de variáveis de ambiente.
    ///
    /// Variáveis suportadas (todas em milissegundos):
    /// - `FLOW_NAVIGATION_WAIT_MS`
    /// - `FLOW_ELEMENT_WAIT_MS`
    /// - `FLOW_MAX_STEP_TIMEOUT_MS`
    /// - `FLOW_WAIT_GRACE_MS`
    /// - `FLOW_PERSIST_DEBOUNCE_MS`
    ///
    /// Valores que não parseiam como inteiro são ignorados.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut limits = Self::default();
        let read_ms = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(ms) = read_ms("FLOW_NAVIGATION_WAIT_MS") {
            limits.navigation_wait = Duration::from_millis(ms);
        }
        if let Some(ms) = read_ms("FLOW_ELEMENT_WAIT_MS") {
            limits.element_wait = Duration::from_millis(ms);
        }
        if let Some(ms) = read_ms("FLOW_MAX_STEP_TIMEOUT_MS") {
            limits.max_step_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = read_ms("FLOW_WAIT_GRACE_MS") {
            limits.wait_grace = Duration::from_millis(ms);
        }
        if let Some(ms) = read_ms("FLOW_PERSIST_DEBOUNCE_MS") {
            limits.persist_debounce = Duration::from_millis(ms);
        }

        limits
    }
}

// ============================================================================
// TESTES
// ============================================================================
