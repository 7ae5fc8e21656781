//! # Módulo de Normalização e Validação de Fluxos
//!
//! Converte JSON "solto" (gravado pela UI, editado à mão ou exportado por
//! versões antigas) na árvore canônica de `Step`/`Condition`.
//!
//! ## Para todos entenderem:
//!
//! Um fluxo pode chegar em vários formatos:
//!
//! ```json
//! [{ "action": "click", "selector": "#a" }]
//! { "steps": [{ "type": "OpenPage", "url": "/b" }] }
//! { "type": "wait", "delay": "500" }
//! ```
//!
//! Todos viram a mesma estrutura. Se algo não faz sentido, o erro diz
//! exatamente onde: `flow[2].then[0]: campo obrigatório 'selector' ausente`.
//!
//! ## Regras aplicadas:
//!
//! 1. **Fonte vazia**: não é erro, significa "nenhum fluxo configurado"
//! 2. **Tamanho**: no máximo `MAX_FLOW_SOURCE_LENGTH` caracteres
//! 3. **Tipos conhecidos**: `type`/`action` precisa ser reconhecido
//! 4. **Campos obrigatórios**: seletor, url, duração, condição
//! 5. **Limites**: `wait` e `maxIterations` são truncados, não rejeitados
//! 6. **Contagem**: total de steps executáveis entre 1 e `MAX_FLOW_STEPS`
//!
//! Tudo aqui é puro e síncrono: nenhuma dependência de navegador ou runtime.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::flow::{count_steps, Condition, FlowDefinition, Step, StepKind, FLOW_DEFINITION_VERSION};
use crate::limits::{
    DEFAULT_FLOW_ITERATIONS, MAX_FLOW_ITERATIONS, MAX_FLOW_NESTING_DEPTH, MAX_FLOW_SOURCE_LENGTH,
    MAX_FLOW_STEPS, MAX_FLOW_WAIT_MS, MAX_STEP_RETRIES,
};

// ============================================================================
// TIPOS DE ERRO
// ============================================================================

/// Erros de definição de fluxo.
///
/// Nunca entram em uma sessão: são devolvidos direto para quem pediu
/// a execução. Variantes com `path` apontam o step problemático.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FlowError {
    #[error("Fluxo com {length} caracteres excede o máximo de {max}")]
    SourceTooLong { length: usize, max: usize },

    #[error("JSON inválido no fluxo: {0}")]
    InvalidJson(String),

    #[error("{path}: entrada precisa ser objeto ou lista, recebido {found}")]
    InvalidEntry { path: String, found: &'static str },

    #[error("{path}: step sem 'type' ou 'action'")]
    MissingStepType { path: String },

    #[error("{path}: tipo de step '{kind}' desconhecido")]
    UnknownStepType { path: String, kind: String },

    #[error("{path}: tipo de condição '{kind}' desconhecido")]
    UnknownConditionType { path: String, kind: String },

    #[error("{path}: campo obrigatório '{field}' ausente")]
    MissingField { path: String, field: &'static str },

    #[error("{path}: campo '{field}' inválido: {reason}")]
    InvalidField {
        path: String,
        field: String,
        reason: String,
    },

    #[error("{path}: while precisa de pelo menos um step no corpo")]
    EmptyLoopBody { path: String },

    #[error("{path}: aninhamento excede a profundidade máxima de {max}")]
    TooDeep { path: String, max: usize },

    #[error("Fluxo sem nenhum step executável")]
    EmptyFlow,

    #[error("Fluxo tem {count} steps, máximo permitido é {max}")]
    TooManySteps { count: usize, max: usize },
}

impl FlowError {
    /// Código estável enviado para a UI junto da mensagem.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SourceTooLong { .. } => "FLOW_SOURCE_TOO_LONG",
            Self::InvalidJson(_) => "FLOW_INVALID_JSON",
            Self::InvalidEntry { .. } => "FLOW_INVALID_ENTRY",
            Self::MissingStepType { .. } => "FLOW_MISSING_STEP_TYPE",
            Self::UnknownStepType { .. } => "FLOW_UNKNOWN_STEP_TYPE",
            Self::UnknownConditionType { .. } => "FLOW_UNKNOWN_CONDITION_TYPE",
            Self::MissingField { .. } => "FLOW_MISSING_FIELD",
            Self::InvalidField { .. } => "FLOW_INVALID_FIELD",
            Self::EmptyLoopBody { .. } => "FLOW_EMPTY_LOOP_BODY",
            Self::TooDeep { .. } => "FLOW_TOO_DEEP",
            Self::EmptyFlow => "FLOW_EMPTY",
            Self::TooManySteps { .. } => "FLOW_TOO_MANY_STEPS",
        }
    }

    /// Localizador do step (`flow[2].then[0]`), quando o erro tem um.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::InvalidEntry { path, .. }
            | Self::MissingStepType { path }
            | Self::UnknownStepType { path, .. }
            | Self::UnknownConditionType { path, .. }
            | Self::MissingField { path, .. }
            | Self::InvalidField { path, .. }
            | Self::EmptyLoopBody { path }
            | Self::TooDeep { path, .. } => Some(path),
            _ => None,
        }
    }
}

// ============================================================================
// ALIASES DE CAMPOS
// ============================================================================

const ROOT_PATH: &str = "flow";

const WAIT_KEYS: &[&str] = &["ms", "milliseconds", "duration", "delay", "value", "time"];
const TIMEOUT_KEYS: &[&str] = &["timeout", "timeoutMs"];
const RETRY_KEYS: &[&str] = &["retry", "retries"];
const ITERATION_KEYS: &[&str] = &["maxIterations", "max_iterations", "iterations", "limit", "times"];
const THEN_KEYS: &[&str] = &["thenSteps", "then"];
const ELSE_KEYS: &[&str] = &["elseSteps", "else"];
const BODY_KEYS: &[&str] = &["bodySteps", "body", "steps", "do"];

/// Tipos de step reconhecidos, antes de virar `StepKind`.
#[derive(Debug, Clone, Copy, PartialEq)]
enum RawKind {
    Click,
    Input,
    Wait,
    Navigate,
    Log,
    Assert,
    If,
    While,
    Sequence,
}

impl RawKind {
    fn from_name(raw: &str) -> Option<Self> {
        let kind = match canonical_name(raw).as_str() {
            "click" => Self::Click,
            "input" | "type" | "fill" => Self::Input,
            "wait" | "sleep" | "delay" => Self::Wait,
            "navigate" | "openpage" | "goto" => Self::Navigate,
            "log" => Self::Log,
            "assert" | "expect" => Self::Assert,
            "if" => Self::If,
            "while" | "loop" => Self::While,
            "sequence" | "group" => Self::Sequence,
            _ => return None,
        };
        Some(kind)
    }
}

/// `Open-Page`, `open_page` e `OPENPAGE` viram `openpage`.
fn canonical_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c != '-' && *c != '_' && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

// ============================================================================
// ENTRADA PRINCIPAL
// ============================================================================

/// Parseia e normaliza o texto-fonte de um fluxo.
///
/// ## Retorno:
///
/// - `Ok(None)`: fonte vazia, nenhum fluxo configurado
/// - `Ok(Some(def))`: fluxo canônico e dentro dos limites
/// - `Err(FlowError)`: fonte grande demais, JSON quebrado ou step inválido
pub fn parse(source: &str) -> Result<Option<FlowDefinition>, FlowError> {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let length = source.chars().count();
    if length > MAX_FLOW_SOURCE_LENGTH {
        return Err(FlowError::SourceTooLong {
            length,
            max: MAX_FLOW_SOURCE_LENGTH,
        });
    }

    let value: Value =
        serde_json::from_str(trimmed).map_err(|e| FlowError::InvalidJson(e.to_string()))?;

    normalize_value(&value)
}

/// Normaliza um valor JSON já parseado.
///
/// `null` é tratado como fonte vazia; uma string é tratada como
/// texto-fonte (formato legado, onde o fluxo era salvo como string).
pub fn normalize_value(value: &Value) -> Result<Option<FlowDefinition>, FlowError> {
    match value {
        Value::Null => return Ok(None),
        Value::String(source) => return parse(source),
        _ => {}
    }

    let version = value
        .get("version")
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .unwrap_or(FLOW_DEFINITION_VERSION);

    let mut steps = Vec::new();
    collect_list(value, ROOT_PATH, 0, &mut steps)?;

    let step_count = count_steps(&steps);
    if step_count == 0 {
        return Err(FlowError::EmptyFlow);
    }
    if step_count > MAX_FLOW_STEPS {
        return Err(FlowError::TooManySteps {
            count: step_count,
            max: MAX_FLOW_STEPS,
        });
    }

    Ok(Some(FlowDefinition {
        version,
        steps,
        step_count,
    }))
}

// ============================================================================
// LISTAS E ENTRADAS
// ============================================================================

/// Lê uma lista de steps: array, objeto com `steps`, ou um step sozinho.
fn collect_list(
    value: &Value,
    list_path: &str,
    depth: usize,
    out: &mut Vec<Step>,
) -> Result<(), FlowError> {
    match value {
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                normalize_entry(item, &format!("{}[{}]", list_path, index), depth, out)?;
            }
            Ok(())
        }
        Value::Object(map) if !has_type(map) => match map.get("steps") {
            Some(steps) if steps.is_array() => collect_list(steps, list_path, depth, out),
            _ => Err(FlowError::MissingStepType {
                path: format!("{}[0]", list_path),
            }),
        },
        Value::Object(_) => normalize_entry(value, &format!("{}[0]", list_path), depth, out),
        other => Err(FlowError::InvalidEntry {
            path: list_path.to_string(),
            found: type_name(other),
        }),
    }
}

fn normalize_entry(
    item: &Value,
    path: &str,
    depth: usize,
    out: &mut Vec<Step>,
) -> Result<(), FlowError> {
    let map = match item {
        // Buracos em exportações antigas.
        Value::Null => return Ok(()),
        Value::Array(_) => return collect_list(item, path, depth, out),
        Value::Object(map) => map,
        other => {
            return Err(FlowError::InvalidEntry {
                path: path.to_string(),
                found: type_name(other),
            })
        }
    };

    if !has_type(map) {
        return match map.get("steps") {
            Some(steps) if steps.is_array() => {
                collect_list(steps, &format!("{}.steps", path), depth, out)
            }
            _ => Err(FlowError::MissingStepType {
                path: path.to_string(),
            }),
        };
    }

    let raw_kind = match lookup(map, &["type", "action"]) {
        Some((_, Value::String(kind))) => kind,
        Some((key, other)) => {
            return Err(FlowError::InvalidField {
                path: path.to_string(),
                field: key.to_string(),
                reason: format!("esperado texto, recebido {}", type_name(other)),
            })
        }
        None => {
            return Err(FlowError::MissingStepType {
                path: path.to_string(),
            })
        }
    };

    let kind = RawKind::from_name(raw_kind).ok_or_else(|| FlowError::UnknownStepType {
        path: path.to_string(),
        kind: raw_kind.clone(),
    })?;

    if kind == RawKind::Sequence {
        // Sequence não conta como step: os filhos entram na lista do pai.
        return match lookup(map, &["steps", "children"]) {
            Some((_, children)) => collect_list(children, &format!("{}.steps", path), depth, out),
            None => Err(FlowError::MissingField {
                path: path.to_string(),
                field: "steps",
            }),
        };
    }

    out.push(build_step(map, kind, path, depth)?);
    Ok(())
}

fn has_type(map: &Map<String, Value>) -> bool {
    map.contains_key("type") || map.contains_key("action")
}

// ============================================================================
// CONSTRUÇÃO DE STEPS
// ============================================================================

fn build_step(
    map: &Map<String, Value>,
    kind: RawKind,
    path: &str,
    depth: usize,
) -> Result<Step, FlowError> {
    let kind = match kind {
        RawKind::Click => StepKind::Click {
            selector: required_non_empty(map, &["selector"], "selector", path)?,
            all: read_bool(map, &["all", "multiple"]),
        },
        RawKind::Input => StepKind::Input {
            selector: required_non_empty(map, &["selector"], "selector", path)?,
            value: optional_text(map, &["value", "text"]).unwrap_or_default(),
        },
        RawKind::Wait => StepKind::Wait {
            ms: read_wait(map, path)?,
        },
        RawKind::Navigate => StepKind::Navigate {
            url: required_non_empty(map, &["url", "href"], "url", path)?,
            target: optional_text(map, &["target"]),
            page_key: optional_text(map, &["pageKey", "page_key"]),
            target_url: optional_text(map, &["targetUrl", "target_url"]),
        },
        RawKind::Log => StepKind::Log {
            message: optional_text(map, &["message", "text", "value"]).ok_or_else(|| {
                FlowError::MissingField {
                    path: path.to_string(),
                    field: "message",
                }
            })?,
        },
        RawKind::Assert => StepKind::Assert {
            condition: assert_condition(map, path)?,
            message: optional_text(map, &["message"]),
        },
        RawKind::If => {
            check_nesting(path, depth)?;
            StepKind::If {
                condition: required_condition(map, path)?,
                then_steps: nested_list(map, THEN_KEYS, path, "then", depth + 1)?,
                else_steps: nested_list(map, ELSE_KEYS, path, "else", depth + 1)?,
            }
        }
        RawKind::While => {
            check_nesting(path, depth)?;
            let condition = required_condition(map, path)?;
            let body_steps = nested_list(map, BODY_KEYS, path, "body", depth + 1)?;
            if count_steps(&body_steps) == 0 {
                return Err(FlowError::EmptyLoopBody {
                    path: path.to_string(),
                });
            }
            StepKind::While {
                condition,
                body_steps,
                max_iterations: read_iterations(map, path)?,
            }
        }
        RawKind::Sequence => unreachable!("sequence é expandida em normalize_entry"),
    };

    Ok(Step {
        id: optional_text(map, &["id"]).filter(|id| !id.trim().is_empty()),
        kind,
        timeout: read_timeout(map, path)?,
        retry: read_retry(map, path)?,
    })
}

fn check_nesting(path: &str, depth: usize) -> Result<(), FlowError> {
    if depth + 1 > MAX_FLOW_NESTING_DEPTH {
        return Err(FlowError::TooDeep {
            path: path.to_string(),
            max: MAX_FLOW_NESTING_DEPTH,
        });
    }
    Ok(())
}

fn nested_list(
    map: &Map<String, Value>,
    keys: &[&'static str],
    path: &str,
    label: &str,
    depth: usize,
) -> Result<Vec<Step>, FlowError> {
    let mut steps = Vec::new();
    if let Some((_, value)) = lookup(map, keys) {
        collect_list(value, &format!("{}.{}", path, label), depth, &mut steps)?;
    }
    Ok(steps)
}

// ============================================================================
// CONDIÇÕES
// ============================================================================

fn required_condition(map: &Map<String, Value>, path: &str) -> Result<Condition, FlowError> {
    match lookup(map, &["condition"]) {
        Some((_, value)) => normalize_condition(value, &format!("{}.condition", path), 0),
        None => Err(FlowError::MissingField {
            path: path.to_string(),
            field: "condition",
        }),
    }
}

/// `assert` aceita uma condição completa ou o atalho `selector` (+ `text`).
fn assert_condition(map: &Map<String, Value>, path: &str) -> Result<Condition, FlowError> {
    if map.get("condition").is_some_and(|v| !v.is_null()) {
        return required_condition(map, path);
    }

    let selector = required_non_empty(map, &["selector"], "selector", path)?;
    Ok(match optional_text(map, &["text", "contains"]) {
        Some(value) => Condition::TextContains { selector, value },
        None => Condition::Exists { selector },
    })
}

fn normalize_condition(value: &Value, path: &str, depth: usize) -> Result<Condition, FlowError> {
    if depth >= MAX_FLOW_NESTING_DEPTH {
        return Err(FlowError::TooDeep {
            path: path.to_string(),
            max: MAX_FLOW_NESTING_DEPTH,
        });
    }

    let map = match value {
        Value::String(selector) if !selector.trim().is_empty() => {
            return Ok(Condition::exists(selector.trim()));
        }
        Value::Object(map) => map,
        other => {
            return Err(FlowError::InvalidField {
                path: path.to_string(),
                field: "condition".to_string(),
                reason: format!("esperado objeto ou seletor, recebido {}", type_name(other)),
            })
        }
    };

    let raw_kind = match lookup(map, &["type", "kind"]) {
        Some((_, Value::String(kind))) => kind.as_str(),
        Some((key, other)) => {
            return Err(FlowError::InvalidField {
                path: path.to_string(),
                field: key.to_string(),
                reason: format!("esperado texto, recebido {}", type_name(other)),
            })
        }
        // `{ "selector": "#a" }` sem tipo é um exists.
        None if map.contains_key("selector") => "exists",
        None => {
            return Err(FlowError::MissingField {
                path: path.to_string(),
                field: "type",
            })
        }
    };

    match canonical_name(raw_kind).as_str() {
        "exists" | "elementexists" => Ok(Condition::Exists {
            selector: required_non_empty(map, &["selector"], "selector", path)?,
        }),
        "not" => {
            let (_, operand) =
                lookup(map, &["operand", "condition"]).ok_or_else(|| FlowError::MissingField {
                    path: path.to_string(),
                    field: "operand",
                })?;
            let operand = normalize_condition(operand, &format!("{}.operand", path), depth + 1)?;
            Ok(Condition::Not {
                operand: Box::new(operand),
            })
        }
        "textcontains" | "containstext" => Ok(Condition::TextContains {
            selector: required_non_empty(map, &["selector"], "selector", path)?,
            value: optional_text(map, &["value", "text"]).ok_or_else(|| FlowError::MissingField {
                path: path.to_string(),
                field: "value",
            })?,
        }),
        "attributeequals" | "attrequals" => Ok(Condition::AttributeEquals {
            selector: required_non_empty(map, &["selector"], "selector", path)?,
            name: required_non_empty(map, &["name", "attribute"], "name", path)?,
            value: optional_text(map, &["value"]).ok_or_else(|| FlowError::MissingField {
                path: path.to_string(),
                field: "value",
            })?,
        }),
        _ => Err(FlowError::UnknownConditionType {
            path: path.to_string(),
            kind: raw_kind.to_string(),
        }),
    }
}

// ============================================================================
// LEITURA DE CAMPOS
// ============================================================================

/// Primeiro alias presente e não-nulo.
fn lookup<'a>(
    map: &'a Map<String, Value>,
    keys: &[&'static str],
) -> Option<(&'static str, &'a Value)> {
    keys.iter()
        .find_map(|key| map.get(*key).filter(|v| !v.is_null()).map(|v| (*key, v)))
}

/// Texto, aceitando números e booleanos (`"value": 42` vira `"42"`).
fn optional_text(map: &Map<String, Value>, keys: &[&'static str]) -> Option<String> {
    lookup(map, keys).and_then(|(_, value)| match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

fn required_non_empty(
    map: &Map<String, Value>,
    keys: &[&'static str],
    field: &'static str,
    path: &str,
) -> Result<String, FlowError> {
    match optional_text(map, keys) {
        Some(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
        _ => Err(FlowError::MissingField {
            path: path.to_string(),
            field,
        }),
    }
}

fn read_bool(map: &Map<String, Value>, keys: &[&'static str]) -> bool {
    match lookup(map, keys) {
        Some((_, Value::Bool(b))) => *b,
        Some((_, Value::String(s))) => s.trim().eq_ignore_ascii_case("true"),
        Some((_, Value::Number(n))) => n.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    }
}

/// Número finito, aceitando strings numéricas.
fn read_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

/// Lê um número não-negativo; `None` se o campo não existe.
fn read_non_negative(
    map: &Map<String, Value>,
    keys: &[&'static str],
    path: &str,
) -> Result<Option<f64>, FlowError> {
    let Some((key, value)) = lookup(map, keys) else {
        return Ok(None);
    };

    let invalid = |reason: &str| FlowError::InvalidField {
        path: path.to_string(),
        field: key.to_string(),
        reason: reason.to_string(),
    };

    let number = read_number(value).ok_or_else(|| invalid("precisa ser um número finito"))?;
    if number < 0.0 {
        return Err(invalid("não pode ser negativo"));
    }
    Ok(Some(number))
}

fn read_wait(map: &Map<String, Value>, path: &str) -> Result<u64, FlowError> {
    let ms = read_non_negative(map, WAIT_KEYS, path)?.ok_or_else(|| FlowError::MissingField {
        path: path.to_string(),
        field: "ms",
    })?;
    // Acima do teto é truncado, não rejeitado.
    Ok((ms.round() as u64).min(MAX_FLOW_WAIT_MS))
}

fn read_timeout(map: &Map<String, Value>, path: &str) -> Result<Option<u64>, FlowError> {
    let timeout = read_non_negative(map, TIMEOUT_KEYS, path)?.map(|ms| ms.round() as u64);
    // Zero significa "sem timeout".
    Ok(timeout.filter(|ms| *ms > 0))
}

fn read_retry(map: &Map<String, Value>, path: &str) -> Result<Option<u32>, FlowError> {
    let retry = read_non_negative(map, RETRY_KEYS, path)?;
    Ok(retry.map(|n| (n.round() as u64).min(MAX_STEP_RETRIES as u64) as u32))
}

fn read_iterations(map: &Map<String, Value>, path: &str) -> Result<u32, FlowError> {
    let Some((key, value)) = lookup(map, ITERATION_KEYS) else {
        return Ok(DEFAULT_FLOW_ITERATIONS);
    };

    let requested = read_number(value).ok_or_else(|| FlowError::InvalidField {
        path: path.to_string(),
        field: key.to_string(),
        reason: "precisa ser um número finito".to_string(),
    })?;

    let clamped = requested.round().clamp(1.0, MAX_FLOW_ITERATIONS as f64);
    Ok(clamped as u32)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "booleano",
        Value::Number(_) => "número",
        Value::String(_) => "texto",
        Value::Array(_) => "lista",
        Value::Object(_) => "objeto",
    }
}

// ============================================================================
// TESTES
// ============================================================================
