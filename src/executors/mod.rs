//! # Módulo de Executores
//!
//! Registro dos executores remotos, um por aba.
//!
//! O executor é o script injetado na página que realmente clica, digita e
//! avalia condições. O coordenador só precisa saber se há um vivo na aba e,
//! opcionalmente, quais tipos de step ele declara suportar.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::TabId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorRegistration {
    pub tab_id: TabId,
    pub page_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Value>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutorRegistration {
    /// Checks if this executor is responsible for the given step type.
    ///
    /// Sem `capabilities.steps` declarado, o executor aceita qualquer step.
    pub fn can_handle(&self, kind: &str) -> bool {
        match self
            .capabilities
            .as_ref()
            .and_then(|caps| caps.get("steps"))
            .and_then(Value::as_array)
        {
            Some(kinds) => kinds
                .iter()
                .filter_map(Value::as_str)
                .any(|k| k.eq_ignore_ascii_case(kind)),
            None => true,
        }
    }
}

#[derive(Debug, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<TabId, ExecutorRegistration>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra (ou re-registra) o executor de uma aba. O último vence.
    pub fn register(
        &mut self,
        tab_id: TabId,
        page_key: Option<String>,
        page_url: Option<String>,
        capabilities: Option<Value>,
    ) -> ExecutorRegistration {
        let registration = ExecutorRegistration {
            tab_id,
            page_key,
            page_url,
            capabilities,
            updated_at: Utc::now(),
        };
        self.executors.insert(tab_id, registration.clone());
        registration
    }

    pub fn get(&self, tab_id: TabId) -> Option<&ExecutorRegistration> {
        self.executors.get(&tab_id)
    }

    pub fn is_registered(&self, tab_id: TabId) -> bool {
        self.executors.contains_key(&tab_id)
    }

    pub fn remove(&mut self, tab_id: TabId) -> Option<ExecutorRegistration> {
        self.executors.remove(&tab_id)
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }
}
