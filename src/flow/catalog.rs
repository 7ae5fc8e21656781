// Catálogo de definições conhecidas, indexado por flowId.
// Alimentado por DEFINE_FLOW e pelo carregamento de diretório na CLI.

use std::collections::HashMap;

use super::FlowDefinition;

#[derive(Debug, Default)]
pub struct FlowCatalog {
    flows: HashMap<String, FlowDefinition>,
}

impl FlowCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra (ou substitui) a definição de um fluxo.
    pub fn insert(&mut self, flow_id: impl Into<String>, definition: FlowDefinition) {
        self.flows.insert(flow_id.into(), definition);
    }

    pub fn get(&self, flow_id: &str) -> Option<&FlowDefinition> {
        self.flows.get(flow_id)
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}
