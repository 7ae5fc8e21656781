//! # Módulo de Carregamento - Leitura de Fluxos do Disco
//!
//! Lê definições de fluxo em JSON e passa pelo mesmo normalizador usado
//! nas mensagens (`validation::parse`), então um arquivo aceito aqui é
//! aceito em um `RUN_FLOW` e vice-versa.
//!
//! ## Exemplo de uso:
//!
//! ```ignore
//! let definition = load_flow_from_file("./flows/login.json")?;
//! println!("Steps: {}", definition.step_count);
//!
//! // Diretório com <flowId>.json
//! let catalog = load_catalog_dir("./flows")?;
//! ```

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::debug;

use crate::flow::catalog::FlowCatalog;
use crate::flow::FlowDefinition;
use crate::validation;

/// Carrega e valida um fluxo de um arquivo JSON.
///
/// ## Exemplos de erro:
/// - "Failed to read flow file" → arquivo não existe ou sem permissão
/// - "Invalid flow definition" → JSON malformado ou step inválido
/// - "Flow file is empty" → nenhum step configurado
pub fn load_flow_from_file<P: AsRef<Path>>(path: P) -> Result<FlowDefinition> {
    let path_ref = path.as_ref();

    let content = fs::read_to_string(path_ref)
        .with_context(|| format!("Failed to read flow file {:?}", path_ref))?;

    match validation::parse(&content)
        .with_context(|| format!("Invalid flow definition {:?}", path_ref))?
    {
        Some(definition) => Ok(definition),
        None => bail!("Flow file is empty {:?}", path_ref),
    }
}

/// Carrega todos os `<flowId>.json` de um diretório para um catálogo.
///
/// Qualquer arquivo inválido aborta o carregamento inteiro.
pub fn load_catalog_dir<P: AsRef<Path>>(dir: P) -> Result<FlowCatalog> {
    let dir = dir.as_ref();
    let entries =
        fs::read_dir(dir).with_context(|| format!("Failed to read flow directory {:?}", dir))?;

    let mut catalog = FlowCatalog::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("Failed to list flow directory {:?}", dir))?
            .path();

        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(flow_id) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        let definition = load_flow_from_file(&path)?;
        debug!(flow_id = %flow_id, steps = definition.step_count, "Fluxo carregado do disco");
        catalog.insert(flow_id, definition);
    }
    Ok(catalog)
}
