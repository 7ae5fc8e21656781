//! # Registro de Sessões
//!
//! Dono do estado vivo de cada fluxo (`FlowSession`), chaveado por flowId.
//!
//! Toda alteração passa por `insert`/`update`, que:
//! 1. carimba `updated_at`;
//! 2. enfileira o snapshot no write-behind (`storage`);
//! 3. publica o snapshot para quem assina (`subscribe`).
//!
//! O storage só é lido uma vez, de forma preguiçosa, na primeira mensagem
//! depois de um restart (`ensure_hydrated`).

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::protocol::{FlowSession, TabId};
use crate::storage::{PersistHandle, SessionStore};

const SNAPSHOT_CHANNEL_CAPACITY: usize = 256;

pub struct SessionRegistry {
    sessions: HashMap<String, FlowSession>,
    store: Arc<dyn SessionStore>,
    persist: PersistHandle,
    snapshots: broadcast::Sender<FlowSession>,
    hydrated: bool,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn SessionStore>, persist: PersistHandle) -> Self {
        let (snapshots, _) = broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY);
        Self {
            sessions: HashMap::new(),
            store,
            persist,
            snapshots,
            hydrated: false,
        }
    }

    /// Carrega as sessões persistidas na primeira chamada.
    ///
    /// Devolve os flowIds recuperados (vazio nas chamadas seguintes). Uma
    /// falha de leitura é logada e o registro segue vazio.
    pub async fn ensure_hydrated(&mut self) -> Vec<String> {
        if self.hydrated {
            return Vec::new();
        }
        self.hydrated = true;

        let loaded = match self.store.load().await {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(error = %e, "Falha ao carregar sessões persistidas");
                return Vec::new();
            }
        };

        let mut recovered = Vec::new();
        for (flow_id, mut session) in loaded {
            if self.sessions.contains_key(&flow_id) {
                continue;
            }
            session.recovered = true;
            recovered.push(flow_id.clone());
            self.sessions.insert(flow_id, session);
        }

        if !recovered.is_empty() {
            info!(sessions = recovered.len(), "Sessões recuperadas do storage");
        }
        recovered
    }

    pub fn get(&self, flow_id: &str) -> Option<&FlowSession> {
        self.sessions.get(flow_id)
    }

    /// Cria ou substitui a sessão inteira.
    pub fn insert(&mut self, mut session: FlowSession) -> FlowSession {
        session.updated_at = Utc::now();
        self.commit(&session);
        self.sessions.insert(session.flow_id.clone(), session.clone());
        session
    }

    /// Aplica `mutate` à sessão existente e devolve o snapshot resultante.
    pub fn update<F>(&mut self, flow_id: &str, mutate: F) -> Option<FlowSession>
    where
        F: FnOnce(&mut FlowSession),
    {
        let session = self.sessions.get_mut(flow_id)?;
        mutate(session);
        session.updated_at = Utc::now();
        let snapshot = session.clone();
        self.commit(&snapshot);
        Some(snapshot)
    }

    /// flowIds das sessões ligadas a uma aba.
    pub fn ids_for_tab(&self, tab_id: TabId) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sessions
            .values()
            .filter(|s| s.tab_id == tab_id)
            .map(|s| s.flow_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowSession> {
        self.snapshots.subscribe()
    }

    pub async fn flush(&self) -> Result<()> {
        self.persist.flush().await
    }

    fn commit(&self, snapshot: &FlowSession) {
        self.persist.put(snapshot.clone());
        // Sem assinantes o envio falha; não é erro.
        let _ = self.snapshots.send(snapshot.clone());
    }
}
