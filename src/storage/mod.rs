//! # Módulo de Persistência de Sessões
//!
//! Guarda o snapshot de cada sessão para que um restart do coordenador
//! (service worker suspenso, processo reiniciado) consiga retomar os fluxos.
//!
//! ## Write-behind
//!
//! O loop de eventos nunca espera o disco. Cada alteração é enfileirada
//! para um worker que agrupa escritas:
//!
//! ```text
//! update() ──Put──► [pendentes por flowId] ──(50ms ou Flush)──► store.save()
//! ```
//!
//! - Várias alterações do mesmo fluxo dentro da janela viram uma escrita.
//! - `flush()` força a escrita e devolve o resultado.
//! - Falhas são logadas; as sessões continuam pendentes e uma nova escrita é
//!   agendada com espera dobrando até `MAX_RETRY_DELAY`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::protocol::FlowSession;

/// Espera entre tentativas depois de uma escrita que falhou.
const MIN_RETRY_DELAY: Duration = Duration::from_millis(50);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

// ============================================================================
// STORE
// ============================================================================

/// Backend de armazenamento de sessões, chaveado por flowId.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self) -> Result<HashMap<String, FlowSession>>;

    /// Grava (upsert) as sessões informadas, preservando as demais.
    async fn save(&self, sessions: Vec<FlowSession>) -> Result<()>;
}

/// Um único documento JSON `{ flowId: session }` no disco.
///
/// A escrita vai para um arquivo temporário e depois é renomeada, então um
/// crash no meio nunca deixa o documento pela metade.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_document(&self) -> Result<HashMap<String, FlowSession>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read session store {:?}", self.path))
            }
        };

        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }

        let raw: HashMap<String, Value> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse session store {:?}", self.path))?;

        let mut sessions = HashMap::with_capacity(raw.len());
        for (flow_id, value) in raw {
            match serde_json::from_value::<FlowSession>(value) {
                Ok(session) => {
                    sessions.insert(flow_id, session);
                }
                Err(e) => warn!(flow_id = %flow_id, error = %e, "Sessão corrompida ignorada"),
            }
        }
        Ok(sessions)
    }
}

#[async_trait]
impl SessionStore for JsonFileStore {
    async fn load(&self) -> Result<HashMap<String, FlowSession>> {
        self.read_document().await
    }

    async fn save(&self, sessions: Vec<FlowSession>) -> Result<()> {
        let mut document = match self.read_document().await {
            Ok(doc) => doc,
            // Erro de leitura: o lote fica pendente, nada é sobrescrito.
            Err(e) if e.downcast_ref::<serde_json::Error>().is_none() => return Err(e),
            Err(e) => {
                let aside = self.path.with_extension("corrupt");
                warn!(error = %e, moved_to = ?aside, "Documento de sessões ilegível, movido de lado");
                tokio::fs::rename(&self.path, &aside)
                    .await
                    .with_context(|| format!("Failed to move {:?} aside", self.path))?;
                HashMap::new()
            }
        };
        for session in sessions {
            document.insert(session.flow_id.clone(), session);
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let json = serde_json::to_string_pretty(&document).context("Failed to serialize sessions")?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {:?}", tmp))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {:?}", self.path))?;
        Ok(())
    }
}

/// Store em memória. Usado quando o host não pede persistência e nos testes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<String, FlowSession>>,
    failing: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl MemoryStore {
    pub fn with_sessions(sessions: impl IntoIterator<Item = FlowSession>) -> Self {
        let store = Self::default();
        if let Ok(mut map) = store.sessions.lock() {
            map.extend(sessions.into_iter().map(|s| (s.flow_id.clone(), s)));
        }
        store
    }

    /// Faz `save` falhar até ser desligado.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Quantas escritas bem-sucedidas aconteceram.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn get(&self, flow_id: &str) -> Option<FlowSession> {
        self.sessions.lock().ok()?.get(flow_id).cloned()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load(&self) -> Result<HashMap<String, FlowSession>> {
        let map = self
            .sessions
            .lock()
            .map_err(|_| anyhow!("session store lock poisoned"))?;
        Ok(map.clone())
    }

    async fn save(&self, sessions: Vec<FlowSession>) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("armazenamento indisponível"));
        }
        let mut map = self
            .sessions
            .lock()
            .map_err(|_| anyhow!("session store lock poisoned"))?;
        for session in sessions {
            map.insert(session.flow_id.clone(), session);
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// WRITE-BEHIND
// ============================================================================

enum PersistCommand {
    Put(Box<FlowSession>),
    Flush(oneshot::Sender<Result<()>>),
    Shutdown,
}

#[derive(Clone)]
pub struct PersistHandle {
    tx: mpsc::UnboundedSender<PersistCommand>,
}

impl PersistHandle {
    /// Enfileira o snapshot. Nunca bloqueia.
    pub fn put(&self, session: FlowSession) {
        if self.tx.send(PersistCommand::Put(Box::new(session))).is_err() {
            warn!("Worker de persistência encerrado, snapshot descartado");
        }
    }

    /// Grava tudo que está pendente e devolve o resultado da escrita.
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(PersistCommand::Flush(tx))
            .map_err(|_| anyhow!("persist worker stopped"))?;
        rx.await.map_err(|_| anyhow!("persist worker stopped"))?
    }

    /// Pede ao worker uma última escrita e o encerramento.
    pub fn shutdown(&self) {
        let _ = self.tx.send(PersistCommand::Shutdown);
    }
}

/// Inicia o worker de write-behind sobre `store`.
pub fn spawn_write_behind(
    store: Arc<dyn SessionStore>,
    debounce: Duration,
) -> (PersistHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let worker = tokio::spawn(async move {
        let mut pending: HashMap<String, FlowSession> = HashMap::new();
        let mut deadline: Option<Instant> = None;
        let mut retry_delay = debounce;

        loop {
            let command = match deadline {
                Some(at) => tokio::select! {
                    command = rx.recv() => command,
                    _ = sleep_until(at) => {
                        deadline = None;
                        if write_pending(store.as_ref(), &mut pending).await.is_err() {
                            retry_delay = (retry_delay * 2).clamp(MIN_RETRY_DELAY, MAX_RETRY_DELAY);
                            deadline = Some(Instant::now() + retry_delay);
                        } else {
                            retry_delay = debounce;
                        }
                        continue;
                    }
                },
                None => rx.recv().await,
            };

            match command {
                Some(PersistCommand::Put(session)) => {
                    pending.insert(session.flow_id.clone(), *session);
                    if deadline.is_none() {
                        deadline = Some(Instant::now() + debounce);
                    }
                }
                Some(PersistCommand::Flush(reply)) => {
                    let result = write_pending(store.as_ref(), &mut pending).await;
                    deadline = if result.is_err() {
                        retry_delay = retry_delay.clamp(MIN_RETRY_DELAY, MAX_RETRY_DELAY);
                        Some(Instant::now() + retry_delay)
                    } else {
                        retry_delay = debounce;
                        None
                    };
                    let _ = reply.send(result);
                }
                Some(PersistCommand::Shutdown) | None => {
                    let _ = write_pending(store.as_ref(), &mut pending).await;
                    debug!("Worker de persistência encerrado");
                    break;
                }
            }
        }
    });

    (PersistHandle { tx }, worker)
}

async fn write_pending(
    store: &dyn SessionStore,
    pending: &mut HashMap<String, FlowSession>,
) -> Result<()> {
    if pending.is_empty() {
        return Ok(());
    }

    let batch: Vec<FlowSession> = pending.values().cloned().collect();
    let count = batch.len();
    match store.save(batch).await {
        Ok(()) => {
            pending.clear();
            debug!(sessions = count, "Sessões persistidas");
            Ok(())
        }
        Err(e) => {
            warn!(sessions = count, error = %e, "Falha ao persistir sessões");
            Err(e)
        }
    }
}
