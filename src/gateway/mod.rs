//! # Módulo de Gateway
//!
//! Entrega de mensagens do coordenador para os frames de uma aba.
//!
//! Em um navegador isso seria `tabs.sendMessage`; aqui é um trait para que o
//! coordenador não saiba qual transporte está do outro lado.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::protocol::{FrameId, OutboundMessage, TabId};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Canal de saída fechado")]
    Closed,

    #[error("Falha ao serializar mensagem: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Confirmação de entrega de uma mensagem.
#[derive(Debug, Clone, PartialEq)]
pub struct Ack {
    pub message_id: Uuid,
}

impl Ack {
    fn new() -> Self {
        Self {
            message_id: Uuid::new_v4(),
        }
    }
}

#[async_trait]
pub trait MessageGateway: Send + Sync {
    /// Envia para um frame específico, ou para todos os frames se `frame_id` for `None`.
    async fn send(
        &self,
        tab_id: TabId,
        frame_id: Option<FrameId>,
        message: &OutboundMessage,
    ) -> Result<Ack, GatewayError>;

    async fn broadcast(&self, tab_id: TabId, message: &OutboundMessage) -> Result<Ack, GatewayError> {
        self.send(tab_id, None, message).await
    }
}

// ============================================================================
// LINHAS JSON (STDIO)
// ============================================================================

/// Fila de linhas JSON para um escritor assíncrono.
#[derive(Debug, Clone)]
pub struct LineSink {
    tx: mpsc::UnboundedSender<String>,
}

impl LineSink {
    pub fn emit<T: Serialize>(&self, value: &T) -> Result<(), GatewayError> {
        let line = serde_json::to_string(value)?;
        self.tx.send(line).map_err(|_| GatewayError::Closed)
    }
}

/// Inicia a tarefa que escreve cada linha em `writer`, com flush por linha.
pub fn spawn_line_writer<W>(mut writer: W) -> (LineSink, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let task = tokio::spawn(async move {
        while let Some(mut line) = rx.recv().await {
            line.push('\n');
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                warn!(error = %e, "Falha ao escrever linha de saída");
                break;
            }
            if let Err(e) = writer.flush().await {
                warn!(error = %e, "Falha ao dar flush na saída");
                break;
            }
        }
        debug!("Escritor de linhas encerrado");
    });
    (LineSink { tx }, task)
}

/// Gateway que publica cada mensagem como uma linha `SEND` para o host,
/// que é quem conhece os frames de verdade.
#[derive(Debug, Clone)]
pub struct StdioGateway {
    sink: LineSink,
}

impl StdioGateway {
    pub fn new(sink: LineSink) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl MessageGateway for StdioGateway {
    async fn send(
        &self,
        tab_id: TabId,
        frame_id: Option<FrameId>,
        message: &OutboundMessage,
    ) -> Result<Ack, GatewayError> {
        let ack = Ack::new();
        self.sink.emit(&json!({
            "type": "SEND",
            "messageId": ack.message_id,
            "tabId": tab_id,
            "frameId": frame_id,
            "message": message,
        }))?;
        Ok(ack)
    }
}

// ============================================================================
// GATEWAY EM MEMÓRIA (TESTES)
// ============================================================================

#[cfg(test)]
pub use memory::MemoryGateway;
