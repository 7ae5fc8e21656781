// Timers por fluxo: um de step e um de navegação, cada um com geração.
//
// Armar um timer aborta o anterior do mesmo tipo e incrementa a geração;
// um disparo cuja geração não é a atual é descartado pelo coordenador.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::CoordinatorEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerKind {
    /// Resposta do executor ao `RUN_STEP`.
    Step,
    /// Navegação na mesma aba ou espera por elemento.
    Navigation,
}

struct ArmedTimer {
    generation: u64,
    task: JoinHandle<()>,
}

pub struct FlowTimers {
    events: mpsc::UnboundedSender<CoordinatorEvent>,
    armed: HashMap<(String, TimerKind), ArmedTimer>,
    next_generation: u64,
}

impl FlowTimers {
    pub fn new(events: mpsc::UnboundedSender<CoordinatorEvent>) -> Self {
        Self {
            events,
            armed: HashMap::new(),
            next_generation: 0,
        }
    }

    /// Arma (ou re-arma) o timer `kind` do fluxo. Devolve a geração nova.
    pub fn arm(&mut self, flow_id: &str, kind: TimerKind, after: Duration) -> u64 {
        self.clear(flow_id, kind);

        self.next_generation += 1;
        let generation = self.next_generation;
        let events = self.events.clone();
        let fired_flow = flow_id.to_string();

        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = events.send(CoordinatorEvent::TimerFired {
                flow_id: fired_flow,
                kind,
                generation,
            });
        });

        debug!(flow_id = %flow_id, kind = ?kind, generation, after_ms = after.as_millis() as u64, "Timer armado");
        self.armed
            .insert((flow_id.to_string(), kind), ArmedTimer { generation, task });
        generation
    }

    pub fn clear(&mut self, flow_id: &str, kind: TimerKind) {
        if let Some(timer) = self.armed.remove(&(flow_id.to_string(), kind)) {
            timer.task.abort();
        }
    }

    pub fn clear_all(&mut self, flow_id: &str) {
        self.clear(flow_id, TimerKind::Step);
        self.clear(flow_id, TimerKind::Navigation);
    }

    /// Consome o disparo se ele é o timer atual; `false` para disparos velhos.
    pub fn take_if_current(&mut self, flow_id: &str, kind: TimerKind, generation: u64) -> bool {
        let key = (flow_id.to_string(), kind);
        match self.armed.get(&key) {
            Some(timer) if timer.generation == generation => {
                self.armed.remove(&key);
                true
            }
            _ => false,
        }
    }

    #[cfg(test)]
    pub fn is_armed(&self, flow_id: &str, kind: TimerKind) -> bool {
        self.armed.contains_key(&(flow_id.to_string(), kind))
    }
}

impl Drop for FlowTimers {
    fn drop(&mut self) {
        for timer in self.armed.values() {
            timer.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fired(event: CoordinatorEvent) -> (String, TimerKind, u64) {
        match event {
            CoordinatorEvent::TimerFired {
                flow_id,
                kind,
                generation,
            } => (flow_id, kind, generation),
            _ => panic!("evento inesperado"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_cancels_previous_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = FlowTimers::new(tx);

        let first = timers.arm("f", TimerKind::Step, Duration::from_millis(100));
        let second = timers.arm("f", TimerKind::Step, Duration::from_millis(300));
        assert_ne!(first, second);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let (flow_id, kind, generation) = fired(rx.try_recv().unwrap());
        assert_eq!((flow_id.as_str(), kind, generation), ("f", TimerKind::Step, second));
        assert!(timers.take_if_current("f", TimerKind::Step, generation));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_kinds_are_independent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = FlowTimers::new(tx);

        timers.arm("f", TimerKind::Step, Duration::from_millis(100));
        timers.arm("f", TimerKind::Navigation, Duration::from_millis(100));
        timers.clear("f", TimerKind::Step);

        tokio::time::sleep(Duration::from_millis(150)).await;
        let (_, kind, _) = fired(rx.try_recv().unwrap());
        assert_eq!(kind, TimerKind::Navigation);
        assert!(timers.is_armed("f", TimerKind::Navigation));
        assert!(!timers.is_armed("f", TimerKind::Step));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_generation_is_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut timers = FlowTimers::new(tx);

        let old = timers.arm("f", TimerKind::Navigation, Duration::from_secs(1));
        let current = timers.arm("f", TimerKind::Navigation, Duration::from_secs(1));

        assert!(!timers.take_if_current("f", TimerKind::Navigation, old));
        assert!(timers.take_if_current("f", TimerKind::Navigation, current));
        assert!(!timers.take_if_current("f", TimerKind::Navigation, current));
    }
}
