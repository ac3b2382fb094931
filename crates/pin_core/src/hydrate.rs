//! Hydration gate: defers stateful startup until the host environment can
//! safely read persisted state and render interactively.

use anyhow::{Context, Result};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    NotReady,
    Ready,
}

/// Explicit two-state gate. Dependents hold a [`HydrationWatch`] and suspend
/// on the `NotReady -> Ready` transition instead of re-checking a flag.
pub struct HydrationGate {
    tx: watch::Sender<GateState>,
}

impl HydrationGate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(GateState::NotReady);
        Self { tx }
    }

    /// Opens the gate. Idempotent; there is no way back to `NotReady`.
    pub fn open(&self) {
        self.tx.send_replace(GateState::Ready);
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow() == GateState::Ready
    }

    pub fn watch(&self) -> HydrationWatch {
        HydrationWatch {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for HydrationGate {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct HydrationWatch {
    rx: watch::Receiver<GateState>,
}

impl HydrationWatch {
    /// Suspends until the gate opens. Errors only if the gate was dropped
    /// while still closed, which means the host tore down before hydrating.
    pub async fn ready(&mut self) -> Result<()> {
        self.rx
            .wait_for(|state| *state == GateState::Ready)
            .await
            .context("hydration gate dropped before opening")?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/hydrate_tests.rs"]
mod tests;
