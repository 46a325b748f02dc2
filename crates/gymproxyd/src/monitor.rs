use std::sync::Arc;

use gymproxy_core::ConnId;
use gymproxy_ipc::LifecycleEvent;
use tokio::{sync::mpsc, task};
use tracing::{info, warn};

use crate::{
    counter::OpCounter,
    session::{Admission, EnvSlot, SessionState},
};

/// Applies connect/disconnect events to the session state.
#[derive(Clone)]
pub struct LifecycleMonitor {
    state: Arc<SessionState>,
    ops: Arc<OpCounter>,
}

impl LifecycleMonitor {
    pub fn new(state: Arc<SessionState>, ops: Arc<OpCounter>) -> Self {
        Self { state, ops }
    }

    /// Consumes events until every sender is gone.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<LifecycleEvent>) {
        info!("lifecycle monitor running");
        while let Some(event) = events.recv().await {
            self.apply(event).await;
        }
    }

    pub async fn apply(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Accepted { conn, peer } => {
                info!(%conn, %peer, "client connected");
                admit(&self.state, &self.ops, conn).await;
            }
            LifecycleEvent::Disconnected { conn } => {
                info!(%conn, "client disconnected");
                match self.state.on_disconnected(conn) {
                    Ok(Some(slot)) => release(conn, slot, "client went away").await,
                    Ok(None) => {}
                    Err(err) => warn!(%conn, error = %err, "failed to tear down session"),
                }
            }
        }
    }
}

/// Gives `conn` a fresh start the first time it is seen, releasing any
/// session left behind by an older connection.
pub async fn admit(state: &SessionState, ops: &OpCounter, conn: ConnId) {
    match state.on_accepted(conn) {
        Ok(Admission::Admitted { replaced }) => {
            ops.reset();
            if let Some(slot) = replaced {
                release(conn, slot, "replaced by new connection").await;
            }
        }
        Ok(Admission::AlreadySeen) => {}
        Err(err) => warn!(%conn, error = %err, "failed to reset session on connect"),
    }
}

// Waits for any in-flight environment call before closing.
async fn release(conn: ConnId, slot: Arc<EnvSlot>, reason: &'static str) {
    match task::spawn_blocking(move || slot.close()).await {
        Ok(true) => info!(%conn, reason, "released abandoned env"),
        Ok(false) => {}
        Err(err) => warn!(%conn, error = %err, "env close panicked"),
    }
}
