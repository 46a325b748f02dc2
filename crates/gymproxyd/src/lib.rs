//! Proxy server that hosts one environment session per endpoint.

pub mod counter;
pub mod dispatch;
pub mod handlers;
pub mod monitor;
pub mod session;
pub mod toy;

use std::sync::Arc;

use gymproxy_core::{ConnId, EnvironmentFactory, Map, ProxyError, Request};
use gymproxy_ipc::{IpcError, LifecycleEvent, ProxyListener};
use tokio::sync::mpsc;

use counter::OpCounter;
use dispatch::ProxyDispatcher;
use handlers::Handler;
use monitor::LifecycleMonitor;
use session::SessionState;

/// Session state, request handlers, and lifecycle monitor for one endpoint.
#[derive(Clone)]
pub struct ProxyServer {
    state: Arc<SessionState>,
    ops: Arc<OpCounter>,
    handler: Handler,
    monitor: LifecycleMonitor,
}

impl ProxyServer {
    pub fn new(factory: Arc<dyn EnvironmentFactory>, ops: OpCounter) -> Self {
        let state = Arc::new(SessionState::new());
        let ops = Arc::new(ops);
        Self {
            handler: Handler::new(Arc::clone(&state), factory, Arc::clone(&ops)),
            monitor: LifecycleMonitor::new(Arc::clone(&state), Arc::clone(&ops)),
            state,
            ops,
        }
    }

    /// Server backed by the built-in environment registry.
    pub fn builtin(ops: OpCounter) -> Self {
        Self::new(Arc::new(toy::make_builtin), ops)
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Runs one typed request as if it arrived on `conn`.
    pub async fn handle(&self, conn: ConnId, request: Request) -> Result<Map, ProxyError> {
        self.handler.admit(conn).await;
        self.handler.handle(conn, request).await
    }

    /// Applies a lifecycle event synchronously.
    pub async fn on_event(&self, event: LifecycleEvent) {
        self.monitor.apply(event).await;
    }

    /// Serves `listener` until the accept loop fails.
    pub async fn serve(&self, listener: ProxyListener) -> Result<(), IpcError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(self.monitor.clone().run(events_rx));

        gymproxy_ipc::serve(listener, Arc::new(self.dispatcher()), events_tx).await
    }

    /// Untyped request entry point used by the transport.
    pub fn dispatcher(&self) -> ProxyDispatcher {
        ProxyDispatcher::new(
            self.handler.clone(),
            Arc::clone(&self.state),
            Arc::clone(&self.ops),
        )
    }
}
