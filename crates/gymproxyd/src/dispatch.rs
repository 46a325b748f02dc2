use std::sync::Arc;

use async_trait::async_trait;
use gymproxy_core::{ConnId, Request, RpcReply, RpcRequest};
use gymproxy_ipc::RequestHandler;

use crate::{counter::OpCounter, handlers::Handler, session::SessionState};

/// Bridges the transport's request loop to typed handlers.
pub struct ProxyDispatcher {
    handler: Handler,
    state: Arc<SessionState>,
    ops: Arc<OpCounter>,
}

impl ProxyDispatcher {
    pub fn new(handler: Handler, state: Arc<SessionState>, ops: Arc<OpCounter>) -> Self {
        Self {
            handler,
            state,
            ops,
        }
    }

    fn record_op(&self) {
        if let Some(ops) = self.ops.record() {
            let env_name = self
                .state
                .snapshot()
                .ok()
                .flatten()
                .map(|info| info.env_name);
            tracing::info!(env_name = ?env_name, ops, "progress");
        }
    }
}

#[async_trait]
impl RequestHandler for ProxyDispatcher {
    async fn handle(&self, conn: ConnId, req: RpcRequest) -> RpcReply {
        self.handler.admit(conn).await;
        let method = req.method.clone();
        let result = match Request::try_from(req) {
            Ok(request) => {
                tracing::debug!(
                    %conn,
                    method = %request.method(),
                    session_id = ?request.session_id(),
                    "dispatch"
                );
                self.record_op();
                self.handler.handle(conn, request).await
            }
            Err(err) => Err(err),
        };

        if let Err(err) = &result {
            tracing::warn!(%conn, method, code = ?err.code, error = %err, "request failed");
        }
        RpcReply::from(result)
    }
}
