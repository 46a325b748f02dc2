//! Authoritative record of the endpoint's single environment session.
//!
//! All reads and writes go through one mutex and a handful of atomic
//! operations. Environment calls never run under that mutex: callers take an
//! [`EnvSlot`] handle out and call through the slot's own lock, which is also
//! what teardown waits on before releasing the environment.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use gymproxy_core::{ConnId, Environment, ErrorCode, ProxyError, SessionId};

/// Generates an unguessable 128-bit session token.
pub fn new_session_id() -> SessionId {
    SessionId(format!("{:032x}", rand::random::<u128>()))
}

/// Shared owner of one environment instance.
pub struct EnvSlot {
    inner: Mutex<SlotInner>,
}

struct SlotInner {
    env: Box<dyn Environment>,
    closed: bool,
}

impl EnvSlot {
    fn new(env: Box<dyn Environment>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(SlotInner { env, closed: false }),
        })
    }

    /// Runs `f` against the environment unless it was already released.
    ///
    /// Blocks while another call or a teardown holds the slot.
    pub fn with_env<T>(
        &self,
        f: impl FnOnce(&mut dyn Environment) -> Result<T, ProxyError>,
    ) -> Result<T, ProxyError> {
        let mut inner = self.inner.lock().map_err(|_| {
            ProxyError::new(
                ErrorCode::EnvironmentFailure,
                "environment panicked during an earlier call",
            )
        })?;
        if inner.closed {
            return Err(ProxyError::new(ErrorCode::SessionIdentity, "Session closed"));
        }
        f(inner.env.as_mut())
    }

    /// Releases the environment once; later calls return `false`.
    pub fn close(&self) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.closed {
            return false;
        }
        inner.closed = true;
        inner.env.close();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }
}

impl fmt::Debug for EnvSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvSlot")
            .field("closed", &self.inner.try_lock().ok().map(|inner| inner.closed))
            .finish_non_exhaustive()
    }
}

/// Handle to the active session returned by validation.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: SessionId,
    pub env_name: String,
    pub slot: Arc<EnvSlot>,
}

/// Read-only view of the active session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub env_name: String,
    pub owner: ConnId,
}

struct ActiveSession {
    info: SessionInfo,
    slot: Arc<EnvSlot>,
}

impl ActiveSession {
    fn handle(&self) -> SessionHandle {
        SessionHandle {
            session_id: self.info.session_id.clone(),
            env_name: self.info.env_name.clone(),
            slot: Arc::clone(&self.slot),
        }
    }
}

/// Result of applying a connection's arrival to the session table.
#[derive(Debug)]
pub enum Admission {
    /// The connection, or a newer one, was already admitted.
    AlreadySeen,
    /// First sighting of the connection; carries any session it displaced.
    Admitted { replaced: Option<Arc<EnvSlot>> },
}

#[derive(Default)]
struct Table {
    active: Option<ActiveSession>,
    /// Highest connection id admitted so far.
    latest_conn: Option<ConnId>,
}

/// Single-tenant session table for one listening endpoint.
#[derive(Default)]
pub struct SessionState {
    table: Mutex<Table>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> Result<bool, ProxyError> {
        Ok(self.lock()?.active.is_some())
    }

    pub fn snapshot(&self) -> Result<Option<SessionInfo>, ProxyError> {
        Ok(self.lock()?.active.as_ref().map(|active| active.info.clone()))
    }

    /// Installs `env` as the active session unless one already exists.
    ///
    /// On refusal the environment is closed before returning.
    pub fn try_activate(
        &self,
        owner: ConnId,
        env_name: String,
        env: Box<dyn Environment>,
    ) -> Result<SessionHandle, ProxyError> {
        let slot = EnvSlot::new(env);
        {
            let mut table = self.lock()?;
            if table.active.is_none() {
                let session = ActiveSession {
                    info: SessionInfo {
                        session_id: new_session_id(),
                        env_name,
                        owner,
                    },
                    slot,
                };
                let handle = session.handle();
                table.active = Some(session);
                return Ok(handle);
            }
        }

        slot.close();
        Err(ProxyError::already_set_up())
    }

    /// Checks `session_id` against the active session and hands out its slot.
    pub fn validate(&self, session_id: &SessionId) -> Result<SessionHandle, ProxyError> {
        match self.lock()?.active.as_ref() {
            Some(active) if active.info.session_id == *session_id => Ok(active.handle()),
            _ => Err(ProxyError::wrong_session()),
        }
    }

    /// Ends the session named by `session_id`, returning its slot for release.
    pub fn deactivate(&self, session_id: &SessionId) -> Result<Arc<EnvSlot>, ProxyError> {
        let mut table = self.lock()?;
        if !table
            .active
            .as_ref()
            .is_some_and(|session| session.info.session_id == *session_id)
        {
            return Err(ProxyError::wrong_session());
        }
        table
            .active
            .take()
            .map(|session| session.slot)
            .ok_or_else(ProxyError::wrong_session)
    }

    /// A new connection starts with no session.
    ///
    /// Applied once per connection, from whichever of the accept event or the
    /// connection's first request arrives first. Connection ids only grow, so
    /// an id at or below the latest admitted one is a late duplicate and
    /// leaves the table alone.
    pub fn on_accepted(&self, conn: ConnId) -> Result<Admission, ProxyError> {
        let mut table = self.lock()?;
        if table.latest_conn.is_some_and(|latest| conn <= latest) {
            return Ok(Admission::AlreadySeen);
        }
        table.latest_conn = Some(conn);

        let replaced = if table
            .active
            .as_ref()
            .is_some_and(|session| session.info.owner < conn)
        {
            table.active.take().map(|session| session.slot)
        } else {
            None
        };
        Ok(Admission::Admitted { replaced })
    }

    /// Detaches the session owned by `conn`, if any.
    pub fn on_disconnected(&self, conn: ConnId) -> Result<Option<Arc<EnvSlot>>, ProxyError> {
        let mut table = self.lock()?;
        if table
            .active
            .as_ref()
            .is_some_and(|session| session.info.owner == conn)
        {
            return Ok(table.active.take().map(|session| session.slot));
        }
        Ok(None)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Table>, ProxyError> {
        self.table
            .lock()
            .map_err(|_| ProxyError::internal("session state lock poisoned"))
    }
}
