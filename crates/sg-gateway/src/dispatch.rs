//! Per-connection channel dispatch
//!
//! The SSH handler forwards authentication, channel opens, channel requests
//! and closes here. The dispatcher is generic over the channel key so it can
//! be driven without a live SSH connection.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::Instrument;

use sg_core::error::SessionError;
use sg_core::{ConnectionId, EncodedPublicKey, SessionId, UserId};
use sg_protocol::{ChannelKind, ControlRequest, RequestReply};

use crate::session::{ChannelControl, Session, SessionIo};
use crate::state::GatewayState;

/// Why a channel-open request was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelRejection {
    /// Only interactive session channels are served
    #[error("unknown channel type: {0}")]
    UnknownType(String),

    /// No user has authenticated on this connection
    #[error("connection is not authenticated")]
    NotAuthenticated,

    /// A session cap was reached
    #[error("session limit reached ({0})")]
    LimitExceeded(u32),

    /// The session could not be registered
    #[error("session unavailable: {0}")]
    Unavailable(String),
}

/// Routes one connection's channels to their sessions
pub struct Dispatcher<K> {
    connection: ConnectionId,
    state: Arc<GatewayState>,
    user: Option<UserId>,
    channels: HashMap<K, mpsc::UnboundedSender<ControlRequest>>,
}

impl<K> Dispatcher<K>
where
    K: Copy + Eq + Hash + Debug + Send + 'static,
{
    pub fn new(connection: ConnectionId, state: Arc<GatewayState>) -> Self {
        Self {
            connection,
            state,
            user: None,
            channels: HashMap::new(),
        }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// The authenticated user, if any
    pub fn user(&self) -> Option<&UserId> {
        self.user.as_ref()
    }

    /// Ask the identity verifier about an offered key
    pub async fn authenticate(&mut self, user: &str, key: EncodedPublicKey) -> bool {
        let user = UserId::new(user);
        match self.state.verifier.verify(&user, &key).await {
            Ok(()) => {
                tracing::info!(%user, algorithm = %key.algorithm, "Public key accepted");
                self.user = Some(user);
                true
            }
            Err(e) => {
                tracing::warn!(%user, algorithm = %key.algorithm, "Public key rejected: {}", e);
                false
            }
        }
    }

    /// Admit a channel and start its session
    ///
    /// `io` is only invoked once the channel has been accepted, so a
    /// rejected channel never has a session, pty or process.
    pub fn open_channel<R, W, C>(
        &mut self,
        key: K,
        kind: &ChannelKind,
        io: impl FnOnce() -> SessionIo<R, W, C>,
    ) -> Result<SessionId, ChannelRejection>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        C: ChannelControl,
    {
        if !kind.is_interactive() {
            tracing::warn!(channel = ?key, "{}", kind.rejection_reason());
            return Err(ChannelRejection::UnknownType(kind.as_str().to_string()));
        }

        let user = self.user.clone().ok_or(ChannelRejection::NotAuthenticated)?;

        let limits = &self.state.config.limits;
        if let Some(max) = limits.max_sessions_per_connection {
            if self.state.registry.count_for(self.connection) >= max as usize {
                tracing::warn!(channel = ?key, "Connection already has {} sessions", max);
                return Err(ChannelRejection::LimitExceeded(max));
            }
        }

        let registration = self
            .state
            .registry
            .register(user.clone(), self.connection)
            .map_err(|e| {
                tracing::warn!(channel = ?key, "{}", e);
                match e {
                    SessionError::LimitExceeded(max) => ChannelRejection::LimitExceeded(max),
                    other => ChannelRejection::Unavailable(other.to_string()),
                }
            })?;

        let session = Session::new(
            registration,
            user.clone(),
            Arc::clone(&self.state.resolver),
            Arc::clone(&self.state.spawner),
            limits.teardown_grace,
        );
        let id = session.id();

        // Requests are queued until the session's pty exists
        let (tx, rx) = mpsc::unbounded_channel();
        let span = tracing::info_span!("session", id = %id, %user, channel = ?key);
        let io = io();
        tokio::spawn(
            async move {
                tracing::info!("Session started");
                let outcome = session.run(io, rx).await;
                tracing::debug!(?outcome, "Session finished");
            }
            .instrument(span),
        );

        self.channels.insert(key, tx);
        Ok(id)
    }

    /// Hand a control request to its channel's session and decide the reply
    ///
    /// A request is only acknowledged once its session has it; one for a
    /// channel without a live session is refused.
    pub fn route_request(&mut self, key: K, request: ControlRequest) -> RequestReply {
        let reply = request.reply();
        let refused = match reply {
            RequestReply::Silent => RequestReply::Silent,
            _ => RequestReply::Failure,
        };

        let Some(tx) = self.channels.get(&key) else {
            tracing::debug!(channel = ?key, kind = request.kind(), "Request for unknown channel");
            return refused;
        };

        if reply == RequestReply::Failure {
            tracing::debug!(channel = ?key, kind = request.kind(), "Refusing request");
        }
        if let Err(e) = tx.send(request) {
            tracing::debug!(channel = ?key, kind = e.0.kind(), "Session already finished");
            self.channels.remove(&key);
            return refused;
        }
        reply
    }

    /// Forget a channel; its session sees the end of its request stream
    pub fn close_channel(&mut self, key: K) -> bool {
        self.channels.remove(&key).is_some()
    }

    /// Number of channels with a session attached
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Connection-level requests are never handled
    pub fn global_request(&self, kind: &str) -> bool {
        tracing::debug!("Ignoring global request {}", kind);
        false
    }
}
