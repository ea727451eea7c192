//! Per-channel session lifecycle
//!
//! A session moves through resolving the user's command, starting it on a
//! fresh pty, bridging bytes between the channel and the pty, and a single
//! teardown. The states are internal; callers only see the final
//! [`SessionOutcome`].

mod bridge;
mod control;
mod registry;
mod teardown;

pub use registry::{SessionEntry, SessionRegistration, SessionRegistry};
pub use teardown::TeardownLatch;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::Instrument;

use sg_core::error::SessionError;
use sg_core::{CommandResolver, SessionId, UserId};
use sg_protocol::{ControlRequest, TerminalDimensions};

use crate::pty::{PtySpawner, SpawnedPty};
use teardown::{Teardown, Trigger};

/// Out-of-band operations on the logical channel a session owns
#[async_trait]
pub trait ChannelControl: Send + Sync + 'static {
    /// Report the command's exit code to the client
    async fn exit_status(&self, code: u32);

    /// Close the channel; later calls are ignored by the peer
    async fn close(&self);
}

/// The channel halves and control handle a session takes ownership of
pub struct SessionIo<R, W, C> {
    /// Client to server bytes
    pub reader: R,
    /// Server to client bytes
    pub writer: W,
    /// Close and exit-status signalling
    pub control: C,
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// No command could be resolved; nothing was started
    ResolveFailed,
    /// The pty or the command failed to start
    SpawnFailed,
    /// The bridge ran and the session was torn down
    Completed {
        /// Exit code of the command, if it could be reaped
        exit_code: Option<u32>,
    },
}

/// One interactive session bound to one logical channel
pub struct Session {
    registration: SessionRegistration,
    user: UserId,
    resolver: Arc<dyn CommandResolver>,
    spawner: Arc<dyn PtySpawner>,
    teardown_grace: Duration,
}

impl Session {
    pub fn new(
        registration: SessionRegistration,
        user: UserId,
        resolver: Arc<dyn CommandResolver>,
        spawner: Arc<dyn PtySpawner>,
        teardown_grace: Duration,
    ) -> Self {
        Self {
            registration,
            user,
            resolver,
            spawner,
            teardown_grace,
        }
    }

    pub fn id(&self) -> SessionId {
        self.registration.id()
    }

    /// Drive the session to completion
    ///
    /// `requests` carries the channel's control requests; it ends when the
    /// channel is closed.
    pub async fn run<R, W, C>(
        self,
        io: SessionIo<R, W, C>,
        requests: mpsc::UnboundedReceiver<ControlRequest>,
    ) -> SessionOutcome
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        C: ChannelControl,
    {
        let command = match self.resolver.resolve(&self.user).await {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!("Failed to resolve command: {}", e);
                io.control.close().await;
                return SessionOutcome::ResolveFailed;
            }
        };

        let spawner = Arc::clone(&self.spawner);
        let started = tokio::task::spawn_blocking(move || {
            spawner.spawn(&command, TerminalDimensions::default())
        })
        .await
        .map_err(|e| SessionError::PtyAllocation(e.to_string()))
        .and_then(|result| result);

        let SpawnedPty {
            pty,
            child,
            reader,
            writer,
        } = match started {
            Ok(spawned) => spawned,
            Err(e) => {
                tracing::error!("Failed to start session: {}", e);
                Teardown::new(io.control, None, None, self.teardown_grace)
                    .run(Trigger::PtyStart)
                    .await;
                return SessionOutcome::SpawnFailed;
            }
        };

        let pty = Arc::new(pty);
        let teardown = Arc::new(Teardown::new(
            io.control,
            Some(Arc::clone(&pty)),
            Some(child),
            self.teardown_grace,
        ));
        let closed = teardown.closed();

        let outbound = {
            let teardown = Arc::clone(&teardown);
            let closed = closed.clone();
            let channel = io.writer;
            tokio::spawn(
                async move {
                    match bridge::pty_to_channel(reader, channel, closed).await {
                        Ok(bytes) => tracing::debug!(bytes, "Pty output ended"),
                        Err(e) => tracing::debug!("Pty output failed: {}", e),
                    }
                    teardown.run(Trigger::Output).await;
                }
                .in_current_span(),
            )
        };

        let inbound = {
            let teardown = Arc::clone(&teardown);
            let closed = closed.clone();
            let channel = io.reader;
            tokio::spawn(
                async move {
                    match bridge::channel_to_pty(channel, writer, closed).await {
                        Ok(bytes) => tracing::debug!(bytes, "Channel input ended"),
                        Err(e) => tracing::debug!("Channel input failed: {}", e),
                    }
                    teardown.run(Trigger::Input).await;
                }
                .in_current_span(),
            )
        };

        let control = tokio::spawn(control::serve(requests, pty, closed).in_current_span());

        let (outbound, inbound, control) = tokio::join!(outbound, inbound, control);
        for joined in [outbound, inbound, control] {
            if let Err(e) = joined {
                tracing::error!("Session task failed: {}", e);
            }
        }
        // A panicked copy task never reached its teardown call
        teardown.run(Trigger::Join).await;

        SessionOutcome::Completed {
            exit_code: teardown.exit_code(),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use sg_core::error::ResolveError;
    use sg_core::CommandSpec;

    /// Records every close and exit-status
    #[derive(Clone, Default)]
    pub(crate) struct CountingChannel {
        closes: Arc<AtomicUsize>,
        exit_codes: Arc<Mutex<Vec<u32>>>,
    }

    impl CountingChannel {
        pub(crate) fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }

        pub(crate) fn exit_codes(&self) -> Vec<u32> {
            self.exit_codes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChannelControl for CountingChannel {
        async fn exit_status(&self, code: u32) {
            self.exit_codes.lock().unwrap().push(code);
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Counts spawn attempts and always fails them
    #[derive(Default)]
    pub(crate) struct RefusingSpawner {
        pub(crate) attempts: AtomicUsize,
    }

    impl PtySpawner for RefusingSpawner {
        fn spawn(
            &self,
            command: &CommandSpec,
            _size: TerminalDimensions,
        ) -> Result<SpawnedPty, SessionError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(SessionError::Spawn {
                program: command.program.clone(),
                reason: "refused".to_string(),
            })
        }
    }

    pub(crate) struct FixedResolver(pub(crate) Option<CommandSpec>);

    #[async_trait]
    impl CommandResolver for FixedResolver {
        async fn resolve(&self, user: &UserId) -> Result<CommandSpec, ResolveError> {
            self.0
                .clone()
                .ok_or_else(|| ResolveError::NotAuthorized(user.to_string()))
        }
    }
}
