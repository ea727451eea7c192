//! Single-shot session teardown
//!
//! Three paths can end a session: the inbound copy finishing, the outbound
//! copy finishing, or the pty failing to start. Whichever gets there first
//! runs the teardown; everyone after it is a no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use portable_pty::{Child, ChildKiller, ExitStatus};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use sg_core::error::SessionError;

use super::ChannelControl;
use crate::pty::PtyHandle;

/// Interval between exit checks
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long an ended pty output waits for the child to be reapable
const EXIT_SETTLE: Duration = Duration::from_millis(500);

/// What started a teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Trigger {
    /// The pty or the command failed to start
    PtyStart,
    /// Pty output ended, usually because the command exited
    Output,
    /// The client stopped sending or went away
    Input,
    /// All session tasks have been joined
    Join,
}

impl Trigger {
    fn as_str(self) -> &'static str {
        match self {
            Trigger::PtyStart => "pty-start",
            Trigger::Output => "outbound",
            Trigger::Input => "inbound",
            Trigger::Join => "join",
        }
    }

    /// Time to wait for the child before deciding it is still running
    fn settle(self, grace: Duration) -> Duration {
        match self {
            Trigger::Output => grace.min(EXIT_SETTLE),
            _ => Duration::ZERO,
        }
    }
}

/// A latch that opens for exactly one caller
#[derive(Debug, Default)]
pub struct TeardownLatch {
    fired: AtomicBool,
}

impl TeardownLatch {
    /// Create a closed latch
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true for the first caller only
    pub fn try_fire(&self) -> bool {
        self.fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether some caller has already fired the latch
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

/// Everything a session releases when it ends
pub(crate) struct Teardown<C> {
    latch: TeardownLatch,
    channel: C,
    pty: Option<Arc<PtyHandle>>,
    child: Mutex<Option<Box<dyn Child + Send + Sync>>>,
    grace: Duration,
    closed: CancellationToken,
    exit_code: OnceLock<u32>,
}

impl<C: ChannelControl> Teardown<C> {
    pub(crate) fn new(
        channel: C,
        pty: Option<Arc<PtyHandle>>,
        child: Option<Box<dyn Child + Send + Sync>>,
        grace: Duration,
    ) -> Self {
        Self {
            latch: TeardownLatch::new(),
            channel,
            pty,
            child: Mutex::new(child),
            grace,
            closed: CancellationToken::new(),
            exit_code: OnceLock::new(),
        }
    }

    /// Cancelled once the channel and pty have been closed
    pub(crate) fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Exit code of the child, once teardown has reaped it
    pub(crate) fn exit_code(&self) -> Option<u32> {
        self.exit_code.get().copied()
    }

    /// Run the teardown if nobody has yet
    ///
    /// Order: exit-status (only if the child is already gone), channel
    /// close, pty close, child reap. When the pty output ended the child
    /// usually exits a moment later, so it gets a short window to be
    /// reaped before the status is decided. Returns false when another
    /// caller already ran it.
    pub(crate) async fn run(&self, trigger: Trigger) -> bool {
        if !self.latch.try_fire() {
            tracing::trace!(trigger = trigger.as_str(), "Teardown already done");
            return false;
        }
        tracing::debug!(trigger = trigger.as_str(), "Tearing down session");

        let mut child = self
            .child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let exited = match child.as_mut() {
            Some(child) => match poll_exit(child, trigger.settle(self.grace)).await {
                Ok(status) => status,
                Err(e) => {
                    tracing::debug!("Exit check failed: {}", e);
                    None
                }
            },
            None => None,
        };
        if let Some(status) = &exited {
            self.channel.exit_status(status.exit_code()).await;
        }

        self.channel.close().await;
        if let Some(pty) = &self.pty {
            pty.close();
        }
        self.closed.cancel();

        if let Some(child) = child {
            let status = match exited {
                Some(status) => Ok(status),
                None => {
                    hang_up(&*child);
                    wait_for_exit(child, self.grace).await
                }
            };
            match status {
                Ok(status) => {
                    tracing::debug!("Child exited with code {}", status.exit_code());
                    let _ = self.exit_code.set(status.exit_code());
                }
                Err(e) => tracing::warn!("Failed to exit command ({})", e),
            }
        }

        tracing::info!("Session closed");
        true
    }
}

/// Deliver the hangup a closed terminal implies
///
/// The bridge's blocking reader holds its own copy of the master until the
/// child lets go of the slave, so releasing the [`PtyHandle`] alone never
/// reaches the child.
fn hang_up(child: &(dyn Child + Send + Sync)) {
    if let Err(e) = child.clone_killer().kill() {
        tracing::debug!("Hangup failed: {}", e);
    }
}

/// Check for an exit until `window` has passed
async fn poll_exit(
    child: &mut Box<dyn Child + Send + Sync>,
    window: Duration,
) -> Result<Option<ExitStatus>, SessionError> {
    let deadline = Instant::now() + window;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(Some(status)),
            Ok(None) if Instant::now() < deadline => tokio::time::sleep(EXIT_POLL_INTERVAL).await,
            Ok(None) => return Ok(None),
            Err(e) => return Err(SessionError::Wait(e.to_string())),
        }
    }
}

/// Give the child `grace` to exit on its own, then kill and reap it
async fn wait_for_exit(
    mut child: Box<dyn Child + Send + Sync>,
    grace: Duration,
) -> Result<ExitStatus, SessionError> {
    if let Some(status) = poll_exit(&mut child, grace).await? {
        return Ok(status);
    }

    tracing::debug!("Command still running after {:?}, killing it", grace);
    // `kill` escalates after its own short wait, so it runs off the runtime
    tokio::task::spawn_blocking(move || {
        if let Err(e) = child.kill() {
            tracing::debug!("Kill failed: {}", e);
        }
        child.wait()
    })
    .await
        .map_err(|e| SessionError::Wait(e.to_string()))?
        .map_err(|e| SessionError::Wait(e.to_string()))
}
