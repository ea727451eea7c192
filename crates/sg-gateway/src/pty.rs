//! Pseudo-terminal allocation
//!
//! Wraps portable-pty: a [`PtySpawner`] opens a pty pair and starts the
//! session command on its slave side; the session keeps the master as a
//! [`PtyHandle`] plus separate blocking reader/writer handles.

use std::io::{Read, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

use sg_core::error::SessionError;
use sg_core::CommandSpec;
use sg_protocol::TerminalDimensions;

/// Master side of a session's pseudo-terminal
///
/// Once closed, resizes are ignored rather than reported as errors so a
/// late `window-change` racing teardown stays harmless.
pub struct PtyHandle {
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
}

impl PtyHandle {
    /// Wrap an open master
    pub fn new(master: Box<dyn MasterPty + Send>) -> Self {
        Self {
            master: Mutex::new(Some(master)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn MasterPty + Send>>> {
        self.master.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply new dimensions
    ///
    /// Returns `Ok(false)` when the pty is already closed.
    pub fn resize(&self, dims: TerminalDimensions) -> Result<bool, SessionError> {
        let guard = self.lock();
        let Some(master) = guard.as_ref() else {
            return Ok(false);
        };

        master
            .resize(pty_size(dims))
            .map_err(|e| SessionError::PtyAllocation(format!("resize to {}: {}", dims, e)))?;
        Ok(true)
    }

    /// Current dimensions, or `None` once closed
    pub fn size(&self) -> Option<TerminalDimensions> {
        let guard = self.lock();
        let size = guard.as_ref()?.get_size().ok()?;
        Some(TerminalDimensions::new(size.cols.into(), size.rows.into()))
    }

    /// Release the master; returns false if it was already released
    ///
    /// Reader clones keep the terminal open on their own, so the child is
    /// not hung up by this alone.
    pub fn close(&self) -> bool {
        self.lock().take().is_some()
    }

    /// Whether the master has been released
    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }
}

impl std::fmt::Debug for PtyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyHandle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A started command and the pty it is attached to
pub struct SpawnedPty {
    /// Master side, used for resizing
    pub pty: PtyHandle,
    /// The child process
    pub child: Box<dyn Child + Send + Sync>,
    /// Output of the child
    pub reader: Box<dyn Read + Send>,
    /// Input of the child
    pub writer: Box<dyn Write + Send>,
}

/// Opens a pty and starts a command on it
pub trait PtySpawner: Send + Sync {
    /// Allocate a pty of `size` and start `command` with its standard
    /// streams bound to the slave side
    fn spawn(&self, command: &CommandSpec, size: TerminalDimensions)
        -> Result<SpawnedPty, SessionError>;
}

/// Spawner backed by the host's native pty implementation
#[derive(Debug, Default, Clone, Copy)]
pub struct NativePtySpawner;

impl PtySpawner for NativePtySpawner {
    fn spawn(
        &self,
        command: &CommandSpec,
        size: TerminalDimensions,
    ) -> Result<SpawnedPty, SessionError> {
        tracing::info!("Creating pty {} for `{}`", size, command);

        let pair = native_pty_system()
            .openpty(pty_size(size))
            .map_err(|e| SessionError::PtyAllocation(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&command.program);
        cmd.args(&command.args);
        for (key, value) in &command.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &command.cwd {
            cmd.cwd(cwd);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::Spawn {
                program: command.program.clone(),
                reason: e.to_string(),
            })?;
        // The child holds its own copies of the slave; keeping ours open
        // would hide its exit from the master reader.
        drop(pair.slave);

        tracing::debug!("Spawned `{}` with pid {:?}", command.program, child.process_id());

        let handles = pair
            .master
            .try_clone_reader()
            .and_then(|reader| Ok((reader, pair.master.take_writer()?)));
        let (reader, writer) = match handles {
            Ok(handles) => handles,
            Err(e) => {
                let _ = child.kill();
                return Err(SessionError::PtyAllocation(e.to_string()));
            }
        };

        Ok(SpawnedPty {
            pty: PtyHandle::new(pair.master),
            child,
            reader,
            writer,
        })
    }
}

fn pty_size(dims: TerminalDimensions) -> PtySize {
    PtySize {
        rows: dims.rows(),
        cols: dims.cols(),
        pixel_width: 0,
        pixel_height: 0,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn spawn_sleep() -> SpawnedPty {
        let cmd = CommandSpec::new("/bin/sh").args(["-c", "sleep 5"]);
        NativePtySpawner
            .spawn(&cmd, TerminalDimensions::default())
            .unwrap()
    }

    fn reap(mut spawned: SpawnedPty) {
        let _ = spawned.child.kill();
        let _ = spawned.child.wait();
    }

    #[test]
    fn test_initial_size() {
        let spawned = spawn_sleep();
        assert_eq!(spawned.pty.size(), Some(TerminalDimensions::new(80, 24)));
        reap(spawned);
    }

    #[test]
    fn test_resize_is_idempotent() {
        let spawned = spawn_sleep();
        let dims = TerminalDimensions::new(120, 40);

        assert!(spawned.pty.resize(dims).unwrap());
        let first = spawned.pty.size();
        assert!(spawned.pty.resize(dims).unwrap());
        let second = spawned.pty.size();

        assert_eq!(first, Some(dims));
        assert_eq!(first, second);
        reap(spawned);
    }

    #[test]
    fn test_resize_after_close_is_noop() {
        let spawned = spawn_sleep();

        assert!(spawned.pty.close());
        assert!(!spawned.pty.close());
        assert!(spawned.pty.is_closed());
        assert!(!spawned.pty.resize(TerminalDimensions::new(100, 30)).unwrap());
        assert_eq!(spawned.pty.size(), None);
        reap(spawned);
    }

    #[test]
    fn test_missing_program_fails_to_spawn() {
        let cmd = CommandSpec::new("/nonexistent/shellgate-test-binary");
        let result = NativePtySpawner.spawn(&cmd, TerminalDimensions::default());
        assert!(matches!(result, Err(SessionError::Spawn { .. })));
    }
}
