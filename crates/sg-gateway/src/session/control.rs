//! Channel control-request service

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use sg_protocol::ControlRequest;

use crate::pty::PtyHandle;

/// Apply control requests to the session's pty until the request stream is
/// exhausted or the session closes
pub(crate) async fn serve(
    mut requests: mpsc::UnboundedReceiver<ControlRequest>,
    pty: Arc<PtyHandle>,
    closed: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            _ = closed.cancelled() => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };
        apply(&pty, &request);
    }
    tracing::trace!("Control requests finished");
}

/// Apply one request; only size-carrying requests touch the pty
pub(crate) fn apply(pty: &PtyHandle, request: &ControlRequest) {
    tracing::debug!(kind = request.kind(), "Control request");

    let Some(dims) = request.dimensions() else {
        return;
    };
    match pty.resize(dims) {
        Ok(true) => tracing::debug!("Resized pty to {}", dims),
        Ok(false) => tracing::trace!("Pty already closed, ignoring resize to {}", dims),
        Err(e) => tracing::warn!("{}", e),
    }
}
