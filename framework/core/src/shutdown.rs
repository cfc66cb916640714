use tokio::sync::broadcast::{error::TryRecvError, Receiver, Sender};

/// Broadcasts a stop signal to every listener handed out from this handle.
///
/// Used for Ctrl-C and for the forced-cancellation deadline. Sending is
/// idempotent from the listeners' point of view; they only observe that a
/// shutdown was requested.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Sender<()>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self {
            sender: tokio::sync::broadcast::channel(1).0,
        }
    }

    pub fn shutdown(&self) {
        if self.sender.send(()).is_err() {
            // Nobody is listening, which is fine when all work already ended.
            log::debug!("Shutdown requested with no listeners");
        }
    }

    pub fn new_listener(&self) -> DelegatedShutdownListener {
        DelegatedShutdownListener {
            receiver: self.sender.subscribe(),
        }
    }
}

/// One receiver of the shutdown signal, owned by a single task or thread.
#[derive(Debug)]
pub struct DelegatedShutdownListener {
    receiver: Receiver<()>,
}

impl DelegatedShutdownListener {
    /// Point-in-time check, for loops that want to stop at a safe boundary.
    pub fn should_shutdown(&mut self) -> bool {
        match self.receiver.try_recv() {
            Ok(()) => true,
            Err(TryRecvError::Closed) => true,
            Err(TryRecvError::Lagged(_)) => true,
            Err(TryRecvError::Empty) => false,
        }
    }

    /// Wait until shutdown is requested. Safe to race against other futures to
    /// cancel in-flight work.
    pub async fn wait_for_shutdown(&mut self) {
        // Closed means the handle is gone and nothing will ever ask us to
        // stop, so park forever rather than reporting a spurious shutdown.
        if self.receiver.recv().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
