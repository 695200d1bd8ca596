//! The opaque shutdown signal the core consumes from its caller (spec §1
//! "the core consumes only ... an opaque shutdown signal"). Built on a
//! `tokio::sync::watch` channel rather than `tokio_util::CancellationToken`
//! since that's the only signalling primitive the teacher's dependency
//! set already provides.

#[derive(Clone)]
pub struct ShutdownSignal {
    rx: tokio::sync::watch::Receiver<bool>,
}

pub struct ShutdownHandle {
    tx: tokio::sync::watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn new() -> (Self, ShutdownSignal) {
        let (tx, rx) = tokio::sync::watch::channel(false);
        (Self { tx }, ShutdownSignal { rx })
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    /// Installs handlers for Ctrl-C and, on Unix, SIGTERM (the signal a
    /// container orchestrator sends on stop); triggers this signal exactly
    /// once from whichever fires first.
    pub fn install_ctrl_c(self: std::sync::Arc<Self>) {
        #[cfg(unix)]
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(err) => {
                    tracing::warn!(%err, "failed to install SIGTERM handler");
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::info!("received shutdown signal");
                        self.trigger();
                    }
                    return;
                }
            };
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if result.is_ok() {
                        tracing::info!("received shutdown signal (ctrl-c)");
                        self.trigger();
                    }
                }
                _ = sigterm.recv() => {
                    tracing::info!("received shutdown signal (sigterm)");
                    self.trigger();
                }
            }
        });

        #[cfg(not(unix))]
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("received shutdown signal");
                self.trigger();
            }
        });
    }
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once, the first time the signal fires.
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn triggered_resolves_after_trigger() {
        let (handle, signal) = ShutdownHandle::new();
        assert!(!signal.is_triggered());
        handle.trigger();
        signal.triggered().await;
        assert!(signal.is_triggered());
    }
}
