//! The set of known targets, plus process-wide teardown.

use crate::{Error, Result, Target};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

static SHUTDOWN_HOOK_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Targets by id, in registration order
pub struct TargetRegistry {
    targets: Vec<Arc<dyn Target>>,
    by_id: HashMap<String, usize>,
}

impl TargetRegistry {
    /// Fails if two targets share an id
    pub fn new(targets: Vec<Arc<dyn Target>>) -> Result<Self> {
        let mut by_id = HashMap::new();
        for (index, target) in targets.iter().enumerate() {
            if by_id.insert(target.id().to_string(), index).is_some() {
                return Err(Error::DuplicateTarget(target.id().to_string()));
            }
        }

        tracing::debug!("Registered {} targets", targets.len());
        Ok(Self { targets, by_id })
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Target>> {
        self.by_id.get(id).map(|&index| Arc::clone(&self.targets[index]))
    }

    pub fn require(&self, id: &str) -> Result<Arc<dyn Target>> {
        self.get(id).ok_or_else(|| Error::UnknownTarget(id.to_string()))
    }

    pub fn ids(&self) -> Vec<&str> {
        self.targets.iter().map(|t| t.id()).collect()
    }

    pub fn targets(&self) -> &[Arc<dyn Target>] {
        &self.targets
    }

    /// Deactivate every target concurrently. Failures are logged and never
    /// stop the others; returns how many failed.
    pub async fn deactivate_all(&self) -> usize {
        let results = join_all(self.targets.iter().map(|target| async move {
            let result = target.deactivate_all().await;
            if let Err(e) = &result {
                tracing::warn!("Failed to deactivate {}: {}", target.id(), e);
            }
            result
        }))
        .await;

        results.iter().filter(|r| r.is_err()).count()
    }

    /// `deactivate_all` bounded by `ceiling`. Returns false if it timed out.
    pub async fn shutdown(&self, ceiling: Duration) -> bool {
        tracing::info!("Shutting down all interception targets");
        match tokio::time::timeout(ceiling, self.deactivate_all()).await {
            Ok(0) => true,
            Ok(failures) => {
                tracing::warn!("{} targets failed to shut down cleanly", failures);
                true
            }
            Err(_) => {
                tracing::warn!(
                    "Target shutdown did not finish within {:?}, exiting anyway",
                    ceiling
                );
                false
            }
        }
    }

    /// Register the single process-wide hook that tears every target down on
    /// Ctrl-C or SIGTERM. The returned task finishes once teardown is done.
    pub fn install_shutdown_hook(self: &Arc<Self>, ceiling: Duration) -> Result<JoinHandle<()>> {
        if SHUTDOWN_HOOK_INSTALLED.swap(true, Ordering::SeqCst) {
            return Err(Error::Unknown(
                "shutdown hook is already installed".to_string(),
            ));
        }

        let registry = Arc::clone(self);
        Ok(tokio::spawn(async move {
            termination_signal().await;
            tracing::info!("Received termination signal");
            registry.shutdown(ceiling).await;
        }))
    }
}

async fn termination_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => tracing::debug!("SIGTERM handler unavailable: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownReply {
    pub correlation_id: String,
    /// Targets whose teardown failed
    pub failures: usize,
}

struct TeardownRequest {
    correlation_id: String,
    reply: oneshot::Sender<TeardownReply>,
}

/// Request/reply channel for "tear everything down" coming from another
/// process. Each request gets exactly one reply carrying its correlation id.
#[derive(Clone)]
pub struct TeardownBroker {
    tx: mpsc::Sender<TeardownRequest>,
}

impl TeardownBroker {
    pub fn spawn(registry: Arc<TargetRegistry>) -> Self {
        let (tx, mut rx) = mpsc::channel::<TeardownRequest>(16);

        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                tracing::debug!("Teardown request {}", request.correlation_id);
                let failures = registry.deactivate_all().await;
                let _ = request.reply.send(TeardownReply {
                    correlation_id: request.correlation_id,
                    failures,
                });
            }
        });

        Self { tx }
    }

    pub async fn request(&self) -> Result<TeardownReply> {
        self.request_with_id(uuid::Uuid::new_v4().to_string()).await
    }

    pub async fn request_with_id(&self, correlation_id: String) -> Result<TeardownReply> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(TeardownRequest {
                correlation_id,
                reply,
            })
            .await
            .map_err(|_| Error::Unknown("teardown listener has stopped".to_string()))?;

        rx.await
            .map_err(|_| Error::Unknown("teardown listener dropped the request".to_string()))
    }
}
