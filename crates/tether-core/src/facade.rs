//! The surface the rest of the application drives targets through.
//!
//! Activation failures come back as `{success: false, metadata}` instead of
//! errors, and deactivation never fails the caller. Everything is keyed by
//! target id.

use crate::registry::{TargetRegistry, TeardownBroker, TeardownReply};
use crate::{ActivationOutcome, ActivationRequest, ErrorKind, ErrorMetadata, Result, TargetOptions};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ErrorMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

impl ActivationResult {
    fn succeeded(outcome: ActivationOutcome) -> Self {
        Self {
            success: true,
            metadata: None,
            pid: outcome.pid,
        }
    }

    fn failed(metadata: ErrorMetadata) -> Self {
        Self {
            success: false,
            metadata: Some(metadata),
            pid: None,
        }
    }

    pub fn close_confirm_required(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.close_confirm_required)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivationResult {
    pub success: bool,
}

/// Notifications for collaborators outside the subsystem
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TargetEvent {
    Activated {
        target_id: String,
        success: bool,
        pid: Option<u32>,
        error: Option<ErrorKind>,
        at: DateTime<Utc>,
    },
    Deactivated {
        target_id: String,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSummary {
    pub id: String,
    pub version: String,
    pub activable: bool,
}

/// Requests accepted over the IPC boundary
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum FacadeRequest {
    ListTargets,
    IsActivable {
        target_id: String,
    },
    IsActive {
        target_id: String,
        proxy_port: u16,
        #[serde(default)]
        options: TargetOptions,
    },
    Activate {
        target_id: String,
        proxy_port: u16,
        #[serde(default)]
        options: TargetOptions,
    },
    Deactivate {
        target_id: String,
        #[serde(default)]
        proxy_port: Option<u16>,
        #[serde(default)]
        options: TargetOptions,
    },
    DeactivateAll {
        #[serde(default)]
        correlation_id: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum FacadeResponse {
    Targets {
        targets: Vec<TargetSummary>,
    },
    Activable {
        target_id: String,
        activable: bool,
    },
    Active {
        target_id: String,
        active: bool,
    },
    Activation {
        target_id: String,
        #[serde(flatten)]
        result: ActivationResult,
    },
    Deactivation {
        target_id: String,
        success: bool,
    },
    TeardownComplete {
        correlation_id: String,
        failures: usize,
    },
    Error {
        message: String,
    },
}

pub struct Facade {
    registry: Arc<TargetRegistry>,
    teardown: TeardownBroker,
    events: broadcast::Sender<TargetEvent>,
    activation_timeout: Duration,
}

impl Facade {
    /// Must be called inside a tokio runtime; spawns the teardown listener
    pub fn new(registry: Arc<TargetRegistry>, activation_timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            teardown: TeardownBroker::spawn(Arc::clone(&registry)),
            registry,
            events,
            activation_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TargetEvent> {
        self.events.subscribe()
    }

    pub async fn list_targets(&self) -> Vec<TargetSummary> {
        let mut summaries = Vec::new();
        for target in self.registry.targets() {
            summaries.push(TargetSummary {
                id: target.id().to_string(),
                version: target.version().to_string(),
                activable: target.is_activable().await,
            });
        }
        summaries
    }

    pub async fn is_activable(&self, target_id: &str) -> bool {
        match self.registry.get(target_id) {
            Some(target) => target.is_activable().await,
            None => false,
        }
    }

    pub fn is_active(&self, target_id: &str, proxy_port: u16, options: &TargetOptions) -> bool {
        let Some(target) = self.registry.get(target_id) else {
            return false;
        };
        let request = ActivationRequest::new(proxy_port).with_options(options.clone());
        match target.key_for(&request) {
            Ok(key) => target.is_active(&key),
            Err(_) => false,
        }
    }

    pub async fn activate(
        &self,
        target_id: &str,
        proxy_port: u16,
        options: TargetOptions,
    ) -> ActivationResult {
        tracing::info!("Activating {} for proxy port {}", target_id, proxy_port);

        let result = match self.try_activate(target_id, proxy_port, options).await {
            Ok(outcome) => {
                tracing::info!("Activated {}", target_id);
                ActivationResult::succeeded(outcome)
            }
            Err(e) if e.reportable() => {
                tracing::error!("Failed to activate {}: {}", target_id, e);
                ActivationResult::failed(e.metadata())
            }
            Err(e) => {
                tracing::info!("Activation of {} not completed: {}", target_id, e);
                ActivationResult::failed(e.metadata())
            }
        };

        let _ = self.events.send(TargetEvent::Activated {
            target_id: target_id.to_string(),
            success: result.success,
            pid: result.pid,
            error: result.metadata.as_ref().map(|m| m.kind),
            at: Utc::now(),
        });

        result
    }

    async fn try_activate(
        &self,
        target_id: &str,
        proxy_port: u16,
        options: TargetOptions,
    ) -> Result<ActivationOutcome> {
        let target = self.registry.require(target_id)?;
        let request = ActivationRequest::new(proxy_port).with_options(options);
        let key = target.key_for(&request)?;

        with_soft_timeout(
            target_id,
            self.activation_timeout,
            target.activate(&key, &request),
        )
        .await
    }

    pub async fn deactivate(
        &self,
        target_id: &str,
        proxy_port: Option<u16>,
        options: TargetOptions,
    ) -> DeactivationResult {
        let Some(target) = self.registry.get(target_id) else {
            tracing::warn!("Cannot deactivate unknown target {}", target_id);
            return DeactivationResult { success: false };
        };

        let request = ActivationRequest::new(proxy_port.unwrap_or_default()).with_options(options);
        let result = match target.key_for(&request) {
            Ok(key) => target.deactivate(&key).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!("Failed to deactivate {}: {}", target_id, e);
        }

        let _ = self.events.send(TargetEvent::Deactivated {
            target_id: target_id.to_string(),
            at: Utc::now(),
        });
        DeactivationResult { success: true }
    }

    /// Broadcast teardown to every target and wait for the single reply
    pub async fn deactivate_all(&self) -> Option<TeardownReply> {
        self.deactivate_all_with_id(None).await
    }

    async fn deactivate_all_with_id(&self, correlation_id: Option<String>) -> Option<TeardownReply> {
        let reply = match correlation_id {
            Some(id) => self.teardown.request_with_id(id).await,
            None => self.teardown.request().await,
        };

        match reply {
            Ok(reply) => Some(reply),
            Err(e) => {
                tracing::warn!("Teardown request failed: {}", e);
                None
            }
        }
    }

    pub async fn handle(&self, request: FacadeRequest) -> FacadeResponse {
        match request {
            FacadeRequest::ListTargets => FacadeResponse::Targets {
                targets: self.list_targets().await,
            },
            FacadeRequest::IsActivable { target_id } => FacadeResponse::Activable {
                activable: self.is_activable(&target_id).await,
                target_id,
            },
            FacadeRequest::IsActive {
                target_id,
                proxy_port,
                options,
            } => FacadeResponse::Active {
                active: self.is_active(&target_id, proxy_port, &options),
                target_id,
            },
            FacadeRequest::Activate {
                target_id,
                proxy_port,
                options,
            } => FacadeResponse::Activation {
                result: self.activate(&target_id, proxy_port, options).await,
                target_id,
            },
            FacadeRequest::Deactivate {
                target_id,
                proxy_port,
                options,
            } => FacadeResponse::Deactivation {
                success: self.deactivate(&target_id, proxy_port, options).await.success,
                target_id,
            },
            FacadeRequest::DeactivateAll { correlation_id } => {
                match self.deactivate_all_with_id(correlation_id).await {
                    Some(reply) => FacadeResponse::TeardownComplete {
                        correlation_id: reply.correlation_id,
                        failures: reply.failures,
                    },
                    None => FacadeResponse::Error {
                        message: "teardown failed".to_string(),
                    },
                }
            }
        }
    }
}

/// Await `future`, logging a warning if it outlives `timeout`. Never cancels.
pub async fn with_soft_timeout<F: Future>(label: &str, timeout: Duration, future: F) -> F::Output {
    tokio::pin!(future);
    let timer = tokio::time::sleep(timeout);
    tokio::pin!(timer);
    let mut warned = false;

    loop {
        tokio::select! {
            output = &mut future => return output,
            _ = &mut timer, if !warned => {
                warned = true;
                tracing::warn!("{} is taking longer than {:?}, still waiting", label, timeout);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_parses_camel_case() {
        let request: FacadeRequest = serde_json::from_str(
            r#"{"type": "activate", "targetId": "fresh-chrome", "proxyPort": 8281, "options": {"closeConfirmed": true}}"#,
        )
        .unwrap();

        match request {
            FacadeRequest::Activate {
                target_id,
                proxy_port,
                options,
            } => {
                assert_eq!(target_id, "fresh-chrome");
                assert_eq!(proxy_port, 8281);
                assert!(options.close_confirmed);
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_deactivate_accepts_null_port() {
        let request: FacadeRequest = serde_json::from_str(
            r#"{"type": "deactivate", "targetId": "android", "proxyPort": null, "options": {"deviceId": "emulator-5554"}}"#,
        )
        .unwrap();
        assert!(matches!(
            request,
            FacadeRequest::Deactivate { proxy_port: None, .. }
        ));
    }

    #[test]
    fn test_activation_response_flattens_result() {
        let response = FacadeResponse::Activation {
            target_id: "existing-chrome".to_string(),
            result: ActivationResult::failed(
                crate::Error::ConfirmationRequired("Chrome".into()).metadata(),
            ),
        };
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["type"], "activation");
        assert_eq!(json["targetId"], "existing-chrome");
        assert_eq!(json["success"], false);
        assert_eq!(json["metadata"]["closeConfirmRequired"], true);
    }

    #[tokio::test]
    async fn test_soft_timeout_does_not_cancel() {
        let output = with_soft_timeout("slow", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            7
        })
        .await;
        assert_eq!(output, 7);
    }
}
