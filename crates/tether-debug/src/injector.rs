//! Electron target: start the app paused under the Node inspector, inject
//! the proxy/CA setup script into its main process, then let it run.

use crate::cdp::{CdpClient, fetch_debugger_url};
use crate::retry::{RetryPolicy, connect_with_retry};
use crate::{Error as DebugError, Result as DebugResult};
use async_trait::async_trait;
use chromiumoxide::cdp::js_protocol::{debugger, runtime};
use futures::future::join_all;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tether_core::{
    ActivationKey, ActivationOutcome, ActivationRequest, Error, InstanceMap, ProcessHandle,
    ProcessTable, Result, Signal, Target, TargetContext, spawn_tracked,
};

pub const ELECTRON_ID: &str = "electron-debug";

const PREPEND_SCRIPT: &str = include_str!("../overrides/electron-prepend.js");

/// How long the app gets to go away on its own after each close attempt
const CLOSE_WAIT: Duration = Duration::from_secs(1);

#[derive(Clone)]
struct Session {
    process: ProcessHandle,
    client: Arc<CdpClient>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Paused {
    call_frames: Vec<PausedFrame>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PausedFrame {
    call_frame_id: String,
}

pub struct ElectronDebug {
    context: TargetContext,
    processes: Arc<dyn ProcessTable>,
    instances: InstanceMap<ActivationKey, Session>,
    retry: RetryPolicy,
}

impl ElectronDebug {
    pub fn new(context: TargetContext, processes: Arc<dyn ProcessTable>) -> Self {
        Self {
            context,
            processes,
            instances: InstanceMap::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The prepend script, written where the app's `require` can load it
    fn prepend_script(&self) -> DebugResult<PathBuf> {
        let dir = self.context.config.config_root.join("overrides");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("electron-prepend.js");
        std::fs::write(&path, PREPEND_SCRIPT)?;
        Ok(path)
    }

    async fn connect(&self, debug_port: u16) -> Result<CdpClient> {
        connect_with_retry(self.retry, move || async move {
            let ws_url = fetch_debugger_url(debug_port).await?;
            CdpClient::connect(&ws_url).await
        })
        .await
        .map_err(|e| Error::DebugClientInitFailed(e.to_string()))
    }

    async fn start(&self, app: &Path, request: &ActivationRequest, key: &ActivationKey) -> Result<Session> {
        let binary = resolve_executable(app);
        // The inspector listens on the proxy's port number
        let debug_port = request.proxy_port;
        let script = self.prepend_script()?;
        let expression = injection_expression(
            &script,
            self.context.ca.pem(),
            self.context.ca.spki_fingerprint(),
            &self.context.proxy_url(request.proxy_port),
        );

        let mut command = tokio::process::Command::new(&binary);
        command.arg(format!("--inspect-brk=127.0.0.1:{}", debug_port));
        tracing::debug!("Launching {:?} with inspector on {}", binary, debug_port);

        let instances = self.instances.clone();
        let exit_key = key.clone();
        let process = spawn_tracked(ELECTRON_ID, command, move |_| {
            instances.remove(&exit_key);
        })?;

        let injected = async {
            let client = self.connect(debug_port).await?;
            inject(&client, &expression).await?;
            Ok::<_, Error>(client)
        };

        match injected.await {
            Ok(client) => Ok(Session {
                process,
                client: Arc::new(client),
            }),
            Err(e) => {
                tracing::debug!("Injection failed, killing {:?}", binary);
                process.kill_and_wait().await;
                Err(e)
            }
        }
    }

    async fn stop(&self, session: Session) {
        let client = &session.client;

        let pid = client
            .call(runtime::EvaluateParams::new("process.pid"))
            .await
            .ok()
            .and_then(|r| r.result.value)
            .and_then(|v| v.as_u64())
            .and_then(|pid| u32::try_from(pid).ok());

        let mut closed = false;
        if let Some(pid) = pid {
            self.processes.terminate(pid, Signal::Graceful).await;
            closed = tokio::time::timeout(CLOSE_WAIT, client.closed()).await.is_ok();
        }

        if !closed {
            // The call never gets a reply when exit succeeds
            let exit = client.call(runtime::EvaluateParams::new("process.exit(0)"));
            tokio::select! {
                _ = exit => {}
                _ = client.closed() => {}
                _ = tokio::time::sleep(CLOSE_WAIT) => {}
            }
        }

        if session.process.wait_exit_timeout(CLOSE_WAIT).await.is_none() {
            session.process.kill_and_wait().await;
        }
        client.close();
    }
}

#[async_trait]
impl Target for ElectronDebug {
    fn id(&self) -> &str {
        ELECTRON_ID
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn is_activable(&self) -> bool {
        true
    }

    fn is_active(&self, key: &ActivationKey) -> bool {
        self.instances.is_active(key)
    }

    async fn activate(
        &self,
        key: &ActivationKey,
        request: &ActivationRequest,
    ) -> Result<ActivationOutcome> {
        let Some(reservation) = self.instances.try_reserve(key.clone()) else {
            return Ok(ActivationOutcome::default());
        };
        let app = request
            .options
            .path_to_application
            .clone()
            .ok_or(DebugError::NoApplication)?;

        let session = self.start(&app, request, key).await?;
        let pid = session.process.pid();
        if !reservation.commit(session) {
            tracing::warn!("{:?} exited right after injection", app);
        }

        Ok(ActivationOutcome::with_pid(pid))
    }

    async fn deactivate(&self, key: &ActivationKey) -> Result<()> {
        if let Some(session) = self.instances.get(key) {
            self.stop(session).await;
        }
        Ok(())
    }

    async fn deactivate_all(&self) -> Result<()> {
        join_all(self.instances.values().into_iter().map(|s| self.stop(s))).await;
        Ok(())
    }
}

/// Pause on the first breakpoint, evaluate `expression` in its frame, resume
pub async fn inject(client: &CdpClient, expression: &str) -> Result<()> {
    let mut events = client.events();

    client.call(runtime::EnableParams::default()).await?;
    client.call(debugger::EnableParams::default()).await?;
    client
        .call(runtime::RunIfWaitingForDebuggerParams::default())
        .await?;

    let paused: Paused = client.next_event(&mut events, "Debugger.paused").await?;
    let frame = paused
        .call_frames
        .into_iter()
        .next()
        .ok_or_else(|| DebugError::Protocol("paused without a call frame".to_string()))?;

    let evaluated = client
        .call(debugger::EvaluateOnCallFrameParams::new(
            debugger::CallFrameId::new(frame.call_frame_id),
            expression,
        ))
        .await?;

    if let Some(details) = evaluated.exception_details {
        let description = details
            .exception
            .and_then(|e| e.description)
            .unwrap_or(details.text);
        return Err(Error::InjectionException(description));
    }

    client.call(debugger::ResumeParams::default()).await?;
    tracing::debug!("Injected proxy setup, app resumed");
    Ok(())
}

/// `require("<script>")({certContent, spkiFingerprint, proxyUrl})` with
/// every value as a JS string literal
pub fn injection_expression(script: &Path, cert_pem: &str, spki: &str, proxy_url: &str) -> String {
    let literal = |s: &str| serde_json::Value::String(s.to_string()).to_string();
    format!(
        "require({})({{ certContent: {}, spkiFingerprint: {}, proxyUrl: {} }})",
        literal(&script.to_string_lossy()),
        literal(cert_pem),
        literal(spki),
        literal(proxy_url),
    )
}

/// A macOS `.app` bundle runs `Contents/MacOS/<bundle name>`
pub fn resolve_executable(app: &Path) -> PathBuf {
    let is_bundle = app.extension().is_some_and(|ext| ext == "app") && app.is_dir();
    match app.file_stem() {
        Some(name) if is_bundle => app.join("Contents").join("MacOS").join(name),
        _ => app.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::tests::{fake_inspector, reply};
    use serde_json::{Value, json};
    use std::sync::Mutex;

    /// A port nothing is listening on
    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_expression_escapes_cert_newlines() {
        let expr = injection_expression(
            Path::new("/cfg/overrides/electron-prepend.js"),
            "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n",
            "abc=",
            "http://127.0.0.1:8281",
        );

        assert!(expr.starts_with("require(\"/cfg/overrides/electron-prepend.js\")({"));
        assert!(expr.contains("certContent: \"-----BEGIN CERTIFICATE-----\\nMIIB\\n"));
        assert!(!expr.contains('\n'));
        assert!(expr.contains("proxyUrl: \"http://127.0.0.1:8281\""));
    }

    #[test]
    fn test_app_bundle_resolves_to_inner_binary() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("Slack.app");
        std::fs::create_dir_all(bundle.join("Contents/MacOS")).unwrap();

        assert_eq!(resolve_executable(&bundle), bundle.join("Contents/MacOS/Slack"));
        let plain = dir.path().join("slack");
        assert_eq!(resolve_executable(&plain), plain);
    }

    fn inspector_script(exception: Option<Value>, seen: Arc<Mutex<Vec<String>>>) -> crate::cdp::tests::Handler {
        Box::new(move |method, params| {
            seen.lock().unwrap().push(method.to_string());
            match method {
                "Runtime.runIfWaitingForDebugger" => vec![
                    reply(json!({})),
                    json!({
                        "method": "Debugger.paused",
                        "params": {
                            "reason": "Break on start",
                            "callFrames": [{ "callFrameId": "frame-1" }]
                        }
                    }),
                ],
                "Debugger.enable" => vec![reply(json!({ "debuggerId": "dbg-1" }))],
                "Debugger.evaluateOnCallFrame" => {
                    assert_eq!(params["callFrameId"], "frame-1");
                    let mut result = json!({ "result": { "type": "undefined" } });
                    if let Some(exception) = &exception {
                        result["exceptionDetails"] = exception.clone();
                    }
                    vec![reply(result)]
                }
                _ => vec![reply(json!({}))],
            }
        })
    }

    #[tokio::test]
    async fn test_inject_runs_protocol_sequence() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let url = fake_inspector(inspector_script(None, seen.clone())).await;
        let client = CdpClient::connect(&url).await.unwrap();

        inject(&client, "1 + 1").await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "Runtime.enable",
                "Debugger.enable",
                "Runtime.runIfWaitingForDebugger",
                "Debugger.evaluateOnCallFrame",
                "Debugger.resume",
            ]
        );
    }

    #[tokio::test]
    async fn test_script_exception_is_reported() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let exception = json!({
            "exceptionId": 1,
            "text": "Uncaught",
            "lineNumber": 0,
            "columnNumber": 0,
            "exception": { "type": "object", "description": "Error: Cannot find module" }
        });
        let url = fake_inspector(inspector_script(Some(exception), seen.clone())).await;
        let client = CdpClient::connect(&url).await.unwrap();

        let err = inject(&client, "require('missing')").await.unwrap_err();
        assert_eq!(err.kind(), tether_core::ErrorKind::InjectionException);
        assert!(err.to_string().contains("Cannot find module"));
        assert!(!seen.lock().unwrap().contains(&"Debugger.resume".to_string()));
    }

    #[tokio::test]
    async fn test_unreachable_inspector_is_init_failure() {
        let dir = tempfile::tempdir().unwrap();
        let target = ElectronDebug::new(
            test_context(dir.path()),
            Arc::new(tether_core::FakeProcessTable::new(Vec::new())),
        )
        .with_retry(RetryPolicy {
            budget: 2,
            delay: Duration::from_millis(1),
        });

        let Err(err) = target.connect(closed_port()).await else {
            panic!("connected to a closed port");
        };
        assert_eq!(err.kind(), tether_core::ErrorKind::DebugClientInitFailed);
        assert!(err.reportable());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_app_exiting_before_pause_fails_activation() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("exits-immediately");
        std::fs::write(&app, "#!/bin/sh\nexit 0\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&app, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let target = ElectronDebug::new(
            test_context(dir.path()),
            Arc::new(tether_core::FakeProcessTable::new(Vec::new())),
        )
        .with_retry(RetryPolicy {
            budget: 3,
            delay: Duration::from_millis(10),
        });
        let port = closed_port();
        let request = ActivationRequest::new(port).with_options(tether_core::TargetOptions {
            path_to_application: Some(app),
            ..Default::default()
        });
        let key = target.key_for(&request).unwrap();

        let err = target.activate(&key, &request).await.unwrap_err();

        assert_eq!(err.kind(), tether_core::ErrorKind::DebugClientInitFailed);
        assert!(!target.is_active(&key));
        assert!(!target.instances.is_occupied(&key));
        assert!(target.instances.is_empty());
    }

    #[tokio::test]
    async fn test_missing_app_path_fails_and_releases_slot() {
        let dir = tempfile::tempdir().unwrap();
        let target = ElectronDebug::new(
            test_context(dir.path()),
            Arc::new(tether_core::FakeProcessTable::new(Vec::new())),
        );
        let key = ActivationKey::Port(8281);

        assert!(target.activate(&key, &ActivationRequest::new(8281)).await.is_err());
        assert!(!target.instances.is_occupied(&key));
        target.deactivate(&key).await.unwrap();
    }

    fn test_context(dir: &Path) -> TargetContext {
        let mut params = rcgen::CertificateParams::default();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "Tether CA");
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let key = rcgen::KeyPair::generate().unwrap();
        let pem = params.self_signed(&key).unwrap().pem();

        let ca = tether_core::CaCertificate::from_pem(dir.join("ca.crt"), pem).unwrap();
        let config = tether_core::TetherConfig {
            config_root: dir.to_path_buf(),
            ..Default::default()
        };
        TargetContext::new(config, ca)
    }
}
