//! iOS simulators over `xcrun simctl`. Simulators use the host's network, so
//! only the CA needs installing; the proxy comes from the system proxy.

use crate::Error as MobileError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{
    ActivationKey, ActivationOutcome, ActivationRequest, CommandRunner, CommandSpec, InstanceMap,
    Platform, Result, Target, TargetContext,
};

pub const IOS_ID: &str = "ios-simulator";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Simulator {
    pub udid: String,
    pub name: String,
    pub state: String,
    #[serde(default)]
    pub runtime: String,
}

impl Simulator {
    pub fn is_booted(&self) -> bool {
        self.state == "Booted"
    }
}

#[derive(Deserialize)]
struct DeviceList {
    devices: BTreeMap<String, Vec<Simulator>>,
}

#[derive(Debug, Clone, Copy)]
pub struct BootTiming {
    pub poll: Duration,
    pub timeout: Duration,
}

impl Default for BootTiming {
    fn default() -> Self {
        Self {
            poll: Duration::from_millis(500),
            timeout: Duration::from_secs(60),
        }
    }
}

pub struct IosSimulator {
    context: TargetContext,
    runner: Arc<dyn CommandRunner>,
    platform: Platform,
    instances: InstanceMap<ActivationKey, ()>,
    timing: BootTiming,
}

impl IosSimulator {
    pub fn new(context: TargetContext, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            context,
            runner,
            platform: Platform::current(),
            instances: InstanceMap::new(),
            timing: BootTiming::default(),
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_timing(mut self, timing: BootTiming) -> Self {
        self.timing = timing;
        self
    }

    fn simctl(&self) -> CommandSpec {
        CommandSpec::new("xcrun").arg("simctl")
    }

    pub async fn list_simulators(&self) -> Result<Vec<Simulator>> {
        let output = self
            .runner
            .run_checked(&self.simctl().args(["list", "devices", "-j"]))
            .await?;
        Ok(parse_simulators(&output.stdout)?)
    }

    async fn boot(&self, udid: &str) -> Result<()> {
        let spec = self.simctl().args(["boot", udid]);
        let output = self.runner.run(&spec).await?;
        if output.success() || output.stderr.contains("current state: Booted") {
            return Ok(());
        }
        output.check(&spec)?;
        Ok(())
    }

    async fn wait_booted(&self, udid: &str) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.timing.timeout;
        loop {
            let booted = self
                .list_simulators()
                .await?
                .iter()
                .any(|sim| sim.udid == udid && sim.is_booted());
            if booted {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(MobileError::BootTimeout(udid.to_string()).into());
            }
            tokio::time::sleep(self.timing.poll).await;
        }
    }
}

#[async_trait]
impl Target for IosSimulator {
    fn id(&self) -> &str {
        IOS_ID
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn key_for(&self, request: &ActivationRequest) -> Result<ActivationKey> {
        request.device_key()
    }

    async fn is_activable(&self) -> bool {
        if self.platform != Platform::MacOs {
            return false;
        }
        let spec = CommandSpec::new("xcrun").arg("--version");
        matches!(self.runner.run(&spec).await, Ok(output) if output.success())
    }

    fn is_active(&self, key: &ActivationKey) -> bool {
        self.instances.is_active(key)
    }

    async fn activate(
        &self,
        key: &ActivationKey,
        _request: &ActivationRequest,
    ) -> Result<ActivationOutcome> {
        let udid = key.expect_device()?.to_string();
        let Some(reservation) = self.instances.try_reserve(key.clone()) else {
            return Ok(ActivationOutcome::default());
        };

        self.boot(&udid).await?;
        self.wait_booted(&udid).await?;

        let ca = self.context.ca.path().to_string_lossy().into_owned();
        self.runner
            .run_checked(&self.simctl().args(["keychain", udid.as_str(), "add-root-cert", ca.as_str()]))
            .await?;

        reservation.commit(());
        tracing::info!("Installed CA into simulator {}", udid);
        Ok(ActivationOutcome::default())
    }

    async fn deactivate(&self, key: &ActivationKey) -> Result<()> {
        self.instances.remove(key);
        Ok(())
    }

    async fn deactivate_all(&self) -> Result<()> {
        for key in self.instances.keys() {
            self.instances.remove(&key);
        }
        Ok(())
    }
}

/// Flatten `simctl list devices -j` into simulators tagged with their runtime
pub fn parse_simulators(json: &str) -> crate::Result<Vec<Simulator>> {
    let list: DeviceList = serde_json::from_str(json)?;
    Ok(list
        .devices
        .into_iter()
        .flat_map(|(runtime, sims)| {
            sims.into_iter().map(move |mut sim| {
                sim.runtime = runtime.clone();
                sim
            })
        })
        .collect())
}
