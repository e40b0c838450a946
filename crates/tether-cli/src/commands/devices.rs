use crate::OutputFormat;
use crate::setup::{self, GlobalOptions};
use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tether_core::{CommandRunner, SystemRunner, Target};
use tether_mobile::{AndroidDevice, IosSimulator, Simulator};

#[derive(Debug, Default, Serialize)]
struct DeviceListing {
    android: Vec<String>,
    ios: Vec<Simulator>,
}

pub fn execute(options: &GlobalOptions, format: OutputFormat) -> Result<()> {
    let runtime = setup::runtime()?;

    let listing = runtime.block_on(async {
        let context = setup::load_context(setup::load_config(options)?)?;
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        let android = AndroidDevice::new(context.clone(), runner.clone());
        let ios = IosSimulator::new(context, runner);

        let mut listing = DeviceListing::default();
        if android.is_activable().await {
            listing.android = android.list_devices().await?;
        }
        if ios.is_activable().await {
            listing.ios = ios.list_simulators().await?;
        }
        Ok::<_, anyhow::Error>(listing)
    })?;

    if !format.print_json(&listing)? {
        output_pretty(&listing);
    }
    Ok(())
}

fn output_pretty(listing: &DeviceListing) {
    use console::style;

    println!("{}", style("Android (adb)").bold());
    if listing.android.is_empty() {
        println!("  none attached");
    }
    for serial in &listing.android {
        println!("  {}", serial);
    }

    println!();
    println!("{}", style("iOS simulators").bold());
    if listing.ios.is_empty() {
        println!("  none available");
    }
    for sim in &listing.ios {
        let state = if sim.is_booted() {
            style(sim.state.as_str()).green()
        } else {
            style(sim.state.as_str()).dim()
        };
        println!("  {:<38} {:<20} {}", sim.udid, sim.name, state);
    }
}
