use crate::OutputFormat;
use crate::setup::{self, GlobalOptions};
use anyhow::Result;
use tether_core::TargetSummary;

pub fn execute(options: &GlobalOptions, format: OutputFormat) -> Result<()> {
    let runtime = setup::runtime()?;

    let targets = runtime.block_on(async {
        let (_, facade) = setup::build_facade(options)?;
        Ok::<_, anyhow::Error>(facade.list_targets().await)
    })?;

    if format.print_json(&targets)? {
        return Ok(());
    }
    match format {
        OutputFormat::Table => output_table(&targets),
        _ => output_pretty(&targets),
    }

    Ok(())
}

fn output_table(targets: &[TargetSummary]) {
    println!("{:<24} {:<8} ACTIVABLE", "ID", "VERSION");
    for target in targets {
        println!(
            "{:<24} {:<8} {}",
            target.id,
            target.version,
            if target.activable { "yes" } else { "no" }
        );
    }
}

fn output_pretty(targets: &[TargetSummary]) {
    use console::style;

    println!("\n{}", style("Interception targets").bold().cyan());
    println!();

    for target in targets {
        let marker = if target.activable {
            style("✓").green()
        } else {
            style("✗").dim()
        };
        println!("  {} {:<24} {}", marker, target.id, style(&target.version).dim());
    }

    let available = targets.iter().filter(|t| t.activable).count();
    println!();
    println!("  {} of {} available on this machine", available, targets.len());
}
