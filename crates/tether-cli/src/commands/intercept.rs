use crate::setup::{self, GlobalOptions};
use anyhow::{Result, anyhow};
use console::{Term, style};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tether_core::{ActivationResult, Facade, TargetOptions};

pub struct InterceptArgs {
    pub target: String,
    pub port: u16,
    pub confirm_close: bool,
    pub app: Option<PathBuf>,
    pub device: Option<String>,
}

pub fn execute(options: &GlobalOptions, args: InterceptArgs) -> Result<()> {
    let runtime = setup::runtime()?;

    runtime.block_on(async {
        let (context, facade) = setup::build_facade(options)?;
        facade.registry().require(&args.target)?;

        let mut target_options = TargetOptions {
            close_confirmed: args.confirm_close,
            path_to_application: args.app.clone(),
            device_id: args.device.clone(),
        };

        let mut result = activate(&facade, &args, target_options.clone()).await;

        if result.close_confirm_required() && confirm_close(&args.target)? {
            target_options.close_confirmed = true;
            result = activate(&facade, &args, target_options.clone()).await;
        }

        if !result.success {
            let message = result
                .metadata
                .map(|m| m.message)
                .unwrap_or_else(|| "activation failed".to_string());
            return Err(anyhow!("Failed to intercept {}: {}", args.target, message));
        }

        println!(
            "✅ {} is routed through {}",
            style(&args.target).green(),
            context.proxy_url(args.port)
        );
        if let Some(pid) = result.pid {
            println!("   pid {}", pid);
        }
        println!("Press Ctrl+C to stop intercepting...");

        tokio::signal::ctrl_c().await?;
        println!();
        println!("🛑 Stopping...");

        facade
            .deactivate(&args.target, Some(args.port), target_options)
            .await;
        if !facade
            .registry()
            .shutdown(context.config.shutdown_timeout())
            .await
        {
            println!("⚠️  Some targets did not shut down in time");
        }

        Ok(())
    })
}

async fn activate(facade: &Facade, args: &InterceptArgs, options: TargetOptions) -> ActivationResult {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!("Activating {}...", args.target));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let result = facade.activate(&args.target, args.port, options).await;

    spinner.finish_and_clear();
    result
}

/// Ask before killing the user's browser. Never asks when not a terminal.
fn confirm_close(target: &str) -> Result<bool> {
    let term = Term::stdout();
    if !term.is_term() {
        println!("{} is already running; pass --confirm-close to restart it", target);
        return Ok(false);
    }

    println!(
        "{} is already running and has to be restarted to be intercepted.",
        style(target).yellow()
    );
    print!("Close it now? [y/N] ");
    std::io::Write::flush(&mut std::io::stdout())?;

    let answer = term.read_char()?;
    println!();
    Ok(matches!(answer, 'y' | 'Y'))
}
