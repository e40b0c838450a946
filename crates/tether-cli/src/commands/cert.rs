use crate::OutputFormat;
use crate::setup::{self, GlobalOptions};
use anyhow::Result;
use console::style;
use std::sync::Arc;
use tether_core::SystemRunner;
use tether_trust::{CertificateAuthority, CertificateTrustManager, authority::DEFAULT_CA_NAME};

pub fn status(options: &GlobalOptions, format: OutputFormat) -> Result<()> {
    let runtime = setup::runtime()?;

    runtime.block_on(async {
        let context = setup::load_context(setup::load_config(options)?)?;
        let trust = CertificateTrustManager::new(Arc::new(SystemRunner));
        let status = trust.status(&context.ca).await?;

        let report = serde_json::json!({
            "path": context.ca.path(),
            "commonName": context.ca.common_name(),
            "spkiFingerprint": context.ca.spki_fingerprint(),
            "installed": status.installed,
            "trusted": status.trusted,
        });
        if format.print_json(&report)? {
            return Ok(());
        }

        println!("{}", style("CA certificate").bold());
        println!("  Path:       {}", context.ca.path().display());
        println!("  Name:       {}", context.ca.display_name());
        println!("  SPKI:       {}", context.ca.spki_fingerprint());
        println!("  Installed:  {}", yes_no(status.installed));
        println!("  Trusted:    {}", yes_no(status.trusted));
        if !status.is_usable() {
            println!();
            println!("Run 'tether cert install' to trust it system-wide.");
        }
        Ok(())
    })
}

pub fn install(options: &GlobalOptions) -> Result<()> {
    let runtime = setup::runtime()?;

    runtime.block_on(async {
        let context = setup::load_context(setup::load_config(options)?)?;
        let trust = CertificateTrustManager::new(Arc::new(SystemRunner));

        if trust.status(&context.ca).await?.is_usable() {
            println!("✅ {} is already trusted", context.ca.display_name());
            return Ok(());
        }

        println!("🔐 Installing {} (you may be asked for your password)...", context.ca.display_name());
        trust.install(&context.ca).await?;

        if trust.status(&context.ca).await?.is_usable() {
            println!("✅ Installed and trusted");
        } else {
            println!("⚠️  Installed, but the OS does not report it as trusted yet");
        }
        Ok(())
    })
}

pub fn generate(options: &GlobalOptions, force: bool) -> Result<()> {
    let config = setup::load_config(options)?;
    let cert_path = config.ca_cert_path();
    let key_path = CertificateAuthority::key_path_for(&cert_path);

    if cert_path.exists() && !force {
        println!("CA already exists at {}", cert_path.display());
        println!("Use --force to replace it.");
        return Ok(());
    }

    let authority = CertificateAuthority::generate(DEFAULT_CA_NAME)?;
    authority.save_to_pem(&cert_path, &key_path)?;
    let ca = authority.certificate(&cert_path)?;

    println!("✅ Generated {}", ca.display_name());
    println!("   Certificate: {}", cert_path.display());
    println!("   Key:         {}", key_path.display());
    println!("   SPKI:        {}", ca.spki_fingerprint());
    Ok(())
}

fn yes_no(value: bool) -> console::StyledObject<&'static str> {
    if value {
        style("yes").green()
    } else {
        style("no").red()
    }
}
