use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use tether_cli::OutputFormat;
use tether_cli::commands;
use tether_cli::commands::intercept::InterceptArgs;
use tether_cli::setup::GlobalOptions;

#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
#[command(
    about = "Route browsers, apps and devices through a local intercepting proxy",
    long_about = "Tether launches and reconfigures interception targets (browsers, Electron apps, \
                  the system proxy, Android devices and iOS simulators) so their traffic flows \
                  through a local HTTP proxy that trusts its own CA."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (json, table, pretty)
    #[arg(short, long, global = true, value_enum, default_value = "pretty")]
    format: OutputFormat,

    /// Path to a config file
    #[arg(long, global = true, env = "TETHER_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for the CA, profiles and other generated state
    #[arg(long, global = true, env = "TETHER_CONFIG_ROOT")]
    config_root: Option<PathBuf>,

    /// Host the proxy is reachable on
    #[arg(long, global = true, env = "TETHER_PROXY_HOST")]
    proxy_host: Option<String>,

    /// CA certificate to use instead of <config-root>/ca.crt
    #[arg(long, global = true, env = "TETHER_CA_CERT")]
    ca_cert: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List interception targets and whether they can be used here
    Targets,

    /// Activate a target and keep it intercepted until Ctrl+C
    Intercept {
        /// Target id (see `tether targets`)
        #[arg(value_name = "TARGET")]
        target: String,

        /// Port the intercepting proxy listens on
        #[arg(short, long, default_value = "8000")]
        port: u16,

        /// Close an already running browser without asking
        #[arg(long)]
        confirm_close: bool,

        /// Application to launch (electron)
        #[arg(long, value_name = "PATH")]
        app: Option<PathBuf>,

        /// Device serial or simulator udid (android, ios-simulator)
        #[arg(long, value_name = "ID")]
        device: Option<String>,
    },

    /// Accept JSON requests on stdin and answer on stdout, one per line
    Serve,

    /// Inspect, trust or regenerate the CA certificate
    Cert {
        #[command(subcommand)]
        command: CertCommands,
    },

    /// List attached Android devices and iOS simulators
    Devices,

    /// Generate shell completion scripts
    #[command(long_about = "Generate shell completion scripts for tether

SUPPORTED SHELLS:
    bash, zsh, fish, powershell, elvish

INSTALLATION:
    Bash:
        tether completion --shell bash > ~/.local/share/bash-completion/completions/tether
        # or add to ~/.bashrc:
        eval \"$(tether completion --shell bash)\"

    Zsh:
        tether completion --shell zsh > \"${fpath[1]}/_tether\"
        # or add to ~/.zshrc:
        eval \"$(tether completion --shell zsh)\"

    Fish:
        tether completion --shell fish > ~/.config/fish/completions/tether.fish

    PowerShell:
        tether completion --shell powershell >> $PROFILE")]
    Completion {
        /// Shell to generate completions for
        #[arg(long, value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum CertCommands {
    /// Show whether the CA is installed and trusted
    Status,

    /// Install the CA into the operating system trust store
    Install,

    /// Generate a new CA
    Generate {
        /// Replace an existing CA
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    let options = GlobalOptions {
        config: cli.config,
        config_root: cli.config_root,
        proxy_host: cli.proxy_host,
        ca_cert: cli.ca_cert,
    };

    match cli.command {
        Commands::Targets => commands::targets::execute(&options, cli.format),
        Commands::Intercept {
            target,
            port,
            confirm_close,
            app,
            device,
        } => commands::intercept::execute(
            &options,
            InterceptArgs {
                target,
                port,
                confirm_close,
                app,
                device,
            },
        ),
        Commands::Serve => commands::serve::execute(&options),
        Commands::Cert { command } => match command {
            CertCommands::Status => commands::cert::status(&options, cli.format),
            CertCommands::Install => commands::cert::install(&options),
            CertCommands::Generate { force } => commands::cert::generate(&options, force),
        },
        Commands::Devices => commands::devices::execute(&options, cli.format),
        Commands::Completion { shell } => {
            let mut cmd = Cli::command();
            commands::completion::execute(shell, &mut cmd)
        }
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new(
            "tether=debug,tether_cli=debug,tether_core=debug,tether_trust=debug,\
             tether_browser=debug,tether_debug=debug,tether_mobile=debug",
        )
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("tether=info,tether_cli=info,tether_core=info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}
