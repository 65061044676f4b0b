mod commands;

use bosun_core::{install_signal_handler, Engine, Property};
use bosun_infra::{check_prereqs, format_missing, select_toolchain};
use bosun_schema::{Iaas, LbKind, ToolConfig};
use bosun_store::{StateLayout, StateRepository, StateStore};
use clap::{Args, Parser, Subcommand};
use commands::{EXIT_CONFIG_ERROR, EXIT_FAILURE, EXIT_STORE_ERROR};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::debug;

#[derive(Debug, Parser)]
#[command(
    name = "bosun",
    version,
    about = "Provision BOSH directors and the cloud infrastructure they run on"
)]
struct Cli {
    /// Directory holding the environment state document.
    #[arg(long, env = "BOSUN_STATE_DIR", default_value = ".", global = true)]
    state_dir: PathBuf,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    /// Stream output of terraform, bosh and the cloud CLIs as they run.
    #[arg(long, default_value_t = false, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
pub struct UpArgs {
    /// Target IAAS: aws, gcp or azure. Required for a new environment.
    #[arg(long, env = "BOSUN_IAAS")]
    iaas: Option<Iaas>,
    /// Environment name. Generated when omitted.
    #[arg(long, env = "BOSUN_ENV_NAME")]
    name: Option<String>,
    /// Provision infrastructure only, without a director.
    #[arg(long, default_value_t = false)]
    no_director: bool,
    /// Reach the director through a jumpbox instead of a public address.
    #[arg(long, default_value_t = false)]
    jumpbox: bool,
    /// Re-apply infrastructure and redeploy even when inputs are unchanged.
    #[arg(long, default_value_t = false)]
    force: bool,

    #[arg(long, env = "BOSUN_AWS_ACCESS_KEY_ID")]
    aws_access_key_id: Option<String>,
    #[arg(long, env = "BOSUN_AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    aws_secret_access_key: Option<String>,
    #[arg(long, env = "BOSUN_AWS_REGION")]
    aws_region: Option<String>,

    /// Path to a GCP service account key JSON file.
    #[arg(long, env = "BOSUN_GCP_SERVICE_ACCOUNT_KEY")]
    gcp_service_account_key: Option<PathBuf>,
    #[arg(long, env = "BOSUN_GCP_PROJECT_ID")]
    gcp_project_id: Option<String>,
    #[arg(long, env = "BOSUN_GCP_REGION")]
    gcp_region: Option<String>,
    #[arg(long, env = "BOSUN_GCP_ZONE")]
    gcp_zone: Option<String>,

    #[arg(long, env = "BOSUN_AZURE_SUBSCRIPTION_ID")]
    azure_subscription_id: Option<String>,
    #[arg(long, env = "BOSUN_AZURE_TENANT_ID")]
    azure_tenant_id: Option<String>,
    #[arg(long, env = "BOSUN_AZURE_CLIENT_ID")]
    azure_client_id: Option<String>,
    #[arg(long, env = "BOSUN_AZURE_CLIENT_SECRET", hide_env_values = true)]
    azure_client_secret: Option<String>,
    #[arg(long, env = "BOSUN_AZURE_LOCATION")]
    azure_location: Option<String>,
}

#[derive(Debug, Args)]
pub struct LbArgs {
    /// Load balancer type: cf or concourse.
    #[arg(long = "type")]
    kind: LbKind,
    /// Path to the certificate served by the load balancer.
    #[arg(long)]
    cert: Option<PathBuf>,
    /// Path to the certificate's private key.
    #[arg(long)]
    key: Option<PathBuf>,
    /// Path to an intermediate certificate chain.
    #[arg(long)]
    chain: Option<PathBuf>,
    /// Domain to create DNS records for.
    #[arg(long)]
    domain: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create or converge an environment.
    Up(UpArgs),
    /// Tear down the director, jumpbox, infrastructure and keypair.
    #[command(alias = "down")]
    Destroy {
        /// Do not ask for confirmation.
        #[arg(long, default_value_t = false)]
        no_confirm: bool,
    },
    /// Attach load balancers to the environment.
    CreateLbs(LbArgs),
    /// Replace the certificates of existing load balancers.
    UpdateLbs(LbArgs),
    /// Remove the environment's load balancers.
    DeleteLbs,
    /// Show the environment's load balancers.
    Lbs,
    /// Generate a new keypair and redeploy everything that uses it.
    Rotate,
    /// Print the environment id.
    EnvId,
    /// Print the director URL.
    DirectorAddress,
    /// Print the director admin username.
    DirectorUsername,
    /// Print the director admin password.
    DirectorPassword,
    /// Print the director CA certificate.
    DirectorCaCert,
    /// Print the jumpbox address.
    JumpboxAddress,
    /// Print the private key for SSH into the environment.
    SshKey,
    /// Print shell exports for targeting the director.
    PrintEnv,
    /// Print the cloud-config the director receives.
    CloudConfig,
    /// Print the output of the last failed external tool.
    LatestError,
    /// Upgrade the state document to the current schema version.
    Migrate,
    /// Run diagnostic checks on the tools and the state directory.
    Doctor,
}

impl Commands {
    /// Commands that drive external tools.
    fn provisions(&self) -> bool {
        matches!(
            self,
            Commands::Up(_)
                | Commands::Destroy { .. }
                | Commands::CreateLbs(_)
                | Commands::UpdateLbs(_)
                | Commands::DeleteLbs
                | Commands::Rotate
        )
    }
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("BOSUN_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    install_signal_handler();

    let result = run(cli);
    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(exit_code_for(&msg))
        }
    }
}

fn run(cli: Cli) -> Result<u8, String> {
    let json = cli.json;
    let tools = ToolConfig::load_default().map_err(|e| format!("config error: {e}"))?;
    let toolchain_name = std::env::var("BOSUN_TOOLCHAIN").unwrap_or_else(|_| "cli".to_owned());

    if cli.command.provisions()
        && toolchain_name != "mock"
        && std::env::var("BOSUN_SKIP_PREREQS").as_deref() != Ok("1")
    {
        ensure_prereqs(&cli.state_dir, &cli.command, &tools)?;
    }

    let engine = || -> Result<Engine, String> {
        let toolchain = select_toolchain(&toolchain_name, &tools, cli.debug)
            .map_err(|e| format!("config error: {e}"))?;
        debug!(
            "{} toolchain, state dir {}",
            toolchain.name,
            cli.state_dir.display()
        );
        Ok(Engine::new(&cli.state_dir, toolchain))
    };

    match cli.command {
        Commands::Up(args) => commands::up::run(&engine()?, &args, json),
        Commands::Destroy { no_confirm } => commands::destroy::run(&engine()?, no_confirm, json),
        Commands::CreateLbs(args) => commands::lbs::create(&engine()?, &args, json),
        Commands::UpdateLbs(args) => commands::lbs::update(&engine()?, &args, json),
        Commands::DeleteLbs => commands::lbs::delete(&engine()?, json),
        Commands::Lbs => commands::lbs::list(&engine()?, json),
        Commands::Rotate => commands::rotate::run(&engine()?, json),
        Commands::EnvId => commands::query::run(&engine()?, Property::EnvId, json),
        Commands::DirectorAddress => {
            commands::query::run(&engine()?, Property::DirectorAddress, json)
        }
        Commands::DirectorUsername => {
            commands::query::run(&engine()?, Property::DirectorUsername, json)
        }
        Commands::DirectorPassword => {
            commands::query::run(&engine()?, Property::DirectorPassword, json)
        }
        Commands::DirectorCaCert => commands::query::run(&engine()?, Property::DirectorCaCert, json),
        Commands::JumpboxAddress => commands::query::run(&engine()?, Property::JumpboxAddress, json),
        Commands::SshKey => commands::query::ssh_key(&engine()?, json),
        Commands::PrintEnv => commands::print_env::run(&engine()?, json),
        Commands::CloudConfig => commands::query::cloud_config(&engine()?, json),
        Commands::LatestError => commands::query::latest_error(&engine()?, json),
        Commands::Migrate => commands::migrate::run(&cli.state_dir, json),
        Commands::Doctor => commands::doctor::run(&cli.state_dir, &tools, json),
    }
}

/// Check for the binaries the command will drive. The IAAS comes from `--iaas`
/// or, for an existing environment, from its state; without either there is
/// nothing to check and the command reports the missing IAAS itself.
fn ensure_prereqs(state_dir: &Path, command: &Commands, tools: &ToolConfig) -> Result<(), String> {
    let state = StateStore::new(StateLayout::new(state_dir)).load().ok();
    let (requested, no_director) = match command {
        Commands::Up(args) => (args.iaas, args.no_director),
        _ => (None, false),
    };
    let Some(iaas) = requested.or_else(|| state.as_ref().and_then(|s| s.iaas)) else {
        return Ok(());
    };
    let with_director = !no_director && !state.is_some_and(|s| s.no_director);
    let missing = check_prereqs(iaas, tools, with_director);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(format_missing(&missing))
    }
}

fn exit_code_for(msg: &str) -> u8 {
    if msg.starts_with("missing credentials")
        || msg.starts_with("validation error")
        || msg.starts_with("config error")
    {
        EXIT_CONFIG_ERROR
    } else if msg.starts_with("store error:") || msg.starts_with("state directory is locked") {
        EXIT_STORE_ERROR
    } else {
        EXIT_FAILURE
    }
}
