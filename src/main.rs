use std::env;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use config::{Config, Environment, File, FileFormat};
use log::{LevelFilter, debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use magpie::agent::{AgentClient, AgentClientConfig};
use magpie::api::{AppState, ProxyState, create_router};
use magpie::auth::{AuthConfig, AuthState};
use magpie::db::Database;
use magpie::directory::{ProfileRepository, UserProfile};
use magpie::gateway::{GatewayClient, GatewayClientConfig, RetryPolicy};
use magpie::history::{HistoryRepository, UsageLedger};
use magpie::relay::ChatRelay;

const APP_NAME: &str = "magpie";

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_main(ctx: RuntimeContext, cmd: ServeCommand) -> Result<()> {
    handle_serve(&ctx, cmd).await
}

#[tokio::main]
async fn async_users(ctx: RuntimeContext, cmd: UsersCommand) -> Result<()> {
    handle_users(&ctx, cmd).await
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("resolved paths: {:#?}", ctx.paths);

    match cli.command {
        Command::Serve(cmd) => async_main(ctx, cmd),
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Users { command } => async_users(ctx, command),
        Command::Completions { shell } => handle_completions(shell),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Magpie - chat relay between users, a stateful agent host, and a metered LLM gateway.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Output machine readable JSON
    #[arg(long, global = true)]
    json: bool,
    /// Disable ANSI colors in output
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    no_color: bool,
    /// Control color output (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    color: ColorOption,
    /// Do not change anything on disk
    #[arg(long = "dry-run", global = true)]
    dry_run: bool,
    /// Assume "yes" for interactive prompts
    #[arg(short = 'y', long = "yes", alias = "force", global = true)]
    assume_yes: bool,
    /// Emit additional diagnostics for troubleshooting
    #[arg(long = "diagnostics", global = true)]
    diagnostics: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the HTTP API server
    Serve(ServeCommand),
    /// Create config directories and default files
    Init(InitCommand),
    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Manage user profiles and gateway credentials
    Users {
        #[command(subcommand)]
        command: UsersCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Host address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,
    /// Override the SQLite database path
    #[arg(long, value_name = "PATH")]
    database: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct InitCommand {
    /// Recreate configuration even if it already exists
    #[arg(long = "force")]
    force: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
    /// Regenerate the default configuration file
    Reset,
}

#[derive(Debug, Subcommand)]
enum UsersCommand {
    /// Create a user profile and provision its gateway credential
    Provision(UsersProvisionCommand),
    /// Rotate a user's gateway credential
    RotateKey(UsersRotateKeyCommand),
    /// Show a user profile (credential shown as a preview only)
    Show {
        /// User ID to look up
        user_id: String,
    },
}

#[derive(Debug, Clone, Args)]
struct UsersProvisionCommand {
    /// User ID to create
    user_id: String,
    /// Display name
    #[arg(short, long, default_value = "")]
    name: String,
    /// Agent reference on the agent host to attach
    #[arg(long, value_name = "AGENT_REF")]
    agent_ref: Option<String>,
    /// Spend ceiling for the gateway credential, in USD
    #[arg(long, default_value = "10.0")]
    max_budget: f64,
    /// Skip gateway provisioning and create the profile only
    #[arg(long)]
    no_gateway: bool,
}

#[derive(Debug, Clone, Args)]
struct UsersRotateKeyCommand {
    /// User ID whose credential to rotate
    user_id: String,
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    paths: AppPaths,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let mut paths = AppPaths::discover(common.config.clone())?;
        let config = load_or_init_config(&mut paths, &common)?;
        let paths = paths.apply_overrides(&config)?;
        let ctx = Self {
            common,
            paths,
            config,
        };
        ctx.ensure_directories()?;
        Ok(ctx)
    }

    fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }

        let level = match self.effective_log_level() {
            LevelFilter::Off => "off",
            LevelFilter::Error => "error",
            LevelFilter::Warn => "warn",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::Trace => "trace",
        };

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("magpie={level},tower_http={level}")));

        // Use JSON output if --json flag is set, otherwise pretty format
        if self.common.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .ok();
        } else {
            let force_color = matches!(self.common.color, ColorOption::Always)
                || env::var_os("FORCE_COLOR").is_some();
            let disable_color = self.common.no_color
                || matches!(self.common.color, ColorOption::Never)
                || env::var_os("NO_COLOR").is_some()
                || (!force_color && !io::stderr().is_terminal());

            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(!disable_color)
                        .with_target(self.common.diagnostics)
                        .with_file(self.common.diagnostics)
                        .with_line_number(self.common.diagnostics),
                )
                .try_init()
                .ok();
        }

        // Also init env_logger for compatibility with log crate users
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
        builder.filter_level(self.effective_log_level());
        builder.try_init().ok();

        Ok(())
    }

    fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            LevelFilter::Trace
        } else if self.common.debug {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => LevelFilter::Info,
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }

    fn ensure_directories(&self) -> Result<()> {
        if self.common.dry_run {
            info!(
                "dry-run: would ensure data dir {}",
                self.paths.data_dir.display()
            );
            return Ok(());
        }

        fs::create_dir_all(&self.paths.data_dir).with_context(|| {
            format!("creating data directory {}", self.paths.data_dir.display())
        })?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct AppPaths {
    config_file: PathBuf,
    data_dir: PathBuf,
}

impl AppPaths {
    fn discover(override_path: Option<PathBuf>) -> Result<Self> {
        let config_file = match override_path {
            Some(path) => {
                let expanded = expand_path(path)?;
                if expanded.is_dir() {
                    expanded.join("config.toml")
                } else {
                    expanded
                }
            }
            None => default_config_dir()?.join("config.toml"),
        };

        if config_file.parent().is_none() {
            return Err(anyhow!("invalid config file path: {config_file:?}"));
        }

        let data_dir = default_data_dir()?;

        Ok(Self {
            config_file,
            data_dir,
        })
    }

    fn apply_overrides(mut self, cfg: &AppConfig) -> Result<Self> {
        if let Some(ref data_override) = cfg.paths.data_dir {
            self.data_dir = expand_str_path(data_override)?;
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
struct AppConfig {
    logging: LoggingConfig,
    paths: PathsConfig,
    database: DatabaseConfig,
    server: ServerConfig,
    auth: AuthConfig,
    agent_host: AgentHostConfig,
    gateway: GatewayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct LoggingConfig {
    level: String,
    file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
struct PathsConfig {
    data_dir: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
struct DatabaseConfig {
    /// SQLite database file. Defaults to magpie.db in the data directory.
    path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct ServerConfig {
    host: String,
    port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Stateful agent host (conversation engine) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct AgentHostConfig {
    base_url: String,
    /// API token for the agent host, if it requires one.
    /// `env:VAR_NAME` reads the value from the environment at startup.
    api_token: Option<String>,
    /// Ceiling in seconds for one full streamed conversation turn.
    streaming_timeout_secs: u64,
    /// Timeout in seconds for short lookups.
    request_timeout_secs: u64,
}

impl Default for AgentHostConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8283".to_string(),
            api_token: None,
            streaming_timeout_secs: 300,
            request_timeout_secs: 30,
        }
    }
}

/// Metered LLM gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct GatewayConfig {
    base_url: String,
    /// Master key for gateway admin operations.
    /// `env:VAR_NAME` reads the value from the environment at startup.
    master_key: Option<String>,
    /// Shared secret the agent host presents on /llm-proxy calls.
    /// `env:VAR_NAME` reads the value from the environment at startup.
    shared_secret: Option<String>,
    request_timeout_secs: u64,
    retry_attempts: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:4000".to_string(),
            master_key: None,
            shared_secret: None,
            request_timeout_secs: 60,
            retry_attempts: 3,
        }
    }
}

fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
    if ctx.paths.config_file.exists() && !(cmd.force || ctx.common.assume_yes) {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            ctx.paths.config_file.display()
        ));
    }

    if ctx.common.dry_run {
        info!(
            "dry-run: would write default config to {}",
            ctx.paths.config_file.display()
        );
        return Ok(());
    }

    write_default_config(&ctx.paths.config_file)
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if ctx.common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ctx.config)
                        .context("serializing config to JSON")?
                );
            } else {
                println!("{:#?}", ctx.config);
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.paths.config_file.display());
            Ok(())
        }
        ConfigCommand::Reset => {
            if ctx.common.dry_run {
                info!(
                    "dry-run: would reset config at {}",
                    ctx.paths.config_file.display()
                );
                return Ok(());
            }
            write_default_config(&ctx.paths.config_file)
        }
    }
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}

async fn handle_users(ctx: &RuntimeContext, cmd: UsersCommand) -> Result<()> {
    let database = Database::new(&resolve_db_path(ctx, None)?).await?;
    let profiles = ProfileRepository::new(database.pool().clone());

    match cmd {
        UsersCommand::Provision(provision) => {
            profiles
                .upsert(&UserProfile {
                    id: provision.user_id.clone(),
                    name: provision.name.clone(),
                    agent_ref: None,
                    gateway_key: None,
                    created_at: chrono::Utc::now(),
                })
                .await?;

            if let Some(ref agent_ref) = provision.agent_ref {
                profiles.set_agent_ref(&provision.user_id, agent_ref).await?;
            }

            let mut preview = None;
            if !provision.no_gateway {
                let gateway = build_gateway_client(ctx)?;
                let key = gateway
                    .create_user(&provision.user_id, provision.max_budget)
                    .await
                    .context("provisioning gateway credential")?;
                profiles.set_gateway_key(&provision.user_id, &key).await?;
                preview = profiles
                    .get(&provision.user_id)
                    .await?
                    .and_then(|p| p.key_preview());
            }

            if ctx.common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "id": provision.user_id,
                        "agent_ref": provision.agent_ref,
                        "credential_preview": preview,
                    }))?
                );
            } else {
                println!("Provisioned user {}", provision.user_id);
                if let Some(preview) = preview {
                    println!("Gateway credential: {preview}");
                }
            }
        }
        UsersCommand::RotateKey(rotate) => {
            let profile = profiles
                .get(&rotate.user_id)
                .await?
                .ok_or_else(|| anyhow!("user not found: {}", rotate.user_id))?;

            let gateway = build_gateway_client(ctx)?;
            let key = gateway
                .reset_user_key(&profile.id)
                .await
                .context("rotating gateway credential")?;
            profiles.set_gateway_key(&profile.id, &key).await?;

            println!("Rotated gateway credential for {}", profile.id);
        }
        UsersCommand::Show { user_id } => {
            let profile = profiles
                .get(&user_id)
                .await?
                .ok_or_else(|| anyhow!("user not found: {user_id}"))?;

            if ctx.common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "id": profile.id,
                        "name": profile.name,
                        "agent_ref": profile.agent_ref,
                        "credential_preview": profile.key_preview(),
                        "created_at": profile.created_at,
                    }))?
                );
            } else {
                println!("id:         {}", profile.id);
                println!("name:       {}", profile.name);
                println!(
                    "agent_ref:  {}",
                    profile.agent_ref.as_deref().unwrap_or("(none)")
                );
                println!(
                    "credential: {}",
                    profile.key_preview().as_deref().unwrap_or("(none)")
                );
            }
        }
    }

    Ok(())
}

fn resolve_db_path(ctx: &RuntimeContext, cli_override: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = cli_override {
        return Ok(path.to_path_buf());
    }
    if let Some(ref configured) = ctx.config.database.path {
        return expand_str_path(configured);
    }
    Ok(ctx.paths.data_dir.join("magpie.db"))
}

fn build_gateway_client(ctx: &RuntimeContext) -> Result<Arc<GatewayClient>> {
    let gateway_cfg = &ctx.config.gateway;
    let master_key = resolve_secret(gateway_cfg.master_key.as_deref())?
        .ok_or_else(|| anyhow!("gateway.master_key is required"))?;

    Ok(Arc::new(GatewayClient::new(GatewayClientConfig {
        base_url: gateway_cfg.base_url.clone(),
        master_key,
        request_timeout: Duration::from_secs(gateway_cfg.request_timeout_secs),
        retry: RetryPolicy {
            max_attempts: gateway_cfg.retry_attempts,
            ..RetryPolicy::default()
        },
    })?))
}

async fn handle_serve(ctx: &RuntimeContext, cmd: ServeCommand) -> Result<()> {
    info!("Starting magpie server...");

    let db_path = resolve_db_path(ctx, cmd.database.as_deref())?;
    info!("Database path: {}", db_path.display());
    let database = Database::new(&db_path).await?;

    let auth_config = ctx.config.auth.clone();
    info!(
        "Auth mode: {}",
        if auth_config.dev_mode {
            "development"
        } else {
            "production"
        }
    );
    if !auth_config.dev_mode && auth_config.jwt_secret.is_none() {
        anyhow::bail!("auth.jwt_secret is required outside dev mode");
    }

    let profiles = ProfileRepository::new(database.pool().clone());
    let history = HistoryRepository::new(database.pool().clone());
    let ledger = UsageLedger::new(database.pool().clone());

    let agent_cfg = &ctx.config.agent_host;
    let agent = Arc::new(AgentClient::new(AgentClientConfig {
        base_url: agent_cfg.base_url.clone(),
        api_token: resolve_secret(agent_cfg.api_token.as_deref())?,
        streaming_timeout: Duration::from_secs(agent_cfg.streaming_timeout_secs),
        request_timeout: Duration::from_secs(agent_cfg.request_timeout_secs),
    })?);

    let shared_secret = resolve_secret(ctx.config.gateway.shared_secret.as_deref())?
        .ok_or_else(|| anyhow!("gateway.shared_secret is required"))?;
    let gateway = build_gateway_client(ctx)?;

    // Startup probe only. The server still comes up when the gateway is down.
    match gateway.health().await {
        Ok(()) => info!("LLM gateway at {} is healthy", ctx.config.gateway.base_url),
        Err(e) => warn!(
            "LLM gateway health check failed: {e}. Proxy and chat requests may fail until it recovers."
        ),
    }

    let relay = ChatRelay::new(agent.clone(), history, ledger);
    let auth_state = AuthState::new(auth_config, profiles.clone());
    let state = AppState::new(
        relay,
        agent,
        gateway,
        profiles,
        auth_state,
        ProxyState { shared_secret },
    );

    let app = create_router(state);

    let host = if cmd.host == "0.0.0.0" {
        ctx.config.server.host.clone()
    } else {
        cmd.host.clone()
    };
    let port = if cmd.port == 8080 {
        ctx.config.server.port
    } else {
        cmd.port
    };

    let addr: SocketAddr = format!("{host}:{port}").parse().context("invalid address")?;

    info!("Listening on http://{}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .context("binding to address")?;

    let shutdown_signal = async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        info!("Shutdown signal received");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("running server")?;

    Ok(())
}

/// Resolve a config value that may use `env:VAR_NAME` indirection.
fn resolve_secret(value: Option<&str>) -> Result<Option<String>> {
    match value {
        Some(v) => {
            if let Some(var) = v.strip_prefix("env:") {
                let resolved =
                    env::var(var).with_context(|| format!("reading secret from ${var}"))?;
                Ok(Some(resolved))
            } else {
                Ok(Some(v.to_string()))
            }
        }
        None => Ok(None),
    }
}

fn load_or_init_config(paths: &mut AppPaths, common: &CommonOpts) -> Result<AppConfig> {
    if !paths.config_file.exists() {
        if common.dry_run {
            info!(
                "dry-run: would create default config at {}",
                paths.config_file.display()
            );
        } else {
            write_default_config(&paths.config_file)?;
        }
    }

    let env_prefix = env_prefix();
    let built = Config::builder()
        .set_default("logging.level", "info")?
        .add_source(
            File::from(paths.config_file.as_path())
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(Environment::with_prefix(env_prefix.as_str()).separator("__"))
        .build()?;

    let mut config: AppConfig = built.try_deserialize()?;

    if let Some(ref file) = config.logging.file {
        let expanded = expand_str_path(file)?;
        config.logging.file = Some(expanded.display().to_string());
    }

    Ok(config)
}

fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = default_config_header(path)?;
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn default_config_header(path: &Path) -> Result<String> {
    let mut buffer = String::new();
    buffer.push_str("# Configuration for ");
    buffer.push_str(APP_NAME);
    buffer.push('\n');
    buffer.push_str("# File: ");
    buffer.push_str(&path.display().to_string());
    buffer.push('\n');
    buffer.push('\n');
    Ok(buffer)
}

fn expand_path(path: PathBuf) -> Result<PathBuf> {
    if let Some(text) = path.to_str() {
        expand_str_path(text)
    } else {
        Ok(path)
    }
}

fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        let mut path = PathBuf::from(dir);
        path.push(APP_NAME);
        return Ok(path);
    }

    if let Some(mut dir) = dirs::config_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

fn default_data_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(mut dir) = dirs::data_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".local").join("share").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine data directory"))
}

fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
