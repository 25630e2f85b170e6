use clap::Parser;
use code_exec::{CodeExecutionService, ExecutorConfig, Registry, ResourceLimits};
use code_exec_server::{create_app, run_server, shutdown_signal};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to listen on
    #[arg(short, long, default_value = "0.0.0.0:3000")]
    addr: SocketAddr,

    /// Maximum number of concurrent executions
    #[arg(short, long, default_value = "10")]
    max_concurrent: usize,

    /// Directory for per-request workspaces (defaults to $TMPDIR/code-exec)
    #[arg(long)]
    workspace_root: Option<PathBuf>,

    /// Budget in seconds when a request does not set one
    #[arg(long, default_value = "10")]
    timeout: u64,

    /// Largest budget in seconds a request may ask for
    #[arg(long, default_value = "60")]
    max_timeout: u64,

    /// Per-stream output cap in bytes
    #[arg(long, default_value = "65536")]
    max_output_bytes: usize,

    /// CPU time limit in seconds per child process
    #[arg(long, default_value = "30")]
    cpu_time_limit: u32,

    /// File size limit in bytes
    #[arg(long, default_value = "67108864")] // 64MB
    file_size_limit: u64,

    /// Extra recipe table (TOML) layered over the built-in one
    #[arg(long)]
    recipes: Option<PathBuf>,

    /// Build caches shared across requests (defaults to $TMPDIR/code-exec-cache)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Host environment variable to hand to every child (repeatable)
    #[arg(long = "pass-env", value_name = "NAME")]
    pass_env: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut registry = Registry::builtin()?;
    if let Some(path) = &args.recipes {
        registry = registry.extend(Registry::load(path)?)?;
        info!("Loaded recipe overrides from {}", path.display());
    }
    info!(languages = ?registry.languages(), "Toolchain registry ready");

    let defaults = ExecutorConfig::default();
    let mut config = ExecutorConfig {
        workspace_root: args.workspace_root.unwrap_or(defaults.workspace_root),
        default_timeout: Duration::from_secs(args.timeout),
        max_timeout: Duration::from_secs(args.max_timeout),
        max_concurrent: args.max_concurrent,
        max_output_bytes: args.max_output_bytes,
        limits: ResourceLimits {
            cpu_time: args.cpu_time_limit,
            file_size: args.file_size_limit,
        },
        child_path: defaults.child_path,
        child_env: defaults.child_env,
        cache_dir: args.cache_dir.unwrap_or(defaults.cache_dir),
    };
    for name in &args.pass_env {
        if !config.pass_through(name) {
            warn!("{} is not set on this host, not passing it through", name);
        }
    }

    let service = CodeExecutionService::new(config, registry)?;
    let app = create_app(service);
    run_server(app, args.addr, shutdown_signal()).await?;

    Ok(())
}
