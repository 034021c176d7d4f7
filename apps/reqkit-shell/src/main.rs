use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use reqkit::{
    make_request, prepare, AppEnvironment, AppRegistry, Application, DefaultRoot, Object,
    RequestExtensions, Router, Settings,
};
use reqkit_bootstrap::{default_logging_config, AppConfig, CliArgs};

use std::path::PathBuf;
use std::sync::Arc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// ReqKit Shell - bootstrap a request against a configured application
#[derive(Parser)]
#[command(name = "reqkit-shell")]
#[command(about = "ReqKit Shell - bootstrap a request against a configured application")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Prepare a request for PATH and print what it resolved to
    Root {
        /// Request path (defaults to app.default_path)
        path: Option<String>,
    },
    /// Validate configuration and exit
    Check,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Layered config:
    // 1) defaults -> 2) YAML (if provided) -> 3) env (REQKIT__*) -> 4) CLI overrides
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&CliArgs {
        verbose: cli.verbose,
    });

    let logging_config = config
        .logging
        .clone()
        .unwrap_or_else(default_logging_config);
    reqkit_bootstrap::init_logging(&logging_config, &config.home_dir());

    tracing::info!(app = %config.app.name, "ReqKit shell starting");

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Root { path: None }) {
        Commands::Root { path } => run_root(&config, path),
        Commands::Check => check_config(&config),
    }
}

/// Build the application: settings land in the registry, and every request
/// gets a reified `settings` property backed by them.
fn build_app(config: &AppConfig) -> Result<Router> {
    let mut extensions = RequestExtensions::new();
    extensions.add_reified_property("settings", |request| {
        let settings = request
            .registry()
            .and_then(|r| r.settings().cloned())
            .unwrap_or_default();
        Arc::new(settings) as Object
    });

    let registry = AppRegistry::builder(config.app.name.clone())
        .settings(config.settings.clone())
        .request_extensions(extensions)
        .build()
        .context("Failed to build application registry")?;

    Ok(Router::new(Arc::new(registry)))
}

fn describe(env: &AppEnvironment) -> serde_json::Value {
    let root = match env.root.clone().downcast::<DefaultRoot>() {
        Ok(_) => "default",
        Err(_) => "custom",
    };
    let settings = env
        .request
        .property_as::<Settings>("settings")
        .map(|s| serde_json::Value::Object((*s).clone()))
        .unwrap_or(serde_json::Value::Null);

    serde_json::json!({
        "application": env.registry.name(),
        "path": env.request.path(),
        "query": env.request.environ_value("QUERY_STRING").unwrap_or_default(),
        "root": root,
        "settings": settings,
    })
}

fn run_root(config: &AppConfig, path: Option<String>) -> Result<()> {
    let app = build_app(config)?;
    let path = path.unwrap_or_else(|| config.app.default_path.clone());

    let request = make_request(&path, Some(app.registry()))?;
    let env = prepare(Some(request), None)?;
    tracing::debug!(path = %path, "Request prepared for shell");

    let report = describe(&env);
    env.close();

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn check_config(config: &AppConfig) -> Result<()> {
    tracing::info!("Checking configuration…");
    config.validate()?;
    let app = build_app(config)?;
    tracing::info!(registry = %app.registry().name(), "Application registry builds");
    println!("Configuration is valid");
    println!("{}", config.to_yaml()?);
    Ok(())
}
