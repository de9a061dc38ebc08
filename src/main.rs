use anyhow::Result;
use clap::Parser;
use lifeline::services::{LLAMA, VECTOR_DB};
use lifeline::{
    LifelineConfig, ModelDirectory, ProcessService, ProcessShutdownController, ProcessTable,
    ProgressEvent, StartupOrchestrator,
};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "lifeline")]
#[command(about = "Startup and shutdown supervisor for local AI services")]
#[command(version)]
#[command(long_about = "Brings the vector database and the local inference runtime online \
in a bounded, cancellable sequence, monitors their health while running, and stops them \
gracefully (then forcibly) on SIGINT or SIGTERM.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "lifeline.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting services")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Dry run mode - build the orchestrator and print its status
    #[arg(long, help = "Build the orchestrator and print its status as JSON without starting services")]
    dry_run: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle special modes that don't require full initialization
    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting lifeline v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match LifelineConfig::load_from_file(&args.config) {
        Ok(config) => {
            info!("Configuration loaded from: {}", args.config);
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    config.validate()?;

    let orchestrator = build_orchestrator(&config)?;

    if args.dry_run {
        info!("Dry run mode - orchestrator built but services not started");
        println!(
            "{}",
            serde_json::to_string_pretty(&orchestrator.get_service_status())?
        );
        return Ok(());
    }

    orchestrator.set_progress_callback(log_progress);

    let exit_code = orchestrator.run().await.map_err(|e| {
        error!("System error during execution: {}", e);
        e
    })?;

    info!("lifeline exited with code: {}", exit_code);
    std::process::exit(exit_code);
}

fn build_orchestrator(config: &LifelineConfig) -> Result<StartupOrchestrator> {
    let processes = ProcessTable::new();
    let controller = Arc::new(ProcessShutdownController::new(&config.shutdown));

    let vector_db = ProcessService::new(
        VECTOR_DB,
        config.vector_db.clone(),
        processes.clone(),
        Arc::clone(&controller),
    );
    let llama = ProcessService::new(
        LLAMA,
        config.llama.clone(),
        processes.clone(),
        Arc::clone(&controller),
    );

    let orchestrator = StartupOrchestrator::builder()
        .with_config(config)
        .with_vector_db(Arc::new(vector_db))
        .with_llama(Arc::new(llama))
        .with_model_registry(Arc::new(ModelDirectory::new(config.models.clone())))
        .with_processes(processes)
        .with_process_controller(controller)
        .build()?;

    Ok(orchestrator)
}

fn log_progress(event: &ProgressEvent) {
    if event.is_critical() {
        error!("[{:>3}%] {}: {}", event.progress, event.phase, event.message);
    } else if event.is_warning() {
        warn!("[{:>3}%] {}: {}", event.progress, event.phase, event.message);
    } else {
        info!("[{:>3}%] {}: {}", event.progress, event.phase, event.message);
    }
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("lifeline={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# lifeline configuration file");
    println!("# Every key may also be set through LIFELINE_<SECTION>__<KEY> environment variables");
    println!();
    println!("{}", LifelineConfig::default().to_toml()?);
    Ok(())
}
