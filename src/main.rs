use anyhow::Result;
use clap::Parser;
use stackvisor::report::{EXIT_CONFIG, EXIT_INTERNAL, EXIT_OK};
use stackvisor::{load_specs, ServiceSpec, Supervisor, SupervisorConfig};
use tracing::{error, info, info_span, Instrument};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "stackvisor")]
#[command(about = "Launch and supervise a fixed set of local web services")]
#[command(version)]
#[command(long_about = "Stackvisor starts every service in its table as a child process, \
passes each one its port through the environment, and keeps them running together. \
If any service dies, or on Ctrl+C or SIGTERM, the remaining services are asked to stop \
and are force-killed after a grace period.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "stackvisor.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Override the shutdown grace period
    #[arg(long, value_name = "MS", help = "Grace period in milliseconds before stragglers are killed")]
    grace_period_ms: Option<u64>,

    /// Run a subset of the service table
    #[arg(long, value_name = "NAME", num_args = 1.., help = "Only launch the named services")]
    only: Vec<String>,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable trace level logging")]
    debug: bool,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable debug level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and service table, then exit")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Dry run mode - show the launch plan without spawning anything
    #[arg(long, help = "Print the launch plan without starting any service")]
    dry_run: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to this file
    #[arg(long, value_name = "PATH", help = "Write logs to a file in addition to the console")]
    log_file: Option<String>,

    /// Final report format
    #[arg(long, value_name = "FORMAT", default_value = "text", help = "Report format: text or json")]
    report_format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle special modes that don't require full initialization
    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let log_guard = init_logging(&args)?;

    info!("Starting Stackvisor v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let mut config = match SupervisorConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => config_failure("Failed to load configuration", e, log_guard),
    };

    if let Some(grace_period_ms) = args.grace_period_ms {
        config.supervisor.grace_period_ms = grace_period_ms;
    }
    if !args.only.is_empty() {
        if let Err(e) = config.retain_services(&args.only) {
            config_failure("Invalid service selection", e, log_guard);
        }
    }

    if let Err(e) = config.validate() {
        config_failure("Configuration validation failed", e, log_guard);
    }
    let specs = match load_specs(&config) {
        Ok(specs) => specs,
        Err(e) => config_failure("Invalid service table", e, log_guard),
    };

    if args.validate_config {
        info!("Configuration validation successful");
        println!("✓ Configuration is valid ({} services)", specs.len());
        return Ok(());
    }

    if args.dry_run {
        print_launch_plan(&specs, &config.supervisor.port_env);
        return Ok(());
    }

    let mut supervisor = match Supervisor::with_specs(specs, config.supervisor.clone()) {
        Ok(supervisor) => supervisor,
        Err(e) => config_failure("Failed to create supervisor", e, log_guard),
    };
    if let Err(e) = supervisor.install_signal_handlers() {
        error!("Failed to install signal handlers: {}", e);
        exit_flushed(EXIT_INTERNAL, log_guard);
    }

    let run_id = supervisor.run_id();
    let report = match supervisor
        .run()
        .instrument(info_span!("run", run_id = %run_id))
        .await
    {
        Ok(report) => report,
        Err(e) => {
            error!("Supervisor error during execution: {}", e);
            exit_flushed(EXIT_INTERNAL, log_guard);
        }
    };

    match args.report_format.as_str() {
        "json" => println!("{}", report.to_json()?),
        _ => print!("{}", report.render_text()),
    }

    let exit_code = report.exit_code();
    if exit_code != EXIT_OK {
        error!("Stackvisor exited with code: {}", exit_code);
    } else {
        info!("Stackvisor exited with code: {}", exit_code);
    }

    exit_flushed(exit_code, log_guard)
}

fn config_failure(context: &str, e: impl std::fmt::Display, log_guard: Option<WorkerGuard>) -> ! {
    error!("{}: {}", context, e);
    eprintln!("✗ {}: {}", context, e);
    exit_flushed(EXIT_CONFIG, log_guard)
}

/// `process::exit` skips destructors, so flush the log file first
fn exit_flushed(code: i32, log_guard: Option<WorkerGuard>) -> ! {
    drop(log_guard);
    std::process::exit(code)
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Determine log level based on flags
    let log_level = if args.debug {
        "trace"
    } else if args.verbose {
        "debug"
    } else if args.quiet {
        "error"
    } else {
        "info"
    };

    // Child output is logged under the "service" target
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("stackvisor={},service={}", log_level, log_level))
    });

    let mut layers = Vec::new();

    // Configure format based on options
    layers.push(match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") | None => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") => fmt::layer()
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
    });

    let guard = match &args.log_file {
        Some(path) => {
            let path = std::path::Path::new(path);
            let directory = path
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("Log file path '{}' has no file name", path.display()))?;

            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(directory, file_name));
            layers.push(fmt::layer().with_ansi(false).with_writer(writer).boxed());
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Stackvisor Configuration File");
    println!("# Default configuration: the dashboard homepage and its six chart backends.");
    println!("# Every setting can be overridden with STACKVISOR_<SECTION>__<KEY>,");
    println!("# e.g. STACKVISOR_SUPERVISOR__GRACE_PERIOD_MS=10000");
    println!();
    println!("{}", SupervisorConfig::default().to_toml()?);
    Ok(())
}

fn print_launch_plan(specs: &[ServiceSpec], port_env: &str) {
    println!("Launch plan ({} services):", specs.len());
    for spec in specs {
        println!(
            "  {} -> {} ({}={})",
            spec.name,
            spec.url(),
            port_env,
            spec.port
        );
        println!("      command: {}", spec.command_line());
        println!("      cwd:     {}", spec.working_dir.display());
        if let Some(description) = &spec.description {
            println!("      about:   {}", description);
        }
    }
    println!("✓ Dry run complete - nothing was started");
}
