use anyhow::Context;
use clap::Parser;
use payments_etl::config::PipelineSettings;
use payments_etl::core::progress::TracingReporter;
use payments_etl::domain::model::RunRequest;
use payments_etl::domain::ports::ConfigProvider;
use payments_etl::utils::logger;
use payments_etl::utils::validation::{validate_file_exists, Validate};
use payments_etl::{EtlEngine, MemoryConnector, MemoryStore, MySqlConnector, StreamingPipeline, TomlConfig};

#[derive(Parser)]
#[command(name = "toml-load")]
#[command(about = "Load a payments file into MySQL as described by a TOML configuration")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "payments-etl.toml")]
    config: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Override monitoring setting from config
    #[arg(long)]
    monitor: Option<bool>,

    /// Read and convert the whole input without touching the database
    #[arg(long)]
    dry_run: bool,

    /// Print the run result as JSON on stdout
    #[arg(long)]
    json_summary: bool,
}

fn load_config(path: &str) -> anyhow::Result<(TomlConfig, RunRequest)> {
    let config = TomlConfig::from_file(path)
        .with_context(|| format!("failed to load config file '{}'", path))?;
    config
        .validate()
        .with_context(|| format!("invalid configuration in '{}'", path))?;
    let request = config
        .run_request()
        .context("could not build the run request")?;
    // fail before connecting when the input is missing
    validate_file_exists("source.path", &request.input_path.to_string_lossy())?;
    Ok((config, request))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // 載入 TOML 配置
    let (config, request) = match load_config(&args.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            eprintln!("💡 Make sure the file exists, is valid TOML and names an existing input file");
            std::process::exit(1);
        }
    };

    // 初始化日誌
    if config.json_logs() {
        logger::init_json_logger(args.verbose);
    } else {
        logger::init_cli_logger(args.verbose);
    }
    tracing::info!("📁 Configuration loaded from: {}", args.config);

    display_config_summary(&request, &args);

    // 決定監控設定
    let monitor_enabled = args.monitor.unwrap_or_else(|| config.monitoring_enabled());
    if monitor_enabled {
        tracing::info!("🔍 System monitoring enabled");
    }

    let result = if args.dry_run {
        tracing::info!("🔍 DRY RUN MODE - rows are converted and counted, nothing is written");
        let store = MemoryStore::discarding();
        let pipeline = StreamingPipeline::new(MemoryConnector::new(store.clone()), request.settings)
            .with_reporter(TracingReporter);
        let result = EtlEngine::new_with_monitoring(pipeline, monitor_enabled)
            .run(&request.input_path)
            .await;
        println!("🔍 {} rows would be loaded", store.committed_count());
        result
    } else {
        let connector = MySqlConnector::new(request.connection, request.settings.table.clone());
        let pipeline = StreamingPipeline::new(connector, request.settings).with_reporter(TracingReporter);

        let cancel = pipeline.cancellation_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("🛑 interrupt received, finishing the current batch");
                cancel.cancel();
            }
        });

        EtlEngine::new_with_monitoring(pipeline, monitor_enabled)
            .run(&request.input_path)
            .await
    };

    if args.json_summary {
        println!("{}", serde_json::to_string_pretty(&result.to_json())?);
    }

    match &result.error {
        None => println!(
            "✅ {} rows loaded, {} batch(es) rolled back",
            result.rows_inserted(),
            result.batches_failed()
        ),
        Some(e) => {
            tracing::error!(
                "❌ Load failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());
        }
    }

    let exit_code = result.exit_code();
    if exit_code > 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

fn display_config_summary(request: &RunRequest, args: &Args) {
    let settings: &PipelineSettings = &request.settings;
    println!("📋 Configuration Summary:");
    println!("  Input: {}", request.input_path.display());
    println!("  Database: {} (table `{}`)", request.connection.target(), settings.table);
    println!("  Batch size: {}", settings.batch_size);
    println!("  Chunk size: {}", settings.chunk_size);
    println!("  Delimiter: {:?}", settings.delimiter);
    println!("  Date format: {}", settings.date_format);
    println!("  On transform error: {:?}", settings.on_transform_error);
    println!("  On commit error: {:?}", settings.on_commit_error);
    if let Some(timeout) = settings.commit_timeout {
        println!("  Commit timeout: {:?}", timeout);
    }
    if args.dry_run {
        println!("  🔍 DRY RUN MODE ENABLED");
    }
    println!();
}
