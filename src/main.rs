use clap::Parser;
use payments_etl::core::progress::TracingReporter;
use payments_etl::domain::ports::ConfigProvider;
use payments_etl::utils::{logger, validation::Validate};
use payments_etl::{CliConfig, EtlEngine, MySqlConnector, StreamingPipeline};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = CliConfig::parse();

    // 初始化日誌
    if config.json_logs {
        logger::init_json_logger(config.verbose);
    } else {
        logger::init_cli_logger(config.verbose);
    }

    tracing::info!("Starting payments-etl CLI");
    if config.verbose {
        tracing::debug!("CLI config: {:?}", config);
    }

    // 驗證配置 (input must exist before we connect)
    let request = match config.validate().and_then(|_| config.run_request()) {
        Ok(request) => request,
        Err(e) => {
            tracing::error!("❌ Configuration validation failed: {}", e);
            tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
            eprintln!("❌ {}", e.user_friendly_message());
            std::process::exit(1);
        }
    };

    if config.monitor {
        tracing::info!("🔍 System monitoring enabled");
    }

    let connector = MySqlConnector::new(request.connection, request.settings.table.clone());
    let pipeline = StreamingPipeline::new(connector, request.settings).with_reporter(TracingReporter);

    // Ctrl-C stops the run at the next batch boundary
    let cancel = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("🛑 interrupt received, finishing the current batch");
            cancel.cancel();
        }
    });

    let engine = EtlEngine::new_with_monitoring(pipeline, config.monitor);
    let result = engine.run(&request.input_path).await;

    if config.json_summary {
        println!("{}", serde_json::to_string_pretty(&result.to_json())?);
    }

    match &result.error {
        None if result.is_partial() => {
            println!(
                "⚠️ Loaded {} rows; {} batch(es) were rolled back",
                result.rows_inserted(),
                result.batches_failed()
            );
        }
        None => {
            println!("✅ Loaded {} rows", result.rows_inserted());
        }
        Some(e) => {
            // 記錄詳細錯誤信息
            tracing::error!(
                "❌ Load failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 {}", e.recovery_suggestion());
        }
    }

    let exit_code = result.exit_code();
    if exit_code > 0 {
        std::process::exit(exit_code);
    }

    Ok(())
}
