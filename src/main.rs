use anyhow::Context;
use clap::Parser;
use clinical_etl::utils::error::ErrorSeverity;
use clinical_etl::utils::{logger, validation::Validate};
use clinical_etl::{
    Cli, Command, ConversionPipeline, ConvertArgs, EtlEngine, EtlError, FlagArgs, KeywordFlagger,
    LocalStorage, MappingConfig,
};
use std::path::Path;

fn main() {
    let cli = Cli::parse();

    let outcome = match cli.command {
        Command::Convert(args) => run_convert(args),
        Command::Flag(args) => run_flag(args),
    };

    if let Err(e) = outcome {
        std::process::exit(report(&e));
    }
}

/// Logs the failure and returns the process exit code.
fn report(error: &anyhow::Error) -> i32 {
    let Some(etl_error) = error.downcast_ref::<EtlError>() else {
        tracing::error!("❌ Run failed: {:#}", error);
        eprintln!("❌ {:#}", error);
        return 1;
    };

    // 記錄詳細錯誤信息
    tracing::error!(
        "❌ Run failed: {:#} (Category: {:?}, Severity: {:?})",
        error,
        etl_error.category(),
        etl_error.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", etl_error.recovery_suggestion());

    eprintln!("❌ {}", etl_error.user_friendly_message());
    eprintln!("💡 Suggestion: {}", etl_error.recovery_suggestion());

    // 根據錯誤嚴重程度決定退出碼
    match etl_error.severity() {
        ErrorSeverity::Low | ErrorSeverity::High => 1,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::Critical => 3,
    }
}

fn run_convert(mut args: ConvertArgs) -> anyhow::Result<()> {
    if args.log_json {
        logger::init_json_logger(args.verbose);
    } else {
        logger::init_cli_logger(args.verbose);
    }
    tracing::info!("Starting clinical-etl convert");

    args.discover_inputs()?;
    args.validate().context("invalid convert arguments")?;
    tracing::debug!("Convert args: {:?}", args);

    if args.monitor {
        tracing::info!("🔍 System monitoring enabled");
    }

    let mappings = MappingConfig::load(args.mapping.as_deref()).with_context(|| {
        format!(
            "loading mappings from {}",
            args.mapping.as_deref().unwrap_or("built-in defaults")
        )
    })?;
    let source = LocalStorage::new(args.input_base());
    let sink = LocalStorage::new(args.output_path.clone());
    let monitor = args.monitor;
    let pipeline = ConversionPipeline::new(source, sink, args, mappings);

    let engine = EtlEngine::new_with_monitoring(pipeline, monitor);
    let written = engine.run()?;

    tracing::info!("✅ Conversion completed: {} files written", written.len());
    println!("✅ Conversion completed successfully!");
    for location in &written {
        println!("📁 {}", location);
    }
    Ok(())
}

fn run_flag(args: FlagArgs) -> anyhow::Result<()> {
    logger::init_cli_logger(args.verbose);
    args.validate().context("invalid flag arguments")?;

    let flagger = KeywordFlagger::new(args.column, args.words, args.result_column);
    let summary = flagger
        .apply(Path::new(&args.file))
        .with_context(|| format!("flagging {}", args.file))?;

    println!(
        "✅ {} of {} rows flagged in {}",
        summary.flagged, summary.rows, args.file
    );
    Ok(())
}
