use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fetch_harness::config::{Cli, Config};
use fetch_harness::coordinator::run;
use fetch_harness::errors::HarnessError;
use fetch_harness::metrics::{error_breakdown, gather_metrics_string, register_metrics};

fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match log_format {
        "json" => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        _ => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    let report_json = cli.report_json;
    let log_format = cli.log_format.clone();

    // Reject unsupported selectors before touching any file, process or socket.
    let config = match Config::try_from(cli) {
        Ok(c) => c,
        Err(e @ HarnessError::NotImplemented(_)) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    init_tracing(&log_format);
    register_metrics()?;

    config.print_summary();

    match run(&config).await {
        Ok(report) => {
            if report_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Run complete: {} succeeded, {} failed, {} events",
                    report.succeeded, report.failed, report.events
                );
                for result in &report.results {
                    println!("  {} -> {}", result.task_id, result.value);
                }
                for (category, count) in error_breakdown() {
                    println!("  {}: {}", category, count);
                }
                println!("  Event log: {}", report.plain_log.display());
                println!("  Markup log: {}", report.markup_log.display());
            }
            println!("\n--- FINAL METRICS ---\n{}", gather_metrics_string());
            println!("--- END OF FINAL METRICS ---");
            Ok(())
        }
        Err(e) => {
            eprintln!("Run failed: {}", e);
            eprintln!("See the event log for details: {}", config.plain_log_path().display());
            std::process::exit(1);
        }
    }
}
