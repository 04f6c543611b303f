use bas_assistant::{
    batch::{BatchAggregator, InvoiceFile},
    collaborators::Collaborators,
    config::AppConfig,
    pipeline::InvoicePipeline,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout carries the JSON report.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    dotenv::dotenv().ok();

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        eprintln!("Usage: bas <invoice file>...");
        eprintln!("Estimates GST collected, GST paid and the net BAS position for the given invoices.");
        std::process::exit(2);
    }

    let config = AppConfig::from_env()?;
    let collaborators = Collaborators::from_config(&config);
    let pipeline = Arc::new(InvoicePipeline::from_config(
        &config,
        collaborators.explainer.clone(),
    ));
    let batch = BatchAggregator::new(
        pipeline,
        collaborators.fields.clone(),
        collaborators.text.clone(),
    );

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        match tokio::fs::read(&path).await {
            Ok(bytes) => files.push(InvoiceFile::new(Some(path), bytes)),
            Err(e) => {
                // Keep the slot so the count and order still match the arguments.
                error!(%path, error = %e, "Could not read invoice file");
                files.push(InvoiceFile::new(Some(path), Vec::new()));
            }
        }
    }

    info!(count = files.len(), "Processing invoices");
    let report = batch.process_files(files).await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    eprintln!("\n{}", report.response);

    Ok(())
}
