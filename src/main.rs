use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Context};
use clap::{Parser, ValueEnum};
use policy_embed::{
    needs_write, Document, EnrichError, ExampleScan, Overrides, ToolConfig,
};
use semantic::embedder_from_config;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Precompute embeddings for the semantic examples of a policy file.
#[derive(Parser, Debug)]
#[command(name = "policy-embed", version, about)]
struct Cli {
    /// Policy YAML file to enrich.
    input: PathBuf,

    /// Where to write the result. Defaults to overwriting the input.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Embedding model identifier [default: all-MiniLM-L6-v2].
    #[arg(short, long)]
    model: Option<String>,

    /// Embedding provider [default: onnx].
    #[arg(short, long, value_enum)]
    provider: Option<ProviderArg>,

    /// Optional YAML tool configuration.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Embedding calls allowed in flight at once [default: 1]. Only the api provider overlaps
    /// calls; onnx and stub embed one example at a time whatever this is set to.
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    jobs: Option<u16>,

    /// Diagnostic filter written to stderr (e.g. `info`, `policy_embed=debug`).
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Emit diagnostics as JSON lines.
    #[arg(long)]
    log_json: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ProviderArg {
    Onnx,
    Api,
    Stub,
}

impl ProviderArg {
    fn as_str(self) -> &'static str {
        match self {
            ProviderArg::Onnx => "onnx",
            ProviderArg::Api => "api",
            ProviderArg::Stub => "stub",
        }
    }
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            model: self.model.clone(),
            provider: self.provider.map(|p| p.as_str().to_string()),
            jobs: self.jobs.map(usize::from),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = init_tracing(&cli.log_level, cli.log_json) {
        eprintln!("Error: {err:#}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "enrichment failed");
            eprintln!("Error: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

fn init_tracing(level: &str, json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(level)
        .with_context(|| format!("invalid --log-level '{level}'"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}

async fn run(cli: Cli) -> Result<(), EnrichError> {
    let overrides = cli.overrides();
    let input = cli.input;
    let destination = cli.output.unwrap_or_else(|| input.clone());

    let mut doc = Document::load(&input)?;
    println!("Processing {}", input.display());

    let file_config = match &cli.config {
        Some(path) => ToolConfig::from_file(path)?,
        None => ToolConfig::default(),
    };
    let resolved = file_config.resolve(&overrides)?;
    info!(
        mode = %resolved.semantic.mode,
        model = %resolved.semantic.model_name,
        jobs = resolved.jobs,
        "configuration resolved"
    );

    let scan = ExampleScan::scan(&doc)?;
    if scan.pending() == 0 {
        println!("No embeddings needed - all examples already have embeddings");
        let report = scan.into_report();
        if needs_write(&report, &input, &destination) {
            println!("Saving to {}", destination.display());
            doc.save(&destination)?;
        }
        return Ok(());
    }

    println!("Loading model: {}", resolved.semantic.model_name);
    let embedder = embedder_from_config(&resolved.semantic).await?;
    println!("Model loaded ({} provider)", resolved.semantic.mode);

    println!("Computing embeddings for {} examples...", scan.pending());
    let report = scan
        .fill(&*embedder, resolved.jobs)
        .await?
        .apply(&mut doc)?;

    let dimensions: Vec<String> = report.dimensions.iter().map(ToString::to_string).collect();
    println!(
        "Computed {} embeddings (dimension {})",
        report.computed,
        dimensions.join(", ")
    );

    println!("Saving to {}", destination.display());
    doc.save(&destination)?;
    println!("Done!");
    Ok(())
}
