use anyhow::{Context, Result};
use clap::Parser;
use sqlgen_pipeline::llm::{ClientConfig, GenerationClient};
use sqlgen_pipeline::pipeline::Pipeline;
use sqlgen_pipeline::questions::{parse_selection, QuestionSet};
use sqlgen_pipeline::report::ReportWriter;
use sqlgen_pipeline::schema::SchemaRegistry;
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "sqlgen-pipeline")]
#[command(about = "Batch SQL generation from business questions against known warehouse schemas")]
struct Args {
    /// Directory holding sales_dw.json and marketing_dw.json
    #[arg(short = 'm', long, default_value = "data")]
    schema_dir: PathBuf,

    /// CSV file with question_id,question rows
    #[arg(short, long, default_value = "data/questions.csv")]
    questions: PathBuf,

    /// Output directory for the CSV/JSON/Markdown artifacts
    #[arg(short, long, default_value = "output")]
    output_dir: PathBuf,

    /// Question selection, e.g. "1-6", "1,5,7" or "15-20" (default: all)
    #[arg(short, long, default_value = "")]
    select: String,

    /// Groq API key (or set GROQ_API_KEY env var; prompted if absent)
    #[arg(long)]
    api_key: Option<String>,

    /// Model identity override
    #[arg(long)]
    model: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    // Pre-flight: schemas and questions must load before anything else runs
    let registry = SchemaRegistry::load(&args.schema_dir)
        .with_context(|| format!("Failed to load schemas from {}", args.schema_dir.display()))?;
    info!("Loaded schemas: {}", registry.all_sources().join(", "));

    let question_set = QuestionSet::load(&args.questions)
        .with_context(|| format!("Failed to load questions from {}", args.questions.display()))?;
    info!("Loaded {} questions", question_set.len());

    let mut config = ClientConfig::default();
    if let Some(model) = args.model {
        config.model = model;
    }
    info!(
        "Model: {} (temperature {}, max tokens {}, {} retry attempts)",
        config.model, config.temperature, config.max_tokens, config.retry_attempts
    );
    let client = build_client(args.api_key, config).await?;

    let all_ids: Vec<u32> = question_set.all().iter().map(|q| q.question_id).collect();
    let selected_ids = parse_selection(&args.select, &all_ids);
    let selected = question_set.select(&selected_ids);
    info!("Processing {} selected questions", selected.len());

    let pipeline = Pipeline::new(&registry, &client);
    let (store, summary) = pipeline.run(&selected).await?;
    summary.log();

    let prefix = format!("queries_{}", chrono::Local::now().format("%Y%m%d_%H%M%S"));
    let writer = ReportWriter::new(&args.output_dir);
    let artifacts = writer
        .write(&store.all(), &prefix)
        .context("Failed to write report artifacts")?;

    info!("Files created:");
    for path in artifacts.paths() {
        info!("  ✓ {}", path.display());
    }

    Ok(())
}

/// Resolve the model credential and return a verified client. A key from
/// the CLI flag or environment is verified once with a minimal call and any
/// failure is fatal; the interactive path re-prompts up to three times
/// before giving up. The key is passed through opaquely and never logged.
async fn build_client(flag: Option<String>, config: ClientConfig) -> Result<GenerationClient> {
    let supplied = flag.or_else(|| {
        std::env::var("GROQ_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
    });
    if let Some(key) = supplied {
        let client = GenerationClient::new(key, config)?;
        client
            .verify()
            .await
            .context("API key validation failed")?;
        info!("API key validated, connection established");
        return Ok(client);
    }

    const MAX_KEY_ATTEMPTS: u32 = 3;
    for attempt in 1..=MAX_KEY_ATTEMPTS {
        eprint!(
            "[Attempt {}/{}] Enter your Groq API key: ",
            attempt, MAX_KEY_ATTEMPTS
        );
        std::io::stderr().flush()?;
        let mut key = String::new();
        std::io::stdin().read_line(&mut key)?;
        let key = key.trim().to_string();
        if key.is_empty() {
            eprintln!("API key cannot be empty, try again.");
            continue;
        }

        let client = GenerationClient::new(key, config.clone())?;
        match client.verify().await {
            Ok(()) => {
                info!("API key validated, connection established");
                return Ok(client);
            }
            Err(e) => eprintln!("API key invalid or network error: {}", e),
        }
    }

    anyhow::bail!("Maximum retries ({}) exceeded for API key entry", MAX_KEY_ATTEMPTS)
}
