//! Command-line access to the ingest, ask and status flows.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use docqa_cli::init_tracing;
use docqa_core::config::Config;
use docqa_pipeline::PipelineContext;

/// Ask questions about a single document
#[derive(Parser, Debug)]
#[command(name = "docqa")]
#[command(about = "Retrieval-augmented question answering over one document", long_about = None)]
struct Args {
    /// Use hash/lexical stand-ins instead of downloading models
    #[arg(long, global = true)]
    fake_models: bool,

    /// Verbosity: -v (debug), -vv (trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index a .docx, .txt or .md file, replacing the current document
    Ingest {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Ask a question about the indexed document
    Ask {
        #[arg(value_name = "QUESTION")]
        question: String,
    },
    /// Show whether a document is indexed and models are loaded
    Status,
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(match args.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    });

    let mut settings = Config::load()?.settings()?;
    if args.fake_models {
        settings.use_fake_models = true;
    }
    let pipeline = PipelineContext::from_settings(settings)?;

    match args.command {
        Command::Ingest { file } => {
            let bytes = std::fs::read(&file).with_context(|| format!("failed to read {}", file.display()))?;
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let pb = spinner(&format!("Indexing {file_name}"));
            let result = pipeline.ingest(&file_name, &bytes).await;
            pb.finish_and_clear();
            let report = result?;
            println!("Indexed '{}' into {} fragments", report.file_name, report.fragment_count);
        }
        Command::Ask { question } => {
            let pb = spinner("Thinking");
            let result = pipeline.ask(&question).await;
            pb.finish_and_clear();
            let response = result?;
            println!("{}", response.answer);
            println!("\n({} sources used)", response.sources_used);
        }
        Command::Status => {
            let status = pipeline.status().await;
            println!("document loaded:    {}", status.document_loaded);
            println!("models initialized: {}", status.models_initialized);
        }
    }
    Ok(())
}
