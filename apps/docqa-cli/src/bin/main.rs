use std::io::{self, BufRead, Write};

use anyhow::Result;
use clap::{Parser, Subcommand};
use docqa_cli::{format_answer, init_logging, App};
use docqa_rag::QueryOrchestrator;

#[derive(Parser)]
#[command(name = "docqa")]
#[command(about = "Ask questions about your local documents", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single question
    Ask {
        question: String,

        /// Number of chunks to retrieve (defaults to retrieval.top_k)
        #[arg(short)]
        k: Option<usize>,
    },

    /// Interactive question loop; type `exit` or `quit` to leave
    Chat {
        #[arg(short)]
        k: Option<usize>,
    },
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let app = App::load()?;
    let embedder = app.embedder()?;
    let index = app.open_or_build(embedder.as_ref())?;
    let qa = app.orchestrator(index, embedder)?;
    let rt = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Ask { question, k } => {
            let k = k.unwrap_or(app.settings.retrieval.top_k);
            println!("{}", answer(&rt, &qa, &app, &question, k)?);
        }
        Commands::Chat { k } => {
            let k = k.unwrap_or(app.settings.retrieval.top_k);
            println!("Ask a question about your documents (`exit` to quit).");
            let stdin = io::stdin();
            let mut lines = stdin.lock().lines();
            loop {
                print!("\n> ");
                io::stdout().flush()?;
                let Some(line) = lines.next() else { break };
                let question = line?;
                let question = question.trim();
                if question.is_empty() {
                    continue;
                }
                if matches!(question.to_lowercase().as_str(), "exit" | "quit") {
                    break;
                }
                match answer(&rt, &qa, &app, question, k) {
                    Ok(text) => println!("{text}"),
                    Err(e) => eprintln!("Error: {e:#}"),
                }
            }
        }
    }
    Ok(())
}

fn answer(rt: &tokio::runtime::Runtime, qa: &QueryOrchestrator, app: &App, question: &str, k: usize) -> Result<String> {
    let answer = rt.block_on(qa.ask_with_timeout(question, k, app.ask_timeout()))?;
    Ok(format_answer(&answer))
}
