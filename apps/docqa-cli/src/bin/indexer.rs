use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use docqa_cli::{init_logging, App};
use docqa_core::config::expand_path;
use docqa_core::Error;
use docqa_vector::{read_manifest, VectorIndex};

#[derive(Parser)]
#[command(name = "docqa-indexer")]
#[command(about = "Build and inspect the docqa vector index", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk, embed and index the documents in a directory
    Ingest {
        /// Directory with .txt/.pdf files (defaults to data.dir)
        dir: Option<PathBuf>,

        /// Index directory (defaults to data.index_dir)
        #[arg(long)]
        index: Option<PathBuf>,

        /// Discard the existing index instead of adding to it
        #[arg(long)]
        rebuild: bool,
    },

    /// Print the manifest of a saved index
    Status {
        #[arg(long)]
        index: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let app = App::load()?;

    match cli.command {
        Commands::Ingest { dir, index, rebuild } => {
            let data_dir = dir.map_or_else(|| app.data_dir.clone(), |d| expand_path(d.to_string_lossy()));
            let index_dir = index.map_or_else(|| app.index_dir.clone(), |d| expand_path(d.to_string_lossy()));
            println!("docqa indexer\n=============");
            println!("Data directory:  {}", data_dir.display());
            println!("Index directory: {}", index_dir.display());

            let chunks = app.load_chunks(&data_dir)?;
            println!("Loaded {} chunks", chunks.len());
            let embedder = app.embedder()?;

            let (vectors, fresh) = match VectorIndex::open(&index_dir) {
                Ok(existing) if !rebuild => (existing, false),
                Ok(_) | Err(Error::IndexNotFound(_)) => (VectorIndex::new(app.settings.index.metric), true),
                Err(e) if rebuild => {
                    tracing::warn!(error = %e, "discarding unreadable index");
                    (VectorIndex::new(app.settings.index.metric), true)
                }
                Err(e) => return Err(e.into()),
            };
            let vectors = vectors.with_batch_size(app.settings.index.batch_size);
            let added = app.ingest(&vectors, &chunks, embedder.as_ref(), fresh)?;
            vectors.save(&index_dir)?;
            println!("\nEmbedded {added} chunks ({} in the index)", vectors.len());
        }
        Commands::Status { index } => {
            let index_dir = index.map_or_else(|| app.index_dir.clone(), |d| expand_path(d.to_string_lossy()));
            match read_manifest(&index_dir) {
                Ok(m) => {
                    println!("Index:      {}", index_dir.display());
                    println!("Chunks:     {}", m.count);
                    println!("Dimension:  {}", m.dimension.map_or_else(|| "-".to_string(), |d| d.to_string()));
                    println!("Metric:     {}", m.metric);
                    println!("Embedder:   {}", m.embedder.as_deref().unwrap_or("-"));
                    println!("Created at: {}", m.created_at);
                }
                Err(Error::IndexNotFound(_)) => println!("No index at {}", index_dir.display()),
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}
