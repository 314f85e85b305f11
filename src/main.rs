//! # mdrag CLI
//!
//! The `mdrag` binary drives the ingestion–retrieval–answer pipeline.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mdrag update <path>` | Ingest a Markdown tree and fill embeddings |
//! | `mdrag ask <query\|file>` | Two-stage retrieve-then-select answering |
//! | `mdrag chunk <input>` | Chunk one file to `<input>.chunks.json` |
//! | `mdrag scan <path>` | Upsert pre-chunked `*.md.chunks.json` files |
//! | `mdrag compute` | Fill (or recompute) embeddings standalone |
//! | `mdrag cleanup` | List and optionally delete invalid chunks |
//! | `mdrag get <id>` | Print one chunk by id |
//! | `mdrag health` | Probe store, embedding, and chat endpoints |
//! | `mdrag serve` | Start the HTTP search surface |
//!
//! Connection settings come from flags or `RAG_*` environment variables
//! (`RAG_DSN`, `RAG_EMBEDDING_BASE_URL`, `RAG_EMBEDDING_MODEL`,
//! `RAG_EMBEDDING_DIMENSION`, `RAG_ASSISTANT_BASE_URL`,
//! `RAG_ASSISTANT_MODEL`, `RAG_ASSISTANT_API_KEY`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use futures_util::stream::{self, StreamExt};
use tracing::error;

use mdrag::chunker::Chunker;
use mdrag::client::{
    AuditChat, AuditEmbedding, AuditLogger, ChatApi, ChatMessage, EmbeddingApi, OpenAiClient,
};
use mdrag::config::{self, ChunkingConfig, Language, Strategy};
use mdrag::embed::CancelFlag;
use mdrag::ingest::{self, UpdateOptions};
use mdrag::models::Document;
use mdrag::progress::ProgressMode;
use mdrag::rank;
use mdrag::search;
use mdrag::store::Store;
use mdrag::{prompt, server};

#[derive(Parser)]
#[command(
    name = "mdrag",
    about = "A minimalist RAG back end for Markdown corpora",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Store connection settings.
#[derive(Args, Clone)]
struct StoreOpts {
    /// Database path; empty uses an in-process ephemeral database.
    #[arg(long, env = "RAG_DSN", default_value = "")]
    dsn: String,

    /// Embedding vector dimension; bound once per database.
    #[arg(long, env = "RAG_EMBEDDING_DIMENSION", default_value_t = 1024)]
    embedding_dimension: usize,
}

impl StoreOpts {
    fn open(&self) -> Result<Store> {
        Ok(Store::open(&self.dsn, self.embedding_dimension)?)
    }
}

/// Embedding endpoint settings.
#[derive(Args, Clone)]
struct EmbeddingOpts {
    #[arg(long, env = "RAG_EMBEDDING_BASE_URL")]
    embedding_base_url: String,

    #[arg(long, env = "RAG_EMBEDDING_MODEL")]
    embedding_model: String,
}

impl EmbeddingOpts {
    fn client(&self) -> Result<OpenAiClient> {
        Ok(OpenAiClient::new(
            &self.embedding_base_url,
            &self.embedding_model,
            None,
        )?)
    }
}

/// Chat endpoint settings.
#[derive(Args, Clone)]
struct AssistantOpts {
    #[arg(long, env = "RAG_ASSISTANT_BASE_URL")]
    assistant_base_url: String,

    #[arg(long, env = "RAG_ASSISTANT_MODEL")]
    assistant_model: String,

    #[arg(long, env = "RAG_ASSISTANT_API_KEY")]
    assistant_api_key: Option<String>,
}

impl AssistantOpts {
    fn client(&self) -> Result<OpenAiClient> {
        Ok(OpenAiClient::new(
            &self.assistant_base_url,
            &self.assistant_model,
            self.assistant_api_key.clone(),
        )?)
    }
}

/// Chunker settings: a JSON config file, or per-flag overrides.
#[derive(Args, Clone)]
struct ChunkingOpts {
    /// Chunker configuration file (JSON).
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Chunking strategy: fixed, semantic, sentence, adaptive.
    #[arg(long, short = 's', default_value = "adaptive")]
    strategy: String,

    /// Maximum chunk size in characters.
    #[arg(long = "max-size", default_value_t = 1000)]
    max_size: usize,

    /// Minimum chunk size in characters.
    #[arg(long = "min-size", default_value_t = 100)]
    min_size: usize,

    /// Overlap size in characters.
    #[arg(long, default_value_t = 50)]
    overlap: usize,

    /// Segmenter language: zh, en, auto.
    #[arg(long, short = 'l', default_value = "auto")]
    language: String,
}

impl ChunkingOpts {
    fn to_config(&self) -> Result<ChunkingConfig> {
        if self.config.is_some() {
            return Ok(config::load_chunking_config(self.config.as_deref())?);
        }
        let strategy = match self.strategy.as_str() {
            "fixed" => Strategy::Fixed,
            "semantic" => Strategy::Semantic,
            "sentence" => Strategy::Sentence,
            "adaptive" => Strategy::Adaptive,
            other => bail!("unknown strategy: {other}"),
        };
        let language = match self.language.as_str() {
            "zh" => Language::Zh,
            "en" => Language::En,
            "auto" => Language::Auto,
            other => bail!("unknown language: {other}"),
        };
        Ok(ChunkingConfig {
            max_chunk_size: self.max_size,
            min_chunk_size: self.min_size,
            overlap_size: self.overlap,
            strategy,
            language,
            ..ChunkingConfig::default()
        }
        .clamp())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a Markdown tree: chunk changed files and fill embeddings.
    Update {
        /// Corpus root directory.
        path: PathBuf,

        /// Base-name glob for corpus files.
        #[arg(long, short = 'g', default_value = "*.md")]
        glob: String,

        #[command(flatten)]
        chunking: ChunkingOpts,

        /// Embedding pool size.
        #[arg(long, short = 'j', default_value_t = 3)]
        workers: usize,

        /// Reprocess all files regardless of recorded hashes.
        #[arg(long)]
        force: bool,

        /// Progress reporting: off, human, json.
        #[arg(long, default_value = "human")]
        progress: String,

        #[command(flatten)]
        store: StoreOpts,

        #[command(flatten)]
        embedding: EmbeddingOpts,
    },

    /// Search documents and ask the chat model (query text or a .txt file
    /// with one query per line).
    Ask {
        query: String,

        /// Chunks to retrieve from vector search.
        #[arg(long, default_value_t = 40)]
        retrieval_limit: usize,

        /// Chunks for the model to select for the final answer.
        #[arg(long, default_value_t = 10)]
        selected_limit: usize,

        /// Only print vector search results, no chat calls.
        #[arg(long)]
        vector_only: bool,

        /// Custom system prompt file path.
        #[arg(long)]
        system_prompt: Option<PathBuf>,

        /// Custom system prompt text (overrides --system-prompt).
        #[arg(long)]
        system_text: Option<String>,

        /// Concurrent queries when reading a query file.
        #[arg(long, default_value_t = 4)]
        jobs: usize,

        /// Write one audit record per API call.
        #[arg(long)]
        trace: bool,

        /// Directory for audit records.
        #[arg(long, default_value = "./audit_logs")]
        audit_log_dir: PathBuf,

        #[command(flatten)]
        store: StoreOpts,

        #[command(flatten)]
        embedding: EmbeddingOpts,

        #[command(flatten)]
        assistant: AssistantOpts,
    },

    /// Chunk one Markdown file to `<input>.chunks.json`.
    Chunk {
        input: PathBuf,

        /// Output path (default: `<input>.chunks.json`).
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        #[command(flatten)]
        chunking: ChunkingOpts,
    },

    /// Walk a tree for chunk files and upsert them into the store.
    Scan {
        path: PathBuf,

        #[arg(long, short = 'g', default_value = "*.md.chunks.json")]
        glob: String,

        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        store: StoreOpts,
    },

    /// Compute embeddings for chunks in the store.
    Compute {
        /// Recompute chunks that already have embeddings.
        #[arg(long)]
        force: bool,

        #[arg(long, short = 'j', default_value_t = 3)]
        workers: usize,

        /// Progress reporting: off, human, json.
        #[arg(long, default_value = "human")]
        progress: String,

        #[command(flatten)]
        store: StoreOpts,

        #[command(flatten)]
        embedding: EmbeddingOpts,
    },

    /// List invalid chunks (no embedding, empty text, zero vector).
    Cleanup {
        /// Delete the listed chunks.
        #[arg(long, short = 'd')]
        delete: bool,

        #[command(flatten)]
        store: StoreOpts,
    },

    /// Print one chunk by id.
    Get {
        id: String,

        #[command(flatten)]
        store: StoreOpts,
    },

    /// Probe the store and both model endpoints.
    Health {
        #[command(flatten)]
        store: StoreOpts,

        #[command(flatten)]
        embedding: EmbeddingOpts,

        #[command(flatten)]
        assistant: AssistantOpts,
    },

    /// Start the HTTP search surface.
    Serve {
        #[arg(long, default_value = "127.0.0.1:5000")]
        bind: String,

        #[command(flatten)]
        store: StoreOpts,

        #[command(flatten)]
        embedding: EmbeddingOpts,
    },
}

fn parse_progress(mode: &str) -> Result<ProgressMode> {
    match mode {
        "off" => Ok(ProgressMode::Off),
        "human" => Ok(ProgressMode::Human),
        "json" => Ok(ProgressMode::Json),
        other => bail!("unknown progress mode: {other}"),
    }
}

fn cancel_on_ctrl_c() -> CancelFlag {
    let cancel = CancelFlag::new();
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            flag.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Update {
            path,
            glob,
            chunking,
            workers,
            force,
            progress,
            store,
            embedding,
        } => {
            let store = store.open()?;
            let embedder = embedding.client()?;
            let chunker = Chunker::new(chunking.to_config()?);
            let reporter = parse_progress(&progress)?.reporter();
            let cancel = cancel_on_ctrl_c();

            let stats = ingest::run_update(
                &store,
                &embedder,
                &chunker,
                &path,
                &UpdateOptions {
                    glob,
                    workers,
                    force,
                },
                &cancel,
                reporter.as_ref(),
            )
            .await?;

            println!("update {}", path.display());
            println!("  scanned: {}", stats.scanned);
            println!("  processed: {}", stats.processed);
            println!("  skipped: {}", stats.skipped);
            println!("  removed: {}", stats.removed);
            println!("  failed: {}", stats.failed);
            println!(
                "  embeddings: {} written, {} skipped, {} failed",
                stats.embed.embedded, stats.embed.skipped, stats.embed.failed
            );
            println!("ok");
        }

        Commands::Ask {
            query,
            retrieval_limit,
            selected_limit,
            vector_only,
            system_prompt,
            system_text,
            jobs,
            trace,
            audit_log_dir,
            store,
            embedding,
            assistant,
        } => {
            let store = store.open()?;

            let mut embedder: Arc<dyn EmbeddingApi> = Arc::new(embedding.client()?);
            let mut chat: Arc<dyn ChatApi> = Arc::new(assistant.client()?);
            if trace {
                let logger = Arc::new(AuditLogger::new(audit_log_dir));
                embedder = Arc::new(AuditEmbedding::new(embedder, Arc::clone(&logger)));
                chat = Arc::new(AuditChat::new(chat, logger));
            }

            let system_prompt = match (system_text, system_prompt) {
                (Some(text), _) => Some(text),
                (None, Some(path)) => Some(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("read system prompt {}", path.display()))?,
                ),
                (None, None) => None,
            };

            let selected = selected_limit.min(retrieval_limit);

            // A .txt query argument is a batch: one query per line.
            if Path::new(&query).is_file()
                && Path::new(&query).extension().is_some_and(|e| e == "txt")
            {
                let content = std::fs::read_to_string(&query)?;
                let queries: Vec<String> = content
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect();

                stream::iter(queries)
                    .for_each_concurrent(jobs.max(1), |q| {
                        let store = store.clone();
                        let embedder = Arc::clone(&embedder);
                        let chat = Arc::clone(&chat);
                        let system_prompt = system_prompt.clone();
                        async move {
                            if let Err(e) = ask_one(
                                &store,
                                embedder.as_ref(),
                                chat.as_ref(),
                                &q,
                                retrieval_limit,
                                selected,
                                vector_only,
                                system_prompt.as_deref(),
                            )
                            .await
                            {
                                error!(query = %q, error = %e, "query failed");
                            }
                        }
                    })
                    .await;
            } else {
                ask_one(
                    &store,
                    embedder.as_ref(),
                    chat.as_ref(),
                    &query,
                    retrieval_limit,
                    selected,
                    vector_only,
                    system_prompt.as_deref(),
                )
                .await?;
            }
        }

        Commands::Chunk {
            input,
            output,
            chunking,
        } => {
            let chunker = Chunker::new(chunking.to_config()?);
            let content = std::fs::read_to_string(&input)
                .with_context(|| format!("read {}", input.display()))?;
            let doc = chunker.chunk(&content, &input.to_string_lossy())?;

            let output = output.unwrap_or_else(|| {
                let mut name = input.as_os_str().to_os_string();
                name.push(".chunks.json");
                PathBuf::from(name)
            });
            doc.write_chunks_file(&output)?;
            println!(
                "Successfully chunked document: {} -> {} ({} chunks)",
                input.display(),
                output.display(),
                doc.chunks.len()
            );
        }

        Commands::Scan {
            path,
            glob,
            dry_run,
            store,
        } => {
            let store = store.open()?;
            let matcher = globset::Glob::new(&glob)
                .with_context(|| format!("bad glob {glob:?}"))?
                .compile_matcher();

            let mut uploaded = 0usize;
            for entry in walkdir::WalkDir::new(&path) {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        error!(error = %e, "walk error");
                        continue;
                    }
                };
                if !entry.file_type().is_file() || !matcher.is_match(entry.file_name()) {
                    continue;
                }

                let mut doc = match Document::read_chunks_file(entry.path()) {
                    Ok(d) => d,
                    Err(e) => {
                        error!(path = %entry.path().display(), error = %e, "decode chunk file");
                        continue;
                    }
                };
                doc.fix();

                if dry_run {
                    println!("{}  {} chunks (dry-run)", entry.path().display(), doc.chunks.len());
                    continue;
                }
                match store.upsert_chunks(&doc) {
                    Ok(n) => uploaded += n,
                    Err(e) => {
                        error!(path = %entry.path().display(), error = %e, "upsert chunks")
                    }
                }
            }
            println!("scan {}", path.display());
            println!("  chunks upserted: {uploaded}");
            println!("ok");
        }

        Commands::Compute {
            force,
            workers,
            progress,
            store,
            embedding,
        } => {
            let store = store.open()?;
            let embedder = embedding.client()?;
            let reporter = parse_progress(&progress)?.reporter();
            let cancel = cancel_on_ctrl_c();

            let stats = mdrag::embed::compute_embeddings(
                &store,
                &embedder,
                !force,
                workers,
                &cancel,
                reporter.as_ref(),
            )
            .await?;

            println!("compute");
            println!(
                "  embeddings: {} written, {} skipped, {} failed",
                stats.embedded, stats.skipped, stats.failed
            );
            println!("ok");
        }

        Commands::Cleanup { delete, store } => {
            let store = store.open()?;

            let mut invalid = Vec::new();
            store.find_invalid(|chunk| {
                let excerpt: String = chunk.text.chars().take(60).collect();
                println!(
                    "{}  {}  {:?}  embedding={}",
                    chunk.id,
                    chunk.file_path,
                    excerpt,
                    if chunk.embedding.is_some() { "present" } else { "missing" }
                );
                invalid.push(chunk.id.clone());
            })?;
            println!("{} invalid chunks", invalid.len());

            if delete {
                for id in &invalid {
                    if let Err(e) = store.delete_chunk(id) {
                        error!(chunk_id = %id, error = %e, "delete chunk");
                    }
                }
                println!("deleted {} chunks", invalid.len());
            }
        }

        Commands::Get { id, store } => {
            let store = store.open()?;
            let chunk = store.get_chunk(&id)?;
            println!("id:          {}", chunk.id);
            println!("document_id: {}", chunk.document_id);
            println!("file_path:   {}", chunk.file_path);
            println!(
                "embedding:   {}",
                chunk
                    .embedding
                    .as_ref()
                    .map(|v| format!("{} floats", v.len()))
                    .unwrap_or_else(|| "none".to_string())
            );
            println!();
            println!("{}", chunk.text);
        }

        Commands::Health {
            store,
            embedding,
            assistant,
        } => {
            let dimension = store.embedding_dimension;
            let store = store.open()?;
            store.ping()?;

            let embedder = embedding.client()?;
            let probe = embedder.embed("Hello world", dimension).await?;
            if probe.is_empty() {
                bail!("embedding endpoint returned an empty vector");
            }

            let chat = assistant.client()?;
            let reply = chat.chat(&[ChatMessage::user("Hello world")]).await?;
            if reply.is_empty() {
                bail!("chat endpoint returned an empty reply");
            }

            println!("OK, database/embedding/assistant are operational");
        }

        Commands::Serve {
            bind,
            store,
            embedding,
        } => {
            let store = store.open()?;
            let embedder: Arc<dyn EmbeddingApi> = Arc::new(embedding.client()?);
            server::run_server(store, embedder, &bind).await?;
        }
    }

    Ok(())
}

/// One query through the two-stage pipeline, printed to stdout.
#[allow(clippy::too_many_arguments)]
async fn ask_one(
    store: &Store,
    embedder: &dyn EmbeddingApi,
    chat: &dyn ChatApi,
    query: &str,
    retrieval_limit: usize,
    selected_limit: usize,
    vector_only: bool,
    system_prompt: Option<&str>,
) -> Result<()> {
    let retrieved = search::query_chunks(store, embedder, query, retrieval_limit).await?;

    println!("Retrieved {} chunks from vector search:", retrieved.len());
    for chunk in &retrieved {
        println!("  {}  {}", chunk.id, chunk.file_path);
    }

    if vector_only {
        return Ok(());
    }

    let selected = rank::rerank(chat, query, retrieved, selected_limit).await?;
    println!("\nModel selected {} most relevant chunks:", selected.len());
    for chunk in &selected {
        println!("  {}  {}", chunk.id, chunk.file_path);
    }

    let answer_prompt = prompt::answer_prompt(query, &selected, system_prompt);
    let answer = chat.chat(&[ChatMessage::user(answer_prompt)]).await?;

    println!("\nThe answer is:\n");
    println!("{answer}");
    Ok(())
}
