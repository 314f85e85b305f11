//! # mdrag
//!
//! **A minimalist retrieval-augmented generation back end for Markdown
//! corpora.**
//!
//! mdrag ingests a tree of Markdown files into an embedded analytic store,
//! computes dense embeddings against an OpenAI-compatible endpoint, and
//! answers natural-language queries with a two-stage retrieve-then-select
//! pipeline driven by a chat model.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌────────────────┐   ┌───────────────┐
//! │  corpus   │──▶│ update         │──▶│  DuckDB       │
//! │ (*.md)    │   │ chunk + embed  │   │ FLOAT[D]+HNSW │
//! └───────────┘   └────────────────┘   └──────┬────────┘
//!                                             │
//!                      ┌──────────────────────┤
//!                      ▼                      ▼
//!                ┌───────────┐         ┌───────────┐
//!                │  ask      │         │  serve    │
//!                │ 2-stage   │         │ /v1/search│
//!                └───────────┘         └───────────┘
//! ```
//!
//! ## Data flow
//!
//! 1. The **ingestion coordinator** ([`ingest`]) walks the corpus, diffs
//!    file hashes against the store, and replaces chunks for changed files.
//! 2. The **chunker** ([`chunker`]) splits normalized text under a
//!    configurable strategy; chunk ids are content hashes ([`hash`]).
//! 3. The **embedding pool** ([`embed`]) fills missing vectors with
//!    bounded parallelism and per-chunk failure isolation.
//! 4. At query time the **retriever** ([`search`]) embeds the query and
//!    runs ANN search; the **two-stage ranker** ([`rank`]) lets the chat
//!    model pick the most relevant chunks and synthesizes the answer from
//!    deterministic prompts ([`prompt`]).
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Chunking configuration (JSON file, defaults, clamping) |
//! | [`models`] | Core data types: `Chunk`, `Document`, `AskParameter` |
//! | [`hash`] | xxh64 content ids and file hashes |
//! | [`chunker`] | Preprocessing and chunking strategies |
//! | [`store`] | DuckDB store with a fixed-dimension vector column |
//! | [`client`] | Embedding/chat clients, plain and auditing |
//! | [`embed`] | Bounded-parallel embedding computation |
//! | [`ingest`] | Corpus reconciliation and the update pipeline |
//! | [`search`] | Dense retrieval |
//! | [`rank`] | Two-stage ranker |
//! | [`prompt`] | Deterministic prompt assembly |
//! | [`progress`] | Progress reporting on stderr |
//! | [`queue`] | Bounded FIFO request queue for bot front ends |
//! | [`server`] | HTTP search surface (Axum) |

pub mod chunker;
pub mod client;
pub mod config;
pub mod embed;
pub mod error;
pub mod hash;
pub mod ingest;
pub mod models;
pub mod progress;
pub mod prompt;
pub mod queue;
pub mod rank;
pub mod search;
pub mod server;
pub mod store;

pub use error::RagError;
