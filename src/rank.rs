//! Two-stage ranker.
//!
//! Stage A retrieves candidates by vector distance ([`crate::search`]),
//! stage B asks the chat model to select a permutation of their indices,
//! and stage C synthesizes the final answer over the selected chunks.
//! The ranker never re-scores: it trusts the model's ordering.

use crate::client::{ChatApi, ChatMessage, EmbeddingApi};
use crate::error::RagError;
use crate::models::{AskParameter, Chunk};
use crate::prompt;
use crate::search;
use crate::store::Store;

/// Parses a model selection response into chunk indices.
///
/// One index per line; lines that do not begin with an integer are
/// ignored, out-of-range values are dropped, and duplicates keep their
/// first occurrence.
pub fn parse_selected_indices(content: &str, max_index: usize) -> Vec<usize> {
    let mut indices = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let digits: String = line
            .chars()
            .take_while(|c| c.is_ascii_digit() || (*c == '-' && line.starts_with('-')))
            .collect();
        let Ok(idx) = digits.parse::<i64>() else {
            continue;
        };
        if idx >= 0 && (idx as usize) < max_index && !indices.contains(&(idx as usize)) {
            indices.push(idx as usize);
        }
    }
    indices
}

/// Stage B: model-driven selection of the most relevant chunks.
///
/// When the candidate set already fits `selected_limit` it is returned
/// unchanged, in its incoming order, without a chat call.
pub async fn rerank(
    chat: &dyn ChatApi,
    query: &str,
    chunks: Vec<Chunk>,
    selected_limit: usize,
) -> Result<Vec<Chunk>, RagError> {
    if chunks.len() <= selected_limit {
        return Ok(chunks);
    }

    let selection = prompt::selection_prompt(query, &chunks, selected_limit);
    let content = chat.chat(&[ChatMessage::user(selection)]).await?;

    let mut indices = parse_selected_indices(&content, chunks.len());
    if indices.is_empty() {
        return Err(RagError::RankingEmpty);
    }
    indices.truncate(selected_limit);

    tracing::info!(
        total = chunks.len(),
        selected = indices.len(),
        "model-based chunk selection completed"
    );
    Ok(indices.into_iter().map(|i| chunks[i].clone()).collect())
}

/// The full retrieve → select → answer pipeline.
pub async fn ask(
    store: &Store,
    embedder: &dyn EmbeddingApi,
    chat: &dyn ChatApi,
    param: &AskParameter,
) -> Result<String, RagError> {
    if param.query.trim().is_empty() {
        return Err(RagError::InvalidInput("query is empty".to_string()));
    }

    let retrieved = search::query_chunks(store, embedder, &param.query, param.retrieval_limit).await?;
    let selected = rerank(chat, &param.query, retrieved, param.selected_limit).await?;

    let answer = prompt::answer_prompt(&param.query, &selected, param.system_prompt.as_deref());
    chat.chat(&[ChatMessage::user(answer)]).await
}
