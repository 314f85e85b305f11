//! Prompt assembly.
//!
//! All prompts are built deterministically from templates; the ranker and
//! the answer stage never depend on model-side formatting.

use std::fmt::Write as _;

use crate::models::Chunk;

/// Prompt asking the model to pick the most relevant chunks by index.
///
/// Chunks are listed as `[i] <text>` and the model is instructed to
/// return only index numbers, one per line.
pub fn selection_prompt(query: &str, chunks: &[Chunk], selected_limit: usize) -> String {
    let mut b = String::new();
    let _ = write!(
        b,
        "You are an intelligent document retrieval assistant. Please select the most \
         relevant {selected_limit} chunks from the following document blocks. Please only \
         return index numbers, one per line, sorted by relevance from highest to lowest.\n\n"
    );
    let _ = write!(b, "User query: {query}\n\nDocument block list:\n\n");
    for (i, chunk) in chunks.iter().enumerate() {
        let _ = write!(b, "[{i}] {}\n\n", chunk.text);
    }
    let _ = write!(
        b,
        "\nPlease select the most relevant {selected_limit} chunks, return only index numbers: "
    );
    b
}

/// Prompt synthesizing the final answer over the selected chunks.
///
/// `system_prompt` replaces the default preface when provided.
pub fn answer_prompt(query: &str, chunks: &[Chunk], system_prompt: Option<&str>) -> String {
    let mut b = String::new();
    match system_prompt {
        Some(preface) => {
            b.push_str(preface.trim_end());
            b.push_str("\n\n");
        }
        None => b.push_str("Answer the question based on the following knowledge:\n\n"),
    }
    for (i, chunk) in chunks.iter().enumerate() {
        let _ = write!(b, "Knowledge fragment {i}: {}\n\n", chunk.text);
    }
    let _ = write!(b, "Question: {query}");
    b
}

/// Prompt asking the model to grade an answer as exactly `HIGH` or `LOW`.
///
/// Callers interpret `LOW` as a signal to return a calibrated refusal
/// instead of the synthesized answer.
pub fn confidence_prompt(query: &str, answer: &str) -> String {
    format!(
        "You are an expert evaluator. Analyze the following question and answer pair to \
         determine if the answer is confident and accurate.\n\n\
         Question: {query}\n\n\
         Answer: {answer}\n\n\
         Evaluate the answer based on:\n\
         1. Does it directly address the question?\n\
         2. Is it specific and detailed enough?\n\
         3. Does it show uncertainty or vagueness?\n\
         4. Is it based on relevant information?\n\n\
         Respond with only \"HIGH\" if the answer is confident and likely accurate, or \
         \"LOW\" if the answer shows uncertainty, is vague, or may not be reliable."
    )
}
