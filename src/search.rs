//! Dense retrieval.
//!
//! Embeds the query with the same model and dimension used at ingestion,
//! then asks the store for the nearest chunks by L2 distance.

use crate::client::EmbeddingApi;
use crate::error::RagError;
use crate::models::Chunk;
use crate::store::Store;

/// Returns up to `limit` chunks in ascending distance order.
pub async fn query_chunks(
    store: &Store,
    embedder: &dyn EmbeddingApi,
    query: &str,
    limit: usize,
) -> Result<Vec<Chunk>, RagError> {
    if query.trim().is_empty() {
        return Err(RagError::InvalidInput("query is empty".to_string()));
    }

    let vector = embedder.embed(query, store.dimension()).await?;
    store.query_ann(&vector, limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::EmbeddingApi;
    use crate::hash;
    use crate::models::Document;
    use async_trait::async_trait;

    /// Deterministic stand-in for the embedding endpoint: the first
    /// component encodes the text length so distances are predictable.
    struct StubEmbedding;

    #[async_trait]
    impl EmbeddingApi for StubEmbedding {
        fn model(&self) -> &str {
            "stub"
        }
        async fn embed(&self, text: &str, dimensions: usize) -> Result<Vec<f32>, RagError> {
            let mut v = vec![0.0; dimensions];
            v[0] = text.chars().count() as f32;
            Ok(v)
        }
    }

    fn seed(store: &Store, file_path: &str, texts: &[&str]) -> Document {
        let document_id = hash::document_id(file_path);
        let doc = Document {
            file_name: file_path.to_string(),
            file_path: file_path.to_string(),
            document_id: document_id.clone(),
            chunks: texts
                .iter()
                .map(|t| Chunk {
                    id: hash::hash_text(t),
                    document_id: document_id.clone(),
                    file_path: file_path.to_string(),
                    text: t.to_string(),
                    index: 0,
                    embedding: None,
                })
                .collect(),
        };
        store.upsert_chunks(&doc).unwrap();
        doc
    }

    #[tokio::test]
    async fn retrieval_orders_by_distance_to_query() {
        let store = Store::open("", 4).unwrap();
        let embedder = StubEmbedding;
        let doc = seed(&store, "a.md", &["aa", "aaaa", "aaaaaaaa"]);
        for chunk in &doc.chunks {
            let v = embedder.embed(&chunk.text, 4).await.unwrap();
            store.set_embedding(&chunk.id, &v).unwrap();
        }

        // Query of length 2 sits closest to "aa" (2), then "aaaa" (4).
        let hits = query_chunks(&store, &embedder, "qq", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "aa");
        assert_eq!(hits[1].text, "aaaa");
    }

    #[tokio::test]
    async fn empty_query_is_invalid() {
        let store = Store::open("", 4).unwrap();
        let err = query_chunks(&store, &StubEmbedding, "  ", 5).await.unwrap_err();
        assert!(matches!(err, RagError::InvalidInput(_)));
    }
}
