//! Knowledge-base facade over the Ollama RAG server.
//!
//! Besides answering questions, the server chunks and embeds text and
//! persists named vector stores. [`RagClient::index_text`] chains those
//! into the append-to-store workflow.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{answered, Domain};
use crate::tool_client::{ToolCall, ToolError};

/// Vector store queried when the caller does not name one.
pub const DEFAULT_STORE: &str = "bot_knowledge";

/// Chunks retrieved per question by default.
pub const DEFAULT_TOP_K: u32 = 5;

/// Characters per chunk when indexing documents.
pub const DEFAULT_CHUNK_SIZE: u32 = 800;

/// Characters shared by neighbouring chunks.
pub const DEFAULT_CHUNK_OVERLAP: u32 = 50;

/// How aggressively retrieved chunks are re-ranked before answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankMode {
    Light,
    Strict,
}

impl FromStr for RerankMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "light" => Ok(RerankMode::Light),
            "strict" => Ok(RerankMode::Strict),
            other => Err(format!("unknown rerank mode '{other}' (expected light or strict)")),
        }
    }
}

tool_schema! {
    RagQuery => "rag_answer" -> RagAnswer {
        store_name: String,
        query: String,
        top_k: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        rerank_mode: Option<RerankMode>,
    }
}

tool_schema! {
    ChunkAndEmbed => "chunk_and_embed" -> EmbeddedChunks {
        text: String,
        chunk_size: u32,
        chunk_overlap: u32,
    }
}

tool_schema! {
    VectorStoreSave => "vector_store_save" -> serde_json::Value {
        name: String,
        chunks: Vec<serde_json::Value>,
    }
}

tool_schema! {
    VectorStoreLoad => "vector_store_load" -> EmbeddedChunks {
        name: String,
    }
}

/// Answer of `rag_answer`.
#[derive(Debug, Clone, Deserialize)]
pub struct RagAnswer {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<serde_json::Value>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub chunks_used: u32,
    #[serde(default)]
    pub context_length: u64,
}

/// Chunks with their embeddings, as produced by `chunk_and_embed` and
/// returned by `vector_store_load`. Opaque to the client.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddedChunks {
    pub chunks: Vec<serde_json::Value>,
}

/// Outcome of adding a document to a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSummary {
    /// Chunks produced from the new text.
    pub added: usize,
    /// Chunks in the store after saving.
    pub total: usize,
}

domain_client!(
    /// Talks to the Ollama RAG tool server.
    RagClient,
    Domain::Ollama
);

impl RagClient {
    /// Answer `query` from the named store.
    pub async fn answer_question(
        &self,
        store_name: &str,
        query: &str,
        top_k: u32,
        rerank_mode: Option<RerankMode>,
    ) -> Option<RagAnswer> {
        self.answer(&RagQuery {
            store_name: store_name.to_string(),
            query: query.to_string(),
            top_k,
            rerank_mode,
        })
        .await
    }

    pub async fn chunk_and_embed(&self, text: &str, chunk_size: u32, chunk_overlap: u32) -> Option<EmbeddedChunks> {
        self.answer(&ChunkAndEmbed {
            text: text.to_string(),
            chunk_size,
            chunk_overlap,
        })
        .await
    }

    pub async fn save_store(&self, name: &str, chunks: Vec<serde_json::Value>) -> Option<serde_json::Value> {
        self.answer(&VectorStoreSave {
            name: name.to_string(),
            chunks,
        })
        .await
    }

    pub async fn load_store(&self, name: &str) -> Option<EmbeddedChunks> {
        self.answer(&VectorStoreLoad {
            name: name.to_string(),
        })
        .await
    }

    /// Embed `text` and append its chunks to the store `store_name`.
    pub async fn index_text(
        &self,
        store_name: &str,
        text: &str,
        chunk_size: u32,
        chunk_overlap: u32,
    ) -> Option<IndexSummary> {
        self.index_documents(store_name, &[text], chunk_size, chunk_overlap)
            .await
    }

    /// Embed every document and append the chunks to `store_name` with a
    /// single load and save.
    ///
    /// A store the server rejects on load counts as empty. Any other load
    /// failure aborts before saving, so existing chunks are never replaced
    /// by a partial set.
    pub async fn index_documents<S: AsRef<str>>(
        &self,
        store_name: &str,
        documents: &[S],
        chunk_size: u32,
        chunk_overlap: u32,
    ) -> Option<IndexSummary> {
        let mut added = Vec::new();
        for document in documents {
            let text = document.as_ref();
            if text.trim().is_empty() {
                continue;
            }
            added.extend(self.chunk_and_embed(text, chunk_size, chunk_overlap).await?.chunks);
        }
        if added.is_empty() {
            tracing::warn!(store = %store_name, "nothing to index");
            return None;
        }

        let load = VectorStoreLoad {
            name: store_name.to_string(),
        };
        let mut chunks = match self.client().invoke(&load).await {
            Ok(existing) => existing.chunks,
            Err(ToolError::Remote { message, .. }) => {
                tracing::info!(store = %store_name, reason = %message, "starting a new store");
                Vec::new()
            }
            Err(e) => return answered(Self::DOMAIN, VectorStoreLoad::NAME, Err(e)),
        };
        let existing = chunks.len();
        let summary = IndexSummary {
            added: added.len(),
            total: existing + added.len(),
        };
        chunks.extend(added);

        self.save_store(store_name, chunks).await?;
        tracing::info!(
            store = %store_name,
            existing,
            added = summary.added,
            total = summary.total,
            "indexed documents"
        );
        Some(summary)
    }
}
