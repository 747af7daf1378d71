//! Wire models for the remote executor (OpenAI-compatible embeddings shape)

use serde::{Deserialize, Serialize};

/// Request to generate an embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// Input text to embed
    pub input: String,

    /// Model name (optional, the executor picks its default)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Response from the remote executor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    /// Generated embeddings, one per input
    pub data: Vec<EmbeddingData>,

    #[serde(default)]
    pub model: Option<String>,
}

/// Individual embedding data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingData {
    pub embedding: Vec<f64>,

    #[serde(default)]
    pub index: usize,
}

impl EmbeddingRequest {
    pub fn single(text: impl Into<String>, model: Option<String>) -> Self {
        Self {
            input: text.into(),
            model,
        }
    }
}

impl EmbeddingResponse {
    /// Take the first embedding out of the response
    pub fn into_first(self) -> Option<Vec<f64>> {
        self.data.into_iter().min_by_key(|d| d.index).map(|d| d.embedding)
    }
}
