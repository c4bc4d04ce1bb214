//! External interfaces this crate *consumes*: embedding providers and
//! rerankers. Both are plain traits — nothing else in the crate depends
//! on a concrete model runtime. The `semantic` feature adds one reference
//! implementation backed by `fastembed`/`ort` for callers who want a
//! working default without writing their own adapter.

use async_trait::async_trait;

use crate::chunk::SparseVector;
use crate::error::CoreError;

/// A dense embedding backend. Implementors may call out to a local
/// model runtime or a remote API; this crate only needs the shape.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError>;
    async fn embed_queries(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError>;
    fn model_name(&self) -> &str;
    fn dimension(&self) -> usize;
    fn max_batch_size(&self) -> usize;
    fn max_tokens_per_input(&self) -> usize;
}

/// A sparse embedding backend (§6): same document/query split as
/// [`EmbeddingProvider`], but each output is a `{indices, values}` pair
/// over a fixed vocabulary (e.g. SPLADE-style term weights) rather than
/// a dense float vector.
#[async_trait]
pub trait SparseEmbeddingProvider: Send + Sync {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<SparseVector>, CoreError>;
    async fn embed_queries(&self, texts: &[String]) -> Result<Vec<SparseVector>, CoreError>;
    fn model_name(&self) -> &str;
    fn max_batch_size(&self) -> usize;
    fn max_tokens_per_input(&self) -> usize;
}

/// Reranks a shortlist of (text, initial_score) pairs against a query,
/// returning scores in the same order as the input.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>, CoreError>;
    fn model_name(&self) -> &str;
}

#[cfg(feature = "semantic")]
pub mod fastembed_provider {
    use super::*;
    use crate::error::ErrorDetails;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use std::sync::{Arc, Mutex};

    /// Reference [`EmbeddingProvider`] built on `fastembed`'s ONNX runtime
    /// bindings. Construction downloads (or loads a cached copy of) the
    /// model on first use; encoding happens on a blocking thread since
    /// `fastembed`'s API is synchronous. The model lives behind an `Arc`
    /// so a call can clone a handle into the `'static` `spawn_blocking`
    /// closure instead of smuggling a borrow through a raw pointer.
    pub struct FastEmbedProvider {
        model: Arc<Mutex<TextEmbedding>>,
        model_name: String,
        dimension: usize,
        max_batch_size: usize,
        max_tokens_per_input: usize,
    }

    impl FastEmbedProvider {
        pub fn new(model_name: &str, dimension: usize) -> Result<Self, CoreError> {
            let model_kind = match model_name {
                "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
                "all-minilm-l6-v2" => EmbeddingModel::AllMiniLML6V2,
                _ => EmbeddingModel::BGESmallENV15,
            };
            let model = TextEmbedding::try_new(InitOptions::new(model_kind)).map_err(|e| {
                CoreError::Configuration {
                    message: format!("failed to load embedding model: {e}"),
                    details: ErrorDetails::new().with("model", model_name),
                    suggestions: vec![
                        "check network access for the first-run model download".into(),
                        "pre-download the model cache and point to it via configuration".into(),
                    ],
                }
            })?;
            Ok(Self {
                model: Arc::new(Mutex::new(model)),
                model_name: model_name.to_string(),
                dimension,
                max_batch_size: 32,
                max_tokens_per_input: 512,
            })
        }

        fn embed_blocking(model: &Mutex<TextEmbedding>, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
            let mut model = model.lock().unwrap();
            model
                .embed(texts.to_vec(), None)
                .map_err(|e| CoreError::ProviderTransient {
                    message: e.to_string(),
                    details: ErrorDetails::new(),
                    suggestions: vec![
                        "retry with a smaller batch".into(),
                        "check the embedding model process has not crashed".into(),
                    ],
                })
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FastEmbedProvider {
        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
            let texts = texts.to_vec();
            let model = Arc::clone(&self.model);
            tokio::task::spawn_blocking(move || Self::embed_blocking(&model, &texts))
                .await
                .map_err(|e| CoreError::ProviderPermanent {
                    message: e.to_string(),
                    details: ErrorDetails::new(),
                    suggestions: vec![
                        "check the embedding worker thread did not panic".into(),
                        "reduce batch size and retry".into(),
                    ],
                })?
        }

        async fn embed_queries(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
            self.embed_documents(texts).await
        }

        fn model_name(&self) -> &str {
            &self.model_name
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn max_batch_size(&self) -> usize {
            self.max_batch_size
        }

        fn max_tokens_per_input(&self) -> usize {
            self.max_tokens_per_input
        }
    }
}

#[cfg(feature = "semantic")]
pub use fastembed_provider::FastEmbedProvider;

#[cfg(test)]
mod tests {
    use super::*;

    struct StubProvider;

    #[async_trait]
    impl EmbeddingProvider for StubProvider {
        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
            Ok(texts.iter().map(|_| vec![0.0; 4]).collect())
        }
        async fn embed_queries(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
            self.embed_documents(texts).await
        }
        fn model_name(&self) -> &str {
            "stub"
        }
        fn dimension(&self) -> usize {
            4
        }
        fn max_batch_size(&self) -> usize {
            16
        }
        fn max_tokens_per_input(&self) -> usize {
            256
        }
    }

    #[tokio::test]
    async fn stub_provider_returns_one_vector_per_input() {
        let provider = StubProvider;
        let out = provider
            .embed_documents(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].len(), provider.dimension());
    }
}
