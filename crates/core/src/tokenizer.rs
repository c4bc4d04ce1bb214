//! Token counting abstraction used by the chunkers to size chunks and by
//! the query pipeline to size prompts.

use std::sync::Arc;

/// A pluggable token counter. The default implementation is a cheap
/// byte-length estimate; an exact BPE-based counter is available behind
/// the `tiktoken` feature for callers that need precise budgets.
pub trait Tokenizer: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
    fn name(&self) -> &'static str;

    /// Counts tokens for a batch of texts at once. §4.1 requires this be
    /// safe for concurrent use and take a materialized sequence rather
    /// than a lazy iterator — a lazy caller can otherwise race a mutable
    /// encoder across threads, a failure mode seen in practice. The
    /// default maps `count_tokens` over the slice; implementations backed
    /// by a batch-friendly encoder can override this for throughput.
    fn count_batch(&self, texts: &[String]) -> Vec<usize> {
        texts.iter().map(|t| self.count_tokens(t)).collect()
    }
}

/// Estimates tokens as roughly one token per three bytes, which is close
/// enough for chunk-sizing decisions and requires no model assets.
pub struct BytesEstimateTokenizer;

impl Tokenizer for BytesEstimateTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        text.len().div_ceil(3)
    }

    fn name(&self) -> &'static str {
        "bytes-estimate"
    }
}

#[cfg(feature = "tiktoken")]
pub struct TiktokenTokenizer {
    bpe: tiktoken_rs::CoreBPE,
}

#[cfg(feature = "tiktoken")]
impl TiktokenTokenizer {
    pub fn new() -> Result<Self, anyhow_compat::TiktokenError> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| anyhow_compat::TiktokenError(e.to_string()))?;
        Ok(Self { bpe })
    }
}

#[cfg(feature = "tiktoken")]
impl Tokenizer for TiktokenTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    fn name(&self) -> &'static str {
        "cl100k_base"
    }
}

#[cfg(feature = "tiktoken")]
mod anyhow_compat {
    #[derive(Debug)]
    pub struct TiktokenError(pub String);

    impl std::fmt::Display for TiktokenError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "failed to load tiktoken encoder: {}", self.0)
        }
    }

    impl std::error::Error for TiktokenError {}
}

/// Resolves a tokenizer by name, falling back to the bytes estimate for
/// any unrecognized name or when the requested backend's feature is off.
pub fn create_tokenizer(name: &str) -> Arc<dyn Tokenizer> {
    #[cfg(feature = "tiktoken")]
    if name == "cl100k_base" || name == "tiktoken" {
        if let Ok(tok) = TiktokenTokenizer::new() {
            return Arc::new(tok);
        }
    }
    let _ = name;
    Arc::new(BytesEstimateTokenizer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_estimate_rounds_up() {
        let tok = BytesEstimateTokenizer;
        assert_eq!(tok.count_tokens(""), 0);
        assert_eq!(tok.count_tokens("ab"), 1);
        assert_eq!(tok.count_tokens("abcd"), 2);
    }

    #[test]
    fn unknown_name_falls_back_to_bytes_estimate() {
        let tok = create_tokenizer("nonexistent-backend");
        assert_eq!(tok.name(), "bytes-estimate");
    }
}
