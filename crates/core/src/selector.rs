//! Chunker Selector (C6): picks the Semantic Chunker when a wired AST
//! grammar and a clean parse are available, and otherwise falls back
//! through the Delimiter Chunker to a whole-file chunk — logging each
//! fallback hop so degraded coverage is visible in aggregate stats
//! rather than silently lowering search quality.

use crate::chunk::{Chunk, ChunkSource};
use crate::delimiter_chunker;
use crate::delimiters::classify_extension;
use crate::error::{governance_error, CoreResult, GovernanceKind};
use crate::parser::languages::language_for_ext;
use crate::semantic_chunker::{self, ChunkerConfig};
use crate::tokenizer::Tokenizer;

#[cfg(feature = "treesitter")]
use crate::parser;

fn extension_of(file_path: &str) -> &str {
    file_path.rsplit('.').next().unwrap_or("")
}

/// Short-circuits §4.4's edge cases that must be handled before any
/// parser or pattern runs. Returns `Some` with the result already
/// decided; `None` means the caller should proceed to chunker dispatch.
fn edge_case_chunk(file_path: &str, source: &str, tokenizer: &dyn Tokenizer) -> Option<CoreResult<(Vec<Chunk>, ChunkSource)>> {
    if source.contains('\0') {
        return Some(Err(governance_error(
            GovernanceKind::BinaryFile,
            file_path,
            format!("'{file_path}' contains a NUL byte and is not indexable as text"),
            vec![
                "exclude binary files via the project's ignore rules".into(),
                "if this is a text format, check its encoding is not UTF-16/UTF-32".into(),
            ],
        )));
    }
    if source.is_empty() {
        return Some(Ok((Vec::new(), ChunkSource::EdgeCase)));
    }
    if source.trim().is_empty() {
        let tokens = tokenizer.count_tokens(source);
        let chunk = Chunk::new(file_path, source, 1, source.lines().count().max(1), 0, source.len(), ChunkSource::EdgeCase, tokens)
            .with_metadata("edge_case", "whitespace_only");
        return Some(Ok((vec![chunk], ChunkSource::EdgeCase)));
    }
    if source.lines().count() <= 1 {
        let tokens = tokenizer.count_tokens(source);
        let chunk = Chunk::new(file_path, source, 1, 1, 0, source.len(), ChunkSource::EdgeCase, tokens)
            .with_metadata("edge_case", "single_line");
        return Some(Ok((vec![chunk], ChunkSource::EdgeCase)));
    }
    None
}

/// Chunks one file, selecting the best available chunker. Returns the
/// chunks plus the chunker actually used, so the caller can aggregate
/// fallback-rate statistics per §4.13's health surface. Empty,
/// whitespace-only, single-line, and binary (NUL-byte) content short-
/// circuit before any chunker runs, per §4.4's edge cases.
pub fn chunk_file(
    file_path: &str,
    source: &str,
    config: &ChunkerConfig,
    tokenizer: &dyn Tokenizer,
) -> CoreResult<(Vec<Chunk>, ChunkSource)> {
    if let Some(result) = edge_case_chunk(file_path, source, tokenizer) {
        return result;
    }

    let ext = extension_of(file_path);

    #[cfg(feature = "treesitter")]
    if let Some(lang) = language_for_ext(ext) {
        match parser::parse_file(file_path, source, lang) {
            Ok(ast) if !ast.symbols.is_empty() => {
                let chunks = semantic_chunker::chunk_file(file_path, source, &ast, config, tokenizer);
                return Ok((chunks, ChunkSource::Semantic));
            }
            Ok(_) => {
                tracing::debug!(file_path, "semantic parse produced no symbols, falling back to delimiter chunker");
            }
            Err(error) => {
                tracing::warn!(file_path, %error, "semantic parse failed, falling back to delimiter chunker");
            }
        }
    }

    #[cfg(not(feature = "treesitter"))]
    let _ = language_for_ext(ext);

    let family = classify_extension(ext);
    let chunks = delimiter_chunker::chunk_file(file_path, source, family, config, tokenizer);
    if chunks.iter().all(|c| c.source == ChunkSource::Fallback) {
        tracing::debug!(file_path, "delimiter chunker found no boundaries, emitting whole-file chunk");
    }
    let used = chunks
        .first()
        .map(|c| c.source)
        .unwrap_or(ChunkSource::Fallback);
    Ok((chunks, used))
}
