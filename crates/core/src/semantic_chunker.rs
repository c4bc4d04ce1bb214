//! Semantic Chunker (C4): builds chunks from the Semantic Parser's symbol
//! table instead of raw delimiters, so a chunk boundary lines up with a
//! function, method, or type definition whenever one is available.

use crate::chunk::{Chunk, ChunkSource};
use crate::parser::{FileAst, Symbol, SymbolKind};
use crate::tokenizer::Tokenizer;

/// Tunables for chunk sizing. Mirrors the indexing config's chunking
/// section (`max_chunk_tokens`, `min_chunk_tokens`).
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    pub max_chunk_tokens: usize,
    pub min_chunk_tokens: usize,
    /// Hard character ceiling for the recursive text splitter's last-resort
    /// terminus (§4.4 step 4), used only once no configured separator
    /// divides a span under `max_chunk_tokens`.
    pub max_chunk_chars: usize,
    /// Characters of trailing context copied from the previous boundary
    /// into the next chunk, per §4.5's emission rule and §4.4 step 4.
    pub simple_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_tokens: 512,
            min_chunk_tokens: 32,
            max_chunk_chars: 8000,
            simple_overlap: 80,
        }
    }
}

/// Splits `source` into chunks using `ast`'s top-level symbols as natural
/// boundaries. The size management order is: (1) merge consecutive small
/// symbols below `min_chunk_tokens` into one chunk, (2) split any single
/// symbol whose body exceeds `max_chunk_tokens` at its nearest line
/// boundary, (3) attach a symbol's immediately preceding comment block to
/// its chunk, (4) emit any source not covered by a symbol (file header,
/// trailing code) as its own chunk.
pub fn chunk_file(
    file_path: &str,
    source: &str,
    ast: &FileAst,
    config: &ChunkerConfig,
    tokenizer: &dyn Tokenizer,
) -> Vec<Chunk> {
    let mut top_level: Vec<&Symbol> = ast
        .symbols
        .iter()
        .filter(|s| s.parent_idx.is_none())
        .collect();
    top_level.sort_by_key(|s| s.start_byte);

    if top_level.is_empty() {
        return vec![whole_file_chunk(file_path, source, tokenizer)];
    }

    let mut chunks = Vec::new();
    let mut cursor = 0usize;
    let mut pending: Vec<&Symbol> = Vec::new();
    let mut pending_tokens = 0usize;

    let flush_pending = |pending: &mut Vec<&Symbol>,
                         pending_tokens: &mut usize,
                         chunks: &mut Vec<Chunk>| {
        if pending.is_empty() {
            return;
        }
        let start_byte = with_leading_comment(source, pending[0].start_byte);
        let end_byte = pending.last().unwrap().end_byte;
        let text = &source[start_byte..end_byte.min(source.len())];
        let start_line = line_of(source, start_byte);
        let end_line = pending.last().unwrap().end_line;
        let names: Vec<String> = pending.iter().map(|s| s.name.clone()).collect();
        let any_substantive = pending.iter().any(|s| is_substantive(s.kind));
        let mut chunk = Chunk::new(
            file_path,
            text,
            start_line,
            end_line,
            start_byte,
            end_byte,
            ChunkSource::Semantic,
            tokenizer.count_tokens(text),
        );
        if names.len() == 1 {
            chunk = chunk.with_symbol_name(names[0].clone());
        } else {
            chunk = chunk.with_metadata("merged_symbols", names.join(","));
        }
        if !any_substantive {
            chunk = chunk.with_metadata("non_substantive", "true");
        }
        chunks.push(chunk);
        pending.clear();
        *pending_tokens = 0;
    };

    for symbol in &top_level {
        if symbol.start_byte > cursor {
            // gap between symbols: emit as plain context if non-trivial.
            let gap = &source[cursor..symbol.start_byte];
            if !gap.trim().is_empty() {
                flush_pending(&mut pending, &mut pending_tokens, &mut chunks);
            }
        }
        let body = &source[symbol.start_byte..symbol.end_byte.min(source.len())];
        let body_tokens = tokenizer.count_tokens(body);

        if body_tokens > config.max_chunk_tokens {
            flush_pending(&mut pending, &mut pending_tokens, &mut chunks);
            chunks.extend(split_oversized_symbol(
                file_path, source, symbol, config, tokenizer,
            ));
        } else if pending_tokens + body_tokens > config.max_chunk_tokens && !pending.is_empty() {
            flush_pending(&mut pending, &mut pending_tokens, &mut chunks);
            pending.push(symbol);
            pending_tokens = body_tokens;
        } else {
            pending.push(symbol);
            pending_tokens += body_tokens;
            if pending_tokens >= config.min_chunk_tokens {
                flush_pending(&mut pending, &mut pending_tokens, &mut chunks);
            }
        }
        cursor = symbol.end_byte;
    }
    flush_pending(&mut pending, &mut pending_tokens, &mut chunks);

    if cursor < source.len() {
        let tail = &source[cursor..];
        if !tail.trim().is_empty() {
            chunks.push(Chunk::new(
                file_path,
                tail,
                line_of(source, cursor),
                source.lines().count(),
                cursor,
                source.len(),
                ChunkSource::Semantic,
                tokenizer.count_tokens(tail),
            ));
        }
    }

    chunks
}

fn whole_file_chunk(file_path: &str, source: &str, tokenizer: &dyn Tokenizer) -> Chunk {
    Chunk::new(
        file_path,
        source,
        1,
        source.lines().count().max(1),
        0,
        source.len(),
        ChunkSource::Semantic,
        tokenizer.count_tokens(source),
    )
}

/// Walks backward from `start` over blank lines and `//`/`#`-style
/// comment lines so a symbol's doc comment travels with its chunk.
fn with_leading_comment(source: &str, start: usize) -> usize {
    let prefix = &source[..start.min(source.len())];
    let mut boundary = start;
    for line in prefix.lines().rev() {
        let trimmed = line.trim_start();
        let is_comment_or_blank = trimmed.is_empty()
            || trimmed.starts_with("//")
            || trimmed.starts_with('#')
            || trimmed.starts_with("/*")
            || trimmed.starts_with('*');
        if !is_comment_or_blank {
            break;
        }
        boundary = boundary.saturating_sub(line.len() + 1);
    }
    boundary
}

fn line_of(source: &str, byte_offset: usize) -> usize {
    source[..byte_offset.min(source.len())].matches('\n').count() + 1
}

/// Splits a single symbol whose body exceeds the token budget. The flat
/// symbol table has no child-symbol list to recurse into (step 2's
/// "recurse on children" is therefore a no-op here — there is only one
/// symbol, not a container), so this goes straight to step 3: hand the
/// body to the Delimiter Chunker so brace/indent boundaries inside the
/// oversized function or class still produce reasonably-sized chunks.
/// Any piece the delimiter pass still can't bound under budget (step 3's
/// own failure mode) falls through to the recursive text splitter (step
/// 4), the one path allowed to exceed `chunk_limit` via overlap. Each
/// resulting chunk is tagged with the parent symbol name so search
/// results retain the enclosing-symbol context per §4.4 step 3.
fn split_oversized_symbol(
    file_path: &str,
    source: &str,
    symbol: &Symbol,
    config: &ChunkerConfig,
    tokenizer: &dyn Tokenizer,
) -> Vec<Chunk> {
    let family = crate::delimiters::classify_extension(file_path.rsplit('.').next().unwrap_or(""));
    let body_end = symbol.end_byte.min(source.len());
    let body = &source[symbol.start_byte..body_end];
    let from_delimiter = crate::delimiter_chunker::chunk_file(file_path, body, family, config, tokenizer);

    // The delimiter pass ran against a byte-offset-0 slice of `body`, so
    // its spans need shifting back into whole-file coordinates before
    // they can be trusted as this symbol's chunk spans.
    let shifted: Vec<Chunk> = from_delimiter
        .into_iter()
        .map(|mut c| {
            c.start_byte += symbol.start_byte;
            c.end_byte += symbol.start_byte;
            c.start_line = line_of(source, c.start_byte);
            c.end_line = line_of(source, c.end_byte.saturating_sub(1).max(c.start_byte));
            c
        })
        .collect();

    let still_oversized = shifted.len() <= 1
        && shifted.first().map(|c| c.token_count > config.max_chunk_tokens).unwrap_or(true);
    let resolved = if still_oversized {
        crate::delimiter_chunker::recursive_text_split(file_path, source, symbol.start_byte, body_end, config, tokenizer)
    } else {
        shifted
    };

    let mut chunks = Vec::with_capacity(resolved.len());
    for mut chunk in resolved {
        chunk.source = ChunkSource::Semantic;
        chunk = chunk.with_symbol_name(symbol.name.clone()).with_metadata("split", "true");
        chunks.push(chunk);
    }
    chunks
}

/// True for any symbol kind that should count toward a chunk's "has real
/// content" heuristic (as opposed to e.g. a bare re-export).
pub fn is_substantive(kind: SymbolKind) -> bool {
    !matches!(kind, SymbolKind::TypeAlias)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::BytesEstimateTokenizer;

    fn ast_with_two_functions() -> (String, FileAst) {
        let source = "fn a() {\n    1\n}\n\nfn b() {\n    2\n}\n".to_string();
        let mut ast = FileAst::default();
        ast.symbols.push(Symbol {
            name: "a".into(),
            kind: SymbolKind::Function,
            start_line: 1,
            end_line: 3,
            start_byte: 0,
            end_byte: source.find("\n\nfn b").unwrap() + 1,
            parent_idx: None,
            signature: "fn a()".into(),
        });
        let b_start = source.find("fn b").unwrap();
        ast.symbols.push(Symbol {
            name: "b".into(),
            kind: SymbolKind::Function,
            start_line: 5,
            end_line: 7,
            start_byte: b_start,
            end_byte: source.len(),
            parent_idx: None,
            signature: "fn b()".into(),
        });
        (source, ast)
    }

    #[test]
    fn no_symbols_produces_single_whole_file_chunk() {
        let tok = BytesEstimateTokenizer;
        let ast = FileAst::default();
        let chunks = chunk_file("empty.rs", "// just a comment\n", &ast, &ChunkerConfig::default(), &tok);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source, ChunkSource::Semantic);
    }

    #[test]
    fn small_symbols_merge_until_min_tokens() {
        let tok = BytesEstimateTokenizer;
        let (source, ast) = ast_with_two_functions();
        let config = ChunkerConfig {
            max_chunk_tokens: 1000,
            min_chunk_tokens: 1000, // force merge of both into one chunk
            max_chunk_chars: 8000,
            simple_overlap: 80,
        };
        let chunks = chunk_file("two.rs", &source, &ast, &config, &tok);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].metadata.contains_key("merged_symbols"));
    }

    #[test]
    fn type_alias_only_chunk_is_tagged_non_substantive() {
        let tok = BytesEstimateTokenizer;
        let source = "type Id = u64;\n".to_string();
        let mut ast = FileAst::default();
        ast.symbols.push(Symbol {
            name: "Id".into(),
            kind: SymbolKind::TypeAlias,
            start_line: 1,
            end_line: 1,
            start_byte: 0,
            end_byte: source.len(),
            parent_idx: None,
            signature: "type Id = u64".into(),
        });
        let chunks = chunk_file("ids.rs", &source, &ast, &ChunkerConfig::default(), &tok);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata.get("non_substantive").map(String::as_str), Some("true"));
    }

    #[test]
    fn oversized_symbol_gets_split() {
        let tok = BytesEstimateTokenizer;
        let long_body = "x".repeat(3000);
        let source = format!("fn huge() {{\n{long_body}\n}}\n");
        let mut ast = FileAst::default();
        ast.symbols.push(Symbol {
            name: "huge".into(),
            kind: SymbolKind::Function,
            start_line: 1,
            end_line: 3,
            start_byte: 0,
            end_byte: source.len(),
            parent_idx: None,
            signature: "fn huge()".into(),
        });
        let config = ChunkerConfig {
            max_chunk_tokens: 50,
            min_chunk_tokens: 1,
            max_chunk_chars: 8000,
            simple_overlap: 80,
        };
        let chunks = chunk_file("huge.rs", &source, &ast, &config, &tok);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.symbol_name.as_deref() == Some("huge")));
    }
}
