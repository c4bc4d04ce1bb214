//! Delimiter Chunker (C5): pattern-driven chunking for files with no AST
//! grammar. Runs in three phases — scan for candidate boundaries, rank
//! them by priority, then greedily accept non-overlapping boundaries in
//! ranked order.

use crate::chunk::{Chunk, ChunkSource};
use crate::delimiters::{self, LanguageFamily};
use crate::semantic_chunker::ChunkerConfig;
use crate::tokenizer::Tokenizer;

#[derive(Debug, Clone, Copy)]
struct Candidate {
    start: usize,
    end: usize,
    priority: u8,
}

/// Phase 1: scans `source` for every balanced open/close span of each
/// family pattern, recording it as a candidate chunk boundary.
fn scan_candidates(source: &str, family: LanguageFamily) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for pattern in delimiters::patterns(family) {
        let mut stack: Vec<usize> = Vec::new();
        let mut pos = 0usize;
        while pos < source.len() {
            let open_at = source[pos..].find(pattern.open);
            let close_at = source[pos..].find(pattern.close);
            match (open_at, close_at) {
                (Some(o), Some(c)) if o < c || pattern.open == pattern.close => {
                    stack.push(pos + o);
                    pos += o + pattern.open.len();
                }
                (_, Some(c)) => {
                    if let Some(start) = stack.pop() {
                        let end = pos + c + pattern.close.len();
                        candidates.push(Candidate { start, end, priority: pattern.priority });
                    }
                    pos += c + pattern.close.len();
                }
                (Some(o), None) => {
                    stack.push(pos + o);
                    pos += o + pattern.open.len();
                }
                (None, None) => break,
            }
        }
    }
    candidates
}

/// Phase 2 + 3: ranks candidates by `(-priority, -length, start_pos)` and
/// greedily accepts the highest-ranked ones that do not overlap any
/// already-accepted span.
fn resolve_boundaries(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        let len_a = a.end.saturating_sub(a.start);
        let len_b = b.end.saturating_sub(b.start);
        b.priority
            .cmp(&a.priority)
            .then(len_b.cmp(&len_a))
            .then(a.start.cmp(&b.start))
    });

    let mut accepted: Vec<Candidate> = Vec::new();
    'outer: for cand in candidates {
        for acc in &accepted {
            let overlaps = cand.start < acc.end && acc.start < cand.end;
            if overlaps {
                continue 'outer;
            }
        }
        accepted.push(cand);
    }
    accepted.sort_by_key(|c| c.start);
    accepted
}

/// Chunks `source` using the delimiter patterns for `family`, applying
/// the same size-management budget the Semantic Chunker uses so both
/// chunkers produce comparably sized output regardless of which one a
/// given file falls back to.
pub fn chunk_file(
    file_path: &str,
    source: &str,
    family: LanguageFamily,
    config: &ChunkerConfig,
    tokenizer: &dyn Tokenizer,
) -> Vec<Chunk> {
    let candidates = scan_candidates(source, family);
    let boundaries = resolve_boundaries(candidates);

    if boundaries.is_empty() {
        return vec![whole_file_chunk(file_path, source, tokenizer)];
    }

    let mut chunks = Vec::new();
    let mut cursor = 0usize;
    for boundary in &boundaries {
        if boundary.start > cursor {
            let gap = &source[cursor..boundary.start];
            if !gap.trim().is_empty() {
                push_sized(file_path, source, cursor, boundary.start, config, tokenizer, &mut chunks);
            }
        }
        push_sized(
            file_path,
            source,
            boundary.start.max(cursor),
            boundary.end,
            config,
            tokenizer,
            &mut chunks,
        );
        cursor = boundary.end;
    }
    if cursor < source.len() {
        let tail = &source[cursor..];
        if !tail.trim().is_empty() {
            push_sized(file_path, source, cursor, source.len(), config, tokenizer, &mut chunks);
        }
    }
    chunks
}

fn push_sized(
    file_path: &str,
    source: &str,
    start: usize,
    end: usize,
    config: &ChunkerConfig,
    tokenizer: &dyn Tokenizer,
    out: &mut Vec<Chunk>,
) {
    let text = &source[start..end.min(source.len())];
    if text.trim().is_empty() {
        return;
    }
    let tokens = tokenizer.count_tokens(text);
    if tokens <= config.max_chunk_tokens {
        out.push(Chunk::new(
            file_path,
            text,
            line_of(source, start),
            line_of(source, end),
            start,
            end,
            ChunkSource::Delimiter,
            tokens,
        ));
        return;
    }
    // Oversized span: §4.5's documented failure mode — hand off to the
    // recursive text splitter (§4.4 step 4), the one path allowed to
    // exceed chunk_limit only at its final character-wise resort.
    out.extend(recursive_text_split(file_path, source, start, end, config, tokenizer));
}

/// Separators tried widest-unit-first, matching the common
/// paragraph/line/sentence/word ordering of a recursive character
/// splitter. The empty string is not listed; it is the hard-split
/// terminus applied once none of these divide the span under budget.
const SPLIT_SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " "];

/// C4 step 4 / C5's oversized-span fallback: the recursive text splitter.
/// Divides `source[start..end]` along the widest separator that actually
/// brings every resulting piece under `max_chunk_tokens`, recursing with
/// progressively narrower separators on any piece that still doesn't fit,
/// and finally hard-splitting by `max_chunk_chars` if no separator helps
/// (e.g. one unbroken minified line). Each piece after the first is
/// prefixed with `simple_overlap` characters of trailing context from
/// the piece before it, so this is the one path permitted to emit a
/// chunk whose content exceeds `chunk_limit` once overlap is counted.
pub fn recursive_text_split(
    file_path: &str,
    source: &str,
    start: usize,
    end: usize,
    config: &ChunkerConfig,
    tokenizer: &dyn Tokenizer,
) -> Vec<Chunk> {
    let text = &source[start..end.min(source.len())];
    if text.trim().is_empty() {
        return Vec::new();
    }
    let pieces = split_recursive(text, SPLIT_SEPARATORS, config.max_chunk_tokens, config.max_chunk_chars, tokenizer);

    let mut chunks = Vec::new();
    let mut cursor = start;
    let mut prev_tail = String::new();
    for piece in pieces {
        let piece_start = cursor;
        let piece_end = cursor + piece.len();
        cursor = piece_end;
        if piece.trim().is_empty() {
            continue;
        }
        let mut content = String::new();
        content.push_str(&prev_tail);
        content.push_str(piece);
        let tokens = tokenizer.count_tokens(&content);
        let mut chunk = Chunk::new(
            file_path,
            content,
            line_of(source, piece_start),
            line_of(source, piece_end),
            piece_start,
            piece_end,
            ChunkSource::Fallback,
            tokens,
        );
        if !prev_tail.is_empty() {
            chunk = chunk.with_metadata("overlap_chars", prev_tail.len().to_string());
        }
        chunks.push(chunk);

        let overlap = config.simple_overlap.min(piece.len());
        let tail_start = floor_char_boundary(piece, piece.len() - overlap);
        prev_tail = piece[tail_start..].to_string();
    }
    chunks
}

/// Recursively divides `text` using the first separator in `separators`
/// that yields at least two token-bounded groups; any group still over
/// budget is recursed into with the remaining, narrower separators.
/// Falls back to a hard character split once `separators` is exhausted.
fn split_recursive<'a>(
    text: &'a str,
    separators: &[&str],
    max_tokens: usize,
    max_chars: usize,
    tokenizer: &dyn Tokenizer,
) -> Vec<&'a str> {
    if tokenizer.count_tokens(text) <= max_tokens {
        return vec![text];
    }
    if let Some((sep, rest)) = separators.split_first() {
        if text.matches(sep).count() >= 1 {
            let groups = merge_pieces(text, &split_keep_separator(text, sep), max_tokens, tokenizer);
            if groups.len() > 1 {
                let mut out = Vec::new();
                for group in groups {
                    if tokenizer.count_tokens(group) > max_tokens {
                        out.extend(split_recursive(group, rest, max_tokens, max_chars, tokenizer));
                    } else {
                        out.push(group);
                    }
                }
                return out;
            }
        }
        return split_recursive(text, rest, max_tokens, max_chars, tokenizer);
    }
    hard_split(text, max_chars)
}

/// Splits `text` on `sep`, keeping the separator attached to the end of
/// the preceding piece (so concatenating every piece reproduces `text`
/// exactly — the round-trip property §8 requires of chunk recombination).
fn split_keep_separator<'a>(text: &'a str, sep: &str) -> Vec<&'a str> {
    text.split_inclusive(sep).collect()
}

/// Greedily merges adjacent pieces into token-bounded, still-contiguous
/// groups (each returned slice is a real substring of `text`, not an
/// owned concatenation).
fn merge_pieces<'a>(text: &'a str, pieces: &[&str], max_tokens: usize, tokenizer: &dyn Tokenizer) -> Vec<&'a str> {
    let mut groups = Vec::new();
    let mut group_start = 0usize;
    let mut offset = 0usize;
    let mut group_tokens = 0usize;
    for piece in pieces {
        let piece_tokens = tokenizer.count_tokens(piece);
        if group_tokens + piece_tokens > max_tokens && offset > group_start {
            groups.push(&text[group_start..offset]);
            group_start = offset;
            group_tokens = 0;
        }
        group_tokens += piece_tokens;
        offset += piece.len();
    }
    if offset > group_start {
        groups.push(&text[group_start..offset]);
    }
    groups
}

/// Last-resort terminus: chops `text` into `max_chars`-sized pieces at
/// UTF-8 character boundaries, ignoring token budget entirely. Only
/// reached when no separator in [`SPLIT_SEPARATORS`] divides the span —
/// e.g. one unbroken line of minified content.
fn hard_split(text: &str, max_chars: usize) -> Vec<&str> {
    if max_chars == 0 || text.len() <= max_chars {
        return vec![text];
    }
    let mut out = Vec::new();
    let mut start = 0usize;
    while start < text.len() {
        let end = floor_char_boundary(text, (start + max_chars).min(text.len()));
        let end = if end <= start { text.len() } else { end };
        out.push(&text[start..end]);
        start = end;
    }
    out
}

/// `str::floor_char_boundary` is unstable; this is the stable equivalent.
fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn whole_file_chunk(file_path: &str, source: &str, tokenizer: &dyn Tokenizer) -> Chunk {
    Chunk::new(
        file_path,
        source,
        1,
        source.lines().count().max(1),
        0,
        source.len(),
        ChunkSource::Fallback,
        tokenizer.count_tokens(source),
    )
}

fn line_of(source: &str, byte_offset: usize) -> usize {
    source[..byte_offset.min(source.len())].matches('\n').count() + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::BytesEstimateTokenizer;

    #[test]
    fn flat_file_with_no_delimiters_becomes_whole_file_chunk() {
        let tok = BytesEstimateTokenizer;
        let chunks = chunk_file(
            "notes.txt",
            "just plain prose with no braces at all",
            LanguageFamily::CStyle,
            &ChunkerConfig::default(),
            &tok,
        );
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source, ChunkSource::Fallback);
    }

    #[test]
    fn nested_braces_produce_non_overlapping_chunks() {
        let tok = BytesEstimateTokenizer;
        let source = "fn outer() {\n    fn inner() {\n        1\n    }\n}\n";
        let chunks = chunk_file("a.rs", source, LanguageFamily::CStyle, &ChunkerConfig::default(), &tok);
        // outer brace pair should win due to greater length at equal priority
        for w in chunks.windows(2) {
            assert!(w[0].end_byte <= w[1].start_byte);
        }
    }

    #[test]
    fn priority_dominance_prefers_higher_priority_pattern() {
        let boundaries = resolve_boundaries(vec![
            Candidate { start: 0, end: 10, priority: 5 },
            Candidate { start: 2, end: 8, priority: 10 },
        ]);
        assert_eq!(boundaries.len(), 1);
        assert_eq!(boundaries[0].priority, 10);
    }
}
