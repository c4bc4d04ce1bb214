//! Semantic Parser (C2): tree-sitter-backed symbol extraction used by the
//! Semantic Chunker to find natural chunk boundaries (function bodies,
//! class/struct definitions, impl blocks) instead of splitting on raw
//! delimiters.

pub mod languages;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use languages::Language;

/// The taxonomy of symbols the parser recognizes across every wired
/// grammar. Kept deliberately coarse — callers that need finer distinction
/// (e.g. "static method" vs "instance method") can recover it from
/// `signature`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Struct,
    Enum,
    Interface,
    Trait,
    Impl,
    TypeAlias,
    Constant,
    Module,
}

impl SymbolKind {
    pub fn label(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Class => "class",
            SymbolKind::Struct => "struct",
            SymbolKind::Enum => "enum",
            SymbolKind::Interface => "interface",
            SymbolKind::Trait => "trait",
            SymbolKind::Impl => "impl",
            SymbolKind::TypeAlias => "type",
            SymbolKind::Constant => "const",
            SymbolKind::Module => "module",
        }
    }
}

/// One extracted symbol: a named, bounded span of source plus enough
/// context (parent, one-line signature) for the Semantic Chunker to
/// attach the symbol to a chunk and for the chunk's metadata to carry a
/// human-readable label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub start_line: usize,
    pub end_line: usize,
    pub start_byte: usize,
    pub end_byte: usize,
    pub parent_idx: Option<usize>,
    pub signature: String,
}

/// The full symbol table for one file, in source order, with an index by
/// name for fast lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileAst {
    pub symbols: Vec<Symbol>,
    pub name_index: HashMap<String, Vec<usize>>,
}

impl FileAst {
    pub fn find(&self, name: &str) -> Vec<&Symbol> {
        self.name_index
            .get(name)
            .map(|idxs| idxs.iter().map(|&i| &self.symbols[i]).collect())
            .unwrap_or_default()
    }

    fn push(&mut self, symbol: Symbol) -> usize {
        let idx = self.symbols.len();
        self.name_index.entry(symbol.name.clone()).or_default().push(idx);
        self.symbols.push(symbol);
        idx
    }
}

/// A bound on recursive descent into deeply nested ASTs (e.g. generated
/// code, deeply chained builder calls) so a pathological file cannot
/// blow the stack or stall indexing.
const MAX_WALK_DEPTH: usize = 200;

/// Maximum signature length recorded per symbol, matching the display
/// budget a single-line chunk label should fit in.
const MAX_SIGNATURE_CHARS: usize = 200;

fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Extracts a one-line signature from a symbol's full text: everything up
/// to (but not including) the opening body delimiter, with trailing
/// whitespace collapsed and a length cap applied.
pub fn extract_signature(full_text: &str, lang: Language) -> String {
    let first_stop = match lang {
        Language::Python | Language::Yaml => full_text.find(':'),
        _ => full_text.find('{'),
    };
    let raw = match first_stop {
        Some(idx) => &full_text[..idx],
        None => full_text.lines().next().unwrap_or(full_text),
    };
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_at_char_boundary(&collapsed, MAX_SIGNATURE_CHARS).to_string()
}

#[cfg(feature = "treesitter")]
mod treesitter_backend {
    use super::*;
    use crate::error::{CoreError, ErrorDetails};
    use tree_sitter::{Node, Parser};

    fn classify_node(lang: Language, kind: &str) -> Option<SymbolKind> {
        use Language::*;
        use SymbolKind::*;
        Some(match (lang, kind) {
            (Rust, "function_item") => Function,
            (Rust, "impl_item") => Impl,
            (Rust, "struct_item") => Struct,
            (Rust, "enum_item") => Enum,
            (Rust, "trait_item") => Trait,
            (Rust, "type_item") => TypeAlias,
            (Rust, "mod_item") => Module,
            (Rust, "const_item" | "static_item") => Constant,

            (TypeScript | Tsx | JavaScript, "function_declaration" | "function") => Function,
            (TypeScript | Tsx | JavaScript, "method_definition") => Method,
            (TypeScript | Tsx | JavaScript, "class_declaration") => Class,
            (TypeScript | Tsx, "interface_declaration") => Interface,
            (TypeScript | Tsx, "type_alias_declaration") => TypeAlias,
            (TypeScript | Tsx | JavaScript, "lexical_declaration") => Constant,

            (Python, "function_definition") => Function,
            (Python, "class_definition") => Class,

            (Go, "function_declaration") => Function,
            (Go, "method_declaration") => Method,
            (Go, "type_spec") => Struct,
            (Go, "const_spec") => Constant,

            (C | Cpp, "function_definition") => Function,
            (Cpp, "class_specifier") => Class,
            (C | Cpp, "struct_specifier") => Struct,
            (C | Cpp, "enum_specifier") => Enum,

            (Java, "method_declaration") => Method,
            (Java, "class_declaration") => Class,
            (Java, "interface_declaration") => Interface,
            (Java, "enum_declaration") => Enum,

            (Ruby, "method") => Method,
            (Ruby, "class") => Class,
            (Ruby, "module") => Module,

            (Php, "function_definition" | "method_declaration") => Function,
            (Php, "class_declaration") => Class,
            (Php, "interface_declaration") => Interface,

            (CSharp, "method_declaration") => Method,
            (CSharp, "class_declaration") => Class,
            (CSharp, "interface_declaration") => Interface,
            (CSharp, "struct_declaration") => Struct,
            (CSharp, "enum_declaration") => Enum,

            _ => return None,
        })
    }

    fn extract_name(node: Node, source: &str) -> Option<String> {
        if let Some(name_node) = node.child_by_field_name("name") {
            return Some(source[name_node.byte_range()].to_string());
        }
        // impl blocks and similar constructs have no "name" field; fall
        // back to the first identifier-ish child.
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if matches!(
                child.kind(),
                "identifier" | "type_identifier" | "property_identifier"
            ) {
                return Some(source[child.byte_range()].to_string());
            }
        }
        None
    }

    /// Walks the tree collecting symbols, returning `true` once `depth`
    /// has exceeded [`MAX_WALK_DEPTH`] anywhere in the subtree so the
    /// caller can raise a distinct `ASTDepthExceeded` error (§4.2) rather
    /// than silently truncate a pathologically nested tree.
    fn walk_node(
        node: Node,
        source: &str,
        lang: Language,
        ast: &mut FileAst,
        parent_idx: Option<usize>,
        depth: usize,
    ) -> bool {
        if depth > MAX_WALK_DEPTH {
            return true;
        }
        let mut next_parent = parent_idx;
        if let Some(kind) = classify_node(lang, node.kind()) {
            let name = extract_name(node, source).unwrap_or_else(|| "<anonymous>".to_string());
            let text = &source[node.byte_range()];
            let mut resolved_kind = kind;
            if resolved_kind == SymbolKind::Function && parent_idx.is_some() {
                // A function nested under another symbol (e.g. inside an
                // `impl` block) is really a method.
                resolved_kind = SymbolKind::Method;
            }
            let symbol = Symbol {
                name,
                kind: resolved_kind,
                start_line: node.start_position().row + 1,
                end_line: node.end_position().row + 1,
                start_byte: node.start_byte(),
                end_byte: node.end_byte(),
                parent_idx,
                signature: extract_signature(text, lang),
            };
            next_parent = Some(ast.push(symbol));
        }
        let mut depth_exceeded = false;
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            depth_exceeded |= walk_node(child, source, lang, ast, next_parent, depth + 1);
        }
        depth_exceeded
    }

    pub fn parse_file(path: &str, source: &str, lang: Language) -> Result<FileAst, CoreError> {
        let mut parser = Parser::new();
        parser
            .set_language(&super::languages::grammar_for(lang))
            .map_err(|e| CoreError::Parse {
                message: e.to_string(),
                details: ErrorDetails::new().with_file(path),
                suggestions: vec![
                    "verify the tree-sitter grammar version matches the parser crate".into(),
                    "fall back to the delimiter chunker for this file".into(),
                ],
            })?;
        let tree = parser.parse(source, None).ok_or_else(|| CoreError::Parse {
            message: "tree-sitter returned no parse tree".into(),
            details: ErrorDetails::new().with_file(path),
            suggestions: vec![
                "check the file is valid UTF-8".into(),
                "check the file is not empty".into(),
            ],
        })?;
        let mut ast = FileAst::default();
        let depth_exceeded = walk_node(tree.root_node(), source, lang, &mut ast, None, 0);
        if depth_exceeded {
            return Err(crate::error::governance_error(
                crate::error::GovernanceKind::AstDepthExceeded,
                path,
                format!("AST recursion exceeded the bounded depth of {MAX_WALK_DEPTH} while parsing '{path}'"),
                vec![
                    "fall back to the delimiter chunker for this file".into(),
                    "check the file is not generated/minified code with pathological nesting".into(),
                ],
            ));
        }
        Ok(ast)
    }
}

#[cfg(feature = "treesitter")]
pub use treesitter_backend::parse_file;

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(feature = "treesitter")]
    use crate::error::CoreError;

    #[test]
    fn signature_extraction_stops_before_body_brace() {
        let sig = extract_signature("fn add(a: i32, b: i32) -> i32 {\n    a + b\n}", Language::Rust);
        assert_eq!(sig, "fn add(a: i32, b: i32) -> i32");
    }

    #[test]
    fn signature_extraction_stops_before_colon_for_python() {
        let sig = extract_signature("def add(a, b):\n    return a + b", Language::Python);
        assert_eq!(sig, "def add(a, b)");
    }

    #[test]
    fn signature_extraction_respects_char_boundary_cap() {
        let long_params = format!("fn f({}) {{}}", "x: i32, ".repeat(60));
        let sig = extract_signature(&long_params, Language::Rust);
        assert!(sig.len() <= MAX_SIGNATURE_CHARS);
    }

    #[test]
    fn symbol_kind_labels_are_lowercase() {
        assert_eq!(SymbolKind::Function.label(), "function");
        assert_eq!(SymbolKind::Trait.label(), "trait");
    }

    #[cfg(feature = "treesitter")]
    #[test]
    fn pathologically_nested_source_raises_ast_depth_exceeded() {
        let depth = MAX_WALK_DEPTH + 50;
        let mut source = String::new();
        for _ in 0..depth {
            source.push_str("if true {\n");
        }
        source.push_str("let x = 1;\n");
        for _ in 0..depth {
            source.push_str("}\n");
        }
        let source = format!("fn f() {{\n{source}\n}}");

        let err = parse_file("nested.rs", &source, Language::Rust).unwrap_err();
        match err {
            CoreError::Governance { kind, .. } => assert_eq!(kind, crate::error::GovernanceKind::AstDepthExceeded),
            other => panic!("expected Governance::AstDepthExceeded, got {other:?}"),
        }
    }

    #[cfg(feature = "treesitter")]
    #[test]
    fn shallow_source_parses_without_depth_error() {
        let ast = parse_file("f.rs", "fn add(a: i32, b: i32) -> i32 { a + b }", Language::Rust).unwrap();
        assert_eq!(ast.symbols.len(), 1);
    }
}
