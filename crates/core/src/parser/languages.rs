//! Extension -> tree-sitter grammar table and per-grammar node-kind
//! classification rules for the Semantic Parser.

/// A language the Semantic Parser can build an AST for. Distinct from
/// [`crate::delimiters::LanguageFamily`]: this enum only has a variant for
/// languages with a wired tree-sitter grammar, while the delimiter family
/// table covers every language as a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Rust,
    TypeScript,
    Tsx,
    JavaScript,
    Python,
    Go,
    C,
    Cpp,
    Java,
    Ruby,
    Php,
    CSharp,
    Bash,
    Html,
    Css,
    Json,
    Yaml,
}

/// Resolves a file extension to a wired grammar, or `None` if the
/// Semantic Parser has no grammar for it — the caller falls back to the
/// Delimiter Chunker in that case.
pub fn language_for_ext(ext: &str) -> Option<Language> {
    let ext = ext.trim_start_matches('.').to_ascii_lowercase();
    Some(match ext.as_str() {
        "rs" => Language::Rust,
        "ts" | "mts" | "cts" => Language::TypeScript,
        "tsx" => Language::Tsx,
        "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
        "py" | "pyi" => Language::Python,
        "go" => Language::Go,
        "c" | "h" => Language::C,
        "cc" | "cpp" | "cxx" | "hpp" | "hh" | "hxx" => Language::Cpp,
        "java" => Language::Java,
        "rb" | "rake" | "gemspec" => Language::Ruby,
        "php" => Language::Php,
        "cs" => Language::CSharp,
        "sh" | "bash" => Language::Bash,
        "html" | "htm" => Language::Html,
        "css" => Language::Css,
        "json" | "jsonc" => Language::Json,
        "yaml" | "yml" => Language::Yaml,
        _ => return None,
    })
}

#[cfg(feature = "treesitter")]
pub fn grammar_for(lang: Language) -> tree_sitter::Language {
    match lang {
        Language::Rust => tree_sitter_rust::LANGUAGE.into(),
        Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        Language::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
        Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        Language::Python => tree_sitter_python::LANGUAGE.into(),
        Language::Go => tree_sitter_go::LANGUAGE.into(),
        Language::C => tree_sitter_c::LANGUAGE.into(),
        Language::Cpp => tree_sitter_cpp::LANGUAGE.into(),
        Language::Java => tree_sitter_java::LANGUAGE.into(),
        Language::Ruby => tree_sitter_ruby::LANGUAGE.into(),
        Language::Php => tree_sitter_php::LANGUAGE_PHP.into(),
        Language::CSharp => tree_sitter_c_sharp::LANGUAGE.into(),
        Language::Bash => tree_sitter_bash::LANGUAGE.into(),
        Language::Html => tree_sitter_html::LANGUAGE.into(),
        Language::Css => tree_sitter_css::LANGUAGE.into(),
        Language::Json => tree_sitter_json::LANGUAGE.into(),
        Language::Yaml => tree_sitter_yaml::LANGUAGE.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_common_extensions() {
        assert_eq!(language_for_ext("rs"), Some(Language::Rust));
        assert_eq!(language_for_ext("TSX"), Some(Language::Tsx));
        assert_eq!(language_for_ext(".py"), Some(Language::Python));
    }

    #[test]
    fn unwired_extension_returns_none() {
        assert_eq!(language_for_ext("hs"), None);
        assert_eq!(language_for_ext("lisp"), None);
    }
}
