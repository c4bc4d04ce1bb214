//! Delimiter pattern DSL: per-language-family nesting delimiters used by
//! the [`crate::delimiter_chunker`] when no AST grammar is available for a
//! file's language.

use std::collections::HashMap;
use std::sync::OnceLock;

/// A family of languages that share the same nesting-delimiter shape.
/// Membership here determines which delimiter pairs the Delimiter Chunker
/// scans for; it is independent from whether the Semantic Parser has an
/// AST grammar for the same extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LanguageFamily {
    CStyle,
    PythonStyle,
    MlStyle,
    LispStyle,
    MarkupStyle,
    ShellStyle,
    Functional,
    LatexStyle,
    RubyStyle,
    MatlabStyle,
}

/// One nesting-delimiter pattern: an opener/closer pair (or an
/// indentation rule for indent-based families) plus a priority used to
/// resolve overlapping candidate boundaries — higher priority wins.
#[derive(Debug, Clone)]
pub struct DelimiterPattern {
    pub family: LanguageFamily,
    pub open: &'static str,
    pub close: &'static str,
    pub priority: u8,
}

fn patterns_for(family: LanguageFamily) -> &'static [DelimiterPattern] {
    use LanguageFamily::*;
    match family {
        CStyle => &[
            DelimiterPattern { family: CStyle, open: "{", close: "}", priority: 10 },
            DelimiterPattern { family: CStyle, open: "(", close: ")", priority: 5 },
            DelimiterPattern { family: CStyle, open: "[", close: "]", priority: 5 },
        ],
        PythonStyle => &[
            // Indentation carries the structural role; parens/brackets are
            // still tracked so a chunk boundary never splits inside them.
            DelimiterPattern { family: PythonStyle, open: "(", close: ")", priority: 5 },
            DelimiterPattern { family: PythonStyle, open: "[", close: "]", priority: 5 },
            DelimiterPattern { family: PythonStyle, open: "{", close: "}", priority: 5 },
        ],
        MlStyle => &[
            DelimiterPattern { family: MlStyle, open: "begin", close: "end", priority: 10 },
            DelimiterPattern { family: MlStyle, open: "(", close: ")", priority: 5 },
            DelimiterPattern { family: MlStyle, open: "struct", close: "end", priority: 9 },
        ],
        LispStyle => &[
            DelimiterPattern { family: LispStyle, open: "(", close: ")", priority: 10 },
            DelimiterPattern { family: LispStyle, open: "[", close: "]", priority: 8 },
        ],
        MarkupStyle => &[
            DelimiterPattern { family: MarkupStyle, open: "<", close: ">", priority: 10 },
        ],
        ShellStyle => &[
            DelimiterPattern { family: ShellStyle, open: "do", close: "done", priority: 10 },
            DelimiterPattern { family: ShellStyle, open: "then", close: "fi", priority: 10 },
            DelimiterPattern { family: ShellStyle, open: "{", close: "}", priority: 6 },
        ],
        Functional => &[
            DelimiterPattern { family: Functional, open: "(", close: ")", priority: 10 },
            DelimiterPattern { family: Functional, open: "[", close: "]", priority: 7 },
            DelimiterPattern { family: Functional, open: "{", close: "}", priority: 7 },
        ],
        LatexStyle => &[
            DelimiterPattern { family: LatexStyle, open: "\\begin", close: "\\end", priority: 10 },
            DelimiterPattern { family: LatexStyle, open: "{", close: "}", priority: 4 },
        ],
        RubyStyle => &[
            DelimiterPattern { family: RubyStyle, open: "do", close: "end", priority: 10 },
            DelimiterPattern { family: RubyStyle, open: "def", close: "end", priority: 10 },
            DelimiterPattern { family: RubyStyle, open: "{", close: "}", priority: 6 },
        ],
        MatlabStyle => &[
            DelimiterPattern { family: MatlabStyle, open: "function", close: "end", priority: 10 },
            DelimiterPattern { family: MatlabStyle, open: "if", close: "end", priority: 9 },
            DelimiterPattern { family: MatlabStyle, open: "for", close: "end", priority: 9 },
        ],
    }
}

fn extension_table() -> &'static HashMap<&'static str, LanguageFamily> {
    static TABLE: OnceLock<HashMap<&'static str, LanguageFamily>> = OnceLock::new();
    TABLE.get_or_init(|| {
        use LanguageFamily::*;
        let mut m = HashMap::new();
        let c_style = [
            "c", "h", "cc", "cpp", "cxx", "hpp", "hh", "java", "js", "mjs", "cjs", "jsx", "ts",
            "tsx", "go", "rs", "cs", "swift", "kt", "kts", "scala", "dart", "php", "proto",
            "css", "scss", "less", "json", "jsonc", "sol", "zig", "d", "groovy", "vala",
        ];
        for ext in c_style {
            m.insert(ext, CStyle);
        }
        let python_style = ["py", "pyi", "pyw", "coffee"];
        for ext in python_style {
            m.insert(ext, PythonStyle);
        }
        let ml_style = ["ml", "mli", "fs", "fsi", "fsx", "pas", "pp", "ada", "adb", "ads"];
        for ext in ml_style {
            m.insert(ext, MlStyle);
        }
        let lisp_style = ["lisp", "cl", "el", "clj", "cljs", "cljc", "scm", "rkt", "edn"];
        for ext in lisp_style {
            m.insert(ext, LispStyle);
        }
        let markup_style = ["html", "htm", "xml", "xhtml", "svg", "vue", "svelte", "jsp", "ejs"];
        for ext in markup_style {
            m.insert(ext, MarkupStyle);
        }
        let shell_style = ["sh", "bash", "zsh", "fish", "ps1", "psm1", "bat", "cmd"];
        for ext in shell_style {
            m.insert(ext, ShellStyle);
        }
        let functional = ["hs", "lhs", "ex", "exs", "erl", "hrl", "elm", "purs", "idr"];
        for ext in functional {
            m.insert(ext, Functional);
        }
        let latex_style = ["tex", "sty", "cls", "bib"];
        for ext in latex_style {
            m.insert(ext, LatexStyle);
        }
        let ruby_style = ["rb", "rake", "gemspec", "erb"];
        for ext in ruby_style {
            m.insert(ext, RubyStyle);
        }
        let matlab_style = ["m", "mat"];
        for ext in matlab_style {
            m.insert(ext, MatlabStyle);
        }
        m
    })
}

/// Classifies a file extension into a language family using the dense
/// lookup table first, then a small set of content-free heuristics for
/// anything the table doesn't name (YAML/TOML/ini-style configs and any
/// unrecognized extension default to `CStyle`'s brace tracking, since
/// brace/bracket-balanced scanning degrades gracefully even on files with
/// no braces at all — it simply finds no inner boundaries and the whole
/// file becomes one chunk).
pub fn classify_extension(ext: &str) -> LanguageFamily {
    let ext = ext.trim_start_matches('.').to_ascii_lowercase();
    if let Some(family) = extension_table().get(ext.as_str()) {
        return *family;
    }
    match ext.as_str() {
        "yaml" | "yml" | "toml" | "ini" | "cfg" | "conf" => LanguageFamily::PythonStyle,
        _ => LanguageFamily::CStyle,
    }
}

/// Returns the ordered, priority-ranked delimiter patterns for a family.
pub fn patterns(family: LanguageFamily) -> &'static [DelimiterPattern] {
    patterns_for(family)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extensions_map_to_expected_families() {
        assert_eq!(classify_extension("rs"), LanguageFamily::CStyle);
        assert_eq!(classify_extension("py"), LanguageFamily::PythonStyle);
        assert_eq!(classify_extension("rb"), LanguageFamily::RubyStyle);
        assert_eq!(classify_extension("tex"), LanguageFamily::LatexStyle);
        assert_eq!(classify_extension(".M"), LanguageFamily::MatlabStyle);
    }

    #[test]
    fn unknown_extension_falls_back_to_c_style() {
        assert_eq!(classify_extension("xyz123"), LanguageFamily::CStyle);
    }

    #[test]
    fn patterns_are_priority_ordered_for_lookup() {
        let pats = patterns(LanguageFamily::CStyle);
        let max_priority = pats.iter().map(|p| p.priority).max().unwrap();
        assert_eq!(max_priority, 10);
    }
}
