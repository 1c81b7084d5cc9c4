//! Delimiter grammar table for embedded language fragments
//!
//! Maps a *host* language id (the language of the document that contains
//! fragments) to the pair of matchers that open and close a fragment body,
//! e.g. the C++ raw string literal `R"""( ... )"""`.
//!
//! Markdown hosts never consult this table: they always use fenced mode.

use once_cell::sync::Lazy;
use regex::Regex;

/// Language id of hosts that are scanned for fenced code blocks.
pub const MARKDOWN_LANGUAGE_ID: &str = "markdown";

/// How a host language delimits the body of an annotated fragment
#[derive(Debug)]
pub enum GrammarEntry {
    /// Fragment body sits between a begin and an end matcher
    Paired { begin: Regex, end: Regex },
    /// Host language has no fenced-literal convention; contributes no fragments
    Unpaired,
}

impl GrammarEntry {
    fn paired(begin: &str, end: &str) -> Self {
        GrammarEntry::Paired {
            begin: literal(begin),
            end: literal(end),
        }
    }

    /// Returns true if this entry can ever produce fragments
    pub fn is_paired(&self) -> bool {
        matches!(self, GrammarEntry::Paired { .. })
    }
}

/// Scanning strategy selected by the host document's language id
#[derive(Debug, Clone, Copy)]
pub enum GrammarMode {
    /// `@LANGUAGE:<tag>@` annotation followed by a delimited body
    Tagged(&'static GrammarEntry),
    /// Markdown triple-backtick fences
    Fenced,
}

impl GrammarMode {
    /// Selects the scanning mode for a host language id
    pub fn for_language(language_id: &str) -> Self {
        if language_id.eq_ignore_ascii_case(MARKDOWN_LANGUAGE_ID) {
            GrammarMode::Fenced
        } else {
            GrammarMode::Tagged(grammar_for(language_id))
        }
    }
}

// Patterns are matched literally; none of the delimiters are meant as regex syntax.
fn literal(pattern: &str) -> Regex {
    Regex::new(&regex::escape(pattern)).expect("escaped literal is always a valid regex")
}

static CPP: Lazy<GrammarEntry> = Lazy::new(|| GrammarEntry::paired("R\"\"\"(", ")\"\"\""));
static PYTHON: Lazy<GrammarEntry> = Lazy::new(|| GrammarEntry::paired("\"\"\"", "\"\"\""));
// Escaped backticks inside template literals are not recognised.
static TEMPLATE_LITERAL: Lazy<GrammarEntry> = Lazy::new(|| GrammarEntry::paired("`", "`"));
static UNPAIRED: GrammarEntry = GrammarEntry::Unpaired;

/// Looks up the delimiter grammar for a host language id
///
/// Unknown languages (and `sql`, which has no string-literal convention for
/// embedding) resolve to [`GrammarEntry::Unpaired`].
pub fn grammar_for(language_id: &str) -> &'static GrammarEntry {
    match language_id.to_ascii_lowercase().as_str() {
        "cpp" => &*CPP,
        "python" => &*PYTHON,
        "javascript" | "typescript" => &*TEMPLATE_LITERAL,
        _ => &UNPAIRED,
    }
}

/// Maps a fragment language tag (file-extension style) to the language id
/// a backend language server expects in `textDocument/didOpen`.
pub fn language_id_for_tag(tag: &str) -> &str {
    match tag {
        "py" => "python",
        "js" => "javascript",
        "ts" => "typescript",
        "md" => "markdown",
        "rs" => "rust",
        "sh" => "shellscript",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_hosts_are_paired() {
        for id in ["cpp", "python", "javascript", "typescript"] {
            assert!(grammar_for(id).is_paired(), "{} should have delimiters", id);
        }
    }

    #[test]
    fn test_sql_and_unknown_hosts_are_unpaired() {
        assert!(!grammar_for("sql").is_paired());
        assert!(!grammar_for("cobol").is_paired());
    }

    #[test]
    fn test_cpp_delimiters_match_literally() {
        let GrammarEntry::Paired { begin, end } = grammar_for("cpp") else {
            panic!("cpp must be paired");
        };
        let text = r#"auto s = R"""(SELECT 1)""";"#;
        let b = begin.find(text).unwrap();
        let e = end.find_at(text, b.end()).unwrap();
        assert_eq!(&text[b.end()..e.start()], "SELECT 1");
    }

    #[test]
    fn test_markdown_always_fenced() {
        assert!(matches!(GrammarMode::for_language("markdown"), GrammarMode::Fenced));
        assert!(matches!(GrammarMode::for_language("Markdown"), GrammarMode::Fenced));
        assert!(matches!(GrammarMode::for_language("cpp"), GrammarMode::Tagged(_)));
    }

    #[test]
    fn test_language_id_for_tag() {
        assert_eq!(language_id_for_tag("py"), "python");
        assert_eq!(language_id_for_tag("sql"), "sql");
    }
}
