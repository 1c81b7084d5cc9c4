//! Fragment scanner for embedded language regions
//!
//! Finds fragments in a host document in one of two ways:
//!
//! - **Tagged mode**: an annotation such as `// @LANGUAGE: sql@` followed by a
//!   body delimited according to the host language's grammar entry
//!   (e.g. `R"""( ... )"""` in C++).
//! - **Fenced mode**: Markdown code blocks opened by a line starting with
//!   three backticks and a language tag.
//!
//! Scanning is a pure function over the host text. The search position is an
//! explicit [`ScanCursor`] value threaded from one step to the next, so scans
//! of different documents share no matcher state.
//!
//! An unterminated tag, fence or begin delimiter ends the scan: everything
//! found before it is returned and nothing is reported as an error.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::{Captures, Match, Regex};
use tracing::{debug, trace};

use super::grammar::{GrammarEntry, GrammarMode};
use super::virtual_uri::is_valid_language_tag;

static INJECTION_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@LANGUAGE:([^@]*)@").expect("injection tag pattern"));
static FENCE_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^```([^\n]+)\n").expect("opening fence pattern"));
static FENCE_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```").expect("closing fence pattern"));

/// One contiguous embedded-language region of a host document
///
/// `start..end` is a half-open byte range into the host text the fragment
/// was scanned from, with the delimiters themselves excluded.
#[derive(Debug, Clone)]
pub struct Fragment {
    /// File-extension style language tag (e.g. "sql", "py")
    pub language_tag: String,
    /// Start byte offset in the host document (inclusive)
    pub start: usize,
    /// End byte offset in the host document (exclusive)
    pub end: usize,
    /// Text of the fragment at the time of the last scan
    pub content: String,
    /// Creation time in milliseconds since the Unix epoch
    pub created_at: i64,
    /// Last modification time in milliseconds since the Unix epoch
    pub modified_at: i64,
}

impl Fragment {
    fn new(host_text: &str, language_tag: &str, start: usize, end: usize, now: i64) -> Self {
        Fragment {
            language_tag: language_tag.to_string(),
            start,
            end,
            content: host_text[start..end].to_string(),
            created_at: now,
            modified_at: now,
        }
    }

    /// Length of the fragment body in bytes
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Boundary-inclusive containment check against `[start, end]`
    pub fn contains_offset(&self, offset: usize) -> bool {
        self.start <= offset && offset <= self.end
    }
}

// Timestamps are file metadata only; two scans of the same text are equal.
impl PartialEq for Fragment {
    fn eq(&self, other: &Self) -> bool {
        self.language_tag == other.language_tag
            && self.start == other.start
            && self.end == other.end
            && self.content == other.content
    }
}

impl Eq for Fragment {}

/// Position from which the next match is searched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanCursor(usize);

impl ScanCursor {
    pub fn at(offset: usize) -> Self {
        ScanCursor(offset)
    }

    pub fn offset(self) -> usize {
        self.0
    }

    fn find<'t>(self, pattern: &Regex, text: &'t str) -> Option<Match<'t>> {
        if self.0 > text.len() {
            return None;
        }
        pattern.find_at(text, self.0)
    }

    fn captures<'t>(self, pattern: &Regex, text: &'t str) -> Option<Captures<'t>> {
        if self.0 > text.len() {
            return None;
        }
        pattern.captures_at(text, self.0)
    }
}

/// Outcome of one scanning step
#[derive(Debug)]
struct Step<'t> {
    /// Language tag and byte range of the body, if the annotation was usable
    region: Option<(&'t str, usize, usize)>,
    /// Where the following step starts searching
    resume: ScanCursor,
}

/// Scans host text for fragments using the given grammar mode
///
/// The result is ordered by ascending offset and never overlaps.
pub fn scan(text: &str, mode: GrammarMode) -> Vec<Fragment> {
    let now = Utc::now().timestamp_millis();
    let fragments = match mode {
        GrammarMode::Tagged(entry) => scan_tagged(text, entry, now),
        GrammarMode::Fenced => scan_fenced(text, now),
    };
    debug!(
        "Scanned {} bytes in {} mode: {} fragments",
        text.len(),
        match mode {
            GrammarMode::Tagged(_) => "tagged",
            GrammarMode::Fenced => "fenced",
        },
        fragments.len()
    );
    fragments
}

fn scan_tagged(text: &str, entry: &GrammarEntry, now: i64) -> Vec<Fragment> {
    let GrammarEntry::Paired { begin, end } = entry else {
        trace!("Host grammar has no paired delimiters, skipping tagged scan");
        return Vec::new();
    };
    collect(text, now, |cursor| tagged_step(text, begin, end, cursor))
}

fn scan_fenced(text: &str, now: i64) -> Vec<Fragment> {
    collect(text, now, |cursor| fenced_step(text, cursor))
}

fn collect<'t>(
    text: &'t str,
    now: i64,
    mut step: impl FnMut(ScanCursor) -> Option<Step<'t>>,
) -> Vec<Fragment> {
    let mut fragments = Vec::new();
    let mut cursor = ScanCursor::default();
    while let Some(Step { region, resume }) = step(cursor) {
        if let Some((tag, start, end)) = region {
            trace!("Found {} fragment at {}..{}", tag, start, end);
            fragments.push(Fragment::new(text, tag, start, end, now));
        }
        trace!("Resuming scan at byte {}", resume.offset());
        cursor = resume;
    }
    fragments
}

/// `@LANGUAGE:<tag>@`, then the begin delimiter, then the end delimiter
fn tagged_step<'t>(text: &'t str, begin: &Regex, end: &Regex, cursor: ScanCursor) -> Option<Step<'t>> {
    let tag = cursor.captures(&INJECTION_TAG, text)?;
    let annotation = tag.get(0)?;

    let Some(open) = ScanCursor::at(annotation.end()).find(begin, text) else {
        trace!("Tag at {} has no begin delimiter", annotation.start());
        return None;
    };
    let Some(close) = ScanCursor::at(open.end()).find(end, text) else {
        trace!("Begin delimiter at {} is never closed", open.start());
        return None;
    };

    let language = tag.get(1).map_or("", |m| m.as_str().trim());
    Some(Step {
        region: usable(language).map(|tag| (tag, open.end(), close.start())),
        // The end delimiter may itself precede the next annotation.
        resume: ScanCursor::at(close.start()),
    })
}

/// ```` ```<tag> ```` at the start of a line, then the closing ```` ``` ````
fn fenced_step(text: &str, cursor: ScanCursor) -> Option<Step<'_>> {
    let open = cursor.captures(&FENCE_OPEN, text)?;
    let fence = open.get(0)?;

    let Some(close) = ScanCursor::at(fence.end()).find(&FENCE_CLOSE, text) else {
        trace!("Fence at {} is never closed", fence.start());
        return None;
    };

    let info = open.get(1).map_or("", |m| m.as_str());
    let language = info.split_whitespace().next().unwrap_or_default();
    Some(Step {
        region: usable(language).map(|tag| (tag, fence.end(), close.start())),
        resume: ScanCursor::at(close.end()),
    })
}

fn usable(tag: &str) -> Option<&str> {
    if is_valid_language_tag(tag) {
        Some(tag)
    } else {
        trace!("Ignoring fragment with unusable language tag {:?}", tag);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language_regions::grammar::grammar_for;
    use indoc::indoc;
    use quickcheck::QuickCheck;

    fn tagged(text: &str, host: &str) -> Vec<Fragment> {
        scan(text, GrammarMode::Tagged(grammar_for(host)))
    }

    #[test]
    fn test_cpp_raw_string() {
        let text = "// @LANGUAGE: sql@\nauto s = R\"\"\"(SELECT 1)\"\"\"";
        let fragments = tagged(text, "cpp");

        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].language_tag, "sql");
        assert_eq!(fragments[0].content, "SELECT 1");
        assert_eq!(&text[fragments[0].start..fragments[0].end], "SELECT 1");
    }

    #[test]
    fn test_python_triple_quotes() {
        let text = indoc! {r#"
            # @LANGUAGE:sql@
            q = """SELECT *
            FROM t"""
            # @LANGUAGE:sql@
            r = """DELETE FROM t"""
        "#};
        let fragments = tagged(text, "python");

        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].content, "SELECT *\nFROM t");
        assert_eq!(fragments[1].content, "DELETE FROM t");
    }

    #[test]
    fn test_javascript_template_literal() {
        let text = "const q = /* @LANGUAGE:sql@ */ `SELECT 1`;";
        let fragments = tagged(text, "javascript");

        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].content, "SELECT 1");
    }

    #[test]
    fn test_unpaired_host_yields_nothing() {
        let text = "-- @LANGUAGE:py@\n\"\"\"print(1)\"\"\"";
        assert!(tagged(text, "sql").is_empty());
    }

    #[test]
    fn test_missing_begin_delimiter_returns_earlier_fragments() {
        let text = "// @LANGUAGE:sql@\nR\"\"\"(A)\"\"\"\n// @LANGUAGE:sql@\nnothing here";
        let fragments = tagged(text, "cpp");

        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].content, "A");
    }

    #[test]
    fn test_unterminated_begin_delimiter() {
        let text = "// @LANGUAGE: sql@\nauto s = R\"\"\"(SELECT 1";
        assert!(tagged(text, "cpp").is_empty());
    }

    #[test]
    fn test_invalid_tag_is_skipped_but_consumed() {
        let text = "// @LANGUAGE:@\nR\"\"\"(A)\"\"\"\n// @LANGUAGE:py@\nR\"\"\"(B)\"\"\"";
        let fragments = tagged(text, "cpp");

        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].language_tag, "py");
        assert_eq!(fragments[0].content, "B");
    }

    #[test]
    fn test_markdown_fence() {
        let text = "before\n```python\nprint(1)\n```\nafter";
        let fragments = scan(text, GrammarMode::Fenced);

        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].language_tag, "python");
        assert_eq!(fragments[0].content, "print(1)\n");
    }

    #[test]
    fn test_markdown_multiple_fences_and_info_string() {
        let text = indoc! {"
            # Title

            ```sql title=\"query\"
            SELECT 1;
            ```

            text

            ```js
            let x = 1;
            ```
        "};
        let fragments = scan(text, GrammarMode::Fenced);

        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].language_tag, "sql");
        assert_eq!(fragments[0].content, "SELECT 1;\n");
        assert_eq!(fragments[1].language_tag, "js");
        assert_eq!(fragments[1].content, "let x = 1;\n");
    }

    #[test]
    fn test_markdown_fence_must_open_a_line() {
        let text = "inline ```sql\nSELECT 1\n```";
        assert!(scan(text, GrammarMode::Fenced).is_empty());
    }

    #[test]
    fn test_markdown_unterminated_fence() {
        let text = "```python\nprint(1)\n";
        assert!(scan(text, GrammarMode::Fenced).is_empty());
    }

    #[test]
    fn test_scan_is_idempotent() {
        let text = "// @LANGUAGE:sql@\nR\"\"\"(A)\"\"\" // @LANGUAGE:py@\nR\"\"\"(B)\"\"\"";
        assert_eq!(tagged(text, "cpp"), tagged(text, "cpp"));
    }

    const HOST_MODES: [&str; 4] = ["cpp", "python", "javascript", "markdown"];

    /// Pieces that open, close or break fragments in some host language
    const PIECES: [&str; 14] = [
        "// @LANGUAGE:sql@\n",
        "# @LANGUAGE: py@",
        "@LANGUAGE:@",
        "@",
        "R\"\"\"(",
        ")\"\"\"",
        "\"\"\"",
        "`",
        "```sql\n",
        "```\n",
        "\n",
        "é",
        "x",
        " ",
    ];

    fn well_formed(text: &str, fragments: &[Fragment]) -> bool {
        fragments
            .iter()
            .all(|f| f.start <= f.end && text.get(f.start..f.end) == Some(f.content.as_str()))
            && fragments
                .windows(2)
                .all(|pair| pair[0].start < pair[1].start && pair[0].end <= pair[1].start)
    }

    fn scans_well_formed(text: &str) -> bool {
        HOST_MODES.iter().all(|host| {
            let mode = GrammarMode::for_language(host);
            let first = scan(text, mode);
            well_formed(text, &first) && first == scan(text, mode)
        })
    }

    #[test]
    fn test_arbitrary_text_scans_ordered_and_stable() {
        fn prop(text: String) -> bool {
            scans_well_formed(&text)
        }
        QuickCheck::new().tests(500).quickcheck(prop as fn(String) -> bool);
    }

    #[test]
    fn test_delimiter_soup_scans_ordered_and_stable() {
        fn prop(picks: Vec<u8>, filler: String) -> bool {
            let mut text = String::new();
            for (i, pick) in picks.iter().enumerate() {
                text.push_str(PIECES[*pick as usize % PIECES.len()]);
                if i % 7 == 3 {
                    text.push_str(&filler);
                }
            }
            scans_well_formed(&text)
        }
        QuickCheck::new().tests(500).quickcheck(prop as fn(Vec<u8>, String) -> bool);
    }

    #[test]
    fn test_cursor_past_end_finds_nothing() {
        assert!(ScanCursor::at(10).find(&FENCE_CLOSE, "```").is_none());
    }
}
