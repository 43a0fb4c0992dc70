//! Cleanup of OCR markdown before excerpt classification.
//!
//! The layout model emits markdown with HTML islands: `<figure>` blocks,
//! comments carrying page headers/footers/numbers, and tables. Cleanup strips
//! the noise and keeps table markup plus page number markers.

use std::sync::LazyLock;

use regex::{Captures, Regex};

/// Paragraph boundary used to split and rejoin excerpts.
pub const PARAGRAPH_SEPARATOR: &str = "\n\n";

/// Default limit for [`remove_long_continuous_text`].
pub const DEFAULT_MAX_CONTINUOUS_CHARS: usize = 1000;

const MAX_CLEANUP_PASSES: usize = 8;

static FIGURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<figure\b[^>]*>.*?</figure>").expect("valid figure regex"));

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^<>]+>").expect("valid tag regex"));

static PAGE_FOOTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<!--\s*PageFooter="([^"]*)"\s*-->"#).expect("valid footer regex")
});

static PAGE_OF_PAGES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d+\s+of\s+\d+\s*$").expect("valid page-of regex"));

static KEPT_COMMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^<!--\s*(?:PageNumber|PageFooter)=").expect("valid comment regex")
});

static TABLE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^</?(?:table|thead|tbody|tfoot|tr|th|td|caption)\b").expect("valid table tag regex")
});

static IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("valid image regex"));

static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]*\]\([^)]*\)").expect("valid link regex"));

static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s|<>()\[\]]+").expect("valid url regex"));

static BLANK_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n(?:[ \t]*\n){2,}").expect("valid blank-run regex"));

static TABLE_ROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\|.*\|").expect("valid table row regex"));

fn is_kept_tag(tag: &str) -> bool {
    TABLE_TAG.is_match(tag) || KEPT_COMMENT.is_match(tag) || PAGE_OF_PAGES.is_match(&tag[1..tag.len() - 1])
}

fn clean_once(text: &str) -> String {
    let text = FIGURE.replace_all(text, "");

    let text = PAGE_FOOTER.replace_all(&text, |caps: &Captures| {
        if PAGE_OF_PAGES.is_match(&caps[1]) {
            caps[0].to_string()
        } else {
            String::new()
        }
    });

    let text = HTML_TAG.replace_all(&text, |caps: &Captures| {
        let tag = &caps[0];
        if is_kept_tag(tag) {
            tag.to_string()
        } else {
            String::new()
        }
    });

    let text = IMAGE.replace_all(&text, "");
    let text = LINK.replace_all(&text, "");
    let text = URL.replace_all(&text, "");
    let text = BLANK_RUN.replace_all(&text, PARAGRAPH_SEPARATOR);

    text.trim().to_string()
}

/// Strip figures, non-table HTML, links, images and URLs from OCR markdown.
///
/// Keeps table tags, `PageNumber` comments, and `PageFooter` comments of the
/// form `N of M`. Applying it to its own output changes nothing.
pub fn clean_markdown_text(text: &str) -> String {
    let mut current = clean_once(text);
    for _ in 1..MAX_CLEANUP_PASSES {
        let next = clean_once(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

/// Split markdown into paragraph excerpts on the blank-line boundary.
pub fn split_paragraphs(text: &str) -> Vec<&str> {
    text.split(PARAGRAPH_SEPARATOR).collect()
}

/// Rejoin excerpts with the paragraph boundary.
pub fn join_paragraphs<S: AsRef<str>>(paragraphs: &[S]) -> String {
    paragraphs
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(PARAGRAPH_SEPARATOR)
}

/// Whether a line is markdown structure (heading, list item, table row, ...)
/// rather than running prose.
pub fn is_markdown_structure(line: &str) -> bool {
    if line.trim().is_empty() {
        return false;
    }
    line.starts_with('#')
        || line.starts_with("- ")
        || line.starts_with("* ")
        || TABLE_ROW.is_match(line)
        || line.starts_with("<figure>")
        || line.starts_with("![")
        || line.starts_with("<!--")
        || line.starts_with('>')
}

/// Drop runs of prose longer than `max_chars` that sit between markdown
/// structure lines. Structure lines are always kept.
pub fn remove_long_continuous_text(text: &str, max_chars: usize) -> String {
    fn flush<'a>(buffer: &mut Vec<&'a str>, out: &mut Vec<&'a str>, max_chars: usize) {
        if buffer.join(" ").chars().count() <= max_chars {
            out.append(buffer);
        } else {
            buffer.clear();
        }
    }

    let mut kept: Vec<&str> = Vec::new();
    let mut buffer: Vec<&str> = Vec::new();

    for line in text.lines() {
        if is_markdown_structure(line) {
            flush(&mut buffer, &mut kept, max_chars);
            kept.push(line);
        } else {
            buffer.push(line.trim());
        }
    }
    flush(&mut buffer, &mut kept, max_chars);

    kept.join("\n").trim().to_string()
}
