//! Description cleanup - strips markup and shortens to a display length
//!
//! Catalog descriptions arrive as HTML fragments of wildly varying length.
//! They are flattened to plain text and cut at a word boundary so the
//! result never exceeds the display limit.

use scraper::Html;

/// Display limit for cleaned descriptions, in characters.
pub const MAX_DESCRIPTION_LEN: usize = 300;

const ELLIPSIS: &str = "...";

/// Strip all markup from `raw`, collapse whitespace, and truncate to at
/// most `max_len` characters, breaking only between words and appending
/// `...` when anything was cut. Already-clean text that fits comes back
/// unchanged, so the function is idempotent.
pub fn clean_description(raw: &str, max_len: usize) -> String {
    let text = strip_markup(raw);
    let words: Vec<&str> = text.split_whitespace().collect();
    let plain = words.join(" ");

    if plain.chars().count() <= max_len {
        return plain;
    }

    shorten(&words, max_len)
}

/// `clean_description` with the default display limit.
pub fn clean_default(raw: &str) -> String {
    clean_description(raw, MAX_DESCRIPTION_LEN)
}

fn strip_markup(raw: &str) -> String {
    Html::parse_fragment(raw).root_element().text().collect()
}

/// Keep whole words while the joined text plus the ellipsis still fits.
fn shorten(words: &[&str], max_len: usize) -> String {
    let limit = max_len.saturating_sub(ELLIPSIS.chars().count());
    let mut kept = String::new();
    let mut kept_chars = 0;

    for word in words {
        let word_chars = word.chars().count();
        // one separating space before every word after the first
        let needed = if kept.is_empty() { word_chars } else { word_chars + 1 };
        if kept_chars + needed > limit {
            break;
        }
        if !kept.is_empty() {
            kept.push(' ');
        }
        kept.push_str(word);
        kept_chars += needed;
    }

    if kept.is_empty() {
        return ELLIPSIS.to_string();
    }

    kept.push_str(ELLIPSIS);
    kept
}
