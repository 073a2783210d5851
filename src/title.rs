//! Title normalization shared by every index, set and output in the crate.
//!
//! Titles arrive from three places (the `page` dump, link-target rows and the
//! XML export) and are spelled differently in each: spaces vs underscores,
//! full-width vs half-width characters. Everything is funnelled through
//! [`normalize_title`] before it is used as a key.

use unicode_normalization::UnicodeNormalization;

/// NFKC, collapse whitespace runs (including U+3000) to one `_`, trim `_`.
pub fn normalize_title(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;

    for c in raw.nfkc() {
        if c.is_whitespace() || c == '\u{3000}' {
            pending_sep = true;
            continue;
        }
        if pending_sep && !out.is_empty() {
            out.push('_');
        }
        pending_sep = false;
        out.push(c);
    }

    out.trim_matches('_').to_string()
}

/// Comparison key that survives corrupted link-target titles: NFKC, no
/// control/format characters, no whitespace or underscores at all.
pub fn canonical_title(raw: &str) -> String {
    raw.nfkc()
        .filter(|&c| !(c.is_whitespace() || c == '_' || c == '\u{3000}'))
        .filter(|&c| !is_invisible(c))
        .collect()
}

/// Title as shown to people: underscores become spaces.
pub fn display_title(title: &str) -> String {
    title.replace('_', " ")
}

/// Control (Cc) and the format (Cf) characters that show up in dumps.
pub(crate) fn is_invisible(c: char) -> bool {
    c.is_control()
        || matches!(
            c,
            '\u{00AD}'
                | '\u{061C}'
                | '\u{180E}'
                | '\u{200B}'..='\u{200F}'
                | '\u{202A}'..='\u{202E}'
                | '\u{2060}'..='\u{2064}'
                | '\u{2066}'..='\u{206F}'
                | '\u{FEFF}'
                | '\u{FFF9}'..='\u{FFFB}'
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_both_widths_of_space() {
        assert_eq!(normalize_title("Foo  Bar"), "Foo_Bar");
        assert_eq!(normalize_title("Foo\u{3000}Bar"), "Foo_Bar");
        assert_eq!(normalize_title("Foo Bar"), normalize_title("Foo\u{3000}Bar"));
    }

    #[test]
    fn test_normalize_is_stable() {
        for raw in ["  ＡＢＣ  の 登場人物 ", "_x_", "虎杖 悠仁", "a__b", ""] {
            let once = normalize_title(raw);
            assert_eq!(normalize_title(&once), once, "unstable for {:?}", raw);
        }
    }

    #[test]
    fn test_normalize_applies_nfkc_and_trims_underscores() {
        assert_eq!(normalize_title("ＡＢＣ"), "ABC");
        assert_eq!(normalize_title("__Title__"), "Title");
        assert_eq!(normalize_title(" \t "), "");
    }

    #[test]
    fn test_canonical_ignores_separators_and_invisibles() {
        assert_eq!(canonical_title("架空の人物"), "架空の人物");
        assert_eq!(canonical_title("架空_の\u{200B}人物"), "架空の人物");
        assert_eq!(canonical_title(" 架空　の 人物 "), "架空の人物");
    }

    #[test]
    fn test_display_title() {
        assert_eq!(display_title("ONE_PIECE"), "ONE PIECE");
    }
}
