//! Line-level wikitext cleanup for candidate names.
//!
//! [`clean`] runs an ordered table of [`Pass`]es. Each pass handles one
//! template or markup convention and is a pure `&str -> String` function.
//! Template passes find `{{ ... }}` spans with an explicit depth counter and
//! rewrite them according to the template's meaning (delete, keep the first,
//! second or last parameter, keep the whole content, ...).
//!
//! Every pass only removes text, so repeating a pass (to peel self-nested
//! templates) and repeating the whole pipeline (to reach a fixed point)
//! both terminate, and the fixed point makes [`clean`] idempotent.

use memchr::memmem;
use once_cell::sync::Lazy;
use regex::Regex;

static LANG_SPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<span\s+lang="[^"]*"\s*>[^<]*</span\s*>"#).unwrap());

static IMAGE_BORDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"border\|\d+x\d+px\s*").unwrap());

static IMAGE_PIXELS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^.*?\d+[x×]?\d*ピクセル").unwrap());

static EMPTY_PARENS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[（(]\s*[）)]").unwrap());

/// How a template name is recognised. Names are compared after trimming and
/// turning underscores into spaces.
#[derive(Debug, Clone, Copy)]
pub enum Name {
    Exact(&'static str),
    /// ASCII case-insensitive
    Caseless(&'static str),
    /// `ef`, `efn`, `efn2`, ...
    Footnote,
    /// `lang-xx`, `lang-xx-yy`
    LangCode,
    /// Any `…フォント` font wrapper
    FontFamily,
    /// `#tag:…` parser function
    ParserTag,
}

impl Name {
    fn matches(&self, name: &str) -> bool {
        match *self {
            Name::Exact(n) => name == n,
            Name::Caseless(n) => name.eq_ignore_ascii_case(n),
            Name::Footnote => {
                let lower = name.to_ascii_lowercase();
                lower.strip_prefix("ef").is_some_and(|rest| {
                    let rest = rest.strip_prefix('n').unwrap_or(rest);
                    rest.bytes().all(|b| b.is_ascii_digit())
                })
            }
            Name::LangCode => {
                let lower = name.to_ascii_lowercase();
                lower.strip_prefix("lang-").is_some_and(|code| {
                    !code.is_empty() && code.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
                })
            }
            Name::FontFamily => name.ends_with("フォント"),
            Name::ParserTag => {
                let lower = name.to_ascii_lowercase();
                lower == "#tag" || lower.starts_with("#tag:")
            }
        }
    }
}

/// What replaces a matched template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rewrite {
    Delete,
    FirstParam,
    SecondParam,
    LastParam,
    /// Everything after the name, pipes included.
    Content,
    /// `label=` when present, else the first parameter.
    Label,
    /// `{{要出典|=text}}` keeps `text`; anything else is deleted.
    InlineText,
}

#[derive(Debug, Clone, Copy)]
pub struct TemplateRule {
    pub names: &'static [Name],
    pub rewrite: Rewrite,
}

impl TemplateRule {
    fn accepts(&self, name: &str) -> bool {
        self.names.iter().any(|n| n.matches(name))
    }
}

/// One cleanup convention.
#[derive(Debug, Clone, Copy)]
pub enum Pass {
    Template(&'static str, TemplateRule),
    WikiLinks,
    ExternalLinks,
    Bold,
    RefTags,
    HtmlComments,
    LangSpans,
    Spans,
    CastCredits,
    ReadingGloss,
    LatinGloss,
    ForeignGloss,
    ImageResidue,
    EmptyParens,
}

const fn template(label: &'static str, names: &'static [Name], rewrite: Rewrite) -> Pass {
    Pass::Template(label, TemplateRule { names, rewrite })
}

static PIPELINE: &[Pass] = &[
    template("efn", &[Name::Footnote], Rewrite::Delete),
    template("sfn", &[Name::Caseless("sfn")], Rewrite::Delete),
    template("refnest", &[Name::Caseless("refnest")], Rewrite::Delete),
    template("仮リンク", &[Name::Exact("仮リンク")], Rewrite::FirstParam),
    Pass::WikiLinks,
    Pass::ExternalLinks,
    template(
        "reading",
        &[
            Name::Exact("読み仮名"),
            Name::Exact("読み仮名 ruby不使用"),
            Name::Caseless("ruby"),
            Name::Caseless("vanc"),
        ],
        Rewrite::FirstParam,
    ),
    template("要出典", &[Name::Exact("要出典")], Rewrite::InlineText),
    template("要出典範囲", &[Name::Exact("要出典範囲")], Rewrite::Delete),
    template("lang-en-short", &[Name::Caseless("lang-en-short")], Rewrite::FirstParam),
    template("lang-xx", &[Name::LangCode], Rewrite::Delete),
    template(
        "lang",
        &[Name::Caseless("lang"), Name::Caseless("llang")],
        Rewrite::SecondParam,
    ),
    template(
        "markers",
        &[Name::Caseless("en"), Name::Caseless("r"), Name::Caseless("nobold")],
        Rewrite::Delete,
    ),
    template(
        "anchors-bare",
        &[
            Name::Exact("SYC"),
            Name::Exact("KIA"),
            Name::Exact("Full"),
            Name::Exact("Vanchor"),
        ],
        Rewrite::Delete,
    ),
    Pass::Bold,
    template(
        "small",
        &[Name::Caseless("small"), Name::Exact("軌跡人物")],
        Rewrite::Content,
    ),
    template("flagicon", &[Name::Caseless("flagicon")], Rewrite::Delete),
    template(
        "styling",
        &[
            Name::Exact("読み"),
            Name::Caseless("color"),
            Name::Caseless("font color"),
            Name::Caseless("weight"),
            Name::Caseless("fontsize"),
        ],
        Rewrite::LastParam,
    ),
    template("abbr", &[Name::Caseless("abbr")], Rewrite::FirstParam),
    template("補助漢字フォント", &[Name::Exact("補助漢字フォント")], Rewrite::Delete),
    template("font", &[Name::FontFamily], Rewrite::FirstParam),
    template(
        "invisible",
        &[Name::ParserTag, Name::Caseless("enlink"), Name::Caseless("anchors")],
        Rewrite::Delete,
    ),
    template("ill2", &[Name::Caseless("ill2")], Rewrite::Label),
    template("visible anchor", &[Name::Caseless("visible anchor")], Rewrite::LastParam),
    Pass::RefTags,
    Pass::HtmlComments,
    Pass::LangSpans,
    Pass::Spans,
    Pass::CastCredits,
    Pass::ReadingGloss,
    Pass::LatinGloss,
    Pass::ForeignGloss,
    Pass::ImageResidue,
    Pass::EmptyParens,
];

/// The ordered pass table used by [`clean`].
pub fn pipeline() -> &'static [Pass] {
    PIPELINE
}

/// Runs the pipeline until the text stops changing.
pub fn clean(text: &str) -> String {
    let mut current = text.trim().to_string();
    loop {
        let next = PIPELINE
            .iter()
            .fold(current.clone(), |acc, pass| pass.apply(&acc));
        let next = next.trim();
        if next == current {
            return current;
        }
        current = next.to_string();
    }
}

impl Pass {
    pub fn label(&self) -> &'static str {
        match self {
            Pass::Template(label, _) => *label,
            Pass::WikiLinks => "wikilinks",
            Pass::ExternalLinks => "external links",
            Pass::Bold => "bold",
            Pass::RefTags => "ref",
            Pass::HtmlComments => "comments",
            Pass::LangSpans => "span lang",
            Pass::Spans => "span",
            Pass::CastCredits => "cast credits",
            Pass::ReadingGloss => "reading gloss",
            Pass::LatinGloss => "latin gloss",
            Pass::ForeignGloss => "foreign gloss",
            Pass::ImageResidue => "image residue",
            Pass::EmptyParens => "empty parens",
        }
    }

    pub fn apply(&self, s: &str) -> String {
        match self {
            Pass::Template(_, rule) => rewrite_templates(s, rule),
            Pass::WikiLinks => unwrap_wikilinks(s),
            Pass::ExternalLinks => unwrap_external_links(s),
            Pass::Bold => s.replace("'''", ""),
            Pass::RefTags => strip_ref_tags(s),
            Pass::HtmlComments => strip_delimited(s, "<!--", "-->"),
            Pass::LangSpans => LANG_SPAN.replace_all(s, "").into_owned(),
            Pass::Spans => repeat_until_stable(s, unwrap_spans_once),
            Pass::CastCredits => strip_cast_credits(s),
            Pass::ReadingGloss => strip_reading_gloss(s),
            Pass::LatinGloss => strip_trailing_paren(s, |inner, _| {
                inner
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c.is_whitespace() || matches!(c, '-' | '.' | '\''))
            }),
            Pass::ForeignGloss => strip_trailing_paren(s, |inner, full_width| {
                full_width && !inner.chars().any(is_japanese)
            }),
            Pass::ImageResidue => {
                let s = IMAGE_BORDER.replace_all(s, "");
                IMAGE_PIXELS.replace(&s, "").into_owned()
            }
            Pass::EmptyParens => EMPTY_PARENS.replace_all(s, "").into_owned(),
        }
    }
}

fn repeat_until_stable(s: &str, once: fn(&str) -> Option<String>) -> String {
    let mut current = s.to_string();
    while let Some(next) = once(&current) {
        current = next;
    }
    current
}

/// Byte offset of the `}}` that closes the `{{` at `open`.
pub fn find_matching_close(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (b'{', b'{') => {
                depth += 1;
                i += 2;
            }
            (b'}', b'}') => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
                i += 2;
            }
            _ => i += 1,
        }
    }
    None
}

/// Splits on `|` outside nested `{{ }}` and `[[ ]]`.
pub fn split_params(inner: &str) -> Vec<&str> {
    let bytes = inner.as_bytes();
    let mut parts = Vec::new();
    let mut braces = 0i32;
    let mut brackets = 0i32;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let pair = bytes.get(i + 1).map(|&next| (bytes[i], next));
        match pair {
            Some((b'{', b'{')) => {
                braces += 1;
                i += 2;
                continue;
            }
            Some((b'}', b'}')) => {
                braces -= 1;
                i += 2;
                continue;
            }
            Some((b'[', b'[')) => {
                brackets += 1;
                i += 2;
                continue;
            }
            Some((b']', b']')) => {
                brackets -= 1;
                i += 2;
                continue;
            }
            _ => {}
        }
        if bytes[i] == b'|' && braces <= 0 && brackets <= 0 {
            parts.push(&inner[start..i]);
            start = i + 1;
        }
        i += 1;
    }
    parts.push(&inner[start..]);
    parts
}

fn template_name(raw: &str) -> String {
    raw.split(|c: char| c.is_whitespace() || c == '_')
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// `key=value` with an ASCII key.
fn named_param(param: &str) -> Option<(&str, &str)> {
    let (key, value) = param.split_once('=')?;
    let key = key.trim();
    let is_key = !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b' ' | b'_' | b'-'));
    is_key.then_some((key, value))
}

impl Rewrite {
    fn apply(self, params: &[&str]) -> String {
        let positional: Vec<&str> = params
            .iter()
            .copied()
            .filter(|p| named_param(p).is_none())
            .collect();
        let pick = |p: Option<&&str>| p.map(|s| s.trim().to_string()).unwrap_or_default();

        match self {
            Rewrite::Delete => String::new(),
            Rewrite::FirstParam => pick(positional.first()),
            Rewrite::SecondParam => pick(positional.get(1)),
            Rewrite::LastParam => pick(positional.last()),
            Rewrite::Content => params.join("|").trim().to_string(),
            Rewrite::Label => params
                .iter()
                .filter_map(|p| named_param(p))
                .find(|(key, _)| key.eq_ignore_ascii_case("label"))
                .map(|(_, value)| value.trim().to_string())
                .unwrap_or_else(|| pick(positional.first())),
            Rewrite::InlineText => params
                .first()
                .and_then(|p| p.trim_start().strip_prefix('='))
                .map(|text| text.trim().to_string())
                .unwrap_or_default(),
        }
    }
}

/// One left-to-right sweep rewriting the outermost templates `rule` accepts.
/// `None` when nothing matched.
fn rewrite_templates_once(s: &str, rule: &TemplateRule) -> Option<String> {
    let bytes = s.as_bytes();
    let finder = memmem::Finder::new(b"{{");
    let mut out = String::new();
    let mut copied = 0;
    let mut i = 0;

    while let Some(offset) = finder.find(&bytes[i..]) {
        let open = i + offset;
        let Some(close) = find_matching_close(bytes, open) else {
            // Unterminated: leave literal.
            i = open + 2;
            continue;
        };

        let params = split_params(&s[open + 2..close]);
        let name = template_name(params[0]);
        if rule.accepts(&name) {
            out.push_str(&s[copied..open]);
            out.push_str(&rule.rewrite.apply(&params[1..]));
            copied = close + 2;
            i = close + 2;
        } else {
            i = open + 2;
        }
    }

    if copied == 0 {
        return None;
    }
    out.push_str(&s[copied..]);
    Some(out)
}

/// Applies `rule` until no template it accepts remains, so
/// `{{Ruby|{{Ruby|a|b}}|c}}` becomes `a`.
pub fn rewrite_templates(s: &str, rule: &TemplateRule) -> String {
    let mut current = s.to_string();
    while let Some(next) = rewrite_templates_once(&current, rule) {
        current = next;
    }
    current
}

/// `[[target|display]]` -> `display`, `[[target]]` -> `target`.
fn unwrap_wikilinks(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(open) = rest.find("[[") {
        let Some(len) = rest[open + 2..].find("]]") else {
            break;
        };
        let inner = &rest[open + 2..open + 2 + len];
        out.push_str(&rest[..open]);
        out.push_str(inner.split_once('|').map_or(inner, |(_, display)| display));
        rest = &rest[open + 2 + len + 2..];
    }
    out.push_str(rest);
    out
}

/// `[http://x label]` -> `label`, `[http://x]` -> nothing.
fn unwrap_external_links(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        let is_url = ["http://", "https://", "//"]
            .iter()
            .any(|p| {
                after
                    .as_bytes()
                    .get(..p.len())
                    .is_some_and(|head| head.eq_ignore_ascii_case(p.as_bytes()))
            });
        let close = after.find(']');
        match (is_url, close) {
            (true, Some(close)) => {
                out.push_str(&rest[..open]);
                let inner = &after[..close];
                if let Some((_, label)) = inner.split_once(' ') {
                    out.push_str(label.trim());
                }
                rest = &after[close + 1..];
            }
            _ => {
                out.push_str(&rest[..open + 1]);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn find_ci(hay: &str, needle: &str, from: usize) -> Option<usize> {
    let n = needle.len();
    hay.as_bytes()
        .get(from..)?
        .windows(n)
        .position(|w| w.eq_ignore_ascii_case(needle.as_bytes()))
        .map(|p| from + p)
}

/// Removes `open … close` spans; an unterminated `open` is left as is.
fn strip_delimited(s: &str, open: &str, close: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find(open) {
        let Some(len) = rest[start + open.len()..].find(close) else {
            break;
        };
        out.push_str(&rest[..start]);
        rest = &rest[start + open.len() + len + close.len()..];
    }
    out.push_str(rest);
    out
}

/// Tag starting at `at` (`<name` already matched) followed by space, `>` or `/`.
fn tag_boundary(s: &str, at: usize, name_len: usize) -> bool {
    matches!(
        s.as_bytes().get(at + name_len),
        Some(b' ' | b'\t' | b'\n' | b'>' | b'/')
    )
}

/// `<ref …>…</ref>` and `<ref …/>`.
fn strip_ref_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut copied = 0;
    let mut i = 0;

    while let Some(start) = find_ci(s, "<ref", i) {
        if !tag_boundary(s, start, 4) {
            i = start + 4;
            continue;
        }
        let Some(gt) = s[start..].find('>').map(|p| start + p) else {
            break;
        };
        let end = if s[..gt].ends_with('/') {
            Some(gt + 1)
        } else {
            find_ci(s, "</ref", gt + 1).and_then(|c| s[c..].find('>').map(|p| c + p + 1))
        };
        match end {
            Some(end) => {
                out.push_str(&s[copied..start]);
                copied = end;
                i = end;
            }
            None => i = start + 4,
        }
    }

    out.push_str(&s[copied..]);
    out
}

/// Unwraps each outermost `<span …>…</span>` that has a matching close.
fn unwrap_spans_once(s: &str) -> Option<String> {
    let mut out = String::with_capacity(s.len());
    let mut copied = 0;
    let mut i = 0;
    let mut changed = false;

    while let Some(start) = find_ci(s, "<span", i) {
        if !tag_boundary(s, start, 5) {
            i = start + 5;
            continue;
        }
        let Some(open_end) = s[start..].find('>').map(|p| start + p + 1) else {
            break;
        };

        let mut depth = 1usize;
        let mut j = open_end;
        let mut close = None;
        while let Some(lt) = s[j..].find('<').map(|p| j + p) {
            if find_ci(s, "<span", lt) == Some(lt) && tag_boundary(s, lt, 5) {
                depth += 1;
            } else if find_ci(s, "</span", lt) == Some(lt) {
                depth -= 1;
                if depth == 0 {
                    close = s[lt..].find('>').map(|p| (lt, lt + p + 1));
                    break;
                }
            }
            j = lt + 1;
        }

        match close {
            Some((close_start, close_end)) => {
                out.push_str(&s[copied..start]);
                out.push_str(&s[open_end..close_start]);
                copied = close_end;
                i = close_end;
                changed = true;
            }
            None => i = start + 5,
        }
    }

    if !changed {
        return None;
    }
    out.push_str(&s[copied..]);
    Some(out)
}

const CREDIT_MARKERS: &[&str] = &["声", "演", "CV"];

/// `名前（声：…）`, `名前（演：…）`, `名前 - 声：…`.
fn strip_cast_credits(s: &str) -> String {
    let trimmed = s.trim_end();

    if trimmed.ends_with('）') || trimmed.ends_with(')') {
        let cut = CREDIT_MARKERS
            .iter()
            .flat_map(|m| ['（', '('].map(|p| format!("{p}{m}")))
            .filter_map(|prefix| {
                let at = trimmed.rfind(&prefix)?;
                let after = trimmed[at + prefix.len()..].trim_start();
                (after.starts_with('：') || after.starts_with(':')).then_some(at)
            })
            .min();
        if let Some(at) = cut {
            return trimmed[..at].trim_end().to_string();
        }
    }

    for m in CREDIT_MARKERS {
        for dash in [" - ", " – ", " — "] {
            let marker = format!("{dash}{m}");
            if let Some(at) = trimmed.find(&marker) {
                let after = trimmed[at + marker.len()..].trim_start();
                if after.starts_with('：') || after.starts_with(':') {
                    return trimmed[..at].trim_end().to_string();
                }
            }
        }
    }

    s.to_string()
}

fn is_kana(c: char) -> bool {
    matches!(c, 'ぁ'..='ゖ' | 'ァ'..='ヺ' | 'ー' | '・' | 'ゝ' | 'ゞ' | 'ヽ' | 'ヾ')
}

fn is_japanese(c: char) -> bool {
    is_kana(c)
        || matches!(c, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}' | '々' | '〆' | 'ヶ')
}

/// Drops the final `(…)`/`（…）` when `keep_out(inner, full_width)` accepts
/// its contents. The parenthetical must end the string and not contain
/// another parenthesis.
fn strip_trailing_paren(s: &str, keep_out: impl Fn(&str, bool) -> bool) -> String {
    let trimmed = s.trim_end();
    let (full_width, close_len) = if trimmed.ends_with('）') {
        (true, '）'.len_utf8())
    } else if trimmed.ends_with(')') {
        (false, 1)
    } else {
        return s.to_string();
    };

    let body = &trimmed[..trimmed.len() - close_len];
    let Some(open) = body.rfind(['（', '(']) else {
        return s.to_string();
    };
    let open_len = if body[open..].starts_with('（') { '（'.len_utf8() } else { 1 };
    let inner = &body[open + open_len..];

    if inner.contains(['）', ')']) || inner.trim().is_empty() {
        return s.to_string();
    }
    if keep_out(inner.trim(), full_width) {
        trimmed[..open].trim_end().to_string()
    } else {
        s.to_string()
    }
}

/// Drops a trailing parenthetical written entirely in kana (a reading).
pub fn strip_reading_gloss(s: &str) -> String {
    strip_trailing_paren(s, |inner, _| {
        inner.chars().all(|c| is_kana(c) || c.is_whitespace())
    })
}
