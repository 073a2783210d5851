//! Character-name mining from page bodies.
//!
//! Normal articles: find the characters section ([`locate_character_section`])
//! and read names from its sub-headings, definition-list terms and bold-only
//! lines ([`extract_candidates`]). Character-list pages: the whole body is the
//! list, and `;` / `:*` lines are read directly
//! ([`extract_from_definition_list_lines`]).

use crate::config::MAX_DASH_NAME_CHARS;
use crate::heuristics::Heuristics;
use crate::template::{clean, strip_reading_gloss};
use crate::title::normalize_title;
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashSet;

static BOLD_ONLY_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*'''([^']+)'''\s*(?:[（(][^）)]*[）)])?\s*$").unwrap()
});

static WIKILINK_TARGET: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\[([^|\]]+)").unwrap());

const NAMESPACE_PREFIXES: &[&str] = &[
    "category", "file", "image", "wikipedia", "template", "help", "portal", "draft", "user",
    "talk", "wp", "カテゴリ", "ファイル", "画像", "プロジェクト", "ノート",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heading<'a> {
    pub level: usize,
    pub title: &'a str,
}

/// `== Title ==` with 2 to 6 `=` on each side.
pub fn parse_heading(line: &str) -> Option<Heading<'_>> {
    let line = line.trim_end();
    let leading = line.bytes().take_while(|&b| b == b'=').count();
    let trailing = line.bytes().rev().take_while(|&b| b == b'=').count();
    if leading < 2 || trailing < 2 || leading == line.len() {
        return None;
    }
    let level = leading.min(trailing).min(6);
    let title = line[level..line.len() - level].trim();
    if title.is_empty() {
        return None;
    }
    Some(Heading { level, title })
}

/// Term of a `; term` line.
fn definition_term(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix(';')?;
    Some(rest.trim_start_matches(';').trim())
}

/// Text between the first characters heading and the next heading at the
/// same or a higher level (or a supplementary-notes heading). Both headings
/// are excluded.
pub fn locate_character_section<'a>(body: &'a str, heuristics: &Heuristics) -> Option<&'a str> {
    if !body.contains(&heuristics.config.section_keyword) {
        return None;
    }

    let mut open: Option<(usize, usize)> = None;
    let mut end = body.len();
    let mut offset = 0;

    for line in body.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        let Some(heading) = parse_heading(line) else {
            continue;
        };
        match open {
            None if heuristics.is_section_heading(heading.title) => {
                open = Some((heading.level, offset));
            }
            Some((level, _))
                if heading.level <= level || heuristics.is_supplementary_heading(heading.title) =>
            {
                end = line_start;
                break;
            }
            _ => {}
        }
    }

    let (_, start) = open?;
    if start >= end {
        return None;
    }
    Some(body[start..end].trim_end_matches(['\n', '\r']))
}

/// Line indices of level 3/4 headings whose body has a `;` term before the
/// next heading of the same or a higher level.
fn headings_with_terms(lines: &[&str]) -> FxHashSet<usize> {
    let mut found = FxHashSet::default();
    for (i, line) in lines.iter().enumerate() {
        let Some(heading) = parse_heading(line) else {
            continue;
        };
        if !(3..=4).contains(&heading.level) {
            continue;
        }
        for next in &lines[i + 1..] {
            if let Some(h) = parse_heading(next) {
                if h.level <= heading.level {
                    break;
                }
            }
            if definition_term(next).is_some_and(|t| !t.is_empty()) {
                found.insert(i);
                break;
            }
        }
    }
    found
}

/// Names from sub-headings, `;` terms and bold-only lines, in order of first
/// appearance.
pub fn extract_candidates(section: &str, heuristics: &Heuristics) -> Vec<String> {
    let lines: Vec<&str> = section.lines().collect();
    let group_headings = headings_with_terms(&lines);
    let mut names = NameSink::default();

    for (i, line) in lines.iter().enumerate() {
        if let Some(heading) = parse_heading(line) {
            if (3..=4).contains(&heading.level) && !group_headings.contains(&i) {
                names.push_group_filtered(heading.title, false, heuristics);
            }
        } else if let Some(term) = definition_term(line) {
            names.push_group_filtered(term, true, heuristics);
        } else if let Some(caps) = BOLD_ONLY_LINE.captures(line) {
            names.push_group_filtered(&caps[1], false, heuristics);
        }
    }

    names.into_vec()
}

/// `;` and `:*` lines of a character-list page, regardless of headings.
pub fn extract_from_definition_list_lines(body: &str, heuristics: &Heuristics) -> Vec<String> {
    let mut names = NameSink::default();

    for line in body.lines() {
        let line = line.trim();
        if let Some(term) = definition_term(line) {
            let cleaned = clean(term);
            let head = term_head(&cleaned);
            if head.is_empty() || heuristics.is_episode_title(head) {
                continue;
            }
            names.push_split(head);
        } else if let Some(item) = line.strip_prefix(":*") {
            let item = item.trim();
            if is_bare_link(item) {
                continue;
            }
            let cleaned = clean(item);
            let Some(name) = dash_name(&cleaned) else {
                continue;
            };
            names.push_split(name);
        }
    }

    names.into_vec()
}

/// Candidates for one page.
pub fn mine_page(body: &str, is_character_list: bool, heuristics: &Heuristics) -> Vec<String> {
    if is_character_list {
        let mut names = NameSink::default();
        for name in extract_candidates(body, heuristics)
            .into_iter()
            .chain(extract_from_definition_list_lines(body, heuristics))
        {
            names.push_normalized(name);
        }
        return names.into_vec();
    }

    locate_character_section(body, heuristics)
        .map(|section| extract_candidates(section, heuristics))
        .unwrap_or_default()
}

/// Splits `A、B`, `A, B`, `A＆B`, `A & B`, `A / B` into separate names.
pub fn split_multi_names(s: &str) -> Vec<&str> {
    s.split(" / ")
        .flat_map(|part| part.split(['、', '，', ',', '＆', '&']))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// `term : definition` keeps the term.
fn term_head(cleaned: &str) -> &str {
    cleaned.split(':').next().unwrap_or_default().trim()
}

/// Name part of `name - description`; `None` without a dash or when the name
/// part is too long to be a name.
fn dash_name(line: &str) -> Option<&str> {
    let at = [" - ", " – ", " — ", "—", "―"]
        .iter()
        .filter_map(|d| line.find(d))
        .min()?;
    let name = line[..at].trim();
    (!name.is_empty() && name.chars().count() <= MAX_DASH_NAME_CHARS).then_some(name)
}

fn is_bare_link(item: &str) -> bool {
    item.starts_with("[[") && item.ends_with("]]") && item.matches("[[").count() == 1
}

fn link_targets(raw: &str) -> impl Iterator<Item = &str> {
    WIKILINK_TARGET.captures_iter(raw).filter_map(|caps| {
        let target = caps.get(1)?.as_str();
        let target = target.split('#').next()?.trim();
        let namespaced = target.split_once(':').is_some_and(|(ns, _)| {
            NAMESPACE_PREFIXES
                .iter()
                .any(|p| ns.trim().eq_ignore_ascii_case(p))
        });
        (!namespaced && !target.is_empty()).then_some(target)
    })
}

/// Ordered, deduplicated names of one page.
#[derive(Default)]
struct NameSink {
    seen: FxHashSet<String>,
    names: Vec<String>,
}

impl NameSink {
    fn push_normalized(&mut self, name: String) {
        if !name.is_empty() && self.seen.insert(name.clone()) {
            self.names.push(name);
        }
    }

    /// Clean-free path used once text has been cleaned already.
    fn push_split(&mut self, cleaned: &str) {
        let unglossed = strip_reading_gloss(cleaned);
        for part in split_multi_names(&unglossed) {
            self.push_normalized(normalize_title(part));
        }
    }

    /// Heading, term or bold text: clean, drop group labels, and fall back to
    /// a linked name when the visible text is only a group label.
    fn push_group_filtered(&mut self, raw: &str, is_term: bool, heuristics: &Heuristics) {
        let cleaned = clean(raw);
        let text = if is_term { term_head(&cleaned) } else { cleaned.trim() };
        if text.is_empty() {
            return;
        }
        if is_term && heuristics.is_episode_title(text) {
            return;
        }

        let unglossed = strip_reading_gloss(text);
        let parts: Vec<&str> = split_multi_names(&unglossed)
            .into_iter()
            .filter(|p| !heuristics.is_group_heading(p))
            .collect();

        if parts.is_empty() {
            if let Some(target) = link_targets(raw).find(|t| !heuristics.is_group_heading(t)) {
                self.push_normalized(normalize_title(target));
            }
            return;
        }
        for part in parts {
            self.push_normalized(normalize_title(part));
        }
    }

    fn into_vec(self) -> Vec<String> {
        self.names
    }
}
