use crate::heuristics::{Heuristics, NoiseRules};
use crate::title::normalize_title;
use anyhow::{Context, Result};
use rustc_hash::FxHashSet;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::info;

/// Cheap check that rejects obvious non-names: ammunition calibers, product
/// codes, numbered items.
pub fn is_plausible_name(name: &str, heuristics: &Heuristics) -> bool {
    let config = &heuristics.config;
    let len = name.chars().count();
    if len < config.min_name_chars {
        return false;
    }

    match name.chars().next() {
        Some(c) if c.is_ascii_digit() || c.is_ascii_punctuation() => return false,
        _ => {}
    }

    if config
        .munition_suffixes
        .iter()
        .any(|s| name.ends_with(s.as_str()))
    {
        return false;
    }

    // Codes are ASCII without lowercase: "M16", "XM-25", "T-800".
    let ascii_code = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        && !name.bytes().any(|b| b.is_ascii_lowercase());
    !(len <= config.max_ascii_code_chars && ascii_code)
}

#[derive(Deserialize)]
struct ExcludeFile {
    #[serde(default)]
    exact: Vec<String>,
}

/// Static blacklist of names that are never characters, plus the noise-name
/// rules of the heuristics table.
#[derive(Debug, Default, Clone)]
pub struct ExcludeList {
    exact: FxHashSet<String>,
    noise: NoiseRules,
}

impl ExcludeList {
    /// Entries are normalized like candidate names. Uses the default noise
    /// rules.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            exact: names
                .into_iter()
                .map(|name| normalize_title(name.as_ref()))
                .filter(|s| !s.is_empty())
                .collect(),
            noise: NoiseRules::default(),
        }
    }

    pub fn with_noise_rules(mut self, noise: NoiseRules) -> Self {
        self.noise = noise;
        self
    }

    /// Reads `{"exact": [...]}`; `None` yields no exact entries. The noise
    /// rules come from `heuristics`.
    pub fn load(path: Option<&Path>, heuristics: &Heuristics) -> Result<Self> {
        let noise = heuristics.noise_rules().clone();
        let Some(path) = path else {
            return Ok(Self::default().with_noise_rules(noise));
        };
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read exclude list: {}", path.display()))?;
        let file: ExcludeFile = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse exclude list: {}", path.display()))?;
        let list = Self::new(file.exact).with_noise_rules(noise);
        info!(entries = list.len(), path = %path.display(), "Exclude list loaded");
        Ok(list)
    }

    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }

    /// Exact entry, `…の<entry>`, a bare number, or a noise name.
    pub fn is_excluded(&self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return true;
        }
        if name.bytes().all(|b| b.is_ascii_digit()) {
            return true;
        }
        if self.exact.contains(name) {
            return true;
        }
        let suffix_match = name
            .char_indices()
            .filter(|&(_, c)| c == 'の')
            .any(|(i, c)| self.exact.contains(&name[i + c.len_utf8()..]));
        suffix_match || self.noise.matches(name)
    }
}
