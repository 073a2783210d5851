//! Corpus-specific heuristics kept as data rather than control flow.
//!
//! The defaults are tuned for Japanese Wikipedia. A JSON file with the same
//! shape as [`HeuristicsConfig`] can replace any subset of them; missing keys
//! keep their defaults.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const DEFAULT_CHARACTER_LIST_PATTERN: &str = r"^(?P<work>.+)の.*登場人物(?:_一覧|一覧)?$";

const DEFAULT_NOISE_PATTERNS: &[&str] = &[
    r"^第\d+話[）)]?$",
    r"^\d+回",
    r"^第\d+作",
    r"^最終話",
    r"声[\s_]*[-:：]",
    r"声優[\s_]*[:：]",
    r"演[\s_]*[-:：]",
];

static DEFAULT_CHARACTER_LIST_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(DEFAULT_CHARACTER_LIST_PATTERN).unwrap());

static DEFAULT_NOISE_SET: Lazy<RegexSet> =
    Lazy::new(|| RegexSet::new(DEFAULT_NOISE_PATTERNS).unwrap());

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicsConfig {
    /// Regex over a normalized main-namespace title marking a character-list
    /// page. The `work` capture group, when present, is the work title.
    pub character_list_title_pattern: String,
    /// Heading text that opens the character section.
    pub section_keyword: String,
    /// Heading text that closes the character section early.
    pub supplementary_keywords: Vec<String>,
    /// A heading ending in one of these is a group label, not a name.
    pub group_heading_suffixes: Vec<String>,
    /// A heading containing one of these is a group label, not a name.
    pub group_heading_substrings: Vec<String>,
    pub group_heading_exact: Vec<String>,
    /// Headings with fewer characters than this are group labels.
    pub min_name_chars: usize,
    /// Names ending in one of these are ammunition and similar, not people.
    pub munition_suffixes: Vec<String>,
    /// Short all-ASCII names up to this many characters are product codes.
    pub max_ascii_code_chars: usize,
    /// Definition-list terms starting with the first and containing the
    /// second string are episode titles.
    pub episode_marker: (String, String),
    /// Candidate names ending in one of these are descriptions, not names.
    pub noise_suffixes: Vec<String>,
    /// Candidate names containing one of these are descriptions, not names.
    pub noise_substrings: Vec<String>,
    /// Regexes for episode labels and cast credits.
    pub noise_patterns: Vec<String>,
}

impl Default for HeuristicsConfig {
    fn default() -> Self {
        let strings = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect();
        Self {
            character_list_title_pattern: DEFAULT_CHARACTER_LIST_PATTERN.into(),
            section_keyword: "登場人物".into(),
            supplementary_keywords: strings(&["補足"]),
            group_heading_suffixes: strings(&[
                "人物",
                "関係者",
                "隊",
                "一派",
                "一家",
                "キャラクター",
                "その他",
                "一覧",
                "図",
            ]),
            group_heading_substrings: strings(&[
                "・",
                "とその関係者",
                "の関係者",
                "編",
                "の親族",
                "親族・友人",
                "その他",
                "追加キャラクター",
                "DLC",
                "アップデート",
                "プレイアブル",
            ]),
            group_heading_exact: strings(&["その他", "主要人物"]),
            min_name_chars: 2,
            munition_suffixes: strings(&["弾"]),
            max_ascii_code_chars: 20,
            episode_marker: ("第".into(), "話".into()),
            noise_suffixes: strings(&["に登場したキャラクター", "おじさん"]),
            noise_substrings: strings(&[
                "の父",
                "の母",
                "する",
                "した",
                "登場作品",
                "アニメーション作品",
                "文字設定",
                "ゲーム作品",
            ]),
            noise_patterns: strings(DEFAULT_NOISE_PATTERNS),
        }
    }
}

/// Compiled noise-name rules, also held by the exclude list.
#[derive(Debug, Clone)]
pub struct NoiseRules {
    suffixes: Vec<String>,
    substrings: Vec<String>,
    patterns: RegexSet,
}

impl Default for NoiseRules {
    fn default() -> Self {
        let config = HeuristicsConfig::default();
        Self {
            suffixes: config.noise_suffixes,
            substrings: config.noise_substrings,
            patterns: DEFAULT_NOISE_SET.clone(),
        }
    }
}

impl NoiseRules {
    pub fn from_config(config: &HeuristicsConfig) -> Result<Self> {
        let patterns = RegexSet::new(&config.noise_patterns)
            .with_context(|| format!("Invalid noise patterns: {:?}", config.noise_patterns))?;
        Ok(Self {
            suffixes: config.noise_suffixes.clone(),
            substrings: config.noise_substrings.clone(),
            patterns,
        })
    }

    /// Episode labels, cast credits, kinship and verb phrases.
    pub fn matches(&self, name: &str) -> bool {
        self.suffixes.iter().any(|s| name.ends_with(s.as_str()))
            || self.substrings.iter().any(|s| name.contains(s.as_str()))
            || self.patterns.is_match(name)
    }
}

/// Compiled heuristics, cheap to clone into worker contexts.
#[derive(Debug, Clone)]
pub struct Heuristics {
    pub config: HeuristicsConfig,
    character_list_title: Regex,
    noise: NoiseRules,
}

impl Default for Heuristics {
    fn default() -> Self {
        Self {
            config: HeuristicsConfig::default(),
            character_list_title: DEFAULT_CHARACTER_LIST_TITLE.clone(),
            noise: NoiseRules::default(),
        }
    }
}

impl Heuristics {
    pub fn from_config(config: HeuristicsConfig) -> Result<Self> {
        let character_list_title = Regex::new(&config.character_list_title_pattern)
            .with_context(|| {
                format!(
                    "Invalid character list title pattern: {}",
                    config.character_list_title_pattern
                )
            })?;
        let noise = NoiseRules::from_config(&config)?;
        Ok(Self {
            config,
            character_list_title,
            noise,
        })
    }

    pub fn noise_rules(&self) -> &NoiseRules {
        &self.noise
    }

    /// Loads a JSON override file on top of the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read heuristics file: {}", path.display()))?;
        let config: HeuristicsConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse heuristics file: {}", path.display()))?;
        Self::from_config(config)
    }

    pub fn is_character_list_title(&self, title: &str) -> bool {
        self.character_list_title.is_match(title)
    }

    /// Work a character-list page belongs to; any other title is its own work.
    pub fn work_title<'a>(&self, title: &'a str) -> &'a str {
        self.character_list_title
            .captures(title)
            .and_then(|caps| caps.name("work"))
            .map(|m| m.as_str().trim_end_matches('_'))
            .filter(|work| !work.is_empty())
            .unwrap_or(title)
    }

    pub fn is_section_heading(&self, title: &str) -> bool {
        title.contains(&self.config.section_keyword)
    }

    pub fn is_supplementary_heading(&self, title: &str) -> bool {
        self.config
            .supplementary_keywords
            .iter()
            .any(|k| title.contains(k.as_str()))
    }

    /// True when a heading names a group of characters rather than one.
    pub fn is_group_heading(&self, title: &str) -> bool {
        let t = title.trim();
        if t.chars().count() < self.config.min_name_chars {
            return true;
        }
        let c = &self.config;
        c.group_heading_exact.iter().any(|e| e == t)
            || c.group_heading_suffixes.iter().any(|s| t.ends_with(s.as_str()))
            || c.group_heading_substrings.iter().any(|s| t.contains(s.as_str()))
    }

    pub fn is_episode_title(&self, term: &str) -> bool {
        let (prefix, marker) = &self.config.episode_marker;
        term.starts_with(prefix.as_str()) && term.contains(marker.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_character_list_titles() {
        let h = Heuristics::default();
        assert!(h.is_character_list_title("ONE_PIECEの登場人物"));
        assert!(h.is_character_list_title("涼宮ハルヒの憂鬱の登場人物"));
        assert!(h.is_character_list_title("ドラゴンボールの登場人物一覧"));
        assert!(h.is_character_list_title("犬夜叉の主要な登場人物_一覧"));
        assert!(!h.is_character_list_title("登場人物"));
        assert!(!h.is_character_list_title("ONE_PIECE"));
    }

    #[test]
    fn test_work_title_strips_list_suffix() {
        let h = Heuristics::default();
        assert_eq!(h.work_title("涼宮ハルヒの憂鬱の登場人物"), "涼宮ハルヒの憂鬱");
        assert_eq!(h.work_title("ONE_PIECEの登場人物一覧"), "ONE_PIECE");
        assert_eq!(h.work_title("ONE_PIECE"), "ONE_PIECE");
    }

    #[test]
    fn test_group_headings() {
        let h = Heuristics::default();
        assert!(h.is_group_heading("主要人物"));
        assert!(h.is_group_heading("海軍の関係者"));
        assert!(h.is_group_heading("麦わらの一味・協力者"));
        assert!(h.is_group_heading("ルフィ一家"));
        assert!(h.is_group_heading("A"));
        assert!(!h.is_group_heading("虎杖悠仁"));
    }

    #[test]
    fn test_partial_override_keeps_defaults() {
        let config: HeuristicsConfig =
            serde_json::from_str(r#"{"section_keyword": "Characters"}"#).unwrap();
        let h = Heuristics::from_config(config).unwrap();
        assert!(h.is_section_heading("Main Characters"));
        assert!(h.is_group_heading("その他"));
    }

    #[test]
    fn test_noise_suffixes() {
        let noise = Heuristics::default().noise_rules().clone();
        assert!(noise.matches("本作に登場したキャラクター"));
        assert!(noise.matches("近所のおじさん"));
        assert!(!noise.matches("おじさんの娘"));
    }

    #[test]
    fn test_noise_kinship_and_verb_phrases() {
        let noise = NoiseRules::default();
        assert!(noise.matches("ルフィの父"));
        assert!(noise.matches("ゲンの母（ACT.2〜）"));
        assert!(noise.matches("戦闘する"));
        assert!(noise.matches("ナミを救出した少年"));
        assert!(!noise.matches("ルフィ"));
    }

    #[test]
    fn test_noise_work_headings() {
        let noise = NoiseRules::default();
        assert!(noise.matches("登場作品"));
        assert!(noise.matches("アニメーション作品"));
        assert!(noise.matches("文字設定"));
        assert!(noise.matches("ゲーム作品一覧"));
    }

    #[test]
    fn test_noise_episode_labels() {
        let noise = NoiseRules::default();
        assert!(noise.matches("第3話"));
        assert!(noise.matches("第12話）"));
        assert!(noise.matches("12回"));
        assert!(noise.matches("9回（最終回）"));
        assert!(noise.matches("第3作"));
        assert!(noise.matches("最終話「別れ」"));
        assert!(!noise.matches("第3話の敵"));
        assert!(!noise.matches("ルフィ第3作"));
    }

    #[test]
    fn test_noise_cast_credits() {
        let noise = NoiseRules::default();
        assert!(noise.matches("声：山田"));
        assert!(noise.matches("ナミ_声_-_岡村明美"));
        assert!(noise.matches("（声優：岡村明美）"));
        assert!(noise.matches("演 - 山田太郎"));
        assert!(!noise.matches("声"));
    }

    #[test]
    fn test_noise_patterns_override() {
        let config: HeuristicsConfig =
            serde_json::from_str(r#"{"noise_patterns": ["^外伝"], "noise_substrings": []}"#)
                .unwrap();
        let h = Heuristics::from_config(config).unwrap();
        assert!(h.noise_rules().matches("外伝の主人公"));
        assert!(!h.noise_rules().matches("第3話"));
        assert!(!h.noise_rules().matches("ルフィの父"));
        assert!(h.noise_rules().matches("近所のおじさん"));
    }

    #[test]
    fn test_invalid_noise_pattern_is_an_error() {
        let config = HeuristicsConfig {
            noise_patterns: vec!["(".into()],
            ..HeuristicsConfig::default()
        };
        assert!(Heuristics::from_config(config).is_err());
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        let config = HeuristicsConfig {
            character_list_title_pattern: "(".into(),
            ..HeuristicsConfig::default()
        };
        assert!(Heuristics::from_config(config).is_err());
    }
}
