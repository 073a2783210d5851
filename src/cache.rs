use crate::category::CategoryClosure;
use crate::config::{CACHE_FILE, CACHE_VERSION, READ_BUFFER_SIZE};
use crate::page_table::TitleIndex;
use anyhow::{Context, Result};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

/// Identity of one SQL dump at the time the cache was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpFingerprint {
    pub path: String,
    pub mtime: u64,
    pub size: u64,
}

impl DumpFingerprint {
    pub fn of(path: &Path) -> Result<Self> {
        let metadata = fs::metadata(path)
            .with_context(|| format!("Failed to get metadata for: {}", path.display()))?;
        let mtime = metadata
            .modified()
            .context("Failed to get modification time")?
            .duration_since(SystemTime::UNIX_EPOCH)
            .context("Invalid modification time")?
            .as_secs();
        Ok(Self {
            path: path.display().to_string(),
            mtime,
            size: metadata.len(),
        })
    }
}

/// Everything that decides whether a cached index is still usable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheKey {
    pub dumps: Vec<DumpFingerprint>,
    pub seed: String,
    pub list_pattern: String,
}

impl CacheKey {
    pub fn new(dumps: &[&Path], seed: &str, list_pattern: &str) -> Result<Self> {
        Ok(Self {
            dumps: dumps
                .iter()
                .map(|p| DumpFingerprint::of(p))
                .collect::<Result<_>>()?,
            seed: seed.to_string(),
            list_pattern: list_pattern.to_string(),
        })
    }
}

#[derive(Serialize, Deserialize)]
struct CacheMetadata {
    version: u32,
    key: CacheKey,
}

#[derive(Deserialize)]
struct IndexCacheDe {
    metadata: CacheMetadata,
    titles: TitleIndex,
    closure: CategoryClosure,
}

/// Borrows the index so a multi-million-entry title map is not cloned.
#[derive(Serialize)]
struct IndexCacheSer<'a> {
    metadata: CacheMetadata,
    titles: &'a TitleIndex,
    closure: &'a CategoryClosure,
}

pub fn cache_path(output_dir: &Path) -> PathBuf {
    output_dir.join(CACHE_FILE)
}

/// `Ok(Some(..))` for a cache written from the same dumps and settings,
/// `Ok(None)` when it is missing, unreadable or stale.
pub fn try_load(cache_path: &Path, key: &CacheKey) -> Result<Option<(TitleIndex, CategoryClosure)>> {
    if !cache_path.exists() {
        return Ok(None);
    }

    let file_size = fs::metadata(cache_path).map(|m| m.len()).unwrap_or(0);
    let file = File::open(cache_path)
        .with_context(|| format!("Failed to open cache file: {}", cache_path.display()))?;
    let reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);

    let options = bincode::options().with_limit(file_size.saturating_add(1024));
    let cache: IndexCacheDe = match options.deserialize_from(reader) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Cache file is corrupt or unreadable");
            return Ok(None);
        }
    };

    if cache.metadata.version != CACHE_VERSION {
        info!(
            cached = cache.metadata.version,
            current = CACHE_VERSION,
            "Cache version mismatch"
        );
        return Ok(None);
    }

    if cache.metadata.key != *key {
        info!("Dumps or settings changed since the cache was written");
        return Ok(None);
    }

    let (main, categories, lists) = cache.titles.stats();
    info!(
        main,
        categories,
        character_lists = lists,
        members = cache.closure.member_page_ids.len(),
        "Index loaded from cache"
    );
    Ok(Some((cache.titles, cache.closure)))
}

/// Writes to a temp file and renames it into place.
pub fn save(
    output_dir: &Path,
    key: &CacheKey,
    titles: &TitleIndex,
    closure: &CategoryClosure,
) -> Result<()> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create directory: {}", output_dir.display()))?;
    let path = cache_path(output_dir);

    let cache = IndexCacheSer {
        metadata: CacheMetadata {
            version: CACHE_VERSION,
            key: key.clone(),
        },
        titles,
        closure,
    };

    let tmp_path = path.with_extension("cache.tmp");
    let file = File::create(&tmp_path)
        .with_context(|| format!("Failed to create temp cache file: {}", tmp_path.display()))?;
    let mut writer = BufWriter::new(file);
    bincode::DefaultOptions::new()
        .serialize_into(&mut writer, &cache)
        .context("Failed to serialize index cache")?;
    writer.flush().context("Failed to flush index cache")?;
    drop(writer);

    fs::rename(&tmp_path, &path)
        .with_context(|| format!("Failed to rename temp cache file to: {}", path.display()))?;

    info!(path = %path.display(), "Index cache saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::ClosureSet;
    use crate::heuristics::Heuristics;
    use rustc_hash::{FxHashMap, FxHashSet};
    use tempfile::TempDir;

    fn create_dump(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn sample() -> (TitleIndex, CategoryClosure) {
        let mut main = FxHashMap::default();
        main.insert(1, "X".to_string());
        main.insert(2, "Xの登場人物".to_string());
        let mut cats = FxHashMap::default();
        cats.insert(10, "架空の人物".to_string());
        let titles = TitleIndex::from_parts(main, cats, &Heuristics::default());

        let closure = CategoryClosure {
            closure: ClosureSet::PageIds([10].into_iter().collect()),
            member_page_ids: [1].into_iter().collect::<FxHashSet<u32>>(),
        };
        (titles, closure)
    }

    fn key_for(page: &Path) -> CacheKey {
        CacheKey::new(&[page], "架空の人物", "pattern").unwrap()
    }

    #[test]
    fn cache_path_is_inside_output_dir() {
        assert_eq!(
            cache_path(Path::new("/out")),
            PathBuf::from("/out/index.cache")
        );
    }

    #[test]
    fn missing_cache_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let page = create_dump(&dir, "page.sql", "x");
        let loaded = try_load(&dir.path().join("index.cache"), &key_for(&page)).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let page = create_dump(&dir, "page.sql", "x");
        let key = key_for(&page);
        let (titles, closure) = sample();

        save(dir.path(), &key, &titles, &closure).unwrap();
        let (loaded_titles, loaded_closure) =
            try_load(&cache_path(dir.path()), &key).unwrap().unwrap();

        assert_eq!(loaded_titles.main_title(1), Some("X"));
        assert!(loaded_titles.is_character_list(2));
        assert_eq!(loaded_titles.category_title(10), Some("架空の人物"));
        assert_eq!(loaded_closure.closure, closure.closure);
        assert_eq!(loaded_closure.member_page_ids, closure.member_page_ids);
    }

    #[test]
    fn modified_dump_invalidates_cache() {
        let dir = TempDir::new().unwrap();
        let page = create_dump(&dir, "page.sql", "x");
        let (titles, closure) = sample();
        save(dir.path(), &key_for(&page), &titles, &closure).unwrap();

        fs::write(&page, "modified content that is longer").unwrap();
        let loaded = try_load(&cache_path(dir.path()), &key_for(&page)).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn different_seed_invalidates_cache() {
        let dir = TempDir::new().unwrap();
        let page = create_dump(&dir, "page.sql", "x");
        let (titles, closure) = sample();
        save(dir.path(), &key_for(&page), &titles, &closure).unwrap();

        let other = CacheKey::new(&[page.as_path()], "架空の動物", "pattern").unwrap();
        assert!(try_load(&cache_path(dir.path()), &other).unwrap().is_none());
    }

    #[test]
    fn corrupt_cache_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let page = create_dump(&dir, "page.sql", "x");
        fs::write(cache_path(dir.path()), b"not valid bincode data").unwrap();
        assert!(try_load(&cache_path(dir.path()), &key_for(&page))
            .unwrap()
            .is_none());
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let page = create_dump(&dir, "page.sql", "x");
        let nested = dir.path().join("nested").join("out");
        let (titles, closure) = sample();
        save(&nested, &key_for(&page), &titles, &closure).unwrap();
        assert!(cache_path(&nested).exists());
    }

    #[test]
    fn fingerprint_of_missing_dump_fails() {
        assert!(DumpFingerprint::of(Path::new("/nonexistent/page.sql.gz")).is_err());
    }
}
