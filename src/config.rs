/// MediaWiki namespace number for articles
pub const NS_MAIN: i64 = 0;

/// MediaWiki namespace number for categories
pub const NS_CATEGORY: i64 = 14;

/// Root category whose transitive members are character pages
pub const SEED_CATEGORY: &str = "架空の人物";

/// Work label attached to candidates that come from the category closure
pub const CATEGORY_WORK_LABEL: &str = "category";

/// Capacity of the page queue between the XML producer and the dispatcher
pub const QUEUE_CAPACITY: usize = 10_000;

/// Maximum number of pages submitted to the worker pool but not yet merged
pub const IN_FLIGHT_WINDOW: usize = 5_000;

/// Progress update interval (tick every N rows or pages)
pub const PROGRESS_INTERVAL: u64 = 10_000;

/// Name part of a `name - description` list line longer than this is discarded
pub const MAX_DASH_NAME_CHARS: usize = 50;

/// Bump when the layout of the index cache changes
pub const CACHE_VERSION: u32 = 1;

/// Read buffer for decompressed dump streams
pub const READ_BUFFER_SIZE: usize = 256 * 1024;

/// Write buffer for CSV output
pub const CSV_BUFFER_SIZE: usize = 128 * 1024;

/// Default data directory when neither flag nor environment supplies one
pub const DEFAULT_DATA_DIR: &str = "/data";

/// Default output directory when neither flag nor environment supplies one
pub const DEFAULT_OUTPUT_DIR: &str = "/out";

/// Accepted candidates, one `work,name` row each
pub const CANDIDATES_FILE: &str = "character_candidates.csv";

/// Candidates matched by the exclude list
pub const EXCLUDED_CANDIDATES_FILE: &str = "character_candidates_excluded.csv";

/// Title map and character-list ids for later `mine-pages` runs
pub const PAGE_META_FILE: &str = "page_meta.json";

/// Directory of `<page_id>.txt` page bodies
pub const PAGES_DIR: &str = "pages";

/// Index cache file name inside the output directory
pub const CACHE_FILE: &str = "index.cache";
