//! End-to-end tests for the toujo extraction pipeline.
//!
//! Every test builds a tiny dump set in a TempDir: a gzip `page` table, a
//! gzip `categorylinks` table (either schema generation), optionally a gzip
//! `linktarget` table, and a bzip2 pages-articles export. The fixtures share
//! one small wiki:
//!
//! - `Xの登場人物` (1) -- character-list page with two `;` entries
//! - `作品` (2) -- article with a `登場人物` section
//! - `無関係` (3) -- article with nothing to mine
//! - `碇シンジ`, `綾波レイ`, `9mm弾` (20-22) -- filed under the seed category
//!   directly or through `A` and `B`
//! - `別人` (23) -- filed under an unrelated category
//!
//! # Key Patterns
//!
//! - **Fixture creation**: `write_data_dir(Generation::One)` writes the full
//!   dump set and returns the TempDir holding it
//! - **Full runs**: `run_extraction` against that directory, then compare
//!   the candidate CSV byte for byte
//! - **Isolation**: each test owns its data and output directories

use bzip2::write::BzEncoder;
use flate2::write::GzEncoder;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use toujo::config::{CANDIDATES_FILE, EXCLUDED_CANDIDATES_FILE, SEED_CATEGORY};
use toujo::error::DumpError;
use toujo::extract::{mine_page_files, mine_stream, run_extraction, ExtractConfig, WorkerContext};
use toujo::filter::ExcludeList;
use toujo::heuristics::Heuristics;
use toujo::parser::WikiReader;
use toujo::stats::ExtractionStats;

const EXPECTED_CSV: &str = "work,name\n\
    X,名前一\n\
    X,名前二\n\
    category,碇シンジ\n\
    category,綾波レイ\n\
    作品,見出し\n";

#[derive(Clone, Copy)]
enum Generation {
    One,
    Two { with_linktarget: bool },
}

fn write_gz(path: &Path, content: &str) {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::fast());
    encoder.write_all(content.as_bytes()).unwrap();
    fs::write(path, encoder.finish().unwrap()).unwrap();
}

fn write_bz2(path: &Path, content: &str) {
    let mut encoder = BzEncoder::new(Vec::new(), bzip2::Compression::fast());
    encoder.write_all(content.as_bytes()).unwrap();
    fs::write(path, encoder.finish().unwrap()).unwrap();
}

fn page_sql() -> &'static str {
    "-- MySQL dump\n\
     CREATE TABLE `page` (\n\
     \x20 `page_id` int(8) unsigned NOT NULL AUTO_INCREMENT,\n\
     \x20 `page_namespace` int(11) NOT NULL DEFAULT 0,\n\
     \x20 `page_title` varbinary(255) NOT NULL DEFAULT '',\n\
     \x20 `page_is_redirect` tinyint(1) unsigned NOT NULL DEFAULT 0,\n\
     \x20 PRIMARY KEY (`page_id`)\n\
     ) ENGINE=InnoDB;\n\
     INSERT INTO `page` VALUES (1,0,'Xの登場人物',0),(2,0,'作品',0),(3,0,'無関係',0),\
     (10,14,'架空の人物',0),(11,14,'A',0),(12,14,'B',0),\
     (20,0,'碇シンジ',0),(21,0,'綾波レイ',0),(22,0,'9mm弾',0),(23,0,'別人',0);\n"
}

fn categorylinks_gen1_sql() -> &'static str {
    "CREATE TABLE `categorylinks` (\n\
     \x20 `cl_from` int(8) unsigned NOT NULL DEFAULT 0,\n\
     \x20 `cl_to` varbinary(255) NOT NULL DEFAULT '',\n\
     \x20 `cl_sortkey` varbinary(230) NOT NULL DEFAULT '',\n\
     \x20 `cl_timestamp` timestamp NOT NULL,\n\
     \x20 `cl_sortkey_prefix` varbinary(255) NOT NULL DEFAULT '',\n\
     \x20 `cl_collation` varbinary(32) NOT NULL DEFAULT '',\n\
     \x20 `cl_type` enum('page','subcat','file') NOT NULL DEFAULT 'page'\n\
     ) ENGINE=InnoDB;\n\
     INSERT INTO `categorylinks` VALUES \
     (11,'架空の人物','A','2024-01-01 00:00:00','','uca','subcat'),\
     (12,'A','B','2024-01-01 00:00:00','','uca','subcat'),\
     (20,'架空の人物','x','2024-01-01 00:00:00','','uca','page'),\
     (21,'B','x','2024-01-01 00:00:00','','uca','page'),\
     (22,'A','x','2024-01-01 00:00:00','','uca','page'),\
     (23,'他のカテゴリ','x','2024-01-01 00:00:00','','uca','page');\n"
}

fn categorylinks_gen2_sql() -> &'static str {
    "CREATE TABLE `categorylinks` (\n\
     \x20 `cl_from` int(8) unsigned NOT NULL DEFAULT 0,\n\
     \x20 `cl_sortkey` varbinary(230) NOT NULL DEFAULT '',\n\
     \x20 `cl_sortkey_prefix` varbinary(255) NOT NULL DEFAULT '',\n\
     \x20 `cl_type` enum('page','subcat','file') NOT NULL DEFAULT 'page',\n\
     \x20 `cl_collation_id` smallint(5) unsigned NOT NULL DEFAULT 0,\n\
     \x20 `cl_target_id` bigint(20) unsigned NOT NULL\n\
     ) ENGINE=InnoDB;\n\
     INSERT INTO `categorylinks` VALUES \
     (11,'A','','subcat',1,100),(12,'B','','subcat',1,101),\
     (20,'x','','page',1,100),(21,'x','','page',1,102),\
     (22,'x','','page',1,101),(23,'x','','page',1,103);\n"
}

fn linktarget_sql() -> &'static str {
    "CREATE TABLE `linktarget` (\n\
     \x20 `lt_id` bigint(20) unsigned NOT NULL AUTO_INCREMENT,\n\
     \x20 `lt_namespace` int(11) NOT NULL,\n\
     \x20 `lt_title` varbinary(255) NOT NULL\n\
     ) ENGINE=InnoDB;\n\
     INSERT INTO `linktarget` VALUES (100,14,'架空の人物'),(101,14,'A'),(102,14,'B'),\
     (103,14,'他のカテゴリ'),(104,0,'架空の人物');\n"
}

fn articles_xml() -> &'static str {
    r#"<mediawiki xmlns="http://www.mediawiki.org/xml/export-0.11/" xml:lang="ja">
  <siteinfo>
    <sitename>Wikipedia</sitename>
  </siteinfo>
  <page>
    <title>Xの登場人物</title>
    <ns>0</ns>
    <id>1</id>
    <revision>
      <id>1001</id>
      <text xml:space="preserve">; 名前一
; 名前二
</text>
    </revision>
  </page>
  <page>
    <title>作品</title>
    <ns>0</ns>
    <id>2</id>
    <revision>
      <id>1002</id>
      <text xml:space="preserve">== 概要 ==
本文
== 登場人物 ==
=== 見出し ===
説明
== 脚注 ==
</text>
    </revision>
  </page>
  <page>
    <title>無関係</title>
    <ns>0</ns>
    <id>3</id>
    <revision>
      <id>1003</id>
      <text xml:space="preserve">本文だけ</text>
    </revision>
  </page>
  <page>
    <title>Category:架空の人物</title>
    <ns>14</ns>
    <id>10</id>
    <revision>
      <id>1010</id>
      <text xml:space="preserve">== 登場人物 ==
=== 除外 ===
</text>
    </revision>
  </page>
  <page>
    <title>碇シンジ</title>
    <ns>0</ns>
    <id>20</id>
    <revision>
      <id>1020</id>
      <text xml:space="preserve">'''碇シンジ'''は架空の人物。</text>
    </revision>
  </page>
</mediawiki>
"#
}

fn write_data_dir(generation: Generation) -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write_gz(&root.join("jawiki-latest-page.sql.gz"), page_sql());
    write_bz2(
        &root.join("jawiki-latest-pages-articles.xml.bz2"),
        articles_xml(),
    );

    let categorylinks = root.join("jawiki-latest-categorylinks.sql.gz");
    match generation {
        Generation::One => write_gz(&categorylinks, categorylinks_gen1_sql()),
        Generation::Two { with_linktarget } => {
            write_gz(&categorylinks, categorylinks_gen2_sql());
            if with_linktarget {
                write_gz(&root.join("jawiki-latest-linktarget.sql.gz"), linktarget_sql());
            }
        }
    }
    dir
}

fn config(data: &TempDir, out: &Path) -> ExtractConfig {
    ExtractConfig {
        data_dir: data.path().to_path_buf(),
        output_dir: out.to_path_buf(),
        workers: 2,
        seed: SEED_CATEGORY.to_string(),
        use_cache: true,
        write_pages: true,
    }
}

#[test]
fn test_mine_stream_over_bz2_export() {
    let data = write_data_dir(Generation::One);
    let reader =
        WikiReader::open(&data.path().join("jawiki-latest-pages-articles.xml.bz2")).unwrap();
    let ctx = Arc::new(WorkerContext::new(
        Heuristics::default(),
        [1].into_iter().collect(),
        Default::default(),
        None,
    ));
    let stats = Arc::new(ExtractionStats::new());

    let result = mine_stream(reader, ctx, 2, Arc::clone(&stats)).unwrap();
    let pairs: Vec<(&str, &str)> = result
        .iter()
        .map(|c| (c.work.as_str(), c.name.as_str()))
        .collect();

    assert_eq!(
        pairs,
        vec![("X", "名前一"), ("X", "名前二"), ("作品", "見出し")]
    );
    assert_eq!(stats.pages(), 5);
    assert_eq!(stats.character_lists(), 1);
    assert_eq!(stats.sections(), 1);
    assert_eq!(stats.failures(), 0);
}

#[test]
fn test_run_extraction_gen1() {
    let data = write_data_dir(Generation::One);
    let out = TempDir::new().unwrap();

    let summary =
        run_extraction(&config(&data, out.path()), &Heuristics::default(), &ExcludeList::default())
            .unwrap();

    assert!(!summary.from_cache);
    assert_eq!(summary.closure_categories, 3);
    assert_eq!(summary.closure_members, 3);
    assert_eq!(summary.category_candidates, 2);
    assert_eq!(summary.counts.accepted, 5);
    assert_eq!(summary.counts.excluded, 0);

    let csv = fs::read_to_string(out.path().join(CANDIDATES_FILE)).unwrap();
    assert_eq!(csv, EXPECTED_CSV);
    let excluded = fs::read_to_string(out.path().join(EXCLUDED_CANDIDATES_FILE)).unwrap();
    assert_eq!(excluded, "work,name\n");

    let pages = out.path().join("pages");
    assert!(pages.join("1.txt").exists());
    assert!(pages.join("2.txt").exists());
    assert!(pages.join("20.txt").exists());
    assert!(!pages.join("3.txt").exists());
    assert!(!pages.join("10.txt").exists());
    assert!(out.path().join("page_meta.json").exists());
}

#[test]
fn test_run_extraction_gen2() {
    let data = write_data_dir(Generation::Two {
        with_linktarget: true,
    });
    let out = TempDir::new().unwrap();

    let summary =
        run_extraction(&config(&data, out.path()), &Heuristics::default(), &ExcludeList::default())
            .unwrap();

    assert_eq!(summary.closure_members, 3);
    let csv = fs::read_to_string(out.path().join(CANDIDATES_FILE)).unwrap();
    assert_eq!(csv, EXPECTED_CSV);
}

#[test]
fn test_gen2_without_linktarget_fails() {
    let data = write_data_dir(Generation::Two {
        with_linktarget: false,
    });
    let out = TempDir::new().unwrap();

    let err =
        run_extraction(&config(&data, out.path()), &Heuristics::default(), &ExcludeList::default())
            .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DumpError>(),
        Some(DumpError::LinkTargetRequired(_))
    ));
}

#[test]
fn test_missing_data_dir_fails() {
    let out = TempDir::new().unwrap();
    let config = ExtractConfig {
        data_dir: out.path().join("does-not-exist"),
        output_dir: out.path().to_path_buf(),
        workers: 1,
        seed: SEED_CATEGORY.to_string(),
        use_cache: true,
        write_pages: false,
    };

    let err = run_extraction(&config, &Heuristics::default(), &ExcludeList::default())
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DumpError>(),
        Some(DumpError::DataDirMissing(_))
    ));
}

#[test]
fn test_second_run_uses_index_cache() {
    let data = write_data_dir(Generation::One);
    let out = TempDir::new().unwrap();
    let config = config(&data, out.path());

    let first = run_extraction(&config, &Heuristics::default(), &ExcludeList::default()).unwrap();
    assert!(!first.from_cache);
    assert!(out.path().join("index.cache").exists());

    let second = run_extraction(&config, &Heuristics::default(), &ExcludeList::default()).unwrap();
    assert!(second.from_cache);
    assert_eq!(second.closure_members, first.closure_members);

    let csv = fs::read_to_string(out.path().join(CANDIDATES_FILE)).unwrap();
    assert_eq!(csv, EXPECTED_CSV);
}

#[test]
fn test_exclude_list_moves_rows() {
    let data = write_data_dir(Generation::One);
    let out = TempDir::new().unwrap();
    let exclude = ExcludeList::new(["綾波レイ"]);

    let summary = run_extraction(&config(&data, out.path()), &Heuristics::default(), &exclude)
        .unwrap();
    assert_eq!(summary.counts.accepted, 4);
    assert_eq!(summary.counts.excluded, 1);

    let excluded = fs::read_to_string(out.path().join(EXCLUDED_CANDIDATES_FILE)).unwrap();
    assert_eq!(excluded, "work,name\ncategory,綾波レイ\n");
}

#[test]
fn test_no_pages_skips_page_bodies() {
    let data = write_data_dir(Generation::One);
    let out = TempDir::new().unwrap();
    let mut config = config(&data, out.path());
    config.write_pages = false;

    let summary =
        run_extraction(&config, &Heuristics::default(), &ExcludeList::default()).unwrap();
    assert_eq!(summary.stats.written(), 0);
    assert!(!out.path().join("pages").exists());
}

#[test]
fn test_mine_page_files_after_extract() {
    let data = write_data_dir(Generation::One);
    let out = TempDir::new().unwrap();
    run_extraction(&config(&data, out.path()), &Heuristics::default(), &ExcludeList::default())
        .unwrap();

    let summary =
        mine_page_files(out.path(), 2, &Heuristics::default(), &ExcludeList::default()).unwrap();

    assert_eq!(summary.pages, 3);
    assert_eq!(summary.stats.character_lists(), 1);
    let csv = fs::read_to_string(out.path().join(CANDIDATES_FILE)).unwrap();
    assert_eq!(csv, "work,name\nX,名前一\nX,名前二\n作品,見出し\n");
}

#[test]
fn test_mine_page_files_without_meta_fails() {
    let out = TempDir::new().unwrap();
    assert!(
        mine_page_files(out.path(), 1, &Heuristics::default(), &ExcludeList::default()).is_err()
    );
}
