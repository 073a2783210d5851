use crate::error::DumpError;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Dump files used by one run, located inside a single data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpPaths {
    pub page: PathBuf,
    pub categorylinks: PathBuf,
    /// Only needed for categorylinks dumps that reference `cl_target_id`.
    pub linktarget: Option<PathBuf>,
    pub articles: PathBuf,
}

impl DumpPaths {
    /// Files are recognized by table name; ties are broken by file name.
    pub fn discover(data_dir: &Path) -> Result<Self> {
        if !data_dir.is_dir() {
            return Err(DumpError::DataDirMissing(data_dir.to_path_buf()).into());
        }

        let mut names: Vec<(String, PathBuf)> = fs::read_dir(data_dir)
            .with_context(|| format!("Failed to list data directory: {}", data_dir.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter_map(|path| {
                let name = path.file_name()?.to_str()?.to_string();
                Some((name, path))
            })
            .collect();
        names.sort();

        let page = pick(
            data_dir,
            &names,
            "page",
            "*page.sql.gz",
            |n| n.contains("page") && !n.contains("pages-articles") && !n.contains("categorylinks"),
            |n| n.ends_with("page.sql.gz"),
        )?;
        let categorylinks = pick(
            data_dir,
            &names,
            "categorylinks",
            "*categorylinks*.sql.gz",
            |n| n.contains("categorylinks"),
            |n| n.ends_with(".sql.gz"),
        )?;
        let articles = pick(
            data_dir,
            &names,
            "pages-articles",
            "*pages-articles*.xml or *pages-articles*.xml.bz2",
            |n| n.contains("pages-articles"),
            |n| n.ends_with(".xml"),
        )
        .or_else(|_| {
            pick(
                data_dir,
                &names,
                "pages-articles",
                "*pages-articles*.xml or *pages-articles*.xml.bz2",
                |n| n.contains("pages-articles"),
                |n| n.ends_with(".xml.bz2"),
            )
        })?;

        let linktarget = names
            .iter()
            .filter(|(n, _)| n.contains("linktarget"))
            .find(|(n, _)| n.ends_with(".sql.gz") || n.ends_with(".sql"))
            .map(|(_, p)| p.clone());
        if linktarget.is_none() && names.iter().any(|(n, _)| n.contains("linktarget")) {
            warn!("Ignoring linktarget file that is not a .sql or .sql.gz dump");
        }

        let paths = Self {
            page,
            categorylinks,
            linktarget,
            articles,
        };
        info!(
            page = %paths.page.display(),
            categorylinks = %paths.categorylinks.display(),
            linktarget = ?paths.linktarget,
            articles = %paths.articles.display(),
            "Dumps located"
        );
        Ok(paths)
    }

    /// The SQL dumps whose contents determine the index cache.
    pub fn sql_dumps(&self) -> Vec<&Path> {
        let mut dumps = vec![self.page.as_path(), self.categorylinks.as_path()];
        if let Some(lt) = &self.linktarget {
            dumps.push(lt.as_path());
        }
        dumps
    }
}

fn pick(
    data_dir: &Path,
    names: &[(String, PathBuf)],
    kind: &'static str,
    expected: &'static str,
    is_kind: impl Fn(&str) -> bool,
    is_well_named: impl Fn(&str) -> bool,
) -> Result<PathBuf> {
    let mut candidates = names.iter().filter(|(n, _)| is_kind(n)).peekable();
    let Some((_, first)) = candidates.peek().copied() else {
        return Err(DumpError::DumpNotFound {
            kind,
            dir: data_dir.to_path_buf(),
        }
        .into());
    };
    match candidates.find(|(n, _)| is_well_named(n)) {
        Some((_, path)) => Ok(path.clone()),
        None => Err(DumpError::DumpMisnamed {
            kind,
            path: first.clone(),
            expected,
        }
        .into()),
    }
}
