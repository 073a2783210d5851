use std::path::PathBuf;
use thiserror::Error;

/// Conditions that stop a run before any page is processed.
#[derive(Debug, Error)]
pub enum DumpError {
    #[error("data directory does not exist: {}", .0.display())]
    DataDirMissing(PathBuf),

    #[error("no {kind} dump found in {}", .dir.display())]
    DumpNotFound { kind: &'static str, dir: PathBuf },

    #[error("{kind} dump {} has the wrong name (expected {expected})", .path.display())]
    DumpMisnamed {
        kind: &'static str,
        path: PathBuf,
        expected: &'static str,
    },

    #[error(
        "categorylinks dump {} uses cl_target_id but no linktarget dump was provided; \
         the category closure cannot be computed",
        .0.display()
    )]
    LinkTargetRequired(PathBuf),

    #[error("table `{table}` has neither {column} nor a usable replacement")]
    MissingColumn {
        table: String,
        column: &'static str,
    },
}
