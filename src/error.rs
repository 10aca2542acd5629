use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure of one output tier during export.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("cannot create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV encoding failed for {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("console output failed: {0}")]
    Console(#[source] io::Error),

    #[error("every output tier failed ({} errors)", .0.len())]
    Exhausted(Vec<ExportError>),
}
