use std::path::PathBuf;

use thiserror::Error;

/// Why a page raster did not make it into its frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderFault {
    #[error("engine failed to render page {page}: {detail}")]
    Engine { page: usize, detail: String },
    #[error("render job was cancelled")]
    Cancelled,
    #[error("render worker failed: {detail}")]
    Worker { detail: String },
}

impl RenderFault {
    pub fn engine(page: usize, err: &anyhow::Error) -> Self {
        RenderFault::Engine {
            page,
            detail: format!("{err:#}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}
