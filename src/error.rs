//! 同步运行的致命错误

use std::io;
use std::path::PathBuf;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 会终止本次运行的错误。
///
/// 远端时间戳查询失败和会话释放失败不在此列：前者按"远端不存在"处理，
/// 后者只记录日志。
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to read config {path}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config {path}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Config(String),

    #[error("failed to connect to {target}")]
    Connection {
        target: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to upload {local} to {remote}")]
    Upload {
        local: PathBuf,
        remote: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to walk local tree")]
    Walk(#[from] walkdir::Error),

    #[error("failed to read metadata of {path}")]
    LocalMetadata {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write progress output")]
    Output(#[source] io::Error),
}

impl SyncError {
    pub fn connection(target: impl Into<String>, err: anyhow::Error) -> Self {
        Self::Connection {
            target: target.into(),
            source: err.into(),
        }
    }

    pub fn upload(local: impl Into<PathBuf>, remote: impl Into<String>, err: anyhow::Error) -> Self {
        Self::Upload {
            local: local.into(),
            remote: remote.into(),
            source: err.into(),
        }
    }
}
