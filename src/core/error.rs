use std::path::PathBuf;

use thiserror::Error;

/// 缓存存储层错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("encode error: {0}")]
    Encode(String),

    #[error("invalid manifest: {0}")]
    Manifest(String),
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// 索引构建错误：只终止本次构建，旧版本继续服务
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("duplicate entry '{0}'")]
    DuplicateEntry(String),

    #[error("entry '{entry}' references missing parent '{parent}'")]
    MissingParent { entry: String, parent: String },

    #[error("inheritance cycle through entry '{0}'")]
    InheritanceCycle(String),

    #[error("empty pattern at line {0}")]
    EmptyPattern(usize),

    #[error("build cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// 外部 Updater 的传输错误：本轮放弃重建，不致命
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("updates are disabled")]
    Disabled,
}

/// 读取已发布索引时的错误
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("namespace not ready")]
    NotReady,

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt index: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// 更新（检查 + 重建 + 切换）路径上的错误汇总
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
