use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::core::{DatasetVersion, TransportError};

/// 外部数据源：告知最新版本并提供原始数据集。
///
/// 任何 `TransportError` 都只表示“本轮无法重建”，由调用方降级处理。
pub trait Updater: Send + Sync {
    fn current_version(&self) -> Result<DatasetVersion, TransportError>;

    /// `source` 为数据集类型对应的源标识（如 `PHP_BrowscapINI`）
    fn fetch_raw_dataset(&self, source: &str) -> Result<Vec<u8>, TransportError>;

    /// 一次取回数据集及其版本，构建时以这里的版本命名命名空间。
    ///
    /// 默认实现先后调用 `current_version` 与 `fetch_raw_dataset`；两次调用之间
    /// 数据源被替换时，返回的版本可能与字节不对应。能从同一份读取中得到两者的实现应覆盖它。
    fn fetch_versioned(&self, source: &str) -> Result<(DatasetVersion, Vec<u8>), TransportError> {
        let version = self.current_version()?;
        let raw = self.fetch_raw_dataset(source)?;
        Ok((version, raw))
    }
}

/// 从本地 INI 文件更新：版本 = 文件 mtime（秒）。
///
/// 同一秒内的两次改写得到相同版本，后一次不会被 `current_version` 视为更新；
/// 需要强制重建时用 `update(true)`。
#[derive(Clone, Debug)]
pub struct LocalFileUpdater {
    path: PathBuf,
}

impl LocalFileUpdater {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io(&self, e: std::io::Error) -> TransportError {
        TransportError::Io {
            path: self.path.clone(),
            source: e,
        }
    }

    fn stamp(modified: SystemTime) -> Result<DatasetVersion, TransportError> {
        let secs = modified
            .duration_since(UNIX_EPOCH)
            .map_err(|e| TransportError::Unavailable(format!("mtime before epoch: {}", e)))?
            .as_secs();
        Ok(DatasetVersion::new(secs, None))
    }
}

impl Updater for LocalFileUpdater {
    fn current_version(&self) -> Result<DatasetVersion, TransportError> {
        let meta = std::fs::metadata(&self.path).map_err(|e| self.io(e))?;
        let modified = meta.modified().map_err(|e| self.io(e))?;
        Self::stamp(modified)
    }

    fn fetch_raw_dataset(&self, source: &str) -> Result<Vec<u8>, TransportError> {
        tracing::debug!("Reading {} from {:?}", source, self.path);
        std::fs::read(&self.path).map_err(|e| self.io(e))
    }

    /// 版本与内容来自同一个文件句柄；读取期间文件被改写则本轮放弃
    fn fetch_versioned(&self, source: &str) -> Result<(DatasetVersion, Vec<u8>), TransportError> {
        tracing::debug!("Reading {} from {:?}", source, self.path);
        let mut file = File::open(&self.path).map_err(|e| self.io(e))?;
        let before = file
            .metadata()
            .and_then(|m| m.modified())
            .map_err(|e| self.io(e))?;

        let mut raw = Vec::new();
        file.read_to_end(&mut raw).map_err(|e| self.io(e))?;

        let after = file
            .metadata()
            .and_then(|m| m.modified())
            .map_err(|e| self.io(e))?;
        if before != after {
            return Err(TransportError::Unavailable(format!(
                "{} changed while being read",
                self.path.display()
            )));
        }
        Ok((Self::stamp(before)?, raw))
    }
}

/// 禁用更新：只使用已经在缓存里的版本
#[derive(Clone, Copy, Debug, Default)]
pub struct NoUpdater;

impl Updater for NoUpdater {
    fn current_version(&self) -> Result<DatasetVersion, TransportError> {
        Err(TransportError::Disabled)
    }

    fn fetch_raw_dataset(&self, _source: &str) -> Result<Vec<u8>, TransportError> {
        Err(TransportError::Disabled)
    }
}
