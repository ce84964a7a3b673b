use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::core::DatasetType;

/// 引擎配置（可从 TOML 加载，缺省字段取默认值）
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 缓存根目录
    pub cache_dir: PathBuf,
    pub dataset_type: DatasetType,
    /// 关闭后：既不做概率检查，也不做结构性失败后的强制重建
    pub auto_update: bool,
    /// 每次 lookup 触发更新检查的概率（百分比）
    pub update_probability: f64,
    /// 两次非强制检查之间的最小间隔（秒）
    pub update_interval_secs: u64,
    /// 概率命中的重建放到后台线程执行
    pub background_updates: bool,
    /// 单个分片文件的目标行数（超出则按 bucket 边界切分）
    pub shard_target_entries: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            dataset_type: DatasetType::Default,
            auto_update: true,
            update_probability: 1.0,
            update_interval_secs: 432_000,
            background_updates: false,
            shard_target_entries: 2_000,
        }
    }
}

impl EngineConfig {
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("ua-index")
}
