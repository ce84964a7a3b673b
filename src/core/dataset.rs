use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// 引擎自身的落盘格式版本：变更分片/manifest 编码时必须递增，
/// 即使数据集内容不变也会落到新的命名空间，从而强制重建。
pub const ENGINE_FORMAT_VERSION: u32 = 2;

/// 数据集变体（决定缓存命名空间与向 Updater 请求的源标识）
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetType {
    #[default]
    Default,
    Small,
    Large,
}

impl DatasetType {
    /// 缓存前缀（目录名与指针文件名共用）
    pub fn cache_prefix(self) -> &'static str {
        match self {
            DatasetType::Default => "browscap",
            DatasetType::Small => "smallbrowscap",
            DatasetType::Large => "largebrowscap",
        }
    }

    /// 向 Updater 请求原始数据时使用的源标识
    pub fn source_identifier(self) -> &'static str {
        match self {
            DatasetType::Default => "PHP_BrowscapINI",
            DatasetType::Small => "Lite_PHP_BrowscapINI",
            DatasetType::Large => "Full_PHP_BrowscapINI",
        }
    }
}

impl std::str::FromStr for DatasetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(DatasetType::Default),
            "small" | "lite" => Ok(DatasetType::Small),
            "large" | "full" => Ok(DatasetType::Large),
            other => Err(format!("unknown dataset type '{}'", other)),
        }
    }
}

impl fmt::Display for DatasetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DatasetType::Default => "default",
            DatasetType::Small => "small",
            DatasetType::Large => "large",
        })
    }
}

/// 数据集版本：来源时间戳 + 可选的源版本号。
///
/// 只比较 `stamp` 判断新旧；`number` 仅参与命名空间区分。
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct DatasetVersion {
    pub stamp: u64,
    pub number: Option<u64>,
}

impl DatasetVersion {
    pub fn new(stamp: u64, number: Option<u64>) -> Self {
        Self { stamp, number }
    }

    pub fn is_newer_than(&self, other: &DatasetVersion) -> bool {
        self.stamp > other.stamp
    }
}

impl fmt::Display for DatasetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.number {
            Some(n) => write!(f, "{}-{}", self.stamp, n),
            None => write!(f, "{}", self.stamp),
        }
    }
}

/// (数据集类型, 数据集版本, 引擎格式版本) 三元组：一个不可变的缓存命名空间
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Namespace {
    pub dataset_type: DatasetType,
    pub version: DatasetVersion,
}

impl Namespace {
    pub fn new(dataset_type: DatasetType, version: DatasetVersion) -> Self {
        Self {
            dataset_type,
            version,
        }
    }

    /// 命名空间目录名，例如 `browscap_v1700000000-6001008_f2`
    pub fn dir_name(&self) -> String {
        format!(
            "{}_v{}_f{}",
            self.dataset_type.cache_prefix(),
            self.version,
            ENGINE_FORMAT_VERSION
        )
    }

    pub fn dir_in(&self, root: &Path) -> PathBuf {
        root.join(self.dir_name())
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dir_name())
    }
}

/// 完全展开（无继承引用）的属性记录：属性名 → 字符串值。
///
/// BTreeMap 保证序列化顺序稳定（同一输入 ⇒ 同一字节）。
pub type PropertiesRecord = BTreeMap<String, String>;

/// 分片中的一行
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PatternEntry {
    pub bucket: String,
    pub min_len: usize,
    pub properties_key: u32,
    pub pattern: String,
}
