use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::{DatasetType, DatasetVersion, Namespace, StoreError, ENGINE_FORMAT_VERSION};
use crate::storage::cache::CacheStore;

/// manifest 文件名：命名空间内最后写入的文件（就绪标记）
pub const MANIFEST_NAME: &str = "manifest.bin";

/// Manifest Header
const MAGIC: u32 = 0x5549_4458; // "UIDX"
const STATE_COMMITTED: u32 = 0x0000_0001;
const HEADER_SIZE: usize = 4 + 4 + 4 + 4 + 4; // magic + format + state + data_len + checksum

/// 一个分片文件：同一 bucket 前缀下按行数切出的一段。
///
/// 热点 bucket 的连续行可以跨越相邻的多个分片。
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ShardPart {
    /// 该分片第一行的 bucket key
    pub first_bucket: String,
    /// 该分片最后一行的 bucket key
    pub last_bucket: String,
    pub file: String,
    pub entries: u32,
}

/// 命名空间就绪标记 + 分片目录。
///
/// 读者只有在 manifest 存在且校验通过时才把命名空间视为完整；
/// 构建者必须在全部分片与 Properties Store 落盘之后才写它。
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub dataset_type: DatasetType,
    pub version: DatasetVersion,
    /// 数据集自身声明的版本（`[GJK_Browscap_Version] Version=`）
    pub source_version: Option<String>,
    pub pattern_count: u64,
    pub record_count: u64,
    /// 构建时的分片目标行数（布局的一部分，复用命名空间前需一致）
    pub shard_target_entries: u64,
    /// bucket 前两位 → 按 first_bucket 升序的分片列表
    pub shards: BTreeMap<String, Vec<ShardPart>>,
}

impl Manifest {
    /// 可能包含 `bucket` 的全部分片，按文件顺序排列（通常只有一个）。
    ///
    /// 分片的 `[first_bucket, last_bucket]` 区间单调不减，二分即可截出连续的一段。
    pub fn parts_for(&self, bucket: &str) -> &[ShardPart] {
        let Some(parts) = bucket.get(..2).and_then(|g| self.shards.get(g)) else {
            return &[];
        };
        let start = parts.partition_point(|p| p.last_bucket.as_str() < bucket);
        let end = parts.partition_point(|p| p.first_bucket.as_str() <= bucket);
        if start >= end {
            return &[];
        }
        &parts[start..end]
    }

    pub fn shard_file_count(&self) -> usize {
        self.shards.values().map(|v| v.len()).sum()
    }

    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        let body = bincode::serialize(self).map_err(|e| StoreError::Encode(e.to_string()))?;
        let data_len: u32 = body
            .len()
            .try_into()
            .map_err(|_| StoreError::Encode(format!("manifest too large (>{} bytes)", u32::MAX)))?;

        let mut out = Vec::with_capacity(HEADER_SIZE + body.len());
        out.extend_from_slice(&MAGIC.to_le_bytes());
        out.extend_from_slice(&ENGINE_FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&STATE_COMMITTED.to_le_bytes());
        out.extend_from_slice(&data_len.to_le_bytes());
        out.extend_from_slice(&simple_checksum(&body).to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// 解码并校验 magic/format/state/len/checksum，任何不一致都拒绝
    pub fn decode(data: &[u8]) -> Result<Self, StoreError> {
        if data.len() < HEADER_SIZE {
            return Err(StoreError::Manifest("too small".into()));
        }
        let word = |i: usize| -> u32 {
            let mut b = [0u8; 4];
            b.copy_from_slice(&data[i..i + 4]);
            u32::from_le_bytes(b)
        };

        let magic = word(0);
        let format = word(4);
        let state = word(8);
        let data_len = word(12) as usize;
        let stored_checksum = word(16);

        if magic != MAGIC {
            return Err(StoreError::Manifest(format!(
                "magic mismatch: {:#x} != {:#x}",
                magic, MAGIC
            )));
        }
        if format != ENGINE_FORMAT_VERSION {
            return Err(StoreError::Manifest(format!(
                "format version {} != {}",
                format, ENGINE_FORMAT_VERSION
            )));
        }
        if state != STATE_COMMITTED {
            return Err(StoreError::Manifest("state not committed".into()));
        }

        let body = &data[HEADER_SIZE..];
        if body.len() != data_len {
            return Err(StoreError::Manifest("data length mismatch".into()));
        }
        let computed = simple_checksum(body);
        if computed != stored_checksum {
            return Err(StoreError::Manifest(format!(
                "checksum mismatch: {} != {}",
                computed, stored_checksum
            )));
        }

        bincode::deserialize(body).map_err(|e| StoreError::Manifest(e.to_string()))
    }

    /// 加载命名空间的 manifest。
    ///
    /// 缺失或校验失败都返回 `Ok(None)`（视为"尚未构建"，由上层决定是否重建）；
    /// 只有 I/O 错误才向上传播。
    pub fn load(store: &CacheStore, ns: &Namespace) -> Result<Option<Self>, StoreError> {
        let Some(data) = store.get(ns, MANIFEST_NAME)? else {
            return Ok(None);
        };
        match Self::decode(&data) {
            Ok(m) if m.dataset_type == ns.dataset_type && m.version == ns.version => Ok(Some(m)),
            Ok(m) => {
                tracing::warn!(
                    "Manifest in {} describes {}/{}, ignoring",
                    ns,
                    m.dataset_type,
                    m.version
                );
                Ok(None)
            }
            Err(e) => {
                tracing::warn!("Manifest in {} rejected: {}", ns, e);
                Ok(None)
            }
        }
    }
}

/// 简单校验和（非加密，仅用于完整性检测）
fn simple_checksum(data: &[u8]) -> u32 {
    let mut hash: u32 = 0;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut b = [0u8; 4];
        b.copy_from_slice(chunk);
        hash = hash.wrapping_add(u32::from_le_bytes(b)).rotate_left(7);
    }
    let rest = chunks.remainder();
    if !rest.is_empty() {
        let mut b = [0u8; 4];
        b[..rest.len()].copy_from_slice(rest);
        hash = hash.wrapping_add(u32::from_le_bytes(b)).rotate_left(7);
    }
    hash
}
