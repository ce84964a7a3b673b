use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;

use crate::core::{BuildError, Namespace, PatternEntry, PropertiesRecord};
use crate::index::bucket::{min_match_len, pattern_bucket, SENTINEL_BUCKET};
use crate::index::properties::{self, DEFAULT_RECORD_KEY};
use crate::index::shard::encode_line;
use crate::index::source::{self, CATCH_ALL};
use crate::stats::RebuildStats;
use crate::storage::{CacheStore, Manifest, ShardPart};

#[derive(Clone, Debug)]
pub struct BuildOptions {
    /// 单个分片文件的目标行数；超出后在下一个 bucket 边界切分
    pub shard_target_entries: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            shard_target_entries: 2_000,
        }
    }
}

/// 一个待写出的分片
struct ShardBlob {
    group: String,
    part: ShardPart,
    bytes: Vec<u8>,
}

/// 索引构建器：原始数据集 → 分片 + Properties Store + manifest。
///
/// 写入顺序：
/// 1) 解析 + 继承展开（纯内存，任何错误都在落盘前返回）
/// 2) 并行写全部分片
/// 3) 写 Properties Store
/// 4) 最后写 manifest（就绪标记）
///
/// 同一数据集 + 同一版本重复构建产生逐字节相同的文件。
pub struct IndexBuilder<'a> {
    store: &'a CacheStore,
    options: BuildOptions,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(store: &'a CacheStore) -> Self {
        Self {
            store,
            options: BuildOptions::default(),
            cancel: None,
        }
    }

    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    /// 置位后构建在下一个检查点放弃，永远不会写 manifest
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn check_cancel(&self) -> Result<(), BuildError> {
        match &self.cancel {
            Some(c) if c.load(Ordering::Relaxed) => Err(BuildError::Cancelled),
            _ => Ok(()),
        }
    }

    pub fn build(&self, ns: &Namespace, raw: &[u8]) -> Result<(Manifest, RebuildStats), BuildError> {
        let started = Instant::now();

        let parsed = source::parse(raw)?;
        let entry_count = parsed.entries.len();
        let resolved = source::resolve(parsed)?;
        self.check_cancel()?;

        // key 0 = 默认记录；叶子按文件顺序从 1 开始编号
        let mut records: Vec<(u32, &PropertiesRecord)> =
            Vec::with_capacity(resolved.patterns.len() + 1);
        records.push((DEFAULT_RECORD_KEY, &resolved.default_record));

        let mut entries: Vec<PatternEntry> = Vec::with_capacity(resolved.patterns.len() + 1);
        for (i, (pattern, record)) in resolved.patterns.iter().enumerate() {
            let key = (i + 1) as u32;
            records.push((key, record));
            entries.push(PatternEntry {
                bucket: pattern_bucket(pattern),
                min_len: min_match_len(pattern),
                properties_key: key,
                pattern: pattern.clone(),
            });
        }
        entries.push(PatternEntry {
            bucket: SENTINEL_BUCKET.to_string(),
            min_len: 0,
            properties_key: DEFAULT_RECORD_KEY,
            pattern: CATCH_ALL.to_string(),
        });

        // bucket 升序；同 bucket 内字面内容越长越靠前
        entries.sort_by(|a, b| {
            a.bucket
                .cmp(&b.bucket)
                .then_with(|| b.min_len.cmp(&a.min_len))
                .then_with(|| a.pattern.cmp(&b.pattern))
                .then_with(|| a.properties_key.cmp(&b.properties_key))
        });

        let blobs = self.layout_shards(&entries);
        let prop_files = properties::encode_files(&records)?;
        self.check_cancel()?;

        blobs.par_iter().try_for_each(|blob| {
            self.check_cancel()?;
            self.store.put(ns, &blob.part.file, &blob.bytes)?;
            Ok::<(), BuildError>(())
        })?;
        self.check_cancel()?;

        for (name, bytes) in &prop_files {
            self.store.put(ns, name, bytes)?;
        }
        self.check_cancel()?;

        let keep: HashSet<&str> = blobs
            .iter()
            .map(|b| b.part.file.as_str())
            .chain(prop_files.iter().map(|(n, _)| n.as_str()))
            .collect();
        let stale = self.remove_stale_files(ns, &keep)?;
        if stale > 0 {
            tracing::info!("Removed {} stale files from {}", stale, ns);
        }

        let mut shards: BTreeMap<String, Vec<ShardPart>> = BTreeMap::new();
        for blob in &blobs {
            shards
                .entry(blob.group.clone())
                .or_default()
                .push(blob.part.clone());
        }
        let manifest = Manifest {
            dataset_type: ns.dataset_type,
            version: ns.version.clone(),
            source_version: resolved.source_version.clone(),
            pattern_count: entries.len() as u64,
            record_count: records.len() as u64,
            shard_target_entries: self.options.shard_target_entries as u64,
            shards,
        };
        let manifest_bytes = manifest.encode()?;
        self.store
            .put(ns, crate::storage::MANIFEST_NAME, &manifest_bytes)?;

        let stats = RebuildStats {
            entries: entry_count,
            patterns: entries.len(),
            records: records.len(),
            shard_files: blobs.len(),
            properties_files: prop_files.len(),
            bytes_written: blobs.iter().map(|b| b.bytes.len() as u64).sum::<u64>()
                + prop_files.iter().map(|(_, b)| b.len() as u64).sum::<u64>()
                + manifest_bytes.len() as u64,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            "Index built for {}: {} patterns, {} records, {} shard files",
            ns,
            stats.patterns,
            stats.records,
            stats.shard_files
        );
        Ok((manifest, stats))
    }

    /// 按 bucket 前两位分组，组内每满目标行数切出一个新分片。
    ///
    /// 热点 bucket 的连续行可以跨越多个分片，manifest 记录每段的首尾 bucket。
    fn layout_shards(&self, sorted: &[PatternEntry]) -> Vec<ShardBlob> {
        let target = self.options.shard_target_entries.max(1);
        let mut blobs: Vec<ShardBlob> = Vec::new();
        let mut text = String::new();
        let mut current: Option<(String, ShardPart)> = None;
        let mut part_idx = 0usize;

        for entry in sorted {
            let group = &entry.bucket[..2];
            let (new_group, full) = match &current {
                Some((g, p)) => (g != group, p.entries as usize >= target),
                None => (true, false),
            };

            if new_group || full {
                flush_shard(&mut blobs, &mut current, &mut text);
                part_idx = if new_group { 0 } else { part_idx + 1 };
                current = Some((
                    group.to_string(),
                    ShardPart {
                        first_bucket: entry.bucket.clone(),
                        last_bucket: entry.bucket.clone(),
                        file: format!("patterns.{}.{:03}", group, part_idx),
                        entries: 0,
                    },
                ));
            }

            encode_line(entry, &mut text);
            if let Some((_, part)) = current.as_mut() {
                part.entries += 1;
                if part.last_bucket != entry.bucket {
                    part.last_bucket.clone_from(&entry.bucket);
                }
            }
        }
        flush_shard(&mut blobs, &mut current, &mut text);

        blobs
    }

    /// 删除命名空间里本次构建不再引用的分片与 properties 文件。
    ///
    /// 同一版本以不同的分片目标重建时，旧布局多出来的 part 会残留在目录里。
    fn remove_stale_files(&self, ns: &Namespace, keep: &HashSet<&str>) -> Result<usize, BuildError> {
        let mut removed = 0;
        for name in self.store.list(ns)? {
            let ours = name.starts_with("patterns.") || name.starts_with("properties.");
            if ours && !keep.contains(name.as_str()) {
                self.store.delete(ns, &name)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn flush_shard(blobs: &mut Vec<ShardBlob>, current: &mut Option<(String, ShardPart)>, text: &mut String) {
    if let Some((group, part)) = current.take() {
        blobs.push(ShardBlob {
            group,
            part,
            bytes: std::mem::take(text).into_bytes(),
        });
    }
}
