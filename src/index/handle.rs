use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;

use crate::core::{IndexError, Namespace, PatternEntry, PropertiesRecord};
use crate::index::properties;
use crate::index::shard::ShardScan;
use crate::storage::{CacheStore, Manifest};

/// 已发布命名空间的只读视图。
///
/// lookup 开始时从 ArcSwap 取出一个 `Arc<IndexHandle>` 并一直用到结束，
/// 期间即使发生版本切换也不会读到另一个命名空间。
pub struct IndexHandle {
    store: Arc<CacheStore>,
    ns: Namespace,
    manifest: Manifest,
}

impl IndexHandle {
    /// 打开命名空间：manifest 缺失或校验失败即视为未就绪
    pub fn open(store: Arc<CacheStore>, ns: Namespace) -> Result<Self, IndexError> {
        let manifest = Manifest::load(&store, &ns)?.ok_or(IndexError::NotReady)?;
        Ok(Self {
            store,
            ns,
            manifest,
        })
    }

    pub fn namespace(&self) -> &Namespace {
        &self.ns
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// 流式扫描 `bucket` 的全部行；没有任何分片覆盖该 bucket 时返回 `None`（正常情况）
    pub fn scan_bucket(&self, bucket: &str) -> Option<BucketScan> {
        let paths: Vec<PathBuf> = self
            .manifest
            .parts_for(bucket)
            .iter()
            .map(|part| self.store.path_of(&self.ns, &part.file))
            .collect();
        if paths.is_empty() {
            return None;
        }
        Some(BucketScan {
            bucket: bucket.to_string(),
            paths: paths.into_iter(),
            current: None,
        })
    }

    pub fn record(&self, key: u32) -> Result<Option<PropertiesRecord>, IndexError> {
        properties::read_record(&self.store, &self.ns, key)
    }
}

/// 一个 bucket 的连续行，可能横跨多个相邻分片；按分片顺序依次打开，一次只持有一个 reader
pub struct BucketScan {
    bucket: String,
    paths: std::vec::IntoIter<PathBuf>,
    current: Option<ShardScan<BufReader<File>>>,
}

impl Iterator for BucketScan {
    type Item = Result<PatternEntry, IndexError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(scan) = self.current.as_mut() {
                match scan.next() {
                    Some(item) => return Some(item),
                    None => self.current = None,
                }
            }

            let path = self.paths.next()?;
            match File::open(&path) {
                Ok(f) => {
                    tracing::debug!("Scanning {:?} for bucket {}", path, self.bucket);
                    self.current = Some(ShardScan::new(BufReader::new(f), &self.bucket));
                }
                // 分片文件缺失：当作该段没有行
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Some(Err(IndexError::Io { path, source: e })),
            }
        }
    }
}
