use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::{DatasetType, DatasetVersion, Namespace, StoreError};

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// 版本化缓存存储：`(类型, 版本, 名称) → bytes`。
///
/// - 物理位置由 `Namespace::dir_name()` 确定，不同版本绝不冲突
/// - 没有过期与淘汰：新旧判断靠版本比较，不靠 TTL
/// - 条目写入后不再原地修改；同一版本的并发写入字节相同，互相覆盖无害
/// - 类型级（不带版本）的条目只有两个：当前版本指针与上次检查时间
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn namespace_dir(&self, ns: &Namespace) -> PathBuf {
        ns.dir_in(&self.root)
    }

    pub fn path_of(&self, ns: &Namespace, name: &str) -> PathBuf {
        self.namespace_dir(ns).join(name)
    }

    pub fn put(&self, ns: &Namespace, name: &str, bytes: &[u8]) -> Result<(), StoreError> {
        write_atomic(&self.path_of(ns, name), bytes)
    }

    pub fn get(&self, ns: &Namespace, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        read_optional(&self.path_of(ns, name))
    }

    pub fn exists(&self, ns: &Namespace, name: &str) -> bool {
        self.path_of(ns, name).is_file()
    }

    pub fn delete(&self, ns: &Namespace, name: &str) -> Result<(), StoreError> {
        remove_optional(&self.path_of(ns, name))
    }

    /// 命名空间内的全部条目名（不含写入中的临时文件），按名称排序
    pub fn list(&self, ns: &Namespace) -> Result<Vec<String>, StoreError> {
        let dir = self.namespace_dir(ns);
        let rd = match fs::read_dir(&dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };

        let mut out = Vec::new();
        for ent in rd {
            let ent = ent.map_err(|e| StoreError::io(&dir, e))?;
            let name = ent.file_name().to_string_lossy().into_owned();
            let is_file = ent.file_type().map(|ft| ft.is_file()).unwrap_or(false);
            if is_file && !name.starts_with('.') {
                out.push(name);
            }
        }
        out.sort();
        Ok(out)
    }

    fn meta_path(&self, dataset_type: DatasetType, suffix: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}", dataset_type.cache_prefix(), suffix))
    }

    /// 读取当前版本指针（只在 manifest 落盘之后才会被写入）
    pub fn read_pointer(
        &self,
        dataset_type: DatasetType,
    ) -> Result<Option<DatasetVersion>, StoreError> {
        let path = self.meta_path(dataset_type, "current");
        let Some(bytes) = read_optional(&path)? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                tracing::warn!("Ignoring unreadable version pointer {:?}: {}", path, e);
                Ok(None)
            }
        }
    }

    pub fn write_pointer(
        &self,
        dataset_type: DatasetType,
        version: &DatasetVersion,
    ) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(version).map_err(|e| StoreError::Encode(e.to_string()))?;
        write_atomic(&self.meta_path(dataset_type, "current"), &bytes)
    }

    /// 上次非强制更新检查的 unix 秒
    pub fn read_last_check(&self, dataset_type: DatasetType) -> Option<u64> {
        let bytes = read_optional(&self.meta_path(dataset_type, "checked")).ok()??;
        std::str::from_utf8(&bytes).ok()?.trim().parse().ok()
    }

    pub fn write_last_check(&self, dataset_type: DatasetType, unix_secs: u64) -> Result<(), StoreError> {
        write_atomic(
            &self.meta_path(dataset_type, "checked"),
            unix_secs.to_string().as_bytes(),
        )
    }

    /// 列出该类型的全部命名空间目录（任意版本、任意引擎格式版本）
    pub fn namespaces(&self, dataset_type: DatasetType) -> Result<Vec<PathBuf>, StoreError> {
        let marker = format!("{}_v", dataset_type.cache_prefix());
        let rd = match fs::read_dir(&self.root) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.root, e)),
        };

        let mut out = Vec::new();
        for ent in rd {
            let ent = ent.map_err(|e| StoreError::io(&self.root, e))?;
            let is_dir = ent.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
            if is_dir && ent.file_name().to_string_lossy().starts_with(&marker) {
                out.push(ent.path());
            }
        }
        out.sort();
        Ok(out)
    }

    /// 删除除 `keep` 以外的所有命名空间（运维策略，引擎不会自动调用）
    pub fn prune_superseded(
        &self,
        dataset_type: DatasetType,
        keep: &Namespace,
    ) -> Result<usize, StoreError> {
        let keep_dir = self.namespace_dir(keep);
        let mut removed = 0;
        for dir in self.namespaces(dataset_type)? {
            if dir == keep_dir {
                continue;
            }
            fs::remove_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
            removed += 1;
        }
        Ok(removed)
    }

    /// 清空该类型的全部缓存（命名空间 + 指针 + 检查时间）
    pub fn clear(&self, dataset_type: DatasetType) -> Result<usize, StoreError> {
        let dirs = self.namespaces(dataset_type)?;
        let n = dirs.len();
        for dir in dirs {
            fs::remove_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        }
        remove_optional(&self.meta_path(dataset_type, "current"))?;
        remove_optional(&self.meta_path(dataset_type, "checked"))?;
        Ok(n)
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match fs::read(path) {
        Ok(b) => Ok(Some(b)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

fn remove_optional(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// 原子写入：tmp → fsync → rename → fsync(dir)。
///
/// tmp 文件名带进程号与序号，同一版本的并发构建者互不踩 tmp；
/// rename 之前崩溃时目标文件要么不存在、要么是上一次完整写入的内容。
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = path
        .parent()
        .ok_or_else(|| StoreError::Encode(format!("path without parent: {:?}", path)))?;
    fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;

    let file_name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = parent.join(format!(
        ".{}.tmp.{}.{}",
        file_name,
        std::process::id(),
        TMP_SEQ.fetch_add(1, Ordering::Relaxed)
    ));

    let write = || -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    };
    if let Err(e) = write() {
        let _ = fs::remove_file(&tmp_path);
        return Err(StoreError::io(path, e));
    }

    if let Ok(dir) = fs::File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}
