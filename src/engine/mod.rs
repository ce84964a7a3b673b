//! 查询编排：概率更新检查 → 在绑定版本上匹配 → 结构性失败时强制重建并重试一次。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::core::{
    DatasetVersion, EngineConfig, IndexError, Namespace, PropertiesRecord, StoreError,
    UpdateError,
};
use crate::index::{BuildOptions, IndexBuilder, IndexHandle};
use crate::query::{BrowserMatch, Matcher};
use crate::stats::{LookupReport, LookupStats};
use crate::storage::CacheStore;
use crate::update::{RandomSource, UpdatePolicy, Updater};

/// 一次 lookup 的终态
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LookupOutcome {
    Matched(BrowserMatch),
    /// 没有可用索引（从未构建、已损坏且无法重建）
    Empty,
}

impl LookupOutcome {
    pub fn is_empty(&self) -> bool {
        matches!(self, LookupOutcome::Empty)
    }

    pub fn properties(&self) -> Option<&PropertiesRecord> {
        match self {
            LookupOutcome::Matched(m) => Some(&m.properties),
            LookupOutcome::Empty => None,
        }
    }

    pub fn into_match(self) -> Option<BrowserMatch> {
        match self {
            LookupOutcome::Matched(m) => Some(m),
            LookupOutcome::Empty => None,
        }
    }
}

/// 引擎上下文：持有缓存、Updater 与当前版本指针，构造时注入，没有全局单例。
///
/// - 读路径：`current` 通过 ArcSwap 原子加载，lookup 全程绑定同一版本
/// - 写路径：`update_lock` 串行化重建；概率触发的检查 `try_lock` 失败即合并
/// - 指针只在新命名空间的 manifest 落盘之后才切换
pub struct Browscap {
    config: EngineConfig,
    policy: UpdatePolicy,
    store: Arc<CacheStore>,
    updater: Arc<dyn Updater>,
    current: ArcSwapOption<IndexHandle>,
    update_lock: Mutex<()>,
    rng: Mutex<Box<dyn RandomSource>>,
    background_in_progress: AtomicBool,
    cancel: Arc<AtomicBool>,
    stats: LookupStats,
}

impl Browscap {
    pub fn open(config: EngineConfig, updater: Arc<dyn Updater>) -> Result<Arc<Self>, StoreError> {
        Self::open_with_rng(config, updater, Box::new(StdRng::from_os_rng()))
    }

    /// 指定抽样源（测试里用固定种子或固定值）
    pub fn open_with_rng(
        config: EngineConfig,
        updater: Arc<dyn Updater>,
        rng: Box<dyn RandomSource>,
    ) -> Result<Arc<Self>, StoreError> {
        let store = Arc::new(CacheStore::new(config.cache_dir.clone()));
        let current = Self::load_current(&store, &config)?;

        Ok(Arc::new(Self {
            policy: UpdatePolicy::from_config(&config),
            config,
            store,
            updater,
            current: ArcSwapOption::new(current),
            update_lock: Mutex::new(()),
            rng: Mutex::new(rng),
            background_in_progress: AtomicBool::new(false),
            cancel: Arc::new(AtomicBool::new(false)),
            stats: LookupStats::default(),
        }))
    }

    /// 按版本指针打开已发布的命名空间；指针缺失、命名空间未就绪或分片布局不一致时以空状态启动
    fn load_current(
        store: &Arc<CacheStore>,
        config: &EngineConfig,
    ) -> Result<Option<Arc<IndexHandle>>, StoreError> {
        let dataset_type = config.dataset_type;
        let Some(version) = store.read_pointer(dataset_type)? else {
            tracing::info!("No published {} dataset yet, starting empty", dataset_type);
            return Ok(None);
        };
        let ns = Namespace::new(dataset_type, version);
        match IndexHandle::open(store.clone(), ns.clone()) {
            Ok(handle) if !same_layout(&handle, config) => {
                tracing::warn!(
                    "Namespace {} was built with {} entries per shard (configured {}), starting empty",
                    ns,
                    handle.manifest().shard_target_entries,
                    config.shard_target_entries
                );
                Ok(None)
            }
            Ok(handle) => {
                tracing::info!("Loaded dataset namespace {}", ns);
                Ok(Some(Arc::new(handle)))
            }
            Err(e) => {
                tracing::warn!("Namespace {} unusable ({}), starting empty", ns, e);
                Ok(None)
            }
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn current_handle(&self) -> Option<Arc<IndexHandle>> {
        self.current.load_full()
    }

    pub fn current_version(&self) -> Option<DatasetVersion> {
        self.current
            .load()
            .as_ref()
            .map(|h| h.namespace().version.clone())
    }

    pub fn stats(&self) -> LookupReport {
        self.stats.report()
    }

    /// 请求放弃正在进行的重建；之后的重建也会立即以 Cancelled 结束
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn lookup(self: &Arc<Self>, input: &str) -> LookupOutcome {
        LookupStats::bump(&self.stats.lookups);
        self.maybe_check_for_update();

        let bound = self.current.load_full();
        if let Some(m) = self.match_on(bound.as_ref(), input) {
            return self.matched(m);
        }

        if !self.policy.auto_update {
            tracing::debug!("No usable index and auto update disabled");
            return self.empty();
        }

        // 结构性失败：绕过概率门，强制重建后只重试一次
        let observed = bound.as_ref().map(|h| h.namespace().version.clone());
        LookupStats::bump(&self.stats.forced_rebuilds);
        if let Err(e) = self.forced_update(observed.as_ref()) {
            LookupStats::bump(&self.stats.rebuild_failures);
            tracing::warn!("Forced rebuild failed: {}", e);
        }

        let retry = self.current.load_full();
        match self.match_on(retry.as_ref(), input) {
            Some(m) => self.matched(m),
            None => self.empty(),
        }
    }

    fn matched(&self, m: BrowserMatch) -> LookupOutcome {
        LookupStats::bump(&self.stats.matched);
        if m.fallback {
            LookupStats::bump(&self.stats.fallback);
        }
        LookupOutcome::Matched(m)
    }

    fn empty(&self) -> LookupOutcome {
        LookupStats::bump(&self.stats.empty);
        LookupOutcome::Empty
    }

    /// `None` = 结构性失败（无索引、兜底行不可达或读取出错）
    fn match_on(&self, handle: Option<&Arc<IndexHandle>>, input: &str) -> Option<BrowserMatch> {
        let Some(handle) = handle else {
            tracing::debug!("No dataset loaded");
            return None;
        };
        match Matcher::new(handle.clone()).lookup_with_stats(input, Some(&self.stats)) {
            Ok(Some(m)) => Some(m),
            Ok(None) => {
                tracing::warn!("Sentinel unreachable in {}", handle.namespace());
                None
            }
            Err(e) => {
                tracing::warn!("Lookup failed on {}: {}", handle.namespace(), e);
                None
            }
        }
    }

    fn maybe_check_for_update(self: &Arc<Self>) {
        // 不可能命中时不碰抽样锁，并发 lookup 之间没有共享的串行点
        if !self.policy.may_check() {
            return;
        }
        let hit = {
            let mut rng = self.rng.lock();
            self.policy.roll(&mut **rng)
        };
        if !hit {
            return;
        }
        LookupStats::bump(&self.stats.update_checks);

        if self.config.background_updates {
            self.spawn_update(false);
            return;
        }
        if let Err(e) = self.checked_update() {
            LookupStats::bump(&self.stats.rebuild_failures);
            tracing::warn!("Update check failed: {}", e);
        }
    }

    /// 显式更新入口。
    ///
    /// - `force = false`：受检查间隔约束，且只有远端版本更新时才重建
    /// - `force = true`：无条件重建（等待期间若已有他人切换了版本则跳过）
    ///
    /// 返回新切换到的版本；什么都没做时返回 `None`。
    pub fn update(&self, force: bool) -> Result<Option<DatasetVersion>, UpdateError> {
        if force {
            let observed = self.current_version();
            self.forced_update(observed.as_ref())
        } else {
            self.checked_update()
        }
    }

    fn checked_update(&self) -> Result<Option<DatasetVersion>, UpdateError> {
        let Some(_guard) = self.update_lock.try_lock() else {
            tracing::debug!("Update already running, coalescing");
            return Ok(None);
        };

        let dataset_type = self.config.dataset_type;
        let now = unix_now();
        if !self
            .policy
            .interval_elapsed(self.store.read_last_check(dataset_type), now)
        {
            tracing::debug!("Update interval not elapsed, skipping check");
            return Ok(None);
        }
        self.store.write_last_check(dataset_type, now)?;

        let remote = self.updater.current_version()?;
        if let Some(current) = self.current_version() {
            if !remote.is_newer_than(&current) {
                tracing::debug!("Dataset {} is up to date (remote {})", current, remote);
                return Ok(None);
            }
        }
        self.publish(remote, false).map(Some)
    }

    fn forced_update(
        &self,
        observed: Option<&DatasetVersion>,
    ) -> Result<Option<DatasetVersion>, UpdateError> {
        let _guard = self.update_lock.lock();

        let now_current = self.current_version();
        if now_current.as_ref() != observed {
            tracing::info!(
                "Dataset switched to {:?} while waiting, skipping forced rebuild",
                now_current.map(|v| v.to_string())
            );
            return Ok(None);
        }

        let remote = self.updater.current_version()?;
        self.publish(remote, true).map(Some)
    }

    /// 构建（或复用已发布的）命名空间并切换指针。调用方必须持有 `update_lock`。
    fn publish(&self, version: DatasetVersion, rebuild: bool) -> Result<DatasetVersion, UpdateError> {
        let dataset_type = self.config.dataset_type;
        let ns = Namespace::new(dataset_type, version);

        if !rebuild {
            match IndexHandle::open(self.store.clone(), ns.clone()) {
                Ok(handle) if !same_layout(&handle, &self.config) => {
                    tracing::info!("Namespace {} has a different shard layout, rebuilding", ns);
                }
                Ok(handle) => {
                    tracing::info!("Reusing published namespace {}", ns);
                    return self.switch_to(handle);
                }
                Err(IndexError::NotReady) => {}
                Err(e) => return Err(e.into()),
            }
        }

        // 以与字节一起读出的版本为准，数据源在检查之后被替换时不会张冠李戴
        let (fetched, raw) = self
            .updater
            .fetch_versioned(dataset_type.source_identifier())?;
        let ns = if fetched == ns.version {
            ns
        } else {
            tracing::info!("Dataset source moved from {} to {} before fetch", ns.version, fetched);
            Namespace::new(dataset_type, fetched)
        };
        let (_, stats) = IndexBuilder::new(&self.store)
            .with_options(BuildOptions {
                shard_target_entries: self.config.shard_target_entries,
            })
            .with_cancel(self.cancel.clone())
            .build(&ns, &raw)?;
        tracing::debug!("\n{}", stats);

        let handle = IndexHandle::open(self.store.clone(), ns)?;
        self.switch_to(handle)
    }

    fn switch_to(&self, handle: IndexHandle) -> Result<DatasetVersion, UpdateError> {
        let version = handle.namespace().version.clone();
        self.store
            .write_pointer(self.config.dataset_type, &version)?;
        self.current.store(Some(Arc::new(handle)));
        LookupStats::bump(&self.stats.rebuilds);
        tracing::info!("Switched {} dataset to version {}", self.config.dataset_type, version);
        Ok(version)
    }

    /// 后台线程执行一次更新；已有后台更新在跑时直接跳过
    pub fn spawn_update(self: &Arc<Self>, force: bool) -> Option<JoinHandle<()>> {
        if self.background_in_progress.swap(true, Ordering::AcqRel) {
            tracing::debug!("Background update already in progress, skipping");
            return None;
        }

        let engine = self.clone();
        Some(std::thread::spawn(move || {
            match engine.update(force) {
                Ok(Some(v)) => tracing::info!("Background update published version {}", v),
                Ok(None) => tracing::debug!("Background update: nothing to do"),
                Err(e) => {
                    LookupStats::bump(&engine.stats.rebuild_failures);
                    tracing::warn!("Background update failed: {}", e);
                }
            }
            engine.background_in_progress.store(false, Ordering::Release);
        }))
    }

    /// 删除当前版本以外的命名空间
    pub fn prune_superseded(&self) -> Result<usize, StoreError> {
        let _guard = self.update_lock.lock();
        match self.current.load_full() {
            Some(handle) => self
                .store
                .prune_superseded(self.config.dataset_type, handle.namespace()),
            None => Ok(0),
        }
    }

    /// 清空该类型的全部缓存并回到空状态
    pub fn clear(&self) -> Result<usize, StoreError> {
        let _guard = self.update_lock.lock();
        self.current.store(None);
        self.store.clear(self.config.dataset_type)
    }
}

fn same_layout(handle: &IndexHandle, config: &EngineConfig) -> bool {
    handle.manifest().shard_target_entries == config.shard_target_entries as u64
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DatasetType, TransportError};
    use crate::index::bucket::SENTINEL_BUCKET;
    use crate::query::CandidatePatterns;
    use crate::storage::MANIFEST_NAME;
    use crate::update::{FixedDraw, NoUpdater};
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::AtomicU64;

    const CHROME: &str = "[Mozilla/5.0*Chrome*]\nbrowser=Chrome\n";

    fn unique_tmp_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("ua-index-engine-{}-{}", tag, nanos))
    }

    struct MemoryUpdater {
        state: Mutex<(DatasetVersion, Vec<u8>)>,
        fetches: AtomicU64,
    }

    impl MemoryUpdater {
        fn new(stamp: u64, data: &str) -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new((DatasetVersion::new(stamp, None), data.as_bytes().to_vec())),
                fetches: AtomicU64::new(0),
            })
        }

        fn set(&self, stamp: u64, data: &str) {
            *self.state.lock() = (DatasetVersion::new(stamp, None), data.as_bytes().to_vec());
        }

        fn fetches(&self) -> u64 {
            self.fetches.load(Ordering::Relaxed)
        }
    }

    impl Updater for MemoryUpdater {
        fn current_version(&self) -> Result<DatasetVersion, TransportError> {
            Ok(self.state.lock().0.clone())
        }

        fn fetch_raw_dataset(&self, _source: &str) -> Result<Vec<u8>, TransportError> {
            self.fetches.fetch_add(1, Ordering::Relaxed);
            Ok(self.state.lock().1.clone())
        }
    }

    fn quiet_config(dir: &Path) -> EngineConfig {
        EngineConfig {
            update_probability: 0.0,
            update_interval_secs: 0,
            ..EngineConfig::with_cache_dir(dir)
        }
    }

    fn browser(outcome: &LookupOutcome) -> Option<&str> {
        outcome
            .properties()
            .and_then(|p| p.get("browser"))
            .map(|s| s.as_str())
    }

    fn snapshot_dir(dir: &Path) -> BTreeMap<String, Vec<u8>> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap())
            .map(|e| {
                (
                    e.file_name().to_string_lossy().into_owned(),
                    std::fs::read(e.path()).unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn first_lookup_builds_and_matches() {
        let dir = unique_tmp_dir("first");
        let updater = MemoryUpdater::new(1, CHROME);
        let engine = Browscap::open(quiet_config(&dir), updater.clone()).unwrap();
        assert!(engine.current_version().is_none());

        let out = engine.lookup("Mozilla/5.0 (X11) Chrome/100");
        assert_eq!(browser(&out), Some("Chrome"));
        let m = out.into_match().unwrap();
        assert!(!m.fallback);
        assert_eq!(m.pattern, "Mozilla/5.0*Chrome*");

        // 无任何 pattern 命中：落到默认记录
        let out = engine.lookup("curl/7.0");
        let m = out.into_match().unwrap();
        assert!(m.fallback);
        assert!(m.properties.is_empty());

        let r = engine.stats();
        assert_eq!(r.lookups, 2);
        assert_eq!(r.matched, 2);
        assert_eq!(r.fallback, 1);
        assert_eq!(r.forced_rebuilds, 1);
        assert_eq!(updater.fetches(), 1);
        assert_eq!(engine.current_version(), Some(DatasetVersion::new(1, None)));
    }

    #[test]
    fn unavailable_updater_yields_empty() {
        let dir = unique_tmp_dir("unavailable");
        let engine = Browscap::open(quiet_config(&dir), Arc::new(NoUpdater)).unwrap();

        assert_eq!(engine.lookup("Mozilla/5.0"), LookupOutcome::Empty);
        assert_eq!(engine.lookup(""), LookupOutcome::Empty);

        let r = engine.stats();
        assert_eq!(r.empty, 2);
        assert_eq!(r.forced_rebuilds, 2);
        assert_eq!(r.rebuild_failures, 2);
    }

    #[test]
    fn disabled_auto_update_skips_forced_rebuild() {
        let dir = unique_tmp_dir("no-auto");
        let updater = MemoryUpdater::new(1, CHROME);
        let config = EngineConfig {
            auto_update: false,
            ..quiet_config(&dir)
        };
        let engine = Browscap::open(config, updater.clone()).unwrap();

        assert!(engine.lookup("Mozilla/5.0 Chrome").is_empty());
        assert_eq!(updater.fetches(), 0);
        assert_eq!(engine.stats().forced_rebuilds, 0);

        // 显式更新仍然可用
        engine.update(true).unwrap();
        assert_eq!(browser(&engine.lookup("Mozilla/5.0 Chrome")), Some("Chrome"));
    }

    #[test]
    fn reopen_uses_published_version() {
        let dir = unique_tmp_dir("reopen");
        let engine = Browscap::open(quiet_config(&dir), MemoryUpdater::new(7, CHROME)).unwrap();
        engine.update(true).unwrap();
        drop(engine);

        let engine = Browscap::open(quiet_config(&dir), Arc::new(NoUpdater)).unwrap();
        assert_eq!(engine.current_version(), Some(DatasetVersion::new(7, None)));
        assert_eq!(browser(&engine.lookup("Mozilla/5.0 Chrome/1")), Some("Chrome"));
        assert_eq!(engine.stats().forced_rebuilds, 0);
    }

    #[test]
    fn newer_version_leaves_old_namespace_untouched() {
        let dir = unique_tmp_dir("isolation");
        let updater = MemoryUpdater::new(1, CHROME);
        let engine = Browscap::open(quiet_config(&dir), updater.clone()).unwrap();
        assert_eq!(engine.update(false).unwrap(), Some(DatasetVersion::new(1, None)));

        let old_ns = Namespace::new(DatasetType::Default, DatasetVersion::new(1, None));
        let old_dir = engine.store().namespace_dir(&old_ns);
        let before = snapshot_dir(&old_dir);

        updater.set(2, "[Mozilla/5.0*Firefox*]\nbrowser=Firefox\n");
        assert_eq!(engine.update(false).unwrap(), Some(DatasetVersion::new(2, None)));
        assert_eq!(snapshot_dir(&old_dir), before);
        assert_eq!(browser(&engine.lookup("Mozilla/5.0 Firefox/1")), Some("Firefox"));

        // 远端没有更新的版本：什么都不做
        assert_eq!(engine.update(false).unwrap(), None);
        assert_eq!(updater.fetches(), 2);
    }

    #[test]
    fn interval_gate_applies_to_unforced_updates_only() {
        let dir = unique_tmp_dir("interval");
        let updater = MemoryUpdater::new(1, CHROME);
        let config = EngineConfig {
            update_interval_secs: 3600,
            ..quiet_config(&dir)
        };
        let engine = Browscap::open(config, updater.clone()).unwrap();

        assert!(engine.update(false).unwrap().is_some());
        updater.set(2, CHROME);
        assert_eq!(engine.update(false).unwrap(), None);
        assert_eq!(engine.update(true).unwrap(), Some(DatasetVersion::new(2, None)));
    }

    #[test]
    fn failed_rebuild_keeps_serving_previous_version() {
        let dir = unique_tmp_dir("failed");
        let updater = MemoryUpdater::new(1, CHROME);
        let engine = Browscap::open(quiet_config(&dir), updater.clone()).unwrap();
        engine.update(false).unwrap();

        updater.set(2, "[Foo*]\nParent=Missing\n");
        assert!(matches!(engine.update(false), Err(UpdateError::Build(_))));
        assert_eq!(engine.current_version(), Some(DatasetVersion::new(1, None)));
        assert_eq!(browser(&engine.lookup("Mozilla/5.0 Chrome")), Some("Chrome"));

        let failed_ns = Namespace::new(DatasetType::Default, DatasetVersion::new(2, None));
        assert!(!engine.store().exists(&failed_ns, MANIFEST_NAME));
        assert_eq!(
            engine.store().read_pointer(DatasetType::Default).unwrap(),
            Some(DatasetVersion::new(1, None))
        );
    }

    #[test]
    fn certain_probability_checks_every_lookup() {
        let dir = unique_tmp_dir("always");
        let updater = MemoryUpdater::new(1, CHROME);
        let config = EngineConfig {
            update_probability: 100.0,
            ..quiet_config(&dir)
        };
        let engine = Browscap::open_with_rng(config, updater.clone(), Box::new(FixedDraw(1))).unwrap();

        for _ in 0..3 {
            assert_eq!(browser(&engine.lookup("Mozilla/5.0 Chrome")), Some("Chrome"));
        }
        let r = engine.stats();
        assert_eq!(r.update_checks, 3);
        // 第一次检查就已经建好索引，不需要强制重建
        assert_eq!(r.forced_rebuilds, 0);
        assert_eq!(updater.fetches(), 1);
    }

    #[test]
    fn cancelled_engine_never_publishes() {
        let dir = unique_tmp_dir("cancel");
        let engine = Browscap::open(quiet_config(&dir), MemoryUpdater::new(1, CHROME)).unwrap();
        engine.cancel();

        assert!(engine.lookup("Mozilla/5.0 Chrome").is_empty());
        let ns = Namespace::new(DatasetType::Default, DatasetVersion::new(1, None));
        assert!(!engine.store().exists(&ns, MANIFEST_NAME));
        assert!(engine.store().read_pointer(DatasetType::Default).unwrap().is_none());
    }

    #[test]
    fn missing_sentinel_triggers_rebuild_of_same_version() {
        let dir = unique_tmp_dir("corrupt");
        let updater = MemoryUpdater::new(1, CHROME);
        let engine = Browscap::open(quiet_config(&dir), updater.clone()).unwrap();
        engine.update(true).unwrap();

        let handle = engine.current_handle().unwrap();
        for part in handle.manifest().parts_for(SENTINEL_BUCKET) {
            engine.store().delete(handle.namespace(), &part.file).unwrap();
        }

        let m = engine.lookup("curl/7.0").into_match().unwrap();
        assert!(m.fallback);
        assert_eq!(engine.stats().forced_rebuilds, 1);
        assert_eq!(updater.fetches(), 2);
    }

    #[test]
    fn lookup_in_flight_keeps_reading_its_version() {
        let dir = unique_tmp_dir("in-flight");
        let updater = MemoryUpdater::new(1, CHROME);
        let engine = Browscap::open(quiet_config(&dir), updater.clone()).unwrap();
        engine.update(true).unwrap();

        let handle = engine.current_handle().unwrap();
        let mut candidates = CandidatePatterns::new(&handle, "Mozilla/5.0 Chrome Firefox");
        let first = candidates.next().unwrap().unwrap();
        assert_eq!(first.pattern, "Mozilla/5.0*Chrome*");

        updater.set(2, "[Mozilla/5.0*Firefox*]\nbrowser=Firefox\n");
        assert_eq!(engine.update(true).unwrap(), Some(DatasetVersion::new(2, None)));

        let rest: Vec<String> = candidates.map(|e| e.unwrap().pattern).collect();
        assert_eq!(rest, vec!["*".to_string()]);

        let m = Matcher::new(handle).lookup("Mozilla/5.0 Chrome Firefox").unwrap().unwrap();
        assert_eq!(m.pattern, "Mozilla/5.0*Chrome*");
        assert_eq!(
            browser(&engine.lookup("Mozilla/5.0 Chrome Firefox")),
            Some("Firefox")
        );
    }

    #[test]
    fn shard_layout_change_rebuilds_namespace() {
        let dir = unique_tmp_dir("layout");
        let updater = MemoryUpdater::new(1, CHROME);
        let engine = Browscap::open(quiet_config(&dir), updater.clone()).unwrap();
        engine.update(true).unwrap();
        drop(engine);

        let config = EngineConfig {
            shard_target_entries: 1,
            ..quiet_config(&dir)
        };
        let engine = Browscap::open(config.clone(), updater.clone()).unwrap();
        assert!(engine.current_version().is_none());

        // 同一版本已发布，但布局不同：不复用，重新构建
        assert_eq!(engine.update(false).unwrap(), Some(DatasetVersion::new(1, None)));
        assert_eq!(updater.fetches(), 2);
        let handle = engine.current_handle().unwrap();
        assert_eq!(handle.manifest().shard_target_entries, 1);
        assert_eq!(browser(&engine.lookup("Mozilla/5.0 Chrome/1")), Some("Chrome"));
        drop(handle);
        drop(engine);

        let engine = Browscap::open(config, Arc::new(NoUpdater)).unwrap();
        assert_eq!(engine.current_version(), Some(DatasetVersion::new(1, None)));
    }

    #[test]
    fn zero_probability_lookup_skips_rng_lock() {
        let dir = unique_tmp_dir("rng-lock");
        let engine = Browscap::open(quiet_config(&dir), MemoryUpdater::new(1, CHROME)).unwrap();
        engine.update(true).unwrap();

        let guard = engine.rng.lock();
        let (tx, rx) = std::sync::mpsc::channel();
        let e = engine.clone();
        let worker = std::thread::spawn(move || {
            tx.send(e.lookup("Mozilla/5.0 Chrome/1")).unwrap();
        });
        let out = rx
            .recv_timeout(std::time::Duration::from_secs(10))
            .expect("lookup blocked on the sampling lock");
        drop(guard);
        worker.join().unwrap();
        assert_eq!(browser(&out), Some("Chrome"));
        assert_eq!(engine.stats().update_checks, 0);
    }

    /// 检查与取数之间数据源已经换成下一个版本
    struct MovingUpdater {
        fetches: AtomicU64,
    }

    impl Updater for MovingUpdater {
        fn current_version(&self) -> Result<DatasetVersion, TransportError> {
            Ok(DatasetVersion::new(1, None))
        }

        fn fetch_raw_dataset(&self, _source: &str) -> Result<Vec<u8>, TransportError> {
            Err(TransportError::Unavailable("use fetch_versioned".into()))
        }

        fn fetch_versioned(
            &self,
            _source: &str,
        ) -> Result<(DatasetVersion, Vec<u8>), TransportError> {
            self.fetches.fetch_add(1, Ordering::Relaxed);
            Ok((
                DatasetVersion::new(2, None),
                b"[Mozilla/5.0*Firefox*]\nbrowser=Firefox\n".to_vec(),
            ))
        }
    }

    #[test]
    fn namespace_follows_fetched_version() {
        let dir = unique_tmp_dir("moving");
        let updater = Arc::new(MovingUpdater {
            fetches: AtomicU64::new(0),
        });
        let engine = Browscap::open(quiet_config(&dir), updater.clone()).unwrap();

        assert_eq!(engine.update(false).unwrap(), Some(DatasetVersion::new(2, None)));
        assert_eq!(updater.fetches.load(Ordering::Relaxed), 1);
        assert_eq!(browser(&engine.lookup("Mozilla/5.0 Firefox/1")), Some("Firefox"));

        let v1 = Namespace::new(DatasetType::Default, DatasetVersion::new(1, None));
        let v2 = Namespace::new(DatasetType::Default, DatasetVersion::new(2, None));
        assert!(!engine.store().exists(&v1, MANIFEST_NAME));
        assert!(engine.store().exists(&v2, MANIFEST_NAME));
        assert_eq!(
            engine.store().read_pointer(DatasetType::Default).unwrap(),
            Some(DatasetVersion::new(2, None))
        );
    }

    #[test]
    fn background_update_switches_version() {
        let dir = unique_tmp_dir("background");
        let updater = MemoryUpdater::new(1, CHROME);
        let config = EngineConfig {
            background_updates: true,
            ..quiet_config(&dir)
        };
        let engine = Browscap::open(config, updater.clone()).unwrap();
        engine.update(true).unwrap();

        updater.set(2, CHROME);
        engine.spawn_update(false).unwrap().join().unwrap();
        assert_eq!(engine.current_version(), Some(DatasetVersion::new(2, None)));
    }

    #[test]
    fn prune_and_clear() {
        let dir = unique_tmp_dir("prune");
        let updater = MemoryUpdater::new(1, CHROME);
        let engine = Browscap::open(quiet_config(&dir), updater.clone()).unwrap();
        engine.update(true).unwrap();
        updater.set(2, CHROME);
        engine.update(true).unwrap();

        assert_eq!(engine.prune_superseded().unwrap(), 1);
        assert_eq!(engine.store().namespaces(DatasetType::Default).unwrap().len(), 1);

        assert_eq!(engine.clear().unwrap(), 1);
        assert!(engine.current_version().is_none());
        assert!(engine.store().read_pointer(DatasetType::Default).unwrap().is_none());
    }

    #[test]
    fn concurrent_lookups_share_one_version() {
        let dir = unique_tmp_dir("concurrent");
        let engine = Browscap::open(quiet_config(&dir), MemoryUpdater::new(1, CHROME)).unwrap();
        engine.update(true).unwrap();

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let engine = engine.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        let ua = format!("Mozilla/5.0 ({}-{}) Chrome/1", i, j);
                        assert_eq!(browser(&engine.lookup(&ua)), Some("Chrome"));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(engine.stats().matched, 400);
    }

    #[tokio::test]
    async fn lookup_from_blocking_tasks() {
        let dir = unique_tmp_dir("tokio");
        let engine = Browscap::open(quiet_config(&dir), MemoryUpdater::new(1, CHROME)).unwrap();

        let e = engine.clone();
        let first = tokio::task::spawn_blocking(move || e.lookup("Mozilla/5.0 Chrome/1"))
            .await
            .unwrap();
        assert_eq!(browser(&first), Some("Chrome"));

        let e = engine.clone();
        let second = tokio::task::spawn_blocking(move || e.lookup("Wget/1.0"))
            .await
            .unwrap();
        assert!(second.into_match().unwrap().fallback);
    }
}
