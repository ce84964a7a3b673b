use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// 单次索引构建的统计
#[derive(Clone, Debug, Default)]
pub struct RebuildStats {
    /// 原始数据集中的条目数（不含版本段）
    pub entries: usize,
    /// 写入分片的 pattern 数（含兜底行）
    pub patterns: usize,
    /// Properties Store 中的记录数（含默认记录）
    pub records: usize,
    pub shard_files: usize,
    pub properties_files: usize,
    /// 写入的总字节数（分片 + properties + manifest）
    pub bytes_written: u64,
    pub elapsed: Duration,
}

/// 查询侧计数器（无锁，多线程共享）
#[derive(Debug, Default)]
pub struct LookupStats {
    pub lookups: AtomicU64,
    pub matched: AtomicU64,
    /// 命中兜底记录的次数
    pub fallback: AtomicU64,
    pub empty: AtomicU64,
    pub shards_opened: AtomicU64,
    pub update_checks: AtomicU64,
    pub rebuilds: AtomicU64,
    pub forced_rebuilds: AtomicU64,
    pub rebuild_failures: AtomicU64,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LookupReport {
    pub lookups: u64,
    pub matched: u64,
    pub fallback: u64,
    pub empty: u64,
    pub shards_opened: u64,
    pub update_checks: u64,
    pub rebuilds: u64,
    pub forced_rebuilds: u64,
    pub rebuild_failures: u64,
}

impl LookupStats {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report(&self) -> LookupReport {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        LookupReport {
            lookups: get(&self.lookups),
            matched: get(&self.matched),
            fallback: get(&self.fallback),
            empty: get(&self.empty),
            shards_opened: get(&self.shards_opened),
            update_checks: get(&self.update_checks),
            rebuilds: get(&self.rebuilds),
            forced_rebuilds: get(&self.forced_rebuilds),
            rebuild_failures: get(&self.rebuild_failures),
        }
    }
}

fn human_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

impl fmt::Display for RebuildStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "╔══════════════════════════════════════════════════╗")?;
        writeln!(f, "║           ua-index Build Report                  ║")?;
        writeln!(f, "╠══════════════════════════════════════════════════╣")?;
        writeln!(f, "║   entries:      {:>10}                       ║", self.entries)?;
        writeln!(f, "║   patterns:     {:>10}                       ║", self.patterns)?;
        writeln!(f, "║   records:      {:>10}                       ║", self.records)?;
        writeln!(f, "║   shard files:  {:>10}                       ║", self.shard_files)?;
        writeln!(
            f,
            "║   prop files:   {:>10}                       ║",
            self.properties_files
        )?;
        writeln!(
            f,
            "║   written:      {:>10}                       ║",
            human_bytes(self.bytes_written)
        )?;
        writeln!(
            f,
            "║   elapsed:      {:>8}ms                       ║",
            self.elapsed.as_millis()
        )?;
        writeln!(f, "╚══════════════════════════════════════════════════╝")?;
        Ok(())
    }
}

impl fmt::Display for LookupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "╔══════════════════════════════════════════════════╗")?;
        writeln!(f, "║           ua-index Lookup Report                 ║")?;
        writeln!(f, "╠══════════════════════════════════════════════════╣")?;
        writeln!(f, "║   lookups:      {:>10}                       ║", self.lookups)?;
        writeln!(f, "║   matched:      {:>10}                       ║", self.matched)?;
        writeln!(f, "║   fallback:     {:>10}                       ║", self.fallback)?;
        writeln!(f, "║   empty:        {:>10}                       ║", self.empty)?;
        writeln!(f, "║   shards read:  {:>10}                       ║", self.shards_opened)?;
        writeln!(f, "╠──────────────────────────────────────────────────╣")?;
        writeln!(f, "║   checks:       {:>10}                       ║", self.update_checks)?;
        writeln!(f, "║   rebuilds:     {:>10}                       ║", self.rebuilds)?;
        writeln!(f, "║   forced:       {:>10}                       ║", self.forced_rebuilds)?;
        writeln!(
            f,
            "║   failures:     {:>10}                       ║",
            self.rebuild_failures
        )?;
        writeln!(f, "╚══════════════════════════════════════════════════╝")?;
        Ok(())
    }
}
