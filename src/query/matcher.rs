use std::sync::Arc;

use wildmatch::WildMatch;

use crate::core::{IndexError, PatternEntry, PropertiesRecord};
use crate::index::bucket::{candidate_buckets, SENTINEL_BUCKET};
use crate::index::handle::BucketScan;
use crate::index::IndexHandle;
use crate::stats::LookupStats;

/// 通配符匹配抽象（输入已统一小写）
pub trait WildcardMatcher: Send + Sync {
    /// 判断整串是否匹配
    fn matches(&self, lowered: &str) -> bool;
    /// 通配符前的固定前缀（如果有）
    fn prefix(&self) -> Option<&str> {
        None
    }
}

/// 无通配符：整串相等
pub struct ExactMatcher {
    pattern: String,
}

impl ExactMatcher {
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_ascii_lowercase(),
        }
    }
}

impl WildcardMatcher for ExactMatcher {
    fn matches(&self, lowered: &str) -> bool {
        self.pattern == lowered
    }

    fn prefix(&self) -> Option<&str> {
        Some(&self.pattern)
    }
}

/// 通配符匹配：`*` 任意长度，`?` 恰好一个字符
pub struct GlobMatcher {
    wild: WildMatch,
    prefix: Option<String>,
}

impl GlobMatcher {
    pub fn new(pattern: &str) -> Self {
        let lowered = pattern.to_ascii_lowercase();
        // 提取通配符前的固定前缀
        let prefix = lowered
            .split(|c| c == '*' || c == '?')
            .next()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());

        Self {
            wild: WildMatch::new(&lowered),
            prefix,
        }
    }
}

impl WildcardMatcher for GlobMatcher {
    fn matches(&self, lowered: &str) -> bool {
        if let Some(p) = &self.prefix {
            if !lowered.starts_with(p.as_str()) {
                return false;
            }
        }
        self.wild.matches(lowered)
    }

    fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }
}

/// 匹配器工厂与自动识别
pub fn compile(pattern: &str) -> Box<dyn WildcardMatcher> {
    if pattern.contains('*') || pattern.contains('?') {
        Box::new(GlobMatcher::new(pattern))
    } else {
        Box::new(ExactMatcher::new(pattern))
    }
}

/// 一次成功匹配
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BrowserMatch {
    /// 命中的通配符 pattern
    pub pattern: String,
    pub properties: PropertiesRecord,
    /// 是否落到兜底记录
    pub fallback: bool,
}

/// 惰性、有序的候选 pattern 序列。
///
/// 按候选 bucket（最具体优先）逐个扫描，一次只持有一个分片的 reader；
/// `min_len` 大于输入长度的行直接跳过，不参与通配符测试。
pub struct CandidatePatterns<'a> {
    handle: &'a IndexHandle,
    buckets: std::vec::IntoIter<String>,
    scan: Option<BucketScan>,
    input_len: usize,
    stats: Option<&'a LookupStats>,
}

impl<'a> CandidatePatterns<'a> {
    pub fn new(handle: &'a IndexHandle, input: &str) -> Self {
        Self {
            handle,
            buckets: candidate_buckets(input).into_iter(),
            scan: None,
            input_len: input.len(),
            stats: None,
        }
    }

    pub fn with_stats(mut self, stats: &'a LookupStats) -> Self {
        self.stats = Some(stats);
        self
    }
}

impl<'a> Iterator for CandidatePatterns<'a> {
    type Item = Result<PatternEntry, IndexError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(scan) = self.scan.as_mut() {
                match scan.next() {
                    Some(Ok(entry)) if entry.min_len > self.input_len => continue,
                    Some(item) => return Some(item),
                    None => self.scan = None,
                }
            }

            let bucket = self.buckets.next()?;
            // 该 bucket 没有 pattern：继续下一个候选
            if let Some(scan) = self.handle.scan_bucket(&bucket) {
                if let Some(s) = self.stats {
                    LookupStats::bump(&s.shards_opened);
                }
                self.scan = Some(scan);
            }
        }
    }
}

/// 针对一个已绑定版本的匹配器
pub struct Matcher {
    handle: Arc<IndexHandle>,
}

impl Matcher {
    pub fn new(handle: Arc<IndexHandle>) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &Arc<IndexHandle> {
        &self.handle
    }

    pub fn lookup(&self, input: &str) -> Result<Option<BrowserMatch>, IndexError> {
        self.lookup_with_stats(input, None)
    }

    /// 第一个命中的 pattern 即最佳匹配。
    ///
    /// 返回 `Ok(None)` 表示连兜底行都没有命中：索引不完整，属于结构性失败。
    pub fn lookup_with_stats(
        &self,
        input: &str,
        stats: Option<&LookupStats>,
    ) -> Result<Option<BrowserMatch>, IndexError> {
        let lowered = input.to_ascii_lowercase();
        let mut candidates = CandidatePatterns::new(&self.handle, input);
        if let Some(s) = stats {
            candidates = candidates.with_stats(s);
        }

        for entry in candidates {
            let entry = entry?;
            if !compile(&entry.pattern).matches(&lowered) {
                continue;
            }
            let Some(properties) = self.handle.record(entry.properties_key)? else {
                return Err(IndexError::Corrupt(format!(
                    "pattern {:?} references missing properties {}",
                    entry.pattern, entry.properties_key
                )));
            };
            return Ok(Some(BrowserMatch {
                fallback: entry.bucket == SENTINEL_BUCKET,
                pattern: entry.pattern,
                properties,
            }));
        }
        Ok(None)
    }
}
