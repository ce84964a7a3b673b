//! bucket key 推导：构建期对 pattern 取一个，查询期对输入取一串。
//!
//! 两侧必须使用完全相同的规则（小写化、截断长度、哈希），
//! 否则 pattern 会落在查询永远不会访问的 bucket 里。

use xxhash_rust::xxh3::xxh3_128;

/// 参与哈希的前缀最大字节数
pub const PATTERN_START_LIMIT: usize = 32;

/// bucket key 的固定宽度（32 位十六进制）
pub const BUCKET_WIDTH: usize = 32;

/// 兜底 bucket：字典序大于任何十六进制 key，保证排在分片末尾
pub const SENTINEL_BUCKET: &str = "zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz";

fn is_wildcard(b: u8) -> bool {
    b == b'*' || b == b'?'
}

/// 对（已小写的）前缀字节取 bucket key
pub fn bucket_key(prefix: &[u8]) -> String {
    format!("{:032x}", xxh3_128(prefix))
}

/// pattern 的字面前缀：小写化后截到第一个通配符，再截到 `PATTERN_START_LIMIT` 字节
pub fn pattern_start(pattern: &str) -> Vec<u8> {
    pattern
        .bytes()
        .take_while(|b| !is_wildcard(*b))
        .take(PATTERN_START_LIMIT)
        .map(|b| b.to_ascii_lowercase())
        .collect()
}

pub fn pattern_bucket(pattern: &str) -> String {
    bucket_key(&pattern_start(pattern))
}

/// 输入至少要有的字节数：去掉所有 `*` 后的长度（`?` 计 1）
pub fn min_match_len(pattern: &str) -> usize {
    pattern.bytes().filter(|b| *b != b'*').count()
}

/// 查询候选 bucket，越具体越靠前：
/// 输入前缀从长到短 → 空前缀（以通配符开头的 pattern）→ 兜底 bucket。
pub fn candidate_buckets(input: &str) -> Vec<String> {
    let lowered: Vec<u8> = input
        .bytes()
        .take(PATTERN_START_LIMIT)
        .map(|b| b.to_ascii_lowercase())
        .collect();

    let mut out = Vec::with_capacity(lowered.len() + 2);
    for n in (1..=lowered.len()).rev() {
        out.push(bucket_key(&lowered[..n]));
    }
    out.push(bucket_key(&[]));
    out.push(SENTINEL_BUCKET.to_string());
    out
}
