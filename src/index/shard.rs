use std::io::BufRead;

use crate::core::{IndexError, PatternEntry};
use crate::index::bucket::BUCKET_WIDTH;

/// 长度字段固定 4 位（十进制）
const LEN_WIDTH: usize = 4;
const LEN_MAX: usize = 9_999;
/// properties key 固定 8 位（十进制）
const KEY_WIDTH: usize = 8;

const LEN_OFF: usize = BUCKET_WIDTH + 1;
const KEY_OFF: usize = LEN_OFF + LEN_WIDTH + 1;
const PATTERN_OFF: usize = KEY_OFF + KEY_WIDTH + 1;

/// `<bucket:32> <len:04> <key:08> <pattern>\n`
///
/// 长度被截到 9999：只会让更短的输入也去尝试匹配，不影响正确性。
pub fn encode_line(entry: &PatternEntry, out: &mut String) {
    use std::fmt::Write;
    let _ = writeln!(
        out,
        "{} {:0lw$} {:0kw$} {}",
        entry.bucket,
        entry.min_len.min(LEN_MAX),
        entry.properties_key,
        entry.pattern,
        lw = LEN_WIDTH,
        kw = KEY_WIDTH,
    );
}

/// 只取 bucket 列，不解析其余字段
fn line_bucket(line: &str) -> Option<&str> {
    line.get(..BUCKET_WIDTH)
}

pub fn decode_line(line: &str) -> Option<PatternEntry> {
    let line = line.trim_end_matches(|c: char| c == '\n' || c == '\r');
    let bytes = line.as_bytes();
    if bytes.len() < PATTERN_OFF
        || bytes[BUCKET_WIDTH] != b' '
        || bytes[KEY_OFF - 1] != b' '
        || bytes[PATTERN_OFF - 1] != b' '
    {
        return None;
    }
    Some(PatternEntry {
        bucket: line_bucket(line)?.to_string(),
        min_len: line.get(LEN_OFF..LEN_OFF + LEN_WIDTH)?.parse().ok()?,
        properties_key: line.get(KEY_OFF..KEY_OFF + KEY_WIDTH)?.parse().ok()?,
        pattern: line.get(PATTERN_OFF..)?.to_string(),
    })
}

/// 在一个已排序的分片里流式扫描某个 bucket 的行。
///
/// - 小于目标 key 的行只比较前 32 字节就跳过
/// - 命中后连续产出；第一次遇到更大的 key 即停止（排序保证同 key 连续）
/// - 不把整个分片读进内存
pub struct ShardScan<R: BufRead> {
    reader: R,
    bucket: String,
    buf: String,
    done: bool,
}

impl<R: BufRead> ShardScan<R> {
    pub fn new(reader: R, bucket: &str) -> Self {
        Self {
            reader,
            bucket: bucket.to_string(),
            buf: String::new(),
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for ShardScan<R> {
    type Item = Result<PatternEntry, IndexError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.buf.clear();
            match self.reader.read_line(&mut self.buf) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    let Some(key) = line_bucket(&self.buf) else {
                        self.done = true;
                        return Some(Err(IndexError::Corrupt(format!(
                            "short shard line: {:?}",
                            self.buf.trim_end()
                        ))));
                    };
                    match key.cmp(self.bucket.as_str()) {
                        std::cmp::Ordering::Less => continue,
                        std::cmp::Ordering::Greater => self.done = true,
                        std::cmp::Ordering::Equal => {
                            return Some(decode_line(&self.buf).ok_or_else(|| {
                                self.done = true;
                                IndexError::Corrupt(format!(
                                    "malformed shard line: {:?}",
                                    self.buf.trim_end()
                                ))
                            }));
                        }
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(IndexError::Io {
                        path: std::path::PathBuf::new(),
                        source: e,
                    }));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn entry(bucket: &str, min_len: usize, key: u32, pattern: &str) -> PatternEntry {
        PatternEntry {
            bucket: bucket.to_string(),
            min_len,
            properties_key: key,
            pattern: pattern.to_string(),
        }
    }

    fn shard(entries: &[PatternEntry]) -> String {
        let mut s = String::new();
        for e in entries {
            encode_line(e, &mut s);
        }
        s
    }

    #[test]
    fn line_layout_is_fixed_width() {
        let mut s = String::new();
        encode_line(&entry(&"a".repeat(32), 17, 42, "Mozilla/5.0 *Chrome*"), &mut s);
        assert_eq!(
            s,
            format!("{} 0017 00000042 Mozilla/5.0 *Chrome*\n", "a".repeat(32))
        );
        let back = decode_line(&s).unwrap();
        assert_eq!(back.pattern, "Mozilla/5.0 *Chrome*");
        assert_eq!(back.min_len, 17);
        assert_eq!(back.properties_key, 42);
    }

    #[test]
    fn oversized_length_is_clamped() {
        let mut s = String::new();
        encode_line(&entry(&"b".repeat(32), 123_456, 1, "x"), &mut s);
        assert_eq!(decode_line(&s).unwrap().min_len, 9_999);
    }

    #[test]
    fn scan_yields_contiguous_run_then_stops() {
        let a = "a".repeat(32);
        let b = "b".repeat(32);
        let c = "c".repeat(32);
        let text = shard(&[
            entry(&a, 1, 1, "a1"),
            entry(&b, 5, 2, "b1"),
            entry(&b, 3, 3, "b2"),
            entry(&c, 1, 4, "c1"),
        ]);
        // 故意在 c 之后追加一行 b：扫描应在遇到 c 时停止，看不到它
        let text = format!("{}{}", text, shard(&[entry(&b, 1, 5, "late")]));

        let got: Vec<String> = ShardScan::new(Cursor::new(text), &b)
            .map(|r| r.unwrap().pattern)
            .collect();
        assert_eq!(got, vec!["b1", "b2"]);
    }

    #[test]
    fn scan_of_absent_bucket_is_empty() {
        let text = shard(&[entry(&"a".repeat(32), 1, 1, "a1")]);
        assert_eq!(ShardScan::new(Cursor::new(text), &"b".repeat(32)).count(), 0);
    }

    #[test]
    fn malformed_line_in_run_is_corrupt() {
        let b = "b".repeat(32);
        let text = format!("{} garbage\n", b);
        let mut scan = ShardScan::new(Cursor::new(text), &b);
        assert!(matches!(scan.next(), Some(Err(IndexError::Corrupt(_)))));
        assert!(scan.next().is_none());
    }
}
