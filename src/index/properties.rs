use std::fs::File;
use std::io::{BufRead, BufReader};

use crate::core::{IndexError, Namespace, PropertiesRecord, StoreError};
use crate::storage::CacheStore;

/// 每个 properties 文件容纳的记录数
pub const RECORDS_PER_FILE: u32 = 250;

/// 默认（兜底）记录固定占用 key 0
pub const DEFAULT_RECORD_KEY: u32 = 0;

const KEY_WIDTH: usize = 8;

pub fn file_name(key: u32) -> String {
    format!("properties.{:04}", key / RECORDS_PER_FILE)
}

/// 把按 key 升序的记录切成若干文件；每行 `<key:08> <json>\n`
pub fn encode_files(
    records: &[(u32, &PropertiesRecord)],
) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
    let mut out: Vec<(String, Vec<u8>)> = Vec::new();
    for (key, record) in records {
        let name = file_name(*key);
        if out.last().map(|(n, _)| n != &name).unwrap_or(true) {
            out.push((name, Vec::new()));
        }
        let Some((_, buf)) = out.last_mut() else {
            continue;
        };
        let json = serde_json::to_string(record).map_err(|e| StoreError::Encode(e.to_string()))?;
        buf.extend_from_slice(format!("{:0w$} ", key, w = KEY_WIDTH).as_bytes());
        buf.extend_from_slice(json.as_bytes());
        buf.push(b'\n');
    }
    Ok(out)
}

/// 读取单条记录：只打开对应的一个文件，逐行找到 key 即停
pub fn read_record(
    store: &CacheStore,
    ns: &Namespace,
    key: u32,
) -> Result<Option<PropertiesRecord>, IndexError> {
    let path = store.path_of(ns, &file_name(key));
    let file = match File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(IndexError::Io { path, source: e }),
    };

    let wanted = format!("{:0w$} ", key, w = KEY_WIDTH);
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| IndexError::Io {
            path: path.clone(),
            source: e,
        })?;
        if let Some(json) = line.strip_prefix(&wanted) {
            let record = serde_json::from_str(json)
                .map_err(|e| IndexError::Corrupt(format!("properties {}: {}", key, e)))?;
            return Ok(Some(record));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DatasetType, DatasetVersion};

    fn unique_tmp_dir(tag: &str) -> std::path::PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("ua-index-props-{}-{}", tag, nanos))
    }

    fn record(browser: &str) -> PropertiesRecord {
        let mut r = PropertiesRecord::new();
        r.insert("Browser".into(), browser.into());
        r
    }

    #[test]
    fn records_split_across_files_by_key() {
        let a = record("A");
        let b = record("B");
        let files = encode_files(&[(0, &a), (1, &b), (RECORDS_PER_FILE, &a)]).unwrap();
        let names: Vec<&str> = files.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["properties.0000", "properties.0001"]);
        assert_eq!(
            String::from_utf8(files[0].1.clone()).unwrap(),
            "00000000 {\"Browser\":\"A\"}\n00000001 {\"Browser\":\"B\"}\n"
        );
    }

    #[test]
    fn read_record_finds_key_or_none() {
        let store = CacheStore::new(unique_tmp_dir("read"));
        let ns = Namespace::new(DatasetType::Default, DatasetVersion::new(1, None));
        let a = record("A");
        let b = record("B");
        for (name, bytes) in encode_files(&[(0, &a), (7, &b)]).unwrap() {
            store.put(&ns, &name, &bytes).unwrap();
        }

        assert_eq!(read_record(&store, &ns, 7).unwrap(), Some(b));
        assert_eq!(read_record(&store, &ns, 8).unwrap(), None);
        assert_eq!(read_record(&store, &ns, 9_999).unwrap(), None);
    }
}
