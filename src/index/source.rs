//! 原始数据集（browscap INI）解析与继承展开。
//!
//! 构建期把"条目树 + Parent 继承"完全展开成扁平的属性记录，
//! 查询期不再保留任何继承关系。

use std::collections::{HashMap, HashSet};

use crate::core::{BuildError, PropertiesRecord};

/// 版本元数据段，不是条目
pub const VERSION_SECTION: &str = "GJK_Browscap_Version";
/// 公共父条目，永远不作为 pattern
pub const DEFAULT_PROPERTIES: &str = "DefaultProperties";
/// 兜底条目的 pattern
pub const CATCH_ALL: &str = "*";

const PARENT_KEY: &str = "Parent";

#[derive(Clone, Debug)]
pub struct RawEntry {
    pub name: String,
    pub line: usize,
    /// 按声明顺序保留（同名 key 后者覆盖前者）
    pub properties: Vec<(String, String)>,
}

impl RawEntry {
    pub fn parent(&self) -> Option<&str> {
        self.properties
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(PARENT_KEY))
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }
}

#[derive(Clone, Debug, Default)]
pub struct RawDataset {
    /// `[GJK_Browscap_Version] Version=`
    pub source_version: Option<String>,
    pub released: Option<String>,
    pub entries: Vec<RawEntry>,
}

/// 展开后的数据集：默认记录 + 叶子 pattern（保持文件顺序）
#[derive(Clone, Debug)]
pub struct ResolvedDataset {
    pub source_version: Option<String>,
    pub default_record: PropertiesRecord,
    pub patterns: Vec<(String, PropertiesRecord)>,
}

fn unquote(v: &str) -> &str {
    let v = v.trim();
    if v.len() >= 2 && v.starts_with('"') && v.ends_with('"') {
        &v[1..v.len() - 1]
    } else {
        v
    }
}

pub fn parse(raw: &[u8]) -> Result<RawDataset, BuildError> {
    let text = std::str::from_utf8(raw).map_err(|e| BuildError::Parse {
        line: 0,
        message: format!("dataset is not valid UTF-8: {}", e),
    })?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut out = RawDataset::default();
    let mut seen: HashSet<String> = HashSet::new();
    // None：尚未进入任何段；Some(None)：位于版本段；Some(Some(i))：位于条目 i
    let mut current: Option<Option<usize>> = None;

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }

        if let Some(rest) = line.strip_prefix('[') {
            let name = rest.strip_suffix(']').ok_or_else(|| BuildError::Parse {
                line: line_no,
                message: format!("unterminated section header {:?}", line),
            })?;
            if name.is_empty() {
                return Err(BuildError::EmptyPattern(line_no));
            }
            if name == VERSION_SECTION {
                current = Some(None);
                continue;
            }
            if !seen.insert(name.to_string()) {
                return Err(BuildError::DuplicateEntry(name.to_string()));
            }
            out.entries.push(RawEntry {
                name: name.to_string(),
                line: line_no,
                properties: Vec::new(),
            });
            current = Some(Some(out.entries.len() - 1));
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            return Err(BuildError::Parse {
                line: line_no,
                message: format!("expected 'key=value', got {:?}", line),
            });
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(BuildError::Parse {
                line: line_no,
                message: "empty property name".into(),
            });
        }
        let value = unquote(value).to_string();

        match current {
            None => {
                return Err(BuildError::Parse {
                    line: line_no,
                    message: format!("property '{}' outside of any section", key),
                })
            }
            Some(None) => match key {
                "Version" => out.source_version = Some(value),
                "Released" => out.released = Some(value),
                _ => {}
            },
            Some(Some(i)) => out.entries[i].properties.push((key.to_string(), value)),
        }
    }

    Ok(out)
}

const UNVISITED: u8 = 0;
const VISITING: u8 = 1;
const DONE: u8 = 2;

struct Resolver<'a> {
    entries: &'a [RawEntry],
    by_name: HashMap<&'a str, usize>,
    state: Vec<u8>,
    resolved: Vec<Option<PropertiesRecord>>,
}

impl<'a> Resolver<'a> {
    fn new(entries: &'a [RawEntry]) -> Self {
        let by_name = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name.as_str(), i))
            .collect();
        Self {
            entries,
            by_name,
            state: vec![UNVISITED; entries.len()],
            resolved: vec![None; entries.len()],
        }
    }

    /// 自顶向下：父记录完全展开后再用子条目自己的声明覆盖
    fn resolve(&mut self, i: usize) -> Result<PropertiesRecord, BuildError> {
        match self.state[i] {
            DONE => {
                return self.resolved[i]
                    .clone()
                    .ok_or_else(|| BuildError::InheritanceCycle(self.entries[i].name.clone()))
            }
            VISITING => return Err(BuildError::InheritanceCycle(self.entries[i].name.clone())),
            _ => {}
        }
        self.state[i] = VISITING;

        let entries = self.entries;
        let entry = &entries[i];
        let mut record = match entry.parent() {
            Some(parent) => {
                let Some(&p) = self.by_name.get(parent) else {
                    return Err(BuildError::MissingParent {
                        entry: entry.name.clone(),
                        parent: parent.to_string(),
                    });
                };
                self.resolve(p)?
            }
            None => PropertiesRecord::new(),
        };
        for (k, v) in &entry.properties {
            record.insert(k.clone(), v.clone());
        }

        self.state[i] = DONE;
        self.resolved[i] = Some(record.clone());
        Ok(record)
    }
}

/// 展开继承并挑出叶子 pattern。
///
/// 任何缺失父条目或循环继承都会让整次构建失败（不产出部分结果）。
pub fn resolve(raw: RawDataset) -> Result<ResolvedDataset, BuildError> {
    let mut resolver = Resolver::new(&raw.entries);
    let mut records = Vec::with_capacity(raw.entries.len());
    for i in 0..raw.entries.len() {
        records.push(resolver.resolve(i)?);
    }

    let parents: HashSet<&str> = raw.entries.iter().filter_map(|e| e.parent()).collect();

    let mut default_record = None;
    let mut fallback_record = None;
    let mut patterns = Vec::new();
    for (entry, record) in raw.entries.iter().zip(records) {
        match entry.name.as_str() {
            CATCH_ALL => default_record = Some(record),
            DEFAULT_PROPERTIES => fallback_record = Some(record),
            name if !parents.contains(name) => patterns.push((entry.name.clone(), record)),
            _ => {}
        }
    }

    Ok(ResolvedDataset {
        source_version: raw.source_version,
        default_record: default_record.or(fallback_record).unwrap_or_default(),
        patterns,
    })
}
