//! Dixon 参考序列记录.
//!
//! 同一次检查中往往采集了多组 Dixon 序列, 其中只有一组被选为参考序列,
//! 人工标注的掩膜都画在参考序列上.
//! 记录文件为逗号分隔的文本, 每行 `patient,study,sequence`.
//! `#` 开头的行和以 `patient` 开头的表头行会被忽略.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;

/// 读取参考序列记录错误.
#[derive(Error, Debug)]
pub enum RecordError {
    /// 文件无法读取.
    #[error("cannot read dixon record: {0}")]
    Io(#[from] io::Error),

    /// 第 `line` 行 (从 1 开始) 不是 `patient,study,sequence` 格式.
    #[error("malformed dixon record at line {line}: {content:?}")]
    Malformed {
        /// 行号.
        line: usize,
        /// 原始内容.
        content: String,
    },
}

/// `(patient, study) → 参考序列名` 的查找表.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DixonRecord {
    table: HashMap<(String, String), String>,
}

impl DixonRecord {
    /// 创建空记录.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 从文件读取记录.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RecordError> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// 从文本解析记录. 同一 `(patient, study)` 出现多次时以最后一次为准.
    pub fn parse(text: &str) -> Result<Self, RecordError> {
        let mut ans = Self::new();
        for (i, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with("patient") {
                continue;
            }
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            match fields.as_slice() {
                [patient, study, sequence] if !patient.is_empty() && !sequence.is_empty() => {
                    ans.insert(patient, study, sequence);
                }
                _ => {
                    return Err(RecordError::Malformed {
                        line: i + 1,
                        content: raw.to_owned(),
                    })
                }
            }
        }
        Ok(ans)
    }

    /// 登记 `(patient, study)` 的参考序列.
    pub fn insert(&mut self, patient: &str, study: &str, sequence: &str) {
        self.table.insert(
            (patient.to_owned(), study.to_owned()),
            sequence.to_owned(),
        );
    }

    /// 查找 `(patient, study)` 的参考序列.
    pub fn reference(&self, patient: &str, study: &str) -> Option<&str> {
        self.table
            .get(&(patient.to_owned(), study.to_owned()))
            .map(String::as_str)
    }

    /// 记录条数.
    #[inline]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// 记录是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let text = "patient,study,sequence\n\
                    # comment\n\
                    \n\
                    1128_003, Baseline, Dixon_1\n\
                    1128_004,Baseline,Dixon_2\n\
                    1128_003,Baseline,Dixon_3\n";
        let r = DixonRecord::parse(text).unwrap();
        assert_eq!(r.len(), 2);
        assert_eq!(r.reference("1128_003", "Baseline"), Some("Dixon_3"));
        assert_eq!(r.reference("1128_004", "Baseline"), Some("Dixon_2"));
        assert_eq!(r.reference("1128_004", "Followup"), None);
    }

    #[test]
    fn test_malformed_line() {
        let err = DixonRecord::parse("a,b,c\nonly,two\n").unwrap_err();
        match err {
            RecordError::Malformed { line, content } => {
                assert_eq!(line, 2);
                assert_eq!(content, "only,two");
            }
            _ => panic!("unexpected error: {err}"),
        }
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            DixonRecord::open(dir.path().join("none.csv")),
            Err(RecordError::Io(_))
        ));
    }
}
