//! 对 `pdff-berry::dataset` 的更一层封装. 从环境变量获取构建目录, 参考序列记录与待处理分组.

use pdff_berry::dataset::{self, Cohort, DixonRecord, RecordError};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// 获取构建目录.
///
/// 1. 若环境变量 `$PDFF_BUILD_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/iBEAt_Build`. 无法确定家目录时返回 `None`.
pub fn build_dir_from_env_or_home() -> Option<PathBuf> {
    match env::var("PDFF_BUILD_DIR") {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => dataset::home_dataset_dir_with(["iBEAt_Build"]),
    }
}

/// 获取参考序列记录文件路径.
///
/// 1. 若环境变量 `$PDFF_DIXON_RECORD` 非空, 则返回其值;
/// 2. 否则, 返回 `{build}/dixon-pdff/dixon_record.csv`.
pub fn dixon_record_path<P: AsRef<Path>>(build: P) -> PathBuf {
    match env::var("PDFF_DIXON_RECORD") {
        Ok(p) if !p.is_empty() => PathBuf::from(p),
        _ => build.as_ref().join("dixon-pdff").join("dixon_record.csv"),
    }
}

/// 加载参考序列记录.
#[inline]
pub fn dixon_record<P: AsRef<Path>>(build: P) -> Result<DixonRecord, RecordError> {
    DixonRecord::open(dixon_record_path(build))
}

/// 获取待处理的分组.
///
/// 若环境变量 `$PDFF_SITE` 非空, 只返回名称与之匹配的分组 (`Controls` 或中心名);
/// 否则返回全部分组.
pub fn cohorts_from_env() -> Vec<Cohort> {
    match env::var("PDFF_SITE") {
        Ok(s) if !s.is_empty() => Cohort::matching(s.trim()),
        _ => Cohort::all(),
    }
}

/// 流水线中可单独开关的阶段.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// 脂肪分数图.
    FatFraction,

    /// 掩膜对齐.
    Align,

    /// 肾脏测量.
    Measure,
}

impl Stage {
    /// 全部阶段, 按执行顺序排列.
    pub const ALL: [Stage; 3] = [Stage::FatFraction, Stage::Align, Stage::Measure];

    /// 阶段名.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::FatFraction => "fat_fraction",
            Stage::Align => "align",
            Stage::Measure => "measure",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 未知的阶段名.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown stage `{0}`")]
pub struct UnknownStage(pub String);

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownStage(s.to_owned()))
    }
}

/// 从逗号分隔的列表解析阶段, 结果按执行顺序排列并去重.
pub fn parse_stages(list: &str) -> Result<Vec<Stage>, UnknownStage> {
    let mut ans = list
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Stage::from_str)
        .collect::<Result<Vec<_>, _>>()?;
    ans.sort_unstable();
    ans.dedup();
    Ok(ans)
}

/// 获取要运行的阶段.
///
/// 若环境变量 `$PDFF_STAGES` 非空, 则按其值 (如 `align,measure`) 解析;
/// 否则运行全部阶段.
pub fn stages_from_env() -> Result<Vec<Stage>, UnknownStage> {
    match env::var("PDFF_STAGES") {
        Ok(s) if !s.trim().is_empty() => parse_stages(&s),
        _ => Ok(Stage::ALL.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stages() {
        assert_eq!(
            parse_stages("measure, Align,align").unwrap(),
            vec![Stage::Align, Stage::Measure]
        );
        assert!(parse_stages("").unwrap().is_empty());
        assert_eq!(
            parse_stages("align,segment"),
            Err(UnknownStage("segment".into()))
        );
    }

    #[test]
    fn test_dixon_record_path_default() {
        if env::var_os("PDFF_DIXON_RECORD").is_none() {
            assert_eq!(
                dixon_record_path("/build"),
                Path::new("/build/dixon-pdff/dixon_record.csv")
            );
        }
    }
}
