//! 数据集操作.
//!
//! 体数据按照 `location → patient → study → series` 层级寻址.
//! [`VolumeStore`] 是对这一层级存储的抽象, 流水线的每个阶段都只通过它读写数据.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::consts::SITES;
use crate::data::VolumeIoError;
use crate::{LabelVolume, ScalarVolume};

mod mem_store;
mod nifti_store;
pub mod record;

pub use mem_store::MemStore;
pub use nifti_store::NiftiStore;
pub use record::{DixonRecord, RecordError};

/// 获取 `{用户主目录}/dataset` 目录.
pub fn home_dataset_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    Some(ans)
}

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = home_dataset_dir()?;
    ans.extend(it);
    Some(ans)
}

/// 一个已采集或派生的图像序列的地址:
/// `(存储位置, patient, (study 描述, study 序号), (series 描述, series 序号))`.
///
/// 构建后不可变, 同时用作读地址和写地址.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey {
    location: PathBuf,
    patient: String,
    study: (String, u32),
    series: (String, u32),
}

impl SeriesKey {
    /// 构建序列地址.
    pub fn new<P: AsRef<Path>>(
        location: P,
        patient: &str,
        (study, study_index): (&str, u32),
        (series, series_index): (&str, u32),
    ) -> Self {
        Self {
            location: location.as_ref().to_owned(),
            patient: patient.to_owned(),
            study: (study.to_owned(), study_index),
            series: (series.to_owned(), series_index),
        }
    }

    /// 存储位置.
    #[inline]
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// 受试者 ID.
    #[inline]
    pub fn patient(&self) -> &str {
        &self.patient
    }

    /// study 描述.
    #[inline]
    pub fn study_desc(&self) -> &str {
        &self.study.0
    }

    /// study 序号.
    #[inline]
    pub fn study_index(&self) -> u32 {
        self.study.1
    }

    /// series 描述.
    #[inline]
    pub fn series_desc(&self) -> &str {
        &self.series.0
    }

    /// series 序号.
    #[inline]
    pub fn series_index(&self) -> u32 {
        self.series.1
    }

    /// 同一 study 下描述为 `series` (序号 0) 的序列.
    #[inline]
    pub fn sibling(&self, series: &str) -> Self {
        Self {
            location: self.location.clone(),
            patient: self.patient.clone(),
            study: self.study.clone(),
            series: (series.to_owned(), 0),
        }
    }

    /// 存储位置 `location` 中同一 patient, 同名 study (序号 0) 下描述为 `series`
    /// (序号 0) 的序列.
    pub fn relocated<P: AsRef<Path>>(&self, location: P, series: &str) -> Self {
        Self::new(location, &self.patient, (&self.study.0, 0), (series, 0))
    }

    /// 序列化为一行文本 (制表符分隔). 用于记录派生序列的来源.
    pub fn to_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            self.location.display(),
            self.patient,
            self.study.0,
            self.study.1,
            self.series.0,
            self.series.1
        )
    }

    /// 从 [`SeriesKey::to_line`] 生成的文本中恢复序列地址.
    ///
    /// 格式不正确时返回 `None`.
    pub fn from_line(line: &str) -> Option<Self> {
        let mut it = line.trim_end_matches(['\r', '\n']).split('\t');
        let location = it.next()?;
        let patient = it.next()?;
        let study = it.next()?;
        let study_index = it.next()?.parse().ok()?;
        let series = it.next()?;
        let series_index = it.next()?.parse().ok()?;
        if it.next().is_some() {
            return None;
        }
        Some(Self::new(
            location,
            patient,
            (study, study_index),
            (series, series_index),
        ))
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}_{}/{}_{} @ {}",
            self.patient,
            self.study.0,
            self.study.1,
            self.series.0,
            self.series.1,
            self.location.display()
        )
    }
}

/// 存储读写错误.
#[derive(Error, Debug)]
pub enum StoreError {
    /// 序列不存在.
    #[error("series not found: {0}")]
    Missing(SeriesKey),

    /// 底层 I/O 错误.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// 出错的路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: io::Error,
    },

    /// 体数据本身无法读写 (文件损坏, 维度不对等).
    #[error("cannot read or write {key}: {source}")]
    Volume {
        /// 出错的序列.
        key: SeriesKey,
        /// 底层错误.
        #[source]
        source: VolumeIoError,
    },

    /// 来源记录格式不正确.
    #[error("malformed provenance record: {0}")]
    Provenance(PathBuf),
}

impl StoreError {
    /// 包装底层 I/O 错误.
    #[inline]
    pub fn io<P: AsRef<Path>>(path: P) -> impl FnOnce(io::Error) -> Self {
        let path = path.as_ref().to_owned();
        move |source| Self::Io { path, source }
    }
}

/// 按 `location → patient → study → series` 寻址的体数据存储.
///
/// 所有写操作都会记录派生序列的来源序列 (`reference`).
/// 存储不提供进程间协调, 同一存储位置不支持并发运行.
pub trait VolumeStore {
    /// 确保存储位置 `location` 存在. 失败意味着路径配置有误.
    fn prepare(&mut self, location: &Path) -> Result<(), StoreError>;

    /// 列出 `location` 下的所有序列, 结果按地址升序排列.
    ///
    /// `location` 不存在时返回空列表.
    fn list_series(&self, location: &Path) -> Result<Vec<SeriesKey>, StoreError>;

    /// 序列是否存在?
    fn contains(&self, key: &SeriesKey) -> bool;

    /// 读取标量体数据.
    fn read_scalar(&self, key: &SeriesKey) -> Result<ScalarVolume, StoreError>;

    /// 读取标签体数据.
    fn read_labels(&self, key: &SeriesKey) -> Result<LabelVolume, StoreError>;

    /// 写入标量体数据, 并记录其来源序列 `reference`.
    fn write_scalar(
        &mut self,
        volume: &ScalarVolume,
        key: &SeriesKey,
        reference: &SeriesKey,
    ) -> Result<(), StoreError>;

    /// 写入标签体数据, 并记录其来源序列 `reference`.
    fn write_labels(
        &mut self,
        volume: &LabelVolume,
        key: &SeriesKey,
        reference: &SeriesKey,
    ) -> Result<(), StoreError>;

    /// 将 `src` 原样复制到 `dst`. `dst` 的来源记录为 `src`.
    fn copy_series(&mut self, src: &SeriesKey, dst: &SeriesKey) -> Result<(), StoreError>;

    /// 获取派生序列的来源序列. 原始序列返回 `None`.
    fn provenance(&self, key: &SeriesKey) -> Result<Option<SeriesKey>, StoreError>;
}

/// 受试者分组. 对照组不分中心, 病人组按中心划分.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Cohort {
    /// 健康对照组.
    Controls,

    /// 某个中心的病人组.
    Patients(String),
}

impl Cohort {
    /// 所有分组: 先是各中心的病人组, 最后是对照组.
    pub fn all() -> Vec<Cohort> {
        SITES
            .iter()
            .map(|s| Cohort::Patients(s.to_string()))
            .chain(std::iter::once(Cohort::Controls))
            .collect()
    }

    /// 按照名称 (`Controls` 或中心名) 过滤分组, 大小写不敏感.
    pub fn matching(filter: &str) -> Vec<Cohort> {
        Self::all()
            .into_iter()
            .filter(|c| c.name().eq_ignore_ascii_case(filter))
            .collect()
    }

    /// 分组名称. 病人组使用中心名.
    #[inline]
    pub fn name(&self) -> &str {
        match self {
            Cohort::Controls => "Controls",
            Cohort::Patients(site) => site.as_str(),
        }
    }

    /// 获取阶段目录 `{build}/{stage...}/{Controls | Patients/site}`.
    pub fn stage_dir<P: AsRef<Path>>(&self, build: P, stage: &[&str]) -> PathBuf {
        let mut ans = build.as_ref().to_owned();
        ans.extend(stage);
        match self {
            Cohort::Controls => ans.push("Controls"),
            Cohort::Patients(site) => {
                ans.push("Patients");
                ans.push(site);
            }
        }
        ans
    }
}

impl fmt::Display for Cohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cohort::Controls => write!(f, "Controls"),
            Cohort::Patients(site) => write!(f, "Patients ({site})"),
        }
    }
}
