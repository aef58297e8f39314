//! 按解剖类别给出 PDFF 的合理范围, 并据此剔除迁移后的标签体素.

use std::fmt;
use std::str::FromStr;

use ndarray::ArrayView3;
use thiserror::Error;

use crate::consts::class::{tissue_types_mr, total_mr};
use crate::consts::{DEFAULT_MAX_PDFF, DEFAULT_MIN_PDFF};
use crate::{LabelValue, Volume};

/// 分割任务. 同一类别值在不同任务中代表不同的解剖结构.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    /// 全身 MR 分割 (肾脏掩膜也使用这一任务).
    TotalMr,

    /// 组织类型 MR 分割.
    TissueTypesMr,
}

impl Task {
    /// 任务名称.
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Task::TotalMr => "total_mr",
            Task::TissueTypesMr => "tissue_types_mr",
        }
    }
}

impl fmt::Display for Task {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 无法识别的任务名称.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown segmentation task: {0:?}")]
pub struct UnknownTask(pub String);

impl FromStr for Task {
    type Err = UnknownTask;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "total_mr" => Ok(Task::TotalMr),
            "tissue_types_mr" => Ok(Task::TissueTypesMr),
            _ => Err(UnknownTask(s.to_owned())),
        }
    }
}

/// PDFF 合理范围 `[min, max]`. `max` 可以为 `+inf`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdffRange {
    /// 下限 (含).
    pub min: f32,

    /// 上限 (含).
    pub max: f32,
}

impl Default for PdffRange {
    #[inline]
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN_PDFF,
            max: DEFAULT_MAX_PDFF,
        }
    }
}

impl PdffRange {
    /// `pdff` 是否未被剔除? 只有严格小于 `min` 或严格大于 `max` 的值被剔除, NaN 保留.
    #[inline]
    pub fn admits(&self, pdff: f32) -> bool {
        !(pdff < self.min || pdff > self.max)
    }
}

/// 获取任务 `task` 下类别 `class` 的 PDFF 合理范围.
///
/// - 默认 `[0.0, 0.4]`;
/// - `total_mr` 的肝脏和椎骨放宽至 `[0.0, 1.0]`;
/// - `tissue_types_mr` 的内脏脂肪和皮下脂肪放宽至 `[0.0, +inf)`.
pub fn admissible_range(task: Task, class: u32) -> PdffRange {
    let default = PdffRange::default();
    match task {
        Task::TotalMr if class == total_mr::LIVER as u32 || class == total_mr::VERTEBRAE as u32 => {
            PdffRange {
                max: 1.0,
                ..default
            }
        }
        Task::TissueTypesMr
            if class == tissue_types_mr::VISCERAL_FAT as u32
                || class == tissue_types_mr::SUBCUTANEOUS_FAT as u32 =>
        {
            PdffRange {
                min: 0.0,
                max: f32::INFINITY,
            }
        }
        _ => default,
    }
}

/// 将标签值转换为类别编号. 超出 `u32` 范围的值不可能命中任何放宽规则.
#[inline]
pub(crate) fn class_id<L: LabelValue>(label: L) -> u32 {
    label.to_u32().unwrap_or(u32::MAX)
}

/// 将 `pdff` 不在合理范围内的标签体素置为背景.
///
/// 返回过滤后的标签和被剔除的体素个数. 两者形状必须一致, 否则程序 panic.
pub fn filter_labels<L: LabelValue>(
    labels: &Volume<L>,
    pdff: &ArrayView3<f32>,
    task: Task,
) -> (Volume<L>, usize) {
    let mut removed = 0;
    let out = labels.zip_map(pdff, |&p, &f| {
        if p == L::zero() || admissible_range(task, class_id(p)).admits(f) {
            p
        } else {
            removed += 1;
            L::zero()
        }
    });
    (out, removed)
}
