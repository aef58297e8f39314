//! 标签迁移.
//!
//! 形变是在灰度图像上计算的, 不能直接作用于离散标签. 这里对每个类别分别构建
//! 二值指示图, 重切片到目标网格, 放大 [`LABEL_SCALE`] 倍后施加形变, 再以一半为
//! 阈值恢复二值结果, 用目标网格上的 PDFF 剔除不合理的体素, 最后写回类别值.

use log::debug;
use thiserror::Error;

use crate::consts::LABEL_SCALE;
use crate::register::{Registration, RegistrationError, Transform};
use crate::{resample, Idx3d, LabelValue, ScalarVolume, Volume};

mod plausibility;

pub use plausibility::{admissible_range, filter_labels, PdffRange, Task, UnknownTask};

/// 标签迁移错误.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// 配准引擎施加形变失败.
    #[error("cannot apply transform: {0}")]
    Engine(#[from] RegistrationError),

    /// 形变后的结果与目标 PDFF 形状不一致.
    #[error("transformed field has shape {actual:?}, target PDFF has {expected:?}")]
    ShapeMismatch {
        /// 目标形状.
        expected: Idx3d,
        /// 实际形状.
        actual: Idx3d,
    },
}

/// 一次标签迁移的统计信息.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// 实际迁移的类别数.
    pub transported: usize,

    /// 重切片后为空而被跳过的类别数.
    pub skipped_empty: usize,

    /// 被 PDFF 合理范围剔除的体素数.
    pub gated_voxels: usize,

    /// 被后处理的类别覆盖的体素数. 类别按升序处理, 后者覆盖前者.
    pub overlapping_voxels: usize,
}

/// 将标签 `labels` 经形变 `transform` 迁移到 `target_pdff` 所在的网格上.
///
/// 返回与 `target_pdff` 同网格, 同标签类型的结果. 结果中的标签值总是
/// `labels` 中出现过的值或背景.
pub fn transport_labels<L, R>(
    labels: &Volume<L>,
    transform: &Transform,
    engine: &R,
    target_pdff: &ScalarVolume,
    task: Task,
) -> Result<(Volume<L>, TransportStats), TransportError>
where
    L: LabelValue,
    R: Registration + ?Sized,
{
    let target = target_pdff.geometry();
    let spacing = target.spacing();
    let pdff = target_pdff.data();
    let threshold = LABEL_SCALE / 2.0;

    let mut stats = TransportStats::default();
    let mut out: Volume<L> = target_pdff.map(|_| L::zero());

    for v in labels.labels().into_iter().filter(|v| *v != L::zero()) {
        let mut field = resample::reslice(&labels.indicator(v), target);
        if field.iter().all(|p| *p <= 0.0) {
            stats.skipped_empty += 1;
            continue;
        }
        field.mapv_inplace(|p| p * LABEL_SCALE);

        let warped = engine.apply_transform(field.view(), transform, spacing)?;
        if warped.dim() != pdff.dim() {
            return Err(TransportError::ShapeMismatch {
                expected: pdff.dim(),
                actual: warped.dim(),
            });
        }

        let recovered = target_pdff.zip_map(&warped.view(), |_, w| {
            if *w > threshold {
                v
            } else {
                L::zero()
            }
        });
        let (gated, removed) = filter_labels(&recovered, &pdff, task);
        stats.gated_voxels += removed;
        stats.transported += 1;

        let mut overlap = 0;
        out = out.zip_map(&gated.data(), |o, g| {
            if *g == L::zero() {
                *o
            } else {
                if *o != L::zero() {
                    overlap += 1;
                }
                *g
            }
        });
        stats.overlapping_voxels += overlap;
    }

    debug!(
        "transported {} classes ({}): {} empty, {} gated voxels, {} overlapping voxels",
        stats.transported, task, stats.skipped_empty, stats.gated_voxels, stats.overlapping_voxels
    );
    Ok((out, stats))
}
