//! 掩膜对齐.
//!
//! 每个 `(patient, study)` 有一个参考 Dixon 序列, 肾脏掩膜和自动分割都画在参考序列上.
//! 对同一次检查中的其它每个序列, 将参考序列的 water 图配准到该序列的 water 图上,
//! 并用得到的形变把三种掩膜迁移过去. 参考序列本身原样复制.
//!
//! 每个序列输出四个序列 (study 序号为 0):
//!
//! - `{seq}_water_ref_coreg`: 配准后的参考 water 图;
//! - `{seq}_kidney_masks`: 肾脏掩膜;
//! - `{seq}_total_mr`: 全身分割;
//! - `{seq}_tissue_types_mr`: 组织类型分割.

use std::path::{Path, PathBuf};

use log::{debug, info};
use thiserror::Error;

use crate::consts::{series, stage};
use crate::dataset::{Cohort, DixonRecord, SeriesKey, StoreError, VolumeStore};
use crate::register::{Registration, RegistrationError};
use crate::stage::{Outcome, Report, SequenceTask};
use crate::transport::{transport_labels, Task, TransportError};
use crate::{resample, LabelVolume, ScalarVolume, Volume};

/// 对齐失败的原因.
#[derive(Error, Debug)]
pub enum AlignError {
    /// 缺少输入序列.
    #[error("missing input series {0}")]
    MissingInput(SeriesKey),

    /// 参考序列记录中没有该次检查.
    #[error("no reference sequence recorded for patient {patient}, study {study}")]
    MissingReference {
        /// 受试者 ID.
        patient: String,
        /// study 描述.
        study: String,
    },

    /// 配准失败或结果退化.
    #[error("registration failed: {0}")]
    RegistrationFailure(#[from] RegistrationError),

    /// 标签迁移失败.
    #[error("label transport failed: {0}")]
    Transport(#[from] TransportError),

    /// 存储读写失败.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for AlignError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Missing(key) => AlignError::MissingInput(key),
            e => AlignError::Store(e),
        }
    }
}

/// 对齐阶段的运行汇总.
pub type AlignReport = Report<AlignError>;

/// 对齐阶段涉及的存储位置.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignPaths {
    /// Dixon 原始数据 (fixed 与 moving 的 water 图).
    pub dixon: PathBuf,

    /// 脂肪分数图.
    pub fat_fraction: PathBuf,

    /// 人工编辑后的肾脏掩膜.
    pub kidney_masks: PathBuf,

    /// 全身分割与组织类型分割.
    pub total_masks: PathBuf,

    /// 输出位置.
    pub output: PathBuf,
}

impl AlignPaths {
    /// 构建目录 `build` 下某个分组的标准位置.
    pub fn for_cohort<P: AsRef<Path>>(build: P, cohort: &Cohort) -> Self {
        let build = build.as_ref();
        Self {
            dixon: cohort.stage_dir(build, &stage::DIXON),
            fat_fraction: cohort.stage_dir(build, &stage::FAT_FRACTION_MAPS),
            kidney_masks: cohort.stage_dir(build, &stage::KIDNEY_MASKS),
            total_masks: cohort.stage_dir(build, &stage::TOTAL_MASKS),
            output: cohort.stage_dir(build, &stage::ALIGNED_MASKS),
        }
    }
}

/// 一个序列需要读写的全部地址.
struct SequenceKeys {
    fixed_water: SeriesKey,
    moving_water: SeriesKey,
    fixed_pdff: SeriesKey,
    /// `(来源, 输出, 任务)`.
    masks: [(SeriesKey, SeriesKey, Task); 3],
    coreg_water: SeriesKey,
}

/// 掩膜对齐阶段.
#[derive(Debug, Clone, Copy)]
pub struct AlignMasks<'a> {
    paths: &'a AlignPaths,
    record: &'a DixonRecord,
}

impl<'a> AlignMasks<'a> {
    /// 在 `paths` 上运行, 参考序列由 `record` 给出.
    #[inline]
    pub fn new(paths: &'a AlignPaths, record: &'a DixonRecord) -> Self {
        Self { paths, record }
    }

    /// 处理 Dixon 位置下的每一个 water 序列.
    ///
    /// 单个序列的失败记录在汇总中, 不会中断批次. 只有输出位置无法创建
    /// 或无法列出输入序列时返回 `Err`.
    pub fn run<S, R>(&self, store: &mut S, engine: &R) -> Result<AlignReport, StoreError>
    where
        S: VolumeStore + ?Sized,
        R: Registration + ?Sized,
    {
        store.prepare(&self.paths.output)?;
        let mut report = AlignReport::default();
        for key in store.list_series(&self.paths.dixon)? {
            let desc = key.series_desc();
            if desc.contains(series::POST_CONTRAST) {
                continue;
            }
            let Some(sequence) = desc.strip_suffix(series::WATER) else {
                continue;
            };
            let task = SequenceTask::new(key.patient(), key.study_desc(), sequence);
            let result = self.align_sequence(store, engine, &key, sequence);
            report.record(task, result);
        }
        info!("aligned masks in {}: {report}", self.paths.dixon.display());
        Ok(report)
    }

    /// 处理单个序列. `fixed_water` 为该序列的 water 图.
    pub fn align_sequence<S, R>(
        &self,
        store: &mut S,
        engine: &R,
        fixed_water: &SeriesKey,
        sequence: &str,
    ) -> Result<Outcome, AlignError>
    where
        S: VolumeStore + ?Sized,
        R: Registration + ?Sized,
    {
        let coreg_water = self.output_key(fixed_water, sequence, series::WATER_REF_COREG);
        if store.contains(&coreg_water) {
            return Ok(Outcome::Skipped);
        }

        let (patient, study) = (fixed_water.patient(), fixed_water.study_desc());
        let reference =
            self.record
                .reference(patient, study)
                .ok_or_else(|| AlignError::MissingReference {
                    patient: patient.to_owned(),
                    study: study.to_owned(),
                })?;
        let keys = self.sequence_keys(fixed_water, sequence, reference, coreg_water);

        if sequence == reference {
            return pass_through(store, &keys);
        }
        coregister(store, engine, &keys)?;
        Ok(Outcome::Done)
    }

    /// `{seq}{suffix}` 在输出位置的地址.
    fn output_key(&self, fixed_water: &SeriesKey, sequence: &str, suffix: &str) -> SeriesKey {
        fixed_water.relocated(&self.paths.output, &format!("{sequence}{suffix}"))
    }

    fn sequence_keys(
        &self,
        fixed_water: &SeriesKey,
        sequence: &str,
        reference: &str,
        coreg_water: SeriesKey,
    ) -> SequenceKeys {
        let p = self.paths;
        let mask_out = |name: &str| self.output_key(fixed_water, sequence, &format!("_{name}"));
        SequenceKeys {
            fixed_water: fixed_water.clone(),
            moving_water: fixed_water
                .relocated(&p.dixon, &format!("{reference}{}", series::WATER)),
            fixed_pdff: fixed_water.relocated(&p.fat_fraction, &format!("{sequence}{}", series::PDFF)),
            masks: [
                (
                    fixed_water.relocated(&p.kidney_masks, series::KIDNEY_MASKS),
                    mask_out(series::KIDNEY_MASKS),
                    Task::TotalMr,
                ),
                (
                    fixed_water.relocated(&p.total_masks, series::TOTAL_MR),
                    mask_out(series::TOTAL_MR),
                    Task::TotalMr,
                ),
                (
                    fixed_water.relocated(&p.total_masks, series::TISSUE_TYPES_MR),
                    mask_out(series::TISSUE_TYPES_MR),
                    Task::TissueTypesMr,
                ),
            ],
            coreg_water,
        }
    }
}

/// 参考序列: 原样复制 water 图和三种掩膜. 不调用配准引擎.
fn pass_through<S: VolumeStore + ?Sized>(
    store: &mut S,
    keys: &SequenceKeys,
) -> Result<Outcome, AlignError> {
    // water 图最后复制, 它是整个序列完成的标记.
    let copies = keys
        .masks
        .iter()
        .map(|(src, dst, _)| (src, dst))
        .chain(std::iter::once((&keys.moving_water, &keys.coreg_water)))
        .collect::<Vec<_>>();
    // 先确认全部输入存在, 避免只复制了一部分.
    if let Some((src, _)) = copies.iter().find(|(src, _)| !store.contains(src)) {
        return Err(AlignError::MissingInput((*src).clone()));
    }
    for (src, dst) in copies {
        store.copy_series(src, dst)?;
    }
    Ok(Outcome::PassedThrough)
}

/// 配准并迁移掩膜. 所有读取和计算都在第一次写入之前完成.
fn coregister<S, R>(store: &mut S, engine: &R, keys: &SequenceKeys) -> Result<(), AlignError>
where
    S: VolumeStore + ?Sized,
    R: Registration + ?Sized,
{
    let fixed = store.read_scalar(&keys.fixed_water)?;
    let moving = store.read_scalar(&keys.moving_water)?;
    let pdff = store.read_scalar(&keys.fixed_pdff)?;
    let masks = keys
        .masks
        .iter()
        .map(|(src, _, _)| store.read_labels(src))
        .collect::<Result<Vec<LabelVolume>, _>>()?;

    if pdff.shape() != fixed.shape() {
        return Err(TransportError::ShapeMismatch {
            expected: fixed.shape(),
            actual: pdff.shape(),
        }
        .into());
    }

    let spacing = fixed.spacing();
    let moving = resample::reslice(&moving, fixed.geometry());
    let (coreg, transform) = engine.register(moving.view(), fixed.data(), spacing)?;
    RegistrationError::check_shape(fixed.data().shape(), coreg.shape())?;
    if !coreg.iter().all(|p| p.is_finite()) {
        return Err(RegistrationError::Degenerate("non-finite values in registered image".into()).into());
    }
    let coreg = ScalarVolume::new(coreg, fixed.geometry().clone()).map_err(|e| {
        RegistrationError::ShapeMismatch {
            expected: vec![e.expected.0, e.expected.1, e.expected.2],
            actual: e.actual,
        }
    })?;

    let mut outputs = Vec::with_capacity(masks.len());
    for (mask, (_, _, task)) in masks.iter().zip(keys.masks.iter()) {
        let (moved, stats) = transport_labels(mask, &transform, engine, &pdff, *task)?;
        debug!("{task}: {stats:?}");
        // 输出统一使用 fixed water 的几何信息.
        let shape = moved.shape();
        let moved = Volume::new(moved.into_data(), fixed.geometry().clone()).map_err(|e| {
            TransportError::ShapeMismatch {
                expected: e.expected,
                actual: shape,
            }
        })?;
        outputs.push(moved);
    }

    for (moved, (src, dst, _)) in outputs.iter().zip(keys.masks.iter()) {
        store.write_labels(moved, dst, src)?;
    }
    // 最后写入完成标记. 中途失败时重新运行会重做整个序列.
    store.write_scalar(&coreg, &keys.coreg_water, &keys.moving_water)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_for_cohort() {
        let p = AlignPaths::for_cohort("/b", &Cohort::Patients("Bari".into()));
        assert_eq!(
            p.dixon,
            PathBuf::from("/b/dixon/stage_5_clean_dixon_data/Patients/Bari")
        );
        assert_eq!(
            p.output,
            PathBuf::from("/b/dixon-pdff/stage_3_aligned_masks/Patients/Bari")
        );
        assert_eq!(
            p.kidney_masks,
            PathBuf::from("/b/kidneyvol/stage_3_edit/Patients/Bari")
        );
        let c = AlignPaths::for_cohort("/b", &Cohort::Controls);
        assert_eq!(
            c.total_masks,
            PathBuf::from("/b/totseg/stage_1_segment/Controls")
        );
    }

    #[test]
    fn test_missing_series_maps_to_missing_input() {
        let key = SeriesKey::new("/a", "p", ("Baseline", 0), ("Dixon_water", 0));
        assert!(matches!(
            AlignError::from(StoreError::Missing(key.clone())),
            AlignError::MissingInput(k) if k == key
        ));
        assert!(matches!(
            AlignError::from(StoreError::Provenance("/x".into())),
            AlignError::Store(_)
        ));
    }
}
