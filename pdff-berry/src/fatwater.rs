//! 脂肪/水分离与脂肪分数图.
//!
//! 对 Dixon 数据中的每一对 out-phase / in-phase 序列, 计算 fat, water 与
//! PDFF = fat / (fat + water), 写出 `{seq}_fat`, `{seq}_water` 和 `{seq}_pdff`.

use std::path::{Path, PathBuf};

use log::info;
use ndarray::{Array3, ArrayView3, Zip};
use thiserror::Error;

use crate::consts::{series, stage};
use crate::dataset::{Cohort, SeriesKey, StoreError, VolumeStore};
use crate::stage::{Outcome, Report, SequenceTask};
use crate::{Idx3d, ScalarVolume};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 脂肪/水分离失败的原因.
#[derive(Error, Debug)]
pub enum FatWaterError {
    /// 缺少输入序列.
    #[error("missing input series {0}")]
    MissingInput(SeriesKey),

    /// 两个回波的形状不一致.
    #[error("echo shapes differ: out-phase {out_phase:?}, in-phase {in_phase:?}")]
    ShapeMismatch {
        /// 反相位形状.
        out_phase: Idx3d,
        /// 同相位形状.
        in_phase: Idx3d,
    },

    /// 存储读写失败.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for FatWaterError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Missing(key) => FatWaterError::MissingInput(key),
            e => FatWaterError::Store(e),
        }
    }
}

/// Dixon 采集参数.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DixonParams {
    /// 反相位回波时间 (ms).
    pub te_out: f64,

    /// 同相位回波时间 (ms).
    pub te_in: f64,

    /// 重复时间 (ms).
    pub tr: f64,

    /// 翻转角 (度).
    pub flip_angle: f64,
}

impl Default for DixonParams {
    /// 3T 下脂肪与水相差约 3.4 ppm, 第一个反相位和同相位回波约为 1.15 ms 和 2.30 ms.
    fn default() -> Self {
        Self {
            te_out: 1.15,
            te_in: 2.30,
            tr: 4.0,
            flip_angle: 10.0,
        }
    }
}

/// 脂肪/水分离模型.
pub trait FatWaterModel {
    /// 以采集参数 `params` 从反相位和同相位图像计算 `(fat, water)`.
    fn decompose(
        &self,
        out_phase: ArrayView3<f32>,
        in_phase: ArrayView3<f32>,
        params: &DixonParams,
    ) -> Result<(Array3<f32>, Array3<f32>), FatWaterError>;
}

/// 经典两点 Dixon 模型: `water = (ip + op) / 2`, `fat = (ip - op) / 2`, 负值截断为 0.
///
/// 不做 T1/T2* 校正, 因此不使用采集参数.
#[derive(Debug, Clone, Copy, Default)]
pub struct TwoPointDixon;

impl FatWaterModel for TwoPointDixon {
    fn decompose(
        &self,
        out_phase: ArrayView3<f32>,
        in_phase: ArrayView3<f32>,
        _params: &DixonParams,
    ) -> Result<(Array3<f32>, Array3<f32>), FatWaterError> {
        if out_phase.dim() != in_phase.dim() {
            return Err(FatWaterError::ShapeMismatch {
                out_phase: out_phase.dim(),
                in_phase: in_phase.dim(),
            });
        }
        let fat = Zip::from(&in_phase)
            .and(&out_phase)
            .map_collect(|ip, op| ((ip - op) / 2.0).max(0.0));
        let water = Zip::from(&in_phase)
            .and(&out_phase)
            .map_collect(|ip, op| ((ip + op) / 2.0).max(0.0));
        Ok((fat, water))
    }
}

/// 逐体素计算 `fat / (fat + water)`. 分母为 0 处取 0.
pub fn fat_fraction(fat: &ArrayView3<f32>, water: &ArrayView3<f32>) -> Array3<f32> {
    Zip::from(fat).and(water).map_collect(|&f, &w| {
        let total = f + w;
        if total != 0.0 {
            f / total
        } else {
            0.0
        }
    })
}

/// 脂肪分数图阶段涉及的存储位置.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatFractionPaths {
    /// Dixon 原始数据.
    pub dixon: PathBuf,

    /// 输出位置.
    pub output: PathBuf,
}

impl FatFractionPaths {
    /// 构建目录 `build` 下某个分组的标准位置.
    pub fn for_cohort<P: AsRef<Path>>(build: P, cohort: &Cohort) -> Self {
        let build = build.as_ref();
        Self {
            dixon: cohort.stage_dir(build, &stage::DIXON),
            output: cohort.stage_dir(build, &stage::FAT_FRACTION_MAPS),
        }
    }
}

/// 脂肪分数图阶段.
#[derive(Debug, Clone, Copy)]
pub struct FatFractionMaps<'a, M: ?Sized> {
    paths: &'a FatFractionPaths,
    model: &'a M,
    params: DixonParams,
}

impl<'a, M: FatWaterModel + ?Sized> FatFractionMaps<'a, M> {
    /// 在 `paths` 上用模型 `model` 运行, 所有序列使用同一组采集参数 `params`.
    #[inline]
    pub fn new(paths: &'a FatFractionPaths, model: &'a M, params: DixonParams) -> Self {
        Self {
            paths,
            model,
            params,
        }
    }

    /// 处理 Dixon 位置下的每一个 out-phase 序列.
    pub fn run<S: VolumeStore + ?Sized>(
        &self,
        store: &mut S,
    ) -> Result<Report<FatWaterError>, StoreError> {
        store.prepare(&self.paths.output)?;
        let mut report = Report::default();
        for key in store.list_series(&self.paths.dixon)? {
            let Some(sequence) = key.series_desc().strip_suffix(series::OUT_PHASE) else {
                continue;
            };
            let task = SequenceTask::new(key.patient(), key.study_desc(), sequence);
            let result = self.compute(store, &key, sequence);
            report.record(task, result);
        }
        info!("fat fraction maps in {}: {report}", self.paths.dixon.display());
        Ok(report)
    }

    /// 处理单个序列. `out_phase` 为该序列的反相位图像.
    pub fn compute<S: VolumeStore + ?Sized>(
        &self,
        store: &mut S,
        out_phase: &SeriesKey,
        sequence: &str,
    ) -> Result<Outcome, FatWaterError> {
        let output = |suffix: &str| {
            out_phase.relocated(&self.paths.output, &format!("{sequence}{suffix}"))
        };
        let pdff_key = output(series::PDFF);
        if store.contains(&pdff_key) {
            return Ok(Outcome::Skipped);
        }

        let in_phase = out_phase.sibling(&format!("{sequence}{}", series::IN_PHASE));
        let op = store.read_scalar(out_phase)?;
        let ip = store.read_scalar(&in_phase)?;
        let (fat, water) = self.model.decompose(op.data(), ip.data(), &self.params)?;
        let pdff = fat_fraction(&fat.view(), &water.view());

        let geometry = op.geometry();
        for (data, key) in [
            (fat, output(series::FAT)),
            (water, output(series::WATER)),
            (pdff, pdff_key),
        ] {
            let shape = data.dim();
            let volume = ScalarVolume::new(data, geometry.clone()).map_err(|_| {
                FatWaterError::ShapeMismatch {
                    out_phase: geometry.shape(),
                    in_phase: shape,
                }
            })?;
            store.write_scalar(&volume, &key, out_phase)?;
        }
        Ok(Outcome::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::MemStore;

    #[test]
    fn test_two_point_dixon() {
        let op = Array3::from_shape_vec((1, 1, 3), vec![10.0f32, 2.0, 30.0]).unwrap();
        let ip = Array3::from_shape_vec((1, 1, 3), vec![30.0f32, 2.0, 10.0]).unwrap();
        let params = DixonParams::default();
        let (fat, water) = TwoPointDixon.decompose(op.view(), ip.view(), &params).unwrap();
        assert_eq!(fat.as_slice().unwrap(), &[10.0, 0.0, 0.0]);
        assert_eq!(water.as_slice().unwrap(), &[20.0, 2.0, 20.0]);

        let bad = Array3::<f32>::zeros((1, 1, 2));
        assert!(matches!(
            TwoPointDixon.decompose(op.view(), bad.view(), &params),
            Err(FatWaterError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_fat_fraction_zero_denominator() {
        let fat = Array3::from_shape_vec((1, 1, 3), vec![1.0f32, 0.0, 3.0]).unwrap();
        let water = Array3::from_shape_vec((1, 1, 3), vec![3.0f32, 0.0, 0.0]).unwrap();
        let ff = fat_fraction(&fat.view(), &water.view());
        assert_eq!(ff.as_slice().unwrap(), &[0.25, 0.0, 1.0]);
    }

    #[test]
    fn test_stage_writes_and_skips() {
        let paths = FatFractionPaths {
            dixon: "/dixon".into(),
            output: "/pdff".into(),
        };
        let mut store = MemStore::new();
        let op_key = SeriesKey::new("/dixon", "p1", ("Baseline", 0), ("Dixon_1_out_phase", 0));
        store.insert_scalar(
            op_key.clone(),
            ScalarVolume::with_spacing(Array3::from_elem((2, 2, 2), 10.0), [1.0; 3]),
        );
        store.insert_scalar(
            op_key.sibling("Dixon_1_in_phase"),
            ScalarVolume::with_spacing(Array3::from_elem((2, 2, 2), 30.0), [1.0; 3]),
        );
        // 缺少 in-phase 的序列.
        store.insert_scalar(
            op_key.sibling("Dixon_2_out_phase"),
            ScalarVolume::with_spacing(Array3::from_elem((2, 2, 2), 10.0), [1.0; 3]),
        );

        let stage = FatFractionMaps::new(&paths, &TwoPointDixon, DixonParams::default());
        let report = stage.run(&mut store).unwrap();
        assert_eq!(report.done, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0].1, FatWaterError::MissingInput(_)));
        assert_eq!(store.writes(), 3);

        let pdff = op_key.relocated("/pdff", "Dixon_1_pdff");
        let ff = store.read_scalar(&pdff).unwrap();
        assert!(ff.data().iter().all(|v| (*v - 1.0 / 3.0).abs() < 1e-6));
        assert_eq!(store.provenance(&pdff).unwrap(), Some(op_key));

        let again = stage.run(&mut store).unwrap();
        assert_eq!(again.skipped, 1);
        assert_eq!(store.writes(), 3);
    }

    /// 记录收到的采集参数.
    struct Recording(std::cell::RefCell<Vec<DixonParams>>);

    impl FatWaterModel for Recording {
        fn decompose(
            &self,
            out_phase: ArrayView3<f32>,
            in_phase: ArrayView3<f32>,
            params: &DixonParams,
        ) -> Result<(Array3<f32>, Array3<f32>), FatWaterError> {
            self.0.borrow_mut().push(*params);
            TwoPointDixon.decompose(out_phase, in_phase, params)
        }
    }

    #[test]
    fn test_params_reach_model() {
        let paths = FatFractionPaths {
            dixon: "/dixon".into(),
            output: "/pdff".into(),
        };
        let mut store = MemStore::new();
        let op_key = SeriesKey::new("/dixon", "p1", ("Baseline", 0), ("Dixon_1_out_phase", 0));
        for (key, v) in [(op_key.clone(), 10.0), (op_key.sibling("Dixon_1_in_phase"), 30.0)] {
            store.insert_scalar(
                key,
                ScalarVolume::with_spacing(Array3::from_elem((1, 2, 2), v), [1.0; 3]),
            );
        }
        let params = DixonParams {
            te_out: 2.2,
            te_in: 4.4,
            tr: 6.0,
            flip_angle: 12.0,
        };
        let model = Recording(Default::default());
        let report = FatFractionMaps::new(&paths, &model, params)
            .run(&mut store)
            .unwrap();
        assert_eq!(report.done, 1);
        assert_eq!(model.0.into_inner(), vec![params]);
    }
}
