use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{measure_kidneys, FirstOrder, InvalidBinWidth, MeasurementRecord};
use crate::consts::{series, stage};
use crate::dataset::{Cohort, SeriesKey, StoreError, VolumeStore};
use crate::stage::{Outcome, Report, SequenceTask};
use crate::Idx3d;

/// 记录文件后缀.
const RECORD_SUFFIX: &str = ".dmr.bin";

/// 测量失败的原因.
#[derive(Error, Debug)]
pub enum MeasureError {
    /// 缺少输入序列.
    #[error("missing input series {0}")]
    MissingInput(SeriesKey),

    /// 输入形状不一致.
    #[error("{series} has shape {actual:?}, PDFF map has {expected:?}")]
    ShapeMismatch {
        /// 出错的序列.
        series: String,
        /// PDFF 形状.
        expected: Idx3d,
        /// 实际形状.
        actual: Idx3d,
    },

    /// 存储读写失败.
    #[error(transparent)]
    Store(StoreError),

    /// 参数无效.
    #[error(transparent)]
    Options(#[from] InvalidBinWidth),

    /// 记录文件读写失败.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// 出错的路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: io::Error,
    },

    /// 记录编码失败.
    #[error("cannot encode measurement record: {0}")]
    Encode(#[from] bincode::Error),
}

impl From<StoreError> for MeasureError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Missing(key) => MeasureError::MissingInput(key),
            e => MeasureError::Store(e),
        }
    }
}

impl MeasureError {
    fn io<P: AsRef<Path>>(path: P) -> impl FnOnce(io::Error) -> Self {
        let path = path.as_ref().to_owned();
        move |source| Self::Io { path, source }
    }
}

impl MeasurementRecord {
    /// 以 bincode 格式保存.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), MeasureError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(MeasureError::io(path))?;
        bincode::serialize_into(BufWriter::new(file), self)?;
        Ok(())
    }

    /// 读取 [`MeasurementRecord::save`] 保存的记录.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, MeasureError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(MeasureError::io(path))?;
        Ok(bincode::deserialize_from(BufReader::new(file))?)
    }
}

/// 测量阶段的参数.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasureOptions {
    /// 直方图区间宽度.
    pub bin_width: f64,
}

impl Default for MeasureOptions {
    fn default() -> Self {
        Self {
            bin_width: FirstOrder::default().bin_width(),
        }
    }
}

/// 测量阶段涉及的存储位置.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurePaths {
    /// 脂肪分数图 (以及 fat, water).
    pub fat_fraction: PathBuf,

    /// 对齐后的掩膜.
    pub masks: PathBuf,

    /// 记录文件的输出目录.
    pub output: PathBuf,
}

impl MeasurePaths {
    /// 构建目录 `build` 下某个分组的标准位置.
    pub fn for_cohort<P: AsRef<Path>>(build: P, cohort: &Cohort) -> Self {
        let build = build.as_ref();
        Self {
            fat_fraction: cohort.stage_dir(build, &stage::FAT_FRACTION_MAPS),
            masks: cohort.stage_dir(build, &stage::ALIGNED_MASKS),
            output: cohort.stage_dir(build, &stage::MEASURE_KIDNEYS),
        }
    }

    /// `(patient, study)` 的记录文件路径.
    pub fn record_path(&self, patient: &str, study: &str) -> PathBuf {
        self.output.join(format!("{patient}-{study}{RECORD_SUFFIX}"))
    }
}

/// 肾脏测量阶段.
#[derive(Debug, Clone)]
pub struct MeasureKidneys<'a> {
    paths: &'a MeasurePaths,
    extractor: FirstOrder,
}

impl<'a> MeasureKidneys<'a> {
    /// 在 `paths` 上以参数 `options` 运行. 区间宽度不是有限正数时返回 `Err`.
    pub fn new(paths: &'a MeasurePaths, options: MeasureOptions) -> Result<Self, MeasureError> {
        Ok(Self {
            paths,
            extractor: FirstOrder::new(options.bin_width)?,
        })
    }

    /// 处理脂肪分数位置下的每一个 PDFF 序列.
    ///
    /// 同一 `(patient, study)` 只保存一个记录文件. 记录文件已存在时跳过.
    pub fn run<S: VolumeStore + ?Sized>(
        &self,
        store: &S,
    ) -> Result<Report<MeasureError>, MeasureError> {
        fs::create_dir_all(&self.paths.output).map_err(MeasureError::io(&self.paths.output))?;
        let mut report = Report::default();
        for key in store.list_series(&self.paths.fat_fraction)? {
            let Some(sequence) = key.series_desc().strip_suffix(series::PDFF) else {
                continue;
            };
            let mask = key.relocated(
                &self.paths.masks,
                &format!("{sequence}_{}", series::KIDNEY_MASKS),
            );
            if !store.contains(&mask) {
                info!(
                    "patient {}, study {}, sequence {sequence}: no kidney masks available",
                    key.patient(),
                    key.study_desc()
                );
                continue;
            }
            let task = SequenceTask::new(key.patient(), key.study_desc(), sequence);
            let result = self.measure(store, &key, &mask, sequence);
            report.record(task, result);
        }
        info!("measured kidneys in {}: {report}", self.paths.fat_fraction.display());
        Ok(report)
    }

    /// 测量单个序列.
    pub fn measure<S: VolumeStore + ?Sized>(
        &self,
        store: &S,
        pdff_key: &SeriesKey,
        mask_key: &SeriesKey,
        sequence: &str,
    ) -> Result<Outcome, MeasureError> {
        let (patient, study) = (pdff_key.patient(), pdff_key.study_desc());
        let path = self.paths.record_path(patient, study);
        if path.exists() {
            return Ok(Outcome::Skipped);
        }

        let pdff = store.read_scalar(pdff_key)?;
        let masks = store.read_labels(mask_key)?;
        let fat = store.read_scalar(&pdff_key.sibling(&format!("{sequence}{}", series::FAT)))?;
        let water = store.read_scalar(&pdff_key.sibling(&format!("{sequence}{}", series::WATER)))?;
        for (name, shape) in [
            (mask_key.series_desc(), masks.shape()),
            (series::FAT, fat.shape()),
            (series::WATER, water.shape()),
        ] {
            if shape != pdff.shape() {
                return Err(MeasureError::ShapeMismatch {
                    series: name.to_owned(),
                    expected: pdff.shape(),
                    actual: shape,
                });
            }
        }

        let record = MeasurementRecord {
            patient: patient.to_owned(),
            study: study.to_owned(),
            sequence: sequence.to_owned(),
            measurements: measure_kidneys(
                &masks,
                &pdff,
                &fat.data(),
                &water.data(),
                &self.extractor,
            ),
        };
        record.save(&path)?;
        Ok(Outcome::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::MemStore;
    use crate::{LabelVolume, ScalarVolume};
    use ndarray::Array3;

    fn seed(store: &mut MemStore, pdff_loc: &Path, mask_loc: &Path, patient: &str, masks: bool) {
        let key = SeriesKey::new(pdff_loc, patient, ("Baseline", 0), ("Dixon_1_pdff", 0));
        let scalar = |v: f32| ScalarVolume::with_spacing(Array3::from_elem((2, 3, 3), v), [1.0; 3]);
        store.insert_scalar(key.sibling("Dixon_1_fat"), scalar(1.0));
        store.insert_scalar(key.sibling("Dixon_1_water"), scalar(9.0));
        store.insert_scalar(key.clone(), scalar(0.1));
        if masks {
            let labels = LabelVolume::with_spacing(
                Array3::from_shape_fn((2, 3, 3), |(_, _, w)| w as u8),
                [1.0; 3],
            );
            store.insert_labels(key.relocated(mask_loc, "Dixon_1_kidney_masks"), labels);
        }
    }

    #[test]
    fn test_measure_stage() {
        let dir = tempfile::tempdir().unwrap();
        let paths = MeasurePaths {
            fat_fraction: "/pdff".into(),
            masks: "/masks".into(),
            output: dir.path().join("out"),
        };
        let mut store = MemStore::new();
        seed(&mut store, &paths.fat_fraction, &paths.masks, "p1", true);
        seed(&mut store, &paths.fat_fraction, &paths.masks, "p2", false);

        let stage = MeasureKidneys::new(&paths, MeasureOptions::default()).unwrap();
        let report = stage.run(&store).unwrap();
        assert_eq!(report.done, 1);
        assert!(report.is_clean());

        let record = MeasurementRecord::load(paths.record_path("p1", "Baseline")).unwrap();
        assert_eq!(record.sequence, "Dixon_1");
        assert_eq!(record.get("kidney_left-dixon_pdff-roi"), Some(0.1));
        assert_eq!(record.get("kidney_right-dixon_pdff-roi"), Some(0.1));
        let both = record
            .get("kidneys_both-dixon_pdff-histogram-Mean")
            .unwrap();
        assert!((both - 0.1).abs() < 1e-6);
        assert!(!paths.record_path("p2", "Baseline").exists());

        let again = stage.run(&store).unwrap();
        assert_eq!(again.skipped, 1);
    }

    #[test]
    fn test_rejects_bad_bin_width() {
        let paths = MeasurePaths {
            fat_fraction: "/pdff".into(),
            masks: "/masks".into(),
            output: "/out".into(),
        };
        assert!(matches!(
            MeasureKidneys::new(&paths, MeasureOptions { bin_width: 0.0 }),
            Err(MeasureError::Options(InvalidBinWidth(_)))
        ));
    }

    #[test]
    fn test_load_missing_record() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            MeasurementRecord::load(dir.path().join("none.dmr.bin")),
            Err(MeasureError::Io { .. })
        ));
    }
}
