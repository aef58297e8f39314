use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use super::{SeriesKey, StoreError, VolumeStore};
use crate::{LabelVolume, ScalarVolume};

/// 压缩 nii 文件后缀.
const NII_GZ: &str = ".nii.gz";

/// 未压缩 nii 文件后缀.
const NII: &str = ".nii";

/// 来源记录文件后缀.
const REF: &str = ".ref";

/// 基于本地文件系统的 nii 体数据存储.
///
/// 目录结构为 `{location}/{patient}/{study}_{index}/{series}_{index}.nii.gz`.
/// 派生序列的来源记录保存在同目录下的 `{series}_{index}.ref` 文件中.
#[derive(Debug, Clone, Copy)]
pub struct NiftiStore {
    compress: bool,
}

impl Default for NiftiStore {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl NiftiStore {
    /// 创建存储. 新写入的文件使用 gzip 压缩.
    #[inline]
    pub fn new() -> Self {
        Self { compress: true }
    }

    /// 创建存储. 新写入的文件不压缩.
    #[inline]
    pub fn uncompressed() -> Self {
        Self { compress: false }
    }

    /// `{location}/{patient}/{study}_{index}`.
    fn study_dir(key: &SeriesKey) -> PathBuf {
        let mut ans = key.location().to_owned();
        ans.push(key.patient());
        ans.push(format!("{}_{}", key.study_desc(), key.study_index()));
        ans
    }

    /// 不带后缀的序列文件路径.
    fn stem(key: &SeriesKey) -> PathBuf {
        let mut ans = Self::study_dir(key);
        ans.push(format!("{}_{}", key.series_desc(), key.series_index()));
        ans
    }

    #[inline]
    fn with_suffix(stem: &Path, suffix: &str) -> PathBuf {
        let mut s = stem.as_os_str().to_owned();
        s.push(suffix);
        PathBuf::from(s)
    }

    /// 已存在的序列文件路径. 压缩文件优先.
    fn existing_path(key: &SeriesKey) -> Option<PathBuf> {
        let stem = Self::stem(key);
        [NII_GZ, NII]
            .into_iter()
            .map(|suffix| Self::with_suffix(&stem, suffix))
            .find(|p| p.is_file())
    }

    /// 新写入序列的文件路径.
    fn target_path(&self, key: &SeriesKey) -> PathBuf {
        let suffix = if self.compress { NII_GZ } else { NII };
        Self::with_suffix(&Self::stem(key), suffix)
    }

    fn ensure_study_dir(key: &SeriesKey) -> Result<(), StoreError> {
        let dir = Self::study_dir(key);
        fs::create_dir_all(&dir).map_err(StoreError::io(&dir))
    }

    fn write_provenance(key: &SeriesKey, reference: &SeriesKey) -> Result<(), StoreError> {
        let path = Self::with_suffix(&Self::stem(key), REF);
        fs::write(&path, reference.to_line()).map_err(StoreError::io(&path))
    }

    fn open_path(key: &SeriesKey) -> Result<PathBuf, StoreError> {
        Self::existing_path(key).ok_or_else(|| StoreError::Missing(key.clone()))
    }
}

/// 将 `{desc}_{index}` 拆分为描述和序号.
///
/// 只接受能按 `{desc}_{index}` 原样还原的名称, 否则返回 `None`
/// (无序号后缀, 序号带前导 0 等).
fn split_desc_index(name: &str) -> Option<(&str, u32)> {
    let (desc, index) = name.rsplit_once('_')?;
    let i: u32 = index.parse().ok()?;
    (!desc.is_empty() && i.to_string() == index).then_some((desc, i))
}

/// 列出目录下的子目录名或文件名. 目录不存在时返回空列表.
fn read_names(dir: &Path, want_dir: bool) -> Result<Vec<String>, StoreError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut ans = Vec::new();
    for entry in fs::read_dir(dir).map_err(StoreError::io(dir))? {
        let entry = entry.map_err(StoreError::io(dir))?;
        let path = entry.path();
        if path.is_dir() != want_dir {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            ans.push(name.to_owned());
        }
    }
    Ok(ans)
}

impl VolumeStore for NiftiStore {
    fn prepare(&mut self, location: &Path) -> Result<(), StoreError> {
        fs::create_dir_all(location).map_err(StoreError::io(location))
    }

    fn list_series(&self, location: &Path) -> Result<Vec<SeriesKey>, StoreError> {
        let mut ans = Vec::new();
        for patient in read_names(location, true)? {
            let patient_dir = location.join(&patient);
            for study in read_names(&patient_dir, true)? {
                let study_dir = patient_dir.join(&study);
                let Some((study_desc, study_index)) = split_desc_index(&study) else {
                    warn!("{}: no study index, ignored", study_dir.display());
                    continue;
                };
                for file in read_names(&study_dir, false)? {
                    let Some(series) = file
                        .strip_suffix(NII_GZ)
                        .or_else(|| file.strip_suffix(NII))
                    else {
                        continue;
                    };
                    let Some(series) = split_desc_index(series) else {
                        warn!("{}: no series index, ignored", study_dir.join(&file).display());
                        continue;
                    };
                    ans.push(SeriesKey::new(
                        location,
                        &patient,
                        (study_desc, study_index),
                        series,
                    ));
                }
            }
        }
        ans.sort_unstable();
        ans.dedup();
        Ok(ans)
    }

    fn contains(&self, key: &SeriesKey) -> bool {
        Self::existing_path(key).is_some()
    }

    fn read_scalar(&self, key: &SeriesKey) -> Result<ScalarVolume, StoreError> {
        let path = Self::open_path(key)?;
        ScalarVolume::open(path).map_err(|source| StoreError::Volume {
            key: key.clone(),
            source,
        })
    }

    fn read_labels(&self, key: &SeriesKey) -> Result<LabelVolume, StoreError> {
        let path = Self::open_path(key)?;
        LabelVolume::open(path).map_err(|source| StoreError::Volume {
            key: key.clone(),
            source,
        })
    }

    fn write_scalar(
        &mut self,
        volume: &ScalarVolume,
        key: &SeriesKey,
        reference: &SeriesKey,
    ) -> Result<(), StoreError> {
        Self::ensure_study_dir(key)?;
        let path = self.target_path(key);
        volume.save(&path).map_err(|source| StoreError::Volume {
            key: key.clone(),
            source,
        })?;
        Self::write_provenance(key, reference)?;
        debug!("wrote {}", path.display());
        Ok(())
    }

    fn write_labels(
        &mut self,
        volume: &LabelVolume,
        key: &SeriesKey,
        reference: &SeriesKey,
    ) -> Result<(), StoreError> {
        Self::ensure_study_dir(key)?;
        let path = self.target_path(key);
        volume.save(&path).map_err(|source| StoreError::Volume {
            key: key.clone(),
            source,
        })?;
        Self::write_provenance(key, reference)?;
        debug!("wrote {}", path.display());
        Ok(())
    }

    fn copy_series(&mut self, src: &SeriesKey, dst: &SeriesKey) -> Result<(), StoreError> {
        let from = Self::open_path(src)?;
        let suffix = if from.to_string_lossy().ends_with(NII_GZ) {
            NII_GZ
        } else {
            NII
        };
        Self::ensure_study_dir(dst)?;
        let to = Self::with_suffix(&Self::stem(dst), suffix);
        fs::copy(&from, &to).map_err(StoreError::io(&to))?;
        Self::write_provenance(dst, src)?;
        debug!("copied {} -> {}", from.display(), to.display());
        Ok(())
    }

    fn provenance(&self, key: &SeriesKey) -> Result<Option<SeriesKey>, StoreError> {
        if !self.contains(key) {
            return Err(StoreError::Missing(key.clone()));
        }
        let path = Self::with_suffix(&Self::stem(key), REF);
        if !path.is_file() {
            return Ok(None);
        }
        let line = fs::read_to_string(&path).map_err(StoreError::io(&path))?;
        SeriesKey::from_line(&line)
            .map(Some)
            .ok_or(StoreError::Provenance(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_split_desc_index() {
        assert_eq!(split_desc_index("Baseline_0"), Some(("Baseline", 0)));
        assert_eq!(split_desc_index("Dixon_1_water_3"), Some(("Dixon_1_water", 3)));
        assert_eq!(split_desc_index("Dixon_water"), None);
        assert_eq!(split_desc_index("kidney_masks_01"), None);
        assert_eq!(split_desc_index("_7"), None);
        assert_eq!(split_desc_index("plain"), None);
    }

    #[test]
    fn test_list_ignores_unindexed_names() {
        let dir = tempfile::tempdir().unwrap();
        let loc = dir.path();
        let mut store = NiftiStore::new();
        let masks = LabelVolume::with_spacing(Array3::from_elem((1, 2, 2), 1u8), [1.0; 3]);
        let key = SeriesKey::new(loc, "001", ("Baseline", 0), ("kidney_masks", 0));
        store.write_labels(&masks, &key, &key).unwrap();

        // 同目录下没有序号后缀的文件, 以及不带序号的 study 目录.
        let good = NiftiStore::existing_path(&key).unwrap();
        fs::copy(&good, good.with_file_name("kidney_masks.nii.gz")).unwrap();
        let foreign_study = loc.join("001").join("Followup");
        fs::create_dir_all(&foreign_study).unwrap();
        fs::copy(&good, foreign_study.join("kidney_masks_0.nii.gz")).unwrap();

        let listed = store.list_series(loc).unwrap();
        assert_eq!(listed, vec![key]);
        for k in listed.iter() {
            assert!(store.contains(k));
            assert!(store.read_labels(k).is_ok());
        }
    }

    #[test]
    fn test_list_missing_location_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = NiftiStore::new();
        assert!(store
            .list_series(&dir.path().join("nope"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_write_list_read_copy() {
        let dir = tempfile::tempdir().unwrap();
        let src_loc = dir.path().join("src");
        let dst_loc = dir.path().join("dst");
        let mut store = NiftiStore::new();

        let water = ScalarVolume::with_spacing(
            Array3::from_shape_fn((2, 3, 4), |(z, h, w)| (z * 12 + h * 4 + w) as f32),
            [3.0, 1.5, 1.5],
        );
        let key = SeriesKey::new(&src_loc, "001", ("Baseline", 0), ("Dixon_water", 0));
        let origin = SeriesKey::new(&src_loc, "001", ("Baseline", 0), ("Dixon_in_phase", 0));
        store.write_scalar(&water, &key, &origin).unwrap();

        assert!(store.contains(&key));
        assert_eq!(store.list_series(&src_loc).unwrap(), vec![key.clone()]);
        assert_eq!(store.provenance(&key).unwrap(), Some(origin));

        let back = store.read_scalar(&key).unwrap();
        assert_eq!(back.data(), water.data());
        assert!(back.geometry().same_grid(water.geometry()));

        let copy = key.relocated(&dst_loc, "Dixon_water_ref_coreg");
        store.copy_series(&key, &copy).unwrap();
        assert_eq!(
            fs::read(NiftiStore::existing_path(&key).unwrap()).unwrap(),
            fs::read(NiftiStore::existing_path(&copy).unwrap()).unwrap()
        );
        assert_eq!(store.provenance(&copy).unwrap(), Some(key.clone()));

        let missing = key.sibling("Dixon_fat");
        assert!(matches!(
            store.read_scalar(&missing),
            Err(StoreError::Missing(_))
        ));
    }
}
