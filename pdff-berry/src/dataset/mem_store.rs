use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use super::{SeriesKey, StoreError, VolumeStore};
use crate::{LabelVolume, ScalarVolume};

#[derive(Debug, Clone)]
enum Payload {
    Scalar(ScalarVolume),
    Labels(LabelVolume),
}

#[derive(Debug, Clone)]
struct Entry {
    payload: Payload,
    provenance: Option<SeriesKey>,
}

/// 内存中的体数据存储. 主要用于测试和小规模试验.
///
/// 读取时标量和标签可以相互转换: 标签转标量为直接取值,
/// 标量转标签为四舍五入后截断到 `[0, 255]`.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    entries: BTreeMap<SeriesKey, Entry>,
    locations: BTreeSet<PathBuf>,
    writes: usize,
}

impl MemStore {
    /// 创建空存储.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 放入一个原始 (无来源) 标量序列. 不计入写次数.
    pub fn insert_scalar(&mut self, key: SeriesKey, volume: ScalarVolume) {
        self.insert(key, Payload::Scalar(volume), None);
    }

    /// 放入一个原始 (无来源) 标签序列. 不计入写次数.
    pub fn insert_labels(&mut self, key: SeriesKey, volume: LabelVolume) {
        self.insert(key, Payload::Labels(volume), None);
    }

    /// 自创建以来通过 [`VolumeStore`] 接口完成的写次数 (含复制).
    #[inline]
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// 序列总数.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 存储是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, key: SeriesKey, payload: Payload, provenance: Option<SeriesKey>) {
        self.locations.insert(key.location().to_owned());
        self.entries.insert(
            key,
            Entry {
                payload,
                provenance,
            },
        );
    }

    fn get(&self, key: &SeriesKey) -> Result<&Entry, StoreError> {
        self.entries
            .get(key)
            .ok_or_else(|| StoreError::Missing(key.clone()))
    }
}

impl VolumeStore for MemStore {
    fn prepare(&mut self, location: &Path) -> Result<(), StoreError> {
        self.locations.insert(location.to_owned());
        Ok(())
    }

    fn list_series(&self, location: &Path) -> Result<Vec<SeriesKey>, StoreError> {
        Ok(self
            .entries
            .keys()
            .filter(|k| k.location() == location)
            .cloned()
            .collect())
    }

    #[inline]
    fn contains(&self, key: &SeriesKey) -> bool {
        self.entries.contains_key(key)
    }

    fn read_scalar(&self, key: &SeriesKey) -> Result<ScalarVolume, StoreError> {
        Ok(match &self.get(key)?.payload {
            Payload::Scalar(v) => v.clone(),
            Payload::Labels(v) => v.map(|p| *p as f32),
        })
    }

    fn read_labels(&self, key: &SeriesKey) -> Result<LabelVolume, StoreError> {
        Ok(match &self.get(key)?.payload {
            Payload::Labels(v) => v.clone(),
            Payload::Scalar(v) => v.map(|p| p.round().clamp(0.0, 255.0) as u8),
        })
    }

    fn write_scalar(
        &mut self,
        volume: &ScalarVolume,
        key: &SeriesKey,
        reference: &SeriesKey,
    ) -> Result<(), StoreError> {
        self.insert(
            key.clone(),
            Payload::Scalar(volume.clone()),
            Some(reference.clone()),
        );
        self.writes += 1;
        Ok(())
    }

    fn write_labels(
        &mut self,
        volume: &LabelVolume,
        key: &SeriesKey,
        reference: &SeriesKey,
    ) -> Result<(), StoreError> {
        self.insert(
            key.clone(),
            Payload::Labels(volume.clone()),
            Some(reference.clone()),
        );
        self.writes += 1;
        Ok(())
    }

    fn copy_series(&mut self, src: &SeriesKey, dst: &SeriesKey) -> Result<(), StoreError> {
        let payload = self.get(src)?.payload.clone();
        self.insert(dst.clone(), payload, Some(src.clone()));
        self.writes += 1;
        Ok(())
    }

    fn provenance(&self, key: &SeriesKey) -> Result<Option<SeriesKey>, StoreError> {
        Ok(self.get(key)?.provenance.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_mem_store_basics() {
        let mut store = MemStore::new();
        let raw = SeriesKey::new("/raw", "p1", ("Baseline", 0), ("Dixon_water", 0));
        let labels = LabelVolume::with_spacing(Array3::from_elem((1, 2, 2), 3u8), [1.0; 3]);
        store.insert_labels(raw.clone(), labels.clone());
        assert_eq!(store.writes(), 0);
        assert_eq!(store.provenance(&raw).unwrap(), None);

        // 标签读成标量.
        let scalar = store.read_scalar(&raw).unwrap();
        assert!(scalar.data().iter().all(|v| *v == 3.0));

        let out = raw.relocated("/out", "Dixon_kidney_masks");
        store.copy_series(&raw, &out).unwrap();
        assert_eq!(store.writes(), 1);
        assert_eq!(store.read_labels(&out).unwrap(), labels);
        assert_eq!(store.provenance(&out).unwrap(), Some(raw.clone()));

        assert_eq!(store.list_series(Path::new("/out")).unwrap(), vec![out]);
        assert!(store.list_series(Path::new("/none")).unwrap().is_empty());
        assert!(matches!(
            store.read_scalar(&raw.sibling("Dixon_fat")),
            Err(StoreError::Missing(_))
        ));
    }
}
