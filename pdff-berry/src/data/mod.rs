use std::fmt::Debug;
use std::hash::Hash;
use std::ops::Index;
use std::path::Path;

use itertools::Itertools;
use ndarray::{Array3, ArrayD, ArrayView, ArrayView3, Ix3, Zip};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiError, NiftiHeader, NiftiObject, ReaderOptions};
use num::PrimInt;
use thiserror::Error;

use crate::Idx3d;

mod geometry;
pub mod resample;

pub use geometry::{Geometry, Spacing};

/// 标量体数据 (water, fat, PDFF 等). 体素值以 `f32` 保存.
pub type ScalarVolume = Volume<f32>;

/// 多类别标签体数据. 标签值以 `u8` 保存, 0 代表背景.
pub type LabelVolume = Volume<u8>;

/// 可作为标签值的整数类型.
///
/// 标签值只有身份意义, 没有大小意义: 不同标签值之间的算术和插值都是无效的.
pub trait LabelValue: PrimInt + Hash + Debug + Send + Sync + 'static {}

impl<T> LabelValue for T where T: PrimInt + Hash + Debug + Send + Sync + 'static {}

/// 数据形状与几何信息不一致.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("shape mismatch: geometry expects {expected:?}, data has {actual:?}")]
pub struct VolumeShapeError {
    /// 几何信息要求的形状.
    pub expected: Idx3d,

    /// 实际数据形状.
    pub actual: Vec<usize>,
}

/// 读写 nii 文件错误.
#[derive(Error, Debug)]
pub enum VolumeIoError {
    /// nifti 底层错误.
    #[error("nifti error: {0}")]
    Nifti(#[from] NiftiError),

    /// 数据无法压缩成 3D.
    #[error(transparent)]
    Shape(#[from] VolumeShapeError),
}

/// 3D 体数据, 包括数据本身和空间几何信息.
///
/// 体数据加载后即为只读快照. 几何信息发生改变 (重采样, 裁剪) 时,
/// 总是生成新的 `Volume`, 而不是原地修改.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume<T> {
    geometry: Geometry,
    data: Array3<T>,
}

impl<T> Index<Idx3d> for Volume<T> {
    type Output = T;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl<T> Volume<T> {
    /// 根据 `(z, h, w)` 组织的数据和几何信息创建体数据.
    ///
    /// 若两者形状不一致, 则返回 `Err`.
    pub fn new(data: Array3<T>, geometry: Geometry) -> Result<Self, VolumeShapeError> {
        if data.dim() != geometry.shape() {
            return Err(VolumeShapeError {
                expected: geometry.shape(),
                actual: data.shape().to_vec(),
            });
        }
        Ok(Self { geometry, data })
    }

    /// 根据数据和体素分辨率 `[z, h, w]` 直接创建轴对齐的体数据.
    ///
    /// 分辨率必须全部为正数, 否则程序 panic.
    pub fn with_spacing(data: Array3<T>, spacing: Spacing) -> Self {
        let geometry = Geometry::from_spacing(data.dim(), spacing);
        Self { geometry, data }
    }

    /// 获取几何信息.
    #[inline]
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// 获取数据形状大小 `(z, h, w)`.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.geometry.shape()
    }

    /// 获取单个体素分辨率 `[z, h, w]`, 以毫米为单位.
    #[inline]
    pub fn spacing(&self) -> Spacing {
        self.geometry.spacing()
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, T, Ix3> {
        self.data.view()
    }

    /// 消费自我, 获得底层数据.
    #[inline]
    pub fn into_data(self) -> Array3<T> {
        self.data
    }

    /// 在同一几何信息上逐体素映射, 生成新的体数据.
    pub fn map<U, F: FnMut(&T) -> U>(&self, f: F) -> Volume<U> {
        Volume {
            geometry: self.geometry.clone(),
            data: self.data.map(f),
        }
    }

    /// 与同形状的数组逐体素组合, 生成新的体数据. 形状不一致时程序 panic.
    pub fn zip_map<U, V, F>(&self, other: &ArrayView3<'_, V>, mut f: F) -> Volume<U>
    where
        F: FnMut(&T, &V) -> U,
    {
        Volume {
            geometry: self.geometry.clone(),
            data: Zip::from(&self.data)
                .and(other)
                .map_collect(|a, b| f(a, b)),
        }
    }
}

impl<L: LabelValue> Volume<L> {
    /// 获取所有出现过的标签值 (包括背景), 按升序排列.
    pub fn labels(&self) -> Vec<L> {
        self.data.iter().copied().sorted_unstable().dedup().collect()
    }

    /// 获取值为 `label` 的体素个数.
    #[inline]
    pub fn count(&self, label: L) -> usize {
        self.data.iter().filter(|p| **p == label).count()
    }

    /// 获取值为 `label` 的二值指示图 (1.0 或 0.0).
    #[inline]
    pub fn indicator(&self, label: L) -> ScalarVolume {
        self.map(|p| if *p == label { 1.0 } else { 0.0 })
    }
}

/// 将 nifti 读出的 `[W, H, z, ...]` 数据转换成 `(z, H, W)`.
///
/// 尾部长度为 1 的维度会被压缩掉. 其余情况返回 `Err`.
fn squeeze_to_zhw<T: Clone>(data: ArrayD<T>, shape: Idx3d) -> Result<Array3<T>, VolumeShapeError> {
    let (z, h, w) = shape;
    let err = |data: &ArrayD<T>| VolumeShapeError {
        expected: shape,
        actual: data.shape().to_vec(),
    };
    if data.len() != z * h * w || data.shape().iter().skip(3).any(|d| *d != 1) {
        return Err(err(&data));
    }

    // [W, H, z, 1, ...] -> [..., 1, z, H, W]
    // hint: 反转后按行优先展开即为 (z, H, W) 的行优先展开.
    let reversed = data.reversed_axes();
    let raw = reversed.as_standard_layout().into_owned().into_raw_vec();
    Array3::from_shape_vec(shape, raw).map_err(|_| VolumeShapeError {
        expected: shape,
        actual: vec![z * h * w],
    })
}

macro_rules! impl_nifti_io {
    ($t: ty) => {
        impl Volume<$t> {
            /// 打开 nii 文件格式的 3D 体数据. `path` 为 nii (或 nii.gz) 文件的本地路径.
            /// 如果打开成功, 则返回 `Ok(Self)`, 否则返回 `Err`.
            ///
            /// 高维数据的尾部单例维度会被压缩成 3D.
            pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VolumeIoError> {
                let obj = ReaderOptions::new().read_file(path.as_ref())?;
                let geometry = Geometry::from_header(obj.header());
                let data = obj.into_volume().into_ndarray::<$t>()?;
                let data = squeeze_to_zhw(data, geometry.shape())?;
                Ok(Self { geometry, data })
            }

            /// 将体数据保存为 nii 文件. 路径以 `.gz` 结尾时自动压缩.
            ///
            /// 仿射矩阵以 sform 形式保存.
            pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), VolumeIoError> {
                let mut header = NiftiHeader::default();
                self.geometry.write_header(&mut header);

                // (z, H, W) -> [W, H, z]
                let data = self.data.view().permuted_axes([2, 1, 0]);
                WriterOptions::new(path.as_ref())
                    .reference_header(&header)
                    .write_nifti(&data)?;
                Ok(())
            }
        }
    };
}

impl_nifti_io!(f32);
impl_nifti_io!(u8);

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    #[test]
    fn test_labels_sorted_unique() {
        let data = Array3::from_shape_vec((1, 2, 3), vec![2u8, 0, 7, 2, 0, 1]).unwrap();
        let v = Volume::with_spacing(data, [1.0; 3]);
        assert_eq!(v.labels(), vec![0, 1, 2, 7]);
        assert_eq!(v.count(2), 2);
        assert_eq!(v.count(3), 0);

        let ind = v.indicator(2);
        assert_eq!(ind.data().sum(), 2.0);
        assert_eq!(ind.geometry(), v.geometry());
    }

    #[test]
    fn test_shape_mismatch() {
        let g = Geometry::from_spacing((2, 2, 2), [1.0; 3]);
        let err = Volume::new(Array3::<f32>::zeros((2, 2, 3)), g).unwrap_err();
        assert_eq!(err.expected, (2, 2, 2));
        assert_eq!(err.actual, vec![2, 2, 3]);
    }

    #[test]
    fn test_squeeze_trailing_singleton() {
        // [W, H, z, t] = [3, 2, 2, 1]
        let data = Array::from_shape_fn(vec![3, 2, 2, 1], |d| (d[0] + 10 * d[1] + 100 * d[2]) as f32);
        let out = squeeze_to_zhw(data, (2, 2, 3)).unwrap();
        assert_eq!(out[(1, 0, 2)], 102.0);
        assert_eq!(out[(0, 1, 1)], 11.0);
    }

    #[test]
    fn test_squeeze_rejects_time_series() {
        let data = Array::<f32, _>::zeros(vec![3, 2, 2, 4]);
        assert!(squeeze_to_zhw(data, (2, 2, 3)).is_err());
    }

    #[test]
    fn test_nifti_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.nii.gz");

        let data = Array3::from_shape_fn((3, 4, 5), |(z, h, w)| ((z + h + w) % 3) as u8);
        let v = Volume::with_spacing(data, [2.5, 1.25, 1.25]);
        v.save(&path).unwrap();

        let back = LabelVolume::open(&path).unwrap();
        assert_eq!(back.data(), v.data());
        assert!(back.geometry().same_grid(v.geometry()));
    }
}
