//! 配准引擎接口.
//!
//! 配准将 moving 图像形变到 fixed 图像的网格上, 并给出一个可以再次施加到
//! 同一网格上其它数据的形变 [`Transform`]. 标签迁移就是靠它完成的.

use ndarray::{Array3, Array4, ArrayView3};
use thiserror::Error;

use crate::data::resample;
use crate::Spacing;

mod translation;

pub use translation::{RegistrationOptions, TranslationSearch};

/// 配准错误.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistrationError {
    /// 输入形状不一致.
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// 期望形状.
        expected: Vec<usize>,
        /// 实际形状.
        actual: Vec<usize>,
    },

    /// 配准结果退化 (非有限值等).
    #[error("degenerate registration: {0}")]
    Degenerate(String),

    /// 参数配置错误.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl RegistrationError {
    /// 比较两个形状, 不一致时返回 `ShapeMismatch`.
    pub fn check_shape(expected: &[usize], actual: &[usize]) -> Result<(), Self> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self::ShapeMismatch {
                expected: expected.to_vec(),
                actual: actual.to_vec(),
            })
        }
    }

    /// 创建参数配置错误.
    #[inline]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }
}

/// 形变的具体形式. 所有位移都以毫米为单位, 按 `[z, h, w]` 组织,
/// 含义为 `out(x) = moving(x + d(x))`.
#[derive(Debug, Clone, PartialEq)]
pub enum Deformation {
    /// 恒等形变.
    Identity,

    /// 全局平移.
    Translation {
        /// 平移量.
        offset_mm: [f64; 3],
    },

    /// 稠密位移场, 形状为 `(z, h, w, 3)`.
    Displacement {
        /// 位移场.
        field: Array4<f32>,
    },
}

/// 配准引擎给出的形变, 以及计算它时所用的体素分辨率.
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    deformation: Deformation,
    spacing: Spacing,
}

impl Transform {
    /// 恒等形变.
    #[inline]
    pub fn identity(spacing: Spacing) -> Self {
        Self {
            deformation: Deformation::Identity,
            spacing,
        }
    }

    /// 全局平移.
    #[inline]
    pub fn translation(offset_mm: [f64; 3], spacing: Spacing) -> Self {
        Self {
            deformation: Deformation::Translation { offset_mm },
            spacing,
        }
    }

    /// 稠密位移场. 最后一维长度必须为 3.
    pub fn displacement(field: Array4<f32>, spacing: Spacing) -> Result<Self, RegistrationError> {
        let d = field.dim();
        if d.3 != 3 {
            return Err(RegistrationError::ShapeMismatch {
                expected: vec![d.0, d.1, d.2, 3],
                actual: field.shape().to_vec(),
            });
        }
        Ok(Self {
            deformation: Deformation::Displacement { field },
            spacing,
        })
    }

    /// 形变本身.
    #[inline]
    pub fn deformation(&self) -> &Deformation {
        &self.deformation
    }

    /// 计算形变时的体素分辨率 `[z, h, w]`.
    #[inline]
    pub fn spacing(&self) -> Spacing {
        self.spacing
    }
}

/// 配准引擎.
pub trait Registration {
    /// 将 `moving` 配准到 `fixed`. 两者必须已经位于同一网格上,
    /// 体素分辨率为 `spacing`.
    ///
    /// 返回形变后的 moving 图像 (形状与 `fixed` 一致) 以及形变本身.
    fn register(
        &self,
        moving: ArrayView3<f32>,
        fixed: ArrayView3<f32>,
        spacing: Spacing,
    ) -> Result<(Array3<f32>, Transform), RegistrationError>;

    /// 将已有形变施加到 `data` 上. `spacing` 为 `data` 所在网格的分辨率.
    fn apply_transform(
        &self,
        data: ArrayView3<f32>,
        transform: &Transform,
        spacing: Spacing,
    ) -> Result<Array3<f32>, RegistrationError> {
        apply_deformation(data, transform, spacing)
    }
}

impl<R: Registration + ?Sized> Registration for &R {
    #[inline]
    fn register(
        &self,
        moving: ArrayView3<f32>,
        fixed: ArrayView3<f32>,
        spacing: Spacing,
    ) -> Result<(Array3<f32>, Transform), RegistrationError> {
        (**self).register(moving, fixed, spacing)
    }

    #[inline]
    fn apply_transform(
        &self,
        data: ArrayView3<f32>,
        transform: &Transform,
        spacing: Spacing,
    ) -> Result<Array3<f32>, RegistrationError> {
        (**self).apply_transform(data, transform, spacing)
    }
}

/// 检查分辨率是否全部为有限正数.
pub(crate) fn check_spacing(spacing: Spacing) -> Result<(), RegistrationError> {
    if spacing.iter().all(|s| s.is_finite() && *s > 0.0) {
        Ok(())
    } else {
        Err(RegistrationError::config(format!(
            "spacing must be positive, got {spacing:?}"
        )))
    }
}

/// 用三线性插值施加形变. 毫米位移按 `spacing` 换算为体素位移.
pub fn apply_deformation(
    data: ArrayView3<f32>,
    transform: &Transform,
    spacing: Spacing,
) -> Result<Array3<f32>, RegistrationError> {
    check_spacing(spacing)?;
    let [sz, sh, sw] = spacing;
    match transform.deformation() {
        Deformation::Identity => Ok(data.to_owned()),
        Deformation::Translation { offset_mm: [z, h, w] } => {
            let offset = [z / sz, h / sh, w / sw];
            Ok(resample::warp(&data, |_| offset))
        }
        Deformation::Displacement { field } => {
            let (fz, fh, fw, _) = field.dim();
            RegistrationError::check_shape(data.shape(), &[fz, fh, fw])?;
            Ok(resample::warp(&data, |(z, h, w)| {
                [
                    field[(z, h, w, 0)] as f64 / sz,
                    field[(z, h, w, 1)] as f64 / sh,
                    field[(z, h, w, 2)] as f64 / sw,
                ]
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Passive;

    impl Registration for Passive {
        fn register(
            &self,
            moving: ArrayView3<f32>,
            _fixed: ArrayView3<f32>,
            spacing: Spacing,
        ) -> Result<(Array3<f32>, Transform), RegistrationError> {
            Ok((moving.to_owned(), Transform::identity(spacing)))
        }
    }

    fn ramp() -> Array3<f32> {
        Array3::from_shape_fn((3, 4, 5), |(z, h, w)| (z * 20 + h * 5 + w) as f32)
    }

    #[test]
    fn test_identity_is_copy() {
        let data = ramp();
        let out = Passive
            .apply_transform(data.view(), &Transform::identity([1.0; 3]), [2.0, 1.0, 1.0])
            .unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_translation_mm_to_voxels() {
        let data = ramp();
        // w 方向 3mm, 分辨率 1.5mm => 2 个体素.
        let t = Transform::translation([0.0, 0.0, 3.0], [1.0; 3]);
        let out = Passive
            .apply_transform(data.view(), &t, [2.0, 1.5, 1.5])
            .unwrap();
        assert_eq!(out[(1, 2, 0)], data[(1, 2, 2)]);
        assert_eq!(out[(1, 2, 3)], 0.0);
    }

    #[test]
    fn test_displacement_field() {
        let data = ramp();
        let mut field = Array4::<f32>::zeros((3, 4, 5, 3));
        // 仅对 (1, 1, 1) 施加 h 方向 +2mm 的位移.
        field[(1, 1, 1, 1)] = 2.0;
        let t = Transform::displacement(field, [1.0; 3]).unwrap();
        let out = Passive.apply_transform(data.view(), &t, [1.0; 3]).unwrap();
        assert_eq!(out[(1, 1, 1)], data[(1, 3, 1)]);
        assert_eq!(out[(1, 1, 2)], data[(1, 1, 2)]);

        // 位移场与数据形状不一致.
        let small = Array3::<f32>::zeros((2, 4, 5));
        assert!(matches!(
            Passive.apply_transform(small.view(), &t, [1.0; 3]),
            Err(RegistrationError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_bad_field_and_spacing() {
        assert!(Transform::displacement(Array4::zeros((2, 2, 2, 2)), [1.0; 3]).is_err());
        let data = ramp();
        assert!(matches!(
            apply_deformation(data.view(), &Transform::identity([1.0; 3]), [0.0, 1.0, 1.0]),
            Err(RegistrationError::InvalidConfiguration(_))
        ));
    }
}
