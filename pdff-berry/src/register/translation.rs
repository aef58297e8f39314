use log::debug;
use ndarray::{Array3, ArrayView3, Zip};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::{check_spacing, Registration, RegistrationError, Transform};
use crate::data::resample;
use crate::Spacing;

/// 平移搜索的参数.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegistrationOptions {
    /// 各方向最大平移量, 以毫米为单位.
    pub max_shift_mm: f64,

    /// 最细一层的搜索步长, 以毫米为单位.
    pub final_step_mm: f64,

    /// 由粗到细的层数. 每层步长减半.
    pub levels: u32,
}

impl Default for RegistrationOptions {
    fn default() -> Self {
        Self {
            max_shift_mm: 10.0,
            final_step_mm: 1.0,
            levels: 3,
        }
    }
}

impl RegistrationOptions {
    fn validate(&self) -> Result<(), RegistrationError> {
        if !(self.max_shift_mm.is_finite() && self.max_shift_mm >= 0.0) {
            return Err(RegistrationError::config("max_shift_mm must be non-negative"));
        }
        if !(self.final_step_mm.is_finite() && self.final_step_mm > 0.0) {
            return Err(RegistrationError::config("final_step_mm must be positive"));
        }
        if self.levels == 0 {
            return Err(RegistrationError::config("levels must be at least 1"));
        }
        Ok(())
    }

    /// 第 `level` 层 (0 为最粗) 的步长.
    #[inline]
    fn step_at(&self, level: u32) -> f64 {
        self.final_step_mm * 2f64.powi((self.levels - 1 - level) as i32)
    }
}

/// 由粗到细的全局平移搜索. 以均方误差为相似性度量.
///
/// 最粗一层在 `[-max_shift, max_shift]` 内穷举, 之后每层只在上一层最优解的
/// 26 邻域内搜索. 得分相同时保留距离原点更近的解.
#[derive(Debug, Clone, Default)]
pub struct TranslationSearch {
    options: RegistrationOptions,
}

impl TranslationSearch {
    /// 使用给定参数创建引擎.
    #[inline]
    pub fn new(options: RegistrationOptions) -> Self {
        Self { options }
    }

    /// 参数.
    #[inline]
    pub fn options(&self) -> &RegistrationOptions {
        &self.options
    }
}

/// `moving` 平移 `offset` (体素) 后与 `fixed` 的均方误差.
fn mse(moving: &ArrayView3<f32>, fixed: &ArrayView3<f32>, offset: [f64; 3]) -> f64 {
    let warped = resample::warp(moving, |_| offset);
    let sum = Zip::from(&warped)
        .and(fixed)
        .fold(0.0f64, |acc, a, b| acc + ((a - b) as f64).powi(2));
    sum / fixed.len().max(1) as f64
}

#[inline]
fn to_voxels([z, h, w]: [f64; 3], [sz, sh, sw]: Spacing) -> [f64; 3] {
    [z / sz, h / sh, w / sw]
}

#[inline]
fn norm2(p: &[f64; 3]) -> f64 {
    p.iter().map(|v| v * v).sum()
}

impl Registration for TranslationSearch {
    fn register(
        &self,
        moving: ArrayView3<f32>,
        fixed: ArrayView3<f32>,
        spacing: Spacing,
    ) -> Result<(Array3<f32>, Transform), RegistrationError> {
        self.options.validate()?;
        check_spacing(spacing)?;
        RegistrationError::check_shape(fixed.shape(), moving.shape())?;

        let max = self.options.max_shift_mm;
        let mut best = [0.0f64; 3];
        let mut best_score = mse(&moving, &fixed, best);
        if !best_score.is_finite() {
            return Err(RegistrationError::Degenerate(
                "similarity metric is not finite".into(),
            ));
        }

        for level in 0..self.options.levels {
            let step = self.options.step_at(level);
            // 最粗一层穷举整个范围, 之后只搜索邻域.
            let reach = if level == 0 {
                (max / step).floor() as i64
            } else {
                1
            };
            let center = best;
            for kz in -reach..=reach {
                for kh in -reach..=reach {
                    for kw in -reach..=reach {
                        let cand = [
                            center[0] + kz as f64 * step,
                            center[1] + kh as f64 * step,
                            center[2] + kw as f64 * step,
                        ];
                        if cand.iter().any(|c| c.abs() > max + 1e-9) {
                            continue;
                        }
                        let score = mse(&moving, &fixed, to_voxels(cand, spacing));
                        if score < best_score
                            || (score == best_score && norm2(&cand) < norm2(&best))
                        {
                            best_score = score;
                            best = cand;
                        }
                    }
                }
            }
            debug!("translation search level {level}: step {step}mm, best {best:?}, mse {best_score}");
        }

        let registered = resample::warp(&moving, |_| to_voxels(best, spacing));
        Ok((registered, Transform::translation(best, spacing)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::Deformation;

    fn blob(center: [f64; 3]) -> Array3<f32> {
        Array3::from_shape_fn((8, 16, 16), |(z, h, w)| {
            let d = (z as f64 - center[0]).powi(2)
                + (h as f64 - center[1]).powi(2)
                + (w as f64 - center[2]).powi(2);
            (100.0 * (-d / 8.0).exp()) as f32
        })
    }

    #[test]
    fn test_recovers_shift() {
        let fixed = blob([4.0, 8.0, 7.0]);
        let moving = blob([4.0, 8.0, 9.0]);
        let engine = TranslationSearch::new(RegistrationOptions {
            max_shift_mm: 4.0,
            final_step_mm: 1.0,
            levels: 2,
        });
        let (registered, t) = engine
            .register(moving.view(), fixed.view(), [1.0; 3])
            .unwrap();
        assert_eq!(
            t.deformation(),
            &Deformation::Translation {
                offset_mm: [0.0, 0.0, 2.0]
            }
        );
        assert!((registered[(4, 8, 7)] - fixed[(4, 8, 7)]).abs() < 1e-4);

        // 同一形变施加到 moving 上得到同样的结果.
        let again = engine
            .apply_transform(moving.view(), &t, [1.0; 3])
            .unwrap();
        assert_eq!(again, registered);
    }

    #[test]
    fn test_identical_images_stay_put() {
        let fixed = blob([4.0, 8.0, 8.0]);
        let (registered, t) = TranslationSearch::default()
            .register(fixed.view(), fixed.view(), [2.0, 1.0, 1.0])
            .unwrap();
        assert_eq!(
            t.deformation(),
            &Deformation::Translation {
                offset_mm: [0.0; 3]
            }
        );
        assert_eq!(registered, fixed);
    }

    #[test]
    fn test_rejects_bad_input() {
        let a = Array3::<f32>::zeros((2, 2, 2));
        let b = Array3::<f32>::zeros((2, 2, 3));
        let engine = TranslationSearch::default();
        assert!(matches!(
            engine.register(a.view(), b.view(), [1.0; 3]),
            Err(RegistrationError::ShapeMismatch { .. })
        ));

        let bad = TranslationSearch::new(RegistrationOptions {
            levels: 0,
            ..Default::default()
        });
        assert!(matches!(
            bad.register(a.view(), a.view(), [1.0; 3]),
            Err(RegistrationError::InvalidConfiguration(_))
        ));

        let mut nan = a.clone();
        nan[(0, 0, 0)] = f32::NAN;
        assert!(matches!(
            engine.register(a.view(), nan.view(), [1.0; 3]),
            Err(RegistrationError::Degenerate(_))
        ));
    }
}
