//! 肾脏 PDFF 测量.
//!
//! 对左肾, 右肾和双肾三个 ROI, 计算 PDFF 图的一阶直方图特征以及 ROI 级 PDFF
//! `mean(fat) / mean(fat + water)`. 同一 `(patient, study)` 的结果保存为一个记录文件.

use ndarray::ArrayView3;

use crate::consts::class::kidney;
use crate::{LabelVolume, ScalarVolume};

mod features;

pub use features::{Feature, FeatureExtractor, FirstOrder, InvalidBinWidth};

#[cfg(feature = "serde")]
mod kidneys;

#[cfg(feature = "serde")]
pub use kidneys::{MeasureError, MeasureKidneys, MeasureOptions, MeasurePaths};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 被测量的图像名.
pub const IMAGE: &str = "dixon_pdff";

/// 一条测量结果.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Measurement {
    /// 参数名, 如 `kidney_left-dixon_pdff-histogram-Mean`.
    pub name: String,

    /// 值.
    pub value: f64,

    /// 描述.
    pub description: String,

    /// 单位.
    pub unit: String,

    /// 值类型, 如 `float`.
    pub kind: String,
}

impl Measurement {
    fn float(name: String, value: f64, unit: &str) -> Self {
        Self {
            description: name.clone(),
            name,
            value,
            unit: unit.to_owned(),
            kind: "float".to_owned(),
        }
    }
}

/// 某位受试者某次检查的全部测量结果.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MeasurementRecord {
    /// 受试者 ID.
    pub patient: String,

    /// study 描述.
    pub study: String,

    /// 被测量的序列.
    pub sequence: String,

    /// 测量结果.
    pub measurements: Vec<Measurement>,
}

impl MeasurementRecord {
    /// 按名称查找测量值.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.measurements
            .iter()
            .find(|m| m.name == name)
            .map(|m| m.value)
    }
}

/// 肾脏 ROI 的名称与判定规则.
pub const KIDNEY_ROIS: [(&str, KidneyRoi); 3] = [
    ("kidney_left", KidneyRoi::Label(kidney::LEFT)),
    ("kidney_right", KidneyRoi::Label(kidney::RIGHT)),
    ("kidneys_both", KidneyRoi::AnyKidney),
];

/// ROI 判定规则.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KidneyRoi {
    /// 等于某个标签值.
    Label(u8),

    /// 任意非背景标签.
    AnyKidney,
}

impl KidneyRoi {
    #[inline]
    fn contains(&self, p: u8) -> bool {
        match self {
            KidneyRoi::Label(v) => p == *v,
            KidneyRoi::AnyKidney => p != 0,
        }
    }
}

/// 测量所有肾脏 ROI. 空 ROI 不产生任何结果.
///
/// 所有输入必须形状一致, 否则程序 panic.
pub fn measure_kidneys<F: FeatureExtractor + ?Sized>(
    masks: &LabelVolume,
    pdff: &ScalarVolume,
    fat: &ArrayView3<f32>,
    water: &ArrayView3<f32>,
    extractor: &F,
) -> Vec<Measurement> {
    assert_eq!(masks.shape(), pdff.shape());
    assert_eq!(fat.dim(), pdff.shape());
    assert_eq!(water.dim(), pdff.shape());

    let voxel_volume = pdff.geometry().voxel_volume();
    let mut ans = Vec::new();
    for (roi, rule) in KIDNEY_ROIS {
        let (mut values, mut fat_sum, mut total_sum) = (Vec::new(), 0.0f64, 0.0f64);
        for (((m, p), f), w) in masks
            .data()
            .iter()
            .zip(pdff.data().iter())
            .zip(fat.iter())
            .zip(water.iter())
        {
            if rule.contains(*m) {
                values.push(*p);
                fat_sum += *f as f64;
                total_sum += (*f + *w) as f64;
            }
        }
        if values.is_empty() {
            continue;
        }

        for feat in extractor.extract(&values, voxel_volume) {
            ans.push(Measurement::float(
                format!("{roi}-{IMAGE}-histogram-{}", feat.name),
                feat.value,
                feat.unit,
            ));
        }
        // 体素个数相同, 均值之比即为和之比.
        let roi_pdff = if total_sum > 0.0 {
            fat_sum / total_sum
        } else {
            0.0
        };
        ans.push(Measurement::float(format!("{roi}-{IMAGE}-roi"), roi_pdff, ""));
    }
    ans
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_measure_kidneys() {
        // 左肾 4 个体素, 右肾为空.
        let masks = LabelVolume::with_spacing(
            Array3::from_shape_fn((1, 2, 4), |(_, h, _)| if h == 0 { 1 } else { 0 }),
            [2.0, 1.0, 1.0],
        );
        let pdff = ScalarVolume::with_spacing(Array3::from_elem((1, 2, 4), 0.1), [2.0, 1.0, 1.0]);
        let fat = Array3::from_elem((1, 2, 4), 1.0f32);
        let water = Array3::from_elem((1, 2, 4), 3.0f32);

        let m = measure_kidneys(&masks, &pdff, &fat.view(), &water.view(), &FirstOrder::default());
        let record = MeasurementRecord {
            measurements: m,
            ..Default::default()
        };
        assert_eq!(record.get("kidney_left-dixon_pdff-roi"), Some(0.25));
        assert_eq!(record.get("kidneys_both-dixon_pdff-roi"), Some(0.25));
        assert!(record.get("kidney_right-dixon_pdff-roi").is_none());
        let mean = record.get("kidney_left-dixon_pdff-histogram-Mean").unwrap();
        assert!((mean - 0.1).abs() < 1e-6);
        let total = record
            .get("kidney_left-dixon_pdff-histogram-TotalEnergy")
            .unwrap();
        let energy = record.get("kidney_left-dixon_pdff-histogram-Energy").unwrap();
        assert!((total - 2.0 * energy).abs() < 1e-9);
    }
}
