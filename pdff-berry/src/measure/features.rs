use std::collections::BTreeMap;

use ordered_float::OrderedFloat;
use thiserror::Error;

/// 一个 ROI 特征值.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    /// 特征名称, 如 `Mean`.
    pub name: &'static str,

    /// 特征值.
    pub value: f64,

    /// 单位. 无量纲时为空串.
    pub unit: &'static str,
}

/// ROI 特征提取器.
pub trait FeatureExtractor {
    /// 从 ROI 内的体素值 `values` 计算特征. `voxel_volume` 为单个体素体积 (立方毫米).
    ///
    /// `values` 为空时返回空列表.
    fn extract(&self, values: &[f32], voxel_volume: f64) -> Vec<Feature>;
}

/// 直方图区间宽度不是有限正数.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
#[error("histogram bin width must be finite and positive, got {0}")]
pub struct InvalidBinWidth(pub f64);

/// 一阶 (直方图) 特征. 离散化时使用固定的区间宽度.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FirstOrder {
    bin_width: f64,
}

impl Default for FirstOrder {
    fn default() -> Self {
        Self { bin_width: 0.001 }
    }
}

/// 已排序数据的百分位数 (线性插值). `sorted` 不能为空.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let pos = p / 100.0 * (sorted.len() - 1) as f64;
    let (lo, hi) = (pos.floor() as usize, pos.ceil() as usize);
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

#[inline]
fn mean(v: &[f64]) -> f64 {
    v.iter().sum::<f64>() / v.len() as f64
}

impl FirstOrder {
    /// 以区间宽度 `bin_width` 创建.
    pub fn new(bin_width: f64) -> Result<Self, InvalidBinWidth> {
        if bin_width.is_finite() && bin_width > 0.0 {
            Ok(Self { bin_width })
        } else {
            Err(InvalidBinWidth(bin_width))
        }
    }

    /// 直方图区间宽度.
    #[inline]
    pub fn bin_width(&self) -> f64 {
        self.bin_width
    }

    /// 按固定宽度离散化后各非空区间的概率.
    ///
    /// 只记录非空区间, 个别离群值不会导致区间数量膨胀.
    fn histogram(&self, values: &[f64]) -> Vec<f64> {
        let n = values.len() as f64;
        let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
        for v in values {
            *counts.entry((v / self.bin_width).floor() as i64).or_default() += 1;
        }
        counts.into_values().map(|c| c as f64 / n).collect()
    }
}

impl FeatureExtractor for FirstOrder {
    fn extract(&self, values: &[f32], voxel_volume: f64) -> Vec<Feature> {
        let mut x: Vec<f64> = values
            .iter()
            .filter(|v| v.is_finite())
            .map(|v| *v as f64)
            .collect();
        if x.is_empty() {
            return Vec::new();
        }
        x.sort_unstable_by_key(|v| OrderedFloat(*v));
        let n = x.len() as f64;

        let mu = mean(&x);
        let moment = |k: i32| x.iter().map(|v| (v - mu).powi(k)).sum::<f64>() / n;
        let (m2, m3, m4) = (moment(2), moment(3), moment(4));
        let energy = x.iter().map(|v| v * v).sum::<f64>();

        let p10 = percentile(&x, 10.0);
        let p90 = percentile(&x, 90.0);
        let robust: Vec<f64> = x.iter().copied().filter(|v| *v >= p10 && *v <= p90).collect();
        let robust_mu = mean(&robust);

        let probs = self.histogram(&x);
        let entropy = -probs.iter().map(|p| p * p.log2()).sum::<f64>();
        let uniformity = probs.iter().map(|p| p * p).sum::<f64>();

        let (min, max) = (x[0], x[x.len() - 1]);
        let f = |name, value| Feature {
            name,
            value,
            unit: "",
        };
        vec![
            f("Energy", energy),
            Feature {
                name: "TotalEnergy",
                value: energy * voxel_volume,
                unit: "mm^3",
            },
            f("Entropy", entropy),
            f("Minimum", min),
            f("10Percentile", p10),
            f("90Percentile", p90),
            f("Maximum", max),
            f("Mean", mu),
            f("Median", percentile(&x, 50.0)),
            f(
                "InterquartileRange",
                percentile(&x, 75.0) - percentile(&x, 25.0),
            ),
            f("Range", max - min),
            f(
                "MeanAbsoluteDeviation",
                x.iter().map(|v| (v - mu).abs()).sum::<f64>() / n,
            ),
            f(
                "RobustMeanAbsoluteDeviation",
                robust.iter().map(|v| (v - robust_mu).abs()).sum::<f64>() / robust.len() as f64,
            ),
            f("RootMeanSquared", (energy / n).sqrt()),
            f("StandardDeviation", m2.sqrt()),
            f("Skewness", if m2 > 0.0 { m3 / m2.powf(1.5) } else { 0.0 }),
            f("Kurtosis", if m2 > 0.0 { m4 / (m2 * m2) } else { 0.0 }),
            f("Variance", m2),
            f("Uniformity", uniformity),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(features: &[Feature], name: &str) -> f64 {
        features
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value)
            .unwrap()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_percentile_linear() {
        let x = [1.0, 2.0, 3.0, 4.0];
        assert!(close(percentile(&x, 50.0), 2.5));
        assert!(close(percentile(&x, 10.0), 1.3));
        assert!(close(percentile(&x, 100.0), 4.0));
    }

    #[test]
    fn test_first_order() {
        let values = [0.1f32, 0.2, 0.3, 0.4, f32::NAN];
        let f = FirstOrder::new(0.1).unwrap().extract(&values, 2.0);
        assert!(close(get(&f, "Mean"), 0.25));
        assert!((get(&f, "Minimum") - 0.1).abs() < 1e-6);
        assert!((get(&f, "Range") - 0.3).abs() < 1e-6);
        assert!((get(&f, "Variance") - 0.0125).abs() < 1e-6);
        assert!((get(&f, "TotalEnergy") - 2.0 * get(&f, "Energy")).abs() < 1e-12);
        // 4 个区间各占 1/4.
        assert!((get(&f, "Entropy") - 2.0).abs() < 1e-6);
        assert!((get(&f, "Uniformity") - 0.25).abs() < 1e-6);
        assert!(close(get(&f, "Skewness"), 0.0));
    }

    #[test]
    fn test_outlier_uses_two_bins() {
        let f = FirstOrder::default().extract(&[0.0, 1.0e6], 1.0);
        assert!(close(get(&f, "Entropy"), 1.0));
        assert!(close(get(&f, "Uniformity"), 0.5));
        assert!(close(get(&f, "Maximum"), 1.0e6));

        // 极端值仍落在各自的区间内.
        let f = FirstOrder::default().extract(&[-3.0e38, 0.1, 3.0e38], 1.0);
        assert!((get(&f, "Uniformity") - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_bin_width() {
        for w in [0.0, -0.1, f64::NAN, f64::INFINITY] {
            assert!(FirstOrder::new(w).is_err());
        }
        assert_eq!(FirstOrder::new(0.01).unwrap().bin_width(), 0.01);
    }

    #[test]
    fn test_constant_and_empty() {
        let f = FirstOrder::default().extract(&[0.05; 8], 1.0);
        assert!(close(get(&f, "Entropy"), 0.0));
        assert!(close(get(&f, "Uniformity"), 1.0));
        assert!(close(get(&f, "Kurtosis"), 0.0));
        assert!(FirstOrder::default().extract(&[], 1.0).is_empty());
        assert!(FirstOrder::default().extract(&[f32::NAN], 1.0).is_empty());
    }
}
