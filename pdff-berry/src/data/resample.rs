//! 重采样. 三线性插值, 网格间重切片 (reslice) 和基于逐体素偏移的形变采样.
//!
//! 采样点落在数据范围之外的部分按 0 处理.

use nalgebra::Vector4;
use ndarray::{Array3, ArrayView3};

use crate::{Geometry, Idx3d, ScalarVolume};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use ndarray::Axis;
        use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
    }
}

/// 在小数索引 `[z, h, w]` 处三线性采样.
///
/// 落在数据范围外的角点贡献 0. 权重为 0 的角点不会被访问,
/// 因此整数索引处的采样与原值完全一致.
pub fn trilinear(data: &ArrayView3<f32>, [z, h, w]: [f64; 3]) -> f32 {
    if !(z.is_finite() && h.is_finite() && w.is_finite()) {
        return 0.0;
    }
    let (nz, nh, nw) = data.dim();
    let (z0, h0, w0) = (z.floor(), h.floor(), w.floor());
    let (dz, dh, dw) = (z - z0, h - h0, w - w0);

    let inside = |i: i64, n: usize| i >= 0 && (i as usize) < n;

    let mut acc = 0.0f64;
    for (oz, fz) in [(0, 1.0 - dz), (1, dz)] {
        for (oh, fh) in [(0, 1.0 - dh), (1, dh)] {
            for (ow, fw) in [(0, 1.0 - dw), (1, dw)] {
                let weight = fz * fh * fw;
                if weight == 0.0 {
                    continue;
                }
                let (iz, ih, iw) = (z0 as i64 + oz, h0 as i64 + oh, w0 as i64 + ow);
                if inside(iz, nz) && inside(ih, nh) && inside(iw, nw) {
                    acc += weight * data[(iz as usize, ih as usize, iw as usize)] as f64;
                }
            }
        }
    }
    acc as f32
}

/// 按 `shape` 生成新数组, 每个体素的值由 `f` 给出.
///
/// 开启 `rayon` 时按水平切片并行填充.
pub fn fill_grid<F>(shape: Idx3d, f: F) -> Array3<f32>
where
    F: Fn(Idx3d) -> f32 + Sync + Send,
{
    let mut out = Array3::<f32>::zeros(shape);
    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            out.axis_iter_mut(Axis(0))
                .into_par_iter()
                .enumerate()
                .for_each(|(z, mut sli)| {
                    sli.indexed_iter_mut().for_each(|((h, w), p)| *p = f((z, h, w)));
                });
        } else {
            out.indexed_iter_mut().for_each(|(pos, p)| *p = f(pos));
        }
    }
    out
}

/// 将 `src` 纯几何地重切片到 `target` 网格上 (与任何形变无关).
///
/// 两者网格一致时直接复制数据.
pub fn reslice(src: &ScalarVolume, target: &Geometry) -> Array3<f32> {
    if src.geometry().same_grid(target) {
        return src.data().to_owned();
    }
    let m = target.index_map_to(src.geometry());
    let data = src.data();
    fill_grid(target.shape(), |(z, h, w)| {
        let p = m * Vector4::new(w as f64, h as f64, z as f64, 1.0);
        trilinear(&data, [p.z, p.y, p.x])
    })
}

/// 按逐体素偏移 (体素单位, `[z, h, w]`) 对 `data` 做形变采样:
/// `out(x) = data(x + offset(x))`.
pub fn warp<F>(data: &ArrayView3<f32>, offset: F) -> Array3<f32>
where
    F: Fn(Idx3d) -> [f64; 3] + Sync + Send,
{
    fill_grid(data.dim(), |(z, h, w)| {
        let [dz, dh, dw] = offset((z, h, w));
        trilinear(data, [z as f64 + dz, h as f64 + dh, w as f64 + dw])
    })
}
