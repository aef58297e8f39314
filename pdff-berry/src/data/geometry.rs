use nalgebra::{Matrix4, Vector4};
use nifti::NiftiHeader;

use crate::Idx3d;

/// 单个体素分辨率, 以毫米为单位, 按照 `[z, h, w]` 组织.
pub type Spacing = [f64; 3];

/// 仿射矩阵比较时的容差.
const AFFINE_EPS: f64 = 1e-5;

/// 体数据的空间几何信息: 数组形状 + 体素索引到物理空间 (毫米) 的仿射变换.
///
/// 仿射矩阵按照 nifti 惯例作用于 `(i, j, k, 1)`, 其中 `(i, j, k) = (w, h, z)`.
/// 该结构是只读的. 几何信息改变时应当创建新的实例.
#[derive(Clone, Debug, PartialEq)]
pub struct Geometry {
    shape: Idx3d,
    affine: Matrix4<f64>,
    inverse: Matrix4<f64>,
}

impl Geometry {
    /// 从形状和仿射矩阵构建几何信息.
    ///
    /// 如果仿射矩阵不可逆, 则返回 `None`.
    pub fn new(shape: Idx3d, affine: Matrix4<f64>) -> Option<Self> {
        let inverse = affine.try_inverse()?;
        Some(Self {
            shape,
            affine,
            inverse,
        })
    }

    /// 以原点为起点, 轴对齐地按照 `spacing` (`[z, h, w]`) 构建几何信息.
    ///
    /// 分辨率必须全部为正数, 否则程序 panic.
    pub fn from_spacing(shape: Idx3d, spacing: Spacing) -> Self {
        let [z, h, w] = spacing;
        assert!(z > 0.0 && h > 0.0 && w > 0.0, "体素分辨率必须为正数");
        let affine = Matrix4::new(
            w, 0.0, 0.0, 0.0, //
            0.0, h, 0.0, 0.0, //
            0.0, 0.0, z, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        );
        // 对角矩阵必然可逆.
        let inverse = Matrix4::new(
            1.0 / w, 0.0, 0.0, 0.0, //
            0.0, 1.0 / h, 0.0, 0.0, //
            0.0, 0.0, 1.0 / z, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        );
        Self {
            shape,
            affine,
            inverse,
        }
    }

    /// 从 nifti header 中读取几何信息. 优先使用 sform, 其次是 qform,
    /// 都不存在时仅使用 `pixdim` 缩放.
    pub fn from_header(header: &NiftiHeader) -> Self {
        let [_, w, h, z, ..] = header.dim;
        let shape = (z.max(1) as usize, h.max(1) as usize, w.max(1) as usize);

        let affine = if header.sform_code > 0 {
            let [r0, r1, r2] = [header.srow_x, header.srow_y, header.srow_z].map(|r| r.map(f64::from));
            Matrix4::new(
                r0[0], r0[1], r0[2], r0[3], //
                r1[0], r1[1], r1[2], r1[3], //
                r2[0], r2[1], r2[2], r2[3], //
                0.0, 0.0, 0.0, 1.0,
            )
        } else if header.qform_code > 0 {
            qform_affine(header)
        } else {
            let [_, dx, dy, dz, ..] = header.pixdim.map(f64::from);
            Matrix4::new(
                dx, 0.0, 0.0, 0.0, //
                0.0, dy, 0.0, 0.0, //
                0.0, 0.0, dz, 0.0, //
                0.0, 0.0, 0.0, 1.0,
            )
        };

        Self::new(shape, affine).unwrap_or_else(|| {
            // 退化的 header (如 pixdim 为 0). 退回到各向同性 1mm 网格.
            Self::from_spacing(shape, [1.0; 3])
        })
    }

    /// 将几何信息写入 nifti header. 仿射矩阵保存为 sform (aligned, code 2),
    /// `pixdim` 同步为当前分辨率.
    pub fn write_header(&self, header: &mut NiftiHeader) {
        let m = &self.affine;
        let row = |r: usize| [m[(r, 0)], m[(r, 1)], m[(r, 2)], m[(r, 3)]].map(|v| v as f32);
        header.srow_x = row(0);
        header.srow_y = row(1);
        header.srow_z = row(2);
        header.sform_code = 2;
        header.qform_code = 0;

        let [z, h, w] = self.spacing();
        header.pixdim[0] = 1.0;
        header.pixdim[1] = w as f32;
        header.pixdim[2] = h as f32;
        header.pixdim[3] = z as f32;
    }

    /// 获取数据形状大小 `(z, h, w)`.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.shape
    }

    /// 获取体素个数.
    #[inline]
    pub fn size(&self) -> usize {
        let (z, h, w) = self.shape;
        z * h * w
    }

    /// 获取仿射矩阵.
    #[inline]
    pub fn affine(&self) -> &Matrix4<f64> {
        &self.affine
    }

    /// 获取单个体素分辨率 `[z, h, w]`, 以毫米为单位.
    ///
    /// 该值由仿射矩阵各列的范数导出.
    pub fn spacing(&self) -> Spacing {
        let norm = |c: usize| {
            (0..3)
                .map(|r| self.affine[(r, c)].powi(2))
                .sum::<f64>()
                .sqrt()
        };
        [norm(2), norm(1), norm(0)]
    }

    /// 获取体素的实际体积值, 以立方毫米为单位.
    #[inline]
    pub fn voxel_volume(&self) -> f64 {
        self.affine.fixed_view::<3, 3>(0, 0).clone_owned().determinant().abs()
    }

    /// 将 (可能为小数的) 体素索引 `[z, h, w]` 转换为物理坐标 `[x, y, z]`.
    #[inline]
    pub fn index_to_world(&self, [z, h, w]: [f64; 3]) -> [f64; 3] {
        let p = self.affine * Vector4::new(w, h, z, 1.0);
        [p.x, p.y, p.z]
    }

    /// 将物理坐标 `[x, y, z]` 转换为 (可能为小数的) 体素索引 `[z, h, w]`.
    #[inline]
    pub fn world_to_index(&self, [x, y, z]: [f64; 3]) -> [f64; 3] {
        let p = self.inverse * Vector4::new(x, y, z, 1.0);
        [p.z, p.y, p.x]
    }

    /// 获取从 `self` 的体素索引到 `other` 的体素索引的仿射变换.
    ///
    /// 结果矩阵作用于 `(w, h, z, 1)`.
    #[inline]
    pub(crate) fn index_map_to(&self, other: &Geometry) -> Matrix4<f64> {
        other.inverse * self.affine
    }

    /// 两者是否描述同一个采样网格 (形状一致, 仿射矩阵在容差范围内一致)?
    pub fn same_grid(&self, other: &Geometry) -> bool {
        self.shape == other.shape
            && self
                .affine
                .iter()
                .zip(other.affine.iter())
                .all(|(a, b)| (a - b).abs() <= AFFINE_EPS)
    }
}

/// 根据 nifti 标准从四元数恢复 qform 仿射矩阵.
fn qform_affine(header: &NiftiHeader) -> Matrix4<f64> {
    let b = header.quatern_b as f64;
    let c = header.quatern_c as f64;
    let d = header.quatern_d as f64;
    let a = (1.0 - (b * b + c * c + d * d).min(1.0)).sqrt();

    let qfac = if header.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
    let dx = header.pixdim[1] as f64;
    let dy = header.pixdim[2] as f64;
    let dz = header.pixdim[3] as f64 * qfac;

    let (qx, qy, qz) = (
        header.quatern_x as f64,
        header.quatern_y as f64,
        header.quatern_z as f64,
    );

    Matrix4::new(
        (a * a + b * b - c * c - d * d) * dx,
        (2.0 * b * c - 2.0 * a * d) * dy,
        (2.0 * b * d + 2.0 * a * c) * dz,
        qx,
        (2.0 * b * c + 2.0 * a * d) * dx,
        (a * a + c * c - b * b - d * d) * dy,
        (2.0 * c * d - 2.0 * a * b) * dz,
        qy,
        (2.0 * b * d - 2.0 * a * c) * dx,
        (2.0 * c * d + 2.0 * a * b) * dy,
        (a * a + d * d - c * c - b * b) * dz,
        qz,
        0.0,
        0.0,
        0.0,
        1.0,
    )
}
