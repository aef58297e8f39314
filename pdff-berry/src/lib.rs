#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 提供多中心 Dixon MRI 肾脏脂肪分数 (PDFF) 流水线的结构化数据和基础处理算法.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 体数据统一按照 `(z, h, w)` 模式访问, 与 nifti 原生的 `[W, H, z]` 相反.
//!   仿射矩阵仍然按照 nifti 惯例作用于 `(i, j, k) = (w, h, z)`.
//! 2. 配准引擎, 脂肪/水分离模型和特征提取都被建模为 trait. 本 crate
//!   自带的实现 ([`register::TranslationSearch`], [`fatwater::TwoPointDixon`],
//!   [`measure::FirstOrder`]) 足以跑通整条流水线, 但不追求数值上的最优.
//!
//! # 流水线
//!
//! ### 脂肪分数图 ✅
//!
//! 从 out-phase / in-phase 序列计算 fat, water 与 PDFF.
//!
//! 实现位于 `pdff-berry/src/fatwater.rs`.
//!
//! ### 掩膜对齐 ✅
//!
//! 每个 (patient, study) 有一个参考序列, 所有掩膜都画在参考序列上.
//! 将参考序列的 water 图配准到其它每个序列上, 并用同一个形变迁移
//! 肾脏掩膜, 全身分割和组织类型分割.
//!
//! 实现位于 `pdff-berry/src/align.rs` 和 `pdff-berry/src/transport`.
//!
//! ### 标签迁移 ✅
//!
//! 标签不能直接插值. 对每个类别分别构建二值指示图, 放大 1000 倍后施加形变,
//! 再以一半为阈值恢复二值结果, 最后用 PDFF 合理范围过滤边界上的体素.
//!
//! 实现位于 `pdff-berry/src/transport`.
//!
//! ### 肾脏测量 ✅
//!
//! 左肾, 右肾和双肾区域的一阶直方图特征, 以及 ROI 级 PDFF.
//!
//! 实现位于 `pdff-berry/src/measure`.

/// 三维索引, 按照 `(z, h, w)` 组织.
pub type Idx3d = (usize, usize, usize);

/// 3D 体数据基础数据结构.
mod data;

pub use data::{
    resample, Geometry, LabelValue, LabelVolume, ScalarVolume, Spacing, Volume, VolumeIoError,
    VolumeShapeError,
};

pub mod consts;

pub mod dataset;

pub mod register;

pub mod transport;

pub mod align;

pub mod fatwater;

pub mod measure;

pub mod stage;

pub mod prelude;
