//! 通用常量.

/// 标签值.
pub mod class {
    /// 任何分割中, 背景的体素值.
    pub const BACKGROUND: u8 = 0;

    /// 肾脏掩膜 (`kidney_masks`).
    pub mod kidney {
        /// 左肾.
        pub const LEFT: u8 = 1;

        /// 右肾.
        pub const RIGHT: u8 = 2;
    }

    /// 全身 MR 分割 (`total_mr`).
    pub mod total_mr {
        /// 肝脏.
        pub const LIVER: u8 = 5;

        /// 椎骨.
        pub const VERTEBRAE: u8 = 19;
    }

    /// 组织类型 MR 分割 (`tissue_types_mr`).
    pub mod tissue_types_mr {
        /// 内脏脂肪.
        pub const VISCERAL_FAT: u8 = 1;

        /// 皮下脂肪.
        pub const SUBCUTANEOUS_FAT: u8 = 2;
    }
}

/// 标签迁移时二值指示图的放大倍数.
///
/// 形变之后以 `LABEL_SCALE / 2` 为阈值恢复二值结果.
pub const LABEL_SCALE: f32 = 1000.0;

/// 默认的 PDFF 合理下限.
pub const DEFAULT_MIN_PDFF: f32 = 0.0;

/// 默认的 PDFF 合理上限.
pub const DEFAULT_MAX_PDFF: f32 = 0.4;

/// 序列描述的后缀与名称.
pub mod series {
    /// water 图.
    pub const WATER: &str = "_water";

    /// fat 图.
    pub const FAT: &str = "_fat";

    /// 脂肪分数图.
    pub const PDFF: &str = "_pdff";

    /// 反相位回波.
    pub const OUT_PHASE: &str = "_out_phase";

    /// 同相位回波.
    pub const IN_PHASE: &str = "_in_phase";

    /// 配准到当前序列上的参考 water 图.
    pub const WATER_REF_COREG: &str = "_water_ref_coreg";

    /// 肾脏掩膜.
    pub const KIDNEY_MASKS: &str = "kidney_masks";

    /// 全身分割.
    pub const TOTAL_MR: &str = "total_mr";

    /// 组织类型分割.
    pub const TISSUE_TYPES_MR: &str = "tissue_types_mr";

    /// 增强后序列的标记. 这些序列不参与对齐.
    pub const POST_CONTRAST: &str = "post_contrast";
}

/// 构建目录下各个阶段的相对路径.
pub mod stage {
    /// 清洗后的 Dixon 原始数据.
    pub const DIXON: [&str; 2] = ["dixon", "stage_5_clean_dixon_data"];

    /// 脂肪分数图.
    pub const FAT_FRACTION_MAPS: [&str; 2] = ["dixon-pdff", "stage_1_fat_fraction_maps"];

    /// 对齐后的掩膜.
    pub const ALIGNED_MASKS: [&str; 2] = ["dixon-pdff", "stage_3_aligned_masks"];

    /// 肾脏测量结果.
    pub const MEASURE_KIDNEYS: [&str; 2] = ["dixon-pdff", "stage_5_measure_kidneys"];

    /// 人工编辑后的肾脏掩膜.
    pub const KIDNEY_MASKS: [&str; 2] = ["kidneyvol", "stage_3_edit"];

    /// TotalSegmentator 分割结果.
    pub const TOTAL_MASKS: [&str; 2] = ["totseg", "stage_1_segment"];
}

/// 研究中心.
pub const SITES: [&str; 6] = ["Leeds", "Exeter", "Bari", "Bordeaux", "Sheffield", "Turku"];
