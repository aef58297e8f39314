//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::Idx3d;

pub use crate::{Geometry, LabelValue, LabelVolume, ScalarVolume, Spacing, Volume};

pub use crate::consts::class::{kidney, tissue_types_mr, total_mr, BACKGROUND};
pub use crate::consts::LABEL_SCALE;

pub use crate::dataset::{
    home_dataset_dir_with, Cohort, DixonRecord, MemStore, NiftiStore, SeriesKey, StoreError,
    VolumeStore,
};

pub use crate::register::{Registration, RegistrationOptions, Transform, TranslationSearch};
pub use crate::transport::{admissible_range, transport_labels, Task, TransportStats};

pub use crate::align::{AlignError, AlignMasks, AlignPaths, AlignReport};
pub use crate::fatwater::{
    DixonParams, FatFractionMaps, FatFractionPaths, FatWaterModel, TwoPointDixon,
};
pub use crate::stage::{Outcome, Report, SequenceTask};

pub use crate::measure::{FeatureExtractor, FirstOrder};

#[cfg(feature = "serde")]
pub use crate::measure::{MeasureKidneys, MeasureOptions, MeasurePaths};
