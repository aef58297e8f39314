//! 程序运行函数.

use crate::result::{PipelineResult, StageSummary};
use log::{error, info};
use pdff_berry::align::{AlignMasks, AlignPaths};
use pdff_berry::dataset::{Cohort, DixonRecord, NiftiStore};
use pdff_berry::fatwater::{DixonParams, FatFractionMaps, FatFractionPaths, TwoPointDixon};
use pdff_berry::measure::{MeasureKidneys, MeasureOptions, MeasurePaths};
use pdff_berry::register::TranslationSearch;
use std::path::Path;
use utils::loader::{self, Stage};

/// 无法开始运行的原因.
#[derive(Debug)]
pub enum SetupError {
    /// 无法确定构建目录.
    NoBuildDir,

    /// 构建目录不存在.
    BuildDirMissing(std::path::PathBuf),

    /// 阶段列表有误.
    Stages(loader::UnknownStage),

    /// 参考序列记录无法加载.
    Record(pdff_berry::dataset::RecordError),
}

impl std::fmt::Display for SetupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SetupError::NoBuildDir => {
                write!(f, "cannot locate build folder, set $PDFF_BUILD_DIR")
            }
            SetupError::BuildDirMissing(p) => write!(f, "build folder {} not found", p.display()),
            SetupError::Stages(e) => write!(f, "$PDFF_STAGES: {e}"),
            SetupError::Record(e) => write!(f, "cannot load Dixon record: {e}"),
        }
    }
}

/// 在一个分组上运行选中的阶段.
fn run_cohort(
    build: &Path,
    cohort: &Cohort,
    stages: &[Stage],
    record: Option<&DixonRecord>,
    params: DixonParams,
    ans: &mut PipelineResult,
) {
    let mut store = NiftiStore::new();
    for &stage in stages {
        info!("running stage `{stage}` on {cohort}");
        let summary = match stage {
            Stage::FatFraction => {
                let paths = FatFractionPaths::for_cohort(build, cohort);
                match FatFractionMaps::new(&paths, &TwoPointDixon, params).run(&mut store) {
                    Ok(r) => StageSummary::from_report(cohort, stage, &r),
                    Err(e) => StageSummary::aborted(cohort, stage, e),
                }
            }
            Stage::Align => {
                let Some(record) = record else {
                    continue;
                };
                let paths = AlignPaths::for_cohort(build, cohort);
                let engine = TranslationSearch::default();
                match AlignMasks::new(&paths, record).run(&mut store, &engine) {
                    Ok(r) => StageSummary::from_report(cohort, stage, &r),
                    Err(e) => StageSummary::aborted(cohort, stage, e),
                }
            }
            Stage::Measure => {
                let paths = MeasurePaths::for_cohort(build, cohort);
                let result = MeasureKidneys::new(&paths, MeasureOptions::default())
                    .and_then(|m| m.run(&store));
                match result {
                    Ok(r) => StageSummary::from_report(cohort, stage, &r),
                    Err(e) => StageSummary::aborted(cohort, stage, e),
                }
            }
        };
        if let Some(e) = summary.abort_reason() {
            error!("stage `{stage}` on {cohort} aborted: {e}");
        }
        ans.push(summary);
    }
}

/// 实际运行.
pub fn run() -> Result<PipelineResult, SetupError> {
    let build = loader::build_dir_from_env_or_home().ok_or(SetupError::NoBuildDir)?;
    if !build.is_dir() {
        return Err(SetupError::BuildDirMissing(build));
    }
    let stages = loader::stages_from_env().map_err(SetupError::Stages)?;

    // 只有对齐阶段需要参考序列记录.
    let record = if stages.contains(&Stage::Align) {
        Some(loader::dixon_record(&build).map_err(SetupError::Record)?)
    } else {
        None
    };

    // nii 文件不带采集参数, 同一次运行的所有序列共用一组.
    let params = DixonParams::default();
    let cohorts = loader::cohorts_from_env();
    info!(
        "Running {} stage(s) on {} cohort(s) under {}...",
        stages.len(),
        cohorts.len(),
        build.display()
    );
    let mut ans = PipelineResult::default();
    for cohort in cohorts.iter() {
        run_cohort(&build, cohort, &stages, record.as_ref(), params, &mut ans);
    }
    Ok(ans)
}
