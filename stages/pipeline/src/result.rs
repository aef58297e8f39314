//! 运行结果.

use pdff_berry::dataset::Cohort;
use pdff_berry::stage::Report;
use std::fmt::Display;
use std::io::{self, Write};
use utils::loader::Stage;

/// 某个分组上某个阶段的运行概况.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSummary {
    cohort: Cohort,
    stage: Stage,
    done: usize,
    passed_through: usize,
    skipped: usize,
    failures: Vec<String>,
    aborted: Option<String>,
}

impl StageSummary {
    /// 从阶段报告生成概况. 失败原因转为文本.
    pub fn from_report<E: Display>(cohort: &Cohort, stage: Stage, report: &Report<E>) -> Self {
        Self {
            cohort: cohort.clone(),
            stage,
            done: report.done,
            passed_through: report.passed_through,
            skipped: report.skipped,
            failures: report
                .failures
                .iter()
                .map(|(task, e)| format!("{task}: {e}"))
                .collect(),
            aborted: None,
        }
    }

    /// 阶段未能开始 (如无法创建输出位置).
    pub fn aborted<E: Display>(cohort: &Cohort, stage: Stage, e: E) -> Self {
        Self {
            cohort: cohort.clone(),
            stage,
            done: 0,
            passed_through: 0,
            skipped: 0,
            failures: Vec::new(),
            aborted: Some(e.to_string()),
        }
    }

    /// 是否没有任何失败.
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.aborted.is_none()
    }

    /// 阶段未能开始的原因.
    #[inline]
    pub fn abort_reason(&self) -> Option<&str> {
        self.aborted.as_deref()
    }
}

/// 将 `s` 的结果写进 `w` 中.
fn describe_into<W: Write>(s: &StageSummary, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    write!(w, "Stage `{}` on {}:", s.stage, s.cohort)?;
    if let Some(e) = &s.aborted {
        write!(w, "\n{S4}Aborted: {e}")?;
        return Ok(());
    }
    write!(w, "\n{S4}Done: {}", s.done)?;
    write!(w, "\n{S4}Passed through: {}", s.passed_through)?;
    write!(w, "\n{S4}Skipped: {}", s.skipped)?;
    write!(w, "\n{S4}Failed: {}", s.failures.len())?;
    for f in s.failures.iter() {
        write!(w, "\n{S4}{S4}{f}")?;
    }
    Ok(())
}

/// 流水线最终结果.
#[derive(Debug, Default)]
pub struct PipelineResult {
    data: Vec<StageSummary>,
}

impl PipelineResult {
    /// 追加一个阶段概况.
    #[inline]
    pub fn push(&mut self, summary: StageSummary) {
        self.data.push(summary);
    }

    /// 是否所有阶段都没有失败.
    pub fn is_clean(&self) -> bool {
        self.data.iter().all(StageSummary::is_clean)
    }

    /// 将全部结果写进 `w` 中.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        utils::sep_to(&mut *w)?;
        for summary in self.data.iter() {
            describe_into(summary, w)?;
            writeln!(w)?;
            utils::sep_to(&mut *w)?;
        }
        Ok(())
    }

    /// 分析运行结果.
    pub fn analyze(&self) {
        let stdout = io::stdout();
        if let Err(e) = self.write_to(&mut stdout.lock()) {
            log::error!("cannot print pipeline result: {e}");
        }
    }
}
