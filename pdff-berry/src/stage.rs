//! 批处理阶段的公共结构: 处理单元, 单元结果与阶段汇总.
//!
//! 每个阶段都按 `(patient, study, sequence)` 逐个处理, 单个单元的失败只记录,
//! 不会中断整个批次.

use std::fmt;

use log::{error, info};

/// 一个处理单元: 某位受试者某次检查中的某个 Dixon 序列.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SequenceTask {
    /// 受试者 ID.
    pub patient: String,

    /// study 描述.
    pub study: String,

    /// 序列名 (不含 `_water` 等后缀).
    pub sequence: String,
}

impl SequenceTask {
    /// 创建处理单元.
    pub fn new(patient: &str, study: &str, sequence: &str) -> Self {
        Self {
            patient: patient.to_owned(),
            study: study.to_owned(),
            sequence: sequence.to_owned(),
        }
    }
}

impl fmt::Display for SequenceTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "patient {}, study {}, sequence {}",
            self.patient, self.study, self.sequence
        )
    }
}

/// 单元处理成功时的结果.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// 已计算并写出全部结果.
    Done,

    /// 参考序列, 原样复制.
    PassedThrough,

    /// 结果已存在, 未做任何读写.
    Skipped,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Outcome::Done => "done",
            Outcome::PassedThrough => "passed through",
            Outcome::Skipped => "skipped",
        })
    }
}

/// 一个阶段的运行汇总.
#[derive(Debug)]
pub struct Report<E> {
    /// 完成计算的单元数.
    pub done: usize,

    /// 原样复制的单元数.
    pub passed_through: usize,

    /// 跳过的单元数.
    pub skipped: usize,

    /// 失败的单元及原因, 按处理顺序排列.
    pub failures: Vec<(SequenceTask, E)>,
}

impl<E> Default for Report<E> {
    fn default() -> Self {
        Self {
            done: 0,
            passed_through: 0,
            skipped: 0,
            failures: Vec::new(),
        }
    }
}

impl<E: fmt::Display> Report<E> {
    /// 记录一个单元的结果, 并写日志.
    pub fn record(&mut self, task: SequenceTask, result: Result<Outcome, E>) {
        match result {
            Ok(outcome) => {
                info!("{task}: {outcome}");
                match outcome {
                    Outcome::Done => self.done += 1,
                    Outcome::PassedThrough => self.passed_through += 1,
                    Outcome::Skipped => self.skipped += 1,
                }
            }
            Err(e) => {
                error!("{task}: {e}");
                self.failures.push((task, e));
            }
        }
    }
}

impl<E> Report<E> {
    /// 已处理的单元总数.
    #[inline]
    pub fn total(&self) -> usize {
        self.done + self.passed_through + self.skipped + self.failures.len()
    }

    /// 是否没有任何失败?
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// 合并另一份汇总.
    pub fn merge(&mut self, other: Report<E>) {
        self.done += other.done;
        self.passed_through += other.passed_through;
        self.skipped += other.skipped;
        self.failures.extend(other.failures);
    }
}

impl<E> fmt::Display for Report<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} done, {} passed through, {} skipped, {} failed",
            self.done,
            self.passed_through,
            self.skipped,
            self.failures.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts() {
        let mut r = Report::<String>::default();
        r.record(SequenceTask::new("p", "Baseline", "Dixon_1"), Ok(Outcome::Done));
        r.record(SequenceTask::new("p", "Baseline", "Dixon_2"), Ok(Outcome::Skipped));
        r.record(
            SequenceTask::new("p", "Baseline", "Dixon_3"),
            Err("missing".to_owned()),
        );
        assert_eq!(r.total(), 3);
        assert!(!r.is_clean());
        assert_eq!(r.failures[0].0.sequence, "Dixon_3");

        let mut all = Report::default();
        all.merge(r);
        all.record(SequenceTask::new("q", "Baseline", "Dixon_1"), Ok(Outcome::PassedThrough));
        assert_eq!(all.to_string(), "1 done, 1 passed through, 1 skipped, 1 failed");
    }
}
