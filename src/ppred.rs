//! Posterior predictive reports (`.ppred`).
//!
//! A report is rigidly laid out: five section titles sit on fixed lines and
//! each section's z-score is three lines below its title. Anything else is
//! rejected rather than guessed at.
//!
//! The same five statistics go by several names. [`STATISTICS`] is the one
//! place that ties them together; every lookup below goes through it.

use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::label::{RunLabel, PPRED_SUFFIX};
use crate::normalize::Statistic;

const ZSCORE_PREFIX: &str = "z-score :";
const ZSCORE_OFFSET: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatisticSpec {
    pub statistic: Statistic,
    /// `readpb_mpi` option whose output carries the section.
    pub tool_flag: &'static str,
    /// Field of [`PpredReport`].
    pub field: &'static str,
    /// Section title in the report.
    pub section_title: &'static str,
    /// 1-based line of the section title.
    pub header_line: usize,
    /// Name used in the published tables.
    pub published: &'static str,
    /// Column of the pre-tabulated summary file.
    pub summary_column: &'static str,
}

pub static STATISTICS: [StatisticSpec; 5] = [
    StatisticSpec {
        statistic: Statistic::Diversity,
        tool_flag: "-div",
        field: "ppa_div",
        section_title: "diversity test",
        header_line: 1,
        published: "PPA-DIV",
        summary_column: "PPA_DIV",
    },
    StatisticSpec {
        statistic: Statistic::Convergence,
        tool_flag: "-convprob",
        field: "ppa_conv",
        section_title: "empirical convergence probability test",
        header_line: 7,
        published: "PPA-CONV",
        summary_column: "PPA_CONV",
    },
    StatisticSpec {
        statistic: Statistic::SiteHeterogeneity,
        tool_flag: "-sitecomp",
        field: "ppa_var",
        section_title: "across-site compositional heterogeneity test",
        header_line: 13,
        published: "PPA-VAR",
        summary_column: "PPA_VAR",
    },
    StatisticSpec {
        statistic: Statistic::MaxTaxonHeterogeneity,
        tool_flag: "-comp",
        field: "ppa_max",
        section_title: "max heterogeneity across taxa",
        header_line: 21,
        published: "PPA-MAX",
        summary_column: "PPA_MAX",
    },
    StatisticSpec {
        statistic: Statistic::MeanTaxonHeterogeneity,
        tool_flag: "-comp",
        field: "ppa_mean",
        section_title: "mean squared heterogeneity across taxa",
        header_line: 27,
        published: "PPA-MEAN",
        summary_column: "PPA_MEAN",
    },
];

pub fn spec_for(statistic: Statistic) -> Option<&'static StatisticSpec> {
    STATISTICS.iter().find(|s| s.statistic == statistic)
}

pub fn spec_for_published(name: &str) -> Option<&'static StatisticSpec> {
    STATISTICS.iter().find(|s| s.published == name)
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PpredReport {
    pub label: RunLabel,
    pub ppa_div: f64,
    pub ppa_conv: f64,
    pub ppa_var: f64,
    pub ppa_max: f64,
    pub ppa_mean: f64,
}

impl PpredReport {
    pub fn to_long(&self) -> [(Statistic, f64); 5] {
        [
            (Statistic::Diversity, self.ppa_div),
            (Statistic::Convergence, self.ppa_conv),
            (Statistic::SiteHeterogeneity, self.ppa_var),
            (Statistic::MaxTaxonHeterogeneity, self.ppa_max),
            (Statistic::MeanTaxonHeterogeneity, self.ppa_mean),
        ]
    }
}

fn line_at<'a>(lines: &[&'a str], line: usize) -> &'a str {
    lines.get(line - 1).copied().unwrap_or("<end of file>")
}

/// Parses a report already in memory. `file` is only used in errors.
pub fn parse_ppred_str(file: &str, label: RunLabel, content: &str) -> Result<PpredReport> {
    let lines: Vec<&str> = content.lines().collect();

    for spec in &STATISTICS {
        let found = line_at(&lines, spec.header_line);
        if found.trim() != spec.section_title {
            return Err(PipelineError::Structure {
                file: file.to_string(),
                line: spec.header_line,
                expected: spec.section_title.to_string(),
                found: found.to_string(),
            });
        }
    }

    let mut values = [0.0f64; 5];
    for (slot, spec) in values.iter_mut().zip(&STATISTICS) {
        let line = spec.header_line + ZSCORE_OFFSET;
        let found = line_at(&lines, line);
        let raw = found
            .trim_start()
            .strip_prefix(ZSCORE_PREFIX)
            .ok_or_else(|| PipelineError::Structure {
                file: file.to_string(),
                line,
                expected: format!("{} <value>", ZSCORE_PREFIX),
                found: found.to_string(),
            })?
            .trim();
        *slot = raw
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| PipelineError::NumericParse {
                file: file.to_string(),
                location: format!("line {}", line),
                value: raw.to_string(),
            })?;
    }

    let [ppa_div, ppa_conv, ppa_var, ppa_max, ppa_mean] = values;
    Ok(PpredReport {
        label,
        ppa_div,
        ppa_conv,
        ppa_var,
        ppa_max,
        ppa_mean,
    })
}

pub fn parse_ppred(path: &Path) -> Result<PpredReport> {
    let label = RunLabel::from_path(path, PPRED_SUFFIX)?;
    let content = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    let file = path.display().to_string();
    let report = parse_ppred_str(&file, label, &content)?;
    debug!(file = %file, "posterior predictive report");
    Ok(report)
}
