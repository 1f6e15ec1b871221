//! Merges support estimates, posterior predictive reports and the
//! published reference values into one long table of
//! `(transform, states, statistic, value)` records.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Serializer};
use tracing::debug;

use crate::core::Config;
use crate::error::{PipelineError, Result};
use crate::ppred::{PpredReport, STATISTICS};
use crate::summary::{SummaryRow, SummaryTable};
use crate::support::SupportEstimate;

/// Recoding a row belongs to. Variant order is legend order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Transform {
    /// Values as printed in the original publication.
    Published,
    /// Our rerun of the published analysis with the canonical SR6 recoding.
    Reproduced,
    /// A randomised six-state recoding, identified by its raw token.
    Random(String),
}

impl Transform {
    /// Raw file-name token to category: `none` is the canonical scheme.
    pub fn from_raw(token: &str) -> Transform {
        if token == "none" {
            Transform::Reproduced
        } else {
            Transform::Random(token.to_string())
        }
    }

    pub fn label(&self) -> String {
        match self {
            Transform::Published => "SR6-published".to_string(),
            Transform::Reproduced => "SR6-reproduced".to_string(),
            Transform::Random(token) => format!("random-{}", token),
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl Serialize for Transform {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.label())
    }
}

/// Relabels raw transform tokens, keeping their order.
pub fn relabel_transforms<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    raw.iter()
        .map(|t| Transform::from_raw(t.as_ref()).label())
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Statistic {
    CtenophoraSister,
    PoriferaSister,
    Diversity,
    Convergence,
    SiteHeterogeneity,
    MaxTaxonHeterogeneity,
    MeanTaxonHeterogeneity,
}

impl Statistic {
    pub const ALL: [Statistic; 7] = [
        Statistic::CtenophoraSister,
        Statistic::PoriferaSister,
        Statistic::Diversity,
        Statistic::Convergence,
        Statistic::SiteHeterogeneity,
        Statistic::MaxTaxonHeterogeneity,
        Statistic::MeanTaxonHeterogeneity,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Statistic::CtenophoraSister => "Ctenophora-sister",
            Statistic::PoriferaSister => "Porifera-sister",
            Statistic::Diversity => "Diversity",
            Statistic::Convergence => "Convergence",
            Statistic::SiteHeterogeneity => "Site heterogeneity",
            Statistic::MaxTaxonHeterogeneity => "Max taxon heterogeneity",
            Statistic::MeanTaxonHeterogeneity => "Mean taxon heterogeneity",
        }
    }

    pub fn is_posterior_predictive(self) -> bool {
        !matches!(self, Statistic::CtenophoraSister | Statistic::PoriferaSister)
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Statistic {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PublishedSupport {
    pub states: u32,
    pub ctenophora_sister: f64,
    pub porifera_sister: f64,
}

/// Posterior support reported for the published analysis, per alphabet size.
pub static PUBLISHED_SUPPORT: [PublishedSupport; 2] = [
    PublishedSupport {
        states: 20,
        ctenophora_sister: 1.0,
        porifera_sister: 0.0,
    },
    PublishedSupport {
        states: 6,
        ctenophora_sister: 0.0,
        porifera_sister: 1.0,
    },
];

pub fn published_support(states: u32) -> Result<&'static PublishedSupport> {
    PUBLISHED_SUPPORT
        .iter()
        .find(|p| p.states == states)
        .ok_or(PipelineError::MissingReference {
            what: "published support",
            states,
        })
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NormalizedRecord {
    pub transform: Transform,
    pub states: u32,
    pub statistic: Statistic,
    pub value: f64,
}

type RecordKey = (Transform, std::cmp::Reverse<u32>, Statistic);

/// Long-form table. Records are unique per `(transform, states, statistic)`
/// and kept sorted by transform, then states (largest alphabet first),
/// then statistic.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NormalizedTable {
    records: Vec<NormalizedRecord>,
}

struct TableBuilder<'a> {
    states_to_consider: &'a [u32],
    rows: BTreeMap<RecordKey, f64>,
    dropped: usize,
}

impl<'a> TableBuilder<'a> {
    fn new(states_to_consider: &'a [u32]) -> Self {
        Self {
            states_to_consider,
            rows: BTreeMap::new(),
            dropped: 0,
        }
    }

    fn push(&mut self, transform: Transform, states: u32, statistic: Statistic, value: f64) -> Result<()> {
        if !self.states_to_consider.contains(&states) {
            self.dropped += 1;
            return Ok(());
        }
        let key = (transform, std::cmp::Reverse(states), statistic);
        if self.rows.contains_key(&key) {
            return Err(PipelineError::DuplicateRecord {
                transform: key.0.label(),
                states,
                statistic: statistic.name(),
            });
        }
        self.rows.insert(key, value);
        Ok(())
    }

    fn finish(self) -> NormalizedTable {
        if self.dropped > 0 {
            debug!(dropped = self.dropped, "records outside the considered state counts");
        }
        let records = self
            .rows
            .into_iter()
            .map(|((transform, states, statistic), value)| NormalizedRecord {
                transform,
                states: states.0,
                statistic,
                value,
            })
            .collect();
        NormalizedTable { records }
    }
}

impl NormalizedTable {
    /// Builds the table from per-file results, the published constants and,
    /// when given, the reference rows of the summary table.
    pub fn assemble(
        supports: &[SupportEstimate],
        reports: &[PpredReport],
        summary: Option<&SummaryTable>,
        config: &Config,
    ) -> Result<NormalizedTable> {
        let mut builder = TableBuilder::new(&config.states_to_consider);

        for &states in &config.states_to_consider {
            let published = published_support(states)?;
            builder.push(
                Transform::Published,
                states,
                Statistic::CtenophoraSister,
                published.ctenophora_sister,
            )?;
            builder.push(
                Transform::Published,
                states,
                Statistic::PoriferaSister,
                published.porifera_sister,
            )?;
        }

        if let Some(summary) = summary {
            for row in reference_rows(summary, config)? {
                for spec in &STATISTICS {
                    if let Some(value) = row.ppa(spec.statistic) {
                        builder.push(
                            Transform::Published,
                            row.recoding.states(),
                            spec.statistic,
                            value,
                        )?;
                    }
                }
            }
        }

        for support in supports {
            let transform = Transform::from_raw(&support.label.transform);
            for (statistic, value) in support.to_long() {
                builder.push(transform.clone(), support.label.states, statistic, value)?;
            }
        }

        for report in reports {
            let transform = Transform::from_raw(&report.label.transform);
            for (statistic, value) in report.to_long() {
                builder.push(transform.clone(), report.label.states, statistic, value)?;
            }
        }

        Ok(builder.finish())
    }

    pub fn records(&self) -> &[NormalizedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, transform: &Transform, states: u32, statistic: Statistic) -> Option<f64> {
        self.records
            .iter()
            .find(|r| &r.transform == transform && r.states == states && r.statistic == statistic)
            .map(|r| r.value)
    }

    /// Transform levels present in the table, in legend order.
    pub fn transforms(&self) -> Vec<Transform> {
        let mut levels: Vec<Transform> = self.records.iter().map(|r| r.transform.clone()).collect();
        levels.dedup();
        levels
    }

    pub fn to_tsv(&self) -> String {
        let mut out = String::from("transform\tstates\tstatistic\tvalue\n");
        for r in &self.records {
            out.push_str(&format!(
                "{}\t{}\t{}\t{}\n",
                r.transform, r.states, r.statistic, r.value
            ));
        }
        out
    }
}

/// Summary rows of the published reference analysis, one per considered
/// state count.
fn reference_rows<'s>(summary: &'s SummaryTable, config: &Config) -> Result<Vec<&'s SummaryRow>> {
    let rows = summary.reference_rows(&config.reference, &config.states_to_consider);
    for &states in &config.states_to_consider {
        if !rows.iter().any(|r| r.recoding.states() == states) {
            return Err(PipelineError::MissingReference {
                what: "summary table reference row",
                states,
            });
        }
    }
    Ok(rows)
}

#[derive(Clone, Debug, Serialize)]
pub struct Verdict {
    pub transform: Transform,
    pub states: u32,
    pub hypothesis: Option<&'static str>,
}

/// Everything the plotting layer receives, serialised as one JSON document.
#[derive(Clone, Debug, Serialize)]
pub struct ReportInput<'a> {
    pub records: &'a [NormalizedRecord],
    pub transform_levels: Vec<Transform>,
    pub states_to_consider: &'a [u32],
    pub x_breaks: &'a [f64],
    pub support_threshold: f64,
    pub verdicts: Vec<Verdict>,
    pub summary: &'a [SummaryRow],
}

impl<'a> ReportInput<'a> {
    pub fn new(
        table: &'a NormalizedTable,
        supports: &[SupportEstimate],
        summary: &'a [SummaryRow],
        config: &'a Config,
    ) -> Self {
        let verdicts = supports
            .iter()
            .filter(|s| config.states_to_consider.contains(&s.label.states))
            .map(|s| Verdict {
                transform: Transform::from_raw(&s.label.transform),
                states: s.label.states,
                hypothesis: s.verdict(config.support_threshold).map(|h| h.label()),
            })
            .collect();
        Self {
            records: table.records(),
            transform_levels: table.transforms(),
            states_to_consider: &config.states_to_consider,
            x_breaks: &config.x_breaks,
            support_threshold: config.support_threshold,
            verdicts,
            summary,
        }
    }
}
