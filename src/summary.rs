//! Pre-tabulated summary of earlier runs (tab separated, one header row).
//!
//! Only the columns the reference filters and figures need are
//! interpreted; extra columns are ignored.

use std::cmp::Ordering;
use std::fs;
use std::path::Path;

use serde::{Serialize, Serializer};

use crate::core::ReferenceFilter;
use crate::error::{PipelineError, Result};
use crate::normalize::Statistic;

const GOOD_MAXDIFF: f64 = 0.1;
const ACCEPTABLE_MAXDIFF: f64 = 0.3;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Recoding {
    /// Plain amino acids.
    Original,
    /// A reduced alphabet whose size is the trailing number of its name (`SR6`).
    Scheme { name: String, states: u32 },
}

impl Recoding {
    pub fn parse(raw: &str) -> Option<Recoding> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("none") {
            return Some(Recoding::Original);
        }
        let stem = raw.trim_end_matches(|c: char| c.is_ascii_digit());
        if stem.len() == raw.len() {
            return None;
        }
        let states = raw[stem.len()..].parse::<u32>().ok()?;
        Some(Recoding::Scheme {
            name: raw.to_string(),
            states,
        })
    }

    pub fn states(&self) -> u32 {
        match self {
            Recoding::Original => 20,
            Recoding::Scheme { states, .. } => *states,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Recoding::Original => "none",
            Recoding::Scheme { name, .. } => name,
        }
    }
}

/// Larger alphabets first, then by scheme name.
impl Ord for Recoding {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .states()
            .cmp(&self.states())
            .then_with(|| self.name().cmp(other.name()))
    }
}

impl PartialOrd for Recoding {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for Recoding {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// Chain agreement judged from the bpcomp `maxdiff`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ConvergenceTier {
    Good,
    Acceptable,
    Poor,
    Unknown,
}

impl ConvergenceTier {
    pub fn from_maxdiff(maxdiff: Option<f64>) -> ConvergenceTier {
        match maxdiff {
            Some(m) if m < GOOD_MAXDIFF => ConvergenceTier::Good,
            Some(m) if m < ACCEPTABLE_MAXDIFF => ConvergenceTier::Acceptable,
            Some(_) => ConvergenceTier::Poor,
            None => ConvergenceTier::Unknown,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SummaryRow {
    pub model: String,
    pub dataset: String,
    pub recoding: Recoding,
    pub porifera_sister: Option<f64>,
    pub ctenophora_sister: Option<f64>,
    pub maxdiff: Option<f64>,
    pub convergence: ConvergenceTier,
    pub cycles: Option<f64>,
    pub ppa_div: Option<f64>,
    pub ppa_max: Option<f64>,
    pub ppa_conv: Option<f64>,
    pub ppa_var: Option<f64>,
    pub ppa_mean: Option<f64>,
    pub burnin: Option<f64>,
    pub effsize: Option<f64>,
    pub rel_diff: Option<f64>,
}

impl SummaryRow {
    pub fn ppa(&self, statistic: Statistic) -> Option<f64> {
        match statistic {
            Statistic::Diversity => self.ppa_div,
            Statistic::Convergence => self.ppa_conv,
            Statistic::SiteHeterogeneity => self.ppa_var,
            Statistic::MaxTaxonHeterogeneity => self.ppa_max,
            Statistic::MeanTaxonHeterogeneity => self.ppa_mean,
            Statistic::CtenophoraSister => self.ctenophora_sister,
            Statistic::PoriferaSister => self.porifera_sister,
        }
    }

    fn sort_key(&self) -> (&str, &Recoding, &str) {
        (&self.dataset, &self.recoding, &self.model)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SummaryTable {
    rows: Vec<SummaryRow>,
}

struct Columns {
    headers: Vec<String>,
}

impl Columns {
    fn index(&self, path: &Path, name: &str) -> Result<usize> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| PipelineError::SummaryTable {
                path: path.to_path_buf(),
                message: format!("missing column '{}'", name),
            })
    }

    fn optional(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

fn parse_cell(path: &Path, line: usize, raw: &str) -> Result<Option<f64>> {
    if raw.is_empty() || raw == "NA" || raw == "NaN" {
        return Ok(None);
    }
    raw.parse::<f64>()
        .map(Some)
        .map_err(|_| PipelineError::NumericParse {
            file: path.display().to_string(),
            location: format!("line {}", line),
            value: raw.to_string(),
        })
}

fn clean(field: &str) -> &str {
    field.trim().trim_matches('"')
}

impl SummaryTable {
    pub fn read(path: &Path) -> Result<SummaryTable> {
        let content = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        Self::parse(path, &content)
    }

    /// Parses the table text; `path` only labels errors.
    pub fn parse(path: &Path, content: &str) -> Result<SummaryTable> {
        let mut lines = content.lines().enumerate();
        let header = lines
            .next()
            .map(|(_, l)| l)
            .ok_or_else(|| PipelineError::SummaryTable {
                path: path.to_path_buf(),
                message: "empty file".to_string(),
            })?;
        let columns = Columns {
            headers: header.split('\t').map(|h| clean(h).to_string()).collect(),
        };

        let model = columns.index(path, "Model")?;
        let dataset = columns.index(path, "Dataset")?;
        let recoding = columns.index(path, "Recoding")?;
        let porifera = columns.index(path, "Porifera_sister")?;
        let ctenophora = columns.index(path, "Ctenophora_sister")?;
        let maxdiff = columns.index(path, "Maxdiff")?;
        let ppa_div = columns.index(path, "PPA_DIV")?;
        let ppa_max = columns.index(path, "PPA_MAX")?;
        let ppa_conv = columns.index(path, "PPA_CONV")?;
        let ppa_var = columns.index(path, "PPA_VAR")?;
        let ppa_mean = columns.index(path, "PPA_MEAN")?;
        let cycles = columns.optional("Cycles");
        let burnin = columns.optional("Burnin");
        let effsize = columns.optional("effsize");
        let rel_diff = columns.optional("rel_diff");

        let mut rows = Vec::new();
        for (idx, line) in lines {
            if line.trim().is_empty() {
                continue;
            }
            let line_no = idx + 1;
            let parts: Vec<&str> = line.split('\t').map(clean).collect();
            if parts.len() != columns.headers.len() {
                return Err(PipelineError::SummaryTable {
                    path: path.to_path_buf(),
                    message: format!(
                        "line {} has {} fields, header has {}",
                        line_no,
                        parts.len(),
                        columns.headers.len()
                    ),
                });
            }
            let num = |col: usize| parse_cell(path, line_no, parts[col]);
            let opt = |col: Option<usize>| match col {
                Some(c) => parse_cell(path, line_no, parts[c]),
                None => Ok(None),
            };
            let recoding_value =
                Recoding::parse(parts[recoding]).ok_or_else(|| PipelineError::SummaryTable {
                    path: path.to_path_buf(),
                    message: format!(
                        "line {}: recoding '{}' has no state count",
                        line_no, parts[recoding]
                    ),
                })?;
            let maxdiff_value = num(maxdiff)?;
            rows.push(SummaryRow {
                model: parts[model].to_string(),
                dataset: parts[dataset].to_string(),
                recoding: recoding_value,
                porifera_sister: num(porifera)?,
                ctenophora_sister: num(ctenophora)?,
                maxdiff: maxdiff_value,
                convergence: ConvergenceTier::from_maxdiff(maxdiff_value),
                cycles: opt(cycles)?,
                ppa_div: num(ppa_div)?,
                ppa_max: num(ppa_max)?,
                ppa_conv: num(ppa_conv)?,
                ppa_var: num(ppa_var)?,
                ppa_mean: num(ppa_mean)?,
                burnin: opt(burnin)?,
                effsize: opt(effsize)?,
                rel_diff: opt(rel_diff)?,
            });
        }
        rows.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Ok(SummaryTable { rows })
    }

    pub fn rows(&self) -> &[SummaryRow] {
        &self.rows
    }

    /// Rows of the published reference analysis among the given state counts.
    pub fn reference_rows(&self, filter: &ReferenceFilter, states: &[u32]) -> Vec<&SummaryRow> {
        self.rows
            .iter()
            .filter(|r| r.model == filter.model && r.dataset == filter.dataset)
            .filter(|r| match &r.recoding {
                Recoding::Original => true,
                Recoding::Scheme { name, .. } => name == &filter.recoding,
            })
            .filter(|r| states.contains(&r.recoding.states()))
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;

    const FIXTURE: &str = "\
Model\tDataset\tRecoding\tPorifera_sister\tCtenophora_sister\tMaxdiff\tCycles\tPPA_DIV\tPPA_MAX\tPPA_CONV\tPPA_VAR\tPPA_MEAN\tBurnin\teffsize\trel_diff
CAT-GTR\tWhelan\tnone\t0.00\t1.00\t0.08\t12000\t4.2\t60.1\t3.3\t5.0\t30.5\t2000\t350\t0.1
CAT-GTR\tWhelan\tSR6\t1.00\t0.00\t0.25\t9000\t2.1\t10.4\t1.2\t2.2\t3.1\t2000\t220\t0.2
CAT-GTR\tWhelan\tKGB6\t0.80\t0.20\t0.45\t9000\t2.3\t11.0\t1.1\t2.4\t3.3\t2000\tNA\tNA
CAT-GTR\tWhelan\tDayhoff4\t0.70\t0.30\t0.05\t8000\t1.9\t9.0\t1.0\t2.0\t2.9\t2000\t410\t0.1
CAT-GTR\tChang\tnone\t0.10\t0.90\t0.12\t11000\t3.9\t55.0\t3.0\t4.8\t28.0\t2000\t300\t0.1
\"LG\"\tWhelan\tnone\t0.00\t1.00\t\t5000\t6.0\t80.2\t4.1\t7.5\t41.0\t1000\t500\t0.3
";

    pub(crate) fn summary_fixture() -> SummaryTable {
        SummaryTable::parse(&PathBuf::from("summary.tsv"), FIXTURE).unwrap()
    }

    #[test]
    fn parses_rows_and_sorts_them() {
        let table = summary_fixture();
        assert_eq!(table.rows().len(), 6);
        let first = &table.rows()[0];
        assert_eq!(first.dataset, "Chang");
        let whelan: Vec<&str> = table
            .rows()
            .iter()
            .filter(|r| r.dataset == "Whelan" && r.model == "CAT-GTR")
            .map(|r| r.recoding.name())
            .collect();
        assert_eq!(whelan, vec!["none", "KGB6", "SR6", "Dayhoff4"]);
    }

    #[test]
    fn missing_cells_and_tiers() {
        let table = summary_fixture();
        let kgb = table
            .rows()
            .iter()
            .find(|r| r.recoding.name() == "KGB6")
            .unwrap();
        assert_eq!(kgb.effsize, None);
        assert_eq!(kgb.convergence, ConvergenceTier::Poor);
        let lg = table.rows().iter().find(|r| r.model == "LG").unwrap();
        assert_eq!(lg.maxdiff, None);
        assert_eq!(lg.convergence, ConvergenceTier::Unknown);
        let sr6 = table
            .rows()
            .iter()
            .find(|r| r.recoding.name() == "SR6")
            .unwrap();
        assert_eq!(sr6.convergence, ConvergenceTier::Acceptable);
        assert_eq!(sr6.ppa(Statistic::Diversity), Some(2.1));
    }

    #[test]
    fn reference_rows_follow_filter() {
        let table = summary_fixture();
        let rows = table.reference_rows(&ReferenceFilter::default(), &[20, 6]);
        let names: Vec<&str> = rows.iter().map(|r| r.recoding.name()).collect();
        assert_eq!(names, vec!["none", "SR6"]);
        let only_six = table.reference_rows(&ReferenceFilter::default(), &[6]);
        assert_eq!(only_six.len(), 1);
    }

    #[test]
    fn recoding_names_give_state_counts() {
        assert_eq!(Recoding::parse("none"), Some(Recoding::Original));
        assert_eq!(Recoding::parse("SR6").map(|r| r.states()), Some(6));
        assert_eq!(Recoding::parse("Dayhoff18").map(|r| r.states()), Some(18));
        assert_eq!(Recoding::parse("random"), None);
        let mut levels = vec![
            Recoding::parse("SR6").unwrap(),
            Recoding::parse("Dayhoff4").unwrap(),
            Recoding::Original,
            Recoding::parse("KGB6").unwrap(),
        ];
        levels.sort();
        let names: Vec<&str> = levels.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["none", "KGB6", "SR6", "Dayhoff4"]);
    }

    #[test]
    fn missing_required_column() {
        let text = "Model\tDataset\tRecoding\n";
        let err = SummaryTable::parse(&PathBuf::from("s.tsv"), text).unwrap_err();
        match err {
            PipelineError::SummaryTable { message, .. } => {
                assert!(message.contains("Porifera_sister"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn ragged_row_is_rejected() {
        let text = FIXTURE.replace("\t0.1\n\"LG\"", "\n\"LG\"");
        let err = SummaryTable::parse(&PathBuf::from("s.tsv"), &text).unwrap_err();
        assert!(matches!(err, PipelineError::SummaryTable { .. }));
    }

    #[test]
    fn bad_number_is_reported_with_line() {
        let text = FIXTURE.replace("\t4.2\t", "\tfour\t");
        let err = SummaryTable::parse(&PathBuf::from("s.tsv"), &text).unwrap_err();
        match err {
            PipelineError::NumericParse { location, value, .. } => {
                assert_eq!(location, "line 2");
                assert_eq!(value, "four");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
