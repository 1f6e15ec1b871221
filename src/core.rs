use crate::error::{PipelineError, Result};
use crate::label::{PPRED_SUFFIX, TREELIST_SUFFIX};
use crate::normalize::NormalizedTable;
use crate::ppred::{parse_ppred, PpredReport};
use crate::summary::{SummaryRow, SummaryTable};
use crate::support::{get_tree_support, SupportEstimate};
use crate::Tree;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Which rows of the summary table hold the published reference analysis.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceFilter {
    pub model: String,
    pub dataset: String,
    /// Recoding scheme of the reduced-alphabet reference; `none` is always accepted too.
    pub recoding: String,
}

impl Default for ReferenceFilter {
    fn default() -> Self {
        Self {
            model: "CAT-GTR".to_string(),
            dataset: "Whelan".to_string(),
            recoding: "SR6".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Samples dropped from the start of every chain.
    pub burnin: usize,
    /// Posterior probability at or above which a hypothesis is strongly supported.
    pub support_threshold: f64,
    pub threads: usize,
    pub states_to_consider: Vec<u32>,
    /// Axis breakpoints handed through to the plotting layer.
    pub x_breaks: Vec<f64>,
    pub reference: ReferenceFilter,
    pub summary_table: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            burnin: 200,
            support_threshold: 0.95,
            threads: default_threads(),
            states_to_consider: vec![20, 6],
            x_breaks: vec![0.0, 0.25, 0.5, 0.75, 1.0],
            reference: ReferenceFilter::default(),
            summary_table: None,
        }
    }
}

/// One core is left for the rest of the machine.
pub fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .saturating_sub(1)
        .max(1)
}

fn strip_nexus_prefix(s: &str) -> &str {
    let trimmed = s.trim();
    if let Some(idx) = trimmed.find('=') {
        return trimmed[idx + 1..].trim();
    }
    trimmed
}

fn strip_bracket_blocks(s: &str) -> String {
    let mut out = String::new();
    let mut chars = s.chars();
    while let Some(ch) = chars.next() {
        if ch == '[' {
            for c in chars.by_ref() {
                if c == ']' {
                    break;
                }
            }
            continue;
        }
        out.push(ch);
    }
    out
}

fn parse_tree_line(file: &str, line_no: usize, text: &str) -> Result<Tree> {
    Tree::parse(text).map_err(|source| PipelineError::Newick {
        file: file.to_string(),
        line: line_no,
        source,
    })
}

pub(crate) fn parse_nexus_trees(file: &str, content: &str) -> Result<Vec<Tree>> {
    let mut trees = Vec::with_capacity(1024);
    for (idx, line) in content.lines().enumerate() {
        let lower = line.trim().to_ascii_lowercase();
        if lower == "translate" || lower.starts_with("translate ") || lower.starts_with("translate\t") {
            return Err(PipelineError::NexusTranslate {
                file: file.to_string(),
                line: idx + 1,
            });
        }
        if lower.starts_with("tree ") || lower.starts_with("tree\t") {
            let stripped = strip_bracket_blocks(strip_nexus_prefix(line));
            trees.push(parse_tree_line(file, idx + 1, stripped.trim())?);
        }
    }
    Ok(trees)
}

pub(crate) fn parse_newick_trees(file: &str, content: &str) -> Result<Vec<Tree>> {
    let mut trees = Vec::with_capacity(1024);
    for (idx, line) in content.lines().enumerate() {
        let cand = line.trim();
        if cand.is_empty() {
            continue;
        }
        trees.push(parse_tree_line(file, idx + 1, cand)?);
    }
    Ok(trees)
}

/// Reads every tree of one chain, in sampling order.
///
/// Files starting with `#NEXUS` are read from their `tree` statements; a
/// `translate` table is an error. Anything else is taken as one Newick tree
/// per non-blank line, which is what PhyloBayes writes to `.treelist`. Any
/// unparseable tree is an error.
pub fn read_trees(path: &Path) -> Result<Vec<Tree>> {
    let content = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    let file = path.display().to_string();
    let is_nexus = content
        .lines()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.trim().eq_ignore_ascii_case("#nexus"))
        .unwrap_or(false);
    if is_nexus {
        parse_nexus_trees(&file, &content)
    } else {
        parse_newick_trees(&file, &content)
    }
}

/// Files directly inside `dir` whose name ends in `.<suffix>`, sorted by path.
pub fn discover(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    let ending = format!(".{}", suffix);
    let mut files = Vec::new();
    let entries = fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| PipelineError::io(dir, e))?;
        let path = entry.path();
        let matches = path
            .file_name()
            .map(|n| n.to_string_lossy().ends_with(&ending))
            .unwrap_or(false);
        if matches && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[derive(Clone, Debug)]
pub struct PipelineOutput {
    pub supports: Vec<SupportEstimate>,
    pub reports: Vec<PpredReport>,
    /// Summary table rows for the considered state counts.
    pub summary: Vec<SummaryRow>,
    pub table: NormalizedTable,
}

/// Parses every chain output in `dir` and assembles the normalized table.
///
/// Tree files and reports are processed on a dedicated pool of
/// `config.threads` workers; the first failing file aborts the batch.
pub fn run_pipeline(dir: &Path, config: &Config) -> Result<PipelineOutput> {
    let tree_files = discover(dir, TREELIST_SUFFIX)?;
    let ppred_files = discover(dir, PPRED_SUFFIX)?;
    if tree_files.is_empty() && ppred_files.is_empty() {
        return Err(PipelineError::NoInputs {
            dir: dir.to_path_buf(),
            what: "treelist or ppred",
        });
    }
    info!(
        dir = %dir.display(),
        treelists = tree_files.len(),
        reports = ppred_files.len(),
        threads = config.threads,
        "reading chain outputs"
    );

    let pool = ThreadPoolBuilder::new()
        .num_threads(config.threads.max(1))
        .build()?;
    let (supports, reports) = pool.install(|| {
        rayon::join(
            || {
                tree_files
                    .par_iter()
                    .map(|path| get_tree_support(path, config))
                    .collect::<Result<Vec<_>>>()
            },
            || {
                ppred_files
                    .par_iter()
                    .map(|path| parse_ppred(path))
                    .collect::<Result<Vec<_>>>()
            },
        )
    });
    let mut supports = supports?;
    let mut reports = reports?;
    supports.sort_by(|a, b| a.label.cmp(&b.label));
    reports.sort_by(|a, b| a.label.cmp(&b.label));

    for support in &supports {
        match support.verdict(config.support_threshold) {
            Some(hypothesis) => info!(
                run = %support.label,
                hypothesis = %hypothesis,
                "strong support"
            ),
            None => debug!(run = %support.label, "no hypothesis reaches the support threshold"),
        }
    }

    let summary = match &config.summary_table {
        Some(path) => Some(SummaryTable::read(path)?),
        None => None,
    };
    let table = NormalizedTable::assemble(&supports, &reports, summary.as_ref(), config)?;
    info!(records = table.len(), "normalized table assembled");

    let summary = summary
        .map(|s| {
            s.rows()
                .iter()
                .filter(|row| config.states_to_consider.contains(&row.recoding.states()))
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    Ok(PipelineOutput {
        supports,
        reports,
        summary,
        table,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::normalize::{Statistic, Transform};
    use crate::ppred::tests::ppred_fixture;
    use tempfile::TempDir;

    pub(crate) const PORIFERA_SISTER_TREE: &str = "((Saccharomyces_cerevisiae,Spizellomyces_punctatus),(Amphimedon_queenslandica,Oscarella_carmela),((Mnemiopsis_leidyi,Pleurobrachia_bachei),(Homo_sapiens,Nematostella_vectensis)));";
    pub(crate) const CTENOPHORA_SISTER_TREE: &str = "((Saccharomyces_cerevisiae,Spizellomyces_punctatus),(Mnemiopsis_leidyi,Pleurobrachia_bachei),((Amphimedon_queenslandica,Oscarella_carmela),(Homo_sapiens,Nematostella_vectensis)));";

    pub(crate) fn write_treelist(dir: &Path, name: &str, trees: &[&str]) -> PathBuf {
        let path = dir.join(name);
        let mut content = String::new();
        for tree in trees {
            content.push_str(tree);
            content.push('\n');
        }
        fs::write(&path, content).unwrap();
        path
    }

    fn test_config() -> Config {
        Config {
            threads: 2,
            ..Config::default()
        }
    }

    #[test]
    fn default_config_values() {
        let config = Config::default();
        assert_eq!(config.burnin, 200);
        assert!((config.support_threshold - 0.95).abs() < 1e-12);
        assert!(config.threads >= 1);
        assert_eq!(config.states_to_consider, vec![20, 6]);
    }

    #[test]
    fn read_trees_missing_file() {
        let err = read_trees(Path::new("does-not-exist.chain.treelist")).unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
    }

    #[test]
    fn read_trees_skips_blank_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.chain.treelist");
        fs::write(&path, "((A,B),C,D);\n\n((A,C),B,D);\n").unwrap();
        let trees = read_trees(&path).unwrap();
        assert_eq!(trees.len(), 2);
    }

    #[test]
    fn read_trees_invalid_line_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.chain.treelist");
        fs::write(&path, "((A,B),C,D);\nnot_a_tree\n").unwrap();
        let err = read_trees(&path).unwrap_err();
        match err {
            PipelineError::Newick { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn read_trees_nexus() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.t");
        let data = "#NEXUS\nbegin trees;\n  tree gen.1 = [&U] ((A:0.1,B:0.2),C:0.3,D:0.1);\n  tree gen.2 = [&U] ((A,C),B,D);\nend;\n";
        fs::write(&path, data).unwrap();
        let trees = read_trees(&path).unwrap();
        assert_eq!(trees.len(), 2);
        assert_eq!(trees[0].tips().len(), 4);
    }

    #[test]
    fn read_trees_nexus_translate_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.t");
        let data = "#NEXUS\nbegin trees;\n  translate\n    1 A,\n    2 B,\n    3 C,\n    4 D;\n  tree t = ((1,2),3,4);\nend;\n";
        fs::write(&path, data).unwrap();
        let err = read_trees(&path).unwrap_err();
        assert!(matches!(err, PipelineError::NexusTranslate { line: 3, .. }));
    }

    #[test]
    fn discover_filters_by_suffix() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b_transform-00_states-6.chain.treelist"), "").unwrap();
        fs::write(dir.path().join("a_transform-none_states-6.chain.treelist"), "").unwrap();
        fs::write(dir.path().join("a_transform-none_states-6.chain.trace"), "").unwrap();
        let found = discover(dir.path(), TREELIST_SUFFIX).unwrap();
        let names: Vec<String> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "a_transform-none_states-6.chain.treelist",
                "b_transform-00_states-6.chain.treelist"
            ]
        );
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = run_pipeline(dir.path(), &test_config()).unwrap_err();
        assert!(matches!(err, PipelineError::NoInputs { .. }));
    }

    #[test]
    fn porifera_sister_chains_end_to_end() {
        let dir = TempDir::new().unwrap();
        let trees = vec![PORIFERA_SISTER_TREE; 201];
        write_treelist(dir.path(), "whelan_transform-none_states-20.chain.treelist", &trees);
        write_treelist(dir.path(), "whelan_transform-none_states-6.chain.treelist", &trees);

        let output = run_pipeline(dir.path(), &test_config()).unwrap();
        assert_eq!(output.supports.len(), 2);
        for support in &output.supports {
            assert_eq!(support.samples, 1);
            assert_eq!(support.porifera_support, 1.0);
            assert_eq!(support.ctenophora_support, 0.0);
        }
        let states: Vec<u32> = output.supports.iter().map(|s| s.label.states).collect();
        assert_eq!(states, vec![6, 20]);
        assert_eq!(
            output
                .table
                .get(&Transform::Reproduced, 6, Statistic::PoriferaSister),
            Some(1.0)
        );
    }

    #[test]
    fn one_bad_file_aborts_the_batch() {
        let dir = TempDir::new().unwrap();
        let trees = vec![PORIFERA_SISTER_TREE; 201];
        write_treelist(dir.path(), "whelan_transform-none_states-20.chain.treelist", &trees);
        write_treelist(dir.path(), "whelan_transform-01_states-6.chain.treelist", &trees[..150]);
        let err = run_pipeline(dir.path(), &test_config()).unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientSamples { found: 150, .. }));
    }

    #[test]
    fn rerun_gives_identical_table() {
        let dir = TempDir::new().unwrap();
        let mut trees = vec![PORIFERA_SISTER_TREE; 203];
        trees[202] = CTENOPHORA_SISTER_TREE;
        for token in ["none", "00", "01"] {
            for states in [20, 6] {
                write_treelist(
                    dir.path(),
                    &format!("whelan_transform-{}_states-{}.chain.treelist", token, states),
                    &trees,
                );
                let report = dir
                    .path()
                    .join(format!("whelan_transform-{}_states-{}.chain.ppred", token, states));
                fs::write(report, ppred_fixture([1.5, -0.2, 3.0, 4.25, 2.0])).unwrap();
            }
        }
        let first = run_pipeline(dir.path(), &test_config()).unwrap();
        let second = run_pipeline(dir.path(), &test_config()).unwrap();
        assert_eq!(first.table.to_tsv(), second.table.to_tsv());
        assert_eq!(first.reports.len(), 6);
        // 2 published + 6 runs x (2 support + 5 ppa)
        assert_eq!(first.table.len(), 2 * 2 + 6 * 7);
    }
}
