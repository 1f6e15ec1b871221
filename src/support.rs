//! Posterior support for the two rootings from a sampled chain of trees.

use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::clade::{is_monophyletic, Hypothesis, TaxonPartition};
use crate::core::{read_trees, Config};
use crate::error::{PipelineError, Result};
use crate::label::{RunLabel, TREELIST_SUFFIX};
use crate::normalize::Statistic;
use crate::Tree;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SupportEstimate {
    pub label: RunLabel,
    /// Post-burn-in trees the frequencies are computed over.
    pub samples: usize,
    pub ctenophora_support: f64,
    pub porifera_support: f64,
}

impl SupportEstimate {
    pub fn support(&self, hypothesis: Hypothesis) -> f64 {
        match hypothesis {
            Hypothesis::CtenophoraSister => self.ctenophora_support,
            Hypothesis::PoriferaSister => self.porifera_support,
        }
    }

    /// The hypothesis whose posterior support reaches `threshold`, if any.
    pub fn verdict(&self, threshold: f64) -> Option<Hypothesis> {
        Hypothesis::ALL
            .into_iter()
            .find(|h| self.support(*h) >= threshold)
    }

    pub fn to_long(&self) -> [(Statistic, f64); 2] {
        [
            (Statistic::CtenophoraSister, self.ctenophora_support),
            (Statistic::PoriferaSister, self.porifera_support),
        ]
    }
}

/// Fraction of trees after the first `burnin` in which each hypothesis clade is monophyletic.
pub fn support_from_trees(
    file: &str,
    label: RunLabel,
    trees: &[Tree],
    burnin: usize,
    partition: &TaxonPartition,
) -> Result<SupportEstimate> {
    if trees.len() <= burnin {
        return Err(PipelineError::InsufficientSamples {
            file: file.to_string(),
            found: trees.len(),
            burnin,
        });
    }
    let kept = &trees[burnin..];
    let cteno_taxa = partition.hypothesis_taxa(Hypothesis::CtenophoraSister);
    let pori_taxa = partition.hypothesis_taxa(Hypothesis::PoriferaSister);

    let mut cteno = 0usize;
    let mut pori = 0usize;
    for (offset, tree) in kept.iter().enumerate() {
        if let Some(group) = partition.unsampled_group(tree) {
            return Err(PipelineError::UnknownTaxa {
                file: file.to_string(),
                tree: burnin + offset + 1,
                group,
            });
        }
        if is_monophyletic(tree, &cteno_taxa) {
            cteno += 1;
        }
        if is_monophyletic(tree, &pori_taxa) {
            pori += 1;
        }
    }
    let n = kept.len() as f64;
    Ok(SupportEstimate {
        label,
        samples: kept.len(),
        ctenophora_support: cteno as f64 / n,
        porifera_support: pori as f64 / n,
    })
}

pub fn get_tree_support(path: &Path, config: &Config) -> Result<SupportEstimate> {
    let label = RunLabel::from_path(path, TREELIST_SUFFIX)?;
    let trees = read_trees(path)?;
    let file = path.display().to_string();
    let estimate = support_from_trees(
        &file,
        label,
        &trees,
        config.burnin,
        TaxonPartition::builtin(),
    )?;
    debug!(
        file = %file,
        trees = trees.len(),
        kept = estimate.samples,
        ctenophora = estimate.ctenophora_support,
        porifera = estimate.porifera_support,
        "tree support"
    );
    Ok(estimate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clade::TaxonGroup;
    use crate::core::tests::{write_treelist, CTENOPHORA_SISTER_TREE, PORIFERA_SISTER_TREE};
    use proptest::prelude::*;
    use tempfile::TempDir;

    #[test]
    fn three_of_five_kept_trees() {
        let dir = TempDir::new().unwrap();
        let mut trees = vec![CTENOPHORA_SISTER_TREE; 205];
        // Burn-in trees never count, whatever they show.
        trees[..200].fill(PORIFERA_SISTER_TREE);
        trees[200] = PORIFERA_SISTER_TREE;
        trees[202] = PORIFERA_SISTER_TREE;
        trees[204] = PORIFERA_SISTER_TREE;
        let path = write_treelist(dir.path(), "d_transform-00_states-6.chain.treelist", &trees);

        let support = get_tree_support(&path, &Config::default()).unwrap();
        assert_eq!(support.label, RunLabel::new("00", 6));
        assert_eq!(support.samples, 5);
        assert!((support.porifera_support - 0.6).abs() < 1e-12);
        assert!((support.ctenophora_support - 0.4).abs() < 1e-12);
        assert_eq!(support.verdict(0.95), None);
        assert_eq!(support.verdict(0.6), Some(Hypothesis::PoriferaSister));
    }

    #[test]
    fn burnin_only_file_is_insufficient() {
        let dir = TempDir::new().unwrap();
        let trees = vec![PORIFERA_SISTER_TREE; 200];
        let path = write_treelist(dir.path(), "d_transform-00_states-6.chain.treelist", &trees);
        let err = get_tree_support(&path, &Config::default()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InsufficientSamples { found: 200, burnin: 200, .. }
        ));
    }

    #[test]
    fn bad_file_name_is_rejected_before_reading() {
        let err = get_tree_support(Path::new("/nonexistent/run1.chain.treelist"), &Config::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::FilenamePattern { .. }));
    }

    #[test]
    fn foreign_tip_names_are_fatal() {
        let dir = TempDir::new().unwrap();
        let mut trees = vec![PORIFERA_SISTER_TREE; 201];
        trees.push("((Yeast,Chytrid),(Amphimedon,Oscarella),((Mnemiopsis,Pleurobrachia),(Homo,Nematostella)));");
        let path = write_treelist(dir.path(), "d_transform-00_states-6.chain.treelist", &trees);
        let err = get_tree_support(&path, &Config::default()).unwrap_err();
        match err {
            PipelineError::UnknownTaxa { tree, group, .. } => {
                assert_eq!(tree, 202);
                assert_eq!(group, TaxonGroup::OtherAnimals);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_ctenophores_are_fatal() {
        let trees = [
            Tree::parse(PORIFERA_SISTER_TREE).unwrap(),
            Tree::parse(
                "((Saccharomyces_cerevisiae,Spizellomyces_punctatus),(Amphimedon_queenslandica,Oscarella_carmela),(Homo_sapiens,Nematostella_vectensis));",
            )
            .unwrap(),
        ];
        let err = support_from_trees("t", RunLabel::new("none", 20), &trees, 0, TaxonPartition::builtin())
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::UnknownTaxa { tree: 2, group: TaxonGroup::Ctenophora, .. }
        ));
    }

    #[test]
    fn burnin_trees_are_not_checked_for_names() {
        let mut trees = vec![Tree::parse("((a,b),c,d);").unwrap(); 3];
        trees.push(Tree::parse(PORIFERA_SISTER_TREE).unwrap());
        let support = support_from_trees("t", RunLabel::new("none", 20), &trees, 3, TaxonPartition::builtin())
            .unwrap();
        assert_eq!(support.porifera_support, 1.0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]
        #[test]
        fn support_is_count_over_kept(flags in proptest::collection::vec(any::<bool>(), 1..40), burnin in 0usize..10) {
            let mut trees = vec![Tree::parse(CTENOPHORA_SISTER_TREE).unwrap(); burnin];
            for &pori in &flags {
                let text = if pori { PORIFERA_SISTER_TREE } else { CTENOPHORA_SISTER_TREE };
                trees.push(Tree::parse(text).unwrap());
            }
            let support = support_from_trees(
                "prop",
                RunLabel::new("none", 20),
                &trees,
                burnin,
                TaxonPartition::builtin(),
            )
            .unwrap();
            let k = flags.iter().filter(|f| **f).count();
            prop_assert_eq!(support.samples, flags.len());
            prop_assert!((0.0..=1.0).contains(&support.porifera_support));
            prop_assert!((0.0..=1.0).contains(&support.ctenophora_support));
            prop_assert!((support.porifera_support - k as f64 / flags.len() as f64).abs() < 1e-12);
            prop_assert!((support.porifera_support + support.ctenophora_support - 1.0).abs() < 1e-12);
        }
    }
}
