//! Taxon groups and the two competing rootings of the animal tree.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use serde::Serialize;

use crate::error::{PipelineError, Result};
use crate::{popcount, Tree};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum TaxonGroup {
    /// Animals that are neither sponges nor comb jellies. The outgroup is
    /// [`TaxonGroup::Fungi`]; whichever of the two early lineages is not
    /// sister to all animals groups with these.
    OtherAnimals,
    Porifera,
    Ctenophora,
    /// Root side of every comparison; never part of a hypothesis clade.
    Fungi,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Hypothesis {
    CtenophoraSister,
    PoriferaSister,
}

impl TaxonGroup {
    /// Groups a tree must sample for either hypothesis to be testable.
    pub const INGROUP: [TaxonGroup; 3] = [
        TaxonGroup::OtherAnimals,
        TaxonGroup::Porifera,
        TaxonGroup::Ctenophora,
    ];
}

impl Hypothesis {
    pub const ALL: [Hypothesis; 2] = [Hypothesis::CtenophoraSister, Hypothesis::PoriferaSister];

    pub fn label(self) -> &'static str {
        match self {
            Hypothesis::CtenophoraSister => "Ctenophora-sister",
            Hypothesis::PoriferaSister => "Porifera-sister",
        }
    }

    /// Groups whose union must be monophyletic for the hypothesis to hold:
    /// the lineage that is *not* sister to all other animals groups with them.
    pub fn groups(self) -> [TaxonGroup; 2] {
        match self {
            Hypothesis::CtenophoraSister => {
                [TaxonGroup::OtherAnimals, TaxonGroup::Porifera]
            }
            Hypothesis::PoriferaSister => {
                [TaxonGroup::OtherAnimals, TaxonGroup::Ctenophora]
            }
        }
    }
}

impl fmt::Display for Hypothesis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

const OTHER_ANIMALS: &[&str] = &[
    "Trichoplax_adhaerens",
    "Nematostella_vectensis",
    "Hydra_magnipapillata",
    "Acropora_digitifera",
    "Aurelia_aurita",
    "Homo_sapiens",
    "Branchiostoma_floridae",
    "Strongylocentrotus_purpuratus",
    "Drosophila_melanogaster",
    "Capitella_teleta",
    "Lottia_gigantea",
];

const PORIFERA: &[&str] = &[
    "Amphimedon_queenslandica",
    "Aphrocallistes_vastus",
    "Ephydatia_muelleri",
    "Petrosia_ficiformis",
    "Crella_elegans",
    "Oscarella_carmela",
    "Corticium_candelabrum",
    "Sycon_ciliatum",
    "Leucosolenia_complicata",
    "Hyalonema_populiferum",
];

const CTENOPHORA: &[&str] = &[
    "Mnemiopsis_leidyi",
    "Pleurobrachia_bachei",
    "Beroe_abyssicola",
    "Euplokamis_dunlapae",
    "Coeloplana_astericola",
    "Vallicula_multiformis",
    "Dryodora_glandiformis",
    "Bolinopsis_infundibulum",
    "Hormiphora_californensis",
];

const FUNGI: &[&str] = &[
    "Saccharomyces_cerevisiae",
    "Spizellomyces_punctatus",
    "Allomyces_macrogynus",
    "Rhizopus_oryzae",
    "Batrachochytrium_dendrobatidis",
    "Cryptococcus_neoformans",
];

/// Fixed assignment of every taxon to exactly one [`TaxonGroup`].
#[derive(Clone, Debug)]
pub struct TaxonPartition {
    groups: BTreeMap<String, TaxonGroup>,
}

impl TaxonPartition {
    pub fn new<'a, I>(assignments: I) -> Result<TaxonPartition>
    where
        I: IntoIterator<Item = (TaxonGroup, &'a [&'a str])>,
    {
        let mut groups = BTreeMap::new();
        for (group, taxa) in assignments {
            for taxon in taxa {
                if groups.insert(taxon.to_string(), group).is_some() {
                    return Err(PipelineError::OverlappingTaxon(taxon.to_string()));
                }
            }
        }
        Ok(TaxonPartition { groups })
    }

    /// The partition of the recoding dataset, shared by every run.
    pub fn builtin() -> &'static TaxonPartition {
        static BUILTIN: OnceLock<TaxonPartition> = OnceLock::new();
        BUILTIN.get_or_init(|| {
            TaxonPartition::new([
                (TaxonGroup::OtherAnimals, OTHER_ANIMALS),
                (TaxonGroup::Porifera, PORIFERA),
                (TaxonGroup::Ctenophora, CTENOPHORA),
                (TaxonGroup::Fungi, FUNGI),
            ])
            .expect("built-in taxon groups are disjoint")
        })
    }

    pub fn group_of(&self, taxon: &str) -> Option<TaxonGroup> {
        self.groups.get(taxon).copied()
    }

    pub fn members(&self, group: TaxonGroup) -> impl Iterator<Item = &str> + '_ {
        self.groups
            .iter()
            .filter(move |(_, g)| **g == group)
            .map(|(name, _)| name.as_str())
    }

    /// First ingroup with no tip in `tree`. A tree that misses one cannot
    /// tell the hypotheses apart, which usually means its tip names follow
    /// another convention.
    pub fn unsampled_group(&self, tree: &Tree) -> Option<TaxonGroup> {
        TaxonGroup::INGROUP
            .into_iter()
            .find(|&group| !self.members(group).any(|taxon| tree.contains_tip(taxon)))
    }

    /// Taxa expected to form a clade under `hypothesis`, sorted by name.
    pub fn hypothesis_taxa(&self, hypothesis: Hypothesis) -> Vec<&str> {
        let wanted = hypothesis.groups();
        self.groups
            .iter()
            .filter(|(_, g)| wanted.contains(g))
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Whether `taxa` form a clade in `tree`.
///
/// Taxa that are not tips of `tree` are ignored. A query with no tip in
/// the tree, or one covering every tip, carries no topological
/// information and is reported as not monophyletic. Rooted trees need a
/// node whose leaf set is exactly the query; unrooted trees also accept a
/// node whose leaf set is exactly the complement.
pub fn is_monophyletic<S: AsRef<str>>(tree: &Tree, taxa: &[S]) -> bool {
    let query = tree.taxa_bits(taxa.iter().map(|t| t.as_ref()));
    let present = popcount(&query);
    if present == 0 || present == tree.tips().len() {
        return false;
    }
    if tree.has_clade(&query) {
        return true;
    }
    if tree.is_rooted() {
        return false;
    }
    let complement: Vec<u64> = query
        .iter()
        .zip(tree.all_bits())
        .map(|(q, all)| all & !q)
        .collect();
    tree.has_clade(&complement)
}
