pub mod clade;
pub mod core;
pub mod error;
pub mod label;
pub mod normalize;
pub mod ppred;
pub mod summary;
pub mod support;

pub use crate::clade::{is_monophyletic, Hypothesis, TaxonGroup, TaxonPartition};
pub use crate::core::{read_trees, run_pipeline, Config, PipelineOutput, ReferenceFilter};
pub use crate::error::{PipelineError, Result};
pub use crate::label::RunLabel;
pub use crate::normalize::{NormalizedRecord, NormalizedTable, ReportInput, Statistic, Transform};
pub use crate::ppred::{parse_ppred, PpredReport};
pub use crate::summary::{ConvergenceTier, Recoding, SummaryRow, SummaryTable};
pub use crate::support::{get_tree_support, SupportEstimate};

use std::collections::HashMap;

/// Syntax errors raised while reading a single Newick string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NewickError {
    #[error("unexpected end of Newick at byte {0}")]
    UnexpectedEnd(usize),
    #[error("unterminated Newick group at byte {0}")]
    Unterminated(usize),
    #[error("invalid Newick group separator at byte {0}")]
    BadSeparator(usize),
    #[error("expected leaf label in Newick at byte {0}")]
    MissingLabel(usize),
    #[error("missing ';' after tree")]
    MissingTerminator,
    #[error("duplicate tip label '{0}'")]
    DuplicateTip(String),
}

#[derive(Default, Clone, Debug)]
struct Node {
    children: Vec<usize>,
    label: Option<String>,
}

fn is_delim(b: u8) -> bool {
    matches!(b, b'(' | b')' | b',' | b':' | b';' | b'[' | b']')
}

fn skip_ws(bytes: &[u8], idx: &mut usize) {
    while *idx < bytes.len() && bytes[*idx].is_ascii_whitespace() {
        *idx += 1;
    }
}

fn skip_annotations(bytes: &[u8], idx: &mut usize) {
    skip_ws(bytes, idx);
    while *idx < bytes.len() && bytes[*idx] == b'[' {
        *idx += 1;
        while *idx < bytes.len() && bytes[*idx] != b']' {
            *idx += 1;
        }
        if *idx < bytes.len() {
            *idx += 1;
        }
        skip_ws(bytes, idx);
    }
}

fn parse_label(bytes: &[u8], idx: &mut usize) -> Option<String> {
    skip_ws(bytes, idx);
    if *idx >= bytes.len() || is_delim(bytes[*idx]) {
        return None;
    }
    let start = *idx;
    while *idx < bytes.len() && !is_delim(bytes[*idx]) {
        *idx += 1;
    }
    let label = String::from_utf8_lossy(&bytes[start..*idx])
        .trim()
        .trim_matches('\'')
        .to_string();
    if label.is_empty() {
        None
    } else {
        Some(label)
    }
}

fn skip_branch_length(bytes: &[u8], idx: &mut usize) {
    skip_ws(bytes, idx);
    if *idx < bytes.len() && bytes[*idx] == b':' {
        *idx += 1;
        while *idx < bytes.len() && !is_delim(bytes[*idx]) {
            *idx += 1;
        }
    }
}

// Children are always pushed before their parent, so `nodes` ends up in postorder.
fn parse_subtree(
    bytes: &[u8],
    idx: &mut usize,
    nodes: &mut Vec<Node>,
) -> std::result::Result<usize, NewickError> {
    skip_ws(bytes, idx);
    if *idx >= bytes.len() {
        return Err(NewickError::UnexpectedEnd(*idx));
    }

    if bytes[*idx] == b'(' {
        *idx += 1;
        let mut children = Vec::new();
        loop {
            let child = parse_subtree(bytes, idx, nodes)?;
            children.push(child);
            skip_ws(bytes, idx);
            if *idx >= bytes.len() {
                return Err(NewickError::Unterminated(*idx));
            }
            match bytes[*idx] {
                b',' => *idx += 1,
                b')' => {
                    *idx += 1;
                    break;
                }
                _ => return Err(NewickError::BadSeparator(*idx)),
            }
        }

        // Internal labels are posterior values or node names; neither matters here.
        let _support = parse_label(bytes, idx);
        skip_annotations(bytes, idx);
        skip_branch_length(bytes, idx);
        skip_annotations(bytes, idx);

        nodes.push(Node {
            children,
            label: None,
        });
        Ok(nodes.len() - 1)
    } else {
        let label = parse_label(bytes, idx).ok_or(NewickError::MissingLabel(*idx))?;
        skip_annotations(bytes, idx);
        skip_branch_length(bytes, idx);
        skip_annotations(bytes, idx);

        nodes.push(Node {
            children: Vec::new(),
            label: Some(label),
        });
        Ok(nodes.len() - 1)
    }
}

/// A parsed phylogeny with the leaf set of every node stored as a bitset
/// over the sorted tip labels.
#[derive(Clone, Debug)]
pub struct Tree {
    root: usize,
    nodes: Vec<Node>,
    tips: Vec<String>,
    tip_index: HashMap<String, usize>,
    node_bits: Vec<Vec<u64>>,
}

impl Tree {
    /// Parses one Newick string. The terminating `;` is required.
    pub fn parse(newick: &str) -> std::result::Result<Tree, NewickError> {
        let bytes = newick.as_bytes();
        let mut idx = 0usize;
        let mut nodes = Vec::new();
        let root = parse_subtree(bytes, &mut idx, &mut nodes)?;
        skip_ws(bytes, &mut idx);
        if idx >= bytes.len() || bytes[idx] != b';' {
            return Err(NewickError::MissingTerminator);
        }

        let mut tips: Vec<String> = nodes.iter().filter_map(|n| n.label.clone()).collect();
        tips.sort();
        for pair in tips.windows(2) {
            if pair[0] == pair[1] {
                return Err(NewickError::DuplicateTip(pair[0].clone()));
            }
        }
        let tip_index: HashMap<String, usize> = tips
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        let words = (tips.len() + 63) / 64;
        let mut node_bits: Vec<Vec<u64>> = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let mut bits = vec![0u64; words];
            if let Some(label) = &node.label {
                if let Some(&tip) = tip_index.get(label) {
                    bits[tip / 64] |= 1u64 << (tip % 64);
                }
            }
            for &child in &node.children {
                for (word, child_word) in bits.iter_mut().zip(&node_bits[child]) {
                    *word |= *child_word;
                }
            }
            node_bits.push(bits);
        }

        Ok(Tree {
            root,
            nodes,
            tips,
            tip_index,
            node_bits,
        })
    }

    /// Sorted tip labels.
    pub fn tips(&self) -> &[String] {
        &self.tips
    }

    pub fn contains_tip(&self, name: &str) -> bool {
        self.tip_index.contains_key(name)
    }

    /// A root with exactly two children is rooted; a basal polytomy is not.
    pub fn is_rooted(&self) -> bool {
        self.nodes[self.root].children.len() == 2
    }

    /// Bitset of the given taxa, silently ignoring names that are not tips.
    pub(crate) fn taxa_bits<'a, I>(&self, taxa: I) -> Vec<u64>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut bits = vec![0u64; (self.tips.len() + 63) / 64];
        for name in taxa {
            if let Some(&tip) = self.tip_index.get(name) {
                bits[tip / 64] |= 1u64 << (tip % 64);
            }
        }
        bits
    }

    pub(crate) fn all_bits(&self) -> &[u64] {
        &self.node_bits[self.root]
    }

    /// True when some node's leaf set is exactly `bits`.
    pub(crate) fn has_clade(&self, bits: &[u64]) -> bool {
        self.node_bits.iter().any(|b| b.as_slice() == bits)
    }

    /// Space-joined tip names of each internal clade with more than one tip.
    pub fn clades(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (node, bits) in self.nodes.iter().zip(&self.node_bits) {
            if node.children.is_empty() {
                continue;
            }
            let names: Vec<&str> = self
                .tips
                .iter()
                .enumerate()
                .filter(|(i, _)| bits[i / 64] & (1u64 << (i % 64)) != 0)
                .map(|(_, name)| name.as_str())
                .collect();
            if names.len() > 1 {
                out.push(names.join(" "));
            }
        }
        out
    }
}

pub(crate) fn popcount(bits: &[u64]) -> usize {
    bits.iter().map(|w| w.count_ones() as usize).sum()
}
