//! Run metadata carried in analysis file names.
//!
//! Every chain output is named
//!
//! ```text
//! <prefix>transform-<token>_states-<digits>.<suffix>
//! ```
//!
//! where `<token>` is ASCII alphanumeric and names the recoding (`none` for
//! the canonical scheme, `00`..`03` for the randomised ones) and `<digits>`
//! is the alphabet size.

use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::error::{PipelineError, Result};

pub const TREELIST_SUFFIX: &str = "chain.treelist";
pub const PPRED_SUFFIX: &str = "chain.ppred";

const FILENAME_GRAMMAR: &str =
    r"^(?P<prefix>.*)transform-(?P<transform>[A-Za-z0-9]+)_states-(?P<states>[0-9]+)\.(?P<suffix>.+)$";

fn grammar() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(FILENAME_GRAMMAR).expect("file name grammar is a valid regex"))
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RunLabel {
    /// Raw recoding token, before any relabelling.
    pub transform: String,
    pub states: u32,
}

impl RunLabel {
    pub fn new(transform: impl Into<String>, states: u32) -> Self {
        Self {
            transform: transform.into(),
            states,
        }
    }

    /// Decodes the label from a bare file name whose suffix must be `suffix`.
    pub fn from_file_name(name: &str, suffix: &str) -> Result<RunLabel> {
        let mismatch = || PipelineError::FilenamePattern {
            file: name.to_string(),
            suffix: suffix.to_string(),
        };
        let caps = grammar().captures(name).ok_or_else(mismatch)?;
        if &caps["suffix"] != suffix {
            return Err(mismatch());
        }
        let states_raw = &caps["states"];
        let states = states_raw
            .parse::<u32>()
            .map_err(|_| PipelineError::NumericParse {
                file: name.to_string(),
                location: "file name".to_string(),
                value: states_raw.to_string(),
            })?;
        Ok(RunLabel {
            transform: caps["transform"].to_string(),
            states,
        })
    }

    pub fn from_path(path: &Path, suffix: &str) -> Result<RunLabel> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self::from_file_name(&name, suffix)
    }

    /// The `transform-<token>_states-<digits>` fragment of the file name.
    pub fn encode(&self) -> String {
        format!("transform-{}_states-{}", self.transform, self.states)
    }

    pub fn file_name(&self, prefix: &str, suffix: &str) -> String {
        format!("{}{}.{}", prefix, self.encode(), suffix)
    }
}

impl fmt::Display for RunLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
