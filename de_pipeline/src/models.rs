use std::collections::HashSet;
use std::fmt;

use polars::prelude::{BooleanChunked, NewChunkedArray, PlSmallStr};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Name given to the gene identifier column once a table is loaded.
pub const GENE_ID: &str = "gene_id";
pub const GENE_NAME: &str = "gene_name";
pub const GENE_LENGTH: &str = "gene_length";

/// Statistics every engine result table has to provide.
pub const REQUIRED_STATISTICS: [&str; 4] = ["baseMean", "log2FoldChange", "pvalue", "padj"];

/// A named test between two disjoint groups of samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub name: String,
    pub group_a: Vec<String>,
    pub group_b: Vec<String>,
}

impl Comparison {
    pub fn new<S: Into<String>>(
        name: S,
        group_a: impl IntoIterator<Item = S>,
        group_b: impl IntoIterator<Item = S>,
    ) -> Self {
        Comparison {
            name: name.into(),
            group_a: group_a.into_iter().map(Into::into).collect(),
            group_b: group_b.into_iter().map(Into::into).collect(),
        }
    }

    /// group_a followed by group_b. Count files and condition sheets both use this order.
    pub fn samples(&self) -> impl Iterator<Item = &str> {
        self.group_a.iter().chain(self.group_b.iter()).map(String::as_str)
    }

    /// Both groups non-empty, no sample listed twice, no sample in both groups.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::config("comparison name must not be empty"));
        }
        if self.group_a.is_empty() || self.group_b.is_empty() {
            return Err(PipelineError::config(format!(
                "comparison '{}' needs at least one sample in each group",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for sample in self.samples() {
            if !seen.insert(sample) {
                return Err(PipelineError::config(format!(
                    "comparison '{}' lists sample '{}' more than once",
                    self.name, sample
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionLabel {
    A,
    B,
}

impl ConditionLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionLabel::A => "a",
            ConditionLabel::B => "b",
        }
    }
}

impl fmt::Display for ConditionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Genes eligible for one comparison, aligned to the count matrix rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionMask(Vec<bool>);

impl SelectionMask {
    pub fn new(mask: Vec<bool>) -> Self {
        SelectionMask(mask)
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    pub fn passing(&self) -> usize {
        self.0.iter().filter(|&&keep| keep).count()
    }

    pub fn to_chunked(&self) -> BooleanChunked {
        BooleanChunked::from_slice(PlSmallStr::from("selected"), &self.0)
    }
}

/// MA plot category of a gene. Exactly one applies to every gene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeneCategory {
    Neither,
    SignificantOnly,
    LargeFoldChangeOnly,
    Both,
}

impl GeneCategory {
    pub fn classify(significant: bool, large_fc: bool) -> Self {
        match (significant, large_fc) {
            (false, false) => GeneCategory::Neither,
            (true, false) => GeneCategory::SignificantOnly,
            (false, true) => GeneCategory::LargeFoldChangeOnly,
            (true, true) => GeneCategory::Both,
        }
    }
}
