use std::path::Path;

use tracing::debug;

use crate::error::Result;
use crate::models::{Comparison, ConditionLabel};

/// Sample-to-condition mapping for one comparison.
///
/// Rows are group_a samples labelled `a`, then group_b samples labelled `b`. The
/// engine pairs these labels with count columns by position, so the order must match
/// the count file written for the same comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionSheet {
    rows: Vec<(String, ConditionLabel)>,
}

impl ConditionSheet {
    pub fn from_comparison(comparison: &Comparison) -> Self {
        let group_a = comparison.group_a.iter().map(|s| (s.clone(), ConditionLabel::A));
        let group_b = comparison.group_b.iter().map(|s| (s.clone(), ConditionLabel::B));
        ConditionSheet { rows: group_a.chain(group_b).collect() }
    }

    pub fn rows(&self) -> &[(String, ConditionLabel)] {
        &self.rows
    }

    pub fn samples(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|(sample, _)| sample.as_str())
    }

    /// Writes `,condition` followed by one `sample,label` line per row.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut wtr = csv::Writer::from_path(path)?;
        wtr.write_record(["", "condition"])?;
        for (sample, label) in &self.rows {
            wtr.write_record([sample.as_str(), label.as_str()])?;
        }
        wtr.flush()?;
        debug!("Condition sheet with {} samples written to {}", self.rows.len(), path.display());
        Ok(())
    }
}
