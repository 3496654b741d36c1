use std::collections::HashSet;

use polars::prelude::*;
use polars_ops::prelude::DataFrameJoinOps;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::helper_functions::{column_names, string_values};
use crate::models::{GENE_ID, REQUIRED_STATISTICS};

const ROW_ORDER: &str = "__row_order";

/// Engine output of one comparison, indexed by [`GENE_ID`].
#[derive(Debug, Clone)]
pub struct ComparisonResult {
    pub name: String,
    pub table: DataFrame,
}

/// Name of `statistic` for `comparison` in the merged table.
pub fn prefixed(comparison: &str, separator: &str, statistic: &str) -> String {
    format!("{}{}{}", comparison, separator, statistic)
}

/// Renames every column except [`GENE_ID`] to `"{comparison}{separator}{column}"`.
pub fn prefix_columns(result: &ComparisonResult, separator: &str) -> Result<DataFrame> {
    let mut df = result.table.clone();
    let names = column_names(&df);

    if !names.iter().any(|n| n == GENE_ID) {
        return Err(PipelineError::merge(format!(
            "results of '{}' have no gene identifier column",
            result.name
        )));
    }
    for statistic in REQUIRED_STATISTICS {
        if !names.iter().any(|n| n == statistic) {
            return Err(PipelineError::merge(format!(
                "results of '{}' lack the '{}' column",
                result.name, statistic
            )));
        }
    }

    let mut seen = HashSet::with_capacity(df.height());
    for id in string_values(&df, GENE_ID)?.into_iter().flatten() {
        if !seen.insert(id.clone()) {
            return Err(PipelineError::merge(format!(
                "results of '{}' list gene '{}' more than once",
                result.name, id
            )));
        }
    }

    for name in names.iter().filter(|n| n.as_str() != GENE_ID) {
        df.rename(name, PlSmallStr::from(prefixed(&result.name, separator, name)))?;
    }
    Ok(df)
}

/// Joins gene metadata with every comparison's prefixed results.
///
/// Only genes present in the metadata and in every result survive. A gene missing from
/// any single comparison is dropped from the whole table. Rows keep the metadata order;
/// columns are the metadata followed by each comparison in the given order.
pub fn merge_results(
    metadata: &DataFrame,
    results: &[ComparisonResult],
    separator: &str,
) -> Result<DataFrame> {
    if results.is_empty() {
        return Err(PipelineError::merge("no comparison results to merge"));
    }

    let mut seen: HashSet<String> = column_names(metadata).into_iter().collect();
    let mut merged = metadata.with_row_index(PlSmallStr::from(ROW_ORDER), None)?;

    for result in results {
        let table = prefix_columns(result, separator)?;
        for name in column_names(&table).into_iter().filter(|n| n != GENE_ID) {
            if !seen.insert(name.clone()) {
                return Err(PipelineError::merge(format!("duplicate column '{}' after prefixing", name)));
            }
        }

        merged = merged.inner_join(&table, [GENE_ID], [GENE_ID])?;
        debug!("After joining '{}': {} genes", result.name, merged.height());
    }

    if merged.height() == 0 {
        return Err(PipelineError::merge("no gene is present in every comparison"));
    }

    let merged = merged
        .sort([ROW_ORDER], SortMultipleOptions::default())?
        .drop(ROW_ORDER)?;
    info!(
        "Merged {} comparisons: {} genes x {} columns",
        results.len(),
        merged.height(),
        merged.width()
    );
    Ok(merged)
}
