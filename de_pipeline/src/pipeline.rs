//! Runs every comparison of a configuration and merges their results.

use std::path::PathBuf;

use tracing::{error, info, warn};

use crate::analysis::merge::{merge_results, ComparisonResult};
use crate::analysis::selection::{filtered_counts, selection_mask};
use crate::config::{FailurePolicy, PipelineConfig};
use crate::data_handling::condition_sheet::ConditionSheet;
use crate::data_handling::count_table::{CountMatrix, CountTable};
use crate::engine::{read_results, DeEngine, EngineJob};
use crate::error::{PipelineError, Result};
use crate::helper_functions::{column_names, write_indexed};
use crate::models::Comparison;
use crate::workspace::ComparisonWorkspace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparisonOutcome {
    pub name: String,
    /// Genes that passed the expression filter and were sent to the engine.
    pub selected_genes: usize,
    /// Rows in the engine's result table.
    pub result_genes: usize,
}

#[derive(Debug)]
pub struct RunSummary {
    pub succeeded: Vec<ComparisonOutcome>,
    pub failed: Vec<PipelineError>,
    pub merged_genes: usize,
    pub output: PathBuf,
}

impl RunSummary {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn log(&self) {
        for outcome in &self.succeeded {
            info!(
                "  ok     {}: {} genes tested, {} results",
                outcome.name, outcome.selected_genes, outcome.result_genes
            );
        }
        for failure in &self.failed {
            warn!("  failed {}", failure);
        }
        info!(
            "{} of {} comparisons succeeded; {} genes written to {}",
            self.succeeded.len(),
            self.succeeded.len() + self.failed.len(),
            self.merged_genes,
            self.output.display()
        );
    }
}

/// Count table → per-comparison selection → engine → merged table.
pub struct Pipeline<E: DeEngine> {
    config: PipelineConfig,
    engine: E,
}

impl<E: DeEngine> Pipeline<E> {
    pub fn new(config: PipelineConfig, engine: E) -> Result<Self> {
        config.validate()?;
        Ok(Pipeline { config, engine })
    }

    pub fn run(&self) -> Result<RunSummary> {
        info!("Starting differential-expression run with {} comparisons", self.config.comparisons.len());
        let counts = CountTable::new(&self.config.input, &self.config.namespace_prefix).load()?;
        let metadata = counts.metadata()?;

        let mut results = Vec::with_capacity(self.config.comparisons.len());
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();

        for comparison in &self.config.comparisons {
            info!("Comparison '{}'", comparison.name);
            match self.run_comparison(&counts, comparison) {
                Ok((result, outcome)) => {
                    results.push(result);
                    succeeded.push(outcome);
                }
                Err(e) => {
                    let e = e.in_comparison(&comparison.name);
                    match self.config.on_failure {
                        FailurePolicy::Abort => {
                            error!("{}", e);
                            return Err(e);
                        }
                        FailurePolicy::Isolate => {
                            warn!("{}; continuing with the remaining comparisons", e);
                            failed.push(e);
                        }
                    }
                }
            }
        }

        if results.is_empty() {
            return Err(PipelineError::merge("every comparison failed"));
        }

        let merged = merge_results(&metadata, &results, &self.config.column_separator)?;
        write_indexed(&merged, counts.index_label(), &self.config.output)?;

        let summary = RunSummary {
            succeeded,
            failed,
            merged_genes: merged.height(),
            output: self.config.output.clone(),
        };
        summary.log();
        Ok(summary)
    }

    fn workspace(&self, name: &str) -> Result<ComparisonWorkspace> {
        match (&self.config.work_dir, self.config.keep_intermediates) {
            (Some(dir), true) => ComparisonWorkspace::kept(dir, name),
            (None, true) => ComparisonWorkspace::kept(&PathBuf::from("intermediates"), name),
            (dir, false) => ComparisonWorkspace::scratch(dir.as_deref(), name),
        }
    }

    /// Runs one comparison inside its own workspace. The workspace is released on return,
    /// whether the comparison succeeded or not.
    pub fn run_comparison(
        &self,
        counts: &CountMatrix,
        comparison: &Comparison,
    ) -> Result<(ComparisonResult, ComparisonOutcome)> {
        let workspace = self.workspace(&comparison.name)?;

        let mask = selection_mask(counts, comparison, self.config.min_count)?;
        if mask.passing() == 0 {
            return Err(PipelineError::Selection {
                comparison: comparison.name.clone(),
                reason: format!("no gene reaches {} reads in both groups", self.config.min_count),
            });
        }
        let filtered = filtered_counts(counts, comparison, &mask, self.config.rounding)?;
        let sheet = ConditionSheet::from_comparison(comparison);

        let count_columns = column_names(&filtered);
        if !count_columns[1..].iter().map(String::as_str).eq(sheet.samples()) {
            return Err(PipelineError::Selection {
                comparison: comparison.name.clone(),
                reason: "count columns and condition sheet are out of order".to_string(),
            });
        }

        let counts_path = workspace.counts_path();
        let conditions_path = workspace.conditions_path();
        let results_path = workspace.results_path();
        write_indexed(&filtered, counts.index_label(), &counts_path)?;
        sheet.write(&conditions_path)?;

        self.engine.run(&EngineJob {
            counts: &counts_path,
            conditions: &conditions_path,
            output: &results_path,
            p_adjust: &self.config.p_adjust,
        })?;
        let table = read_results(&results_path)?;

        let outcome = ComparisonOutcome {
            name: comparison.name.clone(),
            selected_genes: mask.passing(),
            result_genes: table.height(),
        };
        Ok((ComparisonResult { name: comparison.name.clone(), table }, outcome))
    }
}
