use std::collections::HashSet;
use std::path::PathBuf;

use polars::prelude::*;
use tracing::{debug, error, info};

use crate::error::{PipelineError, Result};
use crate::helper_functions::{column_names, f64_values, read_csv, string_values, take_index_column};
use crate::models::{Comparison, GENE_ID, GENE_LENGTH, GENE_NAME};

/// A gene count table on disk, restricted to one identifier namespace when loaded.
pub struct CountTable {
    pub path: PathBuf,
    pub namespace_prefix: String,
}

/// Gene-by-sample read counts with the gene metadata columns.
///
/// The frame starts with the [`GENE_ID`] column followed by the input columns in their
/// original order. Sample columns are `Float64`.
#[derive(Debug, Clone)]
pub struct CountMatrix {
    frame: DataFrame,
    index_label: String,
    samples: Vec<String>,
}

impl CountTable {
    pub fn new(path: impl Into<PathBuf>, namespace_prefix: impl Into<String>) -> Self {
        CountTable { path: path.into(), namespace_prefix: namespace_prefix.into() }
    }

    pub fn load(&self) -> Result<CountMatrix> {
        info!("Reading gene counts from {}", self.path.display());

        let mut df = match read_csv(&self.path) {
            Ok(df) => df,
            Err(e) => {
                error!("Failed to read count table: {}", e);
                return Err(PipelineError::load(&self.path, e));
            }
        };
        debug!("Loaded {} rows x {} columns", df.height(), df.width());

        if df.width() < 2 {
            return Err(PipelineError::load(&self.path, "expected an index column and at least one data column"));
        }
        let index_label = take_index_column(&mut df).map_err(|e| PipelineError::load(&self.path, e))?;
        let ids = df
            .column(GENE_ID)?
            .cast(&DataType::String)
            .map_err(|e| PipelineError::load(&self.path, e))?;
        df.with_column(ids)?;
        self.check_index(&df)?;

        for required in [GENE_NAME, GENE_LENGTH] {
            if df.column(required).is_err() {
                return Err(PipelineError::load(&self.path, format!("missing column '{}'", required)));
            }
        }

        let before = df.height();
        let prefix = self.namespace_prefix.as_str();
        let mut frame = df
            .lazy()
            .filter(col(GENE_ID).str().starts_with(lit(prefix)))
            .collect()?;
        info!(
            "Kept {} of {} genes with identifier prefix '{}'",
            frame.height(),
            before,
            prefix
        );

        let samples: Vec<String> = column_names(&frame)
            .into_iter()
            .filter(|c| c != GENE_ID && c != GENE_NAME && c != GENE_LENGTH)
            .collect();
        for sample in &samples {
            let numeric = self.numeric_counts(&frame, sample)?;
            frame.with_column(numeric)?;
        }
        debug!("Samples: {:?}", samples);

        Ok(CountMatrix { frame, index_label, samples })
    }

    fn check_index(&self, df: &DataFrame) -> Result<()> {
        let mut seen = HashSet::with_capacity(df.height());
        for id in string_values(df, GENE_ID)? {
            match id {
                None => return Err(PipelineError::load(&self.path, "index column contains an empty identifier")),
                Some(id) => {
                    if !seen.insert(id.clone()) {
                        return Err(PipelineError::load(&self.path, format!("duplicate gene identifier '{}'", id)));
                    }
                }
            }
        }
        Ok(())
    }

    /// Casts a sample column to `Float64`, rejecting text and negative counts.
    fn numeric_counts(&self, frame: &DataFrame, sample: &str) -> Result<Column> {
        let original = frame.column(sample)?;
        let casted = original.cast(&DataType::Float64)?;
        if casted.null_count() > original.null_count() {
            return Err(PipelineError::load(&self.path, format!("sample column '{}' is not numeric", sample)));
        }
        let negative = casted.f64()?.into_iter().flatten().any(|v| v < 0.0);
        if negative {
            return Err(PipelineError::load(&self.path, format!("sample column '{}' has negative counts", sample)));
        }
        Ok(casted)
    }
}

impl CountMatrix {
    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    /// Header of the identifier column in the input file, reused when writing tables.
    pub fn index_label(&self) -> &str {
        &self.index_label
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn gene_ids(&self) -> Result<Vec<String>> {
        Ok(string_values(&self.frame, GENE_ID)?.into_iter().flatten().collect())
    }

    /// Fails with a selection error naming the first sample of `comparison` the table lacks.
    pub fn require_samples(&self, comparison: &Comparison) -> Result<()> {
        for sample in comparison.samples() {
            if !self.samples.iter().any(|s| s == sample) {
                return Err(PipelineError::Selection {
                    comparison: comparison.name.clone(),
                    reason: format!("sample '{}' is not a column of the count table", sample),
                });
            }
        }
        Ok(())
    }

    pub fn sample_counts(&self, sample: &str) -> Result<Vec<Option<f64>>> {
        Ok(f64_values(&self.frame, sample)?)
    }

    /// Identifier, gene name and gene length of every gene.
    pub fn metadata(&self) -> Result<DataFrame> {
        Ok(self.frame.select([GENE_ID, GENE_NAME, GENE_LENGTH])?)
    }

    #[cfg(test)]
    pub(crate) fn from_frame(frame: DataFrame) -> Self {
        let samples = column_names(&frame)
            .into_iter()
            .filter(|c| c != GENE_ID && c != GENE_NAME && c != GENE_LENGTH)
            .collect();
        CountMatrix { frame, index_label: String::new(), samples }
    }
}
