//! Run configuration, read from a JSON file.
//!
//! Every field except `input` and `comparisons` has a default, so a minimal file is
//!
//! ```json
//! {
//!   "input": "counts.csv.xz",
//!   "comparisons": [
//!     { "name": "WT vs MZ", "group_a": ["WT B1", "WT B2"], "group_b": ["MZ B1", "MZ B2"] }
//!   ]
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::models::Comparison;
use crate::workspace::slug;

/// How fractional counts become integers before they reach the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    /// Ties go to the even neighbour: 0.5 -> 0, 1.5 -> 2, 2.5 -> 2.
    #[default]
    HalfEven,
    /// Ties go away from zero: 0.5 -> 1, 2.5 -> 3.
    HalfAwayFromZero,
}

impl RoundingMode {
    pub fn apply(self, value: f64) -> f64 {
        match self {
            RoundingMode::HalfEven => value.round_ties_even(),
            RoundingMode::HalfAwayFromZero => value.round(),
        }
    }
}

/// What happens to the rest of the batch when one comparison fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop at the first failure and write nothing.
    #[default]
    Abort,
    /// Skip failing comparisons and merge the others.
    Isolate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Executable to run, looked up on `PATH` when not a path.
    pub program: String,
    /// Script passed as the first argument, for interpreter-based engines.
    pub script: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            program: "Rscript".to_string(),
            script: Some(PathBuf::from("scripts/run_deseq.r")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotConfig {
    /// Comparison to draw; the first declared comparison when unset.
    pub comparison: Option<String>,
    /// Absolute log2 fold change above which a gene counts as a large change.
    pub fc_cutoff: f64,
    /// Adjusted p-value below which a gene counts as significant.
    pub p_cutoff: f64,
    /// Merged table to read; the run output when unset.
    pub input: Option<PathBuf>,
    pub output_base: String,
    pub extension: String,
    pub width: u32,
    pub height: u32,
}

impl Default for PlotConfig {
    fn default() -> Self {
        PlotConfig {
            comparison: None,
            fc_cutoff: 2.0,
            p_cutoff: 0.01,
            input: None,
            output_base: "de_ma".to_string(),
            extension: ".png".to_string(),
            width: 800,
            height: 500,
        }
    }
}

impl PlotConfig {
    pub const SUPPORTED_EXTENSIONS: [&'static str; 2] = [".png", ".svg"];

    pub fn output_path(&self) -> PathBuf {
        PathBuf::from(format!("{}{}", self.output_base, self.extension))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.fc_cutoff.is_finite() && self.fc_cutoff > 0.0) {
            return Err(PipelineError::config(format!(
                "fold-change cutoff must be a positive number, got {}",
                self.fc_cutoff
            )));
        }
        if !(self.p_cutoff > 0.0 && self.p_cutoff < 1.0) {
            return Err(PipelineError::config(format!(
                "p-value cutoff must lie in (0, 1), got {}",
                self.p_cutoff
            )));
        }
        let extension = self.extension.to_ascii_lowercase();
        if !Self::SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(PipelineError::config(format!(
                "unsupported image extension '{}', expected one of {:?}",
                self.extension,
                Self::SUPPORTED_EXTENSIONS
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(PipelineError::config("plot dimensions must be non-zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Count table; first column gene ids, then samples, `gene_name` and `gene_length`.
    pub input: PathBuf,
    /// Only genes whose identifier starts with this prefix are kept.
    pub namespace_prefix: String,
    /// Minimum read count a sample needs for its group to count as expressed.
    pub min_count: f64,
    /// Multiple-testing correction handed to the engine.
    pub p_adjust: String,
    /// Placed between the comparison name and the statistic in merged column names.
    pub column_separator: String,
    pub rounding: RoundingMode,
    /// Merged result table.
    pub output: PathBuf,
    /// Parent of the per-comparison scratch directories; system temp when unset.
    pub work_dir: Option<PathBuf>,
    /// Keep per-comparison intermediate files instead of deleting them.
    pub keep_intermediates: bool,
    pub on_failure: FailurePolicy,
    pub engine: EngineConfig,
    pub comparisons: Vec<Comparison>,
    pub plot: PlotConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            input: PathBuf::new(),
            namespace_prefix: "ENSDAR".to_string(),
            min_count: 1.0,
            p_adjust: "fdr".to_string(),
            column_separator: " ".to_string(),
            rounding: RoundingMode::default(),
            output: PathBuf::from("de.csv"),
            work_dir: None,
            keep_intermediates: false,
            on_failure: FailurePolicy::default(),
            engine: EngineConfig::default(),
            comparisons: Vec::new(),
            plot: PlotConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        info!("Reading configuration from {}", path.display());
        let text = fs::read_to_string(path).map_err(|e| {
            PipelineError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: PipelineConfig = serde_json::from_str(&text)?;
        Ok(config)
    }

    /// Template written by `init-config`.
    pub fn template() -> Self {
        PipelineConfig {
            input: PathBuf::from("counts.csv.xz"),
            comparisons: vec![Comparison::new(
                "WT vs mutant",
                ["WT B1", "WT B2"],
                ["mutant B1", "mutant B2"],
            )],
            ..PipelineConfig::default()
        }
    }

    pub fn write_template(path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(&Self::template())?)?;
        info!("Configuration template written to {}", path.display());
        Ok(())
    }

    /// Checks everything needed by `run`.
    pub fn validate(&self) -> Result<()> {
        if self.input.as_os_str().is_empty() {
            return Err(PipelineError::config("no input count table given"));
        }
        if !(self.min_count.is_finite() && self.min_count >= 0.0) {
            return Err(PipelineError::config(format!(
                "minimum count must be a non-negative number, got {}",
                self.min_count
            )));
        }
        if self.p_adjust.trim().is_empty() {
            return Err(PipelineError::config("p-value adjustment method must not be empty"));
        }
        if self.engine.program.trim().is_empty() {
            return Err(PipelineError::config("engine program must not be empty"));
        }
        self.validate_comparisons()
    }

    pub fn validate_comparisons(&self) -> Result<()> {
        if self.comparisons.is_empty() {
            return Err(PipelineError::config("at least one comparison is required"));
        }
        let mut names = HashSet::new();
        let mut directories: HashMap<String, &str> = HashMap::new();
        for comparison in &self.comparisons {
            comparison.validate()?;
            if !names.insert(comparison.name.as_str()) {
                return Err(PipelineError::config(format!(
                    "comparison '{}' is declared twice",
                    comparison.name
                )));
            }
            if let Some(other) = directories.insert(slug(&comparison.name), &comparison.name) {
                return Err(PipelineError::config(format!(
                    "comparisons '{}' and '{}' would share the working directory '{}'",
                    other,
                    comparison.name,
                    slug(&comparison.name)
                )));
            }
        }
        Ok(())
    }

    /// Comparison the MA plot is drawn for.
    pub fn plot_comparison(&self) -> Result<&str> {
        match &self.plot.comparison {
            Some(name) => Ok(name),
            None => self
                .comparisons
                .first()
                .map(|c| c.name.as_str())
                .ok_or_else(|| PipelineError::config("no comparison to plot")),
        }
    }

    pub fn plot_input(&self) -> &Path {
        self.plot.input.as_deref().unwrap_or(&self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_gets_defaults() {
        let json = r#"{
            "input": "counts.csv",
            "comparisons": [{"name": "x", "group_a": ["s1"], "group_b": ["s2"]}]
        }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.namespace_prefix, "ENSDAR");
        assert_eq!(config.min_count, 1.0);
        assert_eq!(config.p_adjust, "fdr");
        assert_eq!(config.column_separator, " ");
        assert_eq!(config.rounding, RoundingMode::HalfEven);
        assert_eq!(config.on_failure, FailurePolicy::Abort);
        assert_eq!(config.engine.program, "Rscript");
        assert_eq!(config.engine.script, Some(PathBuf::from("scripts/run_deseq.r")));
        assert_eq!(config.plot.output_path(), PathBuf::from("de_ma.png"));
        assert_eq!(config.plot_comparison().unwrap(), "x");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn policies_parse_from_snake_case() {
        let json = r#"{"rounding": "half_away_from_zero", "on_failure": "isolate"}"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.rounding, RoundingMode::HalfAwayFromZero);
        assert_eq!(config.on_failure, FailurePolicy::Isolate);
    }

    #[test]
    fn rounding_differs_only_at_ties() {
        assert_eq!(RoundingMode::HalfEven.apply(2.5), 2.0);
        assert_eq!(RoundingMode::HalfAwayFromZero.apply(2.5), 3.0);
        assert_eq!(RoundingMode::HalfEven.apply(0.5), 0.0);
        assert_eq!(RoundingMode::HalfEven.apply(1.5), 2.0);
        assert_eq!(RoundingMode::HalfEven.apply(2.7), 3.0);
        assert_eq!(RoundingMode::HalfAwayFromZero.apply(2.2), 2.0);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = PipelineConfig::template();
        config.min_count = -1.0;
        assert!(matches!(config.validate(), Err(PipelineError::Config { .. })));

        let mut config = PipelineConfig::template();
        config.comparisons.push(config.comparisons[0].clone());
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::template();
        let mut clash = config.comparisons[0].clone();
        clash.name = format!("{}/", clash.name.replace(' ', "/"));
        config.comparisons.push(clash);
        assert!(matches!(config.validate(), Err(PipelineError::Config { .. })));

        let mut plot = PlotConfig::default();
        plot.p_cutoff = 1.0;
        assert!(plot.validate().is_err());
        plot.p_cutoff = 0.05;
        plot.extension = ".gif".to_string();
        assert!(plot.validate().is_err());
        plot.extension = ".svg".to_string();
        assert!(plot.validate().is_ok());
    }

    #[test]
    fn template_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        PipelineConfig::write_template(&path).unwrap();
        let read = PipelineConfig::from_path(&path).unwrap();
        assert_eq!(read, PipelineConfig::template());
    }
}
