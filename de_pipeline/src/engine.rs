use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use polars::prelude::*;
use tracing::{debug, error, info};

use crate::config::EngineConfig;
use crate::error::{PipelineError, Result};
use crate::helper_functions::{read_csv, take_index_column};
use crate::models::{GENE_ID, REQUIRED_STATISTICS};

/// Files and settings for a single differential-expression test.
#[derive(Debug, Clone, Copy)]
pub struct EngineJob<'a> {
    /// Integer counts, gene ids in the first column, one column per sample.
    pub counts: &'a Path,
    /// Sample to condition label (`a` / `b`), in the same order as the count columns.
    pub conditions: &'a Path,
    /// Where the engine writes its result table.
    pub output: &'a Path,
    /// Multiple-testing correction method name, e.g. `fdr`.
    pub p_adjust: &'a str,
}

/// Something that can run a differential-expression test.
///
/// On success the job's output file holds a table indexed by gene id with at least
/// `baseMean`, `log2FoldChange`, `pvalue` and `padj`.
pub trait DeEngine {
    fn run(&self, job: &EngineJob<'_>) -> Result<()>;
}

impl<T: DeEngine + ?Sized> DeEngine for &T {
    fn run(&self, job: &EngineJob<'_>) -> Result<()> {
        (**self).run(job)
    }
}

impl<T: DeEngine + ?Sized> DeEngine for Box<T> {
    fn run(&self, job: &EngineJob<'_>) -> Result<()> {
        (**self).run(job)
    }
}

/// Runs an external program, e.g. `Rscript run_deseq.r`, as a blocking subprocess.
///
/// The program receives `[script] counts conditions output p_adjust`.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    pub program: String,
    pub script: Option<PathBuf>,
}

impl CommandEngine {
    pub fn new(program: impl Into<String>, script: Option<PathBuf>) -> Self {
        CommandEngine { program: program.into(), script }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        CommandEngine::new(config.program.clone(), config.script.clone())
    }

    fn command(&self, job: &EngineJob<'_>) -> Result<Command> {
        let program = which::which(&self.program).map_err(|e| {
            PipelineError::engine(format!("cannot find program '{}': {}", self.program, e))
        })?;

        let mut cmd = Command::new(program);
        if let Some(script) = &self.script {
            cmd.arg(script);
        }
        cmd.arg(job.counts)
            .arg(job.conditions)
            .arg(job.output)
            .arg(job.p_adjust);
        Ok(cmd)
    }
}

impl DeEngine for CommandEngine {
    fn run(&self, job: &EngineJob<'_>) -> Result<()> {
        let mut cmd = self.command(job)?;
        if job.output.exists() {
            debug!("Removing previous result {}", job.output.display());
            fs::remove_file(job.output)?;
        }
        info!("Running differential-expression engine '{}'", self.program);
        debug!("About to spawn: {:?}", cmd);

        let output = cmd
            .output()
            .map_err(|e| PipelineError::engine(format!("failed to start '{}': {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("Engine failed. Stderr:\n{}", stderr);
            return Err(PipelineError::engine(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        debug!("Engine completed. Stdout:\n{}", String::from_utf8_lossy(&output.stdout));

        if !job.output.is_file() {
            return Err(PipelineError::engine(format!(
                "'{}' exited successfully but wrote no result to {}",
                self.program,
                job.output.display()
            )));
        }
        Ok(())
    }
}

/// Reads an engine result table. The first column becomes [`GENE_ID`] and the required
/// statistics are cast to `Float64` (`NA` becomes null).
pub fn read_results(path: &Path) -> Result<DataFrame> {
    let malformed = |reason: String| {
        PipelineError::engine(format!("malformed result table {}: {}", path.display(), reason))
    };

    let mut df = read_csv(path).map_err(|e| malformed(e.to_string()))?;
    take_index_column(&mut df).map_err(|e| malformed(e.to_string()))?;
    let ids = df.column(GENE_ID)?.cast(&DataType::String)?;
    df.with_column(ids)?;

    for statistic in REQUIRED_STATISTICS {
        let values = df
            .column(statistic)
            .map_err(|_| malformed(format!("missing column '{}'", statistic)))?
            .cast(&DataType::Float64)
            .map_err(|e| malformed(e.to_string()))?;
        df.with_column(values)?;
    }
    debug!("Read {} result rows from {}", df.height(), path.display());
    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper_functions::f64_values;

    #[test]
    fn results_missing_a_statistic_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("de.csv");
        fs::write(&path, "\"\",baseMean,log2FoldChange,pvalue\nG1,1,2,0.5\n").unwrap();

        let err = read_results(&path).unwrap_err();
        assert!(matches!(err, PipelineError::Engine { .. }));
    }

    #[test]
    fn results_are_indexed_by_gene() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("de.csv");
        fs::write(
            &path,
            "\"\",baseMean,log2FoldChange,lfcSE,stat,pvalue,padj\n\
             G1,100.5,2.1,0.3,7,0.0001,0.001\n\
             G2,0,NA,NA,NA,NA,NA\n",
        )
        .unwrap();

        let df = read_results(&path).unwrap();
        assert_eq!(df.get_column_names()[0].as_str(), GENE_ID);
        assert_eq!(f64_values(&df, "padj").unwrap(), vec![Some(0.001), None]);
    }

    #[test]
    fn unknown_program_is_an_engine_error() {
        let engine = CommandEngine::new("definitely-not-a-de-engine-binary", None);
        let dir = tempfile::tempdir().unwrap();
        let (c, k, o) = (dir.path().join("c"), dir.path().join("k"), dir.path().join("o"));
        let job = EngineJob { counts: &c, conditions: &k, output: &o, p_adjust: "fdr" };
        assert!(matches!(engine.run(&job), Err(PipelineError::Engine { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_an_engine_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fail.sh");
        fs::write(&script, "echo 'dispersion fit failed' >&2\nexit 3\n").unwrap();
        let engine = CommandEngine::new("sh", Some(script));

        let (c, k, o) = (dir.path().join("c"), dir.path().join("k"), dir.path().join("o"));
        let job = EngineJob { counts: &c, conditions: &k, output: &o, p_adjust: "fdr" };
        let err = engine.run(&job).unwrap_err();
        assert!(err.to_string().contains("dispersion fit failed"));
    }

    #[cfg(unix)]
    #[test]
    fn earlier_result_is_not_reused() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("noop.sh");
        fs::write(&script, "exit 0\n").unwrap();
        let engine = CommandEngine::new("sh", Some(script));

        let (c, k, o) = (dir.path().join("c"), dir.path().join("k"), dir.path().join("o"));
        fs::write(&o, "\"\",baseMean,log2FoldChange,pvalue,padj\nG1,1,2,0.5,0.5\n").unwrap();
        let job = EngineJob { counts: &c, conditions: &k, output: &o, p_adjust: "fdr" };

        assert!(matches!(engine.run(&job), Err(PipelineError::Engine { .. })));
        assert!(!o.exists());
    }

    #[cfg(unix)]
    #[test]
    fn arguments_are_passed_in_fixed_order() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("echo.sh");
        // writes its four arguments, one per line, to the output path ($3)
        fs::write(&script, "printf '%s\\n' \"$1\" \"$2\" \"$3\" \"$4\" > \"$3\"\n").unwrap();
        let engine = CommandEngine::new("sh", Some(script));

        let (c, k, o) = (dir.path().join("c"), dir.path().join("k"), dir.path().join("o"));
        let job = EngineJob { counts: &c, conditions: &k, output: &o, p_adjust: "BH" };
        engine.run(&job).unwrap();

        let written = fs::read_to_string(&o).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(
            lines,
            vec![
                c.to_str().unwrap(),
                k.to_str().unwrap(),
                o.to_str().unwrap(),
                "BH"
            ]
        );
    }
}
