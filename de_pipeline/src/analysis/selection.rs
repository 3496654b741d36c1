//! Per-comparison gene selection and the integer count table handed to the engine.

use polars::prelude::*;
use tracing::{debug, info};

use crate::config::RoundingMode;
use crate::data_handling::count_table::CountMatrix;
use crate::error::{PipelineError, Result};
use crate::models::{Comparison, SelectionMask, GENE_ID};

/// A gene passes when at least one sample of *each* group reaches `min_count`.
///
/// Within a group the samples are OR-ed, between the groups the result is AND-ed, so a
/// gene expressed in only one group is dropped. With `min_count == 0` every gene passes.
/// Missing counts never reach the threshold.
pub fn selection_mask(
    counts: &CountMatrix,
    comparison: &Comparison,
    min_count: f64,
) -> Result<SelectionMask> {
    if !(min_count.is_finite() && min_count >= 0.0) {
        return Err(PipelineError::Selection {
            comparison: comparison.name.clone(),
            reason: format!("minimum count must be non-negative, got {}", min_count),
        });
    }
    counts.require_samples(comparison)?;

    let in_a = expressed_in_any(counts, &comparison.group_a, min_count)?;
    let in_b = expressed_in_any(counts, &comparison.group_b, min_count)?;
    let mask: Vec<bool> = in_a.iter().zip(&in_b).map(|(&a, &b)| a && b).collect();

    let mask = SelectionMask::new(mask);
    info!(
        "{}: {} of {} genes have at least {} reads in both groups",
        comparison.name,
        mask.passing(),
        mask.len(),
        min_count
    );
    Ok(mask)
}

fn expressed_in_any(counts: &CountMatrix, group: &[String], min_count: f64) -> Result<Vec<bool>> {
    let mut expressed = vec![false; counts.height()];
    for sample in group {
        let values = counts.sample_counts(sample)?;
        for (hit, value) in expressed.iter_mut().zip(values) {
            if value.is_some_and(|v| v >= min_count) {
                *hit = true;
            }
        }
    }
    Ok(expressed)
}

/// Selected genes with the comparison's samples in group_a, group_b order, rounded to
/// integers. The first column is [`GENE_ID`].
pub fn filtered_counts(
    counts: &CountMatrix,
    comparison: &Comparison,
    mask: &SelectionMask,
    rounding: RoundingMode,
) -> Result<DataFrame> {
    counts.require_samples(comparison)?;
    if mask.len() != counts.height() {
        return Err(PipelineError::Selection {
            comparison: comparison.name.clone(),
            reason: format!(
                "selection mask has {} entries for {} genes",
                mask.len(),
                counts.height()
            ),
        });
    }

    let selected = counts.frame().filter(&mask.to_chunked())?;
    let mut columns = vec![selected.column(GENE_ID)?.clone()];
    for sample in comparison.samples() {
        let values = selected.column(sample)?.cast(&DataType::Float64)?;
        let rounded: Vec<Option<i64>> = values
            .f64()?
            .into_iter()
            .map(|v| v.map(|x| rounding.apply(x) as i64))
            .collect();
        columns.push(Column::from(Series::new(PlSmallStr::from(sample), rounded)));
    }

    let df = DataFrame::new(columns)?;
    debug!("{}: engine count table shape {:?}", comparison.name, df.shape());
    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper_functions::{column_names, string_values};
    use polars::df;

    fn matrix() -> CountMatrix {
        let frame = df![
            GENE_ID => &["G1", "G2", "G3"],
            "s1" => &[5.0, 0.0, 2.0],
            "s2" => &[0.0, 0.0, 3.0],
            "s3" => &[6.0, 0.0, 0.0],
            "s4" => &[1.0, 0.0, 0.0],
            "gene_name" => &["g1", "g2", "g3"],
            "gene_length" => &[10i64, 20, 30]
        ]
        .unwrap();
        CountMatrix::from_frame(frame)
    }

    fn comparison() -> Comparison {
        Comparison::new("a vs b", ["s1", "s2"], ["s3", "s4"])
    }

    #[test]
    fn gene_must_be_expressed_in_both_groups() {
        let mask = selection_mask(&matrix(), &comparison(), 1.0).unwrap();
        // G3 is expressed in group a only
        assert_eq!(mask.as_slice(), &[true, false, false]);
    }

    #[test]
    fn zero_threshold_keeps_everything() {
        let mask = selection_mask(&matrix(), &comparison(), 0.0).unwrap();
        assert!(mask.as_slice().iter().all(|&keep| keep));
    }

    #[test]
    fn raising_threshold_never_admits_genes() {
        let counts = matrix();
        let cmp = Comparison::new("x", ["s1"], ["s2", "s3"]);
        let thresholds = [0.0, 0.5, 1.0, 2.0, 2.5, 3.0, 5.0, 6.0, 7.0];
        let masks: Vec<SelectionMask> = thresholds
            .iter()
            .map(|&t| selection_mask(&counts, &cmp, t).unwrap())
            .collect();

        for pair in masks.windows(2) {
            for (lower, higher) in pair[0].as_slice().iter().zip(pair[1].as_slice()) {
                assert!(*lower || !*higher);
            }
        }
    }

    #[test]
    fn missing_sample_is_a_selection_error() {
        let cmp = Comparison::new("broken", ["s1"], ["nope"]);
        let err = selection_mask(&matrix(), &cmp, 1.0).unwrap_err();
        assert!(matches!(err, PipelineError::Selection { .. }));
    }

    #[test]
    fn filtered_counts_follow_group_order_and_round() {
        let frame = df![
            GENE_ID => &["G1", "G2"],
            "s1" => &[2.5, 1.0],
            "s2" => &[3.5, 0.0],
            "s3" => &[0.4, 9.0],
            "gene_name" => &["g1", "g2"],
            "gene_length" => &[10i64, 20]
        ]
        .unwrap();
        let counts = CountMatrix::from_frame(frame);
        let cmp = Comparison::new("x", ["s3"], ["s2", "s1"]);
        let mask = SelectionMask::new(vec![true, false]);

        let df = filtered_counts(&counts, &cmp, &mask, RoundingMode::HalfEven).unwrap();
        assert_eq!(column_names(&df), vec![GENE_ID, "s3", "s2", "s1"]);
        assert_eq!(string_values(&df, GENE_ID).unwrap(), vec![Some("G1".to_string())]);
        assert_eq!(df.column("s3").unwrap().i64().unwrap().get(0), Some(0));
        assert_eq!(df.column("s2").unwrap().i64().unwrap().get(0), Some(4));
        assert_eq!(df.column("s1").unwrap().i64().unwrap().get(0), Some(2));

        let away = filtered_counts(&counts, &cmp, &mask, RoundingMode::HalfAwayFromZero).unwrap();
        assert_eq!(away.column("s1").unwrap().i64().unwrap().get(0), Some(3));
    }
}
