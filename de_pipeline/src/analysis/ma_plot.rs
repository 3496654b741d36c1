//! MA plot of one comparison from the merged result table.

use std::path::{Path, PathBuf};

use plotters::coord::Shift;
use plotters::prelude::*;
use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::analysis::merge::prefixed;
use crate::error::{PipelineError, Result};
use crate::helper_functions::{f64_values, read_csv, take_index_column};
use crate::models::GeneCategory;

const NEITHER_COLOUR: RGBColor = RGBColor(0xb3, 0xb3, 0xb3);
const SIG_COLOUR: RGBColor = RGBColor(0xb2, 0xdf, 0x8a);
const FC_COLOUR: RGBColor = RGBColor(0xa6, 0xce, 0xe3);
const BOTH_COLOUR: RGBColor = RGBColor(0x33, 0xa0, 0x2c);

/// Drawing order; later categories are drawn on top.
const DRAW_ORDER: [GeneCategory; 4] = [
    GeneCategory::Neither,
    GeneCategory::SignificantOnly,
    GeneCategory::LargeFoldChangeOnly,
    GeneCategory::Both,
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaThresholds {
    pub fc_cutoff: f64,
    pub p_cutoff: f64,
}

impl MaThresholds {
    /// `padj < p_cutoff` makes a gene significant, `|log2FoldChange| > fc_cutoff` makes
    /// its change large. A missing value fails its predicate.
    pub fn classify(&self, padj: Option<f64>, log2_fc: Option<f64>) -> GeneCategory {
        let significant = padj.is_some_and(|p| p < self.p_cutoff);
        let large_fc = log2_fc.is_some_and(|fc| fc.abs() > self.fc_cutoff);
        GeneCategory::classify(significant, large_fc)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaPoint {
    pub base_mean: Option<f64>,
    pub log2_fc: Option<f64>,
    pub category: GeneCategory,
}

impl MaPoint {
    /// `(log10(baseMean), log2FoldChange)` when both are finite.
    fn coordinates(&self) -> Option<(f64, f64)> {
        let x = self.base_mean?.log10();
        let y = self.log2_fc?;
        (x.is_finite() && y.is_finite()).then_some((x, y))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryCounts {
    pub neither: usize,
    pub significant_only: usize,
    pub large_fc_only: usize,
    pub both: usize,
}

impl CategoryCounts {
    pub fn get(&self, category: GeneCategory) -> usize {
        match category {
            GeneCategory::Neither => self.neither,
            GeneCategory::SignificantOnly => self.significant_only,
            GeneCategory::LargeFoldChangeOnly => self.large_fc_only,
            GeneCategory::Both => self.both,
        }
    }

    /// Legend entry; the `Neither` category has none.
    pub fn legend_label(&self, category: GeneCategory) -> Option<String> {
        match category {
            GeneCategory::Neither => None,
            GeneCategory::SignificantOnly => Some(format!("Sig {}", self.significant_only)),
            GeneCategory::LargeFoldChangeOnly => Some(format!("FC {}", self.large_fc_only)),
            GeneCategory::Both => Some(format!("Sig+FC {}", self.both)),
        }
    }
}

/// Where the plot goes.
#[derive(Debug, Clone, PartialEq)]
pub enum PlotTarget {
    File(PathBuf),
    /// Nothing is written; category counts are reported instead.
    Interactive,
}

#[derive(Debug, Clone)]
pub struct MaPlotData {
    pub comparison: String,
    pub points: Vec<MaPoint>,
}

impl MaPlotData {
    /// Picks `baseMean`, `log2FoldChange` and `padj` of `comparison` out of a merged table.
    pub fn from_merged(
        merged: &DataFrame,
        comparison: &str,
        separator: &str,
        thresholds: MaThresholds,
    ) -> Result<Self> {
        let column = |statistic: &str| -> Result<Vec<Option<f64>>> {
            let name = prefixed(comparison, separator, statistic);
            if merged.column(&name).is_err() {
                return Err(PipelineError::plot(format!(
                    "merged table has no column '{}' for comparison '{}'",
                    name, comparison
                )));
            }
            Ok(f64_values(merged, &name)?)
        };
        let base_mean = column("baseMean")?;
        let log2_fc = column("log2FoldChange")?;
        let padj = column("padj")?;

        let points = base_mean
            .into_iter()
            .zip(log2_fc)
            .zip(padj)
            .map(|((base_mean, log2_fc), padj)| MaPoint {
                base_mean,
                log2_fc,
                category: thresholds.classify(padj, log2_fc),
            })
            .collect();

        Ok(MaPlotData { comparison: comparison.to_string(), points })
    }

    pub fn counts(&self) -> CategoryCounts {
        let mut counts = CategoryCounts::default();
        for point in &self.points {
            match point.category {
                GeneCategory::Neither => counts.neither += 1,
                GeneCategory::SignificantOnly => counts.significant_only += 1,
                GeneCategory::LargeFoldChangeOnly => counts.large_fc_only += 1,
                GeneCategory::Both => counts.both += 1,
            }
        }
        counts
    }

    fn series(&self, category: GeneCategory) -> Vec<(f64, f64)> {
        self.points
            .iter()
            .filter(|p| p.category == category)
            .filter_map(MaPoint::coordinates)
            .collect()
    }
}

/// Reads a merged result table written by `run`.
pub fn read_merged(path: &Path) -> Result<DataFrame> {
    let mut df = read_csv(path)?;
    take_index_column(&mut df)?;
    Ok(df)
}

fn colour_for(category: GeneCategory) -> RGBColor {
    match category {
        GeneCategory::Neither => NEITHER_COLOUR,
        GeneCategory::SignificantOnly => SIG_COLOUR,
        GeneCategory::LargeFoldChangeOnly => FC_COLOUR,
        GeneCategory::Both => BOTH_COLOUR,
    }
}

fn plot_err<E: std::fmt::Display>(e: E) -> PipelineError {
    PipelineError::plot(e)
}

/// Draws the plot to `target`. Returns the written path, `None` in interactive mode.
pub fn render(data: &MaPlotData, target: &PlotTarget, size: (u32, u32)) -> Result<Option<PathBuf>> {
    let counts = data.counts();
    let path = match target {
        PlotTarget::Interactive => {
            info!(
                "{}: {} | {} | {} ({} genes without either)",
                data.comparison,
                counts.legend_label(GeneCategory::SignificantOnly).unwrap_or_default(),
                counts.legend_label(GeneCategory::LargeFoldChangeOnly).unwrap_or_default(),
                counts.legend_label(GeneCategory::Both).unwrap_or_default(),
                counts.neither
            );
            return Ok(None);
        }
        PlotTarget::File(path) => path,
    };

    let is_svg = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("svg"));
    if is_svg {
        draw(SVGBackend::new(path, size).into_drawing_area(), data)?;
    } else {
        draw(BitMapBackend::new(path, size).into_drawing_area(), data)?;
    }

    info!("MA plot for '{}' saved to {}", data.comparison, path.display());
    Ok(Some(path.clone()))
}

fn axis_range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !(lo.is_finite() && hi.is_finite()) {
        return None;
    }
    let pad = if hi > lo { (hi - lo) * 0.05 } else { 0.5 };
    Some((lo - pad, hi + pad))
}

fn draw<DB: DrawingBackend>(root: DrawingArea<DB, Shift>, data: &MaPlotData) -> Result<()> {
    root.fill(&WHITE).map_err(plot_err)?;

    let series: Vec<(GeneCategory, Vec<(f64, f64)>)> =
        DRAW_ORDER.iter().map(|&c| (c, data.series(c))).collect();
    let all = || series.iter().flat_map(|(_, pts)| pts.iter());
    let (x_min, x_max, y_min, y_max) =
        match (axis_range(all().map(|p| p.0)), axis_range(all().map(|p| p.1))) {
            (Some((x_min, x_max)), Some((y_min, y_max))) => (x_min, x_max, y_min, y_max),
            _ => {
                warn!("No drawable genes for '{}'; drawing empty axes", data.comparison);
                (0.0, 1.0, -1.0, 1.0)
            }
        };
    debug!("MA plot axes x: {:.2}..{:.2}, y: {:.2}..{:.2}", x_min, x_max, y_min, y_max);

    let mut chart = ChartBuilder::on(&root)
        .caption(&data.comparison, ("sans-serif", 22))
        .margin(15)
        .x_label_area_size(45)
        .y_label_area_size(55)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .x_desc("Base mean (log10)")
        .y_desc("Fold change (log2)")
        .draw()
        .map_err(plot_err)?;

    let counts = data.counts();
    for (category, points) in &series {
        let colour = colour_for(*category);
        let drawn = chart
            .draw_series(points.iter().map(|&p| Circle::new(p, 2, colour.filled())))
            .map_err(plot_err)?;
        if let Some(label) = counts.legend_label(*category) {
            drawn
                .label(label)
                .legend(move |(x, y)| Circle::new((x, y), 4, colour.filled()));
        }
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(&BLACK)
        .label_font(("sans-serif", 16))
        .position(SeriesLabelPosition::UpperRight)
        .draw()
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;
    use std::fs;

    const THRESHOLDS: MaThresholds = MaThresholds { fc_cutoff: 2.0, p_cutoff: 0.01 };

    #[test]
    fn classification_uses_strict_cutoffs() {
        assert_eq!(THRESHOLDS.classify(Some(0.001), Some(3.0)), GeneCategory::Both);
        assert_eq!(THRESHOLDS.classify(Some(0.5), Some(3.0)), GeneCategory::LargeFoldChangeOnly);
        assert_eq!(THRESHOLDS.classify(Some(0.001), Some(-1.0)), GeneCategory::SignificantOnly);
        assert_eq!(THRESHOLDS.classify(Some(0.01), Some(2.0)), GeneCategory::Neither);
        assert_eq!(THRESHOLDS.classify(Some(0.001), Some(-2.5)), GeneCategory::Both);
    }

    #[test]
    fn missing_values_fail_their_predicate() {
        assert_eq!(THRESHOLDS.classify(None, Some(5.0)), GeneCategory::LargeFoldChangeOnly);
        assert_eq!(THRESHOLDS.classify(Some(0.001), None), GeneCategory::SignificantOnly);
        assert_eq!(THRESHOLDS.classify(None, None), GeneCategory::Neither);
    }

    #[test]
    fn points_come_from_prefixed_columns() {
        let merged = df![
            "gene_id" => &["G1", "G2", "G3"],
            "X baseMean" => &[100.0, 10.0, 0.0],
            "X log2FoldChange" => &[3.0, 3.0, 0.1],
            "X padj" => &[0.001, 0.5, 0.9],
            "Y padj" => &[0.5, 0.5, 0.5]
        ]
        .unwrap();

        let data = MaPlotData::from_merged(&merged, "X", " ", THRESHOLDS).unwrap();
        let categories: Vec<GeneCategory> = data.points.iter().map(|p| p.category).collect();
        assert_eq!(
            categories,
            vec![GeneCategory::Both, GeneCategory::LargeFoldChangeOnly, GeneCategory::Neither]
        );

        let counts = data.counts();
        assert_eq!(counts.legend_label(GeneCategory::SignificantOnly).unwrap(), "Sig 0");
        assert_eq!(counts.legend_label(GeneCategory::LargeFoldChangeOnly).unwrap(), "FC 1");
        assert_eq!(counts.legend_label(GeneCategory::Both).unwrap(), "Sig+FC 1");
        assert_eq!(counts.legend_label(GeneCategory::Neither), None);

        // log10(0) is not drawable but the gene is still counted
        assert_eq!(data.series(GeneCategory::Neither), Vec::<(f64, f64)>::new());
        assert_eq!(counts.neither, 1);
        assert_eq!(data.series(GeneCategory::Both), vec![(2.0, 3.0)]);
    }

    #[test]
    fn unknown_comparison_is_a_plot_error() {
        let merged = df!["gene_id" => &["G1"], "X padj" => &[0.1]].unwrap();
        let err = MaPlotData::from_merged(&merged, "Z", " ", THRESHOLDS).unwrap_err();
        assert!(matches!(err, PipelineError::Plot { .. }));
    }

    #[test]
    fn interactive_target_writes_nothing() {
        let data = MaPlotData { comparison: "X".to_string(), points: Vec::new() };
        assert_eq!(render(&data, &PlotTarget::Interactive, (800, 500)).unwrap(), None);
    }

    fn sample_data() -> MaPlotData {
        let merged = df![
            "gene_id" => &["G1", "G2", "G3", "G4"],
            "X baseMean" => &[100.0, 10.0, 2500.0, 40.0],
            "X log2FoldChange" => &[3.0, 3.0, 0.1, -0.5],
            "X padj" => &[0.001, 0.5, 0.9, 0.005]
        ]
        .unwrap();
        MaPlotData::from_merged(&merged, "X", " ", THRESHOLDS).unwrap()
    }

    #[test]
    fn png_and_svg_files_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let data = sample_data();

        for name in ["de_ma.png", "de_ma.svg"] {
            let path = dir.path().join(name);
            let written = render(&data, &PlotTarget::File(path.clone()), (800, 500)).unwrap();
            assert_eq!(written, Some(path.clone()));
            assert!(fs::metadata(&path).unwrap().len() > 0);
        }
        let svg = fs::read_to_string(dir.path().join("de_ma.svg")).unwrap();
        assert!(svg.starts_with("<svg"));
    }

    #[test]
    fn no_drawable_genes_still_gives_a_figure() {
        let merged = df![
            "gene_id" => &["G1"],
            "X baseMean" => &[0.0],
            "X log2FoldChange" => &[1.0],
            "X padj" => &[0.5]
        ]
        .unwrap();
        let data = MaPlotData::from_merged(&merged, "X", " ", THRESHOLDS).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.svg");

        render(&data, &PlotTarget::File(path.clone()), (400, 300)).unwrap();
        assert!(fs::metadata(&path).unwrap().len() > 0);
        assert_eq!(data.counts().neither, 1);
    }

    #[test]
    fn axis_range_pads_single_values() {
        assert_eq!(axis_range([1.0].into_iter()), Some((0.5, 1.5)));
        assert_eq!(axis_range(std::iter::empty()), None);
    }
}
