pub mod ma_plot;
pub mod merge;
pub mod selection;
