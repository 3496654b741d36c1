pub mod condition_sheet;
pub mod count_table;
