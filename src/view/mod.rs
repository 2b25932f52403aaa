pub mod formatter;
pub mod printer;

pub use formatter::{QuerySummary, matches_filter, render_filter};
pub use printer::{RequestPrinter, request_table, result_table};
