pub mod aggregation;
pub mod csv_import;
pub mod duplicates;
pub mod query;
