pub mod counts;
pub mod duplicate;
pub mod issue;
pub mod query;
