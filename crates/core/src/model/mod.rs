pub mod metric;
pub mod span;
pub mod value;
