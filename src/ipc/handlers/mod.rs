pub mod assessments;
pub mod batches;
pub mod core;
