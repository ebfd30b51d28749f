//! Numeric kernels shared by the aggregate and inference engines

pub mod descriptive;
pub mod distributions;
pub mod linalg;

pub use descriptive::{CategoricalSummary, NumericSummary};
pub use linalg::Matrix;
