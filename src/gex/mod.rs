pub mod engine;
pub mod heatmap;
pub mod levels;

pub use engine::{compute_gex, GexError, GexResponse};
