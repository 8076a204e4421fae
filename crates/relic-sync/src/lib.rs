pub mod classify;
pub mod cutout;
pub mod engine;
pub mod extract;
pub mod geometry;
pub mod las;
pub mod recompute;
pub mod staleness;
