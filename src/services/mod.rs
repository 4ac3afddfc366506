pub mod cache;
pub mod emissions;
pub mod pipeline;
pub mod trace;
pub mod transform;
