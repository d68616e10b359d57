//! Window registry module
//!
//! Tracks open windows, their owners and the parameters they were opened with.

mod params;
mod registry;

pub use params::{sanitize_key, WindowParams};
pub use registry::{WindowRecord, WindowRegistry};
