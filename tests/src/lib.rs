pub mod common;

pub use orchstr8_core::{IS_DEBUG_TRACING, adjust_timeout};
