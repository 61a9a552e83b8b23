//! Utility functions and helpers.

pub mod cancel;
pub mod http;

pub use cancel::CancelToken;
