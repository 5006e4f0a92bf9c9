//! Common utilities and types shared across Winmon components.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
