//! The `utils` module provides common definitions shared across the
//! `embermq` engine: the error taxonomy and the logging initializer.

pub mod error;
pub mod logging;
