//! COIL - Common Types and Utilities
//! 
//! This crate contains the error taxonomy, the diagnostics context and the
//! index types shared by the IR container, the binary codec and the driver.

pub mod error;
pub mod ids;

pub use error::{CoilError, Diagnostic, Diagnostics, ErrorKind, Result, Severity};
pub use ids::{BlockId, FunctionId, GlobalId, RegisterId, StringId};
