//! Index types used for references that cross the ownership tree
//! 
//! A Module owns its functions and globals, a function owns its blocks.
//! Everything else refers to them by position, never by pointer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Virtual register number, local to one function
pub type RegisterId = u32;

/// Index into a string table
pub type StringId = u32;

macro_rules! index_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            pub fn new(index: usize) -> Self {
                Self(index as u32)
            }

            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

index_type!(
    /// Position of a function inside its Module
    FunctionId, "fn"
);
index_type!(
    /// Position of a basic block inside its Function
    BlockId, "bb"
);
index_type!(
    /// Position of a global variable inside its Module
    GlobalId, "g"
);
