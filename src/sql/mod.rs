//! SQL text helpers: identifiers come from validated tenant names or config only.

mod quote;
pub use quote::*;
