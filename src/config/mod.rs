pub mod base;
pub mod loader;
pub mod tenant;
pub mod types;
pub mod validator;

pub use base::*;
pub use loader::*;
pub use tenant::*;
pub use types::*;
pub use validator::*;
