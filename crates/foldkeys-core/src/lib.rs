pub mod config;
pub mod error;
pub mod types;

pub use error::{FoldkeysError, FoldkeysResult};
pub use types::{KeyGen, UserId};
