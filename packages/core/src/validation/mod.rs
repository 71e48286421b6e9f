//! Validation Layer
//!
//! Async schema parsing of input and stored documents.

mod error;
mod validator;


pub use error::ValidationError;
pub use validator::Validator;
