//! Ingestgate Processing Library
//!
//! Structural and signature validation for uploaded delimited-text files.

pub mod validator;

pub use validator::{sanitize_filename, TabularProfile, TabularValidator, ValidationError};
