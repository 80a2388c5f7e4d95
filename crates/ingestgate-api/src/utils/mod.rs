//! Helpers shared by the upload handlers

pub mod upload;
