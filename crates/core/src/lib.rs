//! Domain layer shared by storage and the HTTP application.
//!
//! Holds the HR record types, request validation and the reporting-tree walk. Nothing in this
//! crate performs I/O.

pub mod hierarchy;
pub mod types;
pub mod validation;
