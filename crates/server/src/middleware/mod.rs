//! Request middleware and extractors.

pub mod bearer;
