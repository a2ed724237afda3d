//! Custom request extractors.

pub mod query;
pub mod viewer;
