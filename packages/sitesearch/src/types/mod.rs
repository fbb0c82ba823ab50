//! Data types shared across the indexing pipeline and the query path.

pub mod document;
pub mod site;
