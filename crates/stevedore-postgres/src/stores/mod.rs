//! Typed stores, one per entity.
//!
//! Every method takes a query handle (`&impl GenericClient`) as its first
//! argument so callers compose multi-step work inside one transaction.
//! Absence is `Ok(None)`; errors carry the dedicated kinds of
//! [`crate::Error`].

pub(crate) mod blob;
pub(crate) mod gc;
pub(crate) mod manifest;
pub(crate) mod media;
pub(crate) mod namespace;
pub(crate) mod repository;
pub(crate) mod tag;
