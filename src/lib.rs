//! Bookkeeping of which mutable commits of a repository are visible.
//!
//! Public commits are always visible. For draft and secret commits, a
//! repository either derives visibility from obsolescence markers or, once
//! it tracks visible heads explicitly, from a persisted list of heads: a
//! mutable commit is visible when it is an ancestor of, or equal to, one of
//! those heads.
//!
//! The crate is organised from the leaves up:
//!
//! - [`node`] commit identifiers,
//! - [`dag`] the graph, phase and obsolescence interfaces it consumes,
//! - [`store`] and [`transaction`] storage, locking and deferred writes,
//! - [`visibility`] the head tracker and its on-disk formats,
//! - [`repo`] the repository handle and the migrations between modes.

pub mod config;
pub mod dag;
pub mod node;
pub mod repo;
pub mod store;
pub mod transaction;
pub mod visibility;

pub mod prelude;
