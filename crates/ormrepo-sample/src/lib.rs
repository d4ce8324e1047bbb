//! # Blog Sample Library
//!
//! A small blog backend built on `ormrepo`, exposed as a library for the demo
//! binary and the integration tests.

pub mod lifecycle;
pub mod model;
pub mod post_repo;
pub mod services;
pub mod user_repo;
