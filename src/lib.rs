//! oldm - an object-linked-data mapper: projects RDF graphs described by a
//! Hydra/RDFS schema and JSON-LD contexts into typed, mutable Rust objects,
//! and back.
//!
//! Start at [`mediator::create_mediator`] to compile a schema graph into a
//! [`registry::ModelRegistry`], bind a [`session::Store`] to it, and open a
//! [`session::Session`].

pub mod attribute;
pub mod error;
pub mod id;
pub mod iri_gen;
pub mod mediator;
pub mod model;
pub mod property;
pub mod registry;
pub mod resource;
pub mod schema;
pub mod session;
pub mod store;
pub mod value;
