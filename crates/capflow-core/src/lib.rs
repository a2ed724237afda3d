//! Business logic and repository trait definitions for capflow.
//!
//! This crate holds the execution engine and its supporting subsystems
//! (capsule registry, artifact resolver, trigger dispatcher, share links)
//! together with the "ports" (repository, blob store and capsule service
//! traits) that the infrastructure layer implements. It depends only on
//! `capflow-types` -- never on `capflow-infra` or any database/IO crate.

pub mod artifact;
pub mod capsule;
pub mod engine;
pub mod event;
pub mod repository;
pub mod share;
pub mod trigger;
pub mod workflow;
