//! # Mago - Unit of Work and Durable Transactions for a Document Store
//!
//! Mago sits on top of an embedded document store that has no multi-document
//! atomicity and adds two things to it:
//!
//! - **Sessions**: a unit of work that tracks entities as NEW, DIRTY, CLEAN or
//!   DELETED, backs up every changed attribute, and writes all pending changes
//!   in one `commit()` or restores them with `rollback()`.
//! - **Transactions**: a batch of inserts, updates and deletes across any
//!   number of collections that is persisted as a log record before it takes
//!   effect, so a crash in the middle can be resumed by the recovery scanner.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mago::mago::Mago;
//! use mago::doc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Mago::builder().open()?;
//! let users = db.collection("users")?;
//!
//! let session = db.session()?;
//! let user = users.create(doc! { name: "Alice", balance: 10 })?;
//! session.add(&user)?;
//! session.commit()?;
//!
//! user.put("balance", 5)?;
//! session.commit_durable()?;
//!
//! session.close()?;
//! db.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Design Pattern
//!
//! Public handles (`Mago`, `Session`, `Transaction`, `Entity`, `EntityCollection`)
//! follow the PIMPL pattern: each is a thin wrapper over an `Arc` to its
//! private state, so clones are cheap and observe the same state.
//!
//! ## Module Organization
//!
//! - [`collection`] - Entities, documents, ids and per-collection persistence
//! - [`common`] - Attribute values, reserved field names and shared constants
//! - [`errors`] - Error types and result definitions
//! - [`filter`] - Query filters used by lookups and recovery
//! - [`mago`] - Database handle
//! - [`mago_builder`] - Database builder
//! - [`mago_config`] - Database configuration
//! - [`session`] - Unit of work
//! - [`store`] - Storage backend abstractions and the in-memory store
//! - [`transaction`] - Persisted transactions and the recovery scanner

use crate::collection::snowflake::SnowflakeIdGenerator;
use std::sync::LazyLock;

pub mod collection;
pub mod common;
pub mod errors;
pub mod filter;
pub mod mago;
pub mod mago_builder;
pub mod mago_config;
pub mod session;
pub mod store;
pub mod transaction;

pub(crate) static ID_GENERATOR: LazyLock<SnowflakeIdGenerator> = LazyLock::new(SnowflakeIdGenerator::new);
