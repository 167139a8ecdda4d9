//! Document Store boundary for the metadata repository manager.
//!
//! The repository core treats its search engine as an external collaborator:
//! an inverted index of documents (one per metadata record) with named
//! fields, boolean term/phrase queries, field boosting, search-time
//! date-range filtering, term enumeration and a monotonically increasing
//! modification counter.
//!
//! This crate defines that boundary:
//!
//! - [`Document`]: the field/value model committed to the store
//! - [`Query`] / [`DateRange`]: the boolean query model and the search-time
//!   date filter
//! - [`DocumentIndex`]: the port trait the repository core is written
//!   against
//! - [`MemoryIndex`]: the reference in-memory engine
//!
//! Ranking and tokenization internals are deliberately simple; they are not
//! part of the repository manager's contract.

pub mod document;
pub mod error;
pub mod memory;
pub mod query;

pub use document::Document;
pub use error::{ErrorKind, IndexError, Result};
pub use memory::{DocumentIndex, MemoryIndex};
pub use query::{DateRange, Occur, Query};
