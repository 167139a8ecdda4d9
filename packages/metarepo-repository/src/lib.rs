//! Metadata repository manager core.
//!
//! Maintains a searchable, versioned collection of XML metadata records
//! organized into named sets backed by directories of files, and exposes
//! it through an OAI-PMH-shaped query surface and direct
//! put/delete/reindex operations.
//!
//! ## Architecture
//!
//! - [`RepositoryManager`]: the service object holding all shared state
//!   behind two locks: an exclusive reentrant update lock for record
//!   mutation and a configuration lock for set/directory edits
//! - [`SetConfigStore`] / [`SetInfo`]: persistent set configuration with
//!   lazily recomputed derived caches
//! - [`SetQueryMapper`] / [`SetDefinition`]: declarative OAI set rules
//!   compiled into document-store predicates
//! - record lifecycle (`put_record` / `delete_record` / `reindex_record`)
//!   with one-hop consistency repair across related records
//! - the OAI query engine composing discoverability, set, format and
//!   date-range predicates
//! - [`IndexingScheduler`]: the background reload-and-reindex timer
//!
//! The document store itself is an external collaborator; see the
//! `metarepo-index` crate for the boundary.

pub mod admin;
pub mod collections;
pub mod config_store;
pub mod convert;
pub mod error;
pub mod indexer;
pub mod manager;
pub mod mapper;
pub mod oai;
pub mod query_parser;
pub mod records;
pub mod rules;
pub mod scheduler;
pub mod set_info;
pub mod writers;

// Re-exports
pub use admin::{AdminSettings, Granularity};
pub use config_store::SetConfigStore;
pub use convert::ConversionRegistry;
pub use error::{
    OAIError, OAIErrorCode, PutCollectionError, PutCollectionErrorCode, RecordUpdateError,
    RepositoryError, Result,
};
pub use indexer::IndexingPassReport;
pub use manager::{fields, RepositoryConfig, RepositoryManager};
pub use mapper::SetQueryMapper;
pub use oai::{DeletedRecordPolicy, MetadataFormatListing, OaiSetListing};
pub use query_parser::parse_query;
pub use rules::{RuleClause, SetDefinition};
pub use scheduler::{IndexingObserver, IndexingScheduler, Schedule};
pub use set_info::{DirInfo, SetCounts, SetInfo};
pub use writers::{
    CollectionIndexingWriter, IndexingWriter, RecordFields, WriterRegistry, XmlIndexingWriter,
};
