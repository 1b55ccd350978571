//! gazlink-bot - gazetteer to knowledge-base reconciliation bot
//!
//! Reads correspondence records (local place id -> foreign id) from a
//! gazetteer distribution, resolves each to a remote knowledge-base entity,
//! and writes a back-reference claim onto that entity. Runs are idempotent:
//! the bot's contribution history, a local link table and a negative cache
//! keep repeated runs from re-editing or re-searching.

pub mod claims;
pub mod config;
pub mod dataset;
pub mod driver;
pub mod edited_set;
pub mod placetypes;
pub mod resolver;
pub mod session;
pub mod store;
pub mod transport;
pub mod types;

pub use config::{BotConfig, Credentials};
pub use dataset::{Dataset, SqliteDataset};
pub use driver::{build_candidates, reconcile, Driver, Outcome, RunOptions, RunSummary};
pub use store::LinkStore;
pub use transport::{HttpBackend, ReqwestBackend, RetryPolicy, Transport};
pub use types::{CorrespondenceRecord, EntityId, ForeignId, ForeignSource, LinkRecord};
