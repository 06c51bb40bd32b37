//! Capture index server: URL canonicalization, ordered capture/alias index,
//! query planning and execution, access control, change-feed replication,
//! and a multi-collection data store.
//!
//! This crate is the top-level facade (§6.1): it wires `cdxd-core`,
//! `cdxd-storage`, `cdxd-access`, and `cdxd-query` into one `Server` value
//! whose methods correspond to the external operations a deployment exposes.
//! HTTP framing is out of scope here; each method takes and returns plain
//! Rust values.

#![warn(missing_docs)]

pub mod config;

use std::collections::HashMap;

use tracing::instrument;
use tracing_subscriber::EnvFilter;

pub use cdxd_access::{AccessControl, AccessPolicy, AccessRule, Decision};
pub use cdxd_core::surt::{canonicalize, CanonicalizeConfig};
pub use cdxd_core::{Alias, Capture, Error, Limits, Result, SequenceNumber, TimeWindow, Timestamp};
pub use cdxd_query::{bulk_delete, bulk_ingest, parse_query, BadLinesMode, IngestOutcome, QueryParams, QueryResult};
pub use cdxd_storage::{ChangeCursor, DataStore, DurabilityMode, Index};

pub use config::{Config, ConfigError, ConfigOverrides, LogFormat};

/// Install a `tracing` subscriber from `config.log_level`/`config.log_format`
/// (§4.10). Call once at process start; a second call is a programming
/// error in the embedding binary, not something this crate guards against.
pub fn init_observability(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format {
        LogFormat::Pretty => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}

/// Top-level server: a `DataStore` plus the canonicalization config every
/// collection under it shares. Each method resolves a named collection
/// on demand (§6.1's route table, minus HTTP framing).
pub struct Server {
    data_store: DataStore,
    canonicalize_config: CanonicalizeConfig,
    limits: Limits,
}

impl Server {
    /// Open a server rooted at `config.data_dir`.
    pub fn open(config: &Config) -> Result<Self> {
        let data_store = DataStore::open(&config.data_dir, config.limits.clone(), config.durability_mode)?;
        Ok(Server {
            data_store,
            canonicalize_config: CanonicalizeConfig::default(),
            limits: config.limits.clone(),
        })
    }

    /// List known collection names.
    pub fn list_collections(&self) -> Result<Vec<String>> {
        self.data_store.list_collections()
    }

    /// Run a query (`GET /<collection>`) against `collection`, at access
    /// time `now`.
    #[instrument(skip(self, params))]
    pub fn query(&self, collection: &str, params: &QueryParams, now: Timestamp) -> Result<QueryResult> {
        let index = self.data_store.get_index(collection, false)?;
        let access = AccessControl::new(&index);
        cdxd_query::execute(&index, Some(&access), params, &self.canonicalize_config, &self.limits, now)
    }

    /// Bulk-ingest a CDX payload (`POST /<collection>`), creating the
    /// collection if it does not already exist.
    #[instrument(skip(self, body))]
    pub fn ingest(&self, collection: &str, body: &str, bad_lines: BadLinesMode, recanonicalize: bool) -> Result<IngestOutcome> {
        let index = self.data_store.get_index(collection, true)?;
        bulk_ingest(body, &index, bad_lines, recanonicalize, &self.canonicalize_config)
    }

    /// Bulk-delete the captures and aliases named by a CDX-formatted payload
    /// (`POST /<collection>/delete`).
    #[instrument(skip(self, body))]
    pub fn delete(&self, collection: &str, body: &str, recanonicalize: bool) -> Result<IngestOutcome> {
        let index = self.data_store.get_index(collection, false)?;
        bulk_delete(body, &index, recanonicalize, &self.canonicalize_config)
    }

    /// Read a page of the change feed (`GET /<collection>/changes`).
    pub fn change_feed(&self, collection: &str, after: SequenceNumber) -> Result<ChangeCursor> {
        let index = self.data_store.get_index(collection, false)?;
        cdxd_storage::get_updates_since(&index, after, self.limits.change_feed_size)
    }

    /// Apply one change-feed entry from a primary (`POST /<collection>/changes`).
    pub fn apply_change(&self, collection: &str, entry: &cdxd_storage::ChangeFeedEntry) -> Result<()> {
        let index = self.data_store.get_index(collection, true)?;
        cdxd_storage::apply_entry(&index, entry)
    }

    /// Store a rule (`POST /<collection>/access/rules`), attributed to
    /// `user` and stamped with `now`. Returns the rule's server-assigned id.
    pub fn put_access_rule(&self, collection: &str, rule: AccessRule, user: &str, now: Timestamp) -> Result<u64> {
        let index = self.data_store.get_index(collection, false)?;
        AccessControl::new(&index).put_rule(rule, user, now)
    }

    /// Remove a rule (`DELETE /<collection>/access/rules/<id>`). Returns
    /// `true` if a rule with that id existed.
    pub fn delete_access_rule(&self, collection: &str, id: u64) -> Result<bool> {
        let index = self.data_store.get_index(collection, false)?;
        AccessControl::new(&index).delete_rule(id)
    }

    /// Store a policy (`POST /<collection>/access/policies`). Returns the
    /// policy's server-assigned id.
    pub fn put_access_policy(&self, collection: &str, policy: AccessPolicy) -> Result<u64> {
        let index = self.data_store.get_index(collection, false)?;
        AccessControl::new(&index).put_policy(policy)
    }

    /// List rules (`GET /<collection>/access/rules`).
    pub fn list_access_rules(&self, collection: &str) -> Result<Vec<AccessRule>> {
        let index = self.data_store.get_index(collection, false)?;
        AccessControl::new(&index).list_rules()
    }

    /// Data root this server is serving out of.
    pub fn data_root(&self) -> &std::path::Path {
        self.data_store.data_root()
    }
}

/// Convenience wrapper around [`Config::resolve`] reading `CDXD_*` variables
/// straight from the process environment, for binaries that embed this
/// crate without their own environment-snapshotting logic.
pub fn resolve_config_from_process_env(
    file_path: Option<&std::path::Path>,
    overrides: ConfigOverrides,
) -> std::result::Result<Config, ConfigError> {
    let env: HashMap<String, String> = std::env::vars().collect();
    Config::resolve(file_path, &env, overrides)
}
