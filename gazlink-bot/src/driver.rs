//! Reconciliation driver
//!
//! Builds the candidate list once, then processes candidates strictly one at
//! a time. Nothing inside the per-candidate loop can end the run except a
//! lost session; every other failure is logged and the loop moves on.
//!
//! An entity is added to the in-memory dedup universe before its write is
//! attempted, so no entity is written twice in one run even when several
//! local records lead to it. Links are persisted as soon as a write
//! succeeds, before the next candidate starts.

use crate::claims::{ClaimWriter, WriteResult};
use crate::config::{BotConfig, Credentials};
use crate::dataset::Dataset;
use crate::edited_set::{load_known_state, KnownState};
use crate::placetypes::{PlaceTypeAcceptanceIndex, TypeCheck};
use crate::resolver::{CandidateResolver, Resolution};
use crate::session::{Session, SessionManager};
use crate::store::LinkStore;
use crate::transport::Transport;
use crate::types::{
    CorrespondenceRecord, DedupUniverse, EntityId, ForeignId, ForeignSource, LinkRecord,
    NegativeCache,
};
use chrono::{DateTime, Utc};
use gazlink_common::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{error, info, info_span, warn, Instrument};

/// Per-invocation switches
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides the configured foreign source
    pub source: Option<ForeignSource>,
    /// Resolve and validate, but write and persist nothing
    pub dry_run: bool,
    /// Stop after this many candidates
    pub limit: Option<usize>,
}

/// What happened to one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Written(EntityId),
    /// Target claim already held this record's id; link recorded locally
    Discovered(EntityId),
    WouldWrite(EntityId),
    AlreadyEdited(EntityId),
    /// Target claim present with a different value
    ClaimExists(EntityId),
    NoMatch,
    TypeConflict(EntityId, Vec<EntityId>),
    UnmappedPlaceType(EntityId),
    PermissionDenied(EntityId),
    Failed(String),
}

/// Counters for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub candidates: usize,
    pub written: usize,
    pub discovered: usize,
    pub would_write: usize,
    pub already_edited: usize,
    pub claim_exists: usize,
    pub no_match: usize,
    pub type_conflict: usize,
    pub unmapped: usize,
    pub permission_denied: usize,
    pub failed: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunSummary {
    fn record(&mut self, outcome: &Outcome) {
        self.candidates += 1;
        match outcome {
            Outcome::Written(_) => self.written += 1,
            Outcome::Discovered(_) => self.discovered += 1,
            Outcome::WouldWrite(_) => self.would_write += 1,
            Outcome::AlreadyEdited(_) => self.already_edited += 1,
            Outcome::ClaimExists(_) => self.claim_exists += 1,
            Outcome::NoMatch => self.no_match += 1,
            Outcome::TypeConflict(..) => self.type_conflict += 1,
            Outcome::UnmappedPlaceType(_) => self.unmapped += 1,
            Outcome::PermissionDenied(_) => self.permission_denied += 1,
            Outcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Fold records by local id (last wins) and drop everything already settled
///
/// Dropped: foreign ids in the negative cache, local ids with a persisted
/// link, and direct ids already in the dedup universe. The result is sorted
/// by local id.
pub fn build_candidates<I>(records: I, known: &KnownState) -> Vec<CorrespondenceRecord>
where
    I: IntoIterator<Item = CorrespondenceRecord>,
{
    let folded: BTreeMap<i64, CorrespondenceRecord> = records
        .into_iter()
        .map(|record| (record.local_id, record))
        .collect();

    folded
        .into_values()
        .filter(|record| !known.negative.covers(&record.foreign_id))
        .filter(|record| !known.linked_local_ids.contains(&record.local_id))
        .filter(|record| match &record.foreign_id {
            ForeignId::Entity(id) => !known.universe.contains(id),
            ForeignId::Numeric(_) => true,
        })
        .collect()
}

/// Sequential candidate processor
pub struct Driver<'a> {
    resolver: &'a CandidateResolver<'a>,
    writer: &'a ClaimWriter<'a>,
    store: &'a LinkStore,
    session: &'a Session,
    acceptance: Option<&'a PlaceTypeAcceptanceIndex>,
    target_property: String,
    dry_run: bool,
    universe: DedupUniverse,
    negative: NegativeCache,
}

impl<'a> Driver<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        resolver: &'a CandidateResolver<'a>,
        writer: &'a ClaimWriter<'a>,
        store: &'a LinkStore,
        session: &'a Session,
        acceptance: Option<&'a PlaceTypeAcceptanceIndex>,
        target_property: impl Into<String>,
        dry_run: bool,
        known: KnownState,
    ) -> Self {
        Self {
            resolver,
            writer,
            store,
            session,
            acceptance,
            target_property: target_property.into(),
            dry_run,
            universe: known.universe,
            negative: known.negative,
        }
    }

    pub fn universe(&self) -> &DedupUniverse {
        &self.universe
    }

    pub fn negative(&self) -> &NegativeCache {
        &self.negative
    }

    /// Process candidates in order; only `Error::Auth` ends the loop early
    pub async fn run(
        &mut self,
        candidates: &[CorrespondenceRecord],
        limit: Option<usize>,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary {
            started_at: Some(Utc::now()),
            ..RunSummary::default()
        };
        let total = limit.map_or(candidates.len(), |n| n.min(candidates.len()));
        info!(total, dry_run = self.dry_run, "Starting reconciliation");

        for (index, record) in candidates.iter().take(total).enumerate() {
            let span = info_span!(
                "candidate",
                n = index + 1,
                local_id = record.local_id,
                foreign_id = %record.foreign_id
            );
            info!(parent: &span, "Processing candidate");

            let outcome = match self.process(record).instrument(span.clone()).await {
                Ok(outcome) => outcome,
                Err(Error::Auth(reason)) => {
                    error!(parent: &span, reason = %reason, "Session lost, aborting run");
                    return Err(Error::Auth(reason));
                }
                Err(e) => Outcome::Failed(e.to_string()),
            };

            log_outcome(&span, &outcome);
            summary.record(&outcome);
        }

        summary.finished_at = Some(Utc::now());
        info!(
            candidates = summary.candidates,
            written = summary.written,
            discovered = summary.discovered,
            already_edited = summary.already_edited,
            claim_exists = summary.claim_exists,
            no_match = summary.no_match,
            type_conflict = summary.type_conflict,
            permission_denied = summary.permission_denied,
            failed = summary.failed,
            "Reconciliation finished"
        );
        Ok(summary)
    }

    async fn process(&mut self, record: &CorrespondenceRecord) -> Result<Outcome> {
        // Another record with the same foreign id may have been cached earlier this run
        if self.negative.covers(&record.foreign_id) {
            return Ok(Outcome::NoMatch);
        }

        let entity = match self.resolver.resolve(record).await? {
            Resolution::Found(entity) => entity,
            Resolution::NoMatch => {
                self.remember_no_match(&record.foreign_id).await;
                return Ok(Outcome::NoMatch);
            }
        };

        if self.universe.contains(&entity) {
            return Ok(Outcome::AlreadyEdited(entity));
        }

        if let Some(index) = self.acceptance {
            match self.resolver.check_types(record, &entity, index).await? {
                TypeCheck::Accepted => {}
                TypeCheck::Conflict(conflicts) => return Ok(Outcome::TypeConflict(entity, conflicts)),
                TypeCheck::Unmapped => return Ok(Outcome::UnmappedPlaceType(entity)),
            }
        }

        let existing = self
            .writer
            .existing_claims(&entity, &self.target_property)
            .await?;
        if !existing.is_empty() {
            self.universe.insert(entity.clone());
            let local = record.local_id.to_string();
            if existing.values.iter().any(|v| *v == local) {
                self.remember_link(&entity, record.local_id).await;
                return Ok(Outcome::Discovered(entity));
            }
            warn!(entity = %entity, values = ?existing.values, "Target claim holds another value");
            return Ok(Outcome::ClaimExists(entity));
        }

        // Marked before the attempt: at most one write per entity per run
        self.universe.insert(entity.clone());

        if self.dry_run {
            return Ok(Outcome::WouldWrite(entity));
        }

        let value = record.local_id.to_string();
        let result = self
            .writer
            .create_claim(&entity, &self.target_property, &value, self.session)
            .await?;

        Ok(match result {
            WriteResult::Created { .. } => {
                self.remember_link(&entity, record.local_id).await;
                Outcome::Written(entity)
            }
            WriteResult::PermissionDenied(_) => Outcome::PermissionDenied(entity),
            WriteResult::Rejected(envelope) => Outcome::Failed(envelope.to_string()),
            WriteResult::Failed(reason) => Outcome::Failed(reason),
        })
    }

    async fn remember_no_match(&mut self, foreign_id: &ForeignId) {
        let ForeignId::Numeric(id) = foreign_id else {
            return;
        };
        self.negative.insert(*id);
        if self.dry_run {
            return;
        }
        if let Err(e) = self.store.insert_negative(*id).await {
            error!(foreign_id = id, error = %e, "Failed to persist negative cache entry");
        }
    }

    async fn remember_link(&mut self, entity: &EntityId, local_id: i64) {
        if self.dry_run {
            return;
        }
        let link = LinkRecord {
            entity: entity.clone(),
            local_id,
        };
        // Contribution history still covers this entity on the next run
        if let Err(e) = self.store.insert_link(&link).await {
            error!(entity = %entity, local_id, error = %e, "Failed to persist link");
        }
    }
}

fn log_outcome(span: &tracing::Span, outcome: &Outcome) {
    match outcome {
        Outcome::Written(entity) => info!(parent: span, entity = %entity, "Claim written"),
        Outcome::Discovered(entity) => {
            info!(parent: span, entity = %entity, "Existing claim matches, link recorded")
        }
        Outcome::WouldWrite(entity) => info!(parent: span, entity = %entity, "Dry run: would write claim"),
        Outcome::AlreadyEdited(entity) => info!(parent: span, entity = %entity, "Skipped: already edited"),
        Outcome::ClaimExists(entity) => info!(parent: span, entity = %entity, "Skipped: claim exists"),
        Outcome::NoMatch => info!(parent: span, "Skipped: no matching entity"),
        Outcome::TypeConflict(entity, conflicts) => warn!(
            parent: span,
            entity = %entity,
            conflicts = ?conflicts,
            "Skipped: conflicting type claims"
        ),
        Outcome::UnmappedPlaceType(entity) => {
            warn!(parent: span, entity = %entity, "Skipped: place type not in acceptance index")
        }
        Outcome::PermissionDenied(entity) => warn!(parent: span, entity = %entity, "Skipped: permission denied"),
        Outcome::Failed(reason) => warn!(parent: span, reason = %reason, "Skipped: failed"),
    }
}

/// Full reconciliation run
///
/// Startup (login, edited set, acceptance index, dataset query) must fully
/// succeed before any write is attempted; failures there are returned.
pub async fn reconcile(
    transport: &Transport,
    store: &LinkStore,
    dataset: &dyn Dataset,
    config: &BotConfig,
    credentials: &Credentials,
    options: &RunOptions,
) -> Result<RunSummary> {
    let source = options.source.unwrap_or(config.source);
    info!(source = %source, target = %config.target_property, "Reconciliation run begins");

    let sessions = SessionManager::new(transport, &config.api_url);
    let session = sessions
        .login(&credentials.username, &credentials.password)
        .await?;

    let known = load_known_state(transport, &config.api_url, &session, store).await?;

    let acceptance = if config.validates_place_types() {
        Some(PlaceTypeAcceptanceIndex::build(transport, &config.sparql_url, &config.placetypes).await?)
    } else {
        None
    };

    let records = dataset.correspondences(source).await?;
    let candidates = build_candidates(records, &known);
    info!(candidates = candidates.len(), "Candidate list built");

    let resolver = CandidateResolver::new(transport, &config.api_url, &config.target_property);
    let writer = ClaimWriter::new(
        transport,
        &sessions,
        &config.api_url,
        config.edit_summary.clone(),
    );
    let mut driver = Driver::new(
        &resolver,
        &writer,
        store,
        &session,
        acceptance.as_ref(),
        &config.target_property,
        options.dry_run,
        known,
    );

    driver.run(&candidates, options.limit).await
}
