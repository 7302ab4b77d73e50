//! Indexing orchestrator.
//!
//! The Indexer sequences parsing, extraction, graph updates, embedding sync
//! and persistence for one repository:
//! - at most one run per file path at a time; a change arriving during a run
//!   is folded into a single follow-up run
//! - bounded parallelism across different files
//! - full rebuilds exclude every per-file update
//! - queries read the last committed graph and never wait on indexing

use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Instant, SystemTime};

use anyhow::{Context, Result};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{Notify, RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::embeddings::{EmbeddingSync, SyncStats};
use crate::entity::{content_hash, FileExtraction};
use crate::error::IndexError;
use crate::extractor::EntityExtractor;
use crate::graph::{GraphError, GraphStats, NodeKind};
use crate::graph_builder::{GraphBuilder, UpdateSummary};
use crate::languages::{is_ignored_dir, Language};
use crate::query::{NodeSummary, QueryEngine};
use crate::storage::{FileRecord, IndexSnapshot, IndexStorage};
use crate::syntax::SyntaxParser;
use crate::vector_store::VectorFilter;

/// Largest `search_code` result set.
pub const MAX_SEARCH_LIMIT: usize = 50;

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub root_path: PathBuf,
    /// Repository name used as the first segment of every id
    pub repo_name: String,
    /// Where the snapshot lives; `None` disables persistence
    pub state_dir: Option<PathBuf>,
    /// Files parsed concurrently
    pub max_parallel: usize,
    /// Larger files are skipped
    pub max_file_size: u64,
    pub respect_gitignore: bool,
}

impl IndexerConfig {
    /// Defaults for `root`, named after its directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root_path: PathBuf = root.into();
        let repo_name = root_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "repo".to_string());
        Self {
            state_dir: Some(root_path.join(crate::storage::DEFAULT_STATE_DIR)),
            root_path,
            repo_name,
            max_parallel: 8,
            max_file_size: 1024 * 1024,
            respect_gitignore: true,
        }
    }

    pub fn with_repo_name(mut self, name: impl Into<String>) -> Self {
        self.repo_name = name.into();
        self
    }

    pub fn with_state_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.state_dir = dir;
        self
    }

    pub fn with_max_parallel(mut self, n: usize) -> Self {
        self.max_parallel = n.max(1);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexPhase {
    Idle,
    Indexing,
    Rebuilding,
    Error,
}

/// Counts from a scan or rebuild.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub files_unchanged: usize,
    pub files_removed: usize,
    pub files_unparsed: usize,
    pub duration_ms: u64,
    pub embeddings: SyncStats,
}

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FileOutcome {
    Indexed(UpdateSummary),
    Unchanged,
    Unparsed { reason: String },
    Removed,
    /// Not a supported source file
    Skipped,
    /// Folded into the run already in flight for this path
    Coalesced,
    /// A rebuild replaced the incremental update
    Rebuilt,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingStatus {
    pub backend: String,
    pub synced_entities: usize,
    pub totals: SyncStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub repo: String,
    pub root: PathBuf,
    pub phase: IndexPhase,
    pub generation: u64,
    pub files_indexed: usize,
    pub files_unparsed: usize,
    pub unparsed: BTreeMap<String, String>,
    pub pending_tasks: usize,
    pub graph: GraphStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embeddings: Option<EmbeddingStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_indexed_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// One semantic search hit, hydrated from the graph.
#[derive(Debug, Clone, Serialize)]
pub struct CodeHit {
    pub score: f32,
    #[serde(flatten)]
    pub node: NodeSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
}

#[derive(Debug, Default)]
struct StatusState {
    phase: Option<IndexPhase>,
    last_error: Option<String>,
    last_indexed_at: Option<u64>,
}

struct Inner {
    config: IndexerConfig,
    builder: GraphBuilder,
    parser: SyntaxParser,
    storage: Option<IndexStorage>,
    embeddings: Option<EmbeddingSync>,
    /// Read for per-file updates, write for rebuilds
    gate: RwLock<()>,
    permits: Semaphore,
    /// Paths with a run in flight, and whether another run was requested
    in_flight: Mutex<HashMap<String, bool>>,
    /// Fingerprint and parse state of every source file seen
    records: Mutex<BTreeMap<String, FileRecord>>,
    pending: AtomicUsize,
    idle: Notify,
    status: Mutex<StatusState>,
}

/// Cheap to clone; clones share one index.
#[derive(Clone)]
pub struct Indexer {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl Indexer {
    pub fn new(mut config: IndexerConfig, embeddings: Option<EmbeddingSync>) -> Self {
        if let Ok(canonical) = config.root_path.canonicalize() {
            config.root_path = canonical;
        }
        let storage = config.state_dir.as_ref().map(IndexStorage::new);
        let permits = Semaphore::new(config.max_parallel.max(1));
        Self {
            inner: Arc::new(Inner {
                builder: GraphBuilder::new(config.repo_name.clone()),
                parser: SyntaxParser::new(),
                storage,
                embeddings,
                gate: RwLock::new(()),
                permits,
                in_flight: Mutex::new(HashMap::new()),
                records: Mutex::new(BTreeMap::new()),
                pending: AtomicUsize::new(0),
                idle: Notify::new(),
                status: Mutex::new(StatusState::default()),
                config,
            }),
        }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.inner.config
    }

    pub fn root(&self) -> &Path {
        &self.inner.config.root_path
    }

    pub fn repo(&self) -> &str {
        &self.inner.config.repo_name
    }

    pub fn builder(&self) -> &GraphBuilder {
        &self.inner.builder
    }

    /// Queries against the last committed graph.
    pub fn query(&self) -> QueryEngine {
        QueryEngine::new(self.inner.builder.graph())
    }

    /// Resume from the snapshot when there is one, then catch up with the
    /// files on disk. Without a snapshot this is a full rebuild.
    pub async fn start(&self) -> Result<IndexStats> {
        if let Some(storage) = &self.inner.storage {
            if let Some(snapshot) = storage.load(self.root())? {
                let records = snapshot.files.clone();
                match self.inner.builder.restore(snapshot.builder) {
                    Ok(()) => {
                        *lock(&self.inner.records) = records;
                        info!(
                            repo = %self.repo(),
                            generation = self.inner.builder.generation(),
                            "Restored index from snapshot"
                        );
                        return self.reindex(false).await;
                    }
                    Err(e) => warn!(error = %e, "Snapshot is inconsistent, rebuilding"),
                }
            }
        }
        self.rebuild().await
    }

    /// `force` rebuilds everything; otherwise only changed files are
    /// re-indexed and vanished files removed.
    pub async fn reindex(&self, force: bool) -> Result<IndexStats> {
        if force {
            return self.rebuild().await;
        }
        let start = Instant::now();
        let on_disk = self.scan().await?;
        let known = lock(&self.inner.records).clone();

        let mut stats = IndexStats {
            files_scanned: on_disk.len(),
            ..IndexStats::default()
        };
        let mut changed = Vec::new();
        for (path, fingerprint) in &on_disk {
            match known.get(path) {
                Some(record) if record.fingerprint == *fingerprint => stats.files_unchanged += 1,
                _ => changed.push(path.clone()),
            }
        }
        changed.extend(known.keys().filter(|p| !on_disk.contains_key(*p)).cloned());
        info!(
            repo = %self.repo(),
            scanned = stats.files_scanned,
            changed = changed.len(),
            "Incremental reindex"
        );

        let mut tasks = JoinSet::new();
        for path in changed {
            let indexer = self.clone();
            tasks.spawn(async move { indexer.index_file(Path::new(&path)).await });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined.context("Index task panicked")? {
                Ok(FileOutcome::Indexed(_)) => stats.files_indexed += 1,
                Ok(FileOutcome::Removed) => stats.files_removed += 1,
                Ok(FileOutcome::Unparsed { .. }) => stats.files_unparsed += 1,
                Ok(FileOutcome::Unchanged) => stats.files_unchanged += 1,
                Ok(_) => {}
                Err(e) => warn!(error = %e, "File update failed"),
            }
        }

        stats.embeddings = self.sync_embeddings().await;
        self.persist();
        stats.duration_ms = start.elapsed().as_millis() as u64;
        Ok(stats)
    }

    /// Exclusive full rebuild from the files on disk.
    pub async fn rebuild(&self) -> Result<IndexStats> {
        let start = Instant::now();
        let _exclusive = self.inner.gate.write().await;
        self.set_phase(Some(IndexPhase::Rebuilding));
        info!(repo = %self.repo(), root = %self.root().display(), "Rebuilding index");

        let result = self.rebuild_locked().await;
        match &result {
            Ok(_) => self.record_success(),
            Err(e) => self.record_error(format!("rebuild failed: {:#}", e)),
        }
        self.set_phase(None);
        drop(_exclusive);

        let mut stats = result?;
        if let Some(sync) = &self.inner.embeddings {
            sync.reset().await;
        }
        stats.embeddings = self.sync_embeddings().await;
        self.persist();
        stats.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            files = stats.files_indexed,
            unparsed = stats.files_unparsed,
            duration_ms = stats.duration_ms,
            "Rebuild complete"
        );
        Ok(stats)
    }

    async fn rebuild_locked(&self) -> Result<IndexStats> {
        let files = self.scan().await?;
        let mut stats = IndexStats {
            files_scanned: files.len(),
            ..IndexStats::default()
        };

        let mut tasks = JoinSet::new();
        for path in files.into_keys() {
            let indexer = self.clone();
            tasks.spawn(async move {
                let _permit = indexer.inner.permits.acquire().await;
                let result = indexer.parse_file(&path).await;
                (path, result)
            });
        }

        let mut extractions = Vec::new();
        let mut unparsed = BTreeMap::new();
        let mut records = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            let (path, result) = joined.context("Parse task panicked")?;
            match result {
                Ok(Parsed::Extracted(extraction)) => {
                    records.insert(
                        path,
                        FileRecord {
                            fingerprint: extraction.fingerprint.clone(),
                            unparsed: None,
                        },
                    );
                    extractions.push(extraction);
                }
                Ok(Parsed::Failed { fingerprint, reason }) => {
                    debug!(file = %path, %reason, "File does not parse");
                    records.insert(
                        path.clone(),
                        FileRecord {
                            fingerprint,
                            unparsed: Some(reason.clone()),
                        },
                    );
                    unparsed.insert(path, reason);
                }
                Ok(Parsed::Missing) | Ok(Parsed::Unsupported) => {}
                Err(e) => warn!(file = %path, error = %e, "Failed to read file"),
            }
        }

        stats.files_indexed = extractions.len();
        stats.files_unparsed = unparsed.len();
        self.inner.builder.rebuild(extractions, unparsed)?;
        *lock(&self.inner.records) = records;
        Ok(stats)
    }

    /// Re-index one file, coalescing with a run already in flight for it.
    /// Deleted files are removed.
    pub async fn index_file(&self, path: &Path) -> Result<FileOutcome> {
        let rel = self.relative(path)?;
        {
            let mut in_flight = lock(&self.inner.in_flight);
            if let Some(rerun) = in_flight.get_mut(&rel) {
                *rerun = true;
                debug!(file = %rel, "Coalesced with in-flight run");
                return Ok(FileOutcome::Coalesced);
            }
            in_flight.insert(rel.clone(), false);
        }
        if self.inner.pending.fetch_add(1, Ordering::SeqCst) == 0 {
            self.set_phase(Some(IndexPhase::Indexing));
        }

        let mut previous: Option<FileOutcome> = None;
        let outcome = loop {
            let outcome = match (self.run_file(&rel).await, previous.take()) {
                // a rerun that found nothing new keeps the earlier result
                (Ok(FileOutcome::Unchanged), Some(earlier)) => Ok(earlier),
                (outcome, _) => outcome,
            };
            let again = {
                let mut in_flight = lock(&self.inner.in_flight);
                match in_flight.get_mut(&rel) {
                    Some(rerun) if *rerun => {
                        *rerun = false;
                        true
                    }
                    _ => {
                        in_flight.remove(&rel);
                        false
                    }
                }
            };
            if !again {
                break outcome;
            }
            previous = outcome.as_ref().ok().cloned();
            debug!(file = %rel, "Running again for a change made during the last run");
        };

        match &outcome {
            Ok(_) => self.record_success(),
            Err(e) => self.record_error(format!("{}: {:#}", rel, e)),
        }
        if self.inner.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.set_phase(None);
            self.inner.idle.notify_waiters();
        }
        outcome
    }

    async fn run_file(&self, rel: &str) -> Result<FileOutcome> {
        let result = {
            let _permit = self.inner.permits.acquire().await;
            let _shared = self.inner.gate.read().await;
            self.update_locked(rel).await
        };
        match result {
            Err(e) if matches!(e.downcast_ref::<GraphError>(), Some(GraphError::Inconsistency(_))) => {
                error!(file = %rel, error = %e, "Graph inconsistency, rebuilding");
                self.rebuild().await?;
                Ok(FileOutcome::Rebuilt)
            }
            other => {
                if matches!(other, Ok(FileOutcome::Indexed(_) | FileOutcome::Removed | FileOutcome::Unparsed { .. })) {
                    self.sync_embeddings().await;
                    if self.inner.pending.load(Ordering::SeqCst) <= 1 {
                        self.persist();
                    }
                }
                other
            }
        }
    }

    async fn update_locked(&self, rel: &str) -> Result<FileOutcome> {
        let builder = &self.inner.builder;
        let parsed = self.parse_file(rel).await?;
        let previous = lock(&self.inner.records).get(rel).cloned();

        let outcome = match parsed {
            Parsed::Missing | Parsed::Unsupported => {
                if previous.is_none() {
                    return Ok(FileOutcome::Skipped);
                }
                builder.remove_file(rel)?;
                lock(&self.inner.records).remove(rel);
                FileOutcome::Removed
            }
            Parsed::Extracted(extraction) => {
                let unchanged = previous
                    .as_ref()
                    .is_some_and(|r| r.unparsed.is_none() && r.fingerprint == extraction.fingerprint);
                if unchanged && builder.extraction(rel).is_some() {
                    return Ok(FileOutcome::Unchanged);
                }
                let record = FileRecord {
                    fingerprint: extraction.fingerprint.clone(),
                    unparsed: None,
                };
                let summary = builder.update_file(extraction)?;
                lock(&self.inner.records).insert(rel.to_string(), record);
                FileOutcome::Indexed(summary)
            }
            Parsed::Failed { fingerprint, reason } => {
                warn!(file = %rel, %reason, "File does not parse, excluded from graph");
                builder.mark_unparsed(rel, reason.clone())?;
                lock(&self.inner.records).insert(
                    rel.to_string(),
                    FileRecord {
                        fingerprint,
                        unparsed: Some(reason.clone()),
                    },
                );
                FileOutcome::Unparsed { reason }
            }
        };
        debug!(file = %rel, outcome = ?outcome, "File processed");
        Ok(outcome)
    }

    /// Read, parse and extract one file off the async threads.
    async fn parse_file(&self, rel: &str) -> Result<Parsed> {
        let Some(language) = Language::from_path(Path::new(rel)) else {
            return Ok(Parsed::Unsupported);
        };
        let full = self.root().join(rel);
        let metadata = match tokio::fs::metadata(&full).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Ok(Parsed::Missing),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Parsed::Missing),
            Err(e) => return Err(e).with_context(|| format!("Failed to stat {:?}", full)),
        };
        if metadata.len() > self.inner.config.max_file_size {
            debug!(file = %rel, size = metadata.len(), "Skipping large file");
            return Ok(Parsed::Unsupported);
        }
        let bytes = match tokio::fs::read(&full).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Parsed::Missing),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {:?}", full)),
        };
        let source = match String::from_utf8(bytes) {
            Ok(source) => source,
            Err(e) => {
                return Ok(Parsed::Failed {
                    fingerprint: hex::encode(Sha256::digest(e.as_bytes())),
                    reason: "not valid UTF-8".to_string(),
                });
            }
        };

        let parser = self.inner.parser;
        let extractor = EntityExtractor::new(self.repo());
        let path = rel.to_string();
        let parsed = tokio::task::spawn_blocking(move || {
            let fingerprint = content_hash(&source);
            match parser.parse(source, language) {
                Ok(tree) => Parsed::Extracted(extractor.extract(&tree, &path)),
                Err(e) => Parsed::Failed {
                    fingerprint,
                    reason: e.to_string(),
                },
            }
        })
        .await
        .context("Parse task panicked")?;
        Ok(parsed)
    }

    /// Source files under the root with their fingerprints.
    async fn scan(&self) -> Result<BTreeMap<String, String>> {
        let root = self.root().to_path_buf();
        let gitignore = self.inner.config.respect_gitignore;
        let max_size = self.inner.config.max_file_size;
        tokio::task::spawn_blocking(move || scan_files(&root, gitignore, max_size))
            .await
            .context("Scan task panicked")?
    }

    /// Repo-relative, `/`-separated form of `path`.
    pub fn relative(&self, path: &Path) -> Result<String, IndexError> {
        let root = self.root();
        let rel = if path.is_absolute() {
            match path.strip_prefix(root) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => canonical_lenient(path)
                    .and_then(|p| p.strip_prefix(root).ok().map(Path::to_path_buf))
                    .ok_or_else(|| IndexError::OutsideRepo(path.to_path_buf()))?,
            }
        } else {
            path.to_path_buf()
        };
        let mut parts = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
                Component::CurDir => {}
                _ => return Err(IndexError::OutsideRepo(path.to_path_buf())),
            }
        }
        if parts.is_empty() {
            return Err(IndexError::OutsideRepo(path.to_path_buf()));
        }
        Ok(parts.join("/"))
    }

    /// Wait until no per-file run is pending.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    async fn sync_embeddings(&self) -> SyncStats {
        let Some(sync) = &self.inner.embeddings else {
            return SyncStats::default();
        };
        match sync.sync(&self.inner.builder.graph()).await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "Embedding sync failed");
                SyncStats::default()
            }
        }
    }

    /// Write the snapshot; failures are logged, the index keeps running.
    pub fn persist(&self) {
        let Some(storage) = &self.inner.storage else {
            return;
        };
        let records = lock(&self.inner.records).clone();
        let snapshot = IndexSnapshot::new(self.root(), self.repo(), records, self.inner.builder.export());
        if let Err(e) = storage.save(&snapshot) {
            warn!(error = %e, "Failed to persist index snapshot");
        }
    }

    /// Natural-language search over embedded entities.
    pub async fn search_code(
        &self,
        query: &str,
        limit: usize,
        kind: Option<NodeKind>,
        file_path_prefix: Option<String>,
    ) -> Result<Vec<CodeHit>> {
        let sync = self.inner.embeddings.as_ref().ok_or(IndexError::SearchUnavailable)?;
        let mut filter = VectorFilter::new();
        if let Some(kind) = kind {
            filter = filter.with_kind(kind.label());
        }
        if let Some(prefix) = file_path_prefix {
            filter = filter.with_path_prefix(prefix);
        }
        let limit = limit.clamp(1, MAX_SEARCH_LIMIT);
        let hits = sync.search(query, limit, &filter).await?;

        let graph = self.inner.builder.graph();
        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                let node = graph.node(&hit.entity_id)?;
                Some(CodeHit {
                    score: hit.score,
                    node: node.into(),
                    docstring: node.entity.as_ref().and_then(|e| e.docstring.clone()),
                })
            })
            .collect())
    }

    pub async fn status(&self) -> IndexStatus {
        let builder = &self.inner.builder;
        let unparsed = builder.unparsed();
        let embeddings = match &self.inner.embeddings {
            Some(sync) => Some(EmbeddingStatus {
                backend: sync.store().backend().to_string(),
                synced_entities: sync.synced_count().await,
                totals: sync.totals().await,
            }),
            None => None,
        };
        let state = lock(&self.inner.status);
        let phase = match state.phase {
            Some(phase) => phase,
            None if state.last_error.is_some() => IndexPhase::Error,
            None => IndexPhase::Idle,
        };
        IndexStatus {
            repo: self.repo().to_string(),
            root: self.root().to_path_buf(),
            phase,
            generation: builder.generation(),
            files_indexed: builder.parsed_files().len(),
            files_unparsed: unparsed.len(),
            unparsed,
            pending_tasks: self.inner.pending.load(Ordering::SeqCst),
            graph: builder.graph().stats(),
            embeddings,
            last_indexed_at: state.last_indexed_at,
            last_error: state.last_error.clone(),
        }
    }

    fn set_phase(&self, phase: Option<IndexPhase>) {
        let mut state = lock(&self.inner.status);
        state.phase = match phase {
            // a rebuild outranks per-file work
            Some(IndexPhase::Indexing) if state.phase == Some(IndexPhase::Rebuilding) => state.phase,
            other => other,
        };
    }

    fn record_success(&self) {
        let mut state = lock(&self.inner.status);
        state.last_error = None;
        state.last_indexed_at = Some(now());
    }

    fn record_error(&self, message: String) {
        error!(error = %message, "Indexing failed");
        lock(&self.inner.status).last_error = Some(message);
    }
}

enum Parsed {
    Extracted(FileExtraction),
    Failed { fingerprint: String, reason: String },
    Missing,
    Unsupported,
}

/// Canonical form of a path whose last component may no longer exist.
fn canonical_lenient(path: &Path) -> Option<PathBuf> {
    if let Ok(p) = path.canonicalize() {
        return Some(p);
    }
    let parent = path.parent()?.canonicalize().ok()?;
    Some(parent.join(path.file_name()?))
}

fn scan_files(root: &Path, gitignore: bool, max_size: u64) -> Result<BTreeMap<String, String>> {
    let mut files = BTreeMap::new();
    let walker = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(gitignore)
        .git_global(gitignore)
        .git_exclude(gitignore)
        .filter_entry(|entry| {
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            !(is_dir && entry.depth() > 0 && is_ignored_dir(&entry.file_name().to_string_lossy()))
        })
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_some_and(|t| t.is_file()) || Language::from_path(path).is_none() {
            continue;
        }
        if entry.metadata().map(|m| m.len() > max_size).unwrap_or(true) {
            continue;
        }
        let Ok(rel) = path.strip_prefix(root) else { continue };
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join("/");
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
        let fingerprint = match std::str::from_utf8(&bytes) {
            Ok(text) => content_hash(text),
            Err(_) => hex::encode(Sha256::digest(&bytes)),
        };
        files.insert(rel, fingerprint);
    }
    Ok(files)
}
