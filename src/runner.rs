//! Concurrent processing of a set of LCOV reports.
//!
//! Each [`BatchRunner::run`] is one run pass: every report is read and
//! parsed in its own task, each section is resolved and summarized, and a
//! [`CoverageEntry`] is sent to the sink as soon as it is ready. Sections
//! are kept in a [`SectionStore`] so that details can be expanded later via
//! [`BatchRunner::details`]. Starting a new pass cancels the previous one
//! and clears the store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregate::{expand_details, needs_demangler, summarize};
use crate::demangle::{DemanglerCache, DemanglerLoader};
use crate::error::{CovlensError, Result};
use crate::model::{CoverageSummary, DetailRecord, Section};
use crate::parsers::lcov::LcovParser;
use crate::parsers::Parser;
use crate::resolve::{resolve, FileIdentity};

/// Handle to a published summary, valid until the next run pass starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SummaryKey {
    generation: u64,
    seq: u64,
}

/// One resolved source file, as published by a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageEntry {
    pub key: SummaryKey,
    pub file: FileIdentity,
    pub summary: CoverageSummary,
}

struct StoredSection {
    file: FileIdentity,
    section: Arc<Section>,
}

/// Side-table from published summaries to the sections backing them.
///
/// Entries belong to exactly one generation; a reset drops them all.
#[derive(Default)]
pub struct SectionStore {
    generation: u64,
    next_seq: u64,
    entries: HashMap<SummaryKey, StoredSection>,
}

impl SectionStore {
    /// Start a new generation, discarding every entry. Returns the new
    /// generation number.
    pub fn reset(&mut self) -> u64 {
        self.generation += 1;
        self.next_seq = 0;
        self.entries.clear();
        self.generation
    }

    /// Insert a section for `generation`. Returns `None` when that
    /// generation has already been superseded.
    pub fn insert(
        &mut self,
        generation: u64,
        file: FileIdentity,
        section: Arc<Section>,
    ) -> Option<SummaryKey> {
        if generation != self.generation {
            return None;
        }
        let key = SummaryKey {
            generation,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.insert(key, StoredSection { file, section });
        Some(key)
    }

    pub fn section(&self, key: SummaryKey) -> Option<Arc<Section>> {
        self.entries.get(&key).map(|e| Arc::clone(&e.section))
    }

    pub fn file(&self, key: SummaryKey) -> Option<FileIdentity> {
        self.entries.get(&key).map(|e| e.file.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A report that could not be read or parsed.
#[derive(Debug)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: CovlensError,
}

/// Outcome of one run pass.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub files: usize,
    pub published: usize,
    pub failures: Vec<FileFailure>,
    pub cancelled: bool,
}

/// How far a single report got.
struct Progress {
    published: usize,
    cancelled: bool,
}

impl Progress {
    fn cancelled(published: usize) -> Result<Self> {
        Ok(Self {
            published,
            cancelled: true,
        })
    }
}

struct Inner {
    roots: Vec<PathBuf>,
    parser: Arc<dyn Parser>,
    demangler: DemanglerCache,
    store: RwLock<SectionStore>,
    active: Mutex<CancellationToken>,
}

impl Inner {
    fn store_section(
        &self,
        generation: u64,
        file: FileIdentity,
        section: Arc<Section>,
    ) -> Option<SummaryKey> {
        self.store
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(generation, file, section)
    }

    fn lookup(&self, key: SummaryKey) -> Option<Arc<Section>> {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .section(key)
    }
}

/// Drives run passes over LCOV reports. Cheap to clone; clones share the
/// store, the demangler cache and the active run.
#[derive(Clone)]
pub struct BatchRunner {
    inner: Arc<Inner>,
}

impl BatchRunner {
    /// A runner resolving paths against `roots`, using the LCOV parser and
    /// the built-in demangler.
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self::with_components(roots, Arc::new(LcovParser), DemanglerCache::default())
    }

    /// A runner with a custom demangler loader.
    pub fn with_loader(roots: Vec<PathBuf>, loader: Arc<dyn DemanglerLoader>) -> Self {
        Self::with_components(roots, Arc::new(LcovParser), DemanglerCache::new(loader))
    }

    pub fn with_components(
        roots: Vec<PathBuf>,
        parser: Arc<dyn Parser>,
        demangler: DemanglerCache,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                roots,
                parser,
                demangler,
                store: RwLock::new(SectionStore::default()),
                active: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// Run one pass over `files`, sending each entry to `sink` as soon as
    /// it is ready. Supersedes any pass still in flight.
    ///
    /// Per-report failures are logged and collected in the returned
    /// report; they never stop the other reports.
    pub async fn run<I, P>(&self, files: I, sink: UnboundedSender<CoverageEntry>) -> BatchReport
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let (token, generation) = self.begin();
        let mut report = BatchReport::default();
        let mut tasks = JoinSet::new();
        let mut paths = HashMap::new();

        for path in files {
            let path = path.as_ref().to_path_buf();
            report.files += 1;
            let inner = Arc::clone(&self.inner);
            let token = token.clone();
            let sink = sink.clone();
            let task_path = path.clone();
            let handle = tasks.spawn(async move {
                let result = process_file(&inner, &task_path, generation, &token, &sink).await;
                (task_path, result)
            });
            paths.insert(handle.id(), path);
        }
        drop(sink);

        drain(tasks, paths, &mut report).await;

        report.cancelled |= token.is_cancelled();
        info!(
            files = report.files,
            published = report.published,
            failed = report.failures.len(),
            cancelled = report.cancelled,
            "coverage run finished"
        );
        report
    }

    /// Cancel the pass currently in flight, if any. Entries it already
    /// published stay valid until the next pass starts.
    pub fn cancel(&self) {
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    /// Expand the details behind a published summary.
    ///
    /// Returns `Ok(None)` when the key belongs to a previous pass. Fails
    /// only when the demangler is needed and cannot be loaded.
    pub async fn details(&self, key: SummaryKey) -> Result<Option<Vec<DetailRecord>>> {
        let Some(section) = self.inner.lookup(key) else {
            return Ok(None);
        };
        let demangler = if needs_demangler(&section) {
            debug!(
                path = %section.path,
                loaded = self.inner.demangler.is_loaded(),
                "section needs the demangler"
            );
            Some(self.inner.demangler.get().await?)
        } else {
            None
        };
        Ok(Some(expand_details(&section, demangler.as_deref())))
    }

    /// The file identity recorded for a published summary.
    pub fn file(&self, key: SummaryKey) -> Option<FileIdentity> {
        self.inner
            .store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .file(key)
    }

    /// Number of sections held for the current pass.
    pub fn stored(&self) -> usize {
        self.inner
            .store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn begin(&self) -> (CancellationToken, u64) {
        let token = CancellationToken::new();
        let mut active = self
            .inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        active.cancel();
        *active = token.clone();
        let generation = self
            .inner
            .store
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
        debug!(generation, "starting coverage run");
        (token, generation)
    }
}

/// Wait for every report task and fold its outcome into `report`. A task
/// that panicked or was aborted counts as a failure of its report.
async fn drain(
    mut tasks: JoinSet<(PathBuf, Result<Progress>)>,
    mut paths: HashMap<task::Id, PathBuf>,
    report: &mut BatchReport,
) {
    while let Some(joined) = tasks.join_next_with_id().await {
        match joined {
            Ok((id, (_, Ok(progress)))) => {
                paths.remove(&id);
                report.published += progress.published;
                report.cancelled |= progress.cancelled;
            }
            Ok((id, (path, Err(error)))) => {
                paths.remove(&id);
                warn!(path = %path.display(), %error, "skipping coverage report");
                report.failures.push(FileFailure { path, error });
            }
            Err(e) => {
                let Some(path) = paths.remove(&e.id()) else {
                    error!(error = %e, "unknown report task aborted");
                    continue;
                };
                error!(path = %path.display(), error = %e, "report task aborted");
                report.failures.push(FileFailure {
                    path,
                    error: CovlensError::Join(e),
                });
            }
        }
    }
}

async fn process_file(
    inner: &Inner,
    path: &Path,
    generation: u64,
    token: &CancellationToken,
    sink: &UnboundedSender<CoverageEntry>,
) -> Result<Progress> {
    if token.is_cancelled() {
        return Progress::cancelled(0);
    }
    let bytes = tokio::select! {
        _ = token.cancelled() => return Progress::cancelled(0),
        read = tokio::fs::read(path) => read?,
    };
    if token.is_cancelled() {
        return Progress::cancelled(0);
    }

    let parser = Arc::clone(&inner.parser);
    let sections = tokio::task::spawn_blocking(move || parser.parse(&bytes)).await??;
    debug!(path = %path.display(), sections = sections.len(), "parsed coverage report");
    if token.is_cancelled() {
        return Progress::cancelled(0);
    }

    let mut published = 0;
    for section in sections {
        if token.is_cancelled() {
            return Progress::cancelled(published);
        }
        let file = resolve(&section.path, &inner.roots);
        let summary = summarize(&section);
        let Some(key) = inner.store_section(generation, file.clone(), Arc::new(section)) else {
            return Progress::cancelled(published);
        };
        debug!(file = %file, "publishing coverage");
        if sink.send(CoverageEntry { key, file, summary }).is_err() {
            // Nobody is listening any more.
            return Progress::cancelled(published);
        }
        published += 1;
    }

    Ok(Progress {
        published,
        cancelled: false,
    })
}
