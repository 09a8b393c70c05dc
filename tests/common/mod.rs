#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use covlens::demangle::{Demangler, DemanglerLoader};
use covlens::error::{CovlensError, Result};
use covlens::runner::{BatchReport, BatchRunner, CoverageEntry};
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Write each `(name, contents)` pair into a fresh temporary directory.
/// The caller must hold onto `TempDir` to keep the files alive.
pub fn write_reports(reports: &[(&str, &[u8])]) -> (TempDir, Vec<PathBuf>) {
    let dir = tempfile::tempdir().unwrap();
    let paths = reports
        .iter()
        .map(|(name, contents)| {
            let path = dir.path().join(name);
            std::fs::write(&path, contents).unwrap();
            path
        })
        .collect();
    (dir, paths)
}

/// Run one pass and collect everything it published.
pub async fn run(runner: &BatchRunner, reports: &[PathBuf]) -> (Vec<CoverageEntry>, BatchReport) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let report = runner.run(reports, tx).await;
    let mut entries = Vec::new();
    while let Some(entry) = rx.recv().await {
        entries.push(entry);
    }
    (entries, report)
}

/// Loader with a fixed symbol table that counts loads and can be told to
/// fail a number of times first.
pub struct TableLoader {
    pub loads: AtomicUsize,
    pub failures_left: AtomicUsize,
}

impl TableLoader {
    pub fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            loads: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(failures),
        })
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

struct Table;

impl Demangler for Table {
    fn demangle(&self, name: &str) -> Result<String> {
        match name {
            "_Z3fooi" => Ok("foo(int)".to_string()),
            "_Z3barv" => Ok("bar()".to_string()),
            _ => Err(CovlensError::Demangle(name.to_string())),
        }
    }
}

#[async_trait]
impl DemanglerLoader for TableLoader {
    async fn load(&self) -> Result<Arc<dyn Demangler>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CovlensError::DemanglerLoad("symbol table unavailable".into()));
        }
        Ok(Arc::new(Table))
    }
}
