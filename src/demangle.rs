//! Symbol demangling for function names recorded in coverage data.
//!
//! The demangler is loaded lazily through a [`DemanglerLoader`] and shared
//! by every detail expansion in a session via [`DemanglerCache`].

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{CovlensError, Result};

static MANGLED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^_{1,3}Z").unwrap());

/// Whether `name` looks like an Itanium-ABI mangled symbol.
pub fn is_mangled(name: &str) -> bool {
    MANGLED.is_match(name)
}

/// Turns a mangled symbol into a display name.
pub trait Demangler: Send + Sync {
    fn demangle(&self, name: &str) -> Result<String>;
}

impl<F> Demangler for F
where
    F: Fn(&str) -> Result<String> + Send + Sync,
{
    fn demangle(&self, name: &str) -> Result<String> {
        self(name)
    }
}

/// Produces a demangler. Called at most once per successful load.
#[async_trait]
pub trait DemanglerLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn Demangler>>;
}

/// Demangles Rust symbols with `rustc-demangle` and C++ symbols with
/// `cpp_demangle`.
pub struct SymbolDemangler;

impl Demangler for SymbolDemangler {
    fn demangle(&self, name: &str) -> Result<String> {
        if let Ok(symbol) = rustc_demangle::try_demangle(name) {
            return Ok(format!("{symbol:#}"));
        }
        // Extra leading underscores come from platforms that prefix C symbols.
        let trimmed = name.trim_start_matches('_');
        let itanium = format!("_{trimmed}");
        cpp_demangle::Symbol::new(itanium.as_bytes())
            .ok()
            .and_then(|symbol| symbol.demangle(&Default::default()).ok())
            .ok_or_else(|| CovlensError::Demangle(name.to_string()))
    }
}

/// Loader for [`SymbolDemangler`].
pub struct BuiltinLoader;

#[async_trait]
impl DemanglerLoader for BuiltinLoader {
    async fn load(&self) -> Result<Arc<dyn Demangler>> {
        Ok(Arc::new(SymbolDemangler))
    }
}

/// Single-flight cache around a [`DemanglerLoader`].
///
/// The first caller runs the load and concurrent callers wait on it. A
/// failed load leaves the cache empty, so the next caller retries.
pub struct DemanglerCache {
    loader: Arc<dyn DemanglerLoader>,
    cell: OnceCell<Arc<dyn Demangler>>,
}

impl DemanglerCache {
    pub fn new(loader: Arc<dyn DemanglerLoader>) -> Self {
        Self {
            loader,
            cell: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> Result<Arc<dyn Demangler>> {
        self.cell
            .get_or_try_init(|| async {
                debug!("loading demangler");
                self.loader.load().await
            })
            .await
            .cloned()
    }

    pub(crate) fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }
}

impl Default for DemanglerCache {
    fn default() -> Self {
        Self::new(Arc::new(BuiltinLoader))
    }
}
