//! Brain Memories: three stores of learned context — page
//! memory, error memory, and workflow memory — plus the page fingerprint
//! ([`signature::PageSignature`]) they key off.
//!
//! Each store persists independently as JSON under `<data>/brain/memory/`
//! and exposes `remember_*`, `find_*`/`predict_*`, `decay`, `flush`, and
//! `get_stats`, matching the common interface described in the spec.
//!
//! These stores hold no references to the Knowledge Base, the executor,
//! or each other — only the Learning Engine wires them together, keeping
//! the ownership graph acyclic.

pub mod error_memory;
pub mod page_memory;
pub mod signature;
pub mod workflow_memory;

pub use error_memory::{ErrorMemory, ErrorMemoryEntry, RecoveryTag};
pub use page_memory::{PageMemory, PageMemoryEntry};
pub use signature::PageSignature;
pub use workflow_memory::{WorkflowMemory, WorkflowRecord};

use crate::error::Result;
use std::path::Path;

pub(crate) fn atomic_write(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Bundle of the three memory stores, as held by the Learning Engine.
pub struct BrainMemories {
    pub page: PageMemory,
    pub error: ErrorMemory,
    pub workflow: WorkflowMemory,
}

impl BrainMemories {
    pub fn new(data_dir: impl Into<std::path::PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        Ok(Self {
            page: PageMemory::new(&data_dir)?,
            error: ErrorMemory::new(&data_dir)?,
            workflow: WorkflowMemory::new(&data_dir)?,
        })
    }

    /// `decay(max-age-days)` applied across all three stores.
    pub fn decay(&self, max_age_days: i64) {
        self.page.decay(max_age_days);
        self.error.decay(max_age_days);
        self.workflow.decay(max_age_days);
    }

    pub fn flush(&self) -> Result<()> {
        self.page.flush()?;
        self.error.flush()?;
        self.workflow.flush()?;
        Ok(())
    }
}
