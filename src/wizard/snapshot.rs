//! Resume document and the stores it is written to.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::step::StepState;
use crate::errors::WizardError;
use crate::utils::persistence::{load_yaml, save_yaml};

/// Everything needed to replay a run, plus diagnostics for a fatal exit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumeDocument {
    #[serde(default)]
    pub state: BTreeMap<String, StepState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub other_info: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
}

impl ResumeDocument {
    /// Whether there is any committed step state worth offering to resume.
    pub fn has_progress(&self) -> bool {
        !self.state.is_empty()
    }
}

pub trait SnapshotStore: Send + Sync {
    fn load(&self) -> Result<Option<ResumeDocument>, WizardError>;

    fn save(&self, document: &ResumeDocument) -> Result<(), WizardError>;

    fn clear(&self) -> Result<(), WizardError>;
}

/// YAML resume file on disk.
#[derive(Debug, Clone)]
pub struct ResumeFile {
    path: PathBuf,
}

impl ResumeFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for ResumeFile {
    fn load(&self) -> Result<Option<ResumeDocument>, WizardError> {
        load_yaml(&self.path)
    }

    fn save(&self, document: &ResumeDocument) -> Result<(), WizardError> {
        save_yaml(document, &self.path)
    }

    fn clear(&self) -> Result<(), WizardError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// In-process store. Clones share the same slot, so a test can keep one
/// handle and inspect what the navigator wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemorySlot>>,
}

#[derive(Debug, Default)]
struct MemorySlot {
    document: Option<ResumeDocument>,
    saves: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(document: ResumeDocument) -> Self {
        let store = Self::default();
        store.lock().document = Some(document);
        store
    }

    pub fn document(&self) -> Option<ResumeDocument> {
        self.lock().document.clone()
    }

    pub fn save_count(&self) -> usize {
        self.lock().saves
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemorySlot> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self) -> Result<Option<ResumeDocument>, WizardError> {
        Ok(self.lock().document.clone())
    }

    fn save(&self, document: &ResumeDocument) -> Result<(), WizardError> {
        let mut slot = self.lock();
        slot.document = Some(document.clone());
        slot.saves += 1;
        Ok(())
    }

    fn clear(&self) -> Result<(), WizardError> {
        self.lock().document = None;
        Ok(())
    }
}
