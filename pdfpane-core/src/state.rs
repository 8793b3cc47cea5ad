use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::{DocumentId, DocumentInfo};
use crate::geometry::Rotation;
use crate::layout::{DisplayMode, ZoomMode};

/// Per-document view settings restored when the document is opened again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedViewState {
    pub page: usize,
    pub zoom: f64,
    pub zoom_mode: ZoomMode,
    pub display_mode: DisplayMode,
    #[serde(default)]
    pub rotation: Rotation,
}

impl Default for PersistedViewState {
    fn default() -> Self {
        Self {
            page: 0,
            zoom: 1.0,
            zoom_mode: ZoomMode::FitHeight,
            display_mode: DisplayMode::Continuous,
            rotation: Rotation::Rotate0,
        }
    }
}

pub trait ViewStateStore: Send + Sync {
    fn load(&self, doc: &DocumentInfo) -> Result<Option<PersistedViewState>>;
    fn save(&self, doc: &DocumentInfo, state: &PersistedViewState) -> Result<()>;
}

const RECORD_VERSION: u32 = 1;

/// What goes on disk: the view plus the page count it was saved against.
#[derive(Debug, Serialize, Deserialize)]
struct ViewRecord {
    version: u32,
    page_count: usize,
    view: PersistedViewState,
}

impl ViewRecord {
    /// The saved view for `doc`. A record from another format is ignored; a document whose
    /// page count changed keeps its zoom and modes but starts from the first page.
    fn into_view(self, doc: &DocumentInfo) -> Option<PersistedViewState> {
        if self.version != RECORD_VERSION {
            debug!(id = %doc.id, version = self.version, "ignoring view record");
            return None;
        }
        let mut view = self.view;
        if self.page_count != doc.page_count {
            debug!(
                id = %doc.id,
                saved = self.page_count,
                current = doc.page_count,
                "page count changed, view starts at first page"
            );
            view.page = 0;
        }
        Some(view)
    }
}

/// One `<document id>.json` record per document under `root`.
pub struct FileViewStateStore {
    root: PathBuf,
}

impl FileViewStateStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create state directory at {:?}", root))?;
        Ok(Self { root })
    }

    fn record_path(&self, doc: &DocumentInfo) -> PathBuf {
        self.root.join(doc.id.to_string()).with_extension("json")
    }
}

impl ViewStateStore for FileViewStateStore {
    fn load(&self, doc: &DocumentInfo) -> Result<Option<PersistedViewState>> {
        let path = self.record_path(doc);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read view record {:?}", path))
            }
        };
        let record: ViewRecord = serde_json::from_str(&raw)
            .with_context(|| format!("failed to decode view record {:?}", path))?;
        Ok(record.into_view(doc))
    }

    /// Writes beside the record and renames over it.
    fn save(&self, doc: &DocumentInfo, state: &PersistedViewState) -> Result<()> {
        let path = self.record_path(doc);
        let record = ViewRecord {
            version: RECORD_VERSION,
            page_count: doc.page_count,
            view: state.clone(),
        };
        let staging = path.with_extension("json.partial");
        fs::write(&staging, serde_json::to_vec_pretty(&record)?)
            .with_context(|| format!("failed to write view record {:?}", staging))?;
        fs::rename(&staging, &path)
            .with_context(|| format!("failed to replace view record {:?}", path))
    }
}

#[derive(Default)]
pub struct MemoryViewStateStore {
    inner: Mutex<HashMap<DocumentId, PersistedViewState>>,
}

impl MemoryViewStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ViewStateStore for MemoryViewStateStore {
    fn load(&self, doc: &DocumentInfo) -> Result<Option<PersistedViewState>> {
        Ok(self.inner.lock().get(&doc.id).cloned())
    }

    fn save(&self, doc: &DocumentInfo, state: &PersistedViewState) -> Result<()> {
        self.inner.lock().insert(doc.id, state.clone());
        Ok(())
    }
}
