pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod frames;
pub mod geometry;
pub mod layout;
pub mod markers;
pub mod overlay;
pub mod selection;
pub mod state;
pub mod viewer;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{CursorMode, ViewerConfig, WheelMode};
pub use engine::{
    document_id_for_bytes, document_id_for_path, Bookmark, DocumentEngine, DocumentId,
    DocumentInfo, DocumentMetadata, DocumentProvider, DocumentSource, LinkRegion, LinkTarget,
    RenderFlags, RenderImage, RenderRequest, TextSpan,
};
pub use error::{ConfigError, RenderFault};
pub use executor::{InlineExecutor, RenderExecutor, WorkerExecutor};
pub use frames::{PageFrame, RasterState};
pub use geometry::{Point, Rect, Rotation, Size};
pub use layout::{DisplayMode, Orientation, ScrollAction, ViewportState, ZoomMode};
pub use markers::{HighlightMarker, Marker, MarkerCollection, MarkerId};
pub use overlay::{FrameGeometry, OverlayCanvas, OverlayProvider, Region, Rgba};
pub use selection::{SelectionRange, TextPosition, TextSelection};
pub use state::{FileViewStateStore, MemoryViewStateStore, PersistedViewState, ViewStateStore};
pub use viewer::{Clipboard, Command, Viewer, ViewerEvent};
