/// Error definitions
pub mod error;
/// Binary glTF export: buffer planning, scene graph, packing and container writing
pub mod export;
/// Building model entities, geometry payloads and the model store interface
pub mod models;

pub use error::{ExportError, ExportResult};
pub use export::gltf_export::{ExportConfig, ExportSummary, export_glb};
pub use export::planner::IndexFormat;
pub use export::walk::ExportMode;
