use rootcause::Report;
use thiserror::Error;

use crate::export::planner::{IndexFormat, Region};
use crate::models::EntityId;

/// Every fatal condition of a GLB export. Per-entity skips (excluded kinds,
/// missing geometry) are not errors and never surface here.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no geometry: no entity in the model contributes any indices")]
    NoGeometry,
    #[error("entity {0} is referenced by the model store but does not exist")]
    MissingEntity(EntityId),
    #[error("malformed geometry on entity {entity}: {detail}")]
    MalformedGeometry { entity: EntityId, detail: String },
    #[error("raw geometry decode error: {0}")]
    GeometryDecode(String),
    #[error("{what} accessor of entity {entity} would have zero elements")]
    EmptyAccessor { entity: EntityId, what: &'static str },
    #[error("{what} accessor of entity {entity} requested in a document without a binary body")]
    NoBinaryBody { entity: EntityId, what: &'static str },
    #[error("index {index} of entity {entity} does not fit in {format} indices")]
    IndexOutOfRange {
        entity: EntityId,
        index: u32,
        format: IndexFormat,
    },
    #[error(
        "{region} region overflow: writing {requested} bytes at {position} exceeds the planned {capacity}"
    )]
    RegionOverflow {
        region: Region,
        position: usize,
        requested: usize,
        capacity: usize,
    },
    #[error("not all space used in the {region} region: {written} of {capacity} bytes written")]
    UnusedRegionSpace {
        region: Region,
        written: usize,
        capacity: usize,
    },
    #[error(
        "entity {entity} wrote {written} bytes into the {region} region but {planned} were planned"
    )]
    FootprintMismatch {
        entity: EntityId,
        region: Region,
        planned: usize,
        written: usize,
    },
    #[error("emitting pass reached entity {found} but the measuring pass planned {expected:?} next")]
    PlanMismatch {
        expected: Option<EntityId>,
        found: EntityId,
    },
    #[error("emitting pass packed {packed} entities but {planned} were planned")]
    PlanIncomplete { planned: usize, packed: usize },
    #[error("centering translation {0:?} is not finite in single precision")]
    NonFiniteTranslation([f32; 3]),
    #[error("container of {0} bytes exceeds the 32-bit GLB length field")]
    ContainerTooLarge(u64),
    #[error("glTF serialization error: {0}")]
    Serialize(String),
    #[error("I/O error: {0}")]
    Io(String),
}

pub type ExportResult<T> = Result<T, Report<ExportError>>;
