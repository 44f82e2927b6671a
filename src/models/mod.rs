/// Type-default colors for entities without explicit color information
pub mod colors;
/// Entity handles, kinds and placement transforms
pub mod entity;
/// Triangle mesh payloads and their raw byte decoding
pub mod geometry;
/// The read-only model store interface and an in-memory implementation
pub mod store;

pub use entity::{Entity, EntityId, EntityKind, Transform};
pub use geometry::{Geometry, RawGeometry, Rgba};
pub use store::{InMemoryModel, ModelStore};
