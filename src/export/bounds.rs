//! World-space bounding box used to center the model at the origin.

use glam::DVec3;
use rootcause::Report;

use crate::error::{ExportError, ExportResult};
use crate::models::{EntityId, ModelStore, Transform};

/// Axis-aligned bounding box in double precision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: DVec3,
    pub max: DVec3,
}

impl Bounds {
    /// An inverted box that any point expands.
    pub fn empty() -> Self {
        Self {
            min: DVec3::splat(f64::INFINITY),
            max: DVec3::splat(f64::NEG_INFINITY),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    pub fn include(&mut self, point: DVec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn center(&self) -> DVec3 {
        self.min + (self.max - self.min) / 2.0
    }

    /// Translation that moves the box center to the origin. Zero for an empty box.
    pub fn centering_translation(&self) -> DVec3 {
        if self.is_empty() {
            return DVec3::ZERO;
        }
        -self.center()
    }
}

/// Fold the placed vertices of every listed entity into one box.
pub fn model_bounds<S: ModelStore + ?Sized>(
    store: &S,
    ids: impl IntoIterator<Item = EntityId>,
) -> ExportResult<Bounds> {
    let mut bounds = Bounds::empty();
    for id in ids {
        let entity = store
            .entity(id)
            .ok_or_else(|| Report::new(ExportError::MissingEntity(id)))?;
        let Some(geometry) = entity.geometry.as_ref() else {
            continue;
        };
        // Placements the node cannot carry are dropped, so the bounds ignore them too.
        let matrix = entity
            .transform
            .filter(Transform::is_invertible)
            .unwrap_or(Transform::IDENTITY)
            .to_mat4();
        for v in geometry.vertices.chunks_exact(3) {
            bounds.include(matrix.transform_point3(DVec3::new(v[0], v[1], v[2])));
        }
    }
    Ok(bounds)
}
