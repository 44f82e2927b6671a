//! Decides which entities contribute geometry to the export.

use std::fmt;

use tracing::debug;

use crate::models::{Entity, EntityKind, Geometry};

/// Entity kinds whose geometry is never exported.
///
/// Openings are subtracted voids; storey and building shells duplicate the
/// geometry of the elements they contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionPolicy {
    excluded: Vec<EntityKind>,
}

impl ExclusionPolicy {
    pub fn new(excluded: impl IntoIterator<Item = EntityKind>) -> Self {
        Self {
            excluded: excluded.into_iter().collect(),
        }
    }

    /// Admit every kind.
    pub fn none() -> Self {
        Self {
            excluded: Vec::new(),
        }
    }

    pub fn excludes(&self, kind: EntityKind) -> bool {
        self.excluded.contains(&kind)
    }
}

impl Default for ExclusionPolicy {
    fn default() -> Self {
        Self::new([EntityKind::Opening, EntityKind::Storey, EntityKind::Building])
    }
}

/// Why an entity contributes no geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ExcludedKind(EntityKind),
    NoGeometry,
    NoVertices,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ExcludedKind(kind) => write!(f, "{kind:?} geometry is excluded"),
            SkipReason::NoGeometry => f.write_str("no geometry"),
            SkipReason::NoVertices => f.write_str("geometry has no vertex data"),
        }
    }
}

/// Classify an entity, returning its geometry when it is exportable.
pub fn classify<'a>(entity: &'a Entity, policy: &ExclusionPolicy) -> Result<&'a Geometry, SkipReason> {
    if policy.excludes(entity.kind) {
        return Err(SkipReason::ExcludedKind(entity.kind));
    }
    let geometry = entity.geometry.as_ref().ok_or(SkipReason::NoGeometry)?;
    if geometry.vertices.is_empty() {
        return Err(SkipReason::NoVertices);
    }
    Ok(geometry)
}

/// The geometry an entity contributes, if any.
///
/// With `diagnostics` set the skip reason is logged. Annotations routinely
/// carry no geometry and are skipped without a message.
pub fn admitted_geometry<'a>(
    entity: &'a Entity,
    policy: &ExclusionPolicy,
    diagnostics: bool,
) -> Option<&'a Geometry> {
    match classify(entity, policy) {
        Ok(geometry) => Some(geometry),
        Err(SkipReason::NoGeometry) if entity.kind == EntityKind::Annotation => None,
        Err(reason) => {
            if diagnostics {
                debug!(
                    type_name = %entity.type_name,
                    name = entity.name.as_deref().unwrap_or(""),
                    "skipping entity: {reason}"
                );
            }
            None
        }
    }
}
