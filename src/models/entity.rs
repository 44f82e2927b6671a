use std::fmt;

use bon::Builder;
use glam::{DMat4, DVec3};
use rootcause::Report;
use winnow::Parser;
use winnow::binary::le_f64;
use winnow::combinator::repeat;
use winnow::error::ContextError;

use crate::error::{ExportError, ExportResult};
use crate::models::geometry::Geometry;

type WResult<T> = Result<T, winnow::error::ErrMode<ContextError>>;

/// Opaque handle to an entity inside a model store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Structural classification of an entity, supplied by the model store.
///
/// The exporter never inspects type name strings to decide how an entity is
/// treated; it only looks at this kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EntityKind {
    Site,
    Building,
    Storey,
    Space,
    /// Voids cut into other elements (doors, windows, recesses).
    Opening,
    /// Drawing annotations; usually without geometry.
    Annotation,
    /// Any other physical product (walls, slabs, furniture, ...).
    Element,
}

impl EntityKind {
    /// Spatial structure elements can contain other products.
    pub fn is_spatial(self) -> bool {
        matches!(
            self,
            EntityKind::Site | EntityKind::Building | EntityKind::Storey | EntityKind::Space
        )
    }
}

/// One entity of the building model.
#[derive(Debug, Clone, Builder)]
pub struct Entity {
    /// Schema type name, e.g. `IfcWall`. Used for grouping and material lookup.
    #[builder(into)]
    pub type_name: String,
    pub kind: EntityKind,
    #[builder(into)]
    pub name: Option<String>,
    #[builder(into)]
    pub global_id: Option<String>,
    pub geometry: Option<Geometry>,
    pub transform: Option<Transform>,
}

/// A 4x4 placement matrix in column-major order.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Transform(pub [f64; 16]);

impl Transform {
    pub const IDENTITY: Transform = Transform([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    /// Decode 16 little-endian doubles, the layout model stores keep placements in.
    pub fn from_le_bytes(data: &[u8]) -> ExportResult<Self> {
        if data.len() != 16 * 8 {
            return Err(Report::new(ExportError::GeometryDecode(format!(
                "transform must be 128 bytes, got {}",
                data.len()
            ))));
        }
        let input = &mut &data[..];
        let values: Vec<f64> = parse_f64_array(input, 16)
            .map_err(|e| Report::new(ExportError::GeometryDecode(format!("transform: {e}"))))?;
        let mut matrix = [0.0; 16];
        matrix.copy_from_slice(&values);
        Ok(Transform(matrix))
    }

    pub fn from_translation(x: f64, y: f64, z: f64) -> Self {
        let mut m = Self::IDENTITY;
        m.0[12] = x;
        m.0[13] = y;
        m.0[14] = z;
        m
    }

    pub fn to_mat4(&self) -> DMat4 {
        DMat4::from_cols_array(&self.0)
    }

    pub fn is_identity(&self) -> bool {
        self.to_mat4() == DMat4::IDENTITY
    }

    /// Whether the matrix is finite in single precision and has an inverse.
    /// Several viewers reject node matrices that are not.
    pub fn is_invertible(&self) -> bool {
        if !self.0.iter().all(|&v| v.is_finite() && (v as f32).is_finite()) {
            return false;
        }
        let det = self.to_mat4().determinant();
        det != 0.0 && det.is_finite()
    }

    /// Homogeneous multiply, dropping the w component.
    pub fn transform_point(&self, point: DVec3) -> DVec3 {
        self.to_mat4().transform_point3(point)
    }

    pub fn to_f32_array(&self) -> [f32; 16] {
        self.0.map(|v| v as f32)
    }
}

fn le_f64_item(input: &mut &[u8]) -> WResult<f64> {
    le_f64.parse_next(input)
}

pub(crate) fn parse_f64_array(input: &mut &[u8], count: usize) -> WResult<Vec<f64>> {
    repeat(count, le_f64_item).parse_next(input)
}
