use rootcause::Report;
use winnow::Parser;
use winnow::binary::{le_f32, le_u32};
use winnow::combinator::repeat;
use winnow::error::ContextError;

use crate::error::{ExportError, ExportResult};
use crate::models::entity::parse_f64_array;

type WResult<T> = Result<T, winnow::error::ErrMode<ContextError>>;

/// RGBA color with components in `0.0..=1.0`.
pub type Rgba = [f32; 4];

/// Color written for every vertex when an entity carries no color information at all.
pub const DEFAULT_GRAY: [u8; 4] = [50, 50, 50, 255];

/// A triangle mesh as delivered by the model store.
///
/// Vertices are kept in double precision, the way stores generate them; they
/// are narrowed to `f32` only when packed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Geometry {
    /// Triangle list, 0-based into the vertex triples.
    pub indices: Vec<u32>,
    /// Flat `x, y, z` triples.
    pub vertices: Vec<f64>,
    /// Flat `x, y, z` triples, one per vertex.
    pub normals: Vec<f32>,
    /// Quantized RGBA, 4 bytes per vertex.
    pub quantized_colors: Option<Vec<u8>>,
    /// Explicit color for the whole entity.
    pub color: Option<Rgba>,
    /// Dominant color of the source representation, used when no explicit color exists.
    pub most_used_color: Option<Rgba>,
}

/// Raw little-endian byte arrays of one geometry payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawGeometry<'a> {
    /// `u32` indices.
    pub indices: &'a [u8],
    /// `f64` vertex components.
    pub vertices: &'a [u8],
    /// `f32` normal components.
    pub normals: &'a [u8],
    pub quantized_colors: Option<&'a [u8]>,
    pub color: Option<Rgba>,
    pub most_used_color: Option<Rgba>,
}

impl Geometry {
    pub fn new(indices: Vec<u32>, vertices: Vec<f64>, normals: Vec<f32>) -> Self {
        Self {
            indices,
            vertices,
            normals,
            ..Default::default()
        }
    }

    pub fn with_color(mut self, color: Rgba) -> Self {
        self.color = Some(color);
        self
    }

    pub fn with_most_used_color(mut self, color: Rgba) -> Self {
        self.most_used_color = Some(color);
        self
    }

    pub fn with_quantized_colors(mut self, colors: Vec<u8>) -> Self {
        self.quantized_colors = Some(colors);
        self
    }

    /// Decode a geometry payload from the raw buffers a model store keeps.
    pub fn from_le_bytes(raw: RawGeometry<'_>) -> ExportResult<Self> {
        let indices: Vec<u32> = decode_array(raw.indices, 4, "indices", |input, n| {
            repeat(n, le_u32_item).parse_next(input)
        })?;
        let vertices: Vec<f64> = decode_array(raw.vertices, 8, "vertices", parse_f64_array)?;
        let normals: Vec<f32> = decode_array(raw.normals, 4, "normals", |input, n| {
            repeat(n, le_f32_item).parse_next(input)
        })?;

        Ok(Self {
            indices,
            vertices,
            normals,
            quantized_colors: raw.quantized_colors.map(<[u8]>::to_vec),
            color: raw.color,
            most_used_color: raw.most_used_color,
        })
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / 3
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn normal_count(&self) -> usize {
        self.normals.len() / 3
    }

    pub fn has_vertex_colors(&self) -> bool {
        self.quantized_colors.is_some()
    }

    /// Check the structural invariants the packer relies on. Returns a
    /// description of the first violation.
    pub fn validate(&self) -> Result<(), String> {
        if self.vertices.len() % 3 != 0 {
            return Err(format!(
                "vertex component count {} is not a multiple of 3",
                self.vertices.len()
            ));
        }
        if self.normals.len() != self.vertices.len() {
            return Err(format!(
                "{} normal components for {} vertex components",
                self.normals.len(),
                self.vertices.len()
            ));
        }
        if self.indices.len() % 3 != 0 {
            return Err(format!(
                "index count {} is not a whole number of triangles",
                self.indices.len()
            ));
        }
        if let Some(bad) = self
            .vertices
            .iter()
            .position(|&v| !v.is_finite() || !(v as f32).is_finite())
        {
            return Err(format!(
                "vertex component {bad} ({}) is not finite in single precision",
                self.vertices[bad]
            ));
        }
        if let Some(bad) = self.normals.iter().position(|n| !n.is_finite()) {
            return Err(format!(
                "normal component {bad} ({}) is not finite",
                self.normals[bad]
            ));
        }
        let vertex_count = self.vertex_count();
        if let Some(&bad) = self.indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(format!(
                "index {bad} out of bounds for {vertex_count} vertices"
            ));
        }
        if let Some(colors) = &self.quantized_colors {
            if colors.len() != vertex_count * 4 {
                return Err(format!(
                    "{} quantized color bytes for {vertex_count} vertices",
                    colors.len()
                ));
            }
        }
        Ok(())
    }

    /// Position of vertex `i`, narrowed to the precision it is packed with.
    pub fn position(&self, i: usize) -> [f32; 3] {
        let v = &self.vertices[i * 3..i * 3 + 3];
        [v[0] as f32, v[1] as f32, v[2] as f32]
    }

    pub fn normal(&self, i: usize) -> [f32; 3] {
        let n = &self.normals[i * 3..i * 3 + 3];
        [n[0], n[1], n[2]]
    }

    /// The single color painted on every vertex when no per-vertex colors
    /// exist: explicit color, then most-used color, then [`DEFAULT_GRAY`].
    pub fn flat_color(&self) -> [u8; 4] {
        self.color
            .or(self.most_used_color)
            .map(quantize_rgba)
            .unwrap_or(DEFAULT_GRAY)
    }
}

/// Quantize a `0.0..=1.0` color to bytes. Out-of-range components are clamped.
pub fn quantize_rgba(color: Rgba) -> [u8; 4] {
    color.map(|c| (c.clamp(0.0, 1.0) * 255.0) as u8)
}

fn le_u32_item(input: &mut &[u8]) -> WResult<u32> {
    le_u32.parse_next(input)
}

fn le_f32_item(input: &mut &[u8]) -> WResult<f32> {
    le_f32.parse_next(input)
}

fn decode_array<T>(
    data: &[u8],
    width: usize,
    what: &str,
    parse: impl FnOnce(&mut &[u8], usize) -> WResult<Vec<T>>,
) -> ExportResult<Vec<T>> {
    if data.len() % width != 0 {
        return Err(Report::new(ExportError::GeometryDecode(format!(
            "{what}: {} bytes is not a multiple of {width}",
            data.len()
        ))));
    }
    let input = &mut &data[..];
    parse(input, data.len() / width)
        .map_err(|e| Report::new(ExportError::GeometryDecode(format!("{what}: {e}"))))
}
