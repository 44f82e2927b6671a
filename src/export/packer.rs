//! Writes entity geometry into the pre-sized binary regions.

use rootcause::Report;

use crate::error::{ExportError, ExportResult};
use crate::export::planner::{
    IndexFormat, LEGACY_INDEX_CEILING, PlannedEntity, Region, RegionLayout, RegionSizes,
};
use crate::models::{EntityId, Geometry};

/// A byte region that refuses to grow past its planned size.
#[derive(Debug)]
pub struct RegionWriter {
    region: Region,
    data: Vec<u8>,
    capacity: usize,
}

impl RegionWriter {
    pub fn new(region: Region, capacity: usize) -> Self {
        Self {
            region,
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Bytes written so far; also the offset of the next write.
    pub fn position(&self) -> usize {
        self.data.len()
    }

    pub fn put(&mut self, bytes: &[u8]) -> ExportResult<()> {
        if self.data.len() + bytes.len() > self.capacity {
            return Err(Report::new(ExportError::RegionOverflow {
                region: self.region,
                position: self.data.len(),
                requested: bytes.len(),
                capacity: self.capacity,
            }));
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn put_u16(&mut self, value: u16) -> ExportResult<()> {
        self.put(&value.to_le_bytes())
    }

    pub fn put_u32(&mut self, value: u32) -> ExportResult<()> {
        self.put(&value.to_le_bytes())
    }

    pub fn put_vec3(&mut self, value: [f32; 3]) -> ExportResult<()> {
        for component in value {
            self.put(&component.to_le_bytes())?;
        }
        Ok(())
    }

    /// The region contents. Fails unless exactly the planned size was written.
    pub fn finish(self) -> ExportResult<Vec<u8>> {
        if self.data.len() != self.capacity {
            return Err(Report::new(ExportError::UnusedRegionSpace {
                region: self.region,
                written: self.data.len(),
                capacity: self.capacity,
            }));
        }
        Ok(self.data)
    }
}

/// The four regions of one export.
#[derive(Debug)]
pub struct Regions {
    writers: [RegionWriter; 4],
}

impl Regions {
    pub fn allocate(sizes: &RegionSizes) -> Self {
        Self {
            writers: Region::ALL.map(|region| RegionWriter::new(region, sizes.get(region))),
        }
    }

    pub fn writer(&mut self, region: Region) -> &mut RegionWriter {
        &mut self.writers[region.index()]
    }

    pub fn position(&self, region: Region) -> usize {
        self.writers[region.index()].position()
    }

    pub fn written(&self) -> RegionSizes {
        RegionSizes::new(
            self.position(Region::Indices),
            self.position(Region::Vertices),
            self.position(Region::Normals),
            self.position(Region::Colors),
        )
    }

    /// Concatenate the regions at their layout offsets, zero filling the gaps.
    pub fn into_body(self, layout: &RegionLayout) -> ExportResult<Vec<u8>> {
        let mut body = Vec::with_capacity(layout.body_length());
        for (region, writer) in Region::ALL.into_iter().zip(self.writers) {
            let data = writer.finish()?;
            body.resize(layout.offset(region), 0);
            body.extend_from_slice(&data);
        }
        body.resize(layout.body_length(), 0);
        Ok(body)
    }
}

/// Where one primitive's data landed, as byte offsets into each region.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedBatch {
    pub index_offset: usize,
    pub index_count: usize,
    pub vertex_offset: usize,
    pub vertex_count: usize,
    pub normal_offset: usize,
    pub color_offset: usize,
    /// Bounds of the packed (local, single precision) positions.
    pub min: [f32; 3],
    pub max: [f32; 3],
}

#[derive(Debug, Clone)]
pub struct PackedEntity {
    /// One per primitive; more than one only for partitioned meshes.
    pub batches: Vec<PackedBatch>,
    /// Colors came from per-vertex data rather than a flat entity color.
    pub vertex_colors: bool,
}

/// Running min/max over packed positions.
struct PositionBounds {
    min: [f32; 3],
    max: [f32; 3],
}

impl PositionBounds {
    fn new() -> Self {
        Self {
            min: [f32::MAX; 3],
            max: [f32::MIN; 3],
        }
    }

    fn include(&mut self, p: [f32; 3]) {
        for i in 0..3 {
            self.min[i] = f32::min(self.min[i], p[i]);
            self.max[i] = f32::max(self.max[i], p[i]);
        }
    }
}

/// Pack one planned entity and check it wrote exactly its footprint.
pub fn pack(
    regions: &mut Regions,
    planned: &PlannedEntity,
    geometry: &Geometry,
    format: IndexFormat,
) -> ExportResult<PackedEntity> {
    let before = regions.written();
    let batches = if planned.footprint.partitioned {
        pack_partitioned(regions, geometry)?
    } else {
        vec![pack_whole(regions, planned.id, geometry, format)?]
    };
    let after = regions.written();

    for region in Region::ALL {
        let written = after.get(region) - before.get(region);
        let expected = planned.footprint.sizes.get(region);
        if written != expected {
            return Err(Report::new(ExportError::FootprintMismatch {
                entity: planned.id,
                region,
                planned: expected,
                written,
            }));
        }
    }

    Ok(PackedEntity {
        batches,
        vertex_colors: geometry.has_vertex_colors(),
    })
}

fn pack_whole(
    regions: &mut Regions,
    id: EntityId,
    geometry: &Geometry,
    format: IndexFormat,
) -> ExportResult<PackedBatch> {
    let index_offset = regions.position(Region::Indices);
    let writer = regions.writer(Region::Indices);
    for &index in &geometry.indices {
        // Unreachable through the planner, which partitions large 16-bit meshes.
        if index > format.max_index() {
            return Err(Report::new(ExportError::IndexOutOfRange {
                entity: id,
                index,
                format,
            }));
        }
        match format {
            IndexFormat::U32 => writer.put_u32(index)?,
            IndexFormat::U16 => writer.put_u16(index as u16)?,
        }
    }

    let vertex_count = geometry.vertex_count();
    let vertex_offset = regions.position(Region::Vertices);
    let mut bounds = PositionBounds::new();
    let writer = regions.writer(Region::Vertices);
    for v in 0..vertex_count {
        let p = geometry.position(v);
        bounds.include(p);
        writer.put_vec3(p)?;
    }

    let normal_offset = regions.position(Region::Normals);
    let writer = regions.writer(Region::Normals);
    for n in 0..geometry.normal_count() {
        writer.put_vec3(geometry.normal(n))?;
    }

    let color_offset = regions.position(Region::Colors);
    let writer = regions.writer(Region::Colors);
    match &geometry.quantized_colors {
        Some(colors) => writer.put(colors)?,
        None => {
            let color = geometry.flat_color();
            for _ in 0..vertex_count {
                writer.put(&color)?;
            }
        }
    }

    Ok(PackedBatch {
        index_offset,
        index_count: geometry.index_count(),
        vertex_offset,
        vertex_count,
        normal_offset,
        color_offset,
        min: bounds.min,
        max: bounds.max,
    })
}

/// 16-bit path: every batch of at most [`LEGACY_INDEX_CEILING`] indices gets
/// its own copy of the vertices it references, indexed `0..n`.
fn pack_partitioned(regions: &mut Regions, geometry: &Geometry) -> ExportResult<Vec<PackedBatch>> {
    let flat_color = geometry.flat_color();
    let mut batches = Vec::new();

    for batch in geometry.indices.chunks(LEGACY_INDEX_CEILING) {
        let index_offset = regions.position(Region::Indices);
        let writer = regions.writer(Region::Indices);
        for local in 0..batch.len() {
            writer.put_u16(local as u16)?;
        }

        let vertex_offset = regions.position(Region::Vertices);
        let mut bounds = PositionBounds::new();
        let writer = regions.writer(Region::Vertices);
        for &index in batch {
            let p = geometry.position(index as usize);
            bounds.include(p);
            writer.put_vec3(p)?;
        }

        let normal_offset = regions.position(Region::Normals);
        let writer = regions.writer(Region::Normals);
        for &index in batch {
            writer.put_vec3(geometry.normal(index as usize))?;
        }

        let color_offset = regions.position(Region::Colors);
        let writer = regions.writer(Region::Colors);
        for &index in batch {
            match &geometry.quantized_colors {
                Some(colors) => {
                    let start = index as usize * 4;
                    writer.put(&colors[start..start + 4])?;
                }
                None => writer.put(&flat_color)?,
            }
        }

        batches.push(PackedBatch {
            index_offset,
            index_count: batch.len(),
            vertex_offset,
            vertex_count: batch.len(),
            normal_offset,
            color_offset,
            min: bounds.min,
            max: bounds.max,
        });
    }

    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::planner::EntityFootprint;

    fn planned(geometry: &Geometry, format: IndexFormat) -> PlannedEntity {
        PlannedEntity {
            id: EntityId(1),
            footprint: EntityFootprint::of(geometry, format),
        }
    }

    fn triangle() -> Geometry {
        Geometry::new(
            vec![0, 1, 2],
            vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.5],
            vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
        )
    }

    #[test]
    fn writer_rejects_overflow_and_short_fill() {
        let mut writer = RegionWriter::new(Region::Normals, 6);
        writer.put_u32(1).unwrap();
        let err = writer.put_u32(2).unwrap_err();
        assert!(err.to_string().contains("overflow"));
        let err = writer.finish().unwrap_err();
        assert!(err.to_string().contains("not all space used"));
    }

    #[test]
    fn packs_default_path_and_fills_regions() {
        let geometry = triangle().with_color([1.0, 0.0, 0.0, 1.0]);
        let planned = planned(&geometry, IndexFormat::U32);
        let mut regions = Regions::allocate(&planned.footprint.sizes);

        let packed = pack(&mut regions, &planned, &geometry, IndexFormat::U32).unwrap();
        assert!(!packed.vertex_colors);
        let batch = &packed.batches[0];
        assert_eq!(batch.index_count, 3);
        assert_eq!(batch.vertex_count, 3);
        assert_eq!(batch.min, [0.0, 0.0, 0.0]);
        assert_eq!(batch.max, [1.0, 1.0, 0.5]);

        let layout = RegionLayout::compute(&planned.footprint.sizes);
        let body = regions.into_body(&layout).unwrap();
        assert_eq!(body.len(), 12 + 36 + 36 + 12);
        assert_eq!(&body[84..88], &[255, 0, 0, 255]);
        assert_eq!(&body[4..8], &1u32.to_le_bytes());
    }

    #[test]
    fn quantized_colors_are_copied() {
        let colors: Vec<u8> = (0..12).collect();
        let geometry = triangle().with_quantized_colors(colors.clone());
        let planned = planned(&geometry, IndexFormat::U16);
        let mut regions = Regions::allocate(&planned.footprint.sizes);
        let packed = pack(&mut regions, &planned, &geometry, IndexFormat::U16).unwrap();
        assert!(packed.vertex_colors);

        let layout = RegionLayout::compute(&planned.footprint.sizes);
        let body = regions.into_body(&layout).unwrap();
        let start = layout.offset(Region::Colors);
        assert_eq!(&body[start..start + 12], colors.as_slice());
        // 6 index bytes padded to 8.
        assert_eq!(layout.offset(Region::Vertices), 8);
        assert_eq!(&body[6..8], &[0, 0]);
    }

    #[test]
    fn partitioned_batches_are_local_and_bounded() {
        let vertex_count = LEGACY_INDEX_CEILING + 300;
        let vertices = (0..vertex_count * 3).map(|v| v as f64).collect();
        let indices: Vec<u32> = (0..vertex_count as u32).rev().collect();
        let geometry = Geometry::new(indices.clone(), vertices, vec![0.0; vertex_count * 3]);
        let planned = planned(&geometry, IndexFormat::U16);
        assert!(planned.footprint.partitioned);

        let mut regions = Regions::allocate(&planned.footprint.sizes);
        let packed = pack(&mut regions, &planned, &geometry, IndexFormat::U16).unwrap();
        assert_eq!(packed.batches.len(), 2);
        assert_eq!(packed.batches[0].index_count, LEGACY_INDEX_CEILING);
        assert_eq!(packed.batches[1].index_count, 300);
        assert_eq!(packed.batches[1].index_offset, LEGACY_INDEX_CEILING * 2);

        let layout = RegionLayout::compute(&planned.footprint.sizes);
        let body = regions.into_body(&layout).unwrap();
        let second = &packed.batches[1];
        let index_at = |k: usize| {
            let at = layout.offset(Region::Indices) + second.index_offset + k * 2;
            u16::from_le_bytes([body[at], body[at + 1]]) as usize
        };
        for k in 0..second.index_count {
            let local = index_at(k);
            assert!(local < second.vertex_count);
            let at = layout.offset(Region::Vertices) + second.vertex_offset + local * 12;
            let x = f32::from_le_bytes([body[at], body[at + 1], body[at + 2], body[at + 3]]);
            let original = indices[LEGACY_INDEX_CEILING + k] as usize;
            assert_eq!(x, (original * 3) as f32);
        }
    }

    #[test]
    fn footprint_mismatch_is_detected() {
        let geometry = triangle();
        let mut planned = planned(&geometry, IndexFormat::U32);
        *planned.footprint.sizes.get_mut(Region::Normals) += 12;
        let mut regions = Regions::allocate(&planned.footprint.sizes);
        let err = pack(&mut regions, &planned, &geometry, IndexFormat::U32).unwrap_err();
        assert!(err.to_string().contains("normals"));
    }

    #[test]
    fn wide_index_in_narrow_format_is_rejected() {
        // Unpartitioned footprint with an index the 16-bit format cannot hold.
        let mut geometry = triangle();
        geometry.indices = vec![0, 70_000, 2];
        let planned = planned(&geometry, IndexFormat::U32);
        assert!(!planned.footprint.partitioned);

        let mut regions = Regions::allocate(&planned.footprint.sizes);
        let err = pack(&mut regions, &planned, &geometry, IndexFormat::U16).unwrap_err();
        assert!(err.to_string().contains("index 70000"));
        assert!(err.to_string().contains("16-bit"));
    }
}
