//! Exact sizing of the binary regions before anything is written.

use std::collections::HashMap;
use std::fmt;

use gltf_json as json;
use rootcause::Report;

use crate::error::{ExportError, ExportResult};
use crate::export::adapter::{ExclusionPolicy, admitted_geometry};
use crate::export::container::align4;
use crate::export::walk::SceneVisitor;
use crate::models::{Entity, EntityId, Geometry, ModelStore};

/// Largest index batch a primitive may reference in the 16-bit variant.
/// Always a whole number of triangles.
pub const LEGACY_INDEX_CEILING: usize = 16389;

const _: () = assert!(LEGACY_INDEX_CEILING % 3 == 0);

/// Width of the index components written to the indices region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IndexFormat {
    #[default]
    U32,
    /// Legacy 16-bit variant. Large meshes are split into batches.
    U16,
}

impl IndexFormat {
    /// Bytes per index.
    pub fn width(self) -> usize {
        match self {
            IndexFormat::U32 => 4,
            IndexFormat::U16 => 2,
        }
    }

    pub fn max_index(self) -> u32 {
        match self {
            IndexFormat::U32 => u32::MAX,
            IndexFormat::U16 => u16::MAX as u32,
        }
    }

    pub fn component_type(self) -> json::accessor::ComponentType {
        match self {
            IndexFormat::U32 => json::accessor::ComponentType::U32,
            IndexFormat::U16 => json::accessor::ComponentType::U16,
        }
    }
}

impl fmt::Display for IndexFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexFormat::U32 => f.write_str("32-bit"),
            IndexFormat::U16 => f.write_str("16-bit"),
        }
    }
}

/// One of the four contiguous sections of the binary body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Region {
    Indices,
    Vertices,
    Normals,
    Colors,
}

impl Region {
    /// Regions in body order.
    pub const ALL: [Region; 4] = [
        Region::Indices,
        Region::Vertices,
        Region::Normals,
        Region::Colors,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Region::Indices => "indices",
            Region::Vertices => "vertices",
            Region::Normals => "normals",
            Region::Colors => "colors",
        };
        f.write_str(name)
    }
}

/// Byte counts per region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegionSizes([usize; 4]);

impl RegionSizes {
    pub fn new(indices: usize, vertices: usize, normals: usize, colors: usize) -> Self {
        Self([indices, vertices, normals, colors])
    }

    pub fn get(&self, region: Region) -> usize {
        self.0[region.index()]
    }

    pub fn get_mut(&mut self, region: Region) -> &mut usize {
        &mut self.0[region.index()]
    }

    pub fn add(&mut self, other: &RegionSizes) {
        for (total, n) in self.0.iter_mut().zip(other.0) {
            *total += n;
        }
    }

    pub fn total(&self) -> usize {
        self.0.iter().sum()
    }
}

/// Whether a mesh must be split into 16-bit batches.
pub fn needs_partition(geometry: &Geometry, format: IndexFormat) -> bool {
    format == IndexFormat::U16 && geometry.vertex_count() > LEGACY_INDEX_CEILING
}

/// The bytes one entity occupies in each region. The packer writes exactly
/// this much; any difference is a fatal accounting error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityFootprint {
    pub sizes: RegionSizes,
    pub partitioned: bool,
}

impl EntityFootprint {
    pub fn of(geometry: &Geometry, format: IndexFormat) -> Self {
        let index_count = geometry.index_count();
        if needs_partition(geometry, format) {
            // One duplicated vertex per index reference.
            return Self {
                sizes: RegionSizes::new(
                    index_count * format.width(),
                    index_count * 12,
                    index_count * 12,
                    index_count * 4,
                ),
                partitioned: true,
            };
        }

        let vertex_count = geometry.vertex_count();
        let colors = match &geometry.quantized_colors {
            Some(colors) => colors.len(),
            None => vertex_count * 4,
        };
        Self {
            sizes: RegionSizes::new(
                index_count * format.width(),
                vertex_count * 12,
                geometry.normal_count() * 12,
                colors,
            ),
            partitioned: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlannedEntity {
    pub id: EntityId,
    pub footprint: EntityFootprint,
}

/// Result of the measuring pass: which entities are packed, in which order,
/// and how large every region must be.
#[derive(Debug, Clone)]
pub struct BufferPlan {
    pub index_format: IndexFormat,
    pub entities: Vec<PlannedEntity>,
    pub totals: RegionSizes,
    /// Admitted entities per type name, in first-seen order.
    pub type_counts: Vec<(String, usize)>,
}

impl BufferPlan {
    /// Size every region for the given admitted entities, in packing order.
    pub fn measure<S: ModelStore + ?Sized>(
        store: &S,
        admitted: &[EntityId],
        index_format: IndexFormat,
        policy: &ExclusionPolicy,
    ) -> ExportResult<Self> {
        let mut entities = Vec::with_capacity(admitted.len());
        let mut totals = RegionSizes::default();
        let mut type_counts: Vec<(String, usize)> = Vec::new();
        let mut type_slots: HashMap<&str, usize> = HashMap::new();

        for &id in admitted {
            let entity = store
                .entity(id)
                .ok_or_else(|| Report::new(ExportError::MissingEntity(id)))?;
            let Some(geometry) = admitted_geometry(entity, policy, false) else {
                continue;
            };
            geometry.validate().map_err(|detail| {
                Report::new(ExportError::MalformedGeometry { entity: id, detail })
            })?;

            let footprint = EntityFootprint::of(geometry, index_format);
            totals.add(&footprint.sizes);
            entities.push(PlannedEntity { id, footprint });

            match type_slots.get(entity.type_name.as_str()) {
                Some(&slot) => type_counts[slot].1 += 1,
                None => {
                    type_slots.insert(&entity.type_name, type_counts.len());
                    type_counts.push((entity.type_name.clone(), 1));
                }
            }
        }

        if totals.get(Region::Indices) == 0 {
            return Err(Report::new(ExportError::NoGeometry));
        }

        Ok(Self {
            index_format,
            entities,
            totals,
            type_counts,
        })
    }

    pub fn layout(&self) -> RegionLayout {
        RegionLayout::compute(&self.totals)
    }
}

/// Placement of the regions inside the binary body. Every region starts on a
/// 4-byte boundary; gaps are zero filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionLayout {
    offsets: [usize; 4],
    lengths: RegionSizes,
    body_length: usize,
}

impl RegionLayout {
    pub fn compute(sizes: &RegionSizes) -> Self {
        let mut offsets = [0; 4];
        let mut cursor = 0;
        for region in Region::ALL {
            let offset = align4(cursor);
            offsets[region.index()] = offset;
            cursor = offset + sizes.get(region);
        }
        Self {
            offsets,
            lengths: *sizes,
            body_length: align4(cursor),
        }
    }

    pub fn offset(&self, region: Region) -> usize {
        self.offsets[region.index()]
    }

    pub fn length(&self, region: Region) -> usize {
        self.lengths.get(region)
    }

    pub fn body_length(&self) -> usize {
        self.body_length
    }
}

/// First pass: records the entities whose geometry will be packed, in walk order.
pub(crate) struct MeasuringVisitor<'a> {
    policy: &'a ExclusionPolicy,
    pub admitted: Vec<EntityId>,
}

impl<'a> MeasuringVisitor<'a> {
    pub fn new(policy: &'a ExclusionPolicy) -> Self {
        Self {
            policy,
            admitted: Vec::new(),
        }
    }
}

impl SceneVisitor for MeasuringVisitor<'_> {
    type Group = ();

    fn group(&mut self, _parent: Option<()>, _name: &str) {}

    fn entity(&mut self, _parent: (), id: EntityId, entity: &Entity, _name: &str) -> ExportResult<()> {
        if admitted_geometry(entity, self.policy, false).is_some() {
            self.admitted.push(id);
        }
        Ok(())
    }
}
