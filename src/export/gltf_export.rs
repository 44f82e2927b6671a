//! Export a building model to a single GLB stream.

use std::io::Write;

use bon::Builder;
use glam::DVec3;
use gltf_json as json;
use itertools::Itertools;
use rootcause::Report;
use serde_json::value::RawValue;
use tracing::{debug, info, warn};

use crate::error::{ExportError, ExportResult};
use crate::export::adapter::{ExclusionPolicy, admitted_geometry};
use crate::export::bounds::model_bounds;
use crate::export::container::write_container;
use crate::export::packer::{self, Regions};
use crate::export::planner::{BufferPlan, IndexFormat, MeasuringVisitor, RegionSizes};
use crate::export::registry::Registry;
use crate::export::walk::{ExportMode, SceneVisitor, walk};
use crate::models::{Entity, EntityId, ModelStore, Transform};

/// Options of one export.
#[derive(Debug, Clone, Builder)]
pub struct ExportConfig {
    /// `U16` selects the legacy 16-bit variant with mesh partitioning.
    #[builder(default)]
    pub index_format: IndexFormat,
    #[builder(default)]
    pub mode: ExportMode,
    /// Written to `asset.generator`.
    #[builder(into, default = String::from("bimglb"))]
    pub generator: String,
    #[builder(default)]
    pub exclusion: ExclusionPolicy,
    /// Translate the model so its bounding box is centered at the origin.
    #[builder(default = true)]
    pub center_model: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// What an export produced.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExportSummary {
    /// Exported entities per type name, in first-seen order.
    pub type_counts: Vec<(String, usize)>,
    pub entity_count: usize,
    pub region_bytes: RegionSizes,
    pub meshes: usize,
    pub nodes: usize,
    pub materials: usize,
    pub accessors: usize,
    /// Translation applied by the translation pivot.
    pub translation: [f32; 3],
    pub container_length: u32,
}

/// Export every admitted entity of `store` as one GLB written to `writer`.
///
/// Nothing is written unless the whole document was built successfully.
pub fn export_glb<S: ModelStore + ?Sized>(
    store: &S,
    config: &ExportConfig,
    writer: &mut impl Write,
) -> ExportResult<ExportSummary> {
    info!(
        "exporting GLB: {} indices, {}",
        config.index_format,
        match config.mode {
            ExportMode::Full => "full model",
            ExportMode::Part { .. } => "partial model",
            ExportMode::Metadata => "node tree only",
        }
    );

    let mut measuring = MeasuringVisitor::new(&config.exclusion);
    walk(store, &config.mode, &mut measuring)?;
    if config.mode.is_metadata() {
        return export_outline(store, config, &measuring.admitted, writer);
    }
    let plan = BufferPlan::measure(store, &measuring.admitted, config.index_format, &config.exclusion)?;
    let layout = plan.layout();
    debug!(
        "planned {} entities, regions {:?}, body {} bytes",
        plan.entities.len(),
        plan.totals,
        layout.body_length()
    );
    debug!(
        "entity types: {}",
        plan.type_counts
            .iter()
            .map(|(type_name, count)| format!("{type_name} x{count}"))
            .join(", ")
    );

    let translation = centering(store, config, plan.entities.iter().map(|planned| planned.id))?;
    let mut registry = Registry::new(&config.generator, &layout);
    let pivot = registry.add_pivots(translation);
    let mut emitting = EmittingVisitor {
        store,
        config,
        plan: &plan,
        cursor: 0,
        pivot,
        regions: Regions::allocate(&plan.totals),
        registry,
    };
    walk(store, &config.mode, &mut emitting)?;
    if emitting.cursor != plan.entities.len() {
        return Err(Report::new(ExportError::PlanIncomplete {
            planned: plan.entities.len(),
            packed: emitting.cursor,
        }));
    }

    let EmittingVisitor {
        regions, registry, ..
    } = emitting;
    let body = regions.into_body(&layout)?;
    let root = registry.finish();

    let json_string = json::serialize::to_string(&root)
        .map_err(|e| Report::new(ExportError::Serialize(e.to_string())))?;
    let container = write_container(json_string.into_bytes(), Some(body), writer)?;

    let summary = ExportSummary {
        type_counts: plan.type_counts,
        entity_count: plan.entities.len(),
        region_bytes: plan.totals,
        meshes: root.meshes.len(),
        nodes: root.nodes.len(),
        materials: root.materials.len(),
        accessors: root.accessors.len(),
        translation,
        container_length: container.total_length,
    };
    info!(
        "wrote GLB: {} bytes, {} entities, {} meshes, {} materials",
        summary.container_length, summary.entity_count, summary.meshes, summary.materials
    );
    Ok(summary)
}

/// The translation of the translation pivot, checked to survive narrowing.
fn centering<S: ModelStore + ?Sized>(
    store: &S,
    config: &ExportConfig,
    ids: impl IntoIterator<Item = EntityId>,
) -> ExportResult<[f32; 3]> {
    let translation = if config.center_model {
        model_bounds(store, ids)?.centering_translation()
    } else {
        DVec3::ZERO
    };
    let translation = translation.as_vec3();
    if !translation.is_finite() {
        return Err(Report::new(ExportError::NonFiniteTranslation(translation.to_array())));
    }
    Ok(translation.to_array())
}

/// Metadata mode: the JSON node tree alone, written without a BIN chunk.
fn export_outline<S: ModelStore + ?Sized>(
    store: &S,
    config: &ExportConfig,
    admitted: &[EntityId],
    writer: &mut impl Write,
) -> ExportResult<ExportSummary> {
    let translation = centering(store, config, admitted.iter().copied())?;

    let mut registry = Registry::outline(&config.generator);
    let pivot = registry.add_pivots(translation);
    let mut outline = OutlineVisitor {
        config,
        pivot,
        registry,
        type_counts: Vec::new(),
    };
    walk(store, &config.mode, &mut outline)?;

    let OutlineVisitor {
        registry,
        type_counts,
        ..
    } = outline;
    let root = registry.finish();
    let json_string = json::serialize::to_string(&root)
        .map_err(|e| Report::new(ExportError::Serialize(e.to_string())))?;
    let container = write_container(json_string.into_bytes(), None, writer)?;

    let summary = ExportSummary {
        entity_count: type_counts.iter().map(|(_, count)| count).sum(),
        type_counts,
        region_bytes: RegionSizes::default(),
        meshes: root.meshes.len(),
        nodes: root.nodes.len(),
        materials: root.materials.len(),
        accessors: root.accessors.len(),
        translation,
        container_length: container.total_length,
    };
    info!(
        "wrote node tree: {} bytes, {} nodes, {} entities",
        summary.container_length, summary.nodes, summary.entity_count
    );
    Ok(summary)
}

/// Second pass: builds the node tree and packs planned entities in order.
struct EmittingVisitor<'a, S: ?Sized> {
    store: &'a S,
    config: &'a ExportConfig,
    plan: &'a BufferPlan,
    /// Next entry of `plan.entities` to pack.
    cursor: usize,
    /// Translation pivot; parent of every site group.
    pivot: json::Index<json::Node>,
    regions: Regions,
    registry: Registry,
}

impl<S: ModelStore + ?Sized> SceneVisitor for EmittingVisitor<'_, S> {
    type Group = json::Index<json::Node>;

    fn group(&mut self, parent: Option<Self::Group>, name: &str) -> Self::Group {
        let group = self.registry.add_group(name);
        self.registry.attach(parent.unwrap_or(self.pivot), group);
        group
    }

    fn entity(
        &mut self,
        parent: Self::Group,
        id: EntityId,
        entity: &Entity,
        name: &str,
    ) -> ExportResult<()> {
        let Some(geometry) = admitted_geometry(entity, &self.config.exclusion, true) else {
            return Ok(());
        };
        let plan = self.plan;
        let planned = match plan.entities.get(self.cursor) {
            Some(planned) if planned.id == id => planned,
            other => {
                return Err(Report::new(ExportError::PlanMismatch {
                    expected: other.map(|p| p.id),
                    found: id,
                }));
            }
        };
        self.cursor += 1;

        let packed = packer::pack(&mut self.regions, planned, geometry, plan.index_format)?;
        let material = if packed.vertex_colors {
            self.registry.vertex_color_material()
        } else {
            let color = self.store.default_color(&entity.type_name);
            self.registry.flat_material(&entity.type_name, color)
        };
        let primitives = packed
            .batches
            .iter()
            .map(|batch| self.registry.add_primitive(id, batch, plan.index_format, material))
            .collect::<ExportResult<Vec<_>>>()?;

        let mesh = self.registry.add_mesh(name, primitives);
        let node = self.registry.add_entity_node(
            name,
            Some(mesh),
            node_matrix(id, entity.transform),
            global_id_extras(entity)?,
        );
        self.registry.attach(parent, node);
        Ok(())
    }
}

/// Metadata pass: one mesh-less node per entity that would carry geometry.
struct OutlineVisitor<'a> {
    config: &'a ExportConfig,
    pivot: json::Index<json::Node>,
    registry: Registry,
    type_counts: Vec<(String, usize)>,
}

impl SceneVisitor for OutlineVisitor<'_> {
    type Group = json::Index<json::Node>;

    fn group(&mut self, parent: Option<Self::Group>, name: &str) -> Self::Group {
        let group = self.registry.add_group(name);
        self.registry.attach(parent.unwrap_or(self.pivot), group);
        group
    }

    fn entity(
        &mut self,
        parent: Self::Group,
        id: EntityId,
        entity: &Entity,
        name: &str,
    ) -> ExportResult<()> {
        if admitted_geometry(entity, &self.config.exclusion, true).is_none() {
            return Ok(());
        }
        match self
            .type_counts
            .iter_mut()
            .find(|(type_name, _)| *type_name == entity.type_name)
        {
            Some((_, count)) => *count += 1,
            None => self.type_counts.push((entity.type_name.clone(), 1)),
        }

        let node = self.registry.add_entity_node(
            name,
            None,
            node_matrix(id, entity.transform),
            global_id_extras(entity)?,
        );
        self.registry.attach(parent, node);
        Ok(())
    }
}

/// The node matrix for a placement. Identity placements are left implicit;
/// matrices without an inverse are dropped because viewers reject them.
fn node_matrix(id: EntityId, transform: Option<Transform>) -> Option<[f32; 16]> {
    let transform = transform?;
    if transform.is_identity() {
        return None;
    }
    if !transform.is_invertible() {
        warn!("placement of entity {id} is not invertible, omitting node matrix");
        return None;
    }
    Some(transform.to_f32_array())
}

fn global_id_extras(entity: &Entity) -> ExportResult<Option<Box<RawValue>>> {
    let Some(global_id) = &entity.global_id else {
        return Ok(None);
    };
    serde_json::value::to_raw_value(&serde_json::json!({ "ifcID": global_id }))
        .map(Some)
        .map_err(|e| Report::new(ExportError::Serialize(e.to_string())))
}
