//! Allocation of glTF buffers, views, accessors, materials, meshes and nodes.

use std::collections::{BTreeMap, HashMap};

use gltf_json as json;
use json::validation::Checked::Valid;
use json::validation::USize64;
use rootcause::Report;
use serde_json::value::RawValue;

use crate::error::{ExportError, ExportResult};
use crate::export::packer::PackedBatch;
use crate::export::planner::{IndexFormat, Region, RegionLayout};
use crate::export::walk::{ROTATION_PIVOT, TRANSLATION_PIVOT};
use crate::models::{EntityId, Rgba};

/// Name of the shared material used by every primitive with per-vertex colors.
pub const VERTEX_COLOR_MATERIAL: &str = "VertexColorMaterial";

/// Rotation taking the Z-up building convention to glTF's Y-up.
pub fn z_up_to_y_up() -> [f32; 4] {
    glam::Quat::from_xyzw(1.0, 0.0, 0.0, -1.0)
        .normalize()
        .to_array()
}

/// Description of one accessor into a region view.
#[derive(Debug, Clone)]
pub struct AccessorSpec {
    pub region: Region,
    pub byte_offset: usize,
    pub count: usize,
    pub component: json::accessor::ComponentType,
    pub type_: json::accessor::Type,
    pub normalized: bool,
    pub bounds: Option<([f32; 3], [f32; 3])>,
}

/// Owns the glTF document while it is being built.
pub struct Registry {
    root: json::Root,
    /// One view per region; absent in outline documents.
    views: Option<[json::Index<json::buffer::View>; 4]>,
    vertex_color_material: json::Index<json::Material>,
    /// Flat materials keyed by type name.
    flat_materials: HashMap<String, json::Index<json::Material>>,
}

impl Registry {
    /// Start a document with one buffer covering the whole body, one view per
    /// region and the vertex-color material at index 0.
    pub fn new(generator: &str, layout: &RegionLayout) -> Self {
        let mut registry = Self::outline(generator);
        let root = &mut registry.root;

        let buffer = root.push(json::Buffer {
            byte_length: USize64::from(layout.body_length()),
            uri: None,
            name: None,
            extensions: Default::default(),
            extras: Default::default(),
        });

        let views = Region::ALL.map(|region| {
            let target = match region {
                Region::Indices => json::buffer::Target::ElementArrayBuffer,
                _ => json::buffer::Target::ArrayBuffer,
            };
            root.push(json::buffer::View {
                buffer,
                byte_length: USize64::from(layout.length(region)),
                byte_offset: Some(USize64::from(layout.offset(region))),
                byte_stride: None,
                target: Some(Valid(target)),
                name: None,
                extensions: Default::default(),
                extras: Default::default(),
            })
        });
        registry.views = Some(views);
        registry
    }

    /// A document without any binary body: asset, the vertex-color material
    /// and whatever nodes the caller adds.
    pub fn outline(generator: &str) -> Self {
        let mut root = json::Root::default();
        root.asset = json::Asset {
            version: "2.0".to_string(),
            generator: Some(generator.to_string()),
            ..Default::default()
        };

        let vertex_color_material = root.push(json::Material {
            name: Some(VERTEX_COLOR_MATERIAL.to_string()),
            pbr_metallic_roughness: json::material::PbrMetallicRoughness {
                metallic_factor: json::material::StrengthFactor(0.0),
                ..Default::default()
            },
            ..Default::default()
        });

        Self {
            root,
            views: None,
            vertex_color_material,
            flat_materials: HashMap::new(),
        }
    }

    pub fn view(&self, region: Region) -> Option<json::Index<json::buffer::View>> {
        self.views.map(|views| views[region.index()])
    }

    pub fn vertex_color_material(&self) -> json::Index<json::Material> {
        self.vertex_color_material
    }

    /// The flat material of a type, created on first use.
    pub fn flat_material(&mut self, type_name: &str, color: Rgba) -> json::Index<json::Material> {
        if let Some(&material) = self.flat_materials.get(type_name) {
            return material;
        }
        let alpha_mode = if color[3] < 1.0 {
            json::material::AlphaMode::Blend
        } else {
            json::material::AlphaMode::Opaque
        };
        let material = self.root.push(json::Material {
            name: Some(format!("{type_name}Material")),
            alpha_mode: Valid(alpha_mode),
            pbr_metallic_roughness: json::material::PbrMetallicRoughness {
                base_color_factor: json::material::PbrBaseColorFactor(color),
                metallic_factor: json::material::StrengthFactor(0.0),
                ..Default::default()
            },
            ..Default::default()
        });
        self.flat_materials.insert(type_name.to_string(), material);
        material
    }

    pub fn add_accessor(
        &mut self,
        entity: EntityId,
        what: &'static str,
        spec: AccessorSpec,
    ) -> ExportResult<json::Index<json::Accessor>> {
        if spec.count == 0 {
            return Err(Report::new(ExportError::EmptyAccessor { entity, what }));
        }
        let Some(view) = self.view(spec.region) else {
            return Err(Report::new(ExportError::NoBinaryBody { entity, what }));
        };
        let (min, max) = match spec.bounds {
            Some((min, max)) => (
                Some(json::Value::from(min.to_vec())),
                Some(json::Value::from(max.to_vec())),
            ),
            None => (None, None),
        };
        Ok(self.root.push(json::Accessor {
            buffer_view: Some(view),
            byte_offset: Some(USize64::from(spec.byte_offset)),
            count: USize64::from(spec.count),
            component_type: Valid(json::accessor::GenericComponentType(spec.component)),
            type_: Valid(spec.type_),
            min,
            max,
            name: None,
            normalized: spec.normalized,
            sparse: None,
            extensions: Default::default(),
            extras: Default::default(),
        }))
    }

    /// Accessors and the primitive for one packed batch.
    pub fn add_primitive(
        &mut self,
        entity: EntityId,
        batch: &PackedBatch,
        index_format: IndexFormat,
        material: json::Index<json::Material>,
    ) -> ExportResult<json::mesh::Primitive> {
        use json::accessor::{ComponentType, Type};

        let indices = self.add_accessor(
            entity,
            "index",
            AccessorSpec {
                region: Region::Indices,
                byte_offset: batch.index_offset,
                count: batch.index_count,
                component: index_format.component_type(),
                type_: Type::Scalar,
                normalized: false,
                bounds: None,
            },
        )?;
        let positions = self.add_accessor(
            entity,
            "position",
            AccessorSpec {
                region: Region::Vertices,
                byte_offset: batch.vertex_offset,
                count: batch.vertex_count,
                component: ComponentType::F32,
                type_: Type::Vec3,
                normalized: false,
                bounds: Some((batch.min, batch.max)),
            },
        )?;
        let normals = self.add_accessor(
            entity,
            "normal",
            AccessorSpec {
                region: Region::Normals,
                byte_offset: batch.normal_offset,
                count: batch.vertex_count,
                component: ComponentType::F32,
                type_: Type::Vec3,
                normalized: false,
                bounds: None,
            },
        )?;
        let colors = self.add_accessor(
            entity,
            "color",
            AccessorSpec {
                region: Region::Colors,
                byte_offset: batch.color_offset,
                count: batch.vertex_count,
                component: ComponentType::U8,
                type_: Type::Vec4,
                normalized: true,
                bounds: None,
            },
        )?;

        let mut attributes = BTreeMap::new();
        attributes.insert(Valid(json::mesh::Semantic::Positions), positions);
        attributes.insert(Valid(json::mesh::Semantic::Normals), normals);
        attributes.insert(Valid(json::mesh::Semantic::Colors(0)), colors);

        Ok(json::mesh::Primitive {
            attributes,
            indices: Some(indices),
            material: Some(material),
            mode: Valid(json::mesh::Mode::Triangles),
            targets: None,
            extensions: None,
            extras: Default::default(),
        })
    }

    pub fn add_mesh(&mut self, name: &str, primitives: Vec<json::mesh::Primitive>) -> json::Index<json::Mesh> {
        self.root.push(json::Mesh {
            primitives,
            weights: None,
            name: Some(name.to_string()),
            extensions: Default::default(),
            extras: Default::default(),
        })
    }

    /// An empty group node; children are attached as the walk finds them.
    pub fn add_group(&mut self, name: &str) -> json::Index<json::Node> {
        self.root.push(json::Node {
            name: Some(name.to_string()),
            children: Some(Vec::new()),
            ..Default::default()
        })
    }

    /// The node of one entity. Outline documents pass no mesh.
    pub fn add_entity_node(
        &mut self,
        name: &str,
        mesh: Option<json::Index<json::Mesh>>,
        matrix: Option<[f32; 16]>,
        extras: Option<Box<RawValue>>,
    ) -> json::Index<json::Node> {
        self.root.push(json::Node {
            name: Some(name.to_string()),
            mesh,
            matrix,
            extras,
            ..Default::default()
        })
    }

    pub fn attach(&mut self, parent: json::Index<json::Node>, child: json::Index<json::Node>) {
        if let Some(node) = self.root.nodes.get_mut(parent.value()) {
            node.children.get_or_insert_with(Vec::new).push(child);
        }
    }

    /// Create both root pivots and the scene listing the outer one. Returns the
    /// translation pivot, which site groups are attached to.
    pub fn add_pivots(&mut self, translation: [f32; 3]) -> json::Index<json::Node> {
        let translation_pivot = self.root.push(json::Node {
            name: Some(TRANSLATION_PIVOT.to_string()),
            translation: Some(translation),
            children: Some(Vec::new()),
            ..Default::default()
        });
        let rotation_pivot = self.root.push(json::Node {
            name: Some(ROTATION_PIVOT.to_string()),
            rotation: Some(json::scene::UnitQuaternion(z_up_to_y_up())),
            children: Some(vec![translation_pivot]),
            ..Default::default()
        });
        let scene = self.root.push(json::Scene {
            nodes: vec![rotation_pivot],
            name: Some("Scene".to_string()),
            extensions: Default::default(),
            extras: Default::default(),
        });
        self.root.scene = Some(scene);
        translation_pivot
    }

    pub fn root(&self) -> &json::Root {
        &self.root
    }

    /// The finished document. Groups that stayed empty lose their `children` key.
    pub fn finish(mut self) -> json::Root {
        for node in &mut self.root.nodes {
            if node.children.as_ref().is_some_and(Vec::is_empty) {
                node.children = None;
            }
        }
        self.root
    }
}
