//! End-to-end exports parsed back from the produced GLB bytes.

use serde_json::Value;

use crate::export::gltf_export::{ExportConfig, ExportSummary, export_glb};
use crate::export::planner::{IndexFormat, LEGACY_INDEX_CEILING};
use crate::export::walk::ExportMode;
use crate::models::{Entity, EntityId, EntityKind, Geometry, InMemoryModel, Transform};

struct Parsed {
    bytes: Vec<u8>,
    json: Value,
    bin: Vec<u8>,
    summary: ExportSummary,
}

fn export(model: &InMemoryModel, config: &ExportConfig) -> Parsed {
    let mut bytes = Vec::new();
    let summary = export_glb(model, config, &mut bytes).unwrap();
    let glb = gltf::binary::Glb::from_slice(&bytes).unwrap();
    let json = serde_json::from_slice(&glb.json).unwrap();
    let bin = glb.bin.map(|bin| bin.into_owned()).unwrap_or_default();
    Parsed {
        bytes,
        json,
        bin,
        summary,
    }
}

fn triangle() -> Geometry {
    Geometry::new(
        vec![0, 1, 2],
        vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
    )
}

fn spatial(model: &mut InMemoryModel, type_name: &str, kind: EntityKind, name: &str) -> EntityId {
    model.insert(Entity::builder().type_name(type_name).kind(kind).name(name).build())
}

fn wall(model: &mut InMemoryModel, name: &str, geometry: Geometry) -> EntityId {
    model.insert(
        Entity::builder()
            .type_name("IfcWall")
            .kind(EntityKind::Element)
            .name(name)
            .global_id(format!("guid-{name}"))
            .geometry(geometry)
            .build(),
    )
}

/// Site > Building > storeys, one wall per storey. Returns the storey ids.
fn building(model: &mut InMemoryModel, storeys: &[&str]) -> Vec<EntityId> {
    let site = spatial(model, "IfcSite", EntityKind::Site, "Site");
    let building = spatial(model, "IfcBuilding", EntityKind::Building, "Building");
    model.decompose(site, building);
    storeys
        .iter()
        .map(|name| {
            let storey = spatial(model, "IfcBuildingStorey", EntityKind::Storey, name);
            model.decompose(building, storey);
            storey
        })
        .collect()
}

fn array(value: &Value, key: &str) -> Vec<Value> {
    value[key].as_array().cloned().unwrap_or_default()
}

fn usize_at(value: &Value, key: &str) -> usize {
    value[key].as_u64().unwrap_or(0) as usize
}

fn node_named<'a>(json: &'a Value, name: &str) -> Option<&'a Value> {
    json["nodes"]
        .as_array()?
        .iter()
        .find(|node| node["name"] == name)
}

/// Absolute byte offset of an accessor inside the BIN chunk.
fn accessor_start(json: &Value, accessor: usize) -> usize {
    let accessor = &json["accessors"][accessor];
    let view = &json["bufferViews"][usize_at(accessor, "bufferView")];
    usize_at(view, "byteOffset") + usize_at(accessor, "byteOffset")
}

fn read_u16(bin: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bin[at], bin[at + 1]])
}

fn read_f32(bin: &[u8], at: usize) -> f32 {
    f32::from_le_bytes([bin[at], bin[at + 1], bin[at + 2], bin[at + 3]])
}

#[test]
fn single_triangle_export() {
    let mut model = InMemoryModel::new();
    let storeys = building(&mut model, &["Level 1"]);
    let w = wall(&mut model, "Wall", triangle().with_color([1.0, 0.5, 0.0, 1.0]));
    model.contain(storeys[0], w);

    let out = export(&model, &ExportConfig::default());
    let json = &out.json;

    let lengths: Vec<usize> = array(json, "bufferViews")
        .iter()
        .map(|view| usize_at(view, "byteLength"))
        .collect();
    assert_eq!(lengths, vec![12, 36, 36, 12]);
    assert_eq!(array(json, "meshes").len(), 1);
    assert_eq!(array(&json["meshes"][0], "primitives").len(), 1);

    let materials = array(json, "materials");
    assert_eq!(materials.len(), 2);
    assert_eq!(materials[0]["name"], "VertexColorMaterial");
    assert_eq!(materials[1]["name"], "IfcWallMaterial");
    assert_eq!(json["meshes"][0]["primitives"][0]["material"], 1);

    let primitive = &json["meshes"][0]["primitives"][0];
    let position = &json["accessors"][usize_at(&primitive["attributes"], "POSITION")];
    assert_eq!(position["min"], serde_json::json!([0.0, 0.0, 0.0]));
    assert_eq!(position["max"], serde_json::json!([1.0, 1.0, 0.0]));
    let color = &json["accessors"][usize_at(&primitive["attributes"], "COLOR_0")];
    assert_eq!(color["normalized"], true);
    assert_eq!(usize_at(color, "count"), 3);

    // The explicit color is quantized onto every vertex.
    let colors_at = accessor_start(json, usize_at(&primitive["attributes"], "COLOR_0"));
    assert_eq!(
        &out.bin[colors_at..colors_at + 12],
        &[255, 127, 0, 255, 255, 127, 0, 255, 255, 127, 0, 255]
    );

    assert_eq!(json["asset"]["version"], "2.0");
    assert_eq!(json["asset"]["generator"], "bimglb");
    assert_eq!(json["scenes"][0]["name"], "Scene");

    assert_eq!(out.summary.entity_count, 1);
    assert_eq!(out.summary.type_counts, vec![("IfcWall".to_string(), 1)]);
    assert_eq!(out.summary.materials, 2);
}

#[test]
fn uncolored_entities_are_painted_gray() {
    let mut model = InMemoryModel::new();
    let storeys = building(&mut model, &["Level 1"]);
    let w = wall(&mut model, "Wall", triangle());
    model.contain(storeys[0], w);

    let out = export(&model, &ExportConfig::default());
    let primitive = &out.json["meshes"][0]["primitives"][0];
    let colors_at = accessor_start(&out.json, usize_at(&primitive["attributes"], "COLOR_0"));
    for vertex in out.bin[colors_at..colors_at + 12].chunks(4) {
        assert_eq!(vertex, &[50, 50, 50, 255]);
    }
}

#[test]
fn model_without_geometry_writes_nothing() {
    let mut model = InMemoryModel::new();
    building(&mut model, &["Level 1"]);

    let mut out = Vec::new();
    let err = export_glb(&model, &ExportConfig::default(), &mut out).unwrap_err();
    assert!(err.to_string().contains("no geometry"));
    assert!(out.is_empty());
}

#[test]
fn legacy_format_partitions_large_meshes() {
    const VERTICES: usize = 60_000;
    let vertices: Vec<f64> = (0..VERTICES)
        .flat_map(|v| [v as f64, 2.0 * v as f64, -(v as f64)])
        .collect();
    let normals: Vec<f32> = (0..VERTICES)
        .flat_map(|v| [v as f32 * 0.5, 1.0, -(v as f32)])
        .collect();
    let colors: Vec<u8> = (0..VERTICES)
        .flat_map(|v| [(v % 256) as u8, ((v / 256) % 256) as u8, 7, 255])
        .collect();
    let indices: Vec<u32> = (0..VERTICES).map(|i| ((i * 7919) % VERTICES) as u32).collect();
    let geometry =
        Geometry::new(indices.clone(), vertices, normals).with_quantized_colors(colors.clone());

    let mut model = InMemoryModel::new();
    let storeys = building(&mut model, &["Level 1"]);
    let w = wall(&mut model, "Big", geometry);
    model.contain(storeys[0], w);

    let config = ExportConfig::builder().index_format(IndexFormat::U16).build();
    let out = export(&model, &config);
    let json = &out.json;

    let primitives = array(&json["meshes"][0], "primitives");
    let counts: Vec<usize> = primitives
        .iter()
        .map(|p| usize_at(&json["accessors"][usize_at(p, "indices")], "count"))
        .collect();
    assert_eq!(
        counts,
        vec![LEGACY_INDEX_CEILING, LEGACY_INDEX_CEILING, LEGACY_INDEX_CEILING, 10_833]
    );

    let mut consumed = 0;
    for primitive in &primitives {
        let index_accessor = usize_at(primitive, "indices");
        assert_eq!(json["accessors"][index_accessor]["componentType"], 5123);
        let count = usize_at(&json["accessors"][index_accessor], "count");
        let index_start = accessor_start(json, index_accessor);
        let position_accessor = usize_at(&primitive["attributes"], "POSITION");
        assert_eq!(usize_at(&json["accessors"][position_accessor], "count"), count);
        let position_start = accessor_start(json, position_accessor);
        let normal_start = accessor_start(json, usize_at(&primitive["attributes"], "NORMAL"));
        let color_start = accessor_start(json, usize_at(&primitive["attributes"], "COLOR_0"));
        assert_eq!(primitive["material"], 0);

        for k in 0..count {
            let local = read_u16(&out.bin, index_start + k * 2) as usize;
            assert!(local < count);
            let original = indices[consumed + k] as usize;
            let x = read_f32(&out.bin, position_start + local * 12);
            assert_eq!(x, original as f32);

            let normal: Vec<f32> = (0..3)
                .map(|c| read_f32(&out.bin, normal_start + local * 12 + c * 4))
                .collect();
            assert_eq!(normal, vec![original as f32 * 0.5, 1.0, -(original as f32)]);

            let color = &out.bin[color_start + local * 4..color_start + local * 4 + 4];
            assert_eq!(color, &colors[original * 4..original * 4 + 4]);
        }
        consumed += count;
    }
    assert_eq!(consumed, VERTICES);
}

#[test]
fn part_mode_keeps_only_the_selected_storey() {
    let mut model = InMemoryModel::new();
    let storeys = building(&mut model, &["Level 1", "Level 2"]);
    let a = wall(&mut model, "A", triangle());
    let b = wall(&mut model, "B", triangle());
    model.contain(storeys[0], a);
    model.contain(storeys[1], b);

    let config = ExportConfig::builder()
        .mode(ExportMode::part(["Level 1"]))
        .build();
    let out = export(&model, &config);
    let json = &out.json;

    assert_eq!(array(json, "meshes").len(), 1);
    assert_eq!(json["meshes"][0]["name"], "A");
    assert!(node_named(json, "A").is_some());
    assert!(node_named(json, "B").is_none());

    // Ancestors and the sibling storey are still present as groups.
    assert!(node_named(json, "Site").is_some());
    assert!(node_named(json, "Building").is_some());
    let sibling = node_named(json, "Level 2").unwrap();
    assert!(sibling["children"].is_array());
}

#[test]
fn exports_are_byte_identical() {
    let mut model = InMemoryModel::new();
    let storeys = building(&mut model, &["Level 1", "Level 2"]);
    for (i, storey) in storeys.iter().enumerate() {
        let w = wall(&mut model, &format!("W{i}"), triangle());
        model.contain(*storey, w);
        let slab = model.insert(
            Entity::builder()
                .type_name("IfcSlab")
                .kind(EntityKind::Element)
                .geometry(triangle().with_quantized_colors(vec![200; 12]))
                .build(),
        );
        model.contain(*storey, slab);
    }

    let first = export(&model, &ExportConfig::default());
    let second = export(&model, &ExportConfig::default());
    assert_eq!(first.bytes, second.bytes);
}

#[test]
fn model_is_centered_and_rotated() {
    let mut model = InMemoryModel::new();
    let storeys = building(&mut model, &["Level 1"]);
    let w = model.insert(
        Entity::builder()
            .type_name("IfcWall")
            .kind(EntityKind::Element)
            .geometry(Geometry::new(
                vec![0, 1, 2],
                vec![0.0, 0.0, 0.0, 10.0, 0.0, 0.0, 0.0, 4.0, 2.0],
                vec![0.0; 9],
            ))
            .transform(Transform::from_translation(1000.0, 2000.0, 30.0))
            .build(),
    );
    model.contain(storeys[0], w);

    let out = export(&model, &ExportConfig::default());
    let json = &out.json;

    let pivot = node_named(json, "TranslationPivot").unwrap();
    assert_eq!(pivot["translation"], serde_json::json!([-1005.0, -2002.0, -31.0]));
    assert_eq!(out.summary.translation, [-1005.0, -2002.0, -31.0]);

    let rotation = node_named(json, "RotationPivot").unwrap();
    let scene_root = json["scenes"][0]["nodes"][0].as_u64().unwrap() as usize;
    assert_eq!(json["nodes"][scene_root]["name"], "RotationPivot");
    let q: Vec<f64> = rotation["rotation"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_f64().unwrap())
        .collect();
    assert!((q[0] - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    assert!((q[3] + std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-6);

    let site = node_named(json, "Site").unwrap();
    let site_index = json["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .position(|n| n == site)
        .unwrap();
    assert_eq!(pivot["children"], serde_json::json!([site_index]));

    let disabled = ExportConfig::builder().center_model(false).build();
    let out = export(&model, &disabled);
    let pivot = node_named(&out.json, "TranslationPivot").unwrap();
    assert_eq!(pivot["translation"], serde_json::json!([0.0, 0.0, 0.0]));
}

#[test]
fn container_framing_matches_header() {
    let mut model = InMemoryModel::new();
    let storeys = building(&mut model, &["Level 1"]);
    let w = wall(&mut model, "Wall", triangle());
    model.contain(storeys[0], w);

    let out = export(&model, &ExportConfig::builder().index_format(IndexFormat::U16).build());
    let bytes = &out.bytes;
    assert_eq!(&bytes[0..4], b"glTF");
    let total = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    assert_eq!(total, bytes.len());
    assert_eq!(total, out.summary.container_length as usize);

    let json_length = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]) as usize;
    assert_eq!(json_length % 4, 0);
    assert_eq!(total, 12 + 8 + json_length + 8 + out.bin.len());
    assert_eq!(out.bin.len() % 4, 0);

    // 6 index bytes, padded before the vertices view.
    assert_eq!(usize_at(&out.json["bufferViews"][1], "byteOffset"), 8);
    assert_eq!(usize_at(&out.json["buffers"][0], "byteLength"), out.bin.len());
}

#[test]
fn accessors_account_for_every_region_byte() {
    let mut model = InMemoryModel::new();
    let storeys = building(&mut model, &["Level 1", "Level 2"]);
    for storey in &storeys {
        let w = wall(&mut model, "Wall", triangle());
        model.contain(*storey, w);
        let window = model.insert(
            Entity::builder()
                .type_name("IfcWindow")
                .kind(EntityKind::Element)
                .geometry(triangle().with_color([0.2, 0.4, 0.6, 0.5]))
                .build(),
        );
        model.contain(*storey, window);
    }

    let out = export(&model, &ExportConfig::default());
    let json = &out.json;

    let mut used = [0usize; 4];
    for mesh in array(json, "meshes") {
        for primitive in array(&mesh, "primitives") {
            let attributes = &primitive["attributes"];
            let count = |accessor: usize| usize_at(&json["accessors"][accessor], "count");
            used[0] += count(usize_at(&primitive, "indices")) * 4;
            let vertices = count(usize_at(attributes, "POSITION"));
            assert_eq!(vertices, count(usize_at(attributes, "NORMAL")));
            used[1] += vertices * 12;
            used[2] += vertices * 12;
            used[3] += count(usize_at(attributes, "COLOR_0")) * 4;
        }
    }
    let views: Vec<usize> = array(json, "bufferViews")
        .iter()
        .map(|view| usize_at(view, "byteLength"))
        .collect();
    assert_eq!(views, used.to_vec());

    // Flat materials are shared per type.
    assert_eq!(array(json, "materials").len(), 3);
    let window = &json["materials"][2];
    assert_eq!(window["name"], "IfcWindowMaterial");
    assert_eq!(window["alphaMode"], "BLEND");
}

#[test]
fn node_metadata() {
    let mut model = InMemoryModel::new();
    let storeys = building(&mut model, &["Level 1"]);
    let moved = wall(&mut model, "Moved", triangle());
    let mut flat = Transform::IDENTITY;
    flat.0[10] = 0.0;
    let singular = model.insert(
        Entity::builder()
            .type_name("IfcWall")
            .kind(EntityKind::Element)
            .name("Singular")
            .geometry(triangle())
            .transform(flat)
            .build(),
    );
    let unnamed = model.insert(
        Entity::builder()
            .type_name("IfcSlab")
            .kind(EntityKind::Element)
            .geometry(triangle())
            .build(),
    );
    model.contain(storeys[0], moved);
    model.contain(storeys[0], singular);
    model.contain(storeys[0], unnamed);

    let out = export(&model, &ExportConfig::default());
    let json = &out.json;

    let moved = node_named(json, "Moved").unwrap();
    assert_eq!(moved["extras"]["ifcID"], "guid-Moved");
    assert!(moved["extras"].get("globalId").is_none());
    assert!(moved.get("matrix").is_none());

    let singular = node_named(json, "Singular").unwrap();
    assert!(singular.get("matrix").is_none());
    assert!(singular.get("extras").is_none());

    assert!(node_named(json, "Unknown1").is_some());
    assert!(node_named(json, "IfcWall Group").is_some());
    assert!(node_named(json, "IfcSlab Group").is_some());
}

#[test]
fn vertex_colored_entities_use_the_shared_material() {
    let mut model = InMemoryModel::new();
    let storeys = building(&mut model, &["Level 1"]);
    let colors: Vec<u8> = (0..12).collect();
    let w = wall(&mut model, "Painted", triangle().with_quantized_colors(colors.clone()));
    model.contain(storeys[0], w);

    let out = export(&model, &ExportConfig::default());
    let json = &out.json;
    assert_eq!(array(json, "materials").len(), 1);
    let primitive = &json["meshes"][0]["primitives"][0];
    assert_eq!(primitive["material"], 0);

    let at = accessor_start(json, usize_at(&primitive["attributes"], "COLOR_0"));
    assert_eq!(&out.bin[at..at + 12], colors.as_slice());
}

#[test]
fn unusable_placements_do_not_poison_centering() {
    let mut model = InMemoryModel::new();
    let storeys = building(&mut model, &["Level 1"]);
    let mut broken = Transform::IDENTITY;
    broken.0[0] = f64::INFINITY;
    let a = model.insert(
        Entity::builder()
            .type_name("IfcWall")
            .kind(EntityKind::Element)
            .name("Broken")
            .geometry(triangle())
            .transform(broken)
            .build(),
    );
    let b = wall(&mut model, "Plain", triangle());
    model.contain(storeys[0], a);
    model.contain(storeys[0], b);

    let out = export(&model, &ExportConfig::default());
    assert_eq!(out.summary.translation, [-0.5, -0.5, 0.0]);
    let pivot = node_named(&out.json, "TranslationPivot").unwrap();
    let translation = array(pivot, "translation");
    assert_eq!(translation.len(), 3);
    assert!(translation.iter().all(Value::is_f64));
    assert!(node_named(&out.json, "Broken").unwrap().get("matrix").is_none());
    assert!(gltf::Gltf::from_slice(&out.bytes).is_ok());
}

#[test]
fn translation_beyond_single_precision_is_fatal() {
    let mut model = InMemoryModel::new();
    let storeys = building(&mut model, &["Level 1"]);
    let mut scale = Transform::IDENTITY;
    scale.0[0] = 1e30;
    scale.0[5] = 1e30;
    scale.0[10] = 1e30;
    let w = model.insert(
        Entity::builder()
            .type_name("IfcWall")
            .kind(EntityKind::Element)
            .geometry(Geometry::new(
                vec![0, 1, 2],
                vec![0.0, 0.0, 0.0, 1e30, 0.0, 0.0, 0.0, 1e30, 0.0],
                vec![0.0; 9],
            ))
            .transform(scale)
            .build(),
    );
    model.contain(storeys[0], w);

    let mut out = Vec::new();
    let err = export_glb(&model, &ExportConfig::default(), &mut out).unwrap_err();
    assert!(err.to_string().contains("not finite"));
    assert!(out.is_empty());
}

#[test]
fn metadata_mode_writes_the_tree_without_a_body() {
    let mut model = InMemoryModel::new();
    let storeys = building(&mut model, &["Level 1"]);
    let w = wall(&mut model, "Wall", triangle());
    model.contain(storeys[0], w);

    let config = ExportConfig::builder().mode(ExportMode::Metadata).build();
    let mut bytes = Vec::new();
    let summary = export_glb(&model, &config, &mut bytes).unwrap();
    assert_eq!(bytes.len(), summary.container_length as usize);
    assert!(gltf::Gltf::from_slice(&bytes).is_ok());

    let glb = gltf::binary::Glb::from_slice(&bytes).unwrap();
    assert!(glb.bin.is_none());
    let json: Value = serde_json::from_slice(&glb.json).unwrap();
    assert!(array(&json, "meshes").is_empty());
    assert!(array(&json, "accessors").is_empty());
    assert!(array(&json, "buffers").is_empty());
    assert!(array(&json, "bufferViews").is_empty());

    let node = node_named(&json, "Wall").unwrap();
    assert!(node.get("mesh").is_none());
    assert_eq!(node["extras"]["ifcID"], "guid-Wall");
    assert!(node_named(&json, "IfcWall Group").is_some());
    assert!(node_named(&json, "Level 1").is_some());
    assert_eq!(summary.entity_count, 1);
    assert_eq!(summary.translation, [-0.5, -0.5, 0.0]);

    // A model without geometry still has a tree to describe.
    let mut bare = InMemoryModel::new();
    building(&mut bare, &["Level 1"]);
    let mut bytes = Vec::new();
    let summary = export_glb(&bare, &config, &mut bytes).unwrap();
    assert_eq!(summary.entity_count, 0);
    assert_eq!(summary.translation, [0.0, 0.0, 0.0]);
}
