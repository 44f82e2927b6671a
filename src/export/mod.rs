/// Per-entity admission of geometry
pub mod adapter;
/// Global bounds and the centering translation
pub mod bounds;
/// GLB header and chunk framing
pub mod container;
/// Export driver: configuration, passes and summary
pub mod gltf_export;
/// Writing geometry into the binary regions
pub mod packer;
/// Exact region sizing before emission
pub mod planner;
/// glTF document allocation
pub mod registry;
/// Hierarchy traversal shared by both passes
pub mod walk;

#[cfg(test)]
mod tests;
