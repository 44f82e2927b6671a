use crate::models::geometry::Rgba;

/// Color used for any type missing from [`DEFAULT_COLORS`].
pub const FALLBACK_COLOR: Rgba = [0.8, 0.8, 0.8, 1.0];

/// Display colors per schema type, used for flat materials.
///
/// Each entry: (type name, [r, g, b, a]). Transparent types (glazing, spaces)
/// carry an alpha below 1.
const DEFAULT_COLORS: &[(&str, Rgba)] = &[
    ("IfcSite", [0.42, 0.56, 0.35, 1.0]),
    ("IfcSpace", [0.14, 0.45, 0.85, 0.3]),
    ("IfcRoof", [0.84, 0.28, 0.2, 1.0]),
    ("IfcSlab", [0.72, 0.72, 0.72, 1.0]),
    ("IfcWall", [0.87, 0.86, 0.8, 1.0]),
    ("IfcWallStandardCase", [0.87, 0.86, 0.8, 1.0]),
    ("IfcCurtainWall", [0.54, 0.69, 0.8, 0.6]),
    ("IfcWindow", [0.54, 0.69, 0.8, 0.4]),
    ("IfcPlate", [0.54, 0.69, 0.8, 0.6]),
    ("IfcDoor", [0.64, 0.45, 0.29, 1.0]),
    ("IfcColumn", [0.6, 0.6, 0.62, 1.0]),
    ("IfcBeam", [0.6, 0.6, 0.62, 1.0]),
    ("IfcMember", [0.55, 0.55, 0.58, 1.0]),
    ("IfcStair", [0.65, 0.6, 0.55, 1.0]),
    ("IfcStairFlight", [0.65, 0.6, 0.55, 1.0]),
    ("IfcRamp", [0.65, 0.6, 0.55, 1.0]),
    ("IfcRailing", [0.3, 0.3, 0.32, 1.0]),
    ("IfcCovering", [0.78, 0.75, 0.7, 1.0]),
    ("IfcFooting", [0.5, 0.5, 0.48, 1.0]),
    ("IfcPile", [0.5, 0.5, 0.48, 1.0]),
    ("IfcFurnishingElement", [0.52, 0.37, 0.26, 1.0]),
    ("IfcFlowSegment", [0.25, 0.55, 0.3, 1.0]),
    ("IfcFlowTerminal", [0.25, 0.55, 0.3, 1.0]),
    ("IfcFlowFitting", [0.25, 0.55, 0.3, 1.0]),
    ("IfcDistributionElement", [0.25, 0.55, 0.3, 1.0]),
    ("IfcBuildingElementProxy", [0.6, 0.6, 0.6, 1.0]),
];

/// Look up the display color for a schema type name.
pub fn default_color(type_name: &str) -> Rgba {
    DEFAULT_COLORS
        .iter()
        .find(|(name, _)| *name == type_name)
        .map(|(_, color)| *color)
        .unwrap_or(FALLBACK_COLOR)
}
