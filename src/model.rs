//! Board object model — the typed canvas entities shared between editors.
//!
//! DESIGN
//! ======
//! `properties` is a closed tagged union, one variant per object type, and is
//! matched exhaustively wherever property content is interpreted. The wire
//! shape is `{"type": "...", "properties": {...}}` flattened into the object,
//! with camelCase field names. Geometry is carried as-is: the store never
//! validates it, callers normalize before writing (see the object service's
//! minimum-size clamp).

use serde::{Deserialize, Serialize};

// =============================================================================
// BOARD OBJECT
// =============================================================================

/// A canvas entity. `id` is unique within a board's map and immutable after
/// creation. `updated_at` is an advisory ISO timestamp: ordering between
/// concurrent writes is decided by the replicated map, never by this field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardObject {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub rotation: f64,
    /// Paint-order hint for renderers. Not the view ordering criterion.
    pub z_index: i32,
    #[serde(flatten)]
    pub properties: ObjectProperties,
    pub created_by: String,
    pub updated_at: String,
}

// =============================================================================
// PROPERTIES
// =============================================================================

/// Type-dependent property bag. Connector endpoints reference other objects'
/// ids with no referential integrity: dangling references after a peer's
/// removal are possible and consumers must tolerate them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "properties",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ObjectProperties {
    StickyNote { text: String, color: String },
    Rectangle { fill: String, stroke: String },
    Circle { fill: String, stroke: String },
    Line { stroke: String, stroke_width: f64 },
    Connector { from_id: String, to_id: String, stroke: String },
    Frame { title: String, fill: String, stroke: String },
    Text { text: String, font_size: f64, color: String },
    FreehandPath { points: Vec<[f64; 2]>, stroke: String, stroke_width: f64 },
}

impl ObjectProperties {
    /// Wire name of the object type tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StickyNote { .. } => "sticky_note",
            Self::Rectangle { .. } => "rectangle",
            Self::Circle { .. } => "circle",
            Self::Line { .. } => "line",
            Self::Connector { .. } => "connector",
            Self::Frame { .. } => "frame",
            Self::Text { .. } => "text",
            Self::FreehandPath { .. } => "freehand_path",
        }
    }
}

// =============================================================================
// TEST FIXTURES
// =============================================================================


// =============================================================================
// TESTS
// =============================================================================
