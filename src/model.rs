//! Document model: board objects, their kind-specific geometry, and sparse
//! updates.
//!
//! A [`BoardObject`] is the unit shared between collaborators. Its geometry is
//! a tagged union ([`Geometry`]) over the closed set of shape kinds, so every
//! site that needs kind-specific handling (bounds, relationship indices, patch
//! application) is an exhaustive `match`.
//!
//! On the wire an object is one flat JSON document with camelCase keys and a
//! `type` discriminator; geometry and style fields are flattened into it.
//! [`ObjectPatch`] is the sparse counterpart used for local edits and pending
//! writes.

#[cfg(test)]
#[path = "model_test.rs"]
mod model_test;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize};

/// Unique identifier for a board object.
pub type ObjectId = String;

/// Identifier of the board (document collection) objects live in.
pub type BoardId = String;

/// Mint a fresh object id.
#[must_use]
pub fn new_object_id() -> ObjectId {
    uuid::Uuid::new_v4().to_string()
}

// =============================================================================
// TIMESTAMP
// =============================================================================

/// Logical timestamp as stored by the persistence layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanoseconds: u32,
}

impl Timestamp {
    #[must_use]
    pub fn from_millis(millis: i64) -> Self {
        let seconds = millis.div_euclid(1000);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let nanoseconds = (millis.rem_euclid(1000) * 1_000_000) as u32;
        Self { seconds, nanoseconds }
    }

    /// Wall-clock now. Falls back to the epoch if the system clock is before it.
    #[must_use]
    pub fn now() -> Self {
        let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
            return Self::from_millis(0);
        };
        Self::from_millis(i64::try_from(dur.as_millis()).unwrap_or(i64::MAX))
    }

    /// Milliseconds since the epoch, or `None` when the value cannot be
    /// represented (nanoseconds out of range, or overflow).
    #[must_use]
    pub fn to_millis(&self) -> Option<i64> {
        if self.nanoseconds >= 1_000_000_000 {
            return None;
        }
        self.seconds
            .checked_mul(1000)?
            .checked_add(i64::from(self.nanoseconds / 1_000_000))
    }
}

// =============================================================================
// KIND + GEOMETRY
// =============================================================================

/// The kind of a board object, without its geometry payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    StickyNote,
    Rectangle,
    Circle,
    Text,
    Frame,
    Line,
    Connector,
}

/// Which side of an endpoint shape a connector attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorSide {
    Top,
    Right,
    Bottom,
    Left,
    Center,
}

/// Kind-specific geometry. Area kinds are sized by `width`/`height`;
/// point-list kinds carry flat `[x0, y0, x1, y1, ...]` pairs relative to the
/// object's `x`/`y`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Geometry {
    StickyNote {
        width: f64,
        height: f64,
    },
    Rectangle {
        width: f64,
        height: f64,
    },
    Circle {
        width: f64,
        height: f64,
    },
    Text {
        width: f64,
        height: f64,
    },
    Frame {
        width: f64,
        height: f64,
    },
    Line {
        #[serde(default)]
        points: Vec<f64>,
    },
    Connector {
        #[serde(default)]
        points: Vec<f64>,
        #[serde(default, deserialize_with = "non_empty", skip_serializing_if = "Option::is_none")]
        from_object_id: Option<ObjectId>,
        #[serde(default, deserialize_with = "non_empty", skip_serializing_if = "Option::is_none")]
        to_object_id: Option<ObjectId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_anchor: Option<AnchorSide>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to_anchor: Option<AnchorSide>,
    },
}

impl Geometry {
    /// Area geometry of the given kind. Point-list kinds get an empty point list.
    #[must_use]
    pub fn area(kind: ObjectKind, width: f64, height: f64) -> Self {
        match kind {
            ObjectKind::StickyNote => Self::StickyNote { width, height },
            ObjectKind::Rectangle => Self::Rectangle { width, height },
            ObjectKind::Circle => Self::Circle { width, height },
            ObjectKind::Text => Self::Text { width, height },
            ObjectKind::Frame => Self::Frame { width, height },
            ObjectKind::Line => Self::Line { points: Vec::new() },
            ObjectKind::Connector => Self::connector(Vec::new(), None, None),
        }
    }

    #[must_use]
    pub fn connector(points: Vec<f64>, from: Option<ObjectId>, to: Option<ObjectId>) -> Self {
        Self::Connector { points, from_object_id: from, to_object_id: to, from_anchor: None, to_anchor: None }
    }

    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::StickyNote { .. } => ObjectKind::StickyNote,
            Self::Rectangle { .. } => ObjectKind::Rectangle,
            Self::Circle { .. } => ObjectKind::Circle,
            Self::Text { .. } => ObjectKind::Text,
            Self::Frame { .. } => ObjectKind::Frame,
            Self::Line { .. } => ObjectKind::Line,
            Self::Connector { .. } => ObjectKind::Connector,
        }
    }

    /// `(width, height)` for area kinds.
    #[must_use]
    pub fn size(&self) -> Option<(f64, f64)> {
        match self {
            Self::StickyNote { width, height }
            | Self::Rectangle { width, height }
            | Self::Circle { width, height }
            | Self::Text { width, height }
            | Self::Frame { width, height } => Some((*width, *height)),
            Self::Line { .. } | Self::Connector { .. } => None,
        }
    }

    /// Relative point list for point-list kinds.
    #[must_use]
    pub fn points(&self) -> Option<&[f64]> {
        match self {
            Self::Line { points } | Self::Connector { points, .. } => Some(points),
            Self::StickyNote { .. }
            | Self::Rectangle { .. }
            | Self::Circle { .. }
            | Self::Text { .. }
            | Self::Frame { .. } => None,
        }
    }
}

// =============================================================================
// STYLE
// =============================================================================

/// Optional, kind-dependent presentation fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Style {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_fill: Option<String>,
}

// =============================================================================
// BOARD OBJECT
// =============================================================================

/// A board object as stored locally and in the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardObject {
    /// Unique, immutable identifier.
    pub id: ObjectId,
    /// Left edge (area kinds) or origin of the point list (point-list kinds).
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    /// Clockwise rotation in degrees.
    #[serde(default)]
    pub rotation: f64,
    #[serde(flatten)]
    pub geometry: Geometry,
    #[serde(flatten)]
    pub style: Style,
    /// Containing frame. Empty string on the wire means no parent.
    #[serde(default, deserialize_with = "non_empty", skip_serializing_if = "Option::is_none")]
    pub parent_frame_id: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
}

impl BoardObject {
    /// Create an object at `(x, y)` with default style and no provenance.
    #[must_use]
    pub fn new(id: impl Into<ObjectId>, x: f64, y: f64, geometry: Geometry) -> Self {
        Self {
            id: id.into(),
            x,
            y,
            rotation: 0.0,
            geometry,
            style: Style::default(),
            parent_frame_id: None,
            created_by: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        self.geometry.kind()
    }

    #[must_use]
    pub fn is_frame(&self) -> bool {
        matches!(self.geometry, Geometry::Frame { .. })
    }

    /// Containing frame id, treating an empty string as absent.
    #[must_use]
    pub fn parent_frame(&self) -> Option<&str> {
        self.parent_frame_id
            .as_deref()
            .filter(|id| !id.is_empty())
    }

    /// `(from, to)` endpoint ids for connectors; `None` for every other kind.
    #[must_use]
    pub fn endpoints(&self) -> Option<(Option<&str>, Option<&str>)> {
        match &self.geometry {
            Geometry::Connector { from_object_id, to_object_id, .. } => Some((
                from_object_id.as_deref().filter(|id| !id.is_empty()),
                to_object_id.as_deref().filter(|id| !id.is_empty()),
            )),
            Geometry::StickyNote { .. }
            | Geometry::Rectangle { .. }
            | Geometry::Circle { .. }
            | Geometry::Text { .. }
            | Geometry::Frame { .. }
            | Geometry::Line { .. } => None,
        }
    }
}

fn non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(|v| v.filter(|s| !s.is_empty()))
}

// =============================================================================
// OBJECT PATCH
// =============================================================================

/// Sparse update for a board object. Only present fields are applied.
///
/// For `parent_frame_id`, `from_object_id` and `to_object_id` an empty string
/// clears the relationship, matching the wire convention.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_fill: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_frame_id: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_object_id: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_object_id: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_anchor: Option<AnchorSide>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_anchor: Option<AnchorSide>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
}

macro_rules! overlay {
    ($dst:expr, $src:expr; $($field:ident),+ $(,)?) => {
        $(
            if $src.$field.is_some() {
                $dst.$field = $src.$field;
            }
        )+
    };
}

impl ObjectPatch {
    #[must_use]
    pub fn position(x: f64, y: f64) -> Self {
        Self { x: Some(x), y: Some(y), ..Self::default() }
    }

    /// Patch that sets (or with `None`, clears) the containing frame.
    #[must_use]
    pub fn reparent(parent: Option<&str>) -> Self {
        Self { parent_frame_id: Some(parent.unwrap_or_default().to_owned()), ..Self::default() }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// True if applying this patch can change relationship indices.
    #[must_use]
    pub fn touches_relationships(&self) -> bool {
        self.parent_frame_id.is_some() || self.from_object_id.is_some() || self.to_object_id.is_some()
    }

    /// Coalesce a newer patch into this one; the newer value wins per field.
    pub fn merge(&mut self, newer: Self) {
        overlay!(self, newer;
            x, y, width, height, rotation, points,
            fill, stroke, stroke_width, opacity, font_size, text, text_fill,
            parent_frame_id, from_object_id, to_object_id, from_anchor, to_anchor,
            updated_at,
        );
    }

    /// Apply present fields to `obj`. Fields that do not exist on the
    /// object's kind are ignored.
    pub fn apply_to(&self, obj: &mut BoardObject) {
        if let Some(x) = self.x {
            obj.x = x;
        }
        if let Some(y) = self.y {
            obj.y = y;
        }
        if let Some(r) = self.rotation {
            obj.rotation = r;
        }
        if let Some(ref parent) = self.parent_frame_id {
            obj.parent_frame_id = (!parent.is_empty()).then(|| parent.clone());
        }
        if let Some(ts) = self.updated_at {
            obj.updated_at = Some(ts);
        }

        let style = &mut obj.style;
        if let Some(ref fill) = self.fill {
            style.fill = Some(fill.clone());
        }
        if let Some(ref stroke) = self.stroke {
            style.stroke = Some(stroke.clone());
        }
        if let Some(w) = self.stroke_width {
            style.stroke_width = Some(w);
        }
        if let Some(o) = self.opacity {
            style.opacity = Some(o);
        }
        if let Some(size) = self.font_size {
            style.font_size = Some(size);
        }
        if let Some(ref text) = self.text {
            style.text = Some(text.clone());
        }
        if let Some(ref fill) = self.text_fill {
            style.text_fill = Some(fill.clone());
        }

        match &mut obj.geometry {
            Geometry::StickyNote { width, height }
            | Geometry::Rectangle { width, height }
            | Geometry::Circle { width, height }
            | Geometry::Text { width, height }
            | Geometry::Frame { width, height } => {
                if let Some(w) = self.width {
                    *width = w;
                }
                if let Some(h) = self.height {
                    *height = h;
                }
            }
            Geometry::Line { points } => {
                if let Some(ref p) = self.points {
                    points.clone_from(p);
                }
            }
            Geometry::Connector { points, from_object_id, to_object_id, from_anchor, to_anchor } => {
                if let Some(ref p) = self.points {
                    points.clone_from(p);
                }
                if let Some(ref from) = self.from_object_id {
                    *from_object_id = (!from.is_empty()).then(|| from.clone());
                }
                if let Some(ref to) = self.to_object_id {
                    *to_object_id = (!to.is_empty()).then(|| to.clone());
                }
                if let Some(anchor) = self.from_anchor {
                    *from_anchor = Some(anchor);
                }
                if let Some(anchor) = self.to_anchor {
                    *to_anchor = Some(anchor);
                }
            }
        }
    }
}
