//! Sticky notes placed on a canvas.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityKind, Patch, Scope, Toggled, created_then_id};
use crate::model::record_columns;
use crate::policy::SortPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub owner_id: String,
    pub canvas_id: String,
    #[serde(default)]
    pub group_id: Option<String>,
    pub content: String,
    /// Canvas coordinates in whole pixels.
    pub x: i32,
    pub y: i32,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub pinned: bool,
    /// Stacking order; higher is drawn on top.
    #[serde(default)]
    pub z: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteDraft {
    pub canvas_id: String,
    pub group_id: Option<String>,
    pub content: String,
    pub x: i32,
    pub y: i32,
    pub color: Option<String>,
}

impl NoteDraft {
    pub fn new(canvas_id: impl Into<String>, content: impl Into<String>, x: i32, y: i32) -> Self {
        Self {
            canvas_id: canvas_id.into(),
            group_id: None,
            content: content.into(),
            x,
            y,
            color: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NotePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z: Option<i64>,
}

impl NotePatch {
    #[must_use]
    pub fn moved_to(x: i32, y: i32) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            ..Self::default()
        }
    }
}

impl Patch<Note> for NotePatch {
    fn apply(&self, note: &mut Note) {
        if let Some(content) = &self.content {
            note.content.clone_from(content);
        }
        if let Some(group_id) = &self.group_id {
            note.group_id.clone_from(group_id);
        }
        if let Some(x) = self.x {
            note.x = x;
        }
        if let Some(y) = self.y {
            note.y = y;
        }
        if let Some(color) = &self.color {
            note.color.clone_from(color);
        }
        if let Some(pinned) = self.pinned {
            note.pinned = pinned;
        }
        if let Some(z) = self.z {
            note.z = z;
        }
    }

    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Notes of one canvas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanvasScope {
    pub canvas_id: String,
}

impl CanvasScope {
    pub fn new(canvas_id: impl Into<String>) -> Self {
        Self {
            canvas_id: canvas_id.into(),
        }
    }
}

impl Scope<Note> for CanvasScope {
    fn contains(&self, note: &Note) -> bool {
        note.canvas_id == self.canvas_id
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoteOrder;

impl SortPolicy<Note> for NoteOrder {
    fn compare(&self, a: &Note, b: &Note) -> Ordering {
        b.pinned
            .cmp(&a.pinned)
            .then_with(|| a.z.cmp(&b.z))
            .then_with(|| created_then_id(a, b))
    }
}

impl Entity for Note {
    type Scope = CanvasScope;
    type Patch = NotePatch;
    type Draft = NoteDraft;
    type Order = NoteOrder;

    const KIND: EntityKind = EntityKind::Note;
    const ORDERED: bool = true;

    fn from_draft(draft: NoteDraft, id: String, owner_id: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            owner_id,
            canvas_id: draft.canvas_id,
            group_id: draft.group_id,
            content: draft.content,
            x: draft.x,
            y: draft.y,
            color: draft.color,
            pinned: false,
            z: 0,
            created_at: now,
            updated_at: now,
        }
    }

    record_columns!();

    fn position(&self) -> Option<i64> {
        Some(self.z)
    }

    fn set_position(&mut self, position: i64) {
        self.z = position;
    }

    fn same_logical(&self, other: &Self) -> bool {
        self.owner_id == other.owner_id
            && self.canvas_id == other.canvas_id
            && self.content == other.content
            && self.x == other.x
            && self.y == other.y
    }

    fn toggled(&self) -> Toggled<NotePatch> {
        Toggled {
            patch: NotePatch {
                pinned: Some(!self.pinned),
                ..NotePatch::default()
            },
            now_on: !self.pinned,
        }
    }
}
