use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityKind, Patch, Scope, Toggled, created_then_id};
use crate::model::note::CanvasScope;
use crate::model::record_columns;
use crate::policy::SortPolicy;

/// A labelled frame grouping notes on a canvas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasGroup {
    pub id: String,
    pub owner_id: String,
    pub canvas_id: String,
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub collapsed: bool,
    #[serde(default)]
    pub position: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanvasGroupDraft {
    pub canvas_id: String,
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CanvasGroupPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collapsed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
}

impl Patch<CanvasGroup> for CanvasGroupPatch {
    fn apply(&self, group: &mut CanvasGroup) {
        if let Some(name) = &self.name {
            group.name.clone_from(name);
        }
        if let Some(x) = self.x {
            group.x = x;
        }
        if let Some(y) = self.y {
            group.y = y;
        }
        if let Some(width) = self.width {
            group.width = width;
        }
        if let Some(height) = self.height {
            group.height = height;
        }
        if let Some(color) = &self.color {
            group.color.clone_from(color);
        }
        if let Some(collapsed) = self.collapsed {
            group.collapsed = collapsed;
        }
        if let Some(position) = self.position {
            group.position = position;
        }
    }

    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl Scope<CanvasGroup> for CanvasScope {
    fn contains(&self, group: &CanvasGroup) -> bool {
        group.canvas_id == self.canvas_id
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CanvasGroupOrder;

impl SortPolicy<CanvasGroup> for CanvasGroupOrder {
    fn compare(&self, a: &CanvasGroup, b: &CanvasGroup) -> Ordering {
        a.position
            .cmp(&b.position)
            .then_with(|| created_then_id(a, b))
    }
}

impl Entity for CanvasGroup {
    type Scope = CanvasScope;
    type Patch = CanvasGroupPatch;
    type Draft = CanvasGroupDraft;
    type Order = CanvasGroupOrder;

    const KIND: EntityKind = EntityKind::CanvasGroup;
    const ORDERED: bool = true;

    fn from_draft(draft: CanvasGroupDraft, id: String, owner_id: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            owner_id,
            canvas_id: draft.canvas_id,
            name: draft.name,
            x: draft.x,
            y: draft.y,
            width: draft.width,
            height: draft.height,
            color: None,
            collapsed: false,
            position: 0,
            created_at: now,
            updated_at: now,
        }
    }

    record_columns!();

    fn position(&self) -> Option<i64> {
        Some(self.position)
    }

    fn set_position(&mut self, position: i64) {
        self.position = position;
    }

    fn same_logical(&self, other: &Self) -> bool {
        self.owner_id == other.owner_id && self.canvas_id == other.canvas_id && self.name == other.name
    }

    fn toggled(&self) -> Toggled<CanvasGroupPatch> {
        Toggled {
            patch: CanvasGroupPatch {
                collapsed: Some(!self.collapsed),
                ..CanvasGroupPatch::default()
            },
            now_on: !self.collapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::at;

    #[test]
    fn collapse_toggle_round_trips() {
        let draft = CanvasGroupDraft {
            canvas_id: "cv-1".to_string(),
            name: "Ideas".to_string(),
            x: 0,
            y: 0,
            width: 300,
            height: 200,
        };
        let mut group = CanvasGroup::from_draft(draft, "grp-1".to_string(), "u1".to_string(), at(0));
        let first = group.toggled();
        first.patch.apply(&mut group);
        assert!(group.collapsed);
        let second = group.toggled();
        assert!(!second.now_on);
        second.patch.apply(&mut group);
        assert!(!group.collapsed);
    }

    #[test]
    fn scope_is_per_canvas() {
        let draft = CanvasGroupDraft {
            canvas_id: "cv-2".to_string(),
            name: "Later".to_string(),
            x: 10,
            y: 10,
            width: 100,
            height: 100,
        };
        let group = CanvasGroup::from_draft(draft, "grp-1".to_string(), "u1".to_string(), at(0));
        assert!(CanvasScope::new("cv-2").contains(&group));
        assert!(!CanvasScope::new("cv-1").contains(&group));
    }
}
