//! The `Selector` query form used to locate a UI element.

use serde::{Deserialize, Serialize};

/// A tri-state filter: unspecified, must-be-true, or must-be-false.
pub type TriState = Option<bool>;

/// The declarative query used to locate a UI element.
///
/// A selector with no textual, id, size, state, spatial, or descendant
/// constraint is ill-formed — see [`Selector::is_well_formed`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Selector {
    // Textual
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub id: Option<String>,

    // Size gate
    #[serde(default)]
    pub width: Option<i32>,
    #[serde(default)]
    pub height: Option<i32>,
    #[serde(default = "default_tolerance")]
    pub tolerance: i32,

    // State
    #[serde(default)]
    pub enabled: TriState,
    #[serde(default)]
    pub selected: TriState,
    #[serde(default)]
    pub focused: TriState,
    #[serde(default)]
    pub checked: TriState,

    // Spatial anchors (recursive)
    #[serde(default)]
    pub below: Option<Box<Selector>>,
    #[serde(default)]
    pub above: Option<Box<Selector>>,
    #[serde(default)]
    pub left_of: Option<Box<Selector>>,
    #[serde(default)]
    pub right_of: Option<Box<Selector>>,
    #[serde(default)]
    pub child_of: Option<Box<Selector>>,
    #[serde(default)]
    pub contains_child: Option<Box<Selector>>,
    #[serde(default)]
    pub inside_of: Option<Box<Selector>>,

    // Descendant predicate
    #[serde(default)]
    pub contains_descendants: Vec<Selector>,

    // Disambiguation
    #[serde(default)]
    pub index: Option<String>,

    // Raw escape hatch — bypasses the resolver entirely.
    #[serde(default)]
    pub css: Option<String>,
}

fn default_tolerance() -> i32 {
    5
}

impl Selector {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    /// `true` iff at least one constraint is present. Ill-formed selectors
    /// (no constraint at all) MUST be rejected before dispatch.
    pub fn is_well_formed(&self) -> bool {
        self.text.is_some()
            || self.id.is_some()
            || self.width.is_some()
            || self.height.is_some()
            || self.enabled.is_some()
            || self.selected.is_some()
            || self.focused.is_some()
            || self.checked.is_some()
            || self.below.is_some()
            || self.above.is_some()
            || self.left_of.is_some()
            || self.right_of.is_some()
            || self.child_of.is_some()
            || self.contains_child.is_some()
            || self.inside_of.is_some()
            || !self.contains_descendants.is_empty()
            || self.css.is_some()
    }

    /// `true` iff this selector carries any spatial anchor or descendant
    /// predicate — it must be resolved via the relative-resolution path
    /// rather than the native fast path.
    pub fn has_relative_constraint(&self) -> bool {
        self.below.is_some()
            || self.above.is_some()
            || self.left_of.is_some()
            || self.right_of.is_some()
            || self.child_of.is_some()
            || self.contains_child.is_some()
            || self.inside_of.is_some()
            || !self.contains_descendants.is_empty()
    }

    /// Iterate the spatial anchors in the fixed priority order used by
    /// relative resolution: the first anchor whose filter yields a
    /// non-empty candidate set wins.
    pub fn spatial_anchors(&self) -> Vec<(SpatialKind, &Selector)> {
        let mut out = Vec::new();
        if let Some(a) = &self.below {
            out.push((SpatialKind::Below, a.as_ref()));
        }
        if let Some(a) = &self.above {
            out.push((SpatialKind::Above, a.as_ref()));
        }
        if let Some(a) = &self.left_of {
            out.push((SpatialKind::LeftOf, a.as_ref()));
        }
        if let Some(a) = &self.right_of {
            out.push((SpatialKind::RightOf, a.as_ref()));
        }
        if let Some(a) = &self.child_of {
            out.push((SpatialKind::ChildOf, a.as_ref()));
        }
        if let Some(a) = &self.contains_child {
            out.push((SpatialKind::ContainsChild, a.as_ref()));
        }
        if let Some(a) = &self.inside_of {
            out.push((SpatialKind::InsideOf, a.as_ref()));
        }
        out
    }

    /// The base selector narrowed to its non-spatial constraints — used to
    /// build the initial candidate set before anchor filtering.
    pub fn without_spatial(&self) -> Selector {
        Selector {
            text: self.text.clone(),
            id: self.id.clone(),
            width: self.width,
            height: self.height,
            tolerance: self.tolerance,
            enabled: self.enabled,
            selected: self.selected,
            focused: self.focused,
            checked: self.checked,
            below: None,
            above: None,
            left_of: None,
            right_of: None,
            child_of: None,
            contains_child: None,
            inside_of: None,
            contains_descendants: Vec::new(),
            index: self.index.clone(),
            css: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialKind {
    Below,
    Above,
    LeftOf,
    RightOf,
    ChildOf,
    ContainsChild,
    InsideOf,
}

/// Parse `index` (signed integer, negative counts from end) against a
/// candidate-list length. Out-of-range clamps to 0.
pub fn resolve_index(index: &str, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    let parsed: i64 = index.trim().parse().unwrap_or(0);
    let resolved = if parsed < 0 { len as i64 + parsed } else { parsed };
    if resolved < 0 || resolved >= len as i64 {
        0
    } else {
        resolved as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_selector_is_ill_formed() {
        assert!(!Selector::default().is_well_formed());
    }

    #[test]
    fn text_only_selector_is_well_formed() {
        assert!(Selector::text("Login").is_well_formed());
    }

    #[test]
    fn resolve_index_handles_negative_and_out_of_range() {
        assert_eq!(resolve_index("0", 5), 0);
        assert_eq!(resolve_index("-1", 5), 4);
        assert_eq!(resolve_index("-5", 5), 0);
        assert_eq!(resolve_index("100", 5), 0);
        assert_eq!(resolve_index("-100", 5), 0);
        assert_eq!(resolve_index("2", 5), 2);
    }

    #[test]
    fn resolve_index_on_empty_list_is_zero() {
        assert_eq!(resolve_index("3", 0), 0);
    }

    #[test]
    fn has_relative_constraint_detects_descendants() {
        let mut sel = Selector::text("Card");
        assert!(!sel.has_relative_constraint());
        sel.contains_descendants.push(Selector::text("Title"));
        assert!(sel.has_relative_constraint());
    }
}
