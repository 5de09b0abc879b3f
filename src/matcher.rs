//! Selector matching over a flat `ParsedElement` list.

use regex::RegexBuilder;

use crate::hierarchy::ParsedElement;
use crate::selector::{Selector, SpatialKind, TriState};

/// `true` iff `pattern` should be treated as a regular expression rather
/// than a literal substring:
/// - always-regex metacharacters: `* + ? [ ] { } | ( )`, plus `^` at the
///   very start and `$` at the very end.
/// - a `.` is regex-triggering only when immediately followed by `* + ?`.
/// - any character preceded by an unescaped `\` does not itself count.
pub fn looks_like_regex(pattern: &str) -> bool {
    let chars: Vec<char> = pattern.chars().collect();
    let mut escaped = false;
    for (i, &c) in chars.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        if c == '\\' {
            escaped = true;
            continue;
        }
        match c {
            '*' | '+' | '?' | '[' | ']' | '{' | '}' | '|' | '(' | ')' => return true,
            '^' if i == 0 => return true,
            '$' if i == chars.len() - 1 => return true,
            '.' => {
                if let Some(&next) = chars.get(i + 1) {
                    if matches!(next, '*' | '+' | '?') {
                        return true;
                    }
                }
            }
            _ => {}
        }
    }
    false
}

fn whitespace_normalize(s: &str) -> String {
    s.chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}

/// Evaluate the textual matching rule against one candidate field.
fn text_field_matches(field: &str, pattern: &str) -> bool {
    if looks_like_regex(pattern) {
        match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(re) => re.is_match(field) || re.is_match(&whitespace_normalize(field)),
            // An invalid regex degrades to case-insensitive substring containment.
            Err(_) => field.to_lowercase().contains(&pattern.to_lowercase()),
        }
    } else {
        field.to_lowercase().contains(&pattern.to_lowercase())
    }
}

fn matches_text(el: &ParsedElement, pattern: &str) -> bool {
    el.text_fields().iter().any(|f| text_field_matches(f, pattern))
}

fn matches_size(el: &ParsedElement, width: Option<i32>, height: Option<i32>, tolerance: i32) -> bool {
    if let Some(w) = width {
        if (el.bounds.width - w).abs() > tolerance {
            return false;
        }
    }
    if let Some(h) = height {
        if (el.bounds.height - h).abs() > tolerance {
            return false;
        }
    }
    true
}

fn matches_tri(actual: bool, expected: TriState) -> bool {
    expected.map_or(true, |want| want == actual)
}

fn matches_state(el: &ParsedElement, sel: &Selector) -> bool {
    matches_tri(el.enabled, sel.enabled)
        && matches_tri(el.selected, sel.selected)
        && matches_tri(el.focused, sel.focused)
        // `checked` maps onto the element's `selected` flag — preserved
        // deliberately, not a bug. See DESIGN.md.
        && matches_tri(el.selected, sel.checked)
}

fn matches_id(el: &ParsedElement, pattern: &str) -> bool {
    el.id_field().to_lowercase().contains(&pattern.to_lowercase())
}

/// Non-spatial, non-descendant filters: text, id, size, state. Used both for
/// the initial candidate set and recursively for anchor resolution.
pub fn matches_base(el: &ParsedElement, sel: &Selector) -> bool {
    if let Some(text) = &sel.text {
        if !matches_text(el, text) {
            return false;
        }
    }
    if let Some(id) = &sel.id {
        if !matches_id(el, id) {
            return false;
        }
    }
    if !matches_size(el, sel.width, sel.height, sel.tolerance) {
        return false;
    }
    if !matches_state(el, sel) {
        return false;
    }
    true
}

/// Apply one spatial predicate against an anchor element, returning the
/// filtered and ordered candidate index list.
pub fn filter_spatial(
    elements: &[ParsedElement],
    candidates: &[usize],
    kind: SpatialKind,
    anchor: &ParsedElement,
) -> Vec<usize> {
    let a = anchor.bounds;
    let mut kept: Vec<(usize, i32)> = candidates
        .iter()
        .filter_map(|&idx| {
            let c = &elements[idx].bounds;
            match kind {
                SpatialKind::Below if c.top() >= a.bottom() => {
                    Some((idx, c.dist_below(a.bottom())))
                }
                SpatialKind::Above if c.bottom() <= a.top() => {
                    Some((idx, c.dist_above(a.top())))
                }
                SpatialKind::LeftOf if c.right() <= a.left() => {
                    Some((idx, c.dist_left_of(a.left())))
                }
                SpatialKind::RightOf if c.left() >= a.right() => {
                    Some((idx, c.dist_right_of(a.right())))
                }
                SpatialKind::ChildOf if a.contains_rect(c) => Some((idx, 0)),
                SpatialKind::ContainsChild if c.contains_rect(&a) => Some((idx, 0)),
                SpatialKind::InsideOf if elements[idx].bounds.center_within(&a) => Some((idx, 0)),
                _ => None,
            }
        })
        .collect();

    match kind {
        SpatialKind::Below | SpatialKind::Above | SpatialKind::LeftOf | SpatialKind::RightOf => {
            kept.sort_by_key(|&(_, dist)| dist);
        }
        _ => {}
    }
    kept.into_iter().map(|(idx, _)| idx).collect()
}

/// `containsDescendants`: iff for every inner selector there exists some
/// descendant (bounds wholly inside the candidate) matching it.
pub fn matches_descendants(
    elements: &[ParsedElement],
    candidate_idx: usize,
    inner_selectors: &[Selector],
) -> bool {
    if inner_selectors.is_empty() {
        return true;
    }
    let candidate_bounds = elements[candidate_idx].bounds;
    inner_selectors.iter().all(|inner| {
        elements.iter().enumerate().any(|(idx, el)| {
            idx != candidate_idx
                && candidate_bounds.contains_rect(&el.bounds)
                && matches_base(el, inner)
        })
    })
}

/// Reorder so clickable elements come first (stable), then pick by `index`
/// or the deepest candidate within the highest-priority group.
pub fn select_after_filtering<'a>(
    elements: &'a [ParsedElement],
    mut candidates: Vec<usize>,
    index: Option<&str>,
) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }
    candidates.sort_by_key(|&idx| !elements[idx].clickable);

    if let Some(index) = index {
        let pos = crate::selector::resolve_index(index, candidates.len());
        return Some(candidates[pos]);
    }

    let clickable_end = candidates.partition_point(|&idx| elements[idx].clickable);
    let group = if clickable_end > 0 {
        &candidates[..clickable_end]
    } else {
        &candidates[..]
    };
    group.iter().copied().max_by_key(|&idx| elements[idx].depth)
}

/// Walk `parent` from `start` until a clickable ancestor is found. Returns
/// `start` itself if none exists.
pub fn promote_to_clickable_ancestor(elements: &[ParsedElement], start: usize) -> usize {
    let mut current = start;
    loop {
        if elements[current].clickable {
            return current;
        }
        match elements[current].parent {
            Some(parent) => current = parent,
            None => return start,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Bounds;
    use crate::hierarchy::Platform;

    fn el(platform: Platform) -> ParsedElement {
        // Mirrors ParsedElement::new but exercised through the public API
        // via parse_page_source in hierarchy tests; here we build directly
        // for matcher-only unit tests.
        let mut e = crate::hierarchy::parse_page_source(match platform {
            Platform::Android => r#"<hierarchy><node bounds="[0,0][10,10]" /></hierarchy>"#,
            Platform::Ios => r#"<AppiumAUT><XCUIElementTypeOther x="0" y="0" width="10" height="10" /></AppiumAUT>"#,
        })
        .unwrap();
        e.remove(0)
    }

    #[test]
    fn looks_like_regex_examples_from_spec() {
        assert!(!looks_like_regex("mastodon.social"));
        assert!(looks_like_regex("hello.*world"));
        assert!(looks_like_regex("^start"));
        assert!(looks_like_regex("end$"));
        assert!(!looks_like_regex(r"\*"));
        assert!(!looks_like_regex("v1.2.3"));
        assert!(!looks_like_regex("user@example.com"));
    }

    #[test]
    fn regex_text_matches_email_like_pattern() {
        let mut e = el(Platform::Android);
        e.text = "user@example.com".to_string();
        assert!(matches_text(&e, ".+@.+"));

        let mut e2 = el(Platform::Android);
        e2.text = "noatsign".to_string();
        assert!(!matches_text(&e2, ".+@.+"));
    }

    #[test]
    fn literal_text_matches_by_substring_not_regex() {
        let mut e = el(Platform::Android);
        e.text = "Join mastodon.social".to_string();
        assert!(matches_text(&e, "mastodon.social"));
    }

    #[test]
    fn invalid_regex_degrades_to_substring() {
        let mut e = el(Platform::Android);
        e.text = "has [brackets] text".to_string();
        // "[" alone is an unterminated character class -> invalid regex.
        assert!(matches_text(&e, "[brackets"));
    }

    #[test]
    fn size_gate_respects_symmetric_tolerance() {
        let mut e = el(Platform::Android);
        e.bounds = Bounds::new(0, 0, 100, 50);
        assert!(matches_size(&e, Some(103), None, 5));
        assert!(!matches_size(&e, Some(110), None, 5));
    }

    #[test]
    fn checked_filter_maps_to_selected_flag() {
        let mut e = el(Platform::Android);
        e.selected = true;
        let sel = Selector {
            checked: Some(true),
            ..Default::default()
        };
        assert!(matches_state(&e, &sel));
    }

    #[test]
    fn spatial_below_excludes_overlap_and_orders_by_distance() {
        let anchor = {
            let mut a = el(Platform::Android);
            a.bounds = Bounds::new(100, 100, 200, 50); // bottom = 150
            a
        };
        let mut far = el(Platform::Android);
        far.bounds = Bounds::new(100, 200, 200, 40);
        let mut near = el(Platform::Android);
        near.bounds = Bounds::new(100, 150, 200, 40);
        let mut overlapping = el(Platform::Android);
        overlapping.bounds = Bounds::new(100, 140, 200, 40);

        let elements = vec![far.clone(), near.clone(), overlapping.clone()];
        let candidates = vec![0, 1, 2];
        let kept = filter_spatial(&elements, &candidates, SpatialKind::Below, &anchor);
        assert_eq!(kept, vec![1, 0]);
    }

    #[test]
    fn spatial_above_excludes_overlap() {
        let anchor = {
            let mut a = el(Platform::Android);
            a.bounds = Bounds::new(100, 100, 200, 50);
            a
        };
        let mut candidate = el(Platform::Android);
        candidate.bounds = Bounds::new(100, 160, 200, 40);
        let elements = vec![candidate];
        let kept = filter_spatial(&elements, &[0], SpatialKind::Above, &anchor);
        assert!(kept.is_empty());
    }

    #[test]
    fn select_after_filtering_prefers_clickable_then_deepest() {
        let mut shallow_clickable = el(Platform::Android);
        shallow_clickable.depth = 1;
        shallow_clickable.clickable = true;
        let mut deep_not_clickable = el(Platform::Android);
        deep_not_clickable.depth = 5;
        deep_not_clickable.clickable = false;

        let elements = vec![deep_not_clickable, shallow_clickable];
        let picked = select_after_filtering(&elements, vec![0, 1], None);
        assert_eq!(picked, Some(1));
    }

    #[test]
    fn select_after_filtering_honors_explicit_index() {
        let a = el(Platform::Android);
        let b = el(Platform::Android);
        let elements = vec![a, b];
        let picked = select_after_filtering(&elements, vec![0, 1], Some("-1"));
        assert_eq!(picked, Some(1));
    }

    #[test]
    fn clickable_ancestor_promotion_walks_up() {
        let mut container = el(Platform::Android);
        container.clickable = true;
        container.parent = None;
        let mut text = el(Platform::Android);
        text.clickable = false;
        text.parent = Some(0);

        let elements = vec![container, text];
        assert_eq!(promote_to_clickable_ancestor(&elements, 1), 0);
    }

    #[test]
    fn no_clickable_ancestor_returns_original() {
        let mut only = el(Platform::Android);
        only.clickable = false;
        only.parent = None;
        let elements = vec![only];
        assert_eq!(promote_to_clickable_ancestor(&elements, 0), 0);
    }
}
