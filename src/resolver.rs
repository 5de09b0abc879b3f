//! The Element Resolver — the hardest subsystem: it composes a native fast
//! path against the automation server with a client-side page-source
//! fallback, polling under a caller-supplied deadline.

use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FlowError;
use crate::geometry::Bounds;
use crate::hierarchy::{self, ParsedElement, Platform};
use crate::matcher::{filter_spatial, matches_base, matches_descendants, promote_to_clickable_ancestor, select_after_filtering};
use crate::selector::Selector;

/// The resolver's output: everything downstream (executor, reporting) needs
/// to act on or describe the element, independent of platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElementInfo {
    pub id: Option<String>,
    pub text: String,
    pub bounds: Bounds,
    pub visible: bool,
    pub enabled: bool,
    pub focused: bool,
    pub checked: bool,
    pub selected: bool,
    pub class: String,
    pub accessibility_label: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// The collaborator the resolver queries: a live session against the
/// automation server. Abstracted behind a trait so the resolution algorithm
/// can be unit-tested without a device.
#[async_trait]
pub trait ElementSource: Send + Sync {
    fn platform(&self) -> Platform;

    /// Issue a `POST /session/{id}/element` with `{using, value}`. `Ok(None)`
    /// means "no such element" (a normal miss, not a failure); `Err`
    /// propagates transport/connection failures.
    async fn find_native(&self, using: &str, value: &str) -> Result<Option<ElementInfo>, FlowError>;

    /// Fetch the current full page source (`GET /session/{id}/source`).
    async fn page_source(&self) -> Result<String, FlowError>;
}

fn escape_literal(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn id_locators(platform: Platform, id: &str) -> Vec<(&'static str, String)> {
    let escaped = escape_literal(id);
    match platform {
        Platform::Android => vec![
            (
                "-android uiautomator",
                format!("new UiSelector().resourceIdMatches(\".*{}.*\")", escaped),
            ),
            ("id", id.to_string()),
        ],
        Platform::Ios => vec![("accessibility id", id.to_string())],
    }
}

fn text_locators(platform: Platform, text: &str) -> Vec<(&'static str, String)> {
    let escaped = escape_literal(text);
    match platform {
        Platform::Android => vec![
            ("-android uiautomator", format!("new UiSelector().text(\"{}\")", escaped)),
            (
                "-android uiautomator",
                format!("new UiSelector().textContains(\"{}\")", escaped),
            ),
            (
                "-android uiautomator",
                format!("new UiSelector().description(\"{}\")", escaped),
            ),
            (
                "-android uiautomator",
                format!("new UiSelector().descriptionContains(\"{}\")", escaped),
            ),
        ],
        Platform::Ios => vec![(
            "-ios predicate string",
            format!("label CONTAINS[c] \"{}\" OR name CONTAINS[c] \"{}\"", escaped, escaped),
        )],
    }
}

fn android_text_clickable_locators(text: &str) -> Vec<(&'static str, String)> {
    let escaped = escape_literal(text);
    vec![
        (
            "-android uiautomator",
            format!("new UiSelector().textContains(\"{}\").clickable(true)", escaped),
        ),
        (
            "-android uiautomator",
            format!("new UiSelector().descriptionContains(\"{}\").clickable(true)", escaped),
        ),
    ]
}

enum NativeOutcome {
    Found(ElementInfo),
    /// The text exists somewhere, but not on a clickable element — fall
    /// back to the page-source path for clickable-ancestor promotion.
    ExistsButNotClickable,
    NotFound,
}

async fn native_attempt(
    source: &dyn ElementSource,
    selector: &Selector,
    tap_variant: bool,
) -> Result<NativeOutcome, FlowError> {
    let platform = source.platform();

    if let Some(id) = &selector.id {
        for (using, value) in id_locators(platform, id) {
            if let Some(info) = source.find_native(using, &value).await? {
                return Ok(NativeOutcome::Found(info));
            }
        }
    }

    if let Some(text) = &selector.text {
        if platform == Platform::Android && tap_variant {
            for (using, value) in android_text_clickable_locators(text) {
                if let Some(info) = source.find_native(using, &value).await? {
                    return Ok(NativeOutcome::Found(info));
                }
            }
            let mut exists = false;
            for (using, value) in text_locators(platform, text) {
                if source.find_native(using, &value).await?.is_some() {
                    exists = true;
                    break;
                }
            }
            return Ok(if exists {
                NativeOutcome::ExistsButNotClickable
            } else {
                NativeOutcome::NotFound
            });
        }

        for (using, value) in text_locators(platform, text) {
            if let Some(info) = source.find_native(using, &value).await? {
                return Ok(NativeOutcome::Found(info));
            }
        }
    }

    Ok(NativeOutcome::NotFound)
}

fn element_info_from_parsed(elements: &[ParsedElement], idx: usize) -> ElementInfo {
    let el = &elements[idx];
    let (text, class, accessibility_label) = match el.platform {
        Platform::Android => (
            if !el.text.is_empty() { el.text.clone() } else { el.content_desc.clone() },
            el.class_name.clone(),
            el.content_desc.clone(),
        ),
        Platform::Ios => (
            if !el.label.is_empty() { el.label.clone() } else { el.name.clone() },
            el.element_type.clone(),
            el.label.clone(),
        ),
    };
    ElementInfo {
        id: None,
        text,
        bounds: el.bounds,
        visible: el.displayed,
        enabled: el.enabled,
        focused: el.focused,
        // `checked` preserved as a mirror of `selected`. See DESIGN.md.
        checked: el.selected,
        selected: el.selected,
        class,
        accessibility_label,
        attributes: BTreeMap::new(),
    }
}

/// Build an `ElementInfo` for `matched_idx`, substituting the promoted
/// clickable ancestor's bounds while preserving the matched element's own
/// text/class/id.
fn element_info_with_promotion(elements: &[ParsedElement], matched_idx: usize) -> ElementInfo {
    let promoted_idx = promote_to_clickable_ancestor(elements, matched_idx);
    let mut info = element_info_from_parsed(elements, matched_idx);
    info.bounds = elements[promoted_idx].bounds;
    info
}

/// Resolve `selector` against an already-fetched, already-parsed element
/// list. Recurses for nested spatial anchors — arbitrary nesting depth
/// falls out naturally from recursion.
fn resolve_against_elements(elements: &[ParsedElement], selector: &Selector) -> Option<usize> {
    let base = selector.without_spatial();
    let mut candidates: Vec<usize> = (0..elements.len())
        .filter(|&i| matches_base(&elements[i], &base))
        .collect();

    let anchors = selector.spatial_anchors();
    if !anchors.is_empty() {
        let mut winner = None;
        for (kind, anchor_selector) in &anchors {
            if let Some(anchor_idx) = resolve_against_elements(elements, anchor_selector) {
                let filtered = filter_spatial(elements, &candidates, *kind, &elements[anchor_idx]);
                if !filtered.is_empty() {
                    winner = Some(filtered);
                    break;
                }
            }
        }
        candidates = winner?;
    }

    if !selector.contains_descendants.is_empty() {
        candidates.retain(|&idx| matches_descendants(elements, idx, &selector.contains_descendants));
    }

    select_after_filtering(elements, candidates, selector.index.as_deref())
}

async fn find_relative(
    source: &dyn ElementSource,
    selector: &Selector,
    deadline: Instant,
) -> Result<ElementInfo, FlowError> {
    loop {
        let xml = source.page_source().await?;
        let elements = hierarchy::parse_page_source(&xml)
            .map_err(|e| FlowError::invalid_config(e.to_string()))?;
        if let Some(idx) = resolve_against_elements(&elements, selector) {
            return Ok(element_info_with_promotion(&elements, idx));
        }
        if Instant::now() >= deadline {
            return Err(FlowError::element_not_found("anchor element not found")
                .with_detail("selector", "relative"));
        }
    }
}

async fn find_via_page_source_once(
    source: &dyn ElementSource,
    selector: &Selector,
) -> Result<Option<ElementInfo>, FlowError> {
    let xml = source.page_source().await?;
    let elements = hierarchy::parse_page_source(&xml)
        .map_err(|e| FlowError::invalid_config(e.to_string()))?;
    let candidates: Vec<usize> = (0..elements.len())
        .filter(|&i| matches_base(&elements[i], selector))
        .collect();
    let picked = select_after_filtering(&elements, candidates, selector.index.as_deref());
    Ok(picked.map(|idx| element_info_with_promotion(&elements, idx)))
}

/// Entry point: `find(selector, deadline)`. `tap_variant` requests the
/// clickable-first Android text strategy used by tap/double-tap/long-press.
pub async fn find(
    source: &dyn ElementSource,
    selector: &Selector,
    deadline: Instant,
    tap_variant: bool,
) -> Result<ElementInfo, FlowError> {
    if !selector.is_well_formed() {
        return Err(FlowError::invalid_config("selector has no text/id/size/state/spatial/descendant constraint"));
    }

    if selector.has_relative_constraint() {
        return find_relative(source, selector, deadline).await;
    }

    if let Some(css) = &selector.css {
        loop {
            if let Some(info) = source.find_native("css selector", css).await? {
                return Ok(info);
            }
            if Instant::now() >= deadline {
                return Err(FlowError::element_not_found(format!("no element matched css {}", css)));
            }
        }
    }

    loop {
        match native_attempt(source, selector, tap_variant).await? {
            NativeOutcome::Found(info) => return Ok(info),
            NativeOutcome::ExistsButNotClickable => {
                if let Some(info) = find_via_page_source_once(source, selector).await? {
                    return Ok(info);
                }
            }
            NativeOutcome::NotFound => {}
        }
        if Instant::now() >= deadline {
            return Err(FlowError::element_not_found("element did not resolve within deadline"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeSource {
        platform: Platform,
        native_hits: Mutex<Vec<(&'static str, &'static str)>>,
        page_source: String,
    }

    #[async_trait]
    impl ElementSource for FakeSource {
        fn platform(&self) -> Platform {
            self.platform
        }

        async fn find_native(&self, using: &str, value: &str) -> Result<Option<ElementInfo>, FlowError> {
            let hits = self.native_hits.lock().unwrap();
            let hit = hits
                .iter()
                .find(|(u, v)| *u == using && value.contains(v));
            Ok(hit.map(|_| ElementInfo {
                id: Some("el-1".to_string()),
                text: "native hit".to_string(),
                ..Default::default()
            }))
        }

        async fn page_source(&self) -> Result<String, FlowError> {
            Ok(self.page_source.clone())
        }
    }

    const ANDROID_PAGE: &str = r#"<hierarchy>
        <node text="Header" resource-id="" class="android.widget.TextView" clickable="false" bounds="[0,0][1080,100]" />
        <node text="BelowButton" resource-id="" class="android.widget.Button" clickable="true" bounds="[100,150][400,200]" />
    </hierarchy>"#;

    #[tokio::test]
    async fn native_id_hit_short_circuits_page_source() {
        let source = FakeSource {
            platform: Platform::Android,
            native_hits: Mutex::new(vec![("id", "login_btn")]),
            page_source: ANDROID_PAGE.to_string(),
        };
        let selector = Selector::id("login_btn");
        let deadline = Instant::now() + Duration::from_millis(50);
        let info = find(&source, &selector, deadline, false).await.unwrap();
        assert_eq!(info.id.as_deref(), Some("el-1"));
    }

    #[tokio::test]
    async fn falls_back_to_page_source_when_text_exists_but_not_clickable() {
        // The plain (non-clickable) text locator hits, but neither
        // `.clickable(true)` variant does — `ExistsButNotClickable`, which
        // must fall back to the page-source path.
        let source = FakeSource {
            platform: Platform::Android,
            native_hits: Mutex::new(vec![("-android uiautomator", "text(\"BelowButton\")")]),
            page_source: ANDROID_PAGE.to_string(),
        };
        let selector = Selector::text("BelowButton");
        let deadline = Instant::now() + Duration::from_millis(50);
        let info = find(&source, &selector, deadline, true).await.unwrap();
        assert_eq!(info.text, "BelowButton");
    }

    #[tokio::test]
    async fn plain_not_found_loops_natively_without_fetching_page_source() {
        // No native hit and no clickable-check in play (`tap_variant:
        // false`) yields `NotFound`, which must retry the native step on
        // the next poll tick rather than escalating straight to the
        // page-source fallback, even though the element is present there.
        let source = FakeSource {
            platform: Platform::Android,
            native_hits: Mutex::new(vec![]),
            page_source: ANDROID_PAGE.to_string(),
        };
        let selector = Selector::text("BelowButton");
        let deadline = Instant::now();
        let err = find(&source, &selector, deadline, false).await.unwrap_err();
        assert_eq!(err.code(), crate::error::codes::ELEMENT_NOT_FOUND);
    }

    #[tokio::test]
    async fn relative_below_resolves_via_page_source() {
        let source = FakeSource {
            platform: Platform::Android,
            native_hits: Mutex::new(vec![]),
            page_source: ANDROID_PAGE.to_string(),
        };
        let selector = Selector {
            text: Some("BelowButton".to_string()),
            below: Some(Box::new(Selector::text("Header"))),
            ..Default::default()
        };
        let deadline = Instant::now() + Duration::from_millis(50);
        let info = find(&source, &selector, deadline, false).await.unwrap();
        assert_eq!(info.text, "BelowButton");
    }

    #[tokio::test]
    async fn ill_formed_selector_is_rejected() {
        let source = FakeSource {
            platform: Platform::Android,
            native_hits: Mutex::new(vec![]),
            page_source: ANDROID_PAGE.to_string(),
        };
        let deadline = Instant::now() + Duration::from_millis(10);
        let err = find(&source, &Selector::default(), deadline, false).await.unwrap_err();
        assert_eq!(err.code(), crate::error::codes::INVALID_CONFIG);
    }

    #[tokio::test]
    async fn missing_element_times_out_as_element_not_found() {
        let source = FakeSource {
            platform: Platform::Android,
            native_hits: Mutex::new(vec![]),
            page_source: "<hierarchy></hierarchy>".to_string(),
        };
        let selector = Selector::text("Nope");
        let deadline = Instant::now();
        let err = find(&source, &selector, deadline, false).await.unwrap_err();
        assert_eq!(err.code(), crate::error::codes::ELEMENT_NOT_FOUND);
    }

    #[test]
    fn escape_literal_orders_backslash_before_quote() {
        assert_eq!(escape_literal(r#"say "hi"\now"#), r#"say \"hi\"\\now"#);
    }

    #[test]
    fn id_locators_try_uiautomator_regex_then_plain_id() {
        let locators = id_locators(Platform::Android, "login_btn");
        assert_eq!(locators.len(), 2);
        assert!(locators[0].1.contains("resourceIdMatches"));
        assert_eq!(locators[1].0, "id");
    }
}
