//! Platform page-source parsing.
//!
//! Scans the raw XML by string search rather than pulling in a parsing
//! crate — the page source is well-formed enough (uiautomator / XCTest
//! dumps) that a small hand-rolled tokenizer is both simpler and matches how
//! raw ADB/uiautomator output is typically read line-by-line.

use crate::geometry::Bounds;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Android,
    Ios,
}

/// A node in the flattened device hierarchy. Parent links are stored as
/// arena indices into the enclosing `Vec<ParsedElement>` rather than a weak
/// reference, since weak in-tree back-references aren't available here.
#[derive(Debug, Clone)]
pub struct ParsedElement {
    pub platform: Platform,
    pub depth: usize,
    pub parent: Option<usize>,

    pub bounds: Bounds,

    pub enabled: bool,
    pub displayed: bool,
    pub selected: bool,
    pub focused: bool,
    pub clickable: bool,

    // Android
    pub text: String,
    pub resource_id: String,
    pub content_desc: String,
    pub hint_text: String,
    pub class_name: String,

    // iOS
    pub element_type: String,
    pub name: String,
    pub label: String,
    pub value: String,
    pub placeholder_value: String,
}

impl ParsedElement {
    fn new(platform: Platform) -> Self {
        Self {
            platform,
            depth: 0,
            parent: None,
            bounds: Bounds::default(),
            enabled: true,
            displayed: true,
            selected: false,
            focused: false,
            clickable: false,
            text: String::new(),
            resource_id: String::new(),
            content_desc: String::new(),
            hint_text: String::new(),
            class_name: String::new(),
            element_type: String::new(),
            name: String::new(),
            label: String::new(),
            value: String::new(),
            placeholder_value: String::new(),
        }
    }

    /// The text-bearing fields considered by the matcher's textual matching,
    /// in priority order per platform.
    pub fn text_fields(&self) -> Vec<&str> {
        match self.platform {
            Platform::Android => vec![
                self.text.as_str(),
                self.content_desc.as_str(),
                self.hint_text.as_str(),
            ],
            Platform::Ios => vec![
                self.label.as_str(),
                self.name.as_str(),
                self.value.as_str(),
                self.placeholder_value.as_str(),
            ],
        }
    }

    /// The identity field used by id matching: Android `resourceId`,
    /// iOS `name`.
    pub fn id_field(&self) -> &str {
        match self.platform {
            Platform::Android => &self.resource_id,
            Platform::Ios => &self.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyError(pub String);

impl std::fmt::Display for HierarchyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for HierarchyError {}

fn detect_platform(xml: &str) -> Platform {
    if xml.contains("XCUIElementType") || xml.contains("AppiumAUT") {
        Platform::Ios
    } else {
        Platform::Android
    }
}

/// Parse a page source into a pre-order-flattened list of [`ParsedElement`].
pub fn parse_page_source(xml: &str) -> Result<Vec<ParsedElement>, HierarchyError> {
    let platform = detect_platform(xml);
    if platform == Platform::Android && !xml.contains("<hierarchy") {
        return Err(HierarchyError(
            "invalid page source: no <hierarchy> root element".to_string(),
        ));
    }
    Ok(tokenize_and_flatten(xml, platform))
}

struct Tag<'a> {
    name: &'a str,
    attrs: &'a str,
    self_closing: bool,
}

/// Find the next opening-ish tag (`<Name ...>` or `<Name .../>`) starting at
/// or after `from`. Closing tags (`</Name>`) and the `<?xml ...?>` prologue
/// are skipped. Returns the tag plus the byte offset just past it.
fn next_tag(xml: &str, from: usize) -> Option<(Tag<'_>, usize)> {
    let mut pos = from;
    loop {
        let lt = xml[pos..].find('<')? + pos;
        let rest = &xml[lt..];
        if rest.starts_with("</") {
            pos = lt + 2;
            continue;
        }
        if rest.starts_with("<?") {
            let end = rest.find("?>").map(|i| i + 2)?;
            pos = lt + end;
            continue;
        }
        if rest.starts_with("<!") {
            let end = rest.find('>').map(|i| i + 1)?;
            pos = lt + end;
            continue;
        }
        let gt = rest.find('>')?;
        let body = &rest[1..gt];
        let self_closing = body.trim_end().ends_with('/');
        let body = body.trim_end().trim_end_matches('/');
        let name_end = body
            .find(|c: char| c.is_whitespace())
            .unwrap_or(body.len());
        let name = &body[..name_end];
        let attrs = body[name_end..].trim_start();
        return Some((
            Tag {
                name,
                attrs,
                self_closing,
            },
            lt + gt + 1,
        ));
    }
}

fn tokenize_and_flatten(xml: &str, platform: Platform) -> Vec<ParsedElement> {
    let mut out = Vec::new();
    let mut stack: Vec<usize> = Vec::new();
    let mut pos = 0;

    while let Some((tag, next_pos)) = next_tag(xml, pos) {
        pos = next_pos;
        if tag.name == "hierarchy" || tag.name == "AppiumAUT" || tag.name.is_empty() {
            continue;
        }

        let mut el = ParsedElement::new(platform);
        el.depth = stack.len();
        el.parent = stack.last().copied();

        match platform {
            Platform::Android => fill_android(&mut el, tag.name, tag.attrs),
            Platform::Ios => fill_ios(&mut el, tag.name, tag.attrs),
        }

        let idx = out.len();
        out.push(el);

        if !tag.self_closing {
            stack.push(idx);
        } else {
            // Self-closing leaf: nothing to pop, depth already captured.
        }

        // A closing tag for the most recently opened element may appear
        // before the next opening tag; pop every closer we encounter here.
        loop {
            let rest = &xml[pos..];
            let Some(lt) = rest.find('<') else { break };
            if !rest[lt..].starts_with("</") {
                break;
            }
            let Some(gt) = rest[lt..].find('>') else { break };
            pos += lt + gt + 1;
            stack.pop();
        }
    }

    out
}

fn xml_attr<'a>(attrs: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!("{}=\"", name);
    let start = attrs.find(&needle)? + needle.len();
    let rest = &attrs[start..];
    let end = rest.find('"')?;
    Some(&rest[..end])
}

fn attr_bool(attrs: &str, name: &str, default: bool) -> bool {
    match xml_attr(attrs, name) {
        Some(v) => v == "true",
        None => default,
    }
}

/// `"[x1,y1][x2,y2]"` → `Bounds`. Malformed input yields a zero rectangle,
/// never an error.
fn parse_android_bounds(raw: &str) -> Bounds {
    let nums: Vec<i32> = raw
        .replace('[', ",")
        .replace(']', "")
        .split(',')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();
    if nums.len() != 4 {
        return Bounds::default();
    }
    let (x1, y1, x2, y2) = (nums[0], nums[1], nums[2], nums[3]);
    Bounds::new(x1, y1, x2 - x1, y2 - y1)
}

fn fill_android(el: &mut ParsedElement, class_tag: &str, attrs: &str) {
    el.text = xml_attr(attrs, "text").unwrap_or_default().to_string();
    el.resource_id = xml_attr(attrs, "resource-id").unwrap_or_default().to_string();
    el.content_desc = xml_attr(attrs, "content-desc").unwrap_or_default().to_string();
    el.hint_text = xml_attr(attrs, "hint").unwrap_or_default().to_string();
    el.class_name = xml_attr(attrs, "class")
        .map(str::to_string)
        .unwrap_or_else(|| class_tag.to_string());

    el.enabled = attr_bool(attrs, "enabled", true);
    el.displayed = attr_bool(attrs, "displayed", true);
    el.selected = attr_bool(attrs, "selected", false);
    el.focused = attr_bool(attrs, "focused", false);
    el.clickable = attr_bool(attrs, "clickable", false);

    el.bounds = xml_attr(attrs, "bounds")
        .map(parse_android_bounds)
        .unwrap_or_default();
}

fn fill_ios(el: &mut ParsedElement, type_tag: &str, attrs: &str) {
    el.element_type = type_tag.to_string();
    el.name = xml_attr(attrs, "name").unwrap_or_default().to_string();
    el.label = xml_attr(attrs, "label").unwrap_or_default().to_string();
    el.value = xml_attr(attrs, "value").unwrap_or_default().to_string();
    el.placeholder_value = xml_attr(attrs, "placeholderValue")
        .unwrap_or_default()
        .to_string();

    el.enabled = attr_bool(attrs, "enabled", true);
    el.displayed = attr_bool(attrs, "visible", true);
    el.selected = attr_bool(attrs, "selected", false);
    el.focused = attr_bool(attrs, "focused", false);

    let x: i32 = xml_attr(attrs, "x").and_then(|v| v.parse().ok()).unwrap_or(0);
    let y: i32 = xml_attr(attrs, "y").and_then(|v| v.parse().ok()).unwrap_or(0);
    let width: i32 = xml_attr(attrs, "width").and_then(|v| v.parse().ok()).unwrap_or(0);
    let height: i32 = xml_attr(attrs, "height").and_then(|v| v.parse().ok()).unwrap_or(0);
    el.bounds = Bounds::new(x, y, width, height);
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANDROID_SAMPLE: &str = r#"<?xml version='1.0' encoding='UTF-8'?>
<hierarchy rotation="0">
  <node class="android.widget.FrameLayout" bounds="[0,0][1080,2400]">
    <node text="Login" resource-id="com.app:id/login_btn" class="android.widget.Button" clickable="true" bounds="[100,200][400,280]" />
    <node text="" content-desc="Settings" class="android.widget.ImageView" clickable="true" bounds="[900,50][1000,150]" />
  </node>
</hierarchy>"#;

    const IOS_SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<AppiumAUT>
  <XCUIElementTypeApplication name="MyApp" x="0" y="0" width="390" height="844">
    <XCUIElementTypeButton name="loginButton" label="Login" x="100" y="200" width="190" height="60" enabled="true" visible="true" />
  </XCUIElementTypeApplication>
</AppiumAUT>"#;

    #[test]
    fn detects_android_platform() {
        assert_eq!(detect_platform(ANDROID_SAMPLE), Platform::Android);
    }

    #[test]
    fn detects_ios_platform() {
        assert_eq!(detect_platform(IOS_SAMPLE), Platform::Ios);
    }

    #[test]
    fn rejects_android_without_hierarchy_root() {
        let err = parse_page_source("<not-a-hierarchy></not-a-hierarchy>").unwrap_err();
        assert!(err.0.contains("hierarchy"));
    }

    #[test]
    fn flattens_android_in_pre_order_with_depth_and_parent() {
        let elements = parse_page_source(ANDROID_SAMPLE).unwrap();
        assert_eq!(elements.len(), 3);
        assert_eq!(elements[0].depth, 0);
        assert_eq!(elements[0].parent, None);
        assert_eq!(elements[1].depth, 1);
        assert_eq!(elements[1].parent, Some(0));
        assert_eq!(elements[1].text, "Login");
        assert_eq!(elements[1].resource_id, "com.app:id/login_btn");
        assert_eq!(elements[2].depth, 1);
        assert_eq!(elements[2].parent, Some(0));
        assert_eq!(elements[2].content_desc, "Settings");
    }

    #[test]
    fn parses_android_bounds_into_xywh() {
        let elements = parse_page_source(ANDROID_SAMPLE).unwrap();
        let login = &elements[1];
        assert_eq!(login.bounds, Bounds::new(100, 200, 300, 80));
    }

    #[test]
    fn malformed_bounds_become_zero_rect_not_error() {
        assert_eq!(parse_android_bounds("garbage"), Bounds::default());
        assert_eq!(parse_android_bounds("[1,2][3]"), Bounds::default());
    }

    #[test]
    fn parses_ios_hierarchy() {
        let elements = parse_page_source(IOS_SAMPLE).unwrap();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[1].element_type, "XCUIElementTypeButton");
        assert_eq!(elements[1].label, "Login");
        assert_eq!(elements[1].name, "loginButton");
        assert_eq!(elements[1].bounds, Bounds::new(100, 200, 190, 60));
        assert_eq!(elements[1].parent, Some(0));
    }

    #[test]
    fn displayed_defaults_true_unless_explicitly_false() {
        let xml = r#"<hierarchy><node text="Hidden" bounds="[0,0][10,10]" displayed="false" /></hierarchy>"#;
        let elements = parse_page_source(xml).unwrap();
        assert!(!elements[0].displayed);

        let xml2 = r#"<hierarchy><node text="Shown" bounds="[0,0][10,10]" /></hierarchy>"#;
        let elements2 = parse_page_source(xml2).unwrap();
        assert!(elements2[0].displayed);
    }
}
