//! The Automation Session Manager — owns the lifecycle of a session with
//! the device automation server: connect, Android bootstrap, settings
//! configuration, health-check polling, and teardown.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::error::FlowError;
use crate::hierarchy::Platform;
use crate::resolver::{ElementInfo, ElementSource};
use crate::transport::Transport;

/// Simulator/emulator names surfaced as a remediation hint when no device
/// is available.
const KNOWN_DEVICE_HINTS: &[&str] = &[
    "iPhone 15 (iOS 17)",
    "iPhone 15 Pro (iOS 17)",
    "Pixel_7_API_34",
    "Pixel_6_API_33",
];

#[derive(Debug, Clone, Default)]
pub struct Capabilities(pub BTreeMap<String, Value>);

impl Capabilities {
    pub fn for_platform(platform: &str, device_id: Option<&str>, app_id: Option<&str>) -> Self {
        let mut caps = BTreeMap::new();
        caps.insert("platformName".to_string(), json!(platform));
        if let Some(device_id) = device_id {
            caps.insert("appium:udid".to_string(), json!(device_id));
            caps.insert("appium:deviceName".to_string(), json!(device_id));
        }
        if let Some(app_id) = app_id {
            let key = if platform.eq_ignore_ascii_case("ios") {
                "appium:bundleId"
            } else {
                "appium:appPackage"
            };
            caps.insert(key.to_string(), json!(app_id));
        }
        Self(caps)
    }
}

pub struct Session {
    transport: Transport,
    config: SessionConfig,
    session_id: Option<String>,
    platform: Platform,
    screen_width: i32,
    screen_height: i32,
    applied_settings: BTreeMap<String, Value>,
    /// Short correlation id for log lines, not the server's `sessionId`.
    run_id: String,
}

impl Session {
    pub fn new(transport: Transport, config: SessionConfig) -> Self {
        let platform = if config.platform.eq_ignore_ascii_case("ios") {
            Platform::Ios
        } else {
            Platform::Android
        };
        let run_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        Self {
            transport,
            config,
            session_id: None,
            platform,
            screen_width: 0,
            screen_height: 0,
            applied_settings: BTreeMap::new(),
            run_id,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session_id.is_some()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn screen_size(&self) -> (i32, i32) {
        (self.screen_width, self.screen_height)
    }

    fn session_path(&self, suffix: &str) -> Result<String, FlowError> {
        let id = self.session_id.as_deref().ok_or_else(|| {
            FlowError::new(crate::error::Category::Connection, crate::error::codes::DEVICE_DISCONNECTED, "no active session")
        })?;
        Ok(format!("/session/{}{}", id, suffix))
    }

    /// `connect(capabilities)`: create a session, then run the
    /// Android-specific bootstrap when an app id with clear-state is given.
    pub async fn connect(&mut self, caps: Capabilities) -> Result<(), FlowError> {
        let clear_state = self.config.clear_state;
        let mut always_match = caps.0;
        if self.platform == Platform::Android && self.config.app_id.is_some() && clear_state {
            // autoLaunch MUST be false so permissions can be granted via
            // shell before the app starts.
            always_match.insert("appium:autoLaunch".to_string(), json!(false));
        }

        let body = json!({ "capabilities": { "alwaysMatch": always_match } });
        let response = self.transport.post("/session", body).await.map_err(|e| {
            if e.is(crate::error::codes::SERVER_UNREACHABLE) {
                e.with_message(format!(
                    "no devices reachable; known simulators/emulators: {}",
                    KNOWN_DEVICE_HINTS.join(", ")
                ))
            } else {
                e
            }
        })?;

        let value = response.get("value").unwrap_or(&response);
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| FlowError::server_unreachable("session creation returned no sessionId"))?
            .to_string();

        if let Some(caps) = value.get("capabilities").and_then(|c| c.get("platformName")).and_then(Value::as_str) {
            self.platform = if caps.eq_ignore_ascii_case("ios") {
                Platform::Ios
            } else {
                Platform::Android
            };
        }

        self.session_id = Some(session_id);
        info!(run_id = %self.run_id, platform = ?self.platform, "session connected");

        self.fetch_screen_size().await?;

        if self.platform == Platform::Android && clear_state {
            self.android_bootstrap().await?;
        }

        self.configure_settings().await?;

        Ok(())
    }

    async fn fetch_screen_size(&mut self) -> Result<(), FlowError> {
        let path = self.session_path("/window/rect")?;
        let response = self.transport.get(&path).await?;
        let value = response.get("value").unwrap_or(&response);
        self.screen_width = value.get("width").and_then(Value::as_i64).unwrap_or(0) as i32;
        self.screen_height = value.get("height").and_then(Value::as_i64).unwrap_or(0) as i32;
        Ok(())
    }

    /// Grant configured permissions via shell, then start the app
    /// explicitly — only reachable when `clear_state` requested `autoLaunch
    /// = false` at connect time.
    async fn android_bootstrap(&mut self) -> Result<(), FlowError> {
        let Some(app_id) = self.config.app_id.clone() else {
            return Ok(());
        };
        for permission in &self.config.permissions {
            let path = self.session_path("/execute/sync")?;
            let body = json!({
                "script": "mobile: shell",
                "args": [{ "command": "pm", "args": ["grant", app_id, permission] }],
            });
            self.transport.post(&path, body).await?;
        }

        let path = self.session_path("/appium/device/activate_app")?;
        self.transport.post(&path, json!({ "appId": app_id })).await?;
        info!(app_id, permissions = self.config.permissions.len(), "android bootstrap complete");
        Ok(())
    }

    /// Configure server settings (`waitForIdleTimeout`, `waitForSelectorTimeout`,
    /// and on iOS `animationCoolOffTimeout`), skipping any already applied
    /// to the requested value.
    async fn configure_settings(&mut self) -> Result<(), FlowError> {
        let mut desired: BTreeMap<String, Value> = BTreeMap::new();
        desired.insert("waitForIdleTimeout".to_string(), json!(0));
        desired.insert("waitForSelectorTimeout".to_string(), json!(0));
        if self.platform == Platform::Ios {
            desired.insert("animationCoolOffTimeout".to_string(), json!(0));
        }

        let diff: BTreeMap<String, Value> = desired
            .into_iter()
            .filter(|(k, v)| self.applied_settings.get(k) != Some(v))
            .collect();
        if diff.is_empty() {
            return Ok(());
        }

        let path = self.session_path("/appium/settings")?;
        self.transport.post(&path, json!({ "settings": diff })).await?;
        self.applied_settings.extend(diff);
        Ok(())
    }

    /// Idempotent: a no-op when already disconnected.
    pub async fn disconnect(&mut self) -> Result<(), FlowError> {
        let Some(id) = self.session_id.take() else {
            return Ok(());
        };
        self.transport.delete(&format!("/session/{}", id)).await?;
        self.applied_settings.clear();
        info!("session disconnected");
        Ok(())
    }

    /// Probe for helper APKs; if missing, install matching APKs found in
    /// `apk_dir` by glob pattern. Android only.
    pub async fn ensure_server_installed(&mut self) -> Result<(), FlowError> {
        if self.platform != Platform::Android {
            return Ok(());
        }
        let Some(apk_dir) = self.config.apk_dir.clone() else {
            return Ok(());
        };

        let pattern = format!("{}/*.apk", apk_dir.trim_end_matches('/'));
        let apks: Vec<String> = glob::glob(&pattern)
            .map_err(|e| FlowError::invalid_config(format!("bad apk glob pattern: {}", e)))?
            .filter_map(Result::ok)
            .filter_map(|p| p.to_str().map(str::to_string))
            .collect();

        for apk in &apks {
            let path = self.session_path("/appium/device/install_app")?;
            self.transport
                .post(&path, json!({ "appPath": apk }))
                .await?;
        }
        info!(count = apks.len(), apk_dir, "installed matching apks");

        self.await_server_ready().await
    }

    async fn await_server_ready(&self) -> Result<(), FlowError> {
        let deadline = Instant::now() + Duration::from_millis(self.config.server_start_deadline_ms);
        loop {
            if self.health_check().await {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(FlowError::new(
                    crate::error::Category::App,
                    crate::error::codes::APP_NOT_RESPONDING,
                    "automation server did not become ready before deadline",
                ));
            }
            tokio::time::sleep(Duration::from_millis(self.config.health_check_retry_ms)).await;
        }
    }

    /// `true` iff `/status` responds within the per-probe timeout.
    pub async fn health_check(&self) -> bool {
        let probe = Duration::from_millis(self.config.health_check_probe_ms);
        match tokio::time::timeout(probe, self.transport.get("/status")).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "health check probe failed");
                false
            }
            Err(_) => false,
        }
    }

    pub async fn wait_until_healthy(&self, deadline: Instant, retry_interval: Duration) -> Result<(), FlowError> {
        loop {
            if self.health_check().await {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(FlowError::timeout("automation server health check did not pass before deadline"));
            }
            tokio::time::sleep(retry_interval).await;
        }
    }
}

#[async_trait]
impl ElementSource for Session {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn find_native(&self, using: &str, value: &str) -> Result<Option<ElementInfo>, FlowError> {
        let path = self.session_path("/element")?;
        let body = json!({ "using": using, "value": value });
        match self.transport.post(&path, body).await {
            Ok(response) => Ok(Some(parse_element_response(&response))),
            Err(e) if e.is(crate::error::codes::ELEMENT_NOT_FOUND) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn page_source(&self) -> Result<String, FlowError> {
        let path = self.session_path("/source")?;
        let response = self.transport.get(&path).await?;
        Ok(response
            .get("value")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}

/// Both the W3C (`element-6066-11e4-a52e-4f735466cecf`) and legacy
/// (`ELEMENT`) element id keys MUST be accepted.
fn parse_element_response(response: &Value) -> ElementInfo {
    let value = response.get("value").unwrap_or(response);
    let id = value
        .get("element-6066-11e4-a52e-4f735466cecf")
        .or_else(|| value.get("ELEMENT"))
        .and_then(Value::as_str)
        .map(str::to_string);
    ElementInfo {
        id,
        ..Default::default()
    }
}

#[async_trait]
impl crate::driver::DeviceOps for Session {
    async fn tap_element(&self, element_id: &str) -> Result<(), FlowError> {
        let path = self.session_path("/actions")?;
        self.transport.post(&path, pointer_actions(vec![PointerOp::Down, PointerOp::Up], None, Some(element_id))).await?;
        Ok(())
    }

    async fn tap_point(&self, x: i32, y: i32) -> Result<(), FlowError> {
        let path = self.session_path("/actions")?;
        self.transport
            .post(&path, pointer_actions(vec![PointerOp::MoveTo(x, y), PointerOp::Down, PointerOp::Up], None, None))
            .await?;
        Ok(())
    }

    async fn double_tap_point(&self, x: i32, y: i32) -> Result<(), FlowError> {
        self.tap_point(x, y).await?;
        self.tap_point(x, y).await
    }

    async fn long_press_point(&self, x: i32, y: i32, duration_ms: u64) -> Result<(), FlowError> {
        let path = self.session_path("/actions")?;
        self.transport
            .post(
                &path,
                pointer_actions(vec![PointerOp::MoveTo(x, y), PointerOp::Down, PointerOp::Pause(duration_ms), PointerOp::Up], None, None),
            )
            .await?;
        Ok(())
    }

    async fn swipe(&self, start: (i32, i32), end: (i32, i32), duration_ms: u64) -> Result<(), FlowError> {
        let path = self.session_path("/actions")?;
        self.transport
            .post(
                &path,
                pointer_actions(
                    vec![
                        PointerOp::MoveTo(start.0, start.1),
                        PointerOp::Down,
                        PointerOp::MoveDuring(end.0, end.1, duration_ms),
                        PointerOp::Up,
                    ],
                    None,
                    None,
                ),
            )
            .await?;
        Ok(())
    }

    async fn scroll(&self, direction: &str) -> Result<(), FlowError> {
        let (w, h) = self.screen_size();
        let (start, end) = third_segment(w, h, direction);
        self.swipe(start, end, 500).await
    }

    async fn input_text_active(&self, text: &str) -> Result<(), FlowError> {
        let path = self.session_path("/actions")?;
        self.transport.post(&path, key_actions(text)).await?;
        Ok(())
    }

    async fn input_text_element_fallback(&self, element_id: &str, text: &str) -> Result<(), FlowError> {
        let path = self.session_path(&format!("/element/{}/value", element_id))?;
        self.transport.post(&path, json!({ "text": text })).await?;
        Ok(())
    }

    async fn active_element_id(&self) -> Result<Option<String>, FlowError> {
        let active_path = self.session_path("/element/active")?;
        let response = self.transport.get(&active_path).await?;
        let id = response
            .get("value")
            .and_then(|v| v.get("element-6066-11e4-a52e-4f735466cecf").or_else(|| v.get("ELEMENT")))
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(id)
    }

    async fn clear_active(&self) -> Result<(), FlowError> {
        let id = self
            .active_element_id()
            .await?
            .ok_or_else(|| FlowError::element_not_found("no active element to clear"))?;
        let clear_path = self.session_path(&format!("/element/{}/clear", id))?;
        self.transport.post(&clear_path, json!({})).await?;
        Ok(())
    }

    async fn press_delete_keycode(&self) -> Result<(), FlowError> {
        self.press_key_android(67).await
    }

    async fn press_key_android(&self, keycode: u32) -> Result<(), FlowError> {
        let path = self.session_path("/appium/device/press_keycode")?;
        self.transport.post(&path, json!({ "keycode": keycode })).await?;
        Ok(())
    }

    async fn get_clipboard(&self) -> Result<String, FlowError> {
        let path = self.session_path("/appium/device/get_clipboard")?;
        let response = self.transport.post(&path, json!({})).await?;
        let b64 = response.get("value").and_then(Value::as_str).unwrap_or_default();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(b64)
            .unwrap_or_default();
        Ok(String::from_utf8_lossy(&bytes).to_string())
    }

    async fn set_clipboard(&self, text: &str) -> Result<(), FlowError> {
        let path = self.session_path("/appium/device/set_clipboard")?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(text);
        self.transport.post(&path, json!({ "content": encoded, "contentType": "plaintext" })).await?;
        Ok(())
    }

    async fn launch_app(&self, app_id: &str) -> Result<(), FlowError> {
        let path = self.session_path("/appium/device/activate_app")?;
        self.transport.post(&path, json!({ "appId": app_id })).await?;
        Ok(())
    }

    async fn stop_app(&self, app_id: &str) -> Result<(), FlowError> {
        let path = self.session_path("/appium/device/terminate_app")?;
        self.transport.post(&path, json!({ "appId": app_id })).await?;
        Ok(())
    }

    async fn terminate_app(&self, app_id: &str) -> Result<(), FlowError> {
        self.stop_app(app_id).await
    }

    async fn clear_app_state(&self, app_id: &str) -> Result<(), FlowError> {
        let path = self.session_path("/execute/sync")?;
        let body = json!({ "script": "mobile: clearApp", "args": [{ "bundleId": app_id, "appId": app_id }] });
        self.transport.post(&path, body).await?;
        Ok(())
    }

    async fn open_url(&self, url: &str) -> Result<(), FlowError> {
        let path = self.session_path("/url")?;
        self.transport.post(&path, json!({ "url": url })).await?;
        Ok(())
    }

    async fn set_geolocation(&self, latitude: f64, longitude: f64) -> Result<(), FlowError> {
        let path = self.session_path("/location")?;
        self.transport
            .post(&path, json!({ "location": { "latitude": latitude, "longitude": longitude, "altitude": 0 } }))
            .await?;
        Ok(())
    }

    async fn set_orientation(&self, orientation: &str) -> Result<(), FlowError> {
        let path = self.session_path("/orientation")?;
        self.transport.post(&path, json!({ "orientation": orientation.to_uppercase() })).await?;
        Ok(())
    }

    async fn get_orientation(&self) -> Result<String, FlowError> {
        let path = self.session_path("/orientation")?;
        let response = self.transport.get(&path).await?;
        Ok(response.get("value").and_then(Value::as_str).unwrap_or_default().to_string())
    }

    async fn hide_keyboard(&self) -> Result<(), FlowError> {
        let path = self.session_path("/appium/device/hide_keyboard")?;
        self.transport.post(&path, json!({})).await?;
        Ok(())
    }

    async fn press_back(&self) -> Result<(), FlowError> {
        match self.platform {
            Platform::Android => self.press_key_android(4).await,
            Platform::Ios => {
                let path = self.session_path("/back")?;
                self.transport.post(&path, json!({})).await?;
                Ok(())
            }
        }
    }

    async fn screenshot(&self) -> Result<String, FlowError> {
        let path = self.session_path("/screenshot")?;
        let response = self.transport.get(&path).await?;
        Ok(response.get("value").and_then(Value::as_str).unwrap_or_default().to_string())
    }

    fn screen_size(&self) -> (i32, i32) {
        self.screen_size()
    }
}

enum PointerOp {
    MoveTo(i32, i32),
    MoveDuring(i32, i32, u64),
    Down,
    Up,
    Pause(u64),
}

/// Build a minimal W3C input-actions payload (`POST /session/{id}/actions`)
/// for a single pointer source.
fn pointer_actions(ops: Vec<PointerOp>, _origin: Option<()>, element_id: Option<&str>) -> Value {
    let actions: Vec<Value> = ops
        .into_iter()
        .map(|op| match op {
            PointerOp::MoveTo(x, y) => json!({ "type": "pointerMove", "duration": 0, "x": x, "y": y }),
            PointerOp::MoveDuring(x, y, duration) => json!({ "type": "pointerMove", "duration": duration, "x": x, "y": y }),
            PointerOp::Down => json!({ "type": "pointerDown", "button": 0 }),
            PointerOp::Up => json!({ "type": "pointerUp", "button": 0 }),
            PointerOp::Pause(duration) => json!({ "type": "pause", "duration": duration }),
        })
        .collect();

    let mut actions = actions;
    if let Some(id) = element_id {
        actions.insert(0, json!({ "type": "pointerMove", "duration": 0, "origin": { "element-6066-11e4-a52e-4f735466cecf": id }, "x": 0, "y": 0 }));
    }

    json!({
        "actions": [{
            "type": "pointer",
            "id": "finger1",
            "parameters": { "pointerType": "touch" },
            "actions": actions,
        }]
    })
}

fn key_actions(text: &str) -> Value {
    let key_events: Vec<Value> = text
        .chars()
        .flat_map(|c| {
            vec![
                json!({ "type": "keyDown", "value": c.to_string() }),
                json!({ "type": "keyUp", "value": c.to_string() }),
            ]
        })
        .collect();
    json!({
        "actions": [{
            "type": "key",
            "id": "keyboard1",
            "actions": key_events,
        }]
    })
}

/// Center-third segment geometry for direction-based swipe/scroll:
/// `up` is `(w/2, 2h/3) → (w/2, h/3)`.
fn third_segment(width: i32, height: i32, direction: &str) -> ((i32, i32), (i32, i32)) {
    let cx = width / 2;
    let top_third = height / 3;
    let bottom_third = 2 * height / 3;
    match direction {
        "down" => ((cx, top_third), (cx, bottom_third)),
        "left" => ((width / 3, height / 2), (2 * width / 3, height / 2)),
        "right" => ((2 * width / 3, height / 2), (width / 3, height / 2)),
        _ => ((cx, bottom_third), (cx, top_third)), // "up", and the default
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_w3c_element_id() {
        let response = json!({"value": {"element-6066-11e4-a52e-4f735466cecf": "abc-123"}});
        let info = parse_element_response(&response);
        assert_eq!(info.id.as_deref(), Some("abc-123"));
    }

    #[test]
    fn parses_legacy_element_id() {
        let response = json!({"value": {"ELEMENT": "legacy-1"}});
        let info = parse_element_response(&response);
        assert_eq!(info.id.as_deref(), Some("legacy-1"));
    }

    #[test]
    fn capabilities_select_bundle_id_on_ios_and_package_on_android() {
        let ios = Capabilities::for_platform("iOS", None, Some("com.example.app"));
        assert_eq!(ios.0.get("appium:bundleId").and_then(Value::as_str), Some("com.example.app"));

        let android = Capabilities::for_platform("android", None, Some("com.example.app"));
        assert_eq!(android.0.get("appium:appPackage").and_then(Value::as_str), Some("com.example.app"));
    }

    #[test]
    fn session_path_errors_without_active_session() {
        let transport = Transport::new(
            crate::transport::Dialer::Tcp { base_url: "http://127.0.0.1:1".to_string() },
            Duration::from_secs(1),
        );
        let session = Session::new(transport, SessionConfig::default());
        let err = session.session_path("/element").unwrap_err();
        assert_eq!(err.code(), crate::error::codes::DEVICE_DISCONNECTED);
    }
}
