//! The Command Executor — dispatches each [`Step`] to a bounded sequence of
//! driver operations, applying per-step timeouts, coordinate interpretation,
//! scroll/wait loops, and text-entry fallbacks.

use std::time::{Duration, Instant};

use rand::Rng;
use tracing::info;

use crate::config::ExecutorConfig;
use crate::driver::DeviceOps;
use crate::resolver;
use crate::selector::Selector;
use crate::session::Session;
use crate::step::{CommandResult, Step};

pub struct Executor {
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    fn deadline_for(&self, base_timeout_ms: Option<u64>, fallback_ms: u64) -> Instant {
        let ms = base_timeout_ms.unwrap_or(fallback_ms);
        Instant::now() + Duration::from_millis(ms)
    }

    /// Run one step, returning a [`CommandResult`] with `duration_ms` set to
    /// the wall time spent in the handler.
    pub async fn run(&self, session: &Session, step: &Step) -> CommandResult {
        let start = Instant::now();
        let mut result = self.dispatch(session, step).await;
        result.duration_ms = start.elapsed().as_millis() as u64;
        result
    }

    async fn dispatch(&self, session: &Session, step: &Step) -> CommandResult {
        match step {
            Step::Tap { base, selector } => self.tap_like(session, selector, base.timeout_ms, false).await,
            Step::DoubleTap { base, selector } => self.tap_like(session, selector, base.timeout_ms, true).await,
            Step::LongPress { base, selector, duration_ms } => {
                self.long_press(session, selector, base.timeout_ms, *duration_ms).await
            }
            Step::TapOnPoint { base: _, point, x, y } => self.tap_on_point(session, point.as_deref(), *x, *y).await,
            Step::Swipe { base: _, start, end, direction, duration_ms } => {
                self.swipe(session, start.as_deref(), end.as_deref(), direction.as_deref(), *duration_ms).await
            }
            Step::Scroll { base: _, direction } => self.scroll(session, direction.as_deref()).await,
            Step::ScrollUntilVisible { base, selector, direction } => {
                self.scroll_until_visible(session, selector, base.timeout_ms, direction.as_deref()).await
            }
            Step::InputText { base: _, text } => self.input_text(session, text).await,
            Step::InputRandom { base: _, data_type, length } => {
                self.input_random(session, data_type.as_deref(), *length).await
            }
            Step::EraseText { base: _, count } => self.erase_text(session, *count).await,
            Step::AssertVisible { base, selector } => self.assert_visible(session, selector, base.timeout_ms).await,
            Step::AssertNotVisible { base, selector } => {
                self.assert_not_visible(session, selector, base.timeout_ms).await
            }
            Step::WaitUntil { base, visible, not_visible } => {
                self.wait_until(session, visible.as_ref(), not_visible.as_ref(), base.timeout_ms).await
            }
            Step::WaitForAnimationToEnd { .. } => CommandResult {
                success: true,
                message: Some("waitForAnimationToEnd: screenshot-diff not implemented".to_string()),
                ..Default::default()
            },
            Step::Back { .. } => wrap(session.press_back().await),
            Step::HideKeyboard { .. } => wrap(session.hide_keyboard().await),
            Step::LaunchApp { base: _, app_id, clear_state, stop_first } => {
                self.launch_app(session, app_id.as_deref(), *clear_state, *stop_first).await
            }
            Step::StopApp { base: _, app_id } => self.with_app_id(session, app_id.as_deref(), |id| session.stop_app(id)).await,
            Step::KillApp { base: _, app_id } => self.with_app_id(session, app_id.as_deref(), |id| session.terminate_app(id)).await,
            Step::ClearState { base: _, app_id } => {
                self.with_app_id(session, app_id.as_deref(), |id| session.clear_app_state(id)).await
            }
            Step::SetLocation { base: _, latitude, longitude } => self.set_location(session, latitude, longitude).await,
            Step::SetOrientation { base: _, orientation } => wrap(session.set_orientation(orientation).await),
            Step::OpenLink { base: _, link, auto_verify, browser: _ } => self.open_link(session, link, *auto_verify).await,
            Step::CopyTextFrom { base, selector } => self.copy_text_from(session, selector, base.timeout_ms).await,
            Step::PasteText { .. } => self.paste_text(session).await,
            Step::SetClipboard { base: _, text } => wrap(session.set_clipboard(text).await),
            Step::PressKey { base: _, key } => self.press_key(session, key).await,
            Step::TakeScreenshot { base: _, label } => self.take_screenshot(session, label.as_deref()).await,
            Step::RunScript { base: _, script } => CommandResult::fail(format!(
                "runScript requires an external script evaluator (see crate::script); cannot run '{}' here",
                script
            )),
        }
    }

    async fn with_app_id<'a, F, Fut>(&self, _session: &Session, app_id: Option<&'a str>, f: F) -> CommandResult
    where
        F: FnOnce(&'a str) -> Fut,
        Fut: std::future::Future<Output = Result<(), crate::error::FlowError>>,
    {
        match app_id {
            Some(id) => wrap(f(id).await),
            None => CommandResult::fail("app id required"),
        }
    }

    async fn resolve(
        &self,
        session: &Session,
        selector: &Selector,
        timeout_ms: Option<u64>,
        tap_variant: bool,
    ) -> Result<crate::resolver::ElementInfo, crate::error::FlowError> {
        let deadline = self.deadline_for(timeout_ms, self.config.default_step_timeout_ms);
        resolver::find(session, selector, deadline, tap_variant).await
    }

    async fn tap_like(&self, session: &Session, selector: &Selector, timeout_ms: Option<u64>, double: bool) -> CommandResult {
        match self.resolve(session, selector, timeout_ms, true).await {
            Ok(info) => {
                let op = if let Some(id) = &info.id {
                    if double {
                        session.tap_element(id).await.and(session.tap_element(id).await)
                    } else {
                        session.tap_element(id).await
                    }
                } else {
                    let (x, y) = info.bounds.center();
                    if double {
                        session.double_tap_point(x, y).await
                    } else {
                        session.tap_point(x, y).await
                    }
                };
                match op {
                    Ok(()) => success_with_element(info),
                    Err(e) => CommandResult::fail(e.to_string()),
                }
            }
            Err(e) => CommandResult::fail(e.to_string()),
        }
    }

    async fn long_press(&self, session: &Session, selector: &Selector, timeout_ms: Option<u64>, duration_ms: Option<u64>) -> CommandResult {
        let duration = duration_ms.unwrap_or(self.config.long_press_ms);
        match self.resolve(session, selector, timeout_ms, true).await {
            Ok(info) => {
                let (x, y) = info.bounds.center();
                match session.long_press_point(x, y, duration).await {
                    Ok(()) => success_with_element(info),
                    Err(e) => CommandResult::fail(e.to_string()),
                }
            }
            Err(e) => CommandResult::fail(e.to_string()),
        }
    }

    async fn tap_on_point(&self, session: &Session, point: Option<&str>, x: Option<i32>, y: Option<i32>) -> CommandResult {
        let (sw, sh) = session.screen_size();
        let coords = match point {
            Some(p) if !p.is_empty() => match parse_percentage_point(p, sw, sh) {
                Some(coords) => coords,
                None => return CommandResult::fail(format!("unparseable percentage point: {}", p)),
            },
            _ => match (x, y) {
                (Some(x), Some(y)) => (x, y),
                _ => return CommandResult::fail("tapOnPoint requires a point or x/y"),
            },
        };
        wrap(session.tap_point(coords.0, coords.1).await)
    }

    async fn swipe(&self, session: &Session, start: Option<&str>, end: Option<&str>, direction: Option<&str>, duration_ms: Option<u64>) -> CommandResult {
        let (sw, sh) = session.screen_size();
        if let (Some(start), Some(end)) = (start, end) {
            let (s, e) = match (parse_percentage_point(start, sw, sh), parse_percentage_point(end, sw, sh)) {
                (Some(s), Some(e)) => (s, e),
                _ => return CommandResult::fail("unparseable swipe start/end"),
            };
            return wrap(session.swipe(s, e, duration_ms.unwrap_or(300)).await);
        }
        let dir = direction.unwrap_or("up");
        if !matches!(dir, "up" | "down" | "left" | "right") {
            return CommandResult::fail(format!("unknown swipe direction: {}", dir));
        }
        wrap(session.swipe(
            third_segment_start(sw, sh, dir),
            third_segment_end(sw, sh, dir),
            duration_ms.unwrap_or(500),
        ).await)
    }

    async fn scroll(&self, session: &Session, direction: Option<&str>) -> CommandResult {
        wrap(session.scroll(direction.unwrap_or("down")).await)
    }

    async fn scroll_until_visible(&self, session: &Session, selector: &Selector, timeout_ms: Option<u64>, direction: Option<&str>) -> CommandResult {
        let deadline = self.deadline_for(timeout_ms, self.config.scroll_until_visible_ms);
        let mut scrolls = 0u32;
        loop {
            let probe_deadline = Instant::now() + Duration::from_secs(1);
            if let Ok(info) = resolver::find(session, selector, probe_deadline, false).await {
                return success_with_element(info);
            }
            if scrolls >= self.config.scroll_cap || Instant::now() >= deadline {
                return CommandResult::fail("scrollUntilVisible: element did not appear within deadline or scroll cap");
            }
            if let Err(e) = session.scroll(direction.unwrap_or("down")).await {
                return CommandResult::fail(e.to_string());
            }
            scrolls += 1;
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
    }

    async fn input_text(&self, session: &Session, text: &str) -> CommandResult {
        if text.is_empty() {
            return CommandResult::fail("inputText: empty text");
        }
        if session.input_text_active(text).await.is_ok() {
            return CommandResult::ok();
        }
        // Fallback to the Appium-specific element-value endpoint against
        // the currently focused element.
        match session.active_element_id().await {
            Ok(Some(id)) => wrap(session.input_text_element_fallback(&id, text).await),
            _ => CommandResult::fail("inputText: primary and fallback paths both failed"),
        }
    }

    async fn input_random(&self, session: &Session, data_type: Option<&str>, length: Option<usize>) -> CommandResult {
        let generated = generate_random(data_type, length.unwrap_or(10));
        let result = self.input_text(session, &generated).await;
        if result.success {
            CommandResult {
                data: Some(serde_json::Value::String(generated)),
                ..result
            }
        } else {
            result
        }
    }

    async fn erase_text(&self, session: &Session, count: Option<u32>) -> CommandResult {
        if session.clear_active().await.is_ok() {
            return CommandResult::ok();
        }
        let n = count.unwrap_or(50);
        for _ in 0..n {
            if session.press_delete_keycode().await.is_err() {
                return CommandResult::fail("eraseText: delete keycode sequence failed");
            }
        }
        CommandResult::ok()
    }

    async fn assert_visible(&self, session: &Session, selector: &Selector, timeout_ms: Option<u64>) -> CommandResult {
        // Presence is sufficient: the native layer only exposes visible
        // elements, so no follow-up /displayed call is issued.
        match self.resolve(session, selector, timeout_ms, false).await {
            Ok(info) => success_with_element(info),
            Err(e) => CommandResult::fail(e.to_string()),
        }
    }

    async fn assert_not_visible(&self, session: &Session, selector: &Selector, timeout_ms: Option<u64>) -> CommandResult {
        let deadline = self.deadline_for(timeout_ms, self.config.assert_not_visible_ms);
        match resolver::find(session, selector, deadline, false).await {
            Ok(_) => CommandResult::fail("assertNotVisible: element was found"),
            Err(_) => CommandResult::ok(),
        }
    }

    async fn wait_until(&self, session: &Session, visible: Option<&Selector>, not_visible: Option<&Selector>, timeout_ms: Option<u64>) -> CommandResult {
        let deadline = self.deadline_for(timeout_ms, self.config.wait_until_ms);
        loop {
            if let Some(selector) = visible {
                let single_shot = Instant::now();
                if resolver::find(session, selector, single_shot, false).await.is_ok() {
                    return CommandResult::ok();
                }
            } else if let Some(selector) = not_visible {
                let single_shot = Instant::now();
                if resolver::find(session, selector, single_shot, false).await.is_err() {
                    return CommandResult::ok();
                }
            } else {
                return CommandResult::fail("waitUntil requires visible or notVisible");
            }
            if Instant::now() >= deadline {
                return CommandResult::fail("waitUntil: condition not met before deadline");
            }
        }
    }

    async fn launch_app(&self, session: &Session, app_id: Option<&str>, clear_state: bool, stop_first: bool) -> CommandResult {
        let Some(app_id) = app_id else {
            return CommandResult::fail("launchApp requires an app id");
        };
        if stop_first {
            let _ = session.stop_app(app_id).await;
        }
        if clear_state {
            if let Err(e) = session.clear_app_state(app_id).await {
                return CommandResult::fail(e.to_string());
            }
        }
        wrap(session.launch_app(app_id).await)
    }

    async fn set_location(&self, session: &Session, latitude: &str, longitude: &str) -> CommandResult {
        let (lat, lon) = match (latitude.trim().parse::<f64>(), longitude.trim().parse::<f64>()) {
            (Ok(lat), Ok(lon)) => (lat, lon),
            _ => return CommandResult::fail("setLocation: malformed latitude/longitude"),
        };
        wrap(session.set_geolocation(lat, lon).await)
    }

    async fn open_link(&self, session: &Session, link: &str, auto_verify: bool) -> CommandResult {
        if let Err(e) = session.open_url(link).await {
            return CommandResult::fail(e.to_string());
        }
        if auto_verify {
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        CommandResult::ok()
    }

    async fn copy_text_from(&self, session: &Session, selector: &Selector, timeout_ms: Option<u64>) -> CommandResult {
        match self.resolve(session, selector, timeout_ms, false).await {
            Ok(info) if info.text.is_empty() => CommandResult::fail("copyTextFrom: element text is empty"),
            Ok(info) => {
                if let Err(e) = session.set_clipboard(&info.text).await {
                    return CommandResult::fail(e.to_string());
                }
                CommandResult {
                    data: Some(serde_json::Value::String(info.text.clone())),
                    ..success_with_element(info)
                }
            }
            Err(e) => CommandResult::fail(e.to_string()),
        }
    }

    async fn paste_text(&self, session: &Session) -> CommandResult {
        match session.get_clipboard().await {
            Ok(text) => self.input_text(session, &text).await,
            Err(e) => CommandResult::fail(e.to_string()),
        }
    }

    async fn press_key(&self, session: &Session, key: &str) -> CommandResult {
        match android_keycode(key) {
            Some(code) => wrap(session.press_key_android(code).await),
            None => CommandResult::fail(format!("pressKey: unknown key '{}'", key)),
        }
    }

    async fn take_screenshot(&self, session: &Session, label: Option<&str>) -> CommandResult {
        let label = label
            .map(str::to_string)
            .unwrap_or_else(|| format!("screenshot_{}", chrono::Utc::now().format("%Y%m%d_%H%M%S")));
        match session.screenshot().await {
            Ok(png_b64) => {
                info!(label = %label, "captured screenshot");
                CommandResult {
                    success: true,
                    message: Some(label),
                    data: Some(serde_json::Value::String(png_b64)),
                    ..Default::default()
                }
            }
            Err(e) => CommandResult::fail(e.to_string()),
        }
    }
}

fn wrap(result: Result<(), crate::error::FlowError>) -> CommandResult {
    match result {
        Ok(()) => CommandResult::ok(),
        Err(e) => CommandResult::fail(e.to_string()),
    }
}

fn success_with_element(info: crate::resolver::ElementInfo) -> CommandResult {
    CommandResult {
        success: true,
        message: Some(info.text.clone()),
        element: Some(info),
        ..Default::default()
    }
}

/// `"NN%, MM%"` (whitespace stripped) → absolute pixels.
fn parse_percentage_point(raw: &str, screen_width: i32, screen_height: i32) -> Option<(i32, i32)> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    if parts.len() != 2 {
        return None;
    }
    let px = parse_percent(parts[0])?;
    let py = parse_percent(parts[1])?;
    Some((
        (px * screen_width as f64).round() as i32,
        (py * screen_height as f64).round() as i32,
    ))
}

fn parse_percent(s: &str) -> Option<f64> {
    let trimmed = s.strip_suffix('%')?;
    trimmed.trim().parse::<f64>().ok().map(|v| v / 100.0)
}

fn third_segment_start(w: i32, h: i32, direction: &str) -> (i32, i32) {
    let cx = w / 2;
    let cy = h / 2;
    match direction {
        "up" => (cx, 2 * h / 3),
        "down" => (cx, h / 3),
        "left" => (w / 3, cy),
        "right" => (2 * w / 3, cy),
        _ => (cx, 2 * h / 3),
    }
}

fn third_segment_end(w: i32, h: i32, direction: &str) -> (i32, i32) {
    let cx = w / 2;
    let cy = h / 2;
    match direction {
        "up" => (cx, h / 3),
        "down" => (cx, 2 * h / 3),
        "left" => (2 * w / 3, cy),
        "right" => (w / 3, cy),
        _ => (cx, h / 3),
    }
}

fn android_keycode(name: &str) -> Option<u32> {
    match name.to_lowercase().as_str() {
        "back" => Some(4),
        "home" => Some(3),
        "enter" => Some(66),
        "backspace" => Some(67),
        "delete" => Some(112),
        "tab" => Some(61),
        "volume_up" => Some(24),
        "volume_down" => Some(25),
        "power" => Some(26),
        _ => None,
    }
}

fn generate_random(data_type: Option<&str>, length: usize) -> String {
    let mut rng = rand::thread_rng();
    match data_type.map(str::to_uppercase).as_deref() {
        Some("EMAIL") => {
            let local: String = (0..8).map(|_| rng.sample(rand::distributions::Alphanumeric) as char).collect();
            format!("{}@example.com", local.to_lowercase())
        }
        Some("NUMBER") => (0..length).map(|_| rng.gen_range(0..10).to_string()).collect(),
        Some("PERSON_NAME") => {
            const FIRST: &[&str] = &["Alex", "Sam", "Jordan", "Taylor", "Casey", "Morgan"];
            const LAST: &[&str] = &["Smith", "Lee", "Patel", "Garcia", "Kim", "Nguyen"];
            format!("{} {}", FIRST[rng.gen_range(0..FIRST.len())], LAST[rng.gen_range(0..LAST.len())])
        }
        _ => (0..length).map(|_| rng.sample(rand::distributions::Alphanumeric) as char).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_percentage_point_handles_whitespace() {
        let (x, y) = parse_percentage_point("50%, 50%", 1080, 2400).unwrap();
        assert_eq!((x, y), (540, 1200));
    }

    #[test]
    fn parse_percentage_point_rejects_malformed_input() {
        assert!(parse_percentage_point("50, 50%", 1080, 2400).is_none());
        assert!(parse_percentage_point("abc%, 50%", 1080, 2400).is_none());
    }

    #[test]
    fn android_keycode_table_matches_spec() {
        assert_eq!(android_keycode("back"), Some(4));
        assert_eq!(android_keycode("BACKSPACE"), Some(67));
        assert_eq!(android_keycode("power"), Some(26));
        assert_eq!(android_keycode("nonsense"), None);
    }

    #[test]
    fn third_segment_up_matches_spec_example() {
        let start = third_segment_start(1080, 2400, "up");
        let end = third_segment_end(1080, 2400, "up");
        assert_eq!(start, (540, 1600));
        assert_eq!(end, (540, 800));
    }

    #[test]
    fn generate_random_number_has_requested_length() {
        let s = generate_random(Some("NUMBER"), 6);
        assert_eq!(s.len(), 6);
        assert!(s.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn generate_random_email_contains_at_sign() {
        let s = generate_random(Some("EMAIL"), 10);
        assert!(s.contains('@'));
    }
}
