//! The `Driver` contract — a narrow five-method interface (`Execute`,
//! `Screenshot`, `Hierarchy`, `GetState`, `GetPlatformInfo`) implemented by
//! whatever concretely talks to the device. `DeviceOps` is the lower-level
//! primitive surface the [`crate::executor::Executor`] drives;
//! [`DriverFacade`] is the one implementation shipped here, owning a
//! [`crate::session::Session`] and an [`crate::executor::Executor`].

use async_trait::async_trait;

use crate::error::FlowError;
use crate::executor::Executor;
use crate::hierarchy::Platform;
use crate::resolver::ElementSource;
use crate::session::Session;
use crate::step::{CommandResult, Step};

/// Device-level primitives the executor composes into step handlers. A
/// narrower surface than the wire protocol itself — one method per device
/// capability, not per endpoint.
#[async_trait]
pub trait DeviceOps: Send + Sync {
    async fn tap_element(&self, element_id: &str) -> Result<(), FlowError>;
    async fn tap_point(&self, x: i32, y: i32) -> Result<(), FlowError>;
    async fn double_tap_point(&self, x: i32, y: i32) -> Result<(), FlowError>;
    async fn long_press_point(&self, x: i32, y: i32, duration_ms: u64) -> Result<(), FlowError>;
    async fn swipe(&self, start: (i32, i32), end: (i32, i32), duration_ms: u64) -> Result<(), FlowError>;
    async fn scroll(&self, direction: &str) -> Result<(), FlowError>;

    async fn input_text_active(&self, text: &str) -> Result<(), FlowError>;
    async fn input_text_element_fallback(&self, element_id: &str, text: &str) -> Result<(), FlowError>;
    async fn active_element_id(&self) -> Result<Option<String>, FlowError>;
    async fn clear_active(&self) -> Result<(), FlowError>;
    async fn press_delete_keycode(&self) -> Result<(), FlowError>;
    async fn press_key_android(&self, keycode: u32) -> Result<(), FlowError>;

    async fn get_clipboard(&self) -> Result<String, FlowError>;
    async fn set_clipboard(&self, text: &str) -> Result<(), FlowError>;

    async fn launch_app(&self, app_id: &str) -> Result<(), FlowError>;
    async fn stop_app(&self, app_id: &str) -> Result<(), FlowError>;
    async fn terminate_app(&self, app_id: &str) -> Result<(), FlowError>;
    async fn clear_app_state(&self, app_id: &str) -> Result<(), FlowError>;

    async fn open_url(&self, url: &str) -> Result<(), FlowError>;
    async fn set_geolocation(&self, latitude: f64, longitude: f64) -> Result<(), FlowError>;
    async fn set_orientation(&self, orientation: &str) -> Result<(), FlowError>;
    async fn get_orientation(&self) -> Result<String, FlowError>;
    async fn hide_keyboard(&self) -> Result<(), FlowError>;
    async fn press_back(&self) -> Result<(), FlowError>;

    async fn screenshot(&self) -> Result<String, FlowError>;
    fn screen_size(&self) -> (i32, i32);
}

#[derive(Debug, Clone, Default)]
pub struct DriverState {
    pub orientation: String,
    pub clipboard: String,
}

#[derive(Debug, Clone)]
pub struct PlatformInfo {
    pub platform: Platform,
    pub screen_width: i32,
    pub screen_height: i32,
}

#[async_trait]
pub trait Driver: Send + Sync {
    async fn execute(&self, step: &Step) -> CommandResult;
    async fn screenshot(&self) -> Result<String, FlowError>;
    async fn hierarchy(&self) -> Result<String, FlowError>;
    /// Errors degrade silently to empty strings — this method never fails
    /// outright.
    async fn get_state(&self) -> DriverState;
    fn get_platform_info(&self) -> PlatformInfo;
}

pub struct DriverFacade {
    session: Session,
    executor: Executor,
}

impl DriverFacade {
    pub fn new(session: Session, executor: Executor) -> Self {
        Self { session, executor }
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }
}

#[async_trait]
impl Driver for DriverFacade {
    async fn execute(&self, step: &Step) -> CommandResult {
        self.executor.run(&self.session, step).await
    }

    async fn screenshot(&self) -> Result<String, FlowError> {
        self.session.screenshot().await
    }

    async fn hierarchy(&self) -> Result<String, FlowError> {
        ElementSource::page_source(&self.session).await
    }

    async fn get_state(&self) -> DriverState {
        let orientation = self.session.get_orientation().await.unwrap_or_default().to_lowercase();
        let clipboard = self.session.get_clipboard().await.unwrap_or_default();
        DriverState { orientation, clipboard }
    }

    fn get_platform_info(&self) -> PlatformInfo {
        let (w, h) = self.session.screen_size();
        PlatformInfo {
            platform: self.session.platform(),
            screen_width: w,
            screen_height: h,
        }
    }
}
