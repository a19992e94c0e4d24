use crate::panel::PermissionSettings;
use crate::platform::SimulatedBrowser;
use crate::session::CoordinatorHandle;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Client for the session coordinator actor
    pub coordinator: CoordinatorHandle,
    /// Tabs that can be opened, navigated and closed over HTTP
    pub browser: SimulatedBrowser,
    pub settings: Arc<PermissionSettings>,
}

impl AppState {
    pub fn new(
        coordinator: CoordinatorHandle,
        browser: SimulatedBrowser,
        settings: PermissionSettings,
    ) -> Self {
        Self {
            coordinator,
            browser,
            settings: Arc::new(settings),
        }
    }
}
