//! Registry of the applications whose output this worker serves.
//!
//! Updated only at application start and stop; request handlers take a
//! read snapshot of the active application.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppIdentity {
    pub user: String,
    pub app_id: String,
}

#[derive(Debug, Default)]
struct Apps {
    users: HashMap<String, String>,
    active: Option<String>,
}

#[derive(Debug, Default)]
pub struct AppRegistry {
    inner: RwLock<Apps>,
}

impl AppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `app_id` for `user` and make it the active application.
    pub fn init_app(&self, user: &str, app_id: &str) {
        let mut apps = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        apps.users.insert(app_id.to_string(), user.to_string());
        apps.active = Some(app_id.to_string());
        info!("Serving output of application {} for user {}", app_id, user);
    }

    pub fn stop_app(&self, app_id: &str) {
        let mut apps = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if apps.users.remove(app_id).is_some() {
            info!("Stopped serving application {}", app_id);
        }
        if apps.active.as_deref() == Some(app_id) {
            apps.active = None;
        }
    }

    pub fn active(&self) -> Option<AppIdentity> {
        let apps = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let app_id = apps.active.as_ref()?;
        apps.users.get(app_id).map(|user| AppIdentity {
            user: user.clone(),
            app_id: app_id.clone(),
        })
    }
}
