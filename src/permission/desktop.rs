//! Consent prompt for desktop sessions.
//!
//! The grant is a small JSON file in the state directory. Asking for it
//! shows a notification with allow / deny actions; whatever the user picks
//! (or closing the notification) hands control back to the gate. A prompt
//! the gate withdraws is closed, and a late answer to it is ignored.

use notify_rust::NotificationHandle;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::{CorrelationToken, OverlayPermissions, SettingsReturn};

pub const GRANT_FILE_NAME: &str = "permission.json";

const ACTION_ALLOW: &str = "allow";
const ACTION_DENY: &str = "deny";

#[derive(Debug, Default, Serialize, Deserialize)]
struct GrantFile {
    #[serde(default)]
    overlay_granted: bool,
}

/// Prompts still on screen, by request serial
type OpenPrompts = Arc<Mutex<HashMap<u64, NotificationHandle>>>;

fn lock_prompts(prompts: &OpenPrompts) -> MutexGuard<'_, HashMap<u64, NotificationHandle>> {
    prompts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Grant file plus notification-based prompt
#[derive(Clone)]
pub struct DesktopPermissions {
    grant_path: PathBuf,
    prompts: OpenPrompts,
}

impl std::fmt::Debug for DesktopPermissions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DesktopPermissions")
            .field("grant_path", &self.grant_path)
            .field("open_prompts", &lock_prompts(&self.prompts).len())
            .finish()
    }
}

impl DesktopPermissions {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            grant_path: state_dir.join(GRANT_FILE_NAME),
            prompts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn grant_path(&self) -> &Path {
        &self.grant_path
    }

    /// Record the grant directly. A running daemon notices a revocation the
    /// next time the bubble is asked to do something.
    pub fn set_granted(&self, granted: bool) -> std::io::Result<()> {
        write_grant(&self.grant_path, granted)
    }
}

fn read_grant(path: &Path) -> bool {
    match fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str::<GrantFile>(&raw) {
            Ok(grant) => grant.overlay_granted,
            Err(e) => {
                warn!("Ignoring unreadable grant file {:?}: {}", path, e);
                false
            }
        },
        Err(_) => false,
    }
}

fn write_grant(path: &Path, granted: bool) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_string_pretty(&GrantFile {
        overlay_granted: granted,
    })
    .map_err(std::io::Error::other)?;
    fs::write(path, body)
}

/// A graphical session is what hosts the prompt.
pub fn graphical_session_present() -> bool {
    std::env::var_os("WAYLAND_DISPLAY").is_some() || std::env::var_os("DISPLAY").is_some()
}

impl OverlayPermissions for DesktopPermissions {
    fn can_draw_overlays(&self) -> bool {
        read_grant(&self.grant_path)
    }

    fn has_foreground_host(&self) -> bool {
        graphical_session_present()
    }

    fn launch_settings(&self, on_return: SettingsReturn) -> Result<(), String> {
        use notify_rust::{ActionResponse, Hint, Notification, Timeout};

        let handle = Notification::new()
            .appname("Spark")
            .summary("Show the Spark bubble?")
            .body("Allow Spark to draw its floating bubble above other windows.")
            .action(ACTION_ALLOW, "Allow")
            .action(ACTION_DENY, "Don't allow")
            .hint(Hint::Resident(true))
            .timeout(Timeout::Never)
            .show()
            .map_err(|e| format!("Failed to show consent prompt: {}", e))?;

        let id = handle.id();
        let serial = on_return.token().serial;
        lock_prompts(&self.prompts).insert(serial, handle);

        let grant_path = self.grant_path.clone();
        let prompts = self.prompts.clone();
        std::thread::spawn(move || {
            let mut answer = None;
            let waited = notify_rust::handle_action(id, |response: &ActionResponse<'_>| {
                if let ActionResponse::Custom(action) = response {
                    answer = Some(action.to_string());
                }
            });
            if let Err(e) = waited {
                warn!("Lost track of consent prompt: {}", e);
            }

            // a dismissed prompt was already taken out of the map
            if lock_prompts(&prompts).remove(&serial).is_none() {
                debug!("Ignoring answer to withdrawn consent prompt {}", serial);
                return;
            }
            info!("Consent prompt answered with {:?}", answer);
            if answer.as_deref() == Some(ACTION_ALLOW) {
                if let Err(e) = write_grant(&grant_path, true) {
                    warn!("Failed to record overlay grant: {}", e);
                }
            }
            on_return.deliver();
        });
        Ok(())
    }

    fn dismiss(&self, token: CorrelationToken) {
        let handle = lock_prompts(&self.prompts).remove(&token.serial);
        if let Some(handle) = handle {
            info!("Closing consent prompt {}", token.serial);
            handle.close();
        }
    }
}
