//! macOS permission handling

use core_graphics::access::ScreenCaptureAccess;

/// Check if screen recording permission is granted
pub fn has_screen_recording_permission() -> bool {
    ScreenCaptureAccess.preflight()
}

/// Request screen recording permission
///
/// Shows the system prompt if permission was never decided. Returns true only
/// if permission is already granted; a fresh grant needs an app restart.
pub fn request_screen_recording_permission() -> bool {
    ScreenCaptureAccess.request()
}
