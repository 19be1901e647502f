//! Application-wide constants for the playground client.
//!
//! This module centralizes the timing values and wire defaults used by the
//! session engine so they can be found in one place. Most of them can be
//! overridden at runtime through [`crate::config::Config`].
//!
//! # Categories
//!
//! - **Timeouts**: Network and operation timeouts
//! - **Timers**: Flush, debounce and countdown periods
//! - **Transport**: Reconnection and the default backend

use std::time::Duration;

// ============================================================================
// Timeouts
// ============================================================================

/// HTTP client request timeout for session REST calls.
///
/// Instance creation may wait on the backend pulling an image, so this is
/// longer than a typical API timeout.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Timers
// ============================================================================

/// Period of the per-instance input flush timer.
///
/// Keystrokes typed within one period leave as a single `terminal in`
/// message, so the outbound rate is bounded regardless of typing speed.
pub const INPUT_FLUSH_INTERVAL: Duration = Duration::from_millis(70);

/// Quiet period before a burst of local viewport resizes is sent.
pub const RESIZE_DEBOUNCE: Duration = Duration::from_millis(100);

/// Granularity of the session expiry countdown.
pub const TTL_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Placeholder shown before the session expiry is known.
pub const TTL_UNKNOWN: &str = "--:--:--";

// ============================================================================
// Transport
// ============================================================================

/// Fixed delay between reconnection attempts after the socket drops.
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Default backend origin when no configuration overrides it.
pub const DEFAULT_SERVER_URL: &str = "http://localhost";
