//! Protocol constants and metric names.

/// Prefix of the DOM anchor a mounted child renders into.
pub const MOUNT_ANCHOR_PREFIX: &str = "mount_span_";

/// Appended to a page path to form its WebSocket route.
pub const WS_ROUTE_SUFFIX: &str = "ws_goliveview";

// Metric name constants to avoid typos across crates.

/// Sessions opened total (counter).
pub const SESSIONS_TOTAL: &str = "live_sessions_total";
/// Active sessions (gauge).
pub const SESSIONS_ACTIVE: &str = "live_sessions_active";
/// Session duration seconds (histogram).
pub const SESSION_DURATION_SECONDS: &str = "live_session_duration_seconds";
/// Sessions rejected because the connection limit was reached (counter).
pub const SESSIONS_REJECTED_TOTAL: &str = "live_sessions_rejected_total";
/// Events dispatched to a handler (counter, labels: event).
pub const EVENTS_TOTAL: &str = "live_events_total";
/// Handler invocations that returned an error or panicked (counter, labels: event, kind).
pub const EVENT_FAILURES_TOTAL: &str = "live_event_failures_total";
/// Inbound frames dropped because no driver or request matched (counter, labels: type).
pub const FRAMES_UNMATCHED_TOTAL: &str = "live_frames_unmatched_total";
/// Envelopes written to the transport (counter, labels: type).
pub const PATCHES_TOTAL: &str = "live_patches_total";
/// Renders that failed or panicked (counter).
pub const RENDER_FAILURES_TOTAL: &str = "live_render_failures_total";
/// Correlated get requests issued (counter, labels: sub_type).
pub const GET_REQUESTS_TOTAL: &str = "live_get_requests_total";
/// Correlated get requests that timed out (counter).
pub const GET_TIMEOUTS_TOTAL: &str = "live_get_timeouts_total";
