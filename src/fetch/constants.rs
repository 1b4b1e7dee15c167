//! Constants for the fetch module (timeouts, retry defaults, rate limiting).

use std::time::Duration;

/// Default per-request timeout (30 seconds).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP connect timeout, applied on top of the per-request timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default total attempts per request, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default backoff base delay.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Default backoff cap.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// HTTP statuses retried by default.
pub const DEFAULT_RETRY_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Maximum Retry-After header value (1 hour) to prevent excessive delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Warning threshold for cumulative rate limit waiting per source (30 seconds).
pub const CUMULATIVE_WAIT_WARNING_THRESHOLD: Duration = Duration::from_secs(30);
