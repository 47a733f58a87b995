//! Shared constants for end-to-end tests

// ============================================================================
// Server
// ============================================================================

/// Secret the test server derives its action tokens from
pub const TEST_TOKEN_SECRET: &str = "e2e-test-secret";

/// Maximum time to wait for the server to answer its first request
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Delay between readiness probes
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 20;

/// Per-request timeout of the test client
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Cleanup
// ============================================================================

/// Maximum time to wait for a deferred run to finish
pub const RUN_COMPLETION_TIMEOUT_MS: u64 = 10_000;

/// Default upper bound of a manual run
pub const MANUAL_RUN_LIMIT: u64 = 200;

/// Default number of items still processed inside the request
pub const INLINE_RUN_THRESHOLD: u64 = 100;
