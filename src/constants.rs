//! Constants and fixed timings for the forkpool supervisor.
//!
//! None of these are configurable at runtime; they mirror the cadence of the
//! lifecycle commands and the monitor loop.

use std::{num::NonZeroUsize, time::Duration};

// ============================================================================
// File System Constants
// ============================================================================

/// Name of the PID file placed next to the running executable by default.
/// Contains the decimal process id of the detached supervisor.
pub const PID_FILE_NAME: &str = "daemon.pid";

/// Path stdio is redirected to when a supervisor detaches its output.
pub const DEV_NULL: &str = "/dev/null";

// ============================================================================
// Worker Pool Constants
// ============================================================================

/// Number of workers forked when the embedding program does not register a count.
pub const DEFAULT_WORKER_COUNT: NonZeroUsize = NonZeroUsize::MIN;

/// Exit status of a worker whose handler returned.
pub const WORKER_RETURNED_STATUS: i32 = 0;

/// Exit status of a worker whose handler panicked.
pub const WORKER_PANICKED_STATUS: i32 = 1;

// ============================================================================
// Process Management Timing
// ============================================================================

/// Upper bound on how long the monitor loop waits between PID file checks.
/// Child exits wake the loop earlier.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Pause after removing the PID file so the monitor loop can observe it.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// Pause between the stop and start halves of a restart.
pub const RESTART_DELAY: Duration = Duration::from_secs(1);

// ============================================================================
// Output Constants
// ============================================================================

/// Separator between an operator message and its success/failure tag.
pub const STATUS_SEPARATOR: &str = "......";
