//! Default thresholds for the annotation engine

/// Minimum area (in square pixels) for closed shapes; smaller geometry is rejected
pub const DEFAULT_MIN_SHAPE_AREA: f64 = 9.0;

/// Minimum extent (in pixels) for polylines; shorter geometry is rejected
pub const DEFAULT_MIN_SHAPE_LENGTH: f64 = 3.0;

/// Hit radius used by `select` (in image pixels)
pub const DEFAULT_SELECT_TOLERANCE: f64 = 10.0;

/// Default number of undoable actions kept in history
pub const DEFAULT_MAX_HISTORY: usize = 100;

/// Default auto-save debounce delay in seconds
pub const DEFAULT_AUTOSAVE_DEBOUNCE_SECS: u64 = 5;

/// Default minimum interval between auto-saves in seconds
pub const DEFAULT_AUTOSAVE_INTERVAL_SECS: u64 = 60;

/// Upper bound of the auto-save retry back-off, in save intervals
pub const MAX_AUTOSAVE_BACKOFF: u32 = 8;
