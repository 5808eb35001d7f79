//! Progress reporting for long-running smoothing runs.
//!
//! The hierarchical solver reports once per solved region, mapped into the
//! slice of the overall run that belongs to the current level.
//!
//! # Example
//!
//! ```
//! use grainsmooth::algo::Progress;
//!
//! let progress = Progress::new(|current, total, message| {
//!     eprintln!("[{}/{}] {}", current, total, message);
//! });
//! progress.report(1, 2, "patch interiors");
//! ```

/// A progress callback that receives updates during long-running operations.
///
/// The callback receives:
/// - `current`: Current step (0-based)
/// - `total`: Total number of steps
/// - `message`: Description of the current operation
pub struct Progress {
    callback: Box<dyn Fn(usize, usize, &str) + Send + Sync>,
}

impl Progress {
    /// Create a new progress reporter with the given callback.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(usize, usize, &str) + Send + Sync + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }

    /// Report progress.
    #[inline]
    pub fn report(&self, current: usize, total: usize, message: &str) {
        (self.callback)(current, total, message);
    }

    /// Report progress within one level of the hierarchy.
    ///
    /// Maps `regions_done` of `regions_total` onto
    /// `[level, level + 1)` out of `levels` steps, in thousandths.
    #[inline]
    pub fn report_sub(
        &self,
        regions_done: usize,
        regions_total: usize,
        level: usize,
        levels: usize,
        message: &str,
    ) {
        if regions_total == 0 || levels == 0 {
            return;
        }
        let sub_fraction = (regions_done * 1000) / regions_total;
        let effective = level * 1000 + sub_fraction;
        (self.callback)(effective, levels * 1000, message);
    }

    /// Create a no-op progress reporter that discards all updates.
    pub fn none() -> Self {
        Self::new(|_, _, _| {})
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::none()
    }
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress").finish_non_exhaustive()
    }
}
