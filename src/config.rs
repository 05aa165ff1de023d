//! Pipeline configuration
//!
//! Controls what [`crate::pipeline`] does between the caller's pass and lowering, and how a
//! batch of bodies is scheduled.

/// Configuration for [`crate::pipeline::transform_body`] and [`crate::pipeline::transform_batch`]
///
/// The lift and lower steps always run; these switches only select the optional work around
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Run the stack depth analysis after the caller's pass and store the computed maximum
    /// on the body before lowering
    pub recompute_max_stack: bool,
    /// When recomputing, keep the declared maximum if it is larger than the computed one
    pub preserve_larger_max_stack: bool,
    /// Process batches on the rayon thread pool instead of the calling thread
    pub parallel: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            recompute_max_stack: true,
            preserve_larger_max_stack: false,
            parallel: true,
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration that lifts and lowers without touching the stack header
    ///
    /// The declared `max_stack` is carried through unchanged and batches run sequentially,
    /// which keeps the order of log output stable.
    #[must_use]
    pub fn passthrough() -> Self {
        Self {
            recompute_max_stack: false,
            preserve_larger_max_stack: false,
            parallel: false,
        }
    }

    /// Creates a configuration that always replaces `max_stack` with the computed value
    ///
    /// **Warning**: a declared value larger than the computed one is lowered, which some
    /// hand-written bodies rely on not happening.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            recompute_max_stack: true,
            preserve_larger_max_stack: false,
            parallel: true,
        }
    }

    /// Creates a configuration that recomputes `max_stack` but never shrinks it
    #[must_use]
    pub fn conservative() -> Self {
        Self {
            recompute_max_stack: true,
            preserve_larger_max_stack: true,
            parallel: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_config_presets() {
        let passthrough = PipelineConfig::passthrough();
        assert!(!passthrough.recompute_max_stack);
        assert!(!passthrough.parallel);

        let strict = PipelineConfig::strict();
        assert!(strict.recompute_max_stack);
        assert!(!strict.preserve_larger_max_stack);
        assert!(strict.parallel);

        let conservative = PipelineConfig::conservative();
        assert!(conservative.recompute_max_stack);
        assert!(conservative.preserve_larger_max_stack);
    }

    #[test]
    fn test_default_config() {
        assert_eq!(PipelineConfig::default(), PipelineConfig::strict());
    }
}
