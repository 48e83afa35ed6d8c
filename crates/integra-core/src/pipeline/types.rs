/// Integration stage, used for progress reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntegrationStage {
    OpeningFiles,
    Integrating { channel: usize },
    LargeScaleRejection { channel: usize },
    NoiseEvaluation,
    DrizzleData,
}

impl std::fmt::Display for IntegrationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpeningFiles => write!(f, "Opening files"),
            Self::Integrating { channel } => write!(f, "Integrating ch {channel}"),
            Self::LargeScaleRejection { channel } => write!(f, "Large-scale ch {channel}"),
            Self::NoiseEvaluation => write!(f, "Evaluating noise"),
            Self::DrizzleData => write!(f, "Drizzle data"),
        }
    }
}

/// Thread-safe progress reporting for the integration engine.
///
/// Implementors can use this to drive progress bars, logging, or any other
/// UI feedback. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    /// A new stage has started. `total_items` is the number of work items in
    /// this stage (rows, files), if known.
    fn begin_stage(&self, _stage: IntegrationStage, _total_items: Option<usize>) {}

    /// `items_done` more work items of the current stage have completed.
    fn advance(&self, _items_done: usize) {}

    /// The current stage is finished.
    fn finish_stage(&self) {}
}

/// No-op progress reporter, used when `run_integration` delegates.
pub(super) struct NoOpReporter;
impl ProgressReporter for NoOpReporter {}
