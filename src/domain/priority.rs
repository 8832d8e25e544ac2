/// Scheduling priority for an upstream fetch.
///
/// The orchestrator's queue serves `High` before `Normal` before `Low`, and
/// FIFO within one level. A live-game poller runs `High`; background cache
/// warmers run `Low`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    /// All levels, highest first. Used by the queue's drain order.
    pub const DESCENDING: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];
}
