#[derive(Debug, thiserror::Error)]
pub enum MachineError {
    #[error("invalid timer interval: {0} (must be at least one tick)")]
    InvalidTimerInterval(u64),
}
