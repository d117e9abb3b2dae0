pub mod condition;
pub mod lock;

pub use condition::Condition;
pub use lock::Lock;
