pub mod aggregate;
pub mod pool;
pub mod runner;
pub mod scheduler;
pub mod turn;

pub use aggregate::Totals;
pub use pool::WorkerPool;
pub use runner::{TestRunner, TurnObserver};
pub use scheduler::Scheduler;
pub use turn::{TurnExecutor, TurnSettings};
