pub mod distribution;
pub mod history;
pub mod persist;

pub use distribution::DistributionService;
pub use history::HistoryService;
pub use persist::PersistenceWorker;
