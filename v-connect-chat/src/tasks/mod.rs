pub mod supervisor;

pub use supervisor::supervise;
