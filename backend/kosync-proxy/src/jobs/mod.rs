pub mod session_sweeper;

pub use session_sweeper::SessionSweepJob;
