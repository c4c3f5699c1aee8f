pub mod clock;
pub mod session_tracker;
pub mod sync_adapter;
pub mod upstream;

pub use clock::{Clock, ManualClock, SystemClock};
pub use session_tracker::{SessionTracker, ShutdownReport, SweepReport, TrackerSettings};
pub use sync_adapter::{Observation, SyncEventAdapter, SyncOutcome};
pub use upstream::{ForwardRequest, UpstreamClient, UpstreamResponse};
