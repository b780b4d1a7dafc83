pub mod attach;
pub mod gc;
pub mod lock;
pub mod path_watch;
pub mod registry;
pub mod rkt;
pub mod worker;

pub use attach::{AttachAborted, AttachSettings, Attacher};
pub use gc::{GcReport, GcSettings, GcSweep, PodOutcome};
pub use lock::{LockAttempt, LockMode, PodLock, PodLocks};
pub use path_watch::await_path;
pub use registry::PodRegistry;
pub use rkt::{RktCli, WorkerLaunch, check_exit};
pub use worker::{Worker, WorkerSettings};
