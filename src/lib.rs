//! Control plane for the `ech-workers` proxy process: profile storage, a
//! process supervisor with output relay, the OS-wide system proxy toggle and
//! login autostart registration.
pub mod app;
pub mod autostart;
pub mod color;
pub mod config;
pub mod errors;
pub mod lock;
pub mod profile;
pub mod relay;
pub mod supervisor;
pub mod sysproxy;
pub mod telemetry;
pub mod ui {
    pub mod warn;
}
pub mod util;

pub use app::App;
pub use color::*;
pub use errors::*;
pub use lock::{acquire_instance_lock, InstanceLock};
pub use profile::{Profile, ProfileSet, ProfileStore};
pub use relay::{channel_sink, LineSink, OutputLine, StreamKind};
pub use supervisor::{
    Phase, StartOutcome, StopReason, Supervisor, SupervisorEvent, SupervisorOptions,
    SupervisorStatus,
};
pub use sysproxy::{MemorySystemProxy, ProxySnapshot, SystemProxy};
