//! Knobs the worker protocol exposes as ad-hoc parameters, collected into one
//! configuration surface instead of scattered positional arguments.

use std::time::Duration;

use sqlite_bridge_wire::DEFAULT_MAX_FRAME_SIZE;

bitflags::bitflags! {
    /// Mirrors the bit positions the worker recognizes on the wire (see
    /// `worker::engine::resolve_flags`), not the full `SQLITE_OPEN_*` space.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct OpenFlags: i64 {
        const READ_ONLY  = 0x01;
        const READ_WRITE = 0x02;
        const CREATE     = 0x04;
    }
}

impl Default for OpenFlags {
    fn default() -> Self {
        OpenFlags::READ_WRITE | OpenFlags::CREATE
    }
}

/// Which byte-stream transport the bootstrap uses to talk to the worker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransportMode {
    /// Resolves to `Pipe` on the Unix family this implementation targets.
    #[default]
    Auto,
    Pipe,
    Socket,
}

impl TransportMode {
    pub(crate) fn resolve(self) -> TransportMode {
        match self {
            TransportMode::Auto => TransportMode::Pipe,
            other => other,
        }
    }
}

/// Configuration accepted by [`crate::Factory::open`] and
/// [`crate::Factory::open_lazy`].
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    pub flags: OpenFlags,
    /// Idle period before a Lazy connection soft-closes its worker.
    /// `None` disables the timer. Defaults to 60 seconds.
    pub idle: Option<Duration>,
    pub transport: TransportMode,
    pub max_frame_size: usize,
    pub handshake_timeout: Duration,
    /// Path to the worker binary. Defaults to the value baked in at build
    /// time via `env!("CARGO_BIN_EXE_sqlite-bridge-worker")` by callers that
    /// link this crate inside the same workspace; library consumers outside
    /// the workspace must set this explicitly.
    pub worker_path: std::path::PathBuf,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        ConnectOptions {
            flags: OpenFlags::default(),
            idle: Some(Duration::from_secs(60)),
            transport: TransportMode::Auto,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            handshake_timeout: Duration::from_secs(5),
            worker_path: std::path::PathBuf::from("sqlite-bridge-worker"),
        }
    }
}

/// Negative `idle` disables the timer.
pub fn idle_from_secs(secs: f64) -> Option<Duration> {
    if secs < 0.0 {
        None
    } else {
        Some(Duration::from_secs_f64(secs))
    }
}
