//! # murmur-client
//!
//! Client-side reconciliation of the event stream a chat backend delivers:
//! duplicate suppression, the peer roster, join/leave narration, the
//! timeline, and trust-on-first-use checks of peer key fingerprints.
//!
//! [`session::SessionController`] is the synchronous core. [`bridge`] runs it
//! on a tokio task behind command and event channels.

pub mod bridge;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod error;
pub mod events;
pub mod roster;
pub mod session;
pub mod timeline;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

use tracing_subscriber::{fmt, EnvFilter};

pub use bridge::{spawn_session, SessionCommand, SessionHandle};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ClientConfig, ReconcileLimits};
pub use error::{ClientError, TransportError};
pub use events::{Notice, SessionEpoch, SessionEvent, TransportEvent};
pub use session::{ClientContext, ConnectionState, SessionController, SessionSnapshot};
pub use transport::{ConnectRequest, Transport};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter. Later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("murmur_client=debug,murmur_store=info,warn"));

    let installed = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("Starting murmur client v{}", env!("CARGO_PKG_VERSION"));
    }
}
