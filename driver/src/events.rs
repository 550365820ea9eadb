use crate::net::frame::{CaptureState, ServerState, Trajectory};
use hashbrown::HashMap;

/// Capability set of the upstream events manager. The driver pushes every
/// decoded protocol event through this seam; implementations decide what
/// to make of them.
pub trait EventsHandler: Send + Sync {
    /// The handshake completed and the session is up.
    fn connected(&self);

    /// A trajectory display packet arrived; entries are keyed `track<id>`.
    fn trajectories_discovered(&self, trajectories: HashMap<String, Trajectory>);

    /// The server reported the capture status of a track.
    fn capture_target_state(&self, state: CaptureState);

    /// A server status arrived. `None` means the session is down; the
    /// decoder keeps signalling it until the link recovers.
    fn server_state_changed(&self, state: Option<ServerState>);
}
