//! Native session provider abstraction
//!
//! A provider enumerates the VPN profiles configured in the operating
//! system and creates opaque session handles for them. The handles model a
//! blocking, callback-based OS API: every call may block, and status
//! changes are announced through an event handler.
//!
//! ```text
//! ┌──────────────────────────────┐
//! │   SessionPool (native queue) │
//! └──────────────┬───────────────┘
//!                │ Box<dyn NativeSession>
//!      ┌─────────┴──────────┐
//!      ▼                    ▼
//! ┌──────────────┐   ┌──────────────┐
//! │NetworkManager│   │   Memory     │  <- NativeSessionProvider
//! └──────────────┘   └──────────────┘
//! ```

use crate::error::VpnError;
use crate::types::NativeStatus;
use std::sync::Arc;

pub mod memory;
pub mod networkmanager;

pub use memory::MemoryProvider;
pub use networkmanager::NetworkManagerProvider;

/// Events delivered by a native session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The tunnel came up
    Connected,

    /// The tunnel failed to come up or dropped
    Failed,

    /// Any other status change
    StatusChanged,
}

/// Callback invoked by a session on every native event
pub type EventHandler = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// A profile as reported by the native layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeProfile {
    pub id: String,
    pub name: String,

    /// Internal profile that should never be shown to the user
    pub system: bool,
}

/// Opaque native session handle bound to one connection id
///
/// Calls may block; callers are expected to serialize them.
pub trait NativeSession: Send {
    /// Ask the OS to bring the tunnel up; returns once the request is accepted
    fn start(&self) -> Result<(), VpnError>;

    /// Ask the OS to tear the tunnel down; returns once the request is accepted
    fn stop(&self) -> Result<(), VpnError>;

    /// Query the current native status
    fn status(&self) -> NativeStatus;

    /// Register the callback fired on every native event
    fn set_event_handler(&mut self, handler: EventHandler);

    /// Cancel pending work and stop event delivery
    fn cancel(&self);

    /// Release the handle
    fn release(self: Box<Self>);
}

/// Platform adapter producing native sessions
pub trait NativeSessionProvider: Send + Sync {
    /// Short provider name used in logs
    fn name(&self) -> &str;

    /// Enumerate configured VPN profiles
    fn list_profiles(&self) -> Result<Vec<NativeProfile>, VpnError>;

    /// Create a session handle for `id`
    fn create_session(&self, id: &str) -> Result<Box<dyn NativeSession>, VpnError>;
}
