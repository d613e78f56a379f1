//! ct-session: Session provisioning and terminal transport for cloudterm
//!
//! Three pieces, wired in order: the provisioner asks the control
//! plane for a console and a terminal inside it, the duplex channel
//! keeps one WebSocket open to the negotiated endpoint, and the bridge
//! pumps bytes between that channel and the local standard streams.

pub mod bridge;
pub mod channel;
pub mod provision;

pub use bridge::{ResizeTarget, TerminalBridge};
pub use channel::{ChannelConfig, ChannelState, DuplexChannel, TransportError};
pub use provision::{ProvisionError, Session, SessionHandle, SessionProvisioner, UserSettings};
