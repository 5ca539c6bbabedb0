//! LPD8 controller driver
//!
//! SysEx program codec, cross-program ambiguity resolver, callback routing and
//! the device session state machine for the Akai LPD8 pad controller.

pub mod ambiguity;
pub mod callbacks;
pub mod codec;
pub mod config;
pub mod error;
pub mod midi;
pub mod pacing;
pub mod program;
pub mod session;
pub mod transport;

pub use callbacks::{PadTrigger, TriggerCallback, TriggerEvent};
pub use config::{ActiveSlotEncoding, AppConfig, SessionConfig};
pub use error::{Error, Result};
pub use program::{Knob, Pad, Program};
pub use session::{DeviceSession, SessionState};
pub use transport::{MidirTransport, PortFactory, Transport, TransportEvent};
