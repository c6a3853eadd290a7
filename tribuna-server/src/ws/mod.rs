pub mod gateway;
pub mod hub;
pub mod poll_timers;
pub mod relay;

pub use hub::{BroadcastHub, SocketCommand, SocketHandle};
pub use poll_timers::PollAutoClose;
pub use relay::{RelayEnvelope, RelayHandle};
