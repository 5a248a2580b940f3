pub mod bus;
pub mod types;

pub use bus::{EventBus, EventBusConfig, EventListener, ListenerErrorHandler, ListenerId};
pub use types::{events, EventCategory, WukongEvent};
