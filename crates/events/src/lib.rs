//! Domain events exchanged between CRM modules, and the registry that routes them.

pub mod event;
pub mod handler;
pub mod kinds;
pub mod registry;

pub use event::{DomainEvent, EventId};
pub use handler::{EventAction, EventListener, HandlerError, TypedAction, typed_action};
pub use kinds::{CrossModuleEvent, EventDecodeError, event_types};
pub use registry::{EventTypeMapping, EventTypeRegistry, RegistryError};
