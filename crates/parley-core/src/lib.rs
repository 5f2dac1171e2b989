pub mod keys;
pub mod model;

pub use keys::{SessionKey, StateScope};
pub use model::{Event, NewSessionAttrs, Session, SessionPatch, StateData, StateMap};
