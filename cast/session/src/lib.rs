//! Session scaffolding: the deadline-ordered message handler, the
//! hierarchical state utility and the glue binding the control engine, the
//! channel manager and the stream bridge into one cast session.

mod handler;
mod session;
mod state;

pub use handler::{HandleMessage, Handler, Message};
pub use session::{
    msg_id, CastSession, SessionEventListener, SessionProperty, STREAM_MODULE_ID,
};
pub use state::{State, StateMachine};
