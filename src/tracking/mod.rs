//! C2 Request Builder + C8 HTTP Dispatcher.

pub mod action;
pub mod builder;
pub mod dispatcher;

pub use action::{Action, ActionKind, OrderItem};
pub use builder::{build, BuildContext, Method, TrackingRequest};
pub use dispatcher::{DispatchOutcome, Dispatcher};
