//! # Tether
//!
//! Request/response, host-initiated requests, and streamed replies between a
//! sandboxed UI and its host, over one untyped message channel that offers no
//! pairing, no backpressure, and no delivery guarantees.
//!
//! Every envelope carries a [`CorrelationId`](envelope::CorrelationId). The
//! side that starts an exchange picks the identifier; everything sent in
//! answer reuses it. Outbound sends retry with exponential backoff, inbound
//! envelopes are matched to their pending call or stream by identifier alone,
//! and anything unmatched is offered to a reverse-channel handler by `kind`.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod backoff;
pub mod cancel;
pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod future;
pub mod operation;
pub mod registry;
pub mod reverse;
pub mod session;
pub mod spawn;
pub mod stream;
pub mod timer;
pub mod transport;

#[cfg(feature = "metrics")]
pub mod metrics;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use config::SessionConfig;
pub use envelope::{CorrelationId, Envelope};
pub use error::{CallError, HandlerError, TransportUnavailable};
pub use session::{Inbound, Session, SessionStream};
