//! Abstraction over `Send` and `!Send` futures.
//!
//! Native hosts drive the protocol on a multi-threaded runtime and need
//! [`Sendable`] futures. The browser side runs everything on one thread and
//! uses [`Local`] futures, which lets transports hold `!Send` JS handles.

use core::future::Future;

use futures::future::{BoxFuture, LocalBoxFuture};

/// A family of boxed futures.
pub trait FutureKind {
    /// The boxed future type for this kind.
    type Future<'a, T: 'a>: Future<Output = T> + 'a;
}

/// Futures that are `Send`.
#[derive(Debug, Clone, Copy)]
pub enum Sendable {}

impl FutureKind for Sendable {
    type Future<'a, T: 'a> = BoxFuture<'a, T>;
}

/// Futures that stay on the current thread.
#[derive(Debug, Clone, Copy)]
pub enum Local {}

impl FutureKind for Local {
    type Future<'a, T: 'a> = LocalBoxFuture<'a, T>;
}
