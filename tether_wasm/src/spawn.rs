//! Spawning on the browser's microtask queue.

use futures::{
    future::{Abortable, LocalBoxFuture},
    stream::AbortHandle,
};
use tether_core::{future::Local, spawn::Spawn};

/// A [`Spawn`] that hands tasks to [`wasm_bindgen_futures::spawn_local`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct WasmSpawn;

impl Spawn<Local> for WasmSpawn {
    fn spawn(&self, fut: LocalBoxFuture<'static, ()>) -> AbortHandle {
        let (handle, reg) = AbortHandle::new_pair();
        wasm_bindgen_futures::spawn_local(async move {
            let _ = Abortable::new(fut, reg).await;
        });
        handle
    }
}
