//! # Browser bindings for Tether.
//!
//! Runs a [`tether_core::Session`] on the page's single thread with
//! [`Local`](tether_core::future::Local) futures, sends through a
//! `postMessage` handle or a host-installed bridge function found on
//! `globalThis`, and exposes the whole thing to JS as the `Tether` class.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(clippy::missing_const_for_fn)] // wasm_bindgen doesn't like const

pub mod convert;
pub mod error;
pub mod handler;
pub mod options;
pub mod signal;
pub mod spawn;
pub mod tether;
pub mod transport;

pub use tether::WasmTether;

#[cfg(feature = "wasm-tracing")]
use wasm_tracing::WasmLayerConfig;

use wasm_bindgen::prelude::*;

/// Set a panic hook to get better error messages if the code panics.
///
/// # Panics
///
/// Panics if a global tracing subscriber was already installed.
#[wasm_bindgen(js_name = setPanicHook)]
pub fn set_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();

    #[cfg(feature = "wasm-tracing")]
    {
        let mut config = WasmLayerConfig::new().with_max_level(tracing::Level::DEBUG);
        config.use_console_methods = true;

        #[allow(clippy::expect_used)]
        wasm_tracing::set_as_global_default_with_config(config)
            .expect("unable to set global default");
    }
}

/// Entry point called when the wasm module is instantiated.
#[wasm_bindgen(start)]
pub fn start() {
    set_panic_hook();
    tracing::info!("tether_wasm v{}", env!("CARGO_PKG_VERSION"));
}
