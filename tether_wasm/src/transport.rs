//! Transports discovered on `globalThis`.
//!
//! Both strategies look their target up again on every availability check,
//! so a host that installs or tears down its integration after startup is
//! picked up without rebuilding the session.

pub mod global_bridge;
pub mod post_message;

pub use self::{global_bridge::GlobalBridgeTransport, post_message::PostMessageTransport};

use wasm_bindgen::prelude::*;

/// Read `globalThis[name]`, treating `undefined` and `null` as absent.
pub(crate) fn global_property(name: &str) -> Option<JsValue> {
    let value = js_sys::Reflect::get(&js_sys::global(), &JsValue::from_str(name)).ok()?;
    if value.is_undefined() || value.is_null() {
        None
    } else {
        Some(value)
    }
}
