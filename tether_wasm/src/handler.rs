//! JS functions as reverse-channel handlers.

use futures::{future::LocalBoxFuture, FutureExt};
use serde_json::Value;
use tether_core::{future::Local, reverse::ReverseHandler, HandlerError};
use wasm_bindgen::{prelude::*, JsCast};
use wasm_bindgen_futures::JsFuture;

use crate::convert;

/// Answers host requests by calling a JS function with the payload.
///
/// The function may return the reply directly or a `Promise` of it. A throw
/// or a rejection is sent back as an error payload.
#[derive(Debug, Clone)]
pub struct JsHandler {
    function: js_sys::Function,
}

impl JsHandler {
    /// Wrap a JS function.
    #[must_use]
    pub fn new(function: js_sys::Function) -> Self {
        Self { function }
    }
}

async fn invoke(function: js_sys::Function, payload: Value) -> Result<Value, HandlerError> {
    let argument = convert::to_js(&payload).map_err(|e| HandlerError::new(e.to_string()))?;
    let returned = function
        .call1(&JsValue::NULL, &argument)
        .map_err(|thrown| HandlerError::new(convert::describe(&thrown)))?;

    let settled = match returned.dyn_into::<js_sys::Promise>() {
        Ok(promise) => JsFuture::from(promise)
            .await
            .map_err(|rejected| HandlerError::new(convert::describe(&rejected)))?,
        Err(value) => value,
    };

    convert::from_js(&settled).map_err(|e| HandlerError::new(e.to_string()))
}

impl ReverseHandler<Local> for JsHandler {
    fn handle(&self, payload: Value) -> LocalBoxFuture<'static, Result<Value, HandlerError>> {
        invoke(self.function.clone(), payload).boxed_local()
    }
}
