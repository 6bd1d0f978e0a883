//! JavaScript bindings
//!
//! `WasmWorker` is the body of a Web Worker: the worker script forwards each
//! `message` event to `handleMessage` together with its `postMessage`
//! function. The free functions expose the synchronous front end.

use crate::parser::parse;
use crate::printer::pretty_print;
use crate::protocol::{EvaluationOptions, ResponseType, WorkerRequest, WorkerResponse};
use crate::token;
use crate::validator;
use crate::worker::{self, Worker};
use serde::Serialize;
use wasm_bindgen::prelude::*;
use web_sys::console;

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    // Plain objects rather than ES Maps
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|e| JsValue::from_str(&e.to_string()))
}

#[wasm_bindgen]
pub struct WasmWorker {
    worker: Worker,
}

impl Default for WasmWorker {
    fn default() -> Self {
        WasmWorker::new()
    }
}

#[wasm_bindgen]
impl WasmWorker {
    #[wasm_bindgen(constructor)]
    pub fn new() -> WasmWorker {
        WasmWorker {
            worker: Worker::default(),
        }
    }

    /// Run one `{id, type, payload}` request, calling `post` for each response
    #[wasm_bindgen(js_name = handleMessage)]
    pub fn handle_message(&mut self, request: JsValue, post: &js_sys::Function) -> Result<(), JsValue> {
        let request: WorkerRequest = serde_wasm_bindgen::from_value(request)
            .map_err(|e| JsValue::from_str(&format!("Malformed request: {}", e)))?;

        let mut failure: Option<JsValue> = None;
        self.worker.handle(request, &mut |response: WorkerResponse| {
            if response.kind == ResponseType::Error {
                console::warn_1(&JsValue::from_str(&format!(
                    "calc worker: request {} failed: {}",
                    response.id, response.payload
                )));
            }
            let posted = to_js(&response).and_then(|value| post.call1(&JsValue::NULL, &value));
            if let Err(e) = posted {
                failure.get_or_insert(e);
            }
        });

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[wasm_bindgen(js_name = tokenize)]
pub fn tokenize_js(expression: &str) -> Result<JsValue, JsValue> {
    to_js(&token::tokenize(expression))
}

#[wasm_bindgen(js_name = prettyPrint)]
pub fn pretty_print_js(expression: &str) -> Result<String, JsValue> {
    parse(expression)
        .map(|ast| pretty_print(&ast))
        .map_err(|e| JsValue::from_str(&e.message))
}

#[wasm_bindgen(js_name = validate)]
pub fn validate_js(expression: &str) -> Result<JsValue, JsValue> {
    to_js(&validator::validate(expression))
}

/// Synchronous evaluation; `options` may be `undefined`
#[wasm_bindgen(js_name = evaluate)]
pub fn evaluate_js(expression: &str, options: JsValue) -> Result<JsValue, JsValue> {
    let options: EvaluationOptions = if options.is_undefined() || options.is_null() {
        EvaluationOptions::default()
    } else {
        serde_wasm_bindgen::from_value(options)
            .map_err(|e| JsValue::from_str(&format!("Invalid options: {}", e)))?
    };
    match worker::evaluate_expression(expression, &options) {
        Ok(result) => to_js(&result),
        Err(error) => Err(to_js(&error)?),
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod tests {
    use super::*;
    use wasm_bindgen_test::*;

    #[wasm_bindgen_test]
    fn test_pretty_print_export() {
        assert_eq!(pretty_print_js("2+3*4").unwrap(), "2 + 3 * 4");
        assert!(pretty_print_js("2 +").is_err());
    }

    #[wasm_bindgen_test]
    fn test_evaluate_export_defaults() {
        let value = evaluate_js("1/4", JsValue::UNDEFINED).unwrap();
        let formatted = js_sys::Reflect::get(&value, &JsValue::from_str("formatted")).unwrap();
        assert_eq!(formatted.as_string().as_deref(), Some("0.25"));
    }

    #[wasm_bindgen_test]
    fn test_handle_message_posts_result() {
        let responses = js_sys::Array::new();
        let sink = responses.clone();
        let post = Closure::<dyn FnMut(JsValue)>::new(move |v: JsValue| {
            sink.push(&v);
        });

        let request = to_js(&serde_json::json!({
            "id": "req_1",
            "type": "batch",
            "payload": {"expressions": ["1+1", "2*3"]}
        }))
        .unwrap();

        let mut worker = WasmWorker::new();
        worker
            .handle_message(request, post.as_ref().unchecked_ref())
            .unwrap();
        // two progress messages and the result
        assert_eq!(responses.length(), 3);
    }
}
