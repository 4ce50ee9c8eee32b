//! In-browser push polling.
//!
//! Polling a pending push challenge can run in two ways that must never run
//! at once: full-page reloads on a timer (the server half re-polls on every
//! pass), or this background poller probing the poll endpoint directly.
//! Enabling the poller suppresses the reload timer, and a user-driven form
//! submission must call [`PushPoller::cancel`] so no stale probe fires
//! after the attempt has moved on.

use std::cell::Cell;
use std::rc::Rc;

use gatekey_core::poll_delay;
use js_sys::Promise;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{future_to_promise, JsFuture};
use web_sys::Response;

/// Delay in milliseconds before the reload-based poll for this counter.
#[wasm_bindgen]
pub fn reload_delay_ms(load_counter: u32) -> u32 {
    poll_delay(load_counter).as_millis() as u32
}

/// Background poller for one push transaction.
#[wasm_bindgen]
pub struct PushPoller {
    inner: Rc<PollerInner>,
}

struct PollerInner {
    base_url: String,
    transaction_id: String,
    cancelled: Cell<bool>,
}

#[wasm_bindgen]
impl PushPoller {
    #[wasm_bindgen(constructor)]
    pub fn new(base_url: String, transaction_id: String) -> PushPoller {
        PushPoller {
            inner: Rc::new(PollerInner {
                base_url,
                transaction_id,
                cancelled: Cell::new(false),
            }),
        }
    }

    /// Terminate the poller. Safe to call more than once.
    pub fn cancel(&self) {
        self.inner.cancelled.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.get()
    }

    /// Poll until the challenge is confirmed or the poller is cancelled.
    /// Resolves to `true` when the push was confirmed; the page should then
    /// submit the login form to fetch the final verdict.
    pub fn start(&self) -> Promise {
        let inner = self.inner.clone();
        future_to_promise(async move {
            let mut counter = 1u32;
            while !inner.cancelled.get() {
                if poll_once(&inner.base_url, &inner.transaction_id).await? {
                    return Ok(JsValue::TRUE);
                }
                sleep_ms(poll_delay(counter).as_millis() as i32).await;
                counter = counter.saturating_add(1);
            }
            Ok(JsValue::FALSE)
        })
    }

    /// One probe of the poll endpoint.
    pub fn poll(&self) -> Promise {
        let inner = self.inner.clone();
        future_to_promise(async move {
            let confirmed = poll_once(&inner.base_url, &inner.transaction_id).await?;
            Ok(JsValue::from_bool(confirmed))
        })
    }
}

async fn poll_once(base_url: &str, transaction_id: &str) -> Result<bool, JsValue> {
    let url = format!(
        "{}/validate/polltransaction?transaction_id={}",
        base_url.trim_end_matches('/'),
        js_sys::encode_uri_component(transaction_id),
    );
    let window =
        web_sys::window().ok_or_else(|| JsValue::from_str("no window in this context"))?;
    let response = JsFuture::from(window.fetch_with_str(&url)).await?;
    let response: Response = response.dyn_into()?;
    let body = JsFuture::from(response.text()?).await?;
    let body = body.as_string().unwrap_or_default();

    let confirmed = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.pointer("/result/value").and_then(serde_json::Value::as_bool))
        .unwrap_or(false);
    Ok(confirmed)
}

async fn sleep_ms(ms: i32) {
    let promise = Promise::new(&mut |resolve, _reject| {
        if let Some(window) = web_sys::window() {
            let _ = window
                .set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, ms);
        }
    });
    let _ = JsFuture::from(promise).await;
}
