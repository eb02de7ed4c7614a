use crate::domain::chart::ListenerHandle;
use wasm_bindgen::JsCast;
use wasm_bindgen::closure::Closure;
use web_sys::{AddEventListenerOptions, Event, EventTarget};

#[derive(Clone, Debug)]
pub struct EventOptions {
    pub passive: bool,
    pub capture: bool,
    pub once: bool,
}

impl Default for EventOptions {
    fn default() -> Self {
        Self { passive: true, capture: false, once: false }
    }
}

/// Attach `cb` to `target`; the returned handle detaches it and frees the closure.
pub fn event_listener_with_options(
    target: EventTarget,
    event_name: &str,
    options: &EventOptions,
    mut cb: impl FnMut(Event) + 'static,
) -> ListenerHandle {
    let opts = AddEventListenerOptions::new();
    opts.set_passive(options.passive);
    opts.set_capture(options.capture);
    opts.set_once(options.once);

    let callback = Closure::wrap(Box::new(move |ev: Event| cb(ev)) as Box<dyn FnMut(Event)>);
    let _ = target.add_event_listener_with_callback_and_add_event_listener_options(
        event_name,
        callback.as_ref().unchecked_ref(),
        &opts,
    );

    let event_name = event_name.to_string();
    let capture = options.capture;
    ListenerHandle::new(move || {
        let _ = target.remove_event_listener_with_callback_and_bool(
            &event_name,
            callback.as_ref().unchecked_ref(),
            capture,
        );
    })
}

pub fn window_event_listener(event_name: &str, cb: impl FnMut(Event) + 'static) -> ListenerHandle {
    match web_sys::window() {
        Some(window) => {
            event_listener_with_options(window.into(), event_name, &EventOptions::default(), cb)
        }
        None => ListenerHandle::noop(),
    }
}

/// Calls `on_change(visible)` whenever the page visibility flips.
pub fn on_visibility_change(on_change: impl Fn(bool) + 'static) -> ListenerHandle {
    let Some(document) = web_sys::window().and_then(|w| w.document()) else {
        return ListenerHandle::noop();
    };
    let probe = document.clone();
    event_listener_with_options(
        document.into(),
        "visibilitychange",
        &EventOptions::default(),
        move |_| on_change(!probe.hidden()),
    )
}

pub fn page_visible() -> bool {
    web_sys::window().and_then(|w| w.document()).map(|d| !d.hidden()).unwrap_or(true)
}

pub fn on_window_resize(on_resize: impl Fn() + 'static) -> ListenerHandle {
    window_event_listener("resize", move |_| on_resize())
}
