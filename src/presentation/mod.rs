//! Leptos bindings: the store context and the view hooks.

pub mod hooks;

pub use hooks::*;

use crate::application::{MarketStore, StoreDeps};
use crate::config::AppConfig;
use crate::domain::logging::{LogComponent, get_logger};
use crate::event_utils::{on_visibility_change, page_visible};
use crate::infrastructure::http::{HttpBarSource, HttpMarketSource};
use crate::infrastructure::timers::GlooScheduler;
use crate::infrastructure::websocket::GlooConnector;
use crate::time_utils::SystemClock;
use leptos::*;
use std::rc::Rc;

const COMPONENT: LogComponent = LogComponent::Presentation("MarketStore");

/// Store wired to the browser: gloo WebSocket, gloo timers and REST over fetch.
pub fn create_browser_store(config: AppConfig) -> MarketStore {
    get_logger().set_min_level(config.log_level());
    let base_url = config.history.rest_base_url.clone();
    MarketStore::new(
        config,
        StoreDeps {
            connector: Rc::new(GlooConnector::new()),
            scheduler: Rc::new(GlooScheduler::new()),
            clock: Rc::new(SystemClock),
            bars: Rc::new(HttpBarSource::new(base_url.clone())),
            markets: Some(Rc::new(HttpMarketSource::new(base_url))),
        },
    )
}

/// Make `store` available to every hook below the calling component and tie
/// its stream lifetimes to page visibility.
pub fn provide_market_store(store: MarketStore) {
    if !page_visible() {
        spawn_local({
            let store = store.clone();
            async move { store.set_visible(false).await }
        });
    }
    let listener = on_visibility_change({
        let store = store.clone();
        move |visible| {
            get_logger().info(
                COMPONENT,
                if visible { "👀 Page visible, resuming streams" } else { "🙈 Page hidden, pausing streams" },
            );
            let store = store.clone();
            spawn_local(async move { store.set_visible(visible).await });
        }
    });
    on_cleanup(move || listener.remove());
    provide_context(store);
}

/// Store provided by an ancestor.
///
/// # Panics
/// When no ancestor called [`provide_market_store`]; that is a wiring bug.
pub fn use_market_store() -> MarketStore {
    expect_context::<MarketStore>()
}
