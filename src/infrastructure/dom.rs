use crate::domain::chart::{ChartContainer, ListenerHandle};
use crate::domain::errors::{AppError, ChartResult};
use crate::event_utils::on_window_resize;
use std::cell::Cell;
use wasm_bindgen::JsCast;
use web_sys::HtmlElement;

/// Chart host element in the page.
#[derive(Debug, Clone)]
pub struct DomChartContainer {
    element: HtmlElement,
}

impl DomChartContainer {
    pub fn new(element: HtmlElement) -> Self {
        Self { element }
    }

    pub fn by_id(id: &str) -> ChartResult<Self> {
        web_sys::window()
            .and_then(|w| w.document())
            .and_then(|d| d.get_element_by_id(id))
            .and_then(|e| e.dyn_into::<HtmlElement>().ok())
            .map(Self::new)
            .ok_or_else(|| AppError::ChartError(format!("container #{id} not found")))
    }

    pub fn element(&self) -> &HtmlElement {
        &self.element
    }
}

impl ChartContainer for DomChartContainer {
    fn width(&self) -> u32 {
        self.element.client_width().max(0) as u32
    }

    fn height(&self) -> u32 {
        self.element.client_height().max(0) as u32
    }

    fn observe_resize(&self, on_resize: Box<dyn Fn(u32)>) -> ChartResult<ListenerHandle> {
        let element = self.element.clone();
        let last = Cell::new(self.width());
        let listener = on_window_resize(move || {
            let width = element.client_width().max(0) as u32;
            if width != last.replace(width) {
                on_resize(width);
            }
        });
        Ok(listener)
    }
}
