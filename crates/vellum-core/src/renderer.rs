//! Boundary to the rendering engine.
//!
//! The core drives a [`Renderer`] but never draws anything itself. Document
//! data and pens are opaque JSON values owned by the engine.

use crate::config::EditorOptions;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// A drawable element, as understood by the engine.
pub type Pen = Value;

/// A point in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Rendering collaborator.
///
/// Implementations must be usable from any thread; they typically guard
/// their own state with a lock.
pub trait Renderer: Send + Sync {
    /// Prepare the engine with the editor options.
    fn initialize(&self, options: &EditorOptions) -> anyhow::Result<()>;

    fn render(&self);

    fn clear(&self);

    fn resize(&self, width: f64, height: f64);

    /// Release engine resources. The renderer is not used afterwards.
    fn destroy(&self);

    /// Push changed options to the engine.
    fn update_options(&self, options: &EditorOptions);

    fn get_data(&self) -> Value;

    fn set_data(&self, data: Value);

    fn get_selected(&self) -> Vec<Pen>;

    fn set_selected(&self, pens: Vec<Pen>);

    /// Zoom to an absolute scale, optionally around `center`.
    fn zoom(&self, scale: f64, center: Option<Point>);

    fn pan(&self, x: f64, y: f64);

    /// Fit the whole document into the viewport.
    fn fit_view(&self);

    /// Current zoom level.
    fn scale(&self) -> f64;

    fn add_pens(&self, pens: Vec<Pen>) -> anyhow::Result<()>;

    fn delete_pens(&self, pens: &[Pen]);

    fn update_pen(&self, id: &str, props: Value);
}

/// Shared renderer handle.
pub type SharedRenderer = Arc<dyn Renderer>;

#[derive(Debug, Default)]
struct MemoryState {
    options: Option<EditorOptions>,
    pens: Vec<Pen>,
    selected: Vec<Pen>,
    scale: f64,
    offset: Point,
    size: (f64, f64),
    renders: usize,
    destroyed: bool,
}

/// Headless renderer keeping the document in memory.
///
/// Pens are JSON objects identified by their `"id"` field. Useful for tests
/// and for driving the editor without a display.
#[derive(Debug)]
pub struct MemoryRenderer {
    state: RwLock<MemoryState>,
}

impl MemoryRenderer {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState {
                scale: 1.0,
                ..Default::default()
            }),
        }
    }

    /// Number of pens in the document.
    pub fn pen_count(&self) -> usize {
        self.state.read().pens.len()
    }

    /// Number of `render` calls so far.
    pub fn render_count(&self) -> usize {
        self.state.read().renders
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.read().destroyed
    }

    /// Options last passed by the editor.
    pub fn options(&self) -> Option<EditorOptions> {
        self.state.read().options.clone()
    }

    pub fn offset(&self) -> Point {
        self.state.read().offset
    }

    fn pen_id(pen: &Pen) -> Option<&str> {
        pen.get("id").and_then(Value::as_str)
    }
}

impl Renderer for MemoryRenderer {
    fn initialize(&self, options: &EditorOptions) -> anyhow::Result<()> {
        let mut state = self.state.write();
        if state.destroyed {
            anyhow::bail!("renderer has been destroyed");
        }
        state.scale = options.scale;
        state.options = Some(options.clone());
        Ok(())
    }

    fn render(&self) {
        self.state.write().renders += 1;
    }

    fn clear(&self) {
        let mut state = self.state.write();
        state.pens.clear();
        state.selected.clear();
    }

    fn resize(&self, width: f64, height: f64) {
        self.state.write().size = (width, height);
    }

    fn destroy(&self) {
        let mut state = self.state.write();
        state.pens.clear();
        state.selected.clear();
        state.destroyed = true;
    }

    fn update_options(&self, options: &EditorOptions) {
        self.state.write().options = Some(options.clone());
    }

    fn get_data(&self) -> Value {
        let state = self.state.read();
        serde_json::json!({
            "pens": state.pens,
            "scale": state.scale,
            "x": state.offset.x,
            "y": state.offset.y,
        })
    }

    fn set_data(&self, data: Value) {
        let mut state = self.state.write();
        state.pens = data
            .get("pens")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if let Some(scale) = data.get("scale").and_then(Value::as_f64) {
            state.scale = scale;
        }
        state.selected.clear();
    }

    fn get_selected(&self) -> Vec<Pen> {
        self.state.read().selected.clone()
    }

    fn set_selected(&self, pens: Vec<Pen>) {
        self.state.write().selected = pens;
    }

    fn zoom(&self, scale: f64, _center: Option<Point>) {
        self.state.write().scale = scale;
    }

    fn pan(&self, x: f64, y: f64) {
        let mut state = self.state.write();
        state.offset.x += x;
        state.offset.y += y;
    }

    fn fit_view(&self) {
        let mut state = self.state.write();
        state.offset = Point::default();
        state.scale = 1.0;
    }

    fn scale(&self) -> f64 {
        self.state.read().scale
    }

    fn add_pens(&self, pens: Vec<Pen>) -> anyhow::Result<()> {
        let mut state = self.state.write();
        for pen in pens {
            let Some(id) = Self::pen_id(&pen) else {
                anyhow::bail!("pen without an id: {}", pen);
            };
            if state.pens.iter().any(|p| Self::pen_id(p) == Some(id)) {
                anyhow::bail!("pen '{}' already exists", id);
            }
            state.pens.push(pen);
        }
        Ok(())
    }

    fn delete_pens(&self, pens: &[Pen]) {
        let ids: Vec<&str> = pens.iter().filter_map(Self::pen_id).collect();
        let mut state = self.state.write();
        state
            .pens
            .retain(|p| Self::pen_id(p).map_or(true, |id| !ids.contains(&id)));
        state
            .selected
            .retain(|p| Self::pen_id(p).map_or(true, |id| !ids.contains(&id)));
    }

    fn update_pen(&self, id: &str, props: Value) {
        let mut state = self.state.write();
        let Some(pen) = state.pens.iter_mut().find(|p| Self::pen_id(p) == Some(id)) else {
            tracing::warn!("Pen \"{}\" not found", id);
            return;
        };
        if let (Some(target), Value::Object(props)) = (pen.as_object_mut(), props) {
            for (key, value) in props {
                target.insert(key, value);
            }
        }
    }
}
