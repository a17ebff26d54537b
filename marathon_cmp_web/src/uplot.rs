//! uPlot adapter: builds the option object, owns the chart instance and runs the tooltip hooks.

use std::cell::RefCell;
use std::rc::Rc;

use marathon_cmp::format::{format_timestamp, format_value};
use marathon_cmp::{AxisStyle, ChartOptions, ChartSurface, CursorTooltip, DisplayMode, McError, SeriesBundle};
use serde::Serialize;
use serde_wasm_bindgen::Serializer;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{Element, HtmlElement};

const TOOLTIP_STYLE: [(&str, &str); 6] = [
    ("pointer-events", "none"),
    ("position", "absolute"),
    ("background", "rgba(0, 0, 0, 0.85)"),
    ("border-radius", "4px"),
    ("padding", "4px 8px 8px 8px"),
    ("display", "none"),
];

/// State shared between the surface and the JS hook closures.
#[derive(Default)]
struct HookState {
    tooltip: CursorTooltip,
    options: Option<ChartOptions>,
    bundle: Option<SeriesBundle>,
    overlay: Option<HtmlElement>,
}

impl HookState {
    fn mode(&self) -> DisplayMode {
        self.bundle.as_ref().map(|b| b.mode).unwrap_or_default()
    }

    fn sync_display(&self) {
        if let Some(overlay) = self.overlay.as_ref() {
            let display = if self.tooltip.is_visible() { "block" } else { "none" };
            if let Err(err) = overlay.style().set_property("display", display) {
                console_warn(&format!("tooltip display: {err:?}"));
            }
        }
    }
}

/// One uPlot instance mounted into a container element. The chart lives as long as the page,
/// so hook closures are leaked on purpose once handed to JS.
pub struct UplotSurface {
    target: Element,
    chart: Option<JsValue>,
    state: Rc<RefCell<HookState>>,
}

impl UplotSurface {
    pub fn attach(target_id: &str) -> Result<Self, McError> {
        let target = web_sys::window()
            .and_then(|w| w.document())
            .and_then(|d| d.get_element_by_id(target_id))
            .ok_or_else(|| McError::Surface(format!("missing #{target_id} element")))?;
        Ok(Self {
            target,
            chart: None,
            state: Rc::new(RefCell::new(HookState::default())),
        })
    }

    fn build_options(&self, ctor: &js_sys::Function, options: &ChartOptions) -> Result<JsValue, McError> {
        let opts = to_js(&serde_json::json!({
            "id": options.id,
            "class": options.class,
            "width": options.width,
            "height": options.height,
            "legend": { "show": options.show_legend },
        }))?;

        let series = js_sys::Array::new();
        series.push(&self.time_series(options.utc_offset_s)?);
        let spline = spline_builder(ctor);
        for style in &options.series {
            let entry = to_js(&serde_json::json!({
                "label": style.label,
                "stroke": style.stroke,
                "width": style.width,
                "show": style.show,
            }))?;
            if style.spline {
                if let Some(paths) = spline.as_ref() {
                    set(&entry, "paths", paths)?;
                }
            }
            let state = self.state.clone();
            let value = Closure::<dyn Fn(JsValue, JsValue) -> JsValue>::new(
                move |_u: JsValue, raw: JsValue| {
                    let mode = state.borrow().mode();
                    JsValue::from_str(&format_value(mode, raw.as_f64()))
                },
            );
            set(&entry, "value", value.as_ref())?;
            value.forget();
            series.push(&entry);
        }
        set(&opts, "series", &series)?;

        let axes = js_sys::Array::new();
        axes.push(&self.axis(&options.x_axis, options.utc_offset_s)?);
        axes.push(&self.axis(&options.y_axis, options.utc_offset_s)?);
        set(&opts, "axes", &axes)?;

        let plugins = js_sys::Array::new();
        plugins.push(&self.tooltip_plugin()?);
        set(&opts, "plugins", &plugins)?;
        Ok(opts)
    }

    fn time_series(&self, utc_offset_s: i32) -> Result<JsValue, McError> {
        let entry: JsValue = js_sys::Object::new().into();
        let value = Closure::<dyn Fn(JsValue, JsValue) -> JsValue>::new(
            move |_u: JsValue, raw: JsValue| match raw.as_f64() {
                Some(ts) => JsValue::from_str(&format_timestamp(ts as i64, utc_offset_s)),
                None => JsValue::from_str(marathon_cmp::format::MISSING),
            },
        );
        set(&entry, "value", value.as_ref())?;
        value.forget();
        Ok(entry)
    }

    fn axis(&self, axis: &AxisStyle, utc_offset_s: i32) -> Result<JsValue, McError> {
        let mut spec = serde_json::json!({
            "stroke": axis.stroke,
            "grid": { "stroke": axis.grid_stroke },
            "ticks": { "stroke": axis.tick_stroke },
        });
        if let Some(space) = axis.space {
            spec["space"] = space.into();
        }
        if let Some(size) = axis.size {
            spec["size"] = size.into();
        }
        let obj = to_js(&spec)?;

        let state = self.state.clone();
        let axis = axis.clone();
        let values = Closure::<dyn Fn(JsValue, JsValue) -> JsValue>::new(
            move |_u: JsValue, splits: JsValue| {
                let mode = state.borrow().mode();
                let labels = js_sys::Array::new();
                for tick in js_sys::Array::from(&splits).iter() {
                    let label = tick
                        .as_f64()
                        .map(|v| axis.tick_label(mode, utc_offset_s, v))
                        .unwrap_or_default();
                    labels.push(&JsValue::from_str(&label));
                }
                labels.into()
            },
        );
        set(&obj, "values", values.as_ref())?;
        values.forget();
        Ok(obj)
    }

    fn tooltip_plugin(&self) -> Result<JsValue, McError> {
        let hooks: JsValue = js_sys::Object::new().into();

        let state = self.state.clone();
        let init = Closure::<dyn Fn(JsValue)>::new(move |u: JsValue| {
            if let Err(err) = init_overlay(&u, &state) {
                console_warn(&err.to_string());
            }
        });
        set(&hooks, "init", init.as_ref())?;
        init.forget();

        let state = self.state.clone();
        let set_cursor = Closure::<dyn Fn(JsValue)>::new(move |u: JsValue| {
            update_overlay(&u, &state);
        });
        set(&hooks, "setCursor", set_cursor.as_ref())?;
        set_cursor.forget();

        let plugin: JsValue = js_sys::Object::new().into();
        set(&plugin, "hooks", &hooks)?;
        Ok(plugin)
    }
}

impl ChartSurface for UplotSurface {
    fn create(&mut self, options: &ChartOptions, data: &SeriesBundle) -> Result<(), McError> {
        let ctor = uplot_constructor()?;
        {
            let mut state = self.state.borrow_mut();
            state.options = Some(options.clone());
            state.bundle = Some(data.clone());
        }
        let opts = self.build_options(&ctor, options)?;
        let columns = to_js(&data.to_columns())?;
        let args = js_sys::Array::of3(&opts, &columns, &self.target);
        let chart = js_sys::Reflect::construct(&ctor, &args)
            .map_err(|e| McError::Surface(format!("uPlot construction failed: {e:?}")))?;
        self.chart = Some(chart);
        Ok(())
    }

    fn set_data(&mut self, data: &SeriesBundle) -> Result<(), McError> {
        self.state.borrow_mut().bundle = Some(data.clone());
        let chart = self.chart()?;
        let args = js_sys::Array::of2(&to_js(&data.to_columns())?, &JsValue::FALSE);
        call(chart, "setData", &args).map(|_| ())
    }

    fn redraw(&mut self) -> Result<(), McError> {
        let chart = self.chart()?;
        call(chart, "redraw", &js_sys::Array::new()).map(|_| ())
    }
}

impl UplotSurface {
    fn chart(&self) -> Result<&JsValue, McError> {
        self.chart
            .as_ref()
            .ok_or_else(|| McError::Surface("chart has not been created".into()))
    }
}

fn init_overlay(u: &JsValue, state: &Rc<RefCell<HookState>>) -> Result<(), McError> {
    let over: HtmlElement = get(u, "over")
        .dyn_into()
        .map_err(|_| McError::Surface("chart has no cursor overlay".into()))?;
    let document = web_sys::window()
        .and_then(|w| w.document())
        .ok_or_else(|| McError::Surface("no document".into()))?;
    let tip: HtmlElement = document
        .create_element("div")
        .map_err(|e| McError::Surface(format!("{e:?}")))?
        .dyn_into()
        .map_err(|_| McError::Surface("tooltip is not an HTML element".into()))?;
    tip.set_class_name("tooltip");
    let style = tip.style();
    for (key, value) in TOOLTIP_STYLE {
        if let Err(err) = style.set_property(key, value) {
            console_warn(&format!("tooltip style {key}: {err:?}"));
        }
    }
    over.append_child(&tip)
        .map_err(|e| McError::Surface(format!("{e:?}")))?;
    {
        let mut s = state.borrow_mut();
        s.tooltip.on_init();
        s.overlay = Some(tip);
    }

    let leave_state = state.clone();
    let chart = u.clone();
    let on_leave = Closure::<dyn Fn()>::new(move || {
        let locked = get(&get(&chart, "cursor"), "_lock").as_bool().unwrap_or(false);
        let mut s = leave_state.borrow_mut();
        s.tooltip.set_locked(locked);
        s.tooltip.pointer_leave();
        s.sync_display();
    });
    over.add_event_listener_with_callback("mouseleave", on_leave.as_ref().unchecked_ref())
        .map_err(|e| McError::Surface(format!("{e:?}")))?;
    on_leave.forget();

    let enter_state = state.clone();
    let on_enter = Closure::<dyn Fn()>::new(move || {
        let mut s = enter_state.borrow_mut();
        s.tooltip.pointer_enter();
        s.sync_display();
    });
    over.add_event_listener_with_callback("mouseenter", on_enter.as_ref().unchecked_ref())
        .map_err(|e| McError::Surface(format!("{e:?}")))?;
    on_enter.forget();
    Ok(())
}

fn update_overlay(u: &JsValue, state: &Rc<RefCell<HookState>>) {
    let cursor = get(u, "cursor");
    let idx = get(&cursor, "idx")
        .as_f64()
        .filter(|v| *v >= 0.0)
        .map(|v| v as usize);
    let locked = get(&cursor, "_lock").as_bool().unwrap_or(false);

    let mut guard = state.borrow_mut();
    let s = &mut *guard;
    s.tooltip.set_locked(locked);

    // Series toggled in uPlot drop out of the tooltip.
    if let Some(options) = s.options.as_mut() {
        let series = js_sys::Array::from(&get(u, "series"));
        for (i, style) in options.series.iter_mut().enumerate() {
            if let Some(show) = get(&series.get(i as u32 + 1), "show").as_bool() {
                style.show = show;
            }
        }
    }

    let (Some(options), Some(bundle)) = (s.options.as_ref(), s.bundle.as_ref()) else {
        return;
    };
    let html = s
        .tooltip
        .on_cursor(idx, options, bundle)
        .map(|content| content.to_html())
        .unwrap_or_default();
    if let Some(overlay) = s.overlay.as_ref() {
        overlay.set_inner_html(&html);
    }
}

fn console_warn(message: &str) {
    web_sys::console::warn_1(&JsValue::from_str(message));
}

fn uplot_constructor() -> Result<js_sys::Function, McError> {
    get(&js_sys::global(), "uPlot")
        .dyn_into::<js_sys::Function>()
        .map_err(|_| McError::Surface("uPlot is not loaded".into()))
}

fn spline_builder(ctor: &js_sys::Function) -> Option<JsValue> {
    let paths = get(ctor, "paths");
    let spline = get(&paths, "spline").dyn_into::<js_sys::Function>().ok()?;
    spline.call0(&paths).ok()
}

fn call(target: &JsValue, method: &str, args: &js_sys::Array) -> Result<JsValue, McError> {
    let func: js_sys::Function = get(target, method)
        .dyn_into()
        .map_err(|_| McError::Surface(format!("uPlot has no '{method}'")))?;
    func.apply(target, args)
        .map_err(|e| McError::Surface(format!("{method} failed: {e:?}")))
}

fn get(target: &JsValue, key: &str) -> JsValue {
    js_sys::Reflect::get(target, &JsValue::from_str(key)).unwrap_or(JsValue::UNDEFINED)
}

fn set(target: &JsValue, key: &str, value: &JsValue) -> Result<(), McError> {
    js_sys::Reflect::set(target, &JsValue::from_str(key), value)
        .map(|_| ())
        .map_err(|_| McError::Surface(format!("cannot set '{key}'")))
}

/// Plain JS objects and `null` for absent values, the shapes uPlot expects.
fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue, McError> {
    value
        .serialize(&Serializer::json_compatible())
        .map_err(|e| McError::Surface(e.to_string()))
}
