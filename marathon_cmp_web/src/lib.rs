use leptos::*;

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const APP_COMMIT: &str = env!("GIT_COMMIT_HASH");

#[cfg(feature = "chart_uplot")]
mod uplot;

#[cfg(feature = "chart_uplot")]
use std::cell::RefCell;
#[cfg(feature = "chart_uplot")]
use std::future::Future;
#[cfg(feature = "chart_uplot")]
use std::rc::Rc;

#[cfg(feature = "chart_uplot")]
use wasm_bindgen::{JsCast, JsValue};

#[cfg(feature = "chart_uplot")]
use futures::future::join_all;
#[cfg(feature = "chart_uplot")]
use wasm_bindgen_futures::JsFuture;

#[cfg(feature = "chart_uplot")]
use web_sys::{HtmlInputElement, Response};

#[cfg(feature = "chart_uplot")]
use marathon_cmp::feed::parse_stats;
#[cfg(feature = "chart_uplot")]
use marathon_cmp::summary::{HEADERS, HIGHLIGHT_COLOR};
#[cfg(feature = "chart_uplot")]
use marathon_cmp::{
    ChartRenderer, Dashboard, DisplayMode, MarathonEntry, MarathonIndex, Params, Viewport,
};

#[cfg(feature = "chart_uplot")]
use uplot::UplotSurface;

#[cfg(feature = "chart_uplot")]
const INDEX_URL: &str = "marathons.json";
#[cfg(feature = "chart_uplot")]
const STATS_URL: &str = "stats.json";
#[cfg(feature = "chart_uplot")]
const CHART_TARGET: &str = "main-chart";

#[cfg(feature = "chart_uplot")]
fn console_warn(message: &str) {
    web_sys::console::warn_1(&JsValue::from_str(message));
}

/// GET `url` as text. Network errors and non-2xx responses give `None`.
#[cfg(feature = "chart_uplot")]
async fn fetch_text(url: &str) -> Option<String> {
    let window = web_sys::window()?;
    let response: Response = JsFuture::from(window.fetch_with_str(url))
        .await
        .ok()?
        .dyn_into()
        .ok()?;
    if !response.ok() {
        console_warn(&format!("{url}: HTTP {}", response.status()));
        return None;
    }
    JsFuture::from(response.text().ok()?).await.ok()?.as_string()
}

#[cfg(feature = "chart_uplot")]
fn browser_params() -> Params {
    let mut params = Params::default();
    if let Some(window) = web_sys::window() {
        let px = |v: Result<JsValue, JsValue>| v.ok().and_then(|v| v.as_f64()).map(|v| v.max(0.0) as u32);
        if let (Some(width), Some(height)) = (px(window.inner_width()), px(window.inner_height())) {
            params.viewport = Viewport { width, height };
        }
    }
    // The grid starts at local noon on 2021-07-04, matching the published charts.
    let root = js_sys::Date::new_with_year_month_day_hr_min(2021, 6, 4, 12, 0);
    params.root_timestamp = (root.get_time() / 1000.0) as i64;
    params.now = Some((js_sys::Date::now() / 1000.0) as i64);
    params.utc_offset_s = (-js_sys::Date::new_0().get_timezone_offset() * 60.0) as i32;
    params
}

/// Request every feed at once and collect the bodies in index order.
#[cfg(feature = "chart_uplot")]
async fn fetch_feeds<'a, F, Fut>(entries: &'a [MarathonEntry], fetch: F) -> Vec<Option<String>>
where
    F: Fn(&'a str) -> Fut,
    Fut: Future<Output = Option<String>>,
{
    join_all(entries.iter().map(|entry| fetch(entry.url.as_str()))).await
}

#[cfg(feature = "chart_uplot")]
async fn load_dashboard(params: Params) -> Result<Dashboard, String> {
    let index_text = fetch_text(INDEX_URL)
        .await
        .ok_or_else(|| format!("Failed to load {INDEX_URL}"))?;
    let index = MarathonIndex::from_json(&index_text).map_err(|e| e.to_string())?;

    let bodies = fetch_feeds(&index.entries, fetch_text).await;
    for (entry, body) in index.entries.iter().zip(&bodies) {
        if body.is_none() {
            console_warn(&format!("{}: no data from {}", entry.name, entry.url));
        }
    }
    let marathons = index.assemble(bodies).map_err(|e| e.to_string())?;
    let mut dashboard = Dashboard::from_marathons(marathons, params);

    if let Some(text) = fetch_text(STATS_URL).await {
        match parse_stats(&text) {
            Ok(stats) => dashboard = dashboard.with_stats(stats),
            Err(err) => console_warn(&format!("{STATS_URL}: {err}")),
        }
    }
    Ok(dashboard)
}

#[cfg(feature = "chart_uplot")]
#[component]
pub fn App() -> impl IntoView {
    let (mode, set_mode) = create_signal(DisplayMode::default());
    let (status, set_status) = create_signal(String::from("Loading marathons…"));
    let (dashboard, set_dashboard) = create_signal(Option::<Rc<Dashboard>>::None);
    let renderer: Rc<RefCell<Option<ChartRenderer<UplotSurface>>>> = Rc::new(RefCell::new(None));

    spawn_local(async move {
        match load_dashboard(browser_params()).await {
            Ok(dash) => {
                set_status.set(format!("{} marathons loaded.", dash.metas().len()));
                set_dashboard.set(Some(Rc::new(dash)));
            }
            Err(err) => set_status.set(err),
        }
    });

    // First run creates the chart; later mode changes only swap its data.
    create_effect(move |_| {
        let mode = mode.get();
        let Some(dash) = dashboard.get() else {
            return;
        };
        let payload = dash.payload(mode);
        let mut slot = renderer.borrow_mut();
        if slot.is_none() {
            match UplotSurface::attach(CHART_TARGET) {
                Ok(surface) => *slot = Some(ChartRenderer::new(surface, dash.chart_options())),
                Err(err) => {
                    set_status.set(err.to_string());
                    return;
                }
            }
        }
        if let Some(chart) = slot.as_mut() {
            if let Err(err) = chart.render(&payload) {
                set_status.set(format!("Chart error: {err}"));
            }
        }
    });

    let on_mode = move |ev: leptos::ev::Event| {
        if let Some(t) = ev.target() {
            if let Ok(inp) = t.dyn_into::<HtmlInputElement>() {
                if inp.checked() {
                    if let Some(next) = DisplayMode::from_input(&inp.value()) {
                        set_mode.set(next);
                    }
                }
            }
        }
    };

    let summary_view = move || {
        dashboard.get().map(|dash| {
            let table = dash.summary();
            if table.is_empty() {
                return view! { <p class="note">"No summary stats available."</p> }.into_view();
            }
            let rows = table
                .rows
                .into_iter()
                .map(|row| {
                    let name_style = if row.emphasized {
                        format!("color: {HIGHLIGHT_COLOR}")
                    } else {
                        String::new()
                    };
                    view! {
                        <tr>
                            <td><span style=name_style>{row.name}</span></td>
                            <td>{row.total_donations}</td>
                            <td>{row.peak_viewers}</td>
                            <td>{row.peak_at}</td>
                            <td>{row.peak_game}</td>
                        </tr>
                    }
                })
                .collect_view();
            view! {
                <table class="summary">
                    <thead><tr>{HEADERS.iter().map(|h| view! { <th>{*h}</th> }).collect_view()}</tr></thead>
                    <tbody>{rows}</tbody>
                </table>
            }
            .into_view()
        })
    };

    view! {
        <main>
            <header>
                <h1>"Marathon Comparison"</h1>
                <div class="control-row">
                    <label><input type="radio" name="dorv" value="donations"
                        prop:checked=move || mode.get() == DisplayMode::Donations on:change=on_mode/>" Donations"</label>
                    <label><input type="radio" name="dorv" value="viewers"
                        prop:checked=move || mode.get() == DisplayMode::Viewers on:change=on_mode/>" Viewers"</label>
                </div>
                <span class="note">{move || status.get()}</span>
            </header>
            <section class="plots">
                <div id="main-chart"></div>
            </section>
            <section id="summary-table">{summary_view}</section>
            <footer>
                <p class="note">{"Version "}{APP_VERSION}{" ("}{APP_COMMIT}{")"}</p>
            </footer>
        </main>
    }
}

#[cfg(all(target_arch = "wasm32", feature = "chart_uplot"))]
#[wasm_bindgen::prelude::wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
    leptos::mount_to_body(|| view! { <App/> });
}

#[cfg(all(test, feature = "chart_uplot"))]
mod tests {
    use super::*;
    use futures::channel::oneshot;
    use futures::executor::block_on;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::sync::Mutex;

    #[test]
    fn feeds_are_fetched_together_in_index_order() {
        let index = MarathonIndex::from_json(
            r#"[{"name": "A", "url": "a.json", "start": 0},
                {"name": "B", "url": "b.json", "start": 0},
                {"name": "C", "url": "c.json", "start": 0}]"#,
        )
        .unwrap();

        // a.json only resolves once b.json has been requested, which a one-by-one
        // loader would never reach.
        let (tx, rx) = oneshot::channel::<()>();
        let tx = Mutex::new(Some(tx));
        let rx = Mutex::new(Some(rx));
        let fetch = |url: &str| -> BoxFuture<'static, Option<String>> {
            match url {
                "a.json" => {
                    let rx = rx.lock().unwrap().take().unwrap();
                    async move { rx.await.ok().map(|_| "body a".to_string()) }.boxed()
                }
                "b.json" => {
                    if let Some(tx) = tx.lock().unwrap().take() {
                        let _ = tx.send(());
                    }
                    async { Some("body b".to_string()) }.boxed()
                }
                _ => async { None }.boxed(),
            }
        };

        let bodies = block_on(fetch_feeds(&index.entries, fetch));
        assert_eq!(
            bodies,
            vec![Some("body a".to_string()), Some("body b".to_string()), None]
        );
    }
}
