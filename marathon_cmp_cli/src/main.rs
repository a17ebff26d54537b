use std::fs::{self, File};
use std::io::{self, Write};
use std::panic;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use marathon_cmp::feed::{parse_stats, read_index_file};
use marathon_cmp::{
    parse_start_time, ChartOptions, ChartRenderer, ChartSurface, CombinedDataset, CursorTooltip,
    Dashboard, DisplayMode, MarathonIndex, McError, Params, SeriesBundle, Viewport,
};
use plotters::prelude::*;
use plotters::style::{FontDesc, FontFamily, FontStyle};
use rayon::prelude::*;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Intermediate points inserted between neighbouring samples of a smoothed line.
const SPLINE_STEPS: usize = 4;

#[derive(Parser, Debug)]
#[command(author, version, about = "Marathon donation/viewer comparison CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resample every marathon onto the weekly grid and write CSV/PNG/SVG output
    Chart(ChartArgs),
    /// Print the cursor tooltip for one bucket of the chart
    Tooltip(TooltipArgs),
    /// Print the per-marathon summary table
    Summary(SummaryArgs),
}

impl Command {
    fn source(&self) -> &SourceArgs {
        match self {
            Command::Chart(args) => &args.source,
            Command::Tooltip(args) => &args.source,
            Command::Summary(args) => &args.source,
        }
    }
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// Marathon index (`marathons.json`); feed URLs resolve relative to it
    #[arg(
        long,
        value_hint = ValueHint::FilePath,
        conflicts_with = "dataset",
        required_unless_present_any = ["dataset", "stats"]
    )]
    index: Option<PathBuf>,

    /// Combined pre-bucketed dataset
    #[arg(long, value_hint = ValueHint::FilePath)]
    dataset: Option<PathBuf>,

    /// Standalone summary stats (`stats.json`)
    #[arg(long, value_hint = ValueHint::FilePath)]
    stats: Option<PathBuf>,

    /// Root timestamp of the weekly grid (RFC 3339 or epoch seconds)
    #[arg(long)]
    root: Option<String>,

    /// Override the clock used to decide whether a marathon has finished
    #[arg(long)]
    now: Option<String>,

    /// Relative viewer-count jump treated as noise
    #[arg(long, default_value_t = 0.5)]
    noise_ratio: f64,

    /// UTC offset for date labels (`+02:00`, `-5`, `Z`)
    #[arg(long, default_value = "Z", allow_hyphen_values = true)]
    utc_offset: String,

    /// Viewport width in pixels
    #[arg(long, default_value_t = 1310)]
    width: u32,

    /// Viewport height in pixels
    #[arg(long, default_value_t = 870)]
    height: u32,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,

    /// Profile major stages with timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,
}

#[derive(Args, Debug)]
struct ChartArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Quantity to chart
    #[arg(long, value_enum, default_value_t = ModeOpt::Donations)]
    mode: ModeOpt,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "comparison.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Output PNG figure path (defaults next to CSV)
    #[arg(long, value_hint = ValueHint::FilePath)]
    png: Option<PathBuf>,

    /// Output SVG figure path
    #[arg(long, value_hint = ValueHint::FilePath)]
    svg: Option<PathBuf>,

    /// Disable plot generation
    #[arg(long, action = ArgAction::SetTrue)]
    no_plot: bool,
}

#[derive(Args, Debug)]
struct TooltipArgs {
    #[command(flatten)]
    source: SourceArgs,

    #[arg(long, value_enum, default_value_t = ModeOpt::Donations)]
    mode: ModeOpt,

    /// Bucket index under the cursor
    #[arg(long, conflicts_with = "ts", required_unless_present = "ts")]
    at: Option<usize>,

    /// Timestamp under the cursor (RFC 3339 or epoch seconds)
    #[arg(long)]
    ts: Option<String>,

    /// Toggle a series off by marathon name (repeatable)
    #[arg(long = "hide")]
    hide: Vec<String>,

    /// Print the HTML the browser overlay would show
    #[arg(long, action = ArgAction::SetTrue)]
    html: bool,
}

#[derive(Args, Debug)]
struct SummaryArgs {
    #[command(flatten)]
    source: SourceArgs,

    #[arg(long, action = ArgAction::SetTrue)]
    html: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ModeOpt {
    Donations,
    Viewers,
}

impl From<ModeOpt> for DisplayMode {
    fn from(value: ModeOpt) -> Self {
        match value {
            ModeOpt::Donations => DisplayMode::Donations,
            ModeOpt::Viewers => DisplayMode::Viewers,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.command.source().verbose {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Chart(args) => handle_chart(args),
        Command::Tooltip(args) => handle_tooltip(args),
        Command::Summary(args) => handle_summary(args),
    }
}

fn params_from_args(args: &SourceArgs) -> Result<Params> {
    let mut params = Params::default();
    if let Some(root) = args.root.as_deref() {
        params.root_timestamp =
            parse_start_time(root).with_context(|| format!("invalid --root '{root}'"))?;
    }
    if let Some(now) = args.now.as_deref() {
        params.now = Some(parse_start_time(now).with_context(|| format!("invalid --now '{now}'"))?);
    }
    if !(args.noise_ratio.is_finite() && args.noise_ratio >= 0.0) {
        return Err(anyhow!("--noise-ratio must be a non-negative number"));
    }
    params.noise_ratio = args.noise_ratio;
    params.utc_offset_s = parse_utc_offset(&args.utc_offset)?;
    params.viewport = Viewport {
        width: args.width,
        height: args.height,
    };
    Ok(params)
}

fn parse_utc_offset(input: &str) -> Result<i32> {
    let text = input.trim();
    if text.eq_ignore_ascii_case("z") || text.eq_ignore_ascii_case("utc") {
        return Ok(0);
    }
    let (sign, rest) = match text.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, text.strip_prefix('+').unwrap_or(text)),
    };
    let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = hours
        .parse()
        .with_context(|| format!("invalid UTC offset '{input}'"))?;
    let minutes: i32 = minutes
        .parse()
        .with_context(|| format!("invalid UTC offset '{input}'"))?;
    if !(0..24).contains(&hours) || !(0..60).contains(&minutes) {
        return Err(anyhow!("UTC offset '{input}' out of range"));
    }
    Ok(sign * (hours * 3600 + minutes * 60))
}

fn load_dashboard(args: &SourceArgs) -> Result<Dashboard> {
    let params = params_from_args(args)?;
    let t_load = Instant::now();

    let mut dashboard = if let Some(path) = args.dataset.as_ref() {
        let text =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let dataset = CombinedDataset::from_json(&text)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        info!(
            "Loaded combined dataset: {} marathons, {} buckets",
            dataset.marathons.len(),
            dataset.ts.len()
        );
        Dashboard::from_combined(dataset, params)
    } else if let Some(path) = args.index.as_ref() {
        let index = read_index_file(path)?;
        let bodies = read_feeds(&index, path);
        let marathons = index.assemble(bodies)?;
        info!("Loaded {} marathons from {}", marathons.len(), path.display());
        Dashboard::from_marathons(marathons, params)
    } else {
        Dashboard::from_marathons(Vec::new(), params)
    };

    if let Some(path) = args.stats.as_ref() {
        let text =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let stats =
            parse_stats(&text).with_context(|| format!("failed to parse {}", path.display()))?;
        dashboard = dashboard.with_stats(stats);
    }

    if args.profile || args.verbose {
        info!(
            "Load stage: {:.1} ms",
            t_load.elapsed().as_secs_f64() * 1000.0
        );
    }
    Ok(dashboard)
}

/// Read every feed of the index in parallel. A feed that cannot be read yields `None` so the
/// marathon is charted empty instead of failing the run.
fn read_feeds(index: &MarathonIndex, index_path: &Path) -> Vec<Option<String>> {
    let base = index_path.parent().unwrap_or_else(|| Path::new("."));
    let inputs: Vec<(usize, &str, &str)> = index
        .entries
        .iter()
        .enumerate()
        .map(|(id, entry)| (id, entry.name.as_str(), entry.url.as_str()))
        .collect();

    let mut bodies: Vec<(usize, Option<String>)> = inputs
        .par_iter()
        .map(|&(id, name, url)| {
            let Some(path) = resolve_feed_path(base, url) else {
                warn!(marathon = name, "remote feed '{url}' cannot be read from disk");
                return (id, None);
            };
            match fs::read_to_string(&path) {
                Ok(text) => {
                    debug!(marathon = name, "read {} bytes from {}", text.len(), path.display());
                    (id, Some(text))
                }
                Err(err) => {
                    warn!(marathon = name, "failed to read {}: {err}", path.display());
                    (id, None)
                }
            }
        })
        .collect();

    // Restore index order
    bodies.sort_by_key(|(id, _)| *id);
    bodies.into_iter().map(|(_, body)| body).collect()
}

fn resolve_feed_path(base: &Path, url: &str) -> Option<PathBuf> {
    if url.starts_with("http://") || url.starts_with("https://") {
        return None;
    }
    let url = url.strip_prefix("file://").unwrap_or(url);
    let path = Path::new(url);
    Some(if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    })
}

fn handle_chart(args: ChartArgs) -> Result<()> {
    let dashboard = load_dashboard(&args.source)?;
    if dashboard.metas().is_empty() {
        return Err(anyhow!("no marathons to chart; pass --index or --dataset"));
    }
    let profile = args.source.profile || args.source.verbose;
    let mode = DisplayMode::from(args.mode);

    let t_resample = Instant::now();
    let payload = dashboard.payload(mode);
    if profile {
        info!(
            "Resample stage: {:.1} ms ({} buckets x {} series)",
            t_resample.elapsed().as_secs_f64() * 1000.0,
            payload.bundle.len(),
            payload.bundle.series.len()
        );
    }
    let names: Vec<&str> = dashboard.metas().iter().map(|m| m.name.as_str()).collect();

    if args.output.as_os_str() == "-" {
        write_bundle_stdout(&names, &payload.bundle)?;
    } else {
        write_bundle_csv(&names, &payload.bundle, &args.output)?;
        info!("Wrote {mode} CSV: {}", args.output.display());
    }

    if args.no_plot {
        return Ok(());
    }

    let mut targets = Vec::new();
    if let Some(path) = args.png.as_ref() {
        targets.push((path.clone(), ChartKind::Png));
    } else if args.output.as_os_str() != "-" {
        let mut png_path = args.output.clone();
        png_path.set_extension("png");
        targets.push((png_path, ChartKind::Png));
    }
    if let Some(path) = args.svg.as_ref() {
        targets.push((path.clone(), ChartKind::Svg));
    }

    for (path, kind) in targets {
        let t_plot = Instant::now();
        let surface = PlottersSurface::new(path.clone(), kind);
        let mut renderer = ChartRenderer::new(surface, dashboard.chart_options());
        match renderer.render(&payload) {
            Ok(()) => info!("Wrote plot: {}", path.display()),
            Err(err) => warn!("Skipping {} render ({}): {}", kind.label(), path.display(), err),
        }
        if profile {
            info!(
                "Plot stage: {:.1} ms",
                t_plot.elapsed().as_secs_f64() * 1000.0
            );
        }
    }
    Ok(())
}

fn handle_tooltip(args: TooltipArgs) -> Result<()> {
    let dashboard = load_dashboard(&args.source)?;
    let payload = dashboard.payload(args.mode.into());
    let mut options = dashboard.chart_options();
    for name in &args.hide {
        if !options.set_visible_by_label(name, false) {
            warn!("--hide '{name}' does not match any marathon");
        }
    }

    let idx = match (args.at, args.ts.as_deref()) {
        (Some(idx), _) => idx,
        (None, Some(ts)) => {
            let ts = parse_start_time(ts).with_context(|| format!("invalid --ts '{ts}'"))?;
            bucket_at(&payload.bundle, ts)
                .ok_or_else(|| anyhow!("timestamp {ts} is outside the chart"))?
        }
        (None, None) => return Err(anyhow!("pass --at or --ts")),
    };

    let mut tooltip = CursorTooltip::new();
    tooltip.on_init();
    tooltip.pointer_enter();
    let content = tooltip
        .on_cursor(Some(idx), &options, &payload.bundle)
        .ok_or_else(|| anyhow!("bucket {idx} is outside the chart ({} buckets)", payload.bundle.len()))?;

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if args.html {
        writeln!(handle, "{}", content.to_html())?;
    } else {
        writeln!(handle, "{}", content.to_text())?;
    }
    Ok(())
}

fn handle_summary(args: SummaryArgs) -> Result<()> {
    let dashboard = load_dashboard(&args.source)?;
    let table = dashboard.summary();
    if table.is_empty() {
        warn!("No summary stats loaded; pass --dataset or --stats");
    }
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if args.html {
        write!(handle, "{}", table.to_html())?;
    } else {
        write!(handle, "{}", table.to_text())?;
    }
    Ok(())
}

/// Bucket whose start is the latest one at or before `ts`.
fn bucket_at(bundle: &SeriesBundle, ts: i64) -> Option<usize> {
    bundle
        .timestamps
        .partition_point(|&t| t <= ts)
        .checked_sub(1)
}

fn write_bundle_stdout(names: &[&str], bundle: &SeriesBundle) -> Result<()> {
    let stdout = io::stdout();
    let handle = stdout.lock();
    let mut writer = csv::Writer::from_writer(handle);
    write_bundle_rows(names, bundle, &mut writer)
}

fn write_bundle_csv(names: &[&str], bundle: &SeriesBundle, path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    write_bundle_rows(names, bundle, &mut writer)
}

fn write_bundle_rows<W: Write>(
    names: &[&str],
    bundle: &SeriesBundle,
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    bundle.validate()?;
    let mut header = Vec::with_capacity(names.len() + 1);
    header.push("ts");
    header.extend_from_slice(names);
    writer.write_record(&header)?;

    for (idx, ts) in bundle.timestamps.iter().enumerate() {
        let mut record = Vec::with_capacity(bundle.series.len() + 1);
        record.push(ts.to_string());
        for series in 0..bundle.series.len() {
            record.push(
                bundle
                    .value(series, idx)
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
            );
        }
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChartKind {
    Png,
    Svg,
}

impl ChartKind {
    fn label(self) -> &'static str {
        match self {
            ChartKind::Png => "PNG",
            ChartKind::Svg => "SVG",
        }
    }
}

/// Draws the chart into an image file. Every redraw rewrites the file.
struct PlottersSurface {
    path: PathBuf,
    kind: ChartKind,
    options: Option<ChartOptions>,
    data: Option<SeriesBundle>,
}

impl PlottersSurface {
    fn new(path: PathBuf, kind: ChartKind) -> Self {
        Self {
            path,
            kind,
            options: None,
            data: None,
        }
    }
}

impl ChartSurface for PlottersSurface {
    fn create(&mut self, options: &ChartOptions, data: &SeriesBundle) -> Result<(), McError> {
        self.options = Some(options.clone());
        self.data = Some(data.clone());
        self.redraw()
    }

    fn set_data(&mut self, data: &SeriesBundle) -> Result<(), McError> {
        self.data = Some(data.clone());
        Ok(())
    }

    fn redraw(&mut self) -> Result<(), McError> {
        let (Some(options), Some(data)) = (self.options.as_ref(), self.data.as_ref()) else {
            return Err(McError::Surface("chart has not been created".into()));
        };
        render_chart_guard(options, data, &self.path, self.kind).map_err(McError::Surface)
    }
}

fn render_chart_guard(
    options: &ChartOptions,
    bundle: &SeriesBundle,
    path: &Path,
    kind: ChartKind,
) -> Result<(), String> {
    let render = || -> Result<(), String> {
        render_chart(options, bundle, path, kind).map_err(|e| format!("plotting error: {}", e))
    };

    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
}

fn render_chart(
    options: &ChartOptions,
    bundle: &SeriesBundle,
    path: &Path,
    kind: ChartKind,
) -> Result<()> {
    let size = (options.width, options.height);
    match kind {
        ChartKind::Png => {
            let root = BitMapBackend::new(path, size).into_drawing_area();
            draw_chart(root, options, bundle)
        }
        ChartKind::Svg => {
            let root = SVGBackend::new(path, size).into_drawing_area();
            draw_chart(root, options, bundle)
        }
    }
}

fn draw_chart<DB>(
    root: DrawingArea<DB, plotters::coord::Shift>,
    options: &ChartOptions,
    bundle: &SeriesBundle,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&BLACK)?;

    let x_min = bundle.timestamps.first().copied().unwrap_or(0) as f64;
    let x_max = bundle
        .timestamps
        .last()
        .map(|&t| t as f64)
        .unwrap_or(x_min)
        .max(x_min + 1.0);
    let (y_lo, y_hi) = bundle.value_range().unwrap_or((0.0, 1.0));
    let y_min = y_lo.min(0.0);
    let y_max = (y_hi * 1.05).max(y_min + 1.0);

    let mode = bundle.mode;
    let offset = options.utc_offset_s;
    let x_fmt = |v: &f64| options.x_axis.tick_label(mode, offset, *v);
    let y_fmt = |v: &f64| options.y_axis.tick_label(mode, offset, *v);
    let x_labels = (options.width / options.x_axis.space.unwrap_or(100)).max(2) as usize;

    let axis_color = parse_color(&options.x_axis.stroke);
    let grid_color = parse_color(&options.x_axis.grid_stroke);
    let tick_color = parse_color(&options.x_axis.tick_stroke);

    let mut chart = ChartBuilder::on(&root)
        .margin(15)
        .set_label_area_size(LabelAreaPosition::Left, options.y_axis.size.unwrap_or(60) as i32)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;

    let axis_font = FontDesc::new(FontFamily::SansSerif, 14.0, FontStyle::Normal);
    chart
        .configure_mesh()
        .x_labels(x_labels)
        .light_line_style(&TRANSPARENT)
        .bold_line_style(&grid_color)
        .axis_style(&axis_color)
        .x_label_formatter(&x_fmt)
        .y_label_formatter(&y_fmt)
        .label_style(axis_font.color(&tick_color))
        .draw()?;

    // Emphasized series last so it sits on top.
    let mut order: Vec<usize> = (0..options.series.len()).collect();
    order.sort_by_key(|&i| options.series[i].emphasized);

    for i in order {
        let style = &options.series[i];
        if !style.show {
            continue;
        }
        let Some(values) = bundle.series.get(i) else {
            continue;
        };
        let line = ShapeStyle {
            color: parse_color(&style.stroke).to_rgba(),
            filled: false,
            stroke_width: (style.width.round() as u32).max(1),
        };
        for run in present_runs(&bundle.timestamps, values) {
            let points = if style.spline {
                catmull_rom(&run, SPLINE_STEPS)
            } else {
                run
            };
            chart.draw_series(LineSeries::new(points, line))?;
        }
    }

    root.present()?;
    Ok(())
}

/// Split a series into runs of consecutive present values; absent buckets leave gaps.
fn present_runs(timestamps: &[i64], values: &[Option<f64>]) -> Vec<Vec<(f64, f64)>> {
    let mut runs = Vec::new();
    let mut current = Vec::new();
    for (ts, value) in timestamps.iter().zip(values) {
        match value {
            Some(v) if v.is_finite() => current.push((*ts as f64, *v)),
            _ => {
                if !current.is_empty() {
                    runs.push(std::mem::take(&mut current));
                }
            }
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}

/// Uniform Catmull-Rom interpolation through `points`, adding `steps` points per segment.
/// The original points are kept; endpoints are duplicated as phantom neighbours.
fn catmull_rom(points: &[(f64, f64)], steps: usize) -> Vec<(f64, f64)> {
    if points.len() < 3 || steps == 0 {
        return points.to_vec();
    }
    let mut out = Vec::with_capacity(points.len() * (steps + 1));
    for i in 0..points.len() - 1 {
        let p0 = points[i.saturating_sub(1)];
        let p1 = points[i];
        let p2 = points[i + 1];
        let p3 = points[(i + 2).min(points.len() - 1)];
        out.push(p1);
        for s in 1..=steps {
            let t = s as f64 / (steps + 1) as f64;
            out.push((
                catmull_rom_1d(p0.0, p1.0, p2.0, p3.0, t),
                catmull_rom_1d(p0.1, p1.1, p2.1, p3.1, t),
            ));
        }
    }
    if let Some(last) = points.last() {
        out.push(*last);
    }
    out
}

fn catmull_rom_1d(p0: f64, p1: f64, p2: f64, p3: f64, t: f64) -> f64 {
    let t2 = t * t;
    let t3 = t2 * t;
    0.5 * ((2.0 * p1)
        + (-p0 + p2) * t
        + (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * t2
        + (-p0 + 3.0 * p1 - 3.0 * p2 + p3) * t3)
}

/// `#rrggbb` or a handful of CSS names; anything else falls back to white.
fn parse_color(text: &str) -> RGBColor {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix('#') {
        if hex.len() == 6 {
            if let Ok(rgb) = u32::from_str_radix(hex, 16) {
                return RGBColor((rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8);
            }
        }
    }
    match text.to_ascii_lowercase().as_str() {
        "black" => BLACK,
        "white" => WHITE,
        _ => {
            debug!("unrecognised color '{text}', using white");
            WHITE
        }
    }
}
