use anyhow::Result;
use chrono::{Datelike, Local, NaiveDate};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, MouseButton, MouseEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    symbols,
    text::{Line, Span},
    widgets::{
        canvas::{Canvas, Line as CanvasLine},
        Axis, Block, Borders, Chart, Clear, Dataset, GraphType, Paragraph, Tabs,
    },
    Frame, Terminal,
};
use serde::Deserialize;
use serde_json::Value;
use std::{
    collections::HashMap,
    fs::File,
    io::{self, BufRead, BufReader},
    path::PathBuf,
    sync::mpsc::{self, Receiver, Sender},
    thread,
    time::Duration,
};

const DEFAULT_API_BASE: &str = "http://localhost:5000";
const DEFAULT_SYMBOL: &str = "AAPL";

/// Period tokens offered by the history tab bar. The selected token is
/// passed through to the API as-is.
const PERIODS: [&str; 7] = ["1d", "5d", "1mo", "6mo", "1y", "5y", "max"];

const REQUEST_TIMEOUT_SECS: u64 = 5;
const EVENT_POLL_MILLIS: u64 = 100;

/// Sample count for the connector curves between bars.
const BEZIER_STEPS: usize = 24;

/// Header stat cells: display label and quote payload key. Cells whose key
/// is absent from the payload are skipped.
const STAT_FIELDS: [(&str, &str); 10] = [
    ("Vol", "volume"),
    ("Open", "open"),
    ("Close", "close"),
    ("High", "high"),
    ("Low", "low"),
    ("Div", "dividends"),
    ("Mkt Cap", "market_cap"),
    ("P/E", "pe_ratio"),
    ("EPS", "eps"),
    ("Beta", "beta"),
];

/// Message sent from a background fetch thread to the UI thread. Each
/// message carries the generation of the search that issued it; results are
/// applied in arrival order, so the last response to arrive wins and a newer
/// search can still be overtaken by an older in-flight response.
#[derive(Debug)]
#[allow(dead_code)] // generation is the cancellation hook, not yet filtered on
enum FetchMessage {
    Quote { generation: u64, quote: Option<Quote> },
    History { generation: u64, points: Option<Vec<HistoryPoint>> },
    Statistics { generation: u64, stats: Option<Statistics> },
}

/// The six financial metrics, in modal navigation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Metric {
    Revenue,
    NetIncome,
    FreeCashFlow,
    Expenses,
    OperatingMargin,
    ShareOutstanding,
}

impl Metric {
    const ALL: [Metric; 6] = [
        Metric::Revenue,
        Metric::NetIncome,
        Metric::FreeCashFlow,
        Metric::Expenses,
        Metric::OperatingMargin,
        Metric::ShareOutstanding,
    ];

    fn label(self) -> &'static str {
        match self {
            Metric::Revenue => "Revenue",
            Metric::NetIncome => "Net Income",
            Metric::FreeCashFlow => "Free Cash Flow",
            Metric::Expenses => "Expenses",
            Metric::OperatingMargin => "Operating Margin",
            Metric::ShareOutstanding => "Share Outstanding",
        }
    }

    /// Key of this metric's series in the statistics `charts` maps.
    fn chart_key(self) -> &'static str {
        match self {
            Metric::Revenue => "Revenue",
            Metric::NetIncome => "NetIncome",
            Metric::FreeCashFlow => "FreeCashFlow",
            Metric::Expenses => "Expenses",
            Metric::OperatingMargin => "OperatingMargin",
            Metric::ShareOutstanding => "ShareOutstanding",
        }
    }

    /// Suffix of this metric's growth key; Expenses and Share Outstanding
    /// use irregular payload names.
    fn growth_suffix(self) -> &'static str {
        match self {
            Metric::Revenue => "Revenue_Growth",
            Metric::NetIncome => "NetIncome_Growth",
            Metric::FreeCashFlow => "FreeCashFlow_Growth",
            Metric::Expenses => "Expense_Growth",
            Metric::OperatingMargin => "OperatingMargin_Growth",
            Metric::ShareOutstanding => "OrdinarySharesNumber_Growth",
        }
    }

    fn color(self) -> Color {
        match self {
            Metric::Revenue => Color::Blue,
            Metric::NetIncome => Color::Magenta,
            Metric::FreeCashFlow => Color::LightRed,
            Metric::Expenses => Color::Yellow,
            Metric::OperatingMargin => Color::Gray,
            Metric::ShareOutstanding => Color::Cyan,
        }
    }

    /// Operating margin values are percentages already; everything else is
    /// a raw amount that gets abbreviated for display.
    fn is_percent_scale(self) -> bool {
        matches!(self, Metric::OperatingMargin)
    }

    /// Inline card title. Operating margin keeps its bare compound name
    /// with no period suffix.
    fn card_title(self, mode: ViewMode) -> String {
        if self == Metric::OperatingMargin {
            "OperatingMargin".to_string()
        } else {
            format!("{} ({})", self.label(), mode.label())
        }
    }

    /// Neighbor in the fixed metric order, wrapping at both ends.
    fn step(self, direction: isize) -> Metric {
        let len = Metric::ALL.len() as isize;
        let idx = Metric::ALL.iter().position(|m| *m == self).unwrap_or(0) as isize;
        Metric::ALL[((idx + direction).rem_euclid(len)) as usize]
    }
}

/// Which slice of the statistics payload is displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ViewMode {
    #[default]
    Quarterly,
    Annual,
}

impl ViewMode {
    fn label(self) -> &'static str {
        match self {
            ViewMode::Quarterly => "Quarterly",
            ViewMode::Annual => "Annual",
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            ViewMode::Quarterly => "QYoY_",
            ViewMode::Annual => "AYoY_",
        }
    }

    fn chart_key(self) -> &'static str {
        match self {
            ViewMode::Quarterly => "quarterly",
            ViewMode::Annual => "annual",
        }
    }

    fn dates_key(self) -> &'static str {
        match self {
            ViewMode::Quarterly => "meta_quarterly_dates",
            ViewMode::Annual => "meta_annual_dates",
        }
    }

    fn toggled(self) -> ViewMode {
        match self {
            ViewMode::Quarterly => ViewMode::Annual,
            ViewMode::Annual => ViewMode::Quarterly,
        }
    }
}

/// One point of a metric series. A null value marks a reporting gap.
#[derive(Clone, Debug, PartialEq, Deserialize)]
struct SeriesPoint {
    date: String,
    value: Option<f64>,
}

/// One close of the price history.
#[derive(Clone, Debug, Deserialize)]
struct HistoryPoint {
    date: String,
    close: f64,
}

/// Statistics payload from `/api/statistics`. Growth keys stay in raw JSON
/// form (numbers, numeric strings, or the `-` sentinel); chart series are
/// parsed into typed points once at load.
#[derive(Clone, Debug, Default)]
struct Statistics {
    fields: serde_json::Map<String, Value>,
    charts: HashMap<String, HashMap<String, Vec<SeriesPoint>>>,
}

impl Statistics {
    fn from_value(value: Value) -> Option<Self> {
        let fields = value.as_object()?.clone();
        let mut charts: HashMap<String, HashMap<String, Vec<SeriesPoint>>> = HashMap::new();
        if let Some(modes) = fields.get("charts").and_then(Value::as_object) {
            for (mode_key, metrics) in modes {
                let entry = charts.entry(mode_key.clone()).or_default();
                if let Some(metrics) = metrics.as_object() {
                    for (name, series) in metrics {
                        let points = serde_json::from_value(series.clone()).unwrap_or_default();
                        entry.insert(name.clone(), points);
                    }
                }
            }
        }
        Some(Statistics { fields, charts })
    }

    fn growth_value(&self, metric: Metric, mode: ViewMode) -> Option<&Value> {
        self.fields.get(&format!("{}{}", mode.prefix(), metric.growth_suffix()))
    }

    fn comparison_dates(&self, mode: ViewMode) -> Option<&str> {
        self.fields.get(mode.dates_key()).and_then(Value::as_str)
    }

    fn series(&self, metric: Metric, mode: ViewMode) -> &[SeriesPoint] {
        self.charts
            .get(mode.chart_key())
            .and_then(|metrics| metrics.get(metric.chart_key()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Latest quote for the header. The raw payload is kept around for the
/// optional stat cells.
#[derive(Clone, Debug)]
struct Quote {
    symbol: String,
    company_name: String,
    price: f64,
    change: f64,
    change_percent: String,
    raw: Value,
}

fn quote_from_value(value: Value) -> Option<Quote> {
    let price = value.get("price")?.as_f64()?;
    let change = value.get("change").and_then(Value::as_f64).unwrap_or(0.0);
    let change_percent = match value.get("change_percent") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => format!("{:.2}%", n.as_f64().unwrap_or(0.0)),
        _ => String::new(),
    };
    Some(Quote {
        symbol: value.get("symbol").and_then(Value::as_str).unwrap_or_default().to_string(),
        company_name: value
            .get("company_name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        price,
        change,
        change_percent,
        raw: value,
    })
}

/// Growth cell content: the sentinel, or a formatted percentage with its
/// sign class. Zero counts as positive.
#[derive(Debug, Clone, PartialEq)]
enum GrowthLabel {
    Missing,
    Value { text: String, positive: bool },
}

fn growth_label(stats: &Statistics, metric: Metric, mode: ViewMode) -> GrowthLabel {
    let raw = match stats.growth_value(metric, mode) {
        Some(raw) => raw,
        None => return GrowthLabel::Missing,
    };
    match raw {
        Value::Number(n) => {
            let Some(v) = n.as_f64() else {
                return GrowthLabel::Missing;
            };
            GrowthLabel::Value { text: format!("{:+.2}%", v), positive: v >= 0.0 }
        }
        Value::String(s) if s != "-" => {
            let body = s.trim_end_matches('%');
            match body.parse::<f64>() {
                Ok(v) => {
                    let sign = if v >= 0.0 && !body.starts_with('+') { "+" } else { "" };
                    GrowthLabel::Value { text: format!("{sign}{body}%"), positive: v >= 0.0 }
                }
                Err(_) => GrowthLabel::Missing,
            }
        }
        _ => GrowthLabel::Missing,
    }
}

/// Point-to-point growth between two bars. Undefined when the starting
/// value is zero; callers skip the label and hover for such segments.
fn percent_change(prev: f64, next: f64) -> Option<f64> {
    if prev == 0.0 {
        return None;
    }
    Some((next - prev) / prev.abs() * 100.0)
}

fn trend_label(diff: f64) -> String {
    format!("{:+.2}%", diff)
}

/// Connector between bars `from` and `from + 1`. Only built when both
/// values are present; gaps never get a connector.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TrendSegment {
    from: usize,
    change: Option<f64>,
}

fn trend_segments(values: &[Option<f64>]) -> Vec<TrendSegment> {
    let mut segments = Vec::new();
    for i in 0..values.len().saturating_sub(1) {
        if let (Some(prev), Some(next)) = (values[i], values[i + 1]) {
            segments.push(TrendSegment { from: i, change: percent_change(prev, next) });
        }
    }
    segments
}

/// Horizontal hover span of one hoverable segment, in terminal columns.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SegmentHit {
    index: usize,
    x1: f64,
    x2: f64,
}

/// Map hoverable segments onto the plot area. Bar i sits at data x = i + 0.5
/// over an x domain of [0, n]; segments with no defined change are excluded
/// so they can never become active.
fn segment_hits(segments: &[TrendSegment], plot: Rect, n: usize) -> Vec<SegmentHit> {
    if n == 0 || plot.width == 0 {
        return Vec::new();
    }
    let scale = plot.width as f64 / n as f64;
    segments
        .iter()
        .filter(|segment| segment.change.is_some())
        .map(|segment| SegmentHit {
            index: segment.from,
            x1: plot.x as f64 + (segment.from as f64 + 0.5) * scale,
            x2: plot.x as f64 + (segment.from as f64 + 1.5) * scale,
        })
        .collect()
}

/// First segment (scanning left to right) whose span contains the pointer.
fn active_segment(hits: &[SegmentHit], x: f64) -> Option<usize> {
    hits.iter().find(|hit| x >= hit.x1 && x <= hit.x2).map(|hit| hit.index)
}

/// Cubic Bezier between two bar value points with horizontal mid control
/// points, sampled into a polyline.
fn bezier_points(x1: f64, y1: f64, x2: f64, y2: f64, steps: usize) -> Vec<(f64, f64)> {
    let cpx = (x1 + x2) / 2.0;
    (0..=steps)
        .map(|s| {
            let t = s as f64 / steps as f64;
            let u = 1.0 - t;
            let x = u.powi(3) * x1 + 3.0 * u * u * t * cpx + 3.0 * u * t * t * cpx + t.powi(3) * x2;
            let y = u.powi(3) * y1 + 3.0 * u * u * t * y1 + 3.0 * u * t * t * y2 + t.powi(3) * y2;
            (x, y)
        })
        .collect()
}

/// Abbreviate a raw amount with K/M/B/T suffixes; zero displays as the
/// sentinel, sub-thousand values pass through with two decimals.
fn format_abbrev(n: f64) -> String {
    if n == 0.0 {
        return "-".to_string();
    }
    let (sign, a) = if n < 0.0 { ("-", -n) } else { ("", n) };
    let (div, suffix) = if a >= 1.0e12 {
        (1.0e12, "T")
    } else if a >= 1.0e9 {
        (1.0e9, "B")
    } else if a >= 1.0e6 {
        (1.0e6, "M")
    } else if a >= 1.0e3 {
        (1.0e3, "K")
    } else {
        (1.0, "")
    };
    format!("{sign}{:.2}{suffix}", a / div)
}

/// Stat-cell formatting over a raw payload value: numbers (or numeric
/// strings) are abbreviated, anything else falls back to the sentinel or
/// the original text.
fn format_stat(value: &Value) -> String {
    match value {
        Value::Number(n) => n.as_f64().map(format_abbrev).unwrap_or_else(|| "-".to_string()),
        Value::String(s) => s.parse::<f64>().map(format_abbrev).unwrap_or_else(|_| s.clone()),
        _ => "-".to_string(),
    }
}

fn format_axis_value(metric: Metric, v: f64) -> String {
    if metric.is_percent_scale() {
        format!("{:.0}%", v)
    } else {
        format_abbrev(v)
    }
}

/// Axis label for one series date: `Q<n> <year>` in quarterly mode,
/// `FY<yy>` in annual mode. Unparseable dates pass through unchanged.
fn axis_label(date: &str, mode: ViewMode) -> String {
    let Ok(parsed) = NaiveDate::parse_from_str(date, "%Y-%m-%d") else {
        return date.to_string();
    };
    match mode {
        ViewMode::Quarterly => format!("Q{} {}", (parsed.month() + 2) / 3, parsed.year()),
        ViewMode::Annual => format!("FY{:02}", parsed.year() % 100),
    }
}

/// Truthy `error` marker on an API payload; absence or a falsy value means
/// the result can be applied.
fn has_error_marker(value: &Value) -> bool {
    match value.get("error") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(_) => true,
    }
}

/// Blocking GET against the backend. Transport failures, non-success
/// statuses, and payload error markers all collapse to None; the caller
/// keeps whatever state it already had.
fn api_get(base: &str, path: &str) -> Option<Value> {
    let url = format!("{}{}", base.trim_end_matches('/'), path);
    let response = reqwest::blocking::Client::new()
        .get(&url)
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .send()
        .ok()?;
    if !response.status().is_success() {
        return None;
    }
    let value = response.json::<Value>().ok()?;
    if has_error_marker(&value) {
        return None;
    }
    Some(value)
}

fn fetch_quote_blocking(base: &str, symbol: &str) -> Option<Quote> {
    quote_from_value(api_get(base, &format!("/api/quote/{}", symbol))?)
}

fn fetch_history_blocking(base: &str, symbol: &str, period: &str) -> Option<Vec<HistoryPoint>> {
    parse_history(api_get(base, &format!("/api/history/{}?period={}", symbol, period))?)
}

fn parse_history(value: Value) -> Option<Vec<HistoryPoint>> {
    serde_json::from_value(value).ok()
}

fn fetch_statistics_blocking(base: &str, symbol: &str) -> Option<Statistics> {
    Statistics::from_value(api_get(base, &format!("/api/statistics/{}", symbol))?)
}

#[derive(Clone, Debug)]
struct Config {
    api_base: String,
    symbol: String,
}

fn config_path() -> PathBuf {
    dirs::home_dir().unwrap_or_default().join(".config/stockdash/config")
}

/// Read `key = value` lines from the config file, then let the environment
/// override them.
fn load_config() -> Config {
    let mut config = Config {
        api_base: DEFAULT_API_BASE.to_string(),
        symbol: DEFAULT_SYMBOL.to_string(),
    };

    if let Ok(file) = File::open(config_path()) {
        for line in BufReader::new(file).lines().map_while(io::Result::ok) {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                match key.trim() {
                    "api_base" => config.api_base = value.trim().to_string(),
                    "symbol" => config.symbol = value.trim().to_uppercase(),
                    _ => {}
                }
            }
        }
    }

    if let Ok(base) = std::env::var("STOCKDASH_API_BASE") {
        if !base.is_empty() {
            config.api_base = base;
        }
    }
    if let Ok(symbol) = std::env::var("STOCKDASH_SYMBOL") {
        if !symbol.is_empty() {
            config.symbol = symbol.to_uppercase();
        }
    }

    config
}

fn is_demo_mode() -> bool {
    std::env::var("DEMO").map(|v| v == "true" || v == "1").unwrap_or(false)
}

fn demo_quote(symbol: &str) -> Quote {
    Quote {
        symbol: symbol.to_string(),
        company_name: "Demo Corporation".to_string(),
        price: 189.84,
        change: 1.62,
        change_percent: "0.86%".to_string(),
        raw: serde_json::json!({
            "volume": 54_320_000.0,
            "open": 188.22,
            "close": 189.84,
            "high": 190.45,
            "low": 187.91,
            "dividends": 0.25,
            "market_cap": 2.95e12,
            "pe_ratio": 31.2,
            "eps": 6.08,
            "beta": "-",
        }),
    }
}

fn demo_history() -> Vec<HistoryPoint> {
    (0..30)
        .map(|i| HistoryPoint {
            date: format!("2025-06-{:02}", i + 1),
            close: 182.0 + (i as f64 * 0.6).sin() * 5.0 + i as f64 * 0.25,
        })
        .collect()
}

fn demo_series(dates: &[&str], values: &[Option<f64>]) -> Value {
    Value::Array(
        dates
            .iter()
            .zip(values)
            .map(|(date, value)| serde_json::json!({ "date": date, "value": value }))
            .collect(),
    )
}

fn demo_statistics() -> Statistics {
    let q = [
        "2023-09-30", "2023-12-31", "2024-03-31", "2024-06-30",
        "2024-09-30", "2024-12-31", "2025-03-31", "2025-06-30",
    ];
    let a = ["2021-12-31", "2022-12-31", "2023-12-31", "2024-12-31"];
    let some = |xs: &[f64]| xs.iter().map(|v| Some(*v)).collect::<Vec<_>>();

    let mut q_fcf = some(&[19.4e9, 22.8e9, 20.1e9, 21.9e9, 23.5e9, 26.0e9, 22.4e9, 24.3e9]);
    q_fcf[4] = None; // reporting gap

    let payload = serde_json::json!({
        "meta_quarterly_dates": "2025-06-30 vs 2024-06-30",
        "meta_annual_dates": "2024-12-31 vs 2023-12-31",
        "QYoY_Revenue_Growth": "12.50",
        "QYoY_NetIncome_Growth": 8.31,
        "QYoY_Expense_Growth": 4.02,
        "QYoY_FreeCashFlow_Growth": -3.75,
        "QYoY_OperatingMargin_Growth": "-",
        "QYoY_OrdinarySharesNumber_Growth": -0.42,
        "AYoY_Revenue_Growth": 6.87,
        "AYoY_NetIncome_Growth": "5.60",
        "AYoY_Expense_Growth": 3.11,
        "AYoY_FreeCashFlow_Growth": 9.94,
        "AYoY_OperatingMargin_Growth": "-",
        "AYoY_OrdinarySharesNumber_Growth": -1.08,
        "charts": {
            "quarterly": {
                "Revenue": demo_series(&q, &some(&[81.8e9, 119.6e9, 90.8e9, 85.8e9, 94.9e9, 124.3e9, 95.4e9, 96.5e9])),
                "NetIncome": demo_series(&q, &some(&[23.0e9, 34.0e9, 23.6e9, 21.4e9, 14.7e9, 36.3e9, 24.8e9, 23.2e9])),
                "Expenses": demo_series(&q, &some(&[54.4e9, 75.3e9, 59.1e9, 57.0e9, 61.1e9, 78.2e9, 62.7e9, 63.0e9])),
                "FreeCashFlow": demo_series(&q, &q_fcf),
                "ShareOutstanding": demo_series(&q, &some(&[15.6e9, 15.5e9, 15.4e9, 15.3e9, 15.2e9, 15.1e9, 15.0e9, 14.9e9])),
            },
            "annual": {
                "Revenue": demo_series(&a, &some(&[365.8e9, 394.3e9, 383.3e9, 391.0e9])),
                "NetIncome": demo_series(&a, &some(&[94.7e9, 99.8e9, 97.0e9, 93.7e9])),
                "Expenses": demo_series(&a, &some(&[256.9e9, 274.9e9, 268.0e9, 267.8e9])),
                "FreeCashFlow": demo_series(&a, &some(&[92.9e9, 111.4e9, 99.6e9, 108.8e9])),
                "ShareOutstanding": demo_series(&a, &some(&[16.4e9, 16.0e9, 15.6e9, 15.2e9])),
            },
        },
    });

    Statistics::from_value(payload).unwrap_or_default()
}

/// Holder of the last-fetched statistics payload and the inline view mode.
/// Replacing the payload is atomic from the renderer's point of view: the
/// next frame reads either the old or the new payload, never a mix.
#[derive(Debug, Default)]
struct Financials {
    stats: Option<Statistics>,
    mode: ViewMode,
}

impl Financials {
    fn set(&mut self, stats: Statistics) {
        self.stats = Some(stats);
    }

    fn stats(&self) -> Option<&Statistics> {
        self.stats.as_ref()
    }

    fn set_mode(&mut self, mode: ViewMode) {
        self.mode = mode;
    }
}

/// Drill-down state: the metric on display and the modal's own view mode,
/// which starts from the inline mode and diverges from there.
#[derive(Debug, Clone, Copy, PartialEq)]
struct MetricModal {
    metric: Metric,
    mode: ViewMode,
}

#[derive(Debug)]
enum InputMode {
    Normal,
    Search(String),
    MetricDetail(MetricModal),
}

/// Which plot the pointer is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChartSurface {
    Card(Metric),
    Modal,
}

/// Interactive UI geometry, rebuilt on every frame during rendering: click
/// targets plus the hover spans of every bar chart on screen.
#[derive(Default, Clone)]
struct UiRegions {
    period_tabs: Vec<(Rect, usize)>,
    mode_toggles: Vec<(Rect, ViewMode)>,
    metric_cards: Vec<(Rect, Metric)>,
    card_plots: Vec<(Metric, Rect, Vec<SegmentHit>)>,
    footer_buttons: Vec<(Rect, &'static str)>,
    modal_area: Option<Rect>,
    modal_toggles: Vec<(Rect, ViewMode)>,
    modal_nav: Vec<(Rect, isize)>,
    modal_plot: Option<(Rect, Vec<SegmentHit>)>,
}

struct App {
    config: Config,
    symbol: String,
    period_idx: usize,
    quote: Option<Quote>,
    history: Vec<HistoryPoint>,
    financials: Financials,
    input_mode: InputMode,
    /// Active hover segment, if the pointer sits between two bars.
    hover: Option<(ChartSurface, usize)>,
    regions: UiRegions,
    // Async fetch infrastructure
    fetch_sender: Sender<FetchMessage>,
    fetch_receiver: Receiver<FetchMessage>,
    inflight: usize,
    fetch_generation: u64,
}

impl App {
    fn new(config: Config) -> Self {
        let (fetch_sender, fetch_receiver) = mpsc::channel();
        let symbol = config.symbol.clone();
        App {
            config,
            symbol,
            period_idx: 0,
            quote: None,
            history: Vec::new(),
            financials: Financials::default(),
            input_mode: InputMode::Normal,
            hover: None,
            regions: UiRegions::default(),
            fetch_sender,
            fetch_receiver,
            inflight: 0,
            fetch_generation: 0,
        }
    }

    fn period(&self) -> &'static str {
        PERIODS[self.period_idx]
    }

    /// Kick off the three endpoint fetches for the current symbol/period on
    /// background threads. Each result arrives independently; a failure on
    /// one endpoint never blocks the other two.
    fn start_fetch(&mut self) {
        self.fetch_generation += 1;
        let generation = self.fetch_generation;
        self.inflight += 3;

        if is_demo_mode() {
            // Demo payloads travel the same channel as live results.
            let sender = self.fetch_sender.clone();
            let symbol = self.symbol.clone();
            thread::spawn(move || {
                let _ = sender.send(FetchMessage::Quote { generation, quote: Some(demo_quote(&symbol)) });
                let _ = sender.send(FetchMessage::History { generation, points: Some(demo_history()) });
                let _ = sender.send(FetchMessage::Statistics { generation, stats: Some(demo_statistics()) });
            });
            return;
        }

        let base = self.config.api_base.clone();
        let symbol = self.symbol.clone();
        let period = self.period().to_string();

        let sender = self.fetch_sender.clone();
        let (b, s) = (base.clone(), symbol.clone());
        thread::spawn(move || {
            let quote = fetch_quote_blocking(&b, &s);
            let _ = sender.send(FetchMessage::Quote { generation, quote });
        });

        let sender = self.fetch_sender.clone();
        let (b, s) = (base.clone(), symbol.clone());
        thread::spawn(move || {
            let points = fetch_history_blocking(&b, &s, &period);
            let _ = sender.send(FetchMessage::History { generation, points });
        });

        let sender = self.fetch_sender.clone();
        thread::spawn(move || {
            let stats = fetch_statistics_blocking(&base, &symbol);
            let _ = sender.send(FetchMessage::Statistics { generation, stats });
        });
    }

    /// Drain pending fetch results without blocking. Failed fetches leave
    /// the previous state in place.
    ///
    /// TODO: drop results from superseded generations once search
    /// cancellation is wanted; today the last response to arrive wins.
    fn process_fetch_results(&mut self) -> bool {
        let mut updated = false;
        while let Ok(message) = self.fetch_receiver.try_recv() {
            self.inflight = self.inflight.saturating_sub(1);
            match message {
                FetchMessage::Quote { quote: Some(quote), .. } => {
                    self.quote = Some(quote);
                    updated = true;
                }
                FetchMessage::History { points: Some(points), .. } => {
                    self.history = points;
                    updated = true;
                }
                FetchMessage::Statistics { stats: Some(stats), .. } => {
                    self.financials.set(stats);
                    self.hover = None;
                    updated = true;
                }
                _ => {}
            }
        }
        updated
    }

    fn set_inline_mode(&mut self, mode: ViewMode) {
        self.financials.set_mode(mode);
        self.hover = None;
    }

    fn open_metric_modal(&mut self, metric: Metric) {
        self.hover = None;
        // The modal inherits the inline mode at open time and keeps its own
        // copy from then on.
        self.input_mode = InputMode::MetricDetail(MetricModal { metric, mode: self.financials.mode });
    }

    fn modal_navigate(&mut self, direction: isize) {
        if let InputMode::MetricDetail(modal) = &mut self.input_mode {
            modal.metric = modal.metric.step(direction);
            self.hover = None;
        }
    }

    fn modal_set_mode(&mut self, mode: ViewMode) {
        if let InputMode::MetricDetail(modal) = &mut self.input_mode {
            modal.mode = mode;
            self.hover = None;
        }
    }

    fn close_modal(&mut self) {
        self.hover = None;
        self.input_mode = InputMode::Normal;
    }

    /// Re-resolve the hover segment for a pointer position. Returns true
    /// only when the active segment actually changed, so pointer moves
    /// inside the same segment cost nothing.
    fn update_hover(&mut self, x: u16, y: u16) -> bool {
        let px = x as f64 + 0.5;
        let next = match &self.input_mode {
            InputMode::MetricDetail(_) => self
                .regions
                .modal_plot
                .as_ref()
                .filter(|(rect, _)| point_in_rect(x, y, *rect))
                .and_then(|(_, hits)| active_segment(hits, px))
                .map(|index| (ChartSurface::Modal, index)),
            InputMode::Normal => self.regions.card_plots.iter().find_map(|(metric, rect, hits)| {
                if point_in_rect(x, y, *rect) {
                    active_segment(hits, px).map(|index| (ChartSurface::Card(*metric), index))
                } else {
                    None
                }
            }),
            InputMode::Search(_) => None,
        };
        if next != self.hover {
            self.hover = next;
            true
        } else {
            false
        }
    }
}

/// Check if a point (x, y) is inside a Rect
fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn main() -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(load_config());
    app.start_fetch();
    let res = run_app(&mut terminal, &mut app);

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        eprintln!("Error: {err:?}");
    }

    Ok(())
}

enum Action {
    None,
    Quit,
    Search(String),
    SwitchPeriod(usize),
    SetMode(ViewMode),
    OpenMetric(Metric),
    ModalNavigate(isize),
    ModalSetMode(ViewMode),
    CloseModal,
    Refresh,
}

fn run_app<B: ratatui::backend::Backend>(terminal: &mut Terminal<B>, app: &mut App) -> Result<()> {
    loop {
        // Apply any fetch results that arrived since the last frame
        app.process_fetch_results();

        terminal.draw(|f| ui(f, app))?;
        // Note: regions are updated during ui() rendering

        if event::poll(Duration::from_millis(EVENT_POLL_MILLIS))? {
            let event = event::read()?;

            let action = match event {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    handle_input(app, key.code)
                }
                Event::Mouse(mouse) => {
                    handle_mouse(app, mouse.kind, mouse.column, mouse.row)
                }
                _ => Action::None,
            };

            match action {
                Action::Quit => return Ok(()),
                Action::Search(symbol) => {
                    app.symbol = symbol;
                    app.input_mode = InputMode::Normal;
                    app.start_fetch();
                }
                Action::SwitchPeriod(idx) => {
                    app.period_idx = idx;
                    app.start_fetch();
                }
                Action::SetMode(mode) => {
                    app.set_inline_mode(mode);
                }
                Action::OpenMetric(metric) => {
                    app.open_metric_modal(metric);
                }
                Action::ModalNavigate(direction) => {
                    app.modal_navigate(direction);
                }
                Action::ModalSetMode(mode) => {
                    app.modal_set_mode(mode);
                }
                Action::CloseModal => {
                    app.close_modal();
                }
                Action::Refresh => {
                    if app.inflight == 0 {
                        app.start_fetch();
                    }
                }
                Action::None => {}
            }
        }
    }
}

fn handle_input(app: &mut App, key: KeyCode) -> Action {
    match &mut app.input_mode {
        InputMode::Normal => match key {
            KeyCode::Char('q') => Action::Quit,
            KeyCode::Char('s') | KeyCode::Char('/') => {
                app.input_mode = InputMode::Search(String::new());
                Action::None
            }
            KeyCode::Char('r') => Action::Refresh,
            KeyCode::Char('m') => Action::SetMode(app.financials.mode.toggled()),
            KeyCode::Left | KeyCode::Char('h') => {
                Action::SwitchPeriod((app.period_idx + PERIODS.len() - 1) % PERIODS.len())
            }
            KeyCode::Right | KeyCode::Char('l') => {
                Action::SwitchPeriod((app.period_idx + 1) % PERIODS.len())
            }
            KeyCode::Char(c) if ('1'..='6').contains(&c) => {
                let idx = c as usize - '1' as usize;
                Action::OpenMetric(Metric::ALL[idx])
            }
            _ => Action::None,
        },
        InputMode::MetricDetail(modal) => match key {
            KeyCode::Esc | KeyCode::Enter | KeyCode::Char('q') => Action::CloseModal,
            KeyCode::Left | KeyCode::Char('h') => Action::ModalNavigate(-1),
            KeyCode::Right | KeyCode::Char('l') => Action::ModalNavigate(1),
            KeyCode::Char('m') => Action::ModalSetMode(modal.mode.toggled()),
            _ => Action::None,
        },
        InputMode::Search(input) => match key {
            KeyCode::Esc => {
                app.input_mode = InputMode::Normal;
                Action::None
            }
            KeyCode::Enter => {
                let symbol = input.trim().to_uppercase();
                if symbol.is_empty() {
                    app.input_mode = InputMode::Normal;
                    Action::None
                } else {
                    Action::Search(symbol)
                }
            }
            KeyCode::Backspace => {
                input.pop();
                Action::None
            }
            KeyCode::Char(c) if c.is_alphanumeric() || ".-^=".contains(c) => {
                input.push(c);
                Action::None
            }
            _ => Action::None,
        },
    }
}

fn handle_mouse(app: &mut App, kind: MouseEventKind, x: u16, y: u16) -> Action {
    // Pointer movement drives the trend-line hover; a re-render only
    // becomes necessary when the active segment changes.
    if matches!(kind, MouseEventKind::Moved) {
        app.update_hover(x, y);
        return Action::None;
    }

    if !matches!(kind, MouseEventKind::Down(MouseButton::Left)) {
        return Action::None;
    }

    match &app.input_mode {
        InputMode::Search(_) => Action::None,
        InputMode::MetricDetail(_) => {
            for (rect, mode) in &app.regions.modal_toggles {
                if point_in_rect(x, y, *rect) {
                    return Action::ModalSetMode(*mode);
                }
            }
            for (rect, direction) in &app.regions.modal_nav {
                if point_in_rect(x, y, *rect) {
                    return Action::ModalNavigate(*direction);
                }
            }
            // Click outside the modal dismisses it
            match app.regions.modal_area {
                Some(area) if !point_in_rect(x, y, area) => Action::CloseModal,
                _ => Action::None,
            }
        }
        InputMode::Normal => {
            for (rect, idx) in &app.regions.period_tabs {
                if point_in_rect(x, y, *rect) {
                    return Action::SwitchPeriod(*idx);
                }
            }
            for (rect, mode) in &app.regions.mode_toggles {
                if point_in_rect(x, y, *rect) {
                    return Action::SetMode(*mode);
                }
            }
            for (rect, action_name) in &app.regions.footer_buttons {
                if point_in_rect(x, y, *rect) {
                    return match *action_name {
                        "refresh" => Action::Refresh,
                        "quit" => Action::Quit,
                        _ => Action::None,
                    };
                }
            }
            for (rect, metric) in &app.regions.metric_cards {
                if point_in_rect(x, y, *rect) {
                    return Action::OpenMetric(*metric);
                }
            }
            Action::None
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    // Clear interactive regions before each render
    app.regions = UiRegions::default();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(5),  // Quote header
            Constraint::Length(3),  // Period tabs
            Constraint::Min(8),     // Price history chart
            Constraint::Length(6),  // Growth panel
            Constraint::Length(13), // Metric cards
            Constraint::Length(1),  // Footer
        ])
        .split(f.area());

    render_header(f, app, chunks[0]);
    render_period_tabs(f, app, chunks[1]);
    render_price_chart(f, app, chunks[2]);
    render_growth_panel(f, app, chunks[3]);
    render_metric_cards(f, app, chunks[4]);
    render_footer(f, app, chunks[5]);

    // Render dialogs
    match &app.input_mode {
        InputMode::Search(input) => {
            let input = input.clone();
            render_search_dialog(f, &input);
        }
        InputMode::MetricDetail(modal) => {
            let modal = *modal;
            render_metric_modal(f, app, modal);
        }
        InputMode::Normal => {}
    }
}

fn render_header(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default().borders(Borders::ALL).title(" Quote ");
    let inner = block.inner(area);
    f.render_widget(block, area);

    let time_str = Local::now().format("%H:%M:%S").to_string();
    let status = if app.inflight > 0 {
        format!("Updated {}  |  Refreshing...", time_str)
    } else {
        format!("Updated {}", time_str)
    };

    let Some(quote) = &app.quote else {
        let lines = vec![
            Line::from(vec![
                Span::styled("  Waiting for quote data...", Style::default().fg(Color::DarkGray)),
                Span::styled(format!("    {}", status), Style::default().fg(Color::DarkGray)),
            ]),
        ];
        f.render_widget(Paragraph::new(lines), inner);
        return;
    };

    // Off the daily window the change is measured against the start of the
    // charted period rather than the quote's own daily change.
    let (change, percent) = if app.period() != "1d" && !app.history.is_empty() {
        let start = app.history[0].close;
        let change = quote.price - start;
        let percent = if start != 0.0 {
            format!("{:+.2}%", change / start * 100.0)
        } else {
            "-".to_string()
        };
        (change, percent)
    } else {
        let raw = &quote.change_percent;
        let percent = if raw.is_empty() {
            "-".to_string()
        } else if raw.ends_with('%') {
            raw.clone()
        } else {
            format!("{}%", raw)
        };
        (quote.change, percent)
    };

    let color = if change >= 0.0 { Color::Green } else { Color::Red };
    let arrow = if change >= 0.0 { "↑" } else { "↓" };

    let mut stat_spans: Vec<Span> = vec![Span::raw("  ")];
    for (label, key) in STAT_FIELDS {
        let Some(value) = quote.raw.get(key) else {
            continue; // absent cells are skipped
        };
        if stat_spans.len() > 1 {
            stat_spans.push(Span::styled("  |  ", Style::default().fg(Color::DarkGray)));
        }
        stat_spans.push(Span::styled(format!("{} ", label), Style::default().fg(Color::DarkGray)));
        stat_spans.push(Span::raw(format_stat(value)));
    }

    let lines = vec![
        Line::from(vec![
            Span::styled(
                format!("  {}", quote.company_name),
                Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
            ),
            Span::styled(format!("  {}", quote.symbol), Style::default().fg(Color::DarkGray)),
            Span::styled(format!("    {}", status), Style::default().fg(Color::DarkGray)),
        ]),
        Line::from(vec![
            Span::styled(
                format!("  {:.2}", quote.price),
                Style::default().fg(color).add_modifier(Modifier::BOLD),
            ),
            Span::raw("  "),
            Span::styled(format!("{}{:+.2} ({})", arrow, change, percent), Style::default().fg(color)),
        ]),
        Line::from(stat_spans),
    ];

    f.render_widget(Paragraph::new(lines), inner);
}

fn render_period_tabs(f: &mut Frame, app: &mut App, area: Rect) {
    let mut titles: Vec<Line> = Vec::new();
    let mut tab_widths: Vec<usize> = Vec::new();

    for (i, period) in PERIODS.iter().enumerate() {
        let title = format!(" {} ", period);
        tab_widths.push(title.len());
        if i == app.period_idx {
            titles.push(Line::from(title).cyan().bold());
        } else {
            titles.push(Line::from(title).dark_gray());
        }
    }

    // Calculate clickable regions for tabs (inside the border)
    let inner_x = area.x + 1;
    let tab_y = area.y + 1;
    let mut current_x = inner_x;

    for (i, width) in tab_widths.iter().enumerate() {
        let tab_rect = Rect::new(current_x, tab_y, *width as u16, 1);
        app.regions.period_tabs.push((tab_rect, i));
        current_x += *width as u16 + 1; // +1 for divider "|"
    }

    let tabs = Tabs::new(titles)
        .block(Block::default().borders(Borders::ALL).title(" Period "))
        .divider("|");

    f.render_widget(tabs, area);
}

fn render_price_chart(f: &mut Frame, app: &App, area: Rect) {
    let title = format!(" Price History ({}) ", app.period());

    if app.history.is_empty() {
        let paragraph = Paragraph::new("  No history data available")
            .block(Block::default().borders(Borders::ALL).title(title))
            .style(Style::default().fg(Color::DarkGray));
        f.render_widget(paragraph, area);
        return;
    }

    let data: Vec<(f64, f64)> = app
        .history
        .iter()
        .enumerate()
        .map(|(i, point)| (i as f64, point.close))
        .collect();

    let min_y = app.history.iter().map(|p| p.close).fold(f64::INFINITY, f64::min) * 0.98;
    let mut max_y = app.history.iter().map(|p| p.close).fold(f64::NEG_INFINITY, f64::max) * 1.02;
    if (max_y - min_y).abs() < f64::EPSILON {
        max_y = min_y + 1.0;
    }
    let max_x = app.history.len() as f64;

    let first_date = app.history.first().map(|p| p.date.clone()).unwrap_or_default();
    let last_date = app.history.last().map(|p| p.date.clone()).unwrap_or_default();

    let datasets = vec![
        Dataset::default()
            .name("Close")
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::Green))
            .data(&data),
    ];

    let chart = Chart::new(datasets)
        .block(Block::default().borders(Borders::ALL).title(title))
        .x_axis(
            Axis::default()
                .style(Style::default().fg(Color::Gray))
                .bounds([0.0, max_x])
                .labels(vec![Span::raw(first_date), Span::raw(last_date)]),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(Color::Gray))
                .bounds([min_y, max_y])
                .labels(vec![
                    Span::raw(format!("{:.2}", min_y)),
                    Span::raw(format!("{:.2}", max_y)),
                ]),
        );

    f.render_widget(chart, area);
}

fn render_growth_panel(f: &mut Frame, app: &mut App, area: Rect) {
    let mode = app.financials.mode;

    let block = Block::default().borders(Borders::ALL).title(" Financial Growth (YoY) ");
    let inner = block.inner(area);
    f.render_widget(block, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // mode toggle + comparison dates
            Constraint::Length(1), // spacer
            Constraint::Min(2),    // growth grid
        ])
        .split(inner);

    let toggle_area = rows[0];
    let q_title = " Quarterly YoY ";
    let a_title = " Annual YoY ";
    let q_rect = Rect::new(toggle_area.x, toggle_area.y, q_title.len() as u16, 1);
    let a_rect = Rect::new(
        toggle_area.x + q_title.len() as u16 + 1,
        toggle_area.y,
        a_title.len() as u16,
        1,
    );
    app.regions.mode_toggles.push((q_rect, ViewMode::Quarterly));
    app.regions.mode_toggles.push((a_rect, ViewMode::Annual));

    let toggle_style = |m: ViewMode| {
        if m == mode {
            Style::default().fg(Color::Black).bg(Color::Cyan).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::DarkGray)
        }
    };

    let dates = app
        .financials
        .stats()
        .and_then(|stats| stats.comparison_dates(mode))
        .map(|dates| format!("  Comparing: {}", dates))
        .unwrap_or_default();

    let toggle_line = Line::from(vec![
        Span::styled(q_title, toggle_style(ViewMode::Quarterly)),
        Span::raw(" "),
        Span::styled(a_title, toggle_style(ViewMode::Annual)),
        Span::styled(dates, Style::default().fg(Color::DarkGray)),
    ]);
    f.render_widget(Paragraph::new(toggle_line), toggle_area);

    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Ratio(1, 6); 6])
        .split(rows[2]);

    for (i, metric) in Metric::ALL.iter().enumerate() {
        let label = app
            .financials
            .stats()
            .map(|stats| growth_label(stats, *metric, mode))
            .unwrap_or(GrowthLabel::Missing);

        let (text, style) = match label {
            GrowthLabel::Missing => ("-".to_string(), Style::default().fg(Color::White)),
            GrowthLabel::Value { text, positive } => {
                let color = if positive { Color::Green } else { Color::Red };
                (text, Style::default().fg(color).add_modifier(Modifier::BOLD))
            }
        };

        let lines = vec![
            Line::from(Span::styled(metric.label(), Style::default().fg(Color::DarkGray))),
            Line::from(Span::styled(text, style)),
        ];
        f.render_widget(Paragraph::new(lines), cols[i]);
    }
}

fn render_metric_cards(f: &mut Frame, app: &mut App, area: Rect) {
    let mode = app.financials.mode;
    let hover = app.hover;

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    for (i, metric) in Metric::ALL.iter().enumerate() {
        let row = rows[i / 3];
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Ratio(1, 3); 3])
            .split(row);
        let cell = cols[i % 3];

        app.regions.metric_cards.push((cell, *metric));

        let series: Vec<SeriesPoint> = app
            .financials
            .stats()
            .map(|stats| stats.series(*metric, mode).to_vec())
            .unwrap_or_default();

        let active = match hover {
            Some((ChartSurface::Card(m), index)) if m == *metric => Some(index),
            _ => None,
        };

        let geometry = render_trend_chart(f, cell, *metric, mode, &series, active, ChartScale::Card);
        app.regions.card_plots.push((*metric, geometry.area, geometry.hits));
    }
}

/// Rendering variant of the shared bar/trend renderer: small inline card or
/// the full-size modal chart with axes.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ChartScale {
    Card,
    Modal,
}

/// Plot area and hover spans produced by one chart render, consumed by the
/// pointer handling of the following frames.
struct PlotGeometry {
    area: Rect,
    hits: Vec<SegmentHit>,
}

/// Bar chart with the trend-line overlay: bars at the metric color, a
/// Bezier connector between every adjacent pair of present values colored
/// by the sign of the percent change, and the change label printed above
/// the midpoint of the active segment only.
fn render_trend_chart(
    f: &mut Frame,
    area: Rect,
    metric: Metric,
    mode: ViewMode,
    series: &[SeriesPoint],
    active: Option<usize>,
    scale: ChartScale,
) -> PlotGeometry {
    // Card charts carry their own title block; the modal draws its chrome
    // around the plot area it hands in.
    let (plot, ystrip, xlabels) = match scale {
        ChartScale::Card => {
            let block = Block::default()
                .borders(Borders::ALL)
                .title(Line::from(metric.card_title(mode)).style(Style::default().fg(metric.color())));
            let inner = block.inner(area);
            f.render_widget(block, area);
            (inner, None, None)
        }
        ChartScale::Modal => {
            let vert = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Min(3), Constraint::Length(1)])
                .split(area);
            let horiz = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Length(10), Constraint::Min(10)])
                .split(vert[0]);
            let xlabels = Rect::new(horiz[1].x, vert[1].y, horiz[1].width, vert[1].height);
            (horiz[1], Some(horiz[0]), Some(xlabels))
        }
    };

    let values: Vec<Option<f64>> = series.iter().map(|point| point.value).collect();
    let drawable = values.iter().flatten().count();

    if values.is_empty() || drawable == 0 {
        let style = match scale {
            ChartScale::Card => Style::default().fg(Color::DarkGray),
            ChartScale::Modal => Style::default().fg(Color::DarkGray).add_modifier(Modifier::BOLD),
        };
        let mut lines: Vec<Line> = Vec::new();
        for _ in 0..plot.height.saturating_sub(1) / 2 {
            lines.push(Line::from(""));
        }
        lines.push(Line::from("No Data"));
        f.render_widget(Paragraph::new(lines).alignment(Alignment::Center).style(style), plot);
        return PlotGeometry { area: plot, hits: Vec::new() };
    }

    let n = values.len();
    let segments = trend_segments(&values);

    let max_v = values.iter().flatten().fold(f64::NEG_INFINITY, |acc, v| acc.max(*v));
    let min_v = values.iter().flatten().fold(f64::INFINITY, |acc, v| acc.min(*v));
    let y_hi = max_v.max(0.0);
    let y_lo = min_v.min(0.0);
    let span = if (y_hi - y_lo).abs() < f64::EPSILON { 1.0 } else { y_hi - y_lo };
    // Headroom above the tallest bar keeps the hover label inside bounds
    let y_top = y_hi + span * 0.15;
    let y_bot = if y_lo < 0.0 { y_lo - span * 0.05 } else { 0.0 };

    let plot_width = plot.width.max(1) as f64;
    let fill_step = n as f64 / (plot_width * 2.0);
    let unit_per_cell = n as f64 / plot_width;
    let bar_half = match scale {
        ChartScale::Card => 0.30,
        ChartScale::Modal => 0.33,
    };
    let bar_color = metric.color();

    let canvas = Canvas::default()
        .marker(symbols::Marker::Braille)
        .x_bounds([0.0, n as f64])
        .y_bounds([y_bot, y_top])
        .paint(|ctx| {
            for (i, value) in values.iter().enumerate() {
                let Some(v) = *value else { continue };
                let center = i as f64 + 0.5;
                let mut x = center - bar_half;
                while x <= center + bar_half {
                    ctx.draw(&CanvasLine { x1: x, y1: 0.0, x2: x, y2: v, color: bar_color });
                    x += fill_step;
                }
            }

            // Connector curves live above the bars
            ctx.layer();
            for segment in &segments {
                let (Some(v1), Some(v2)) = (values[segment.from], values[segment.from + 1]) else {
                    continue;
                };
                let trend_color = match segment.change {
                    Some(diff) if diff >= 0.0 => Color::Green,
                    Some(_) => Color::Red,
                    None => Color::DarkGray, // undefined change, no direction to encode
                };
                let x1 = segment.from as f64 + 0.5;
                let x2 = x1 + 1.0;
                let points = bezier_points(x1, v1, x2, v2, BEZIER_STEPS);
                for pair in points.windows(2) {
                    ctx.draw(&CanvasLine {
                        x1: pair[0].0,
                        y1: pair[0].1,
                        x2: pair[1].0,
                        y2: pair[1].1,
                        color: trend_color,
                    });
                }

                if active == Some(segment.from) {
                    if let Some(diff) = segment.change {
                        let text = trend_label(diff);
                        let mid_x = (x1 + x2) / 2.0;
                        let mid_y = (v1 + v2) / 2.0;
                        let label_y = (mid_y + span * 0.10).min(y_top - span * 0.02);
                        let label_x = mid_x - text.len() as f64 * unit_per_cell / 2.0;
                        ctx.print(
                            label_x,
                            label_y,
                            Line::styled(text, Style::default().fg(trend_color).add_modifier(Modifier::BOLD)),
                        );
                    }
                }
            }
        });
    f.render_widget(canvas, plot);

    if let Some(ystrip) = ystrip {
        let rows = ystrip.height as usize;
        let tick_step = (rows / 5).max(1);
        let mut lines = Vec::with_capacity(rows);
        for r in 0..rows {
            if r % tick_step == 0 {
                let frac = if rows > 1 { 1.0 - r as f64 / (rows - 1) as f64 } else { 1.0 };
                let v = y_bot + frac * (y_top - y_bot);
                lines.push(Line::from(format!("{:>8} ", format_axis_value(metric, v))).dark_gray());
            } else {
                lines.push(Line::from(""));
            }
        }
        f.render_widget(Paragraph::new(lines), ystrip);
    }

    if let Some(xlabels) = xlabels {
        let width = xlabels.width as usize;
        let label_width = match mode {
            ViewMode::Quarterly => 8,
            ViewMode::Annual => 5,
        };
        let step = ((n * label_width) as f64 / width.max(1) as f64).ceil().max(1.0) as usize;
        let mut row = vec![' '; width];
        for i in (0..n).step_by(step) {
            let label = axis_label(&series[i].date, mode);
            let center = ((i as f64 + 0.5) / n as f64 * width as f64).round() as isize;
            let start = center - label.chars().count() as isize / 2;
            for (j, ch) in label.chars().enumerate() {
                let idx = start + j as isize;
                if idx >= 0 && (idx as usize) < row.len() {
                    row[idx as usize] = ch;
                }
            }
        }
        let text: String = row.into_iter().collect();
        f.render_widget(Paragraph::new(Line::from(text).dark_gray()), xlabels);
    }

    PlotGeometry { area: plot, hits: segment_hits(&segments, plot, n) }
}

fn render_footer(f: &mut Frame, app: &mut App, area: Rect) {
    let base_keys = " s=Search | ←→=Period | m=Quarterly/Annual | 1-6=Metric | ";
    let base_len = base_keys.chars().count() as u16;

    let refresh_rect = Rect::new(area.x + base_len, area.y, 9, 1); // "r=Refresh" = 9
    app.regions.footer_buttons.push((refresh_rect, "refresh"));

    let quit_start = base_len + 9 + 3; // "r=Refresh" + " | "
    let quit_rect = Rect::new(area.x + quit_start, area.y, 6, 1); // "q=Quit" = 6
    app.regions.footer_buttons.push((quit_rect, "quit"));

    let line = Line::from(Span::styled(
        format!("{}r=Refresh | q=Quit ", base_keys),
        Style::default().fg(Color::Yellow),
    ));
    f.render_widget(Paragraph::new(line), area);
}

fn render_search_dialog(f: &mut Frame, input: &str) {
    let area = centered_rect(40, 20, f.area());
    f.render_widget(Clear, area);

    let lines = vec![
        Line::from(""),
        Line::from("  Enter ticker symbol:"),
        Line::from(""),
        Line::from(vec![
            Span::raw("  "),
            Span::styled(format!("{}█", input), Style::default().fg(Color::Yellow)),
        ]),
        Line::from(""),
        Line::from("  Enter=Search, Esc=Cancel").style(Style::default().fg(Color::DarkGray)),
    ];

    let paragraph = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(" Search Symbol ").border_style(Style::default().fg(Color::Yellow)));

    f.render_widget(paragraph, area);
}

fn render_metric_modal(f: &mut Frame, app: &mut App, modal: MetricModal) {
    let area = centered_rect(80, 80, f.area());
    f.render_widget(Clear, area);
    app.regions.modal_area = Some(area);

    let block = Block::default()
        .borders(Borders::ALL)
        .title(format!(" {} ", modal.metric.label()))
        .border_style(Style::default().fg(Color::Cyan));
    f.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // prev/next + mode toggles
            Constraint::Length(1), // growth annotation
            Constraint::Min(6),    // chart
            Constraint::Length(1), // key hints
        ])
        .margin(1)
        .split(area);

    // Navigation and toggle row; regions mirror the drawn span positions
    let row = chunks[0];
    let prev_text = " ‹ Prev ";
    let next_text = " Next › ";
    let q_title = " Quarterly YoY ";
    let a_title = " Annual YoY ";
    let prev_w = prev_text.chars().count() as u16;
    let next_w = next_text.chars().count() as u16;
    let toggles_w = (q_title.len() + 1 + a_title.len()) as u16;

    let prev_rect = Rect::new(row.x + 1, row.y, prev_w, 1);
    let next_rect = Rect::new(row.x + row.width.saturating_sub(next_w + 1), row.y, next_w, 1);
    let toggles_x = row.x + (row.width.saturating_sub(toggles_w)) / 2;
    let q_rect = Rect::new(toggles_x, row.y, q_title.len() as u16, 1);
    let a_rect = Rect::new(toggles_x + q_title.len() as u16 + 1, row.y, a_title.len() as u16, 1);

    app.regions.modal_nav.push((prev_rect, -1));
    app.regions.modal_nav.push((next_rect, 1));
    app.regions.modal_toggles.push((q_rect, ViewMode::Quarterly));
    app.regions.modal_toggles.push((a_rect, ViewMode::Annual));

    let toggle_style = |m: ViewMode| {
        if m == modal.mode {
            Style::default().fg(Color::Black).bg(Color::Cyan).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::DarkGray)
        }
    };

    let gap1 = toggles_x.saturating_sub(prev_rect.x + prev_w) as usize;
    let gap2 = next_rect.x.saturating_sub(toggles_x + toggles_w) as usize;
    let nav_line = Line::from(vec![
        Span::raw(" "),
        Span::styled(prev_text, Style::default().fg(Color::Yellow)),
        Span::raw(" ".repeat(gap1)),
        Span::styled(q_title, toggle_style(ViewMode::Quarterly)),
        Span::raw(" "),
        Span::styled(a_title, toggle_style(ViewMode::Annual)),
        Span::raw(" ".repeat(gap2)),
        Span::styled(next_text, Style::default().fg(Color::Yellow)),
    ]);
    f.render_widget(Paragraph::new(nav_line), row);

    // Growth annotation, same formatting rule as the inline panel
    let label = app
        .financials
        .stats()
        .map(|stats| growth_label(stats, modal.metric, modal.mode))
        .unwrap_or(GrowthLabel::Missing);
    let (growth_text, growth_style) = match label {
        GrowthLabel::Missing => ("-".to_string(), Style::default().fg(Color::White)),
        GrowthLabel::Value { text, positive } => {
            let color = if positive { Color::Green } else { Color::Red };
            (text, Style::default().fg(color).add_modifier(Modifier::BOLD))
        }
    };
    let dates = app
        .financials
        .stats()
        .and_then(|stats| stats.comparison_dates(modal.mode))
        .map(|dates| format!("    Comparing: {}", dates))
        .unwrap_or_default();
    let growth_line = Line::from(vec![
        Span::styled("  YoY Growth: ", Style::default().fg(Color::DarkGray)),
        Span::styled(growth_text, growth_style),
        Span::styled(dates, Style::default().fg(Color::DarkGray)),
    ]);
    f.render_widget(Paragraph::new(growth_line), chunks[1]);

    // Chart, sharing the card renderer and its hover overlay
    let series: Vec<SeriesPoint> = app
        .financials
        .stats()
        .map(|stats| stats.series(modal.metric, modal.mode).to_vec())
        .unwrap_or_default();
    let active = match app.hover {
        Some((ChartSurface::Modal, index)) => Some(index),
        _ => None,
    };
    let geometry = render_trend_chart(f, chunks[2], modal.metric, modal.mode, &series, active, ChartScale::Modal);
    app.regions.modal_plot = Some((geometry.area, geometry.hits));

    let hints = Paragraph::new("  ←→=Metric  m=Quarterly/Annual  Esc=Close")
        .style(Style::default().fg(Color::DarkGray));
    f.render_widget(hints, chunks[3]);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;

    fn test_config() -> Config {
        Config { api_base: "http://localhost:0".to_string(), symbol: "TEST".to_string() }
    }

    fn stats_from(value: Value) -> Statistics {
        Statistics::from_value(value).expect("statistics payload should be an object")
    }

    /// Render one frame into a test terminal and return the screen text.
    fn draw(app: &mut App, width: u16, height: u16) -> String {
        let backend = TestBackend::new(width, height);
        let mut terminal = Terminal::new(backend).expect("test terminal");
        terminal.draw(|f| ui(f, app)).expect("draw");
        let buffer = terminal.backend().buffer().clone();
        let cols = buffer.area.width as usize;
        buffer
            .content()
            .chunks(cols)
            .map(|row| row.iter().map(|cell| cell.symbol()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn parse_abbrev(s: &str) -> Option<f64> {
        let (body, mult) = if let Some(b) = s.strip_suffix('T') {
            (b, 1.0e12)
        } else if let Some(b) = s.strip_suffix('B') {
            (b, 1.0e9)
        } else if let Some(b) = s.strip_suffix('M') {
            (b, 1.0e6)
        } else if let Some(b) = s.strip_suffix('K') {
            (b, 1.0e3)
        } else {
            (s, 1.0)
        };
        body.parse::<f64>().ok().map(|v| v * mult)
    }

    #[test]
    fn growth_label_handles_sentinel_and_missing_keys() {
        let stats = stats_from(serde_json::json!({
            "QYoY_Revenue_Growth": "-",
        }));
        assert_eq!(growth_label(&stats, Metric::Revenue, ViewMode::Quarterly), GrowthLabel::Missing);
        // Key absent entirely
        assert_eq!(growth_label(&stats, Metric::NetIncome, ViewMode::Quarterly), GrowthLabel::Missing);
        assert_eq!(growth_label(&stats, Metric::Revenue, ViewMode::Annual), GrowthLabel::Missing);
    }

    #[test]
    fn growth_label_formats_numeric_strings_with_sign_and_suffix() {
        let stats = stats_from(serde_json::json!({
            "QYoY_Revenue_Growth": "12.50",
            "QYoY_NetIncome_Growth": "-3.40",
        }));
        assert_eq!(
            growth_label(&stats, Metric::Revenue, ViewMode::Quarterly),
            GrowthLabel::Value { text: "+12.50%".to_string(), positive: true }
        );
        assert_eq!(
            growth_label(&stats, Metric::NetIncome, ViewMode::Quarterly),
            GrowthLabel::Value { text: "-3.40%".to_string(), positive: false }
        );
    }

    #[test]
    fn growth_label_zero_counts_as_positive() {
        let stats = stats_from(serde_json::json!({ "AYoY_Expense_Growth": 0.0 }));
        assert_eq!(
            growth_label(&stats, Metric::Expenses, ViewMode::Annual),
            GrowthLabel::Value { text: "+0.00%".to_string(), positive: true }
        );
    }

    #[test]
    fn growth_label_treats_garbage_as_missing() {
        let stats = stats_from(serde_json::json!({ "QYoY_Revenue_Growth": "n/a" }));
        assert_eq!(growth_label(&stats, Metric::Revenue, ViewMode::Quarterly), GrowthLabel::Missing);
    }

    #[test]
    fn growth_label_resolves_every_metric_in_both_modes() {
        let mut payload = serde_json::Map::new();
        for mode in [ViewMode::Quarterly, ViewMode::Annual] {
            for metric in Metric::ALL {
                payload.insert(format!("{}{}", mode.prefix(), metric.growth_suffix()), serde_json::json!(1.5));
            }
        }
        let stats = stats_from(Value::Object(payload));
        for mode in [ViewMode::Quarterly, ViewMode::Annual] {
            for metric in Metric::ALL {
                assert_eq!(
                    growth_label(&stats, metric, mode),
                    GrowthLabel::Value { text: "+1.50%".to_string(), positive: true },
                    "{:?} {:?}",
                    metric,
                    mode
                );
            }
        }
    }

    #[test]
    fn percent_change_matches_formula_and_guards_zero() {
        assert_eq!(percent_change(100.0, 110.0), Some(10.0));
        assert_eq!(percent_change(-50.0, -25.0), Some(50.0));
        assert_eq!(percent_change(200.0, 100.0), Some(-50.0));
        assert_eq!(percent_change(0.0, 50.0), None);
    }

    #[test]
    fn trend_segments_skip_gaps_entirely() {
        assert!(trend_segments(&[Some(1.0), None, Some(2.0)]).is_empty());

        let segments = trend_segments(&[Some(1.0), Some(2.0), None, Some(3.0), Some(4.0)]);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].from, 0);
        assert_eq!(segments[0].change, Some(100.0));
        assert_eq!(segments[1].from, 3);
        assert!((segments[1].change.unwrap() - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn zero_baseline_segment_has_no_change_and_is_not_hoverable() {
        let segments = trend_segments(&[Some(0.0), Some(50.0)]);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].change, None);

        // Excluded from hit testing, so it can never become the active segment
        let hits = segment_hits(&segments, Rect::new(0, 0, 60, 10), 2);
        assert!(hits.is_empty());
        assert_eq!(active_segment(&hits, 30.0), None);
    }

    #[test]
    fn active_segment_takes_first_match_scanning_left_to_right() {
        let segments = trend_segments(&[Some(1.0), Some(2.0), Some(3.0), Some(4.0)]);
        let hits = segment_hits(&segments, Rect::new(10, 5, 80, 10), 4);
        assert_eq!(hits.len(), 3);
        // Bar centers land at columns 20/40/60/80
        assert_eq!(active_segment(&hits, 25.0), Some(0));
        assert_eq!(active_segment(&hits, 40.0), Some(0)); // boundary belongs to the first span
        assert_eq!(active_segment(&hits, 41.0), Some(1));
        assert_eq!(active_segment(&hits, 79.0), Some(2));
        assert_eq!(active_segment(&hits, 15.0), None);
        assert_eq!(active_segment(&hits, 85.0), None);
    }

    #[test]
    fn metric_order_is_circular() {
        for metric in Metric::ALL {
            let mut cursor = metric;
            for _ in 0..Metric::ALL.len() {
                cursor = cursor.step(1);
            }
            assert_eq!(cursor, metric);
            assert_eq!(metric.step(1).step(-1), metric);
        }
        assert_eq!(Metric::Revenue.step(-1), Metric::ShareOutstanding);
        assert_eq!(Metric::ShareOutstanding.step(1), Metric::Revenue);
    }

    #[test]
    fn modal_inherits_inline_mode_and_diverges() {
        let mut app = App::new(test_config());
        app.set_inline_mode(ViewMode::Annual);
        app.open_metric_modal(Metric::Revenue);

        let InputMode::MetricDetail(modal) = &app.input_mode else {
            panic!("modal should be open");
        };
        assert_eq!(modal.metric, Metric::Revenue);
        assert_eq!(modal.mode, ViewMode::Annual);

        app.modal_set_mode(ViewMode::Quarterly);
        let InputMode::MetricDetail(modal) = &app.input_mode else {
            panic!("modal should stay open");
        };
        assert_eq!(modal.mode, ViewMode::Quarterly);
        // The inline grid keeps its own mode
        assert_eq!(app.financials.mode, ViewMode::Annual);
    }

    #[test]
    fn modal_navigation_round_trips() {
        let mut app = App::new(test_config());
        app.open_metric_modal(Metric::Revenue);
        app.modal_navigate(1);
        let InputMode::MetricDetail(modal) = &app.input_mode else {
            panic!("modal should be open");
        };
        assert_eq!(modal.metric, Metric::NetIncome);

        app.modal_navigate(-1);
        let InputMode::MetricDetail(modal) = &app.input_mode else {
            panic!("modal should be open");
        };
        assert_eq!(modal.metric, Metric::Revenue);

        app.close_modal();
        assert!(matches!(app.input_mode, InputMode::Normal));
    }

    #[test]
    fn switching_mode_and_back_is_idempotent() {
        let mut app = App::new(test_config());
        app.financials.set(demo_statistics());

        let labels_before: Vec<GrowthLabel> = Metric::ALL
            .iter()
            .map(|m| growth_label(app.financials.stats().unwrap(), *m, ViewMode::Quarterly))
            .collect();
        let series_before = app
            .financials
            .stats()
            .unwrap()
            .series(Metric::Revenue, ViewMode::Quarterly)
            .to_vec();

        app.set_inline_mode(ViewMode::Annual);
        app.set_inline_mode(ViewMode::Quarterly);

        let labels_after: Vec<GrowthLabel> = Metric::ALL
            .iter()
            .map(|m| growth_label(app.financials.stats().unwrap(), *m, ViewMode::Quarterly))
            .collect();
        let series_after = app
            .financials
            .stats()
            .unwrap()
            .series(Metric::Revenue, ViewMode::Quarterly)
            .to_vec();

        assert_eq!(labels_before, labels_after);
        assert_eq!(series_before, series_after);
    }

    #[test]
    fn format_abbrev_round_trips_each_band() {
        let cases = [
            (1_234_567.0, "1.23M"),
            (1_234.0, "1.23K"),
            (1.5e9, "1.50B"),
            (2.34e12, "2.34T"),
            (999.99, "999.99"),
        ];
        for (value, expected) in cases {
            let formatted = format_abbrev(value);
            assert_eq!(formatted, expected);
            let parsed = parse_abbrev(&formatted).unwrap();
            assert!(
                ((parsed - value) / value).abs() < 0.005,
                "{} -> {} -> {}",
                value,
                formatted,
                parsed
            );
        }
        assert_eq!(format_abbrev(0.0), "-");
        assert_eq!(format_abbrev(-2.5e9), "-2.50B");
    }

    #[test]
    fn format_stat_falls_back_to_sentinel() {
        assert_eq!(format_stat(&serde_json::json!(54_320_000.0)), "54.32M");
        assert_eq!(format_stat(&serde_json::json!("123456")), "123.46K");
        assert_eq!(format_stat(&serde_json::json!("-")), "-");
        assert_eq!(format_stat(&Value::Null), "-");
    }

    #[test]
    fn axis_labels_follow_the_view_mode() {
        assert_eq!(axis_label("2023-04-01", ViewMode::Quarterly), "Q2 2023");
        assert_eq!(axis_label("2023-12-31", ViewMode::Quarterly), "Q4 2023");
        assert_eq!(axis_label("2024-06-30", ViewMode::Annual), "FY24");
        assert_eq!(axis_label("2009-01-01", ViewMode::Annual), "FY09");
        assert_eq!(axis_label("not-a-date", ViewMode::Quarterly), "not-a-date");
    }

    #[test]
    fn statistics_parse_keeps_series_order_and_gaps() {
        let stats = demo_statistics();

        let series = stats.series(Metric::Revenue, ViewMode::Quarterly);
        assert_eq!(series.len(), 8);
        assert_eq!(series[0].date, "2023-09-30");
        assert_eq!(series[7].date, "2025-06-30");

        let fcf = stats.series(Metric::FreeCashFlow, ViewMode::Quarterly);
        assert_eq!(fcf[4].value, None);

        // No series published for operating margin
        assert!(stats.series(Metric::OperatingMargin, ViewMode::Quarterly).is_empty());

        assert_eq!(stats.comparison_dates(ViewMode::Quarterly), Some("2025-06-30 vs 2024-06-30"));
        assert!(stats.growth_value(Metric::NetIncome, ViewMode::Quarterly).unwrap().is_number());
    }

    #[test]
    fn quote_parsing_tolerates_mixed_field_types() {
        assert!(quote_from_value(serde_json::json!({ "symbol": "X" })).is_none());

        let quote = quote_from_value(serde_json::json!({
            "symbol": "TEST",
            "company_name": "Test Inc",
            "price": 12.5,
            "change": -0.25,
            "change_percent": 1.234,
            "market_cap": "-",
        }))
        .unwrap();
        assert_eq!(quote.change_percent, "1.23%");
        assert_eq!(format_stat(quote.raw.get("market_cap").unwrap()), "-");
        assert!(quote.raw.get("beta").is_none());
    }

    #[test]
    fn error_markers_follow_truthiness() {
        assert!(has_error_marker(&serde_json::json!({ "error": "no data" })));
        assert!(has_error_marker(&serde_json::json!({ "error": true })));
        assert!(!has_error_marker(&serde_json::json!({ "error": null })));
        assert!(!has_error_marker(&serde_json::json!({ "error": "" })));
        assert!(!has_error_marker(&serde_json::json!({ "price": 1.0 })));
    }

    #[test]
    fn history_parses_arrays_and_rejects_error_objects() {
        let points = parse_history(serde_json::json!([
            { "date": "2024-01-01", "close": 10.0, "volume": 5 },
            { "date": "2024-01-02", "close": 10.5, "volume": 6 },
        ]))
        .unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].close, 10.5);

        assert!(parse_history(serde_json::json!({ "error": "not found" })).is_none());
    }

    #[test]
    fn last_response_to_arrive_wins() {
        let mut app = App::new(test_config());

        let newer = stats_from(serde_json::json!({ "QYoY_Revenue_Growth": "2.00" }));
        let older = stats_from(serde_json::json!({ "QYoY_Revenue_Growth": "1.00" }));

        // The response for the newer search lands first, the older one last
        app.fetch_sender
            .send(FetchMessage::Statistics { generation: 2, stats: Some(newer) })
            .unwrap();
        app.fetch_sender
            .send(FetchMessage::Statistics { generation: 1, stats: Some(older) })
            .unwrap();
        assert!(app.process_fetch_results());

        assert_eq!(
            growth_label(app.financials.stats().unwrap(), Metric::Revenue, ViewMode::Quarterly),
            GrowthLabel::Value { text: "+1.00%".to_string(), positive: true }
        );
    }

    #[test]
    fn failed_fetches_leave_previous_state_in_place() {
        let mut app = App::new(test_config());
        app.financials.set(demo_statistics());
        app.quote = Some(demo_quote("TEST"));
        app.history = demo_history();

        app.fetch_sender.send(FetchMessage::Quote { generation: 2, quote: None }).unwrap();
        app.fetch_sender.send(FetchMessage::History { generation: 2, points: None }).unwrap();
        app.fetch_sender.send(FetchMessage::Statistics { generation: 2, stats: None }).unwrap();
        assert!(!app.process_fetch_results());

        assert!(app.quote.is_some());
        assert_eq!(app.history.len(), 30);
        assert!(app.financials.stats().is_some());
    }

    #[test]
    fn empty_dashboard_renders_placeholders() {
        let mut app = App::new(test_config());
        let screen = draw(&mut app, 120, 45);

        assert!(screen.contains("Waiting for quote data"));
        assert!(screen.contains("No history data available"));
        assert!(screen.contains("No Data"));
        assert!(screen.contains("Revenue (Quarterly)"));
        // Operating margin card keeps its bare title, no period suffix
        assert!(screen.contains("OperatingMargin"));
        assert!(!screen.contains("OperatingMargin (Quarterly)"));
    }

    #[test]
    fn loaded_dashboard_renders_growth_values_and_stats() {
        let mut app = App::new(test_config());
        app.quote = Some(demo_quote("TEST"));
        app.history = demo_history();
        app.financials.set(demo_statistics());

        let screen = draw(&mut app, 120, 45);
        assert!(screen.contains("Demo Corporation"));
        assert!(screen.contains("2.95T"));
        assert!(screen.contains("+12.50%"));
        assert!(screen.contains("Comparing: 2025-06-30 vs 2024-06-30"));

        app.set_inline_mode(ViewMode::Annual);
        let screen = draw(&mut app, 120, 45);
        assert!(screen.contains("Revenue (Annual)"));
        assert!(screen.contains("+6.87%"));
    }

    #[test]
    fn modal_renders_annotation_and_axis_labels() {
        let mut app = App::new(test_config());
        app.financials.set(demo_statistics());
        app.open_metric_modal(Metric::Revenue);

        let screen = draw(&mut app, 120, 45);
        assert!(screen.contains("YoY Growth:"));
        assert!(screen.contains("+12.50%"));
        assert!(screen.contains("Q3 2023"));
        assert!(screen.contains("Q1 2025"));

        app.modal_set_mode(ViewMode::Annual);
        let screen = draw(&mut app, 120, 45);
        assert!(screen.contains("FY24"));
        assert!(screen.contains("+6.87%"));
    }

    #[test]
    fn rendered_output_never_shows_infinite_growth() {
        let mut app = App::new(test_config());
        app.financials.set(stats_from(serde_json::json!({
            "charts": {
                "quarterly": {
                    "Revenue": [
                        { "date": "2024-03-31", "value": 0.0 },
                        { "date": "2024-06-30", "value": 50.0 },
                    ],
                },
            },
        })));

        let screen = draw(&mut app, 120, 45);
        assert!(!screen.contains("inf"));
        assert!(!screen.contains("NaN"));

        // The zero-based segment is not hoverable either
        let (_, _, hits) = &app.regions.card_plots[0];
        assert!(hits.is_empty());
    }

    #[test]
    fn hover_updates_only_when_the_active_segment_changes() {
        let mut app = App::new(test_config());
        app.financials.set(demo_statistics());
        let _ = draw(&mut app, 120, 45);

        let (metric, rect, hits) = app
            .regions
            .card_plots
            .iter()
            .find(|(_, _, hits)| !hits.is_empty())
            .cloned()
            .expect("at least one card has hoverable segments");
        let hit = hits[0];
        let x = ((hit.x1 + hit.x2) / 2.0) as u16;
        let y = rect.y;

        assert!(app.update_hover(x, y));
        assert_eq!(app.hover, Some((ChartSurface::Card(metric), hit.index)));

        // Same position again: no change, no redraw needed
        assert!(!app.update_hover(x, y));

        // Pointer off every plot clears the active segment
        assert!(app.update_hover(0, 0));
        assert_eq!(app.hover, None);
    }

    #[test]
    fn end_to_end_revenue_scenario() {
        let stats = stats_from(serde_json::json!({
            "QYoY_Revenue_Growth": "12.50",
            "charts": {
                "quarterly": {
                    "Revenue": [
                        { "date": "2023-01-01", "value": 100.0 },
                        { "date": "2023-04-01", "value": 110.0 },
                    ],
                },
            },
        }));

        assert_eq!(
            growth_label(&stats, Metric::Revenue, ViewMode::Quarterly),
            GrowthLabel::Value { text: "+12.50%".to_string(), positive: true }
        );

        let values: Vec<Option<f64>> = stats
            .series(Metric::Revenue, ViewMode::Quarterly)
            .iter()
            .map(|p| p.value)
            .collect();
        let segments = trend_segments(&values);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].change, Some(10.0));
        assert_eq!(trend_label(10.0), "+10.00%");

        // Two bars over a 60-column plot: centers at 15 and 45
        let hits = segment_hits(&segments, Rect::new(0, 0, 60, 10), values.len());
        assert_eq!(active_segment(&hits, 30.0), Some(0));
        assert_eq!(active_segment(&hits, 10.0), None);
        assert_eq!(active_segment(&hits, 50.0), None);
    }
}
