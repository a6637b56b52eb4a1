//! The process-wide monitoring context.
//!
//! One [`MonitoringContext`] owns every source resource, the selection
//! inputs and the derived views built on them. Nothing here is reachable by
//! name from elsewhere; callers hold the context and read views through it.

use aqm_data::materialize::{self, Profile};
use aqm_data::{combine, subset, summarize, StatusCounts, StatusText};
use aqm_feeds::geojson::FeatureCollection;
use aqm_feeds::sources::{SourceConfig, SourceKind};
use aqm_feeds::transport::FeedClient;
use aqm_feeds::window::DEFAULT_LOOKBACK_DAYS;
use aqm_feeds::{Dataset, TimeWindow};
use aqm_reactive::{AsyncResource, DerivedGraph, LoadState, Node, NodeId, ResourceOptions};
use chrono::{NaiveDate, Utc};
use clap::ValueEnum;
use futures::future::{FutureExt, LocalBoxFuture};
use log::info;
use std::collections::BTreeSet;
use std::rc::Rc;

/// Loads one source. The default implementation goes through
/// [`FeedClient`]; tests substitute in-memory payloads.
pub type SourceLoader = Rc<dyn Fn(SourceConfig) -> LocalBoxFuture<'static, anyhow::Result<Dataset>>>;

/// Map-ready views exposed by the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum View {
    Monitors,
    Purpleair,
    #[value(name = "hms_fires")]
    HmsFires,
    Inciweb,
    Calfire,
}

impl View {
    pub const ALL: [View; 5] = [View::Monitors, View::Purpleair, View::HmsFires, View::Inciweb, View::Calfire];

    /// Catalogue source backing a non-monitor view.
    fn source_name(&self) -> &'static str {
        match self {
            View::Monitors => "monitors",
            View::Purpleair => "purpleair",
            View::HmsFires => "hms_fires",
            View::Inciweb => "inciweb",
            View::Calfire => "calfire",
        }
    }
}

/// User selection feeding the windowed views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub date: NaiveDate,
    pub lookback_days: u32,
    pub excluded_ids: BTreeSet<String>,
}

impl Default for Selection {
    fn default() -> Self {
        Selection {
            date: Utc::now().date_naive(),
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            excluded_ids: BTreeSet::new(),
        }
    }
}

struct SourceEntry {
    config: SourceConfig,
    resource: AsyncResource<Dataset>,
    node: Node<LoadState<Dataset>>,
}

pub struct MonitoringContext {
    graph: DerivedGraph,
    sources: Vec<SourceEntry>,
    selected_date: Node<NaiveDate>,
    lookback_days: Node<u32>,
    excluded_ids: Node<BTreeSet<String>>,
    all_monitors: Node<Dataset>,
    windowed_monitors: Node<Option<Dataset>>,
    views: Vec<(View, Node<FeatureCollection>)>,
    counts: Node<StatusCounts>,
    status: Node<StatusText>,
    error_message: Node<String>,
    load_times: Node<Vec<(String, Option<f64>)>>,
}

impl MonitoringContext {
    /// Build the context and start loading every source over the network
    /// or from local files. Must run inside a `tokio::task::LocalSet`.
    pub fn connect(sources: Vec<SourceConfig>, selection: Selection, client: FeedClient) -> anyhow::Result<Self> {
        let loader: SourceLoader = Rc::new(move |config: SourceConfig| {
            let client = client.clone();
            async move { Ok::<Dataset, anyhow::Error>(client.load(&config).await?) }.boxed_local()
        });
        MonitoringContext::new(sources, selection, loader)
    }

    pub fn new(sources: Vec<SourceConfig>, selection: Selection, loader: SourceLoader) -> anyhow::Result<Self> {
        let graph = DerivedGraph::new();
        let selected_date = graph.source("selected_date", selection.date);
        let lookback_days = graph.source("lookback_days", selection.lookback_days);
        let excluded_ids = graph.source("excluded_ids", selection.excluded_ids);

        let entries: Vec<SourceEntry> = sources
            .into_iter()
            .map(|config| {
                let loader = Rc::clone(&loader);
                let load_config = config.clone();
                let options = ResourceOptions {
                    reloadable: config.reloadable,
                    timeout: Some(config.timeout),
                };
                let resource = AsyncResource::new(&config.name, None, options, move || {
                    let name = load_config.name.clone();
                    let fut = loader(load_config.clone());
                    async move {
                        let dataset = fut.await?;
                        info!("{}: {} records", name, dataset.len());
                        Ok::<Dataset, anyhow::Error>(dataset)
                    }
                });
                let node = graph.attach_resource(&resource);
                SourceEntry { config, resource, node }
            })
            .collect();

        let monitor_nodes: Vec<Node<LoadState<Dataset>>> = entries
            .iter()
            .filter(|e| e.config.kind == SourceKind::Monitor)
            .map(|e| e.node)
            .collect();
        let mut inputs: Vec<NodeId> = monitor_nodes.iter().map(|n| n.id()).collect();
        inputs.push(excluded_ids.id());
        let all_monitors = graph.derive("all_monitors", &inputs, move |i| {
            let mut available = Vec::new();
            for node in &monitor_nodes {
                if let Some(dataset) = i.get(node)?.value() {
                    available.push(dataset);
                }
            }
            let combined: Dataset = combine(available.iter().map(|d| d.as_ref()));
            Ok(combined.without_ids(&*i.get(&excluded_ids)?))
        })?;

        let window = graph.derive("window", &[selected_date.id(), lookback_days.id()], move |i| {
            Ok(TimeWindow::ending_on(*i.get(&selected_date)?, *i.get(&lookback_days)?))
        })?;

        let windowed_monitors = graph.derive("windowed_monitors", &[all_monitors.id(), window.id()], move |i| {
            Ok(subset(i.get(&all_monitors)?.as_ref(), &*i.get(&window)?, Utc::now())?)
        })?;

        let mut views = Vec::new();
        let monitors_view = graph.derive("monitors_geojson", &[windowed_monitors.id()], move |i| {
            let now = Utc::now();
            let windowed = i.get(&windowed_monitors)?;
            Ok(match &*windowed {
                Some(dataset) => materialize::materialize(dataset, &materialize::MONITORS, now),
                None => FeatureCollection::default(),
            })
        })?;
        views.push((View::Monitors, monitors_view));

        for view in View::ALL.into_iter().filter(|v| *v != View::Monitors) {
            let Some(entry) = entries.iter().find(|e| e.config.name == view.source_name()) else {
                continue;
            };
            let Some(profile) = Profile::for_source(view.source_name()) else {
                continue;
            };
            let source = entry.node;
            let node = graph.derive(
                &format!("{}_geojson", view.source_name()),
                &[source.id(), excluded_ids.id()],
                move |i| {
                    let now = Utc::now();
                    Ok(match i.get(&source)?.value() {
                        Some(dataset) => {
                            let kept = dataset.without_ids(&*i.get(&excluded_ids)?);
                            materialize::materialize(&kept, &profile, now)
                        }
                        None => FeatureCollection::default(),
                    })
                },
            )?;
            views.push((view, node));
        }

        let labelled: Vec<(String, Node<FeatureCollection>)> = views
            .iter()
            .map(|(view, node)| {
                let label = entries
                    .iter()
                    .find(|e| e.config.name == view.source_name())
                    .map(|e| e.config.label.clone())
                    .unwrap_or_else(|| view.source_name().to_string());
                (label, *node)
            })
            .collect();
        let view_ids: Vec<NodeId> = labelled.iter().map(|(_, n)| n.id()).collect();
        let counts = graph.derive("counts", &view_ids, move |i| {
            let mut counts = StatusCounts::new();
            for (label, node) in &labelled {
                counts.set(label, i.get(node)?.len());
            }
            Ok(counts)
        })?;
        let status = graph.derive("status", &[counts.id()], move |i| Ok(summarize(&*i.get(&counts)?)))?;

        let source_nodes: Vec<(String, Node<LoadState<Dataset>>)> =
            entries.iter().map(|e| (e.config.label.clone(), e.node)).collect();
        let source_ids: Vec<NodeId> = source_nodes.iter().map(|(_, n)| n.id()).collect();
        let failing = source_nodes;
        let error_message = graph.derive("error_message", &source_ids, move |i| {
            let mut labels: Vec<&str> = Vec::new();
            for (label, node) in &failing {
                if i.get(node)?.is_error() && !labels.contains(&label.as_str()) {
                    labels.push(label);
                }
            }
            Ok(labels
                .iter()
                .map(|label| format!("Failed to load {} data", label))
                .collect::<Vec<_>>()
                .join("; "))
        })?;

        let timed: Vec<(String, Node<LoadState<Dataset>>)> =
            entries.iter().map(|e| (e.config.name.clone(), e.node)).collect();
        let load_times = graph.derive("load_times", &source_ids, move |i| {
            let mut times = Vec::with_capacity(timed.len());
            for (name, node) in &timed {
                times.push((name.clone(), i.get(node)?.elapsed_seconds()));
            }
            Ok(times)
        })?;

        Ok(MonitoringContext {
            graph,
            sources: entries,
            selected_date,
            lookback_days,
            excluded_ids,
            all_monitors,
            windowed_monitors,
            views,
            counts,
            status,
            error_message,
            load_times,
        })
    }

    pub fn graph(&self) -> &DerivedGraph {
        &self.graph
    }

    /// Wait until no source has a load in flight.
    pub async fn wait_settled(&self) {
        for entry in &self.sources {
            entry.resource.wait_settled().await;
        }
    }

    /// Reload every reloadable source. Returns how many were triggered.
    pub fn reload_all(&self) -> usize {
        self.sources
            .iter()
            .filter(|e| e.resource.reload().is_ok())
            .count()
    }

    pub fn reload(&self, name: &str) -> anyhow::Result<()> {
        let entry = self
            .sources
            .iter()
            .find(|e| e.config.name == name)
            .ok_or_else(|| anyhow::anyhow!("unknown source {}", name))?;
        entry.resource.reload()?;
        Ok(())
    }

    /// Replace the whole selection in one batch.
    pub fn select(&self, selection: Selection) -> anyhow::Result<()> {
        self.graph.batch(|g| -> anyhow::Result<()> {
            g.set(&self.selected_date, selection.date)?;
            g.set(&self.lookback_days, selection.lookback_days)?;
            g.set(&self.excluded_ids, selection.excluded_ids)?;
            Ok(())
        })
    }

    pub fn set_selected_date(&self, date: NaiveDate) -> anyhow::Result<()> {
        Ok(self.graph.set(&self.selected_date, date)?)
    }

    pub fn set_lookback_days(&self, days: u32) -> anyhow::Result<()> {
        Ok(self.graph.set(&self.lookback_days, days)?)
    }

    pub fn set_excluded_ids(&self, ids: BTreeSet<String>) -> anyhow::Result<()> {
        Ok(self.graph.set(&self.excluded_ids, ids)?)
    }

    pub fn source_state(&self, name: &str) -> Option<LoadState<Dataset>> {
        self.sources
            .iter()
            .find(|e| e.config.name == name)
            .map(|e| e.resource.state())
    }

    pub fn all_monitors(&self) -> Rc<Dataset> {
        self.graph.get(&self.all_monitors).unwrap_or_default()
    }

    /// Monitors inside the selected window; `None` when there is no data in
    /// range.
    pub fn windowed_monitors(&self) -> Option<Dataset> {
        self.graph
            .get(&self.windowed_monitors)
            .and_then(|windowed| (*windowed).clone())
    }

    /// Error recorded by the windowing step, if the selection is invalid.
    pub fn window_error(&self) -> Option<String> {
        self.graph.error(self.windowed_monitors.id())
    }

    pub fn geojson(&self, view: View) -> Rc<FeatureCollection> {
        self.views
            .iter()
            .find(|(v, _)| *v == view)
            .and_then(|(_, node)| self.graph.get(node))
            .unwrap_or_default()
    }

    /// Materialize a view again with the current time, so derived display
    /// fields such as latency are fresh.
    pub fn geojson_now(&self, view: View) -> FeatureCollection {
        let now = Utc::now();
        match view {
            View::Monitors => match self.windowed_monitors() {
                Some(dataset) => materialize::materialize(&dataset, &materialize::MONITORS, now),
                None => FeatureCollection::default(),
            },
            other => {
                let excluded = self.graph.get(&self.excluded_ids).unwrap_or_default();
                let dataset = self
                    .sources
                    .iter()
                    .find(|e| e.config.name == other.source_name())
                    .and_then(|e| e.resource.settled().value());
                match (dataset, Profile::for_source(other.source_name())) {
                    (Some(dataset), Some(profile)) => {
                        materialize::materialize(&dataset.without_ids(&excluded), &profile, now)
                    }
                    _ => FeatureCollection::default(),
                }
            }
        }
    }

    pub fn counts(&self) -> Rc<StatusCounts> {
        self.graph.get(&self.counts).unwrap_or_default()
    }

    pub fn status_node(&self) -> Node<StatusText> {
        self.status
    }

    pub fn status(&self) -> Rc<StatusText> {
        self.graph.get(&self.status).unwrap_or_default()
    }

    pub fn error_message(&self) -> String {
        self.graph
            .get(&self.error_message)
            .map(|m| m.as_ref().clone())
            .unwrap_or_default()
    }

    /// Load time in seconds per source, in catalogue order.
    pub fn load_times(&self) -> Rc<Vec<(String, Option<f64>)>> {
        self.graph.get(&self.load_times).unwrap_or_default()
    }

    /// Cancel resource subscriptions. The context stops updating.
    pub fn shutdown(&self) {
        self.graph.detach_resources();
    }
}
