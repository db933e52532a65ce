use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use lookout_api::{Alerts, BuildControls, LogPane, ObjectView, ResourceView};
use lookout_core::config::env_or;
use lookout_core::{Collection, EventType, LabelSelector, LogOptions, LogSource, Resource, ResourceKind, SyncError};
use lookout_images::{pod_specs, ImageResolver};
use lookout_kubehub::{resolve_kind, KubeTransport, SessionConfig, SessionState, Transport, WatchSession};
use lookout_logs::{LogBatch, LogConfig, LogSink};
use lookout_store::{AssociationIndexer, Notification};
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "lookoutctl", version, about = "Lookout CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace (default: current context)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    /// Span all namespaces
    #[arg(short = 'A', long = "all-namespaces", global = true, action = ArgAction::SetTrue)]
    all_namespaces: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Parent { Builds, Deployments }

#[derive(Subcommand, Debug)]
enum BuildCmd {
    /// Start a new build of a build config
    Start { build_config: String },
    /// Cancel a running build
    Cancel {
        build: String,
        /// Build config the build belongs to, for the report
        #[arg(long = "config")]
        build_config: String,
    },
    /// Run a build again as a new build of the same config
    Rerun { build: String },
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List a collection, optionally filtered by labels
    Ls {
        /// Alias (pods, bc, dc, is, ...) or GVK key ("v1/Pod", "route.openshift.io/v1/Route")
        kind: String,
        /// Equality selector, e.g. "app=web,tier=front"
        #[arg(short = 'l', long = "selector", default_value = "")]
        selector: String,
    },
    /// Follow a collection and print +/~/- per change
    Watch {
        kind: String,
        #[arg(short = 'l', long = "selector", default_value = "")]
        selector: String,
    },
    /// Show one object and follow it until it is deleted
    Get {
        kind: String,
        name: String,
        #[arg(short = 'w', long = "watch", action = ArgAction::SetTrue)]
        watch: bool,
    },
    /// Group builds by build config, or deployments by deployment config
    Assoc {
        #[arg(value_enum)]
        parent: Parent,
        /// Only list parents with a build or deployment still running
        #[arg(long = "in-progress", action = ArgAction::SetTrue)]
        in_progress: bool,
    },
    /// Resolve pod container images to image stream tags
    Images,
    /// Start, cancel or re-run builds
    Build {
        #[command(subcommand)]
        action: BuildCmd,
    },
    /// Stream logs of a pod or a build
    Logs {
        /// `pod` or `build`
        kind: String,
        name: String,
        #[arg(short = 'c', long = "container")]
        container: Option<String>,
        #[arg(long = "no-follow", action = ArgAction::SetTrue)]
        no_follow: bool,
        /// Lines from the end to start with (default: LOOKOUT_LOG_TAIL_LINES or 1000)
        #[arg(long = "tail")]
        tail: Option<i64>,
        /// Stop after this many bytes (default: LOOKOUT_LOG_LIMIT_BYTES or 10 MiB)
        #[arg(long = "limit-bytes")]
        limit_bytes: Option<u64>,
    },
}

fn init_tracing() {
    let env = std::env::var("LOOKOUT_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("LOOKOUT_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid LOOKOUT_METRICS_ADDR; expected host:port");
        }
    }
}

struct Ctx {
    transport: Arc<KubeTransport>,
    output: Output,
    namespace: Option<String>,
}

impl Ctx {
    async fn new(cli: &Cli) -> Result<Self> {
        let transport = Arc::new(KubeTransport::try_default().await?);
        let namespace = if cli.all_namespaces {
            None
        } else {
            Some(cli.namespace.clone().unwrap_or_else(|| transport.client().default_namespace().to_string()))
        };
        Ok(Self { transport, output: cli.output, namespace })
    }

    fn dyn_transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    async fn collection(&self, kind: &str) -> Result<Collection> {
        let kind = resolve_kind(self.transport.client().clone(), kind).await?;
        Ok(Collection::new(kind, self.namespace.as_deref()))
    }

    fn open(&self, collection: Collection) -> ResourceView {
        ResourceView::open(self.dyn_transport(), collection, SessionConfig::from_env())
    }
}

/// Wait for the first list (LOOKOUT_WAIT_SECS, default 8).
async fn wait_loaded(session: &WatchSession) -> SessionState {
    let wait = Duration::from_secs(env_or("LOOKOUT_WAIT_SECS", 8u64));
    let ready = |s: &SessionState| *s == SessionState::Watching || s.is_terminal();
    match tokio::time::timeout(wait, session.wait_for_state(ready)).await {
        Ok(Some(s)) => s,
        _ => session.state(),
    }
}

fn print_alerts(alerts: &std::collections::BTreeMap<String, lookout_api::Alert>) {
    for a in alerts.values() {
        match &a.details {
            Some(d) => eprintln!("{:?}: {} ({})", a.level, a.message, d),
            None => eprintln!("{:?}: {}", a.level, a.message),
        }
    }
}

fn display_name(r: &Resource) -> String {
    match r.namespace() {
        Some(ns) => format!("{}/{}", ns, r.name()),
        None => r.name().to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let ctx = Ctx::new(&cli).await?;

    match cli.command {
        Commands::Ls { kind, selector } => {
            let selector: LabelSelector = selector.parse()?;
            let collection = ctx.collection(&kind).await?;
            info!(collection = %collection, selector = %selector, "ls invoked");
            let mut view = ctx.open(collection);
            wait_loaded(view.session()).await;
            view.set_selector(selector);
            let items = view.filtered();
            match ctx.output {
                Output::Human => {
                    println!("{:<20} {:<40} AGE", "NAMESPACE", "NAME");
                    for r in items.values() {
                        let ns = r.namespace().unwrap_or("-");
                        println!("{:<20} {:<40} {}", ns, r.name(), render_age(r.metadata.created_at()));
                    }
                }
                Output::Json => {
                    let items: Vec<&Resource> = items.values().map(|r| r.as_ref()).collect();
                    println!("{}", serde_json::to_string_pretty(&items)?);
                }
            }
            print_alerts(&view.alerts());
            view.close();
        }
        Commands::Watch { kind, selector } => {
            let selector: LabelSelector = selector.parse()?;
            let collection = ctx.collection(&kind).await?;
            info!(collection = %collection, selector = %selector, "watch invoked");
            let mut view = ctx.open(collection);
            view.set_selector(selector.clone());
            view.on_event(move |n: &Notification| match (&n.action, &n.object) {
                (Some(action), Some(o)) if selector.matches(o) => {
                    let sign = match action {
                        EventType::Added => '+',
                        EventType::Modified => '~',
                        EventType::Deleted => '-',
                    };
                    println!("{} {}", sign, display_name(o));
                }
                (None, _) => println!("= {} items", n.snapshot.iter().filter(|r| selector.matches(r)).count()),
                _ => {}
            });
            let mut states = view.session().state_changes();
            loop {
                tokio::select! {
                    changed = states.changed() => {
                        if changed.is_err() || states.borrow().is_terminal() {
                            break;
                        }
                    }
                    _ = signal::ctrl_c() => {
                        info!("Ctrl-C received; shutting down watch loop");
                        break;
                    }
                }
            }
            print_alerts(&view.alerts());
            view.close();
        }
        Commands::Get { kind, name, watch } => {
            let collection = ctx.collection(&kind).await?;
            let mut view = ObjectView::open(ctx.dyn_transport(), collection, &name, SessionConfig::from_env()).await;
            if let Some(o) = view.object() {
                print_object(ctx.output, &o)?;
            }
            if watch && view.load_error().is_none() {
                let mut last = view.object();
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(250)) => {}
                        _ = signal::ctrl_c() => break,
                    }
                    if view.is_deleted() {
                        break;
                    }
                    let now = view.object();
                    let changed = match (&last, &now) {
                        (Some(a), Some(b)) => a.metadata.resource_version != b.metadata.resource_version,
                        _ => false,
                    };
                    if changed {
                        if let Some(o) = &now {
                            print_object(ctx.output, o)?;
                        }
                        last = now;
                    }
                }
            }
            print_alerts(&view.alerts());
            view.close();
        }
        Commands::Assoc { parent, in_progress } => {
            let (child, indexer) = match parent {
                Parent::Builds => (ResourceKind::builds(), AssociationIndexer::builds()),
                Parent::Deployments => (ResourceKind::replication_controllers(), AssociationIndexer::deployments()),
            };
            let mut view = ctx.open(Collection::new(child, ctx.namespace.as_deref()));
            wait_loaded(view.session()).await;
            let derived = view.associations(&indexer);
            let groups = if in_progress { &derived.in_progress } else { &derived.by_parent };
            match ctx.output {
                Output::Human => {
                    for (parent, children) in groups {
                        println!("{}", parent);
                        for (name, c) in children {
                            let phase = lookout_core::fields::status_phase(c)
                                .or_else(|| lookout_core::fields::annotation(c, lookout_store::assoc::DEPLOYMENT_PHASE_ANNOTATION))
                                .unwrap_or("-");
                            println!("  {:<40} {}", name, phase);
                        }
                    }
                }
                Output::Json => {
                    let out: std::collections::BTreeMap<&str, Vec<&str>> = groups
                        .iter()
                        .map(|(p, cs)| (p.as_str(), cs.keys().map(String::as_str).collect()))
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&out)?);
                }
            }
            print_alerts(&view.alerts());
            view.close();
        }
        Commands::Images => {
            let mut pods = ctx.open(Collection::new(ResourceKind::pods(), ctx.namespace.as_deref()));
            let mut streams = ctx.open(Collection::new(ResourceKind::image_streams(), ctx.namespace.as_deref()));
            wait_loaded(pods.session()).await;
            wait_loaded(streams.session()).await;

            let provider: Arc<dyn lookout_kubehub::CollectionProvider> = ctx.transport.clone();
            let resolver = ImageResolver::new(provider);
            let stream_items: Vec<Arc<Resource>> = streams.snapshot().iter().cloned().collect();
            resolver.update_image_streams(&stream_items).await;
            let pod_snap = pods.snapshot();
            let added = resolver.fetch_referenced(pod_specs(pod_snap.iter().map(|r| r.as_ref()))).await;
            info!(fetched = added.len(), "images: resolved");

            let index = resolver.index();
            let images = resolver.images();
            match ctx.output {
                Output::Human => {
                    println!("{:<60} {:<30} IMAGE", "REFERENCE", "STREAM:TAG");
                    for (r, tag) in index.iter().filter(|(r, _)| images.contains_key(*r)) {
                        println!("{:<60} {:<30} {}", r, format!("{}:{}", tag.stream, tag.tag), tag.image);
                    }
                }
                Output::Json => {
                    let rows: Vec<_> = index.iter().filter(|(r, _)| images.contains_key(*r)).collect();
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                }
            }
            pods.close();
            streams.close();
        }
        Commands::Build { action } => {
            let ns = ctx.namespace.clone().ok_or_else(|| anyhow!("build actions need a namespace (--ns)"))?;
            let controls = BuildControls::new(ctx.transport.clone(), &ns, Alerts::new());
            let res = match &action {
                BuildCmd::Start { build_config } => controls.start_build(build_config).await,
                BuildCmd::Cancel { build, build_config } => controls.cancel_build(build, build_config).await,
                BuildCmd::Rerun { build } => controls.rerun_build(build).await,
            };
            print_alerts(&controls.alerts().snapshot());
            if let (Output::Json, Ok(b)) = (ctx.output, &res) {
                print_object(Output::Json, b)?;
            }
            res?;
        }
        Commands::Logs { kind, name, container, no_follow, tail, limit_bytes } => {
            let ns = ctx.namespace.clone().ok_or_else(|| anyhow!("logs need a namespace (--ns)"))?;
            let source = match kind.as_str() {
                "pod" | "pods" | "po" => LogSource::pod(&ns, &name),
                "build" | "builds" => LogSource::build(&ns, &name),
                other => return Err(anyhow!("logs are only available for pods and builds, not {}", other)),
            };
            let mut opts = LogOptions::from_env();
            opts.follow = !no_follow;
            if let Some(t) = tail {
                opts.tail_lines = Some(t);
            }
            if let Some(l) = limit_bytes {
                opts.limit_bytes = Some(l);
            }
            if let Some(c) = container {
                opts = opts.container(&c);
            }
            info!(source = %source, follow = opts.follow, "logs invoked");

            let sink: Arc<dyn LogSink> = Arc::new(StdoutSink);
            let mut pane = LogPane::new(ctx.transport.clone(), sink, LogConfig::from_env());
            pane.show(source, opts);
            if let Some(h) = pane.view_mut().handle_mut() {
                tokio::select! {
                    end = h.join() => info!(end = ?end, "logs: stream ended"),
                    _ = signal::ctrl_c() => info!("Ctrl-C received; stopping log stream"),
                }
            }
            print_alerts(&pane.alerts().snapshot());
        }
    }

    Ok(())
}

struct StdoutSink;

impl LogSink for StdoutSink {
    fn on_lines(&self, batch: LogBatch) {
        for l in batch.lines {
            println!("{}", l.text);
        }
    }

    fn on_error(&self, err: &SyncError) {
        warn!(error = %err, "logs: stream failed");
    }
}

fn print_object(output: Output, o: &Resource) -> Result<()> {
    match output {
        Output::Human => {
            println!("{} {} (rv {}, age {})",
                o.kind,
                display_name(o),
                o.metadata.resource_version.as_deref().unwrap_or("-"),
                render_age(o.metadata.created_at()));
            for (k, v) in &o.metadata.labels {
                println!("  {}={}", k, v);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(o)?),
    }
    Ok(())
}

fn render_age(created: Option<DateTime<Utc>>) -> String {
    let Some(created) = created else { return "-".to_string() };
    let mut secs = (Utc::now() - created).num_seconds().max(0) as u64;
    let days = secs / 86_400; secs %= 86_400;
    let hours = secs / 3600; secs %= 3600;
    let mins = secs / 60; secs %= 60;
    if days > 0 { format!("{}d{}h", days, hours) }
    else if hours > 0 { format!("{}h{}m", hours, mins) }
    else if mins > 0 { format!("{}m", mins) }
    else { format!("{}s", secs) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ages_are_compact() {
        assert_eq!(render_age(None), "-");
        let t = Utc::now() - chrono::Duration::seconds(3 * 86_400 + 2 * 3600 + 5);
        assert_eq!(render_age(Some(t)), "3d2h");
        let t = Utc::now() - chrono::Duration::seconds(125);
        assert_eq!(render_age(Some(t)), "2m");
    }
}
