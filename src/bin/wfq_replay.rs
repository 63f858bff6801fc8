use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;
use wfq::model::packet::QueueDiscItem;
use wfq::runtime::config::load_wfq_config;
use wfq::runtime::qdisc::{DisciplineRegistry, WfqController};
use wfq::runtime::replay::{load_trace, replay, trace_interfaces};

#[derive(Debug, Parser)]
#[command(name = "wfq_replay")]
#[command(about = "Replay a packet trace through per-interface WFQ disciplines")]
struct Args {
    #[arg(long)]
    config: PathBuf,
    #[arg(long)]
    trace: PathBuf,
    /// Extra interfaces to attach with the default profile.
    #[arg(long = "iface")]
    ifaces: Vec<String>,
    #[arg(long, default_value_t = false)]
    compact: bool,
    #[arg(long, default_value = "INFO")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let cfg = load_wfq_config(&args.config)?;
    let events = load_trace(&args.trace)?;

    let registry = Arc::new(DisciplineRegistry::<QueueDiscItem>::new());
    let controller = WfqController::new(Arc::clone(&registry), &cfg);

    let ifaces: Vec<String> = controller
        .configured_interfaces()
        .into_iter()
        .chain(trace_interfaces(&events))
        .chain(args.ifaces.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    controller.apply_to_interfaces(&ifaces)?;
    info!(
        "wfq replay start: events={} interfaces={:?}",
        events.len(),
        registry.interfaces()
    );

    let report = replay(&controller, &events)?;
    let rendered = if args.compact {
        serde_json::to_string(&report)
    } else {
        serde_json::to_string_pretty(&report)
    }
    .context("failed to render replay report")?;
    println!("{rendered}");

    let purged = registry.destroy_all();
    info!("wfq replay done: purged_bytes={purged}");
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let level = level.parse::<Level>()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
    Ok(())
}
