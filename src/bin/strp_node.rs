//! CLI harness (§6 CLI surface), grounded in `demos/lpwan-sx128x.rs`:
//! load options, install logging, bind Ctrl-C, build the stack, run until
//! interrupted. The only required argument is the node's own address; every
//! other flag has a default so the binary is runnable out of the box.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use structopt::StructOpt;

use strp_net::mac::aloha::AlohaMac;
use strp_net::mac::macaw::MacawMac;
use strp_net::mac::stem::StemMac;
use strp_net::prelude::*;

#[derive(Debug, StructOpt)]
#[structopt(name = "strp-node", about = "STRP/ProtoMon sensor node")]
struct Options {
    /// This node's own address (0x01 is reserved for the sink).
    addr: u8,

    #[structopt(long, default_value = "1")]
    /// Address of the sink node.
    sink_addr: u8,

    #[structopt(long, default_value = "aloha")]
    /// MAC variant to run: aloha, macaw, or stem.
    mac: String,

    #[cfg(feature = "serial")]
    #[structopt(long)]
    /// Serial device path for the radio module (e.g. /dev/ttyUSB0).
    port: Option<String>,

    #[cfg(feature = "serial")]
    #[structopt(long, default_value = "57600")]
    baud: u32,

    #[structopt(long)]
    /// Enable the ProtoMon instrumentation overlay.
    monitoring: bool,

    #[structopt(long, default_value = "60s")]
    report_interval: humantime::Duration,

    #[structopt(long, default_value = ".")]
    csv_dir: std::path::PathBuf,

    #[structopt(long, default_value = "info")]
    /// Configure log level.
    log_level: simplelog::LevelFilter,
}

fn mac_variant(name: &str) -> anyhow::Result<MacVariant> {
    match name {
        "aloha" => Ok(MacVariant::Aloha),
        "macaw" => Ok(MacVariant::Macaw),
        "stem" => Ok(MacVariant::Stem),
        other => Err(anyhow::anyhow!("unknown MAC variant {:?} (expected aloha, macaw, stem)", other)),
    }
}

fn node_config(opts: &Options, mac_variant: MacVariant) -> NodeConfig {
    NodeConfig {
        addr: opts.addr,
        sink_addr: opts.sink_addr,
        mac_variant,
        mac: MacConfig::default(),
        routing_strategy: ParentStrategy::NextLower,
        loop_policy: LoopPolicy::AddressCompare,
        sense_duration: Duration::from_secs(10),
        beacon_interval: Duration::from_secs(30),
        node_timeout: Duration::from_secs(60),
        recv_poll: Duration::from_secs(1),
        monitoring: opts.monitoring,
        report_interval: opts.report_interval.into(),
        csv_dir: opts.csv_dir.clone(),
    }
}

#[cfg(feature = "serial")]
fn run(opts: Options, variant: MacVariant, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    use strp_net::radio::serial::{NullModePins, SerialRadio};

    let port = opts.port.clone().ok_or_else(|| anyhow::anyhow!("--port is required when built with the serial feature"))?;
    let radio = Arc::new(
        SerialRadio::open(&port, opts.baud, NullModePins)
            .map_err(|e| anyhow::anyhow!("radio init error: {:?}", e))?,
    );
    let timer = SystemTimer::new();
    let config = node_config(&opts, variant);

    macro_rules! run_variant {
        ($mac_ty:ident) => {{
            let mac = $mac_ty::new(opts.addr, config.mac.clone(), radio, timer.clone());
            mac.start();
            let node = Node::new(config, mac, timer.clone());
            let _handles = node.start(timer);
            drive(&running)
        }};
    }

    match variant {
        MacVariant::Aloha => run_variant!(AlohaMac),
        MacVariant::Macaw => run_variant!(MacawMac),
        MacVariant::Stem => run_variant!(StemMac),
    }
}

/// No `serial` feature: run a small self-contained simulated network in
/// this one process (a sink plus this node talking over a shared in-memory
/// medium), so the binary is runnable without any radio hardware attached.
#[cfg(not(feature = "serial"))]
fn run(opts: Options, variant: MacVariant, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    use strp_net::radio::sim::SimMedium;

    log::warn!("built without the `serial` feature: running against an in-process simulated radio medium");
    let medium = SimMedium::new();
    let timer = SystemTimer::new();
    let config = node_config(&opts, variant);

    if !config.is_sink() {
        let sink_config = NodeConfig { addr: opts.sink_addr, monitoring: false, ..node_config(&opts, variant) };
        let sink_mac = AlohaMac::new(opts.sink_addr, sink_config.mac.clone(), Arc::new(medium.tap(-40)), SystemTimer::new());
        sink_mac.start();
        let sink = Node::new(sink_config, sink_mac, SystemTimer::new());
        sink.start(SystemTimer::new());
    }

    macro_rules! run_variant {
        ($mac_ty:ident) => {{
            let mac = $mac_ty::new(opts.addr, config.mac.clone(), Arc::new(medium.tap(-40)), timer.clone());
            mac.start();
            let node = Node::new(config, mac, timer.clone());
            let _handles = node.start(timer);
            drive(&running)
        }};
    }

    match variant {
        MacVariant::Aloha => run_variant!(AlohaMac),
        MacVariant::Macaw => run_variant!(MacawMac),
        MacVariant::Stem => run_variant!(StemMac),
    }
}

fn drive(running: &AtomicBool) -> anyhow::Result<()> {
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl-C handler");

    let opts = Options::from_args();

    let log_cfg = simplelog::ConfigBuilder::new().build();
    let _ = simplelog::SimpleLogger::init(opts.log_level, log_cfg);

    let variant = mac_variant(&opts.mac)?;
    log::info!("starting strp-node addr={:#04x} sink={:#04x} mac={:?}", opts.addr, opts.sink_addr, variant);

    run(opts, variant, running)
}
