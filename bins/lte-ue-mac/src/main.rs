mod loopback;

use clap::Parser;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use lte_config::{SharedConfig, toml_config};
use lte_core::{STACK_VERSION, Tti, debug};
use lte_mac::{Mac, MacHandle};
use lte_saps::MacMetrics;

use loopback::{Enb, LoopbackPhy, LoopbackRlc, LoopbackRrc, RRC_CONN_REQUEST, contention_id};

/// Metrics are printed once per this many TTIs
const METRICS_PERIOD: u32 = 1000;

/// Load configuration file
fn load_config_from_toml(cfg_path: &str) -> SharedConfig {
    match toml_config::from_file(cfg_path) {
        Ok(c) => c,
        Err(e) => {
            println!("Failed to load configuration from {}: {}", cfg_path, e);
            std::process::exit(1);
        }
    }
}

fn print_metrics(tti: Tti, m: &MacMetrics) {
    eprintln!(
        " -> {} UL: pkts={} errors={} {} kbit/s buffer={}B retx={:.2} | DL: pkts={} errors={} {} kbit/s retx={:.2}",
        tti,
        m.tx_pkts,
        m.tx_errors,
        m.tx_brate / METRICS_PERIOD as u64,
        m.ul_buffer,
        m.ul_retx_avg,
        m.rx_pkts,
        m.rx_errors,
        m.rx_brate / METRICS_PERIOD as u64,
        m.dl_retx_avg
    );
}

#[derive(Parser, Debug)]
#[command(
    author,
    version = STACK_VERSION,
    about = "LTE UE MAC",
    long_about = "Runs the LTE UE MAC against a loopback PHY and eNB scheduler, using the provided TOML configuration file"
)]
struct Args {
    /// Config file (required)
    #[arg(help = "TOML config with MAC, RACH, SR and logical channel parameters")]
    config: String,

    /// Stop after this many TTIs instead of waiting for Ctrl+C
    #[arg(long)]
    ttis: Option<u32>,

    /// Wall clock duration of one TTI in ms, 0 runs as fast as possible
    #[arg(long, default_value_t = 1)]
    tti_ms: u64,
}

fn main() {
    eprintln!("LTE UE MAC {}", STACK_VERSION);

    let args = Args::parse();
    let cfg = load_config_from_toml(&args.config);
    let _log_guard = debug::setup_logging_default(cfg.config().debug_log.clone());

    let phy = Arc::new(LoopbackPhy::default());
    let rlc = Arc::new(LoopbackRlc::new());
    let rrc = Arc::new(LoopbackRrc);

    let mut mac = Mac::new(cfg.clone(), phy.clone(), rlc.clone(), rrc.clone());
    mac.set_contention_id(contention_id(&RRC_CONN_REQUEST));
    mac.start_mac_order();
    let handle = match MacHandle::start(mac) {
        Ok(h) => h,
        Err(e) => {
            println!("Failed to start MAC threads: {}", e);
            std::process::exit(1);
        }
    };

    // Set up Ctrl+C handler for graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .expect("failed to set Ctrl+C handler");

    let mut enb = Enb::new(cfg.state_read().rach.response_window_size);
    let mut tti = Tti::default();
    let mut n = 0u32;
    while running.load(Ordering::SeqCst) && args.ttis.is_none_or(|max| n < max) {
        phy.set_tti(tti);
        handle.tti_clock(tti);
        if args.tti_ms > 0 {
            thread::sleep(Duration::from_millis(args.tti_ms));
        }
        enb.run_tti(tti, &handle, &phy, &rlc);

        n += 1;
        if n % METRICS_PERIOD == 0 {
            print_metrics(tti, &handle.get_metrics());
        }
        tti = tti.add(1);
    }

    let rntis = handle.with(|mac| mac.get_rntis());
    eprintln!(
        " -> Stopped after {} TTIs, connected={} c-rnti=0x{:x}, DL bytes on lcid 3: {}",
        n,
        enb.is_connected(),
        rntis.crnti,
        rlc.rx_bytes(3)
    );
    handle.stop();
}
