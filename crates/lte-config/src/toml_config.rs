use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::Deserialize;
use toml::Value;

use super::stack_config::{
    CfgBuffers, CfgHarq, CfgLogicalChannel, CfgMacMain, CfgPhr, CfgRach, CfgSr, SharedConfig, StackConfig, StackState,
};

/// Build `SharedConfig` from a TOML configuration file
pub fn from_toml_str(toml_str: &str) -> Result<SharedConfig, Box<dyn std::error::Error>> {
    let root: TomlConfigRoot = toml::from_str(toml_str)?;

    // Various sanity checks
    let expected_config_version = "0.1";
    if !root.config_version.eq(expected_config_version) {
        return Err(format!(
            "Unrecognized config_version: {}, expect {}",
            root.config_version, expected_config_version
        )
        .into());
    }
    if !root.extra.is_empty() {
        return Err(format!("Unrecognized top-level fields: {:?}", sorted_keys(&root.extra)).into());
    }
    if let Some(ref mm) = root.mac_main {
        if !mm.extra.is_empty() {
            return Err(format!("Unrecognized fields in mac_main: {:?}", sorted_keys(&mm.extra)).into());
        }
        if let Some(ref phr) = mm.phr {
            if !phr.extra.is_empty() {
                return Err(format!("Unrecognized fields: mac_main.phr::{:?}", sorted_keys(&phr.extra)).into());
            }
        }
    }
    if let Some(ref rach) = root.rach {
        if !rach.extra.is_empty() {
            return Err(format!("Unrecognized fields in rach: {:?}", sorted_keys(&rach.extra)).into());
        }
    }
    if let Some(ref sr) = root.sr {
        if !sr.extra.is_empty() {
            return Err(format!("Unrecognized fields in sr: {:?}", sorted_keys(&sr.extra)).into());
        }
    }
    if let Some(ref harq) = root.harq {
        if !harq.extra.is_empty() {
            return Err(format!("Unrecognized fields in harq: {:?}", sorted_keys(&harq.extra)).into());
        }
    }
    if let Some(ref buffers) = root.buffers {
        if !buffers.extra.is_empty() {
            return Err(format!("Unrecognized fields in buffers: {:?}", sorted_keys(&buffers.extra)).into());
        }
    }
    for lc in root.logical_channel.iter() {
        if !lc.extra.is_empty() {
            return Err(format!("Unrecognized fields in logical_channel: {:?}", sorted_keys(&lc.extra)).into());
        }
    }

    // Build config from required and optional values
    let mut cfg = StackConfig::new();
    cfg.debug_log = root.debug_log;
    cfg.rng_seed = root.rng_seed;

    if let Some(mm) = root.mac_main {
        apply_mac_main_patch(&mut cfg.mac_main, mm);
    }
    if let Some(rach) = root.rach {
        apply_rach_patch(&mut cfg.rach, rach);
    }
    if let Some(sr) = root.sr {
        apply_sr_patch(&mut cfg.sr, sr);
    }
    if let Some(harq) = root.harq {
        apply_harq_patch(&mut cfg.harq, harq);
    }
    if let Some(buffers) = root.buffers {
        apply_buffers_patch(&mut cfg.buffers, buffers);
    }
    for lc in root.logical_channel {
        apply_logical_channel(&mut cfg.logical_channels, lc);
    }

    if let Err(e) = cfg.validate() {
        return Err(format!("Invalid stack configuration: {}", e).into());
    }

    let state = StackState::from_config(&cfg);
    Ok(SharedConfig::from_parts(cfg, state))
}

/// Build `SharedConfig` from any reader.
pub fn from_reader<R: Read>(reader: R) -> Result<SharedConfig, Box<dyn std::error::Error>> {
    let mut contents = String::new();
    let mut reader = BufReader::new(reader);
    reader.read_to_string(&mut contents)?;
    from_toml_str(&contents)
}

/// Build `SharedConfig` from a file path.
pub fn from_file<P: AsRef<Path>>(path: P) -> Result<SharedConfig, Box<dyn std::error::Error>> {
    let f = File::open(path)?;
    let r = BufReader::new(f);
    let cfg = from_reader(r)?;
    Ok(cfg)
}

fn apply_mac_main_patch(dst: &mut CfgMacMain, src: MacMainDto) {
    if let Some(v) = src.time_alignment_timer {
        dst.time_alignment_timer = v;
    }
    if let Some(v) = src.periodic_bsr_timer {
        dst.periodic_bsr_timer = v;
    }
    if let Some(v) = src.retx_bsr_timer {
        dst.retx_bsr_timer = v;
    }
    if let Some(phr_dto) = src.phr {
        let mut phr = CfgPhr::default();
        if let Some(v) = phr_dto.periodic_phr_timer {
            phr.periodic_phr_timer = v;
        }
        if let Some(v) = phr_dto.prohibit_phr_timer {
            phr.prohibit_phr_timer = v;
        }
        if let Some(v) = phr_dto.dl_pathloss_change {
            phr.dl_pathloss_change = v;
        }
        dst.phr = Some(phr);
    }
}

fn apply_rach_patch(dst: &mut CfgRach, src: RachDto) {
    // Option
    dst.nof_groupa_preambles = src.nof_groupa_preambles;

    if let Some(v) = src.nof_preambles {
        dst.nof_preambles = v;
    }
    if let Some(v) = src.message_size_group_a {
        dst.message_size_group_a = v;
    }
    if let Some(v) = src.power_ramping_step {
        dst.power_ramping_step = v;
    }
    if let Some(v) = src.preamble_initial_received_target_power {
        dst.preamble_initial_received_target_power = v;
    }
    if let Some(v) = src.preamble_trans_max {
        dst.preamble_trans_max = v;
    }
    if let Some(v) = src.response_window_size {
        dst.response_window_size = v;
    }
    if let Some(v) = src.contention_resolution_timer {
        dst.contention_resolution_timer = v;
    }
    if let Some(v) = src.max_harq_msg3_tx {
        dst.max_harq_msg3_tx = v;
    }
    if let Some(v) = src.prach_config_index {
        dst.prach_config_index = v;
    }
}

fn apply_sr_patch(dst: &mut CfgSr, src: SrDto) {
    if let Some(v) = src.dsr_trans_max {
        dst.dsr_trans_max = v;
    }
    if let Some(v) = src.pucch_sr_configured {
        dst.pucch_sr_configured = v;
    }
}

fn apply_harq_patch(dst: &mut CfgHarq, src: HarqDto) {
    if let Some(v) = src.max_harq_tx {
        dst.max_harq_tx = v;
    }
    if let Some(v) = src.nof_harq_proc {
        dst.nof_harq_proc = v;
    }
    if let Some(v) = src.ul_tti_offset {
        dst.ul_tti_offset = v;
    }
}

fn apply_buffers_patch(dst: &mut CfgBuffers, src: BuffersDto) {
    if let Some(v) = src.nof_dl_buffers {
        dst.nof_dl_buffers = v;
    }
    if let Some(v) = src.max_pdu_len {
        dst.max_pdu_len = v;
    }
    if let Some(v) = src.msg3_buffer_len {
        dst.msg3_buffer_len = v;
    }
}

/// Replaces an existing channel with the same lcid, or appends
fn apply_logical_channel(dst: &mut Vec<CfgLogicalChannel>, src: LogicalChannelDto) {
    let lc = CfgLogicalChannel {
        lcid: src.lcid,
        lcg: src.lcg,
        priority: src.priority,
        pbr: src.pbr.unwrap_or(-1),
        bsd: src.bsd.unwrap_or(0),
    };
    match dst.iter_mut().find(|c| c.lcid == lc.lcid) {
        Some(existing) => *existing = lc,
        None => dst.push(lc),
    }
}

fn sorted_keys(map: &HashMap<String, Value>) -> Vec<&str> {
    let mut v: Vec<&str> = map.keys().map(|s| s.as_str()).collect();
    v.sort_unstable();
    v
}

/// ----------------------- DTOs for input shape -----------------------

#[derive(Deserialize)]
struct TomlConfigRoot {
    config_version: String,
    debug_log: Option<String>,
    rng_seed: Option<u64>,

    #[serde(default)]
    mac_main: Option<MacMainDto>,

    #[serde(default)]
    rach: Option<RachDto>,

    #[serde(default)]
    sr: Option<SrDto>,

    #[serde(default)]
    harq: Option<HarqDto>,

    #[serde(default)]
    buffers: Option<BuffersDto>,

    #[serde(default)]
    logical_channel: Vec<LogicalChannelDto>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Default, Deserialize)]
struct MacMainDto {
    pub time_alignment_timer: Option<u32>,
    pub periodic_bsr_timer: Option<u32>,
    pub retx_bsr_timer: Option<u32>,

    #[serde(default)]
    pub phr: Option<PhrDto>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Default, Deserialize)]
struct PhrDto {
    pub periodic_phr_timer: Option<u32>,
    pub prohibit_phr_timer: Option<u32>,
    pub dl_pathloss_change: Option<f32>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Default, Deserialize)]
struct RachDto {
    pub nof_preambles: Option<u32>,
    pub nof_groupa_preambles: Option<u32>,
    pub message_size_group_a: Option<u32>,
    pub power_ramping_step: Option<i32>,
    pub preamble_initial_received_target_power: Option<i32>,
    pub preamble_trans_max: Option<u32>,
    pub response_window_size: Option<u32>,
    pub contention_resolution_timer: Option<u32>,
    pub max_harq_msg3_tx: Option<u32>,
    pub prach_config_index: Option<u32>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Default, Deserialize)]
struct SrDto {
    pub dsr_trans_max: Option<u32>,
    pub pucch_sr_configured: Option<bool>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Default, Deserialize)]
struct HarqDto {
    pub max_harq_tx: Option<u32>,
    pub nof_harq_proc: Option<usize>,
    pub ul_tti_offset: Option<u32>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Default, Deserialize)]
struct BuffersDto {
    pub nof_dl_buffers: Option<usize>,
    pub max_pdu_len: Option<usize>,
    pub msg3_buffer_len: Option<usize>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct LogicalChannelDto {
    pub lcid: u32,
    pub lcg: u32,
    pub priority: u32,
    pub pbr: Option<i32>,
    pub bsd: Option<u32>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}
