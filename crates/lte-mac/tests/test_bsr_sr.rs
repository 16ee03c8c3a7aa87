mod common;

use common::{MacTest, default_test_config};
use lte_core::{RntiType, debug};
use lte_mac::RaState;
use lte_pdus::bsr::buff_size_table;
use lte_pdus::{UlSchLcid, parse_sch_pdu};

const CRNTI: u16 = 0x46;

#[test]
/// New UL data triggers a regular BSR and an SR. The grant that follows carries the
/// BSR and cancels the SR.
fn test_regular_bsr_and_sr() {
    debug::setup_logging_verbose();
    let mut test = MacTest::new(default_test_config(), None);
    test.mac.set_ho_rnti(CRNTI, 1);
    test.mac.setup_lcid(1, 1, 2, -1, 0);

    test.rlc.push_tx(1, &[0x11; 100]);
    test.run_tti();
    assert!(test.mac.sr_is_pending());
    assert_eq!(test.phy.log.lock().unwrap().sr_sent, 1);

    let grant = test.ul_grant(CRNTI, RntiType::User, 10, true);
    let pdu = test.new_grant_ul(&grant, None).payload.unwrap();
    let subpdus = parse_sch_pdu::<UlSchLcid>(&pdu).unwrap();

    // BSR CE first, then 7 bytes of lcid 1 taking the rest
    assert_eq!(subpdus[0].lcid, UlSchLcid::ShortBsr);
    assert_eq!(subpdus[0].short_bsr(), Some((1, buff_size_table(93))));
    assert_eq!(subpdus[1].lcid, UlSchLcid::Sdu(1));
    assert_eq!(subpdus[1].payload.len(), 7);

    test.run_tti();
    assert!(!test.mac.sr_is_pending());
}

#[test]
/// SR is repeated on PUCCH until dsrTransMax, then PUCCH/SRS is released and random
/// access takes over
fn test_sr_escalates_to_random_access() {
    debug::setup_logging_verbose();
    let mut config = default_test_config();
    config.sr.dsr_trans_max = 4;
    let mut test = MacTest::new(config, None);
    test.mac.set_ho_rnti(CRNTI, 1);
    test.mac.setup_lcid(1, 1, 2, -1, 0);
    let released_before = test.rrc.log.lock().unwrap().release_pucch_srs;

    test.rlc.push_tx(1, &[0x11; 100]);
    let n = test.run_until(200, |mac| mac.ra_state() != RaState::Idle);
    assert!(n.is_some());

    assert_eq!(test.phy.log.lock().unwrap().sr_sent, 4);
    assert_eq!(test.rrc.log.lock().unwrap().release_pucch_srs, released_before + 1);
    assert_eq!(test.phy.prach_sent().len(), 1);
    assert_eq!(test.mac.ra_state(), RaState::PdcchSetup);
}

#[test]
/// Without PUCCH SR resources the first SR goes straight to random access
fn test_no_pucch_sr_starts_random_access() {
    debug::setup_logging_verbose();
    let mut config = default_test_config();
    config.sr.pucch_sr_configured = false;
    let mut test = MacTest::new(config, None);
    test.mac.setup_lcid(1, 1, 2, -1, 0);

    test.rlc.push_tx(1, &[0x11; 10]);
    test.run_tti();
    assert_eq!(test.phy.log.lock().unwrap().sr_sent, 0);
    assert_eq!(test.phy.prach_sent().len(), 1);
    assert_eq!(test.mac.ra_state(), RaState::PdcchSetup);
}

#[test]
/// Pending UL bytes are reported in the metrics
fn test_ul_buffer_metric() {
    debug::setup_logging_verbose();
    let mut test = MacTest::new(default_test_config(), None);
    test.mac.setup_lcid(1, 1, 2, -1, 0);
    test.mac.setup_lcid(2, 2, 3, -1, 0);
    test.rlc.push_tx(1, &[0x11; 10]);
    test.rlc.push_tx(2, &[0x22; 25]);
    test.run_tti();
    assert_eq!(test.mac.get_metrics().ul_buffer, 35);
}
