mod common;

use common::{MacTest, default_test_config};
use lte_core::{RntiType, Tti, debug};
use lte_mac::RaState;
use lte_pdus::{RarPdu, RarResponse, UlSchLcid, parse_sch_pdu};
use lte_saps::{AckMode, TbActionUl};

const TEMP_CRNTI: u16 = 0x4601;
const RAR_UL_GRANT: u32 = 0xabcde;
/// First six bytes of the CCCH SDU below
const CONTENTION_ID: u64 = 0x5012_3456_789a;
const CCCH_SDU: [u8; 8] = [0x50, 0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde];

fn rar_pdu(rapid: u8, ta_cmd: u32, backoff_indicator: Option<u8>) -> Vec<u8> {
    RarPdu {
        backoff_indicator,
        responses: vec![RarResponse {
            rapid,
            ta_cmd,
            grant: RAR_UL_GRANT,
            temp_crnti: TEMP_CRNTI,
        }],
    }
    .to_bytes()
}

/// DL-SCH PDU with a contention resolution identity CE, optionally followed by a CCCH SDU
fn msg4_pdu(id: u64, ccch: &[u8]) -> Vec<u8> {
    let mut pdu = if ccch.is_empty() { vec![0x1c] } else { vec![0x3c, 0x00] };
    pdu.extend_from_slice(&id.to_be_bytes()[2..]);
    pdu.extend_from_slice(ccch);
    pdu
}

/// Starts RA by MAC order and ticks until the RAR window is open. Returns the selected
/// preamble, the PRACH TTI and the RA-RNTI.
fn send_preamble(test: &mut MacTest) -> (u32, Tti, u16) {
    test.mac.start_mac_order();
    let prach_tti = test.run_tti();
    assert_eq!(test.mac.ra_state(), RaState::PdcchSetup);
    let preamble = test.phy.prach_sent().last().unwrap().0;
    test.run_tti();
    let ra_rnti = 1 + prach_tti.subframe() as u16;
    (preamble, prach_tti, ra_rnti)
}

fn deliver_rar(test: &mut MacTest, ra_rnti: u16, rar: &[u8]) {
    let grant = test.dl_grant(ra_rnti, RntiType::Rar, 0, rar.len() as u32, false);
    let action = test.deliver_dl(&grant, rar, true);
    assert!(action.decode_enabled[0]);
    assert_eq!(action.ack_mode, AckMode::Suppress);
}

/// Msg3 on the grant carried by the RAR
fn send_msg3(test: &mut MacTest, n_bytes: u32) -> (Tti, TbActionUl) {
    let mut grant = test.ul_grant(TEMP_CRNTI, RntiType::Temp, n_bytes, false);
    grant.is_from_rar = true;
    let action = test.new_grant_ul(&grant, None);
    assert!(action.tx_enabled);
    assert_eq!(action.rnti, TEMP_CRNTI);
    (grant.tti, action)
}

/// Up to Msg3 of a contention based RA carrying the CCCH SDU
fn contention_until_msg3(test: &mut MacTest) -> Tti {
    test.mac.set_contention_id(CONTENTION_ID);
    let (preamble, _, ra_rnti) = send_preamble(test);
    deliver_rar(test, ra_rnti, &rar_pdu(preamble as u8, 10, None));
    assert_eq!(test.mac.ra_state(), RaState::ContentionResolution);

    test.rlc.push_tx(0, &CCCH_SDU);
    let (msg3_tti, action) = send_msg3(test, 12);
    let pdu = action.payload.unwrap();
    let subpdus = parse_sch_pdu::<UlSchLcid>(&pdu).unwrap();
    let ccch = subpdus.iter().find(|sp| sp.lcid == UlSchLcid::Sdu(0)).unwrap();
    assert_eq!(ccch.payload, &CCCH_SDU);
    assert!(subpdus.iter().all(|sp| sp.crnti().is_none()));
    msg3_tti
}

#[test]
/// UE-selected preamble, matching RAR with TA 10, then a Msg4 with a foreign contention
/// resolution identity: the attempt fails and a new preamble goes out
fn test_ra_contention_mismatch() {
    debug::setup_logging_verbose();
    let mut test = MacTest::new(default_test_config(), Some(Tti::new(100)));
    test.mac.set_contention_id(CONTENTION_ID);

    let (preamble, prach_tti, ra_rnti) = send_preamble(&mut test);
    assert!(preamble < 64);
    assert_eq!(test.phy.prach_sent(), vec![(preamble, -1, -104.0)]);
    assert_eq!(test.phy.log.lock().unwrap().prach_configured, 1);
    assert_eq!(test.mac.ra_state(), RaState::ResponseReception { ra_tti: prach_tti, ra_rnti });
    assert_eq!(test.mac.get_dl_sched_rnti(test.tti), Some((RntiType::Rar, ra_rnti)));
    assert_eq!(
        test.phy.log.lock().unwrap().dl_searches.last(),
        Some(&(RntiType::Rar, ra_rnti, Some((prach_tti.add(3), prach_tti.add(13)))))
    );

    let rar_tti = test.tti;
    deliver_rar(&mut test, ra_rnti, &rar_pdu(preamble as u8, 10, None));
    assert_eq!(test.mac.ra().current_ta(), 10);
    assert_eq!(test.mac.ra_state(), RaState::ContentionResolution);
    assert_eq!(test.mac.get_rntis().temp_rnti, TEMP_CRNTI);
    {
        let log = test.phy.log.lock().unwrap();
        assert_eq!(log.timeadv_rar, vec![10]);
        assert_eq!(log.rar_grants, vec![(rar_tti, RAR_UL_GRANT)]);
        assert!(log.ul_searches.contains(&(RntiType::Temp, TEMP_CRNTI)));
    }
    assert_eq!(test.mac.get_dl_sched_rnti(test.tti), Some((RntiType::Temp, TEMP_CRNTI)));

    let msg4 = msg4_pdu(CONTENTION_ID ^ 0xff, &[]);
    let grant = test.dl_grant(TEMP_CRNTI, RntiType::Temp, 0, msg4.len() as u32, true);
    let action = test.deliver_dl(&grant, &msg4, true);
    assert_eq!(action.ack_mode, AckMode::PendingContentionResolution);
    assert!(!test.mac.get_uecrid_successful());
    assert_eq!(test.mac.ra_state(), RaState::ResponseError);
    assert_eq!(test.mac.get_rntis().temp_rnti, 0);
    assert!(test.rlc.take_rx().is_empty());

    // No backoff indicated: the next preamble goes out right away with ramped power
    test.run_tti();
    let sent = test.phy.prach_sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].2, -102.0);
    assert_eq!(test.mac.ra().preamble_counter(), 2);
    assert_eq!(test.mac.ra_state(), RaState::PdcchSetup);
}

#[test]
/// Msg4 with the identity sent in Msg3 completes RA and promotes the Temporary C-RNTI
fn test_ra_contention_resolved() {
    debug::setup_logging_verbose();
    let mut test = MacTest::new(default_test_config(), Some(Tti::new(2000)));
    contention_until_msg3(&mut test);
    test.run_ttis(10);
    assert_eq!(test.mac.ra_state(), RaState::ContentionResolution);

    let rrc_setup = [0x60, 0x12, 0x98, 0x0b, 0xfd, 0xd2];
    let msg4 = msg4_pdu(CONTENTION_ID, &rrc_setup);
    let grant = test.dl_grant(TEMP_CRNTI, RntiType::Temp, 1, msg4.len() as u32, true);
    let action = test.deliver_dl(&grant, &msg4, true);
    assert_eq!(action.ack_mode, AckMode::PendingContentionResolution);
    assert!(test.mac.get_uecrid_successful());
    assert_eq!(test.mac.ra_state(), RaState::Completion);
    assert_eq!(test.mac.get_rntis().crnti, TEMP_CRNTI);
    assert_eq!(test.mac.get_rntis().temp_rnti, 0);
    assert_eq!(test.rlc.take_rx(), vec![(0, rrc_setup.to_vec())]);

    test.run_tti();
    assert_eq!(test.mac.ra_state(), RaState::CompletionDone);
    assert_eq!(test.phy.crnti(), TEMP_CRNTI);
    assert_eq!(
        test.phy.log.lock().unwrap().dl_searches.last(),
        Some(&(RntiType::User, TEMP_CRNTI, None))
    );
    assert_eq!(test.mac.get_dl_sched_rnti(test.tti), Some((RntiType::User, TEMP_CRNTI)));
    assert_eq!(test.mac.get_ul_sched_rnti(), Some((RntiType::User, TEMP_CRNTI)));
    assert!(test.rrc.log.lock().unwrap().ho_ra_completed.is_empty());
}

#[test]
/// No Msg4 within the contention resolution timer counts as a failed attempt
fn test_ra_contention_timer_expiry() {
    debug::setup_logging_verbose();
    let mut test = MacTest::new(default_test_config(), None);
    contention_until_msg3(&mut test);
    let resets_before = test.phy.log.lock().unwrap().dl_search_resets;

    let n = test.run_until(200, |mac| mac.ra().preamble_counter() == 2).unwrap();
    assert!((64..=66).contains(&n), "contention timer expired after {} TTIs", n);
    assert_eq!(test.phy.log.lock().unwrap().dl_search_resets, resets_before + 1);
    assert_eq!(test.phy.prach_sent().len(), 2);
    assert_eq!(test.mac.get_rntis().temp_rnti, 0);
}

#[test]
/// Each Msg3 retransmission restarts the contention resolution timer
fn test_ra_msg3_retx_restarts_contention_timer() {
    debug::setup_logging_verbose();
    let mut test = MacTest::new(default_test_config(), None);
    let msg3_tti = contention_until_msg3(&mut test);
    test.run_ttis(40);

    let retx = test.mac.harq_recv(msg3_tti.add(8), false);
    assert!(retx.tx_enabled);
    assert_eq!(retx.current_tx_nb, 1);
    assert_eq!(retx.rnti, TEMP_CRNTI);

    test.run_ttis(40);
    assert_eq!(test.mac.ra_state(), RaState::ContentionResolution);
    test.run_ttis(30);
    assert_ne!(test.mac.ra_state(), RaState::ContentionResolution);
}

#[test]
/// Msg3 dropped after maxHARQ-Msg3Tx transmissions fails the attempt
fn test_ra_msg3_max_harq_tx() {
    debug::setup_logging_verbose();
    let mut test = MacTest::new(default_test_config(), None);
    let msg3_tti = contention_until_msg3(&mut test);

    for k in 1..5 {
        let retx = test.mac.harq_recv(msg3_tti.add(8 * k), false);
        assert!(retx.tx_enabled);
        assert_eq!(test.mac.ra_state(), RaState::ContentionResolution);
    }
    let dropped = test.mac.harq_recv(msg3_tti.add(40), false);
    assert!(!dropped.tx_enabled);
    assert_eq!(test.mac.ra_state(), RaState::ResponseError);
    assert_eq!(test.mac.ra().preamble_counter(), 2);
}

#[test]
/// preambleTransMax=5 and no RAR at all: RA_PROBLEM after five preambles, reported once
fn test_ra_max_preamble_transmissions() {
    debug::setup_logging_verbose();
    let mut config = default_test_config();
    config.rach.preamble_trans_max = 5;
    let mut test = MacTest::new(config, None);

    test.mac.start_mac_order();
    let n = test.run_until(400, |mac| mac.ra_state() == RaState::RaProblem);
    assert!(n.is_some());

    let powers: Vec<f32> = test.phy.prach_sent().iter().map(|p| p.2).collect();
    assert_eq!(powers, vec![-104.0, -102.0, -100.0, -98.0, -96.0]);
    assert_eq!(test.rrc.ra_problems(), 1);
    assert!(test.rrc.log.lock().unwrap().ho_ra_completed.is_empty());

    test.run_ttis(100);
    assert_eq!(test.rrc.ra_problems(), 1);
    assert_eq!(test.phy.prach_sent().len(), 5);

    // RA_PROBLEM is restartable, counters start over
    assert!(test.mac.ra_state().is_restartable());
    test.mac.start_mac_order();
    test.run_tti();
    assert_eq!(test.phy.prach_sent().len(), 6);
    assert_eq!(test.phy.prach_sent()[5].2, -104.0);
    assert_eq!(test.mac.ra().preamble_counter(), 1);
}

#[test]
/// A RAR for another preamble carries the backoff for the next attempt
fn test_ra_backoff_indicator() {
    debug::setup_logging_verbose();
    let mut test = MacTest::new(default_test_config(), None);
    let (preamble, _, ra_rnti) = send_preamble(&mut test);

    let other = ((preamble + 1) % 64) as u8;
    deliver_rar(&mut test, ra_rnti, &rar_pdu(other, 10, Some(5)));
    assert_eq!(test.mac.ra().backoff_param_ms(), 60);
    assert_eq!(test.mac.ra_state(), RaState::ResponseReception { ra_tti: test.phy.log.lock().unwrap().prach_tti.unwrap(), ra_rnti });
    assert!(test.phy.log.lock().unwrap().timeadv_rar.is_empty());

    assert!(test.run_until(20, |mac| mac.ra().preamble_counter() == 2).is_some());
    let mut waited = 0;
    while test.phy.prach_sent().len() < 2 && waited < 70 {
        test.run_tti();
        waited += 1;
    }
    assert_eq!(test.phy.prach_sent().len(), 2);
    assert!(waited <= 62, "backoff of {} TTIs exceeds 60 ms", waited);
}

#[test]
/// A RAR outside of the response window is not decoded
fn test_ra_rar_outside_window() {
    debug::setup_logging_verbose();
    let mut test = MacTest::new(default_test_config(), None);
    let rar = rar_pdu(3, 10, None);
    let grant = test.dl_grant(2, RntiType::Rar, 0, rar.len() as u32, false);
    let action = test.mac.new_grant_dl(&grant);
    assert!(!action.decode_enabled[0]);
    assert!(action.payload[0].is_none());
    assert_eq!(test.mac.ra_state(), RaState::Idle);
}

#[test]
/// Contention-free handover RA completes on the RAR and keeps the target C-RNTI
fn test_ra_noncontention_handover() {
    debug::setup_logging_verbose();
    let mut test = MacTest::new(default_test_config(), None);
    test.mac.set_ho_rnti(0x1234, 7);
    test.mac.start_noncont_ho(12, 0);

    let prach_tti = test.run_tti();
    assert_eq!(test.phy.prach_sent(), vec![(12, -1, -104.0)]);
    test.run_tti();
    let ra_rnti = 1 + prach_tti.subframe() as u16;

    deliver_rar(&mut test, ra_rnti, &rar_pdu(12, 20, None));
    assert_eq!(test.mac.ra_state(), RaState::Completion);
    assert_eq!(test.mac.get_rntis().crnti, 0x1234);
    assert_eq!(test.mac.get_rntis().temp_rnti, 0);
    assert_eq!(test.rrc.log.lock().unwrap().ho_ra_completed, vec![true]);
    assert_eq!(test.phy.log.lock().unwrap().timeadv_rar, vec![20]);

    test.run_tti();
    assert_eq!(test.mac.ra_state(), RaState::CompletionDone);
    assert_eq!(test.phy.crnti(), 0x1234);
}

#[test]
/// RA on PDCCH order by a UE holding a C-RNTI: Msg3 carries the C-RNTI CE and any PDCCH
/// to the C-RNTI resolves the contention
fn test_ra_pdcch_order_resolved_by_crnti() {
    debug::setup_logging_verbose();
    let crnti = 0x46;
    let mut test = MacTest::new(default_test_config(), None);
    test.mac.set_ho_rnti(crnti, 1);

    test.mac.start_pdcch_order();
    test.run_tti();
    let preamble = test.phy.prach_sent()[0].0;
    let prach_tti = test.phy.log.lock().unwrap().prach_tti.unwrap();
    test.run_tti();
    deliver_rar(&mut test, 1 + prach_tti.subframe() as u16, &rar_pdu(preamble as u8, 3, None));
    assert_eq!(test.mac.ra_state(), RaState::ContentionResolution);

    let (_, action) = send_msg3(&mut test, 10);
    let pdu = action.payload.unwrap();
    let subpdus = parse_sch_pdu::<UlSchLcid>(&pdu).unwrap();
    assert!(subpdus.iter().any(|sp| sp.crnti() == Some(crnti)));
    test.run_tti();

    let grant = test.dl_grant(crnti, RntiType::User, 3, 20, true);
    test.mac.new_grant_dl(&grant);
    assert_eq!(test.mac.ra_state(), RaState::Completion);
    assert_eq!(test.mac.get_rntis().crnti, crnti);
    assert_eq!(test.mac.get_rntis().temp_rnti, 0);
}

#[test]
/// RA on MAC order by a UE holding a C-RNTI is only resolved by an UL grant for new data
fn test_ra_mac_order_resolved_by_ul_grant() {
    debug::setup_logging_verbose();
    let crnti = 0x46;
    let mut test = MacTest::new(default_test_config(), None);
    test.mac.set_ho_rnti(crnti, 1);

    let (preamble, _, ra_rnti) = send_preamble(&mut test);
    deliver_rar(&mut test, ra_rnti, &rar_pdu(preamble as u8, 3, None));
    send_msg3(&mut test, 10);
    test.run_tti();

    let dl = test.dl_grant(crnti, RntiType::User, 3, 20, true);
    test.mac.new_grant_dl(&dl);
    assert_eq!(test.mac.ra_state(), RaState::ContentionResolution);

    let ul = test.ul_grant(crnti, RntiType::User, 10, true);
    assert!(test.new_grant_ul(&ul, None).tx_enabled);
    assert_eq!(test.mac.ra_state(), RaState::Completion);
    assert_eq!(test.mac.get_rntis().crnti, crnti);
}

#[test]
/// After contention resolution the process that carried Msg4 starts over for the C-RNTI:
/// its first grant is new data even with the NDI Msg4 was sent with
fn test_ra_msg4_process_reused_by_crnti() {
    debug::setup_logging_verbose();
    let mut test = MacTest::new(default_test_config(), Some(Tti::new(2000)));
    contention_until_msg3(&mut test);
    test.run_ttis(10);

    let msg4 = msg4_pdu(CONTENTION_ID, &[0x60, 0x12, 0x98]);
    let grant = test.dl_grant(TEMP_CRNTI, RntiType::Temp, 1, msg4.len() as u32, true);
    test.deliver_dl(&grant, &msg4, true);
    assert_eq!(test.mac.get_rntis().crnti, TEMP_CRNTI);
    assert!(test.mac.dl_harq().is_acked(1, 0));
    test.rlc.take_rx();
    test.run_ttis(8);

    let first = [0x03, 0x11, 0x22, 0x33];
    let grant = test.dl_grant(TEMP_CRNTI, RntiType::User, 2, first.len() as u32, true);
    assert!(test.deliver_dl(&grant, &first, true).decode_enabled[0]);

    let mut data = vec![0x03];
    data.extend((1..msg4.len()).map(|i| i as u8));
    let grant = test.dl_grant(TEMP_CRNTI, RntiType::User, 1, msg4.len() as u32, true);
    let action = test.deliver_dl(&grant, &data, true);
    assert!(action.decode_enabled[0]);
    assert!(!action.default_ack[0]);
    assert!(action.softbuffer_reset[0]);
    assert_eq!(action.ack_mode, AckMode::Generate);
    assert_eq!(test.rlc.take_rx(), vec![(3, vec![0x11, 0x22, 0x33]), (3, data[1..].to_vec())]);
}

#[test]
/// Nothing waiting on CCCH means the default Msg3 size, which fits group A
fn test_ra_preamble_group_a() {
    debug::setup_logging_verbose();
    let mut config = default_test_config();
    config.rach.nof_groupa_preambles = Some(52);
    let mut test = MacTest::new(config, None);
    let (preamble, _, _) = send_preamble(&mut test);
    assert!(preamble < 52, "preamble {} not in group A", preamble);
}

#[test]
/// A CCCH SDU larger than messageSizeGroupA selects group B. The group is kept for the
/// next attempt once Msg3 went out.
fn test_ra_preamble_group_b_persists() {
    debug::setup_logging_verbose();
    let mut config = default_test_config();
    config.rach.nof_groupa_preambles = Some(52);
    let mut test = MacTest::new(config, None);
    test.mac.set_contention_id(CONTENTION_ID);
    test.rlc.push_tx(0, &CCCH_SDU);

    let (preamble, _, ra_rnti) = send_preamble(&mut test);
    assert!((52..64).contains(&preamble), "preamble {} not in group B", preamble);
    deliver_rar(&mut test, ra_rnti, &rar_pdu(preamble as u8, 10, None));
    send_msg3(&mut test, 12);
    assert!(test.mac.mux().msg3_is_transmitted());

    let msg4 = msg4_pdu(CONTENTION_ID ^ 0xff, &[]);
    let grant = test.dl_grant(TEMP_CRNTI, RntiType::Temp, 0, msg4.len() as u32, true);
    test.deliver_dl(&grant, &msg4, true);
    assert_eq!(test.mac.ra_state(), RaState::ResponseError);

    // CCCH was drained by the first Msg3, the retry still uses group B
    test.run_tti();
    let sent = test.phy.prach_sent();
    assert_eq!(sent.len(), 2);
    assert!((52..64).contains(&sent[1].0), "retry preamble {} left group B", sent[1].0);
}

#[test]
/// An invalid RACH configuration from RRC is refused and the previous one stays in use
fn test_ra_invalid_rach_config_rejected() {
    debug::setup_logging_verbose();
    let mut test = MacTest::new(default_test_config(), None);

    let mut rach = test.config.state_read().rach.clone();
    rach.nof_preambles = 0;
    assert!(test.mac.set_config_rach(rach).is_err());
    assert_eq!(test.config.state_read().rach.nof_preambles, 64);

    let (preamble, _, _) = send_preamble(&mut test);
    assert!(preamble < 64);
}
