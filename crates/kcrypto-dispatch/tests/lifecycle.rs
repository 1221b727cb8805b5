//! Driver registration, session binding, unregistration and migration.

mod common;

use std::collections::BTreeSet;
use std::sync::{mpsc, Arc};
use std::thread;

use common::*;
use kcrypto_core::driver::driver_flags;
use kcrypto_core::request::op_flags;
use kcrypto_core::{Algorithm, CryptoError, CryptoOp, DriverId, OpError, SessionId, SessionInit};
use kcrypto_dispatch::{FrameworkConfig, HwPreference, Registry};

#[test]
fn hardware_preference_is_honoured() {
    let reg = registry();
    let h = add_driver(&reg, driver_flags::HARDWARE, MockDriver::new(), &[Algorithm::AesCbc]);
    let s = add_driver(
        &reg,
        driver_flags::SOFTWARE,
        MockDriver::new(),
        &[Algorithm::AesCbc, Algorithm::TripleDesCbc],
    );

    let aes = [SessionInit::new(Algorithm::AesCbc, vec![0u8; 16])];
    let des3 = [SessionInit::new(Algorithm::TripleDesCbc, vec![0u8; 24])];

    assert_eq!(reg.open_session(&aes, HwPreference::Hardware).unwrap().driver, h);
    // S could serve it, but hardware was forced
    assert!(matches!(
        reg.open_session(&des3, HwPreference::Hardware),
        Err(CryptoError::NoSuitableDriver)
    ));
    assert_eq!(reg.open_session(&des3, HwPreference::Any).unwrap().driver, s);
    assert_eq!(reg.open_session(&aes, HwPreference::Software).unwrap().driver, s);
}

#[test]
fn software_drivers_need_policy_without_preference() {
    init_tracing();
    let reg = Registry::new(FrameworkConfig::new().allow_soft(false));
    add_driver(&reg, driver_flags::SOFTWARE, MockDriver::new(), &[Algorithm::Sha1Hmac]);
    let chain = [SessionInit::new(Algorithm::Sha1Hmac, vec![])];

    assert!(matches!(
        reg.open_session(&chain, HwPreference::Any),
        Err(CryptoError::NoSuitableDriver)
    ));
    assert!(reg.open_session(&chain, HwPreference::Software).is_ok());
}

#[test]
fn chain_must_be_fully_supported() {
    let reg = registry();
    add_driver(&reg, 0, MockDriver::new(), &[Algorithm::AesCbc]);
    let both = add_driver(&reg, 0, MockDriver::new(), &[Algorithm::AesCbc, Algorithm::Sha1Hmac]);

    let chain = [
        SessionInit::new(Algorithm::AesCbc, vec![0u8; 16]),
        SessionInit::new(Algorithm::Sha1Hmac, vec![0u8; 20]),
    ];
    assert_eq!(reg.open_session(&chain, HwPreference::Any).unwrap().driver, both);
    assert!(matches!(
        reg.open_session(&[], HwPreference::Any),
        Err(CryptoError::InvalidArgument(_))
    ));
}

#[test]
fn registration_rejects_bad_ids() {
    let reg = registry();
    let drv: Arc<dyn kcrypto_core::CryptoDriver> = MockDriver::new();
    let id = reg.register_driver(0).unwrap();

    assert!(matches!(
        reg.register_algorithm(id, 0, 0, 0, &drv),
        Err(CryptoError::InvalidArgument(_))
    ));
    assert!(matches!(
        reg.register_algorithm(id, 25, 0, 0, &drv),
        Err(CryptoError::InvalidArgument(_))
    ));
    assert!(matches!(
        reg.register_key_algorithm(id, 11, 0, &drv),
        Err(CryptoError::InvalidArgument(_))
    ));
    assert!(matches!(
        reg.register_algorithm(DriverId::new(999), Algorithm::AesCbc.id(), 0, 0, &drv),
        Err(CryptoError::NoSuchDriver(999))
    ));
    assert!(matches!(
        reg.unregister_algorithm(id, Algorithm::AesCbc.id()),
        Err(CryptoError::InvalidArgument(_))
    ));
    assert!(matches!(reg.unblock(DriverId::new(999), 1), Err(CryptoError::NoSuchDriver(999))));
    assert!(matches!(
        reg.close_session(SessionId::new(id, 5)),
        Err(CryptoError::NoSuchSession(_))
    ));
}

#[test]
fn table_grows_past_initial_size() {
    init_tracing();
    let reg = Registry::new(FrameworkConfig::new().initial_drivers(2));
    let ids: Vec<DriverId> = (0..5).map(|_| reg.register_driver(0).unwrap()).collect();
    assert_eq!(ids, (0..5).map(DriverId::new).collect::<Vec<_>>());
    assert!(ids.iter().all(|id| reg.driver_info(*id).is_some()));
}

#[test]
fn unregister_waits_for_last_session() {
    let reg = registry();
    let mock = MockDriver::new();
    let id = add_driver(&reg, 0, mock.clone(), &[Algorithm::AesCbc]);
    let sid = open(&reg, Algorithm::AesCbc, HwPreference::Any);

    reg.unregister_all(id).unwrap();
    let info = reg.driver_info(id).unwrap();
    assert!(info.cleanup_pending);
    assert_eq!(info.sessions, 1);
    assert!(info.algorithms.is_empty());

    // slot is inert: no new sessions, no new algorithms
    assert!(matches!(
        reg.open_session(&[SessionInit::new(Algorithm::AesCbc, vec![])], HwPreference::Any),
        Err(CryptoError::NoSuitableDriver)
    ));
    let drv: Arc<dyn kcrypto_core::CryptoDriver> = mock.clone();
    assert!(matches!(
        reg.register_algorithm(id, Algorithm::AesCbc.id(), 0, 0, &drv),
        Err(CryptoError::InvalidArgument(_))
    ));
    // nor is it handed out again
    assert_ne!(reg.register_driver(0).unwrap(), id);

    reg.close_session(sid).unwrap();
    assert!(reg.driver_info(id).is_none());
    let reused = reg.register_driver(0).unwrap();
    assert_eq!(reused, id);
    assert!(reg.driver_info(reused).unwrap().algorithms.is_empty());
}

#[test]
fn submit_after_unregister_bounces_with_new_session() {
    let reg = registry();
    let d1 = MockDriver::new();
    let d2 = MockDriver::new();
    let id1 = add_driver(&reg, 0, d1.clone(), &[Algorithm::AesCbc]);
    let old = open(&reg, Algorithm::AesCbc, HwPreference::Any);
    add_driver(&reg, 0, d2.clone(), &[Algorithm::AesCbc]);

    reg.unregister_all(id1).unwrap();
    let rec = Recorder::default();
    reg.submit(op(old, Algorithm::AesCbc, 9, &rec)).unwrap();
    // never reaches the defunct driver
    assert!(d1.tags().is_empty());
    reg.dispatch_pass();
    reg.run_callbacks();

    let got = rec.all();
    assert_eq!(got[0].result, Err(OpError::Again));
    let rec2 = Recorder::default();
    reg.submit(op(got[0].session, Algorithm::AesCbc, 9, &rec2)).unwrap();
    reg.run_callbacks();
    assert_eq!(rec2.all()[0].result, Ok(()));
    assert_eq!(d2.tags(), vec![9]);
}

#[test]
fn reclaimed_slot_is_reused_empty() {
    let reg = registry();
    let id = add_driver(&reg, driver_flags::HARDWARE, MockDriver::new(), &[Algorithm::AesCbc]);
    reg.unregister_algorithm(id, Algorithm::AesCbc.id()).unwrap();
    // last algorithm gone and no sessions: slot freed at once
    assert!(reg.driver_info(id).is_none());

    let again = reg.register_driver(driver_flags::SOFTWARE).unwrap();
    assert_eq!(again, id);
    let info = reg.driver_info(again).unwrap();
    assert!(info.algorithms.is_empty());
    assert!(info.key_algorithms.is_empty());
    assert_eq!(info.flags, driver_flags::SOFTWARE);
}

#[test]
fn close_session_frees_driver_side() {
    let reg = registry();
    let mock = MockDriver::new();
    add_driver(&reg, 0, mock.clone(), &[Algorithm::AesCbc]);
    let sid = open(&reg, Algorithm::AesCbc, HwPreference::Any);
    assert!(mock.sessions.lock().contains(&sid.local));

    reg.close_session(sid).unwrap();
    assert!(mock.sessions.lock().is_empty());
    assert!(matches!(reg.close_session(sid), Err(CryptoError::NoSuchSession(_))));
}

#[test]
fn concurrent_opens_get_distinct_sessions() {
    let reg = registry();
    let id = add_driver(&reg, 0, MockDriver::new(), &[Algorithm::AesCbc]);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let reg = Arc::clone(&reg);
            thread::spawn(move || {
                (0..25)
                    .map(|_| open(&reg, Algorithm::AesCbc, HwPreference::Any))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut all = BTreeSet::new();
    for h in handles {
        for sid in h.join().unwrap() {
            assert!(all.insert(sid));
        }
    }
    assert_eq!(all.len(), 200);
    assert_eq!(reg.driver_info(id).unwrap().sessions, 200);
}

/// Queue an op behind a driver that never accepts, so it is still
/// pending when the driver goes away.
fn stranded_op(reg: &Registry, mock: &MockDriver, sid: SessionId, tx: mpsc::Sender<CryptoOp>) {
    mock.busy_for(usize::MAX);
    let op = CryptoOp::new(
        sid,
        vec![kcrypto_core::CryptoDesc::cipher(Algorithm::AesCbc, 0, 16, true).with_key(vec![7u8; 16])],
        vec![1u8; 16],
        move |op: CryptoOp| tx.send(op).unwrap(),
    );
    reg.submit(op).unwrap();
    assert_eq!(reg.queued(), (1, 0));
}

#[test]
fn pending_op_migrates_to_surviving_driver() {
    let reg = registry();
    let d1 = MockDriver::new();
    let d2 = MockDriver::new();
    let id1 = add_driver(&reg, 0, d1.clone(), &[Algorithm::AesCbc]);
    let old = open(&reg, Algorithm::AesCbc, HwPreference::Any);
    let id2 = add_driver(&reg, 0, d2.clone(), &[Algorithm::AesCbc]);

    let (tx, rx) = mpsc::channel();
    stranded_op(&reg, &d1, old, tx.clone());

    reg.unregister_all(id1).unwrap();
    assert_eq!(reg.dispatch_pass(), 1);
    assert_eq!(reg.run_callbacks(), 1);

    let mut bounced = rx.try_recv().unwrap();
    assert_eq!(bounced.result(), Err(OpError::Again));
    let new = bounced.session();
    assert_eq!(new.driver, id2);
    assert!(d2.sessions.lock().contains(&new.local));
    // old slot lost its last session
    assert!(reg.driver_info(id1).is_none());
    assert_eq!(reg.stats().migrations, 1);

    // resubmit as-is on the new session
    bounced.set_callback(move |op: CryptoOp| tx.send(op).unwrap());
    reg.submit(bounced).unwrap();
    reg.run_callbacks();
    assert_eq!(rx.try_recv().unwrap().result(), Ok(()));
    assert_eq!(d2.tags(), vec![1]);
}

#[test]
fn pending_op_without_replacement_fails() {
    let reg = registry();
    let d1 = MockDriver::new();
    let id1 = add_driver(&reg, 0, d1.clone(), &[Algorithm::AesCbc]);
    let sid = open(&reg, Algorithm::AesCbc, HwPreference::Any);

    let (tx, rx) = mpsc::channel();
    stranded_op(&reg, &d1, sid, tx);

    reg.unregister_all(id1).unwrap();
    assert_eq!(reg.dispatch_pass(), 1);
    reg.run_callbacks();
    assert_eq!(rx.try_recv().unwrap().result(), Err(OpError::NoDevice));
    assert!(reg.driver_info(id1).is_none());
}

#[test]
fn op_on_closed_session_is_rejected() {
    let reg = registry();
    let mock = MockDriver::new();
    let id = add_driver(&reg, 0, mock.clone(), &[Algorithm::AesCbc]);
    let sid = open(&reg, Algorithm::AesCbc, HwPreference::Any);
    reg.close_session(sid).unwrap();

    let rec = Recorder::default();
    reg.submit(op(sid, Algorithm::AesCbc, 3, &rec)).unwrap();
    reg.dispatch_pass();
    reg.run_callbacks();

    let got = rec.all();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].result, Err(OpError::InvalidArgument));
    assert_eq!(got[0].session, sid);
    assert!(mock.tags().is_empty());
    // no session was opened on the client's behalf
    assert_eq!(reg.driver_info(id).unwrap().sessions, 0);
    assert!(mock.sessions.lock().is_empty());
    assert_eq!(reg.stats().migrations, 0);

    reg.unregister_all(id).unwrap();
    assert!(reg.driver_info(id).is_none());
}

#[test]
fn queued_op_on_closed_session_is_rejected() {
    let reg = registry();
    let mock = MockDriver::new();
    add_driver(&reg, 0, mock.clone(), &[Algorithm::AesCbc]);
    let sid = open(&reg, Algorithm::AesCbc, HwPreference::Any);
    let live = open(&reg, Algorithm::AesCbc, HwPreference::Any);
    reg.close_session(sid).unwrap();

    let rec = Recorder::default();
    reg.submit(op(sid, Algorithm::AesCbc, 1, &rec).with_flags(op_flags::BATCH)).unwrap();
    reg.submit(op(live, Algorithm::AesCbc, 2, &rec).with_flags(op_flags::BATCH)).unwrap();
    assert_eq!(reg.dispatch_pass(), 2);
    reg.run_callbacks();

    let got = rec.all();
    assert_eq!(got.len(), 2);
    let stale = got.iter().find(|d| d.tag == 1).unwrap();
    let ok = got.iter().find(|d| d.tag == 2).unwrap();
    assert_eq!(stale.result, Err(OpError::InvalidArgument));
    assert_eq!(ok.result, Ok(()));
    assert_eq!(mock.tags(), vec![2]);
}
