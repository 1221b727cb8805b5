//! kcrypto End-to-End Smoke Test
//!
//! Runs the whole framework with its own threads:
//!   Part A: Driver registration and the capability table
//!   Part B: Session binding and hardware preference
//!   Part C: Symmetric requests (inline driver, pooled driver, immediate callbacks)
//!   Part D: Key operations
//!   Part E: Unregistration and session migration
//!   Part F: Shutdown
//!
//! Run: ./target/release/kcrypto-smoke
//! Log level: RUST_LOG=kcrypto_dispatch=debug

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use kcrypto_core::request::op_flags;
use kcrypto_core::{
    Algorithm, CryptoDesc, CryptoDriver, CryptoError, CryptoOp, DriverId, KeyAlgorithm, KeyOp,
    OpError, OpResult, SessionId, SessionInit,
};
use kcrypto_dispatch::{Framework, FrameworkConfig, HwPreference};
use kcrypto_module::engine::NULL_HMAC_LEN;
use kcrypto_module::{null_driver, pooled_driver, Engine, NullDriver, NullEngine, PoolConfig, PooledDriver};
use tracing::info;
use tracing_subscriber::EnvFilter;

const WAIT: Duration = Duration::from_secs(5);

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn pass(&mut self, name: &str) {
        self.total += 1;
        self.passed += 1;
        println!("  [{:2}] {:<52} PASS", self.total, name);
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.total += 1;
        self.failed += 1;
        println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        if ok { self.pass(name); } else { self.fail(name, reason); }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

/// Drivers registered in Part A.
struct Drivers {
    hard: DriverId,
    soft: DriverId,
    pool: Arc<PooledDriver>,
}

fn cipher_op(sid: SessionId, len: usize, tx: mpsc::Sender<CryptoOp>) -> CryptoOp {
    CryptoOp::new(
        sid,
        vec![CryptoDesc::cipher(Algorithm::NullCbc, 0, len, true)],
        vec![0x5a; len],
        move |op: CryptoOp| {
            let _ = tx.send(op);
        },
    )
}

fn init(alg: Algorithm) -> [SessionInit; 1] {
    [SessionInit::new(alg, vec![])]
}

// ════════════════════════════════════════════════════════════
// Part A: Registration
// ════════════════════════════════════════════════════════════

fn test_registration(t: &mut TestRunner, fw: &Framework) -> Option<Drivers> {
    t.section("Part A: Driver registration");

    // A1: pooled "hardware" driver, NULL cipher only
    let hard = match fw.register_driver(pooled_driver::FLAGS) {
        Ok(id) => { t.pass(&format!("register_driver(HARDWARE) -> {}", id)); id }
        Err(e) => { t.fail("register_driver(HARDWARE)", &e.to_string()); return None; }
    };
    let pool = match PooledDriver::new(
        hard,
        fw.host(),
        PoolConfig::from_env().contexts(2).latency(Duration::from_millis(1)),
    ) {
        Ok(p) => Arc::new(p),
        Err(e) => { t.fail("PooledDriver::new", &e.to_string()); return None; }
    };
    let pool_drv: Arc<dyn CryptoDriver> = pool.clone();
    let r = fw.register_algorithm(hard, Algorithm::NullCbc.id(), 0, 0, &pool_drv);
    t.check("register_algorithm(hard, NULL-CBC)", r.is_ok(), &format!("{:?}", r.err()));

    // A2: inline software driver, everything the null engine does
    let soft = match fw.register_driver(null_driver::FLAGS) {
        Ok(id) => { t.pass(&format!("register_driver(SOFTWARE|SYNC) -> {}", id)); id }
        Err(e) => { t.fail("register_driver(SOFTWARE|SYNC)", &e.to_string()); return None; }
    };
    let soft_drv: Arc<dyn CryptoDriver> = Arc::new(NullDriver::new());
    let mut ok = true;
    for alg in NullEngine.algorithms() {
        ok &= fw.register_algorithm(soft, alg.id(), 0, 0, &soft_drv).is_ok();
    }
    for alg in NullEngine.key_algorithms() {
        ok &= fw.register_key_algorithm(soft, alg.id(), 0, &soft_drv).is_ok();
    }
    t.check("register soft algorithms", ok, "a registration failed");

    // A3: out-of-range algorithm id
    let r = fw.register_algorithm(soft, 0, 0, 0, &soft_drv);
    t.check("algorithm id 0 rejected", matches!(r, Err(CryptoError::InvalidArgument(_))),
        &format!("{:?}", r));

    // A4: capability snapshot
    let info = fw.driver_info(soft);
    t.check("driver_info(soft) lists NULL-HMAC",
        info.as_ref().is_some_and(|i| i.algorithms.contains(&Algorithm::NullHmac)),
        &format!("{:?}", info));

    // A5: key features
    let features = fw.key_features().unwrap_or(0);
    t.check(&format!("key_features() -> {:#x}", features),
        features & KeyAlgorithm::ModExp.feature_bit() != 0,
        "MOD_EXP missing");

    Some(Drivers { hard, soft, pool })
}

// ════════════════════════════════════════════════════════════
// Part B: Sessions
// ════════════════════════════════════════════════════════════

fn test_sessions(t: &mut TestRunner, fw: &Framework, d: &Drivers) {
    t.section("Part B: Sessions");

    // B1: forced hardware binds to the pooled driver
    let r = fw.open_session(&init(Algorithm::NullCbc), HwPreference::Hardware);
    t.check("open(NULL-CBC, hardware) -> hard",
        r.as_ref().is_ok_and(|s| s.driver == d.hard), &format!("{:?}", r));
    if let Ok(sid) = r {
        let _ = fw.close_session(sid);
    }

    // B2: hardware lacks NULL-HMAC; software is not considered
    let r = fw.open_session(&init(Algorithm::NullHmac), HwPreference::Hardware);
    t.check("open(NULL-HMAC, hardware) -> no driver",
        matches!(r, Err(CryptoError::NoSuitableDriver)), &format!("{:?}", r));

    // B3: no preference falls through to software
    let r = fw.open_session(&init(Algorithm::NullHmac), HwPreference::Any);
    t.check("open(NULL-HMAC, any) -> soft",
        r.as_ref().is_ok_and(|s| s.driver == d.soft), &format!("{:?}", r));

    // B4: close twice
    if let Ok(sid) = r {
        let first = fw.close_session(sid);
        let second = fw.close_session(sid);
        t.check("close_session then close again",
            first.is_ok() && matches!(second, Err(CryptoError::NoSuchSession(_))),
            &format!("{:?} / {:?}", first, second));
    }

    // B5: empty chain
    let r = fw.open_session(&[], HwPreference::Any);
    t.check("open([]) rejected", matches!(r, Err(CryptoError::InvalidArgument(_))),
        &format!("{:?}", r));
}

// ════════════════════════════════════════════════════════════
// Part C: Symmetric requests
// ════════════════════════════════════════════════════════════

fn test_requests(t: &mut TestRunner, fw: &Framework, d: &Drivers) {
    t.section("Part C: Symmetric requests");

    // C1: MAC into a separate digest buffer on the inline driver
    let sid = match fw.open_session(&init(Algorithm::NullHmac), HwPreference::Software) {
        Ok(s) => s,
        Err(e) => { t.fail("open(NULL-HMAC, software)", &e.to_string()); return; }
    };
    let (tx, rx) = mpsc::channel();
    let op = CryptoOp::new(
        sid,
        vec![CryptoDesc::mac(Algorithm::NullHmac, 0, 32, 0)],
        vec![1u8; 32],
        move |op: CryptoOp| {
            let _ = tx.send((op.result(), op.mac.clone()));
        },
    )
    .with_mac(vec![0xff; 4]);
    let r = fw.submit(op);
    let got = rx.recv_timeout(WAIT);
    t.check("NULL-HMAC digest on soft",
        r.is_ok() && matches!(&got, Ok((Ok(()), Some(mac))) if *mac == vec![0u8; NULL_HMAC_LEN]),
        &format!("{:?}", got));
    let _ = fw.close_session(sid);

    // C2: burst through the pooled driver; it runs out of contexts and
    // must be unblocked to finish
    let sid = match fw.open_session(&init(Algorithm::NullCbc), HwPreference::Hardware) {
        Ok(s) => s,
        Err(e) => { t.fail("open(NULL-CBC, hardware)", &e.to_string()); return; }
    };
    let before = fw.stats();
    let (tx, rx) = mpsc::channel();
    let mut submitted = 0;
    for _ in 0..32 {
        match fw.submit(cipher_op(sid, 256, tx.clone())) {
            Ok(()) => submitted += 1,
            Err(e) => { t.fail("submit burst", &e.to_string()); break; }
        }
    }
    let mut ok = 0;
    for _ in 0..submitted {
        match rx.recv_timeout(WAIT) {
            Ok(op) if op.result().is_ok() => ok += 1,
            _ => break,
        }
    }
    let after = fw.stats();
    t.check(&format!("pooled burst: {}/32 ok", ok), ok == 32, "missing completions");
    println!("       blocks: {}  unblocks: {}  pool queue: {}",
        after.sym_blocks - before.sym_blocks,
        after.unblocks - before.unblocks,
        d.pool.queued());
    let _ = fw.close_session(sid);

    // C3: immediate callback runs before submit returns
    let sid = match fw.open_session(&init(Algorithm::NullCbc), HwPreference::Software) {
        Ok(s) => s,
        Err(e) => { t.fail("open(NULL-CBC, software)", &e.to_string()); return; }
    };
    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    let op = CryptoOp::new(
        sid,
        vec![CryptoDesc::cipher(Algorithm::NullCbc, 0, 16, true)],
        vec![0u8; 16],
        move |_op: CryptoOp| flag.store(true, Ordering::SeqCst),
    )
    .with_flags(op_flags::CALLBACK_IMMEDIATE);
    let r = fw.submit(op);
    t.check("CALLBACK_IMMEDIATE runs inline", r.is_ok() && ran.load(Ordering::SeqCst),
        &format!("{:?}", r));
    let _ = fw.close_session(sid);
}

// ════════════════════════════════════════════════════════════
// Part D: Key operations
// ════════════════════════════════════════════════════════════

fn test_key_ops(t: &mut TestRunner, fw: &Framework) {
    t.section("Part D: Key operations");

    // D1: 4^13 mod 497 = 445
    let (tx, rx) = mpsc::channel::<(OpResult, Vec<u8>)>();
    let kop = fw.new_key_op(
        KeyAlgorithm::ModExp,
        vec![vec![4], vec![13], vec![0x01, 0xf1]],
        move |k: KeyOp| {
            let _ = tx.send((k.result(), k.outputs()[0].clone()));
        },
    );
    match kop.and_then(|k| fw.submit_key(k)) {
        Ok(()) => {
            let got = rx.recv_timeout(WAIT);
            t.check("MOD_EXP 4^13 mod 497 = 445",
                matches!(&got, Ok((Ok(()), out)) if *out == vec![0x01, 0xbd]),
                &format!("{:?}", got));
        }
        Err(e) => t.fail("MOD_EXP submit", &e.to_string()),
    }

    // D2: unsupported operation fails through the callback
    let (tx, rx) = mpsc::channel();
    let r = fw
        .new_key_op(KeyAlgorithm::DsaVerify, vec![vec![1]; 7], move |k: KeyOp| {
            let _ = tx.send(k.result());
        })
        .and_then(|k| fw.submit_key(k));
    let got = rx.recv_timeout(WAIT);
    t.check("DSA_VERIFY without driver -> NoDevice",
        r.is_ok() && got == Ok(Err(OpError::NoDevice)), &format!("{:?}", got));

    // D3: wrong parameter count
    let r = fw.new_key_op(KeyAlgorithm::ModAdd, vec![vec![1]], |_k: KeyOp| {});
    t.check("MOD_ADD with 1 input rejected", matches!(r, Err(CryptoError::InvalidArgument(_))),
        "accepted");
}

// ════════════════════════════════════════════════════════════
// Part E: Unregistration and migration
// ════════════════════════════════════════════════════════════

fn test_migration(t: &mut TestRunner, fw: &Framework, d: &Drivers) {
    t.section("Part E: Unregistration and migration");

    let old = match fw.open_session(&init(Algorithm::NullCbc), HwPreference::Hardware) {
        Ok(s) => s,
        Err(e) => { t.fail("open(NULL-CBC, hardware)", &e.to_string()); return; }
    };

    // E1: slot stays while a session references it
    let r = fw.unregister_all(d.hard);
    let pending = fw.driver_info(d.hard).is_some_and(|i| i.cleanup_pending);
    t.check("unregister_all(hard) -> cleanup pending", r.is_ok() && pending,
        &format!("{:?}", r));

    // E2: op on the stale session bounces with a fresh one
    let (tx, rx) = mpsc::channel();
    let r = fw.submit(cipher_op(old, 64, tx.clone()));
    let bounced = rx.recv_timeout(WAIT);
    let mut resubmit = None;
    match (r, bounced) {
        (Ok(()), Ok(op)) if op.result() == Err(OpError::Again) => {
            let new = op.session();
            t.check(&format!("migrated {} -> {}", old, new), new.driver == d.soft,
                "landed on the wrong driver");
            resubmit = Some(op);
        }
        (r, got) => t.fail("stale session op -> Again", &format!("{:?} / {:?}", r, got)),
    }

    // E3: slot reclaimed with its last session
    t.check("hard slot reclaimed", fw.driver_info(d.hard).is_none(), "still present");

    // E4: resubmitted op completes on the new driver
    if let Some(mut op) = resubmit {
        op.set_callback(move |op: CryptoOp| {
            let _ = tx.send(op);
        });
        let r = fw.submit(op);
        let got = rx.recv_timeout(WAIT);
        t.check("resubmit after Again",
            r.is_ok() && got.as_ref().is_ok_and(|op| op.result().is_ok()),
            &format!("{:?}", got.map(|op| op.result())));
    }

    d.pool.shutdown();
}

// ════════════════════════════════════════════════════════════
// Part F: Shutdown
// ════════════════════════════════════════════════════════════

fn test_shutdown(t: &mut TestRunner, mut fw: Framework, soft: DriverId) {
    t.section("Part F: Shutdown");

    let sid = fw.open_session(&init(Algorithm::NullCbc), HwPreference::Software).ok();
    let stats = fw.stats();
    println!("       ops: {}  callbacks: {}  migrations: {}  immediate: {}",
        stats.ops, stats.callbacks, stats.migrations, stats.immediate);

    t.check("shutdown drained", fw.shutdown(), &format!("{} inflight", fw.inflight()));

    if let Some(sid) = sid {
        let (tx, _rx) = mpsc::channel();
        let r = fw.submit(cipher_op(sid, 16, tx));
        t.check("submit after shutdown -> Busy", matches!(r, Err(CryptoError::Busy)),
            &format!("{:?}", r));
    }
    t.check("driver table cleared", fw.driver_info(soft).is_none(), "slot survived");
}

// ════════════════════════════════════════════════════════════

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("=== kcrypto End-to-End Smoke Test ===");

    let mut t = TestRunner::new();

    let fw = match Framework::start(FrameworkConfig::from_env()) {
        Ok(fw) => fw,
        Err(e) => {
            println!("\nFATAL: Framework::start failed: {}", e);
            t.summary();
            std::process::exit(1);
        }
    };
    info!(config = ?fw.config(), "framework up");

    let Some(drivers) = test_registration(&mut t, &fw) else {
        t.summary();
        std::process::exit(1);
    };
    test_sessions(&mut t, &fw, &drivers);
    test_requests(&mut t, &fw, &drivers);
    test_key_ops(&mut t, &fw);
    test_migration(&mut t, &fw, &drivers);
    test_shutdown(&mut t, fw, drivers.soft);

    t.summary();
    std::process::exit(if t.failed > 0 { 1 } else { 0 });
}
