//! nvme-uring End-to-End Smoke Test
//!
//! Exercises the backend against a real device:
//!   Part A  Open (kind, geometry, ring setup)
//!   Part B  Data path, write/read round trip (only with --write)
//!   Part C  Zone Append on a character device (only with --write)
//!   Part D  Contract edges (append on block, discard, admin placeholder)
//!   Part E  Bookkeeping and close
//!
//! Run: sudo ./target/release/nvme-smoke /dev/ng0n1 [--write] [--zone N]
//! (--write is DESTRUCTIVE: it overwrites the first blocks and appends
//! to zone N, default 0)

use futures::executor::block_on;
use nix::fcntl::OFlag;

use nvme_uring::{BlockDevice, Device, DeviceConfig, DeviceKind};
use nvme_uring_core::kprint::{self, LogLevel};

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
    skipped: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0, skipped: 0 }
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

    fn skip(&mut self, name: &str, reason: &str) {
        self.total += 1;
        self.skipped += 1;
        println!("  [{:2}] {:<52} SKIP: {}", self.total, name, reason);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        if ok { self.pass(name); } else { self.fail(name, reason); }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}  Skipped: {}",
            self.total, self.passed, self.failed, self.skipped
        );
        println!("{}", LINE);
    }
}

struct Args {
    path: String,
    write: bool,
    zone: u32,
}

fn parse_args() -> Args {
    let mut args = Args { path: "/dev/ng0n1".to_string(), write: false, zone: 0 };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--write" => args.write = true,
            "--zone" => args.zone = it.next().and_then(|z| z.parse().ok()).unwrap_or(0),
            "-v" => kprint::set_log_level(LogLevel::Debug),
            path => args.path = path.to_string(),
        }
    }
    args
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

// ════════════════════════════════════════════════════════════
// Part A: Open
// ════════════════════════════════════════════════════════════

fn test_open(t: &mut TestRunner, args: &Args) -> Option<Device> {
    t.section("Part A: Open");

    let config = DeviceConfig::from_env();
    println!(
        "  config: iopoll={} sqpoll={:?} nsid={} abi={:?}",
        config.polling, config.sqpoll_idle_ms, config.nsid, config.passthrough_abi
    );

    let dev = match Device::open_with(&args.path, OFlag::O_RDWR, config) {
        Ok(dev) => dev,
        Err(e) => {
            t.fail("open", &e.to_string());
            return None;
        }
    };
    t.pass(&format!("open {}", args.path));
    t.check(
        "kind classified",
        dev.kind() == DeviceKind::classify(&args.path),
        dev.kind().as_str(),
    );
    t.check("block size > 0", dev.block_size() > 0, "zero block size");
    println!(
        "  kind={} block_size={} size={}",
        dev.kind(),
        dev.block_size(),
        dev.size()
    );
    if let Some(z) = dev.as_zoned() {
        println!("  zones={} (96 MiB each)", z.zone_count());
    }
    Some(dev)
}

// ════════════════════════════════════════════════════════════
// Part B: Data path
// ════════════════════════════════════════════════════════════

fn test_data_path(t: &mut TestRunner, dev: &Device, args: &Args) {
    t.section("Part B: Data path");
    if !args.write {
        t.skip("write/read round trip", "needs --write");
        return;
    }

    let bs = dev.block_size() as usize;
    // Passthrough commands carry nlb 0, so the character path moves one
    // block per command.
    let sizes: &[usize] = if dev.kind() == DeviceKind::Block { &[1, 2, 8] } else { &[1] };
    for (i, &blocks) in sizes.iter().enumerate() {
        let offset = (i * 16 * bs) as u64;
        let data = pattern(blocks * bs, i as u8);
        let (r, _) = block_on(dev.write(offset, data.clone(), 0));
        if let Err(e) = r {
            t.fail(&format!("write {} blocks @ {}", blocks, offset), &e.to_string());
            continue;
        }
        let (r, back) = block_on(dev.read(offset, vec![0; data.len()]));
        match r {
            Ok(()) => t.check(
                &format!("round trip {} blocks @ {}", blocks, offset),
                back == data,
                "data mismatch",
            ),
            Err(e) => t.fail(&format!("read {} blocks @ {}", blocks, offset), &e.to_string()),
        }
    }

    // Two requests in flight on one ring.
    let a = pattern(bs, 0xA0);
    let b = pattern(bs, 0xB0);
    let ((ra, _), (rb, _)) = block_on(futures::future::join(
        dev.write(64 * bs as u64, a.clone(), 0),
        dev.write(65 * bs as u64, b.clone(), 0),
    ));
    t.check("concurrent writes", ra.is_ok() && rb.is_ok(), "write failed");
}

// ════════════════════════════════════════════════════════════
// Part C: Zone Append
// ════════════════════════════════════════════════════════════

fn test_append(t: &mut TestRunner, dev: &Device, args: &Args) {
    t.section("Part C: Zone Append");
    let Some(zoned) = dev.as_zoned() else {
        t.skip("zone append", "not a character device");
        return;
    };
    if !args.write {
        t.skip("zone append", "needs --write");
        return;
    }

    let bs = dev.block_size() as usize;
    let start = zoned.zone_start_lba(args.zone);
    let data = pattern(bs, 0x5A);
    let (r, _) = block_on(dev.append(args.zone, data.clone()));
    match r {
        Ok(lba) => {
            println!("  zone {} start {} landed at {}", args.zone, start, lba);
            t.check("landing lba inside zone", lba >= start, "below zone start");
            let (r, back) = block_on(dev.read(lba * bs as u64, vec![0; bs]));
            t.check("read back appended block", r.is_ok() && back == data, "mismatch");
        }
        Err(e) => t.fail("zone append", &e.to_string()),
    }
}

// ════════════════════════════════════════════════════════════
// Part D: Contract edges
// ════════════════════════════════════════════════════════════

fn test_edges(t: &mut TestRunner, dev: &Device) {
    t.section("Part D: Contract edges");

    if dev.kind() == DeviceKind::Block {
        let stats = dev.stats();
        let (r, _) = block_on(dev.append(0, vec![0; dev.block_size() as usize]));
        t.check(
            "append on block -> NotSupported",
            r.as_ref().err().map_or(false, |e| e.is_not_supported()),
            &format!("{:?}", r),
        );
        t.check(
            "no submission for rejected append",
            dev.stats().inflight.allocations == stats.inflight.allocations,
            "record allocated",
        );
    }

    t.check("discard is a no-op", block_on(dev.discard(0, 1 << 20)).is_ok(), "discard failed");
    let admin = nvme_uring::NvmeAdminCommand { opcode: 0x06, ..Default::default() };
    t.check(
        "admin placeholder",
        block_on(dev.pass_admin(&admin)) == Ok(1),
        "unexpected result",
    );
}

// ════════════════════════════════════════════════════════════
// Part E: Bookkeeping
// ════════════════════════════════════════════════════════════

fn test_bookkeeping(t: &mut TestRunner, mut dev: Device) {
    t.section("Part E: Bookkeeping and close");

    let stats = dev.stats();
    println!(
        "  allocations={} releases={} reclaimed={} stale={} leaked={}",
        stats.inflight.allocations,
        stats.inflight.releases,
        stats.inflight.reclaimed,
        stats.inflight.stale,
        stats.inflight.leaked
    );
    t.check("no outstanding records", stats.outstanding == 0, "records leaked");
    t.check(
        "allocations == releases",
        stats.inflight.allocations == stats.inflight.releases,
        "mismatch",
    );

    dev.close();
    let (r, _) = block_on(dev.read(0, vec![0; 512]));
    t.check("I/O after close fails", r.is_err(), "read succeeded");
}

fn main() {
    println!("=== nvme-uring End-to-End Smoke Test ===");
    let kver = std::fs::read_to_string("/proc/version").unwrap_or_default();
    println!("    kernel: {}", kver.trim().split(' ').nth(2).unwrap_or("?"));

    let args = parse_args();
    let mut t = TestRunner::new();

    let Some(dev) = test_open(&mut t, &args) else {
        t.summary();
        std::process::exit(1);
    };

    test_data_path(&mut t, &dev, &args);
    test_append(&mut t, &dev, &args);
    test_edges(&mut t, &dev);
    test_bookkeeping(&mut t, dev);

    t.summary();
    std::process::exit(if t.failed > 0 { 1 } else { 0 });
}
