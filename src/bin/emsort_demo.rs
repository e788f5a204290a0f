use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use rand::Rng;

use emsort::{BlockManager, IterStream, SentinelCmp, SortError, SortPipeline};

/// One-megabyte blocks: 128Ki keys per block.
const BLOCK_SIZE: usize = 1 << 20;

#[derive(Parser)]
#[command(name = "emsort_demo", version, about = "External-memory sort of random u64 keys")]
struct Args {
    /// Number of random keys to sort
    #[arg(short, long, default_value_t = 10_000_000)]
    count: u64,

    /// Memory budget in MiB, split between run creation and merging
    #[arg(short, long, default_value_t = 64)]
    memory_mb: usize,

    /// Number of scratch disks (files)
    #[arg(short, long, default_value_t = 2)]
    disks: usize,

    /// Directory for scratch files
    #[arg(long, default_value = ".")]
    dir: PathBuf,
}

#[derive(Clone)]
struct KeyCmp;

impl SentinelCmp<u64> for KeyCmp {
    fn less(&self, a: &u64, b: &u64) -> bool {
        a < b
    }

    fn min_value(&self) -> u64 {
        0
    }

    fn max_value(&self) -> u64 {
        u64::MAX
    }
}

fn main() -> Result<(), SortError> {
    env_logger::init();
    let args = Args::parse();

    let bm = BlockManager::open_in_dir(&args.dir, args.disks)?;
    let mut rng = rand::rng();
    let input = IterStream::new((0..args.count).map(move |_| rng.random::<u64>()));

    let start = Instant::now();
    let mut sorted =
        SortPipeline::<u64, KeyCmp, BLOCK_SIZE>::new(input, KeyCmp, bm, args.memory_mb << 20)?;

    let mut drained = 0u64;
    let mut last = 0u64;
    while !sorted.empty() {
        let value = *sorted.current();
        assert!(last <= value, "output out of order at element {}", drained);
        last = value;
        drained += 1;
        sorted.advance()?;
    }
    assert_eq!(drained, args.count);

    let elapsed = start.elapsed();
    let mibs = (args.count * 8) as f64 / (1 << 20) as f64;
    println!(
        "sorted {} keys ({:.0} MiB) in {:.2?} ({:.1} MiB/s)",
        args.count,
        mibs,
        elapsed,
        mibs / elapsed.as_secs_f64()
    );
    Ok(())
}
