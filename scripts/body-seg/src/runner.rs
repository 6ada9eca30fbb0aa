//! 程序运行函数.

use ct_plum::segment::{run_body_smoke_test, SmokeOutcome, TotalSegmentatorCli};
use log::info;
use utils::{loader, logging, sep};

/// 默认结果目录.
const RESULTS_DIR: &str = "results/test_totalsegmentator";

/// 实际运行.
pub fn run() -> anyhow::Result<()> {
    let results_dir = loader::results_dir_from_env_or(RESULTS_DIR);
    logging::init_logging(&results_dir)?;

    let ct_path = loader::input_ct_from_env_or_default();
    let device = loader::device_from_env();
    info!("Input CT: {}", ct_path.display());
    info!("Results dir: {}", results_dir.display());
    info!("Device: {device}");
    sep();

    let cli = TotalSegmentatorCli::new();
    match run_body_smoke_test(&ct_path, &results_dir, &cli, &device)? {
        SmokeOutcome::Produced(p) => info!("Smoke test passed: {}", p.display()),
        SmokeOutcome::Missing(p) => info!("Smoke test finished without output at {}", p.display()),
    }
    Ok(())
}
