//! 程序运行函数.

use std::env;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Context;
use ct_plum::config::TransformConfig;
use ct_plum::dataset::{create_datasets, load_data_splits, Batch, DataLoader};
use ct_plum::IntensityWindow;
use log::info;
use utils::{loader, logging, preview_window, sep};

/// 默认结果目录.
const RESULTS_DIR: &str = "results/test_data_loader";

/// 检查的训练批次个数.
const PREVIEW_BATCHES: usize = 10;

/// 读取变换参数. `$CT_TRANSFORM_YAML` 非空时从该文件覆盖默认值.
fn transform_config() -> anyhow::Result<TransformConfig> {
    match env::var_os("CT_TRANSFORM_YAML").filter(|v| !v.is_empty()) {
        Some(p) => TransformConfig::from_yaml_file(&p)
            .with_context(|| format!("cannot load transform config {p:?}")),
        None => Ok(TransformConfig::default()),
    }
}

/// 输出一个已加载批次的形状, 并保存 nii 与预览图. 返回处理耗时 (不含加载).
fn preview_batch(
    i: usize,
    batch: &Batch,
    dir: &Path,
    window: &IntensityWindow,
) -> anyhow::Result<Duration> {
    let start = Instant::now();
    for (n, (image, label)) in batch.shapes().into_iter().enumerate() {
        info!("Batch {i} sample {n}: image {image:?}, label {label:?}");
    }

    let prefix = format!("batch_{i}");
    batch.save_nifti(dir, &prefix)?;
    batch
        .save_preview(dir, &prefix, window)
        .with_context(|| format!("cannot save previews for batch {i}"))?;
    Ok(start.elapsed())
}

/// 实际运行.
pub fn run() -> anyhow::Result<()> {
    let results_dir = loader::results_dir_from_env_or(RESULTS_DIR);
    logging::init_logging(&results_dir)?;

    let cfg = transform_config()?;
    info!("Transform config:\n{}", cfg.to_yaml_string());

    let yaml = loader::splits_yaml_from_env_or_default();
    let fold = loader::fold_from_env()?;
    let seed = loader::seed_from_env()?;
    info!("Seed: {seed}");

    let splits = load_data_splits(&yaml, fold)?;
    let (train, val, test) = create_datasets(splits, &cfg)?;
    info!("Train transforms: {:?}", train.transforms());
    info!("Eval transforms: {:?}", val.transforms());

    let train_loader = DataLoader::new(&train, 1, true, seed);
    let val_loader = DataLoader::new(&val, 1, false, seed);
    let test_loader = DataLoader::new(&test, 1, false, seed);
    info!(
        "Batches: train {}, val {}, test {}",
        train_loader.len(),
        val_loader.len(),
        test_loader.len()
    );
    sep();

    let window = preview_window();
    for (i, batch) in train_loader.take(PREVIEW_BATCHES).enumerate() {
        let batch = batch?;
        let elapsed = preview_batch(i, &batch, &results_dir, &window)?;
        info!("Time taken for batch {i}: {:.4} seconds", elapsed.as_secs_f64());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ct_plum::{Affine, CtData3d, CtLabel, CtScan};
    use ndarray::Array3;

    #[test]
    fn test_preview_batch_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let aff = Affine::identity();
        let scan = CtScan::with_affine(Array3::from_elem((3, 4, 5), 0.5), &aff);
        let label = CtLabel::with_affine(Array3::zeros((3, 4, 5)), &aff);
        let batch = Batch {
            samples: vec![CtData3d::new(scan, label).unwrap()],
            indices: vec![0],
        };

        preview_batch(2, &batch, dir.path(), &preview_window()).unwrap();
        for name in [
            "batch_2_image_0.nii.gz",
            "batch_2_label_0.nii.gz",
            "batch_2_image_0.png",
            "batch_2_label_0.png",
        ] {
            assert!(dir.path().join(name).exists(), "{name}");
        }
    }
}
