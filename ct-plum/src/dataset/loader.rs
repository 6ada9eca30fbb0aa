//! 批次数据加载器.
//!
//! 提供迭代器风格的数据集获取模式. 每次迭代取出 `batch_size` 个条目,
//! 加载并施加流水线, 把产出的所有样本拼成一个 [`Batch`].

use std::path::{Path, PathBuf};

use image::ImageResult;
use log::debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::Dataset;
use crate::data::{CtData3d, IntensityWindow, VolumeError};
use crate::transform::TransformError;
use crate::{Idx3d, NiftiHeaderAttr};

/// 一个批次的样本.
#[derive(Debug, Clone)]
pub struct Batch {
    /// 所有样本. 随机裁剪时一个条目对应多个样本.
    pub samples: Vec<CtData3d>,
    /// 本批次各条目在数据集中的索引.
    pub indices: Vec<usize>,
}

impl Batch {
    /// 样本个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// 是否没有样本.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// 每个样本的 (扫描形状, 标注形状), 按 (z, H, W).
    pub fn shapes(&self) -> Vec<(Idx3d, Idx3d)> {
        self.samples
            .iter()
            .map(|s| (s.scan.shape(), s.label.shape()))
            .collect()
    }

    /// 把第 `n` 个样本写为 `dir/{prefix}_image_{n}.nii.gz` 和 `dir/{prefix}_label_{n}.nii.gz`.
    ///
    /// 返回写出的所有文件路径.
    pub fn save_nifti(&self, dir: impl AsRef<Path>, prefix: &str) -> Result<Vec<PathBuf>, VolumeError> {
        let dir = dir.as_ref();
        let mut written = Vec::with_capacity(self.len() * 2);
        for (n, s) in self.samples.iter().enumerate() {
            let image = dir.join(format!("{prefix}_image_{n}.nii.gz"));
            let label = dir.join(format!("{prefix}_label_{n}.nii.gz"));
            s.scan.save(&image)?;
            s.label.save(&label)?;
            written.push(image);
            written.push(label);
        }
        Ok(written)
    }

    /// 把每个样本的中间水平切片写为 `dir/{prefix}_image_{n}.png` 和 `dir/{prefix}_label_{n}.png`.
    pub fn save_preview(
        &self,
        dir: impl AsRef<Path>,
        prefix: &str,
        window: &IntensityWindow,
    ) -> ImageResult<()> {
        let dir = dir.as_ref();
        for (n, s) in self.samples.iter().enumerate() {
            s.save_mid_preview(
                window,
                dir.join(format!("{prefix}_image_{n}.png")),
                dir.join(format!("{prefix}_label_{n}.png")),
            )?;
        }
        Ok(())
    }
}

/// 数据集的批次加载器.
///
/// 索引顺序在创建时一次性确定; 随机变换与打乱共用同一个以 `seed` 初始化的 [`StdRng`],
/// 因此相同 `seed` 的两次迭代结果一致.
#[derive(Debug)]
pub struct DataLoader<'a> {
    dataset: &'a Dataset,
    batch_size: usize,
    order_rev: Vec<usize>,
    rng: StdRng,
}

impl<'a> DataLoader<'a> {
    /// 创建加载器.
    ///
    /// # 注意
    ///
    /// `batch_size` 为 0 时程序 panic.
    pub fn new(dataset: &'a Dataset, batch_size: usize, shuffle: bool, seed: u64) -> Self {
        assert!(batch_size > 0, "batch_size must be positive");

        let mut rng = StdRng::seed_from_u64(seed);
        let mut order: Vec<usize> = (0..dataset.len()).collect();
        if shuffle {
            order.shuffle(&mut rng);
        }
        order.reverse();

        Self {
            dataset,
            batch_size,
            order_rev: order,
            rng,
        }
    }

    /// 剩余条目的迭代顺序.
    pub fn remaining(&self) -> impl Iterator<Item = usize> + '_ {
        self.order_rev.iter().rev().copied()
    }
}

impl Iterator for DataLoader<'_> {
    type Item = Result<Batch, TransformError>;

    fn next(&mut self) -> Option<Self::Item> {
        let take = self.batch_size.min(self.order_rev.len());
        if take == 0 {
            return None;
        }
        let indices: Vec<usize> = (0..take).filter_map(|_| self.order_rev.pop()).collect();

        let mut samples = Vec::with_capacity(indices.len());
        for &idx in indices.iter() {
            debug!("Loading {}", self.dataset.entries()[idx].image.display());
            match self.dataset.get(idx, &mut self.rng) {
                Ok(s) => samples.extend(s),
                Err(e) => return Some(Err(e)),
            }
        }
        Some(Ok(Batch { samples, indices }))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.len();
        (n, Some(n))
    }
}

impl ExactSizeIterator for DataLoader<'_> {
    #[inline]
    fn len(&self) -> usize {
        self.order_rev.len().div_ceil(self.batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransformConfig;
    use crate::data::tests::synthetic;
    use crate::dataset::{create_datasets, DataSplits, SplitEntry};
    use std::fs;

    /// 在 `dir` 下写出 `n` 个受试者, 第 `i` 个的前景块宽度为 `i + 2`.
    fn write_subjects(dir: &Path, n: usize) -> Vec<SplitEntry> {
        (0..n)
            .map(|i| {
                let id = format!("s{i}");
                fs::create_dir(dir.join(&id)).unwrap();
                let sample = synthetic(
                    (6, 8, 10),
                    |(z, h, w)| if (1..5).contains(&z) && (2..6).contains(&h) && w < i + 2 { 40.0 } else { -500.0 },
                    |(z, h, w)| u8::from(z == 2 && h == 3 && w == 0),
                );
                let e = SplitEntry::new(dir, &id);
                sample.scan.save(&e.image).unwrap();
                sample.label.save(&e.label).unwrap();
                e
            })
            .collect()
    }

    fn small_cfg() -> TransformConfig {
        let mut cfg = TransformConfig::default();
        cfg.crop.spatial_size = [2, 2, 2];
        cfg.crop.num_samples = 3;
        cfg
    }

    #[test]
    fn test_sequential_batches() {
        let dir = tempfile::tempdir().unwrap();
        let entries = write_subjects(dir.path(), 3);
        let splits = DataSplits {
            val: entries,
            ..DataSplits::default()
        };
        let (_, val, _) = create_datasets(splits, &small_cfg()).unwrap();

        let loader = DataLoader::new(&val, 2, false, 0);
        assert_eq!(loader.len(), 2);
        let batches: Vec<Batch> = loader.map(|b| b.unwrap()).collect();
        assert_eq!(batches[0].indices, [0, 1]);
        assert_eq!(batches[1].indices, [2]);
        // 评估流水线: 每个条目一个样本, 前景裁剪后宽度为 i + 2.
        assert_eq!(batches[0].shapes()[1], ((4, 4, 3), (4, 4, 3)));
        assert_eq!(batches[1].len(), 1);
    }

    #[test]
    fn test_seeded_shuffle_is_reproducible() {
        let dir = tempfile::tempdir().unwrap();
        let entries = write_subjects(dir.path(), 4);
        let splits = DataSplits {
            train: entries,
            ..DataSplits::default()
        };
        let (train, _, _) = create_datasets(splits, &small_cfg()).unwrap();

        let run = |seed| -> Vec<Batch> {
            DataLoader::new(&train, 1, true, seed)
                .map(|b| b.unwrap())
                .collect()
        };
        let a = run(42);
        let b = run(42);
        assert_eq!(a.len(), 4);
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.indices, y.indices);
            assert_eq!(x.len(), 3);
            for (s, t) in x.samples.iter().zip(y.samples.iter()) {
                assert_eq!(s.scan.data(), t.scan.data());
                assert_eq!(s.label.data(), t.label.data());
            }
        }
        let mut seen: Vec<usize> = a.iter().flat_map(|b| b.indices.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, [0, 1, 2, 3]);
    }

    #[test]
    fn test_missing_file_surfaces_on_access() {
        let dir = tempfile::tempdir().unwrap();
        let splits = DataSplits {
            test: vec![SplitEntry::new(dir.path(), "ghost")],
            ..DataSplits::default()
        };
        let (_, _, test) = create_datasets(splits, &small_cfg()).unwrap();
        let mut loader = DataLoader::new(&test, 1, false, 0);
        assert!(matches!(loader.next(), Some(Err(TransformError::Load(_)))));
        assert!(loader.next().is_none());
    }

    #[test]
    fn test_save_batch() {
        let dir = tempfile::tempdir().unwrap();
        let sample = synthetic((2, 3, 4), |(z, _, _)| z as f32, |(_, h, _)| h as u8);
        let batch = Batch {
            samples: vec![sample.clone(), sample],
            indices: vec![0],
        };
        let written = batch.save_nifti(dir.path(), "batch_0").unwrap();
        assert_eq!(written.len(), 4);
        assert!(dir.path().join("batch_0_label_1.nii.gz").is_file());

        let win = IntensityWindow::new(0.0, 1.0, 0.0, 1.0, true).unwrap();
        batch.save_preview(dir.path(), "batch_0", &win).unwrap();
        assert!(dir.path().join("batch_0_image_0.png").is_file());
    }
}
