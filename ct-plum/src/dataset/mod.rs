//! 数据集操作.
//!
//! 1. [`load_data_splits`] 从交叉验证划分文件解析出某一折的 train/val/test 列表;
//! 2. [`create_datasets`] 给三组列表分别配上训练/评估变换流水线;
//! 3. [`DataLoader`] 按批次迭代数据集.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::rngs::StdRng;

use crate::config::TransformConfig;
use crate::consts::{IMAGE_FILE_NAME, LABEL_FILE_NAME};
use crate::data::CtData3d;
use crate::transform::{eval_transforms, train_transforms, Compose, TransformError};

mod loader;
mod split;

pub use loader::{Batch, DataLoader};
pub use split::{fold_key, load_data_splits, Manifest, SplitError};

/// 一个受试者的扫描和标注文件路径.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SplitEntry {
    /// 扫描 (`CT.nii.gz`).
    pub image: PathBuf,
    /// 标注 (`vf.nii.gz`).
    pub label: PathBuf,
}

impl SplitEntry {
    /// `base/id/CT.nii.gz` 与 `base/id/vf.nii.gz`.
    pub fn new(base: impl AsRef<Path>, id: &str) -> Self {
        let dir = base.as_ref().join(id);
        Self {
            image: dir.join(IMAGE_FILE_NAME),
            label: dir.join(LABEL_FILE_NAME),
        }
    }
}

/// 某一折的三组有序列表.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataSplits {
    /// 训练集.
    pub train: Vec<SplitEntry>,
    /// 验证集.
    pub val: Vec<SplitEntry>,
    /// 测试集.
    pub test: Vec<SplitEntry>,
}

impl DataSplits {
    /// 三组合计条目数.
    #[inline]
    pub fn len(&self) -> usize {
        self.train.len() + self.val.len() + self.test.len()
    }

    /// 三组是否都为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 依次迭代 train, val, test 的所有条目.
    pub fn iter(&self) -> impl Iterator<Item = &SplitEntry> {
        self.train.iter().chain(self.val.iter()).chain(self.test.iter())
    }
}

/// 条目列表与变换流水线的组合. 样本在访问时才加载并变换.
#[derive(Debug, Clone)]
pub struct Dataset {
    entries: Vec<SplitEntry>,
    transforms: Arc<Compose>,
}

impl Dataset {
    /// 用条目列表和流水线创建.
    pub fn new(entries: Vec<SplitEntry>, transforms: Arc<Compose>) -> Self {
        Self { entries, transforms }
    }

    /// 条目个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 所有条目, 与构造时顺序一致.
    #[inline]
    pub fn entries(&self) -> &[SplitEntry] {
        &self.entries
    }

    /// 变换流水线.
    #[inline]
    pub fn transforms(&self) -> &Compose {
        &self.transforms
    }

    /// 加载第 `index` 个条目并施加流水线.
    ///
    /// 训练流水线中的随机裁剪会产出多个样本. `index` 越界时 panic.
    pub fn get(&self, index: usize, rng: &mut StdRng) -> Result<Vec<CtData3d>, TransformError> {
        self.transforms.load_and_apply(&self.entries[index], rng)
    }
}

/// 为某一折创建 (训练, 验证, 测试) 数据集.
///
/// 训练集使用训练流水线, 验证与测试共用同一个评估流水线.
pub fn create_datasets(
    splits: DataSplits,
    cfg: &TransformConfig,
) -> Result<(Dataset, Dataset, Dataset), TransformError> {
    let train = Arc::new(train_transforms(cfg)?);
    let eval = Arc::new(eval_transforms(cfg)?);
    let DataSplits { train: tr, val, test } = splits;
    Ok((
        Dataset::new(tr, train),
        Dataset::new(val, Arc::clone(&eval)),
        Dataset::new(test, eval),
    ))
}

/// 获取 `{用户主目录}/dataset` 目录.
pub fn home_dataset_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    Some(ans)
}

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = home_dataset_dir()?;
    ans.extend(it);
    Some(ans)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splits() -> DataSplits {
        let e = |id| SplitEntry::new("/data", id);
        DataSplits {
            train: vec![e("A"), e("B")],
            val: vec![e("C")],
            test: vec![e("D")],
        }
    }

    #[test]
    fn test_create_datasets_preserves_order() {
        let s = splits();
        let (train, val, test) = create_datasets(s.clone(), &TransformConfig::default()).unwrap();
        assert_eq!(train.entries(), s.train.as_slice());
        assert_eq!(val.entries(), s.val.as_slice());
        assert_eq!(test.entries(), s.test.as_slice());
        assert_eq!(train.len() + val.len() + test.len(), s.len());

        assert!(train.transforms().is_random());
        assert!(!val.transforms().is_random());
        assert_eq!(val.transforms().names(), test.transforms().names());
    }

    #[test]
    fn test_entry_paths() {
        let e = SplitEntry::new("/data/KU-PET-CT", "00293921");
        assert_eq!(e.image, Path::new("/data/KU-PET-CT/00293921/CT.nii.gz"));
        assert_eq!(e.label, Path::new("/data/KU-PET-CT/00293921/vf.nii.gz"));
    }

    #[test]
    fn test_splits_iter_order() {
        let ids: Vec<_> = splits()
            .iter()
            .map(|e| e.image.parent().unwrap().file_name().unwrap().to_owned())
            .collect();
        assert_eq!(ids, ["A", "B", "C", "D"]);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut cfg = TransformConfig::default();
        cfg.crop.num_samples = 0;
        assert!(matches!(
            create_datasets(splits(), &cfg),
            Err(TransformError::InvalidConfig(_))
        ));
    }
}
