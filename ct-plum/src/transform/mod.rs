//! 体数据变换流水线.
//!
//! 每个变换接收一个 (扫描, 标注) 样本, 产出一个或多个样本.
//! 流水线 [`Compose`] 依次对当前所有样本施加每一步变换,
//! 而 "加载" 是流水线隐含的第一步.
//!
//! 训练流水线 ([`train_transforms`]) 与评估流水线 ([`eval_transforms`])
//! 的区别只在于是否包含末尾的三个随机步骤.

use std::path::PathBuf;

use rand::rngs::StdRng;

use crate::config::TransformConfig;
use crate::data::{Affine, CtData3d, VolumeError};
use crate::dataset::SplitEntry;

mod crop;
mod intensity;
mod orientation;
mod rotate;

pub use crop::{CropForeground, RandCropByPosNegLabel};
pub use intensity::{RandShiftIntensity, ScaleIntensityRange};
pub use orientation::Orientation;
pub use rotate::{rotate_linear, rotate_nearest, RandRotate, Rotation};

/// 变换流水线的运行时错误.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// 加载体数据失败. 文件是否存在在这一步才被检查.
    #[error("failed to load sample: {0}")]
    Load(#[from] VolumeError),

    /// 参数非法.
    #[error("invalid transform config: {0}")]
    InvalidConfig(String),

    /// 读取参数文件失败.
    #[error("failed to read transform config `{path}`: {source}")]
    ConfigIo {
        /// 参数文件.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: std::io::Error,
    },

    /// 仿射矩阵无法对应到一组坐标轴.
    #[error("affine cannot be mapped to axis codes: {0:?}")]
    DegenerateAffine(Affine),

    /// 随机裁剪时前景和背景候选都为空.
    #[error("no foreground or background candidates for crop centers")]
    NoCandidates,
}

/// 单个变换.
pub trait Transform: Send + Sync {
    /// 变换名. 用于日志和流水线比较.
    fn name(&self) -> &'static str;

    /// 是否是随机变换. 非随机变换不得读取 `rng`.
    fn is_random(&self) -> bool;

    /// 对一个样本施加变换.
    fn apply(&self, sample: CtData3d, rng: &mut StdRng) -> Result<Vec<CtData3d>, TransformError>;
}

/// 有序的变换序列.
#[derive(Default)]
pub struct Compose {
    steps: Vec<Box<dyn Transform>>,
}

impl std::fmt::Debug for Compose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl Compose {
    /// 创建空流水线.
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一步.
    pub fn then<T: Transform + 'static>(mut self, t: T) -> Self {
        self.steps.push(Box::new(t));
        self
    }

    /// 步骤个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// 是否没有任何步骤.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// 按顺序给出每一步的名字.
    pub fn names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// 是否包含随机步骤.
    pub fn is_random(&self) -> bool {
        self.steps.iter().any(|s| s.is_random())
    }

    /// 依次施加所有步骤.
    pub fn apply(&self, sample: CtData3d, rng: &mut StdRng) -> Result<Vec<CtData3d>, TransformError> {
        let mut samples = vec![sample];
        for step in self.steps.iter() {
            let mut next = Vec::with_capacity(samples.len());
            for s in samples {
                next.extend(step.apply(s, rng)?);
            }
            samples = next;
        }
        Ok(samples)
    }

    /// 加载 `entry` 指向的扫描和标注, 然后施加所有步骤.
    pub fn load_and_apply(
        &self,
        entry: &SplitEntry,
        rng: &mut StdRng,
    ) -> Result<Vec<CtData3d>, TransformError> {
        let sample = CtData3d::open(&entry.image, &entry.label)?;
        self.apply(sample, rng)
    }
}

/// 评估 (验证/测试) 流水线: 方向归一化, 强度窗口, 前景裁剪. 完全确定.
pub fn eval_transforms(cfg: &TransformConfig) -> Result<Compose, TransformError> {
    cfg.validate()?;
    Ok(deterministic_prefix(cfg))
}

/// 训练流水线: 评估流水线之后追加随机裁剪, 随机旋转, 随机强度平移.
pub fn train_transforms(cfg: &TransformConfig) -> Result<Compose, TransformError> {
    cfg.validate()?;
    Ok(deterministic_prefix(cfg)
        .then(RandCropByPosNegLabel::new(cfg.crop))
        .then(RandRotate::new(cfg.rotate))
        .then(RandShiftIntensity::new(cfg.shift)))
}

fn deterministic_prefix(cfg: &TransformConfig) -> Compose {
    // validate() 已保证窗口合法.
    let window = cfg.intensity.window().unwrap_or_else(crate::IntensityWindow::soft_tissue);
    Compose::new()
        .then(Orientation::ras())
        .then(ScaleIntensityRange::new(window))
        .then(CropForeground::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tests::synthetic;
    use crate::NiftiHeaderAttr;
    use rand::SeedableRng;

    /// 中心有一个亮块, 块内有一小片标注.
    fn phantom() -> CtData3d {
        synthetic(
            (20, 24, 28),
            |(z, h, w)| {
                if (4..16).contains(&z) && (5..19).contains(&h) && (6..22).contains(&w) {
                    40.0
                } else {
                    -1000.0
                }
            },
            |(z, h, w)| u8::from((8..11).contains(&z) && (10..13).contains(&h) && (10..14).contains(&w)),
        )
    }

    fn small_cfg() -> TransformConfig {
        let mut cfg = TransformConfig::default();
        cfg.crop.spatial_size = [8, 6, 4];
        cfg
    }

    #[test]
    fn test_chains_differ_only_in_random_steps() {
        let cfg = TransformConfig::default();
        let train = train_transforms(&cfg).unwrap();
        let eval = eval_transforms(&cfg).unwrap();

        assert!(train.is_random());
        assert!(!eval.is_random());

        let deterministic: Vec<_> = train
            .steps
            .iter()
            .filter(|s| !s.is_random())
            .map(|s| s.name())
            .collect();
        assert_eq!(deterministic, eval.names());
        assert_eq!(
            train.names(),
            [
                "Orientation",
                "ScaleIntensityRange",
                "CropForeground",
                "RandCropByPosNegLabel",
                "RandRotate",
                "RandShiftIntensity"
            ]
        );
    }

    #[test]
    fn test_eval_chain_is_deterministic() {
        let eval = eval_transforms(&small_cfg()).unwrap();
        let mut r1 = StdRng::seed_from_u64(1);
        let mut r2 = StdRng::seed_from_u64(2);
        let a = eval.apply(phantom(), &mut r1).unwrap();
        let b = eval.apply(phantom(), &mut r2).unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].shape(), (12, 14, 16));
        assert_eq!(a[0].scan.data(), b[0].scan.data());
        assert_eq!(a[0].label.data(), b[0].label.data());
        // 40 HU 在 [-200, 100] 窗口下为 0.8.
        assert!((a[0].scan[(0, 0, 0)] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_train_chain_produces_patches() {
        let train = train_transforms(&small_cfg()).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let out = train.apply(phantom(), &mut rng).unwrap();
        assert_eq!(out.len(), 4);
        for s in out.iter() {
            // spatial_size 按 (i, j, k) 给出, 形状按 (z, H, W).
            assert_eq!(s.shape(), (4, 6, 8));
            assert_eq!(s.label.shape(), (4, 6, 8));
        }
    }

    #[test]
    fn test_load_and_apply_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let entry = SplitEntry::new(dir.path(), "nobody");
        let eval = eval_transforms(&small_cfg()).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let err = eval.load_and_apply(&entry, &mut rng).unwrap_err();
        assert!(matches!(err, TransformError::Load(_)));
    }
}
