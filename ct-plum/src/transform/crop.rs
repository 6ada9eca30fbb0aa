//! 裁剪变换: 前景包围盒裁剪和按正/负样本比例的随机块裁剪.

use log::warn;
use rand::rngs::StdRng;
use rand::Rng;

use super::{Transform, TransformError};
use crate::config::CropConfig;
use crate::consts::gray::is_foreground;
use crate::data::CtData3d;
use crate::{Idx3d, NiftiHeaderAttr};

/// 扫描中所有 `> 0` 体素的包围盒 `[start, end)`. 不存在时返回 `None`.
pub(crate) fn foreground_bbox(sample: &CtData3d) -> Option<(Idx3d, Idx3d)> {
    let mut lo = [usize::MAX; 3];
    let mut hi = [0usize; 3];
    let mut found = false;
    for ((z, h, w), &v) in sample.scan.data().indexed_iter() {
        if v > 0.0 {
            found = true;
            for (i, p) in [z, h, w].into_iter().enumerate() {
                lo[i] = lo[i].min(p);
                hi[i] = hi[i].max(p + 1);
            }
        }
    }
    found.then_some(((lo[0], lo[1], lo[2]), (hi[0], hi[1], hi[2])))
}

/// 把扫描和标注裁剪到扫描前景 (`> 0`) 的包围盒.
#[derive(Copy, Clone, Debug, Default)]
pub struct CropForeground;

impl CropForeground {
    /// 创建. 边距为 0.
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Transform for CropForeground {
    fn name(&self) -> &'static str {
        "CropForeground"
    }

    fn is_random(&self) -> bool {
        false
    }

    fn apply(&self, sample: CtData3d, _: &mut StdRng) -> Result<Vec<CtData3d>, TransformError> {
        match foreground_bbox(&sample) {
            Some((start, end)) => Ok(vec![sample.crop(start, end)]),
            None => {
                warn!("No foreground in scan of shape {:?}, keeping the whole volume", sample.shape());
                Ok(vec![sample])
            }
        }
    }
}

/// 从以 `center` 为中心, 大小为 `size` 的块计算落在体内的 `[start, end)`.
///
/// 块会被整体平移到体内; 某一维比块还小时取整个维度.
pub(crate) fn patch_bounds(center: Idx3d, size: Idx3d, dims: Idx3d) -> (Idx3d, Idx3d) {
    let one = |c: usize, s: usize, d: usize| {
        let start = c.saturating_sub(s / 2).min(d.saturating_sub(s));
        (start, (start + s).min(d))
    };
    let (z0, z1) = one(center.0, size.0, dims.0);
    let (h0, h1) = one(center.1, size.1, dims.1);
    let (w0, w1) = one(center.2, size.2, dims.2);
    ((z0, h0, w0), (z1, h1, w1))
}

/// 按正/负样本比例随机选取块中心, 每个输入样本产出 `num_samples` 个块.
///
/// 正样本中心取自标注前景; 负样本中心取自标注背景中扫描强度大于
/// `image_threshold` 的体素.
#[derive(Copy, Clone, Debug)]
pub struct RandCropByPosNegLabel {
    cfg: CropConfig,
}

impl RandCropByPosNegLabel {
    /// 以 `cfg` 创建.
    #[inline]
    pub fn new(cfg: CropConfig) -> Self {
        Self { cfg }
    }

    /// 块大小, 按 (z, H, W).
    #[inline]
    fn size(&self) -> Idx3d {
        let [i, j, k] = self.cfg.spatial_size;
        (k, j, i)
    }

    /// 体素属于哪个候选池: `Some(true)` 为前景, `Some(false)` 为背景, `None` 都不是.
    #[inline]
    fn classify(&self, scan: f32, label: u8) -> Option<bool> {
        if is_foreground(label) {
            Some(true)
        } else if scan > self.cfg.image_threshold {
            Some(false)
        } else {
            None
        }
    }

    /// 统计 (前景, 背景) 候选个数.
    fn count(&self, sample: &CtData3d) -> (usize, usize) {
        sample
            .iter()
            .fold((0, 0), |(fg, bg), (&s, &l)| match self.classify(s, l) {
                Some(true) => (fg + 1, bg),
                Some(false) => (fg, bg + 1),
                None => (fg, bg),
            })
    }

    /// 抽取 `num_samples` 个 (是否前景, 池内序号).
    fn draw_picks(
        &self,
        n_fg: usize,
        n_bg: usize,
        rng: &mut StdRng,
    ) -> Result<Vec<(bool, usize)>, TransformError> {
        if n_fg == 0 && n_bg == 0 {
            return Err(TransformError::NoCandidates);
        }
        if n_fg == 0 {
            warn!("No foreground voxels in label, sampling background centers only");
        } else if n_bg == 0 {
            warn!("No background candidates above threshold, sampling foreground centers only");
        }
        let pos_ratio = self.cfg.pos / (self.cfg.pos + self.cfg.neg);

        Ok((0..self.cfg.num_samples)
            .map(|_| {
                let want_fg = rng.gen::<f64>() < pos_ratio;
                let use_fg = (want_fg && n_fg > 0) || n_bg == 0;
                let n = if use_fg { n_fg } else { n_bg };
                (use_fg, rng.gen_range(0..n))
            })
            .collect())
    }

    /// 一次遍历找到每个 (池, 序号) 对应的体素位置, 结果与 `picks` 一一对应.
    fn locate(&self, sample: &CtData3d, picks: &[(bool, usize)]) -> Vec<Idx3d> {
        let sorted = |want: bool| {
            let mut v: Vec<(usize, usize)> = picks
                .iter()
                .enumerate()
                .filter(|(_, (fg, _))| *fg == want)
                .map(|(slot, (_, rank))| (*rank, slot))
                .collect();
            v.sort_unstable();
            v
        };
        let queues = [sorted(false), sorted(true)];
        let mut cursor = [0usize; 2];
        let mut seen = [0usize; 2];
        let mut out = vec![(0, 0, 0); picks.len()];

        for ((pos, &s), &l) in sample
            .scan
            .data()
            .indexed_iter()
            .zip(sample.label.data().iter())
        {
            if cursor[0] == queues[0].len() && cursor[1] == queues[1].len() {
                break;
            }
            let Some(fg) = self.classify(s, l) else {
                continue;
            };
            let q = usize::from(fg);
            while let Some(&(rank, slot)) = queues[q].get(cursor[q]) {
                if rank != seen[q] {
                    break;
                }
                out[slot] = pos;
                cursor[q] += 1;
            }
            seen[q] += 1;
        }
        out
    }
}

impl Transform for RandCropByPosNegLabel {
    fn name(&self) -> &'static str {
        "RandCropByPosNegLabel"
    }

    fn is_random(&self) -> bool {
        true
    }

    fn apply(&self, sample: CtData3d, rng: &mut StdRng) -> Result<Vec<CtData3d>, TransformError> {
        let (n_fg, n_bg) = self.count(&sample);
        let picks = self.draw_picks(n_fg, n_bg, rng)?;
        let dims = sample.scan.shape();
        Ok(self
            .locate(&sample, &picks)
            .into_iter()
            .map(|c| {
                let (start, end) = patch_bounds(c, self.size(), dims);
                sample.crop(start, end)
            })
            .collect())
    }
}
