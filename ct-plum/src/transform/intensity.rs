//! 强度变换. 只作用于扫描, 标注保持不变.

use rand::rngs::StdRng;
use rand::Rng;

use super::{Transform, TransformError};
use crate::config::ShiftConfig;
use crate::data::{CtData3d, CtScan, IntensityWindow};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        /// 借助 `rayon` 并行地对扫描每个体素施加 `f`.
        #[inline]
        fn map_inplace<F: Fn(f32) -> f32 + Sync + Send>(scan: &mut CtScan, f: F) {
            scan.data_mut().par_mapv_inplace(f);
        }
    } else {
        #[inline]
        fn map_inplace<F: Fn(f32) -> f32>(scan: &mut CtScan, f: F) {
            scan.data_mut().mapv_inplace(f);
        }
    }
}

/// 用强度窗口线性缩放扫描.
#[derive(Copy, Clone, Debug)]
pub struct ScaleIntensityRange {
    window: IntensityWindow,
}

impl ScaleIntensityRange {
    /// 以 `window` 创建.
    #[inline]
    pub fn new(window: IntensityWindow) -> Self {
        Self { window }
    }
}

impl Transform for ScaleIntensityRange {
    fn name(&self) -> &'static str {
        "ScaleIntensityRange"
    }

    fn is_random(&self) -> bool {
        false
    }

    fn apply(&self, mut sample: CtData3d, _: &mut StdRng) -> Result<Vec<CtData3d>, TransformError> {
        let w = self.window;
        map_inplace(&mut sample.scan, move |v| w.eval(v));
        Ok(vec![sample])
    }
}

/// 以一定概率给整个扫描加上同一个随机偏移量.
#[derive(Copy, Clone, Debug)]
pub struct RandShiftIntensity {
    cfg: ShiftConfig,
}

impl RandShiftIntensity {
    /// 以 `cfg` 创建.
    #[inline]
    pub fn new(cfg: ShiftConfig) -> Self {
        Self { cfg }
    }

    /// 抽取本次偏移量. 不执行时返回 `None`.
    fn draw(&self, rng: &mut StdRng) -> Option<f32> {
        if rng.gen::<f64>() >= self.cfg.prob {
            return None;
        }
        let o = self.cfg.offsets;
        Some(rng.gen_range(-o..=o))
    }
}

impl Transform for RandShiftIntensity {
    fn name(&self) -> &'static str {
        "RandShiftIntensity"
    }

    fn is_random(&self) -> bool {
        true
    }

    fn apply(&self, mut sample: CtData3d, rng: &mut StdRng) -> Result<Vec<CtData3d>, TransformError> {
        if let Some(offset) = self.draw(rng) {
            map_inplace(&mut sample.scan, move |v| v + offset);
        }
        Ok(vec![sample])
    }
}
