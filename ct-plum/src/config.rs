//! 变换流水线的参数记录.
//!
//! 所有取值都集中在这里, 而不是散落在流水线的构建代码中.
//! [`TransformConfig::default`] 即训练实验所用的固定参数集.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::IntensityWindow;
use crate::transform::TransformError;

/// 参数集版本号. 修改任何默认值时递增.
pub const TRANSFORM_CONFIG_VERSION: u32 = 1;

/// 强度窗口参数.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntensityConfig {
    /// 源区间下限 (HU).
    pub a_min: f32,
    /// 源区间上限 (HU).
    pub a_max: f32,
    /// 目标区间下限.
    pub b_min: f32,
    /// 目标区间上限.
    pub b_max: f32,
    /// 是否截断.
    pub clip: bool,
}

impl Default for IntensityConfig {
    fn default() -> Self {
        Self {
            a_min: -200.0,
            a_max: 100.0,
            b_min: 0.0,
            b_max: 1.0,
            clip: true,
        }
    }
}

impl IntensityConfig {
    /// 转换为 [`IntensityWindow`]. 参数非法时返回 `None`.
    #[inline]
    pub fn window(&self) -> Option<IntensityWindow> {
        IntensityWindow::new(self.a_min, self.a_max, self.b_min, self.b_max, self.clip)
    }
}

/// 按正/负样本比例随机裁剪的参数.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CropConfig {
    /// 裁剪块大小, 按 nifti 的 (i, j, k) 即 (W, H, z) 顺序.
    pub spatial_size: [usize; 3],
    /// 中心落在前景上的权重.
    pub pos: f64,
    /// 中心落在背景上的权重.
    pub neg: f64,
    /// 每个输入样本生成的裁剪块个数.
    pub num_samples: usize,
    /// 背景中心候选的扫描强度下限 (严格大于).
    pub image_threshold: f32,
}

impl Default for CropConfig {
    fn default() -> Self {
        Self {
            spatial_size: [128, 128, 96],
            pos: 1.0,
            neg: 1.0,
            num_samples: 4,
            image_threshold: 0.0,
        }
    }
}

/// 随机旋转参数. 角度以弧度为单位.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotateConfig {
    /// 执行概率.
    pub prob: f64,
    /// 绕 i 轴的角度范围 `[-range_x, range_x]`.
    pub range_x: f64,
    /// 绕 j 轴的角度范围.
    pub range_y: f64,
    /// 绕 k 轴的角度范围.
    pub range_z: f64,
}

impl Default for RotateConfig {
    fn default() -> Self {
        Self {
            prob: 0.2,
            range_x: 0.1,
            range_y: 0.1,
            range_z: 0.1,
        }
    }
}

/// 随机强度平移参数.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShiftConfig {
    /// 平移量从 `[-offsets, offsets]` 均匀采样.
    pub offsets: f32,
    /// 执行概率.
    pub prob: f64,
}

impl Default for ShiftConfig {
    fn default() -> Self {
        Self {
            offsets: 0.05,
            prob: 0.5,
        }
    }
}

/// 完整的变换流水线参数.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// 参数集版本.
    pub version: u32,
    /// 目标方向码. 目前只支持 `"RAS"`.
    pub orientation: String,
    /// 强度窗口.
    pub intensity: IntensityConfig,
    /// 随机裁剪.
    pub crop: CropConfig,
    /// 随机旋转.
    pub rotate: RotateConfig,
    /// 随机强度平移.
    pub shift: ShiftConfig,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            version: TRANSFORM_CONFIG_VERSION,
            orientation: "RAS".to_string(),
            intensity: IntensityConfig::default(),
            crop: CropConfig::default(),
            rotate: RotateConfig::default(),
            shift: ShiftConfig::default(),
        }
    }
}

fn is_prob(p: f64) -> bool {
    (0.0..=1.0).contains(&p)
}

impl TransformConfig {
    /// 从 YAML 文件读取参数. 缺省字段使用默认值.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, TransformError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| TransformError::ConfigIo {
            path: path.to_owned(),
            source,
        })?;
        let cfg: Self = serde_yaml::from_str(&text)
            .map_err(|e| TransformError::InvalidConfig(format!("{}: {e}", path.display())))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// 以 YAML 文本形式输出, 便于写入日志.
    pub fn to_yaml_string(&self) -> String {
        serde_yaml::to_string(self).unwrap_or_else(|e| format!("<unserializable: {e}>"))
    }

    /// 检查参数合法性.
    pub fn validate(&self) -> Result<(), TransformError> {
        let bad = |msg: &str| Err(TransformError::InvalidConfig(msg.to_string()));

        if self.version != TRANSFORM_CONFIG_VERSION {
            return Err(TransformError::InvalidConfig(format!(
                "unsupported config version {} (expected {TRANSFORM_CONFIG_VERSION})",
                self.version
            )));
        }
        if !self.orientation.eq_ignore_ascii_case("RAS") {
            return bad("only `RAS` orientation is supported");
        }
        if self.intensity.window().is_none() {
            return bad("intensity window needs finite values and a_min < a_max");
        }
        let c = &self.crop;
        if c.spatial_size.iter().any(|&s| s == 0) {
            return bad("crop spatial_size must be positive");
        }
        if c.num_samples == 0 {
            return bad("crop num_samples must be positive");
        }
        let weight_ok = |v: f64| v.is_finite() && v >= 0.0;
        if !(weight_ok(c.pos) && weight_ok(c.neg) && c.pos + c.neg > 0.0) {
            return bad("crop pos/neg must be finite non-negative weights, not both zero");
        }
        let r = &self.rotate;
        if !is_prob(r.prob) {
            return bad("rotate prob must be in [0, 1]");
        }
        if [r.range_x, r.range_y, r.range_z]
            .iter()
            .any(|v| !v.is_finite() || *v < 0.0)
        {
            return bad("rotate ranges must be finite and non-negative");
        }
        if !is_prob(self.shift.prob) {
            return bad("shift prob must be in [0, 1]");
        }
        if !self.shift.offsets.is_finite() || self.shift.offsets < 0.0 {
            return bad("shift offsets must be finite and non-negative");
        }
        Ok(())
    }
}
