/// 强度窗口: 把 `[a_min, a_max]` 内的 CT HU 值线性映射到 `[b_min, b_max]`.
///
/// 该窗口是只读的. 若要修改窗口参数, 你应该创建新的实例.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct IntensityWindow {
    a_min: f32,
    a_max: f32,
    b_min: f32,
    b_max: f32,
    clip: bool,
}

impl IntensityWindow {
    /// 构建强度窗口.
    ///
    /// 各参数必须是有限值, 且 `a_min < a_max`, 否则返回 `None`.
    pub fn new(a_min: f32, a_max: f32, b_min: f32, b_max: f32, clip: bool) -> Option<Self> {
        let finite = [a_min, a_max, b_min, b_max].iter().all(|v| v.is_finite());
        (finite && a_min < a_max).then_some(Self {
            a_min,
            a_max,
            b_min,
            b_max,
            clip,
        })
    }

    /// 训练时使用的软组织窗口: `[-200, 100]` HU 映射到 `[0, 1]`, 截断.
    #[inline]
    pub const fn soft_tissue() -> Self {
        Self {
            a_min: -200.0,
            a_max: 100.0,
            b_min: 0.0,
            b_max: 1.0,
            clip: true,
        }
    }

    /// 源区间下限.
    #[inline]
    pub fn a_min(&self) -> f32 {
        self.a_min
    }

    /// 源区间上限.
    #[inline]
    pub fn a_max(&self) -> f32 {
        self.a_max
    }

    /// 目标区间下限.
    #[inline]
    pub fn b_min(&self) -> f32 {
        self.b_min
    }

    /// 目标区间上限.
    #[inline]
    pub fn b_max(&self) -> f32 {
        self.b_max
    }

    /// 是否截断到目标区间.
    #[inline]
    pub fn clip(&self) -> bool {
        self.clip
    }

    /// 求 `ct` 映射后的值. NaN 原样返回.
    pub fn eval(&self, ct: f32) -> f32 {
        let t = (ct - self.a_min) / (self.a_max - self.a_min);
        let v = t * (self.b_max - self.b_min) + self.b_min;
        if self.clip {
            let (lo, hi) = if self.b_min <= self.b_max {
                (self.b_min, self.b_max)
            } else {
                (self.b_max, self.b_min)
            };
            v.clamp(lo, hi)
        } else {
            v
        }
    }

    /// 求 `ct` 在源区间下对应的灰度图像素整数值 (0 <= value <= 255).
    ///
    /// 如果 `ct` 无意义 (如 inf, NaN), 则返回 `None`.
    pub fn eval_gray(&self, ct: f32) -> Option<u8> {
        if !ct.is_finite() {
            return None;
        }
        if ct <= self.a_min {
            Some(u8::MIN)
        } else if ct >= self.a_max {
            Some(u8::MAX)
        } else {
            // 255, not 256.
            Some((((ct - self.a_min) / (self.a_max - self.a_min)) * 255.0) as u8)
        }
    }
}
