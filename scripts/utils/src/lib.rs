//! 脚本依赖的通用组件.

use ct_plum::IntensityWindow;

pub mod loader;
pub mod logging;

const SEP: &str = "--------------------------------------------------------";

/// 简单分隔线.
#[inline]
pub fn sep() {
    log::info!("{SEP}");
}

/// 预览图使用的窗口: 流水线输出已在 [0, 1] 区间内, 直接映射为 8-bit 灰度.
#[inline]
pub fn preview_window() -> IntensityWindow {
    IntensityWindow::new(0.0, 1.0, 0.0, 1.0, true).unwrap_or_else(IntensityWindow::soft_tissue)
}
