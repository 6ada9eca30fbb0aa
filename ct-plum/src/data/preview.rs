//! 样本切片的可视化存储, 便于人工检查流水线输出.

use std::path::Path;

use image::ImageResult;
use ndarray::{ArrayView2, Axis};

use super::window::IntensityWindow;
use super::{CtData3d, CtLabel, CtScan};
use crate::consts::gray::{BLACK, BACKGROUND, WHITE};

/// 使标签像素更有利于单通道可视化: 背景为黑色, 其他任何类别都为白色.
#[inline]
pub(crate) fn pretty(label: u8) -> u8 {
    match label {
        BACKGROUND => BLACK,
        _ => WHITE,
    }
}

fn gray_image<T: Copy>(sli: ArrayView2<'_, T>, f: impl Fn(T) -> u8) -> image::GrayImage {
    let (height, width) = sli.dim();
    let mut buf = image::GrayImage::new(width as u32, height as u32);
    for ((h, w), &pix) in sli.indexed_iter() {
        buf.put_pixel(w as u32, h as u32, image::Luma([f(pix)]));
    }
    buf
}

impl CtScan {
    /// 将第 `z_index` 层切片以 `window` 映射为灰度图后保存到 `path`.
    ///
    /// `z_index` 越界时 panic.
    pub fn save_slice_png<P: AsRef<Path>>(
        &self,
        z_index: usize,
        window: &IntensityWindow,
        path: P,
    ) -> ImageResult<()> {
        let sli = self.data.index_axis(Axis(0), z_index);
        gray_image(sli, |v| window.eval_gray(v).unwrap_or(u8::MIN)).save(path)
    }
}

impl CtLabel {
    /// 将第 `z_index` 层切片保存到 `path`. 背景为黑色, 前景为白色.
    ///
    /// `z_index` 越界时 panic.
    pub fn save_slice_png<P: AsRef<Path>>(&self, z_index: usize, path: P) -> ImageResult<()> {
        let sli = self.data.index_axis(Axis(0), z_index);
        gray_image(sli, pretty).save(path)
    }
}

impl CtData3d {
    /// 保存中间水平切片的扫描和标注预览图, 分别写到 `scan_path` 和 `label_path`.
    ///
    /// 扫描按 `window` 的源区间映射为灰度.
    pub fn save_mid_preview<P: AsRef<Path>>(
        &self,
        window: &IntensityWindow,
        scan_path: P,
        label_path: P,
    ) -> ImageResult<()> {
        let z = self.mid_z();
        self.scan.save_slice_png(z, window, scan_path)?;
        self.label.save_slice_png(z, label_path)
    }
}

#[cfg(test)]
mod tests {
    use crate::data::tests::synthetic;
    use crate::IntensityWindow;

    #[test]
    fn test_save_mid_preview() {
        let dir = tempfile::tempdir().unwrap();
        let sample = synthetic(
            (3, 8, 6),
            |(_, h, _)| h as f32 / 8.0,
            |(_, h, w)| u8::from(h > 3 && w > 2),
        );
        let win = IntensityWindow::new(0.0, 1.0, 0.0, 1.0, true).unwrap();
        let sp = dir.path().join("scan.png");
        let lp = dir.path().join("label.png");
        sample.save_mid_preview(&win, &sp, &lp).unwrap();

        let img = image::open(&lp).unwrap().into_luma8();
        assert_eq!(img.dimensions(), (6, 8));
        assert_eq!(img.get_pixel(5, 7).0, [255]);
        assert_eq!(img.get_pixel(0, 0).0, [0]);
        assert!(image::open(&sp).is_ok());
    }
}
