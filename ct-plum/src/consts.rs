//! 通用常量.

/// 单通道颜色.
pub mod gray {
    /// 标注中背景的像素值.
    pub const BACKGROUND: u8 = 0;

    /// 单通道黑色.
    pub const BLACK: u8 = 0b_0000_0000;

    /// 单通道白色.
    pub const WHITE: u8 = 0b_1111_1111;

    /// 像素是否是背景?
    #[inline]
    pub const fn is_background(p: u8) -> bool {
        matches!(p, BACKGROUND)
    }

    /// 像素是否是前景 (任意非背景类别)?
    #[inline]
    pub const fn is_foreground(p: u8) -> bool {
        !is_background(p)
    }
}

/// 每个受试者目录下 CT 扫描的文件名.
pub const IMAGE_FILE_NAME: &str = "CT.nii.gz";

/// 每个受试者目录下标注的文件名.
pub const LABEL_FILE_NAME: &str = "vf.nii.gz";

/// 划分清单中交叉验证列表的键.
pub const SPLITS_KEY: &str = "cross_validation_splits";

/// 身体分割结果的文件名.
pub const BODY_SEG_FILE_NAME: &str = "body_seg.nii.gz";

/// 结果目录下日志文件的文件名.
pub const LOG_FILE_NAME: &str = "logs.log";
