use std::ops::{Index, IndexMut};
use std::path::{Path, PathBuf};

use ndarray::{s, Array3, ArrayView, ArrayViewMut, Axis, Ix3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::consts::gray::BACKGROUND;
use crate::Idx3d;

pub mod affine;
pub mod preview;
pub mod window;

pub use affine::Affine;
pub use window::IntensityWindow;

/// `NiftiHeader` 是栈上大对象, 移动该对象的开销很可观.
/// 因此我们将其分配到堆上.
type BoxedHeader = Box<NiftiHeader>;

/// 打开/保存 nii 文件时的错误.
#[derive(Debug, thiserror::Error)]
pub enum VolumeError {
    /// 底层 nifti 读写错误.
    #[error("nifti error on `{path}`: {source}")]
    Nifti {
        /// 出错的文件.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: nifti::NiftiError,
    },

    /// header 声明的体素个数与实际数据不一致 (例如 4D 文件).
    #[error("`{path}` is not a 3D volume: header says {expected:?}, data has {actual} voxels")]
    NotVolume3d {
        /// 出错的文件.
        path: PathBuf,
        /// header 中的 (z, H, W).
        expected: Idx3d,
        /// 实际体素个数.
        actual: usize,
    },

    /// 扫描与标注形状不一致.
    #[error("scan shape {scan:?} does not match label shape {label:?}")]
    ShapeMismatch {
        /// 扫描形状 (z, H, W).
        scan: Idx3d,
        /// 标注形状 (z, H, W).
        label: Idx3d,
    },
}

/// 将 (W, H, z) 转换成 (z, H, W). 以后均按照该模式访问.
#[inline]
fn get_shape_from_header(h: &NiftiHeader) -> Idx3d {
    // [W, H, z]. 体素个数数组.
    let [_, w, h, z, ..] = h.dim;
    (z as usize, h as usize, w as usize)
}

/// 3D CT nii 文件 header 的共用属性和部分通用操作.
pub trait NiftiHeaderAttr {
    /// 获取 header 部分.
    fn header(&self) -> &NiftiHeader;

    /// 获取数据形状大小, 按 (z, H, W) 组织.
    #[inline]
    fn shape(&self) -> Idx3d {
        get_shape_from_header(self.header())
    }

    /// 获取水平切片个数.
    #[inline]
    fn len_z(&self) -> usize {
        self.shape().0
    }

    /// 获取数据体素个数.
    #[inline]
    fn size(&self) -> usize {
        let (z, h, w) = self.shape();
        z * h * w
    }

    /// 检查索引是否合法.
    #[inline]
    fn check(&self, (z0, h0, w0): &Idx3d) -> bool {
        let (z, h, w) = self.shape();
        *z0 < z && *h0 < h && *w0 < w
    }

    /// 获取单个体素分辨率. 该分辨率以毫米为单位, 分别代表空间 (相邻切片方向),
    /// 高 (自然图像的垂直方向), 宽 (自然图像的水平方向).
    #[inline]
    fn pix_dim(&self) -> [f64; 3] {
        let [_, w, h, z, ..] = self.header().pixdim;
        [z as f64, h as f64, w as f64]
    }

    /// 体素坐标 (i, j, k) 到世界坐标的仿射矩阵.
    ///
    /// 依次尝试 sform, qform, 最后退化为仅由 pixdim 决定的基础矩阵.
    #[inline]
    fn affine(&self) -> Affine {
        affine::from_header(self.header())
    }
}

/// nii 格式的 3D 体数据, 包括 header 和按 (z, H, W) 组织的体素.
///
/// 扫描见 [`CtScan`], 标注见 [`CtLabel`].
#[derive(Debug, Clone)]
pub struct Volume<T> {
    header: BoxedHeader,
    data: Array3<T>,
}

/// nii 格式 3D CT 扫描. HU 值 (或变换后的强度) 以 `f32` 保存.
pub type CtScan = Volume<f32>;

/// nii 格式 3D CT 标注. 标签值以 `u8` 保存.
pub type CtLabel = Volume<u8>;

impl<T> NiftiHeaderAttr for Volume<T> {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl<T> Index<Idx3d> for Volume<T> {
    type Output = T;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl<T> IndexMut<Idx3d> for Volume<T> {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl<T: Clone> Volume<T> {
    /// 用已有 header 和 (z, H, W) 数据直接拼出体数据.
    ///
    /// header 中的 dim 会被改写为 `data` 的实际形状, 其余字段保持不变.
    pub fn from_parts(header: NiftiHeader, data: Array3<T>) -> Self {
        let affine = affine::from_header(&header);
        let mut header = Box::new(header);
        let (z, h, w) = data.dim();
        affine::write_into_header(&mut header, (z, h, w), &affine);
        Self { header, data }
    }

    /// 用仿射矩阵和 (z, H, W) 数据创建体数据. 主要用于测试和合成数据.
    pub fn with_affine(data: Array3<T>, affine: &Affine) -> Self {
        let mut header = Box::<NiftiHeader>::default();
        affine::write_into_header(&mut header, data.dim(), affine);
        Self { header, data }
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, T, Ix3> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut<'_, T, Ix3> {
        self.data.view_mut()
    }

    /// 取出内部数据.
    #[inline]
    pub fn into_data(self) -> Array3<T> {
        self.data
    }

    /// 用新的数据和仿射矩阵替换当前内容, header 同步更新.
    pub(crate) fn replace(&mut self, data: Array3<T>, affine: &Affine) {
        affine::write_into_header(&mut self.header, data.dim(), affine);
        self.data = data;
    }

    /// 截取 `[start, end)` 范围内的子体 (按 (z, H, W) 索引), 并平移仿射矩阵原点.
    ///
    /// `end` 越界时 panic.
    pub fn crop(&self, start: Idx3d, end: Idx3d) -> Self {
        let (z0, h0, w0) = start;
        let (z1, h1, w1) = end;
        let data = self.data.slice(s![z0..z1, h0..h1, w0..w1]).to_owned();
        let affine = self.affine().translated([w0 as f64, h0 as f64, z0 as f64]);
        let mut header = self.header.clone();
        affine::write_into_header(&mut header, data.dim(), &affine);
        Self { header, data }
    }
}

/// `open` 和 `save` 依赖 nifti 的元素 trait, 因此对具体类型分别实现.
macro_rules! impl_volume_io {
    ($($t: ty),+) => {
        $(
            impl Volume<$t> {
                /// 打开 nii (或 nii.gz) 文件. `path` 为 nii 文件的本地路径.
                pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VolumeError> {
                    let path = path.as_ref();
                    let nifti_err = |source| VolumeError::Nifti {
                        path: path.to_owned(),
                        source,
                    };
                    let obj = ReaderOptions::new().read_file(path).map_err(nifti_err)?;
                    let mut header = Box::new(obj.header().clone());
                    let expected = get_shape_from_header(&header);

                    let mut data = obj
                        .into_volume()
                        .into_ndarray::<$t>()
                        .map_err(nifti_err)?;
                    // 形如 [W, H, z, 1] 的文件仍视为 3D.
                    while data.ndim() > 3 && data.shape()[data.ndim() - 1] == 1 {
                        let last = data.ndim() - 1;
                        data = data.index_axis_move(Axis(last), 0);
                    }
                    let not_3d = |actual| VolumeError::NotVolume3d {
                        path: path.to_owned(),
                        expected,
                        actual,
                    };
                    if data.ndim() != 3 {
                        return Err(not_3d(data.len()));
                    }

                    // [W, H, z] -> [z, H, W].
                    // hint: 原第一维向下增长, 原第二维向右增长.
                    let data = data.permuted_axes([2, 1, 0].as_slice());

                    // The nature of nifti data field layout.
                    debug_assert!(data.is_standard_layout());

                    let raw = data.into_raw_vec();
                    let actual = raw.len();
                    let data = Array3::<$t>::from_shape_vec(expected, raw)
                        .map_err(|_| not_3d(actual))?;
                    header.dim[0] = 3;
                    header.dim[4..].fill(1);
                    // 数据已按 scl_slope/scl_inter 换算, 保存时不能再换算一次.
                    header.scl_slope = 1.0;
                    header.scl_inter = 0.0;

                    Ok(Self { header, data })
                }

                /// 保存为 nii 文件. 路径以 `.gz` 结尾时自动压缩.
                pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), VolumeError> {
                    let path = path.as_ref();
                    // [z, H, W] -> [W, H, z]
                    let data = self.data.view().permuted_axes([2, 1, 0]);
                    WriterOptions::new(path)
                        .reference_header(&self.header)
                        .write_nifti(&data)
                        .map_err(|source| VolumeError::Nifti {
                            path: path.to_owned(),
                            source,
                        })
                }
            }
        )+
    };
}

impl_volume_io!(f32, u8);

impl CtScan {
    /// 所有体素的最小值和最大值. 空数据返回 `None`.
    pub fn min_max(&self) -> Option<(f32, f32)> {
        self.data.iter().fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }
}

impl CtLabel {
    /// 获取 3D 标注中值为 `label` 的体素个数.
    #[inline]
    pub fn count(&self, label: u8) -> usize {
        self.data.iter().filter(|p| **p == label).count()
    }

    /// 获取非背景体素个数.
    #[inline]
    pub fn foreground_count(&self) -> usize {
        self.data.iter().filter(|p| **p != BACKGROUND).count()
    }
}

/// nii 格式的 3D CT 扫描与对应的标注, 也就是流水线中的一个样本.
///
/// 该结构完全透明, 仅包含两个公开的 `scan` 和 `label` 子结构.
#[derive(Debug, Clone)]
pub struct CtData3d {
    /// 3D CT 扫描.
    pub scan: CtScan,

    /// 3D CT 标注.
    pub label: CtLabel,
}

impl CtData3d {
    /// 分别打开 nii 文件格式的 3D CT 扫描和对应标注.
    ///
    /// 任一文件打开失败, 或两者形状不一致时返回 `Err`.
    pub fn open(scan_path: impl AsRef<Path>, label_path: impl AsRef<Path>) -> Result<Self, VolumeError> {
        let scan = CtScan::open(scan_path.as_ref())?;
        let label = CtLabel::open(label_path.as_ref())?;
        Self::new(scan, label)
    }

    /// 组合扫描和标注. 形状不一致时返回 `Err`.
    pub fn new(scan: CtScan, label: CtLabel) -> Result<Self, VolumeError> {
        if scan.shape() != label.shape() {
            return Err(VolumeError::ShapeMismatch {
                scan: scan.shape(),
                label: label.shape(),
            });
        }
        Ok(Self { scan, label })
    }

    /// 获取数据形状 (z, H, W).
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.scan.shape()
    }

    /// 同时截取扫描和标注.
    #[inline]
    pub fn crop(&self, start: Idx3d, end: Idx3d) -> Self {
        Self {
            scan: self.scan.crop(start, end),
            label: self.label.crop(start, end),
        }
    }

    /// 获取能按行优先序迭代 3D (扫描, 标注) 像素的迭代器.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&f32, &u8)> {
        self.scan.data.iter().zip(self.label.data.iter())
    }

    /// 中间一张水平切片的索引.
    #[inline]
    pub fn mid_z(&self) -> usize {
        self.scan.len_z() / 2
    }

    /// 获取第 `z_index` 层 (扫描, 标注) 切片.
    ///
    /// 当 `z_index` 越界时 panic.
    #[inline]
    pub fn slice_at(&self, z_index: usize) -> (ArrayView<'_, f32, ndarray::Ix2>, ArrayView<'_, u8, ndarray::Ix2>) {
        (
            self.scan.data.index_axis(Axis(0), z_index),
            self.label.data.index_axis(Axis(0), z_index),
        )
    }
}
