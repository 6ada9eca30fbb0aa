#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 按交叉验证折加载 CT 扫描与椎体骨折 (vf) 标注, 并提供训练/评估两条体数据变换流水线.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 数据集目录按 `{根目录}/{受试者 ID}/CT.nii.gz` 与 `{根目录}/{受试者 ID}/vf.nii.gz`
//!   组织, 根目录即划分文件 `data_splits.yaml` 所在目录.
//! 2. 体数据在内存中一律按 (z, H, W) 组织, 与 nifti 文件的 (i, j, k) = (W, H, z) 相反.
//! 3. 分割模型不在本 crate 中实现, 见 [`segment`].
//!
//! # 开发计划
//!
//! ### 交叉验证划分文件解析 ✅
//!
//! 受试者 ID 可以是字符串或整数; 同一折内的重复 ID 视为配置错误.
//!
//! 实现位于 `ct-plum/src/dataset/split.rs`.
//!
//! ### 体数据仿射矩阵 ✅
//!
//! 依次从 sform, qform, pixdim 推导体素到世界坐标的矩阵.
//! 所有变换都同步维护 header 中的 dim, pixdim 与 sform.
//!
//! 实现位于 `ct-plum/src/data/affine.rs`.
//!
//! ### 变换流水线 ✅
//!
//! 1. 方向归一化 (RAS) ✅
//! 2. 强度窗口线性缩放 ✅
//! 3. 前景包围盒裁剪 ✅
//! 4. 按正/负样本比例的随机块裁剪 ✅
//! 5. 小角度随机旋转 (扫描三线性, 标注最近邻) ✅
//! 6. 随机强度平移 ✅
//!
//! 实现位于 `ct-plum/src/transform/*`.
//!
//! ### 批次加载器 ✅
//!
//! 以种子确定打乱顺序和所有随机变换, 便于复现.
//!
//! 实现位于 `ct-plum/src/dataset/loader.rs`.
//!
//! ### 身体分割冒烟测试 ✅
//!
//! 通过 `TotalSegmentator` 命令行工具运行, 输出缺失时只记录错误.
//!
//! 实现位于 `ct-plum/src/segment`.
//!
//! ### 完善代码文档 ✅
//!
//! 给每个 public API 提供文档, 并视情况给 private
//! API 提供文档.

/// 二维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx2d = (usize, usize);

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 3D CT nii 文件基础数据结构.
mod data;

pub use data::{
    Affine, CtData3d, CtLabel, CtScan, IntensityWindow, NiftiHeaderAttr, Volume, VolumeError,
};

pub mod config;
pub mod consts;
pub mod dataset;
pub mod prelude;
pub mod segment;
pub mod transform;
