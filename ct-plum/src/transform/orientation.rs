//! 方向归一化: 通过轴置换和翻转使体素轴依次指向 R, A, S.

use itertools::iproduct;
use ndarray::{s, Array3, Axis};
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;

use super::{Transform, TransformError};
use crate::data::{Affine, CtData3d, Volume};
use crate::NiftiHeaderAttr;

/// 单个体素轴在世界坐标系中的朝向.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct AxisCode {
    /// 对应的世界轴 (0 = x, 1 = y, 2 = z).
    world: usize,
    /// 是否与世界轴同向.
    positive: bool,
}

impl AxisCode {
    /// 用 `RAS+` 字母表示.
    pub(crate) fn letter(&self) -> char {
        match (self.world, self.positive) {
            (0, true) => 'R',
            (0, false) => 'L',
            (1, true) => 'A',
            (1, false) => 'P',
            (2, true) => 'S',
            _ => 'I',
        }
    }
}

/// 求 (i, j, k) 三个体素轴的朝向.
///
/// 按方向余弦绝对值从大到小贪心地把体素轴分配给世界轴.
pub(crate) fn axis_codes(affine: &Affine) -> Result<[AxisCode; 3], TransformError> {
    let m = affine.matrix();
    let mut pairs: Vec<(usize, usize, f64)> = iproduct!(0..3, 0..3)
        .map(|(vox, world)| (vox, world, m[[world, vox]]))
        .collect();
    pairs.sort_by_key(|&(_, _, v)| std::cmp::Reverse(OrderedFloat(v.abs())));

    let mut codes: [Option<AxisCode>; 3] = [None; 3];
    let mut taken = [false; 3];
    for (vox, world, v) in pairs {
        if codes[vox].is_some() || taken[world] || v == 0.0 || !v.is_finite() {
            continue;
        }
        codes[vox] = Some(AxisCode {
            world,
            positive: v > 0.0,
        });
        taken[world] = true;
    }

    match codes {
        [Some(a), Some(b), Some(c)] => Ok([a, b, c]),
        _ => Err(TransformError::DegenerateAffine(affine.clone())),
    }
}

/// 将体数据重排为 RAS 方向. 返回新数据和新仿射矩阵.
fn reorient<T: Clone>(v: &Volume<T>) -> Result<Option<(Array3<T>, Affine)>, TransformError> {
    let affine = v.affine();
    let codes = axis_codes(&affine)?;
    let is_ras = codes
        .iter()
        .enumerate()
        .all(|(vox, c)| c.world == vox && c.positive);
    if is_ras {
        return Ok(None);
    }

    // perm[world] = 指向该世界轴的原体素轴.
    let mut perm = [0usize; 3];
    for (vox, c) in codes.iter().enumerate() {
        perm[c.world] = vox;
    }

    // nifti 轴 a 对应数组轴 2 - a.
    let (z, h, w) = v.shape();
    let dims = [w, h, z];
    let mut data = v.data().to_owned();
    for (vox, c) in codes.iter().enumerate() {
        if !c.positive {
            data.invert_axis(Axis(2 - vox));
        }
    }
    let axes = [2 - perm[2], 2 - perm[1], 2 - perm[0]];
    let data = data.permuted_axes(axes).as_standard_layout().to_owned();

    // 新体素坐标 v' 到原体素坐标的映射 T, 新仿射矩阵 = A * T.
    let mut t = Affine::identity();
    let mut m = t.matrix_mut();
    m.slice_mut(s![..3, ..3]).fill(0.0);
    for (world, &vox) in perm.iter().enumerate() {
        if codes[vox].positive {
            m[[vox, world]] = 1.0;
        } else {
            m[[vox, world]] = -1.0;
            m[[vox, 3]] = dims[vox] as f64 - 1.0;
        }
    }
    Ok(Some((data, affine.matmul(&t))))
}

/// 方向归一化变换. 扫描和标注各自按自己的仿射矩阵重排.
#[derive(Copy, Clone, Debug, Default)]
pub struct Orientation;

impl Orientation {
    /// 归一化到 RAS.
    #[inline]
    pub fn ras() -> Self {
        Self
    }
}

impl Transform for Orientation {
    fn name(&self) -> &'static str {
        "Orientation"
    }

    fn is_random(&self) -> bool {
        false
    }

    fn apply(&self, mut sample: CtData3d, _: &mut StdRng) -> Result<Vec<CtData3d>, TransformError> {
        if let Some((data, affine)) = reorient(&sample.scan)? {
            sample.scan.replace(data, &affine);
        }
        if let Some((data, affine)) = reorient(&sample.label)? {
            sample.label.replace(data, &affine);
        }
        let sample = CtData3d::new(sample.scan, sample.label)?;
        Ok(vec![sample])
    }
}
