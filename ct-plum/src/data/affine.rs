//! 体素坐标到世界坐标 (RAS+) 的仿射矩阵, 以及它与 nifti header 之间的转换.
//!
//! 矩阵以 [`ndarray::Array2`] 保存, 作用在 nifti 原生的 `(i, j, k, 1)` 列向量上, 即 `(W, H, z, 1)`,
//! 与本 crate 中数组的 `(z, H, W)` 访问顺序相反.

use ndarray::{aview1, s, Array2, ArrayView2, ArrayViewMut2};
use nifti::NiftiHeader;

use crate::Idx3d;

/// 4x4 仿射矩阵.
#[derive(Clone, Debug, PartialEq)]
pub struct Affine(Array2<f64>);

impl Affine {
    /// 单位矩阵.
    #[inline]
    pub fn identity() -> Self {
        Self(Array2::eye(4))
    }

    /// 对角矩阵, `d` 为 (i, j, k) 方向的体素间距.
    pub fn from_diag(d: [f64; 3]) -> Self {
        Self(Array2::from_diag(&aview1(&[d[0], d[1], d[2], 1.0])))
    }

    /// 按行给出全部 16 个元素.
    pub fn from_rows(rows: [[f64; 4]; 4]) -> Self {
        Self(ndarray::arr2(&rows))
    }

    /// 矩阵本身.
    #[inline]
    pub fn matrix(&self) -> ArrayView2<'_, f64> {
        self.0.view()
    }

    #[inline]
    pub(crate) fn matrix_mut(&mut self) -> ArrayViewMut2<'_, f64> {
        self.0.view_mut()
    }

    /// 矩阵乘法 `self * rhs`.
    #[inline]
    pub fn matmul(&self, rhs: &Affine) -> Affine {
        Affine(self.0.dot(&rhs.0))
    }

    /// 返回第 `c` 列的前三个分量.
    #[inline]
    pub fn column(&self, c: usize) -> [f64; 3] {
        [self.0[[0, c]], self.0[[1, c]], self.0[[2, c]]]
    }

    /// 第 `c` 个体素轴的间距 (列向量模长).
    #[inline]
    pub fn spacing(&self, c: usize) -> f64 {
        let col = self.0.slice(s![..3, c]);
        col.dot(&col).sqrt()
    }

    /// 体素坐标平移 `offset` (按 (i, j, k)) 后的新仿射矩阵.
    /// 即新体素 `v` 对应原体素 `v + offset`.
    pub fn translated(&self, offset: [f64; 3]) -> Affine {
        let mut t = Array2::<f64>::eye(4);
        t.slice_mut(s![..3, 3]).assign(&aview1(&offset));
        Affine(self.0.dot(&t))
    }

    /// 将体素坐标 `(i, j, k)` 映射为世界坐标.
    pub fn apply(&self, v: [f64; 3]) -> [f64; 3] {
        let p = [v[0], v[1], v[2], 1.0];
        let p = aview1(&p);
        [0, 1, 2].map(|r| self.0.row(r).dot(&p))
    }
}

impl Default for Affine {
    fn default() -> Self {
        Self::identity()
    }
}

/// 从 header 中读取仿射矩阵.
///
/// 优先级: `sform_code > 0` 时使用 srow, 否则 `qform_code > 0` 时使用四元数,
/// 都没有时退化为 x 轴取反、以体中心为原点的基础矩阵.
pub fn from_header(h: &NiftiHeader) -> Affine {
    if h.sform_code > 0 {
        let row = |r: [f32; 4]| r.map(f64::from);
        return Affine::from_rows([
            row(h.srow_x),
            row(h.srow_y),
            row(h.srow_z),
            [0.0, 0.0, 0.0, 1.0],
        ]);
    }

    let [_, dx, dy, dz, ..] = h.pixdim.map(|p| f64::from(p).abs());
    let [dx, dy, dz] = [dx, dy, dz].map(|d| if d > 0.0 { d } else { 1.0 });

    if h.qform_code > 0 {
        let (b, c, d) = (
            f64::from(h.quatern_b),
            f64::from(h.quatern_c),
            f64::from(h.quatern_d),
        );
        let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
        let qfac = if h.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let r = ndarray::arr2(&[
            [a * a + b * b - c * c - d * d, 2.0 * (b * c - a * d), 2.0 * (b * d + a * c)],
            [2.0 * (b * c + a * d), a * a + c * c - b * b - d * d, 2.0 * (c * d - a * b)],
            [2.0 * (b * d - a * c), 2.0 * (c * d + a * b), a * a + d * d - c * c - b * b],
        ]);
        // 第 j 列乘以第 j 轴的间距.
        let scale_arr = [dx, dy, dz * qfac];
        let scale = aview1(&scale_arr);
        let offset = [
            f64::from(h.quatern_x),
            f64::from(h.quatern_y),
            f64::from(h.quatern_z),
        ];
        let mut m = Array2::<f64>::eye(4);
        m.slice_mut(s![..3, ..3]).assign(&(&r * &scale));
        m.slice_mut(s![..3, 3]).assign(&aview1(&offset));
        return Affine(m);
    }

    // ANALYZE 风格: x 轴向左, 原点位于体中心.
    let [_, w, hh, z, ..] = h.dim;
    let center = [w, hh, z].map(|n| (f64::from(n.max(1)) - 1.0) / 2.0);
    Affine::from_rows([
        [-dx, 0.0, 0.0, dx * center[0]],
        [0.0, dy, 0.0, -dy * center[1]],
        [0.0, 0.0, dz, -dz * center[2]],
        [0.0, 0.0, 0.0, 1.0],
    ])
}

/// 把 `(z, H, W)` 形状和仿射矩阵写回 header.
///
/// 写入后 sform 有效 (沿用原 code, 若为 0 则置 2), qform 失效, pixdim 取列模长.
pub(crate) fn write_into_header(h: &mut NiftiHeader, (z, hh, w): Idx3d, affine: &Affine) {
    h.dim = [3, w as u16, hh as u16, z as u16, 1, 1, 1, 1];
    h.pixdim[0] = 1.0;
    for c in 0..3 {
        h.pixdim[c + 1] = affine.spacing(c) as f32;
    }
    let m = affine.matrix();
    let row = |r: usize| [0, 1, 2, 3].map(|c| m[[r, c]] as f32);
    h.srow_x = row(0);
    h.srow_y = row(1);
    h.srow_z = row(2);
    if h.sform_code <= 0 {
        h.sform_code = 2;
    }
    h.qform_code = 0;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_round_trip_through_header() {
        let mut h = NiftiHeader::default();
        let aff = Affine::from_diag([0.8, 0.8, 2.5]).translated([-10.0, 4.0, 1.0]);
        write_into_header(&mut h, (10, 20, 30), &aff);
        assert_eq!(h.dim[1..4], [30, 20, 10]);
        let back = from_header(&h);
        assert!(back
            .matrix()
            .iter()
            .zip(aff.matrix().iter())
            .all(|(a, b)| (a - b).abs() < 1e-5));
    }

    #[test]
    fn test_compose_and_apply() {
        let a = Affine::from_diag([2.0, 3.0, 4.0]).translated([1.0, -1.0, 2.0]);
        assert_eq!(a.apply([0.0, 0.0, 0.0]), [2.0, -3.0, 8.0]);
        assert_eq!(a.apply([1.0, 1.0, 1.0]), [4.0, 0.0, 12.0]);
        assert_eq!(a.spacing(1), 3.0);

        let b = a.matmul(&Affine::identity().translated([1.0, 1.0, 1.0]));
        assert_eq!(b.column(3), [4.0, 0.0, 12.0]);
        assert_eq!(b.matrix().dim(), (4, 4));
    }

    #[test]
    fn test_qform_half_turn_about_z() {
        // 绕 z 轴 180 度: (b, c, d) = (0, 0, 1) => LPS.
        let mut h = NiftiHeader::default();
        h.sform_code = 0;
        h.qform_code = 1;
        h.quatern_d = 1.0;
        h.pixdim = [1.0, 0.7, 0.7, 3.0, 1.0, 1.0, 1.0, 1.0];
        let aff = from_header(&h);
        let m = aff.matrix();
        assert!((m[[0, 0]] + 0.7).abs() < 1e-6);
        assert!((m[[1, 1]] + 0.7).abs() < 1e-6);
        assert!((m[[2, 2]] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_fallback_flips_x() {
        let mut h = NiftiHeader::default();
        h.sform_code = 0;
        h.qform_code = 0;
        h.dim = [3, 3, 3, 3, 1, 1, 1, 1];
        h.pixdim = [1.0, 2.0, 2.0, 2.0, 1.0, 1.0, 1.0, 1.0];
        let aff = from_header(&h);
        assert_eq!(aff.column(0), [-2.0, 0.0, 0.0]);
        assert_eq!(aff.apply([1.0, 1.0, 1.0]), [0.0, 0.0, 0.0]);
    }
}
