//! 绕体中心的小角度三维旋转. 输出与输入同形状, 越界采样取边界值.

use ndarray::{arr2, aview1, s, Array2, Array3, ArrayView3, Axis};
use rand::rngs::StdRng;
use rand::Rng;

use super::{Transform, TransformError};
use crate::config::RotateConfig;
use crate::data::{Affine, CtData3d};
use crate::{Idx3d, NiftiHeaderAttr};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
    }
}

/// (i, j, k) 体素坐标系下的旋转矩阵.
#[derive(Clone, Debug, PartialEq)]
pub struct Rotation {
    m: Array2<f64>,
}

impl Rotation {
    /// 由绕 i, j, k 轴的角度 (弧度) 构造, `R = Rx * Ry * Rz`.
    pub fn from_angles(x: f64, y: f64, z: f64) -> Self {
        let (sx, cx) = x.sin_cos();
        let (sy, cy) = y.sin_cos();
        let (sz, cz) = z.sin_cos();
        let rx = arr2(&[[1.0, 0.0, 0.0], [0.0, cx, -sx], [0.0, sx, cx]]);
        let ry = arr2(&[[cy, 0.0, sy], [0.0, 1.0, 0.0], [-sy, 0.0, cy]]);
        let rz = arr2(&[[cz, -sz, 0.0], [sz, cz, 0.0], [0.0, 0.0, 1.0]]);
        Self {
            m: rx.dot(&ry).dot(&rz),
        }
    }

    /// 不旋转.
    #[inline]
    pub fn identity() -> Self {
        Self::from_angles(0.0, 0.0, 0.0)
    }

    /// 输出体素到原体素的齐次映射 `v -> R^-1 (v - c) + c`. `R^-1 = R^T`.
    fn voxel_map(&self, center: [f64; 3]) -> Affine {
        let inv = self.m.t();
        let c = aview1(&center);
        let shift = &c - &inv.dot(&c);

        let mut t = Affine::identity();
        let mut m = t.matrix_mut();
        m.slice_mut(s![..3, ..3]).assign(&inv);
        m.slice_mut(s![..3, 3]).assign(&shift);
        t
    }

    /// 旋转后的仿射矩阵: 新体素 `v'` 对应原体素 `R^-1 (v' - c) + c`.
    #[inline]
    fn rotated_affine(&self, affine: &Affine, center: [f64; 3]) -> Affine {
        affine.matmul(&self.voxel_map(center))
    }
}

/// 体中心 (按 (i, j, k)).
#[inline]
fn center_of((z, h, w): Idx3d) -> [f64; 3] {
    [w, h, z].map(|n| (n as f64 - 1.0) / 2.0)
}

/// 按 (z, H, W) 逐体素生成输出.
fn fill<T, F>(shape: Idx3d, f: F) -> Array3<T>
where
    T: Default + Clone + Send + Sync,
    F: Fn(usize, usize, usize) -> T + Send + Sync,
{
    let mut out = Array3::<T>::default(shape);
    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            out.axis_iter_mut(Axis(0))
                .into_par_iter()
                .enumerate()
                .for_each(|(z, mut sli)| {
                    sli.indexed_iter_mut().for_each(|((h, w), v)| *v = f(z, h, w));
                });
        } else {
            out.axis_iter_mut(Axis(0))
                .enumerate()
                .for_each(|(z, mut sli)| {
                    sli.indexed_iter_mut().for_each(|((h, w), v)| *v = f(z, h, w));
                });
        }
    }
    out
}

#[inline]
fn clamp_coord(q: f64, n: usize) -> f64 {
    q.clamp(0.0, (n - 1) as f64)
}

/// 三线性插值旋转.
pub fn rotate_linear(src: ArrayView3<'_, f32>, rot: &Rotation) -> Array3<f32> {
    let (nz, nh, nw) = src.dim();
    if nz * nh * nw == 0 {
        return src.to_owned();
    }
    let map = rot.voxel_map(center_of((nz, nh, nw)));
    fill((nz, nh, nw), |z, h, w| {
        let [qi, qj, qk] = map.apply([w as f64, h as f64, z as f64]);
        let (qi, qj, qk) = (clamp_coord(qi, nw), clamp_coord(qj, nh), clamp_coord(qk, nz));
        let (i0, j0, k0) = (qi.floor() as usize, qj.floor() as usize, qk.floor() as usize);
        let (i1, j1, k1) = ((i0 + 1).min(nw - 1), (j0 + 1).min(nh - 1), (k0 + 1).min(nz - 1));
        let (fi, fj, fk) = (qi - i0 as f64, qj - j0 as f64, qk - k0 as f64);

        let at = |k: usize, j: usize, i: usize| src[(k, j, i)] as f64;
        let lerp = |a: f64, b: f64, t: f64| a * (1.0 - t) + b * t;
        let c00 = lerp(at(k0, j0, i0), at(k0, j0, i1), fi);
        let c01 = lerp(at(k0, j1, i0), at(k0, j1, i1), fi);
        let c10 = lerp(at(k1, j0, i0), at(k1, j0, i1), fi);
        let c11 = lerp(at(k1, j1, i0), at(k1, j1, i1), fi);
        lerp(lerp(c00, c01, fj), lerp(c10, c11, fj), fk) as f32
    })
}

/// 最近邻旋转. 用于标注.
pub fn rotate_nearest<T>(src: ArrayView3<'_, T>, rot: &Rotation) -> Array3<T>
where
    T: Copy + Default + Send + Sync,
{
    let (nz, nh, nw) = src.dim();
    if nz * nh * nw == 0 {
        return src.to_owned();
    }
    let map = rot.voxel_map(center_of((nz, nh, nw)));
    fill((nz, nh, nw), |z, h, w| {
        let [qi, qj, qk] = map.apply([w as f64, h as f64, z as f64]);
        let i = clamp_coord(qi, nw).round() as usize;
        let j = clamp_coord(qj, nh).round() as usize;
        let k = clamp_coord(qk, nz).round() as usize;
        src[(k, j, i)]
    })
}

/// 以一定概率随机旋转. 扫描三线性插值, 标注最近邻.
#[derive(Copy, Clone, Debug)]
pub struct RandRotate {
    cfg: RotateConfig,
}

impl RandRotate {
    /// 以 `cfg` 创建.
    #[inline]
    pub fn new(cfg: RotateConfig) -> Self {
        Self { cfg }
    }

    /// 抽取本次的旋转. 不执行时返回 `None`.
    fn draw(&self, rng: &mut StdRng) -> Option<Rotation> {
        if rng.gen::<f64>() >= self.cfg.prob {
            return None;
        }
        let mut angle = |r: f64| rng.gen_range(-r..=r);
        let x = angle(self.cfg.range_x);
        let y = angle(self.cfg.range_y);
        let z = angle(self.cfg.range_z);
        Some(Rotation::from_angles(x, y, z))
    }
}

impl Transform for RandRotate {
    fn name(&self) -> &'static str {
        "RandRotate"
    }

    fn is_random(&self) -> bool {
        true
    }

    fn apply(&self, mut sample: CtData3d, rng: &mut StdRng) -> Result<Vec<CtData3d>, TransformError> {
        let Some(rot) = self.draw(rng) else {
            return Ok(vec![sample]);
        };
        let c = center_of(sample.shape());

        let scan = rotate_linear(sample.scan.data(), &rot);
        let affine = rot.rotated_affine(&sample.scan.affine(), c);
        sample.scan.replace(scan, &affine);

        let label = rotate_nearest(sample.label.data(), &rot);
        let affine = rot.rotated_affine(&sample.label.affine(), c);
        sample.label.replace(label, &affine);

        Ok(vec![sample])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tests::synthetic;
    use ndarray::Array3;
    use rand::SeedableRng;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_zero_rotation_is_identity() {
        let src = Array3::from_shape_fn((4, 5, 6), |(z, h, w)| (z * 31 + h * 7 + w) as f32);
        let out = rotate_linear(src.view(), &Rotation::identity());
        assert_eq!(out, src);
        let lbl = src.mapv(|v| v as u8);
        assert_eq!(rotate_nearest(lbl.view(), &Rotation::identity()), lbl);
    }

    #[test]
    fn test_voxel_map_fixes_center() {
        let rot = Rotation::from_angles(0.3, -0.2, 0.1);
        let rrt = rot.m.dot(&rot.m.t());
        for ((r, c), v) in rrt.indexed_iter() {
            let expect = if r == c { 1.0 } else { 0.0 };
            assert!((v - expect).abs() < 1e-12);
        }

        let c = [2.0, 3.5, 1.0];
        let q = rot.voxel_map(c).apply(c);
        for (a, b) in q.iter().zip(c.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_quarter_turn_about_k() {
        // 单层 3x3: 值 = h * 3 + w.
        let src = Array3::from_shape_fn((1, 3, 3), |(_, h, w)| (h * 3 + w) as u8);
        let rot = Rotation::from_angles(0.0, 0.0, FRAC_PI_2);
        let out = rotate_nearest(src.view(), &rot);
        // 输出 (i, j) 取自原 (j, -i) (以中心为原点).
        assert_eq!(out[(0, 0, 0)], src[(0, 2, 0)]);
        assert_eq!(out[(0, 1, 1)], src[(0, 1, 1)]);
        assert_eq!(out[(0, 0, 2)], src[(0, 0, 0)]);

        let lin = rotate_linear(src.mapv(f32::from).view(), &rot);
        assert!((lin[(0, 0, 2)] - 0.0).abs() < 1e-4);
        assert!((lin[(0, 2, 2)] - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_border_padding() {
        // 旋转后角落的采样点落在体外, 取边界值而不是 0.
        let src = Array3::from_elem((3, 9, 9), 5.0f32);
        let out = rotate_linear(src.view(), &Rotation::from_angles(0.3, 0.2, 0.1));
        assert!(out.iter().all(|v| (v - 5.0).abs() < 1e-4));
    }

    #[test]
    fn test_rand_rotate_keeps_shape() {
        let cfg = RotateConfig {
            prob: 1.0,
            range_x: 0.1,
            range_y: 0.1,
            range_z: 0.1,
        };
        let sample = synthetic((6, 8, 10), |(z, _, _)| z as f32, |(_, h, _)| u8::from(h > 3));
        let mut rng = StdRng::seed_from_u64(9);
        let out = RandRotate::new(cfg).apply(sample, &mut rng).unwrap().remove(0);
        assert_eq!(out.shape(), (6, 8, 10));
        assert_eq!(out.label.shape(), (6, 8, 10));
        assert!(out.label.data().iter().all(|&v| v <= 1));
        // 体中心的世界坐标不变.
        let c = center_of((6, 8, 10));
        let world = out.scan.affine().apply(c);
        for (a, b) in world.iter().zip(c.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_rand_rotate_prob_zero() {
        let cfg = RotateConfig {
            prob: 0.0,
            ..RotateConfig::default()
        };
        let sample = synthetic((2, 3, 4), |(z, h, w)| (z + h + w) as f32, |_| 0);
        let before = sample.scan.data().to_owned();
        let mut rng = StdRng::seed_from_u64(9);
        let out = RandRotate::new(cfg).apply(sample, &mut rng).unwrap().remove(0);
        assert_eq!(out.scan.data(), before);
    }
}
