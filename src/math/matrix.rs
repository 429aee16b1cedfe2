//! 4x4 矩阵运算 / 欧拉角分解
//!
//! 列向量约定：`a * b` 先应用 b 再应用 a。

use glam::{DMat3, DMat4, DQuat, DVec3};
use std::f64::consts::{PI, TAU};

use super::SINGULAR_EPSILON;
use crate::{Result, RigError};

// ============================================================================
// 旋转顺序
// ============================================================================

/// 旋转顺序（名称即应用顺序，xyz = 先 X 后 Y 再 Z）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum RotateOrder {
    #[default]
    Xyz,
    Yzx,
    Zxy,
    Xzy,
    Yxz,
    Zyx,
}

impl RotateOrder {
    pub const ALL: [Self; 6] = [Self::Xyz, Self::Yzx, Self::Zxy, Self::Xzy, Self::Yxz, Self::Zyx];

    /// 从宿主的旋转顺序编号 (0..=5) 转换
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Self::Xyz => 0,
            Self::Yzx => 1,
            Self::Zxy => 2,
            Self::Xzy => 3,
            Self::Yxz => 4,
            Self::Zyx => 5,
        }
    }

    /// 轴的应用顺序 (第一个, 第二个, 第三个)
    #[inline]
    fn axes(self) -> (usize, usize, usize) {
        match self {
            Self::Xyz => (0, 1, 2),
            Self::Yzx => (1, 2, 0),
            Self::Zxy => (2, 0, 1),
            Self::Xzy => (0, 2, 1),
            Self::Yxz => (1, 0, 2),
            Self::Zyx => (2, 1, 0),
        }
    }

    /// 偶排列为 1，奇排列为 -1
    #[inline]
    fn parity(self) -> f64 {
        match self {
            Self::Xyz | Self::Yzx | Self::Zxy => 1.0,
            Self::Xzy | Self::Yxz | Self::Zyx => -1.0,
        }
    }
}

fn axis_unit(index: usize) -> DVec3 {
    match index {
        0 => DVec3::X,
        1 => DVec3::Y,
        _ => DVec3::Z,
    }
}

// ============================================================================
// 矩阵运算
// ============================================================================

/// 矩阵乘法（先应用 b 再应用 a）
#[inline]
pub fn mat_mul(a: DMat4, b: DMat4) -> DMat4 {
    a * b
}

/// 矩阵求逆，|行列式| 低于 1e-12 时返回 `SingularMatrix`
pub fn mat_inverse(m: DMat4) -> Result<DMat4> {
    let determinant = m.determinant();
    if !determinant.is_finite() || determinant.abs() < SINGULAR_EPSILON {
        return Err(RigError::SingularMatrix { determinant });
    }
    Ok(m.inverse())
}

/// 欧拉角 → 四元数
pub fn euler_to_quat(euler: DVec3, order: RotateOrder) -> DQuat {
    let (i, j, k) = order.axes();
    let q = |axis: usize| DQuat::from_axis_angle(axis_unit(axis), euler[axis]);
    q(k) * q(j) * q(i)
}

/// 四元数 → 欧拉角
#[inline]
pub fn quat_to_euler(q: DQuat, order: RotateOrder) -> DVec3 {
    matrix_to_euler(&DMat3::from_quat(q.normalize()), order)
}

/// 从纯旋转矩阵分解欧拉角
///
/// 奇排列的顺序等价于镜像后的偶排列，角度取反，用 parity 统一处理。
/// 万向锁时第三个轴取 0。
pub fn matrix_to_euler(m: &DMat3, order: RotateOrder) -> DVec3 {
    let (i, j, k) = order.axes();
    let s = order.parity();
    let el = |row: usize, col: usize| m.col(col)[row];

    let cy = (el(i, i) * el(i, i) + el(j, i) * el(j, i)).sqrt();
    let second = (-s * el(k, i)).atan2(cy);

    let (first, third) = if cy > 1.0e-9 {
        (
            (s * el(k, j)).atan2(el(k, k)),
            (s * el(j, i)).atan2(el(i, i)),
        )
    } else {
        // Gimbal lock
        ((-s * el(j, k)).atan2(el(j, j)), 0.0)
    };

    let mut euler = DVec3::ZERO;
    euler[i] = first;
    euler[j] = second;
    euler[k] = third;
    euler
}

/// 平移 / 旋转 / 缩放合成矩阵
pub fn compose(translate: DVec3, rotate: DVec3, scale: DVec3, order: RotateOrder) -> DMat4 {
    DMat4::from_scale_rotation_translation(scale, euler_to_quat(rotate, order), translate)
}

/// 矩阵分解结果
#[derive(Clone, Copy, Debug)]
pub struct Decomposed {
    pub translate: DVec3,
    /// 欧拉角（弧度），按分解时的旋转顺序
    pub rotate: DVec3,
    pub scale: DVec3,
    pub rotation: DQuat,
}

impl Decomposed {
    /// 重新合成矩阵
    #[inline]
    pub fn to_matrix(&self) -> DMat4 {
        DMat4::from_scale_rotation_translation(self.scale, self.rotation, self.translate)
    }
}

/// 分解为平移 / 欧拉旋转 / 缩放
///
/// 同一矩阵在不同旋转顺序下得到的欧拉角不同，但重新合成的矩阵相同。
/// 负行列式（镜像）折算为 X 轴负缩放。
pub fn decompose(m: DMat4, order: RotateOrder) -> Result<Decomposed> {
    let determinant = m.determinant();
    if !determinant.is_finite() || determinant.abs() < SINGULAR_EPSILON {
        return Err(RigError::SingularMatrix { determinant });
    }
    let (scale, rotation, translate) = m.to_scale_rotation_translation();
    let rotation = rotation.normalize();
    Ok(Decomposed {
        translate,
        rotate: quat_to_euler(rotation, order),
        scale,
        rotation,
    })
}

// ============================================================================
// 欧拉角连续性
// ============================================================================

/// 找到与 prev 最接近的等价欧拉角表示
///
/// 候选：原解与 (a+π, π-b, c+π) 的翻转解，两者各自按 2π 展开到 prev 附近。
pub fn closest_euler(euler: DVec3, prev: DVec3, order: RotateOrder) -> DVec3 {
    let (i, j, k) = order.axes();
    let mut flipped = euler;
    flipped[i] += PI;
    flipped[j] = PI - euler[j];
    flipped[k] += PI;

    let candidates = [unwrap_towards(euler, prev), unwrap_towards(flipped, prev)];

    let mut best = candidates[0];
    let mut best_error = euler_error(best, prev);
    for candidate in &candidates[1..] {
        let error = euler_error(*candidate, prev);
        if error < best_error {
            best_error = error;
            best = *candidate;
        }
    }
    best
}

/// 每个分量按 2π 整数倍平移到 prev 附近
fn unwrap_towards(v: DVec3, prev: DVec3) -> DVec3 {
    let turns = ((prev - v) / TAU).round();
    v + turns * TAU
}

fn euler_error(a: DVec3, b: DVec3) -> f64 {
    (a - b).abs().element_sum()
}
