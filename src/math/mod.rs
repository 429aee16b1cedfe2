//! 向量 / 矩阵运算
//!
//! 所有函数都是纯函数：按值接收，返回新值，不修改参数。

mod matrix;
mod vector;

pub use matrix::{
    closest_euler, compose, decompose, euler_to_quat, mat_inverse, mat_mul, matrix_to_euler,
    quat_to_euler, Decomposed, RotateOrder,
};
pub use vector::{
    angle_between, bounding_box_center, cross_product, distance, dot_product, mean_position,
    midpoint, normalize, offset_point, rotate_about_axis, triangle_centroid, triangle_normal,
};

use glam::DVec3;

/// 归一化阈值：模长不超过此值的向量视为退化
pub const NORMALIZE_EPSILON: f64 = 1.0e-8;

/// 求逆阈值：|行列式| 低于此值的矩阵视为奇异
pub const SINGULAR_EPSILON: f64 = 1.0e-12;

/// 坐标轴
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Axis {
    #[default]
    X,
    Y,
    Z,
}

impl Axis {
    /// 从宿主的轴编号 (0, 1, 2) 转换
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::X),
            1 => Some(Self::Y),
            2 => Some(Self::Z),
            _ => None,
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Self::X => 0,
            Self::Y => 1,
            Self::Z => 2,
        }
    }

    /// 单位向量
    #[inline]
    pub fn unit(self) -> DVec3 {
        match self {
            Self::X => DVec3::X,
            Self::Y => DVec3::Y,
            Self::Z => DVec3::Z,
        }
    }
}
