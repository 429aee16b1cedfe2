//! 向量运算

use glam::{DQuat, DVec3};

use super::NORMALIZE_EPSILON;
use crate::{Result, RigError};

/// 两点距离
#[inline]
pub fn distance(a: DVec3, b: DVec3) -> f64 {
    (b - a).length()
}

/// 两点中点
#[inline]
pub fn midpoint(a: DVec3, b: DVec3) -> DVec3 {
    (a + b) * 0.5
}

/// 归一化
///
/// 模长不超过 [`NORMALIZE_EPSILON`] 时返回 `DegenerateVector`，不会静默返回零向量。
pub fn normalize(v: DVec3) -> Result<DVec3> {
    let magnitude = v.length();
    if !magnitude.is_finite() || magnitude <= NORMALIZE_EPSILON {
        return Err(RigError::DegenerateVector { magnitude });
    }
    Ok(v / magnitude)
}

#[inline]
pub fn dot_product(a: DVec3, b: DVec3) -> f64 {
    a.dot(b)
}

/// 叉积，`normalize` 为真时对结果归一化（平行输入会得到 `DegenerateVector`）
pub fn cross_product(a: DVec3, b: DVec3, normalize_result: bool) -> Result<DVec3> {
    let c = a.cross(b);
    if normalize_result {
        normalize(c)
    } else {
        Ok(c)
    }
}

/// 两向量夹角（弧度）
pub fn angle_between(a: DVec3, b: DVec3) -> Result<f64> {
    let a = normalize(a)?;
    let b = normalize(b)?;
    // 浮点误差可能让点积略超出 [-1, 1]，acos 会得到 NaN
    Ok(a.dot(b).clamp(-1.0, 1.0).acos())
}

/// 绕轴旋转向量（右手法则）
pub fn rotate_about_axis(v: DVec3, axis: DVec3, angle: f64) -> Result<DVec3> {
    let axis = normalize(axis)?;
    Ok(DQuat::from_axis_angle(axis, angle) * v)
}

/// 沿方向偏移一个点
pub fn offset_point(point: DVec3, direction: DVec3, length: f64) -> Result<DVec3> {
    Ok(point + normalize(direction)? * length)
}

/// 点集平均位置，空集返回 None
pub fn mean_position(points: &[DVec3]) -> Option<DVec3> {
    if points.is_empty() {
        return None;
    }
    let sum = points.iter().fold(DVec3::ZERO, |acc, p| acc + *p);
    Some(sum / points.len() as f64)
}

/// 轴对齐包围盒中心，空集返回 None
pub fn bounding_box_center(points: &[DVec3]) -> Option<DVec3> {
    let first = *points.first()?;
    let (min, max) = points
        .iter()
        .fold((first, first), |(min, max), p| (min.min(*p), max.max(*p)));
    Some(midpoint(min, max))
}

/// 三角形重心
#[inline]
pub fn triangle_centroid(a: DVec3, b: DVec3, c: DVec3) -> DVec3 {
    (a + b + c) / 3.0
}

/// 三角形法线 (b - a) × (c - a)，共线时返回 `DegenerateVector`
pub fn triangle_normal(a: DVec3, b: DVec3, c: DVec3) -> Result<DVec3> {
    cross_product(b - a, c - a, true)
}
