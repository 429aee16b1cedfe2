//! 重映射曲线
//!
//! 分段曲线，用于拉伸软限制的阻尼区。每段的插值方式由段起点决定。

use crate::{Result, RigError};

/// 曲线 trait
pub trait Curve {
    fn value(&self, x: f64) -> f64;
}

/// 段插值方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Interpolation {
    #[default]
    Linear,
    /// 三次缓入 y0 + (y1 - y0) * t³
    CubicEase,
}

/// 控制点
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RemapPoint {
    pub position: f64,
    pub value: f64,
    /// 从该点到下一个点的插值方式
    pub interpolation: Interpolation,
}

impl RemapPoint {
    pub fn new(position: f64, value: f64, interpolation: Interpolation) -> Self {
        Self {
            position,
            value,
            interpolation,
        }
    }
}

/// 分段重映射曲线
///
/// - 第一个控制点之前取第一个点的值
/// - 最后一个控制点之后按最后一段的斜率线性外推
/// - 恰好落在控制点上时返回该点的值（不经过插值运算）
#[derive(Debug, Clone, PartialEq)]
pub struct RemapCurve {
    points: Vec<RemapPoint>,
}

impl RemapCurve {
    /// 创建曲线，控制点按位置排序，位置必须互不相同
    pub fn new(mut points: Vec<RemapPoint>) -> Result<Self> {
        if points.len() < 2 {
            return Err(RigError::InvalidTarget(format!(
                "remap curve needs at least 2 points, got {}",
                points.len()
            )));
        }
        if points.iter().any(|p| !p.position.is_finite() || !p.value.is_finite()) {
            return Err(RigError::InvalidTarget("remap curve point is not finite".to_string()));
        }
        points.sort_unstable_by(|a, b| a.position.total_cmp(&b.position));
        if points.windows(2).any(|w| w[0].position == w[1].position) {
            return Err(RigError::InvalidTarget("remap curve positions must be distinct".to_string()));
        }
        Ok(Self { points })
    }

    /// 拉伸软限制曲线（长度 → 拉伸比）
    ///
    /// 四个控制点，K = min + damp_fraction * (boundary - min)：
    ///
    /// ```text
    /// P0 = (min,            1)                                   三次缓入
    /// P1 = (K,              1 + damp_fraction³ * (boundary/rest - 1))   线性
    /// P2 = (boundary,       boundary / rest)                      线性
    /// P3 = (2*boundary-min, (2*boundary-min) / rest)
    /// ```
    ///
    /// 边界之后拉伸比等于 长度 / rest，与简单模式一致。
    pub fn soft_clamp(rest: f64, min: f64, boundary: f64, damp_fraction: f64) -> Result<Self> {
        if !(rest > 0.0) {
            return Err(RigError::DegenerateVector { magnitude: rest });
        }
        if !(min < boundary) {
            return Err(RigError::InvalidTarget(format!(
                "soft clamp min length {} must be below boundary {}",
                min, boundary
            )));
        }
        let f = damp_fraction.clamp(0.0, 1.0);
        let knee = min + f * (boundary - min);
        let stretched = boundary / rest;
        let far = 2.0 * boundary - min;

        Self::new(vec![
            RemapPoint::new(min, 1.0, Interpolation::CubicEase),
            RemapPoint::new(knee, 1.0 + f.powi(3) * (stretched - 1.0), Interpolation::Linear),
            RemapPoint::new(boundary, stretched, Interpolation::Linear),
            RemapPoint::new(far, far / rest, Interpolation::Linear),
        ])
    }

    #[inline]
    pub fn points(&self) -> &[RemapPoint] {
        &self.points
    }
}

impl Curve for RemapCurve {
    fn value(&self, x: f64) -> f64 {
        let points = &self.points;
        let first = points[0];
        if x.is_nan() || x <= first.position {
            return first.value;
        }
        if let Some(point) = points.iter().find(|p| p.position == x) {
            return point.value;
        }

        let last = points[points.len() - 1];
        if x >= last.position {
            let prev = points[points.len() - 2];
            let slope = (last.value - prev.value) / (last.position - prev.position);
            return last.value + slope * (x - last.position);
        }

        // first.position < x < last.position
        let i = points.partition_point(|p| p.position <= x) - 1;
        let (a, b) = (points[i], points[i + 1]);
        let t = (x - a.position) / (b.position - a.position);
        let eased = match a.interpolation {
            Interpolation::Linear => t,
            Interpolation::CubicEase => t * t * t,
        };
        a.value + (b.value - a.value) * eased
    }
}
