//! 拉伸求解器
//!
//! 静止长度在构建时缓存；链移动后重新构建会得到错误的静止长度。
//! 每次求值只读取一次当前总长（根关节到末端 / 效应器的距离）。
//!
//! 测量的长度不能依赖拉伸自身的输出：
//! - 效应器必须在根关节的子树之外
//! - 缩放驱动且没有效应器时，末端位置按静止缩放重新推算
//! - 平移驱动必须指定效应器
//!
//! 缩放驱动假设驱动轴沿骨骼方向（先定向关节）。宿主的父缩放会传给子节点，
//! 所以每个关节写入的缩放要除以父段已经带来的拉伸，末端关节反向补偿，
//! 末端以下的子树不被拉伸。

use glam::{DMat4, DVec3};

use super::remap::{Curve, RemapCurve};
use crate::config::get_config;
use crate::math::{distance, mat_inverse, Axis, NORMALIZE_EPSILON};
use crate::scene::{NodeId, SceneHost};
use crate::{Result, RigError};

/// 拉伸模式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum StretchMode {
    /// 拉伸比 = 当前长度 / 静止长度
    #[default]
    Simple,
    /// 低于最小长度不拉伸，之后经过阻尼区平滑过渡
    SoftClamped,
}

/// 拉伸驱动方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum StretchDrive {
    /// 缩放每个段起点关节的驱动轴
    #[default]
    Scale,
    /// 缩放每个段终点关节沿驱动轴的平移
    Translate,
}

/// 拉伸选项
#[derive(Clone, Debug, PartialEq)]
pub struct StretchOptions {
    /// 驱动轴（沿骨骼方向）
    pub axis: Axis,
    pub drive: StretchDrive,
    /// 最小长度，缺省为静止长度（仅软限制模式）
    pub min_length: Option<f64>,
    /// 阻尼区边界，缺省为 静止长度 × soft_boundary_factor（仅软限制模式）
    pub boundary_length: Option<f64>,
    /// 每段的手动倍数，空表示全部为 1
    pub offsets: Vec<f64>,
    /// 总开关混合，0 = 不拉伸，1 = 完全拉伸
    pub blend: f64,
    /// 测量长度的末端节点，不能位于根关节的子树内。
    /// 缺省为链的最后一个关节（仅缩放驱动）
    pub effector: Option<NodeId>,
}

impl Default for StretchOptions {
    fn default() -> Self {
        Self {
            axis: Axis::X,
            drive: StretchDrive::Scale,
            min_length: None,
            boundary_length: None,
            offsets: Vec::new(),
            blend: 1.0,
            effector: None,
        }
    }
}

/// 拉伸链
#[derive(Clone, Debug)]
pub struct StretchChain {
    joints: Vec<NodeId>,
    mode: StretchMode,
    options: StretchOptions,
    /// 每段静止长度
    rest_lengths: Vec<f64>,
    rest_length: f64,
    /// 每个关节构建时的缩放
    rest_scales: Vec<DVec3>,
    /// 段终点关节构建时的平移
    rest_translates: Vec<DVec3>,
    min_length: f64,
    boundary_length: f64,
    curve: Option<RemapCurve>,
}

impl StretchChain {
    /// 构建拉伸链，缓存静止长度
    pub fn build<H: SceneHost + ?Sized>(
        host: &H,
        joints: &[NodeId],
        mode: StretchMode,
        options: StretchOptions,
    ) -> Result<Self> {
        if joints.len() < 2 {
            return Err(RigError::InvalidTarget(format!(
                "stretch chain needs at least 2 joints, got {}",
                joints.len()
            )));
        }
        let segments = joints.len() - 1;
        if !options.offsets.is_empty() && options.offsets.len() != segments {
            return Err(RigError::InvalidTarget(format!(
                "{} stretch offsets for {} segments",
                options.offsets.len(),
                segments
            )));
        }

        let positions = joints
            .iter()
            .map(|&joint| host.world_position(joint))
            .collect::<Result<Vec<_>>>()?;
        let rest_lengths: Vec<f64> = positions.windows(2).map(|w| distance(w[0], w[1])).collect();
        let rest_length: f64 = rest_lengths.iter().sum();
        if rest_length <= NORMALIZE_EPSILON {
            return Err(RigError::DegenerateVector { magnitude: rest_length });
        }

        match options.effector {
            Some(effector) => {
                if effector == joints[0] || is_descendant(host, effector, joints[0]) {
                    return Err(RigError::InvalidTarget(format!(
                        "stretch effector {} is driven by the chain under {}",
                        host.display_name(effector),
                        host.display_name(joints[0])
                    )));
                }
            }
            None if options.drive == StretchDrive::Translate => {
                return Err(RigError::InvalidTarget(format!(
                    "translate stretch on {} needs an effector outside the chain",
                    host.display_name(joints[0])
                )));
            }
            None => {}
        }

        let rest_scales = joints
            .iter()
            .map(|&joint| host.local_channels(joint).map(|c| c.scale))
            .collect::<Result<Vec<_>>>()?;
        let rest_translates = joints[1..]
            .iter()
            .map(|&joint| host.local_channels(joint).map(|c| c.translate))
            .collect::<Result<Vec<_>>>()?;

        let config = get_config();
        let min_length = options.min_length.unwrap_or(rest_length);
        let boundary_length = options
            .boundary_length
            .unwrap_or(rest_length * config.soft_boundary_factor);
        let curve = match mode {
            StretchMode::Simple => None,
            StretchMode::SoftClamped => Some(RemapCurve::soft_clamp(
                rest_length,
                min_length,
                boundary_length,
                config.damp_fraction,
            )?),
        };

        if config.debug_log {
            log::info!(
                "[Stretch] {} 拉伸链: {} 段, 静止长度 {:.4} ({:?})",
                host.display_name(joints[0]),
                segments,
                rest_length,
                mode
            );
        }

        Ok(Self {
            joints: joints.to_vec(),
            mode,
            options,
            rest_lengths,
            rest_length,
            rest_scales,
            rest_translates,
            min_length,
            boundary_length,
            curve,
        })
    }

    #[inline]
    pub fn joints(&self) -> &[NodeId] {
        &self.joints
    }

    #[inline]
    pub fn mode(&self) -> StretchMode {
        self.mode
    }

    #[inline]
    pub fn options(&self) -> &StretchOptions {
        &self.options
    }

    #[inline]
    pub fn rest_lengths(&self) -> &[f64] {
        &self.rest_lengths
    }

    /// 静止总长
    #[inline]
    pub fn rest_length(&self) -> f64 {
        self.rest_length
    }

    #[inline]
    pub fn min_length(&self) -> f64 {
        self.min_length
    }

    #[inline]
    pub fn boundary_length(&self) -> f64 {
        self.boundary_length
    }

    /// 软限制曲线（简单模式为 None）
    #[inline]
    pub fn curve(&self) -> Option<&RemapCurve> {
        self.curve.as_ref()
    }

    /// 当前总长：根关节到末端的直线距离
    ///
    /// 没有效应器时测量的是去掉拉伸后的末端关节位置，重复 apply 结果不变。
    pub fn current_length<H: SceneHost + ?Sized>(&self, host: &H) -> Result<f64> {
        let root = host.world_position(self.joints[0])?;
        let end = match self.options.effector {
            Some(effector) => host.world_position(effector)?,
            None => self.unstretched_end(host)?,
        };
        Ok(distance(root, end))
    }

    /// 把链上每个关节的缩放换回静止值后，末端关节的世界位置
    fn unstretched_end<H: SceneHost + ?Sized>(&self, host: &H) -> Result<DVec3> {
        // 上一个关节的 (当前世界矩阵, 静止世界矩阵)
        let mut previous: Option<(DMat4, DMat4)> = None;
        for (&joint, &rest_scale) in self.joints.iter().zip(&self.rest_scales) {
            let parent_inverse = host.parent_inverse_matrix(joint)?;
            let rest_parent = match previous {
                // 上一个关节到当前关节父级之间的矩阵保持不变
                Some((world, rest_world)) => rest_world * mat_inverse(parent_inverse * world)?,
                None => mat_inverse(parent_inverse)?,
            };
            let mut channels = host.local_channels(joint)?;
            channels.scale = rest_scale;
            previous = Some((host.world_matrix(joint)?, rest_parent * channels.to_matrix()));
        }
        let (_, rest_end) = previous.ok_or_else(|| RigError::InvalidTarget("empty stretch chain".to_string()))?;
        Ok(rest_end.w_axis.truncate())
    }

    /// 长度对应的拉伸比（含总开关混合，不含每段倍数）
    pub fn ratio(&self, length: f64) -> f64 {
        let stretch = match (&self.curve, self.mode) {
            (Some(curve), StretchMode::SoftClamped) => {
                if length <= self.min_length {
                    1.0
                } else {
                    curve.value(length)
                }
            }
            _ => length / self.rest_length,
        };

        let blend = self.options.blend;
        if blend >= 1.0 {
            stretch
        } else {
            1.0 + blend.max(0.0) * (stretch - 1.0)
        }
    }

    /// 每段的拉伸比
    pub fn evaluate<H: SceneHost + ?Sized>(&self, host: &H) -> Result<Vec<f64>> {
        let ratio = self.ratio(self.current_length(host)?);
        Ok((0..self.rest_lengths.len())
            .map(|i| ratio * self.options.offsets.get(i).copied().unwrap_or(1.0))
            .collect())
    }

    /// 求值并写回驱动通道，返回每段的拉伸比
    ///
    /// 缩放驱动时关节 i 写入 静止缩放 × ratio[i] / ratio[i-1]，
    /// 世界空间中每段长度正好是 拉伸前长度 × ratio[i]。
    pub fn apply<H: SceneHost + ?Sized>(&self, host: &mut H) -> Result<Vec<f64>> {
        let ratios = self.evaluate(&*host)?;
        let axis = self.options.axis.index();

        let mut writes = Vec::with_capacity(self.joints.len());
        match self.options.drive {
            StretchDrive::Scale => {
                if let Some(&ratio) = ratios.iter().find(|r| r.is_nan() || **r <= NORMALIZE_EPSILON) {
                    return Err(RigError::DegenerateVector { magnitude: ratio });
                }
                let mut inherited = 1.0;
                for (i, &joint) in self.joints.iter().enumerate() {
                    let ratio = ratios.get(i).copied().unwrap_or(1.0);
                    let mut channels = host.local_channels(joint)?;
                    channels.scale[axis] = self.rest_scales[i][axis] * ratio / inherited;
                    inherited = ratio;
                    writes.push((joint, channels));
                }
            }
            StretchDrive::Translate => {
                for (i, &ratio) in ratios.iter().enumerate() {
                    let joint = self.joints[i + 1];
                    let mut channels = host.local_channels(joint)?;
                    channels.translate[axis] = self.rest_translates[i][axis] * ratio;
                    writes.push((joint, channels));
                }
            }
        }
        for (joint, channels) in &writes {
            host.set_local_channels(*joint, channels)?;
        }

        if get_config().debug_log {
            log::debug!("[Stretch] {} 拉伸比 {:?}", host.display_name(self.joints[0]), ratios);
        }
        Ok(ratios)
    }
}

/// node 是否位于 ancestor 的子树内（不含 ancestor 自身）
fn is_descendant<H: SceneHost + ?Sized>(host: &H, node: NodeId, ancestor: NodeId) -> bool {
    let mut current = host.parent(node);
    while let Some(parent) = current {
        if parent == ancestor {
            return true;
        }
        current = host.parent(parent);
    }
    false
}

/// 构建拉伸链
pub fn build_stretch_chain<H: SceneHost + ?Sized>(
    host: &H,
    joints: &[NodeId],
    mode: StretchMode,
    options: StretchOptions,
) -> Result<StretchChain> {
    StretchChain::build(host, joints, mode, options)
}
