//! 矩阵约束
//!
//! 列向量形式的合成顺序（从右向左应用）：
//!
//! ```text
//! local = targetParentInverse * sourceWorld * offset * localOrient
//! offset = sourceWorld(bind)^-1 * targetWorld(bind)   (保持偏移时)
//! ```
//!
//! 目标是带 joint orient 的关节时，分解出的旋转先去掉 joint orient 再写回 rotate，
//! 避免重复叠加静止姿态。

use glam::{DMat3, DMat4, DQuat, DVec3};

use super::ConstraintChannels;
use crate::config::get_config;
use crate::math::{closest_euler, decompose, mat_inverse, quat_to_euler, NORMALIZE_EPSILON};
use crate::scene::{LocalChannels, NodeId, SceneHost};
use crate::{Result, RigError};

// ============================================================================
// 约束源
// ============================================================================

/// 约束源
///
/// 偏移矩阵只在绑定时计算一次，之后不可修改；切换保持偏移需要重新绑定。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConstraintSource {
    node: NodeId,
    maintain_offset: bool,
    offset: DMat4,
}

impl ConstraintSource {
    /// 按当前世界矩阵绑定源
    pub fn bind<H: SceneHost + ?Sized>(
        host: &H,
        source: NodeId,
        target: NodeId,
        maintain_offset: bool,
    ) -> Result<Self> {
        let source_world = host.world_matrix(source)?;
        let offset = if maintain_offset {
            mat_inverse(source_world)? * host.world_matrix(target)?
        } else {
            DMat4::IDENTITY
        };
        Ok(Self {
            node: source,
            maintain_offset,
            offset,
        })
    }

    #[inline]
    pub fn node(&self) -> NodeId {
        self.node
    }

    #[inline]
    pub fn maintain_offset(&self) -> bool {
        self.maintain_offset
    }

    #[inline]
    pub fn offset(&self) -> DMat4 {
        self.offset
    }

    /// 该源驱动下目标的本地矩阵
    pub fn local_matrix<H: SceneHost + ?Sized>(&self, host: &H, target: NodeId) -> Result<DMat4> {
        let parent_inverse = parent_inverse_of(host, target)?;
        Ok(parent_inverse * host.world_matrix(self.node)? * self.offset)
    }
}

/// 目标的父逆矩阵；目标不存在时为 InvalidTarget
pub(crate) fn parent_inverse_of<H: SceneHost + ?Sized>(host: &H, target: NodeId) -> Result<DMat4> {
    host.parent_inverse_matrix(target).map_err(|err| match err {
        RigError::UnknownNode(node) => {
            RigError::InvalidTarget(format!("no parent inverse matrix for {}", node))
        }
        other => other,
    })
}

// ============================================================================
// 矩阵约束
// ============================================================================

/// 单源矩阵约束
#[derive(Clone, Debug)]
pub struct MatrixConstraint {
    target: NodeId,
    source: ConstraintSource,
    /// 额外的本地朝向偏移（最先作用于目标），默认单位矩阵
    local_orient: DMat4,
    /// 是否分解写回目标通道
    decompose: bool,
    channels: ConstraintChannels,
}

impl MatrixConstraint {
    /// 创建约束
    pub fn build<H: SceneHost + ?Sized>(
        host: &H,
        source: NodeId,
        target: NodeId,
        maintain_offset: bool,
        decompose: bool,
    ) -> Result<Self> {
        if source == target {
            return Err(RigError::InvalidTarget(format!(
                "{} cannot constrain itself",
                host.display_name(target)
            )));
        }
        parent_inverse_of(host, target)?;
        let source = ConstraintSource::bind(host, source, target, maintain_offset)?;

        if get_config().debug_log {
            log::debug!(
                "[Constraint] {} -> {} (maintain_offset={}, decompose={})",
                host.display_name(source.node),
                host.display_name(target),
                maintain_offset,
                decompose
            );
        }

        Ok(Self {
            target,
            source,
            local_orient: DMat4::IDENTITY,
            decompose,
            channels: ConstraintChannels::ALL,
        })
    }

    pub fn with_local_orient(mut self, local_orient: DMat4) -> Self {
        self.local_orient = local_orient;
        self
    }

    pub fn with_channels(mut self, channels: ConstraintChannels) -> Self {
        self.channels = channels;
        self
    }

    #[inline]
    pub fn target(&self) -> NodeId {
        self.target
    }

    #[inline]
    pub fn source(&self) -> &ConstraintSource {
        &self.source
    }

    #[inline]
    pub fn channels(&self) -> ConstraintChannels {
        self.channels
    }

    #[inline]
    pub fn decomposes(&self) -> bool {
        self.decompose
    }

    /// 目标的本地矩阵
    pub fn evaluate<H: SceneHost + ?Sized>(&self, host: &H) -> Result<DMat4> {
        Ok(self.source.local_matrix(host, self.target)? * self.local_orient)
    }

    /// 求值；开启分解时写回目标通道
    pub fn apply<H: SceneHost + ?Sized>(&self, host: &mut H) -> Result<DMat4> {
        let local = self.evaluate(&*host)?;
        if self.decompose {
            write_local_matrix(host, self.target, local, self.channels)?;
        }
        Ok(local)
    }
}

/// 创建矩阵约束
pub fn build_constraint<H: SceneHost + ?Sized>(
    host: &H,
    source: NodeId,
    target: NodeId,
    maintain_offset: bool,
    decompose: bool,
) -> Result<MatrixConstraint> {
    MatrixConstraint::build(host, source, target, maintain_offset, decompose)
}

// ============================================================================
// 分解写回
// ============================================================================

/// 把本地矩阵分解写回目标通道
///
/// - 旋转写回 rotate = JO^-1 * q * RA^-1，按目标的旋转顺序取最接近当前值的欧拉角
/// - 不写缩放时，旋转按目标当前缩放提取（保留镜像缩放下的朝向）
/// - 未选中的通道组保持不变
pub(crate) fn write_local_matrix<H: SceneHost + ?Sized>(
    host: &mut H,
    target: NodeId,
    local: DMat4,
    channels: ConstraintChannels,
) -> Result<LocalChannels> {
    let current = host.local_channels(target)?;
    let order = current.rotate_order;
    let parts = decompose(local, order)?;

    let mut next = current;
    if channels.contains(ConstraintChannels::TRANSLATE) {
        next.translate = parts.translate;
    }
    if channels.contains(ConstraintChannels::ROTATE) {
        let rotation = if channels.contains(ConstraintChannels::SCALE) {
            parts.rotation
        } else {
            rotation_for_scale(local, current.scale).unwrap_or(parts.rotation)
        };
        let rotate = current.joint_orient_quat().inverse() * rotation * current.rotate_axis_quat().inverse();
        next.rotate = closest_euler(quat_to_euler(rotate, order), current.rotate, order);
    }
    if channels.contains(ConstraintChannels::SCALE) {
        next.scale = parts.scale;
    }

    host.set_local_channels(target, &next)?;
    Ok(next)
}

/// 假定缩放为 scale 时矩阵的旋转部分
///
/// 缩放分量接近零，或缩放符号与矩阵手性不一致时返回 None。
fn rotation_for_scale(m: DMat4, scale: DVec3) -> Option<DQuat> {
    if scale.abs().min_element() <= NORMALIZE_EPSILON {
        return None;
    }
    let m3 = DMat3::from_mat4(m);
    if m3.determinant() * scale.x * scale.y * scale.z <= 0.0 {
        return None;
    }
    let x = (m3.x_axis / scale.x).try_normalize()?;
    let y = (m3.y_axis / scale.y).try_normalize()?;
    // 重新正交化
    let z = x.cross(y).try_normalize()?;
    let y = z.cross(x);
    Some(DQuat::from_mat3(&DMat3::from_cols(x, y, z)).normalize())
}
