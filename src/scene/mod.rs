//! 宿主场景图接口
//!
//! 求解器只通过 [`SceneHost`] 读写节点通道，不自己创建或删除绑定节点
//! （固定操作的临时节点除外）。[`SceneGraph`] 是内存中的参考实现。

mod graph;
mod node;

pub use graph::SceneGraph;
pub use node::SceneNode;

use std::fmt;

use bitflags::bitflags;
use glam::{DMat4, DQuat, DVec3};

use crate::math::{euler_to_quat, RotateOrder};
use crate::{Result, RigError};

// ============================================================================
// 节点句柄
// ============================================================================

/// 宿主节点句柄（不透明）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 节点类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum NodeKind {
    /// 普通变换节点
    #[default]
    Transform,
    /// 关节（带 joint orient）
    Joint,
    /// 平面曲面（法线为本地轴，用于 SurfaceNormal 上方向）
    Surface,
}

// ============================================================================
// 通道锁
// ============================================================================

bitflags! {
    /// 通道锁定状态
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ChannelLocks: u16 {
        const TRANSLATE_X = 1 << 0;
        const TRANSLATE_Y = 1 << 1;
        const TRANSLATE_Z = 1 << 2;
        const ROTATE_X = 1 << 3;
        const ROTATE_Y = 1 << 4;
        const ROTATE_Z = 1 << 5;
        const SCALE_X = 1 << 6;
        const SCALE_Y = 1 << 7;
        const SCALE_Z = 1 << 8;

        const TRANSLATE = Self::TRANSLATE_X.bits() | Self::TRANSLATE_Y.bits() | Self::TRANSLATE_Z.bits();
        const ROTATE = Self::ROTATE_X.bits() | Self::ROTATE_Y.bits() | Self::ROTATE_Z.bits();
        const SCALE = Self::SCALE_X.bits() | Self::SCALE_Y.bits() | Self::SCALE_Z.bits();
    }
}

impl ChannelLocks {
    /// 通道组中的三个分量 (平移 / 旋转 / 缩放)
    pub(crate) const COMPONENTS: [(Self, &'static str, usize, usize); 9] = [
        (Self::TRANSLATE_X, "translateX", 0, 0),
        (Self::TRANSLATE_Y, "translateY", 0, 1),
        (Self::TRANSLATE_Z, "translateZ", 0, 2),
        (Self::ROTATE_X, "rotateX", 1, 0),
        (Self::ROTATE_Y, "rotateY", 1, 1),
        (Self::ROTATE_Z, "rotateZ", 1, 2),
        (Self::SCALE_X, "scaleX", 2, 0),
        (Self::SCALE_Y, "scaleY", 2, 1),
        (Self::SCALE_Z, "scaleZ", 2, 2),
    ];
}

// ============================================================================
// 本地通道
// ============================================================================

/// 节点本地通道
///
/// 本地矩阵 = T * JO * R * RA * S（列向量）。非关节节点的 joint_orient 恒为零。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalChannels {
    pub translate: DVec3,
    /// 欧拉角（弧度）
    pub rotate: DVec3,
    pub rotate_order: RotateOrder,
    pub scale: DVec3,
    /// rotate axis 偏移（弧度，xyz 顺序）
    pub rotate_axis: DVec3,
    /// joint orient（弧度，xyz 顺序）
    pub joint_orient: DVec3,
}

impl Default for LocalChannels {
    fn default() -> Self {
        Self {
            translate: DVec3::ZERO,
            rotate: DVec3::ZERO,
            rotate_order: RotateOrder::Xyz,
            scale: DVec3::ONE,
            rotate_axis: DVec3::ZERO,
            joint_orient: DVec3::ZERO,
        }
    }
}

impl LocalChannels {
    /// 仅平移
    pub fn from_translation(translate: DVec3) -> Self {
        Self {
            translate,
            ..Self::default()
        }
    }

    /// 平移 + 旋转
    pub fn from_translation_rotation(translate: DVec3, rotate: DVec3, rotate_order: RotateOrder) -> Self {
        Self {
            translate,
            rotate,
            rotate_order,
            ..Self::default()
        }
    }

    #[inline]
    pub fn joint_orient_quat(&self) -> DQuat {
        euler_to_quat(self.joint_orient, RotateOrder::Xyz)
    }

    #[inline]
    pub fn rotate_axis_quat(&self) -> DQuat {
        euler_to_quat(self.rotate_axis, RotateOrder::Xyz)
    }

    /// 组合后的本地朝向 JO * R * RA
    pub fn orientation(&self) -> DQuat {
        self.joint_orient_quat() * euler_to_quat(self.rotate, self.rotate_order) * self.rotate_axis_quat()
    }

    /// 转换为本地矩阵
    #[inline]
    pub fn to_matrix(&self) -> DMat4 {
        DMat4::from_scale_rotation_translation(self.scale, self.orientation(), self.translate)
    }

    /// 旋转通道是否为零
    #[inline]
    pub fn has_identity_rotation(&self) -> bool {
        self.rotate == DVec3::ZERO
    }

    /// 缩放通道是否为一
    #[inline]
    pub fn has_identity_scale(&self) -> bool {
        self.scale == DVec3::ONE
    }

    /// 通道组的三分量，按 [`ChannelLocks::COMPONENTS`] 的组编号
    pub(crate) fn group(&self, group: usize) -> DVec3 {
        match group {
            0 => self.translate,
            1 => self.rotate,
            _ => self.scale,
        }
    }
}

// ============================================================================
// 自定义属性
// ============================================================================

/// 自定义属性类型
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeKind {
    /// 标量，写入时钳制到 [min, max]
    Scalar { min: f64, max: f64 },
    /// 枚举，值为名称下标
    Enum(Vec<String>),
}

// ============================================================================
// 宿主接口
// ============================================================================

/// 宿主场景图
///
/// 本求解器假定构建期间独占访问，不做任何加锁。
pub trait SceneHost {
    /// 节点是否存在
    fn contains(&self, node: NodeId) -> bool;

    /// 节点名称
    fn name(&self, node: NodeId) -> Option<&str>;

    fn kind(&self, node: NodeId) -> Result<NodeKind>;

    fn parent(&self, node: NodeId) -> Option<NodeId>;

    /// 子节点（按创建顺序）
    fn children(&self, node: NodeId) -> Vec<NodeId>;

    /// 世界矩阵（宿主计算，只读）
    fn world_matrix(&self, node: NodeId) -> Result<DMat4>;

    /// 父逆矩阵（根节点为单位矩阵）
    fn parent_inverse_matrix(&self, node: NodeId) -> Result<DMat4>;

    fn local_channels(&self, node: NodeId) -> Result<LocalChannels>;

    /// 写入本地通道；锁定通道的值发生变化时失败
    fn set_local_channels(&mut self, node: NodeId, channels: &LocalChannels) -> Result<()>;

    /// 创建无父级的临时节点
    fn create_transient_node(&mut self, name: &str) -> NodeId;

    fn delete_node(&mut self, node: NodeId) -> Result<()>;

    fn channel_locks(&self, node: NodeId) -> Result<ChannelLocks>;

    fn set_channel_locks(&mut self, node: NodeId, locks: ChannelLocks) -> Result<()>;

    /// 曲面上离 point 最近处的世界法线
    fn surface_normal_at(&self, surface: NodeId, point: DVec3) -> Result<DVec3> {
        let _ = point;
        Err(RigError::InvalidTarget(format!(
            "{} does not provide surface normals",
            self.display_name(surface)
        )))
    }

    /// 添加自定义属性，同名属性已存在时失败
    fn add_attribute(&mut self, node: NodeId, name: &str, kind: AttributeKind, default: f64) -> Result<()>;

    fn remove_attribute(&mut self, node: NodeId, name: &str) -> Result<()>;

    fn attribute(&self, node: NodeId, name: &str) -> Result<f64>;

    fn set_attribute(&mut self, node: NodeId, name: &str, value: f64) -> Result<()>;

    // ========================================
    // 便捷方法
    // ========================================

    /// 日志用名称
    fn display_name(&self, node: NodeId) -> String {
        match self.name(node) {
            Some(name) => name.to_string(),
            None => node.to_string(),
        }
    }

    fn is_joint(&self, node: NodeId) -> bool {
        matches!(self.kind(node), Ok(NodeKind::Joint))
    }

    /// 世界位置
    fn world_position(&self, node: NodeId) -> Result<DVec3> {
        Ok(self.world_matrix(node)?.w_axis.truncate())
    }

    /// 第 n 个子节点
    fn child(&self, node: NodeId, n: usize) -> Option<NodeId> {
        self.children(node).get(n).copied()
    }
}
