//! 场景节点
//!
//! 每个 SceneNode 代表宿主层次中的一个变换节点。
//! 变换计算：local_to_world = parent.local_to_world * local_to_parent

use std::collections::HashMap;

use glam::{DMat4, DVec3};

use super::{AttributeKind, ChannelLocks, LocalChannels, NodeKind};

/// 自定义属性
#[derive(Clone, Debug, PartialEq)]
pub struct Attribute {
    pub kind: AttributeKind,
    pub value: f64,
}

/// 场景节点
#[derive(Clone, Debug)]
pub struct SceneNode {
    // ========================================
    // 静态数据
    // ========================================

    /// 节点名称（场景内唯一）
    pub name: String,

    /// 节点类型
    pub kind: NodeKind,

    /// 父节点索引
    pub(crate) parent: Option<usize>,

    /// 曲面节点的本地法线
    pub(crate) surface_normal: Option<DVec3>,

    // ========================================
    // 通道
    // ========================================

    pub(crate) channels: LocalChannels,

    pub(crate) locks: ChannelLocks,

    pub(crate) attributes: HashMap<String, Attribute>,

    // ========================================
    // 缓存（通道变化后更新）
    // ========================================

    /// 本地变换矩阵 (local_to_parent)
    pub(crate) local_to_parent: DMat4,

    /// 全局变换矩阵 (local_to_world)
    pub(crate) local_to_world: DMat4,

    /// 父节点到世界的变换
    pub(crate) parent_to_world: DMat4,
}

impl SceneNode {
    /// 创建新节点
    pub fn new(name: String, kind: NodeKind, channels: LocalChannels) -> Self {
        let mut node = Self {
            name,
            kind,
            parent: None,
            surface_normal: None,
            channels,
            locks: ChannelLocks::empty(),
            attributes: HashMap::new(),
            local_to_parent: DMat4::IDENTITY,
            local_to_world: DMat4::IDENTITY,
            parent_to_world: DMat4::IDENTITY,
        };
        node.compute_local_transform();
        node
    }

    // ========================================
    // 访问器
    // ========================================

    #[inline]
    pub fn channels(&self) -> &LocalChannels {
        &self.channels
    }

    #[inline]
    pub fn locks(&self) -> ChannelLocks {
        self.locks
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    #[inline]
    pub fn is_joint(&self) -> bool {
        self.kind == NodeKind::Joint
    }

    /// 世界位置
    #[inline]
    pub fn position(&self) -> DVec3 {
        self.local_to_world.w_axis.truncate()
    }

    #[inline]
    pub fn world_matrix(&self) -> DMat4 {
        self.local_to_world
    }

    #[inline]
    pub fn local_matrix(&self) -> DMat4 {
        self.local_to_parent
    }

    #[inline]
    pub fn parent_matrix(&self) -> DMat4 {
        self.parent_to_world
    }

    // ========================================
    // 变换计算
    // ========================================

    /// 计算本地变换 (local_to_parent)
    pub fn compute_local_transform(&mut self) {
        if self.kind != NodeKind::Joint {
            self.channels.joint_orient = DVec3::ZERO;
        }
        self.local_to_parent = self.channels.to_matrix();
    }

    /// 第一个值发生变化的锁定通道
    pub(crate) fn locked_change(&self, next: &LocalChannels) -> Option<&'static str> {
        ChannelLocks::COMPONENTS.iter().find_map(|&(flag, label, group, axis)| {
            let changed = (self.channels.group(group)[axis] - next.group(group)[axis]).abs() > 1.0e-12;
            (self.locks.contains(flag) && changed).then_some(label)
        })
    }
}
