//! 绑定求解核心
//!
//! - math: 向量 / 矩阵运算（纯函数）
//! - scene: 宿主场景图接口与内存实现
//! - orient: 关节定向求解 + 子节点固定
//! - constraint: 矩阵约束 / 空间切换
//! - stretch: 拉伸链

pub mod config;
pub mod constraint;
pub mod math;
pub mod orient;
pub mod scene;
pub mod stretch;

use thiserror::Error;

pub use constraint::{
    build_constraint, build_space_switch, Aggregation, ConstraintChannels, ConstraintSource,
    MatrixConstraint, SpaceSwitch, SpaceSwitchSet, SwitchControl, SwitchMode,
};
pub use math::{Axis, RotateOrder};
pub use orient::{
    orient_chain, orient_joint, orient_joints, pin, AimTarget, InvertScale, OrientJointSolver,
    OrientReport, OrientSpec, PinSession, TrianglePlane, TriangleRelative, UpTarget,
};
pub use scene::{
    AttributeKind, ChannelLocks, LocalChannels, NodeId, NodeKind, SceneGraph, SceneHost,
};
pub use stretch::{build_stretch_chain, StretchChain, StretchDrive, StretchMode, StretchOptions};

/// 绑定求解错误
#[derive(Debug, Error)]
pub enum RigError {
    /// 零向量或接近零的向量无法归一化
    #[error("degenerate vector (magnitude {magnitude:e})")]
    DegenerateVector { magnitude: f64 },

    /// 不可逆矩阵
    #[error("singular matrix (determinant {determinant:e})")]
    SingularMatrix { determinant: f64 },

    /// 缺少父逆矩阵或必需的节点引用
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// 瞄准方向与上方向平行
    #[error("aim and up directions are parallel on '{0}'")]
    AmbiguousUpReference(String),

    /// 策略需要的子节点不存在
    #[error("'{0}' has no child required by the orient strategy")]
    MissingChild(String),

    /// 三角平面节点未设置
    #[error("triangle plane node {slot} is unset for '{node}'")]
    MissingTriangleNode { node: String, slot: usize },

    /// 写入被锁定的通道
    #[error("channel {channel} on '{node}' is locked")]
    LockedChannel { node: String, channel: &'static str },

    /// 节点不存在（已删除或句柄无效）
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
}

pub type Result<T> = std::result::Result<T, RigError>;
