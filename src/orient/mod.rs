//! 关节定向
//!
//! - OrientSpec: 单节点定向配置（瞄准 / 上方向策略、缩放反转）
//! - pin: 定向期间固定子节点的世界变换
//! - OrientJointSolver: 求解并写回本地旋转

mod pin;
mod solver;

pub use pin::{pin, PinSession};
pub use solver::{orient_chain, orient_joint, orient_joints, OrientJointSolver, OrientReport};

use bitflags::bitflags;
use glam::DVec3;

use crate::math::{normalize, Axis};
use crate::scene::{NodeId, SceneHost};
use crate::{Result, RigError};

// ============================================================================
// 策略
// ============================================================================

/// 瞄准目标策略
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AimTarget {
    /// 节点沿世界轴偏移的合成点
    WorldAxis(Axis),
    /// 第一个子节点的位置
    Child,
    /// 父节点位置
    Parent,
    /// 沿父节点本地 +X 偏移的合成点（链末端的反向瞄准）
    LocalParent,
}

/// 上方向策略
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpTarget {
    /// 世界上方向向量
    World,
    /// 父节点旋转后的世界上方向向量
    ParentRotation,
    ChildPosition,
    ParentPosition,
    /// 三个节点构成的平面法线
    TrianglePlane,
    SecondChildPosition,
    /// 曲面法线
    SurfaceNormal,
}

/// 三角平面节点相对于被定向节点的位置
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriangleRelative {
    Grandparent,
    Parent,
    Current,
    Child,
    Grandchild,
}

impl TriangleRelative {
    /// 解析为实际节点（子 / 孙取第一个）
    pub fn resolve<H: SceneHost + ?Sized>(self, host: &H, node: NodeId) -> Option<NodeId> {
        match self {
            Self::Grandparent => host.parent(node).and_then(|p| host.parent(p)),
            Self::Parent => host.parent(node),
            Self::Current => Some(node),
            Self::Child => host.child(node, 0),
            Self::Grandchild => host.child(node, 0).and_then(|c| host.child(c, 0)),
        }
    }
}

/// 三角平面节点引用
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrianglePlane {
    /// 显式节点
    Nodes([Option<NodeId>; 3]),
    /// 求解时按被定向节点解析
    Relatives([TriangleRelative; 3]),
}

impl Default for TrianglePlane {
    fn default() -> Self {
        Self::Relatives([TriangleRelative::Parent, TriangleRelative::Current, TriangleRelative::Child])
    }
}

impl TrianglePlane {
    pub fn resolve<H: SceneHost + ?Sized>(&self, host: &H, node: NodeId) -> [Option<NodeId>; 3] {
        match self {
            Self::Nodes(nodes) => *nodes,
            Self::Relatives(relatives) => (*relatives).map(|r| r.resolve(host, node)),
        }
    }
}

bitflags! {
    /// 缩放反转轴
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct InvertScale: u8 {
        const X = 1 << 0;
        const Y = 1 << 1;
        const Z = 1 << 2;
        const XY = Self::X.bits() | Self::Y.bits();
        const XZ = Self::X.bits() | Self::Z.bits();
        const YZ = Self::Y.bits() | Self::Z.bits();
        const XYZ = Self::X.bits() | Self::Y.bits() | Self::Z.bits();
    }
}

impl InvertScale {
    /// 应用到缩放：选中的轴设为 -1
    pub fn apply(self, scale: DVec3) -> DVec3 {
        let mut scale = scale;
        for (flag, axis) in [(Self::X, 0), (Self::Y, 1), (Self::Z, 2)] {
            if self.contains(flag) {
                scale[axis] = -1.0;
            }
        }
        scale
    }
}

// ============================================================================
// 定向配置
// ============================================================================

/// 单节点定向配置
#[derive(Clone, Debug, PartialEq)]
pub struct OrientSpec {
    /// 指向目标的本地轴，默认 +X
    pub aim_vector: DVec3,
    /// 抗扭转的本地轴，默认 +Y
    pub up_vector: DVec3,
    /// World / ParentRotation 策略使用的世界上方向，默认 +Y
    pub world_up_vector: DVec3,
    pub aim_target: AimTarget,
    pub up_target: UpTarget,
    pub invert_scale: InvertScale,
    pub triangle: TrianglePlane,
    pub surface: Option<NodeId>,
    /// 冻结时是否同时冻结缩放
    pub freeze_scale: bool,
}

impl Default for OrientSpec {
    fn default() -> Self {
        Self {
            aim_vector: DVec3::X,
            up_vector: DVec3::Y,
            world_up_vector: DVec3::Y,
            aim_target: AimTarget::Child,
            up_target: UpTarget::World,
            invert_scale: InvertScale::empty(),
            triangle: TrianglePlane::default(),
            surface: None,
            freeze_scale: false,
        }
    }
}

impl OrientSpec {
    pub fn new(aim_target: AimTarget, up_target: UpTarget) -> Self {
        Self {
            aim_target,
            up_target,
            ..Self::default()
        }
    }

    pub fn with_axes(mut self, aim_vector: DVec3, up_vector: DVec3) -> Self {
        self.aim_vector = aim_vector;
        self.up_vector = up_vector;
        self
    }

    pub fn with_world_up(mut self, world_up_vector: DVec3) -> Self {
        self.world_up_vector = world_up_vector;
        self
    }

    pub fn with_invert_scale(mut self, invert_scale: InvertScale) -> Self {
        self.invert_scale = invert_scale;
        self
    }

    pub fn with_triangle(mut self, triangle: TrianglePlane) -> Self {
        self.triangle = triangle;
        self
    }

    pub fn with_surface(mut self, surface: NodeId) -> Self {
        self.surface = Some(surface);
        self
    }

    pub fn with_freeze_scale(mut self, freeze_scale: bool) -> Self {
        self.freeze_scale = freeze_scale;
        self
    }

    /// 构建期校验
    ///
    /// - 瞄准轴与上方向轴不能平行
    /// - TrianglePlane 至少要有一个节点引用（部分缺失只在求解时警告）
    /// - SurfaceNormal 需要曲面引用
    pub fn validate(&self) -> Result<()> {
        let aim = normalize(self.aim_vector)?;
        let up = normalize(self.up_vector)?;
        normalize(self.world_up_vector)?;
        if aim.cross(up).length() <= crate::config::get_config().parallel_tolerance {
            return Err(RigError::AmbiguousUpReference("orient spec axes".to_string()));
        }

        match self.up_target {
            UpTarget::TrianglePlane => {
                if let TrianglePlane::Nodes(nodes) = &self.triangle {
                    if nodes.iter().all(Option::is_none) {
                        return Err(RigError::MissingTriangleNode {
                            node: "orient spec".to_string(),
                            slot: 0,
                        });
                    }
                }
            }
            UpTarget::SurfaceNormal => {
                if self.surface.is_none() {
                    return Err(RigError::InvalidTarget(
                        "surface normal up strategy needs a surface reference".to_string(),
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }
}
