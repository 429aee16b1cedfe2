//! 矩阵约束
//!
//! - matrix_constraint: 单源矩阵约束（偏移 × 源世界矩阵 × 目标父逆矩阵）
//! - space_switch: 多源空间切换（离散选择 / 加权混合）

mod matrix_constraint;
mod space_switch;

pub use matrix_constraint::{build_constraint, ConstraintSource, MatrixConstraint};
pub use space_switch::{
    build_space_switch, Aggregation, SpaceSwitch, SpaceSwitchSet, SwitchControl, SwitchMode,
};

use bitflags::bitflags;

bitflags! {
    /// 约束写回的通道组
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ConstraintChannels: u8 {
        const TRANSLATE = 1 << 0;
        const ROTATE = 1 << 1;
        const SCALE = 1 << 2;
        const ALL = Self::TRANSLATE.bits() | Self::ROTATE.bits() | Self::SCALE.bits();
    }
}

impl Default for ConstraintChannels {
    fn default() -> Self {
        Self::ALL
    }
}
