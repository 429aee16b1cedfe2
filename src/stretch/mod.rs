//! 拉伸链
//!
//! - remap: 分段重映射曲线（软限制阻尼区）
//! - solver: 按链长驱动关节缩放或平移

mod remap;
mod solver;

pub use remap::{Curve, Interpolation, RemapCurve, RemapPoint};
pub use solver::{build_stretch_chain, StretchChain, StretchDrive, StretchMode, StretchOptions};
