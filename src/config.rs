//! 绑定求解配置
//!
//! 所有参数扁平化，直接在代码中修改默认值即可。
//! 数值稳定性阈值（归一化 1e-8、行列式 1e-12）是常量，不在这里。

use once_cell::sync::Lazy;
use std::f64::consts::PI;
use std::sync::RwLock;

/// 绑定求解配置（扁平化，不嵌套）
#[derive(Debug, Clone)]
pub struct RigConfig {
    // ========== 定向 ==========
    /// 世界轴 / 父级本地轴合成目标点的距离，默认 1.0
    pub world_axis_offset: f64,
    /// 上方向在瞄准方向垂直面上的投影长度低于此值视为平行，默认 1e-6
    pub parallel_tolerance: f64,

    // ========== 空间切换 ==========
    /// 自适应聚合：源之间最大夹角（弧度）不超过此值时用矩阵加权和，默认 π/6
    pub blend_angle_threshold: f64,

    // ========== 拉伸 ==========
    /// 软限制曲线中三次缓动段占 [min_length, boundary] 的比例，默认 0.7
    pub damp_fraction: f64,
    /// 未指定边界时，边界长度 = 静止长度 × 此值，默认 1.5
    pub soft_boundary_factor: f64,

    // ========== 调试 ==========
    /// 是否输出调试日志，默认 false
    pub debug_log: bool,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            // ====== 定向 ======
            world_axis_offset: 1.0,
            parallel_tolerance: 1.0e-6,

            // ====== 空间切换 ======
            // 超过 30° 时矩阵逐元素相加会明显缩短旋转轴，改用四元数混合
            blend_angle_threshold: PI / 6.0,

            // ====== 拉伸 ======
            damp_fraction: 0.7,
            soft_boundary_factor: 1.5,

            // ====== 调试 ======
            debug_log: false,
        }
    }
}

/// 全局配置实例
static RIG_CONFIG: Lazy<RwLock<RigConfig>> = Lazy::new(|| RwLock::new(RigConfig::default()));

/// 获取当前配置（只读）
pub fn get_config() -> RigConfig {
    RIG_CONFIG.read().unwrap_or_else(|e| e.into_inner()).clone()
}

/// 手动设置配置（用于运行时调试）
pub fn set_config(config: RigConfig) {
    *RIG_CONFIG.write().unwrap_or_else(|e| e.into_inner()) = config;
}

/// 重置为默认配置
pub fn reset_config() {
    *RIG_CONFIG.write().unwrap_or_else(|e| e.into_inner()) = RigConfig::default();
}
