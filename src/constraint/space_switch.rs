//! 空间切换
//!
//! 一个目标节点由多个候选父空间（约束源）之一驱动，或由所有源加权混合驱动。
//! 选择 / 权重可以挂到宿主节点的自定义属性上，每次求值时重新读取。

use std::collections::HashMap;

use glam::{DMat4, DQuat, DVec3};

use super::matrix_constraint::{parent_inverse_of, write_local_matrix};
use super::{ConstraintChannels, ConstraintSource};
use crate::config::get_config;
use crate::math::{decompose, RotateOrder, SINGULAR_EPSILON};
use crate::scene::{AttributeKind, LocalChannels, NodeId, SceneHost};
use crate::{Result, RigError};

/// 切换模式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SwitchMode {
    /// 只取选中的一个源
    #[default]
    Discrete,
    /// 所有源按权重混合
    Weighted,
}

/// 加权模式的聚合方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Aggregation {
    /// 矩阵逐元素加权求和（小角度差下近似有效）
    #[default]
    MatrixSum,
    /// 平移 / 缩放加权平均，旋转逐个球面插值
    QuaternionBlend,
    /// 源之间最大夹角不超过阈值时用 MatrixSum，否则 QuaternionBlend
    Adaptive,
}

/// 宿主上的切换控制属性
#[derive(Clone, Debug, PartialEq)]
pub struct SwitchControl {
    pub node: NodeId,
    /// 离散模式为枚举属性名；加权模式为权重属性名前缀
    pub attribute: String,
    /// 每个源的显示名称
    pub names: Vec<String>,
}

impl SwitchControl {
    /// 加权模式下第 index 个源的权重属性名
    pub fn weight_attribute(&self, index: usize) -> Option<String> {
        self.names
            .get(index)
            .map(|name| format!("{}_{}", self.attribute, name))
    }
}

// ============================================================================
// 空间切换
// ============================================================================

/// 空间切换
#[derive(Clone, Debug)]
pub struct SpaceSwitch {
    target: NodeId,
    sources: Vec<ConstraintSource>,
    mode: SwitchMode,
    aggregation: Aggregation,
    maintain_offset: bool,
    /// 离散模式的选择（无控制属性时使用）
    selected: usize,
    /// 加权模式的权重（无控制属性时使用），互相独立，不要求和为 1
    weights: Vec<f64>,
    control: Option<SwitchControl>,
}

impl SpaceSwitch {
    /// 创建空间切换
    ///
    /// 默认选中最后一个源；加权模式下最后一个源权重为 1，其余为 0。
    pub fn build<H: SceneHost + ?Sized>(
        host: &H,
        sources: &[NodeId],
        target: NodeId,
        mode: SwitchMode,
        maintain_offset: bool,
    ) -> Result<Self> {
        if sources.is_empty() {
            return Err(RigError::InvalidTarget(format!(
                "space switch on {} needs at least one source",
                host.display_name(target)
            )));
        }
        parent_inverse_of(host, target)?;

        let sources = sources
            .iter()
            .map(|&source| bind_source(host, source, target, maintain_offset))
            .collect::<Result<Vec<_>>>()?;
        let last = sources.len() - 1;
        let weights = (0..sources.len()).map(|i| if i == last { 1.0 } else { 0.0 }).collect();

        if get_config().debug_log {
            log::info!(
                "[SpaceSwitch] {} 创建 ({:?}, {} 个源)",
                host.display_name(target),
                mode,
                sources.len()
            );
        }

        Ok(Self {
            target,
            sources,
            mode,
            aggregation: Aggregation::default(),
            maintain_offset,
            selected: last,
            weights,
            control: None,
        })
    }

    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    #[inline]
    pub fn target(&self) -> NodeId {
        self.target
    }

    #[inline]
    pub fn mode(&self) -> SwitchMode {
        self.mode
    }

    #[inline]
    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    #[inline]
    pub fn control(&self) -> Option<&SwitchControl> {
        self.control.as_ref()
    }

    /// 源节点（按添加顺序）
    pub fn sources(&self) -> Vec<NodeId> {
        self.sources.iter().map(ConstraintSource::node).collect()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// 追加源，已有源保持不变
    ///
    /// 已创建控制属性时同步扩展：枚举加一项（保留当前值），加权模式新增一个权重属性（值 0）。
    /// 没有控制属性时离散选择移到新源。返回新源的下标。
    pub fn add_source<H: SceneHost + ?Sized>(&mut self, host: &mut H, source: NodeId) -> Result<usize> {
        let bound = bind_source(&*host, source, self.target, self.maintain_offset)?;
        let name = host.display_name(source);

        if let Some(control) = &self.control {
            let mut names = control.names.clone();
            names.push(name.clone());
            match self.mode {
                SwitchMode::Discrete => {
                    let value = host.attribute(control.node, &control.attribute)?;
                    host.remove_attribute(control.node, &control.attribute)?;
                    host.add_attribute(control.node, &control.attribute, AttributeKind::Enum(names), value)?;
                }
                SwitchMode::Weighted => {
                    let attribute = format!("{}_{}", control.attribute, name);
                    host.add_attribute(control.node, &attribute, weight_kind(), 0.0)?;
                }
            }
        }

        match &mut self.control {
            Some(control) => control.names.push(name),
            None => self.selected = self.sources.len(),
        }
        self.sources.push(bound);
        self.weights.push(0.0);

        if get_config().debug_log {
            log::info!(
                "[SpaceSwitch] {} 追加源 {}",
                host.display_name(self.target),
                host.display_name(source)
            );
        }
        Ok(self.sources.len() - 1)
    }

    /// 在宿主节点上创建控制属性
    ///
    /// names 为空时使用源节点名称。离散模式创建一个枚举属性，
    /// 加权模式为每个源创建 `{attribute}_{name}` 标量属性。
    pub fn create_control<H: SceneHost + ?Sized>(
        &mut self,
        host: &mut H,
        node: NodeId,
        attribute: &str,
        names: &[&str],
    ) -> Result<()> {
        if self.control.is_some() {
            return Err(RigError::InvalidTarget(format!(
                "space switch on {} already has a control",
                host.display_name(self.target)
            )));
        }
        let names: Vec<String> = if names.is_empty() {
            self.sources.iter().map(|s| host.display_name(s.node())).collect()
        } else if names.len() == self.sources.len() {
            names.iter().map(|n| n.to_string()).collect()
        } else {
            return Err(RigError::InvalidTarget(format!(
                "{} control names for {} sources",
                names.len(),
                self.sources.len()
            )));
        };

        let control = SwitchControl {
            node,
            attribute: attribute.to_string(),
            names,
        };
        match self.mode {
            SwitchMode::Discrete => {
                host.add_attribute(
                    node,
                    attribute,
                    AttributeKind::Enum(control.names.clone()),
                    self.selected as f64,
                )?;
            }
            SwitchMode::Weighted => {
                for (index, weight) in self.weights.iter().enumerate() {
                    if let Some(name) = control.weight_attribute(index) {
                        host.add_attribute(node, &name, weight_kind(), *weight)?;
                    }
                }
            }
        }
        self.control = Some(control);
        Ok(())
    }

    /// 选择源（离散模式）
    pub fn select<H: SceneHost + ?Sized>(&mut self, host: &mut H, index: usize) -> Result<()> {
        self.check_index(index)?;
        if let (Some(control), SwitchMode::Discrete) = (&self.control, self.mode) {
            host.set_attribute(control.node, &control.attribute, index as f64)?;
        }
        self.selected = index;
        Ok(())
    }

    /// 设置源权重（加权模式）
    pub fn set_weight<H: SceneHost + ?Sized>(&mut self, host: &mut H, index: usize, weight: f64) -> Result<()> {
        self.check_index(index)?;
        if !weight.is_finite() {
            return Err(RigError::InvalidTarget(format!("weight {} is not finite", weight)));
        }
        if let (Some(control), SwitchMode::Weighted) = (&self.control, self.mode) {
            if let Some(name) = control.weight_attribute(index) {
                host.set_attribute(control.node, &name, weight)?;
            }
        }
        self.weights[index] = weight;
        Ok(())
    }

    /// 当前选择，有控制属性时从宿主读取
    pub fn current_selection<H: SceneHost + ?Sized>(&self, host: &H) -> Result<usize> {
        match (&self.control, self.mode) {
            (Some(control), SwitchMode::Discrete) => {
                let value = host.attribute(control.node, &control.attribute)?;
                let index = value.round().max(0.0) as usize;
                self.check_index(index)?;
                Ok(index)
            }
            _ => Ok(self.selected),
        }
    }

    /// 当前权重，有控制属性时从宿主读取
    pub fn current_weights<H: SceneHost + ?Sized>(&self, host: &H) -> Result<Vec<f64>> {
        match (&self.control, self.mode) {
            (Some(control), SwitchMode::Weighted) => (0..self.sources.len())
                .map(|index| match control.weight_attribute(index) {
                    Some(name) => host.attribute(control.node, &name),
                    None => Ok(self.weights[index]),
                })
                .collect(),
            _ => Ok(self.weights.clone()),
        }
    }

    /// 目标的本地矩阵
    pub fn evaluate<H: SceneHost + ?Sized>(&self, host: &H) -> Result<DMat4> {
        match self.mode {
            SwitchMode::Discrete => {
                let index = self.current_selection(host)?;
                self.sources[index].local_matrix(host, self.target)
            }
            SwitchMode::Weighted => {
                let weights = self.current_weights(host)?;
                let matrices = self
                    .sources
                    .iter()
                    .map(|source| source.local_matrix(host, self.target))
                    .collect::<Result<Vec<_>>>()?;
                aggregate(self.aggregation, &matrices, &weights)
            }
        }
    }

    /// 求值并分解写回目标通道
    pub fn apply<H: SceneHost + ?Sized>(&self, host: &mut H) -> Result<LocalChannels> {
        let local = self.evaluate(&*host)?;
        write_local_matrix(host, self.target, local, ConstraintChannels::ALL)
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.sources.len() {
            return Err(RigError::InvalidTarget(format!(
                "source index {} out of range ({} sources)",
                index,
                self.sources.len()
            )));
        }
        Ok(())
    }
}

/// 创建空间切换
pub fn build_space_switch<H: SceneHost + ?Sized>(
    host: &H,
    sources: &[NodeId],
    target: NodeId,
    mode: SwitchMode,
    maintain_offset: bool,
) -> Result<SpaceSwitch> {
    SpaceSwitch::build(host, sources, target, mode, maintain_offset)
}

fn bind_source<H: SceneHost + ?Sized>(
    host: &H,
    source: NodeId,
    target: NodeId,
    maintain_offset: bool,
) -> Result<ConstraintSource> {
    if source == target {
        return Err(RigError::InvalidTarget(format!(
            "{} cannot be its own space",
            host.display_name(target)
        )));
    }
    ConstraintSource::bind(host, source, target, maintain_offset)
}

#[inline]
fn weight_kind() -> AttributeKind {
    AttributeKind::Scalar { min: 0.0, max: 1.0 }
}

// ============================================================================
// 聚合
// ============================================================================

fn aggregate(aggregation: Aggregation, matrices: &[DMat4], weights: &[f64]) -> Result<DMat4> {
    match aggregation {
        Aggregation::MatrixSum => Ok(matrix_sum(matrices, weights)),
        Aggregation::QuaternionBlend => quaternion_blend(matrices, weights),
        Aggregation::Adaptive => {
            let threshold = get_config().blend_angle_threshold;
            if max_rotation_delta(matrices, weights)? <= threshold {
                Ok(matrix_sum(matrices, weights))
            } else {
                quaternion_blend(matrices, weights)
            }
        }
    }
}

/// Σ w·m
fn matrix_sum(matrices: &[DMat4], weights: &[f64]) -> DMat4 {
    matrices
        .iter()
        .zip(weights)
        .fold(DMat4::ZERO, |sum, (m, &w)| sum + *m * w)
}

/// 权重按总和归一化后混合；总权重为零时无法混合
fn quaternion_blend(matrices: &[DMat4], weights: &[f64]) -> Result<DMat4> {
    let total: f64 = weights.iter().sum();
    if total.abs() < SINGULAR_EPSILON {
        return Err(RigError::SingularMatrix { determinant: 0.0 });
    }

    let mut translate = DVec3::ZERO;
    let mut scale = DVec3::ZERO;
    let mut rotation: Option<DQuat> = None;
    let mut accumulated = 0.0;

    for (m, &w) in matrices.iter().zip(weights) {
        if w == 0.0 {
            continue;
        }
        let parts = decompose(*m, RotateOrder::Xyz)?;
        let w = w / total;
        translate += parts.translate * w;
        scale += parts.scale * w;

        accumulated += w;
        rotation = Some(match rotation {
            None => parts.rotation,
            Some(q) if accumulated.abs() > SINGULAR_EPSILON => q.slerp(parts.rotation, w / accumulated),
            Some(q) => q,
        });
    }

    let rotation = rotation.unwrap_or(DQuat::IDENTITY).normalize();
    Ok(DMat4::from_scale_rotation_translation(scale, rotation, translate))
}

/// 非零权重源之间的最大旋转夹角
fn max_rotation_delta(matrices: &[DMat4], weights: &[f64]) -> Result<f64> {
    let rotations = matrices
        .iter()
        .zip(weights)
        .filter(|(_, w)| **w != 0.0)
        .map(|(m, _)| decompose(*m, RotateOrder::Xyz).map(|parts| parts.rotation))
        .collect::<Result<Vec<_>>>()?;

    let mut delta: f64 = 0.0;
    for (i, a) in rotations.iter().enumerate() {
        for b in &rotations[i + 1..] {
            delta = delta.max(a.angle_between(*b));
        }
    }
    Ok(delta)
}

// ============================================================================
// 切换集合
// ============================================================================

/// 按目标节点索引的空间切换集合
#[derive(Clone, Debug, Default)]
pub struct SpaceSwitchSet {
    switches: Vec<SpaceSwitch>,
    by_target: HashMap<NodeId, usize>,
}

impl SpaceSwitchSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 目标已有切换时追加源，否则新建
    pub fn add_source<H: SceneHost + ?Sized>(
        &mut self,
        host: &mut H,
        source: NodeId,
        target: NodeId,
        mode: SwitchMode,
        maintain_offset: bool,
    ) -> Result<&mut SpaceSwitch> {
        match self.by_target.get(&target).copied() {
            Some(index) => {
                let switch = &mut self.switches[index];
                if switch.mode() != mode {
                    log::warn!(
                        "[SpaceSwitch] {} 已是 {:?} 模式，忽略 {:?}",
                        host.display_name(target),
                        switch.mode(),
                        mode
                    );
                }
                switch.add_source(host, source)?;
                Ok(switch)
            }
            None => {
                let switch = SpaceSwitch::build(&*host, &[source], target, mode, maintain_offset)?;
                let index = self.switches.len();
                self.switches.push(switch);
                self.by_target.insert(target, index);
                Ok(&mut self.switches[index])
            }
        }
    }

    pub fn get(&self, target: NodeId) -> Option<&SpaceSwitch> {
        self.by_target.get(&target).map(|&i| &self.switches[i])
    }

    pub fn get_mut(&mut self, target: NodeId) -> Option<&mut SpaceSwitch> {
        match self.by_target.get(&target) {
            Some(&i) => self.switches.get_mut(i),
            None => None,
        }
    }

    /// 目标的源节点；没有切换时为空
    pub fn sources_of(&self, target: NodeId) -> Vec<NodeId> {
        self.get(target).map(SpaceSwitch::sources).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.switches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.switches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SpaceSwitch> {
        self.switches.iter()
    }

    /// 按创建顺序求值所有切换，单个失败只记录警告
    pub fn apply_all<H: SceneHost + ?Sized>(&self, host: &mut H) -> Vec<(NodeId, RigError)> {
        let mut failures = Vec::new();
        for switch in &self.switches {
            if let Err(err) = switch.apply(host) {
                log::warn!(
                    "[SpaceSwitch] {} 求值失败: {}",
                    host.display_name(switch.target()),
                    err
                );
                failures.push((switch.target(), err));
            }
        }
        failures
    }
}
