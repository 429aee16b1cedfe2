//! 关节定向求解器
//!
//! 单个节点的定向在一次调用内完成，不跨调用保存状态：
//!
//! 1. 解析瞄准点和上方向参考（修改任何通道之前）
//! 2. 在父空间内做 look-at 正交化，得到本地朝向
//! 3. 固定子节点
//! 4. 冻结（已是单位变换时跳过）、清除 rotate axis、写入朝向；
//!    冻结改变了缩放时子节点连同缩放一起保持
//! 5. 应用缩放反转，子节点只保持平移和旋转（镜像传到子节点），解除固定
//! 6. 应用了缩放反转且没有孙节点时，把缩放重新烘焙到子节点平移

use glam::{DMat3, DQuat, DVec3};

use super::pin::{pin, LockSnapshot};
use super::{AimTarget, OrientSpec, UpTarget};
use crate::config::{get_config, RigConfig};
use crate::constraint::ConstraintChannels;
use crate::math::{closest_euler, euler_to_quat, normalize, quat_to_euler, triangle_normal, RotateOrder};
use crate::scene::{LocalChannels, NodeId, SceneHost};
use crate::{Result, RigError};

/// 解析后的上方向参考（世界空间）
#[derive(Clone, Copy, Debug, PartialEq)]
enum UpReference {
    /// 方向向量
    Direction(DVec3),
    /// 目标点，上方向为节点指向该点
    Point(DVec3),
}

impl UpReference {
    fn direction_from(self, position: DVec3) -> DVec3 {
        match self {
            Self::Direction(direction) => direction,
            Self::Point(point) => point - position,
        }
    }
}

// ============================================================================
// 求解器
// ============================================================================

/// 关节定向求解器
#[derive(Clone, Debug, Default)]
pub struct OrientJointSolver {
    spec: OrientSpec,
}

impl OrientJointSolver {
    /// 创建求解器（校验配置）
    pub fn new(spec: OrientSpec) -> Result<Self> {
        spec.validate()?;
        Ok(Self { spec })
    }

    #[inline]
    pub fn spec(&self) -> &OrientSpec {
        &self.spec
    }

    /// 定向单个节点
    pub fn solve<H: SceneHost + ?Sized>(&self, host: &mut H, node: NodeId) -> Result<()> {
        let config = get_config();
        let name = host.display_name(node);
        let current = host.local_channels(node)?;
        let position = host.world_position(node)?;

        // ====== 解析目标 ======
        let aim_point = self.aim_point(&*host, node, position, &config)?;
        let up = self.up_reference(&*host, node, position, &config)?;
        let orientation = self.local_orientation(&*host, node, &name, position, aim_point, up, &config)?;

        let children = host.children(node);
        let has_grandchild = children.iter().any(|&child| !host.children(child).is_empty());

        // ====== 固定子节点并写入 ======
        let frozen = self.working_channels(host.is_joint(node), &current, orientation);
        let mut working = frozen;
        working.scale = self.spec.invert_scale.apply(frozen.scale);

        let mut session = pin(host, node, &children);
        session.host_mut().set_local_channels(node, &frozen)?;
        if frozen.scale != current.scale {
            session.hold_channels(ConstraintChannels::ALL);
        } else {
            session.hold();
        }

        if working.scale != frozen.scale {
            if let Err(err) = session.host_mut().set_local_channels(node, &working) {
                // 回到定向前的状态，子节点按快照完整恢复
                match session.host_mut().set_local_channels(node, &current) {
                    Ok(()) => session.hold_channels(ConstraintChannels::ALL),
                    Err(rollback_err) => log::warn!("[Orient] {} 回滚失败: {}", name, rollback_err),
                }
                return Err(err);
            }
            session.hold();
        }
        session.unpin();

        if config.debug_log {
            log::info!(
                "[Orient] {} 朝向 JO={:?} R={:?}",
                name,
                working.joint_orient,
                working.rotate
            );
        }

        // ====== 缩放重新烘焙 ======
        if !self.spec.invert_scale.is_empty() && !has_grandchild {
            rebake_scale(host, node, &children)?;
        }
        Ok(())
    }

    /// 解析瞄准点（世界空间）
    fn aim_point<H: SceneHost + ?Sized>(
        &self,
        host: &H,
        node: NodeId,
        position: DVec3,
        config: &RigConfig,
    ) -> Result<DVec3> {
        match self.spec.aim_target {
            AimTarget::WorldAxis(axis) => Ok(position + axis.unit() * config.world_axis_offset),
            AimTarget::Child => match host.child(node, 0) {
                Some(child) => host.world_position(child),
                None => Err(RigError::MissingChild(host.display_name(node))),
            },
            AimTarget::Parent => match host.parent(node) {
                Some(parent) => host.world_position(parent),
                None => Err(RigError::InvalidTarget(format!(
                    "{} has no parent to aim at",
                    host.display_name(node)
                ))),
            },
            AimTarget::LocalParent => match host.parent(node) {
                Some(parent) => {
                    let parent_x = host.world_matrix(parent)?.x_axis.truncate();
                    Ok(position + normalize(parent_x)? * config.world_axis_offset)
                }
                None => Err(RigError::InvalidTarget(format!(
                    "{} has no parent axis to aim along",
                    host.display_name(node)
                ))),
            },
        }
    }

    /// 解析上方向参考（世界空间）
    fn up_reference<H: SceneHost + ?Sized>(
        &self,
        host: &H,
        node: NodeId,
        position: DVec3,
        config: &RigConfig,
    ) -> Result<UpReference> {
        let world_up = self.spec.world_up_vector;
        match self.spec.up_target {
            UpTarget::World => Ok(UpReference::Direction(world_up)),
            UpTarget::ParentRotation => match host.parent(node) {
                Some(parent) => {
                    let rotation = DMat3::from_mat4(host.world_matrix(parent)?);
                    Ok(UpReference::Direction(rotation * world_up))
                }
                None => Ok(UpReference::Direction(world_up)),
            },
            UpTarget::ChildPosition => match host.child(node, 0) {
                Some(child) => Ok(UpReference::Point(host.world_position(child)?)),
                None => Err(RigError::MissingChild(host.display_name(node))),
            },
            UpTarget::SecondChildPosition => match host.child(node, 1) {
                Some(child) => Ok(UpReference::Point(host.world_position(child)?)),
                None => Err(RigError::MissingChild(host.display_name(node))),
            },
            UpTarget::ParentPosition => match host.parent(node) {
                Some(parent) => Ok(UpReference::Point(host.world_position(parent)?)),
                None => Err(RigError::InvalidTarget(format!(
                    "{} has no parent for the up reference",
                    host.display_name(node)
                ))),
            },
            UpTarget::TrianglePlane => {
                let nodes = self.spec.triangle.resolve(host, node);
                if let Some(slot) = nodes.iter().position(Option::is_none) {
                    let missing = RigError::MissingTriangleNode {
                        node: host.display_name(node),
                        slot,
                    };
                    log::warn!("[Orient] {}，退化为世界上方向", missing);
                    return Ok(UpReference::Direction(world_up));
                }
                let mut points = [DVec3::ZERO; 3];
                for (point, id) in points.iter_mut().zip(nodes.iter().flatten()) {
                    *point = host.world_position(*id)?;
                }
                let normal = triangle_normal(points[0], points[1], points[2])?;
                if config.debug_log {
                    log::debug!("[Orient] {} 三角平面法线 {:?}", host.display_name(node), normal);
                }
                Ok(UpReference::Direction(normal))
            }
            UpTarget::SurfaceNormal => match self.spec.surface {
                Some(surface) => Ok(UpReference::Direction(host.surface_normal_at(surface, position)?)),
                None => Err(RigError::InvalidTarget(
                    "surface normal up strategy needs a surface reference".to_string(),
                )),
            },
        }
    }

    /// 节点的目标本地朝向（JO * R * RA 的合成结果）
    ///
    /// 瞄准和上方向先变换到父空间，再做 look-at 正交化，
    /// 父级存在非均匀或镜像缩放时结果仍是纯旋转。
    #[allow(clippy::too_many_arguments)]
    fn local_orientation<H: SceneHost + ?Sized>(
        &self,
        host: &H,
        node: NodeId,
        name: &str,
        position: DVec3,
        aim_point: DVec3,
        up: UpReference,
        config: &RigConfig,
    ) -> Result<DQuat> {
        let to_parent = DMat3::from_mat4(host.parent_inverse_matrix(node)?);
        let aim = normalize(to_parent * normalize(aim_point - position)?)?;
        let up = normalize(to_parent * normalize(up.direction_from(position))?)?;

        let up_perp = up - aim * up.dot(aim);
        if up_perp.length() <= config.parallel_tolerance {
            log::warn!("[Orient] {} 瞄准方向与上方向平行，无法确定朝向", name);
            return Err(RigError::AmbiguousUpReference(name.to_string()));
        }
        let up = up_perp.normalize();
        let target = DMat3::from_cols(aim, up, aim.cross(up));

        let local_aim = normalize(self.spec.aim_vector)?;
        let local_up = normalize(self.spec.up_vector - local_aim * self.spec.up_vector.dot(local_aim))?;
        let frame = DMat3::from_cols(local_aim, local_up, local_aim.cross(local_up));

        Ok(DQuat::from_mat3(&(target * frame.transpose())).normalize())
    }

    /// 冻结 → 清除 rotate axis → 写入朝向（不含缩放反转）
    fn working_channels(&self, is_joint: bool, current: &LocalChannels, orientation: DQuat) -> LocalChannels {
        let mut working = *current;

        let needs_freeze = !current.has_identity_rotation() || (self.spec.freeze_scale && !current.has_identity_scale());
        if needs_freeze {
            if is_joint {
                let folded = current.joint_orient_quat() * euler_to_quat(current.rotate, current.rotate_order);
                working.joint_orient = quat_to_euler(folded, RotateOrder::Xyz);
                working.rotate = DVec3::ZERO;
            }
            if self.spec.freeze_scale {
                working.scale = DVec3::ONE;
            }
        }

        if working.rotate_axis != DVec3::ZERO {
            log::debug!("[Orient] 清除 rotate axis {:?}", working.rotate_axis);
            working.rotate_axis = DVec3::ZERO;
        }

        if is_joint {
            working.joint_orient = quat_to_euler(orientation, RotateOrder::Xyz);
            working.rotate = DVec3::ZERO;
        } else {
            let order = working.rotate_order;
            working.rotate = closest_euler(quat_to_euler(orientation, order), current.rotate, order);
        }

        working
    }
}

/// 节点缩放归一，子节点平移按原缩放补偿
///
/// 先算出全部新通道再写入：子节点在前，节点最后。任一写入失败时
/// 已写入的通道按逆序回滚。子节点的锁定通道临时解锁，结束后恢复。
fn rebake_scale<H: SceneHost + ?Sized>(host: &mut H, node: NodeId, children: &[NodeId]) -> Result<()> {
    let original = host.local_channels(node)?;
    let scale = original.scale;
    if scale == DVec3::ONE {
        return Ok(());
    }

    let mut writes = Vec::with_capacity(children.len() + 1);
    for &child in children {
        let before = host.local_channels(child)?;
        let mut after = before;
        after.translate *= scale;
        writes.push((child, before, after));
    }
    let mut rebaked = original;
    rebaked.scale = DVec3::ONE;
    writes.push((node, original, rebaked));

    let mut snapshots = Vec::with_capacity(children.len());
    let mut result = Ok(());
    for &child in children {
        match LockSnapshot::capture_and_unlock(host, child) {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(err) => {
                result = Err(err);
                break;
            }
        }
    }
    if result.is_ok() {
        result = commit_channels(host, &writes);
    }
    for snapshot in snapshots.iter().rev() {
        snapshot.restore(host);
    }
    result
}

/// 依次写入 (节点, 原通道, 新通道)，失败时逆序写回原通道
fn commit_channels<H: SceneHost + ?Sized>(
    host: &mut H,
    writes: &[(NodeId, LocalChannels, LocalChannels)],
) -> Result<()> {
    for (i, (target, _, after)) in writes.iter().enumerate() {
        if let Err(err) = host.set_local_channels(*target, after) {
            for (written, before, _) in writes[..i].iter().rev() {
                if let Err(rollback_err) = host.set_local_channels(*written, before) {
                    log::warn!("[Orient] 回滚 '{}' 失败: {}", host.display_name(*written), rollback_err);
                }
            }
            return Err(err);
        }
    }
    Ok(())
}

// ============================================================================
// 入口
// ============================================================================

/// 定向单个节点
pub fn orient_joint<H: SceneHost + ?Sized>(host: &mut H, node: NodeId, spec: &OrientSpec) -> Result<()> {
    OrientJointSolver::new(spec.clone())?.solve(host, node)
}

/// 批量定向结果
#[derive(Debug, Default)]
pub struct OrientReport {
    /// 成功定向的节点（按处理顺序）
    pub oriented: Vec<NodeId>,
    /// 失败的节点及原因
    pub failures: Vec<(NodeId, RigError)>,
}

impl OrientReport {
    #[inline]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    fn record<H: SceneHost + ?Sized>(&mut self, host: &H, node: NodeId, result: Result<()>) {
        match result {
            Ok(()) => self.oriented.push(node),
            Err(err) => {
                log::warn!("[Orient] {} 定向失败: {}", host.display_name(node), err);
                self.failures.push((node, err));
            }
        }
    }
}

/// 用同一配置按调用者给定的顺序定向多个节点
///
/// 后面的节点可能依赖前面节点已更新的位置，顺序即求解顺序。
/// 单个节点失败记录警告后继续。
pub fn orient_joints<H: SceneHost + ?Sized>(host: &mut H, nodes: &[NodeId], spec: &OrientSpec) -> OrientReport {
    let mut report = OrientReport::default();
    for &node in nodes {
        let result = orient_joint(host, node, spec);
        report.record(&*host, node, result);
    }
    report
}

/// 每个节点使用自己的配置，按给定顺序定向
pub fn orient_chain<H: SceneHost + ?Sized>(host: &mut H, chain: &[(NodeId, OrientSpec)]) -> OrientReport {
    let mut report = OrientReport::default();
    for (node, spec) in chain {
        let result = orient_joint(host, *node, spec);
        report.record(&*host, *node, result);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Axis;
    use crate::orient::{InvertScale, TrianglePlane};
    use crate::scene::{ChannelLocks, SceneGraph};
    use std::f64::consts::FRAC_PI_2;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn straight_chain() -> (SceneGraph, [NodeId; 3]) {
        let mut scene = SceneGraph::new();
        let a = scene.add_joint_at("a", None, DVec3::ZERO).unwrap();
        let b = scene.add_joint_at("b", Some(a), DVec3::new(1.0, 0.0, 0.0)).unwrap();
        let c = scene.add_joint_at("c", Some(b), DVec3::new(2.0, 0.0, 0.0)).unwrap();
        (scene, [a, b, c])
    }

    fn world_axes(scene: &SceneGraph, node: NodeId) -> DMat3 {
        let m = DMat3::from_mat4(scene.world_matrix(node).unwrap());
        DMat3::from_cols(m.x_axis.normalize(), m.y_axis.normalize(), m.z_axis.normalize())
    }

    #[test]
    fn test_already_aimed_chain_is_identity() {
        let (mut scene, [a, b, c]) = straight_chain();
        orient_joint(&mut scene, a, &OrientSpec::default()).unwrap();

        let channels = scene.local_channels(a).unwrap();
        assert!(channels.joint_orient.abs_diff_eq(DVec3::ZERO, 1e-12));
        assert!(channels.rotate.abs_diff_eq(DVec3::ZERO, 1e-12));
        assert!(scene.world_position(b).unwrap().abs_diff_eq(DVec3::new(1.0, 0.0, 0.0), 1e-9));
        assert!(scene.world_position(c).unwrap().abs_diff_eq(DVec3::new(2.0, 0.0, 0.0), 1e-9));
    }

    #[test]
    fn test_aim_child_with_world_up() {
        let mut scene = SceneGraph::new();
        let root = scene.add_joint_at("root", None, DVec3::new(1.0, 0.0, 0.0)).unwrap();
        let tip = scene.add_joint_at("tip", Some(root), DVec3::new(1.0, 3.0, 0.0)).unwrap();

        let spec = OrientSpec::default().with_world_up(DVec3::Z);
        orient_joint(&mut scene, root, &spec).unwrap();

        let axes = world_axes(&scene, root);
        assert!(axes.x_axis.abs_diff_eq(DVec3::Y, 1e-9));
        assert!(axes.y_axis.abs_diff_eq(DVec3::Z, 1e-9));
        assert!(scene.world_position(tip).unwrap().abs_diff_eq(DVec3::new(1.0, 3.0, 0.0), 1e-9));
        // 旋转写入 joint orient
        assert_eq!(scene.local_channels(root).unwrap().rotate, DVec3::ZERO);
        assert!(scene.local_channels(tip).unwrap().translate.abs_diff_eq(DVec3::new(3.0, 0.0, 0.0), 1e-9));
    }

    #[test]
    fn test_parallel_up_is_rejected_without_side_effects() {
        init_logger();
        let mut scene = SceneGraph::new();
        let root = scene.add_joint_at("root", None, DVec3::ZERO).unwrap();
        let tip = scene.add_joint_at("tip", Some(root), DVec3::new(0.0, 2.0, 0.0)).unwrap();
        scene.set_channel_locks(tip, ChannelLocks::TRANSLATE).unwrap();
        let count = scene.len();

        let err = orient_joint(&mut scene, root, &OrientSpec::default()).unwrap_err();
        assert!(matches!(err, RigError::AmbiguousUpReference(name) if name == "root"));
        assert_eq!(scene.local_channels(root).unwrap(), LocalChannels::default());
        assert_eq!(scene.channel_locks(tip).unwrap(), ChannelLocks::TRANSLATE);
        assert_eq!(scene.len(), count);
    }

    #[test]
    fn test_transform_node_uses_rotate_channel() {
        let mut scene = SceneGraph::new();
        let node = scene
            .add_transform(
                "ctrl",
                None,
                LocalChannels::from_translation_rotation(DVec3::ZERO, DVec3::new(0.0, 0.0, 0.1), RotateOrder::Zxy),
            )
            .unwrap();
        let child = scene
            .add_transform("ctrl_end", Some(node), LocalChannels::from_translation(DVec3::new(0.0, 0.0, -2.0)))
            .unwrap();
        let child_world = scene.world_matrix(child).unwrap();

        let spec = OrientSpec::new(AimTarget::WorldAxis(Axis::Z), UpTarget::World);
        orient_joint(&mut scene, node, &spec).unwrap();

        let channels = scene.local_channels(node).unwrap();
        assert_eq!(channels.joint_orient, DVec3::ZERO);
        assert_eq!(channels.rotate_order, RotateOrder::Zxy);
        assert!(world_axes(&scene, node).x_axis.abs_diff_eq(DVec3::Z, 1e-9));
        assert!(scene.world_matrix(child).unwrap().abs_diff_eq(child_world, 1e-9));
    }

    #[test]
    fn test_triangle_plane_up() {
        let mut scene = SceneGraph::new();
        let shoulder = scene.add_joint_at("shoulder", None, DVec3::ZERO).unwrap();
        let elbow = scene.add_joint_at("elbow", Some(shoulder), DVec3::new(1.0, 0.0, -1.0)).unwrap();
        let wrist = scene.add_joint_at("wrist", Some(elbow), DVec3::new(2.0, 0.0, 0.0)).unwrap();

        let spec = OrientSpec::new(AimTarget::Child, UpTarget::TrianglePlane);
        orient_joint(&mut scene, elbow, &spec).unwrap();

        let axes = world_axes(&scene, elbow);
        let aim = DVec3::new(1.0, 0.0, 1.0).normalize();
        assert!(axes.x_axis.abs_diff_eq(aim, 1e-9));
        assert!(axes.y_axis.abs_diff_eq(DVec3::NEG_Y, 1e-9));
        assert!(scene.world_position(wrist).unwrap().abs_diff_eq(DVec3::new(2.0, 0.0, 0.0), 1e-9));

        // 显式节点：与相对节点结果一致
        let explicit = spec.with_triangle(TrianglePlane::Nodes([Some(shoulder), Some(elbow), Some(wrist)]));
        orient_joint(&mut scene, elbow, &explicit).unwrap();
        assert!(world_axes(&scene, elbow).y_axis.abs_diff_eq(DVec3::NEG_Y, 1e-9));
    }

    #[test]
    fn test_triangle_missing_node_degrades_to_world_up() {
        init_logger();
        let (mut scene, [a, _, _]) = straight_chain();
        // a 没有父节点：三角平面不完整
        let spec = OrientSpec::new(AimTarget::Child, UpTarget::TrianglePlane);
        orient_joint(&mut scene, a, &spec).unwrap();
        assert!(world_axes(&scene, a).y_axis.abs_diff_eq(DVec3::Y, 1e-9));

        // 共线三角形无法给出法线
        let spec = spec.with_triangle(TrianglePlane::Nodes([Some(a), Some(scene.find("b").unwrap()), Some(scene.find("c").unwrap())]));
        assert!(matches!(
            orient_joint(&mut scene, a, &spec),
            Err(RigError::DegenerateVector { .. })
        ));
    }

    #[test]
    fn test_aim_parent_and_local_parent() {
        let (mut scene, [a, b, c]) = straight_chain();
        let mut channels = scene.local_channels(a).unwrap();
        channels.joint_orient = DVec3::new(0.0, 0.0, FRAC_PI_2);
        scene.set_local_channels(a, &channels).unwrap();
        let c_world = scene.world_position(c).unwrap();

        // c 反向瞄准父节点
        let spec = OrientSpec::new(AimTarget::Parent, UpTarget::World).with_world_up(DVec3::Z);
        orient_joint(&mut scene, c, &spec).unwrap();
        let to_parent = (scene.world_position(b).unwrap() - c_world).normalize();
        assert!(world_axes(&scene, c).x_axis.abs_diff_eq(to_parent, 1e-9));

        // 沿父节点 +X
        let spec = OrientSpec::new(AimTarget::LocalParent, UpTarget::World).with_world_up(DVec3::Z);
        orient_joint(&mut scene, c, &spec).unwrap();
        let parent_x = world_axes(&scene, b).x_axis;
        assert!(world_axes(&scene, c).x_axis.abs_diff_eq(parent_x, 1e-9));
        assert!(scene.world_position(c).unwrap().abs_diff_eq(c_world, 1e-9));
    }

    #[test]
    fn test_up_toward_positions() {
        let mut scene = SceneGraph::new();
        let hub = scene.add_joint_at("hub", None, DVec3::ZERO).unwrap();
        scene.add_joint_at("front", Some(hub), DVec3::new(0.0, 0.0, 2.0)).unwrap();
        scene.add_joint_at("side", Some(hub), DVec3::new(-1.0, 1.0, 2.0)).unwrap();

        let spec = OrientSpec::new(AimTarget::Child, UpTarget::SecondChildPosition);
        orient_joint(&mut scene, hub, &spec).unwrap();
        let axes = world_axes(&scene, hub);
        assert!(axes.x_axis.abs_diff_eq(DVec3::Z, 1e-9));
        assert!(axes.y_axis.abs_diff_eq(DVec3::new(-1.0, 1.0, 0.0).normalize(), 1e-9));

        // 只有一个子节点时 SecondChildPosition 失败
        let lone = scene.add_joint_at("lone", None, DVec3::ZERO).unwrap();
        scene.add_joint_at("lone_end", Some(lone), DVec3::X).unwrap();
        assert!(matches!(orient_joint(&mut scene, lone, &spec), Err(RigError::MissingChild(_))));
    }

    #[test]
    fn test_surface_normal_up() {
        let mut scene = SceneGraph::new();
        let ground = scene
            .add_surface("ground", None, LocalChannels::default(), DVec3::new(0.0, 0.0, -1.0))
            .unwrap();
        let root = scene.add_joint_at("root", None, DVec3::ZERO).unwrap();
        scene.add_joint_at("tip", Some(root), DVec3::new(0.0, 5.0, 0.0)).unwrap();

        let spec = OrientSpec::new(AimTarget::Child, UpTarget::SurfaceNormal).with_surface(ground);
        orient_joint(&mut scene, root, &spec).unwrap();
        let axes = world_axes(&scene, root);
        assert!(axes.x_axis.abs_diff_eq(DVec3::Y, 1e-9));
        assert!(axes.y_axis.abs_diff_eq(DVec3::NEG_Z, 1e-9));
    }

    #[test]
    fn test_invert_scale_rebaked_without_grandchild() {
        let mut scene = SceneGraph::new();
        let root = scene.add_joint_at("root", None, DVec3::ZERO).unwrap();
        let tip = scene.add_joint_at("tip", Some(root), DVec3::new(2.0, 0.0, 0.0)).unwrap();
        scene.set_channel_locks(tip, ChannelLocks::TRANSLATE_X).unwrap();

        let spec = OrientSpec::default().with_invert_scale(InvertScale::X);
        orient_joint(&mut scene, root, &spec).unwrap();

        // 固定期间平移翻转为 -2，烘焙后缩放归一、平移按 -1 补偿
        assert_eq!(scene.local_channels(root).unwrap().scale, DVec3::ONE);
        assert!(scene.local_channels(tip).unwrap().translate.abs_diff_eq(DVec3::new(2.0, 0.0, 0.0), 1e-9));
        assert!(scene.world_position(tip).unwrap().abs_diff_eq(DVec3::new(2.0, 0.0, 0.0), 1e-9));
        assert_eq!(scene.channel_locks(tip).unwrap(), ChannelLocks::TRANSLATE_X);
    }

    #[test]
    fn test_invert_scale_kept_with_grandchild() {
        let (mut scene, [a, b, c]) = straight_chain();
        let spec = OrientSpec::default().with_invert_scale(InvertScale::YZ);
        orient_joint(&mut scene, a, &spec).unwrap();

        assert_eq!(scene.local_channels(a).unwrap().scale, DVec3::new(1.0, -1.0, -1.0));
        assert!(scene.world_position(b).unwrap().abs_diff_eq(DVec3::new(1.0, 0.0, 0.0), 1e-9));
        assert!(scene.world_position(c).unwrap().abs_diff_eq(DVec3::new(2.0, 0.0, 0.0), 1e-9));
    }

    #[test]
    fn test_freeze_folds_rotation_into_joint_orient() {
        let mut scene = SceneGraph::new();
        let root = scene
            .add_joint(
                "root",
                None,
                LocalChannels {
                    rotate: DVec3::new(0.4, 0.0, 0.2),
                    scale: DVec3::splat(2.0),
                    rotate_axis: DVec3::new(0.0, 0.3, 0.0),
                    ..LocalChannels::default()
                },
            )
            .unwrap();
        let tip = scene
            .add_joint("tip", Some(root), LocalChannels::from_translation(DVec3::new(1.0, 0.0, 0.0)))
            .unwrap();
        let tip_position = scene.world_position(tip).unwrap();

        let spec = OrientSpec::default().with_world_up(DVec3::Z).with_freeze_scale(true);
        orient_joint(&mut scene, root, &spec).unwrap();

        let channels = scene.local_channels(root).unwrap();
        assert_eq!(channels.rotate, DVec3::ZERO);
        assert_eq!(channels.rotate_axis, DVec3::ZERO);
        assert_eq!(channels.scale, DVec3::ONE);
        assert!(scene.world_position(tip).unwrap().abs_diff_eq(tip_position, 1e-9));
        let aim = tip_position.normalize();
        assert!(world_axes(&scene, root).x_axis.abs_diff_eq(aim, 1e-9));
    }

    #[test]
    fn test_freeze_scale_keeps_descendants() {
        let mut scene = SceneGraph::new();
        let root = scene
            .add_joint(
                "root",
                None,
                LocalChannels {
                    scale: DVec3::splat(2.0),
                    ..LocalChannels::default()
                },
            )
            .unwrap();
        let tip = scene
            .add_joint("tip", Some(root), LocalChannels::from_translation(DVec3::new(1.0, 0.0, 0.0)))
            .unwrap();
        let end = scene
            .add_joint("end", Some(tip), LocalChannels::from_translation(DVec3::new(1.0, 0.0, 0.0)))
            .unwrap();
        let tip_world = scene.world_matrix(tip).unwrap();
        assert!(scene.world_position(end).unwrap().abs_diff_eq(DVec3::new(4.0, 0.0, 0.0), 1e-12));

        orient_joint(&mut scene, root, &OrientSpec::default().with_freeze_scale(true)).unwrap();

        assert_eq!(scene.local_channels(root).unwrap().scale, DVec3::ONE);
        assert!(scene.world_matrix(tip).unwrap().abs_diff_eq(tip_world, 1e-9));
        assert!(scene.world_position(end).unwrap().abs_diff_eq(DVec3::new(4.0, 0.0, 0.0), 1e-9));
    }

    #[test]
    fn test_invert_scale_mirrors_children_with_grandchild() {
        let (mut scene, [a, b, _]) = straight_chain();
        orient_joint(&mut scene, a, &OrientSpec::default().with_invert_scale(InvertScale::X)).unwrap();

        assert_eq!(scene.local_channels(a).unwrap().scale, DVec3::new(-1.0, 1.0, 1.0));
        assert!(scene.world_position(b).unwrap().abs_diff_eq(DVec3::new(1.0, 0.0, 0.0), 1e-9));
        // 单轴反转无法用旋转抵消，镜像保留在子节点的世界矩阵里
        assert!(scene.world_matrix(b).unwrap().determinant() < 0.0);
    }

    #[test]
    fn test_locked_scale_rolls_back_inversion() {
        let (mut scene, [a, b, c]) = straight_chain();
        scene.set_channel_locks(a, ChannelLocks::SCALE).unwrap();
        let before = scene.local_channels(a).unwrap();
        let b_world = scene.world_matrix(b).unwrap();
        let count = scene.len();

        let err = orient_joint(&mut scene, a, &OrientSpec::default().with_invert_scale(InvertScale::X)).unwrap_err();
        assert!(matches!(err, RigError::LockedChannel { .. }));
        assert_eq!(scene.local_channels(a).unwrap(), before);
        assert!(scene.world_matrix(b).unwrap().abs_diff_eq(b_world, 1e-9));
        assert!(scene.world_position(c).unwrap().abs_diff_eq(DVec3::new(2.0, 0.0, 0.0), 1e-9));
        assert_eq!(scene.len(), count);
    }

    #[test]
    fn test_rebake_failure_leaves_children_untouched() {
        let mut scene = SceneGraph::new();
        let root = scene
            .add_joint(
                "root",
                None,
                LocalChannels {
                    scale: DVec3::new(-1.0, 1.0, 1.0),
                    ..LocalChannels::default()
                },
            )
            .unwrap();
        let tip = scene
            .add_joint("tip", Some(root), LocalChannels::from_translation(DVec3::new(2.0, 0.0, 0.0)))
            .unwrap();
        scene.set_channel_locks(root, ChannelLocks::SCALE_X).unwrap();
        scene.set_channel_locks(tip, ChannelLocks::TRANSLATE_X).unwrap();

        let err = rebake_scale(&mut scene, root, &[tip]).unwrap_err();
        assert!(matches!(err, RigError::LockedChannel { .. }));
        assert_eq!(scene.local_channels(root).unwrap().scale, DVec3::new(-1.0, 1.0, 1.0));
        assert_eq!(scene.local_channels(tip).unwrap().translate, DVec3::new(2.0, 0.0, 0.0));
        assert_eq!(scene.channel_locks(tip).unwrap(), ChannelLocks::TRANSLATE_X);
    }

    #[test]
    fn test_parent_with_mirrored_scale() {
        let mut scene = SceneGraph::new();
        let parent = scene
            .add_transform(
                "mirror",
                None,
                LocalChannels {
                    scale: DVec3::new(-1.0, 1.0, 1.0),
                    ..LocalChannels::default()
                },
            )
            .unwrap();
        let root = scene.add_joint_at("root", Some(parent), DVec3::ZERO).unwrap();
        let tip = scene.add_joint_at("tip", Some(root), DVec3::new(0.0, 0.0, 3.0)).unwrap();

        orient_joint(&mut scene, root, &OrientSpec::default()).unwrap();
        let axes = world_axes(&scene, root);
        assert!(axes.x_axis.abs_diff_eq(DVec3::Z, 1e-9));
        assert!(axes.y_axis.abs_diff_eq(DVec3::Y, 1e-9));
        assert!(scene.world_position(tip).unwrap().abs_diff_eq(DVec3::new(0.0, 0.0, 3.0), 1e-9));
    }

    #[test]
    fn test_batch_continues_after_failure() {
        init_logger();
        let (mut scene, [a, b, c]) = straight_chain();
        let report = orient_joints(&mut scene, &[a, b, c], &OrientSpec::default());
        assert_eq!(report.oriented, vec![a, b]);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0], (node, RigError::MissingChild(_)) if node == c));
        assert!(!report.is_success());

        let chain = vec![
            (a, OrientSpec::default()),
            (b, OrientSpec::default()),
            (c, OrientSpec::new(AimTarget::Parent, UpTarget::World).with_axes(DVec3::NEG_X, DVec3::Y)),
        ];
        let report = orient_chain(&mut scene, &chain);
        assert!(report.is_success());
        assert!(world_axes(&scene, c).x_axis.abs_diff_eq(DVec3::X, 1e-9));
    }
}
