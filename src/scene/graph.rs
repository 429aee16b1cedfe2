//! 内存场景图 - 宿主接口的参考实现
//!
//! 管理节点层次结构，通道写入后递归更新子树的世界矩阵。

use std::collections::HashMap;

use glam::{DMat3, DMat4, DVec3};

use super::node::{Attribute, SceneNode};
use super::{AttributeKind, ChannelLocks, LocalChannels, NodeId, NodeKind, SceneHost};
use crate::math::{mat_inverse, normalize};
use crate::{Result, RigError};

/// 内存场景图
#[derive(Clone, Debug, Default)]
pub struct SceneGraph {
    /// 节点槽位（删除后为 None，句柄不复用）
    nodes: Vec<Option<SceneNode>>,
    /// 子节点缓存
    children_cache: Vec<Vec<usize>>,
    name_to_index: HashMap<String, usize>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加节点
    pub fn add_node(
        &mut self,
        name: &str,
        kind: NodeKind,
        parent: Option<NodeId>,
        channels: LocalChannels,
    ) -> Result<NodeId> {
        if self.name_to_index.contains_key(name) {
            return Err(RigError::InvalidTarget(format!("node name '{}' already exists", name)));
        }
        if let Some(parent) = parent {
            self.slot(parent)?;
        }

        let index = self.nodes.len();
        let mut node = SceneNode::new(name.to_string(), kind, channels);
        node.parent = parent.map(NodeId::index);
        self.nodes.push(Some(node));
        self.children_cache.push(Vec::new());
        self.name_to_index.insert(name.to_string(), index);
        if let Some(parent) = parent {
            self.children_cache[parent.0].push(index);
        }

        self.update_world_recursive(index);
        Ok(NodeId(index))
    }

    pub fn add_transform(&mut self, name: &str, parent: Option<NodeId>, channels: LocalChannels) -> Result<NodeId> {
        self.add_node(name, NodeKind::Transform, parent, channels)
    }

    pub fn add_joint(&mut self, name: &str, parent: Option<NodeId>, channels: LocalChannels) -> Result<NodeId> {
        self.add_node(name, NodeKind::Joint, parent, channels)
    }

    /// 在世界位置添加关节（无旋转）
    pub fn add_joint_at(&mut self, name: &str, parent: Option<NodeId>, world_position: DVec3) -> Result<NodeId> {
        let translate = match parent {
            Some(parent) => mat_inverse(self.slot(parent)?.local_to_world)?.transform_point3(world_position),
            None => world_position,
        };
        self.add_joint(name, parent, LocalChannels::from_translation(translate))
    }

    /// 添加平面曲面，`local_normal` 为本地空间法线
    pub fn add_surface(
        &mut self,
        name: &str,
        parent: Option<NodeId>,
        channels: LocalChannels,
        local_normal: DVec3,
    ) -> Result<NodeId> {
        let normal = normalize(local_normal)?;
        let id = self.add_node(name, NodeKind::Surface, parent, channels)?;
        self.slot_mut(id)?.surface_normal = Some(normal);
        Ok(id)
    }

    /// 通过名称查找节点
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.name_to_index.get(name).copied().map(NodeId)
    }

    pub fn node(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    /// 存活节点数量
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, id: NodeId) -> Result<&SceneNode> {
        self.node(id).ok_or(RigError::UnknownNode(id))
    }

    fn slot_mut(&mut self, id: NodeId) -> Result<&mut SceneNode> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(RigError::UnknownNode(id))
    }

    fn attribute_slot(&self, node: NodeId, name: &str) -> Result<&Attribute> {
        self.slot(node)?.attributes.get(name).ok_or_else(|| {
            RigError::InvalidTarget(format!("{} has no attribute '{}'", self.display_name(node), name))
        })
    }

    /// 不与现有节点重名的名称
    fn unique_name(&self, base: &str) -> String {
        if !self.name_to_index.contains_key(base) {
            return base.to_string();
        }
        (1..)
            .map(|i| format!("{}{}", base, i))
            .find(|candidate| !self.name_to_index.contains_key(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    /// 递归更新全局变换
    fn update_world_recursive(&mut self, idx: usize) {
        let parent_global = match self.nodes.get(idx).and_then(Option::as_ref).and_then(|n| n.parent) {
            Some(parent_idx) => self.nodes[parent_idx]
                .as_ref()
                .map(|p| p.local_to_world)
                .unwrap_or(DMat4::IDENTITY),
            None => DMat4::IDENTITY,
        };

        if let Some(node) = self.nodes.get_mut(idx).and_then(Option::as_mut) {
            node.parent_to_world = parent_global;
            node.local_to_world = parent_global * node.local_to_parent;
        } else {
            return;
        }

        // 递归更新子节点
        let children = self.children_cache[idx].clone();
        for child_idx in children {
            self.update_world_recursive(child_idx);
        }
    }
}

impl SceneHost for SceneGraph {
    fn contains(&self, node: NodeId) -> bool {
        self.node(node).is_some()
    }

    fn name(&self, node: NodeId) -> Option<&str> {
        self.node(node).map(|n| n.name.as_str())
    }

    fn kind(&self, node: NodeId) -> Result<NodeKind> {
        Ok(self.slot(node)?.kind)
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).and_then(|n| n.parent).map(NodeId)
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        if !self.contains(node) {
            return Vec::new();
        }
        self.children_cache[node.0].iter().copied().map(NodeId).collect()
    }

    fn world_matrix(&self, node: NodeId) -> Result<DMat4> {
        Ok(self.slot(node)?.local_to_world)
    }

    fn parent_inverse_matrix(&self, node: NodeId) -> Result<DMat4> {
        mat_inverse(self.slot(node)?.parent_to_world)
    }

    fn local_channels(&self, node: NodeId) -> Result<LocalChannels> {
        Ok(self.slot(node)?.channels)
    }

    fn set_local_channels(&mut self, node: NodeId, channels: &LocalChannels) -> Result<()> {
        let slot = self.slot_mut(node)?;
        if let Some(channel) = slot.locked_change(channels) {
            return Err(RigError::LockedChannel {
                node: slot.name.clone(),
                channel,
            });
        }
        slot.channels = *channels;
        slot.compute_local_transform();
        self.update_world_recursive(node.0);
        Ok(())
    }

    fn create_transient_node(&mut self, name: &str) -> NodeId {
        let name = self.unique_name(name);
        let index = self.nodes.len();
        self.nodes
            .push(Some(SceneNode::new(name.clone(), NodeKind::Transform, LocalChannels::default())));
        self.children_cache.push(Vec::new());
        self.name_to_index.insert(name, index);
        NodeId(index)
    }

    fn delete_node(&mut self, node: NodeId) -> Result<()> {
        if !self.children_cache.get(node.0).map_or(true, Vec::is_empty) {
            return Err(RigError::InvalidTarget(format!(
                "{} still has children",
                self.display_name(node)
            )));
        }
        let removed = self
            .nodes
            .get_mut(node.0)
            .and_then(Option::take)
            .ok_or(RigError::UnknownNode(node))?;
        if let Some(parent) = removed.parent {
            self.children_cache[parent].retain(|&c| c != node.0);
        }
        self.name_to_index.remove(&removed.name);
        Ok(())
    }

    fn channel_locks(&self, node: NodeId) -> Result<ChannelLocks> {
        Ok(self.slot(node)?.locks)
    }

    fn set_channel_locks(&mut self, node: NodeId, locks: ChannelLocks) -> Result<()> {
        self.slot_mut(node)?.locks = locks;
        Ok(())
    }

    /// 平面曲面：法线与 point 无关
    fn surface_normal_at(&self, surface: NodeId, _point: DVec3) -> Result<DVec3> {
        let slot = self.slot(surface)?;
        let local_normal = slot.surface_normal.ok_or_else(|| {
            RigError::InvalidTarget(format!("{} is not a surface", slot.name))
        })?;
        // 法线按逆转置变换，非均匀缩放下仍垂直于平面
        let normal_matrix = DMat3::from_mat4(mat_inverse(slot.local_to_world)?).transpose();
        normalize(normal_matrix * local_normal)
    }

    fn add_attribute(&mut self, node: NodeId, name: &str, kind: AttributeKind, default: f64) -> Result<()> {
        let slot = self.slot_mut(node)?;
        if slot.attributes.contains_key(name) {
            return Err(RigError::InvalidTarget(format!(
                "{} already has attribute '{}'",
                slot.name, name
            )));
        }
        slot.attributes
            .insert(name.to_string(), Attribute { kind, value: 0.0 });
        self.set_attribute(node, name, default)
    }

    fn remove_attribute(&mut self, node: NodeId, name: &str) -> Result<()> {
        self.attribute_slot(node, name)?;
        self.slot_mut(node)?.attributes.remove(name);
        Ok(())
    }

    fn attribute(&self, node: NodeId, name: &str) -> Result<f64> {
        Ok(self.attribute_slot(node, name)?.value)
    }

    fn set_attribute(&mut self, node: NodeId, name: &str, value: f64) -> Result<()> {
        let value = match &self.attribute_slot(node, name)?.kind {
            AttributeKind::Scalar { min, max } => value.clamp(*min, *max),
            AttributeKind::Enum(names) => {
                let index = value.round();
                if value.is_nan() || index < 0.0 || index as usize >= names.len() {
                    return Err(RigError::InvalidTarget(format!(
                        "enum value {} out of range for '{}'",
                        value, name
                    )));
                }
                index
            }
        };
        if let Some(attribute) = self.slot_mut(node)?.attributes.get_mut(name) {
            attribute.value = value;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::RotateOrder;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_world_matrix_propagates() {
        let mut scene = SceneGraph::new();
        let root = scene
            .add_transform(
                "root",
                None,
                LocalChannels::from_translation_rotation(DVec3::new(1.0, 0.0, 0.0), DVec3::new(0.0, 0.0, FRAC_PI_2), RotateOrder::Xyz),
            )
            .unwrap();
        let child = scene
            .add_transform("child", Some(root), LocalChannels::from_translation(DVec3::new(2.0, 0.0, 0.0)))
            .unwrap();
        assert!(scene.world_position(child).unwrap().abs_diff_eq(DVec3::new(1.0, 2.0, 0.0), 1e-12));

        // 修改父节点后子节点跟随
        let mut channels = scene.local_channels(root).unwrap();
        channels.rotate = DVec3::ZERO;
        scene.set_local_channels(root, &channels).unwrap();
        assert!(scene.world_position(child).unwrap().abs_diff_eq(DVec3::new(3.0, 0.0, 0.0), 1e-12));

        let pi = scene.parent_inverse_matrix(child).unwrap();
        assert!((pi * scene.world_matrix(root).unwrap()).abs_diff_eq(DMat4::IDENTITY, 1e-12));
        assert_eq!(scene.parent_inverse_matrix(root).unwrap(), DMat4::IDENTITY);
    }

    #[test]
    fn test_add_joint_at_world_position() {
        let mut scene = SceneGraph::new();
        let a = scene.add_joint_at("a", None, DVec3::new(0.0, 1.0, 0.0)).unwrap();
        let b = scene.add_joint_at("b", Some(a), DVec3::new(3.0, 1.0, 0.0)).unwrap();
        assert!(scene.local_channels(b).unwrap().translate.abs_diff_eq(DVec3::new(3.0, 0.0, 0.0), 1e-12));
        assert!(scene.is_joint(b));
        assert_eq!(scene.children(a), vec![b]);
        assert_eq!(scene.parent(b), Some(a));
        assert_eq!(scene.find("b"), Some(b));
    }

    #[test]
    fn test_joint_orient_in_local_matrix() {
        let mut scene = SceneGraph::new();
        let mut channels = LocalChannels::default();
        channels.joint_orient = DVec3::new(0.0, 0.0, FRAC_PI_2);
        let joint = scene.add_joint("j", None, channels).unwrap();
        let child = scene
            .add_joint("c", Some(joint), LocalChannels::from_translation(DVec3::X))
            .unwrap();
        assert!(scene.world_position(child).unwrap().abs_diff_eq(DVec3::Y, 1e-12));

        // 非关节节点忽略 joint orient
        let xform = scene.add_transform("x", None, channels).unwrap();
        assert_eq!(scene.local_channels(xform).unwrap().joint_orient, DVec3::ZERO);
    }

    #[test]
    fn test_locked_channel_rejected() {
        let mut scene = SceneGraph::new();
        let node = scene.add_transform("n", None, LocalChannels::default()).unwrap();
        scene.set_channel_locks(node, ChannelLocks::ROTATE_Y).unwrap();

        let mut channels = scene.local_channels(node).unwrap();
        channels.translate = DVec3::ONE;
        scene.set_local_channels(node, &channels).unwrap();

        channels.rotate.y = 0.5;
        let err = scene.set_local_channels(node, &channels).unwrap_err();
        assert!(matches!(err, RigError::LockedChannel { channel: "rotateY", .. }));
        assert_eq!(scene.local_channels(node).unwrap().rotate, DVec3::ZERO);
    }

    #[test]
    fn test_transient_and_delete() {
        let mut scene = SceneGraph::new();
        let parent = scene.add_transform("p", None, LocalChannels::default()).unwrap();
        let child = scene.add_transform("c", Some(parent), LocalChannels::default()).unwrap();

        let t0 = scene.create_transient_node("c_pin");
        let t1 = scene.create_transient_node("c_pin");
        assert_ne!(scene.name(t0), scene.name(t1));
        assert!(scene.parent(t0).is_none());

        assert!(scene.delete_node(parent).is_err());
        scene.delete_node(child).unwrap();
        assert!(scene.children(parent).is_empty());
        assert!(!scene.contains(child));
        assert!(matches!(scene.world_matrix(child), Err(RigError::UnknownNode(_))));
        assert!(matches!(scene.delete_node(child), Err(RigError::UnknownNode(_))));

        scene.delete_node(t0).unwrap();
        scene.delete_node(t1).unwrap();
        assert_eq!(scene.len(), 1);
    }

    #[test]
    fn test_attributes() {
        let mut scene = SceneGraph::new();
        let node = scene.add_transform("ctrl", None, LocalChannels::default()).unwrap();
        scene
            .add_attribute(node, "weight", AttributeKind::Scalar { min: 0.0, max: 1.0 }, 0.5)
            .unwrap();
        scene.set_attribute(node, "weight", 3.0).unwrap();
        assert_eq!(scene.attribute(node, "weight").unwrap(), 1.0);
        assert!(scene
            .add_attribute(node, "weight", AttributeKind::Scalar { min: 0.0, max: 1.0 }, 0.0)
            .is_err());

        let names = vec!["world".to_string(), "hips".to_string()];
        scene.add_attribute(node, "space", AttributeKind::Enum(names), 1.0).unwrap();
        assert_eq!(scene.attribute(node, "space").unwrap(), 1.0);
        assert!(scene.set_attribute(node, "space", 2.0).is_err());

        scene.remove_attribute(node, "space").unwrap();
        assert!(scene.attribute(node, "space").is_err());
    }

    #[test]
    fn test_surface_normal() {
        let mut scene = SceneGraph::new();
        let surface = scene
            .add_surface(
                "ground",
                None,
                LocalChannels::from_translation_rotation(DVec3::ZERO, DVec3::new(FRAC_PI_2, 0.0, 0.0), RotateOrder::Xyz),
                DVec3::Y,
            )
            .unwrap();
        let normal = scene.surface_normal_at(surface, DVec3::ZERO).unwrap();
        assert!(normal.abs_diff_eq(DVec3::Z, 1e-12));

        let plain = scene.add_transform("plain", None, LocalChannels::default()).unwrap();
        assert!(matches!(scene.surface_normal_at(plain, DVec3::ZERO), Err(RigError::InvalidTarget(_))));
    }
}
