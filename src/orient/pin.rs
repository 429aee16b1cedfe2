//! 子节点固定
//!
//! 修改节点自身本地变换之前，把每个子节点的世界变换交给一个无父级的
//! 临时快照节点驱动，修改完成后再按快照重新求解子节点。
//! 临时节点只属于当前 PinSession，会话结束（unpin 或 Drop）时删除。

use crate::config::get_config;
use crate::constraint::{ConstraintChannels, MatrixConstraint};
use crate::math::{decompose, RotateOrder};
use crate::scene::{ChannelLocks, LocalChannels, NodeId, SceneHost};
use crate::Result;

// ============================================================================
// 锁定快照
// ============================================================================

/// 通道锁定状态快照
#[derive(Clone, Copy, Debug)]
pub(crate) struct LockSnapshot {
    node: NodeId,
    locks: ChannelLocks,
}

impl LockSnapshot {
    /// 记录当前锁定状态并解锁全部通道
    pub(crate) fn capture_and_unlock<H: SceneHost + ?Sized>(host: &mut H, node: NodeId) -> Result<Self> {
        let locks = host.channel_locks(node)?;
        host.set_channel_locks(node, ChannelLocks::empty())?;
        Ok(Self { node, locks })
    }

    pub(crate) fn restore<H: SceneHost + ?Sized>(&self, host: &mut H) {
        if let Err(err) = host.set_channel_locks(self.node, self.locks) {
            log::warn!("[Pin] 恢复 '{}' 的通道锁失败: {}", host.display_name(self.node), err);
        }
    }
}

// ============================================================================
// 固定会话
// ============================================================================

/// 单个被固定的子节点
#[derive(Debug)]
struct PinnedChild {
    child: NodeId,
    /// 快照节点（无父级）
    transient: NodeId,
    /// 快照 → 子节点，写回的通道由 hold 时决定
    constraint: MatrixConstraint,
}

/// 固定会话
///
/// 持有宿主的独占借用；定向期间通过 [`PinSession::host_mut`] 访问宿主。
/// 无论正常结束还是提前返回，Drop 都会删除临时节点并按捕获的逆序恢复通道锁。
pub struct PinSession<'h, H: SceneHost + ?Sized> {
    host: &'h mut H,
    node: NodeId,
    pins: Vec<PinnedChild>,
    locks: Vec<LockSnapshot>,
    released: bool,
}

/// 固定 node 的子节点
///
/// 单个子节点固定失败只记录警告，继续固定其余子节点。
pub fn pin<'h, H: SceneHost + ?Sized>(host: &'h mut H, node: NodeId, children: &[NodeId]) -> PinSession<'h, H> {
    let mut session = PinSession {
        host,
        node,
        pins: Vec::with_capacity(children.len()),
        locks: Vec::with_capacity(children.len()),
        released: false,
    };

    for &child in children {
        if let Err(err) = session.pin_child(child) {
            log::warn!(
                "[Pin] 子节点 '{}' 固定失败，跳过: {}",
                session.host.display_name(child),
                err
            );
        }
    }

    if get_config().debug_log {
        log::info!(
            "[Pin] '{}' 固定 {}/{} 个子节点",
            session.host.display_name(node),
            session.pins.len(),
            children.len()
        );
    }
    session
}

impl<'h, H: SceneHost + ?Sized> PinSession<'h, H> {
    fn pin_child(&mut self, child: NodeId) -> Result<()> {
        // 先确认子节点有有效变换，再改动锁定状态
        let snapshot = decompose(self.host.world_matrix(child)?, RotateOrder::Xyz)?;
        self.locks.push(LockSnapshot::capture_and_unlock(&mut *self.host, child)?);

        let name = format!("{}_pin", self.host.display_name(child));
        let transient = self.host.create_transient_node(&name);
        let channels = LocalChannels {
            translate: snapshot.translate,
            rotate: snapshot.rotate,
            scale: snapshot.scale,
            ..LocalChannels::default()
        };

        // 保持偏移：分解丢失的误差也被偏移矩阵吸收
        let constraint = self
            .host
            .set_local_channels(transient, &channels)
            .and_then(|_| MatrixConstraint::build(&*self.host, transient, child, true, true));

        match constraint {
            Ok(constraint) => {
                self.pins.push(PinnedChild {
                    child,
                    transient,
                    constraint,
                });
                Ok(())
            }
            Err(err) => {
                if let Err(delete_err) = self.host.delete_node(transient) {
                    log::warn!("[Pin] 删除临时节点失败: {}", delete_err);
                }
                Err(err)
            }
        }
    }

    /// 被定向的节点
    #[inline]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// 已固定的子节点（按固定顺序）
    pub fn pinned_children(&self) -> Vec<NodeId> {
        self.pins.iter().map(|p| p.child).collect()
    }

    #[inline]
    pub fn host(&self) -> &H {
        &*self.host
    }

    #[inline]
    pub fn host_mut(&mut self) -> &mut H {
        &mut *self.host
    }

    /// 按快照重新求解所有子节点的平移和旋转
    ///
    /// 节点自身变换改变后调用。子节点的缩放通道不动，
    /// 节点缩放的变化会传到子节点的世界缩放。
    pub fn hold(&mut self) {
        self.hold_channels(ConstraintChannels::TRANSLATE | ConstraintChannels::ROTATE);
    }

    /// 按快照重新求解所有子节点的指定通道
    ///
    /// 包含 SCALE 时子节点的完整世界矩阵保持不变。单个子节点失败只记录警告。
    pub fn hold_channels(&mut self, channels: ConstraintChannels) {
        for pinned in &self.pins {
            let constraint = pinned.constraint.clone().with_channels(channels);
            if let Err(err) = constraint.apply(&mut *self.host) {
                log::warn!(
                    "[Pin] 子节点 '{}' 无法保持世界变换: {}",
                    self.host.display_name(pinned.child),
                    err
                );
            }
        }
    }

    /// 解除固定：删除临时节点，按逆序恢复通道锁
    pub fn unpin(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        for pinned in self.pins.drain(..).rev() {
            if let Err(err) = self.host.delete_node(pinned.transient) {
                log::warn!("[Pin] 删除临时节点失败: {}", err);
            }
        }
        for snapshot in self.locks.drain(..).rev() {
            snapshot.restore(&mut *self.host);
        }

        if get_config().debug_log {
            log::info!("[Pin] '{}' 解除固定", self.host.display_name(self.node));
        }
    }
}

impl<'h, H: SceneHost + ?Sized> Drop for PinSession<'h, H> {
    fn drop(&mut self) {
        self.release();
    }
}
