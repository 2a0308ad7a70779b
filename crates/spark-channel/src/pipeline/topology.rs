use std::{collections::HashMap, sync::Arc};

use tracing::trace;

use crate::{
    error::PipelineError,
    event::{Direction, EventKind, EventSet},
    handler::ChannelHandler,
};

/// Handler 上下文在管线中的稳定标识。
///
/// # 教案式说明
/// - **意图（Why）**：上下文存放在竞技场（arena）中，以下标互相引用；下标会在节点回收后复用，
///   因此需要配合版本戳区分“同一槽位的不同节点”。
/// - **契约（What）**：标识在节点存活期间保持不变；槽位复用后旧标识不再解析到任何节点。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContextId {
    slot: u32,
    stamp: u32,
}

impl ContextId {
    pub(crate) const HEAD: ContextId = ContextId { slot: 0, stamp: 0 };
    pub(crate) const TAIL: ContextId = ContextId { slot: 1, stamp: 0 };

    /// 以 `stamp << 32 | slot` 编码的原始值，便于日志关联。
    pub fn raw(self) -> u64 {
        (u64::from(self.stamp) << 32) | u64::from(self.slot)
    }
}

#[derive(Clone, Copy)]
struct CacheEntry {
    generation: u64,
    target: ContextId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum NodeState {
    /// 已预留名称、正在执行 `before_add`，尚未接入链表。
    Pending,
    Linked,
    /// 已移除；保留移除时的邻居，等待无派发进行时回收。
    Retired,
}

pub(crate) struct Node {
    pub(crate) name: Arc<str>,
    pub(crate) handler: Arc<dyn ChannelHandler>,
    pub(crate) interests: EventSet,
    pub(crate) state: NodeState,
    prev: Option<ContextId>,
    next: Option<ContextId>,
    cache: [Option<CacheEntry>; EventKind::COUNT],
}

impl Node {
    fn new(
        name: Arc<str>,
        handler: Arc<dyn ChannelHandler>,
        state: NodeState,
        prev: Option<ContextId>,
        next: Option<ContextId>,
    ) -> Self {
        let interests = handler.interests();
        Self {
            name,
            handler,
            interests,
            state,
            prev,
            next,
            cache: [None; EventKind::COUNT],
        }
    }

    fn step(&self, direction: Direction) -> Option<ContextId> {
        match direction {
            Direction::Inbound => self.next,
            Direction::Outbound => self.prev,
        }
    }
}

struct Slot {
    stamp: u32,
    node: Option<Node>,
}

/// 插入位置。
pub(crate) enum Position<'a> {
    First,
    Last,
    Before(&'a str),
    After(&'a str),
}

impl Position<'_> {
    fn anchor(&self) -> &str {
        match self {
            Position::First => "head",
            Position::Last => "tail",
            Position::Before(name) | Position::After(name) => name,
        }
    }
}

/// 管线拓扑：节点竞技场、名称索引与拓扑代数。
///
/// 所有方法都在管线的自旋锁内调用，且不会回调 Handler。
pub(crate) struct Topology {
    slots: Vec<Slot>,
    free: Vec<u32>,
    retired: Vec<ContextId>,
    names: HashMap<Arc<str>, ContextId>,
    generation: u64,
    in_flight: usize,
}

impl Topology {
    pub(crate) fn new(head: Arc<dyn ChannelHandler>, tail: Arc<dyn ChannelHandler>) -> Self {
        let head = Node::new(
            Arc::from("head"),
            head,
            NodeState::Linked,
            None,
            Some(ContextId::TAIL),
        );
        let tail = Node::new(
            Arc::from("tail"),
            tail,
            NodeState::Linked,
            Some(ContextId::HEAD),
            None,
        );
        Self {
            slots: vec![
                Slot {
                    stamp: 0,
                    node: Some(head),
                },
                Slot {
                    stamp: 0,
                    node: Some(tail),
                },
            ],
            free: Vec::new(),
            retired: Vec::new(),
            names: HashMap::new(),
            generation: 0,
            in_flight: 0,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn node(&self, id: ContextId) -> Option<&Node> {
        let slot = self.slots.get(id.slot as usize)?;
        if slot.stamp != id.stamp {
            return None;
        }
        slot.node.as_ref()
    }

    fn node_mut(&mut self, id: ContextId) -> Option<&mut Node> {
        let slot = self.slots.get_mut(id.slot as usize)?;
        if slot.stamp != id.stamp {
            return None;
        }
        slot.node.as_mut()
    }

    /// 按名称查找已接入链表的节点。
    pub(crate) fn lookup(&self, name: &str) -> Option<ContextId> {
        let id = *self.names.get(name)?;
        let node = self.node(id)?;
        (node.state == NodeState::Linked).then_some(id)
    }

    /// 名称是否已被占用（包括正在添加中的节点）。
    pub(crate) fn is_taken(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// 解析插入位置，返回新节点的 `(prev, next)`。
    pub(crate) fn resolve(
        &self,
        position: &Position<'_>,
    ) -> Result<(ContextId, ContextId), PipelineError> {
        let anchor = |name: &str| {
            self.lookup(name)
                .ok_or_else(|| PipelineError::NoSuchName(name.to_owned()))
        };
        let links = |id: ContextId| self.node(id).map(|node| (node.prev, node.next));
        let (prev, next) = match position {
            Position::First => (Some(ContextId::HEAD), links(ContextId::HEAD).and_then(|l| l.1)),
            Position::Last => (links(ContextId::TAIL).and_then(|l| l.0), Some(ContextId::TAIL)),
            Position::Before(name) => {
                let id = anchor(name)?;
                (links(id).and_then(|l| l.0), Some(id))
            }
            Position::After(name) => {
                let id = anchor(name)?;
                (Some(id), links(id).and_then(|l| l.1))
            }
        };
        match (prev, next) {
            (Some(prev), Some(next)) => Ok((prev, next)),
            _ => Err(PipelineError::NoSuchName(position.anchor().to_owned())),
        }
    }

    /// 为新节点分配槽位并预留名称，节点暂不接入链表。
    pub(crate) fn reserve(
        &mut self,
        name: Arc<str>,
        handler: Arc<dyn ChannelHandler>,
        prev: ContextId,
        next: ContextId,
        claim_name: bool,
    ) -> ContextId {
        let node = Node::new(
            Arc::clone(&name),
            handler,
            NodeState::Pending,
            Some(prev),
            Some(next),
        );
        let id = match self.free.pop() {
            Some(slot) => {
                let entry = &mut self.slots[slot as usize];
                entry.node = Some(node);
                ContextId {
                    slot,
                    stamp: entry.stamp,
                }
            }
            None => {
                let slot = self.slots.len() as u32;
                self.slots.push(Slot {
                    stamp: 0,
                    node: Some(node),
                });
                ContextId { slot, stamp: 0 }
            }
        };
        if claim_name {
            self.names.insert(name, id);
        }
        id
    }

    /// 把预留节点接入 `prev` 与 `next` 之间，返回新的拓扑代数。
    pub(crate) fn link(&mut self, id: ContextId, prev: ContextId, next: ContextId) -> u64 {
        if let Some(node) = self.node_mut(id) {
            node.prev = Some(prev);
            node.next = Some(next);
            node.state = NodeState::Linked;
        }
        if let Some(node) = self.node_mut(prev) {
            node.next = Some(id);
        }
        if let Some(node) = self.node_mut(next) {
            node.prev = Some(id);
        }
        self.bump()
    }

    /// 放弃未接入的预留节点。
    pub(crate) fn abandon(&mut self, id: ContextId) {
        let Some(node) = self.node_mut(id) else {
            return;
        };
        node.state = NodeState::Retired;
        let name = Arc::clone(&node.name);
        self.release_name(&name, id);
        self.retired.push(id);
        self.reclaim_if_idle();
    }

    /// 把节点移出链表并转为墓碑，邻居指针保持移除时的值。返回新的拓扑代数。
    pub(crate) fn unlink(&mut self, id: ContextId) -> Option<u64> {
        let node = self.node_mut(id)?;
        if node.state != NodeState::Linked {
            return None;
        }
        node.state = NodeState::Retired;
        let (prev, next, name) = (node.prev, node.next, Arc::clone(&node.name));
        if let Some(prev_node) = prev.and_then(|prev| self.node_mut(prev)) {
            prev_node.next = next;
        }
        if let Some(next_node) = next.and_then(|next| self.node_mut(next)) {
            next_node.prev = prev;
        }
        self.release_name(&name, id);
        self.retired.push(id);
        let generation = self.bump();
        self.reclaim_if_idle();
        Some(generation)
    }

    /// 以预留节点 `new` 原位替换 `old`；`old` 的邻居指向 `new`，
    /// 使正在 `old` 中执行的回调继续转发时到达替换者。
    pub(crate) fn swap(&mut self, old: ContextId, new: ContextId) -> Option<u64> {
        let old_node = self.node(old)?;
        if old_node.state != NodeState::Linked {
            return None;
        }
        let (prev, next, old_name) = (old_node.prev?, old_node.next?, Arc::clone(&old_node.name));
        let new_name = Arc::clone(&self.node(new)?.name);
        if let Some(node) = self.node_mut(old) {
            node.prev = Some(new);
            node.next = Some(new);
            node.state = NodeState::Retired;
        }
        self.release_name(&old_name, old);
        self.names.insert(new_name, new);
        self.retired.push(old);
        let generation = self.link(new, prev, next);
        self.reclaim_if_idle();
        Some(generation)
    }

    fn release_name(&mut self, name: &str, id: ContextId) {
        if self.names.get(name) == Some(&id) {
            self.names.remove(name);
        }
    }

    fn bump(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    pub(crate) fn enter(&mut self) {
        self.in_flight += 1;
    }

    pub(crate) fn exit(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.reclaim_if_idle();
    }

    fn reclaim_if_idle(&mut self) {
        if self.in_flight != 0 {
            return;
        }
        for id in self.retired.drain(..) {
            if let Some(slot) = self.slots.get_mut(id.slot as usize)
                && slot.stamp == id.stamp
            {
                slot.node = None;
                slot.stamp = slot.stamp.wrapping_add(1);
                self.free.push(id.slot);
            }
        }
    }

    /// 从 `from` 出发、沿事件方向第一个声明了 `kind` 的已接入节点。
    ///
    /// 已接入节点的结果按拓扑代数缓存；墓碑与预留节点每次都重新遍历。
    pub(crate) fn next_target(&mut self, from: ContextId, kind: EventKind) -> Option<ContextId> {
        let generation = self.generation;
        let origin = self.node(from)?;
        let cacheable = origin.state == NodeState::Linked;
        if cacheable
            && let Some(entry) = origin.cache[kind.index()]
            && entry.generation == generation
        {
            return Some(entry.target);
        }

        let direction = kind.direction();
        let mut cursor = origin.step(direction)?;
        loop {
            let candidate = self.node(cursor)?;
            if candidate.state == NodeState::Linked && candidate.interests.contains(kind) {
                break;
            }
            cursor = candidate.step(direction)?;
        }

        if cacheable && let Some(origin) = self.node_mut(from) {
            trace!(
                pipeline.handler = %origin.name,
                pipeline.event = kind.label(),
                pipeline.generation = generation,
                "recomputed neighbour cache"
            );
            origin.cache[kind.index()] = Some(CacheEntry {
                generation,
                target: cursor,
            });
        }
        Some(cursor)
    }

    /// 自头到尾的已接入节点，不含头尾哨兵。
    pub(crate) fn ordered(&self) -> Vec<ContextId> {
        let mut ids = Vec::new();
        let mut cursor = self.node(ContextId::HEAD).and_then(|node| node.next);
        while let Some(id) = cursor {
            if id == ContextId::TAIL {
                break;
            }
            let Some(node) = self.node(id) else {
                break;
            };
            ids.push(id);
            cursor = node.next;
        }
        ids
    }

    pub(crate) fn is_retired(&self, id: ContextId) -> bool {
        self.node(id)
            .is_none_or(|node| node.state == NodeState::Retired)
    }

    #[cfg(test)]
    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }
}
