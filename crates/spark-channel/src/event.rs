use core::fmt;

/// 事件在管线中的传播方向。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// 自头部向尾部，由传输层驱动。
    Inbound,
    /// 自尾部向头部，由应用发起。
    Outbound,
}

/// 管线可调度的全部事件类型。
///
/// # 教案式说明
/// - **意图（Why）**：Handler 通过 [`EventSet`] 声明自己实现了哪些事件，管线据此跳过无关节点，
///   并以事件类型为键缓存“下一个目标”。
/// - **契约（What）**：`index()` 在 `[0, COUNT)` 内且两两不同；`direction()` 对入站与出站事件各自固定。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventKind {
    /// 通道已注册。
    ChannelOpen,
    /// 通道已连通。
    ChannelActive,
    /// 通道已断开。
    ChannelInactive,
    /// 入站消息。
    MessageUpdated,
    /// 处理过程中捕获的异常。
    ExceptionCaught,
    /// 应用自定义事件。
    UserEvent,
    /// 读取暂停或恢复。
    ReadSuspended,
    Bind,
    Connect,
    Disconnect,
    Close,
    Write,
    Flush,
    Read,
}

impl EventKind {
    pub const COUNT: usize = 14;

    pub const ALL: [EventKind; Self::COUNT] = [
        EventKind::ChannelOpen,
        EventKind::ChannelActive,
        EventKind::ChannelInactive,
        EventKind::MessageUpdated,
        EventKind::ExceptionCaught,
        EventKind::UserEvent,
        EventKind::ReadSuspended,
        EventKind::Bind,
        EventKind::Connect,
        EventKind::Disconnect,
        EventKind::Close,
        EventKind::Write,
        EventKind::Flush,
        EventKind::Read,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn direction(self) -> Direction {
        match self {
            EventKind::ChannelOpen
            | EventKind::ChannelActive
            | EventKind::ChannelInactive
            | EventKind::MessageUpdated
            | EventKind::ExceptionCaught
            | EventKind::UserEvent
            | EventKind::ReadSuspended => Direction::Inbound,
            EventKind::Bind
            | EventKind::Connect
            | EventKind::Disconnect
            | EventKind::Close
            | EventKind::Write
            | EventKind::Flush
            | EventKind::Read => Direction::Outbound,
        }
    }

    /// 日志字段 `pipeline.event` 使用的稳定标签。
    pub const fn label(self) -> &'static str {
        match self {
            EventKind::ChannelOpen => "channel_open",
            EventKind::ChannelActive => "channel_active",
            EventKind::ChannelInactive => "channel_inactive",
            EventKind::MessageUpdated => "message_updated",
            EventKind::ExceptionCaught => "exception_caught",
            EventKind::UserEvent => "user_event",
            EventKind::ReadSuspended => "read_suspended",
            EventKind::Bind => "bind",
            EventKind::Connect => "connect",
            EventKind::Disconnect => "disconnect",
            EventKind::Close => "close",
            EventKind::Write => "write",
            EventKind::Flush => "flush",
            EventKind::Read => "read",
        }
    }

    const fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

/// Handler 声明实现的事件集合。
///
/// 未包含在集合内的事件会被管线直接越过该 Handler，等价于“原样转发”。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventSet(u16);

impl EventSet {
    pub const EMPTY: EventSet = EventSet(0);
    pub const INBOUND: EventSet = EventSet::of(&[
        EventKind::ChannelOpen,
        EventKind::ChannelActive,
        EventKind::ChannelInactive,
        EventKind::MessageUpdated,
        EventKind::ExceptionCaught,
        EventKind::UserEvent,
        EventKind::ReadSuspended,
    ]);
    pub const OUTBOUND: EventSet = EventSet::of(&[
        EventKind::Bind,
        EventKind::Connect,
        EventKind::Disconnect,
        EventKind::Close,
        EventKind::Write,
        EventKind::Flush,
        EventKind::Read,
    ]);
    pub const ALL: EventSet = EventSet::INBOUND.union(EventSet::OUTBOUND);

    pub const fn of(kinds: &[EventKind]) -> Self {
        let mut bits = 0;
        let mut cursor = 0;
        while cursor < kinds.len() {
            bits |= kinds[cursor].bit();
            cursor += 1;
        }
        EventSet(bits)
    }

    pub const fn with(self, kind: EventKind) -> Self {
        EventSet(self.0 | kind.bit())
    }

    pub const fn without(self, kind: EventKind) -> Self {
        EventSet(self.0 & !kind.bit())
    }

    pub const fn union(self, other: EventSet) -> Self {
        EventSet(self.0 | other.0)
    }

    pub const fn contains(self, kind: EventKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = EventKind> {
        EventKind::ALL
            .into_iter()
            .filter(move |kind| self.contains(*kind))
    }
}

impl fmt::Debug for EventSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.iter().map(EventKind::label))
            .finish()
    }
}

impl FromIterator<EventKind> for EventSet {
    fn from_iter<I: IntoIterator<Item = EventKind>>(iter: I) -> Self {
        iter.into_iter().fold(EventSet::EMPTY, EventSet::with)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_are_dense_and_ordered() {
        for (position, kind) in EventKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), position);
        }
    }

    #[test]
    fn direction_partitions_all_events() {
        for kind in EventKind::ALL {
            let inbound = EventSet::INBOUND.contains(kind);
            let outbound = EventSet::OUTBOUND.contains(kind);
            assert_ne!(inbound, outbound, "{kind:?} 必须恰属一个方向");
            assert_eq!(inbound, kind.direction() == Direction::Inbound);
        }
        assert_eq!(EventSet::ALL.iter().count(), EventKind::COUNT);
    }

    #[test]
    fn set_operations() {
        let set = EventSet::of(&[EventKind::Write, EventKind::Flush]).without(EventKind::Flush);
        assert!(set.contains(EventKind::Write));
        assert!(!set.contains(EventKind::Flush));
        assert!(EventSet::EMPTY.is_empty());
        let collected: EventSet = [EventKind::Read].into_iter().collect();
        assert_eq!(format!("{collected:?}"), "{\"read\"}");
    }
}
