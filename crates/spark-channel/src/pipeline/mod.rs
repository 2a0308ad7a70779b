//! Handler 管线：拓扑维护与事件派发。
//!
//! # 教案式说明
//! - **意图（Why）**：把协议栈拆成一串可插拔的 Handler，入站事件自头向尾、出站操作自尾向头
//!   依次经过它们；运行期还需要动态增删 Handler（例如握手完成后移除握手处理器）。
//! - **逻辑（How）**：
//!   - 上下文存放在竞技场中，以带版本戳的 [`ContextId`] 互相链接，头尾为内置哨兵；
//!   - 每次拓扑变化递增代数，派发时按 `(上下文, 事件)` 缓存下一个目标并以代数校验；
//!   - 拓扑由自旋锁保护，锁只在查找与修改时持有，执行 Handler 回调时一律释放；
//!   - 被移除的上下文成为墓碑，保留移除时的邻居，直到没有派发在进行时才回收槽位。
//! - **契约（What）**：
//!   - 拓扑操作失败时管线保持原状；名称在管线内唯一；
//!   - 头部把出站操作交给 [`Transport`]，非字节流消息使写入通知失败；
//!   - 尾部丢弃未消费的入站事件，未处理的异常记录告警并按 [`PipelineSettings`] 关闭通道。
//! - **风险（Trade-offs）**：派发是同步递归调用，调用栈深度与 Handler 数量成正比。

mod ends;
mod topology;

use std::{
    net::SocketAddr,
    sync::{Arc, Weak},
};

use spin::Mutex;
use tracing::{debug, warn};

use crate::{
    context::HandlerContext,
    error::{ChannelError, PipelineError},
    event::{Direction, EventKind, EventSet},
    event_loop::EventLoop,
    factory::PipelineFactory,
    future::CompletionFuture,
    handler::{ChannelHandler, HandlerResult},
    message::{PipelineMessage, UserEvent},
    settings::PipelineSettings,
    transport::Transport,
};

use self::{
    ends::{HeadHandler, TailHandler},
    topology::{NodeState, Position, Topology},
};

pub use self::topology::ContextId;

/// 在管线中传播的一次事件及其参数。
pub(crate) enum Event {
    ChannelOpen,
    ChannelActive,
    ChannelInactive,
    MessageUpdated(PipelineMessage),
    ExceptionCaught(ChannelError),
    UserEvent(UserEvent),
    ReadSuspended(bool),
    Bind(SocketAddr, CompletionFuture),
    Connect(SocketAddr, Option<SocketAddr>, CompletionFuture),
    Disconnect(CompletionFuture),
    Close(CompletionFuture),
    Write(PipelineMessage, CompletionFuture),
    Flush,
    Read,
}

impl Event {
    fn kind(&self) -> EventKind {
        match self {
            Event::ChannelOpen => EventKind::ChannelOpen,
            Event::ChannelActive => EventKind::ChannelActive,
            Event::ChannelInactive => EventKind::ChannelInactive,
            Event::MessageUpdated(_) => EventKind::MessageUpdated,
            Event::ExceptionCaught(_) => EventKind::ExceptionCaught,
            Event::UserEvent(_) => EventKind::UserEvent,
            Event::ReadSuspended(_) => EventKind::ReadSuspended,
            Event::Bind(..) => EventKind::Bind,
            Event::Connect(..) => EventKind::Connect,
            Event::Disconnect(_) => EventKind::Disconnect,
            Event::Close(_) => EventKind::Close,
            Event::Write(..) => EventKind::Write,
            Event::Flush => EventKind::Flush,
            Event::Read => EventKind::Read,
        }
    }

    fn future(&self) -> Option<&CompletionFuture> {
        match self {
            Event::Bind(_, future)
            | Event::Connect(_, _, future)
            | Event::Disconnect(future)
            | Event::Close(future)
            | Event::Write(_, future) => Some(future),
            _ => None,
        }
    }

    fn deliver(self, handler: &dyn ChannelHandler, ctx: &HandlerContext<'_>) -> HandlerResult {
        match self {
            Event::ChannelOpen => handler.channel_open(ctx),
            Event::ChannelActive => handler.channel_active(ctx),
            Event::ChannelInactive => handler.channel_inactive(ctx),
            Event::MessageUpdated(message) => handler.message_updated(ctx, message),
            Event::ExceptionCaught(error) => handler.exception_caught(ctx, error),
            Event::UserEvent(event) => handler.user_event(ctx, event),
            Event::ReadSuspended(suspended) => handler.read_suspended(ctx, suspended),
            Event::Bind(local, future) => handler.bind(ctx, local, future),
            Event::Connect(remote, local, future) => handler.connect(ctx, remote, local, future),
            Event::Disconnect(future) => handler.disconnect(ctx, future),
            Event::Close(future) => handler.close(ctx, future),
            Event::Write(message, future) => handler.write(ctx, message, future),
            Event::Flush => handler.flush(ctx),
            Event::Read => handler.read(ctx),
        }
    }
}

/// 拓扑变更类型，用作日志字段。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mutation {
    Add,
    Remove,
    Replace,
}

impl Mutation {
    fn label(self) -> &'static str {
        match self {
            Mutation::Add => "add",
            Mutation::Remove => "remove",
            Mutation::Replace => "replace",
        }
    }
}

/// 管线中某个 Handler 的只读登记信息。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerRegistration {
    id: ContextId,
    name: String,
    interests: EventSet,
}

impl HandlerRegistration {
    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interests(&self) -> EventSet {
        self.interests
    }
}

/// 进入派发或拓扑操作期间持有，保证墓碑不会在使用中被回收。
struct InFlight<'a> {
    pipeline: &'a Pipeline,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.pipeline.topology.lock().exit();
    }
}

/// [`Pipeline`] 的构建器。
pub struct PipelineBuilder {
    transport: Arc<dyn Transport>,
    event_loop: Option<EventLoop>,
    settings: PipelineSettings,
}

impl PipelineBuilder {
    /// 绑定事件循环；管线创建的完成通知会拒绝在该循环上阻塞等待。
    pub fn event_loop(mut self, event_loop: EventLoop) -> Self {
        self.event_loop = Some(event_loop);
        self
    }

    pub fn settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Arc<Pipeline> {
        Arc::new_cyclic(|weak: &Weak<Pipeline>| {
            let owner = Weak::clone(weak);
            let void_future = CompletionFuture::void(move |error| match owner.upgrade() {
                Some(pipeline) => pipeline.fire_exception_caught(error),
                None => debug!(error = %error, "void future failed after its pipeline was dropped"),
            });
            Pipeline {
                topology: Mutex::new(Topology::new(Arc::new(HeadHandler), Arc::new(TailHandler))),
                transport: self.transport,
                event_loop: self.event_loop,
                settings: self.settings,
                void_future,
            }
        })
    }

    /// 构建后交给工厂填充 Handler。
    pub fn build_with(self, factory: &dyn PipelineFactory) -> Result<Arc<Pipeline>, PipelineError> {
        let pipeline = self.build();
        factory.populate(&pipeline)?;
        Ok(pipeline)
    }
}

/// 通道的 Handler 管线。
pub struct Pipeline {
    topology: Mutex<Topology>,
    transport: Arc<dyn Transport>,
    event_loop: Option<EventLoop>,
    settings: PipelineSettings,
    void_future: CompletionFuture,
}

impl Pipeline {
    /// 以默认配置创建管线。
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        Self::builder(transport).build()
    }

    pub fn builder(transport: Arc<dyn Transport>) -> PipelineBuilder {
        PipelineBuilder {
            transport,
            event_loop: None,
            settings: PipelineSettings::default(),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn event_loop(&self) -> Option<&EventLoop> {
        self.event_loop.as_ref()
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// 当前拓扑代数，每次增删改递增。
    pub fn generation(&self) -> u64 {
        self.topology.lock().generation()
    }

    /// 新的完成通知，归属于管线绑定的事件循环。
    pub fn new_future(&self) -> CompletionFuture {
        CompletionFuture::with_owner(self.event_loop.as_ref().map(EventLoop::id))
    }

    /// 管线共享的空通知：失败转为 `exception_caught`。
    pub fn void_future(&self) -> CompletionFuture {
        self.void_future.clone()
    }

    pub fn add_first(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn ChannelHandler>,
    ) -> Result<(), PipelineError> {
        self.insert(name.into(), handler, Position::First)
    }

    pub fn add_last(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn ChannelHandler>,
    ) -> Result<(), PipelineError> {
        self.insert(name.into(), handler, Position::Last)
    }

    pub fn add_before(
        &self,
        anchor: &str,
        name: impl Into<String>,
        handler: Arc<dyn ChannelHandler>,
    ) -> Result<(), PipelineError> {
        self.insert(name.into(), handler, Position::Before(anchor))
    }

    pub fn add_after(
        &self,
        anchor: &str,
        name: impl Into<String>,
        handler: Arc<dyn ChannelHandler>,
    ) -> Result<(), PipelineError> {
        self.insert(name.into(), handler, Position::After(anchor))
    }

    fn insert(
        &self,
        name: String,
        handler: Arc<dyn ChannelHandler>,
        position: Position<'_>,
    ) -> Result<(), PipelineError> {
        let _in_flight = self.enter();
        let name: Arc<str> = Arc::from(name);
        let id = {
            let mut topology = self.topology.lock();
            if topology.is_taken(&name) {
                return Err(PipelineError::DuplicateName(name.to_string()));
            }
            let (prev, next) = topology.resolve(&position)?;
            topology.reserve(Arc::clone(&name), Arc::clone(&handler), prev, next, true)
        };

        let ctx = HandlerContext::new(self, id, Arc::clone(&name));
        if let Err(source) = handler.before_add(&ctx) {
            self.topology.lock().abandon(id);
            warn!(pipeline.handler = %name, error = %source, "handler refused to be added");
            return Err(PipelineError::HandlerRejected {
                name: name.to_string(),
                stage: "before_add",
                source,
            });
        }

        let generation = {
            let mut topology = self.topology.lock();
            match topology.resolve(&position) {
                Ok((prev, next)) => topology.link(id, prev, next),
                Err(error) => {
                    topology.abandon(id);
                    return Err(error);
                }
            }
        };
        debug!(
            pipeline.handler = %name,
            pipeline.mutation = Mutation::Add.label(),
            pipeline.generation = generation,
            "pipeline topology changed"
        );

        if let Err(error) = handler.after_add(&ctx) {
            warn!(pipeline.handler = %name, error = %error, "after_add callback failed");
        }
        Ok(())
    }

    /// 移除并返回指定 Handler。
    pub fn remove(&self, name: &str) -> Result<Arc<dyn ChannelHandler>, PipelineError> {
        let _in_flight = self.enter();
        let (id, name, handler) = self.resolve_linked(name)?;
        let ctx = HandlerContext::new(self, id, Arc::clone(&name));
        if let Err(error) = handler.before_remove(&ctx) {
            warn!(pipeline.handler = %name, error = %error, "before_remove callback failed");
        }

        let generation = self
            .topology
            .lock()
            .unlink(id)
            .ok_or_else(|| PipelineError::NoSuchName(name.to_string()))?;
        debug!(
            pipeline.handler = %name,
            pipeline.mutation = Mutation::Remove.label(),
            pipeline.generation = generation,
            "pipeline topology changed"
        );

        if let Err(error) = handler.after_remove(&ctx) {
            warn!(pipeline.handler = %name, error = %error, "after_remove callback failed");
        }
        Ok(handler)
    }

    /// 以新 Handler 原位替换 `old`，返回被替换的 Handler。
    ///
    /// 正在旧 Handler 中执行的回调若继续转发，事件会先到达替换者。
    pub fn replace(
        &self,
        old: &str,
        new_name: impl Into<String>,
        handler: Arc<dyn ChannelHandler>,
    ) -> Result<Arc<dyn ChannelHandler>, PipelineError> {
        let _in_flight = self.enter();
        let new_name: Arc<str> = Arc::from(new_name.into());
        let (old_id, old_name, old_handler) = self.resolve_linked(old)?;
        let same_name = *new_name == *old_name;
        let new_id = {
            let mut topology = self.topology.lock();
            if !same_name && topology.is_taken(&new_name) {
                return Err(PipelineError::DuplicateName(new_name.to_string()));
            }
            let (prev, next) = topology.resolve(&Position::Before(&old_name))?;
            topology.reserve(Arc::clone(&new_name), Arc::clone(&handler), prev, old_id, !same_name)
        };

        let new_ctx = HandlerContext::new(self, new_id, Arc::clone(&new_name));
        if let Err(source) = handler.before_add(&new_ctx) {
            self.topology.lock().abandon(new_id);
            warn!(pipeline.handler = %new_name, error = %source, "handler refused to be added");
            return Err(PipelineError::HandlerRejected {
                name: new_name.to_string(),
                stage: "before_add",
                source,
            });
        }
        let old_ctx = HandlerContext::new(self, old_id, Arc::clone(&old_name));
        if let Err(error) = old_handler.before_remove(&old_ctx) {
            warn!(pipeline.handler = %old_name, error = %error, "before_remove callback failed");
        }

        let swapped = {
            let mut topology = self.topology.lock();
            let swapped = topology.swap(old_id, new_id);
            if swapped.is_none() {
                topology.abandon(new_id);
            }
            swapped
        };
        let Some(generation) = swapped else {
            return Err(PipelineError::NoSuchName(old_name.to_string()));
        };
        debug!(
            pipeline.handler = %new_name,
            pipeline.replaced = %old_name,
            pipeline.mutation = Mutation::Replace.label(),
            pipeline.generation = generation,
            "pipeline topology changed"
        );

        if let Err(error) = handler.after_add(&new_ctx) {
            warn!(pipeline.handler = %new_name, error = %error, "after_add callback failed");
        }
        if let Err(error) = old_handler.after_remove(&old_ctx) {
            warn!(pipeline.handler = %old_name, error = %error, "after_remove callback failed");
        }
        Ok(old_handler)
    }

    fn resolve_linked(
        &self,
        name: &str,
    ) -> Result<(ContextId, Arc<str>, Arc<dyn ChannelHandler>), PipelineError> {
        let topology = self.topology.lock();
        topology
            .lookup(name)
            .and_then(|id| {
                topology
                    .node(id)
                    .map(|node| (id, Arc::clone(&node.name), Arc::clone(&node.handler)))
            })
            .ok_or_else(|| PipelineError::NoSuchName(name.to_owned()))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ChannelHandler>> {
        self.resolve_linked(name).ok().map(|(_, _, handler)| handler)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.topology.lock().lookup(name).is_some()
    }

    /// 指定 Handler 的上下文，可用于从该位置发起事件。
    pub fn context(&self, name: &str) -> Option<HandlerContext<'_>> {
        self.resolve_linked(name)
            .ok()
            .map(|(id, name, _)| HandlerContext::new(self, id, name))
    }

    /// 自头到尾的 Handler 名称，不含哨兵。
    pub fn names(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .map(|registration| registration.name)
            .collect()
    }

    /// 自头到尾的登记信息快照。
    pub fn snapshot(&self) -> Vec<HandlerRegistration> {
        let topology = self.topology.lock();
        topology
            .ordered()
            .into_iter()
            .filter_map(|id| {
                topology.node(id).map(|node| HandlerRegistration {
                    id,
                    name: node.name.to_string(),
                    interests: node.interests,
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.topology.lock().ordered().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn is_retired(&self, id: ContextId) -> bool {
        self.topology.lock().is_retired(id)
    }

    fn enter(&self) -> InFlight<'_> {
        self.topology.lock().enter();
        InFlight { pipeline: self }
    }

    /// 从 `from` 出发把事件交给下一个感兴趣的节点。
    pub(crate) fn propagate(&self, from: ContextId, event: Event) {
        let _in_flight = self.enter();
        let kind = event.kind();
        let target = {
            let mut topology = self.topology.lock();
            topology.next_target(from, kind).and_then(|id| {
                topology
                    .node(id)
                    .filter(|node| node.state != NodeState::Retired)
                    .map(|node| (id, Arc::clone(&node.name), Arc::clone(&node.handler)))
            })
        };
        let Some((id, name, handler)) = target else {
            debug!(pipeline.event = kind.label(), "event has no remaining target in the pipeline");
            if let Some(future) = event.future() {
                future.set_failure(ChannelError::Closed);
            }
            return;
        };
        self.invoke(id, name, handler.as_ref(), event);
    }

    fn invoke(&self, id: ContextId, name: Arc<str>, handler: &dyn ChannelHandler, event: Event) {
        let kind = event.kind();
        let future = event.future().cloned();
        let ctx = HandlerContext::new(self, id, name);
        let Err(error) = event.deliver(handler, &ctx) else {
            return;
        };
        match (kind.direction(), future) {
            (Direction::Outbound, Some(future)) => {
                debug!(
                    pipeline.handler = ctx.name(),
                    pipeline.event = kind.label(),
                    error = %error,
                    "outbound handler failed; failing the operation"
                );
                future.set_failure(error);
            }
            _ => {
                debug!(
                    pipeline.handler = ctx.name(),
                    pipeline.event = kind.label(),
                    error = %error,
                    "handler failed; redirecting to exception_caught"
                );
                ctx.fire_exception_caught(error);
            }
        }
    }

    pub fn fire_channel_open(&self) {
        self.propagate(ContextId::HEAD, Event::ChannelOpen);
    }

    pub fn fire_channel_active(&self) {
        self.propagate(ContextId::HEAD, Event::ChannelActive);
    }

    pub fn fire_channel_inactive(&self) {
        self.propagate(ContextId::HEAD, Event::ChannelInactive);
    }

    pub fn fire_message_updated(&self, message: PipelineMessage) {
        self.propagate(ContextId::HEAD, Event::MessageUpdated(message));
    }

    pub fn fire_exception_caught(&self, error: ChannelError) {
        self.propagate(ContextId::HEAD, Event::ExceptionCaught(error));
    }

    pub fn fire_user_event(&self, event: UserEvent) {
        self.propagate(ContextId::HEAD, Event::UserEvent(event));
    }

    pub fn fire_read_suspended(&self, suspended: bool) {
        self.propagate(ContextId::HEAD, Event::ReadSuspended(suspended));
    }

    pub fn bind(&self, local: SocketAddr) -> CompletionFuture {
        let future = self.new_future();
        self.propagate(ContextId::TAIL, Event::Bind(local, future.clone()));
        future
    }

    pub fn connect(&self, remote: SocketAddr, local: Option<SocketAddr>) -> CompletionFuture {
        let future = self.new_future();
        self.propagate(
            ContextId::TAIL,
            Event::Connect(remote, local, future.clone()),
        );
        future
    }

    pub fn disconnect(&self) -> CompletionFuture {
        let future = self.new_future();
        self.propagate(ContextId::TAIL, Event::Disconnect(future.clone()));
        future
    }

    pub fn close(&self) -> CompletionFuture {
        let future = self.new_future();
        self.propagate(ContextId::TAIL, Event::Close(future.clone()));
        future
    }

    pub fn write(&self, message: PipelineMessage) -> CompletionFuture {
        let future = self.new_future();
        self.write_with(message, future.clone());
        future
    }

    /// 以调用方提供的通知写入，例如 [`Pipeline::void_future`]。
    pub fn write_with(&self, message: PipelineMessage, future: CompletionFuture) {
        self.propagate(ContextId::TAIL, Event::Write(message, future));
    }

    pub fn write_and_flush(&self, message: PipelineMessage) -> CompletionFuture {
        let future = self.write(message);
        self.flush();
        future
    }

    pub fn flush(&self) {
        self.propagate(ContextId::TAIL, Event::Flush);
    }

    pub fn read(&self) {
        self.propagate(ContextId::TAIL, Event::Read);
    }
}

impl core::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pipeline")
            .field("handlers", &self.names())
            .field("generation", &self.generation())
            .field("settings", &self.settings)
            .finish()
    }
}
