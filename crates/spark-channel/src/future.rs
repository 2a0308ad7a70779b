use core::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll, Waker},
};
use std::{
    mem,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::{trace, warn};

use crate::{
    error::{ChannelError, FutureError},
    event_loop::{EventLoopId, current_event_loop},
    interrupt,
};

type Listener = Box<dyn FnOnce(&CompletionFuture) + Send + 'static>;
type ProgressListener = Box<dyn FnMut(&CompletionFuture, u64, u64) + Send + 'static>;
type FailureSink = Box<dyn Fn(ChannelError) + Send + Sync + 'static>;

/// 已注册监听器的句柄，用于 [`CompletionFuture::remove_listener`]。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerKey(u64);

#[derive(Clone)]
enum Outcome {
    Pending,
    Succeeded,
    Failed(ChannelError),
    Cancelled,
}

struct State {
    outcome: Outcome,
    listeners: Vec<(ListenerKey, Listener)>,
    progress_listeners: Vec<(ListenerKey, ProgressListener)>,
    notifying: bool,
    next_key: u64,
}

impl State {
    fn allocate_key(&mut self) -> ListenerKey {
        self.next_key += 1;
        ListenerKey(self.next_key)
    }
}

pub(crate) struct Inner {
    state: Mutex<State>,
    cond: Condvar,
    owner: Option<EventLoopId>,
    cancellable: bool,
    void_sink: Option<FailureSink>,
}

impl Inner {
    /// 唤醒阻塞在条件变量上的线程；持锁通知以免与等待方的检查交错而丢失唤醒。
    pub(crate) fn wake_waiters(&self) {
        let _state = self.state.lock();
        self.cond.notify_all();
    }
}

/// 异步 I/O 操作的一次性完成通知。
///
/// # 教案式说明
/// - **意图（Why）**：出站操作（绑定、连接、写入、关闭）在事件循环上异步完成，调用方需要以
///   回调、阻塞等待或 `async` 三种方式观察结果。
/// - **逻辑（How）**：
///   - 状态机只有一次 `Pending → {Succeeded, Failed, Cancelled}` 迁移，由互斥锁下的比较保证；
///   - 监听器按注册顺序在完成线程上执行；通知进行中注册的监听器排在当前批次之后；
///     单个监听器 panic 只记录告警，其余监听器照常执行；
///   - 阻塞等待基于条件变量，并配合 [`crate::interrupt`] 的线程中断标志；
///   - [`CompletionFuture::completion`] 把结果桥接为标准 [`Future`]。
/// - **契约（What）**：
///   - `set_success`/`set_failure`/`cancel` 只有首次调用返回 `true`；
///   - 在拥有者事件循环上阻塞等待未完成的通知返回 [`FutureError::BlockingInEventLoop`]；
///   - 空通知（void）永不完成，拒绝监听与等待，其失败被转交给管线的异常处理。
/// - **风险（Trade-offs）**：监听器在完成线程上同步执行，耗时逻辑会拖慢完成方。
#[derive(Clone)]
pub struct CompletionFuture {
    inner: Arc<Inner>,
}

impl CompletionFuture {
    /// 未绑定事件循环、可取消的通知。
    pub fn new() -> Self {
        Self::build(None, true, None)
    }

    /// 不可取消的通知。
    pub fn uncancellable() -> Self {
        Self::build(None, false, None)
    }

    /// 绑定到事件循环的通知；在该循环线程上阻塞等待会被拒绝。
    pub fn owned_by(owner: EventLoopId) -> Self {
        Self::build(Some(owner), true, None)
    }

    pub fn succeeded() -> Self {
        let future = Self::new();
        future.set_success();
        future
    }

    pub fn failed(cause: ChannelError) -> Self {
        let future = Self::new();
        future.set_failure(cause);
        future
    }

    pub(crate) fn with_owner(owner: Option<EventLoopId>) -> Self {
        Self::build(owner, true, None)
    }

    /// 空通知：失败交给 `sink`，其余操作一律无效。
    pub(crate) fn void(sink: impl Fn(ChannelError) + Send + Sync + 'static) -> Self {
        Self::build(None, false, Some(Box::new(sink)))
    }

    fn build(owner: Option<EventLoopId>, cancellable: bool, void_sink: Option<FailureSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    outcome: Outcome::Pending,
                    listeners: Vec::new(),
                    progress_listeners: Vec::new(),
                    notifying: false,
                    next_key: 0,
                }),
                cond: Condvar::new(),
                owner,
                cancellable,
                void_sink,
            }),
        }
    }

    pub fn is_void(&self) -> bool {
        self.inner.void_sink.is_some()
    }

    pub fn owner(&self) -> Option<EventLoopId> {
        self.inner.owner
    }

    /// 两个句柄是否指向同一个通知。
    pub fn same_as(&self, other: &CompletionFuture) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_done(&self) -> bool {
        !matches!(self.inner.state.lock().outcome, Outcome::Pending)
    }

    pub fn is_success(&self) -> bool {
        matches!(self.inner.state.lock().outcome, Outcome::Succeeded)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.inner.state.lock().outcome, Outcome::Cancelled)
    }

    pub fn is_cancellable(&self) -> bool {
        self.inner.cancellable
    }

    /// 失败原因；成功、未完成或取消时为 `None`。
    pub fn cause(&self) -> Option<ChannelError> {
        match &self.inner.state.lock().outcome {
            Outcome::Failed(cause) => Some(cause.clone()),
            _ => None,
        }
    }

    /// 已完成时的结果；取消映射为 [`ChannelError::Cancelled`]。
    pub fn result(&self) -> Option<Result<(), ChannelError>> {
        match &self.inner.state.lock().outcome {
            Outcome::Pending => None,
            Outcome::Succeeded => Some(Ok(())),
            Outcome::Failed(cause) => Some(Err(cause.clone())),
            Outcome::Cancelled => Some(Err(ChannelError::Cancelled)),
        }
    }

    pub fn set_success(&self) -> bool {
        self.complete(Outcome::Succeeded)
    }

    pub fn set_failure(&self, cause: ChannelError) -> bool {
        if let Some(sink) = &self.inner.void_sink {
            sink(cause);
            return false;
        }
        self.complete(Outcome::Failed(cause))
    }

    /// 取消；不可取消或已完成时返回 `false`。
    pub fn cancel(&self) -> bool {
        if !self.inner.cancellable {
            return false;
        }
        self.complete(Outcome::Cancelled)
    }

    fn complete(&self, outcome: Outcome) -> bool {
        if self.is_void() {
            return false;
        }
        let batch = {
            let mut state = self.inner.state.lock();
            if !matches!(state.outcome, Outcome::Pending) {
                return false;
            }
            state.outcome = outcome;
            state.progress_listeners.clear();
            state.notifying = true;
            self.inner.cond.notify_all();
            mem::take(&mut state.listeners)
        };
        self.notify(batch);
        true
    }

    fn notify(&self, mut batch: Vec<(ListenerKey, Listener)>) {
        loop {
            for (key, listener) in batch {
                trace!(listener = key.0, "notifying completion listener");
                if catch_unwind(AssertUnwindSafe(|| listener(self))).is_err() {
                    warn!(listener = key.0, "completion listener panicked");
                }
            }
            let mut state = self.inner.state.lock();
            if state.listeners.is_empty() {
                state.notifying = false;
                return;
            }
            batch = mem::take(&mut state.listeners);
        }
    }

    /// 注册完成监听器；已完成且没有通知在进行时立即在当前线程执行。
    pub fn add_listener(
        &self,
        listener: impl FnOnce(&CompletionFuture) + Send + 'static,
    ) -> Result<ListenerKey, FutureError> {
        if self.is_void() {
            return Err(FutureError::VoidFuture {
                operation: "add_listener",
            });
        }
        let key = {
            let mut state = self.inner.state.lock();
            let key = state.allocate_key();
            if matches!(state.outcome, Outcome::Pending) || state.notifying {
                state.listeners.push((key, Box::new(listener)));
                return Ok(key);
            }
            key
        };
        listener(self);
        Ok(key)
    }

    /// 注销尚未执行的监听器。
    pub fn remove_listener(&self, key: ListenerKey) -> bool {
        let mut state = self.inner.state.lock();
        if let Some(position) = state.listeners.iter().position(|(k, _)| *k == key) {
            state.listeners.remove(position);
            return true;
        }
        if let Some(position) = state.progress_listeners.iter().position(|(k, _)| *k == key) {
            state.progress_listeners.remove(position);
            return true;
        }
        false
    }

    /// 注册进度监听器，参数为 `(progress, total)`；完成后的注册不会再被调用。
    pub fn add_progress_listener(
        &self,
        listener: impl FnMut(&CompletionFuture, u64, u64) + Send + 'static,
    ) -> Result<ListenerKey, FutureError> {
        if self.is_void() {
            return Err(FutureError::VoidFuture {
                operation: "add_progress_listener",
            });
        }
        let mut state = self.inner.state.lock();
        let key = state.allocate_key();
        if matches!(state.outcome, Outcome::Pending) {
            state.progress_listeners.push((key, Box::new(listener)));
        }
        Ok(key)
    }

    /// 报告进度；已完成时返回 `false`。
    pub fn set_progress(&self, progress: u64, total: u64) -> bool {
        let mut listeners = {
            let mut state = self.inner.state.lock();
            if !matches!(state.outcome, Outcome::Pending) {
                return false;
            }
            mem::take(&mut state.progress_listeners)
        };
        for (key, listener) in listeners.iter_mut() {
            if catch_unwind(AssertUnwindSafe(|| listener(self, progress, total))).is_err() {
                warn!(listener = key.0, "progress listener panicked");
            }
        }
        let mut state = self.inner.state.lock();
        if matches!(state.outcome, Outcome::Pending) {
            listeners.append(&mut state.progress_listeners);
            state.progress_listeners = listeners;
        }
        true
    }

    /// 阻塞直到完成。
    pub fn wait(&self) -> Result<(), FutureError> {
        self.block(None, true).map(|_| ())
    }

    /// 限时阻塞；超时返回 `Ok(false)`。
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool, FutureError> {
        self.block(Some(Instant::now() + timeout), true)
    }

    /// 阻塞直到完成，期间忽略中断；中断标志在返回后保持置位。
    pub fn wait_uninterruptibly(&self) -> Result<(), FutureError> {
        self.block(None, false).map(|_| ())
    }

    pub fn wait_timeout_uninterruptibly(&self, timeout: Duration) -> Result<bool, FutureError> {
        self.block(Some(Instant::now() + timeout), false)
    }

    fn block(&self, deadline: Option<Instant>, interruptible: bool) -> Result<bool, FutureError> {
        if self.is_void() {
            return Err(FutureError::VoidFuture { operation: "wait" });
        }
        if self.is_done() {
            return Ok(true);
        }
        if let Some(owner) = self.inner.owner
            && current_event_loop() == Some(owner)
        {
            return Err(FutureError::BlockingInEventLoop {
                event_loop: std::thread::current()
                    .name()
                    .map_or_else(|| format!("#{}", owner.raw()), str::to_owned),
            });
        }

        let interrupt = interrupt::current_state();
        if interruptible && interrupt.take() {
            return Err(FutureError::Interrupted);
        }
        interrupt.park_on(&self.inner);
        let result = {
            let mut state = self.inner.state.lock();
            loop {
                if !matches!(state.outcome, Outcome::Pending) {
                    break Ok(true);
                }
                if interruptible && interrupt.take() {
                    break Err(FutureError::Interrupted);
                }
                match deadline {
                    Some(deadline) => {
                        if self.inner.cond.wait_until(&mut state, deadline).timed_out() {
                            break Ok(!matches!(state.outcome, Outcome::Pending));
                        }
                    }
                    None => self.inner.cond.wait(&mut state),
                }
            }
        };
        interrupt.unpark();
        result
    }

    /// 以标准 [`Future`] 观察结果；空通知返回 [`FutureError::VoidFuture`]。
    pub fn completion(&self) -> Result<Completion, FutureError> {
        if self.is_void() {
            return Err(FutureError::VoidFuture {
                operation: "completion",
            });
        }
        Ok(Completion {
            future: self.clone(),
            waker: None,
        })
    }
}

impl Default for CompletionFuture {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CompletionFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.inner.state.lock().outcome {
            Outcome::Pending => "pending",
            Outcome::Succeeded => "succeeded",
            Outcome::Failed(_) => "failed",
            Outcome::Cancelled => "cancelled",
        };
        f.debug_struct("CompletionFuture")
            .field("state", &state)
            .field("void", &self.is_void())
            .finish()
    }
}

/// [`CompletionFuture`] 到标准 [`Future`] 的桥接。
///
/// 首次挂起时注册一个监听器，完成时唤醒最近一次 `poll` 提供的 waker。
pub struct Completion {
    future: CompletionFuture,
    waker: Option<Arc<Mutex<Option<Waker>>>>,
}

impl Future for Completion {
    type Output = Result<(), ChannelError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(result) = this.future.result() {
            return Poll::Ready(result);
        }
        match &this.waker {
            Some(slot) => *slot.lock() = Some(cx.waker().clone()),
            None => {
                let slot = Arc::new(Mutex::new(Some(cx.waker().clone())));
                let wake = Arc::clone(&slot);
                let registered = this.future.add_listener(move |_| {
                    if let Some(waker) = wake.lock().take() {
                        waker.wake();
                    }
                });
                if registered.is_err() {
                    return Poll::Pending;
                }
                this.waker = Some(slot);
            }
        }
        match this.future.result() {
            Some(result) => Poll::Ready(result),
            None => Poll::Pending,
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").field("future", &self.future).finish()
    }
}
