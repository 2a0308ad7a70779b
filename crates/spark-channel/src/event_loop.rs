use std::{
    cell::Cell,
    io,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
        mpsc,
    },
    thread::{self, JoinHandle},
};

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::error::ChannelError;

static NEXT_EVENT_LOOP_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_EVENT_LOOP: Cell<Option<EventLoopId>> = const { Cell::new(None) };
}

/// 事件循环的进程内唯一标识。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EventLoopId(u64);

impl EventLoopId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// 当前线程所属的事件循环；普通线程返回 `None`。
pub fn current_event_loop() -> Option<EventLoopId> {
    CURRENT_EVENT_LOOP.with(Cell::get)
}

type Task = Box<dyn FnOnce() + Send + 'static>;

/// 单线程事件循环。
///
/// # 教案式说明
/// - **意图（Why）**：同一通道的事件需要在固定线程上串行执行；完成通知也需要知道
///   “谁拥有自己”，以便拒绝在拥有者线程上阻塞等待。
/// - **逻辑（How）**：独占一个命名工作线程，按提交顺序执行任务；线程局部变量记录当前循环标识。
/// - **契约（What）**：任务按 FIFO 顺序执行；单个任务 panic 只记录日志，不终止循环；
///   `shutdown_gracefully` 之后提交的任务返回 [`ChannelError::Closed`]。
/// - **风险（Trade-offs）**：句柄可克隆，所有克隆共享同一线程，最后一个句柄释放时隐式关闭。
#[derive(Clone)]
pub struct EventLoop {
    shared: Arc<Shared>,
}

struct Shared {
    id: EventLoopId,
    name: String,
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventLoop {
    /// 启动新的事件循环线程。
    pub fn spawn(name: impl Into<String>) -> io::Result<Self> {
        let name = name.into();
        let id = EventLoopId(NEXT_EVENT_LOOP_ID.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel::<Task>();
        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run(id, receiver))?;
        debug!(event_loop = id.0, name = %name, "event loop started");
        Ok(Self {
            shared: Arc::new(Shared {
                id,
                name,
                sender: Mutex::new(Some(sender)),
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    pub fn id(&self) -> EventLoopId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// 当前线程是否就是该事件循环的工作线程。
    pub fn in_event_loop(&self) -> bool {
        current_event_loop() == Some(self.shared.id)
    }

    /// 提交任务。
    pub fn execute(&self, task: impl FnOnce() + Send + 'static) -> Result<(), ChannelError> {
        let sender = self.shared.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(ChannelError::Closed);
        };
        sender
            .send(Box::new(task))
            .map_err(|_| ChannelError::Closed)
    }

    /// 停止接收新任务，执行完已排队的任务后退出线程。
    ///
    /// 从循环外调用时会等待工作线程结束；在循环内部调用则只发出关闭信号。
    pub fn shutdown_gracefully(&self) {
        self.shared.sender.lock().take();
        if self.in_event_loop() {
            return;
        }
        let worker = self.shared.worker.lock().take();
        if let Some(worker) = worker
            && worker.join().is_err()
        {
            error!(event_loop = self.shared.id.0, "event loop thread terminated abnormally");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.sender.lock().is_none()
    }
}

impl core::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventLoop")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .finish()
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.sender.get_mut().take();
    }
}

fn run(id: EventLoopId, receiver: mpsc::Receiver<Task>) {
    CURRENT_EVENT_LOOP.with(|current| current.set(Some(id)));
    while let Ok(task) = receiver.recv() {
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!(event_loop = id.0, "task panicked inside event loop");
        }
    }
    CURRENT_EVENT_LOOP.with(|current| current.set(None));
    debug!(event_loop = id.0, "event loop stopped");
}
