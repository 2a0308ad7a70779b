//! 线程级中断标志。
//!
//! # 教案式说明
//! - **意图（Why）**：阻塞等待完成通知的线程需要一种协作式的唤醒手段，
//!   让另一线程能请求它放弃等待。
//! - **逻辑（How）**：每个线程持有一个共享的中断状态；等待前登记正在等待的完成通知，
//!   `interrupt()` 置位标志后唤醒该通知上的条件变量。
//! - **契约（What）**：可中断等待观察到标志后清除它并返回 `Interrupted`；
//!   不可中断等待忽略标志，返回时标志保持置位。

use std::sync::{
    Arc, Weak,
    atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;

use crate::future::Inner;

#[derive(Default)]
pub(crate) struct InterruptState {
    flag: AtomicBool,
    parked_on: Mutex<Option<Weak<Inner>>>,
}

impl InterruptState {
    pub(crate) fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// 读取并清除标志。
    pub(crate) fn take(&self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn park_on(&self, inner: &Arc<Inner>) {
        *self.parked_on.lock() = Some(Arc::downgrade(inner));
    }

    pub(crate) fn unpark(&self) {
        self.parked_on.lock().take();
    }
}

thread_local! {
    static THREAD_STATE: Arc<InterruptState> = Arc::new(InterruptState::default());
}

pub(crate) fn current_state() -> Arc<InterruptState> {
    THREAD_STATE.with(Arc::clone)
}

/// 指向某个线程中断状态的句柄，可跨线程传递。
#[derive(Clone)]
pub struct InterruptHandle {
    state: Arc<InterruptState>,
}

impl InterruptHandle {
    /// 当前线程的句柄。
    pub fn current() -> Self {
        Self {
            state: current_state(),
        }
    }

    /// 置位中断标志，并唤醒该线程正在进行的等待。
    pub fn interrupt(&self) {
        self.state.flag.store(true, Ordering::Release);
        let parked = self.state.parked_on.lock().clone();
        if let Some(inner) = parked.and_then(|weak| weak.upgrade()) {
            inner.wake_waiters();
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.state.is_set()
    }

    /// 清除标志并返回清除前的值。
    pub fn clear(&self) -> bool {
        self.state.take()
    }
}

impl core::fmt::Debug for InterruptHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InterruptHandle")
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

/// 读取并清除当前线程的中断标志。
pub fn interrupted() -> bool {
    current_state().take()
}
