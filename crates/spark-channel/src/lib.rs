#![deny(unsafe_code)]

//! `spark-channel` 是 spark 数据面的事件编排层：Handler 管线、完成通知、单线程事件循环，
//! 以及管线与传输层之间的 [`Transport`] 边界。
//!
//! # 教案式说明
//! - **意图（Why）**：协议栈由一串 Handler 组成，入站事件自传输层流向应用，出站操作自应用流向
//!   传输层；所有异步操作的结果都通过 [`CompletionFuture`] 回报。
//! - **逻辑（How）**：
//!   - [`Pipeline`] 维护 Handler 拓扑并按事件方向派发，Handler 通过 [`EventSet`] 声明兴趣；
//!   - [`HandlerContext`] 是 Handler 继续转发事件的唯一入口；
//!   - [`CompletionFuture`] 支持监听器、阻塞等待与 `async` 桥接，并在拥有者事件循环上拒绝阻塞；
//!   - [`EventLoop`] 提供串行执行的工作线程，[`interrupt`] 提供线程级中断标志。
//! - **契约（What）**：拓扑错误同步返回 [`PipelineError`]；异步失败以 [`ChannelError`]
//!   出现在完成通知或 `exception_caught` 事件中。
//! - **风险（Trade-offs）**：派发在调用线程上同步执行，跨线程安全但不保证跨线程顺序；
//!   需要严格顺序的调用方应把操作提交到同一个事件循环。

mod context;
mod error;
mod event;
mod event_loop;
mod factory;
mod future;
mod handler;
pub mod interrupt;
mod message;
mod pipeline;
mod settings;
mod transport;

pub use context::HandlerContext;
pub use error::{ChannelError, FutureError, PipelineError, codes};
pub use event::{Direction, EventKind, EventSet};
pub use event_loop::{EventLoop, EventLoopId, current_event_loop};
pub use factory::{HandlerChain, PipelineFactory};
pub use future::{Completion, CompletionFuture, ListenerKey};
pub use handler::{ChannelHandler, HandlerResult};
pub use message::{PipelineMessage, UserEvent, UserMessage};
pub use pipeline::{ContextId, HandlerRegistration, Pipeline, PipelineBuilder};
pub use settings::PipelineSettings;
pub use transport::Transport;
