use std::net::SocketAddr;

use spark_bytes::ByteStream;

use crate::future::CompletionFuture;

/// 管线头部之下的传输层。
///
/// # 教案式说明
/// - **意图（Why）**：管线只负责事件编排，真正的套接字读写由传输层完成；
///   把这条边界抽象为 trait，便于以内存实现替换真实网络进行测试。
/// - **契约（What）**：
///   - 带完成通知的方法必须在操作结束后完成该通知（成功、失败或取消之一）；
///   - `write` 只接收字节流，业务对象在到达头部之前必须已被编码；
///   - 入站数据与连接状态变化通过 [`crate::Pipeline`] 的 `fire_*` 方法回灌。
/// - **风险（Trade-offs）**：方法均为同步签名，异步实现应把工作投递到自身的事件循环后立即返回。
pub trait Transport: Send + Sync + 'static {
    fn bind(&self, local: SocketAddr, future: CompletionFuture);

    fn connect(&self, remote: SocketAddr, local: Option<SocketAddr>, future: CompletionFuture);

    fn disconnect(&self, future: CompletionFuture);

    fn close(&self, future: CompletionFuture);

    fn write(&self, payload: Box<dyn ByteStream>, future: CompletionFuture);

    fn flush(&self);

    /// 请求传输层继续读取。
    fn read(&self);
}
