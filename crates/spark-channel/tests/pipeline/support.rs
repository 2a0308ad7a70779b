//! 管线测试共用的记录型传输层与 Handler。

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use spark_bytes::ByteStream;
use spark_channel::{
    ChannelError, ChannelHandler, CompletionFuture, EventSet, HandlerContext, HandlerResult,
    Pipeline, PipelineMessage, Transport, UserEvent,
};

pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

fn record(journal: &Journal, entry: String) {
    journal.lock().expect("journal lock").push(entry);
}

/// 日志中的事件条目，过滤掉生命周期回调。
pub fn events(journal: &Journal) -> Vec<String> {
    journal
        .lock()
        .expect("journal lock")
        .iter()
        .filter(|entry| !entry.contains(":before_") && !entry.contains(":after_"))
        .cloned()
        .collect()
}

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().expect("journal lock").clone()
}

pub fn clear(journal: &Journal) {
    journal.lock().expect("journal lock").clear();
}

pub fn addr(text: &str) -> SocketAddr {
    text.parse().expect("合法地址")
}

/// 记录所有操作并立即成功完成通知的传输层。
#[derive(Default)]
pub struct RecordingTransport {
    operations: Mutex<Vec<String>>,
    written: Mutex<Vec<Vec<u8>>>,
}

impl RecordingTransport {
    pub fn operations(&self) -> Vec<String> {
        self.operations.lock().expect("operations lock").clone()
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().expect("written lock").clone()
    }

    fn note(&self, operation: impl Into<String>) {
        self.operations
            .lock()
            .expect("operations lock")
            .push(operation.into());
    }
}

impl Transport for RecordingTransport {
    fn bind(&self, local: SocketAddr, future: CompletionFuture) {
        self.note(format!("bind {local}"));
        future.set_success();
    }

    fn connect(&self, remote: SocketAddr, _local: Option<SocketAddr>, future: CompletionFuture) {
        self.note(format!("connect {remote}"));
        future.set_success();
    }

    fn disconnect(&self, future: CompletionFuture) {
        self.note("disconnect");
        future.set_success();
    }

    fn close(&self, future: CompletionFuture) {
        self.note("close");
        future.set_success();
    }

    fn write(&self, payload: Box<dyn ByteStream>, future: CompletionFuture) {
        self.note("write");
        match payload.readable_to_vec() {
            Ok(content) => {
                self.written.lock().expect("written lock").push(content);
                future.set_success();
            }
            Err(error) => {
                future.set_failure(ChannelError::from(error));
            }
        }
    }

    fn flush(&self) {
        self.note("flush");
    }

    fn read(&self) {
        self.note("read");
    }
}

pub fn pipeline() -> (Arc<Pipeline>, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::default());
    let pipeline = Pipeline::new(transport.clone());
    (pipeline, transport)
}

/// 记录每个回调并原样转发的 Handler。
pub struct Recorder {
    name: String,
    interests: EventSet,
    journal: Journal,
}

impl Recorder {
    pub fn new(name: impl Into<String>, interests: EventSet, journal: &Journal) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            interests,
            journal: Arc::clone(journal),
        })
    }

    fn note(&self, what: &str) {
        record(&self.journal, format!("{}:{what}", self.name));
    }
}

impl ChannelHandler for Recorder {
    fn interests(&self) -> EventSet {
        self.interests
    }

    fn before_add(&self, _ctx: &HandlerContext<'_>) -> HandlerResult {
        self.note("before_add");
        Ok(())
    }

    fn after_add(&self, _ctx: &HandlerContext<'_>) -> HandlerResult {
        self.note("after_add");
        Ok(())
    }

    fn before_remove(&self, _ctx: &HandlerContext<'_>) -> HandlerResult {
        self.note("before_remove");
        Ok(())
    }

    fn after_remove(&self, _ctx: &HandlerContext<'_>) -> HandlerResult {
        self.note("after_remove");
        Ok(())
    }

    fn channel_active(&self, ctx: &HandlerContext<'_>) -> HandlerResult {
        self.note("channel_active");
        ctx.fire_channel_active();
        Ok(())
    }

    fn message_updated(&self, ctx: &HandlerContext<'_>, message: PipelineMessage) -> HandlerResult {
        self.note("message_updated");
        ctx.fire_message_updated(message);
        Ok(())
    }

    fn exception_caught(&self, ctx: &HandlerContext<'_>, error: ChannelError) -> HandlerResult {
        self.note(&format!("exception_caught:{}", error.code()));
        ctx.fire_exception_caught(error);
        Ok(())
    }

    fn user_event(&self, ctx: &HandlerContext<'_>, event: UserEvent) -> HandlerResult {
        self.note("user_event");
        ctx.fire_user_event(event);
        Ok(())
    }

    fn read_suspended(&self, ctx: &HandlerContext<'_>, suspended: bool) -> HandlerResult {
        self.note(&format!("read_suspended:{suspended}"));
        ctx.fire_read_suspended(suspended);
        Ok(())
    }

    fn write(
        &self,
        ctx: &HandlerContext<'_>,
        message: PipelineMessage,
        future: CompletionFuture,
    ) -> HandlerResult {
        self.note("write");
        ctx.write_with(message, future);
        Ok(())
    }

    fn flush(&self, ctx: &HandlerContext<'_>) -> HandlerResult {
        self.note("flush");
        ctx.flush();
        Ok(())
    }

    fn close(&self, ctx: &HandlerContext<'_>, future: CompletionFuture) -> HandlerResult {
        self.note("close");
        ctx.close_with(future);
        Ok(())
    }

    fn read(&self, ctx: &HandlerContext<'_>) -> HandlerResult {
        self.note("read");
        ctx.read();
        Ok(())
    }
}
