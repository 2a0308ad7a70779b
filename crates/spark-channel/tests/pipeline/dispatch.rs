use std::sync::{Arc, Mutex};

use spark_bytes::{ByteOrder, HeapByteStream};
use spark_channel::{
    ChannelError, ChannelHandler, CompletionFuture, EventKind, EventLoop, EventSet, HandlerContext,
    HandlerResult, PipelineMessage, UserEvent, codes,
};

use super::support::{Journal, Recorder, addr, clear, events, journal, pipeline};

fn inbound_message() -> EventSet {
    EventSet::of(&[EventKind::MessageUpdated])
}

fn writes() -> EventSet {
    EventSet::of(&[EventKind::Write])
}

fn bytes(content: &[u8]) -> PipelineMessage {
    PipelineMessage::from_bytes(HeapByteStream::copied_from(content, ByteOrder::BigEndian))
}

/// 把 `String` 编码为字节流的出站 Handler。
struct StringEncoder;

impl ChannelHandler for StringEncoder {
    fn interests(&self) -> EventSet {
        writes()
    }

    fn write(
        &self,
        ctx: &HandlerContext<'_>,
        message: PipelineMessage,
        future: CompletionFuture,
    ) -> HandlerResult {
        match message.try_into_user::<String>() {
            Ok(text) => ctx.write_with(bytes(text.as_bytes()), future),
            Err(other) => ctx.write_with(other, future),
        }
        Ok(())
    }
}

/// 在声明的事件上返回错误；收到异常时记录，便于断言异常不会回到自身。
struct Failing {
    interests: EventSet,
    journal: Journal,
}

impl Failing {
    fn new(interests: EventSet, journal: &Journal) -> Arc<Self> {
        Arc::new(Self {
            interests: interests.with(EventKind::ExceptionCaught),
            journal: Arc::clone(journal),
        })
    }
}

impl ChannelHandler for Failing {
    fn interests(&self) -> EventSet {
        self.interests
    }

    fn message_updated(&self, _ctx: &HandlerContext<'_>, _message: PipelineMessage) -> HandlerResult {
        Err(ChannelError::handler("bad frame"))
    }

    fn exception_caught(&self, ctx: &HandlerContext<'_>, error: ChannelError) -> HandlerResult {
        self.journal
            .lock()
            .expect("journal lock")
            .push("failing:exception_caught".to_owned());
        ctx.fire_exception_caught(error);
        Ok(())
    }

    fn write(
        &self,
        _ctx: &HandlerContext<'_>,
        _message: PipelineMessage,
        _future: CompletionFuture,
    ) -> HandlerResult {
        Err(ChannelError::handler("encoder broken"))
    }

    fn flush(&self, _ctx: &HandlerContext<'_>) -> HandlerResult {
        Err(ChannelError::handler("flush refused"))
    }
}

/// 处理第一条消息时把自己移出管线，然后继续转发。
struct RemoveSelf;

impl ChannelHandler for RemoveSelf {
    fn interests(&self) -> EventSet {
        inbound_message()
    }

    fn message_updated(&self, ctx: &HandlerContext<'_>, message: PipelineMessage) -> HandlerResult {
        ctx.pipeline().remove(ctx.name()).expect("移除自身");
        assert!(ctx.is_removed());
        ctx.fire_message_updated(message);
        Ok(())
    }
}

/// 处理消息时在自己之后插入一个记录器，然后继续转发。
struct InsertAfter {
    journal: Journal,
}

impl ChannelHandler for InsertAfter {
    fn interests(&self) -> EventSet {
        inbound_message()
    }

    fn message_updated(&self, ctx: &HandlerContext<'_>, message: PipelineMessage) -> HandlerResult {
        if !ctx.pipeline().contains("late") {
            ctx.pipeline()
                .add_after(ctx.name(), "late", Recorder::new("late", inbound_message(), &self.journal))
                .expect("插入");
        }
        ctx.fire_message_updated(message);
        Ok(())
    }
}

#[test]
fn inbound_only_handler_sees_message_and_outbound_only_is_skipped() {
    let (pipeline, transport) = pipeline();
    let log = journal();
    pipeline
        .add_last("reader", Recorder::new("reader", inbound_message(), &log))
        .expect("添加");
    pipeline
        .add_last("writer", Recorder::new("writer", writes(), &log))
        .expect("添加");

    pipeline.fire_message_updated(bytes(b"hello"));
    assert_eq!(events(&log), ["reader:message_updated"]);
    assert!(transport.operations().is_empty());
}

#[test]
fn flush_skips_inbound_handlers_and_reaches_transport() {
    let (pipeline, transport) = pipeline();
    let log = journal();
    pipeline
        .add_last("inbound", Recorder::new("inbound", EventSet::INBOUND, &log))
        .expect("添加");
    pipeline
        .add_last(
            "flusher",
            Recorder::new("flusher", EventSet::of(&[EventKind::Flush]), &log),
        )
        .expect("添加");

    pipeline.flush();
    assert_eq!(events(&log), ["flusher:flush"]);
    assert_eq!(transport.operations(), ["flush"]);
}

#[test]
fn encoder_turns_user_message_into_bytes() {
    let (pipeline, transport) = pipeline();
    let log = journal();
    pipeline
        .add_last("encoder", Arc::new(StringEncoder))
        .expect("添加");
    pipeline
        .add_last("observer", Recorder::new("observer", writes(), &log))
        .expect("添加");

    let future = pipeline.write_and_flush(PipelineMessage::from_user(String::from("ping")));
    assert!(future.is_success());
    assert_eq!(transport.written(), [b"ping".to_vec()]);
    assert_eq!(transport.operations(), ["write", "flush"]);
    assert_eq!(events(&log), ["observer:write"], "尾部一侧的 Handler 先看到写入");
}

#[test]
fn writes_reach_transport_in_submission_order() {
    let (pipeline, transport) = pipeline();
    pipeline
        .add_last("encoder", Arc::new(StringEncoder))
        .expect("添加");
    let futures: Vec<_> = ["one", "two", "three"]
        .into_iter()
        .map(|text| pipeline.write(PipelineMessage::from_user(text.to_owned())))
        .collect();
    assert!(futures.iter().all(CompletionFuture::is_success));
    assert_eq!(
        transport.written(),
        [b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]
    );
}

#[test]
fn unencoded_message_fails_the_write() {
    let (pipeline, transport) = pipeline();
    let future = pipeline.write(PipelineMessage::from_user(42_u32));
    assert!(future.is_done());
    assert!(!future.is_success());
    let cause = future.cause().expect("失败原因");
    assert!(matches!(cause, ChannelError::UnsupportedMessage { type_name: "u32" }));
    assert_eq!(cause.code(), codes::UNSUPPORTED_MESSAGE);
    assert!(transport.written().is_empty());
}

#[test]
fn inbound_error_is_redirected_to_the_next_exception_handler() {
    let (pipeline, _) = pipeline();
    let log = journal();
    pipeline
        .add_last("decoder", Failing::new(inbound_message(), &log))
        .expect("添加");
    pipeline
        .add_last("catcher", Recorder::new("catcher", EventSet::INBOUND, &log))
        .expect("添加");

    pipeline.fire_message_updated(bytes(b"\xFF"));
    assert_eq!(
        events(&log),
        [format!("catcher:exception_caught:{}", codes::HANDLER)],
        "异常从失败节点之后开始传播"
    );
}

#[test]
fn outbound_error_fails_the_future() {
    let (pipeline, transport) = pipeline();
    let log = journal();
    pipeline
        .add_last("encoder", Failing::new(writes(), &log))
        .expect("添加");

    let future = pipeline.write(bytes(b"data"));
    let cause = future.cause().expect("失败原因");
    assert_eq!(cause.code(), codes::HANDLER);
    assert!(cause.to_string().contains("encoder broken"));
    assert!(transport.written().is_empty());
    assert!(events(&log).is_empty(), "出站失败不产生异常事件");
}

#[test]
fn flush_error_becomes_an_exception_and_closes_at_the_tail() {
    let (pipeline, transport) = pipeline();
    let log = journal();
    pipeline
        .add_last("flusher", Failing::new(EventSet::of(&[EventKind::Flush]), &log))
        .expect("添加");
    pipeline
        .add_last("catcher", Recorder::new("catcher", EventSet::INBOUND, &log))
        .expect("添加");

    pipeline.flush();
    assert_eq!(
        events(&log),
        [format!("catcher:exception_caught:{}", codes::HANDLER)]
    );
    assert_eq!(transport.operations(), ["close"], "尾部按默认配置关闭通道");
}

#[test]
fn handler_removed_during_dispatch_still_forwards() {
    let (pipeline, _) = pipeline();
    let log = journal();
    pipeline
        .add_last("once", Arc::new(RemoveSelf))
        .expect("添加");
    pipeline
        .add_last("after", Recorder::new("after", inbound_message(), &log))
        .expect("添加");

    pipeline.fire_message_updated(bytes(b"1"));
    assert_eq!(events(&log), ["after:message_updated"]);
    assert_eq!(pipeline.names(), ["after"]);

    pipeline.fire_message_updated(bytes(b"2"));
    assert_eq!(
        events(&log),
        ["after:message_updated", "after:message_updated"]
    );
}

#[test]
fn handler_added_during_dispatch_receives_the_forwarded_event() {
    let (pipeline, _) = pipeline();
    let log = journal();
    pipeline
        .add_last("inserter", Arc::new(InsertAfter { journal: Arc::clone(&log) }))
        .expect("添加");
    pipeline
        .add_last("last", Recorder::new("last", inbound_message(), &log))
        .expect("添加");

    pipeline.fire_message_updated(bytes(b"1"));
    assert_eq!(
        events(&log),
        ["late:message_updated", "last:message_updated"]
    );
    assert_eq!(pipeline.names(), ["inserter", "late", "last"]);
}

#[test]
fn neighbour_cache_follows_topology_changes() {
    let (pipeline, _) = pipeline();
    let log = journal();
    let active = EventSet::of(&[EventKind::ChannelActive]);
    pipeline
        .add_last("a", Recorder::new("a", active, &log))
        .expect("添加");
    pipeline
        .add_last("c", Recorder::new("c", active, &log))
        .expect("添加");

    pipeline.fire_channel_active();
    pipeline.fire_channel_active();
    assert_eq!(
        events(&log),
        ["a:channel_active", "c:channel_active", "a:channel_active", "c:channel_active"]
    );

    clear(&log);
    pipeline
        .add_before("c", "b", Recorder::new("b", active, &log))
        .expect("添加");
    pipeline.fire_channel_active();
    assert_eq!(
        events(&log),
        ["a:channel_active", "b:channel_active", "c:channel_active"]
    );

    clear(&log);
    pipeline.remove("a").expect("移除");
    pipeline.fire_channel_active();
    assert_eq!(events(&log), ["b:channel_active", "c:channel_active"]);
}

#[test]
fn void_future_failures_become_exceptions() {
    let (pipeline, _) = pipeline();
    let log = journal();
    pipeline
        .add_last("catcher", Recorder::new("catcher", EventSet::INBOUND, &log))
        .expect("添加");

    let void = pipeline.void_future();
    assert!(void.is_void());
    pipeline.write_with(PipelineMessage::from_user(1_u8), void.clone());
    assert_eq!(
        events(&log),
        [format!("catcher:exception_caught:{}", codes::UNSUPPORTED_MESSAGE)]
    );
    assert!(!void.is_done(), "空通知永不完成");
}

#[test]
fn outbound_operations_reach_the_transport() {
    let (pipeline, transport) = pipeline();
    let futures = [
        pipeline.bind(addr("127.0.0.1:7000")),
        pipeline.connect(addr("10.0.0.1:5060"), None),
        pipeline.disconnect(),
        pipeline.close(),
    ];
    pipeline.read();
    assert!(futures.iter().all(CompletionFuture::is_success));
    assert_eq!(
        transport.operations(),
        [
            "bind 127.0.0.1:7000",
            "connect 10.0.0.1:5060",
            "disconnect",
            "close",
            "read"
        ]
    );
}

#[test]
fn user_events_and_read_suspension_propagate_inbound() {
    #[derive(Debug)]
    struct IdleTimeout;

    let (pipeline, _) = pipeline();
    let log = journal();
    let seen = Arc::new(Mutex::new(None));

    struct Watcher(Arc<Mutex<Option<&'static str>>>);

    impl ChannelHandler for Watcher {
        fn interests(&self) -> EventSet {
            EventSet::of(&[EventKind::UserEvent])
        }

        fn user_event(&self, ctx: &HandlerContext<'_>, event: UserEvent) -> HandlerResult {
            if event.is::<IdleTimeout>() {
                *self.0.lock().expect("watcher lock") = Some(event.kind());
            }
            ctx.fire_user_event(event);
            Ok(())
        }
    }

    pipeline
        .add_last("watcher", Arc::new(Watcher(Arc::clone(&seen))))
        .expect("添加");
    pipeline
        .add_last("recorder", Recorder::new("recorder", EventSet::INBOUND, &log))
        .expect("添加");

    pipeline.fire_user_event(UserEvent::new(IdleTimeout));
    pipeline.fire_read_suspended(true);
    assert_eq!(
        events(&log),
        ["recorder:user_event", "recorder:read_suspended:true"]
    );
    let kind = seen.lock().expect("watcher lock").expect("观察到事件");
    assert!(kind.ends_with("IdleTimeout"));
}

#[test]
fn pipeline_futures_belong_to_its_event_loop() {
    let event_loop = EventLoop::spawn("spark-pipeline-loop").expect("启动");
    let pipeline = spark_channel::Pipeline::builder(Arc::new(
        super::support::RecordingTransport::default(),
    ))
    .event_loop(event_loop.clone())
    .build();
    assert_eq!(pipeline.new_future().owner(), Some(event_loop.id()));
    assert_eq!(
        pipeline.event_loop().map(EventLoop::id),
        Some(event_loop.id())
    );
    event_loop.shutdown_gracefully();
}
