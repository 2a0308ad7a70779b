use std::sync::Arc;

use spark_channel::{
    ChannelError, ChannelHandler, EventKind, EventSet, HandlerChain, HandlerContext, HandlerResult,
    Pipeline, PipelineError, PipelineMessage, codes,
};

use super::support::{RecordingTransport, Recorder, entries, events, journal, pipeline};

/// 拒绝被添加的 Handler。
struct Refuser;

impl ChannelHandler for Refuser {
    fn interests(&self) -> EventSet {
        EventSet::INBOUND
    }

    fn before_add(&self, _ctx: &HandlerContext<'_>) -> HandlerResult {
        Err(ChannelError::handler("not today"))
    }
}

#[test]
fn insertion_positions_order_handlers() {
    let (pipeline, _) = pipeline();
    let log = journal();
    pipeline
        .add_last("b", Recorder::new("b", EventSet::ALL, &log))
        .expect("add_last");
    pipeline
        .add_first("a", Recorder::new("a", EventSet::ALL, &log))
        .expect("add_first");
    pipeline
        .add_last("d", Recorder::new("d", EventSet::ALL, &log))
        .expect("add_last");
    pipeline
        .add_before("d", "c", Recorder::new("c", EventSet::ALL, &log))
        .expect("add_before");
    pipeline
        .add_after("d", "e", Recorder::new("e", EventSet::ALL, &log))
        .expect("add_after");

    assert_eq!(pipeline.names(), ["a", "b", "c", "d", "e"]);
    assert_eq!(pipeline.len(), 5);
    assert_eq!(pipeline.generation(), 5, "每次添加递增代数");
}

#[test]
fn duplicate_name_leaves_pipeline_unchanged() {
    let (pipeline, _) = pipeline();
    let log = journal();
    pipeline
        .add_last("x", Recorder::new("x", EventSet::ALL, &log))
        .expect("首次添加");
    let generation = pipeline.generation();
    let before = pipeline.snapshot();

    let err = pipeline
        .add_last("x", Recorder::new("x2", EventSet::ALL, &log))
        .expect_err("重名");
    assert!(matches!(&err, PipelineError::DuplicateName(name) if name == "x"));
    assert_eq!(err.code(), codes::DUPLICATE_NAME);
    assert!(pipeline.add_first("x", Recorder::new("x3", EventSet::ALL, &log)).is_err());
    assert!(
        pipeline
            .add_before("x", "x", Recorder::new("x4", EventSet::ALL, &log))
            .is_err()
    );

    assert_eq!(pipeline.snapshot(), before);
    assert_eq!(pipeline.generation(), generation);
    assert!(
        entries(&log).iter().all(|entry| entry.starts_with("x:")),
        "被拒绝的 Handler 不触发生命周期回调"
    );
}

#[test]
fn unknown_names_are_rejected() {
    let (pipeline, _) = pipeline();
    let log = journal();
    let err = pipeline
        .add_before("missing", "a", Recorder::new("a", EventSet::ALL, &log))
        .expect_err("锚点不存在");
    assert_eq!(err.code(), codes::NO_SUCH_NAME);
    assert!(matches!(
        pipeline.add_after("missing", "a", Recorder::new("a", EventSet::ALL, &log)),
        Err(PipelineError::NoSuchName(_))
    ));
    assert!(matches!(pipeline.remove("missing"), Err(PipelineError::NoSuchName(_))));
    assert!(matches!(
        pipeline.replace("missing", "a", Recorder::new("a", EventSet::ALL, &log)),
        Err(PipelineError::NoSuchName(_))
    ));
    assert!(pipeline.is_empty());
    assert_eq!(pipeline.generation(), 0);
    assert!(entries(&log).is_empty());
}

#[test]
fn lifecycle_callbacks_fire_in_order() {
    let (pipeline, _) = pipeline();
    let log = journal();
    pipeline
        .add_last("codec", Recorder::new("codec", EventSet::ALL, &log))
        .expect("添加");
    let removed = pipeline.remove("codec").expect("移除");
    assert_eq!(removed.interests(), EventSet::ALL);
    assert_eq!(
        entries(&log),
        [
            "codec:before_add",
            "codec:after_add",
            "codec:before_remove",
            "codec:after_remove"
        ]
    );
    assert!(!pipeline.contains("codec"));
    assert!(matches!(pipeline.remove("codec"), Err(PipelineError::NoSuchName(_))));
}

#[test]
fn before_add_refusal_rejects_the_handler() {
    let (pipeline, _) = pipeline();
    let err = pipeline
        .add_last("guard", Arc::new(Refuser))
        .expect_err("拒绝添加");
    match &err {
        PipelineError::HandlerRejected { name, stage, source } => {
            assert_eq!(name, "guard");
            assert_eq!(*stage, "before_add");
            assert_eq!(source.code(), codes::HANDLER);
        }
        other => panic!("意外错误: {other:?}"),
    }
    assert_eq!(err.code(), codes::HANDLER_REJECTED);
    assert!(pipeline.is_empty());
    assert_eq!(pipeline.generation(), 0);

    let log = journal();
    pipeline
        .add_last("guard", Recorder::new("guard", EventSet::ALL, &log))
        .expect("名称已释放");
    assert_eq!(pipeline.names(), ["guard"]);
}

#[test]
fn replace_keeps_position() {
    let (pipeline, _) = pipeline();
    let log = journal();
    for name in ["a", "b", "c"] {
        pipeline
            .add_last(name, Recorder::new(name, EventSet::INBOUND, &log))
            .expect("添加");
    }
    let generation = pipeline.generation();
    super::support::clear(&log);

    pipeline
        .replace("b", "b2", Recorder::new("b2", EventSet::INBOUND, &log))
        .expect("替换");
    assert_eq!(pipeline.names(), ["a", "b2", "c"]);
    assert_eq!(pipeline.generation(), generation + 1);
    assert_eq!(
        entries(&log),
        [
            "b2:before_add",
            "b:before_remove",
            "b2:after_add",
            "b:after_remove"
        ]
    );

    pipeline
        .replace("a", "a", Recorder::new("a-next", EventSet::INBOUND, &log))
        .expect("同名替换");
    assert_eq!(pipeline.names(), ["a", "b2", "c"]);

    let err = pipeline
        .replace("a", "c", Recorder::new("c2", EventSet::INBOUND, &log))
        .err()
        .expect("新名称已存在");
    assert!(matches!(err, PipelineError::DuplicateName(name) if name == "c"));

    super::support::clear(&log);
    pipeline.fire_message_updated(PipelineMessage::from_user(1_u8));
    assert_eq!(
        events(&log),
        ["a-next:message_updated", "b2:message_updated", "c:message_updated"]
    );
}

#[test]
fn snapshot_reports_ids_and_interests() {
    let (pipeline, _) = pipeline();
    let log = journal();
    let writes = EventSet::of(&[EventKind::Write]);
    pipeline
        .add_last("decoder", Recorder::new("decoder", EventSet::INBOUND, &log))
        .expect("添加");
    pipeline
        .add_last("encoder", Recorder::new("encoder", writes, &log))
        .expect("添加");

    let snapshot = pipeline.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0].name(), "decoder");
    assert_eq!(snapshot[0].interests(), EventSet::INBOUND);
    assert_eq!(snapshot[1].name(), "encoder");
    assert_eq!(snapshot[1].interests(), writes);
    assert_ne!(snapshot[0].id(), snapshot[1].id());
    assert_ne!(snapshot[0].id().raw(), snapshot[1].id().raw());
}

#[test]
fn handler_chain_populates_new_pipelines() {
    let log = journal();
    let chain = HandlerChain::new()
        .with("framer", Recorder::new("framer", EventSet::INBOUND, &log))
        .with("decoder", Recorder::new("decoder", EventSet::INBOUND, &log));
    assert_eq!(chain.len(), 2);

    for _ in 0..2 {
        let pipeline = Pipeline::builder(Arc::new(RecordingTransport::default()))
            .build_with(&chain)
            .expect("装配");
        assert_eq!(pipeline.names(), ["framer", "decoder"]);
    }

    let broken = chain
        .clone()
        .with("framer", Recorder::new("again", EventSet::INBOUND, &log));
    let err = Pipeline::builder(Arc::new(RecordingTransport::default()))
        .build_with(&broken)
        .expect_err("链内重名");
    assert_eq!(err.code(), codes::DUPLICATE_NAME);
}

#[test]
fn context_lookup_starts_from_the_named_handler() {
    let (pipeline, _) = pipeline();
    let log = journal();
    for name in ["a", "b"] {
        pipeline
            .add_last(name, Recorder::new(name, EventSet::INBOUND, &log))
            .expect("添加");
    }
    assert!(pipeline.get("a").is_some());
    assert!(pipeline.get("zzz").is_none());
    assert!(pipeline.context("zzz").is_none());

    let ctx = pipeline.context("a").expect("上下文");
    assert_eq!(ctx.name(), "a");
    assert!(!ctx.is_removed());
    ctx.fire_channel_active();
    assert_eq!(events(&log), ["b:channel_active"], "从 a 之后开始传播");
}
