use proptest::prelude::*;
use spark_channel::{EventKind, EventSet, PipelineMessage};

use super::support::{Recorder, clear, events, journal, pipeline};

fn interests() -> impl Strategy<Value = Vec<(bool, bool)>> {
    prop::collection::vec((any::<bool>(), any::<bool>()), 0..8)
}

fn mask((inbound, outbound): (bool, bool)) -> EventSet {
    let mut set = EventSet::EMPTY;
    if inbound {
        set = set.with(EventKind::MessageUpdated);
    }
    if outbound {
        set = set.with(EventKind::Write);
    }
    set
}

proptest! {
    #[test]
    fn events_visit_exactly_the_interested_handlers(
        layout in interests(),
        removed in any::<prop::sample::Index>(),
    ) {
        let (pipeline, transport) = pipeline();
        let log = journal();
        for (position, flags) in layout.iter().enumerate() {
            let name = format!("h{position}");
            pipeline
                .add_last(name.clone(), Recorder::new(name, mask(*flags), &log))
                .expect("添加");
        }

        let expected_inbound: Vec<String> = layout
            .iter()
            .enumerate()
            .filter(|(_, (inbound, _))| *inbound)
            .map(|(position, _)| format!("h{position}:message_updated"))
            .collect();
        pipeline.fire_message_updated(PipelineMessage::from_user(()));
        prop_assert_eq!(events(&log), expected_inbound);

        clear(&log);
        let expected_outbound: Vec<String> = layout
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, (_, outbound))| *outbound)
            .map(|(position, _)| format!("h{position}:write"))
            .collect();
        let future = pipeline.write(PipelineMessage::from_user(()));
        prop_assert_eq!(events(&log), expected_outbound);
        prop_assert!(future.is_done());
        prop_assert!(transport.written().is_empty());

        if !layout.is_empty() {
            let victim = removed.index(layout.len());
            pipeline.remove(&format!("h{victim}")).expect("移除");
            clear(&log);
            pipeline.fire_message_updated(PipelineMessage::from_user(()));
            let expected: Vec<String> = layout
                .iter()
                .enumerate()
                .filter(|(position, (inbound, _))| *inbound && *position != victim)
                .map(|(position, _)| format!("h{position}:message_updated"))
                .collect();
            prop_assert_eq!(events(&log), expected);
        }
    }
}
