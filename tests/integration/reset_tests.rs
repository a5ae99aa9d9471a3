//! Transport re-initialization in the middle of traffic.

use echo_firmware::config::{EchoConfig, ErrorHandling};
use echo_firmware::echo::{
    Echo, EchoOnStreams, FifoPolicy, HeapSerializerFactory, MessageProxy, MessageService,
    MethodSerializerFactory,
};

use crate::mock_transport::{
    Blob, MockBus, MockTransport, RecordingHandler, Value, deliver, encode_message, grant_one,
    pump_send,
};

type HeapBus<'a> = MockBus<'a, HeapSerializerFactory<'a>, FifoPolicy, ErrorHandling>;

fn heap_bus<'a>() -> HeapBus<'a> {
    EchoOnStreams::new(
        MockTransport::new(),
        HeapSerializerFactory::new(),
        EchoConfig {
            error_handling: ErrorHandling::AbortOnMessageFormatError,
            ..EchoConfig::default()
        },
    )
}

#[test]
fn partially_sent_message_is_not_resumed() -> anyhow::Result<()> {
    let proxy: MessageProxy<Blob, 2> = MessageProxy::new(3, 64);
    let mut tx = heap_bus();
    proxy.attach(&mut tx)?;

    let blob = Blob(vec![0x5a; 50]);
    proxy.try_call(1, blob.clone())?;
    proxy.pump(&mut tx)?;

    let first = grant_one(&mut tx, 10).ok_or_else(|| anyhow::anyhow!("no buffer requested"))?;
    assert_eq!(first.len(), 10);
    assert!(tx.serializer_factory().has_serializer());

    tx.initialized();
    assert!(!tx.is_sending());
    assert!(!tx.serializer_factory().has_serializer());

    // the buffer requested before the reset is consumed without output
    assert_eq!(pump_send(&mut tx, 10), Vec::<u8>::new());

    // the call was handed to the engine and is gone; the application
    // queues it again
    assert_eq!(proxy.pending(), 0);
    proxy.try_call(1, blob.clone())?;
    proxy.pump(&mut tx)?;
    assert_eq!(pump_send(&mut tx, 10), encode_message(3, 1, blob));
    Ok(())
}

#[test]
fn grant_without_output_survives_reset() {
    let proxy: MessageProxy<Value, 2> = MessageProxy::new(3, 16);
    let mut tx = heap_bus();
    proxy.attach(&mut tx).unwrap();

    proxy.try_call(2, Value(1)).unwrap();
    proxy.pump(&mut tx).unwrap();
    tx.initialized();
    assert!(tx.is_sending());

    assert_eq!(pump_send(&mut tx, 64), encode_message(3, 2, Value(1)));
    assert_eq!(tx.transport().requests.len(), 1);
}

#[test]
fn partially_received_message_is_dropped() -> anyhow::Result<()> {
    let handler = RecordingHandler::<Blob>::new();
    let service: MessageService<'_, Blob, 64> = MessageService::new(2, &handler, &[1]);
    let mut rx = heap_bus();
    let hs = service.attach(&mut rx)?;

    let lost = encode_message(2, 1, Blob(vec![1; 30]));
    assert_eq!(rx.data_received(&lost[..12]), 12);
    assert!(rx.is_in_progress(hs));

    rx.initialized();
    assert!(!rx.is_in_progress(hs));
    assert!(!rx.serializer_factory().has_deserializer());

    let kept = encode_message(2, 1, Blob(vec![2; 4]));
    assert_eq!(deliver(&mut rx, &kept, 3), kept.len());
    assert_eq!(handler.recorded(), vec![(1, Blob(vec![2; 4]))]);
    Ok(())
}

#[test]
fn reset_abandons_a_pending_dispatch() {
    let handler = RecordingHandler::<Value>::new();
    handler.hold.set(true);
    let service: MessageService<'_, Value, 16> = MessageService::new(1, &handler, &[1]);
    let mut rx = heap_bus();
    service.attach(&mut rx).unwrap();

    let wire = encode_message(1, 1, Value(5));
    assert_eq!(rx.data_received(&wire), wire.len());
    assert_eq!(rx.data_received(&wire), 0);

    rx.initialized();
    // a late completion from the handler is ignored
    rx.service_done();
    assert_eq!(rx.transport().ready_signals, 0);

    handler.hold.set(false);
    assert_eq!(rx.data_received(&wire), wire.len());
    assert_eq!(handler.count(), 2);
}
