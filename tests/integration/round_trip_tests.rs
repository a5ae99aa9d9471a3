//! End-to-end tests: proxy on one bus, service on another, bytes copied
//! between their mock transports in arbitrary chunks.

use echo_firmware::config::{EchoConfig, ErrorHandling};
use echo_firmware::echo::{
    CountingErrorPolicy, Echo, EchoOnStreams, FifoPolicy, HeapSerializerFactory,
    MessageDeserializer, MessageProxy, MessageSerializer, MessageService,
    MethodSerializerFactory, StaticSerializerFactory,
};
use echo_firmware::echo::wire::ProtoMessage;
use echo_firmware::{method_deserializer_set, method_serializer_set};

use crate::mock_transport::{
    Blob, MockBus, MockTransport, RecordingHandler, Value, deliver, encode_message, pump_send,
};

type HeapBus<'a> = MockBus<'a, HeapSerializerFactory<'a>, FifoPolicy, ErrorHandling>;

fn tolerant() -> EchoConfig {
    EchoConfig {
        error_handling: ErrorHandling::AbortOnMessageFormatError,
        ..EchoConfig::default()
    }
}

fn heap_bus<'a>() -> HeapBus<'a> {
    EchoOnStreams::new(MockTransport::new(), HeapSerializerFactory::new(), tolerant())
}

/// Grant buffers until the proxy has nothing left to send.
fn drain_proxy<'a, B, M, const D: usize>(
    proxy: &MessageProxy<M, D>,
    bus: &mut MockBus<'a, B, FifoPolicy, ErrorHandling>,
    chunk: usize,
) -> Vec<u8>
where
    B: MethodSerializerFactory,
    M: ProtoMessage,
{
    let mut out = Vec::new();
    while proxy.pending() > 0 || bus.is_sending() {
        proxy.pump(bus).unwrap();
        out.extend(pump_send(bus, chunk));
    }
    out
}

// ── Single message ───────────────────────────────────────────

#[test]
fn value_zero_goes_over_the_wire_as_five_bytes() {
    let handler = RecordingHandler::<Value>::new();
    let service: MessageService<'_, Value, 16> = MessageService::new(1, &handler, &[1]);
    let proxy: MessageProxy<Value, 4> = MessageProxy::new(1, 16);

    let mut tx = heap_bus();
    let mut rx = heap_bus();
    proxy.attach(&mut tx).unwrap();
    service.attach(&mut rx).unwrap();

    proxy.try_call(1, Value(0)).unwrap();
    let wire = drain_proxy(&proxy, &mut tx, 64);

    assert_eq!(wire, [0x01, 0x0a, 0x02, 0x08, 0x00]);
    // payload limit plus the default header overhead
    assert_eq!(tx.transport().requests, vec![36]);
    assert_eq!(tx.stats().sent, 1);

    assert_eq!(deliver(&mut rx, &wire, wire.len()), wire.len());
    assert_eq!(handler.recorded(), vec![(1, Value(0))]);
    assert_eq!(rx.stats().dispatched, 1);
}

#[test]
fn message_split_at_every_boundary_is_dispatched_once() {
    let wire = [0x01, 0x0a, 0x02, 0x08, 0x00];

    for split in 0..=wire.len() {
        let handler = RecordingHandler::<Value>::new();
        let service: MessageService<'_, Value, 16> = MessageService::new(1, &handler, &[1]);
        let mut rx = heap_bus();
        service.attach(&mut rx).unwrap();

        let (first, second) = wire.split_at(split);
        assert_eq!(rx.data_received(first), first.len());
        assert_eq!(rx.data_received(second), second.len());

        assert_eq!(handler.recorded(), vec![(1, Value(0))], "split at {split}");
    }
}

#[test]
fn empty_message_is_dispatched_without_payload() {
    let handler = RecordingHandler::<Value>::new();
    let service: MessageService<'_, Value, 16> = MessageService::new(4, &handler, &[9]);
    let mut rx = heap_bus();
    service.attach(&mut rx).unwrap();

    // service 4, method 9, zero-length payload
    assert_eq!(rx.data_received(&[0x04, 0x4a, 0x00]), 3);
    assert_eq!(handler.recorded(), vec![(9, Value(0))]);
}

// ── Streams of messages ──────────────────────────────────────

#[test]
fn mixed_traffic_survives_any_chunking() {
    let calls: Vec<(u32, Value)> = vec![(1, Value(7)), (2, Value(300)), (1, Value(u32::MAX))];
    let blobs: Vec<(u32, Blob)> = vec![(5, Blob(vec![0xaa; 40])), (5, Blob((0..=99).collect()))];

    for tx_chunk in [1, 3, 8, 64] {
        for rx_chunk in [1, 2, 5, 9, 256] {
            let values = RecordingHandler::<Value>::new();
            let bytes = RecordingHandler::<Blob>::new();
            let value_service: MessageService<'_, Value, 16> =
                MessageService::new(1, &values, &[1, 2]);
            let blob_service: MessageService<'_, Blob, 128> =
                MessageService::new(2, &bytes, &[5]);
            let value_proxy: MessageProxy<Value, 4> = MessageProxy::new(1, 16);
            let blob_proxy: MessageProxy<Blob, 4> = MessageProxy::new(2, 128);

            let mut tx = heap_bus();
            let mut rx = heap_bus();
            value_proxy.attach(&mut tx).unwrap();
            blob_proxy.attach(&mut tx).unwrap();
            value_service.attach(&mut rx).unwrap();
            blob_service.attach(&mut rx).unwrap();

            for (method, value) in &calls {
                value_proxy.try_call(*method, *value).unwrap();
            }
            for (method, blob) in &blobs {
                blob_proxy.try_call(*method, blob.clone()).unwrap();
            }

            let mut wire = Vec::new();
            while value_proxy.pending() > 0 || blob_proxy.pending() > 0 || tx.is_sending() {
                value_proxy.pump(&mut tx).unwrap();
                blob_proxy.pump(&mut tx).unwrap();
                wire.extend(pump_send(&mut tx, tx_chunk));
            }

            assert_eq!(deliver(&mut rx, &wire, rx_chunk), wire.len());
            assert_eq!(values.recorded(), calls, "tx {tx_chunk} rx {rx_chunk}");
            assert_eq!(bytes.recorded(), blobs, "tx {tx_chunk} rx {rx_chunk}");
        }
    }
}

// ── Closed codec sets ────────────────────────────────────────

method_serializer_set! {
    enum Outbound {
        Value(MessageSerializer<Value>),
        Blob(MessageSerializer<Blob>),
    }
}

method_deserializer_set! {
    enum Inbound<'a> {
        Value(MessageDeserializer<'a, Value, 16>),
        Blob(MessageDeserializer<'a, Blob, 64>),
    }
}

type StaticBus<'a> =
    MockBus<'a, StaticSerializerFactory<Outbound, Inbound<'a>>, FifoPolicy, ErrorHandling>;

fn static_bus<'a>() -> StaticBus<'a> {
    EchoOnStreams::new(MockTransport::new(), StaticSerializerFactory::new(), tolerant())
}

#[test]
fn static_arena_carries_both_message_types() {
    let values = RecordingHandler::<Value>::new();
    let bytes = RecordingHandler::<Blob>::new();
    let value_service: MessageService<'_, Value, 16> = MessageService::new(1, &values, &[1]);
    let blob_service: MessageService<'_, Blob, 64> = MessageService::new(2, &bytes, &[1]);
    let value_proxy: MessageProxy<Value, 2> = MessageProxy::new(1, 16);
    let blob_proxy: MessageProxy<Blob, 2> = MessageProxy::new(2, 64);

    let mut tx = static_bus();
    let mut rx = static_bus();
    value_proxy.attach(&mut tx).unwrap();
    blob_proxy.attach(&mut tx).unwrap();
    value_service.attach(&mut rx).unwrap();
    blob_service.attach(&mut rx).unwrap();

    blob_proxy.try_call(1, Blob(b"hello".to_vec())).unwrap();
    value_proxy.try_call(1, Value(42)).unwrap();
    blob_proxy.pump(&mut tx).unwrap();
    value_proxy.pump(&mut tx).unwrap();
    let wire = pump_send(&mut tx, 4);

    let mut expected = encode_message(2, 1, Blob(b"hello".to_vec()));
    expected.extend(encode_message(1, 1, Value(42)));
    assert_eq!(wire, expected);

    assert_eq!(deliver(&mut rx, &wire, 3), wire.len());
    assert_eq!(values.recorded(), vec![(1, Value(42))]);
    assert_eq!(bytes.recorded(), vec![(1, Blob(b"hello".to_vec()))]);
    assert!(!rx.serializer_factory().has_deserializer());
}

// ── Messages nobody wants ────────────────────────────────────

type CountingBus<'a> = MockBus<'a, HeapSerializerFactory<'a>, FifoPolicy, CountingErrorPolicy>;

fn counting_bus<'a>() -> CountingBus<'a> {
    EchoOnStreams::with_policies(
        MockTransport::new(),
        HeapSerializerFactory::new(),
        EchoConfig::default(),
        FifoPolicy,
        CountingErrorPolicy::default(),
    )
}

#[test]
fn unknown_service_payload_is_skipped() {
    let handler = RecordingHandler::<Value>::new();
    let service: MessageService<'_, Value, 16> = MessageService::new(1, &handler, &[1]);
    let mut rx = counting_bus();
    service.attach(&mut rx).unwrap();

    let mut wire = encode_message(9, 1, Blob(vec![0x08; 30]));
    wire.extend(encode_message(1, 1, Value(5)));

    assert_eq!(deliver(&mut rx, &wire, 4), wire.len());
    assert_eq!(rx.errors().services_not_found, 1);
    assert_eq!(handler.recorded(), vec![(1, Value(5))]);
    assert_eq!(rx.stats().discarded, 1);
}

#[test]
fn unknown_method_payload_is_skipped() {
    let handler = RecordingHandler::<Value>::new();
    let service: MessageService<'_, Value, 16> = MessageService::new(1, &handler, &[1]);
    let mut rx = counting_bus();
    service.attach(&mut rx).unwrap();

    let mut wire = encode_message(1, 3, Value(1));
    wire.extend(encode_message(1, 1, Value(2)));

    assert_eq!(deliver(&mut rx, &wire, wire.len()), wire.len());
    assert_eq!(rx.errors().methods_not_found, 1);
    assert_eq!(handler.recorded(), vec![(1, Value(2))]);
}

#[test]
fn oversized_payload_is_a_format_error() {
    let handler = RecordingHandler::<Blob>::new();
    let service: MessageService<'_, Blob, 8> = MessageService::new(1, &handler, &[1]);
    let mut rx = counting_bus();
    service.attach(&mut rx).unwrap();

    let mut wire = encode_message(1, 1, Blob(vec![1; 20]));
    wire.extend(encode_message(1, 1, Blob(vec![2; 3])));

    assert_eq!(deliver(&mut rx, &wire, 5), wire.len());
    assert_eq!(rx.errors().format_errors, 1);
    assert_eq!(rx.stats().format_errors, 1);
    assert_eq!(handler.recorded(), vec![(1, Blob(vec![2; 3]))]);
}

#[test]
#[should_panic(expected = "message format error")]
fn default_handling_aborts_on_garbage_payload() {
    let handler = RecordingHandler::<Value>::new();
    let service: MessageService<'_, Value, 16> = MessageService::new(1, &handler, &[1]);
    let mut rx = heap_bus();
    service.attach(&mut rx).unwrap();

    // field 0 is never valid
    rx.data_received(&[0x01, 0x0a, 0x02, 0x00, 0x00]);
}

// ── Asynchronous completion ──────────────────────────────────

#[test]
fn pending_handler_holds_the_stream_until_service_done() {
    let handler = RecordingHandler::<Value>::new();
    handler.hold.set(true);
    let service: MessageService<'_, Value, 16> = MessageService::new(1, &handler, &[1]);
    let mut rx = heap_bus();
    service.attach(&mut rx).unwrap();

    let first = encode_message(1, 1, Value(1));
    let mut wire = first.clone();
    wire.extend(encode_message(1, 1, Value(2)));

    assert_eq!(rx.data_received(&wire), first.len());
    assert_eq!(handler.count(), 1);

    handler.hold.set(false);
    rx.service_done();
    assert_eq!(rx.transport().ready_signals, 1);

    assert_eq!(rx.data_received(&wire[first.len()..]), wire.len() - first.len());
    assert_eq!(handler.recorded(), vec![(1, Value(1)), (1, Value(2))]);
}
