//! Send arbitration and dispatch gating through a custom `EchoPolicy`.

use echo_firmware::config::{EchoConfig, ErrorHandling};
use echo_firmware::echo::{
    Echo, EchoOnStreams, EchoPolicy, HeapSerializerFactory, MessageProxy, MessageService,
    MethodId, MethodSerializerFactory, ProxyHandle, SendQueue, ServiceHandle,
};
use echo_firmware::Error;

use crate::mock_transport::{
    MockBus, MockTransport, RecordingHandler, Value, deliver, encode_message, grant_one,
    pump_send,
};

/// Records every decision the engine delegates.
#[derive(Default)]
struct Gatekeeper {
    granted: Vec<ProxyHandle>,
    urgent: Option<ProxyHandle>,
    held: bool,
    done: Vec<Option<ServiceHandle>>,
}

impl EchoPolicy for Gatekeeper {
    fn request_send(&mut self, proxy: ProxyHandle, queue: &mut SendQueue) -> echo_firmware::Result<()> {
        if self.urgent == Some(proxy) {
            queue.push_front(proxy)
        } else {
            queue.push_back(proxy)
        }
    }

    fn granting_send(&mut self, proxy: ProxyHandle) {
        self.granted.push(proxy);
    }

    fn dispatch_allowed(&mut self, _service: ServiceHandle, _method_id: MethodId) -> bool {
        !self.held
    }

    fn service_done(&mut self, service: Option<ServiceHandle>) {
        self.done.push(service);
    }
}

type Bus<'a> = MockBus<'a, HeapSerializerFactory<'a>, Gatekeeper, ErrorHandling>;

fn bus<'a>() -> Bus<'a> {
    EchoOnStreams::with_policies(
        MockTransport::new(),
        HeapSerializerFactory::new(),
        EchoConfig::default(),
        Gatekeeper::default(),
        ErrorHandling::AbortOnMessageFormatError,
    )
}

fn proxies() -> [MessageProxy<Value, 2>; 3] {
    [
        MessageProxy::new(1, 16),
        MessageProxy::new(2, 16),
        MessageProxy::new(3, 16),
    ]
}

// ── Grant order ──────────────────────────────────────────────

#[test]
fn grants_follow_request_order() {
    let [a, b, c] = proxies();
    let mut tx = bus();
    let ha = a.attach(&mut tx).unwrap();
    let hb = b.attach(&mut tx).unwrap();
    let hc = c.attach(&mut tx).unwrap();

    for (i, proxy) in [&a, &b, &c].into_iter().enumerate() {
        proxy.try_call(1, Value(i as u32)).unwrap();
        proxy.pump(&mut tx).unwrap();
    }
    // the first request is granted at once, the others wait
    assert!(tx.is_sending());
    assert_eq!(tx.queued(), 2);
    assert_eq!(tx.transport().outstanding.len(), 1);

    let mut wire = Vec::new();
    while let Some(bytes) = grant_one(&mut tx, 2) {
        // one buffer request at a time means one live serializer at a time
        assert!(tx.transport().outstanding.len() <= 1);
        wire.extend(bytes);
    }

    assert_eq!(tx.policy().granted, vec![ha, hb, hc]);
    let expected: Vec<u8> = (0..3)
        .flat_map(|i| encode_message(i + 1, 1, Value(i)))
        .collect();
    assert_eq!(wire, expected);
    assert!(!tx.serializer_factory().has_serializer());
    assert_eq!(tx.stats().sent, 3);
}

#[test]
fn policy_can_put_a_proxy_first() {
    let [a, b, c] = proxies();
    let mut tx = bus();
    let ha = a.attach(&mut tx).unwrap();
    let hb = b.attach(&mut tx).unwrap();
    let hc = c.attach(&mut tx).unwrap();
    tx.policy_mut().urgent = Some(hc);

    for proxy in [&a, &b, &c] {
        proxy.try_call(1, Value(0)).unwrap();
        proxy.pump(&mut tx).unwrap();
    }
    pump_send(&mut tx, 64);

    assert_eq!(tx.policy().granted, vec![ha, hc, hb]);
}

// ── Cancellation ─────────────────────────────────────────────

#[test]
fn cancelled_queued_request_is_never_granted() {
    let [a, b, c] = proxies();
    let mut tx = bus();
    a.attach(&mut tx).unwrap();
    let hb = b.attach(&mut tx).unwrap();
    c.attach(&mut tx).unwrap();

    for proxy in [&a, &b, &c] {
        proxy.try_call(1, Value(9)).unwrap();
        proxy.pump(&mut tx).unwrap();
    }
    assert_eq!(tx.current_requested_size(hb), Some(16));
    b.cancel(&mut tx);
    assert_eq!(tx.current_requested_size(hb), None);

    let wire = pump_send(&mut tx, 64);
    let mut expected = encode_message(1, 1, Value(9));
    expected.extend(encode_message(3, 1, Value(9)));
    assert_eq!(wire, expected);
    // the call itself stays queued in the proxy
    assert_eq!(b.pending(), 1);
}

#[test]
fn cancelled_grant_skips_the_stray_buffer() {
    let [a, b, _] = proxies();
    let mut tx = bus();
    a.attach(&mut tx).unwrap();
    let hb = b.attach(&mut tx).unwrap();

    a.try_call(1, Value(1)).unwrap();
    a.pump(&mut tx).unwrap();
    b.try_call(1, Value(2)).unwrap();
    b.pump(&mut tx).unwrap();

    a.cancel(&mut tx);
    assert!(!tx.is_sending());

    // the buffer requested for a arrives anyway and is left empty
    assert_eq!(grant_one(&mut tx, 64), Some(Vec::new()));
    assert_eq!(tx.policy().granted, Vec::<ProxyHandle>::new());

    assert_eq!(pump_send(&mut tx, 64), encode_message(2, 1, Value(2)));
    assert_eq!(tx.policy().granted, vec![hb]);

    // a never lost its call and can ask again
    a.pump(&mut tx).unwrap();
    assert_eq!(pump_send(&mut tx, 64), encode_message(1, 1, Value(1)));
}

#[test]
fn detaching_the_granted_proxy_moves_on() {
    let [a, b, _] = proxies();
    let mut tx = bus();
    let ha = a.attach(&mut tx).unwrap();
    b.attach(&mut tx).unwrap();

    a.try_call(1, Value(1)).unwrap();
    a.pump(&mut tx).unwrap();
    b.try_call(1, Value(2)).unwrap();
    b.pump(&mut tx).unwrap();

    tx.detach_proxy(ha).unwrap();
    assert_eq!(tx.detach_proxy(ha), Err(Error::UnknownProxy));

    assert_eq!(pump_send(&mut tx, 64), encode_message(2, 1, Value(2)));
}

#[test]
fn reattached_proxy_asks_again() {
    let [a, b, _] = proxies();
    let mut tx = bus();
    a.attach(&mut tx).unwrap();
    let hb = b.attach(&mut tx).unwrap();

    a.try_call(1, Value(1)).unwrap();
    a.pump(&mut tx).unwrap();
    b.try_call(1, Value(2)).unwrap();
    b.pump(&mut tx).unwrap();
    assert_eq!(tx.queued(), 1);

    // detaching drops b's queued request behind its back
    tx.detach_proxy(hb).unwrap();
    assert_eq!(tx.queued(), 0);

    b.attach(&mut tx).unwrap();
    b.pump(&mut tx).unwrap();
    assert_eq!(tx.queued(), 1);

    let mut expected = encode_message(1, 1, Value(1));
    expected.extend(encode_message(2, 1, Value(2)));
    assert_eq!(pump_send(&mut tx, 64), expected);
    assert_eq!(b.pending(), 0);
}

// ── Request validation ───────────────────────────────────────

#[test]
fn request_errors_are_reported() {
    let [a, _, _] = proxies();
    let mut tx = bus();
    let ha = a.attach(&mut tx).unwrap();

    assert_eq!(
        tx.request_send_with_size(ha, 17),
        Err(Error::MessageTooLarge {
            requested: 17,
            max: 16
        })
    );
    tx.request_send_with_size(ha, 4).unwrap();
    assert_eq!(tx.request_send(ha), Err(Error::AlreadyRequested));
    assert_eq!(tx.transport().requests, vec![4 + 20]);
}

#[test]
fn proxy_table_is_bounded() {
    let all: Vec<MessageProxy<Value, 1>> = (0..=echo_firmware::config::MAX_PROXIES as u32)
        .map(|id| MessageProxy::new(id + 1, 8))
        .collect();
    let mut tx = bus();

    let (last, fitting) = all.split_last().unwrap();
    for proxy in fitting {
        proxy.attach(&mut tx).unwrap();
    }
    assert_eq!(last.attach(&mut tx), Err(Error::RegistryFull));
}

// ── Dispatch gating ──────────────────────────────────────────

#[test]
fn held_dispatch_waits_for_continue_receive() {
    let handler = RecordingHandler::<Value>::new();
    let service: MessageService<'_, Value, 16> = MessageService::new(1, &handler, &[1]);
    let mut rx = bus();
    let hs = service.attach(&mut rx).unwrap();
    rx.policy_mut().held = true;

    let wire = encode_message(1, 1, Value(77));
    // header only; the payload waits
    assert_eq!(rx.data_received(&wire), 3);
    assert_eq!(handler.count(), 0);
    assert!(!rx.is_in_progress(hs));

    rx.policy_mut().held = false;
    rx.continue_receive();
    assert_eq!(rx.transport().ready_signals, 1);
    assert!(rx.is_in_progress(hs));

    assert_eq!(deliver(&mut rx, &wire[3..], 1), wire.len() - 3);
    assert_eq!(handler.recorded(), vec![(1, Value(77))]);
    assert_eq!(rx.policy().done, vec![Some(hs)]);
}
