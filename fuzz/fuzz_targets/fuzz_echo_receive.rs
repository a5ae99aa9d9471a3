//! Fuzz target: `EchoOnStreams::data_received`
//!
//! Pushes arbitrary bytes through a bus running the counting error policy.
//! Nothing may panic, every byte must be consumed, and the arenas must be
//! left consistent.
//!
//! cargo fuzz run fuzz_echo_receive

#![no_main]

use echo_firmware::config::EchoConfig;
use echo_firmware::echo::wire::{ProtoFormatter, ProtoMessage, ProtoParser};
use echo_firmware::echo::{
    CountingErrorPolicy, EchoOnStreams, FifoPolicy, MessageDeserializer, MessageSerializer,
    MessageService, MethodCompletion, MethodId, NullTransport, StaticSerializerFactory,
};
use echo_firmware::{WireError, method_deserializer_set, method_serializer_set};
use libfuzzer_sys::fuzz_target;

#[derive(Default)]
struct Sample {
    counter: u64,
    flags: u32,
}

impl ProtoMessage for Sample {
    fn serialize(&self, f: &mut ProtoFormatter<'_>) {
        f.put_var_int_field(self.counter, 1);
        f.put_fixed32_field(self.flags, 2);
    }

    fn deserialize(parser: &mut ProtoParser<'_>) -> Result<Self, WireError> {
        let mut sample = Self::default();
        for field in parser {
            let field = field?;
            match field.number {
                1 => sample.counter = field.value.as_u64()?,
                2 => sample.flags = field.value.as_u32()?,
                _ => {}
            }
        }
        Ok(sample)
    }
}

method_serializer_set! {
    enum Outbound {
        Sample(MessageSerializer<Sample>),
    }
}

method_deserializer_set! {
    enum Inbound<'a> {
        Sample(MessageDeserializer<'a, Sample, 32>),
    }
}

fuzz_target!(|data: &[u8]| {
    let handler = |_: MethodId, _: Sample| MethodCompletion::Done;
    let service: MessageService<'_, Sample, 32> = MessageService::new(1, &handler, &[1, 2]);

    let mut bus = EchoOnStreams::<_, StaticSerializerFactory<Outbound, Inbound<'_>>, _, _>::with_policies(
        NullTransport,
        StaticSerializerFactory::new(),
        EchoConfig::default(),
        FifoPolicy,
        CountingErrorPolicy::default(),
    );
    if service.attach(&mut bus).is_err() {
        return;
    }

    // split the input at its first byte to exercise reassembly
    let cut = data.first().map_or(0, |&b| usize::from(b)).min(data.len());
    let (head, tail) = data.split_at(cut);
    assert_eq!(bus.data_received(head), head.len());
    assert_eq!(bus.data_received(tail), tail.len());

    bus.initialized();
    assert!(!bus.is_sending());
});
