use integration_tests::sim_bus::{SimBus, SimNode};
use loconet_common::{
    constants::opcodes::{OPC_GPON, OPC_LONG_ACK, OPC_PEER_XFER},
    messages::Message,
};
use loconet_node::NodeConfig;
use proptest::prelude::*;

mod utils;
use utils::Recorder;

fn listener_bus() -> SimBus {
    let mut bus = SimBus::new(&[NodeConfig::new()]);
    bus.start();
    bus
}

#[test]
fn test_back_to_back_frames() {
    let recorder = Recorder::default();
    let mut bus = listener_bus();
    let mut nodes = [SimNode::new(bus.link(0))];
    nodes[0].register(OPC_LONG_ACK, &recorder).unwrap();

    let a = Message::four(OPC_LONG_ACK, 0x65, 0x7F).unwrap();
    let b = Message::four(OPC_LONG_ACK, 0x6D, 0x01).unwrap();
    bus.send_raw(a.as_bytes());
    bus.send_raw(b.as_bytes());
    bus.run_until_quiet(&mut nodes);

    assert_eq!(
        vec![(OPC_LONG_ACK, vec![0x65, 0x7F]), (OPC_LONG_ACK, vec![0x6D, 0x01])],
        recorder.take()
    );
    assert_eq!(2, nodes[0].rx_message_count());
}

#[test]
fn test_stray_byte_before_frame() {
    let recorder = Recorder::default();
    let mut bus = listener_bus();
    let mut nodes = [SimNode::new(bus.link(0))];
    nodes[0].register(OPC_GPON, &recorder).unwrap();

    bus.send_raw(&[0x12]);
    bus.send_raw(Message::two(OPC_GPON).unwrap().as_bytes());
    bus.run_until_quiet(&mut nodes);

    assert_eq!(vec![(OPC_GPON, vec![])], recorder.take());
    assert_eq!(0, bus.link(0).rx().available());
}

#[test]
fn test_corrupt_frames_dropped() {
    let recorder = Recorder::default();
    let mut bus = listener_bus();
    let mut nodes = [SimNode::new(bus.link(0))];
    nodes[0].register(OPC_PEER_XFER, &recorder).unwrap();

    let good = Message::new(OPC_PEER_XFER, &[1, 2, 3]).unwrap();
    // Bad checksum
    let mut bad = good.as_bytes().to_vec();
    bad[2] ^= 0x40;
    bus.send_raw(&bad);
    // Cut short by the next frame
    bus.send_raw(&good.as_bytes()[..3]);
    bus.send_raw(good.as_bytes());
    bus.run_until_quiet(&mut nodes);

    assert_eq!(vec![(OPC_PEER_XFER, vec![1, 2, 3])], recorder.take());
}

#[derive(Debug, Clone)]
enum Chunk {
    Stray(u8),
    Ack(u8, u8),
    Peer(Vec<u8>),
}

fn chunk() -> impl Strategy<Value = Chunk> {
    prop_oneof![
        (0u8..0x80).prop_map(Chunk::Stray),
        (0u8..0x80, 0u8..0x80).prop_map(|(a, b)| Chunk::Ack(a, b)),
        proptest::collection::vec(0u8..0x80, 0..12).prop_map(Chunk::Peer),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn every_intact_frame_is_delivered_once(chunks in proptest::collection::vec(chunk(), 1..12)) {
        let recorder = Recorder::default();
        let mut bus = listener_bus();
        let mut nodes = [SimNode::new(bus.link(0))];
        nodes[0].register(OPC_LONG_ACK, &recorder).unwrap();
        nodes[0].register(OPC_PEER_XFER, &recorder).unwrap();

        let mut expected = Vec::new();
        for chunk in &chunks {
            match chunk {
                Chunk::Stray(b) => bus.send_raw(&[*b]),
                Chunk::Ack(a, b) => {
                    bus.send_raw(Message::four(OPC_LONG_ACK, *a, *b).unwrap().as_bytes());
                    expected.push((OPC_LONG_ACK, vec![*a, *b]));
                }
                Chunk::Peer(data) => {
                    bus.send_raw(Message::new(OPC_PEER_XFER, data).unwrap().as_bytes());
                    expected.push((OPC_PEER_XFER, data.clone()));
                }
            }
        }
        bus.run_until_quiet(&mut nodes);
        prop_assert_eq!(expected, recorder.take());
    }
}
