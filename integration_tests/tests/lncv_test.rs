use assertables::assert_contains;
use integration_tests::sim_bus::{SimBus, SimNode};
use loconet_common::{
    constants::{
        lncv::{destination, flags, request, source, DEVICE_CLASS},
        opcodes::{OPC_LONG_ACK, OPC_PEER_XFER},
    },
    device_config::DeviceConfig,
    messages::Message,
    AckCode, CvMessage, LncvConfig,
};
use loconet_node::{storage::MemoryPageStore, LncvServer, MessageSink, NoHooks, NodeConfig};

mod utils;
use utils::{cv_response, kpu_request, Recorder};

const MODULE: usize = 0;
const PROGRAMMER: usize = 1;

fn new_bus() -> SimBus {
    let mut bus = SimBus::new(&[NodeConfig::new(), NodeConfig::new()]);
    bus.start();
    bus
}

fn new_server(bus: &SimBus) -> LncvServer<'static, MemoryPageStore<1>> {
    LncvServer::new(
        MemoryPageStore::<1>::new(),
        NoHooks,
        bus.link(MODULE).config(),
        LncvConfig::new(),
    )
    .unwrap()
}

/// Send a request from the programmer and collect what comes back
fn request(
    bus: &mut SimBus,
    nodes: &mut [SimNode<'_>],
    programmer: &Recorder,
    payload: [u8; 12],
) -> Vec<(u8, Vec<u8>)> {
    bus.link(PROGRAMMER)
        .send(3, OPC_PEER_XFER, &payload)
        .unwrap();
    bus.run_until_quiet(nodes);
    programmer.take()
}

fn single_value(responses: Vec<(u8, Vec<u8>)>) -> CvMessage {
    assert_eq!(1, responses.len(), "{responses:?}");
    assert_eq!(OPC_PEER_XFER, responses[0].0);
    cv_response(&responses[0].1)
}

fn single_ack(responses: Vec<(u8, Vec<u8>)>) -> u8 {
    assert_eq!(1, responses.len(), "{responses:?}");
    assert_eq!(OPC_LONG_ACK, responses[0].0);
    assert_eq!(OPC_PEER_XFER & 0x7F, responses[0].1[0]);
    responses[0].1[1]
}

#[test]
fn test_factory_fresh_read() {
    let programmer = Recorder::default();
    let mut bus = new_bus();
    let server = new_server(&bus);
    let mut nodes = [
        SimNode::new(bus.link(MODULE)),
        SimNode::new(bus.link(PROGRAMMER)),
    ];
    nodes[MODULE].register_lncv(&server).unwrap();
    nodes[PROGRAMMER].register(OPC_PEER_XFER, &programmer).unwrap();

    let response = single_value(request(
        &mut bus,
        &mut nodes,
        &programmer,
        kpu_request(request::CFG_REQUEST, 0, 0, 0),
    ));
    assert_eq!(source::MODULE, response.source);
    assert_eq!(destination::UB_KPU, response.destination);
    assert_eq!(request::CFG_READ, response.request_id);
    assert_eq!(DEVICE_CLASS, response.device_class);
    assert_eq!(0, response.lncv_number);
    assert_eq!(3, response.lncv_value);
}

#[test]
fn test_programming_session() {
    let programmer = Recorder::default();
    let mut bus = new_bus();
    let server = new_server(&bus);
    let mut nodes = [
        SimNode::new(bus.link(MODULE)),
        SimNode::new(bus.link(PROGRAMMER)),
    ];
    nodes[MODULE].register_lncv(&server).unwrap();
    nodes[PROGRAMMER].register(OPC_PEER_XFER, &programmer).unwrap();
    nodes[PROGRAMMER].register(OPC_LONG_ACK, &programmer).unwrap();

    // Broadcast programming request, answered with the module address
    let response = single_value(request(
        &mut bus,
        &mut nodes,
        &programmer,
        kpu_request(request::CFG_REQUEST, 0, 0xFFFF, flags::PROG_ON),
    ));
    assert_eq!(3, response.lncv_value);
    assert!(server.is_programming());

    let code = single_ack(request(
        &mut bus,
        &mut nodes,
        &programmer,
        kpu_request(request::CFG_WRITE, 0, 300, 0),
    ));
    assert_eq!(u8::from(AckCode::Ok), code);
    assert_eq!(300, bus.link(MODULE).config().address().raw());
    assert_contains!(
        bus.wire_frames(),
        &Message::long_ack(OPC_PEER_XFER, AckCode::Ok.into())
    );

    let code = single_ack(request(
        &mut bus,
        &mut nodes,
        &programmer,
        kpu_request(request::CFG_WRITE, 2, 7, 0),
    ));
    assert_eq!(u8::from(AckCode::Ok), code);
    assert_eq!(7, bus.link(MODULE).config().priority().raw());

    let response = single_value(request(
        &mut bus,
        &mut nodes,
        &programmer,
        kpu_request(request::CFG_REQUEST, 0, 0, 0),
    ));
    assert_eq!(300, response.lncv_value);
    // The device class marker was stamped by the first write
    let response = single_value(request(
        &mut bus,
        &mut nodes,
        &programmer,
        kpu_request(request::CFG_REQUEST, 1, 0, 0),
    ));
    assert_eq!(DEVICE_CLASS, response.lncv_value);

    let responses = request(
        &mut bus,
        &mut nodes,
        &programmer,
        kpu_request(request::CFG_REQUEST, 0, 0, flags::PROG_OFF),
    );
    assert!(responses.is_empty());
    assert!(!server.is_programming());

    // Both values were committed
    let store = server.with_store(|s| s.page(0).copied()).unwrap();
    assert_eq!(300, store[0]);
    assert_eq!(7, store[2]);
}

#[test]
fn test_rejected_writes() {
    let programmer = Recorder::default();
    let mut bus = new_bus();
    let server = new_server(&bus);
    let mut nodes = [
        SimNode::new(bus.link(MODULE)),
        SimNode::new(bus.link(PROGRAMMER)),
    ];
    nodes[MODULE].register_lncv(&server).unwrap();
    nodes[PROGRAMMER].register(OPC_PEER_XFER, &programmer).unwrap();
    nodes[PROGRAMMER].register(OPC_LONG_ACK, &programmer).unwrap();

    // Outside programming mode writes are silently ignored
    let responses = request(
        &mut bus,
        &mut nodes,
        &programmer,
        kpu_request(request::CFG_WRITE, 5, 1234, 0),
    );
    assert!(responses.is_empty());
    assert_eq!(0xFFFF, server.get(5));

    single_value(request(
        &mut bus,
        &mut nodes,
        &programmer,
        kpu_request(request::CFG_REQUEST, 0, 3, flags::PROG_ON),
    ));

    let code = single_ack(request(
        &mut bus,
        &mut nodes,
        &programmer,
        kpu_request(request::CFG_WRITE, 1, 5, 0),
    ));
    assert_eq!(u8::from(AckCode::ReadOnly), code);

    let code = single_ack(request(
        &mut bus,
        &mut nodes,
        &programmer,
        kpu_request(request::CFG_WRITE, 30, 5, 0),
    ));
    assert_eq!(u8::from(AckCode::OutOfRange), code);

    let code = single_ack(request(
        &mut bus,
        &mut nodes,
        &programmer,
        kpu_request(request::CFG_REQUEST, 40, 0, 0),
    ));
    assert_eq!(u8::from(AckCode::OutOfRange), code);

    // Priority 0 is reserved
    let code = single_ack(request(
        &mut bus,
        &mut nodes,
        &programmer,
        kpu_request(request::CFG_WRITE, 2, 0, 0),
    ));
    assert_eq!(u8::from(AckCode::OutOfRange), code);

    let code = single_ack(request(
        &mut bus,
        &mut nodes,
        &programmer,
        kpu_request(request::CFG_WRITE, 5, 1234, 0),
    ));
    assert_eq!(u8::from(AckCode::Ok), code);
    assert_eq!(1234, server.get(5));
}

#[test]
fn test_other_device_class_ignored() {
    let programmer = Recorder::default();
    let mut bus = new_bus();
    let server = new_server(&bus);
    let mut nodes = [
        SimNode::new(bus.link(MODULE)),
        SimNode::new(bus.link(PROGRAMMER)),
    ];
    nodes[MODULE].register_lncv(&server).unwrap();
    nodes[PROGRAMMER].register(OPC_PEER_XFER, &programmer).unwrap();

    let mut other = kpu_request(request::CFG_REQUEST, 0, 0xFFFF, flags::PROG_ON);
    other[5] = 0x11;
    let responses = request(&mut bus, &mut nodes, &programmer, other);
    assert!(responses.is_empty());
    assert!(!server.is_programming());

    let response = single_value(request(
        &mut bus,
        &mut nodes,
        &programmer,
        kpu_request(request::CFG_REQUEST, 2, 0, 0),
    ));
    assert_eq!(5, response.lncv_value);
}

#[test]
fn test_defaults_from_device_config() {
    let device = DeviceConfig::load_from_str(
        r#"
        [lncv]
        initial_address = 42
        initial_priority = 3
        "#,
    )
    .unwrap();

    let programmer = Recorder::default();
    let mut bus = new_bus();
    let server = LncvServer::new(
        MemoryPageStore::<1>::new(),
        NoHooks,
        bus.link(MODULE).config(),
        device.lncv,
    )
    .unwrap();
    assert_eq!(3, bus.link(MODULE).config().priority().raw());

    let mut nodes = [
        SimNode::new(bus.link(MODULE)),
        SimNode::new(bus.link(PROGRAMMER)),
    ];
    nodes[MODULE].register_lncv(&server).unwrap();
    nodes[PROGRAMMER].register(OPC_PEER_XFER, &programmer).unwrap();

    let response = single_value(request(
        &mut bus,
        &mut nodes,
        &programmer,
        kpu_request(request::CFG_REQUEST, 0, 0, 0),
    ));
    assert_eq!(42, response.lncv_value);
}
