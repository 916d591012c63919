#![allow(dead_code)]
use std::cell::RefCell;

use loconet_common::{
    constants::lncv::{destination, source, DEVICE_CLASS},
    CvMessage,
};
use loconet_node::{MessageHandler, MessageSink};

/// Collects every message it is handed
#[derive(Default)]
pub struct Recorder {
    frames: RefCell<Vec<(u8, Vec<u8>)>>,
}

impl Recorder {
    /// Take the messages received so far
    pub fn take(&self) -> Vec<(u8, Vec<u8>)> {
        self.frames.take()
    }
}

impl MessageHandler for Recorder {
    fn on_message(&self, opcode: u8, payload: &[u8], _tx: &dyn MessageSink) {
        self.frames.borrow_mut().push((opcode, payload.to_vec()));
    }
}

/// Build the wire payload of an LNCV request from a KPU
pub fn kpu_request(request_id: u8, lncv_number: u16, lncv_value: u16, flags: u8) -> [u8; 12] {
    CvMessage {
        source: source::KPU,
        destination: destination::UB_KPU,
        request_id,
        msb: 0,
        device_class: DEVICE_CLASS,
        lncv_number,
        lncv_value,
        flags,
    }
    .to_payload()
}

/// Decode an LNCV response payload
pub fn cv_response(payload: &[u8]) -> CvMessage {
    CvMessage::from_payload(payload).expect("not an LNCV payload")
}
