//! LNCV programming server
//!
//! Answers LNCV read, write and programming mode requests, storing values in a [`PageStore`].
//!
//! Three slots are reserved:
//!
//! | Slot | Meaning |
//! | ---- | ------- |
//! | 0    | Module address, also the LNCV module address used to enter programming mode |
//! | 1    | Device class marker, read only. Set once slot 0 or 2 has been written. |
//! | 2    | Arbitration priority |
//!
//! Until the marker has been stamped, reads of slots 0 and 2 return the configured defaults rather
//! than whatever the erased store holds.
use core::cell::RefCell;

use defmt_or_log::{debug, error, info};
use loconet_common::{
    constants::{
        lncv::{source, SEQUENCE_SENTINEL},
        opcodes::{OPC_IMM_PACKET, OPC_PEER_XFER, OPC_RD_SL_DATA, OPC_WR_SL_DATA},
    },
    lncv::{CvRequest, CV_PAYLOAD_LEN},
    AckCode, AtomicCell, CvMessage, DeviceAddress, LncvConfig, Priority,
};

use crate::observers::MessageHandler;
use crate::status::SharedConfig;
use crate::storage::{Page, PageStore, StoreError, PAGE_WORDS};
use crate::tx_queue::{MessageSink, RESPONSE_PRIORITY};

/// Slot holding the module address
pub const ADDRESS_SLOT: u16 = 0;
/// Slot holding the device class marker
pub const MARKER_SLOT: u16 = 1;
/// Slot holding the arbitration priority
pub const PRIORITY_SLOT: u16 = 2;

/// Value returned for slots which cannot be read
const UNREADABLE: u16 = 0xFFFF;

/// Application callbacks for LNCV programming
///
/// Every method has a default, so an application only implements what it needs.
pub trait CvHooks {
    /// Programming mode was left
    fn programming_ended(&self) {}

    /// A value was stored
    fn written(&self, _lncv: u16, _value: u16) {}

    /// Decide whether an application slot may take `value`
    ///
    /// Not called for the reserved slots 0 to 2.
    fn write_allowed(&self, _lncv: u16, _value: u16) -> AckCode {
        AckCode::Ok
    }

    /// A programming sequence was opened, with the bytes following the sentinel
    fn sequence_start(&self, _data: &[u8]) {}

    /// A programming sequence was closed, with the bytes following the sentinel
    fn sequence_final(&self, _data: &[u8]) {}
}

/// Hooks which accept every write and ignore every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl CvHooks for NoHooks {}

/// Serves LNCV requests from a page store
pub struct LncvServer<'a, S: PageStore, H: CvHooks = NoHooks> {
    store: RefCell<S>,
    hooks: H,
    config: &'a SharedConfig,
    lncv: LncvConfig,
    programming: AtomicCell<bool>,
}

impl<S: PageStore, H: CvHooks> core::fmt::Debug for LncvServer<'_, S, H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LncvServer")
            .field("lncv", &self.lncv)
            .field("programming", &self.programming.load())
            .finish()
    }
}

fn split_slot(lncv: u16) -> (u16, usize) {
    (
        lncv / PAGE_WORDS as u16,
        (lncv % PAGE_WORDS as u16) as usize,
    )
}

impl<'a, S: PageStore, H: CvHooks> LncvServer<'a, S, H> {
    /// Create a server and load the stored address and priority into `config`
    ///
    /// Fails with [`StoreError::NotInitialized`] if the store has never been formatted.
    pub fn new(
        store: S,
        hooks: H,
        config: &'a SharedConfig,
        lncv: LncvConfig,
    ) -> Result<Self, StoreError> {
        store.check_initialized()?;
        let server = Self {
            store: RefCell::new(store),
            hooks,
            config,
            lncv,
            programming: AtomicCell::new(false),
        };
        let address = server.get(ADDRESS_SLOT);
        let priority = server.get(PRIORITY_SLOT);
        config.set_address(DeviceAddress::saturating(address));
        config.set_priority(Priority::saturating(priority.min(u8::MAX as u16) as u8));
        info!(
            "LNCV server started with address {} priority {}",
            address, priority
        );
        Ok(server)
    }

    /// True while programming mode is active
    pub fn is_programming(&self) -> bool {
        self.programming.load()
    }

    /// Access the underlying store
    pub fn with_store<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.store.borrow_mut())
    }

    fn read_page(&self, page: u16) -> Result<Page, StoreError> {
        let mut data = [0; PAGE_WORDS];
        self.store.borrow().read_page(page, &mut data)?;
        Ok(data)
    }

    /// Read an LNCV
    ///
    /// Returns 0xFFFF for slots which do not exist or cannot be read.
    pub fn get(&self, lncv: u16) -> u16 {
        if lncv >= self.lncv.cv_count {
            return UNREADABLE;
        }
        let (page, index) = split_slot(lncv);
        let data = match self.read_page(page) {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to read LNCV page {}: {}", page, e);
                return UNREADABLE;
            }
        };
        if page == 0 && data[MARKER_SLOT as usize] != self.lncv.device_class {
            match lncv {
                ADDRESS_SLOT => return self.lncv.initial_address,
                PRIORITY_SLOT => return self.lncv.initial_priority as u16,
                _ => (),
            }
        }
        data[index]
    }

    fn validate(&self, lncv: u16, value: u16) -> AckCode {
        match lncv {
            MARKER_SLOT => AckCode::ReadOnly,
            n if n >= self.lncv.cv_count => AckCode::OutOfRange,
            ADDRESS_SLOT if DeviceAddress::new(value).is_err() => AckCode::OutOfRange,
            PRIORITY_SLOT if !Priority::is_assignable(value) => AckCode::OutOfRange,
            ADDRESS_SLOT | PRIORITY_SLOT => AckCode::Ok,
            n => self.hooks.write_allowed(n, value),
        }
    }

    /// Write an LNCV, returning the status to report to the requester
    ///
    /// Writing slot 0 or 2 also updates the live node config.
    pub fn set(&self, lncv: u16, value: u16) -> AckCode {
        let code = self.validate(lncv, value);
        if code != AckCode::Ok {
            return code;
        }

        let (page, index) = split_slot(lncv);
        let mut data = match self.read_page(page) {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to read LNCV page {}: {}", page, e);
                return AckCode::ErrorGeneric;
            }
        };

        let migrated = lncv == ADDRESS_SLOT || lncv == PRIORITY_SLOT;
        let marker_absent = migrated && data[MARKER_SLOT as usize] != self.lncv.device_class;
        if data[index] == value && !marker_absent {
            return AckCode::Ok;
        }

        if marker_absent {
            data[MARKER_SLOT as usize] = self.lncv.device_class;
            if lncv == ADDRESS_SLOT {
                data[PRIORITY_SLOT as usize] = self.lncv.initial_priority as u16;
            } else {
                data[ADDRESS_SLOT as usize] = self.lncv.initial_address;
            }
        }
        data[index] = value;

        let result = {
            let mut store = self.store.borrow_mut();
            store.write_page(page, &data).and_then(|_| store.commit())
        };
        if let Err(e) = result {
            error!("Failed to store LNCV {}: {}", lncv, e);
            return AckCode::ErrorGeneric;
        }

        match lncv {
            ADDRESS_SLOT => self.config.set_address(DeviceAddress::saturating(value)),
            PRIORITY_SLOT => self.config.set_priority(Priority::saturating(value as u8)),
            _ => (),
        }
        self.hooks.written(lncv, value);
        AckCode::Ok
    }

    fn respond(&self, request: &CvMessage, tx: &dyn MessageSink) {
        let response = request.read_response(self.get(request.lncv_number));
        match response.to_message() {
            Ok(msg) => {
                // A full queue is already logged by the queue
                let _ = tx.enqueue(RESPONSE_PRIORITY, msg);
            }
            Err(e) => error!("Failed to build LNCV response: {}", e),
        }
    }

    fn handle_request(&self, opcode: u8, payload: &[u8], tx: &dyn MessageSink) {
        if payload.len() != CV_PAYLOAD_LEN || payload[0] != source::KPU {
            return;
        }
        let Ok(request) = CvMessage::from_payload(payload) else {
            return;
        };
        if request.device_class != self.lncv.device_class {
            return;
        }

        match request.request() {
            CvRequest::ProgrammingOn => {
                let address = self.config.address().raw();
                if request.lncv_number != ADDRESS_SLOT
                    || (request.lncv_value != 0xFFFF && request.lncv_value != address)
                {
                    return;
                }
                info!("Entering LNCV programming mode");
                self.programming.store(true);
                self.respond(&request, tx);
            }
            CvRequest::ProgrammingOff => {
                info!("Leaving LNCV programming mode");
                self.programming.store(false);
                self.hooks.programming_ended();
            }
            CvRequest::Write => {
                if !self.programming.load() {
                    debug!("Ignoring LNCV write outside programming mode");
                    return;
                }
                let (lncv, value) = (request.lncv_number, request.lncv_value);
                let code = self.set(lncv, value);
                info!("LNCV {} write of {} answered {}", lncv, value, code as u8);
                let _ = tx.long_ack(opcode, code);
            }
            CvRequest::Read => {
                if request.lncv_number >= self.lncv.cv_count {
                    let _ = tx.long_ack(opcode, AckCode::OutOfRange);
                } else {
                    self.respond(&request, tx);
                }
            }
        }
    }
}

impl<S: PageStore, H: CvHooks> MessageHandler for LncvServer<'_, S, H> {
    fn on_message(&self, opcode: u8, payload: &[u8], tx: &dyn MessageSink) {
        match opcode {
            OPC_PEER_XFER | OPC_IMM_PACKET => self.handle_request(opcode, payload, tx),
            OPC_WR_SL_DATA => {
                if let Some((&SEQUENCE_SENTINEL, rest)) = payload.split_first() {
                    self.hooks.sequence_start(rest);
                }
            }
            OPC_RD_SL_DATA => {
                if let Some((&SEQUENCE_SENTINEL, rest)) = payload.split_first() {
                    self.hooks.sequence_final(rest);
                }
            }
            // Other opcodes sharing an opcode number
            _ => (),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::NodeConfig;
    use crate::storage::MemoryPageStore;
    use crate::tx_queue::TxQueue;
    use loconet_common::constants::lncv::{destination, flags, request, DEVICE_CLASS};
    use loconet_common::messages::Message;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingHooks {
        events: RefCell<std::vec::Vec<std::string::String>>,
    }

    impl CvHooks for &RecordingHooks {
        fn programming_ended(&self) {
            self.events.borrow_mut().push("ended".into());
        }
        fn written(&self, lncv: u16, value: u16) {
            self.events.borrow_mut().push(format!("written {lncv}={value}"));
        }
        fn write_allowed(&self, lncv: u16, _value: u16) -> AckCode {
            if lncv == 7 {
                AckCode::InvalidValue
            } else {
                AckCode::Ok
            }
        }
        fn sequence_start(&self, data: &[u8]) {
            self.events.borrow_mut().push(format!("start {data:?}"));
        }
        fn sequence_final(&self, data: &[u8]) {
            self.events.borrow_mut().push(format!("final {data:?}"));
        }
    }

    fn kpu_request(request_id: u8, lncv_number: u16, lncv_value: u16, flags: u8) -> [u8; 12] {
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

    fn sent(tx: &TxQueue<8>) -> std::vec::Vec<Message> {
        let mut out = vec![];
        while tx.start_next() {
            while tx.next_tx_byte().is_some() {}
            out.extend(tx.release_completed());
        }
        out
    }

    fn response_value(msg: &Message) -> u16 {
        assert_eq!(OPC_PEER_XFER, msg.opcode());
        CvMessage::from_payload(msg.payload()).unwrap().lncv_value
    }

    #[test]
    fn test_factory_defaults() {
        let config = SharedConfig::new(NodeConfig::new());
        let server =
            LncvServer::new(MemoryPageStore::<1>::new(), NoHooks, &config, LncvConfig::new())
                .unwrap();
        assert_eq!(3, server.get(0));
        assert_eq!(0xFFFF, server.get(1));
        assert_eq!(5, server.get(2));
        assert_eq!(0xFFFF, server.get(3));
        assert_eq!(0xFFFF, server.get(30));
        assert_eq!(3, config.address().raw());
        assert_eq!(5, config.priority().raw());
    }

    #[test]
    fn test_stored_values_loaded_at_startup() {
        let mut store = MemoryPageStore::<1>::new();
        let mut page = [0xFFFF; PAGE_WORDS];
        page[0] = 17;
        page[1] = DEVICE_CLASS;
        page[2] = 9;
        store.write_page(0, &page).unwrap();
        store.commit().unwrap();

        let config = SharedConfig::new(NodeConfig::new());
        LncvServer::new(store, NoHooks, &config, LncvConfig::new()).unwrap();
        assert_eq!(17, config.address().raw());
        assert_eq!(9, config.priority().raw());
    }

    #[test]
    fn test_unformatted_store_is_fatal() {
        let config = SharedConfig::new(NodeConfig::new());
        let result = LncvServer::new(
            MemoryPageStore::<1>::unformatted(),
            NoHooks,
            &config,
            LncvConfig::new(),
        );
        assert_eq!(Some(StoreError::NotInitialized), result.err());
    }

    #[test]
    fn test_set_rules() {
        let hooks = RecordingHooks::default();
        let config = SharedConfig::new(NodeConfig::new());
        let server =
            LncvServer::new(MemoryPageStore::<1>::new(), &hooks, &config, LncvConfig::new())
                .unwrap();

        assert_eq!(AckCode::ReadOnly, server.set(1, 5));
        assert_eq!(AckCode::OutOfRange, server.set(30, 5));
        assert_eq!(AckCode::OutOfRange, server.set(0, 0x3FF));
        assert_eq!(AckCode::OutOfRange, server.set(2, 0));
        assert_eq!(AckCode::OutOfRange, server.set(2, 0x10));
        assert_eq!(AckCode::InvalidValue, server.set(7, 1));
        assert!(hooks.events.borrow().is_empty());

        assert_eq!(AckCode::Ok, server.set(0, 0x3FE));
        assert_eq!(0x3FE, server.get(0));
        assert_eq!(DEVICE_CLASS, server.get(1));
        assert_eq!(5, server.get(2));
        assert_eq!(0x3FE, config.address().raw());

        assert_eq!(AckCode::Ok, server.set(2, 15));
        assert_eq!(15, config.priority().raw());
        assert_eq!(AckCode::Ok, server.set(12, 1234));
        assert_eq!(1234, server.get(12));
        assert_eq!(
            vec!["written 0=1022", "written 2=15", "written 12=1234"],
            *hooks.events.borrow()
        );

        // Unchanged value is not rewritten
        let commits = server.with_store(|s| s.commit_count());
        assert_eq!(AckCode::Ok, server.set(12, 1234));
        assert_eq!(commits, server.with_store(|s| s.commit_count()));
    }

    #[test]
    fn test_writing_default_address_stamps_marker() {
        let config = SharedConfig::new(NodeConfig::new());
        let server =
            LncvServer::new(MemoryPageStore::<1>::new(), NoHooks, &config, LncvConfig::new())
                .unwrap();
        assert_eq!(AckCode::Ok, server.set(0, 3));
        assert_eq!(1, server.with_store(|s| s.commit_count()));
        let page = server.with_store(|s| *s.page(0).unwrap());
        assert_eq!([3, DEVICE_CLASS, 5], page[..3]);
    }

    #[test]
    fn test_programming_session() {
        let hooks = RecordingHooks::default();
        let config = SharedConfig::new(NodeConfig::new());
        let server =
            LncvServer::new(MemoryPageStore::<1>::new(), &hooks, &config, LncvConfig::new())
                .unwrap();
        let tx = TxQueue::<8>::new();

        // Writes outside programming mode are ignored without a response
        server.on_message(OPC_PEER_XFER, &kpu_request(request::CFG_WRITE, 5, 77, 0), &tx);
        assert!(sent(&tx).is_empty());
        assert_eq!(0xFFFF, server.get(5));

        // Programming on for a different address is not for us
        server.on_message(OPC_PEER_XFER, &kpu_request(request::CFG_READ, 0, 99, flags::PROG_ON), &tx);
        assert!(!server.is_programming());
        assert!(sent(&tx).is_empty());

        server.on_message(OPC_PEER_XFER, &kpu_request(request::CFG_READ, 0, 0xFFFF, flags::PROG_ON), &tx);
        assert!(server.is_programming());
        let responses = sent(&tx);
        assert_eq!(1, responses.len());
        assert_eq!(3, response_value(&responses[0]));

        server.on_message(OPC_IMM_PACKET, &kpu_request(request::CFG_WRITE, 5, 300, 0), &tx);
        let responses = sent(&tx);
        assert_eq!(
            Message::long_ack(OPC_IMM_PACKET, AckCode::Ok.into()),
            responses[0]
        );

        server.on_message(OPC_PEER_XFER, &kpu_request(request::CFG_REQUEST, 5, 0, 0), &tx);
        assert_eq!(300, response_value(&sent(&tx)[0]));

        server.on_message(OPC_PEER_XFER, &kpu_request(request::CFG_WRITE, 1, 0, 0), &tx);
        assert_eq!(
            Message::long_ack(OPC_PEER_XFER, AckCode::ReadOnly.into()),
            sent(&tx)[0]
        );

        server.on_message(OPC_PEER_XFER, &kpu_request(request::CFG_READ, 0, 0, flags::PROG_OFF), &tx);
        assert!(!server.is_programming());
        assert!(sent(&tx).is_empty());
        assert_eq!(vec!["written 5=300", "ended"], *hooks.events.borrow());
    }

    #[test]
    fn test_read_out_of_range() {
        let config = SharedConfig::new(NodeConfig::new());
        let server =
            LncvServer::new(MemoryPageStore::<1>::new(), NoHooks, &config, LncvConfig::new())
                .unwrap();
        let tx = TxQueue::<8>::new();
        server.on_message(OPC_PEER_XFER, &kpu_request(request::CFG_READ, 31, 0, 0), &tx);
        assert_eq!(
            Message::long_ack(OPC_PEER_XFER, AckCode::OutOfRange.into()),
            sent(&tx)[0]
        );
    }

    #[test]
    fn test_requests_for_others_ignored() {
        let config = SharedConfig::new(NodeConfig::new());
        let server =
            LncvServer::new(MemoryPageStore::<1>::new(), NoHooks, &config, LncvConfig::new())
                .unwrap();
        let tx = TxQueue::<8>::new();

        let mut other_class = CvMessage::from_payload(&kpu_request(request::CFG_READ, 0, 0, 0)).unwrap();
        other_class.device_class = 0x1234;
        server.on_message(OPC_PEER_XFER, &other_class.to_payload(), &tx);

        let mut other_source = kpu_request(request::CFG_READ, 0, 0, 0);
        other_source[0] = source::IBSWITCH;
        server.on_message(OPC_PEER_XFER, &other_source, &tx);

        server.on_message(OPC_PEER_XFER, &kpu_request(request::CFG_READ, 0, 0, 0)[..11], &tx);
        // 0xA5 shares an opcode number with PEER_XFER
        server.on_message(0xA5, &kpu_request(request::CFG_READ, 0, 0, 0), &tx);
        assert!(sent(&tx).is_empty());
    }

    #[test]
    fn test_sequence_hooks() {
        let hooks = RecordingHooks::default();
        let config = SharedConfig::new(NodeConfig::new());
        let server =
            LncvServer::new(MemoryPageStore::<1>::new(), &hooks, &config, LncvConfig::new())
                .unwrap();
        let tx = TxQueue::<8>::new();
        server.on_message(OPC_WR_SL_DATA, &[SEQUENCE_SENTINEL, 1, 2], &tx);
        server.on_message(OPC_WR_SL_DATA, &[0x00, 1, 2], &tx);
        server.on_message(OPC_RD_SL_DATA, &[SEQUENCE_SENTINEL], &tx);
        server.on_message(OPC_RD_SL_DATA, &[], &tx);
        assert_eq!(vec!["start [1, 2]", "final []"], *hooks.events.borrow());
    }
}
