#![forbid(unsafe_code)]

use std::{cell::RefCell, net::SocketAddr, rc::Rc};

use rpc3::{
    NetworkId, NetworkIdManager, NetworkObject, ObjectDirectory, ReceiveResult, RemoteError,
    RemoteErrorCode, Rpc, SlotFlow, SystemAddress, Transport,
    loopback::{LoopbackNetwork, LoopbackTransport},
};

struct Peer {
    rpc: Rpc,
    transport: Rc<LoopbackTransport>,
}

fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

fn join(network: &LoopbackNetwork, port: u16) -> Peer {
    let transport = network.join(addr(port));
    Peer {
        rpc: Rpc::new(transport.clone()),
        transport,
    }
}

fn pair() -> (Peer, Peer) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let network = LoopbackNetwork::new();
    let a = join(&network, 1000);
    let b = join(&network, 2000);
    network.connect(addr(1000), addr(2000));
    (a, b)
}

fn pump(peer: &Peer) -> Vec<RemoteError> {
    let mut errors = vec![];
    while let Some(packet) = peer.transport.receive() {
        if peer.rpc.on_receive(&packet) == ReceiveResult::Continue {
            errors.extend(RemoteError::parse(&packet.data));
        }
    }
    errors
}

type Log = Rc<RefCell<Vec<String>>>;

fn logger(log: &Log, name: &str) -> impl Fn(u32) + 'static {
    let log = log.clone();
    let name = name.to_string();
    move |value| log.borrow_mut().push(format!("{name}{value}"))
}

#[test]
fn test_slot_order() {
    let (a, b) = pair();
    let log = Log::default();
    b.rpc.register_slot("evt", logger(&log, "A"), 0);
    b.rpc.register_slot("evt", logger(&log, "B"), 10);
    b.rpc.register_slot("evt", logger(&log, "C"), 0);
    b.rpc.register_slot("evt", logger(&log, "D"), -3);
    assert_eq!(b.rpc.slot_count("evt"), 4);

    assert!(a.rpc.signal("evt", (1u32,)));
    assert!(pump(&b).is_empty());
    assert_eq!(*log.borrow(), ["B1", "A1", "C1", "D1"]);
}

#[test]
fn test_interrupt_signal() {
    let (a, b) = pair();
    let log = Log::default();
    b.rpc.register_slot("evt", logger(&log, "first"), 4);
    let inner = log.clone();
    b.rpc.register_slot(
        "evt",
        move |value: u32, rpc: Rpc| {
            inner.borrow_mut().push(format!("second{value}"));
            rpc.interrupt_signal();
        },
        3,
    );
    b.rpc.register_slot("evt", logger(&log, "third"), 2);
    b.rpc.register_slot("evt", logger(&log, "fourth"), 1);

    a.rpc.signal("evt", (5u32,));
    pump(&b);
    assert_eq!(*log.borrow(), ["first5", "second5"]);

    // the interrupt does not leak into the next dispatch
    log.borrow_mut().clear();
    a.rpc.signal("evt", (6u32,));
    pump(&b);
    assert_eq!(*log.borrow(), ["first6", "second6"]);
}

#[test]
fn test_stop_dispatch_return() {
    let (a, b) = pair();
    let log = Log::default();
    b.rpc.register_slot("evt", logger(&log, "first"), 1);
    let inner = log.clone();
    b.rpc.register_slot(
        "evt",
        move |value: u32| {
            inner.borrow_mut().push(format!("second{value}"));
            if value > 1 {
                SlotFlow::StopDispatch
            } else {
                SlotFlow::Continue
            }
        },
        1,
    );
    b.rpc.register_slot("evt", logger(&log, "third"), 1);

    a.rpc.signal("evt", (1u32,));
    a.rpc.signal("evt", (2u32,));
    pump(&b);
    assert_eq!(
        *log.borrow(),
        ["first1", "second1", "third1", "first2", "second2"]
    );
}

#[test]
fn test_signal_without_listeners() {
    let (a, b) = pair();
    assert!(a.rpc.signal("nobody", ()));
    pump(&b);
    assert_eq!(
        pump(&a),
        vec![RemoteError::new(RemoteErrorCode::FunctionNotRegistered, "nobody")]
    );
}

#[test]
fn test_local_slots_run_first() {
    let (a, b) = pair();
    let log = Log::default();
    let local = log.clone();
    a.rpc.register_slot(
        "evt",
        move |value: u32, rpc: Rpc| {
            assert_eq!(rpc.last_sender_address(), SystemAddress::UNASSIGNED);
            assert_eq!(rpc.current_execution(), "evt");
            local.borrow_mut().push(format!("local{value}"));
        },
        0,
    );
    b.rpc.register_slot("evt", logger(&log, "remote"), 0);

    // a has heard from b, so there is a sender to restore afterwards
    a.rpc.register_function("noop", || {});
    b.rpc.call("noop", ());
    pump(&a);
    assert_eq!(a.rpc.last_sender_address(), b.transport.local_address());

    assert!(a.rpc.signal("evt", (8u32,)));
    assert_eq!(*log.borrow(), ["local8"]);
    assert_eq!(a.rpc.last_sender_address(), b.transport.local_address());

    pump(&b);
    assert_eq!(*log.borrow(), ["local8", "remote8"]);
}

struct Listener {
    id: NetworkId,
    heard: Vec<u32>,
}

impl NetworkObject for Listener {
    fn network_id(&self) -> NetworkId {
        self.id
    }
}

#[test]
fn test_bound_slots_and_pruning() {
    let (a, b) = pair();
    let manager = Rc::new(NetworkIdManager::new());
    let directory: Rc<dyn ObjectDirectory> = manager.clone();
    b.rpc.set_directory(Some(directory));

    let kept = Rc::new(RefCell::new(Listener {
        id: NetworkId(1),
        heard: vec![],
    }));
    let gone = Rc::new(RefCell::new(Listener {
        id: NetworkId(2),
        heard: vec![],
    }));
    manager.register(&kept);
    manager.register(&gone);

    let hear = |listener: &mut Listener, value: u32| listener.heard.push(value);
    b.rpc
        .register_slot_method::<Listener, _, _>("evt", NetworkId(1), hear, 0);
    b.rpc
        .register_slot_method::<Listener, _, _>("evt", NetworkId(2), hear, 1);
    assert_eq!(b.rpc.slot_count("evt"), 2);

    a.rpc.signal("evt", (1u32,));
    pump(&b);
    assert_eq!(kept.borrow().heard, [1]);
    assert_eq!(gone.borrow().heard, [1]);

    drop(gone);
    a.rpc.signal("evt", (2u32,));
    pump(&b);
    assert_eq!(kept.borrow().heard, [1, 2]);
    assert_eq!(b.rpc.slot_count("evt"), 1);
    assert!(pump(&a).is_empty());
}

#[test]
fn test_reentrant_registration() {
    let (a, b) = pair();
    let log = Log::default();
    let inner = log.clone();
    let late = logger(&log, "late");
    let late = Rc::new(late);
    b.rpc.register_slot(
        "evt",
        move |value: u32, rpc: Rpc| {
            inner.borrow_mut().push(format!("early{value}"));
            let late = late.clone();
            rpc.register_slot("evt", move |v: u32| late(v), -1);
        },
        0,
    );

    a.rpc.signal("evt", (1u32,));
    pump(&b);
    assert_eq!(*log.borrow(), ["early1"]);
    assert_eq!(b.rpc.slot_count("evt"), 2);

    a.rpc.signal("evt", (2u32,));
    pump(&b);
    assert_eq!(*log.borrow(), ["early1", "early2", "late2"]);
}
