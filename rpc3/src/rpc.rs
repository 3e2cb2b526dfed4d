use std::{cell::RefCell, rc::Rc};

use crate::{
    NetworkId,
    codec::Policy,
    context::{IncomingContext, OutgoingConfig},
    directory::ObjectDirectory,
    handler::{Function, Invoker, Method},
    registry::{FunctionEntry, FunctionRegistry, SlotRegistry},
    transport::{SendParams, SystemAddress, Transport},
};

pub(crate) struct State {
    pub transport: Rc<dyn Transport>,
    pub directory: Option<Rc<dyn ObjectDirectory>>,
    pub functions: FunctionRegistry,
    pub slots: SlotRegistry,
    pub outgoing: OutgoingConfig,
    pub incoming: IncomingContext,
    pub interrupt: bool,
}

/// An RPC endpoint: registries, outgoing defaults and the last inbound
/// context, bound to one transport.
///
/// `Rpc` is a cheap handle; clones share state. Handlers may use the handle
/// they receive to register, call, signal or interrupt while they run.
#[derive(Clone)]
pub struct Rpc {
    pub(crate) state: Rc<RefCell<State>>,
}

impl Rpc {
    #[must_use]
    pub fn new(transport: Rc<dyn Transport>) -> Self {
        Self::with_config(transport, OutgoingConfig::default())
    }

    #[must_use]
    pub fn with_config(transport: Rc<dyn Transport>, outgoing: OutgoingConfig) -> Self {
        Self {
            state: Rc::new(RefCell::new(State {
                transport,
                directory: None,
                functions: FunctionRegistry::default(),
                slots: SlotRegistry::default(),
                outgoing,
                incoming: IncomingContext::default(),
                interrupt: false,
            })),
        }
    }

    /// Sets the directory used to resolve object ids; `None` removes it.
    pub fn set_directory(&self, directory: Option<Rc<dyn ObjectDirectory>>) {
        self.state.borrow_mut().directory = directory;
    }

    #[must_use]
    pub fn directory(&self) -> Option<Rc<dyn ObjectDirectory>> {
        self.state.borrow().directory.clone()
    }

    /// Registers a free function. Returns `false` if `identifier` is taken.
    pub fn register_function<Args: 'static, H: Function<Args>>(
        &self,
        identifier: &str,
        handler: H,
    ) -> bool {
        let entry = FunctionEntry {
            arity: H::ARITY,
            signature: H::signature(),
            invoker: Invoker::free(handler),
        };
        self.state.borrow_mut().functions.register(identifier, entry)
    }

    /// Registers a method of `C`, called on the object named by the caller.
    /// The arity excludes the object itself.
    pub fn register_method<C: 'static, Args: 'static, H: Method<C, Args>>(
        &self,
        identifier: &str,
        handler: H,
    ) -> bool {
        let entry = FunctionEntry {
            arity: H::ARITY,
            signature: H::signature(),
            invoker: Invoker::bound::<C, Args, H>(handler),
        };
        self.state.borrow_mut().functions.register(identifier, entry)
    }

    /// Always returns `false`: registered functions stay registered.
    pub fn unregister_function(&self, identifier: &str) -> bool {
        self.state.borrow_mut().functions.unregister(identifier)
    }

    pub fn register_slot<Args: 'static, H: Function<Args>>(
        &self,
        identifier: &str,
        handler: H,
        priority: i32,
    ) {
        self.state
            .borrow_mut()
            .slots
            .register(identifier, None, priority, Invoker::free(handler));
    }

    /// Registers a slot bound to `object`. The slot is dropped the first time
    /// a signal finds the object gone from the directory.
    pub fn register_slot_method<C: 'static, Args: 'static, H: Method<C, Args>>(
        &self,
        identifier: &str,
        object: NetworkId,
        handler: H,
        priority: i32,
    ) {
        self.state.borrow_mut().slots.register(
            identifier,
            Some(object),
            priority,
            Invoker::bound::<C, Args, H>(handler),
        );
    }

    #[must_use]
    pub fn is_function_registered(&self, identifier: &str) -> bool {
        self.state.borrow().functions.contains(identifier)
    }

    /// How each parameter of a registered function travels, in order.
    #[must_use]
    pub fn function_signature(&self, identifier: &str) -> Option<Vec<Policy>> {
        let state = self.state.borrow();
        Some(state.functions.get(identifier)?.signature.clone())
    }

    /// Identifiers of every registered function, sorted.
    #[must_use]
    pub fn registered_functions(&self) -> Vec<String> {
        let mut identifiers: Vec<_> = self
            .state
            .borrow()
            .functions
            .identifiers()
            .cloned()
            .collect();
        identifiers.sort_unstable();
        identifiers
    }

    #[must_use]
    pub fn is_slot_registered(&self, identifier: &str) -> bool {
        self.state.borrow().slots.contains(identifier)
    }

    #[must_use]
    pub fn slot_count(&self, identifier: &str) -> usize {
        self.state.borrow().slots.len(identifier)
    }

    pub fn set_timestamp(&self, timestamp: u64) {
        self.state.borrow_mut().outgoing.timestamp = timestamp;
    }

    pub fn set_send_params(&self, params: SendParams) {
        let mut state = self.state.borrow_mut();
        state.outgoing.priority = params.priority;
        state.outgoing.reliability = params.reliability;
        state.outgoing.ordering_channel = params.ordering_channel;
    }

    /// With `broadcast`, `address` is the one peer to skip; otherwise it is
    /// the only recipient.
    pub fn set_recipient_address(&self, address: SystemAddress, broadcast: bool) {
        let mut state = self.state.borrow_mut();
        state.outgoing.recipient = address;
        state.outgoing.broadcast = broadcast;
    }

    pub fn set_recipient_object(&self, object: NetworkId) {
        self.state.borrow_mut().outgoing.recipient_object = object;
    }

    #[must_use]
    pub fn outgoing_config(&self) -> OutgoingConfig {
        self.state.borrow().outgoing.clone()
    }

    pub fn set_outgoing_config(&self, config: OutgoingConfig) {
        self.state.borrow_mut().outgoing = config;
    }

    #[must_use]
    pub fn last_sender_address(&self) -> SystemAddress {
        self.state.borrow().incoming.last_sender
    }

    #[must_use]
    pub fn last_sender_timestamp(&self) -> u64 {
        self.state.borrow().incoming.last_timestamp
    }

    /// Identifier being dispatched right now, empty outside a dispatch.
    #[must_use]
    pub fn current_execution(&self) -> String {
        self.state.borrow().incoming.current_execution.clone()
    }

    #[must_use]
    pub fn transport(&self) -> Rc<dyn Transport> {
        self.state.borrow().transport.clone()
    }

    /// Stops the signal dispatch that is running the calling slot after the
    /// slot returns.
    pub fn interrupt_signal(&self) {
        self.state.borrow_mut().interrupt = true;
    }
}

impl std::fmt::Debug for Rpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.state.try_borrow() {
            Ok(state) => f
                .debug_struct("Rpc")
                .field("functions", &state.functions)
                .field("slots", &state.slots)
                .field("outgoing", &state.outgoing)
                .field("incoming", &state.incoming)
                .finish_non_exhaustive(),
            Err(_) => f.write_str("Rpc { <borrowed> }"),
        }
    }
}
