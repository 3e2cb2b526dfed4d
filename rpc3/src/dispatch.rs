use crate::{
    BitStream, Rpc, SystemAddress,
    codec::ParamReader,
    directory::ObjectHandle,
    error::{ErrorKind, Result},
    handler::{Invoker, SlotFlow},
    msg::{CallBody, Envelope, MessageId, Preamble, RemoteError, RemoteErrorCode},
    transport::{Packet, PacketPriority, PacketReliability, ReceiveResult, SendParams},
};

const ERROR_SEND_PARAMS: SendParams = SendParams {
    priority: PacketPriority::High,
    reliability: PacketReliability::ReliableOrdered,
    ordering_channel: 0,
};

impl Rpc {
    /// Feeds one inbound packet to the endpoint.
    ///
    /// Call and signal frames are validated and dispatched; failures are
    /// reported to the sender as [`RemoteError`] frames. Anything that is not
    /// a call or signal, remote errors included, is left for the caller.
    pub fn on_receive(&self, packet: &Packet) -> ReceiveResult {
        if packet.data.is_empty() {
            return ReceiveResult::Continue;
        }
        let envelope = match Envelope::parse(&packet.data) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::debug!("dropping frame from {}: {err}", packet.sender);
                return ReceiveResult::Consumed;
            }
        };
        if envelope.message_id != MessageId::RPC {
            return ReceiveResult::Continue;
        }

        {
            let mut state = self.state.borrow_mut();
            state.incoming.last_timestamp = envelope.timestamp;
            state.incoming.last_sender = packet.sender;
        }
        if let Err(err) = self.handle_call(packet.sender, &envelope.body) {
            tracing::warn!("malformed rpc frame from {}: {err}", packet.sender);
        }
        ReceiveResult::Consumed
    }

    fn handle_call(&self, sender: SystemAddress, body: &[u8]) -> Result<()> {
        let mut s = BitStream::from_bytes(body);
        let preamble = Preamble::read(&mut s)?;

        let target = match preamble.object {
            None => None,
            Some(id) => {
                let Some(directory) = self.directory() else {
                    self.send_error(sender, RemoteErrorCode::NetworkIdManagerUnavailable, "");
                    return Ok(());
                };
                let Some(handle) = directory.resolve(id) else {
                    self.send_error(sender, RemoteErrorCode::ObjectDoesNotExist, "");
                    return Ok(());
                };
                Some(handle)
            }
        };

        let CallBody {
            is_call,
            identifier,
            mut parameters,
        } = CallBody::read(&mut s)?;
        if is_call {
            self.invoke_function(
                sender,
                &identifier,
                preamble.parameter_count,
                target,
                &mut parameters,
            );
        } else if self.is_slot_registered(&identifier) {
            self.invoke_signal(&identifier, &mut parameters);
        } else {
            self.send_error(sender, RemoteErrorCode::FunctionNotRegistered, &identifier);
        }
        Ok(())
    }

    fn invoke_function(
        &self,
        sender: SystemAddress,
        identifier: &str,
        parameter_count: u8,
        target: Option<ObjectHandle>,
        parameters: &mut BitStream,
    ) {
        let entry = self.state.borrow().functions.get(identifier).cloned();
        let Some(entry) = entry else {
            self.send_error(sender, RemoteErrorCode::FunctionNotRegistered, identifier);
            return;
        };

        let mut reader = ParamReader::new(parameters)
            .with_directory(self.directory())
            .with_caller(self.clone());
        let outcome = match (&entry.invoker, target) {
            (Invoker::Bound(_), None) => Err(RemoteErrorCode::CallingCppAsC),
            (Invoker::Free(_), Some(_)) => Err(RemoteErrorCode::CallingCAsCpp),
            _ if entry.arity != usize::from(parameter_count) => {
                Err(RemoteErrorCode::IncorrectNumberOfParameters)
            }
            (Invoker::Free(f), None) => Ok(self.with_execution(identifier, || f(&mut reader))),
            (Invoker::Bound(f), Some(object)) => {
                Ok(self.with_execution(identifier, || f(&object, &mut reader)))
            }
        };

        match outcome {
            Err(code) => self.send_error(sender, code, identifier),
            Ok(Ok(_)) => {}
            Ok(Err(err)) if err.kind == ErrorKind::ObjectTypeMismatch => {
                self.send_error(sender, RemoteErrorCode::ObjectDoesNotExist, identifier);
            }
            Ok(Err(err)) => tracing::warn!("{identifier:?} from {sender} failed: {err}"),
        }
    }

    /// Runs every slot of `identifier` in group order over `parameters`.
    ///
    /// Bound slots whose object no longer resolves are removed from the live
    /// group. Dispatch stops early when a slot returns
    /// [`SlotFlow::StopDispatch`] or calls [`Rpc::interrupt_signal`].
    pub(crate) fn invoke_signal(&self, identifier: &str, parameters: &mut BitStream) {
        let Some(group) = self.state.borrow().slots.snapshot(identifier) else {
            return;
        };
        let directory = self.directory();
        let outer_interrupt = std::mem::replace(&mut self.state.borrow_mut().interrupt, false);

        self.with_execution(identifier, || {
            for slot in group.entries() {
                parameters.reset_read_pointer();
                let mut reader = ParamReader::new(parameters)
                    .with_directory(directory.clone())
                    .with_caller(self.clone());
                let result = match (slot.target, &slot.invoker) {
                    (None, Invoker::Free(f)) => f(&mut reader),
                    (Some(id), Invoker::Bound(f)) => {
                        let Some(object) = directory.as_ref().and_then(|d| d.resolve(id)) else {
                            tracing::debug!("pruning slot of {identifier:?}: object {id} is gone");
                            self.state
                                .borrow_mut()
                                .slots
                                .prune(identifier, slot.sequence);
                            continue;
                        };
                        f(&object, &mut reader)
                    }
                    _ => {
                        tracing::warn!("skipping inconsistent slot of {identifier:?}");
                        continue;
                    }
                };

                let flow = result.unwrap_or_else(|err| {
                    tracing::warn!("slot of {identifier:?} failed: {err}");
                    SlotFlow::Continue
                });
                let interrupted = std::mem::take(&mut self.state.borrow_mut().interrupt);
                if flow == SlotFlow::StopDispatch || interrupted {
                    break;
                }
            }
        });

        self.state.borrow_mut().interrupt = outer_interrupt;
    }

    /// Runs local slots with the incoming sender cleared, as for a signal
    /// this endpoint sent itself.
    pub(crate) fn invoke_local_slots(&self, identifier: &str, parameters: &mut BitStream) {
        if !self.is_slot_registered(identifier) {
            return;
        }
        let last_sender = std::mem::replace(
            &mut self.state.borrow_mut().incoming.last_sender,
            SystemAddress::UNASSIGNED,
        );
        self.invoke_signal(identifier, parameters);
        self.state.borrow_mut().incoming.last_sender = last_sender;
    }

    fn with_execution<T>(&self, identifier: &str, f: impl FnOnce() -> T) -> T {
        let previous = std::mem::replace(
            &mut self.state.borrow_mut().incoming.current_execution,
            identifier.to_string(),
        );
        let out = f();
        self.state.borrow_mut().incoming.current_execution = previous;
        out
    }

    fn send_error(&self, target: SystemAddress, code: RemoteErrorCode, identifier: &str) {
        tracing::debug!("reporting {code:?} for {identifier:?} to {target}");
        let frame = RemoteError::new(code, identifier).to_bytes();
        self.transport().send(frame, &ERROR_SEND_PARAMS, target);
    }
}
