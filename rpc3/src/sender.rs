use crate::{
    BitStream, NetworkId, Rpc, SystemAddress,
    codec::ParamWriter,
    context::OutgoingConfig,
    handler::Arguments,
    msg::{CallFrame, MAX_IDENTIFIER_LEN},
    tags::RefTags,
};

impl Rpc {
    /// Calls `identifier` on the configured recipient(s) with the current
    /// outgoing defaults. Returns `false` if nothing could be sent.
    pub fn call<A: Arguments>(&self, identifier: &str, args: A) -> bool {
        self.call_tagged(identifier, RefTags::new(), args)
    }

    /// Like [`Rpc::call`], with dereference/array intent for pointer
    /// arguments.
    ///
    /// # Panics
    ///
    /// Panics if a tag in `tags` does not belong to any argument.
    pub fn call_tagged<A: Arguments>(&self, identifier: &str, tags: RefTags, args: A) -> bool {
        self.encode_and_send(identifier, tags, &args, true)
    }

    /// Stores `config` as the new outgoing defaults, then calls.
    pub fn call_explicit<A: Arguments>(
        &self,
        identifier: &str,
        config: &OutgoingConfig,
        args: A,
    ) -> bool {
        self.set_outgoing_config(config.clone());
        self.call(identifier, args)
    }

    /// Calls a free function: clears the recipient object first.
    pub fn call_free<A: Arguments>(&self, identifier: &str, args: A) -> bool {
        self.set_recipient_object(NetworkId::UNASSIGNED);
        self.call(identifier, args)
    }

    /// Calls a method on `object`, which stays the recipient object.
    pub fn call_object<A: Arguments>(&self, identifier: &str, object: NetworkId, args: A) -> bool {
        self.set_recipient_object(object);
        self.call(identifier, args)
    }

    /// Runs every local slot for `identifier`, then sends the signal to the
    /// configured recipient(s).
    pub fn signal<A: Arguments>(&self, identifier: &str, args: A) -> bool {
        self.signal_tagged(identifier, RefTags::new(), args)
    }

    /// # Panics
    ///
    /// Panics if a tag in `tags` does not belong to any argument.
    pub fn signal_tagged<A: Arguments>(&self, identifier: &str, tags: RefTags, args: A) -> bool {
        self.encode_and_send(identifier, tags, &args, false)
    }

    /// Stores everything in `config` except the recipient object, then
    /// signals.
    pub fn signal_explicit<A: Arguments>(
        &self,
        identifier: &str,
        config: &OutgoingConfig,
        args: A,
    ) -> bool {
        let recipient_object = self.outgoing_config().recipient_object;
        self.set_outgoing_config(OutgoingConfig {
            recipient_object,
            ..config.clone()
        });
        self.signal(identifier, args)
    }

    fn encode_and_send<A: Arguments>(
        &self,
        identifier: &str,
        mut tags: RefTags,
        args: &A,
        is_call: bool,
    ) -> bool {
        let Ok(parameter_count) = u8::try_from(A::COUNT) else {
            tracing::warn!("{identifier:?}: too many parameters ({})", A::COUNT);
            return false;
        };
        let mut parameters = BitStream::new();
        if let Err(err) = args.encode_all(&mut ParamWriter::new(&mut parameters, &mut tags)) {
            tracing::warn!("{identifier:?}: failed to encode parameters: {err}");
            return false;
        }
        tags.assert_consumed();

        if !is_call {
            self.invoke_local_slots(identifier, &mut parameters);
        }
        self.send_call_or_signal(identifier, parameter_count, &parameters, is_call)
    }

    /// Frames already-encoded parameters and hands them to the transport.
    ///
    /// Broadcasts go to every connected peer except the configured recipient
    /// and this endpoint itself; an empty peer list still counts as success.
    /// Otherwise the frame goes to the configured recipient only, and the
    /// call fails when there is none. The recipient object is sent for calls
    /// only.
    pub fn send_call_or_signal(
        &self,
        identifier: &str,
        parameter_count: u8,
        parameters: &BitStream,
        is_call: bool,
    ) -> bool {
        if identifier.is_empty() {
            tracing::warn!("refusing to send with an empty identifier");
            return false;
        }
        if identifier.len() > MAX_IDENTIFIER_LEN {
            tracing::warn!("identifier of {} bytes is too long", identifier.len());
            return false;
        }

        let (config, transport) = {
            let state = self.state.borrow();
            (state.outgoing.clone(), state.transport.clone())
        };
        let object = (is_call && config.recipient_object.is_assigned())
            .then_some(config.recipient_object);
        let frame = match (CallFrame {
            timestamp: config.timestamp,
            parameter_count,
            object,
            is_call,
            identifier,
            parameters,
        })
        .encode()
        {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!("{identifier:?}: failed to build frame: {err}");
                return false;
            }
        };
        let params = config.send_params();

        if config.broadcast {
            let local = transport.local_address();
            for peer in transport.connected_peers() {
                if peer.is_assigned() && peer != config.recipient && peer != local {
                    transport.send(frame.clone(), &params, peer);
                }
            }
            true
        } else if config.recipient != SystemAddress::UNASSIGNED {
            transport.send(frame, &params, config.recipient);
            true
        } else {
            tracing::warn!("{identifier:?}: no recipient address and broadcast is off");
            false
        }
    }
}
