use std::{cell::RefCell, rc::Rc};

use crate::{
    BitStream, NetworkId,
    codec::{ParamReader, ParamWriter, Parameter, Policy, check_count},
    directory::NetworkObject,
    error::{Error, ErrorKind, Result},
    tags::Tagged,
};

/// One element of a [`NetRef`]: the id on the wire and, when resolvable
/// locally, the object itself.
pub struct RefEntry<T> {
    pub id: NetworkId,
    pub object: Option<Rc<RefCell<T>>>,
}

impl<T> Clone for RefEntry<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            object: self.object.clone(),
        }
    }
}

/// Reference to directory objects, sent by network id.
///
/// Tag it with [`crate::RefTags::deref`] to ship the object's contents as
/// well; the receiver decodes them into its own copy of the object, or skips
/// them when it has none.
pub struct NetRef<T> {
    entries: Option<Vec<RefEntry<T>>>,
}

impl<T: NetworkObject> NetRef<T> {
    #[must_use]
    pub fn null() -> Self {
        Self { entries: None }
    }

    #[must_use]
    pub fn new(object: &Rc<RefCell<T>>) -> Self {
        Self::many(std::slice::from_ref(object))
    }

    #[must_use]
    pub fn many(objects: &[Rc<RefCell<T>>]) -> Self {
        let entries = objects
            .iter()
            .map(|object| RefEntry {
                id: object.borrow().network_id(),
                object: Some(object.clone()),
            })
            .collect();
        Self {
            entries: Some(entries),
        }
    }

    /// A reference to an object that is not available locally.
    #[must_use]
    pub fn from_id(id: NetworkId) -> Self {
        Self {
            entries: Some(vec![RefEntry { id, object: None }]),
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.entries.is_none()
    }

    #[must_use]
    pub fn id(&self) -> Option<NetworkId> {
        Some(self.entries.as_ref()?.first()?.id)
    }

    /// The first referenced object, if it resolved.
    #[must_use]
    pub fn get(&self) -> Option<Rc<RefCell<T>>> {
        self.entries.as_ref()?.first()?.object.clone()
    }

    #[must_use]
    pub fn entries(&self) -> &[RefEntry<T>] {
        self.entries.as_deref().unwrap_or_default()
    }
}

impl<T> Clone for NetRef<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<T> std::fmt::Debug for NetRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.entries {
            None => f.write_str("NetRef(null)"),
            Some(entries) => f
                .debug_list()
                .entries(entries.iter().map(|e| (e.id, e.object.is_some())))
                .finish(),
        }
    }
}

impl<T> Tagged for NetRef<T> {
    fn identity(&self) -> Option<usize> {
        let object = self.entries.as_ref()?.first()?.object.as_ref()?;
        Some(Rc::as_ptr(object).addr())
    }
}

fn encode_contents<T: Parameter>(
    entry: &RefEntry<T>,
    w: &mut ParamWriter<'_>,
) -> Result<BitStream> {
    let Some(object) = &entry.object else {
        return Err(Error::new(
            ErrorKind::InvalidArgument,
            format!("cannot dereference object {}, it is not available locally", entry.id),
        ));
    };
    let object = object.try_borrow().map_err(|_| {
        Error::new(
            ErrorKind::ObjectBusy,
            format!("object {} is mutably borrowed", entry.id),
        )
    })?;
    let mut body = BitStream::new();
    w.nested(&mut body).write(&*object)?;
    Ok(body)
}

fn decode_contents<T: Parameter + 'static>(
    object: Option<&Rc<RefCell<T>>>,
    bits: usize,
    r: &mut ParamReader<'_>,
) -> Result<()> {
    let mut body = r.stream().read_stream(bits)?;
    let Some(object) = object else {
        return Ok(());
    };
    match object.try_borrow_mut() {
        Ok(mut object) => object.decode_in_place(&mut r.nested(&mut body)),
        Err(_) => {
            tracing::warn!("skipping contents for an object that is in use");
            Ok(())
        }
    }
}

impl<T: NetworkObject + Parameter + 'static> Parameter for NetRef<T> {
    const POLICY: Policy = Policy::DirectoryReference;
    const MIN_BITS: usize = 1;

    fn encode(&self, w: &mut ParamWriter<'_>) -> Result<()> {
        let Some(entries) = &self.entries else {
            w.stream().write_bit(true);
            return Ok(());
        };
        w.stream().write_bit(false);
        let tag = w.take_tag(self);
        let count = if tag.is_array() { tag.count } else { 1 };
        if count > entries.len() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("array tag of {count} objects on {} references", entries.len()),
            ));
        }
        w.stream().write_bit(tag.is_deref());
        w.stream().write_bit(tag.is_array());
        if tag.is_array() {
            w.stream().write_compressed_u32(u32::try_from(count)?);
        }
        for entry in &entries[..count] {
            w.stream().write_u64(entry.id.0);
            if tag.is_deref() {
                let body = encode_contents(entry, w)?;
                let s = w.stream();
                s.align_write();
                s.write_u32(u32::try_from(body.bits_used())?);
                s.write_stream(&body);
            }
        }
        Ok(())
    }

    fn decode(r: &mut ParamReader<'_>) -> Result<Self> {
        if r.stream().read_bit()? {
            return Ok(Self::null());
        }
        let deref = r.stream().read_bit()?;
        let count = if r.stream().read_bit()? {
            r.stream().read_compressed_u32()? as usize
        } else {
            1
        };
        check_count::<NetworkId>(r, count)?;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let id = NetworkId(r.stream().read_u64()?);
            let object = r
                .directory()
                .and_then(|directory| directory.resolve(id))
                .and_then(|handle| handle.downcast::<RefCell<T>>().ok());
            if deref {
                r.stream().align_read();
                let bits = r.stream().read_u32()? as usize;
                decode_contents(object.as_ref(), bits, r)?;
            }
            entries.push(RefEntry { id, object });
        }
        Ok(Self {
            entries: Some(entries),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NetworkIdManager, ObjectDirectory, RefTags};

    #[derive(Debug)]
    struct Door {
        id: NetworkId,
        open: bool,
        angle: u16,
    }

    impl NetworkObject for Door {
        fn network_id(&self) -> NetworkId {
            self.id
        }
    }

    impl Parameter for Door {
        fn encode(&self, w: &mut ParamWriter<'_>) -> Result<()> {
            w.write(&self.open)?;
            w.write(&self.angle)
        }

        fn decode(r: &mut ParamReader<'_>) -> Result<Self> {
            Ok(Door {
                id: NetworkId::UNASSIGNED,
                open: r.read()?,
                angle: r.read()?,
            })
        }

        fn decode_in_place(&mut self, r: &mut ParamReader<'_>) -> Result<()> {
            self.open = r.read()?;
            self.angle = r.read()?;
            Ok(())
        }
    }

    fn door(id: u64, open: bool, angle: u16) -> Rc<RefCell<Door>> {
        Rc::new(RefCell::new(Door {
            id: NetworkId(id),
            open,
            angle,
        }))
    }

    #[test]
    fn test_deref_updates_receiver_copy() {
        let sender_door = door(5, true, 90);
        let receiver_door = door(5, false, 0);
        let manager = Rc::new(NetworkIdManager::new());
        manager.register(&receiver_door);

        let arg = NetRef::new(&sender_door);
        let mut tags = RefTags::new().deref(&arg);
        let mut stream = BitStream::new();
        ParamWriter::new(&mut stream, &mut tags).write(&arg).unwrap();
        stream.write_u8(0xAB);
        tags.assert_consumed();

        let directory: Rc<dyn ObjectDirectory> = manager;
        let mut r = ParamReader::new(&mut stream).with_directory(Some(directory));
        let back: NetRef<Door> = r.read().unwrap();
        assert_eq!(r.read::<u8>().unwrap(), 0xAB);

        assert_eq!(back.id(), Some(NetworkId(5)));
        let resolved = back.get().unwrap();
        assert!(Rc::ptr_eq(&resolved, &receiver_door));
        assert!(receiver_door.borrow().open);
        assert_eq!(receiver_door.borrow().angle, 90);
    }

    #[test]
    fn test_deref_skipped_when_unresolved() {
        let sender_door = door(6, true, 45);
        let arg = NetRef::new(&sender_door);
        let mut tags = RefTags::new().deref(&arg);
        let mut stream = BitStream::new();
        ParamWriter::new(&mut stream, &mut tags).write(&arg).unwrap();
        stream.write_u8(0xCD);

        let directory: Rc<dyn ObjectDirectory> = Rc::new(NetworkIdManager::new());
        let mut r = ParamReader::new(&mut stream).with_directory(Some(directory));
        let back: NetRef<Door> = r.read().unwrap();
        assert!(back.get().is_none());
        assert_eq!(back.id(), Some(NetworkId(6)));
        assert_eq!(r.read::<u8>().unwrap(), 0xCD);
    }

    #[test]
    fn test_deref_needs_local_objects() {
        let local = door(1, true, 10);
        let mixed = NetRef {
            entries: Some(vec![
                RefEntry {
                    id: NetworkId(1),
                    object: Some(local.clone()),
                },
                RefEntry {
                    id: NetworkId(2),
                    object: None,
                },
            ]),
        };
        let mut tags = RefTags::new().deref(&mixed).array(&mixed, 2);
        let mut stream = BitStream::new();
        let err = ParamWriter::new(&mut stream, &mut tags)
            .write(&mixed)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_deref_contents_stay_in_their_window() {
        let receiver_door = door(4, false, 0);
        let manager = Rc::new(NetworkIdManager::new());
        manager.register(&receiver_door);

        // announce one bit of contents although a door needs seventeen
        let mut stream = BitStream::new();
        stream.write_bit(false);
        stream.write_bit(true);
        stream.write_bit(false);
        stream.write_u64(4);
        stream.align_write();
        stream.write_u32(1);
        stream.write_bit(true);
        stream.write_u16(0xFFFF);

        let directory: Rc<dyn ObjectDirectory> = manager;
        let mut r = ParamReader::new(&mut stream).with_directory(Some(directory));
        let err = r.read::<NetRef<Door>>().unwrap_err();
        assert_eq!(err.kind, ErrorKind::ReadPastEnd);
        assert_eq!(receiver_door.borrow().angle, 0);
    }

    #[test]
    fn test_array_count_bounded_by_input() {
        let mut stream = BitStream::new();
        stream.write_bit(false);
        stream.write_bit(false);
        stream.write_bit(true);
        stream.write_compressed_u32(1000);
        stream.write_u64(1);

        let err = ParamReader::new(&mut stream)
            .read::<NetRef<Door>>()
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::DeserializeFailed);
    }

    #[test]
    fn test_array_and_null() {
        let doors = [door(1, false, 1), door(2, false, 2), door(3, false, 3)];
        let arg = NetRef::many(&doors);
        let mut tags = RefTags::new().array(&arg, 2);
        let mut stream = BitStream::new();
        let mut w = ParamWriter::new(&mut stream, &mut tags);
        w.write(&arg).unwrap();
        w.write(&NetRef::<Door>::null()).unwrap();

        let mut r = ParamReader::new(&mut stream);
        let back: NetRef<Door> = r.read().unwrap();
        let ids: Vec<_> = back.entries().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![NetworkId(1), NetworkId(2)]);
        assert!(back.get().is_none());
        assert!(r.read::<NetRef<Door>>().unwrap().is_null());
    }
}
