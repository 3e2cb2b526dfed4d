use std::{cell::RefCell, rc::Rc};

use crate::{
    codec::{ParamReader, ParamWriter, Parameter, Policy},
    directory::ObjectHandle,
    error::{Error, ErrorKind, Result},
};

/// What a slot asks of the signal dispatch that invoked it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SlotFlow {
    #[default]
    Continue,
    /// Skip the remaining, lower-priority slots.
    StopDispatch,
}

/// Handler return values that can steer signal dispatch.
pub trait IntoSlotFlow {
    fn into_slot_flow(self) -> SlotFlow;
}

impl IntoSlotFlow for () {
    fn into_slot_flow(self) -> SlotFlow {
        SlotFlow::Continue
    }
}

impl IntoSlotFlow for SlotFlow {
    fn into_slot_flow(self) -> SlotFlow {
        self
    }
}

/// A tuple of outgoing arguments.
pub trait Arguments {
    const COUNT: usize;

    /// # Errors
    fn encode_all(&self, w: &mut ParamWriter<'_>) -> Result<()>;
}

/// A free function callable by identifier.
pub trait Function<Args>: 'static {
    const ARITY: usize;

    fn signature() -> Vec<Policy>;

    /// # Errors
    fn invoke(&self, r: &mut ParamReader<'_>) -> Result<SlotFlow>;
}

/// A method on `C` callable by identifier and object id.
pub trait Method<C, Args>: 'static {
    const ARITY: usize;

    fn signature() -> Vec<Policy>;

    /// Decodes every argument, then borrows `target` mutably for the call.
    ///
    /// # Errors
    fn invoke(&self, target: &RefCell<C>, r: &mut ParamReader<'_>) -> Result<SlotFlow>;
}

macro_rules! impl_handlers {
    (@one $ty:ident) => {
        1
    };
    ($($ty:ident $var:ident),*) => {
        impl<F, R, $($ty,)*> Function<($($ty,)*)> for F
        where
            F: Fn($($ty),*) -> R + 'static,
            R: IntoSlotFlow,
            $($ty: Parameter,)*
        {
            const ARITY: usize = 0 $(+ impl_handlers!(@one $ty))*;

            fn signature() -> Vec<Policy> {
                vec![$($ty::POLICY),*]
            }

            #[allow(unused_variables)]
            fn invoke(&self, r: &mut ParamReader<'_>) -> Result<SlotFlow> {
                $(let $var = $ty::decode(r)?;)*
                Ok((self)($($var),*).into_slot_flow())
            }
        }

        impl<F, R, C, $($ty,)*> Method<C, ($($ty,)*)> for F
        where
            F: Fn(&mut C, $($ty),*) -> R + 'static,
            R: IntoSlotFlow,
            $($ty: Parameter,)*
        {
            const ARITY: usize = 0 $(+ impl_handlers!(@one $ty))*;

            fn signature() -> Vec<Policy> {
                vec![$($ty::POLICY),*]
            }

            #[allow(unused_variables)]
            fn invoke(&self, target: &RefCell<C>, r: &mut ParamReader<'_>) -> Result<SlotFlow> {
                $(let $var = $ty::decode(r)?;)*
                let mut target = target.try_borrow_mut().map_err(|_| {
                    Error::new(ErrorKind::ObjectBusy, "target object is already borrowed".into())
                })?;
                Ok((self)(&mut target, $($var),*).into_slot_flow())
            }
        }

        impl<$($ty: Parameter,)*> Arguments for ($($ty,)*) {
            const COUNT: usize = 0 $(+ impl_handlers!(@one $ty))*;

            #[allow(unused_variables)]
            fn encode_all(&self, w: &mut ParamWriter<'_>) -> Result<()> {
                let ($($var,)*) = self;
                $($var.encode(w)?;)*
                Ok(())
            }
        }
    };
}

impl_handlers!();
impl_handlers!(A a);
impl_handlers!(A a, B b);
impl_handlers!(A a, B b, D d);
impl_handlers!(A a, B b, D d, E e);
impl_handlers!(A a, B b, D d, E e, G g);
impl_handlers!(A a, B b, D d, E e, G g, H h);
impl_handlers!(A a, B b, D d, E e, G g, H h, I i);
impl_handlers!(A a, B b, D d, E e, G g, H h, I i, J j);

type FreeFn = dyn for<'r, 's> Fn(&'r mut ParamReader<'s>) -> Result<SlotFlow>;
type BoundFn = dyn for<'r, 's> Fn(&'r ObjectHandle, &'r mut ParamReader<'s>) -> Result<SlotFlow>;

fn free_fn<F>(f: F) -> Rc<FreeFn>
where
    F: for<'r, 's> Fn(&'r mut ParamReader<'s>) -> Result<SlotFlow> + 'static,
{
    Rc::new(f)
}

fn bound_fn<F>(f: F) -> Rc<BoundFn>
where
    F: for<'r, 's> Fn(&'r ObjectHandle, &'r mut ParamReader<'s>) -> Result<SlotFlow> + 'static,
{
    Rc::new(f)
}

/// Type-erased handler, either free or bound to a directory object.
#[derive(Clone)]
pub enum Invoker {
    Free(Rc<FreeFn>),
    Bound(Rc<BoundFn>),
}

impl Invoker {
    pub fn free<Args: 'static, H: Function<Args>>(handler: H) -> Self {
        Invoker::Free(free_fn(move |r| handler.invoke(r)))
    }

    pub fn bound<C: 'static, Args: 'static, H: Method<C, Args>>(handler: H) -> Self {
        Invoker::Bound(bound_fn(move |object, r| {
            let target = (**object).downcast_ref::<RefCell<C>>().ok_or_else(|| {
                Error::new(
                    ErrorKind::ObjectTypeMismatch,
                    format!("expected {}", std::any::type_name::<C>()),
                )
            })?;
            handler.invoke(target, r)
        }))
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        matches!(self, Invoker::Bound(_))
    }
}

impl std::fmt::Debug for Invoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Invoker::Free(_) => f.write_str("Invoker::Free"),
            Invoker::Bound(_) => f.write_str("Invoker::Bound"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::{BitStream, RefTags, codec::Ptr};

    fn arity<Args, H: Function<Args>>(_: &H) -> usize {
        H::ARITY
    }

    fn policies<Args, H: Function<Args>>(_: &H) -> Vec<Policy> {
        H::signature()
    }

    #[test]
    fn test_arity_and_signature() {
        let f = |_: i32, _: Ptr<u8>, _: BitStream| {};
        assert_eq!(arity(&f), 3);
        assert_eq!(
            policies(&f),
            vec![Policy::Value, Policy::RawPointer, Policy::EmbeddedBuffer]
        );
        assert_eq!(arity(&|| SlotFlow::StopDispatch), 0);
        assert_eq!(<(u8, bool) as Arguments>::COUNT, 2);
    }

    #[test]
    fn test_free_invoke() {
        let mut stream = BitStream::new();
        let mut tags = RefTags::new();
        (7i32, "seven".to_string())
            .encode_all(&mut ParamWriter::new(&mut stream, &mut tags))
            .unwrap();

        let seen = Rc::new(Cell::new(0));
        let sink = seen.clone();
        let invoker = Invoker::free(move |n: i32, s: String| {
            assert_eq!(s, "seven");
            sink.set(n);
        });
        let Invoker::Free(f) = &invoker else {
            panic!("expected a free invoker");
        };
        let flow = f(&mut ParamReader::new(&mut stream)).unwrap();
        assert_eq!(flow, SlotFlow::Continue);
        assert_eq!(seen.get(), 7);
        assert!(!invoker.is_bound());
    }

    struct Counter(u32);

    #[test]
    fn test_bound_invoke_and_mismatch() {
        let invoker = Invoker::bound::<Counter, _, _>(|c: &mut Counter, by: u32| c.0 += by);
        let Invoker::Bound(f) = &invoker else {
            panic!("expected a bound invoker");
        };

        let counter = Rc::new(RefCell::new(Counter(1)));
        let handle: ObjectHandle = counter.clone();
        let mut stream = BitStream::new();
        stream.write_u32(4);
        f(&handle, &mut ParamReader::new(&mut stream)).unwrap();
        assert_eq!(counter.borrow().0, 5);

        let wrong: ObjectHandle = Rc::new(RefCell::new(0u8));
        stream.reset_read_pointer();
        let err = f(&wrong, &mut ParamReader::new(&mut stream)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ObjectTypeMismatch);

        let _guard = counter.borrow();
        stream.reset_read_pointer();
        let err = f(&handle, &mut ParamReader::new(&mut stream)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ObjectBusy);
    }
}
