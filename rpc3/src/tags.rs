use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Per-argument intent flags for pointer-like parameters.
#[derive(Deserialize, Serialize, Debug, Default, PartialEq, Eq, Clone, Copy)]
#[repr(transparent)]
#[serde(transparent)]
pub struct TagFlags(u8);

bitflags! {
    impl TagFlags: u8 {
        /// Serialize the referenced object's contents after its id.
        const DEREF = 1;
        /// The pointer addresses `count` contiguous elements.
        const ARRAY = 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceTag {
    pub flags: TagFlags,
    pub count: usize,
}

impl ReferenceTag {
    #[must_use]
    pub fn is_deref(&self) -> bool {
        self.flags.contains(TagFlags::DEREF)
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        self.flags.contains(TagFlags::ARRAY)
    }
}

impl Default for ReferenceTag {
    fn default() -> Self {
        Self {
            flags: TagFlags::empty(),
            count: 1,
        }
    }
}

/// A value whose address can be tagged before a call is encoded.
pub trait Tagged {
    /// Stable identity of the pointee, `None` for null.
    fn identity(&self) -> Option<usize>;
}

#[derive(Debug)]
struct Entry {
    identity: usize,
    tag: ReferenceTag,
    consumed: bool,
}

/// Reference tags for a single outgoing call.
///
/// Tags are keyed by pointee identity and handed out once, to the first
/// parameter that encodes that pointee. Dropping a list with unconsumed tags
/// after a successful encode is a bug in the caller and panics.
#[derive(Debug, Default)]
pub struct RefTags {
    entries: Vec<Entry>,
}

impl RefTags {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn merge(&mut self, identity: usize, flags: TagFlags, count: Option<usize>) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.identity == identity && !e.consumed)
        {
            entry.tag.flags |= flags;
            if let Some(count) = count {
                entry.tag.count = count;
            }
            return;
        }
        self.entries.push(Entry {
            identity,
            tag: ReferenceTag {
                flags,
                count: count.unwrap_or(1),
            },
            consumed: false,
        });
    }

    /// Requests that the object behind `value` travel with its contents.
    #[must_use]
    pub fn deref(mut self, value: &impl Tagged) -> Self {
        if let Some(identity) = value.identity() {
            self.merge(identity, TagFlags::DEREF, None);
        }
        self
    }

    /// Marks `value` as pointing at `count` elements.
    #[must_use]
    pub fn array(mut self, value: &impl Tagged, count: usize) -> Self {
        if let Some(identity) = value.identity() {
            self.merge(identity, TagFlags::ARRAY, Some(count));
        }
        self
    }

    /// Consumes the tag queued for `identity`, or yields the default tag.
    pub fn take(&mut self, identity: usize) -> ReferenceTag {
        match self
            .entries
            .iter_mut()
            .find(|e| e.identity == identity && !e.consumed)
        {
            Some(entry) => {
                entry.consumed = true;
                entry.tag
            }
            None => ReferenceTag::default(),
        }
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.entries.iter().filter(|e| !e.consumed).count()
    }

    /// # Panics
    ///
    /// Panics if any tag was queued for a pointer that no parameter encoded.
    pub fn assert_consumed(&self) {
        let pending = self.pending();
        assert!(
            pending == 0,
            "{pending} reference tag(s) were not consumed by any parameter"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct At(usize);

    impl Tagged for At {
        fn identity(&self) -> Option<usize> {
            Some(self.0)
        }
    }

    #[test]
    fn test_merge_and_take_once() {
        let a = At(0x1000);
        let mut tags = RefTags::new().deref(&a).array(&a, 3);
        assert_eq!(tags.pending(), 1);

        let tag = tags.take(0x1000);
        assert!(tag.is_deref());
        assert!(tag.is_array());
        assert_eq!(tag.count, 3);

        assert_eq!(tags.take(0x1000), ReferenceTag::default());
        tags.assert_consumed();
    }

    #[test]
    fn test_array_count_replaced() {
        let a = At(8);
        let mut tags = RefTags::new().array(&a, 2).array(&a, 5);
        let tag = tags.take(8);
        assert_eq!(tag.flags, TagFlags::ARRAY);
        assert_eq!(tag.count, 5);
    }

    #[test]
    #[should_panic(expected = "not consumed")]
    fn test_unconsumed_tag_panics() {
        let tags = RefTags::new().deref(&At(1));
        tags.assert_consumed();
    }
}
