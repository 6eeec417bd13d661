//! Values carried by refs and tranlocals

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Shared, type-erased value of a generic ref.
pub(crate) type ObjectValue = Arc<dyn Any + Send + Sync>;

/// The value of one ref, either a 64-bit word or a shared object.
///
/// Word refs of every primitive kind use `Word`; generic refs use `Object`.
/// A ref never changes kind, so a mismatch is an engine bug.
#[derive(Clone)]
pub(crate) enum Payload {
    Word(u64),
    Object(ObjectValue),
}

impl Payload {
    /// Whether two payloads are the same value for dirty checking: equal
    /// words, or the very same object allocation.
    pub(crate) fn same(&self, other: &Payload) -> bool {
        match (self, other) {
            (Payload::Word(a), Payload::Word(b)) => a == b,
            (Payload::Object(a), Payload::Object(b)) => {
                std::ptr::eq(Arc::as_ptr(a) as *const u8, Arc::as_ptr(b) as *const u8)
            }
            _ => false,
        }
    }

    pub(crate) fn word(&self) -> u64 {
        match self {
            Payload::Word(word) => *word,
            Payload::Object(_) => payload_mismatch("word"),
        }
    }

    pub(crate) fn object(&self) -> &ObjectValue {
        match self {
            Payload::Object(object) => object,
            Payload::Word(_) => payload_mismatch("object"),
        }
    }

    /// Downcast an object payload to the ref's element type.
    pub(crate) fn downcast<T: Send + Sync + 'static>(&self) -> Arc<T> {
        match Arc::clone(self.object()).downcast::<T>() {
            Ok(value) => value,
            Err(_) => payload_mismatch(std::any::type_name::<T>()),
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Word(word) => write!(f, "Word({:#x})", word),
            Payload::Object(object) => write!(f, "Object({:p})", Arc::as_ptr(object) as *const u8),
        }
    }
}

#[cold]
#[inline(never)]
#[track_caller]
fn payload_mismatch(expected: &str) -> ! {
    panic!("payload type confusion: expected {}", expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_compare_by_value() {
        assert!(Payload::Word(7).same(&Payload::Word(7)));
        assert!(!Payload::Word(7).same(&Payload::Word(8)));
    }

    #[test]
    fn objects_compare_by_identity() {
        let a: ObjectValue = Arc::new(String::from("x"));
        let b: ObjectValue = Arc::new(String::from("x"));
        assert!(Payload::Object(Arc::clone(&a)).same(&Payload::Object(Arc::clone(&a))));
        assert!(!Payload::Object(a).same(&Payload::Object(b)));
    }

    #[test]
    fn downcast_returns_the_stored_value() {
        let payload = Payload::Object(Arc::new(42_u32));
        assert_eq!(*payload.downcast::<u32>(), 42);
    }

    #[test]
    #[should_panic(expected = "payload type confusion")]
    fn wrong_kind_panics() {
        Payload::Word(1).object();
    }
}
