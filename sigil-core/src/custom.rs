//! Binding protocol for host objects that do not map directly onto the
//! grammar: the object produces a serializable surrogate, with optional
//! hooks around serialization and after deserialization. Hook calls are
//! balanced across every exit path, including failures while serializing
//! inner components.

use alloc::vec::Vec;

use crate::error::SigilError;
use crate::native::{FromSigil, GuessMode, SigilType, ToSigil};
use crate::policy::Policy;
use crate::value::{Any, AnyView};

/// A host object serialized through a surrogate value.
pub trait Surrogate {
    /// The serializable stand-in, typically a tuple.
    type Repr: ToSigil;

    /// Produce the surrogate.
    fn to_surrogate(&self) -> Self::Repr;

    /// Called before the surrogate is serialized.
    fn before_serialize(&self) {}

    /// Called after serialization with its outcome. Runs on failure too.
    fn after_serialize(&self, ok: bool) {}
}

/// A host object deserialized through a surrogate value.
pub trait FromSurrogate: Sized {
    /// The serializable stand-in the wire form decodes into.
    type Repr: FromSigil;

    /// Rebuild the object from its surrogate.
    fn from_surrogate(repr: Self::Repr) -> Result<Self, SigilError>;

    /// Called once the object is fully rebuilt.
    fn after_deserialize(&mut self) {}
}

/// Adapter giving any [`Surrogate`] implementor a [`ToSigil`] view.
///
/// A separate adapter (rather than a blanket impl) keeps the scalar and
/// container impls coherent.
pub struct AsSurrogate<'a, T: Surrogate>(pub &'a T);

impl<T: Surrogate> AsSurrogate<'_, T> {
    fn with_hooks<R>(
        &self,
        f: impl FnOnce(&T::Repr) -> Result<R, SigilError>,
    ) -> Result<R, SigilError> {
        let repr = self.0.to_surrogate();
        self.0.before_serialize();
        let result = f(&repr);
        self.0.after_serialize(result.is_ok());
        result
    }
}

impl<T: Surrogate> ToSigil for AsSurrogate<'_, T> {
    fn guess_type(&self, mode: GuessMode) -> Result<alloc::string::String, SigilError> {
        self.0.to_surrogate().guess_type(mode)
    }

    fn encode_guessed(&self, mode: GuessMode, out: &mut Vec<u8>) -> Result<(), SigilError> {
        self.with_hooks(|repr| repr.encode_guessed(mode, out))
    }

    fn encode_as(&self, ty: &str, mode: GuessMode, out: &mut Vec<u8>) -> Result<(), SigilError> {
        self.with_hooks(|repr| repr.encode_as(ty, mode, out))
    }
}

/// Serialize a [`Surrogate`] implementor into an owned [`Any`].
///
/// The hooks bracket the whole sequence: type inference, encoding, and
/// validation all count as "serialization" for balance purposes.
pub fn custom_to_any<T: Surrogate>(value: &T, mode: GuessMode) -> Result<Any, SigilError> {
    let repr = value.to_surrogate();
    value.before_serialize();
    let result = (|| {
        let ty = repr.guess_type(mode)?;
        let mut out = Vec::new();
        repr.encode_guessed(mode, &mut out)?;
        Any::new(ty, out)
    })();
    value.after_serialize(result.is_ok());
    result
}

/// Deserialize a [`FromSurrogate`] implementor out of a view.
pub fn custom_from_view<T: FromSurrogate>(
    view: &AnyView<'_>,
    policy: Policy,
) -> Result<T, SigilError>
where
    T::Repr: SigilType,
{
    let repr = view.get_as::<T::Repr>(policy)?;
    let mut value = T::from_surrogate(repr)?;
    value.after_deserialize();
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use alloc::string::{String, ToString};
    use core::cell::Cell;

    /// A host object whose wire form is a `(name, celsius)` pair.
    struct Probe {
        name: String,
        celsius: i32,
        hooks: Cell<(u32, u32)>,
    }

    impl Surrogate for Probe {
        type Repr = (String, i32);

        fn to_surrogate(&self) -> Self::Repr {
            (self.name.clone(), self.celsius)
        }

        fn before_serialize(&self) {
            let (before, after) = self.hooks.get();
            self.hooks.set((before + 1, after));
        }

        fn after_serialize(&self, _ok: bool) {
            let (before, after) = self.hooks.get();
            self.hooks.set((before, after + 1));
        }
    }

    struct ProbeOut {
        name: String,
        celsius: i32,
        finished: bool,
    }

    impl FromSurrogate for ProbeOut {
        type Repr = (String, i32);

        fn from_surrogate((name, celsius): Self::Repr) -> Result<Self, SigilError> {
            Ok(ProbeOut {
                name,
                celsius,
                finished: false,
            })
        }

        fn after_deserialize(&mut self) {
            self.finished = true;
        }
    }

    #[test]
    fn surrogate_round_trip_runs_all_hooks() {
        let probe = Probe {
            name: "outdoor".to_string(),
            celsius: -4,
            hooks: Cell::new((0, 0)),
        };
        let any = custom_to_any(&probe, GuessMode::Normal).unwrap();
        assert_eq!(any.type_str(), "t2si");
        assert_eq!(probe.hooks.get(), (1, 1));

        let back: ProbeOut = custom_from_view(&any.as_view(), Policy::NONE).unwrap();
        assert_eq!(back.name, "outdoor");
        assert_eq!(back.celsius, -4);
        assert!(back.finished);
    }

    /// A surrogate whose inner component fails to serialize.
    struct Broken {
        hooks: Cell<(u32, u32)>,
    }

    struct Unencodable;

    impl ToSigil for Unencodable {
        fn guess_type(&self, _mode: GuessMode) -> Result<String, SigilError> {
            Err(ApiError::new("inner component refused").into())
        }
        fn encode_guessed(&self, _mode: GuessMode, _out: &mut Vec<u8>) -> Result<(), SigilError> {
            Err(ApiError::new("inner component refused").into())
        }
    }

    impl Surrogate for Broken {
        type Repr = (i32, Unencodable);

        fn to_surrogate(&self) -> Self::Repr {
            (1, Unencodable)
        }

        fn before_serialize(&self) {
            let (before, after) = self.hooks.get();
            self.hooks.set((before + 1, after));
        }

        fn after_serialize(&self, ok: bool) {
            assert!(!ok);
            let (before, after) = self.hooks.get();
            self.hooks.set((before, after + 1));
        }
    }

    #[test]
    fn hooks_balance_across_failing_exits() {
        let broken = Broken {
            hooks: Cell::new((0, 0)),
        };
        assert!(custom_to_any(&broken, GuessMode::Normal).is_err());
        assert_eq!(broken.hooks.get(), (1, 1));
    }
}
