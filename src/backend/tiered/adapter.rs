//! Bridging compiled entry points back to the declared signature.
//!
//! A callable handle always receives its arguments as `&mut [Value]`, with
//! by-reference slots updated in place. [`CompiledEntry`] bridges that
//! convention to whatever shape the compiler produced: exact shapes are
//! called directly, the canonical `Uniform` shape goes through a
//! [`SignatureAdapter`] that boxes by-ref arguments on the way in and unboxes
//! them on the way out.

use smallvec::SmallVec;

use crate::backend::definition::{PassMode, Signature};
use crate::backend::errors::{RuntimeError, RuntimeResult, SignatureMismatch};
use crate::backend::models::{RefBox, Value};

use super::shape::{select_shape, FuncFn, NativeFn, NativeShape};

/// Per-argument marshaling step of the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgBridge {
    /// Passed through as-is
    Simple,
    /// Boxed into a [`RefBox`] and copied back after the call
    Boxed,
}

impl ArgBridge {
    fn marshal(&self, arg: &mut Value) -> Value {
        match self {
            ArgBridge::Simple => arg.clone(),
            ArgBridge::Boxed => Value::Ref(RefBox::new(std::mem::take(arg))),
        }
    }

    fn unmarshal_from_ref(&self, marshaled: &Value, slot: &mut Value) {
        if let (ArgBridge::Boxed, Value::Ref(boxed)) = (self, marshaled) {
            *slot = boxed.take();
        }
    }
}

/// Thin wrapper presenting a `Uniform` entry point under the declared
/// signature
#[derive(Clone)]
pub struct SignatureAdapter {
    bridges: SmallVec<[ArgBridge; 8]>,
    returns: bool,
    target: FuncFn,
}

impl SignatureAdapter {
    /// Build an adapter for `native` under `signature`
    ///
    /// Fails if `native` is not the canonical shape for the signature: same
    /// arity, and returning a value exactly when the signature does.
    pub fn new(signature: &Signature, native: NativeFn) -> Result<Self, SignatureMismatch> {
        match native {
            NativeFn::Uniform { arity, returns, f }
                if arity == signature.arity() && returns == !signature.is_void() =>
            {
                let bridges = signature
                    .params()
                    .iter()
                    .map(|p| match p.mode() {
                        PassMode::ByValue => ArgBridge::Simple,
                        PassMode::ByRef => ArgBridge::Boxed,
                    })
                    .collect();
                Ok(SignatureAdapter {
                    bridges,
                    returns,
                    target: f,
                })
            }
            other => Err(SignatureMismatch {
                signature: signature.to_string(),
                got: other.shape(),
            }),
        }
    }

    /// Call the wrapped entry point
    ///
    /// By-ref slots are written back even when the callee raises.
    pub fn call(&self, args: &mut [Value]) -> RuntimeResult<Value> {
        let marshaled: SmallVec<[Value; 8]> = self
            .bridges
            .iter()
            .zip(args.iter_mut())
            .map(|(bridge, arg)| bridge.marshal(arg))
            .collect();

        let result = (self.target)(&marshaled);

        for ((bridge, boxed), slot) in self.bridges.iter().zip(&marshaled).zip(args.iter_mut()) {
            bridge.unmarshal_from_ref(boxed, slot);
        }

        let value = result?;
        Ok(if self.returns { value } else { Value::Unit })
    }
}

/// A resolved compiled entry point, callable under the declared signature
#[derive(Clone)]
pub enum CompiledEntry {
    /// Entry point whose shape matches the declared signature
    Direct(NativeFn),
    /// Canonical-shape entry point behind an adapter
    Adapted(SignatureAdapter),
}

impl CompiledEntry {
    /// Wrap `native` for `signature`, choosing direct dispatch or adaptation
    pub fn new(signature: &Signature, native: NativeFn) -> Result<Self, SignatureMismatch> {
        let selection = select_shape(signature);
        if selection.exact {
            if native.shape() == selection.shape {
                Ok(CompiledEntry::Direct(native))
            } else {
                Err(SignatureMismatch {
                    signature: signature.to_string(),
                    got: native.shape(),
                })
            }
        } else {
            SignatureAdapter::new(signature, native).map(CompiledEntry::Adapted)
        }
    }

    /// Check if this entry needs call-time adaptation
    pub fn is_adapted(&self) -> bool {
        matches!(self, CompiledEntry::Adapted(_))
    }

    /// Shape of the underlying compiled code
    pub fn shape(&self) -> NativeShape {
        match self {
            CompiledEntry::Direct(native) => native.shape(),
            CompiledEntry::Adapted(adapter) => NativeShape::Uniform {
                arity: adapter.bridges.len(),
                returns: adapter.returns,
            },
        }
    }

    /// Call with arguments already checked against the signature's arity
    #[inline]
    pub fn call(&self, args: &mut [Value]) -> RuntimeResult<Value> {
        match self {
            CompiledEntry::Direct(NativeFn::Func { f, .. }) => f(args),
            CompiledEntry::Direct(NativeFn::Action { f, .. }) => f(args).map(|()| Value::Unit),
            CompiledEntry::Direct(NativeFn::ActionRef2(f)) => match args {
                [a, b] => f(a, b).map(|()| Value::Unit),
                _ => Err(RuntimeError::ArityMismatch {
                    expected: 2,
                    got: args.len(),
                }),
            },
            // Only reachable through `new` with an exact uniform selection,
            // which `select_shape` never produces.
            CompiledEntry::Direct(NativeFn::Uniform { f, .. }) => f(args),
            CompiledEntry::Adapted(adapter) => adapter.call(args),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::definition::{Parameter, ReturnType};
    use std::sync::Arc;

    fn increment_first() -> NativeFn {
        // fn(ref a, b) -> value: a += b, returns old a
        NativeFn::Uniform {
            arity: 2,
            returns: true,
            f: Arc::new(|args: &[Value]| {
                let Value::Ref(cell) = &args[0] else {
                    panic!("by-ref argument was not boxed");
                };
                let old = cell.get();
                let sum = old.as_int().unwrap() + args[1].as_int().unwrap();
                cell.set(Value::Int(sum));
                Ok(old)
            }),
        }
    }

    #[test]
    fn test_adapter_round_trips_by_ref() {
        let sig = Signature::new(
            vec![Parameter::by_ref("a"), Parameter::by_value("b")],
            ReturnType::Value,
        );
        let entry = CompiledEntry::new(&sig, increment_first()).unwrap();
        assert!(entry.is_adapted());

        let mut args = [Value::Int(10), Value::Int(5)];
        let result = entry.call(&mut args).unwrap();
        assert_eq!(result, Value::Int(10));
        assert_eq!(args, [Value::Int(15), Value::Int(5)]);
    }

    #[test]
    fn test_adapter_writes_back_on_error() {
        let sig = Signature::new(vec![Parameter::by_ref("a")], ReturnType::Value);
        let native = NativeFn::Uniform {
            arity: 1,
            returns: true,
            f: Arc::new(|args: &[Value]| {
                if let Value::Ref(cell) = &args[0] {
                    cell.set(Value::Int(99));
                }
                Err(RuntimeError::Raised(Value::str("late")))
            }),
        };
        let entry = CompiledEntry::new(&sig, native).unwrap();
        let mut args = [Value::Int(1)];
        assert!(entry.call(&mut args).is_err());
        assert_eq!(args[0], Value::Int(99));
    }

    #[test]
    fn test_exact_signature_rejects_wrong_shape() {
        let sig = Signature::new(vec![Parameter::by_value("a")], ReturnType::Value);
        let native = NativeFn::Action {
            arity: 1,
            f: Arc::new(|_: &[Value]| Ok(())),
        };
        let err = CompiledEntry::new(&sig, native).err().unwrap();
        assert_eq!(err.got, NativeShape::Action { arity: 1 });
    }

    #[test]
    fn test_adapter_rejects_non_uniform() {
        let sig = Signature::new(vec![Parameter::by_ref("a")], ReturnType::Value);
        let native = NativeFn::Func {
            arity: 1,
            f: Arc::new(|_: &[Value]| Ok(Value::Unit)),
        };
        assert!(CompiledEntry::new(&sig, native).is_err());
    }

    #[test]
    fn test_adapter_rejects_return_disagreement() {
        let sig = Signature::new(vec![Parameter::by_ref("a")], ReturnType::Value);
        let native = NativeFn::Uniform {
            arity: 1,
            returns: false,
            f: Arc::new(|_: &[Value]| Ok(Value::Int(99))),
        };
        let err = CompiledEntry::new(&sig, native).err().unwrap();
        assert_eq!(
            err.got,
            NativeShape::Uniform {
                arity: 1,
                returns: false
            }
        );

        let void = Signature::new(vec![Parameter::by_ref("a")], ReturnType::Void);
        let native = NativeFn::Uniform {
            arity: 1,
            returns: true,
            f: Arc::new(|_: &[Value]| Ok(Value::Int(99))),
        };
        assert!(SignatureAdapter::new(&void, native).is_err());
    }

    #[test]
    fn test_action_ref2_direct_call() {
        let sig = Signature::new(
            vec![Parameter::by_ref("a"), Parameter::by_ref("b")],
            ReturnType::Void,
        );
        let native = NativeFn::ActionRef2(Arc::new(|a: &mut Value, b: &mut Value| {
            std::mem::swap(a, b);
            Ok(())
        }));
        let entry = CompiledEntry::new(&sig, native).unwrap();
        assert!(!entry.is_adapted());
        let mut args = [Value::Int(1), Value::Int(2)];
        assert_eq!(entry.call(&mut args).unwrap(), Value::Unit);
        assert_eq!(args, [Value::Int(2), Value::Int(1)]);
    }
}
