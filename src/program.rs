//! Loading programs, resolving entry points and invoking them.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::{
    marshal::{marshal_arguments, MarshalledArray},
    native::{
        types::{VT_ARRAY, VT_TYPEMASK},
        Allocator, HResult, VarType, Variant,
    },
    runtime::{EntryFunction, ExecutionDomain, LoadedProgram},
    Error, Result,
};

/// Signature fragments of entry points that take no parameters.
///
/// The runtime renders `static void Main()` as `Void Main()` and `static int Main()` as
/// `Int32 Main()`.
pub const NO_ARGUMENT_SIGNATURES: [&str; 2] = ["Void Main()", "Int32 Main()"];

/// Returns `true` if `signature` denotes a parameterless entry point.
pub fn takes_no_arguments(signature: &str) -> bool {
    NO_ARGUMENT_SIGNATURES
        .iter()
        .any(|marker| signature.contains(marker))
}

/// Loads a marshalled image into `domain`.
///
/// # Errors
/// - [`Error::BadImageFormat`] if the runtime rejects the bytes as a program image
/// - [`Error::LoadFailed`] for any other failure of `_AppDomain::Load_3`
pub fn load_program(
    domain: &dyn ExecutionDomain,
    image: &MarshalledArray,
) -> Result<Box<dyn LoadedProgram>> {
    let program = domain.load(image).map_err(|hr| {
        if hr == HResult::COR_E_BADIMAGEFORMAT {
            Error::BadImageFormat(hr)
        } else {
            Error::LoadFailed {
                call: "_AppDomain::Load_3",
                hr,
            }
        }
    })?;

    match program.full_name() {
        Ok(name) => info!("Loaded {name}"),
        Err(hr) => debug!("Loaded a program, _Assembly::get_FullName returned {hr}"),
    }

    Ok(program)
}

/// Resolves the entry function of a loaded program.
///
/// # Errors
/// Returns [`Error::NoEntryPoint`] with the native status if the accessor fails, or with
/// `E_POINTER` if it succeeds without yielding a function.
pub fn resolve_entry(program: &dyn LoadedProgram) -> Result<Box<dyn EntryFunction>> {
    match program.entry_point() {
        Ok(Some(entry)) => Ok(entry),
        Ok(None) => Err(Error::NoEntryPoint(HResult::E_POINTER)),
        Err(hr) => Err(Error::NoEntryPoint(hr)),
    }
}

/// Invokes an entry function and returns its exit code.
///
/// Parameterless entry points (see [`takes_no_arguments`]) are invoked without a parameter
/// array; any supplied `args` are ignored. All other entry points receive `args` as a single
/// `string[]` parameter. `void` entry points exit with 0.
///
/// # Errors
/// - [`Error::ArgsRequired`] if the entry point takes parameters and `args` is empty; no
///   native invocation is attempted
/// - [`Error::InvokeFailed`] if `_MethodInfo::Invoke_3` fails
/// - [`Error::UnexpectedReturn`] if the entry point returns neither `void` nor `int`
/// - any error of [`EntryFunction::signature`] or [`marshal_arguments`]
pub fn invoke<S: AsRef<str>>(
    allocator: &Arc<dyn Allocator>,
    entry: &dyn EntryFunction,
    args: &[S],
    max_signature_len: usize,
) -> Result<i32> {
    let signature = entry.signature(max_signature_len)?;
    debug!("Entry point signature: {signature}");

    let parameters = if takes_no_arguments(&signature) {
        if !args.is_empty() {
            warn!(
                "{signature} takes no arguments, ignoring {} supplied",
                args.len()
            );
        }
        None
    } else {
        if args.is_empty() {
            return Err(Error::ArgsRequired);
        }
        Some(marshal_arguments(allocator, args)?)
    };

    let mut returned = entry
        .invoke(&Variant::null(), parameters.as_ref())
        .map_err(|hr| Error::InvokeFailed {
            call: "_MethodInfo::Invoke_3",
            hr,
        })?;

    if returned.is_empty() {
        return Ok(0);
    }
    if let Some(code) = returned.as_i32() {
        return Ok(code);
    }

    let vt = returned.vt;
    let status = unsafe { allocator.clear_variant(&mut returned) };
    if !status.is_ok() {
        warn!(
            "VariantClear returned {status} for a {} return value",
            describe_vartype(vt)
        );
    }

    Err(Error::UnexpectedReturn(vt))
}

/// Name of a variant type for diagnostics, e.g. `BSTR` or `ARRAY|VARIANT`.
pub fn describe_vartype(vt: u16) -> String {
    let element = vt & VT_TYPEMASK;
    let base = VarType::from_repr(element)
        .map_or_else(|| format!("{element:#06x}"), |known| known.to_string());
    if vt & VT_ARRAY != 0 {
        format!("ARRAY|{base}")
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_argument_markers() {
        assert!(takes_no_arguments("Void Main()"));
        assert!(takes_no_arguments("Int32 Main()"));
        assert!(!takes_no_arguments("Void Main(System.String[])"));
        assert!(!takes_no_arguments("Int32 Main(System.String[])"));
        assert!(!takes_no_arguments(""));
    }

    #[test]
    fn vartype_names() {
        assert_eq!(describe_vartype(8), "BSTR");
        assert_eq!(describe_vartype(0x200c), "ARRAY|VARIANT");
        assert_eq!(describe_vartype(0x0fff), "0x0fff");
    }
}
