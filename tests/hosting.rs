//! End-to-end hosting against the recording fake runtime.
//!
//! Every test drives the public [`Loader`] through a [`FakePlatform`] and then inspects what
//! the fake observed: which handles were acquired and released, in which order, and which
//! parameter arrays reached the entry point.

use clrhost::fake::{
    synthetic_image, Event, FakeCall, FakePlatform, FakeProgram, FakeReturn, Handle,
};
use clrhost::native::HResult;
use clrhost::{Error, Image, ImageKind, Loader, LoaderConfig};

const NO_ARGS: &[&str] = &[];

fn program(tag: &[u8], behavior: FakeProgram) -> (Image, FakePlatform) {
    let bytes = synthetic_image(ImageKind::Executable, tag);
    let platform = FakePlatform::new().with_program(&bytes, behavior);
    (Image::from_mem(bytes).unwrap(), platform)
}

fn invoked(platform: &FakePlatform) -> bool {
    platform
        .events()
        .iter()
        .any(|event| matches!(event, Event::Invoked { .. }))
}

#[test]
fn returns_the_exit_code() {
    let (image, platform) = program(b"A", FakeProgram::returning("Int32 Main()", 42));
    let loader = Loader::new(platform.clone(), LoaderConfig::default()).unwrap();

    assert_eq!(loader.execute(&image, NO_ARGS).unwrap(), 42);
    assert_eq!(platform.invocations(), vec![None]);
}

#[test]
fn void_entry_exits_with_zero() {
    let (image, platform) = program(b"void", FakeProgram::void("Void Main()"));
    let loader = Loader::new(platform, LoaderConfig::default()).unwrap();
    assert_eq!(loader.execute(&image, NO_ARGS).unwrap(), 0);
}

#[test]
fn malformed_buffer_stops_at_load() {
    let platform = FakePlatform::new();
    let loader = Loader::new(platform.clone(), LoaderConfig::passthrough()).unwrap();
    let image = Image::from_mem(vec![0x4D, 0x5A, 0x90, 0x00, 0x03]).unwrap();

    let result = loader.execute(&image, &["x"]);
    assert!(matches!(
        result,
        Err(Error::BadImageFormat(HResult::COR_E_BADIMAGEFORMAT))
    ));
    assert!(!platform
        .acquired()
        .iter()
        .any(|handle| matches!(handle, Handle::Program(_) | Handle::EntryFunction(_))));
    assert!(!invoked(&platform));
    assert_eq!(platform.heap().live_arrays(), 0);
}

#[test]
fn arguments_arrive_as_one_string_array() {
    let (image, platform) = program(
        b"C",
        FakeProgram::returning("Void Main(System.String[])", 0).returns(FakeReturn::ArgumentCount),
    );
    let loader = Loader::new(platform.clone(), LoaderConfig::default()).unwrap();

    assert_eq!(loader.execute(&image, &["a", "b"]).unwrap(), 2);
    assert_eq!(
        platform.invocations(),
        vec![Some(vec![vec!["a".to_string(), "b".to_string()]])]
    );
}

#[test]
fn non_ascii_arguments_survive() {
    let (image, platform) = program(
        b"unicode",
        FakeProgram::returning("Int32 Main(System.String[])", 0).returns(FakeReturn::ArgumentCount),
    );
    let loader = Loader::new(platform.clone(), LoaderConfig::default()).unwrap();

    let args = ["grüße", "日本語", ""];
    assert_eq!(loader.execute(&image, &args).unwrap(), 3);
    assert_eq!(
        platform.invocations(),
        vec![Some(vec![args
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<String>>()])]
    );
}

#[test]
fn parameterless_entry_ignores_arguments() {
    for signature in ["Void Main()", "Int32 Main()"] {
        let (image, platform) = program(signature.as_bytes(), FakeProgram::returning(signature, 5));
        let loader = Loader::new(platform.clone(), LoaderConfig::default()).unwrap();

        assert_eq!(loader.execute(&image, &["ignored", "too"]).unwrap(), 5);
        assert_eq!(platform.invocations(), vec![None]);
    }
}

#[test]
fn arguments_required_without_native_call() {
    let (image, platform) = program(
        b"needs args",
        FakeProgram::returning("Int32 Main(System.String[])", 1),
    );
    let loader = Loader::new(platform.clone(), LoaderConfig::default()).unwrap();

    assert!(matches!(loader.execute(&image, NO_ARGS), Err(Error::ArgsRequired)));
    assert!(!invoked(&platform));
}

#[test]
fn library_has_no_entry_point() {
    let bytes = synthetic_image(ImageKind::Library, b"lib");
    let platform = FakePlatform::new().with_program(&bytes, FakeProgram::library("Lib"));
    let loader = Loader::new(platform.clone(), LoaderConfig::default()).unwrap();

    let result = loader.load(&Image::from_mem(bytes).unwrap());
    assert!(matches!(result, Err(Error::NoEntryPoint(HResult::E_POINTER))));
    // the program handle was released with the failed load
    assert_eq!(platform.released(), vec![Handle::Program("Lib".to_string())]);
}

#[test]
fn unexpected_return_is_cleared() {
    let (image, platform) = program(
        b"string",
        FakeProgram::returning("System.String Main()", 0)
            .returns(FakeReturn::String("nope".into())),
    );
    let loader = Loader::new(platform.clone(), LoaderConfig::default()).unwrap();

    // "System.String Main()" is not a known parameterless signature, so arguments are needed
    let result = loader.execute(&image, &["x"]);
    assert!(matches!(result, Err(Error::UnexpectedReturn(8))));
    assert_eq!(platform.heap().live_strings(), 0);
}

#[test]
fn invocation_failure_carries_the_status() {
    let (image, platform) = program(
        b"throws",
        FakeProgram::returning("Int32 Main()", 0)
            .returns(FakeReturn::Throws(HResult::COR_E_TARGETINVOCATION)),
    );
    let loader = Loader::new(platform, LoaderConfig::default()).unwrap();

    match loader.execute(&image, NO_ARGS) {
        Err(Error::InvokeFailed { call, hr }) => {
            assert_eq!(call, "_MethodInfo::Invoke_3");
            assert_eq!(hr, HResult::COR_E_TARGETINVOCATION);
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn other_load_failures() {
    let (image, platform) = program(b"load", FakeProgram::returning("Int32 Main()", 0));
    let platform = platform.failing(FakeCall::Load, HResult::E_FAIL);
    let loader = Loader::new(platform, LoaderConfig::default()).unwrap();

    assert!(matches!(
        loader.load(&image),
        Err(Error::LoadFailed {
            hr: HResult::E_FAIL,
            ..
        })
    ));
}

#[test]
fn releases_mirror_acquisitions() {
    let (image, platform) = program(
        b"order",
        FakeProgram::returning("Int32 Main()", 0).named("Order"),
    );
    let loader = Loader::new(platform.clone(), LoaderConfig::default()).unwrap();
    loader.execute(&image, NO_ARGS).unwrap();
    drop(loader);

    let mut acquired = platform.acquired();
    acquired.reverse();
    assert_eq!(platform.released(), acquired);
    assert_eq!(
        acquired.last(),
        Some(&Handle::Root),
        "the root is acquired first"
    );
}

#[test]
fn partial_acquisition_is_released() {
    let failures = [
        FakeCall::Enumerate,
        FakeCall::GetRuntime,
        FakeCall::IsLoadable,
        FakeCall::BindLegacy,
        FakeCall::GetHost,
        FakeCall::Start,
        FakeCall::DefaultDomain,
    ];

    for call in failures {
        let platform = FakePlatform::new().failing(call, HResult::E_FAIL);
        assert!(Loader::new(platform.clone(), LoaderConfig::default()).is_err());

        let mut acquired = platform.acquired();
        acquired.reverse();
        assert_eq!(platform.released(), acquired, "after a failing {call:?}");
    }
}

#[test]
fn acquisition_errors() {
    let platform = FakePlatform::new().with_runtimes(&[]);
    assert!(matches!(
        Loader::new(platform, LoaderConfig::default()),
        Err(Error::NoRuntimeFound)
    ));

    let platform = FakePlatform::new().unloadable();
    match Loader::new(platform, LoaderConfig::default()) {
        Err(Error::RuntimeNotLoadable { version }) => assert_eq!(version, "v4.0.30319"),
        other => panic!("unexpected result {other:?}"),
    }

    let platform = FakePlatform::new().failing(FakeCall::BindLegacy, HResult::E_FAIL);
    assert!(matches!(
        Loader::new(platform, LoaderConfig::default()),
        Err(Error::LegacyBindFailed(HResult::E_FAIL))
    ));

    let platform = FakePlatform::new().failing(FakeCall::Start, HResult::E_FAIL);
    assert!(matches!(
        Loader::new(platform, LoaderConfig::default()),
        Err(Error::HostStartFailed {
            call: "ICorRuntimeHost::Start",
            ..
        })
    ));
}

#[test]
fn non_empty_runtime_lists_always_select() {
    let lists: [&[&str]; 4] = [
        &["v2.0.50727"],
        &["v4.0.30319"],
        &["v1.1.4322", "v2.0.50727"],
        &["v2.0.50727", "v4.0.30319", "v4.8"],
    ];

    for list in lists {
        let platform = FakePlatform::new().with_runtimes(list);
        let loader = Loader::new(platform, LoaderConfig::default()).unwrap();
        let version = loader.runtime_version().unwrap();
        assert!(list.contains(&version.as_str()));
        if list.iter().any(|v| v.contains("v4")) {
            assert!(version.contains("v4"));
        } else {
            assert_eq!(Some(&version.as_str()), list.last());
        }
    }
}

#[test]
fn binding_follows_configuration() {
    let bound = FakePlatform::new();
    let _loader = Loader::new(bound.clone(), LoaderConfig::default()).unwrap();
    assert!(bound
        .events()
        .contains(&Event::BoundLegacy("v4.0.30319".to_string())));

    let unbound = FakePlatform::new();
    let _loader = Loader::new(unbound.clone(), LoaderConfig::unbound()).unwrap();
    assert!(!unbound
        .events()
        .iter()
        .any(|event| matches!(event, Event::BoundLegacy(_))));
}

#[test]
fn no_native_memory_outlives_a_run() {
    let (image, platform) = program(
        b"leaks",
        FakeProgram::returning("Int32 Main(System.String[])", 0).returns(FakeReturn::ArgumentCount),
    );
    let loader = Loader::new(platform.clone(), LoaderConfig::passthrough()).unwrap();

    for _ in 0..3 {
        loader.execute(&image, &["one", "two", "three"]).unwrap();
    }
    assert_eq!(platform.heap().live_arrays(), 0);
    assert_eq!(platform.heap().live_strings(), 0);
}
