//! Live-header budget enforcement.
//!
//! The live count is process-wide, so this binary holds a single test.

mod common;

use common::*;
use pgasync::future::stats;
use pgasync::{as_future, as_promise, rpc, Completions, ErrorKind, Promise, RuntimeBuilder};

#[test]
fn exhausted_budget_is_reported_to_the_caller() {
    init_test_logging();
    let _guard = runtime_lock();
    let base = stats::live_headers();
    let rt = RuntimeBuilder::new()
        .without_env()
        .max_live_headers(Some(base + 2))
        .init()
        .expect("init");

    let first = Promise::<u32>::try_new().expect("first header");
    let second = Promise::<u32>::try_new().expect("second header");
    let err = Promise::<u32>::try_new().expect_err("budget spent");
    assert_eq!(err.kind(), ErrorKind::HeaderExhausted);
    assert!(err.is_retryable());

    // A failed bind gives back the promise contribution it already took.
    let bound = Completions::new()
        .operation(as_promise(&first))
        .source(as_future())
        .try_bind::<u32>();
    assert!(bound.is_err());
    assert_eq!(first.pending(), 0);

    let err = rpc(0, || 1u8, Completions::new().operation(as_future())).expect_err("no header");
    assert_eq!(err.kind(), ErrorKind::HeaderExhausted);

    drop(second);
    assert!(Promise::<u32>::try_new().is_ok());

    drop(first);
    rt.finalize();
    assert_eq!(stats::live_headers(), base);
}
