//! Calling the facade before `init()` must fail fast rather than panic or
//! hang waiting on a connection that was never opened.

use qube::{Qube, QubeConfig, QubeError};

#[tokio::test]
async fn add_before_init_returns_not_initialized() {
    let qube = Qube::construct(QubeConfig::default());

    let result = qube.add("orders", "acct-1", b"hello".to_vec()).await;

    assert!(matches!(result, Err(QubeError::NotInitialized)));
}

#[tokio::test]
async fn get_status_before_init_returns_not_initialized() {
    let qube = Qube::construct(QubeConfig::default());

    let result = qube.get_status(1).await;

    assert!(matches!(result, Err(QubeError::NotInitialized)));
}

#[tokio::test]
async fn close_before_init_is_a_no_op() {
    let qube = Qube::construct(QubeConfig::default());

    assert!(qube.close().await.is_ok());
}
