//! 全局订阅器安装测试：放在独立的测试二进制中，避免与 `#[traced_test]` 争抢进程级全局订阅器。

use spark_rpc::observability::{TracingError, install_tracing};

#[test]
fn existing_subscriber_is_never_replaced() {
    let _ = install_tracing();
    assert!(matches!(
        install_tracing(),
        Err(TracingError::SubscriberAlreadySet)
    ));
}
