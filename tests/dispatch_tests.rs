
use remoting_utils::*;
use rpcmux::protocol::{JsonProtocol, ProtocolFactory, TextProtocol};
use rpcmux::{Command, CommandProcessor, RemotingService, SpawnPool, TaskPool, command_code};
use std::sync::Arc;
use std::time::Duration;

fn service_with(code: i32, processor: Arc<TestProcessor>) -> Arc<RemotingService> {
    Arc::new(
        RemotingService::builder(test_config())
            .processor(code, processor, Arc::new(SpawnPool::new("test")))
            .build()
            .unwrap(),
    )
}

fn body_text(reply: &Command) -> String {
    TextProtocol.decode(reply.body()).unwrap()
}

#[tokio::test]
async fn test_success_reply_is_tagged_with_request_opaque() {
    let processor = TestProcessor::echo();
    let service = service_with(1, processor.clone());
    let (channel, mut writes) = recording();

    service
        .dispatch(&channel, Some(Command::request(1, 100).with_body("ping")))
        .await;

    let reply = next_write(&mut writes).await;
    assert!(reply.is_reply());
    assert_eq!(reply.opaque(), 100);
    assert_eq!(reply.code(), command_code::SUCCESS);
    assert_eq!(reply.body(), b"ping");
    assert!(eventually(|| processor.released() == 1, Duration::from_secs(1)).await);
    assert_eq!(processor.slots_in_use(), 0);
}

#[tokio::test]
async fn test_admission_refused_replies_system_busy() {
    let processor = TestProcessor::busy();
    let service = service_with(1, processor.clone());
    let (channel, mut writes) = recording();

    service
        .dispatch(&channel, Some(Command::request(1, 101)))
        .await;

    let reply = next_write(&mut writes).await;
    assert_eq!(reply.code(), command_code::SYSTEM_BUSY);
    assert_eq!(reply.opaque(), 101);
    assert!(reply.is_reply());
    assert_eq!(body_text(&reply), "system busy, start flow control for a while");
    assert_eq!(processor.processed(), 0);
    assert_eq!(processor.released(), 0);
    assert_eq!(service.stats().busy_rejections, 1);
}

#[tokio::test]
async fn test_processing_error_replies_system_error_and_releases_once() {
    let processor = TestProcessor::failing("disk on fire");
    let service = service_with(1, processor.clone());
    let (channel, mut writes) = recording();

    service
        .dispatch(&channel, Some(Command::request(1, 102)))
        .await;

    let reply = next_write(&mut writes).await;
    assert_eq!(reply.code(), command_code::SYSTEM_ERROR);
    assert_eq!(reply.opaque(), 102);
    assert!(body_text(&reply).contains("disk on fire"));
    assert!(eventually(|| processor.released() == 1, Duration::from_secs(1)).await);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(processor.released(), 1);
    assert_eq!(service.stats().processing_failures, 1);
}

#[tokio::test]
async fn test_processor_panic_replies_system_error() {
    let processor = TestProcessor::panicking();
    let service = service_with(1, processor.clone());
    let (channel, mut writes) = recording();

    service
        .dispatch(&channel, Some(Command::request(1, 103)))
        .await;

    let reply = next_write(&mut writes).await;
    assert_eq!(reply.code(), command_code::SYSTEM_ERROR);
    assert!(body_text(&reply).starts_with("panic: processor exploded"));
    assert!(eventually(|| processor.released() == 1, Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_unknown_code_without_default_is_not_supported() {
    let processor = TestProcessor::echo();
    let service = service_with(1, processor.clone());
    let (channel, mut writes) = recording();

    service
        .dispatch(&channel, Some(Command::request(99, 104)))
        .await;

    let reply = next_write(&mut writes).await;
    assert_eq!(reply.code(), command_code::COMMAND_CODE_NOT_SUPPORTED);
    assert_eq!(reply.opaque(), 104);
    assert_eq!(body_text(&reply), " command code 99 not supported");
    assert_eq!(processor.processed(), 0);
    assert_eq!(service.stats().unsupported, 1);
}

#[tokio::test]
async fn test_default_processor_handles_unregistered_codes() {
    let registered = TestProcessor::echo();
    let fallback = TestProcessor::echo();
    let service = Arc::new(
        RemotingService::builder(test_config())
            .processor(1, registered.clone(), Arc::new(SpawnPool::new("registered")))
            .default_processor(fallback.clone(), Arc::new(SpawnPool::new("default")))
            .build()
            .unwrap(),
    );
    let (channel, mut writes) = recording();

    service
        .dispatch(&channel, Some(Command::request(55, 105).with_body("x")))
        .await;

    let reply = next_write(&mut writes).await;
    assert_eq!(reply.code(), command_code::SUCCESS);
    assert_eq!(fallback.processed(), 1);
    assert_eq!(registered.processed(), 0);
}

#[tokio::test]
async fn test_pool_rejection_releases_slot_and_replies_busy() {
    let processor = TestProcessor::echo();
    let service = Arc::new(
        RemotingService::builder(test_config())
            .processor(1, processor.clone(), Arc::new(RejectingPool))
            .build()
            .unwrap(),
    );
    let (channel, mut writes) = recording();

    service
        .dispatch(&channel, Some(Command::request(1, 106)))
        .await;

    let reply = next_write(&mut writes).await;
    assert_eq!(reply.code(), command_code::SYSTEM_BUSY);
    assert_eq!(processor.processed(), 0);
    assert_eq!(processor.released(), 1);
    assert_eq!(processor.slots_in_use(), 0);
}

#[tokio::test]
async fn test_oneway_failure_writes_nothing() {
    let processor = TestProcessor::failing("ignored");
    let service = service_with(1, processor.clone());
    let (channel, mut writes) = recording();

    let mut request = Command::request(1, 107);
    request.set_oneway();
    service.dispatch(&channel, Some(request)).await;

    assert!(eventually(|| processor.released() == 1, Duration::from_secs(1)).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(writes.try_recv().is_err());
}

#[tokio::test]
async fn test_oneway_success_writes_nothing() {
    let processor = TestProcessor::echo();
    let service = service_with(1, processor.clone());
    let (channel, mut writes) = recording();

    let mut request = Command::request(1, 108);
    request.set_oneway();
    service.dispatch(&channel, Some(request)).await;

    assert!(eventually(|| processor.released() == 1, Duration::from_secs(1)).await);
    assert_eq!(processor.processed(), 1);
    assert!(writes.try_recv().is_err());
}

#[tokio::test]
async fn test_silent_processor_writes_nothing() {
    let processor = TestProcessor::silent();
    let service = service_with(1, processor.clone());
    let (channel, mut writes) = recording();

    service
        .dispatch(&channel, Some(Command::request(1, 109)))
        .await;

    assert!(eventually(|| processor.released() == 1, Duration::from_secs(1)).await);
    assert!(writes.try_recv().is_err());
}

#[tokio::test]
async fn test_malformed_frame_is_ignored() {
    let processor = TestProcessor::echo();
    let service = service_with(1, processor.clone());
    let (channel, mut writes) = recording();

    service.dispatch(&channel, None).await;

    assert_eq!(processor.processed(), 0);
    assert!(writes.try_recv().is_err());
}

#[tokio::test]
async fn test_status_reply_uses_request_protocol() {
    let processor = TestProcessor::busy();
    let service = service_with(1, processor.clone());
    let (channel, mut writes) = recording();

    service
        .dispatch(
            &channel,
            Some(Command::request(1, 110).with_protocol(JsonProtocol::ID)),
        )
        .await;

    let reply = next_write(&mut writes).await;
    assert_eq!(reply.protocol(), JsonProtocol::ID);
    assert_eq!(
        JsonProtocol.decode(reply.body()).unwrap(),
        "system busy, start flow control for a while"
    );
}

#[tokio::test]
async fn test_task_pool_saturation_keeps_slots_balanced() {
    let processor = TestProcessor::delayed_echo(Duration::from_millis(50));
    let pool = Arc::new(TaskPool::new("narrow", 1, 1));
    let service = Arc::new(
        RemotingService::builder(test_config())
            .processor(1, processor.clone(), pool)
            .build()
            .unwrap(),
    );
    let (channel, mut writes) = recording();

    for opaque in 0..8 {
        service
            .dispatch(&channel, Some(Command::request(1, 200 + opaque)))
            .await;
    }

    let mut success = 0;
    let mut busy = 0;
    for _ in 0..8 {
        match next_write(&mut writes).await.code() {
            command_code::SUCCESS => success += 1,
            command_code::SYSTEM_BUSY => busy += 1,
            other => panic!("unexpected code {other}"),
        }
    }
    assert!(success >= 1);
    assert!(busy >= 1);
    assert!(eventually(|| processor.slots_in_use() == 0, Duration::from_secs(2)).await);
    assert_eq!(processor.released(), 8);
}

#[tokio::test]
async fn test_gate_is_exercised_through_trait() {
    let processor = TestProcessor::echo();
    assert!(!processor.try_acquire_failure(Duration::from_millis(10)).await);
    assert_eq!(processor.slots_in_use(), 1);
    processor.release();
    assert_eq!(processor.slots_in_use(), 0);
}
