//! End-to-end exercises of the dispatch/completion engine against a
//! scripted transport.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use raidcore_common::{
    BlockQualifier, BlockStatus, EngineConfig, IoPriority, Opcode, Position, TransportStatus,
};
use raidcore_engine::{
    AlgorithmTag, BlockTransport, CompletionToken, DriveFault, FixedGeometry, FruCompletion,
    FruDescriptor, Iots, IotsOutcome, IotsParams, RaidContext, RaidKind, SiotsState,
};
use tokio::sync::oneshot;

/// Transport double: per-position scripted outcomes, optional completion
/// jitter, submission refusal, and a hold queue for cancellation tests.
#[derive(Default)]
struct MockTransport {
    scripts: Mutex<HashMap<Position, VecDeque<FruCompletion>>>,
    refuse_positions: Mutex<HashSet<Position>>,
    hold_all: AtomicBool,
    delay_completions: AtomicBool,
    pending: Mutex<Vec<(u64, Position, CompletionToken)>>,
    submissions: AtomicU32,
    cancels: AtomicU32,
    control_ops: Mutex<Vec<(Position, DriveFault)>>,
}

impl MockTransport {
    fn script(&self, position: Position, outcomes: impl IntoIterator<Item = FruCompletion>) {
        self.scripts
            .lock()
            .entry(position)
            .or_default()
            .extend(outcomes);
    }

    fn refuse(&self, position: Position) {
        self.refuse_positions.lock().insert(position);
    }

    fn outcome_for(&self, position: Position) -> FruCompletion {
        self.scripts
            .lock()
            .get_mut(&position)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(FruCompletion::success)
    }

    fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Complete everything held, with each position's scripted outcome.
    fn flush_pending(&self) {
        let held: Vec<_> = self.pending.lock().drain(..).collect();
        for (_, position, token) in held {
            token.complete(self.outcome_for(position));
        }
    }
}

impl BlockTransport for MockTransport {
    fn submit(&self, descriptor: FruDescriptor, token: CompletionToken) -> bool {
        if self.refuse_positions.lock().contains(&descriptor.position) {
            return false;
        }
        self.submissions.fetch_add(1, Ordering::SeqCst);
        if self.hold_all.load(Ordering::SeqCst) {
            self.pending
                .lock()
                .push((descriptor.submission_id, descriptor.position, token));
            return true;
        }
        let outcome = self.outcome_for(descriptor.position);
        if self.delay_completions.load(Ordering::SeqCst) {
            let jitter = Duration::from_millis(rand::random::<u64>() % 4);
            tokio::spawn(async move {
                tokio::time::sleep(jitter).await;
                token.complete(outcome);
            });
        } else {
            token.complete(outcome);
        }
        true
    }

    fn submit_control(
        &self,
        position: Position,
        fault: DriveFault,
        token: CompletionToken,
    ) -> bool {
        self.control_ops.lock().push((position, fault));
        token.complete(FruCompletion::success());
        true
    }

    fn cancel(&self, submission_id: u64) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        let entry = {
            let mut pending = self.pending.lock();
            pending
                .iter()
                .position(|(id, _, _)| *id == submission_id)
                .map(|i| pending.remove(i))
        };
        if let Some((_, _, token)) = entry {
            token.complete(FruCompletion::transport(TransportStatus::Canceled));
        }
    }
}

struct Harness {
    transport: Arc<MockTransport>,
    ctx: Arc<RaidContext>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn harness(width: u32, kind: RaidKind, config: EngineConfig) -> Harness {
    init_tracing();
    let transport = Arc::new(MockTransport::default());
    let geometry = Arc::new(FixedGeometry::new(width, kind).unwrap());
    let ctx = RaidContext::new(
        Arc::clone(&transport) as Arc<dyn BlockTransport>,
        geometry,
        config,
    )
    .unwrap();
    Harness { transport, ctx }
}

fn fast_retry_config() -> EngineConfig {
    EngineConfig {
        min_retry_delay: Duration::from_millis(10),
        max_retry_delay: Duration::from_millis(50),
        ..EngineConfig::default()
    }
}

impl Harness {
    fn make_iots(
        &self,
        opcode: Opcode,
        blocks: u64,
        monitor_op: bool,
    ) -> (Arc<Iots>, oneshot::Receiver<IotsOutcome>) {
        Iots::new(
            Arc::clone(&self.ctx),
            IotsParams {
                opcode,
                lba: 0x1000,
                blocks,
                priority: IoPriority::Normal,
                checksum_enabled: true,
                encryption_epoch: 0,
                monitor_op,
            },
        )
    }
}

/// Build one SIOTS covering `width` positions, 8 blocks each.
fn full_stripe_siots(
    iots: &Arc<Iots>,
    algorithm: AlgorithmTag,
    opcode: Opcode,
    width: u32,
) -> Arc<raidcore_engine::Siots> {
    let siots = iots
        .allocate_siots(algorithm, 0x1000, u64::from(width) * 8)
        .unwrap();
    for position in 0..width {
        siots
            .add_fruts(position, 0x1000 + u64::from(position) * 8, 8, opcode)
            .unwrap();
    }
    siots
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_completions_advance_once() {
    // Completions arrive with random jitter on racing tasks; the wave
    // must advance the state machine exactly once every time.
    for _ in 0..20 {
        let h = harness(5, RaidKind::Parity, EngineConfig::default());
        h.transport.delay_completions.store(true, Ordering::SeqCst);
        let (iots, rx) = h.make_iots(Opcode::Read, 40, false);
        let siots = full_stripe_siots(&iots, AlgorithmTag::Read, Opcode::Read, 5);
        siots.start().unwrap();
        let outcome = rx.await.unwrap();
        assert_eq!(outcome.status, BlockStatus::Success);
        assert_eq!(outcome.blocks_transferred, 40);
        assert_eq!(siots.wait_count(), 0);
        assert_eq!(siots.state(), SiotsState::Freed);
        assert_eq!(h.transport.submissions.load(Ordering::SeqCst), 5);
    }
}

#[tokio::test]
async fn test_refused_send_fires_no_completions() {
    let h = harness(5, RaidKind::Parity, EngineConfig::default());
    h.transport.refuse(0);
    let (iots, rx) = h.make_iots(Opcode::Read, 40, false);
    let siots = full_stripe_siots(&iots, AlgorithmTag::Read, Opcode::Read, 5);
    siots.start().unwrap();
    // The chain stops at the first refusal and the wave terminates
    // through the unexpected-error path without a single transport
    // completion.
    let outcome = rx.await.unwrap();
    assert_eq!(outcome.status, BlockStatus::InvalidRequest);
    assert_eq!(outcome.qualifier, BlockQualifier::UnexpectedError);
    assert_eq!(h.transport.submissions.load(Ordering::SeqCst), 0);
    assert_eq!(outcome.blocks_transferred, 0);
}

#[tokio::test]
async fn test_retryable_wave_retries_as_unit() {
    let h = harness(5, RaidKind::Parity, fast_retry_config());
    // Positions 1 and 3 fail retryably once, then succeed. The suggested
    // wait is far above the clamp window.
    for position in [1u32, 3] {
        h.transport.script(
            position,
            [
                FruCompletion::block(BlockStatus::IoFailed, BlockQualifier::RetryPossible)
                    .with_retry_wait(Duration::from_secs(10)),
                FruCompletion::success(),
            ],
        );
    }
    let (iots, rx) = h.make_iots(Opcode::Read, 40, false);
    let siots = full_stripe_siots(&iots, AlgorithmTag::Read, Opcode::Read, 5);
    let started = Instant::now();
    siots.start().unwrap();
    // Inside the retry delay window: the retry wave is armed with a wait
    // budget of exactly the two failed positions.
    assert_eq!(siots.wait_count(), 2);
    assert_eq!(siots.retry_count(), 1);
    let outcome = rx.await.unwrap();
    let elapsed = started.elapsed();
    assert_eq!(outcome.status, BlockStatus::Success);
    // Delay was clamped into [10ms, 50ms].
    assert!(elapsed >= Duration::from_millis(10), "elapsed {elapsed:?}");
    assert_eq!(siots.fruts_retry_count(1), 1);
    assert_eq!(siots.fruts_retry_count(3), 1);
    assert_eq!(siots.fruts_retry_count(0), 0);
    // 5 initial sends + 2 resends.
    assert_eq!(h.transport.submissions.load(Ordering::SeqCst), 7);
    assert!(siots.degraded_positions().is_empty());
}

#[tokio::test]
async fn test_retry_delay_ignores_non_retryable_suggestions() {
    let config = EngineConfig {
        min_retry_delay: Duration::from_millis(10),
        max_retry_delay: Duration::from_secs(5),
        ..EngineConfig::default()
    };
    let h = harness(5, RaidKind::Parity, config);
    // A clean success that still carries a (stale) retry suggestion.
    h.transport.script(
        0,
        [FruCompletion::success().with_retry_wait(Duration::from_secs(4))],
    );
    // The only retryable entry suggests nothing, so the wave should go
    // out after the minimum delay, not the stale four seconds.
    h.transport.script(
        2,
        [
            FruCompletion::block(BlockStatus::IoFailed, BlockQualifier::RetryPossible),
            FruCompletion::success(),
        ],
    );
    let (iots, rx) = h.make_iots(Opcode::Read, 40, false);
    let siots = full_stripe_siots(&iots, AlgorithmTag::Read, Opcode::Read, 5);
    let started = Instant::now();
    siots.start().unwrap();
    let outcome = rx.await.unwrap();
    assert_eq!(outcome.status, BlockStatus::Success);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(siots.retry_count(), 1);
}

#[tokio::test]
async fn test_dead_positions_degrade_and_finish_dead() {
    let h = harness(5, RaidKind::Parity, EngineConfig::default());
    for position in [1u32, 3] {
        h.transport
            .script(position, [FruCompletion::transport(TransportStatus::Dead)]);
    }
    let (iots, rx) = h.make_iots(Opcode::Read, 40, false);
    let siots = full_stripe_siots(&iots, AlgorithmTag::Read, Opcode::Read, 5);
    siots.start().unwrap();
    let outcome = rx.await.unwrap();
    // Dead positions are never retried: the SIOTS finishes retryable-
    // from-above once all five completions are in.
    assert_eq!(outcome.status, BlockStatus::IoFailed);
    assert_eq!(outcome.qualifier, BlockQualifier::RetryPossible);
    let degraded = siots.degraded_positions();
    assert!(degraded.contains(1));
    assert!(degraded.contains(3));
    assert_eq!(degraded.count(), 2);
    assert_eq!(h.transport.submissions.load(Ordering::SeqCst), 5);
    assert_eq!(siots.retry_count(), 0);
}

#[tokio::test]
async fn test_three_dead_positions_is_invalid_request() {
    let h = harness(5, RaidKind::Parity, EngineConfig::default());
    for position in [0u32, 2, 4] {
        h.transport
            .script(position, [FruCompletion::transport(TransportStatus::Dead)]);
    }
    let (iots, rx) = h.make_iots(Opcode::Read, 40, false);
    let siots = full_stripe_siots(&iots, AlgorithmTag::Read, Opcode::Read, 5);
    siots.start().unwrap();
    let outcome = rx.await.unwrap();
    assert_eq!(outcome.status, BlockStatus::InvalidRequest);
    assert_eq!(outcome.qualifier, BlockQualifier::TooManyDeadPositions);
}

#[tokio::test]
async fn test_worst_precedence_survives_later_siots() {
    let h = harness(5, RaidKind::Parity, EngineConfig::default());
    // First sub-request hits a hard media error.
    h.transport.script(
        2,
        [FruCompletion::block(BlockStatus::MediaError, BlockQualifier::DataLost)
            .with_media_error_lba(0x1012)],
    );
    let (iots, rx) = h.make_iots(Opcode::Read, 80, false);
    let first = full_stripe_siots(&iots, AlgorithmTag::Read, Opcode::Read, 5);
    let second = iots.allocate_siots(AlgorithmTag::Read, 0x2000, 40).unwrap();
    for position in 0..5u32 {
        second
            .add_fruts(position, 0x2000, 8, Opcode::Read)
            .unwrap();
    }
    first.start().unwrap();
    assert_eq!(
        iots.status(),
        (BlockStatus::MediaError, BlockQualifier::DataLost)
    );
    // Second wave gets aborted on one position; the worse status from
    // the first wave must survive the later merge.
    h.transport.script(
        3,
        [FruCompletion::block(
            BlockStatus::RequestAborted,
            BlockQualifier::ClientAborted,
        )],
    );
    second.start().unwrap();
    let outcome = rx.await.unwrap();
    // MEDIA_ERROR outranks ABORTED regardless of finish order.
    assert_eq!(outcome.status, BlockStatus::MediaError);
    assert_eq!(outcome.qualifier, BlockQualifier::DataLost);
    assert_eq!(first.media_error_lba(), Some(0x1012));
}

#[tokio::test]
async fn test_abort_cancels_outstanding_reads_once() {
    let h = harness(5, RaidKind::Parity, EngineConfig::default());
    h.transport.hold_all.store(true, Ordering::SeqCst);
    let (iots, rx) = h.make_iots(Opcode::Read, 40, false);
    let siots = full_stripe_siots(&iots, AlgorithmTag::Read, Opcode::Read, 5);
    siots.start().unwrap();
    assert_eq!(h.transport.pending_count(), 5);
    iots.abort();
    let outcome = rx.await.unwrap();
    assert_eq!(outcome.status, BlockStatus::RequestAborted);
    assert_eq!(outcome.qualifier, BlockQualifier::ClientAborted);
    assert_eq!(h.transport.cancels.load(Ordering::SeqCst), 5);
    // A second abort finds nothing outstanding and nothing to re-flag.
    iots.abort();
    assert_eq!(h.transport.cancels.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_abort_exempts_writes_on_redundant_geometry() {
    let h = harness(5, RaidKind::Parity, EngineConfig::default());
    h.transport.hold_all.store(true, Ordering::SeqCst);
    let (iots, rx) = h.make_iots(Opcode::Write, 40, false);
    let siots = full_stripe_siots(&iots, AlgorithmTag::Write, Opcode::Write, 5);
    siots.start().unwrap();
    iots.abort();
    // Cancelling a media-modifying request mid-flight could leave the
    // stripe inconsistent; nothing may be cancelled here.
    assert_eq!(h.transport.cancels.load(Ordering::SeqCst), 0);
    assert_eq!(h.transport.pending_count(), 5);
    // Let the writes land; the abort then surfaces through the rollup.
    // A write that reached the drive reports the plain client abort.
    h.transport.flush_pending();
    let outcome = rx.await.unwrap();
    assert_eq!(outcome.status, BlockStatus::RequestAborted);
    assert_eq!(outcome.qualifier, BlockQualifier::ClientAborted);
    assert_eq!(outcome.blocks_transferred, 0);
}

#[tokio::test]
async fn test_nested_siots_wakes_parent_exactly_once() {
    let h = harness(5, RaidKind::Parity, EngineConfig::default());
    let (iots, rx) = h.make_iots(Opcode::Verify, 40, false);
    let parent = iots
        .allocate_siots(AlgorithmTag::DegradedVerify, 0x1000, 40)
        .unwrap();
    let child = parent
        .allocate_nested(AlgorithmTag::DegradedVerify, 0x1000, 40)
        .unwrap();
    for position in 0..5u32 {
        child.add_fruts(position, 0x1000, 8, Opcode::Verify).unwrap();
    }
    assert_eq!(parent.wait_for_nested().unwrap(), 1);
    assert_eq!(parent.wait_count(), 1);
    child.start().unwrap();
    let outcome = rx.await.unwrap();
    assert_eq!(outcome.status, BlockStatus::Success);
    assert_eq!(parent.wait_count(), 0);
    assert_eq!(parent.wake_count(), 1);
    assert_eq!(child.state(), SiotsState::Freed);
    assert_eq!(parent.state(), SiotsState::Freed);
}

#[tokio::test]
async fn test_nested_degraded_positions_climb_to_parent() {
    let h = harness(5, RaidKind::Parity, EngineConfig::default());
    h.transport
        .script(4, [FruCompletion::transport(TransportStatus::Dead)]);
    let (iots, rx) = h.make_iots(Opcode::Verify, 40, false);
    let parent = iots
        .allocate_siots(AlgorithmTag::DegradedVerify, 0x1000, 40)
        .unwrap();
    let child = parent
        .allocate_nested(AlgorithmTag::DegradedVerify, 0x1000, 40)
        .unwrap();
    for position in 0..5u32 {
        child.add_fruts(position, 0x1000, 8, Opcode::Verify).unwrap();
    }
    parent.wait_for_nested().unwrap();
    child.start().unwrap();
    let outcome = rx.await.unwrap();
    // Child finished dead; parent inherited both the status and the
    // degraded position before finishing itself.
    assert_eq!(outcome.status, BlockStatus::IoFailed);
    assert_eq!(outcome.qualifier, BlockQualifier::RetryPossible);
    assert!(parent.degraded_positions().contains(4));
}

#[tokio::test]
async fn test_completion_waits_for_outstanding_siblings() {
    let h = harness(5, RaidKind::Parity, EngineConfig::default());
    let (iots, mut rx) = h.make_iots(Opcode::Read, 40, false);
    let reader = full_stripe_siots(&iots, AlgorithmTag::Read, Opcode::Read, 5);
    // A verify pass over the same range: transfers nothing extra but
    // keeps the request outstanding.
    let verifier = iots.allocate_siots(AlgorithmTag::Verify, 0x1000, 40).unwrap();
    for position in 0..5u32 {
        verifier
            .add_fruts(position, 0x1000, 8, Opcode::Verify)
            .unwrap();
    }
    reader.start().unwrap();
    // The whole transfer landed, but the sibling is still in flight:
    // the outcome must not be visible yet.
    assert_eq!(iots.blocks_transferred(), 40);
    assert_eq!(iots.outstanding_requests(), 1);
    assert!(rx.try_recv().is_err());
    assert!(!iots.is_complete());
    verifier.start().unwrap();
    let outcome = rx.await.unwrap();
    assert_eq!(outcome.status, BlockStatus::Success);
    assert_eq!(iots.outstanding_requests(), 0);
}

#[tokio::test]
async fn test_timeout_notifies_drive_then_expires() {
    let h = harness(5, RaidKind::Parity, EngineConfig::default());
    h.transport.script(
        2,
        [FruCompletion::block(BlockStatus::Timeout, BlockQualifier::None)],
    );
    let (iots, rx) = h.make_iots(Opcode::Read, 40, false);
    let siots = full_stripe_siots(&iots, AlgorithmTag::Read, Opcode::Read, 5);
    siots.start().unwrap();
    let outcome = rx.await.unwrap();
    assert_eq!(outcome.status, BlockStatus::Timeout);
    assert_eq!(outcome.qualifier, BlockQualifier::None);
    assert_eq!(
        h.transport.control_ops.lock().as_slice(),
        &[(2, DriveFault::Timeout)]
    );
    assert_eq!(siots.wake_count(), 1);
}

#[tokio::test]
async fn test_monitor_health_cycle_waits_for_continue() {
    let h = harness(5, RaidKind::Parity, EngineConfig::default());
    h.transport.script(
        1,
        [FruCompletion::block(BlockStatus::Timeout, BlockQualifier::None)],
    );
    let (iots, mut rx) = h.make_iots(Opcode::Read, 40, true);
    let siots = full_stripe_siots(&iots, AlgorithmTag::Read, Opcode::Read, 5);
    siots.start().unwrap();
    // Monitor path: the health cycle completes but must not finish the
    // sub-request until the monitor kicks it.
    assert!(siots.is_waiting_shutdown_continue());
    assert!(rx.try_recv().is_err());
    siots.resume();
    let outcome = rx.await.unwrap();
    assert_eq!(outcome.status, BlockStatus::Timeout);
    assert!(iots.is_complete());
    assert!(iots.is_monitor_op());
}

#[tokio::test]
async fn test_crc_errors_notify_drive_and_report_media_error() {
    let h = harness(5, RaidKind::Parity, EngineConfig::default());
    h.transport.script(
        0,
        [FruCompletion::block(BlockStatus::IoFailed, BlockQualifier::CrcError)],
    );
    let (iots, rx) = h.make_iots(Opcode::Read, 40, false);
    let siots = full_stripe_siots(&iots, AlgorithmTag::Read, Opcode::Read, 5);
    siots.start().unwrap();
    let outcome = rx.await.unwrap();
    assert_eq!(outcome.status, BlockStatus::MediaError);
    assert_eq!(outcome.qualifier, BlockQualifier::DataLost);
    assert_eq!(
        h.transport.control_ops.lock().as_slice(),
        &[(0, DriveFault::Crc)]
    );
}

#[tokio::test]
async fn test_all_zeroed_wave_reports_zeroed() {
    let h = harness(4, RaidKind::Striper, EngineConfig::default());
    for position in 0..4u32 {
        h.transport.script(
            position,
            [FruCompletion::block(BlockStatus::Success, BlockQualifier::Zeroed)],
        );
    }
    let (iots, rx) = h.make_iots(Opcode::CheckZeroed, 32, false);
    let siots = full_stripe_siots(&iots, AlgorithmTag::Read, Opcode::CheckZeroed, 4);
    siots.start().unwrap();
    let outcome = rx.await.unwrap();
    assert_eq!(outcome.status, BlockStatus::Success);
    assert_eq!(outcome.qualifier, BlockQualifier::Zeroed);
}

#[tokio::test]
async fn test_complete_immediate_fast_path() {
    let h = harness(5, RaidKind::Parity, EngineConfig::default());
    let (iots, rx) = h.make_iots(Opcode::Read, 40, false);
    let siots = full_stripe_siots(&iots, AlgorithmTag::Read, Opcode::Read, 5);
    siots.set_complete_immediate();
    siots.start().unwrap();
    let outcome = rx.await.unwrap();
    assert_eq!(outcome.status, BlockStatus::Success);
    assert_eq!(outcome.blocks_transferred, 40);
}

#[tokio::test]
async fn test_waiter_is_resumed_after_finish() {
    let h = harness(5, RaidKind::Parity, EngineConfig::default());
    let (iots, rx) = h.make_iots(Opcode::Read, 80, false);
    let holder = full_stripe_siots(&iots, AlgorithmTag::Read, Opcode::Read, 5);
    let waiter = iots.allocate_siots(AlgorithmTag::Read, 0x2000, 40).unwrap();
    for position in 0..5u32 {
        waiter.add_fruts(position, 0x2000, 8, Opcode::Read).unwrap();
    }
    holder.enqueue_waiter(Arc::clone(&waiter)).unwrap();
    assert_eq!(waiter.state(), SiotsState::WaitingLock);
    // Finishing the holder hands the range to the waiter, which then
    // dispatches and completes the request.
    holder.start().unwrap();
    let outcome = rx.await.unwrap();
    assert_eq!(outcome.status, BlockStatus::Success);
    assert_eq!(outcome.blocks_transferred, 80);
    assert_eq!(waiter.wake_count(), 1);
    assert_eq!(waiter.state(), SiotsState::Freed);
}

#[tokio::test]
async fn test_busy_transport_is_retried() {
    let h = harness(3, RaidKind::Mirror, fast_retry_config());
    h.transport.script(
        1,
        [
            FruCompletion::transport(TransportStatus::Busy),
            FruCompletion::success(),
        ],
    );
    let (iots, rx) = h.make_iots(Opcode::Read, 24, false);
    let siots = full_stripe_siots(&iots, AlgorithmTag::Read, Opcode::Read, 3);
    siots.start().unwrap();
    let outcome = rx.await.unwrap();
    assert_eq!(outcome.status, BlockStatus::Success);
    assert_eq!(siots.retry_count(), 1);
    assert_eq!(h.transport.submissions.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_resources_released_before_completion_visible() {
    let h = harness(5, RaidKind::Parity, EngineConfig::default());
    let (iots, rx) = h.make_iots(Opcode::Read, 40, false);
    let siots = full_stripe_siots(&iots, AlgorithmTag::Read, Opcode::Read, 5);
    siots.allocate_buffers(5, 4096);
    assert_eq!(siots.buffer_count(), 5);
    siots.start().unwrap();
    rx.await.unwrap();
    assert_eq!(siots.buffer_count(), 0);
    assert_eq!(iots.outstanding_requests(), 0);
    assert_eq!(iots.active_siots(), 0);
}
