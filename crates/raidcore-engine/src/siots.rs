//! SIOTS: one sub-request of a logical I/O, owning a FRUTS arena and the
//! completion state machine.
//!
//! Concurrency discipline: the atomic `wait_count` is the sole
//! forward-progress mechanism. Every completing unit decrements it exactly
//! once and the task observing the post-decrement zero is the unique task
//! allowed to drive the state machine. The SIOTS mutex guards only
//! companion state (flags, degraded set, arena, waiter queue) and is never
//! held across a transport call or an await point. Lock order: IOTS before
//! SIOTS, parent SIOTS before child SIOTS, never the reverse.
//!
//! A finished SIOTS transitions to [`SiotsState::Freed`] exactly once;
//! every entry point checks for it first and any operation against a freed
//! SIOTS is logged as critical and returns [`SiotsStatus::Done`] without
//! making progress.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use raidcore_common::{
    BlockCount, BlockQualifier, BlockStatus, Error, Lba, Opcode, Position, PositionSet, Result,
};
use tracing::{debug, error, warn};

use crate::context::RaidContext;
use crate::eboard::{ClassifyContext, FruEboard};
use crate::fruts::{FruRequest, FrutsState, SlotTag};
use crate::integrity::IntegrityStatus;
use crate::iots::Iots;
use crate::lock::LockRange;
use crate::transport::{CompletionToken, DriveFault, FruDescriptor};

/// First and second degraded position are tracked; a third distinct dead
/// position means the persisted degraded state is corrupt.
pub const MAX_DEGRADED_POSITIONS: u32 = 2;

/// What a SIOTS was generated to do. The engine only consults the broad
/// class; per-algorithm data movement lives with the embedding object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmTag {
    Read,
    Write,
    Verify,
    Zero,
    RebuildRead,
    DegradedVerify,
    DegradedRecoveryVerify,
}

impl AlgorithmTag {
    /// Degraded-verify parents gate their wakeup on a wait count spanning
    /// several nested children; everything else wakes per child.
    #[must_use]
    pub fn waits_on_nested_count(self) -> bool {
        matches!(self, Self::DegradedVerify | Self::DegradedRecoveryVerify)
    }

    #[must_use]
    pub fn is_write_class(self) -> bool {
        matches!(self, Self::Write | Self::Zero)
    }

    #[must_use]
    pub fn is_read_class(self) -> bool {
        matches!(self, Self::Read | Self::RebuildRead)
    }
}

/// What a state-machine entry did with the invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiotsStatus {
    Executing,
    Waiting,
    Done,
}

/// Tagged state. `Freed` is the trap variant: reached only through the
/// finishing transition, checked loudly everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiotsState {
    Start,
    /// A wave of per-drive requests is in flight.
    Outstanding,
    WaitingLock,
    WaitingNested,
    /// A health-notification cycle is in flight; on zero the SIOTS
    /// resumes with the stored terminal.
    HealthNotify {
        resume_status: BlockStatus,
        resume_qualifier: BlockQualifier,
    },
    Freed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SiotsFlags {
    /// At least one completion this wave was not clean.
    pub error_pending: bool,
    /// Error-free waves may complete without a full evaluation pass.
    pub complete_immediate: bool,
    /// A media-modifying request reached the drive.
    pub write_started: bool,
    /// Monitor-path health cycle finished; the monitor kicks the SIOTS
    /// with [`Siots::resume`] when it is ready.
    pub waiting_shutdown_continue: bool,
    /// Status was copied from a parent rather than earned here.
    pub error_inherited: bool,
}

struct SiotsInner {
    state: SiotsState,
    flags: SiotsFlags,
    status: BlockStatus,
    qualifier: BlockQualifier,
    retry_count: u32,
    degraded: PositionSet,
    fruts: Vec<FruRequest>,
    chain: Vec<usize>,
    nested: Vec<Arc<Siots>>,
    waiters: VecDeque<Arc<Siots>>,
    buffers: Vec<Box<[u8]>>,
    media_error_lba: Option<Lba>,
}

pub struct Siots {
    algorithm: AlgorithmTag,
    lba: Lba,
    blocks: BlockCount,
    monitor_op: bool,
    ctx: Arc<RaidContext>,
    iots: Weak<Iots>,
    parent: Option<Weak<Siots>>,
    wait_count: AtomicU64,
    wake_count: AtomicU32,
    inner: Mutex<SiotsInner>,
}

impl Siots {
    pub(crate) fn new(
        ctx: Arc<RaidContext>,
        iots: Weak<Iots>,
        parent: Option<Weak<Siots>>,
        algorithm: AlgorithmTag,
        lba: Lba,
        blocks: BlockCount,
        monitor_op: bool,
    ) -> Result<Arc<Self>> {
        let width = ctx.geometry.width();
        Ok(Arc::new(Self {
            algorithm,
            lba,
            blocks,
            monitor_op,
            ctx,
            iots,
            parent,
            wait_count: AtomicU64::new(0),
            wake_count: AtomicU32::new(0),
            inner: Mutex::new(SiotsInner {
                state: SiotsState::Start,
                flags: SiotsFlags::default(),
                status: BlockStatus::Invalid,
                qualifier: BlockQualifier::Invalid,
                retry_count: 0,
                degraded: PositionSet::new(width)?,
                fruts: Vec::new(),
                chain: Vec::new(),
                nested: Vec::new(),
                waiters: VecDeque::new(),
                buffers: Vec::new(),
                media_error_lba: None,
            }),
        }))
    }

    fn freed(inner: &SiotsInner, op: &str) -> bool {
        if inner.state == SiotsState::Freed {
            error!(op, "operation on a freed sub-request");
            return true;
        }
        false
    }

    // --- accessors -------------------------------------------------------

    #[must_use]
    pub fn algorithm(&self) -> AlgorithmTag {
        self.algorithm
    }

    #[must_use]
    pub fn lba(&self) -> Lba {
        self.lba
    }

    #[must_use]
    pub fn blocks(&self) -> BlockCount {
        self.blocks
    }

    #[must_use]
    pub fn state(&self) -> SiotsState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn status(&self) -> (BlockStatus, BlockQualifier) {
        let inner = self.inner.lock();
        (inner.status, inner.qualifier)
    }

    #[must_use]
    pub fn wait_count(&self) -> u64 {
        self.wait_count.load(Ordering::SeqCst)
    }

    /// Times this SIOTS was woken by a waiter/nested/usurper resume.
    #[must_use]
    pub fn wake_count(&self) -> u32 {
        self.wake_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.inner.lock().retry_count
    }

    #[must_use]
    pub fn degraded_positions(&self) -> PositionSet {
        self.inner.lock().degraded
    }

    #[must_use]
    pub fn media_error_lba(&self) -> Option<Lba> {
        self.inner.lock().media_error_lba
    }

    #[must_use]
    pub fn is_waiting_shutdown_continue(&self) -> bool {
        self.inner.lock().flags.waiting_shutdown_continue
    }

    #[must_use]
    pub fn buffer_count(&self) -> usize {
        self.inner.lock().buffers.len()
    }

    #[must_use]
    pub fn fruts_retry_count(&self, index: usize) -> u32 {
        self.inner.lock().fruts[index].retry_count()
    }

    #[must_use]
    pub fn fruts_state(&self, index: usize) -> FrutsState {
        self.inner.lock().fruts[index].state()
    }

    // --- setup -----------------------------------------------------------

    /// Claim an arena slot and initialize it. Returns the arena index.
    pub fn add_fruts(
        &self,
        position: Position,
        lba: Lba,
        blocks: BlockCount,
        opcode: Opcode,
    ) -> Result<usize> {
        let mut inner = self.inner.lock();
        if Self::freed(&inner, "add_fruts") {
            return Err(Error::logic_fault("add_fruts on a freed sub-request"));
        }
        let mut fruts = FruRequest::new(SlotTag::FruRequest);
        fruts.initialize(position, lba, blocks, opcode)?;
        let index = inner.fruts.len();
        inner.fruts.push(fruts);
        inner.chain.push(index);
        Ok(index)
    }

    /// Attach scratch buffers. Freed with everything else in the
    /// finishing transition, before counters are touched.
    pub fn allocate_buffers(&self, count: usize, size: usize) {
        let mut inner = self.inner.lock();
        for _ in 0..count {
            inner.buffers.push(vec![0u8; size].into_boxed_slice());
        }
    }

    /// Arm the error-free fast path: a wave completing with no error
    /// pending finishes successfully without a full evaluation.
    pub fn set_complete_immediate(&self) {
        self.inner.lock().flags.complete_immediate = true;
    }

    /// Note that a media-modifying request reached a drive; affects the
    /// abort qualifier.
    pub fn mark_write_started(&self) {
        self.inner.lock().flags.write_started = true;
    }

    /// Mark this SIOTS's recorded error as inherited from a parent.
    pub fn set_error_inherited(&self) {
        self.inner.lock().flags.error_inherited = true;
    }

    /// The degraded set grows for the lifetime of a request; the only way
    /// down is this explicit, logged reset.
    pub fn reset_degraded(&self) {
        let mut inner = self.inner.lock();
        warn!(degraded = %inner.degraded, "explicit degraded-position reset");
        inner.degraded.clear();
    }

    /// Spawn a nested SIOTS under this one.
    pub fn allocate_nested(
        self: &Arc<Self>,
        algorithm: AlgorithmTag,
        lba: Lba,
        blocks: BlockCount,
    ) -> Result<Arc<Self>> {
        let child = Self::new(
            Arc::clone(&self.ctx),
            self.iots.clone(),
            Some(Arc::downgrade(self)),
            algorithm,
            lba,
            blocks,
            self.monitor_op,
        )?;
        let mut inner = self.inner.lock();
        if Self::freed(&inner, "allocate_nested") {
            return Err(Error::logic_fault("allocate_nested on a freed sub-request"));
        }
        inner.nested.push(Arc::clone(&child));
        Ok(child)
    }

    /// Park this SIOTS until every nested child has finished.
    pub fn wait_for_nested(&self) -> Result<u64> {
        let mut inner = self.inner.lock();
        if Self::freed(&inner, "wait_for_nested") {
            return Err(Error::logic_fault("wait_for_nested on a freed sub-request"));
        }
        let count = inner.nested.len() as u64;
        if count == 0 {
            return Err(Error::invalid_argument("no nested sub-requests to wait on"));
        }
        inner.state = SiotsState::WaitingNested;
        self.wait_count.store(count, Ordering::SeqCst);
        Ok(count)
    }

    /// Queue another SIOTS to be woken when this one finishes and
    /// releases its range.
    pub fn enqueue_waiter(&self, waiter: Arc<Self>) -> Result<()> {
        {
            let mut w = waiter.inner.lock();
            if Self::freed(&w, "enqueue_waiter") {
                return Err(Error::logic_fault("waiter is already freed"));
            }
            w.state = SiotsState::WaitingLock;
        }
        let mut inner = self.inner.lock();
        if Self::freed(&inner, "enqueue_waiter") {
            return Err(Error::logic_fault("enqueue_waiter on a freed sub-request"));
        }
        inner.waiters.push_back(waiter);
        Ok(())
    }

    // --- dispatch --------------------------------------------------------

    /// Kick off the first wave: wait_count becomes the number of sendable
    /// requests and the chain is dispatched against it.
    pub fn start(self: &Arc<Self>) -> Result<SiotsStatus> {
        let budget = {
            let mut inner = self.inner.lock();
            if Self::freed(&inner, "start") {
                return Err(Error::logic_fault("start on a freed sub-request"));
            }
            let sendable = inner
                .chain
                .iter()
                .filter(|&&i| !inner.fruts[i].is_nop())
                .count() as u64;
            if sendable == 0 {
                return Err(Error::invalid_argument("no sendable per-drive requests"));
            }
            inner.state = SiotsState::Outstanding;
            self.wait_count.store(sendable, Ordering::SeqCst);
            sendable
        };
        self.send_chain(budget)?;
        Ok(SiotsStatus::Waiting)
    }

    /// Send up to `max_to_send` non-NOP chain entries in order, stopping
    /// at the first failure. The caller supplies the budget from the
    /// current wait count; finding more sendable entries than the budget
    /// is a defect, not a retry case.
    pub fn send_chain(self: &Arc<Self>, max_to_send: u64) -> Result<u64> {
        let sendable: Vec<usize> = {
            let inner = self.inner.lock();
            if Self::freed(&inner, "send_chain") {
                return Err(Error::logic_fault("send_chain on a freed sub-request"));
            }
            inner
                .chain
                .iter()
                .copied()
                .filter(|&i| {
                    !inner.fruts[i].is_nop() && inner.fruts[i].state() == FrutsState::Initialized
                })
                .collect()
        };
        if sendable.len() as u64 > max_to_send {
            error!(
                sendable = sendable.len(),
                max_to_send, "chain holds more sendable requests than the wait budget"
            );
            return Err(Error::logic_fault(
                "send budget smaller than the sendable chain",
            ));
        }
        let mut sent = 0u64;
        for (i, &index) in sendable.iter().enumerate() {
            if self.send_one(index) {
                sent += 1;
            } else {
                // First failure stops the chain. The failed entry was
                // completed locally with a generic failure; entries never
                // sent get the same treatment so the wave still
                // terminates, through the unexpected-error path.
                let unsent = &sendable[i + 1..];
                {
                    let mut inner = self.inner.lock();
                    for &u in unsent {
                        inner.fruts[u].mark_send_failed();
                    }
                }
                self.account_completed(1 + unsent.len() as u64);
                break;
            }
        }
        Ok(sent)
    }

    /// Send one arena entry. Returns false when no completion will ever
    /// fire for it; the entry is then already completed locally with a
    /// generic failure and the caller fixes the wait accounting.
    fn send_one(self: &Arc<Self>, index: usize) -> bool {
        let Some(iots) = self.iots.upgrade() else {
            error!(index, "send with no owning request");
            self.inner.lock().fruts[index].mark_send_failed();
            return false;
        };
        let submission_id = self.ctx.submission_ids.next();
        let descriptor = {
            let mut inner = self.inner.lock();
            if Self::freed(&inner, "send_one") {
                return false;
            }
            let width = self.ctx.geometry.width();
            let max_blocks = self.ctx.config.max_blocks_per_drive;
            let fruts = &mut inner.fruts[index];
            if let Err(err) = fruts.validate_for_send(width, max_blocks) {
                warn!(index, %err, "per-drive request failed send validation");
                fruts.mark_send_failed();
                return false;
            }
            let descriptor = FruDescriptor {
                position: fruts.position(),
                lba: fruts.lba() + self.ctx.geometry.position_offset(fruts.position()),
                blocks: fruts.blocks(),
                opcode: fruts.opcode(),
                priority: iots.priority(),
                checksum_enabled: iots.checksum_enabled(),
                encryption_epoch: iots.encryption_epoch(),
                monitor_op: self.monitor_op,
                submission_id,
            };
            // Mark before the transport sees it; the completion can race
            // the return from submit.
            fruts.mark_sent(submission_id);
            if descriptor.opcode.is_media_modify() {
                inner.flags.write_started = true;
            }
            descriptor
        };
        let position = descriptor.position;
        let siots = Arc::downgrade(self);
        let token = CompletionToken::new(submission_id, move |completion| {
            if let Some(s) = siots.upgrade() {
                s.fruts_complete(index, &completion);
            }
        });
        debug!(position, submission_id, opcode = %descriptor.opcode, "dispatching per-drive request");
        if self.ctx.transport.submit(descriptor, token) {
            true
        } else {
            warn!(position, submission_id, "transport refused submission");
            self.inner.lock().fruts[index].mark_send_failed();
            false
        }
    }

    // --- completion ------------------------------------------------------

    /// Target of the completion token for one per-drive request.
    pub(crate) fn fruts_complete(
        self: &Arc<Self>,
        index: usize,
        completion: &crate::transport::FruCompletion,
    ) {
        let fast = {
            let mut inner = self.inner.lock();
            if Self::freed(&inner, "fruts_complete") {
                return;
            }
            let wait = self.wait_count.load(Ordering::SeqCst);
            let width = u64::from(self.ctx.geometry.width());
            if wait == 0 || wait > width * 2 {
                warn!(wait, width, "implausible wait count at completion");
            }
            let fruts = &mut inner.fruts[index];
            if fruts.state() != FrutsState::Outstanding {
                error!(
                    index,
                    state = ?fruts.state(),
                    "completion for a request that is not outstanding"
                );
                return;
            }
            fruts.record_completion(completion);
            debug!(
                position = fruts.position(),
                transport = ?completion.transport_status,
                status = ?completion.block_status,
                "per-drive completion"
            );
            if !inner.fruts[index].is_clean() {
                if inner.media_error_lba.is_none() {
                    let fallback = inner.fruts[index].lba();
                    inner.media_error_lba =
                        Some(completion.media_error_lba.unwrap_or(fallback));
                }
                inner.flags.error_pending = true;
            }
            inner.flags.complete_immediate && !inner.flags.error_pending
        };
        match self.decrement_wait(1) {
            None => {}
            Some(false) => {}
            Some(true) => {
                if fast {
                    self.finish_success();
                } else {
                    self.evaluate();
                }
            }
        }
    }

    /// Decrement the wait count by `n`. Returns Some(true) when this call
    /// observed zero, None on underflow (a logic fault, logged).
    fn decrement_wait(&self, n: u64) -> Option<bool> {
        match self
            .wait_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(n))
        {
            Err(_) => {
                error!(n, "wait count underflow");
                None
            }
            Ok(previous) => Some(previous == n),
        }
    }

    fn account_completed(self: &Arc<Self>, n: u64) {
        if self.decrement_wait(n) == Some(true) {
            self.evaluate();
        }
    }

    /// Full evaluation of a completed wave: rebuild the error board and
    /// pick the next transition. Runs only on the task that observed the
    /// wait count reach zero.
    pub fn evaluate(self: &Arc<Self>) -> SiotsStatus {
        let geometry = Arc::clone(&self.ctx.geometry);
        let width = geometry.width();
        let (board, recognized, non_nop, degraded_count) = {
            let mut inner = self.inner.lock();
            if Self::freed(&inner, "evaluate") {
                return SiotsStatus::Done;
            }
            let Ok(mut board) = FruEboard::new(width) else {
                error!(width, "cannot size an error board");
                return SiotsStatus::Done;
            };
            let ctx = ClassifyContext {
                monitor_op: self.monitor_op,
                geometry: &*geometry,
            };
            let SiotsInner {
                fruts,
                chain,
                degraded,
                ..
            } = &mut *inner;
            let mut recognized = true;
            let mut non_nop = 0u32;
            for &index in chain.iter() {
                if fruts[index].is_nop() {
                    continue;
                }
                non_nop += 1;
                recognized &= board.accumulate(&mut fruts[index], degraded, &ctx);
            }
            (board, recognized, non_nop, inner.degraded.count())
        };
        let abort_requested = self
            .iots
            .upgrade()
            .is_some_and(|iots| iots.is_abort_requested());
        if board.has_errors() {
            debug!(board = %board, "wave evaluation");
        }
        if !recognized {
            return self.finish_unexpected();
        }
        if degraded_count > MAX_DEGRADED_POSITIONS {
            return self.finish_too_many_dead_positions();
        }
        if abort_requested {
            return self.finish_aborted();
        }
        if board.dead_err_count > 0 {
            return self.finish_dead();
        }
        if board.retry_err_count > 0 {
            return match self.retry_fruts_chain(&board) {
                Ok(()) => SiotsStatus::Waiting,
                Err(err) => {
                    error!(%err, "retry setup failed");
                    self.finish_unexpected()
                }
            };
        }
        if board.hard_media_err_count > 0 {
            return self.finish_media_error();
        }
        if board.bad_crc_count > 0 {
            return match self.send_crc_usurper(DriveFault::Crc) {
                Ok(_) => SiotsStatus::Waiting,
                Err(err) => {
                    error!(%err, "crc notification failed");
                    self.finish_media_error()
                }
            };
        }
        if board.timeout_err_count > 0 {
            return match self.send_timeout_usurper() {
                Ok(_) => SiotsStatus::Waiting,
                Err(err) => {
                    error!(%err, "timeout notification failed");
                    self.finish_expired()
                }
            };
        }
        if board.abort_err_count > 0 {
            return self.finish_aborted();
        }
        if board.drop_err_count > 0 {
            return self.finish_dropped();
        }
        if board.zeroed_count > 0 && board.zeroed_count == non_nop {
            return self.finish_zeroed();
        }
        self.finish_success()
    }

    // --- retry & health orchestration -----------------------------------

    /// Re-arm and resend every retryable-flagged entry as one wave, after
    /// one shared delay.
    pub fn retry_fruts_chain(self: &Arc<Self>, board: &FruEboard) -> Result<()> {
        if board.retry_err_count == 0 {
            return Err(Error::logic_fault("retry requested with no retryable entries"));
        }
        let (delay, targets) = {
            let mut inner = self.inner.lock();
            if Self::freed(&inner, "retry_fruts_chain") {
                return Err(Error::logic_fault("retry on a freed sub-request"));
            }
            inner.flags.error_inherited = false;
            let mut suggested: Option<Duration> = None;
            let mut targets = Vec::new();
            let SiotsInner { fruts, chain, .. } = &mut *inner;
            for &index in chain.iter() {
                let f = &mut fruts[index];
                if f.is_nop() {
                    continue;
                }
                f.clear_error_inherited();
                if board.retry_err.contains(f.position()) {
                    // Only the entries being resent get a say in the
                    // shared delay; a stale suggestion elsewhere in the
                    // chain must not stretch the wave.
                    suggested = suggested.max(f.retry_wait());
                    targets.push(index);
                }
            }
            inner.retry_count += 1;
            inner.flags.error_pending = false;
            inner.state = SiotsState::Outstanding;
            (self.ctx.config.clamp_retry_delay(suggested), targets)
        };
        if targets.len() as u32 != board.retry_err_count {
            warn!(
                targets = targets.len(),
                expected = board.retry_err_count,
                "retryable bitmap does not match the chain"
            );
        }
        self.wait_count
            .store(targets.len() as u64, Ordering::SeqCst);
        warn!(
            count = targets.len(),
            delay_ms = delay.as_millis() as u64,
            "retrying wave after delay"
        );
        for index in targets {
            self.delayed_retry(index, delay);
        }
        Ok(())
    }

    /// Arm a timer and resend one entry through the physical-error retry
    /// path on expiry. The delay is clamped into the configured window.
    pub fn delayed_retry(self: &Arc<Self>, index: usize, delay: Duration) {
        let delay = self.ctx.config.clamp_retry_delay(Some(delay));
        let siots = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            siots.retry_one(index, true);
        });
    }

    /// Immediate resend, deadline reset. For errors that were not
    /// physical drive faults.
    pub fn retry_fruts(self: &Arc<Self>, index: usize) {
        self.retry_one(index, false);
    }

    fn retry_one(self: &Arc<Self>, index: usize, physical_error: bool) {
        {
            let mut inner = self.inner.lock();
            if Self::freed(&inner, "retry_one") {
                return;
            }
            let opcode = inner.fruts[index].opcode();
            if let Err(err) = inner.fruts[index].reset_for_retry(opcode, physical_error) {
                error!(index, %err, "retry reset failed");
                return;
            }
        }
        if !self.send_one(index) {
            self.account_completed(1);
        }
    }

    /// Cancel outstanding, not-yet-cancelled entries. Media-modifying
    /// requests on a redundant geometry are exempt: cancelling one
    /// mid-flight could leave a stripe inconsistent. Idempotent.
    pub fn abort_fruts_chain(self: &Arc<Self>) -> u32 {
        let redundant = self.ctx.geometry.kind().is_redundant();
        let cancels: Vec<u64> = {
            let mut inner = self.inner.lock();
            if Self::freed(&inner, "abort_fruts_chain") {
                return 0;
            }
            let SiotsInner { fruts, chain, .. } = &mut *inner;
            chain
                .iter()
                .filter_map(|&i| {
                    let f = &mut fruts[i];
                    if f.is_nop() || (redundant && f.opcode().is_media_modify()) {
                        return None;
                    }
                    f.take_cancel()
                })
                .collect()
        };
        for submission_id in &cancels {
            self.ctx.transport.cancel(*submission_id);
        }
        debug!(cancelled = cancels.len(), "aborted outstanding per-drive requests");
        cancels.len() as u32
    }

    /// Notify the drives whose requests timed out. One mini wait cycle,
    /// one notification per affected position.
    pub fn send_timeout_usurper(self: &Arc<Self>) -> Result<u32> {
        let positions = self.positions_where(|f| f.status() == BlockStatus::Timeout)?;
        self.send_usurper(
            DriveFault::Timeout,
            positions,
            BlockStatus::Timeout,
            BlockQualifier::None,
        )
    }

    /// Notify the drives that returned checksum errors.
    pub fn send_crc_usurper(self: &Arc<Self>, fault: DriveFault) -> Result<u32> {
        let positions = self.positions_where(|f| f.qualifier() == BlockQualifier::CrcError)?;
        self.send_usurper(
            fault,
            positions,
            BlockStatus::MediaError,
            BlockQualifier::DataLost,
        )
    }

    fn positions_where(&self, pick: impl Fn(&FruRequest) -> bool) -> Result<PositionSet> {
        let inner = self.inner.lock();
        if Self::freed(&inner, "send_usurper") {
            return Err(Error::logic_fault("health notify on a freed sub-request"));
        }
        let mut positions = PositionSet::new(self.ctx.geometry.width())?;
        for &index in &inner.chain {
            let f = &inner.fruts[index];
            if !f.is_nop() && pick(f) {
                positions.insert(f.position())?;
            }
        }
        Ok(positions)
    }

    fn send_usurper(
        self: &Arc<Self>,
        fault: DriveFault,
        positions: PositionSet,
        resume_status: BlockStatus,
        resume_qualifier: BlockQualifier,
    ) -> Result<u32> {
        let count = positions.count();
        if count == 0 {
            return Err(Error::invalid_argument("no positions to notify"));
        }
        {
            let mut inner = self.inner.lock();
            if Self::freed(&inner, "send_usurper") {
                return Err(Error::logic_fault("health notify on a freed sub-request"));
            }
            inner.state = SiotsState::HealthNotify {
                resume_status,
                resume_qualifier,
            };
        }
        self.wait_count.store(u64::from(count), Ordering::SeqCst);
        debug!(?fault, positions = %positions, "sending health notifications");
        for position in positions.iter() {
            let submission_id = self.ctx.submission_ids.next();
            let siots = Arc::downgrade(self);
            let token = CompletionToken::new(submission_id, move |_| {
                if let Some(s) = siots.upgrade() {
                    s.usurper_complete();
                }
            });
            if !self.ctx.transport.submit_control(position, fault, token) {
                warn!(position, ?fault, "health notification refused");
                self.usurper_complete();
            }
        }
        Ok(count)
    }

    fn usurper_complete(self: &Arc<Self>) {
        match self.decrement_wait(1) {
            Some(true) => {
                if self.monitor_op {
                    // The monitor must never block on quiesce; the flag
                    // marks the cycle done and the monitor kicks the
                    // SIOTS when it is ready.
                    let mut inner = self.inner.lock();
                    if Self::freed(&inner, "usurper_complete") {
                        return;
                    }
                    inner.flags.waiting_shutdown_continue = true;
                    debug!("health cycle done, waiting for shutdown continue");
                } else {
                    self.resume();
                }
            }
            _ => {}
        }
    }

    /// Wake a parked SIOTS: a released waiter, a finished nested set, a
    /// completed health cycle, or the monitor kicking a
    /// waiting-shutdown-continue SIOTS.
    pub fn resume(self: &Arc<Self>) -> SiotsStatus {
        self.wake_count.fetch_add(1, Ordering::Relaxed);
        let state = {
            let mut inner = self.inner.lock();
            if Self::freed(&inner, "resume") {
                return SiotsStatus::Done;
            }
            inner.flags.waiting_shutdown_continue = false;
            inner.state
        };
        match state {
            SiotsState::WaitingLock => {
                {
                    self.inner.lock().state = SiotsState::Start;
                }
                match self.start() {
                    Ok(status) => status,
                    Err(err) => {
                        error!(%err, "resumed waiter failed to start");
                        self.finish_unexpected()
                    }
                }
            }
            SiotsState::WaitingNested => {
                let (status, qualifier) = self.status();
                if status == BlockStatus::Invalid {
                    error!("woken with no nested status recorded");
                    self.finish_unexpected()
                } else {
                    self.finish(status, qualifier)
                }
            }
            SiotsState::HealthNotify {
                resume_status,
                resume_qualifier,
            } => self.finish(resume_status, resume_qualifier),
            other => {
                warn!(state = ?other, "spurious wake");
                SiotsStatus::Done
            }
        }
    }

    // --- terminal states -------------------------------------------------

    pub fn finish_success(self: &Arc<Self>) -> SiotsStatus {
        self.finish(BlockStatus::Success, BlockQualifier::None)
    }

    pub fn finish_zeroed(self: &Arc<Self>) -> SiotsStatus {
        self.finish(BlockStatus::Success, BlockQualifier::Zeroed)
    }

    /// Aborted before completion. Write-class requests that never started
    /// a write report that distinction so the client knows no media
    /// changed.
    pub fn finish_aborted(self: &Arc<Self>) -> SiotsStatus {
        let write_started = self.inner.lock().flags.write_started;
        let qualifier = if self.algorithm.is_write_class() && !write_started {
            BlockQualifier::WriteNotStartedAborted
        } else {
            BlockQualifier::ClientAborted
        };
        self.finish(BlockStatus::RequestAborted, qualifier)
    }

    pub fn finish_expired(self: &Arc<Self>) -> SiotsStatus {
        self.finish(BlockStatus::Timeout, BlockQualifier::None)
    }

    /// The array lost too many drives to continue.
    pub fn finish_shutdown_error(self: &Arc<Self>) -> SiotsStatus {
        self.finish(BlockStatus::IoFailed, BlockQualifier::RetryNotPossible)
    }

    pub fn finish_media_error(self: &Arc<Self>) -> SiotsStatus {
        self.finish(BlockStatus::MediaError, BlockQualifier::DataLost)
    }

    pub fn finish_dropped(self: &Arc<Self>) -> SiotsStatus {
        self.finish(BlockStatus::RequestAborted, BlockQualifier::OptionalAbortedLegacy)
    }

    /// A drive died under this request. Retryable from the caller's side,
    /// but only after it re-evaluates downstream health.
    pub fn finish_dead(self: &Arc<Self>) -> SiotsStatus {
        self.finish(BlockStatus::IoFailed, BlockQualifier::RetryPossible)
    }

    pub fn finish_unexpected(self: &Arc<Self>) -> SiotsStatus {
        self.finish(BlockStatus::InvalidRequest, BlockQualifier::UnexpectedError)
    }

    pub fn finish_invalid_opcode(self: &Arc<Self>) -> SiotsStatus {
        self.finish(BlockStatus::InvalidRequest, BlockQualifier::UnsupportedOpcode)
    }

    pub fn finish_invalid_parameter(self: &Arc<Self>) -> SiotsStatus {
        self.finish(BlockStatus::InvalidRequest, BlockQualifier::UnexpectedError)
    }

    /// Defensive terminal for corrupted persisted degraded state.
    pub fn finish_too_many_dead_positions(self: &Arc<Self>) -> SiotsStatus {
        self.finish(
            BlockStatus::InvalidRequest,
            BlockQualifier::TooManyDeadPositions,
        )
    }

    // --- finishing path --------------------------------------------------

    fn finish(self: &Arc<Self>, status: BlockStatus, qualifier: BlockQualifier) -> SiotsStatus {
        if self.parent.is_some() {
            return self.finish_nested(status, qualifier);
        }
        let (status, qualifier) = self.maybe_check_data(status, qualifier);
        self.finish_top(status, qualifier)
    }

    /// Optional data-pattern verification on fully transferred reads.
    fn maybe_check_data(
        &self,
        status: BlockStatus,
        qualifier: BlockQualifier,
    ) -> (BlockStatus, BlockQualifier) {
        if status != BlockStatus::Success
            || !self.ctx.config.check_data
            || !self.algorithm.is_read_class()
        {
            return (status, qualifier);
        }
        let Some(integrity) = self.ctx.integrity.as_ref() else {
            return (status, qualifier);
        };
        match integrity.check(LockRange::new(self.lba, self.blocks)) {
            IntegrityStatus::Ok => (status, qualifier),
            verdict => {
                error!(?verdict, lba = self.lba, blocks = self.blocks, "data check failed");
                (BlockStatus::InvalidRequest, BlockQualifier::UnexpectedError)
            }
        }
    }

    /// Common cleanup for a top-level SIOTS, under the IOTS lock.
    /// Resources are torn down before any counter moves so a sibling
    /// starting concurrently observes them already reclaimed.
    fn finish_top(self: &Arc<Self>, status: BlockStatus, qualifier: BlockQualifier) -> SiotsStatus {
        let Some(iots) = self.iots.upgrade() else {
            error!("finishing sub-request has no owning request");
            return SiotsStatus::Done;
        };
        let waiter;
        let complete;
        {
            let mut iguard = iots.inner.lock();
            {
                let mut inner = self.inner.lock();
                if Self::freed(&inner, "finish") {
                    return SiotsStatus::Done;
                }
                inner.status = status;
                inner.qualifier = qualifier;
                inner.buffers.clear();
                for f in &mut inner.fruts {
                    f.destroy();
                }
                waiter = inner.waiters.pop_front();
                inner.state = SiotsState::Freed;
            }
            let Some(slot) = iguard.siots.iter().position(|s| Arc::ptr_eq(s, self)) else {
                error!("finished sub-request is not on its request list");
                return SiotsStatus::Done;
            };
            iguard.siots.remove(slot);
            if status == BlockStatus::Success {
                iguard.blocks_transferred += self.blocks;
            }
            iots.merge_locked(&mut iguard, status, qualifier);
            match iguard.outstanding_requests.checked_sub(1) {
                Some(v) => iguard.outstanding_requests = v,
                None => {
                    error!("outstanding request count underflow");
                    return SiotsStatus::Done;
                }
            }
            iots.apply_abort_locked(&mut iguard);
            complete = iots.check_complete_locked(&mut iguard);
        }
        debug!(?status, ?qualifier, lba = self.lba, "sub-request finished");
        if complete {
            iots.fire_completion();
        }
        if let Some(w) = waiter {
            w.resume();
        }
        SiotsStatus::Done
    }

    /// Common cleanup for a nested SIOTS: merge into the parent instead
    /// of the IOTS. Degraded positions climb to the parent, the child's
    /// status is copied up, and degraded-verify parents are woken only
    /// when their nested wait count drains.
    fn finish_nested(
        self: &Arc<Self>,
        status: BlockStatus,
        qualifier: BlockQualifier,
    ) -> SiotsStatus {
        let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) else {
            error!("nested sub-request has no parent");
            return SiotsStatus::Done;
        };
        let wake;
        {
            let mut p = parent.inner.lock();
            if Self::freed(&p, "finish_nested(parent)") {
                return SiotsStatus::Done;
            }
            {
                let mut inner = self.inner.lock();
                if Self::freed(&inner, "finish_nested") {
                    return SiotsStatus::Done;
                }
                inner.status = status;
                inner.qualifier = qualifier;
                for position in inner.degraded.iter() {
                    if let Err(err) = p.degraded.insert(position) {
                        warn!(position, %err, "cannot propagate degraded position");
                    }
                }
                inner.buffers.clear();
                for f in &mut inner.fruts {
                    f.destroy();
                }
                inner.state = SiotsState::Freed;
            }
            let Some(slot) = p.nested.iter().position(|c| Arc::ptr_eq(c, self)) else {
                error!("finished nested sub-request is not on its parent list");
                return SiotsStatus::Done;
            };
            p.nested.remove(slot);
            p.status = status;
            p.qualifier = qualifier;
            wake = if self.algorithm.waits_on_nested_count() {
                match parent
                    .wait_count
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
                {
                    Err(_) => {
                        error!("parent wait count underflow");
                        return SiotsStatus::Done;
                    }
                    Ok(previous) => previous == 1,
                }
            } else {
                true
            };
        }
        debug!(?status, ?qualifier, wake, "nested sub-request finished");
        if wake {
            parent.resume();
        }
        SiotsStatus::Done
    }
}

impl std::fmt::Debug for Siots {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Siots")
            .field("algorithm", &self.algorithm)
            .field("lba", &self.lba)
            .field("blocks", &self.blocks)
            .field("wait_count", &self.wait_count())
            .finish_non_exhaustive()
    }
}
