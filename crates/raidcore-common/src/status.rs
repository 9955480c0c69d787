//! Status taxonomy for per-drive requests and the precedence order used
//! when merging finished sub-request statuses upward.
//!
//! Two layers report independently on every completion: the transport
//! (did the request reach the drive at all) and the block operation (what
//! the drive said once it did). The block layer is authoritative whenever
//! the transport layer reports [`TransportStatus::Ok`].

/// Outcome of the transport layer for one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportStatus {
    /// Delivered; the block status carries the real outcome.
    Ok,
    /// Lower level is congested or momentarily unable to accept work.
    Busy,
    /// The drive behind this position is gone.
    Dead,
    Canceled,
    CancelPending,
    /// Edge quiesced while the request was queued.
    Quiesced,
    Failed,
    EdgeNotEnabled,
    /// Synchronous local failure, e.g. the descriptor could not be built.
    GenericFailure,
}

impl TransportStatus {
    /// Whether the block-level status should be consulted at all.
    #[must_use]
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Block operation status for one per-drive request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockStatus {
    /// Not yet written for this send cycle.
    Invalid,
    Success,
    IoFailed,
    MediaError,
    RequestAborted,
    Timeout,
    InvalidRequest,
    NotReady,
    StillCongested,
    Congested,
}

/// Qualifier refining a [`BlockStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockQualifier {
    /// Not yet written for this send cycle.
    Invalid,
    None,
    RetryPossible,
    RetryNotPossible,
    LockFailed,
    CrcError,
    NotPreferred,
    Congested,
    /// Media error, data unrecoverable.
    DataLost,
    /// Media error and the drive cannot remap the bad region.
    NoRemap,
    /// Legacy optional request dropped by a lower level.
    OptionalAbortedLegacy,
    ClientAborted,
    /// Aborted before any write had started.
    WriteNotStartedAborted,
    /// Succeeded but the drive wants the region remapped.
    RemapRequired,
    /// Succeeded and the range was found already zeroed.
    Zeroed,
    StillCongested,
    UnexpectedError,
    UnsupportedOpcode,
    TooManyDeadPositions,
}

/// Total order used when several finished sub-requests race to set the
/// aggregate status of one logical request. Higher wins; ties keep the
/// first-seen status, which makes the merge commutative and associative
/// and therefore independent of completion order.
///
/// `StillCongested` and `NotReady` are carried in the order although no
/// classifier path currently produces them as a finishing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorPrecedence {
    NoError,
    StillCongested,
    InvalidRequest,
    NotReady,
    Aborted,
    Timeout,
    Congestion,
    MediaError,
    DeviceDead,
    Unknown,
}

impl ErrorPrecedence {
    /// Map a block status onto the precedence order.
    #[must_use]
    pub fn of(status: BlockStatus) -> Self {
        match status {
            BlockStatus::Success => Self::NoError,
            BlockStatus::StillCongested => Self::StillCongested,
            BlockStatus::InvalidRequest => Self::InvalidRequest,
            BlockStatus::NotReady => Self::NotReady,
            BlockStatus::RequestAborted => Self::Aborted,
            BlockStatus::Timeout => Self::Timeout,
            BlockStatus::Congested => Self::Congestion,
            BlockStatus::MediaError => Self::MediaError,
            BlockStatus::IoFailed => Self::DeviceDead,
            BlockStatus::Invalid => Self::Unknown,
        }
    }
}

/// Merge a newly finished (status, qualifier) pair into the aggregate.
/// Returns the pair that should be kept.
#[must_use]
pub fn merge_status(
    current: (BlockStatus, BlockQualifier),
    incoming: (BlockStatus, BlockQualifier),
) -> (BlockStatus, BlockQualifier) {
    // No status adopted yet: take the incoming one unconditionally.
    if current.0 == BlockStatus::Invalid {
        return incoming;
    }
    if ErrorPrecedence::of(incoming.0) > ErrorPrecedence::of(current.0) {
        incoming
    } else {
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_total_order() {
        let order = [
            ErrorPrecedence::NoError,
            ErrorPrecedence::StillCongested,
            ErrorPrecedence::InvalidRequest,
            ErrorPrecedence::NotReady,
            ErrorPrecedence::Aborted,
            ErrorPrecedence::Timeout,
            ErrorPrecedence::Congestion,
            ErrorPrecedence::MediaError,
            ErrorPrecedence::DeviceDead,
            ErrorPrecedence::Unknown,
        ];
        for pair in order.windows(2) {
            assert!(pair[0] < pair[1], "{:?} must rank below {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_merge_adopts_into_empty() {
        let merged = merge_status(
            (BlockStatus::Invalid, BlockQualifier::Invalid),
            (BlockStatus::Success, BlockQualifier::None),
        );
        assert_eq!(merged, (BlockStatus::Success, BlockQualifier::None));
    }

    #[test]
    fn test_merge_higher_precedence_wins() {
        let media = (BlockStatus::MediaError, BlockQualifier::DataLost);
        let aborted = (BlockStatus::RequestAborted, BlockQualifier::ClientAborted);
        assert_eq!(merge_status(media, aborted), media);
        assert_eq!(merge_status(aborted, media), media);
    }

    #[test]
    fn test_merge_tie_keeps_first() {
        let first = (BlockStatus::MediaError, BlockQualifier::DataLost);
        let second = (BlockStatus::MediaError, BlockQualifier::NoRemap);
        assert_eq!(merge_status(first, second), first);
    }

    #[test]
    fn test_merge_order_independent_for_all_pairs() {
        let statuses = [
            BlockStatus::Success,
            BlockStatus::StillCongested,
            BlockStatus::InvalidRequest,
            BlockStatus::NotReady,
            BlockStatus::RequestAborted,
            BlockStatus::Timeout,
            BlockStatus::Congested,
            BlockStatus::MediaError,
            BlockStatus::IoFailed,
        ];
        let empty = (BlockStatus::Invalid, BlockQualifier::Invalid);
        for &a in &statuses {
            for &b in &statuses {
                if ErrorPrecedence::of(a) == ErrorPrecedence::of(b) {
                    continue;
                }
                let ab = merge_status(merge_status(empty, (a, BlockQualifier::None)), (b, BlockQualifier::None));
                let ba = merge_status(merge_status(empty, (b, BlockQualifier::None)), (a, BlockQualifier::None));
                assert_eq!(ab, ba, "merge of {a:?}/{b:?} depends on order");
            }
        }
    }

    #[test]
    fn test_merge_fold_is_permutation_invariant() {
        use rand::seq::SliceRandom;

        let mut pairs = vec![
            (BlockStatus::Success, BlockQualifier::None),
            (BlockStatus::RequestAborted, BlockQualifier::ClientAborted),
            (BlockStatus::Timeout, BlockQualifier::None),
            (BlockStatus::MediaError, BlockQualifier::DataLost),
            (BlockStatus::IoFailed, BlockQualifier::RetryNotPossible),
            (BlockStatus::InvalidRequest, BlockQualifier::UnexpectedError),
        ];
        let empty = (BlockStatus::Invalid, BlockQualifier::Invalid);
        let reference = pairs.iter().fold(empty, |acc, &p| merge_status(acc, p));
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            pairs.shuffle(&mut rng);
            let merged = pairs.iter().fold(empty, |acc, &p| merge_status(acc, p));
            // The worst status always survives; the qualifier may differ
            // only if two distinct statuses share a precedence class,
            // which the taxonomy does not allow.
            assert_eq!(merged.0, reference.0);
        }
    }
}
