// Licensed under the MIT License.

use hio_wrap::{DelayedDisposeBucket, DelayedDisposeRab};

/// One disposable handed back to the host by [`grab_buckets_to_dispose`](crate::PersistentTempManager::grab_buckets_to_dispose),
/// to be persisted into the checkpoint and then passed to
/// [`finish_delayed_free`](crate::PersistentTempManager::finish_delayed_free).
#[derive(Debug, Clone)]
pub enum PendingDisposal {
    /// A persistent bucket awaiting real disposal.
    Bucket(DelayedDisposeBucket),
    /// A persistent RAB awaiting real disposal.
    Rab(DelayedDisposeRab),
}

impl PendingDisposal {
    pub(crate) fn commit_id(&self) -> u64 {
        match self {
            Self::Bucket(b) => b.commit_id(),
            Self::Rab(r) => r.commit_id(),
        }
    }

    pub(crate) fn to_dispose(&self) -> bool {
        match self {
            Self::Bucket(b) => b.to_dispose(),
            Self::Rab(r) => r.to_dispose(),
        }
    }

    pub(crate) fn real_dispose(&self) {
        match self {
            Self::Bucket(b) => b.real_dispose(),
            Self::Rab(r) => r.real_dispose(),
        }
    }
}

impl From<DelayedDisposeBucket> for PendingDisposal {
    fn from(value: DelayedDisposeBucket) -> Self {
        Self::Bucket(value)
    }
}

impl From<DelayedDisposeRab> for PendingDisposal {
    fn from(value: DelayedDisposeRab) -> Self {
        Self::Rab(value)
    }
}
