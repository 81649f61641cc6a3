//! Per-argument traversal state
//!
//! Everything that used to be process-wide lives here: the collision-slot
//! registry, the queue of directories awaiting timestamp repair, and the
//! running counters. A context is created for one source argument and
//! consumed by [`TraversalContext::finish`] once its walk is complete.

use crate::slots::SlotAllocator;
use crate::timestamps::TimestampQueue;
use crate::types::BackupReport;
use crate::walker::SourceRoot;
use tracing::debug;

/// State owned by the processing of one source argument
#[derive(Debug)]
pub struct TraversalContext {
    pub(crate) source: SourceRoot,
    pub(crate) slots: SlotAllocator,
    pub(crate) pending: TimestampQueue,
    pub(crate) report: BackupReport,
}

impl TraversalContext {
    /// Fresh context for `source`
    pub fn new(source: SourceRoot, archive_owner: Option<(u32, u32)>) -> Self {
        let slots = SlotAllocator::new(source.base().to_path_buf(), archive_owner);
        Self {
            source,
            slots,
            pending: TimestampQueue::new(),
            report: BackupReport {
                arguments: 1,
                ..Default::default()
            },
        }
    }

    /// Source argument being processed
    pub fn source(&self) -> &SourceRoot {
        &self.source
    }

    /// Collision slots known so far
    pub fn slots(&self) -> &SlotAllocator {
        &self.slots
    }

    /// Directories waiting for timestamp repair
    pub fn pending(&self) -> &TimestampQueue {
        &self.pending
    }

    /// Counters so far
    pub fn report(&self) -> &BackupReport {
        &self.report
    }

    /// Run the timestamp-fix pass and hand back the argument's report
    ///
    /// The slot registry is dropped with the context.
    pub fn finish(self) -> BackupReport {
        let TraversalContext {
            source,
            slots,
            pending,
            mut report,
        } = self;
        debug!(
            "Finishing {:?}: {} slots known, {} directories to fix",
            source.root(),
            slots.known().len(),
            pending.len()
        );
        report.warnings += pending.fix_all();
        report
    }
}
