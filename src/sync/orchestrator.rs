//! The sync state machine.
//!
//! ```text
//! load config + checkpoint ─► connect ─► open folder ─► plan
//!   UpToDate                      ─► disconnect
//!   Scan { from_uid }  ─► for each candidate:
//!                           time left?  no ─► persist resume UID
//!                           fetch ─► parse ─► filter ─► send ─► mark read
//!                         ─► persist uid_next
//!   SkipExisting       ─► persist uid_next
//! ```
//!
//! The checkpoint is written at most once per invocation and never when
//! anything fails. Once connected, the session is always disconnected.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::channels::{NotificationSender, build_notification};
use crate::config::{ConfigSource, RelayConfig};
use crate::error::{Error, Result};
use crate::filter;
use crate::mailbox::{
    MailboxConnector, MailboxSession, MailboxStatus, ParsedEmail, normalize_search_results,
};
use crate::store::{Checkpoint, CheckpointStore};
use crate::sync::{DEFAULT_SAFETY_MARGIN, RemainingTime};

/// Why a scan is happening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanReason {
    /// No usable checkpoint for this mailbox.
    FirstSync,
    /// The folder's UID epoch changed since the checkpoint.
    UidValidityChanged,
    /// New UIDs were assigned since the checkpoint.
    NewMessages,
}

/// What one invocation should do after opening the folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPlan {
    UpToDate,
    /// Record the current position without relaying existing mail.
    SkipExisting { reason: ScanReason },
    Scan { from_uid: u32, reason: ScanReason },
}

/// Compare the checkpoint with the opened folder.
pub fn plan_scan(
    checkpoint: Option<&Checkpoint>,
    mailbox_hash: &str,
    status: &MailboxStatus,
    skip_existing: bool,
) -> ScanPlan {
    let reason = match checkpoint {
        Some(cp) if cp.mailbox_hash != mailbox_hash => ScanReason::FirstSync,
        None => ScanReason::FirstSync,
        Some(cp) if cp.uid_validity != status.uid_validity => ScanReason::UidValidityChanged,
        Some(cp) if cp.next_uid == status.uid_next => return ScanPlan::UpToDate,
        Some(cp) => {
            return ScanPlan::Scan {
                from_uid: cp.next_uid,
                reason: ScanReason::NewMessages,
            };
        }
    };

    if skip_existing {
        ScanPlan::SkipExisting { reason }
    } else {
        ScanPlan::Scan {
            from_uid: 1,
            reason,
        }
    }
}

/// Result of a successful invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing new; no checkpoint write.
    UpToDate,
    /// Existing mail was skipped and the checkpoint moved to `next_uid`.
    Skipped { next_uid: u32 },
    /// Every candidate was handled.
    Completed {
        reason: ScanReason,
        candidates: usize,
        delivered: usize,
        next_uid: u32,
    },
    /// Time ran short; the next invocation starts at `next_uid`.
    Resumed {
        reason: ScanReason,
        delivered: usize,
        remaining: usize,
        next_uid: u32,
    },
}

impl SyncOutcome {
    /// The checkpoint position written by this invocation, if any.
    pub fn next_uid(&self) -> Option<u32> {
        match self {
            Self::UpToDate => None,
            Self::Skipped { next_uid }
            | Self::Completed { next_uid, .. }
            | Self::Resumed { next_uid, .. } => Some(*next_uid),
        }
    }
}

enum MessageResult {
    Delivered,
    Filtered,
    Vanished,
}

enum ScanProgress {
    Finished {
        candidates: usize,
        delivered: usize,
    },
    Stopped {
        resume_uid: u32,
        delivered: usize,
        remaining: usize,
    },
}

/// Runs sync invocations against injected collaborators.
pub struct SyncOrchestrator {
    config_source: Arc<dyn ConfigSource>,
    checkpoints: Arc<dyn CheckpointStore>,
    connector: Arc<dyn MailboxConnector>,
    sender: Arc<dyn NotificationSender>,
    safety_margin: Duration,
}

impl SyncOrchestrator {
    pub fn new(
        config_source: Arc<dyn ConfigSource>,
        checkpoints: Arc<dyn CheckpointStore>,
        connector: Arc<dyn MailboxConnector>,
        sender: Arc<dyn NotificationSender>,
    ) -> Self {
        Self {
            config_source,
            checkpoints,
            connector,
            sender,
            safety_margin: DEFAULT_SAFETY_MARGIN,
        }
    }

    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }

    /// Run one invocation.
    ///
    /// `remaining` is consulted before each candidate message; when it
    /// drops below the safety margin the scan stops and records a resume
    /// point.
    pub async fn run(&self, remaining: &dyn RemainingTime) -> Result<SyncOutcome> {
        let span = info_span!("sync", run_id = %Uuid::new_v4());
        self.run_inner(remaining).instrument(span).await
    }

    async fn run_inner(&self, remaining: &dyn RemainingTime) -> Result<SyncOutcome> {
        let (config, checkpoint) = tokio::try_join!(
            async { self.config_source.load().await.map_err(Error::from) },
            async { self.checkpoints.get().await.map_err(Error::from) },
        )?;
        let mailbox_hash = config.mailbox_hash();

        let started = Instant::now();
        let mut session = self.connector.connect(&config).await?;
        info!(
            host = %config.host,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Connected"
        );

        let result = self
            .sync_session(
                session.as_mut(),
                &config,
                checkpoint.as_ref(),
                &mailbox_hash,
                remaining,
            )
            .await;

        let started = Instant::now();
        session.disconnect().await;
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Disconnected"
        );

        result
    }

    async fn sync_session(
        &self,
        session: &mut dyn MailboxSession,
        config: &RelayConfig,
        checkpoint: Option<&Checkpoint>,
        mailbox_hash: &str,
        remaining: &dyn RemainingTime,
    ) -> Result<SyncOutcome> {
        let started = Instant::now();
        let status = session.open_folder(&config.folder).await?;
        info!(
            folder = %config.folder,
            uid_next = status.uid_next,
            uid_validity = status.uid_validity,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Mailbox opened"
        );

        let plan = plan_scan(checkpoint, mailbox_hash, &status, config.skip_existing);
        match plan {
            ScanPlan::UpToDate => {
                info!("Up to date");
                Ok(SyncOutcome::UpToDate)
            }
            ScanPlan::SkipExisting { reason } => {
                log_reason(reason, None);
                info!(next_uid = status.uid_next, "Skipping existing messages");
                self.persist(status.uid_next, &status, mailbox_hash).await?;
                Ok(SyncOutcome::Skipped {
                    next_uid: status.uid_next,
                })
            }
            ScanPlan::Scan { from_uid, reason } => {
                log_reason(reason, Some(from_uid));
                match self.scan(session, config, from_uid, &status, remaining).await? {
                    ScanProgress::Finished {
                        candidates,
                        delivered,
                    } => {
                        self.persist(status.uid_next, &status, mailbox_hash).await?;
                        Ok(SyncOutcome::Completed {
                            reason,
                            candidates,
                            delivered,
                            next_uid: status.uid_next,
                        })
                    }
                    ScanProgress::Stopped {
                        resume_uid,
                        delivered,
                        remaining,
                    } => {
                        self.persist(resume_uid, &status, mailbox_hash).await?;
                        Ok(SyncOutcome::Resumed {
                            reason,
                            delivered,
                            remaining,
                            next_uid: resume_uid,
                        })
                    }
                }
            }
        }
    }

    /// Walk the candidates `[from_uid, uid_next)` in ascending order.
    async fn scan(
        &self,
        session: &mut dyn MailboxSession,
        config: &RelayConfig,
        from_uid: u32,
        status: &MailboxStatus,
        remaining: &dyn RemainingTime,
    ) -> Result<ScanProgress> {
        let mut candidates =
            normalize_search_results(session.search_from_uid(from_uid).await?, from_uid);
        candidates.retain(|&uid| uid < status.uid_next);

        info!(
            count = candidates.len(),
            "{} new {} found",
            candidates.len(),
            if candidates.len() == 1 { "message" } else { "messages" }
        );

        let mut delivered = 0usize;
        for (index, &uid) in candidates.iter().enumerate() {
            let left = remaining.remaining();
            if left < self.safety_margin {
                let remaining = candidates.len() - index;
                info!(
                    uid,
                    remaining,
                    left_ms = left.as_millis() as u64,
                    "Stopping before the time budget runs out"
                );
                return Ok(ScanProgress::Stopped {
                    resume_uid: uid,
                    delivered,
                    remaining,
                });
            }

            match self.process_message(session, config, uid).await? {
                MessageResult::Delivered => delivered += 1,
                MessageResult::Filtered | MessageResult::Vanished => {}
            }
        }

        Ok(ScanProgress::Finished {
            candidates: candidates.len(),
            delivered,
        })
    }

    /// Fetch, parse, filter, and relay one message.
    async fn process_message(
        &self,
        session: &mut dyn MailboxSession,
        config: &RelayConfig,
        uid: u32,
    ) -> Result<MessageResult> {
        debug!(uid, "Downloading message");
        let Some(raw) = session.fetch_content(uid).await? else {
            warn!(uid, "Message disappeared before it could be fetched; skipping");
            return Ok(MessageResult::Vanished);
        };
        let email = ParsedEmail::parse(uid, &raw);

        if !filter::satisfies_filter(email.sender(), &config.allow_list, &config.deny_list, uid)
        {
            return Ok(MessageResult::Filtered);
        }

        let notification = build_notification(&email, &config.glossary);
        info!(uid, sender = email.sender(), "Relaying message");
        self.sender.send(&config.webhook_url, &notification).await?;

        debug!(uid, "Marking message as read");
        session.mark_read(uid).await?;
        Ok(MessageResult::Delivered)
    }

    async fn persist(&self, next_uid: u32, status: &MailboxStatus, mailbox_hash: &str) -> Result<()> {
        let checkpoint = Checkpoint::now(next_uid, status.uid_validity, mailbox_hash);
        self.checkpoints.put(&checkpoint).await?;
        info!(
            next_uid,
            uid_validity = status.uid_validity,
            "Checkpoint updated"
        );
        Ok(())
    }
}

fn log_reason(reason: ScanReason, from_uid: Option<u32>) {
    match reason {
        ScanReason::FirstSync => info!("First time connecting to this mailbox"),
        ScanReason::UidValidityChanged => info!("UIDVALIDITY has changed"),
        ScanReason::NewMessages => {
            info!(from_uid, "Checking for new messages");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticConfigSource;
    use crate::error::MailboxError;
    use crate::store::MemoryCheckpointStore;
    use crate::sync::Unbounded;
    use crate::sync::testing::{CountdownClock, FakeMailbox, RecordingSender, relay_config};

    struct Harness {
        mailbox: FakeMailbox,
        store: Arc<MemoryCheckpointStore>,
        sender: Arc<RecordingSender>,
        orchestrator: SyncOrchestrator,
    }

    fn harness(
        config: RelayConfig,
        mailbox: FakeMailbox,
        store: MemoryCheckpointStore,
        sender: RecordingSender,
    ) -> Harness {
        let store = Arc::new(store);
        let sender = Arc::new(sender);
        let orchestrator = SyncOrchestrator::new(
            Arc::new(StaticConfigSource(config)),
            store.clone(),
            Arc::new(mailbox.clone()),
            sender.clone(),
        );
        Harness {
            mailbox,
            store,
            sender,
            orchestrator,
        }
    }

    fn hash() -> String {
        relay_config().mailbox_hash()
    }

    fn checkpoint(next_uid: u32, uid_validity: u32) -> Checkpoint {
        Checkpoint {
            next_uid,
            uid_validity,
            mailbox_hash: hash(),
            timestamp: 1,
        }
    }

    fn status(uid_next: u32, uid_validity: u32) -> MailboxStatus {
        MailboxStatus {
            uid_next,
            uid_validity,
            exists: 0,
            read_only: false,
        }
    }

    // ── Planning ────────────────────────────────────────────────────

    #[test]
    fn plan_without_checkpoint_scans_from_one() {
        assert_eq!(
            plan_scan(None, "h", &status(8, 100), false),
            ScanPlan::Scan {
                from_uid: 1,
                reason: ScanReason::FirstSync
            }
        );
    }

    #[test]
    fn plan_with_other_mailbox_hash_is_first_sync() {
        let mut cp = checkpoint(5, 100);
        cp.mailbox_hash = "other".into();
        assert_eq!(
            plan_scan(Some(&cp), &hash(), &status(8, 100), false),
            ScanPlan::Scan {
                from_uid: 1,
                reason: ScanReason::FirstSync
            }
        );
    }

    #[test]
    fn plan_with_new_validity_rescans() {
        assert_eq!(
            plan_scan(Some(&checkpoint(5, 99)), &hash(), &status(8, 100), false),
            ScanPlan::Scan {
                from_uid: 1,
                reason: ScanReason::UidValidityChanged
            }
        );
    }

    #[test]
    fn plan_up_to_date() {
        assert_eq!(
            plan_scan(Some(&checkpoint(8, 100)), &hash(), &status(8, 100), false),
            ScanPlan::UpToDate
        );
    }

    #[test]
    fn plan_delta_scan() {
        assert_eq!(
            plan_scan(Some(&checkpoint(5, 100)), &hash(), &status(8, 100), true),
            ScanPlan::Scan {
                from_uid: 5,
                reason: ScanReason::NewMessages
            }
        );
    }

    #[test]
    fn plan_skip_existing_only_applies_without_usable_checkpoint() {
        assert_eq!(
            plan_scan(None, "h", &status(8, 100), true),
            ScanPlan::SkipExisting {
                reason: ScanReason::FirstSync
            }
        );
        assert_eq!(
            plan_scan(Some(&checkpoint(5, 99)), &hash(), &status(8, 100), true),
            ScanPlan::SkipExisting {
                reason: ScanReason::UidValidityChanged
            }
        );
    }

    // ── Invocations ─────────────────────────────────────────────────

    #[tokio::test]
    async fn up_to_date_does_nothing() {
        let mailbox = FakeMailbox::new(8, 100);
        mailbox.add(7, "a@example.com");
        let h = harness(
            relay_config(),
            mailbox,
            MemoryCheckpointStore::with_checkpoint(checkpoint(8, 100)),
            RecordingSender::default(),
        );

        let outcome = h.orchestrator.run(&Unbounded).await.unwrap();

        assert_eq!(outcome, SyncOutcome::UpToDate);
        assert_eq!(h.store.writes(), 0);
        assert_eq!(h.sender.count(), 0);
        h.mailbox.with(|s| {
            assert!(s.searches.is_empty());
            assert!(s.fetched.is_empty());
            assert_eq!(s.disconnects, 1);
        });
    }

    #[tokio::test]
    async fn delta_scan_with_filtered_message() {
        let mut config = relay_config();
        config.deny_list = vec!["spam@example.com".into()];

        let mailbox = FakeMailbox::new(8, 100);
        mailbox.add(5, "alice@example.com");
        mailbox.add(6, "spam@example.com");
        mailbox.add(7, "bob@example.com");

        let h = harness(
            config,
            mailbox,
            MemoryCheckpointStore::with_checkpoint(checkpoint(5, 100)),
            RecordingSender::default(),
        );

        let outcome = h.orchestrator.run(&Unbounded).await.unwrap();

        assert_eq!(
            outcome,
            SyncOutcome::Completed {
                reason: ScanReason::NewMessages,
                candidates: 3,
                delivered: 2,
                next_uid: 8
            }
        );
        assert_eq!(h.sender.count(), 2);
        h.mailbox.with(|s| {
            assert_eq!(s.searches, vec![5]);
            assert_eq!(s.fetched, vec![5, 6, 7]);
            assert_eq!(s.marked, vec![5, 7]);
            assert_eq!(s.disconnects, 1);
        });

        let saved = h.store.snapshot().unwrap();
        assert_eq!(saved.next_uid, 8);
        assert_eq!(saved.uid_validity, 100);
        assert_eq!(saved.mailbox_hash, hash());
        assert!(saved.timestamp > 1);
        assert_eq!(h.store.writes(), 1);
    }

    #[tokio::test]
    async fn candidates_are_bounded_and_sorted() {
        let mailbox = FakeMailbox::new(10, 100);
        // A server answering `UID 5:*` may include the newest UID below the
        // bound, and may list UIDs assigned after SELECT.
        mailbox.add(9, "late@example.com");
        mailbox.add(4, "old@example.com");
        mailbox.add(6, "b@example.com");
        mailbox.add(5, "a@example.com");
        mailbox.with(|s| {
            s.search_results.push(12);
            s.search_results.push(6);
        });

        let h = harness(
            relay_config(),
            mailbox,
            MemoryCheckpointStore::with_checkpoint(checkpoint(5, 100)),
            RecordingSender::default(),
        );

        h.orchestrator.run(&Unbounded).await.unwrap();

        h.mailbox.with(|s| assert_eq!(s.fetched, vec![5, 6, 9]));
        assert_eq!(h.store.snapshot().unwrap().next_uid, 10);
    }

    #[tokio::test]
    async fn rerun_after_success_is_noop() {
        let mailbox = FakeMailbox::new(8, 100);
        mailbox.add(5, "a@example.com");
        let h = harness(
            relay_config(),
            mailbox,
            MemoryCheckpointStore::with_checkpoint(checkpoint(5, 100)),
            RecordingSender::default(),
        );

        h.orchestrator.run(&Unbounded).await.unwrap();
        let second = h.orchestrator.run(&Unbounded).await.unwrap();

        assert_eq!(second, SyncOutcome::UpToDate);
        assert_eq!(h.store.writes(), 1);
        assert_eq!(h.sender.count(), 1);
    }

    #[tokio::test]
    async fn resumes_where_the_deadline_stopped() {
        let mailbox = FakeMailbox::new(8, 100);
        for uid in [5, 6, 7] {
            mailbox.add(uid, "a@example.com");
        }
        let h = harness(
            relay_config(),
            mailbox,
            MemoryCheckpointStore::with_checkpoint(checkpoint(5, 100)),
            RecordingSender::default(),
        );

        let first = h.orchestrator.run(&CountdownClock::new(1)).await.unwrap();
        assert_eq!(
            first,
            SyncOutcome::Resumed {
                reason: ScanReason::NewMessages,
                delivered: 1,
                remaining: 2,
                next_uid: 6
            }
        );
        assert_eq!(h.store.snapshot().unwrap().next_uid, 6);

        let second = h.orchestrator.run(&Unbounded).await.unwrap();
        assert_eq!(second.next_uid(), Some(8));

        h.mailbox.with(|s| {
            assert_eq!(s.searches, vec![5, 6]);
            assert_eq!(s.fetched, vec![5, 6, 7]);
            assert_eq!(s.marked, vec![5, 6, 7]);
            assert_eq!(s.disconnects, 2);
        });
        assert_eq!(h.sender.count(), 3);
    }

    #[tokio::test]
    async fn deadline_before_first_candidate() {
        let mailbox = FakeMailbox::new(8, 100);
        mailbox.add(6, "a@example.com");
        let h = harness(
            relay_config(),
            mailbox,
            MemoryCheckpointStore::with_checkpoint(checkpoint(5, 100)),
            RecordingSender::default(),
        );

        let outcome = h.orchestrator.run(&CountdownClock::new(0)).await.unwrap();

        assert_eq!(outcome.next_uid(), Some(6));
        h.mailbox.with(|s| assert!(s.fetched.is_empty()));
    }

    #[tokio::test]
    async fn safety_margin_is_configurable() {
        let mailbox = FakeMailbox::new(8, 100);
        mailbox.add(5, "a@example.com");
        let mut h = harness(
            relay_config(),
            mailbox,
            MemoryCheckpointStore::with_checkpoint(checkpoint(5, 100)),
            RecordingSender::default(),
        );
        // CountdownClock reports 10s once exhausted.
        h.orchestrator = h.orchestrator.with_safety_margin(Duration::from_secs(5));

        let outcome = h.orchestrator.run(&CountdownClock::new(0)).await.unwrap();
        assert_eq!(outcome.next_uid(), Some(8));
    }

    #[tokio::test]
    async fn validity_change_rescans_from_first_uid() {
        let mailbox = FakeMailbox::new(4, 200);
        mailbox.add(1, "a@example.com");
        mailbox.add(3, "b@example.com");
        let h = harness(
            relay_config(),
            mailbox,
            MemoryCheckpointStore::with_checkpoint(checkpoint(50, 100)),
            RecordingSender::default(),
        );

        let outcome = h.orchestrator.run(&Unbounded).await.unwrap();

        assert_eq!(
            outcome,
            SyncOutcome::Completed {
                reason: ScanReason::UidValidityChanged,
                candidates: 2,
                delivered: 2,
                next_uid: 4
            }
        );
        h.mailbox.with(|s| assert_eq!(s.searches, vec![1]));
        let saved = h.store.snapshot().unwrap();
        assert_eq!((saved.next_uid, saved.uid_validity), (4, 200));
    }

    #[tokio::test]
    async fn first_sync_scans_everything() {
        let mailbox = FakeMailbox::new(3, 7);
        mailbox.add(1, "a@example.com");
        mailbox.add(2, "b@example.com");
        let h = harness(
            relay_config(),
            mailbox,
            MemoryCheckpointStore::new(),
            RecordingSender::default(),
        );

        let outcome = h.orchestrator.run(&Unbounded).await.unwrap();

        assert_eq!(outcome.next_uid(), Some(3));
        assert_eq!(h.sender.count(), 2);
        assert_eq!(h.store.snapshot().unwrap().mailbox_hash, hash());
    }

    #[tokio::test]
    async fn skip_existing_records_position_only() {
        let mut config = relay_config();
        config.skip_existing = true;
        let mailbox = FakeMailbox::new(3, 7);
        mailbox.add(1, "a@example.com");
        let h = harness(
            config,
            mailbox,
            MemoryCheckpointStore::new(),
            RecordingSender::default(),
        );

        let outcome = h.orchestrator.run(&Unbounded).await.unwrap();

        assert_eq!(outcome, SyncOutcome::Skipped { next_uid: 3 });
        assert_eq!(h.sender.count(), 0);
        h.mailbox.with(|s| assert!(s.searches.is_empty()));
        assert_eq!(h.store.snapshot().unwrap().next_uid, 3);
    }

    #[tokio::test]
    async fn vanished_message_is_skipped() {
        let mailbox = FakeMailbox::new(8, 100);
        mailbox.add(5, "a@example.com");
        mailbox.add(6, "b@example.com");
        mailbox.with(|s| {
            s.messages.remove(&5);
        });
        let h = harness(
            relay_config(),
            mailbox,
            MemoryCheckpointStore::with_checkpoint(checkpoint(5, 100)),
            RecordingSender::default(),
        );

        let outcome = h.orchestrator.run(&Unbounded).await.unwrap();

        assert_eq!(outcome.next_uid(), Some(8));
        h.mailbox.with(|s| assert_eq!(s.marked, vec![6]));
    }

    #[tokio::test]
    async fn unreadable_message_does_not_block_later_ones() {
        let mailbox = FakeMailbox::new(7, 100);
        mailbox.add(5, "a@example.com");
        mailbox.add(6, "b@example.com");
        mailbox.with(|s| {
            s.messages.insert(5, Vec::new());
        });
        let h = harness(
            relay_config(),
            mailbox,
            MemoryCheckpointStore::with_checkpoint(checkpoint(5, 100)),
            RecordingSender::default(),
        );

        let outcome = h.orchestrator.run(&Unbounded).await.unwrap();

        assert_eq!(
            outcome,
            SyncOutcome::Completed {
                reason: ScanReason::NewMessages,
                candidates: 2,
                delivered: 2,
                next_uid: 7
            }
        );
        assert_eq!(h.store.snapshot().unwrap().next_uid, 7);
        h.mailbox.with(|s| assert_eq!(s.marked, vec![5, 6]));

        let sent = h.sender.sent.lock().unwrap();
        assert_eq!(sent[0].content, "\n\n*(end of message)*\n");
        assert!(sent[1].content.contains("b@example.com"));
    }

    #[tokio::test]
    async fn unreadable_message_from_nobody_is_filtered() {
        let mut config = relay_config();
        config.allow_list = vec!["example.com".into()];
        let mailbox = FakeMailbox::new(7, 100);
        mailbox.add(5, "a@example.com");
        mailbox.add(6, "b@example.com");
        mailbox.with(|s| {
            s.messages.insert(5, Vec::new());
        });
        let h = harness(
            config,
            mailbox,
            MemoryCheckpointStore::with_checkpoint(checkpoint(5, 100)),
            RecordingSender::default(),
        );

        let outcome = h.orchestrator.run(&Unbounded).await.unwrap();

        assert_eq!(outcome.next_uid(), Some(7));
        assert_eq!(h.sender.count(), 1);
        h.mailbox.with(|s| assert_eq!(s.marked, vec![6]));
    }

    // ── Failures ────────────────────────────────────────────────────

    #[tokio::test]
    async fn fetch_failure_aborts_without_writing() {
        let mailbox = FakeMailbox::new(8, 100);
        mailbox.add(5, "a@example.com");
        mailbox.add(6, "b@example.com");
        mailbox.add(7, "c@example.com");
        mailbox.with(|s| s.fail_fetch = Some(6));
        let h = harness(
            relay_config(),
            mailbox,
            MemoryCheckpointStore::with_checkpoint(checkpoint(5, 100)),
            RecordingSender::default(),
        );

        let err = h.orchestrator.run(&Unbounded).await.unwrap_err();

        assert!(matches!(
            err,
            Error::Mailbox(MailboxError::CommandFailed {
                command: "UID FETCH",
                ..
            })
        ));
        assert_eq!(h.store.writes(), 0);
        assert_eq!(h.store.snapshot(), Some(checkpoint(5, 100)));
        assert_eq!(h.sender.count(), 1);
        h.mailbox.with(|s| {
            assert_eq!(s.fetched, vec![5, 6]);
            assert_eq!(s.marked, vec![5]);
            assert_eq!(s.disconnects, 1);
        });
    }

    #[tokio::test]
    async fn retry_after_fetch_failure_restarts_from_old_checkpoint() {
        let mailbox = FakeMailbox::new(8, 100);
        mailbox.add(5, "a@example.com");
        mailbox.add(6, "b@example.com");
        mailbox.with(|s| s.fail_fetch = Some(6));
        let h = harness(
            relay_config(),
            mailbox,
            MemoryCheckpointStore::with_checkpoint(checkpoint(5, 100)),
            RecordingSender::default(),
        );

        h.orchestrator.run(&Unbounded).await.unwrap_err();
        h.mailbox.with(|s| s.fail_fetch = None);
        let outcome = h.orchestrator.run(&Unbounded).await.unwrap();

        assert_eq!(outcome.next_uid(), Some(8));
        // 5 is delivered again: dedup is per checkpoint, not per message.
        assert_eq!(h.sender.count(), 3);
        h.mailbox.with(|s| {
            assert_eq!(s.marked, vec![5, 5, 6]);
            assert_eq!(s.disconnects, 2);
        });
    }

    #[tokio::test]
    async fn delivery_failure_leaves_checkpoint_unmoved() {
        let mailbox = FakeMailbox::new(8, 100);
        mailbox.add(5, "a@example.com");
        let h = harness(
            relay_config(),
            mailbox,
            MemoryCheckpointStore::with_checkpoint(checkpoint(5, 100)),
            RecordingSender::failing(),
        );

        let err = h.orchestrator.run(&Unbounded).await.unwrap_err();

        assert!(matches!(err, Error::Delivery(_)));
        assert_eq!(h.store.writes(), 0);
        assert_eq!(h.store.snapshot().unwrap().next_uid, 5);
        h.mailbox.with(|s| {
            assert!(s.marked.is_empty());
            assert_eq!(s.disconnects, 1);
        });
    }

    #[tokio::test]
    async fn mark_failure_is_fatal() {
        let mailbox = FakeMailbox::new(8, 100);
        mailbox.add(5, "a@example.com");
        mailbox.with(|s| s.fail_mark = true);
        let h = harness(
            relay_config(),
            mailbox,
            MemoryCheckpointStore::with_checkpoint(checkpoint(5, 100)),
            RecordingSender::default(),
        );

        let err = h.orchestrator.run(&Unbounded).await.unwrap_err();

        assert!(matches!(err, Error::Mailbox(_)));
        assert_eq!(h.sender.count(), 1);
        assert_eq!(h.store.writes(), 0);
        h.mailbox.with(|s| assert_eq!(s.disconnects, 1));
    }

    #[tokio::test]
    async fn connect_failure_writes_nothing() {
        let mailbox = FakeMailbox::new(8, 100);
        mailbox.with(|s| s.fail_connect = true);
        let h = harness(
            relay_config(),
            mailbox,
            MemoryCheckpointStore::new(),
            RecordingSender::default(),
        );

        let err = h.orchestrator.run(&Unbounded).await.unwrap_err();

        assert!(matches!(err, Error::Mailbox(_)));
        assert_eq!(h.store.writes(), 0);
        h.mailbox.with(|s| assert_eq!(s.disconnects, 0));
    }

    #[tokio::test]
    async fn unsupported_folder_still_disconnects() {
        let mailbox = FakeMailbox::new(8, 100);
        mailbox.with(|s| s.fail_open = true);
        let h = harness(
            relay_config(),
            mailbox,
            MemoryCheckpointStore::new(),
            RecordingSender::default(),
        );

        let err = h.orchestrator.run(&Unbounded).await.unwrap_err();

        assert!(matches!(
            err,
            Error::Mailbox(crate::error::MailboxError::Unsupported { .. })
        ));
        assert_eq!(h.store.writes(), 0);
        h.mailbox.with(|s| assert_eq!(s.disconnects, 1));
    }

    #[tokio::test]
    async fn config_failure_never_connects() {
        struct BrokenConfig;

        #[async_trait::async_trait]
        impl ConfigSource for BrokenConfig {
            async fn load(&self) -> std::result::Result<RelayConfig, crate::error::ConfigError> {
                Err(crate::error::ConfigError::ParseError {
                    path: "relay.json".into(),
                    reason: "expected value".into(),
                })
            }
        }

        let mailbox = FakeMailbox::new(8, 100);
        let store = Arc::new(MemoryCheckpointStore::new());
        let orchestrator = SyncOrchestrator::new(
            Arc::new(BrokenConfig),
            store.clone(),
            Arc::new(mailbox.clone()),
            Arc::new(RecordingSender::default()),
        );

        let err = orchestrator.run(&Unbounded).await.unwrap_err();

        assert!(matches!(err, Error::Config(_)));
        assert_eq!(store.writes(), 0);
        mailbox.with(|s| assert_eq!(s.connects, 0));
    }
}
