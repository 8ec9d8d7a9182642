use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, info};

use super::{EntitySync, RepoContext, SyncRange, SyncReport};
use crate::conflict::{pull_winner, push_winner};
use crate::date_key::DateKey;
use crate::dedup::OpKey;
use crate::error::Result;
use crate::models::CompletionRecord;
use crate::remote::{codec, paths};

const COMPLETION_RECORD: &str = "completion";

pub struct CompletionRepository {
    ctx: RepoContext,
}

impl CompletionRepository {
    pub fn new(ctx: RepoContext) -> Self {
        Self { ctx }
    }

    pub fn get(&self, user_id: &str, date: NaiveDate) -> Result<Option<CompletionRecord>> {
        self.ctx.local.query_completion(user_id, DateKey::from_date(date))
    }

    /// Mark a day completed or not, locally and on the remote.
    pub async fn set_completed(&self, user_id: &str, date: NaiveDate, is_completed: bool) -> Result<CompletionRecord> {
        let now = self.ctx.now();
        let record = match self.get(user_id, date)? {
            Some(existing) => CompletionRecord {
                is_completed,
                completed_at: if is_completed {
                    existing.completed_at.or(Some(now))
                } else {
                    None
                },
                updated_at: if now > existing.updated_at {
                    now
                } else {
                    existing.updated_at + chrono::Duration::milliseconds(1)
                },
                ..existing
            },
            None => CompletionRecord::new(user_id, date, is_completed, now),
        };
        self.ctx.local.upsert_completion(&record)?;

        let key = OpKey::new(user_id, record.date_key(), COMPLETION_RECORD);
        let Some(_permit) = self.ctx.dedup.acquire(key) else {
            return Ok(record);
        };
        self.ctx
            .remote
            .write(
                &paths::completion(user_id, record.date_key()),
                codec::encode_completion(&record)?,
            )
            .await?;
        debug!(user_id, date_key = %record.date_key(), is_completed, "Completion saved");
        Ok(record)
    }

    /// Completed days in `[start, end]`, ascending.
    pub fn completed_between(&self, user_id: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<DateKey>> {
        let range = SyncRange::new(DateKey::from_date(start), DateKey::from_date(end));
        Ok(self
            .ctx
            .local
            .load_completions(user_id)?
            .into_iter()
            .filter(|(key, record)| range.contains(*key) && record.is_completed)
            .map(|(key, _)| key)
            .collect())
    }

    async fn fetch_remote(&self, user_id: &str) -> Result<BTreeMap<DateKey, CompletionRecord>> {
        let path = paths::completions_root(user_id);
        let value = self.ctx.remote.read_once(&path).await?;
        codec::decode_completion_tree(&path, user_id, value)
    }
}

#[async_trait]
impl EntitySync for CompletionRepository {
    fn entity(&self) -> &'static str {
        "completions"
    }

    async fn sync_from_cloud(&self, user_id: &str, range: SyncRange) -> Result<SyncReport> {
        let remote = self.fetch_remote(user_id).await?;
        let local = self.ctx.local.load_completions(user_id)?;

        let mut pulled = 0;
        for (key, record) in remote.iter().filter(|(key, _)| range.contains(**key)) {
            if let Some(winner) = pull_winner(local.get(key), Some(record)) {
                self.ctx.local.upsert_completion(winner)?;
                pulled += 1;
            }
        }
        if pulled > 0 {
            info!(user_id, pulled, "Completions pulled from remote");
        }
        Ok(SyncReport::pulled(pulled))
    }

    async fn sync_to_cloud(&self, user_id: &str, range: SyncRange) -> Result<SyncReport> {
        let local = self.ctx.local.load_completions(user_id)?;
        let remote = self.fetch_remote(user_id).await?;

        let mut pushed = 0;
        for (key, record) in local.iter().filter(|(key, _)| range.contains(**key)) {
            let Some(winner) = push_winner(Some(record), remote.get(key)) else {
                continue;
            };
            let op = OpKey::new(user_id, *key, COMPLETION_RECORD);
            let Some(_permit) = self.ctx.dedup.acquire(op) else {
                continue;
            };
            self.ctx
                .remote
                .write(&paths::completion(user_id, *key), codec::encode_completion(winner)?)
                .await?;
            pushed += 1;
        }
        if pushed > 0 {
            info!(user_id, pushed, "Completions pushed to remote");
        }
        Ok(SyncReport::pushed(pushed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Calendar, ManualClock};
    use crate::dedup::OperationDedupGuard;
    use crate::local::LocalStore;
    use crate::remote::{MemoryRemoteStore, RemoteStore};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::sync::Arc;

    struct Fixture {
        _dir: tempfile::TempDir,
        remote: MemoryRemoteStore,
        clock: Arc<ManualClock>,
        repo: CompletionRepository,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 20, 0, 0).unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemoteStore::new();
        let clock = Arc::new(ManualClock::new(t0()));
        let ctx = RepoContext {
            local: Arc::new(LocalStore::new(dir.path().to_path_buf()).unwrap()),
            remote: Arc::new(remote.clone()),
            dedup: Arc::new(OperationDedupGuard::new()),
            clock: clock.clone(),
            calendar: Calendar::utc(),
        };
        Fixture {
            _dir: dir,
            remote,
            clock,
            repo: CompletionRepository::new(ctx),
        }
    }

    fn october() -> SyncRange {
        SyncRange::new(DateKey::from_date(day(1)), DateKey::from_date(day(31)))
    }

    #[tokio::test]
    async fn test_set_completed_and_undo() {
        let f = fixture();
        let done = f.repo.set_completed("u1", day(19), true).await.unwrap();
        assert!(done.is_completed);
        assert_eq!(done.completed_at, Some(t0()));

        f.clock.advance(Duration::minutes(5));
        let undone = f.repo.set_completed("u1", day(19), false).await.unwrap();
        assert!(!undone.is_completed);
        assert_eq!(undone.completed_at, None);
        assert!(undone.updated_at > done.updated_at);
        assert_eq!(f.repo.get("u1", day(19)).unwrap(), Some(undone));
        assert!(f.remote.peek("users/u1/dailyCompletions/2026-10-19").is_some());
    }

    #[tokio::test]
    async fn test_completed_between() {
        let f = fixture();
        f.repo.set_completed("u1", day(17), true).await.unwrap();
        f.repo.set_completed("u1", day(18), false).await.unwrap();
        f.repo.set_completed("u1", day(19), true).await.unwrap();

        let keys: Vec<String> = f
            .repo
            .completed_between("u1", day(18), day(19))
            .unwrap()
            .iter()
            .map(|k| k.to_string())
            .collect();
        assert_eq!(keys, vec!["2026-10-19"]);
    }

    #[tokio::test]
    async fn test_pull_respects_range_and_lww() {
        let f = fixture();
        f.repo.set_completed("u1", day(19), true).await.unwrap();

        // older remote edit for the 19th, new record for the 18th, and one
        // far outside the range
        let older = CompletionRecord::new("u1", day(19), false, t0() - Duration::hours(2));
        let other = CompletionRecord::new("u1", day(18), true, t0());
        let outside = CompletionRecord::new("u1", NaiveDate::from_ymd_opt(2026, 1, 2).unwrap(), true, t0());
        for record in [&older, &other, &outside] {
            f.remote
                .write(
                    &paths::completion("u1", record.date_key()),
                    codec::encode_completion(record).unwrap(),
                )
                .await
                .unwrap();
        }

        let report = f.repo.sync_from_cloud("u1", october()).await.unwrap();
        assert_eq!(report.pulled, 1);
        assert!(f.repo.get("u1", day(19)).unwrap().unwrap().is_completed);
        assert!(f.repo.get("u1", day(18)).unwrap().is_some());
        assert!(f.repo.get("u1", outside.date).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_push_only_newer() {
        let f = fixture();
        f.remote.set_offline(true);
        assert!(f.repo.set_completed("u1", day(19), true).await.is_err());
        f.remote.set_offline(false);

        assert_eq!(f.repo.sync_to_cloud("u1", october()).await.unwrap().pushed, 1);
        assert_eq!(f.repo.sync_to_cloud("u1", october()).await.unwrap().pushed, 0);
    }
}
