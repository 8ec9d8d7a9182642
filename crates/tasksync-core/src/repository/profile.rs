use async_trait::async_trait;
use tracing::{debug, info};

use super::{EntitySync, RepoContext, SyncRange, SyncReport};
use crate::conflict::{pull_winner, push_winner};
use crate::dedup::OpKey;
use crate::error::Result;
use crate::models::ProfileRecord;
use crate::remote::{codec, paths};

const PROFILE_SCOPE: &str = "profile";

pub struct ProfileRepository {
    ctx: RepoContext,
}

impl ProfileRepository {
    pub fn new(ctx: RepoContext) -> Self {
        Self { ctx }
    }

    /// The locally stored profile. `None` is a normal first-run state.
    pub fn get(&self, user_id: &str) -> Result<Option<ProfileRecord>> {
        self.ctx.local.load_profile(user_id)
    }

    /// The stored profile, or a blank one that has not been saved yet.
    pub fn get_or_blank(&self, user_id: &str) -> Result<ProfileRecord> {
        Ok(self
            .get(user_id)?
            .unwrap_or_else(|| ProfileRecord::new(user_id, self.ctx.now())))
    }

    /// Save a profile locally and upload it. The stored value gets a fresh
    /// `updated_at`; it is what gets returned.
    pub async fn save(&self, mut profile: ProfileRecord) -> Result<ProfileRecord> {
        let now = self.ctx.now();
        if now > profile.updated_at {
            profile.updated_at = now;
        }
        self.ctx.local.upsert_profile(&profile)?;

        let key = OpKey::undated(profile.user_id.as_str(), PROFILE_SCOPE, profile.user_id.as_str());
        let Some(_permit) = self.ctx.dedup.acquire(key) else {
            return Ok(profile);
        };
        self.ctx
            .remote
            .write(&paths::profile(&profile.user_id), codec::encode_profile(&profile)?)
            .await?;
        debug!(user_id = %profile.user_id, "Profile saved");
        Ok(profile)
    }

    async fn fetch_remote(&self, user_id: &str) -> Result<Option<ProfileRecord>> {
        let path = paths::profile(user_id);
        match self.ctx.remote.read_once(&path).await? {
            Some(value) if !value.is_null() => Ok(Some(codec::decode_profile(&path, user_id, value)?)),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl EntitySync for ProfileRepository {
    fn entity(&self) -> &'static str {
        "profile"
    }

    async fn sync_from_cloud(&self, user_id: &str, _range: SyncRange) -> Result<SyncReport> {
        let remote = self.fetch_remote(user_id).await?;
        let local = self.get(user_id)?;
        match pull_winner(local.as_ref(), remote.as_ref()) {
            Some(winner) => {
                self.ctx.local.upsert_profile(winner)?;
                info!(user_id, "Profile pulled from remote");
                Ok(SyncReport::pulled(1))
            }
            None => Ok(SyncReport::default()),
        }
    }

    async fn sync_to_cloud(&self, user_id: &str, _range: SyncRange) -> Result<SyncReport> {
        let local = self.get(user_id)?;
        let remote = self.fetch_remote(user_id).await?;
        let Some(winner) = push_winner(local.as_ref(), remote.as_ref()) else {
            return Ok(SyncReport::default());
        };

        let key = OpKey::undated(user_id, PROFILE_SCOPE, user_id);
        let Some(_permit) = self.ctx.dedup.acquire(key) else {
            return Ok(SyncReport::default());
        };
        self.ctx
            .remote
            .write(&paths::profile(user_id), codec::encode_profile(winner)?)
            .await?;
        info!(user_id, "Profile pushed to remote");
        Ok(SyncReport::pushed(1))
    }
}
