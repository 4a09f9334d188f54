//! Crash-safe per-user credential and profile persistence.
//!
//! One credential record and one profile snapshot per user, stored as JSON
//! under the storage directory. Credential writes follow a backup-then-
//! overwrite discipline: the current record is copied aside before the new
//! content lands, and restored if the write fails, so a record is never left
//! half-written and a failed save never destroys a previously valid
//! credential.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use calbridge_core::UserId;

use crate::credential::{Credential, ProfileSnapshot};
use crate::error::{AuthError, AuthResult};
use crate::oauth::OAuthClient;

/// Persistent store for per-user credentials and profile snapshots.
#[derive(Debug)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    /// Opens the store, creating the storage directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> AuthResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Returns the storage directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn token_path(&self, user: UserId) -> PathBuf {
        self.dir.join(format!("user_{user}_token.json"))
    }

    fn profile_path(&self, user: UserId) -> PathBuf {
        self.dir.join(format!("user_{user}_info.json"))
    }

    /// Loads the persisted credential record for a user.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CorruptRecord`] when the stored form cannot be
    /// parsed. Callers treat that as "not authorized", never as fatal.
    pub fn load(&self, user: UserId) -> AuthResult<Option<Credential>> {
        let path = self.token_path(user);
        if !path.exists() {
            debug!(user = %user, "no credential record");
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        let credential = serde_json::from_str(&content)
            .map_err(|e| AuthError::corrupt_record(format!("user {user}: {e}")))?;
        Ok(Some(credential))
    }

    /// Persists a credential record for a user.
    ///
    /// Any existing record is copied to a backup first; the backup is removed
    /// after a successful write and restored after a failed one.
    pub fn save(&self, user: UserId, credential: &Credential) -> AuthResult<()> {
        fs::create_dir_all(&self.dir)?;

        let path = self.token_path(user);
        let backup = backup_path(&path);

        let had_backup = if path.exists() {
            match fs::copy(&path, &backup) {
                Ok(_) => true,
                Err(e) => {
                    warn!(user = %user, "failed to create credential backup: {e}");
                    false
                }
            }
        } else {
            false
        };

        let content = serde_json::to_string_pretty(credential)
            .map_err(|e| AuthError::internal(format!("failed to serialize credential: {e}")))?;

        match write_record(&path, &content) {
            Ok(()) => {
                if had_backup {
                    let _ = fs::remove_file(&backup);
                }
                debug!(user = %user, "credential saved");
                Ok(())
            }
            Err(e) => {
                if had_backup {
                    match fs::rename(&backup, &path) {
                        Ok(()) => info!(user = %user, "restored credential backup after failed save"),
                        Err(restore) => {
                            error!(user = %user, "failed to restore credential backup: {restore}");
                        }
                    }
                }
                error!(user = %user, "failed to save credential: {e}");
                Err(e.into())
            }
        }
    }

    /// Persists a profile snapshot. Best-effort from the flow's point of
    /// view: callers log failures and move on.
    pub fn save_profile(&self, user: UserId, snapshot: &ProfileSnapshot) -> AuthResult<()> {
        fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(snapshot)
            .map_err(|e| AuthError::internal(format!("failed to serialize profile: {e}")))?;
        fs::write(self.profile_path(user), content)?;
        debug!(user = %user, "profile snapshot saved");
        Ok(())
    }

    /// Loads the persisted profile snapshot for a user, if any. Unreadable
    /// snapshots are logged and reported as absent.
    pub fn load_profile(&self, user: UserId) -> Option<ProfileSnapshot> {
        let path = self.profile_path(user);
        if !path.exists() {
            return None;
        }

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!(user = %user, "failed to read profile snapshot: {e}");
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(user = %user, "unreadable profile snapshot: {e}");
                None
            }
        }
    }

    /// Removes the credential record and profile snapshot for a user.
    ///
    /// Returns the number of record files removed. Idempotent: revoking an
    /// already-revoked user removes nothing and does not error.
    pub fn revoke(&self, user: UserId) -> usize {
        let token = self.token_path(user);
        let mut removed = 0;

        for path in [&token, &self.profile_path(user)] {
            if path.exists() {
                match fs::remove_file(path) {
                    Ok(()) => removed += 1,
                    Err(e) => error!(user = %user, path = %path.display(), "failed to remove record: {e}"),
                }
            }
        }

        // A stray backup from an interrupted save is swept but not counted.
        let backup = backup_path(&token);
        if backup.exists() {
            let _ = fs::remove_file(&backup);
        }

        info!(user = %user, removed, "authorization revoked");
        removed
    }

    /// Returns a usable credential for a user, refreshing lazily when the
    /// stored one is expired and a refresh token exists.
    ///
    /// An expired credential without a refresh token, a corrupt record, and
    /// a failed refresh all come back as `None`; the cause is logged, never
    /// raised.
    pub async fn credential(
        &self,
        user: UserId,
        oauth: Option<&OAuthClient>,
    ) -> Option<Credential> {
        let credential = match self.load(user) {
            Ok(Some(credential)) => credential,
            Ok(None) => return None,
            Err(e) => {
                warn!(user = %user, "treating user as unauthorized: {e}");
                return None;
            }
        };

        if !credential.is_expired() {
            return Some(credential);
        }

        let Some(refresh_token) = credential.refresh_token.clone() else {
            debug!(user = %user, "credential expired with no refresh token");
            return None;
        };

        let Some(oauth) = oauth else {
            warn!(user = %user, "credential expired and no client configuration to refresh with");
            return None;
        };

        match oauth.refresh(&refresh_token).await {
            Ok(grant) => {
                let mut refreshed = credential;
                refreshed.apply_refresh(grant.access_token, grant.expires_in, grant.refresh_token);
                if let Err(e) = self.save(user, &refreshed) {
                    warn!(user = %user, "failed to persist refreshed credential: {e}");
                }
                info!(user = %user, "access token refreshed");
                Some(refreshed)
            }
            Err(e) => {
                warn!(user = %user, "token refresh failed: {e}");
                None
            }
        }
    }

    /// Returns true if the user currently holds a usable credential.
    ///
    /// Same refresh policy as [`credential`](Self::credential); never errors.
    pub async fn is_authorized(&self, user: UserId, oauth: Option<&OAuthClient>) -> bool {
        self.credential(user, oauth).await.is_some()
    }
}

fn backup_path(token_path: &Path) -> PathBuf {
    let mut s = token_path.as_os_str().to_os_string();
    s.push(".backup");
    PathBuf::from(s)
}

fn tmp_path(token_path: &Path) -> PathBuf {
    let mut s = token_path.as_os_str().to_os_string();
    s.push(".tmp");
    PathBuf::from(s)
}

/// Writes the record through a temp file so the final path never holds a
/// half-written record, then tightens permissions.
fn write_record(path: &Path, content: &str) -> io::Result<()> {
    let tmp = tmp_path(path);
    if let Err(e) = fs::write(&tmp, content) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }

    Ok(())
}
