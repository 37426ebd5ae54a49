use anyhow::{Context, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serenity::model::id::{GuildId, UserId};
use std::{collections::HashMap, path::PathBuf, sync::Arc, time::SystemTime};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::audio::repeat::RepeatMode;

/// Valores que un usuario puede fijar, globalmente o por servidor
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PreferenceScope {
    #[serde(default)]
    pub volume: Option<f32>,
    #[serde(default, alias = "lock")]
    pub locked: Option<bool>,
    #[serde(default)]
    pub repeat: Option<RepeatMode>,
}

/// Archivo de preferencias de un usuario (`users/user_<id>.json`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    pub user_id: u64,
    #[serde(default)]
    pub global: PreferenceScope,
    #[serde(default)]
    pub guilds: HashMap<u64, PreferenceScope>,
}

/// Preferencia ya resuelta para abrir una sesión
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preference {
    pub volume: f32,
    pub locked: bool,
    pub repeat: RepeatMode,
}

impl Default for Preference {
    fn default() -> Self {
        Self {
            volume: 1.0,
            locked: false,
            repeat: RepeatMode::Forward,
        }
    }
}

impl UserPreferences {
    /// Orden de resolución: servidor, luego global, luego `fallback`
    pub fn resolve(&self, guild_id: GuildId, fallback: Preference) -> Preference {
        let guild = self.guilds.get(&guild_id.get()).copied().unwrap_or_default();
        let global = self.global;

        Preference {
            volume: guild.volume.or(global.volume).unwrap_or(fallback.volume),
            locked: guild.locked.or(global.locked).unwrap_or(fallback.locked),
            repeat: guild.repeat.or(global.repeat).unwrap_or(fallback.repeat),
        }
    }
}

/// Entrada de caché junto con la fecha de modificación del archivo leído
#[derive(Clone)]
struct CachedUser {
    modified: Option<SystemTime>,
    prefs: Arc<UserPreferences>,
}

/// Lector de preferencias en JSON. El núcleo nunca escribe en él.
#[derive(Clone)]
pub struct PreferenceStore {
    data_dir: PathBuf,
    fallback: Preference,
    users_cache: Arc<DashMap<u64, CachedUser>>,
}

impl PreferenceStore {
    pub async fn new(data_dir: PathBuf, fallback: Preference) -> Result<Self> {
        fs::create_dir_all(data_dir.join("users")).await?;

        info!("📁 Preferencias en: {}", data_dir.display());

        Ok(Self {
            data_dir,
            fallback,
            users_cache: Arc::new(DashMap::new()),
        })
    }

    /// Preferencia efectiva de un usuario en un servidor.
    ///
    /// Un archivo ausente o corrupto equivale a no tener preferencias.
    pub async fn resolve(&self, user_id: UserId, guild_id: GuildId) -> Preference {
        match self.user(user_id).await {
            Ok(Some(prefs)) => prefs.resolve(guild_id, self.fallback),
            Ok(None) => self.fallback,
            Err(e) => {
                warn!("⚠️ Preferencias ilegibles para {}: {:#}", user_id, e);
                self.fallback
            }
        }
    }

    /// Preferencias de un usuario tal como están en disco.
    ///
    /// La caché vale mientras el archivo no cambie de fecha de modificación.
    pub async fn user(&self, user_id: UserId) -> Result<Option<Arc<UserPreferences>>> {
        let key = user_id.get();
        let path = self.user_file_path(key);

        let modified = match fs::metadata(&path).await {
            Ok(metadata) => metadata.modified().ok(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.users_cache.remove(&key);
                debug!("Sin preferencias para {}", user_id);
                return Ok(None);
            }
            Err(e) => return Err(e).with_context(|| format!("leyendo {}", path.display())),
        };

        if let Some(cached) = self.users_cache.get(&key) {
            if modified.is_some() && cached.modified == modified {
                return Ok(Some(cached.prefs.clone()));
            }
        }

        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("leyendo {}", path.display()))?;
        let prefs: UserPreferences = serde_json::from_str(&content)
            .with_context(|| format!("JSON inválido en {}", path.display()))?;
        let prefs = Arc::new(prefs);
        self.users_cache.insert(
            key,
            CachedUser {
                modified,
                prefs: prefs.clone(),
            },
        );

        debug!("📄 Preferencias de {} cargadas", user_id);
        Ok(Some(prefs))
    }

    fn user_file_path(&self, user_id: u64) -> PathBuf {
        self.data_dir.join("users").join(format!("user_{}.json", user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    async fn store_with(files: &[(u64, &str)]) -> (TempDir, PreferenceStore) {
        let dir = TempDir::new().unwrap();
        let store = PreferenceStore::new(dir.path().to_path_buf(), Preference::default())
            .await
            .unwrap();
        for (user, content) in files {
            std::fs::write(dir.path().join("users").join(format!("user_{}.json", user)), content).unwrap();
        }
        (dir, store)
    }

    #[tokio::test]
    async fn test_missing_file_uses_defaults() {
        let (_dir, store) = store_with(&[]).await;
        let pref = store.resolve(UserId::new(1), GuildId::new(10)).await;
        assert_eq!(pref, Preference::default());
    }

    #[tokio::test]
    async fn test_guild_overrides_global() {
        let (_dir, store) = store_with(&[(
            1,
            r#"{
                "user_id": 1,
                "global": { "volume": 0.5, "locked": true, "repeat": 1 },
                "guilds": { "10": { "volume": 0.8 } }
            }"#,
        )])
        .await;

        let in_guild = store.resolve(UserId::new(1), GuildId::new(10)).await;
        assert_eq!(
            in_guild,
            Preference {
                volume: 0.8,
                locked: true,
                repeat: RepeatMode::RepeatQueue,
            }
        );

        let elsewhere = store.resolve(UserId::new(1), GuildId::new(20)).await;
        assert_eq!(elsewhere.volume, 0.5);
    }

    #[tokio::test]
    async fn test_accepts_lock_alias_and_partial_scopes() {
        let (_dir, store) = store_with(&[(2, r#"{ "user_id": 2, "global": { "lock": true } }"#)]).await;
        let pref = store.resolve(UserId::new(2), GuildId::new(10)).await;
        assert!(pref.locked);
        assert_eq!(pref.volume, 1.0);
        assert_eq!(pref.repeat, RepeatMode::Forward);
    }

    #[tokio::test]
    async fn test_corrupt_file_falls_back() {
        let (_dir, store) = store_with(&[(3, "{ not json")]).await;
        assert!(store.user(UserId::new(3)).await.is_err());
        let pref = store.resolve(UserId::new(3), GuildId::new(10)).await;
        assert_eq!(pref, Preference::default());
    }

    #[tokio::test]
    async fn test_cached_until_file_changes() {
        let (dir, store) = store_with(&[(4, r#"{ "user_id": 4, "global": { "volume": 0.3 } }"#)]).await;
        let first = store.user(UserId::new(4)).await.unwrap().unwrap();
        let again = store.user(UserId::new(4)).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        let path = dir.path().join("users").join("user_4.json");
        std::fs::write(&path, r#"{ "user_id": 4, "global": { "volume": 0.9 } }"#).unwrap();
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::now() + std::time::Duration::from_secs(60))
            .unwrap();
        assert_eq!(store.resolve(UserId::new(4), GuildId::new(1)).await.volume, 0.9);

        std::fs::remove_file(&path).unwrap();
        assert_eq!(store.resolve(UserId::new(4), GuildId::new(1)).await, Preference::default());
    }

    #[test]
    fn test_unknown_repeat_code_is_rejected() {
        let parsed: Result<UserPreferences, _> =
            serde_json::from_str(r#"{ "user_id": 1, "global": { "repeat": 12 } }"#);
        assert!(parsed.is_err());
    }
}
