//! Stage 1: turn the running client's encrypted store into plaintext files.
//!
//! All filesystem and collaborator work runs on a blocking worker; the
//! session store is only touched to publish the result.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::ser::PrettyFormatter;

use crate::domain::{
    AppError, DatabaseDecryptor, DiscoveredInstance, InstanceDiscovery, Result, Session,
    SessionDescriptor, SessionSummary, SCHEMA_V3,
};
use crate::infrastructure::{load_version_table, write_atomic};

use super::normalizer::sanitize_label;
use super::session_store::SessionStateStore;

/// Where decryption reads its inputs and writes its outputs.
#[derive(Debug, Clone)]
pub struct DecryptSettings {
    pub version_table: PathBuf,
    /// Parent of the per-owner output directories.
    pub work_dir: PathBuf,
    /// Instance selection: pick this owner instead of the first found.
    pub preferred_owner: Option<String>,
}

/// Coordinates discovery, decryption and session publication.
pub struct DecryptService {
    store: Arc<dyn SessionStateStore>,
    discovery: Arc<dyn InstanceDiscovery>,
    decryptor: Arc<dyn DatabaseDecryptor>,
    settings: DecryptSettings,
}

/// A failed run, remembering whether it already wrote into an output dir.
struct Aborted {
    error: AppError,
    touched: Option<PathBuf>,
}

impl From<AppError> for Aborted {
    fn from(error: AppError) -> Self {
        Self {
            error,
            touched: None,
        }
    }
}

impl DecryptService {
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStateStore>,
        discovery: Arc<dyn InstanceDiscovery>,
        decryptor: Arc<dyn DatabaseDecryptor>,
        settings: DecryptSettings,
    ) -> Self {
        Self {
            store,
            discovery,
            decryptor,
            settings,
        }
    }

    /// Runs the whole decryption stage and publishes a fresh session.
    ///
    /// # Errors
    /// `ConfigUnavailable`, `SourceUnavailable`, `KeyUnavailable`,
    /// `DecryptionFailed`, or IO errors while materializing the output.
    pub async fn decrypt(&self) -> Result<SessionSummary> {
        let discovery = Arc::clone(&self.discovery);
        let decryptor = Arc::clone(&self.decryptor);
        let settings = self.settings.clone();

        let prepared = tokio::task::spawn_blocking(move || {
            prepare_session(&settings, discovery.as_ref(), decryptor.as_ref())
        })
        .await?;

        match prepared {
            Ok(session) => {
                let session = self.store.set(session).await?;
                tracing::info!(
                    owner_id = %session.owner_id,
                    generation = session.generation,
                    db_dir = %session.database_dir().display(),
                    "Decryption completed"
                );
                Ok(session.summary())
            }
            Err(aborted) => {
                if let Some(dir) = aborted.touched {
                    self.invalidate_session_at(&dir).await?;
                }
                tracing::warn!(error = %aborted.error, "Decryption failed");
                Err(aborted.error)
            }
        }
    }

    /// Drops the active session if it reads from a directory we just rewrote.
    async fn invalidate_session_at(&self, dir: &Path) -> Result<()> {
        if let Some(active) = self.store.get().await? {
            if active.session.output_dir == dir
                && self.store.clear_if(active.session.generation).await?
            {
                tracing::warn!(
                    dir = %dir.display(),
                    "Cleared session whose output directory was partially rewritten"
                );
            }
        }
        Ok(())
    }
}

/// Steps 1-6: everything up to (not including) publication.
fn prepare_session(
    settings: &DecryptSettings,
    discovery: &dyn InstanceDiscovery,
    decryptor: &dyn DatabaseDecryptor,
) -> std::result::Result<Session, Aborted> {
    let table = load_version_table(&settings.version_table)?;
    tracing::debug!(versions = table.len(), "Loaded version table");

    let instances = discovery.discover(&table).map_err(|e| match e {
        AppError::SourceUnavailable { .. } => e,
        other => AppError::SourceUnavailable {
            message: other.to_string(),
        },
    })?;
    let instance = select_instance(instances, settings.preferred_owner.as_deref())?;

    tracing::info!(
        owner_id = %instance.owner_id,
        version = %instance.version,
        source = %instance.source_dir.display(),
        "Selected WeChat instance"
    );

    let key = instance
        .key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| AppError::KeyUnavailable {
            owner_id: instance.owner_id.clone(),
        })?
        .to_string();

    let output_dir = settings.work_dir.join(sanitize_label(&instance.owner_id));
    fs::create_dir_all(&output_dir).map_err(|e| {
        AppError::io(
            format!("Failed to create output directory {}", output_dir.display()),
            e,
        )
    })?;

    let touched = |error: AppError| Aborted {
        error,
        touched: Some(output_dir.clone()),
    };

    let report = decryptor
        .decrypt_all(&key, &instance.source_dir, &output_dir)
        .map_err(|e| match e {
            AppError::DecryptionFailed { .. } => touched(e),
            other => touched(AppError::DecryptionFailed {
                attempted: 0,
                first_error: other.to_string(),
            }),
        })?;
    tracing::info!(files = report.files, "Database files decrypted");

    let session = Session {
        generation: 0,
        source_dir: instance.source_dir,
        output_dir: output_dir.clone(),
        owner_id: instance.owner_id,
        display_name: instance.display_name,
        app_version: instance.version,
        schema_version: SCHEMA_V3,
    };

    write_descriptor(&session).map_err(touched)?;

    Ok(session)
}

/// Applies the single-instance contract.
///
/// With a preferred owner the matching instance is required. Without one the
/// first discovered instance is used and the rest are reported as ignored.
///
/// # Errors
/// `SourceUnavailable` when nothing was found or the preferred owner is absent.
pub fn select_instance(
    instances: Vec<DiscoveredInstance>,
    preferred_owner: Option<&str>,
) -> Result<DiscoveredInstance> {
    if instances.is_empty() {
        return Err(AppError::SourceUnavailable {
            message: "no running WeChat 3.x instance found, make sure WeChat is running".into(),
        });
    }

    if let Some(owner) = preferred_owner {
        let found: Vec<String> = instances.iter().map(|i| i.owner_id.clone()).collect();
        return instances
            .into_iter()
            .find(|i| i.owner_id == owner)
            .ok_or_else(|| AppError::SourceUnavailable {
                message: format!("configured owner {owner} not among discovered instances {found:?}"),
            });
    }

    let mut instances = instances.into_iter();
    let chosen = instances.next().ok_or_else(|| AppError::SourceUnavailable {
        message: "no running WeChat instance found".into(),
    })?;
    for ignored in instances {
        tracing::warn!(
            owner_id = %ignored.owner_id,
            "Ignoring additional WeChat instance; set decrypt.owner_id to choose it"
        );
    }

    if chosen.owner_id.trim().is_empty() {
        return Err(AppError::SourceUnavailable {
            message: "discovered instance reported no account id".into(),
        });
    }

    Ok(chosen)
}

/// Writes `info.json` with four-space indentation and raw UTF-8 text.
fn write_descriptor(session: &Session) -> Result<()> {
    let dir = session.database_dir();
    fs::create_dir_all(&dir)
        .map_err(|e| AppError::io(format!("Failed to create {}", dir.display()), e))?;

    let descriptor = SessionDescriptor::from(session);
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    descriptor.serialize(&mut ser).map_err(AppError::json_parse)?;

    write_atomic(&session.descriptor_path(), &buf)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::application::session_store::InMemorySessionStore;
    use crate::test_support::{instance, write_version_table, FakeDecryptor, FakeDiscovery};

    struct Fixture {
        _dir: tempfile::TempDir,
        settings: DecryptSettings,
        source: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("WeChat Files").join("wxid_me");
        fs::create_dir_all(&source).unwrap();
        let version_table = dir.path().join("version_list.json");
        write_version_table(&version_table, &["3.9.12.17"]);
        let settings = DecryptSettings {
            version_table,
            work_dir: dir.path().join("work"),
            preferred_owner: None,
        };
        Fixture {
            _dir: dir,
            settings,
            source,
        }
    }

    fn service(
        store: Arc<InMemorySessionStore>,
        discovery: FakeDiscovery,
        decryptor: FakeDecryptor,
        settings: DecryptSettings,
    ) -> DecryptService {
        DecryptService::new(store, Arc::new(discovery), Arc::new(decryptor), settings)
    }

    fn list_files(dir: &Path) -> HashSet<PathBuf> {
        walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path().strip_prefix(dir).unwrap().to_path_buf())
            .collect()
    }

    #[tokio::test]
    async fn test_decrypt_publishes_session_and_descriptor() {
        let fx = fixture();
        let store = Arc::new(InMemorySessionStore::default());
        let discovery = FakeDiscovery::new(vec![instance("wxid_me", "张三", &fx.source)]);
        let svc = service(Arc::clone(&store), discovery, FakeDecryptor::default(), fx.settings.clone());

        let summary = svc.decrypt().await.unwrap();
        assert_eq!(summary.wxid, "wxid_me");
        assert_eq!(summary.nickname, "张三");
        assert_eq!(summary.db_path, fx.settings.work_dir.join("wxid_me").join("Msg"));

        let active = store.get().await.unwrap().unwrap();
        assert!(active.database.is_none());
        assert_eq!(active.session.schema_version, SCHEMA_V3);

        let text = fs::read_to_string(active.session.descriptor_path()).unwrap();
        assert!(text.contains("张三"), "non-ASCII must not be escaped: {text}");
        assert!(text.contains("\n    \"wxid\": \"wxid_me\""));
        let parsed: SessionDescriptor = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.wx_dir, fx.source);
    }

    #[tokio::test]
    async fn test_missing_version_table_is_config_unavailable() {
        let mut fx = fixture();
        fx.settings.version_table = fx.settings.work_dir.join("absent.json");
        let store = Arc::new(InMemorySessionStore::default());
        let discovery = FakeDiscovery::new(vec![instance("wxid_me", "Me", &fx.source)]);
        let svc = service(Arc::clone(&store), discovery, FakeDecryptor::default(), fx.settings);

        let err = svc.decrypt().await.unwrap_err();
        assert!(matches!(err, AppError::ConfigUnavailable { .. }));
        assert!(store.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_instances_is_source_unavailable() {
        let fx = fixture();
        let store = Arc::new(InMemorySessionStore::default());
        let svc = service(
            Arc::clone(&store),
            FakeDiscovery::new(Vec::new()),
            FakeDecryptor::default(),
            fx.settings,
        );

        let err = svc.decrypt().await.unwrap_err();
        assert!(matches!(err, AppError::SourceUnavailable { .. }));
        assert!(store.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_key_is_key_unavailable() {
        let fx = fixture();
        let mut found = instance("wxid_me", "Me", &fx.source);
        found.key = Some("   ".into());
        let store = Arc::new(InMemorySessionStore::default());
        let svc = service(
            Arc::clone(&store),
            FakeDiscovery::new(vec![found]),
            FakeDecryptor::default(),
            fx.settings,
        );

        let err = svc.decrypt().await.unwrap_err();
        assert!(matches!(err, AppError::KeyUnavailable { ref owner_id } if owner_id == "wxid_me"));
    }

    #[tokio::test]
    async fn test_decryption_failure_keeps_no_session() {
        let fx = fixture();
        let store = Arc::new(InMemorySessionStore::default());
        let svc = service(
            Arc::clone(&store),
            FakeDiscovery::new(vec![instance("wxid_me", "Me", &fx.source)]),
            FakeDecryptor::failing(),
            fx.settings,
        );

        let err = svc.decrypt().await.unwrap_err();
        assert!(matches!(err, AppError::DecryptionFailed { attempted: 2, .. }));
        assert!(store.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_rerun_clears_session_on_same_directory() {
        let fx = fixture();
        let store = Arc::new(InMemorySessionStore::default());
        let found = vec![instance("wxid_me", "Me", &fx.source)];

        service(
            Arc::clone(&store),
            FakeDiscovery::new(found.clone()),
            FakeDecryptor::default(),
            fx.settings.clone(),
        )
        .decrypt()
        .await
        .unwrap();
        assert!(store.get().await.unwrap().is_some());

        let err = service(
            Arc::clone(&store),
            FakeDiscovery::new(found),
            FakeDecryptor::failing(),
            fx.settings,
        )
        .decrypt()
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::DecryptionFailed { .. }));
        assert!(store.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rerun_output_is_superset() {
        let fx = fixture();
        let store = Arc::new(InMemorySessionStore::default());
        let found = vec![instance("wxid_me", "Me", &fx.source)];
        let svc = service(
            Arc::clone(&store),
            FakeDiscovery::new(found),
            FakeDecryptor::default(),
            fx.settings.clone(),
        );

        let first = svc.decrypt().await.unwrap();
        let out = fx.settings.work_dir.join("wxid_me");
        let before = list_files(&out);
        fs::write(out.join("operator-note.txt"), "kept").unwrap();

        let second = svc.decrypt().await.unwrap();
        let after = list_files(&out);

        assert_eq!(first.db_path, second.db_path);
        assert!(after.is_superset(&before));
        assert!(after.contains(Path::new("operator-note.txt")));
    }

    #[test]
    fn test_select_instance_prefers_configured_owner() {
        let a = instance("wxid_a", "A", Path::new("/a"));
        let b = instance("wxid_b", "B", Path::new("/b"));

        let chosen = select_instance(vec![a.clone(), b.clone()], None).unwrap();
        assert_eq!(chosen.owner_id, "wxid_a");

        let chosen = select_instance(vec![a.clone(), b], Some("wxid_b")).unwrap();
        assert_eq!(chosen.owner_id, "wxid_b");

        let err = select_instance(vec![a], Some("wxid_z")).unwrap_err();
        assert!(matches!(err, AppError::SourceUnavailable { .. }));
    }
}
