//! Fetch URLs for stored objects
//!
//! Public storage hands out plain object URLs; private storage hands out
//! time-limited signed URLs.

use std::sync::Arc;
use std::time::Duration;

use crate::backend::Acl;
use crate::client::StoreClient;
use crate::config::ConnectionConfig;
use crate::error::{ConfigError, Result};

/// Signed URL lifetime when none is configured: 1 hour
pub const DEFAULT_URL_EXPIRY: Duration = Duration::from_secs(60 * 60);

/// How stored objects are exposed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public { secure: bool },
    Private { expires: Duration, secure: bool },
}

impl Visibility {
    pub fn from_config(config: &ConnectionConfig) -> std::result::Result<Self, ConfigError> {
        let secure = config.is_secure()?;
        if config.is_private()? {
            Ok(Visibility::Private {
                expires: config.expires()?.unwrap_or(DEFAULT_URL_EXPIRY),
                secure,
            })
        } else {
            Ok(Visibility::Public { secure })
        }
    }

    /// ACL applied to newly written objects
    pub fn acl(&self) -> Acl {
        match self {
            Visibility::Public { .. } => Acl::PublicRead,
            Visibility::Private { .. } => Acl::Private,
        }
    }
}

/// Derives fetch URLs from configuration and an object reference.
///
/// Visibility is read from the configuration on every call, so a
/// [`ConnectionConfig::reload`] applies to URLs and upload ACLs alike.
pub struct UrlSigner {
    client: Arc<StoreClient>,
    fixed: Option<Visibility>,
}

impl UrlSigner {
    pub fn new(client: Arc<StoreClient>) -> Self {
        Self {
            client,
            fixed: None,
        }
    }

    /// Signer that ignores the configured visibility
    pub fn with_visibility(client: Arc<StoreClient>, visibility: Visibility) -> Self {
        Self {
            client,
            fixed: Some(visibility),
        }
    }

    pub fn visibility(&self) -> Result<Visibility> {
        match self.fixed {
            Some(visibility) => Ok(visibility),
            None => Ok(Visibility::from_config(self.client.config())?),
        }
    }

    pub async fn url_for(&self, key: &str) -> Result<String> {
        let object = self.client.object_ref(key).await?;
        match self.visibility()? {
            Visibility::Public { secure } => Ok(object.public_url(secure)),
            Visibility::Private { expires, secure } => object.presigned_url(expires, secure).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, S3Backend, S3Settings};
    use crate::config::StorageSettings;

    fn config(private: bool, expires: Option<u64>) -> Arc<ConnectionConfig> {
        Arc::new(ConnectionConfig::from_settings(StorageSettings {
            access_key_id: Some("AKIDEXAMPLE".to_string()),
            secret_access_key: Some("wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string()),
            bucket: Some("files".to_string()),
            private,
            expires,
            secure: true,
            ..Default::default()
        }))
    }

    fn s3_signer(config: Arc<ConnectionConfig>) -> UrlSigner {
        let settings = S3Settings::from_config(&config).unwrap();
        let client = StoreClient::with_backend(config, Arc::new(S3Backend::new(&settings)));
        UrlSigner::new(Arc::new(client))
    }

    #[test]
    fn test_visibility_from_config() {
        assert_eq!(
            Visibility::from_config(&config(false, None)).unwrap(),
            Visibility::Public { secure: true }
        );
        assert_eq!(
            Visibility::from_config(&config(true, Some(600))).unwrap(),
            Visibility::Private {
                expires: Duration::from_secs(600),
                secure: true
            }
        );
        assert_eq!(
            Visibility::from_config(&config(true, None)).unwrap(),
            Visibility::Private {
                expires: DEFAULT_URL_EXPIRY,
                secure: true
            }
        );
    }

    #[tokio::test]
    async fn test_public_url() {
        let signer = s3_signer(config(false, None));
        let url = signer.url_for("a1b2.png").await.unwrap();

        assert!(url.starts_with("https://"));
        assert!(url.contains("a1b2.png"));
        assert!(!url.contains('?'));
    }

    #[tokio::test]
    async fn test_private_url_is_signed_with_expiry() {
        let public = s3_signer(config(false, None)).url_for("a1b2.png").await.unwrap();
        let signed = s3_signer(config(true, Some(3600)))
            .url_for("a1b2.png")
            .await
            .unwrap();

        assert!(signed.starts_with("https://"));
        assert!(signed.contains("X-Amz-Expires=3600"));
        assert_ne!(signed, public);
    }

    #[tokio::test]
    async fn test_reload_switches_url_policy() {
        use crate::config::ConfigSource;
        use parking_lot::Mutex;

        struct Switchable(Arc<Mutex<bool>>);

        impl ConfigSource for Switchable {
            fn load(&self) -> std::result::Result<StorageSettings, ConfigError> {
                Ok(StorageSettings {
                    access_key_id: Some("key".to_string()),
                    secret_access_key: Some("secret".to_string()),
                    bucket: Some("files".to_string()),
                    private: *self.0.lock(),
                    secure: true,
                    ..Default::default()
                })
            }
        }

        let private = Arc::new(Mutex::new(false));
        let config = Arc::new(ConnectionConfig::new(Switchable(private.clone())));
        let client = StoreClient::with_backend(config.clone(), Arc::new(MemoryBackend::new()));
        let signer = UrlSigner::new(Arc::new(client));

        let url = signer.url_for("a1b2.png").await.unwrap();
        assert_eq!(url, "https://memory.local/files/a1b2.png");

        *private.lock() = true;
        config.reload().unwrap();

        let url = signer.url_for("a1b2.png").await.unwrap();
        assert!(url.contains("X-Amz-Expires=3600"));
        assert_eq!(signer.visibility().unwrap().acl(), Acl::Private);
    }

    #[tokio::test]
    async fn test_explicit_visibility_overrides_config() {
        let config = config(false, None);
        let client = StoreClient::with_backend(config, Arc::new(MemoryBackend::new()));
        let signer = UrlSigner::with_visibility(
            Arc::new(client),
            Visibility::Private {
                expires: Duration::from_secs(30),
                secure: false,
            },
        );

        let url = signer.url_for("a1b2.png").await.unwrap();
        assert!(url.starts_with("http://"));
        assert!(url.contains("X-Amz-Expires=30"));
    }
}
