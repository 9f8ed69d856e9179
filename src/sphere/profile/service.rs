//! Profiles: lazy creation, save, avatar upload and bio suggestion

use crate::sphere::ai::bio_prompt;
use crate::sphere::backend::{Filter, Query};
use crate::sphere::context::SphereContext;
use crate::sphere::error::{SphereError, SphereResult};
use crate::sphere::live::Validate;
use crate::sphere::profile::models::{check_language, Profile, AVATAR_BUCKET, AVATAR_MAX_EDGE, PROFILES};
use anyhow::Context as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use serde_json::json;
use std::io::Cursor;
use tracing::{info, warn};

#[derive(Clone)]
pub struct ProfileService {
    ctx: SphereContext,
}

impl ProfileService {
    pub fn new(ctx: SphereContext) -> Self {
        Self { ctx }
    }

    pub async fn get(&self, user_id: &str) -> SphereResult<Option<Profile>> {
        self.ctx
            .fetch_one(Query::table(PROFILES).eq("id", user_id))
            .await
    }

    pub async fn find_by_username(&self, username: &str) -> SphereResult<Option<Profile>> {
        self.ctx
            .fetch_one(Query::table(PROFILES).eq("username", username.trim()))
            .await
    }

    /// The signed-in user's profile, created with defaults on first load.
    ///
    /// When the email prefix is already taken the username gets a short
    /// suffix from the user id.
    pub async fn load_or_create(&self) -> SphereResult<Profile> {
        let user = self.ctx.require_user().await?;
        if let Some(profile) = self.get(&user.id).await? {
            return Ok(profile);
        }

        let mut profile = Profile::default_for(&user.id, &user.email);
        match self.store(&profile).await {
            Ok(stored) => Ok(stored),
            Err(e) => {
                let suffix: String = user.id.chars().filter(|c| c.is_ascii_alphanumeric()).take(6).collect();
                warn!(
                    "[Profile] default username {} rejected ({}), retrying with suffix",
                    profile.username, e
                );
                profile.username = format!("{}-{}", profile.username, suffix);
                let stored = self.store(&profile).await?;
                info!("[Profile] created {}", stored.username);
                Ok(stored)
            }
        }
    }

    /// Validates and saves the signed-in user's profile
    pub async fn save(&self, profile: &Profile) -> SphereResult<Profile> {
        profile.validate()?;
        let user = self.ctx.require_user().await?;
        if profile.id != user.id {
            return Err(SphereError::rejected("cannot edit another user's profile"));
        }
        let stored = self.store(profile).await?;
        info!("[Profile] 💾 saved {}", stored.username);
        Ok(stored)
    }

    /// Stores the interface language of the signed-in user.
    ///
    /// Only `{id, language}` is written, so the rest of the profile is left
    /// as it is.
    pub async fn set_language(&self, code: &str) -> SphereResult<Profile> {
        let language = check_language(code)?;
        let profile = self.load_or_create().await?;
        if profile.language == language {
            return Ok(profile);
        }
        let rows = self
            .ctx
            .store
            .upsert(PROFILES, json!({ "id": profile.id, "language": language }), "id")
            .await
            .context("failed to save language preference")?;
        let stored = rows
            .into_iter()
            .next()
            .ok_or_else(|| SphereError::Remote(anyhow::anyhow!("profile upsert returned no row")))?;
        let updated: Profile = serde_json::from_value(stored).context("unexpected profile row")?;
        info!("[Profile] 🌐 language set to {}", updated.language);
        Ok(updated)
    }

    /// Resizes an image to at most 512px, stores it as JPEG and points the
    /// profile's `avatar_url` at it
    pub async fn upload_avatar(&self, image_bytes: Vec<u8>) -> SphereResult<Profile> {
        let profile = self.load_or_create().await?;
        let jpeg = tokio::task::spawn_blocking(move || resize_avatar(&image_bytes))
            .await
            .context("avatar encoder task failed")??;

        let path = format!(
            "avatars/{}-{}.jpg",
            profile.id,
            chrono::Utc::now().timestamp_millis()
        );
        let url = self
            .ctx
            .storage
            .upload(AVATAR_BUCKET, &path, jpeg, "image/jpeg")
            .await
            .context("avatar upload failed")?;

        let updated = self
            .ctx
            .mutator()
            .update::<Profile>(
                PROFILES,
                &Filter::new().eq("id", profile.id.clone()),
                json!({ "avatar_url": url }),
                None,
            )
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SphereError::rejected("profile disappeared during upload"))?;
        info!("[Profile] 🖼️ avatar stored at {}", path);
        Ok(updated)
    }

    /// AI bio draft, `None` when the assistant is unavailable
    pub async fn suggest_bio(&self, profile: &Profile) -> Option<String> {
        let prompt = bio_prompt(
            &profile.username,
            profile.portfolio_url.as_deref(),
            profile.linkedin_url.as_deref(),
        );
        self.ctx.ai.generate(&prompt).await
    }

    async fn store(&self, profile: &Profile) -> SphereResult<Profile> {
        let row = serde_json::to_value(profile).context("failed to encode profile")?;
        let rows = self
            .ctx
            .store
            .upsert(PROFILES, row, "id")
            .await
            .context("failed to save profile")?;
        let stored = rows
            .into_iter()
            .next()
            .ok_or_else(|| SphereError::Remote(anyhow::anyhow!("profile upsert returned no row")))?;
        Ok(serde_json::from_value(stored).context("unexpected profile row")?)
    }
}

fn resize_avatar(bytes: &[u8]) -> anyhow::Result<Vec<u8>> {
    let img = image::load_from_memory(bytes).context("unsupported image")?;
    let img = if img.width() > AVATAR_MAX_EDGE || img.height() > AVATAR_MAX_EDGE {
        img.resize(AVATAR_MAX_EDGE, AVATAR_MAX_EDGE, FilterType::Triangle)
    } else {
        img
    };
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img.to_rgb8())
        .write_with_encoder(JpegEncoder::new_with_quality(&mut out, 85))
        .context("failed to encode avatar")?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sphere::ai::TextGenerator;
    use crate::sphere::backend::{IdentityProvider, LocalBackend};
    use image::{ImageBuffer, Rgb};

    async fn setup() -> (ProfileService, std::sync::Arc<LocalBackend>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let backend = std::sync::Arc::new(
            LocalBackend::open("sqlite::memory:")
                .await
                .unwrap()
                .storage_dir(dir.path()),
        );
        let ctx = SphereContext::from_backend(backend.clone(), TextGenerator::new(None));
        (ProfileService::new(ctx), backend, dir)
    }

    #[tokio::test]
    async fn first_load_creates_and_clashing_names_get_a_suffix() {
        let (service, backend, _dir) = setup().await;
        backend.sign_in("ana@example.com", "pw").await.unwrap();
        let first = service.load_or_create().await.unwrap();
        assert_eq!(first.username, "ana");
        assert_eq!(service.load_or_create().await.unwrap(), first);

        backend.sign_in("ana@elsewhere.org", "pw").await.unwrap();
        let second = service.load_or_create().await.unwrap();
        assert!(second.username.starts_with("ana-"));
        assert_ne!(second.id, first.id);
    }

    #[tokio::test]
    async fn save_rejects_bad_links_before_writing() {
        let (service, backend, _dir) = setup().await;
        backend.sign_in("ana@example.com", "pw").await.unwrap();
        let mut profile = service.load_or_create().await.unwrap();
        profile.instagram_url = Some("instagram".into());
        let err = service.save(&profile).await.unwrap_err();
        assert_eq!(err.field_error().unwrap().field, "instagram_url");

        profile.instagram_url = Some("https://instagram.com/ana".into());
        profile.bio = Some("Composting in Jakarta".into());
        let saved = service.save(&profile).await.unwrap();
        assert_eq!(saved.bio.as_deref(), Some("Composting in Jakarta"));
        assert!(service.suggest_bio(&saved).await.is_none());
    }

    #[tokio::test]
    async fn language_is_saved_without_touching_other_fields() {
        let (service, backend, _dir) = setup().await;
        assert!(matches!(service.set_language("id").await, Err(SphereError::Unauthenticated)));
        backend.sign_in("ana@example.com", "pw").await.unwrap();

        let mut profile = service.load_or_create().await.unwrap();
        profile.bio = Some("Composting in Jakarta".into());
        service.save(&profile).await.unwrap();

        let err = service.set_language("fr").await.unwrap_err();
        assert_eq!(err.field_error().unwrap().field, "language");

        let updated = service.set_language(" ID ").await.unwrap();
        assert_eq!(updated.language, "id");
        assert_eq!(updated.bio.as_deref(), Some("Composting in Jakarta"));
        assert_eq!(service.get(&updated.id).await.unwrap().unwrap().language, "id");
    }

    #[tokio::test]
    async fn avatar_is_resized_and_linked() {
        let (service, backend, dir) = setup().await;
        backend.sign_in("ana@example.com", "pw").await.unwrap();

        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(1024, 600, Rgb([20, 160, 90]));
        let mut png = Cursor::new(Vec::new());
        img.write_to(&mut png, image::ImageFormat::Png).unwrap();

        let profile = service.upload_avatar(png.into_inner()).await.unwrap();
        let url = profile.avatar_url.unwrap();
        assert!(url.starts_with("file://"));

        let stored = std::fs::read_dir(dir.path().join(AVATAR_BUCKET).join("avatars"))
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        let decoded = image::load_from_memory(&std::fs::read(stored.path()).unwrap()).unwrap();
        assert_eq!(decoded.width(), AVATAR_MAX_EDGE);
        assert!(decoded.height() <= AVATAR_MAX_EDGE);

        assert!(service.upload_avatar(b"not an image".to_vec()).await.is_err());
    }
}
