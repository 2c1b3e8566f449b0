use tracing::{info, warn};

use crate::{
    api::StudioApi,
    error::StudioError,
    models::{GeneratedImage, Provider},
    upload::SourceImage,
};

pub const EDITORIAL_PROMPT: &str = "Professional e-commerce product photo of the item in this image. \
Clean pure white background, soft even studio lighting, sharp focus, true-to-life colors, \
subtle natural shadow, no text, no watermark, no props.";

pub const NANO_PROMPT: &str = "Enhance this product photo for an online catalog: \
remove the background and replace it with seamless white, correct exposure and color, \
keep the product shape, texture and branding exactly as they are.";

/// One prompt per angle; the edit endpoints are called once for each.
pub const ANGLE_PROMPTS: [&str; 4] = [
    "Studio catalog shot of this product from the front, centered, white background, soft shadows.",
    "Studio catalog shot of this product at a three-quarter angle from the left, white background.",
    "Studio catalog shot of this product seen from directly above, flat lay, white background.",
    "Close-up detail shot of this product highlighting material and texture, neutral background.",
];

/// Single request; the returned image list becomes the generation.
pub async fn run_photoroom(
    api: &dyn StudioApi,
    image: &SourceImage,
) -> Result<Vec<GeneratedImage>, StudioError> {
    info!("🎨 Requesting photoroom enhancement for {}", image.file_name);
    let response = api.enhance_photoroom(image, EDITORIAL_PROMPT).await?;
    let images: Vec<GeneratedImage> = response
        .image_urls()
        .into_iter()
        .enumerate()
        .map(|(i, url)| GeneratedImage::completed(format!("{}-{}", Provider::Photoroom, i + 1), Provider::Photoroom, url))
        .collect();
    info!("✅ photoroom returned {} image(s)", images.len());
    Ok(images)
}

/// Four concurrent edit requests, one per angle prompt. Failed or empty
/// responses are dropped; only a batch where every request failed is an error.
pub async fn run_four_angles(
    api: &dyn StudioApi,
    provider: Provider,
    image: &SourceImage,
) -> Result<Vec<GeneratedImage>, StudioError> {
    info!("🎨 Requesting {} angle edits from {}", ANGLE_PROMPTS.len(), provider);
    let [p1, p2, p3, p4] = ANGLE_PROMPTS;
    let (r1, r2, r3, r4) = tokio::join!(
        api.edit_image(provider, image, p1),
        api.edit_image(provider, image, p2),
        api.edit_image(provider, image, p3),
        api.edit_image(provider, image, p4),
    );

    let mut first_error = None;
    let mut images = Vec::new();
    for (i, result) in [r1, r2, r3, r4].into_iter().enumerate() {
        match result {
            Ok(response) => match response.image_url() {
                Some(url) => images.push(GeneratedImage::completed(
                    format!("{}-{}", provider, i + 1),
                    provider,
                    url.to_string(),
                )),
                None => warn!(
                    "⚠️ {} angle {} returned no image: {}",
                    provider,
                    i + 1,
                    response.message.as_deref().unwrap_or("no message")
                ),
            },
            Err(e) => {
                warn!("⚠️ {} angle {} failed: {}", provider, i + 1, e);
                first_error.get_or_insert(e);
            }
        }
    }

    let failed_all = images.is_empty() && first_error.is_some();
    match first_error {
        Some(e) if failed_all => Err(e),
        _ => {
            info!("✅ {} produced {} of {} image(s)", provider, images.len(), ANGLE_PROMPTS.len());
            Ok(images)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::fake::{edited, FakeApi},
        models::{EditResponse, PhotoroomResponse, TaskStatus},
        upload::png,
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn one_rejection_leaves_three_images() {
        let api = FakeApi::default();
        {
            let mut edits = api.edits.lock();
            edits.push_back(Ok(edited("https://cdn/1.png")));
            edits.push_back(Err(StudioError::transport("timeout")));
            edits.push_back(Ok(edited("https://cdn/3.png")));
            edits.push_back(Ok(edited("https://cdn/4.png")));
        }

        let images = run_four_angles(&api, Provider::Dalle, &png("shoe.png")).await.unwrap();
        assert_eq!(images.len(), 3);
        assert!(images.iter().all(|g| g.status == TaskStatus::Completed));
        assert_eq!(
            images.iter().map(|g| g.id.as_str()).collect::<Vec<_>>(),
            vec!["dalle-1", "dalle-3", "dalle-4"]
        );
        assert_eq!(api.calls_to("edit:dalle:"), 4);
    }

    #[tokio::test]
    async fn responses_without_url_are_dropped_silently() {
        let api = FakeApi::default();
        {
            let mut edits = api.edits.lock();
            edits.push_back(Ok(EditResponse::default()));
            edits.push_back(Ok(edited("")));
            edits.push_back(Ok(EditResponse::default()));
            edits.push_back(Ok(EditResponse::default()));
        }
        let images = run_four_angles(&api, Provider::Stability, &png("shoe.png")).await.unwrap();
        assert!(images.is_empty());
    }

    #[tokio::test]
    async fn all_rejections_surface_one_error() {
        let api = FakeApi::default();
        {
            let mut edits = api.edits.lock();
            edits.push_back(Err(StudioError::Transport { provider_message: Some("Out of credits".into()), detail: "402".into() }));
            for _ in 0..3 {
                edits.push_back(Err(StudioError::transport("down")));
            }
        }
        let err = run_four_angles(&api, Provider::Stability, &png("shoe.png")).await.unwrap_err();
        assert!(matches!(err, StudioError::Transport { provider_message: Some(m), .. } if m == "Out of credits"));
    }

    #[tokio::test]
    async fn photoroom_maps_image_list() {
        let api = FakeApi::default();
        let response: PhotoroomResponse =
            serde_json::from_value(json!({ "images": ["https://cdn/a.png", { "url": "https://cdn/b.png" }] })).unwrap();
        api.photoroom.lock().push_back(Ok(response));

        let images = run_photoroom(&api, &png("shoe.png")).await.unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[1].id, "photoroom-2");
        assert_eq!(images[1].url.as_deref(), Some("https://cdn/b.png"));
    }
}
