use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

use super::models::CreatePostRequest;
use crate::config::ApiLimits;
use crate::lifecycle::ImageUpload;

#[derive(Debug, Error)]
pub enum PostValidationError {
    #[error("title must not be empty")]
    EmptyTitle,
    #[error("title exceeds {0} characters")]
    TitleTooLong(usize),
    #[error("body exceeds {0} characters")]
    BodyTooLong(usize),
    #[error("category must not be blank when present")]
    BlankCategory,
    #[error("at most {0} images per post")]
    TooManyImages(usize),
    #[error("image '{0}' must have an image/* content type")]
    NotAnImage(String),
    #[error("image '{0}' is not valid base64")]
    InvalidEncoding(String),
    #[error("image '{0}' is empty")]
    EmptyImage(String),
    #[error("image '{name}' exceeds {limit} bytes")]
    ImageTooLarge { name: String, limit: u64 },
}

/// Check a create request against the configured limits and decode its images
pub fn validate_post(
    request: &CreatePostRequest,
    limits: &ApiLimits,
) -> Result<Vec<ImageUpload>, PostValidationError> {
    if request.title.trim().is_empty() {
        return Err(PostValidationError::EmptyTitle);
    }
    if request.title.chars().count() > limits.max_title_chars {
        return Err(PostValidationError::TitleTooLong(limits.max_title_chars));
    }
    if request.body.chars().count() > limits.max_body_chars {
        return Err(PostValidationError::BodyTooLong(limits.max_body_chars));
    }
    if request.category.as_deref().is_some_and(|c| c.trim().is_empty()) {
        return Err(PostValidationError::BlankCategory);
    }
    if request.images.len() > limits.max_images_per_post {
        return Err(PostValidationError::TooManyImages(limits.max_images_per_post));
    }

    let mut uploads = Vec::with_capacity(request.images.len());
    for image in &request.images {
        let is_image = image
            .content_type
            .parse::<mime::Mime>()
            .is_ok_and(|m| m.type_() == mime::IMAGE);
        if !is_image {
            return Err(PostValidationError::NotAnImage(image.file_name.clone()));
        }

        let data = STANDARD
            .decode(image.data.trim())
            .map_err(|_| PostValidationError::InvalidEncoding(image.file_name.clone()))?;
        if data.is_empty() {
            return Err(PostValidationError::EmptyImage(image.file_name.clone()));
        }
        if data.len() as u64 > limits.max_image_bytes.as_u64() {
            return Err(PostValidationError::ImageTooLarge {
                name: image.file_name.clone(),
                limit: limits.max_image_bytes.as_u64(),
            });
        }

        uploads.push(ImageUpload {
            file_name: image.file_name.clone(),
            content_type: image.content_type.clone(),
            data,
        });
    }

    Ok(uploads)
}
