//! Multipart form parsing for image uploads.

use crate::error::{AppError, AppResult};
use axum::body::Bytes;
use axum::extract::multipart::{Multipart, MultipartError};
use axum::http::StatusCode;
use examguard_core::ApplicantData;

/// Form field carrying the image.
pub const IMAGE_FIELD: &str = "face_image";

const ALLOWED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

pub struct ImageUpload {
    pub file_name: String,
    pub bytes: Bytes,
}

pub struct RegistrationForm {
    pub image: ImageUpload,
    pub applicant: ApplicantData,
}

/// True when the file name has a png/jpg/jpeg extension (any case).
pub fn allowed_file(name: &str) -> bool {
    name.rsplit_once('.')
        .map(|(_, ext)| ALLOWED_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Blank means unknown; anything else must be a whole number.
pub fn parse_age(raw: &str) -> AppResult<Option<u32>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse()
        .map(Some)
        .map_err(|_| AppError::BadRequest(format!("Invalid age: {raw}")))
}

/// Read a form that only carries the image.
pub async fn read_image(multipart: Multipart) -> AppResult<ImageUpload> {
    let (image, _) = collect(multipart).await?;
    image
}

/// Read the registration form: image plus applicant fields.
pub async fn read_registration(multipart: Multipart) -> AppResult<RegistrationForm> {
    let (image, fields) = collect(multipart).await?;
    let image = image?;

    let field = |name: &str| {
        fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.trim().to_string())
            .unwrap_or_default()
    };

    let applicant = ApplicantData {
        application_id: field("application_id"),
        full_name: field("full_name"),
        age: parse_age(&field("age"))?,
        exam_type: field("exam_type"),
        location: field("location"),
    };
    for (name, value) in [
        ("application_id", &applicant.application_id),
        ("full_name", &applicant.full_name),
    ] {
        if value.is_empty() {
            return Err(AppError::BadRequest(format!("Missing field: {name}")));
        }
    }

    Ok(RegistrationForm { image, applicant })
}

/// Drain the form. The image slot holds the upload or the input error
/// to report for it; text fields are returned as name/value pairs.
async fn collect(
    mut multipart: Multipart,
) -> AppResult<(AppResult<ImageUpload>, Vec<(String, String)>)> {
    let mut image = Err(AppError::BadRequest("No file provided".into()));
    let mut fields = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(multipart_error)?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if name == IMAGE_FIELD {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(multipart_error)?;
            image = if file_name.is_empty() {
                Err(AppError::BadRequest("No file provided".into()))
            } else if !allowed_file(&file_name) {
                Err(AppError::BadRequest("Invalid file type".into()))
            } else {
                Ok(ImageUpload { file_name, bytes })
            };
        } else {
            let value = field
                .text()
                .await
                .map_err(multipart_error)?;
            fields.push((name, value));
        }
    }

    Ok((image, fields))
}

/// Body-limit overruns surface from the multipart stream; keep their 413.
fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        tracing::debug!(error = %err.body_text(), "upload over body limit");
        AppError::PayloadTooLarge
    } else {
        AppError::BadRequest(err.body_text())
    }
}
