use std::collections::HashMap;

use axum::{
    Json,
    body::Bytes,
    extract::{FromRequest, Multipart, Request, multipart::MultipartError},
    http::{StatusCode, header::CONTENT_TYPE},
};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::AppError;

/// JSON body whose rejections come back as our own 400 instead of axum's
/// plain-text 415/422.
pub struct Payload<T>(pub T);

impl<T, S> FromRequest<S> for Payload<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(request, state)
            .await
            .map_err(|rejection| {
                debug!(error = %rejection.body_text(), "Rejected JSON body");
                AppError::MalformedPayload
            })?;

        Ok(Payload(value))
    }
}

pub struct Upload {
    pub file_name: String,
    pub bytes: Bytes,
}

/// Text parts plus at most one file part from a multipart body.
#[derive(Default)]
pub struct FormParts {
    pub text: HashMap<String, String>,
    pub file: Option<Upload>,
}

impl FormParts {
    pub fn take(&mut self, name: &str) -> Option<String> {
        self.text.remove(name)
    }
}

fn multipart_error(error: MultipartError) -> AppError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge("File too large".to_string())
    } else {
        debug!(error = %error.body_text(), "Rejected multipart body");
        AppError::MalformedPayload
    }
}

/// Drains a multipart body. Only the part named `file_field` is kept as a
/// file, every other part is read as text.
pub async fn read_form(mut multipart: Multipart, file_field: &str) -> Result<FormParts, AppError> {
    let mut form = FormParts::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if name == file_field {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let bytes = field.bytes().await.map_err(multipart_error)?;
            if !bytes.is_empty() {
                form.file = Some(Upload { file_name, bytes });
            }
        } else {
            let value = field.text().await.map_err(multipart_error)?;
            form.text.insert(name, value);
        }
    }

    Ok(form)
}

/// A body that may arrive either as JSON or as a multipart form carrying the
/// same fields as text parts.
pub struct JsonOrForm<T> {
    pub body: T,
    pub file: Option<Upload>,
}

/// Builds `T` from the text parts of a multipart form.
pub trait FromForm: Sized {
    const FILE_FIELD: &'static str;

    fn from_form(form: &mut FormParts) -> Self;
}

impl<T, S> FromRequest<S> for JsonOrForm<T>
where
    T: DeserializeOwned + FromForm,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("multipart/form-data"));

        if !is_multipart {
            let Payload(body) = Payload::<T>::from_request(request, state).await?;
            return Ok(JsonOrForm { body, file: None });
        }

        let multipart = Multipart::from_request(request, state)
            .await
            .map_err(|_| AppError::MalformedPayload)?;
        let mut form = read_form(multipart, T::FILE_FIELD).await?;

        Ok(JsonOrForm {
            body: T::from_form(&mut form),
            file: form.file.take(),
        })
    }
}

/// Parses a bare string into a serde enum, using the enum's wire names.
pub fn parse_variant<T: DeserializeOwned>(raw: &str) -> Option<T> {
    serde_json::from_value(serde_json::Value::String(raw.trim().to_string())).ok()
}
