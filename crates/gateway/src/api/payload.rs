//! Request decoding at the HTTP boundary.
//!
//! Clients send either a JSON body or a multipart form with uploaded
//! files. Both decode into [`RequestPayload`] and from there into one
//! [`TurnRequest`], so the orchestrator never sees wire shapes.

use std::collections::HashMap;

use axum::async_trait;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header::CONTENT_TYPE;
use axum::Json;
use base64::Engine;

use cg_domain::capability::Capability;
use cg_domain::conversation::Attachment;
use cg_domain::error::{Error, Result};

use crate::runtime::TurnRequest;

use super::error::ApiError;

/// Uploads larger than this are rejected.
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug)]
pub struct UploadedFile {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
pub enum RequestPayload {
    Json(TurnRequest),
    Multipart {
        fields: HashMap<String, String>,
        files: Vec<UploadedFile>,
    },
}

#[async_trait]
impl<S> FromRequest<S> for RequestPayload
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        if !is_multipart {
            let Json(body) = Json::<TurnRequest>::from_request(req, state)
                .await
                .map_err(|e| Error::Validation(e.body_text()))?;
            return Ok(RequestPayload::Json(body));
        }

        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|e| Error::Validation(e.body_text()))?;
        let mut fields = HashMap::new();
        let mut files = Vec::new();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| Error::Validation(format!("multipart: {e}")))?
        {
            let name = field.name().unwrap_or_default().to_owned();
            let file_name = field.file_name().map(str::to_owned);
            let mime = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_owned();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| Error::Validation(format!("multipart: {e}")))?;
            match file_name {
                Some(file_name) => {
                    if bytes.len() > MAX_UPLOAD_BYTES {
                        return Err(Error::Validation(format!("{file_name} is too large")).into());
                    }
                    files.push(UploadedFile {
                        name: file_name,
                        mime,
                        bytes: bytes.to_vec(),
                    });
                }
                None => {
                    fields.insert(name, String::from_utf8_lossy(&bytes).into_owned());
                }
            }
        }
        Ok(RequestPayload::Multipart { fields, files })
    }
}

impl RequestPayload {
    pub fn into_turn_request(self) -> Result<TurnRequest> {
        match self {
            RequestPayload::Json(req) => Ok(req),
            RequestPayload::Multipart { mut fields, files } => {
                let capability = match fields.remove("capability").filter(|c| !c.is_empty()) {
                    Some(c) => Some(
                        serde_json::from_value::<Capability>(serde_json::Value::String(c.clone()))
                            .map_err(|_| Error::Validation(format!("unknown capability {c}")))?,
                    ),
                    None => None,
                };
                let mut take = |k: &str| fields.remove(k).filter(|v| !v.trim().is_empty());
                Ok(TurnRequest {
                    thread_id: take("thread_id").unwrap_or_default(),
                    content: take("content").unwrap_or_default(),
                    message_id: take("message_id"),
                    agent: take("agent"),
                    app_id: take("app_id"),
                    attachments: files.into_iter().map(to_attachment).collect(),
                    capability,
                })
            }
        }
    }
}

/// Text uploads are inlined as extracted text; everything else travels
/// as base64.
fn to_attachment(file: UploadedFile) -> Attachment {
    let is_text = file.mime.starts_with("text/")
        || file.mime == "application/json"
        || file.mime == "application/xml";
    if is_text {
        Attachment {
            text: Some(String::from_utf8_lossy(&file.bytes).into_owned()),
            name: file.name,
            mime: file.mime,
            data: None,
            url: None,
        }
    } else {
        Attachment {
            data: Some(base64::engine::general_purpose::STANDARD.encode(&file.bytes)),
            name: file.name,
            mime: file.mime,
            url: None,
            text: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multipart_fields_become_a_turn_request() {
        let mut fields = HashMap::new();
        fields.insert("thread_id".to_string(), "th1".to_string());
        fields.insert("content".to_string(), "what is in this picture?".to_string());
        fields.insert("agent".to_string(), "  ".to_string());
        fields.insert("capability".to_string(), "image_generation".to_string());
        let payload = RequestPayload::Multipart {
            fields,
            files: vec![
                UploadedFile {
                    name: "cat.png".into(),
                    mime: "image/png".into(),
                    bytes: vec![0x89, 0x50, 0x4e, 0x47],
                },
                UploadedFile {
                    name: "notes.md".into(),
                    mime: "text/markdown".into(),
                    bytes: b"# notes".to_vec(),
                },
            ],
        };
        let req = payload.into_turn_request().unwrap();
        assert_eq!(req.thread_id, "th1");
        assert_eq!(req.agent, None);
        assert_eq!(req.capability, Some(Capability::ImageGeneration));
        assert_eq!(req.attachments[0].data.as_deref(), Some("iVBORw=="));
        assert_eq!(req.attachments[1].text.as_deref(), Some("# notes"));
        assert!(req.attachments[1].data.is_none());
    }

    #[test]
    fn unknown_capability_is_rejected() {
        let mut fields = HashMap::new();
        fields.insert("capability".to_string(), "teleport".to_string());
        let err = RequestPayload::Multipart { fields, files: vec![] }
            .into_turn_request()
            .unwrap_err();
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn json_payload_passes_through() {
        let req: TurnRequest =
            serde_json::from_str(r#"{"thread_id":"t","content":"hi"}"#).unwrap();
        let out = RequestPayload::Json(req).into_turn_request().unwrap();
        assert_eq!(out.content, "hi");
        assert!(out.attachments.is_empty());
    }
}
