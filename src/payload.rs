//! QR payloads: the `{"student_uid": ...}` JSON carried by every student
//! badge, the UID generator, and SVG rendering of the code itself.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use qrcode::{render::svg, QrCode};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const UID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
pub const UID_LEN: usize = 14;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct QrPayload {
    pub student_uid: String,
}

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("Invalid QR payload")]
    Malformed(#[from] serde_json::Error),
    #[error("Invalid QR payload: student_uid is empty")]
    EmptyUid,
    #[error("failed to encode QR code: {0}")]
    Encode(#[from] qrcode::types::QrError),
}

impl QrPayload {
    pub fn new(student_uid: impl Into<String>) -> Self {
        Self {
            student_uid: student_uid.into(),
        }
    }

    /// Parse decoded QR text. Anything but an object with exactly a
    /// non-empty `student_uid` string is rejected.
    pub fn decode(text: &str) -> Result<Self, PayloadError> {
        let payload: QrPayload = serde_json::from_str(text.trim())?;
        if payload.student_uid.trim().is_empty() {
            return Err(PayloadError::EmptyUid);
        }
        Ok(payload)
    }

    pub fn encode(&self) -> String {
        // a single String field cannot fail to serialize
        serde_json::json!({ "student_uid": self.student_uid }).to_string()
    }
}

/// Generate a fresh student UID.
pub fn generate_student_uid() -> String {
    let mut rng = rand::thread_rng();
    (0..UID_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..UID_CHARSET.len());
            UID_CHARSET[idx] as char
        })
        .collect()
}

/// Render a payload as an SVG QR code.
pub fn render_svg(payload: &QrPayload) -> Result<String, PayloadError> {
    let code = QrCode::new(payload.encode().as_bytes())?;
    Ok(code
        .render::<svg::Color<'_>>()
        .quiet_zone(true)
        .module_dimensions(6, 6)
        .build())
}

/// Render a payload as a `data:` URL suitable for an `<img src>`.
pub fn render_data_url(payload: &QrPayload) -> Result<String, PayloadError> {
    let svg = render_svg(payload)?;
    Ok(format!("data:image/svg+xml;base64,{}", BASE64.encode(svg)))
}
