//! PNG rendering of the scan URL a phone app opens.

use anyhow::{Context, Result};
use image::{ImageFormat, Luma};
use qrcode::QrCode;
use std::io::Cursor;
use url::Url;

pub const SCAN_BASE_URL: &str = "https://account.bilibili.com/h5/account-h5/auth/scan-web";

/// Pixels per QR module.
const MODULE_SIZE: u32 = 10;

/// URL encoded into the QR image for `qrcode_key`.
#[must_use]
pub fn scan_url(qrcode_key: &str) -> String {
    match Url::parse_with_params(
        SCAN_BASE_URL,
        &[
            ("navhide", "1"),
            ("callback", "close"),
            ("qrcode_key", qrcode_key),
        ],
    ) {
        Ok(url) => url.to_string(),
        Err(_) => format!("{SCAN_BASE_URL}?navhide=1&callback=close&qrcode_key={qrcode_key}"),
    }
}

/// Encode `content` as a black-on-white PNG.
/// # Errors
/// Returns an error if the content does not fit in a QR code or PNG encoding fails.
pub fn render_png(content: &str) -> Result<Vec<u8>> {
    let code = QrCode::new(content.as_bytes()).context("Failed to encode QR code")?;

    let bitmap = code
        .render::<Luma<u8>>()
        .module_dimensions(MODULE_SIZE, MODULE_SIZE)
        .build();

    let mut png = Cursor::new(Vec::new());
    bitmap
        .write_to(&mut png, ImageFormat::Png)
        .context("Failed to encode PNG")?;

    Ok(png.into_inner())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

    #[test]
    fn scan_url_carries_the_key() {
        assert_eq!(
            scan_url("abc123"),
            "https://account.bilibili.com/h5/account-h5/auth/scan-web?navhide=1&callback=close&qrcode_key=abc123"
        );
    }

    #[test]
    fn render_png_produces_a_decodable_square() {
        let png = render_png(&scan_url("abc123")).unwrap();
        assert!(png.starts_with(PNG_MAGIC));

        let decoded = image::load_from_memory_with_format(&png, ImageFormat::Png).unwrap();
        assert_eq!(decoded.width(), decoded.height());
        assert_eq!(decoded.width() % MODULE_SIZE, 0);
    }
}
