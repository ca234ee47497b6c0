//! QR rendering of pairing codes, for scanning with the phone.

use qrcode::render::{svg, unicode};
use qrcode::types::QrError;
use qrcode::{EcLevel, QrCode};

/// Side length, in pixels, of the written SVG.
const IMAGE_SIZE: u32 = 256;

/// A pairing code drawn two ways.
#[derive(Debug, Clone)]
pub struct PairingQr {
    /// Half-block text for terminals and logs.
    pub terminal: String,
    /// Standalone SVG document.
    pub svg: String,
}

pub fn render_pairing_code(code: &str) -> Result<PairingQr, QrError> {
    let qr = QrCode::with_error_correction_level(code.as_bytes(), EcLevel::M)?;

    // Inverted so the code reads correctly on dark terminal backgrounds.
    let terminal = qr
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .quiet_zone(true)
        .build();

    let svg = qr
        .render::<svg::Color<'_>>()
        .min_dimensions(IMAGE_SIZE, IMAGE_SIZE)
        .build();

    Ok(PairingQr { terminal, svg })
}
