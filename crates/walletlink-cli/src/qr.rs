//! Terminal QR codes for pairing links.
//!
//! Two QR rows go into one terminal row using half-block characters, which
//! keeps modules roughly square on a 2:1 character cell.

use qrcode::{Color, EcLevel, QrCode};

/// Modules of white border around the code
const QUIET_ZONE: usize = 2;

/// Render `data` as terminal lines no wider than `max_width` columns.
///
/// Error correction is lowered until the code fits.
///
/// # Errors
///
/// Returns an error if `data` does not fit in any QR code at that width.
pub fn render_lines(data: &str, max_width: usize) -> anyhow::Result<Vec<String>> {
    for level in [EcLevel::M, EcLevel::L] {
        let Ok(code) = QrCode::with_error_correction_level(data, level) else {
            continue;
        };
        let size = code.width();
        let total = size + QUIET_ZONE * 2;
        if total > max_width {
            tracing::debug!("QR code at {:?} needs {} columns, have {}", level, total, max_width);
            continue;
        }

        let colors = code.to_colors();
        let dark = |x: usize, y: usize| -> bool {
            if x < QUIET_ZONE || y < QUIET_ZONE {
                return false;
            }
            let (qx, qy) = (x - QUIET_ZONE, y - QUIET_ZONE);
            qx < size && qy < size && colors[qy * size + qx] == Color::Dark
        };

        let lines = (0..total.div_ceil(2))
            .map(|pair| {
                (0..total)
                    .map(|x| match (dark(x, pair * 2), dark(x, pair * 2 + 1)) {
                        (true, true) => '█',
                        (true, false) => '▀',
                        (false, true) => '▄',
                        (false, false) => ' ',
                    })
                    .collect()
            })
            .collect();
        return Ok(lines);
    }
    anyhow::bail!(
        "pairing link ({} chars) does not fit a QR code {} columns wide",
        data.len(),
        max_width
    )
}

/// Print the QR code for `data`, sized to the current terminal.
///
/// Prints nothing when the terminal is too narrow; the link is always
/// printed separately.
pub fn print(data: &str) {
    let (_, columns) = console::Term::stdout().size();
    match render_lines(data, usize::from(columns)) {
        Ok(lines) => {
            for line in lines {
                // Light modules on a dark background read inverted, so force colours
                println!("{}", console::style(line).black().on_white());
            }
        }
        Err(e) => tracing::warn!("Not showing QR code: {}", e),
    }
}
