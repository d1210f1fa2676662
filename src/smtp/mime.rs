//! MIME composition helpers for the single-attachment `multipart/mixed`
//! message the delivery path sends (§4.4/§4.5).

use rand::Rng;

const BASE64_LINE_LEN: usize = 76;

/// Generate a random boundary token suitable for a `multipart/mixed` header.
pub fn generate_boundary() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..24)
        .map(|_| {
            const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
            CHARS[rng.random_range(0..CHARS.len())] as char
        })
        .collect();
    format!("folio-boundary-{suffix}")
}

/// Base64-encode `data`, wrapped at 76 characters per line, CRLF-terminated.
pub fn base64_wrapped(data: &[u8]) -> String {
    use base64::Engine;
    let encoded = base64::engine::general_purpose::STANDARD.encode(data);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / BASE64_LINE_LEN * 2);
    for chunk in encoded.as_bytes().chunks(BASE64_LINE_LEN) {
        out.push_str(std::str::from_utf8(chunk).expect("base64 output is ascii"));
        out.push_str("\r\n");
    }
    out
}

/// Escape a filename for use in a `Content-Disposition` header per RFC 2047's
/// quoted-string rules: backslash and double-quote are backslash-escaped.
pub fn escape_filename(name: &str) -> String {
    name.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Build the full `multipart/mixed` body: a short `text/plain` intro part
/// followed by a single base64 attachment part.
pub fn build_message_body(
    boundary: &str,
    intro_text: &str,
    attachment_name: &str,
    mime_type: &str,
    attachment_bytes: &[u8],
) -> String {
    let escaped_name = escape_filename(attachment_name);
    let mut body = String::new();

    body.push_str(&format!("--{boundary}\r\n"));
    body.push_str("Content-Type: text/plain; charset=\"utf-8\"\r\n");
    body.push_str("Content-Transfer-Encoding: 7bit\r\n\r\n");
    body.push_str(intro_text);
    body.push_str("\r\n\r\n");

    body.push_str(&format!("--{boundary}\r\n"));
    body.push_str(&format!("Content-Type: {mime_type}; name=\"{escaped_name}\"\r\n"));
    body.push_str("Content-Transfer-Encoding: base64\r\n");
    body.push_str(&format!(
        "Content-Disposition: attachment; filename=\"{escaped_name}\"\r\n\r\n"
    ));
    body.push_str(&base64_wrapped(attachment_bytes));
    body.push_str("\r\n");

    body.push_str(&format!("--{boundary}--\r\n"));
    body
}
