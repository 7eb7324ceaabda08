//! MIME message composer.
//!
//! Builds the RFC 5322 message piped to sendmail and proxmox-mail-forward:
//! `multipart/alternative` (text + HTML), wrapped in `multipart/mixed` when
//! the backup log is attached. Lines end with `\n`; both consumers accept
//! bare newlines on stdin.

use std::fmt::Write as _;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, FixedOffset};

/// Recipient used when none is known; the local MTA routes it.
pub const DEFAULT_RECIPIENT: &str = "root";

const BASE64_LINE: usize = 76;

/// A file attached to the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub data: Vec<u8>,
}

impl Attachment {
    /// Read a file to attach.
    ///
    /// Returns `Err` with a printable reason when the file cannot be read;
    /// callers fall back to a message without attachment.
    pub async fn load(path: &Path) -> Result<Self, String> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "backup.log".to_string());
        Ok(Self { filename, data })
    }
}

/// Everything needed to compose one message.
#[derive(Debug, Clone)]
pub struct MailMessage<'a> {
    pub to: &'a str,
    pub from: &'a str,
    pub subject: &'a str,
    pub text: &'a str,
    pub html: &'a str,
    pub attachment: Option<Attachment>,
}

/// Compose the message with the current local time as `Date`.
pub fn compose(message: &MailMessage<'_>) -> String {
    compose_at(message, chrono::Local::now().fixed_offset())
}

/// Compose the message at a fixed date (boundaries derive from it).
pub fn compose_at(message: &MailMessage<'_>, date: DateTime<FixedOffset>) -> String {
    let seed = date.timestamp();
    let alt_boundary = format!("----=_proxsave_alt_{}", seed);
    let mixed_boundary = format!("----=_proxsave_mixed_{}", seed);

    let to = header_safe(message.to);
    let to = if to.is_empty() { DEFAULT_RECIPIENT.to_string() } else { to };

    let mut out = String::with_capacity(message.text.len() + message.html.len() + 1024);
    let _ = writeln!(out, "To: {}", to);
    let _ = writeln!(out, "From: {}", header_safe(message.from));
    let _ = writeln!(out, "Subject: {}", encode_subject(message.subject));
    out.push_str("MIME-Version: 1.0\n");
    let _ = writeln!(out, "Date: {}", date.to_rfc2822());
    out.push_str("Auto-Submitted: auto-generated\n");

    match &message.attachment {
        None => {
            let _ = writeln!(
                out,
                "Content-Type: multipart/alternative; boundary=\"{}\"",
                alt_boundary
            );
            out.push('\n');
            out.push_str("This is a multi-part message in MIME format.\n");
            write_alternative(&mut out, &alt_boundary, message.text, message.html);
        }
        Some(attachment) => {
            let _ = writeln!(
                out,
                "Content-Type: multipart/mixed; boundary=\"{}\"",
                mixed_boundary
            );
            out.push('\n');
            out.push_str("This is a multi-part message in MIME format.\n");
            let _ = writeln!(out, "\n--{}", mixed_boundary);
            let _ = writeln!(
                out,
                "Content-Type: multipart/alternative; boundary=\"{}\"",
                alt_boundary
            );
            write_alternative(&mut out, &alt_boundary, message.text, message.html);

            let filename = header_safe(&attachment.filename).replace('"', "");
            let _ = writeln!(out, "\n--{}", mixed_boundary);
            let _ = writeln!(out, "Content-Type: text/plain; charset=UTF-8; name=\"{}\"", filename);
            out.push_str("Content-Transfer-Encoding: base64\n");
            let _ = writeln!(out, "Content-Disposition: attachment; filename=\"{}\"", filename);
            out.push('\n');
            out.push_str(&wrap_base64(&attachment.data));
            let _ = writeln!(out, "--{}--", mixed_boundary);
        }
    }
    out
}

fn write_alternative(out: &mut String, boundary: &str, text: &str, html: &str) {
    let _ = writeln!(out, "\n--{}", boundary);
    out.push_str("Content-Type: text/plain; charset=UTF-8\n");
    out.push_str("Content-Transfer-Encoding: 8bit\n\n");
    out.push_str(text);
    if !text.ends_with('\n') {
        out.push('\n');
    }
    let _ = writeln!(out, "\n--{}", boundary);
    out.push_str("Content-Type: text/html; charset=UTF-8\n");
    out.push_str("Content-Transfer-Encoding: 8bit\n\n");
    out.push_str(html);
    if !html.ends_with('\n') {
        out.push('\n');
    }
    let _ = writeln!(out, "\n--{}--", boundary);
}

/// RFC 2047 `=?UTF-8?B?...?=` encoded subject.
pub fn encode_subject(subject: &str) -> String {
    format!("=?UTF-8?B?{}?=", BASE64.encode(header_safe(subject)))
}

/// Strip CR and LF so a value can not inject extra header lines.
pub fn header_safe(value: &str) -> String {
    value
        .chars()
        .filter(|c| *c != '\r' && *c != '\n')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Base64 with lines wrapped at 76 columns, trailing newline included.
pub fn wrap_base64(data: &[u8]) -> String {
    let encoded = BASE64.encode(data);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / BASE64_LINE + 1);
    // base64 output is ASCII, so byte chunks are char chunks
    for chunk in encoded.as_bytes().chunks(BASE64_LINE) {
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_date() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 10, 19, 2, 31, 0)
            .unwrap()
    }

    fn message(to: &str) -> MailMessage<'_> {
        MailMessage {
            to,
            from: "backup@pve01.example.com",
            subject: "✅ PVE Backup on pve01 - 2026-10-19 02:30",
            text: "plain body",
            html: "<p>html body</p>",
            attachment: None,
        }
    }

    fn to_lines(raw: &str) -> Vec<&str> {
        raw.lines().filter(|l| l.starts_with("To:")).collect()
    }

    #[test]
    fn alternative_layout() {
        let raw = compose_at(&message("admin@example.com"), fixed_date());
        assert!(raw.contains("To: admin@example.com\n"));
        assert!(raw.contains("From: backup@pve01.example.com\n"));
        assert!(raw.contains("MIME-Version: 1.0\n"));
        assert!(raw.contains("Content-Type: multipart/alternative; boundary="));
        assert!(!raw.contains("multipart/mixed"));
        assert!(raw.contains("Content-Type: text/plain; charset=UTF-8\nContent-Transfer-Encoding: 8bit\n\nplain body"));
        assert!(raw.contains("Content-Type: text/html; charset=UTF-8"));
        assert!(raw.contains("Date: Mon, 19 Oct 2026 02:31:00 +0200"));
        assert!(raw.trim_end().ends_with("--"));
    }

    #[test]
    fn exactly_one_to_line_and_root_default() {
        for to in ["admin@example.com", "", "  ", "evil@example.com\r\nBcc: x@example.com"] {
            let raw = compose_at(&message(to), fixed_date());
            assert_eq!(to_lines(&raw).len(), 1, "to={:?}", to);
            assert!(!raw.contains("\nBcc:"));
        }
        let raw = compose_at(&message(""), fixed_date());
        assert!(raw.contains("To: root\n"));
    }

    #[test]
    fn subject_is_rfc2047_base64() {
        let encoded = encode_subject("✅ PVE Backup");
        assert!(encoded.starts_with("=?UTF-8?B?"));
        assert!(encoded.ends_with("?="));
        let inner = &encoded["=?UTF-8?B?".len()..encoded.len() - 2];
        let decoded = BASE64.decode(inner).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), "✅ PVE Backup");
    }

    #[test]
    fn mixed_layout_with_wrapped_attachment() {
        let mut msg = message("admin@example.com");
        msg.attachment = Some(Attachment {
            filename: "backup.log".to_string(),
            data: vec![b'x'; 500],
        });
        let raw = compose_at(&msg, fixed_date());
        assert!(raw.contains("Content-Type: multipart/mixed; boundary="));
        assert!(raw.contains("Content-Type: multipart/alternative; boundary="));
        assert!(raw.contains("Content-Transfer-Encoding: base64\n"));
        assert!(raw.contains("Content-Disposition: attachment; filename=\"backup.log\"\n"));

        let body_start = raw.find("filename=\"backup.log\"\n\n").unwrap();
        let encoded: Vec<&str> = raw[body_start..]
            .lines()
            .skip(2)
            .take_while(|l| !l.starts_with("--"))
            .collect();
        assert!(encoded.iter().all(|l| l.len() <= 76));
        assert_eq!(encoded[0].len(), 76);
        let joined: String = encoded.concat();
        assert_eq!(BASE64.decode(joined).unwrap(), vec![b'x'; 500]);
    }

    #[test]
    fn wrap_base64_short_input() {
        assert_eq!(wrap_base64(b"hi"), "aGk=\n");
        assert_eq!(wrap_base64(b""), "");
    }

    #[tokio::test]
    async fn attachment_load_uses_basename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup-2026.log");
        std::fs::write(&path, "log line\n").unwrap();
        let attachment = Attachment::load(&path).await.unwrap();
        assert_eq!(attachment.filename, "backup-2026.log");
        assert_eq!(attachment.data, b"log line\n");
    }

    #[tokio::test]
    async fn attachment_load_reports_unreadable_file() {
        let err = Attachment::load(Path::new("/nonexistent/proxsave/backup.log"))
            .await
            .unwrap_err();
        assert!(err.contains("/nonexistent/proxsave/backup.log"));
    }
}
