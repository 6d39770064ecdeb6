//! Invitation mail composition and delivery.

use crate::error::StepError;
use crate::render::run_program;
use base64::Engine as _;
use rand::RngCore;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

const CRLF: &str = "\r\n";

pub trait Mailer: Send {
    fn deliver(&self, to: &str, message: &str) -> Result<(), StepError>;
}

/// Pipes the message to a sendmail-compatible program (`sendmail -t -i`, `msmtp -t`, ...).
pub struct SendmailMailer {
    program: String,
    args: Vec<String>,
}

impl SendmailMailer {
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl Mailer for SendmailMailer {
    fn deliver(&self, _to: &str, message: &str) -> Result<(), StepError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        run_program(&self.program, &mut cmd, Some(message.as_bytes()))
    }
}

/// Writes each message as an `.eml` file instead of sending it. Messages to
/// an address that already has a file get a numbered suffix.
pub struct OutboxMailer {
    dir: PathBuf,
}

impl OutboxMailer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Mailer for OutboxMailer {
    fn deliver(&self, to: &str, message: &str) -> Result<(), StepError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| StepError::io(format!("create {}", self.dir.display()), e))?;
        let safe: String = to
            .trim()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || "@.-_+".contains(c) { c } else { '_' })
            .collect();
        for n in 1u32.. {
            let name = if n == 1 {
                format!("{safe}.eml")
            } else {
                format!("{safe}-{n}.eml")
            };
            let path = self.dir.join(name);
            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(f) => f,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(StepError::io(format!("create {}", path.display()), e)),
            };
            return file
                .write_all(message.as_bytes())
                .map_err(|e| StepError::io(format!("write {}", path.display()), e));
        }
        Err(StepError::io(
            format!("write {}", self.dir.display()),
            std::io::Error::other("outbox is full"),
        ))
    }
}

fn random_token() -> String {
    let mut b = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut b);
    b.iter().map(|x| format!("{x:02x}")).collect()
}

/// RFC 2047 encoded-word for non-ASCII header text.
fn encode_header(text: &str) -> String {
    if text.is_ascii() {
        text.to_string()
    } else {
        format!(
            "=?UTF-8?B?{}?=",
            base64::engine::general_purpose::STANDARD.encode(text.as_bytes())
        )
    }
}

fn wrap_base64(data: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(data);
    encoded
        .as_bytes()
        .chunks(76)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect::<Vec<_>>()
        .join(CRLF)
}

fn rfc2822_now() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc2822)
        .unwrap_or_default()
}

/// Build an HTML mail showing the invitation image inline.
pub fn compose_invitation(
    from: &str,
    to: &str,
    subject: &str,
    image: &Path,
) -> Result<String, StepError> {
    let data = std::fs::read(image)
        .map_err(|e| StepError::io(format!("read {}", image.display()), e))?;
    let file_name = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "invitation.png".into());
    let file_name = encode_header(&file_name).replace('"', "'");

    let token = random_token();
    let boundary = format!("=_invite_{token}");
    let cid = format!("{token}@invite-merge");

    let html = format!(
        "<html>{CRLF}\
         <head><style>img {{ max-width: 900px; width: 100%; height: auto; }}</style></head>{CRLF}\
         <body>{CRLF}\
         <img src=\"cid:{cid}\" style=\"width: 900px; max-width: 100%; height: auto;\">{CRLF}\
         </body>{CRLF}\
         </html>"
    );

    let mut m = String::new();
    let mut line = |s: &str| {
        m.push_str(s);
        m.push_str(CRLF);
    };
    line(&format!("From: {}", from.trim()));
    line(&format!("To: {}", to.trim()));
    line(&format!("Subject: {}", encode_header(subject)));
    line(&format!("Date: {}", rfc2822_now()));
    line(&format!("Message-ID: <{}@invite-merge>", random_token()));
    line("MIME-Version: 1.0");
    line(&format!(
        "Content-Type: multipart/related; boundary=\"{boundary}\"; type=\"text/html\""
    ));
    line("");
    line(&format!("--{boundary}"));
    line("Content-Type: text/html; charset=\"utf-8\"");
    line("Content-Transfer-Encoding: 7bit");
    line("");
    line(&html);
    line(&format!("--{boundary}"));
    line(&format!("Content-Type: image/png; name=\"{file_name}\""));
    line("Content-Transfer-Encoding: base64");
    line(&format!("Content-ID: <{cid}>"));
    line(&format!("Content-Disposition: inline; filename=\"{file_name}\""));
    line("");
    line(&wrap_base64(&data));
    line(&format!("--{boundary}--"));
    Ok(m)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_image(dir: &Path) -> PathBuf {
        let path = dir.join("Invitation - Anna B Lee.png");
        std::fs::write(&path, vec![0x89u8; 200]).unwrap();
        path
    }

    #[test]
    fn cid_reference_matches_image_part() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_image(dir.path());
        let msg = compose_invitation("host@example.org", "anna@example.org", "Invitation", &image)
            .unwrap();

        let cid_start = msg.find("cid:").unwrap() + 4;
        let cid_end = msg[cid_start..].find('"').unwrap() + cid_start;
        let cid = &msg[cid_start..cid_end];
        assert!(msg.contains(&format!("Content-ID: <{cid}>")));
        assert!(msg.contains("To: anna@example.org\r\n"));
        assert!(msg.contains("filename=\"Invitation - Anna B Lee.png\""));
        assert!(msg.lines().all(|l| l.len() <= 998));
    }

    #[test]
    fn non_ascii_subject_is_encoded() {
        assert_eq!(encode_header("Hello"), "Hello");
        assert!(encode_header("초대장").starts_with("=?UTF-8?B?"));
    }

    #[test]
    fn outbox_writes_eml_per_recipient() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = OutboxMailer::new(dir.path().join("outbox"));
        outbox.deliver("Anna <anna@example.org>", "body").unwrap();
        let written = dir.path().join("outbox").join("Anna__anna@example.org_.eml");
        assert_eq!(std::fs::read_to_string(written).unwrap(), "body");
    }

    #[test]
    fn outbox_keeps_every_message_to_a_shared_address() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = OutboxMailer::new(dir.path());
        outbox.deliver("family@example.org", "for Anna").unwrap();
        outbox.deliver("family@example.org", "for Ben").unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("family@example.org.eml")).unwrap(),
            "for Anna"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("family@example.org-2.eml")).unwrap(),
            "for Ben"
        );
    }

    #[test]
    fn missing_image_fails_composition() {
        let err = compose_invitation("a@b.co", "c@d.co", "x", Path::new("/nope/none.png"))
            .unwrap_err();
        assert!(matches!(err, StepError::Io { .. }));
    }
}
