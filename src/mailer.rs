use std::sync::Mutex;

use tracing::info;

#[derive(Clone, Debug, PartialEq)]
pub struct ActivationMail {
    pub to: String,
    pub username: String,
    pub link: String,
}

/// Delivery of account mails. Registration succeeds whether or not delivery does.
pub trait Mailer: Send + Sync {
    fn send_activation(&self, mail: ActivationMail);
}

/// Writes the activation link to the log instead of sending it.
#[derive(Debug, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send_activation(&self, mail: ActivationMail) {
        info!(
            to = %mail.to,
            username = %mail.username,
            link = %mail.link,
            "Activation mail (not delivered)"
        );
    }
}

/// Keeps every mail in memory so callers can read the links back.
#[derive(Debug, Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<ActivationMail>>,
}

impl MemoryMailer {
    pub fn sent(&self) -> Vec<ActivationMail> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    pub fn last_for(&self, username: &str) -> Option<ActivationMail> {
        self.sent()
            .into_iter()
            .rev()
            .find(|mail| mail.username == username)
    }
}

impl Mailer for MemoryMailer {
    fn send_activation(&self, mail: ActivationMail) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(mail);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mail(username: &str, link: &str) -> ActivationMail {
        ActivationMail {
            to: format!("{username}@example.com"),
            username: username.to_string(),
            link: link.to_string(),
        }
    }

    #[test]
    fn memory_mailer_returns_latest_mail_per_user() {
        let mailer = MemoryMailer::default();
        mailer.send_activation(mail("anna", "first"));
        mailer.send_activation(mail("bob", "other"));
        mailer.send_activation(mail("anna", "second"));

        assert_eq!(mailer.sent().len(), 3);
        assert_eq!(mailer.last_for("anna").unwrap().link, "second");
        assert!(mailer.last_for("carl").is_none());
    }
}
