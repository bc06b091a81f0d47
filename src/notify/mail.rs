//! Mail Notifier
//!
//! [`MailService`] builds messages from [`MailConfig`] and hands them to a
//! [`MailTransport`]. The default transport writes messages to the log.

use log::{error, info};

use super::Notifier;
use crate::config::MailConfig;
use crate::error::NotifyError;

/// A fully addressed message.
#[derive(Debug, Clone, PartialEq)]
pub struct MailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// The submission server and the account used to log in to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailServer<'a> {
    pub host: &'a str,
    pub username: Option<&'a str>,
    pub password: Option<&'a str>,
}

/// Delivers a message.
pub trait MailTransport: Send + Sync {
    fn deliver(&self, server: &MailServer<'_>, message: &MailMessage) -> Result<(), NotifyError>;
}

/// Transport that logs each message instead of delivering it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

impl MailTransport for LogTransport {
    fn deliver(&self, server: &MailServer<'_>, message: &MailMessage) -> Result<(), NotifyError> {
        info!(
            "Mail via {} as {} from {} to {}: {}",
            server.host,
            server.username.unwrap_or("anonymous"),
            message.from,
            message.to.join(","),
            message.subject
        );
        Ok(())
    }
}

pub struct MailService {
    config: Option<MailConfig>,
    transport: Box<dyn MailTransport>,
}

impl MailService {
    /// Creates a service with the logging transport.
    ///
    /// Without a config, messages are logged with a placeholder sender.
    pub fn new(config: Option<MailConfig>) -> Self {
        Self {
            config,
            transport: Box::new(LogTransport),
        }
    }

    pub fn with_transport(mut self, transport: impl MailTransport + 'static) -> Self {
        self.transport = Box::new(transport);
        self
    }

    fn server(&self) -> MailServer<'_> {
        match &self.config {
            Some(config) => MailServer {
                host: &config.host,
                username: config.username.as_deref(),
                password: config.password.as_deref(),
            },
            None => MailServer {
                host: "localhost",
                username: None,
                password: None,
            },
        }
    }

    fn sender(&self) -> &str {
        self.config
            .as_ref()
            .map(|c| c.sender.as_str())
            .unwrap_or("flowrunner@localhost")
    }

    fn admins(&self) -> &[String] {
        self.config.as_ref().map(|c| c.admins.as_slice()).unwrap_or(&[])
    }
}

impl Notifier for MailService {
    fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<(), NotifyError> {
        if recipients.is_empty() {
            return Err(NotifyError::NoRecipients);
        }

        let message = MailMessage {
            from: self.sender().to_string(),
            to: recipients.to_vec(),
            subject: subject.to_string(),
            body: body.to_string(),
        };
        self.transport.deliver(&self.server(), &message)
    }

    fn send_serious_error(&self, trace: &str) -> Result<(), NotifyError> {
        let admins = self.admins();
        if admins.is_empty() {
            error!("Serious error with no admin recipients configured: {}", trace);
            return Ok(());
        }
        self.send(admins, "[flowrunner] Serious error", trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct CapturingTransport {
        sent: Arc<Mutex<Vec<(String, Option<String>, MailMessage)>>>,
    }

    impl MailTransport for CapturingTransport {
        fn deliver(
            &self,
            server: &MailServer<'_>,
            message: &MailMessage,
        ) -> Result<(), NotifyError> {
            self.sent.lock().push((
                server.host.to_string(),
                server.username.map(str::to_string),
                message.clone(),
            ));
            Ok(())
        }
    }

    fn mail_config() -> MailConfig {
        MailConfig {
            host: "smtp.example.com".to_string(),
            sender: "engine@example.com".to_string(),
            admins: vec!["ops@example.com".to_string()],
            ..MailConfig::default()
        }
    }

    #[test]
    fn test_send_uses_config() {
        let transport = CapturingTransport::default();
        let service = MailService::new(Some(mail_config())).with_transport(transport.clone());

        service
            .send(&["a@example.com".to_string()], "subject", "body")
            .unwrap();

        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "smtp.example.com");
        assert_eq!(sent[0].1, None);
        assert_eq!(sent[0].2.from, "engine@example.com");
        assert_eq!(sent[0].2.to, vec!["a@example.com"]);
    }

    #[test]
    fn test_send_passes_credentials_to_transport() {
        let transport = CapturingTransport::default();
        let config = MailConfig {
            username: Some("engine".to_string()),
            password: Some("secret".to_string()),
            ..mail_config()
        };
        let service = MailService::new(Some(config)).with_transport(transport.clone());

        assert_eq!(service.server().password, Some("secret"));
        service
            .send(&["a@example.com".to_string()], "subject", "body")
            .unwrap();

        let sent = transport.sent.lock();
        assert_eq!(sent[0].1.as_deref(), Some("engine"));
    }

    #[test]
    fn test_send_without_recipients_fails() {
        let service = MailService::new(None);
        assert!(matches!(
            service.send(&[], "subject", "body"),
            Err(NotifyError::NoRecipients)
        ));
    }

    #[test]
    fn test_serious_error_goes_to_admins() {
        let transport = CapturingTransport::default();
        let service = MailService::new(Some(mail_config())).with_transport(transport.clone());

        service.send_serious_error("trace text").unwrap();

        let sent = transport.sent.lock();
        assert_eq!(sent[0].2.to, vec!["ops@example.com"]);
        assert_eq!(sent[0].2.body, "trace text");
    }

    #[test]
    fn test_serious_error_without_admins_is_logged_only() {
        let transport = CapturingTransport::default();
        let service = MailService::new(None).with_transport(transport.clone());

        assert!(service.send_serious_error("trace").is_ok());
        assert!(transport.sent.lock().is_empty());
    }
}
