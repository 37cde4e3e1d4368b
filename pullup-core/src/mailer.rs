use async_trait::async_trait;
use log::info;

/// The SMTP collaborator. Sends are fired from background tasks, so a failed
/// send is logged by the caller and never fails a request.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verification(&self, email: &str, token: &str) -> Result<(), String>;
    async fn send_password_reset(&self, email: &str, token: &str) -> Result<(), String>;
}

/// Logs instead of sending. Used in development and tests.
#[derive(Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_verification(&self, email: &str, _token: &str) -> Result<(), String> {
        info!("Would send verification mail to {email}");
        Ok(())
    }

    async fn send_password_reset(&self, email: &str, _token: &str) -> Result<(), String> {
        info!("Would send password reset mail to {email}");
        Ok(())
    }
}
