//! Bodies of the transactional emails the service sends.

use crate::domain::{Role, UserEmail};
use crate::email_client::EmailClient;

pub struct Notification {
    pub subject: String,
    pub text: String,
    pub html: String,
}

impl Notification {
    fn new(subject: impl Into<String>, text: String, body_html: String) -> Self {
        let subject = subject.into();
        let html = format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta http-equiv="content-type" content="text/html; charset=utf-8">
<title>{subject}</title>
</head>
<body>
{body_html}
<p>Flexy Legal</p>
</body>
</html>"#
        );
        Self {
            subject,
            text,
            html,
        }
    }
}

pub fn otp(name: &str, otp: u32, ttl_minutes: i64) -> Notification {
    Notification::new(
        "Your verification code",
        format!(
            "Hello {name},\n\nYour verification code is {otp}.\n\
            It expires in {ttl_minutes} minutes."
        ),
        format!(
            "<p>Hello {name},</p>\
            <p>Your verification code is <strong>{otp}</strong>.</p>\
            <p>It expires in {ttl_minutes} minutes.</p>"
        ),
    )
}

pub fn registration_pending(name: &str) -> Notification {
    Notification::new(
        "Your registration request was received",
        format!(
            "Hello {name},\n\nThanks for signing up. An administrator will \
            review your request and you will be notified of the decision."
        ),
        format!(
            "<p>Hello {name},</p>\
            <p>Thanks for signing up. An administrator will review your \
            request and you will be notified of the decision.</p>"
        ),
    )
}

pub fn registration_approved(name: &str, login_link: &str) -> Notification {
    Notification::new(
        "Your registration was approved",
        format!(
            "Hello {name},\n\nYour account is ready. Sign in at {login_link} \
            with the verification code we sent you."
        ),
        format!(
            "<p>Hello {name},</p>\
            <p>Your account is ready. <a href=\"{login_link}\">Sign in</a> \
            with the verification code we sent you.</p>"
        ),
    )
}

pub fn registration_rejected(name: &str, admin_notes: Option<&str>) -> Notification {
    let (notes_text, notes_html) = match admin_notes {
        Some(notes) => (
            format!("\n\nNotes from the reviewer: {notes}"),
            format!("<p>Notes from the reviewer: {notes}</p>"),
        ),
        None => (String::new(), String::new()),
    };

    Notification::new(
        "Your registration request was declined",
        format!(
            "Hello {name},\n\nUnfortunately your registration request was \
            not approved.{notes_text}"
        ),
        format!(
            "<p>Hello {name},</p>\
            <p>Unfortunately your registration request was not approved.</p>\
            {notes_html}"
        ),
    )
}

pub fn password_reset(name: &str, reset_link: &str, ttl_minutes: i64) -> Notification {
    Notification::new(
        "Reset your password",
        format!(
            "Hello {name},\n\nUse this link to choose a new password: \
            {reset_link}\nThe link expires in {ttl_minutes} minutes. If you \
            did not ask for a reset you can ignore this email."
        ),
        format!(
            "<p>Hello {name},</p>\
            <p><a href=\"{reset_link}\">Choose a new password</a>. The link \
            expires in {ttl_minutes} minutes.</p>\
            <p>If you did not ask for a reset you can ignore this email.</p>"
        ),
    )
}

pub fn team_invitation(
    leader_name: &str,
    role: Role,
    join_link: &str,
) -> Notification {
    Notification::new(
        format!("{leader_name} invited you to their team"),
        format!(
            "{leader_name} invited you to join their team as {role}.\n\
            Accept the invitation: {join_link}"
        ),
        format!(
            "<p>{leader_name} invited you to join their team as {role}.</p>\
            <p><a href=\"{join_link}\">Accept the invitation</a></p>"
        ),
    )
}

/// Sends a notification whose failure must not fail the caller.
pub async fn send_best_effort(
    email_client: &EmailClient,
    recipient: &UserEmail,
    notification: Notification,
) {
    if let Err(e) = email_client
        .send_email(
            recipient,
            &notification.subject,
            &notification.text,
            &notification.html,
        )
        .await
    {
        tracing::warn!(
            error.cause_chain = ?e,
            subject = %notification.subject,
            "Failed to send a notification email"
        );
    }
}
