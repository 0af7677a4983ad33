//! Email and SMS bodies
//!
//! HTML parts are askama templates under `templates/email/`, escaped on
//! render. Plain-text parts and SMS bodies are formatted here.

use super::{EmailMessage, NotifyError, SmsMessage};
use askama::Template;
use chrono::{DateTime, Utc};
use tm_common::db::{Booking, Person, Therapist};

#[derive(Template)]
#[template(path = "email/lead_confirmation.html")]
struct LeadConfirmationHtml<'a> {
    first_name: &'a str,
    confirm_url: &'a str,
}

struct ProposalItem {
    name: String,
    city: String,
    modalities: String,
    url: String,
}

#[derive(Template)]
#[template(path = "email/proposals.html")]
struct ProposalsHtml<'a> {
    first_name: &'a str,
    proposals: Vec<ProposalItem>,
}

#[derive(Template)]
#[template(path = "email/therapist_selected.html")]
struct TherapistSelectedHtml<'a> {
    therapist_name: &'a str,
    patient_name: &'a str,
    issue: Option<&'a str>,
    preference: String,
    respond_url: &'a str,
}

#[derive(Template)]
#[template(path = "email/patient_accepted.html")]
struct PatientAcceptedHtml<'a> {
    first_name: &'a str,
    therapist_name: String,
    therapist_email: &'a str,
    therapist_phone: Option<&'a str>,
    booking_url: Option<&'a str>,
}

#[derive(Template)]
#[template(path = "email/patient_declined.html")]
struct PatientDeclinedHtml<'a> {
    first_name: &'a str,
    therapist_name: String,
}

#[derive(Template)]
#[template(path = "email/booking_confirmation.html")]
struct BookingConfirmationHtml<'a> {
    first_name: &'a str,
    therapist_name: String,
    when: &'a str,
}

#[derive(Template)]
#[template(path = "email/therapist_reminder.html")]
struct TherapistReminderHtml<'a> {
    therapist_name: &'a str,
    patient_name: &'a str,
    respond_url: &'a str,
}

fn format_start(start: DateTime<Utc>) -> String {
    start.format("%d.%m.%Y %H:%M UTC").to_string()
}

pub fn lead_confirmation(person: &Person, confirm_url: &str) -> Result<EmailMessage, NotifyError> {
    let html = LeadConfirmationHtml {
        first_name: person.first_name(),
        confirm_url,
    }
    .render()?;

    Ok(EmailMessage {
        to: person.email.clone(),
        subject: "Please confirm your email address".to_string(),
        html,
        text: format!(
            "Hello {},\n\nplease confirm your email address:\n{}\n",
            person.first_name(),
            confirm_url
        ),
    })
}

/// Patient receives their proposals, one selection link per therapist
pub fn proposals_ready(patient: &Person, proposals: &[(Therapist, String)]) -> Result<EmailMessage, NotifyError> {
    let mut text_items = String::new();
    let mut items = Vec::with_capacity(proposals.len());
    for (therapist, url) in proposals {
        text_items.push_str(&format!("- {}: {}\n", therapist.full_name(), url));
        items.push(ProposalItem {
            name: therapist.full_name(),
            city: therapist.city.clone().unwrap_or_default(),
            modalities: therapist.modality_list().join(", "),
            url: url.clone(),
        });
    }

    let html = ProposalsHtml {
        first_name: patient.first_name(),
        proposals: items,
    }
    .render()?;

    Ok(EmailMessage {
        to: patient.email.clone(),
        subject: "Your therapist suggestions".to_string(),
        html,
        text: format!(
            "Hello {},\n\nwe found therapists who match your request:\n\n{}",
            patient.first_name(),
            text_items
        ),
    })
}

/// Therapist learns that a patient chose them
pub fn therapist_selected(
    therapist: &Therapist,
    patient: &Person,
    respond_url: &str,
) -> Result<EmailMessage, NotifyError> {
    let html = TherapistSelectedHtml {
        therapist_name: &therapist.first_name,
        patient_name: patient.first_name(),
        issue: patient.issue.as_deref().filter(|i| !i.trim().is_empty()),
        preference: patient.session_preference.replace('_', " "),
        respond_url,
    }
    .render()?;

    Ok(EmailMessage {
        to: therapist.email.clone(),
        subject: "New client request".to_string(),
        html,
        text: format!(
            "Hello {},\n\n{} would like to start therapy with you. Respond here:\n{}\n",
            therapist.first_name,
            patient.first_name(),
            respond_url
        ),
    })
}

pub fn therapist_selected_sms(patient: &Person, respond_url: &str, to: String) -> SmsMessage {
    SmsMessage {
        to,
        body: format!(
            "New client request from {}. Please respond: {}",
            patient.first_name(),
            respond_url
        ),
    }
}

/// Therapist accepted; patient gets contact details and the booking page
pub fn patient_accepted(
    patient: &Person,
    therapist: &Therapist,
    booking_url: Option<&str>,
) -> Result<EmailMessage, NotifyError> {
    let html = PatientAcceptedHtml {
        first_name: patient.first_name(),
        therapist_name: therapist.full_name(),
        therapist_email: &therapist.email,
        therapist_phone: therapist.phone.as_deref(),
        booking_url,
    }
    .render()?;

    let mut text = format!(
        "Hello {},\n\n{} has accepted your request.\nEmail: {}\n",
        patient.first_name(),
        therapist.full_name(),
        therapist.email
    );
    if let Some(url) = booking_url {
        text.push_str(&format!("Book your first session: {}\n", url));
    }

    Ok(EmailMessage {
        to: patient.email.clone(),
        subject: format!("{} accepted your request", therapist.full_name()),
        html,
        text,
    })
}

/// Therapist declined; patient can pick another suggestion
pub fn patient_declined(patient: &Person, therapist: &Therapist) -> Result<EmailMessage, NotifyError> {
    let html = PatientDeclinedHtml {
        first_name: patient.first_name(),
        therapist_name: therapist.full_name(),
    }
    .render()?;

    Ok(EmailMessage {
        to: patient.email.clone(),
        subject: "Update on your therapist request".to_string(),
        html,
        text: format!(
            "Hello {},\n\nunfortunately {} cannot take on new clients at the moment. \
             You can choose another of your suggestions or reply to this email.\n",
            patient.first_name(),
            therapist.full_name()
        ),
    })
}

pub fn booking_confirmation(
    patient: &Person,
    therapist: &Therapist,
    booking: &Booking,
) -> Result<EmailMessage, NotifyError> {
    let when = format_start(booking.start_time);
    let html = BookingConfirmationHtml {
        first_name: patient.first_name(),
        therapist_name: therapist.full_name(),
        when: &when,
    }
    .render()?;

    Ok(EmailMessage {
        to: patient.email.clone(),
        subject: format!("Session booked with {}", therapist.full_name()),
        html,
        text: format!(
            "Hello {},\n\nyour first session with {} is booked for {}.\n",
            patient.first_name(),
            therapist.full_name(),
            when
        ),
    })
}

pub fn therapist_reminder(
    therapist: &Therapist,
    patient: &Person,
    respond_url: &str,
) -> Result<EmailMessage, NotifyError> {
    let html = TherapistReminderHtml {
        therapist_name: &therapist.first_name,
        patient_name: patient.first_name(),
        respond_url,
    }
    .render()?;

    Ok(EmailMessage {
        to: therapist.email.clone(),
        subject: "Reminder: a client is waiting for your answer".to_string(),
        html,
        text: format!(
            "Hello {},\n\n{} is still waiting for your answer:\n{}\n",
            therapist.first_name,
            patient.first_name(),
            respond_url
        ),
    })
}

pub fn patient_reminder(patient: &Person, proposals: &[(Therapist, String)]) -> Result<EmailMessage, NotifyError> {
    let mut message = proposals_ready(patient, proposals)?;
    message.subject = "Reminder: your therapist suggestions are waiting".to_string();
    Ok(message)
}
